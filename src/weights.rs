//! Weight loading: GGUF tensors dequantized into owned f32 storage
//!
//! [`load_weights`] resolves the model shape from metadata, then loads the
//! embedding, the optional LM head, and the nine per-block tensors for each
//! requested layer, enforcing the exact shapes the LLaMA architecture
//! dictates. Dequantization happens once at load; the step engine only ever
//! sees f32.

use crate::error::{InferirError, Result};
use crate::gguf::{
    checked_mul_u64, GGUFLoader, ModelConfig, TensorView, GGML_TYPE_F16, GGML_TYPE_F32,
    GGML_TYPE_Q4_K, GGML_TYPE_Q6_K,
};
use crate::quantize::{
    dequantize_f16_into, dequantize_q4_k_into, dequantize_q6_k_into, Q4_K_BLOCK_BYTES,
    Q6_K_BLOCK_BYTES, QK_K,
};
use crate::tensor::TensorF32;

/// Default alignment for dequantized weight storage
pub const WEIGHT_ALIGNMENT: usize = 64;

/// Model-wide tensors outside the transformer blocks
#[derive(Debug)]
pub struct GlobalWeights {
    /// Token embedding, `[d_model, vocab]`
    pub token_embd: TensorF32,
    /// Final norm before the LM head, `[d_model]`; loaded on request
    pub output_norm: Option<TensorF32>,
    /// LM head projection, `[d_model, vocab]`; loaded on request
    pub output: Option<TensorF32>,
}

/// The nine tensors of one transformer block
///
/// All matrices are column-contiguous `[in, out]`: column `j` starts at
/// element `j * in`.
#[derive(Debug)]
pub struct LayerWeights {
    /// Block index in the model
    pub index: u32,
    /// Attention RMSNorm weight, `[d_model]`
    pub attn_norm: TensorF32,
    /// Query projection, `[d_model, d_model]`
    pub attn_q: TensorF32,
    /// Key projection, `[d_model, kv_dim]`
    pub attn_k: TensorF32,
    /// Value projection, `[d_model, kv_dim]`
    pub attn_v: TensorF32,
    /// Attention output projection, `[d_model, d_model]`
    pub attn_output: TensorF32,
    /// FFN RMSNorm weight, `[d_model]`
    pub ffn_norm: TensorF32,
    /// SwiGLU gate projection, `[d_model, ffn_hidden]`
    pub ffn_gate: TensorF32,
    /// FFN up projection, `[d_model, ffn_hidden]`
    pub ffn_up: TensorF32,
    /// FFN down projection, `[ffn_hidden, d_model]`
    pub ffn_down: TensorF32,
}

/// Everything [`load_weights`] produces: config plus owned f32 tensors
#[derive(Debug)]
pub struct Weights {
    /// Shape parameters, with vocab recovered from the embedding if needed
    pub cfg: ModelConfig,
    /// Embedding and optional LM head
    pub global: GlobalWeights,
    /// Requested blocks, in request order
    pub layers: Vec<LayerWeights>,
}

fn expect_dims(view: &TensorView<'_>, expected: &[u64]) -> Result<()> {
    if view.dims != expected {
        return Err(InferirError::UnexpectedShape {
            name: view.name.to_string(),
            expected: expected.to_vec(),
            actual: view.dims.to_vec(),
        });
    }
    Ok(())
}

/// Dequantize one K-quant tensor row by row into `out`
fn dequantize_rows(
    view: &TensorView<'_>,
    out: &mut TensorF32,
    block_bytes: usize,
    dequant_row: fn(&[u8], &mut [f32]) -> Result<()>,
) -> Result<()> {
    let row_len = view.dims[0];
    if row_len % QK_K as u64 != 0 {
        return Err(InferirError::InvalidShape {
            reason: format!(
                "{}: row length {row_len} is not a multiple of {QK_K}",
                view.name
            ),
        });
    }
    let mut n_rows = 1u64;
    for &d in &view.dims[1..] {
        n_rows = checked_mul_u64(n_rows, d, &format!("row count of {}", view.name))?;
    }
    let blocks_per_row = row_len / QK_K as u64;
    let row_bytes = checked_mul_u64(
        blocks_per_row,
        block_bytes as u64,
        &format!("row bytes of {}", view.name),
    )?;
    let need = checked_mul_u64(row_bytes, n_rows, &format!("byte size of {}", view.name))?;
    if view.nbytes() < need {
        return Err(InferirError::Truncated {
            name: view.name.to_string(),
            have: view.nbytes(),
            need,
        });
    }

    // All of these fit in usize: the view slice exists in memory
    #[allow(clippy::cast_possible_truncation)]
    let (row_bytes, row_len) = (row_bytes as usize, row_len as usize);
    let dst = out.data_mut();
    for r in 0..n_rows as usize {
        let src = &view.data[r * row_bytes..(r + 1) * row_bytes];
        dequant_row(src, &mut dst[r * row_len..(r + 1) * row_len])?;
    }
    Ok(())
}

/// Load a tensor by name and dequantize it into aligned f32 storage
///
/// Supported source types: F32 (copied), F16, `Q4_K`, `Q6_K`.
///
/// # Errors
///
/// Returns `TensorNotFound`, `InvalidDim` for an empty or zero shape,
/// `Truncated` when the file holds fewer bytes than the shape needs,
/// `UnsupportedType` for other ggml types, and allocation or overflow
/// errors from the storage layer.
pub fn load_tensor_as_f32(loader: &GGUFLoader, name: &str, alignment: usize) -> Result<TensorF32> {
    let view = loader.tensor_view(name)?;
    if view.dims.is_empty() || view.dims.contains(&0) {
        return Err(InferirError::InvalidDim {
            reason: format!("tensor {name} has empty or zero dims: {:?}", view.dims),
        });
    }

    let mut out = TensorF32::zeroed(view.dims.to_vec(), alignment)?;

    match view.ggml_type {
        GGML_TYPE_F32 => {
            let need = checked_mul_u64(out.numel, 4, &format!("byte size of {name}"))?;
            if view.nbytes() < need {
                return Err(InferirError::Truncated {
                    name: name.to_string(),
                    have: view.nbytes(),
                    need,
                });
            }
            #[allow(clippy::cast_possible_truncation)]
            let src = &view.data[..need as usize];
            for (dst, chunk) in out.data_mut().iter_mut().zip(src.chunks_exact(4)) {
                *dst = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            }
            Ok(out)
        },
        GGML_TYPE_F16 => {
            let need = checked_mul_u64(out.numel, 2, &format!("byte size of {name}"))?;
            if view.nbytes() < need {
                return Err(InferirError::Truncated {
                    name: name.to_string(),
                    have: view.nbytes(),
                    need,
                });
            }
            #[allow(clippy::cast_possible_truncation)]
            dequantize_f16_into(&view.data[..need as usize], out.data_mut())?;
            Ok(out)
        },
        GGML_TYPE_Q4_K => {
            dequantize_rows(&view, &mut out, Q4_K_BLOCK_BYTES, dequantize_q4_k_into)?;
            Ok(out)
        },
        GGML_TYPE_Q6_K => {
            dequantize_rows(&view, &mut out, Q6_K_BLOCK_BYTES, dequantize_q6_k_into)?;
            Ok(out)
        },
        other => Err(InferirError::UnsupportedType {
            ggml_type: other,
            name: name.to_string(),
        }),
    }
}

/// Load the weight set for the requested layers
///
/// Resolves [`ModelConfig`] from metadata, recovers `vocab_size` from the
/// embedding when the metadata omits it, and enforces every tensor's shape.
///
/// # Errors
///
/// Returns `MissingMetadata` / `InvalidDim` for an unusable config,
/// `OutOfRange` for layer indices at or beyond `n_layers`,
/// `UnexpectedShape` on any shape mismatch, and everything
/// [`load_tensor_as_f32`] can produce.
pub fn load_weights(
    loader: &GGUFLoader,
    layer_indices: &[u32],
    load_lm_head: bool,
    alignment: usize,
) -> Result<Weights> {
    let mut cfg = loader.config()?;
    if cfg.n_layers == 0 {
        return Err(InferirError::MissingMetadata {
            key: "llama.block_count".to_string(),
        });
    }
    if cfg.d_model == 0 {
        return Err(InferirError::MissingMetadata {
            key: "llama.embedding_length".to_string(),
        });
    }
    if cfg.n_heads == 0 {
        return Err(InferirError::MissingMetadata {
            key: "llama.attention.head_count".to_string(),
        });
    }
    if cfg.ffn_hidden_dim == 0 {
        return Err(InferirError::MissingMetadata {
            key: "llama.feed_forward_length".to_string(),
        });
    }
    if cfg.head_dim == 0 || cfg.kv_dim == 0 {
        return Err(InferirError::InvalidDim {
            reason: format!(
                "head config unusable: d_model={} n_heads={} n_kv_heads={}",
                cfg.d_model, cfg.n_heads, cfg.n_kv_heads
            ),
        });
    }

    let token_embd = load_tensor_as_f32(loader, "token_embd.weight", alignment)?;
    if token_embd.dims.len() != 2 {
        return Err(InferirError::UnexpectedShape {
            name: "token_embd.weight".to_string(),
            expected: vec![u64::from(cfg.d_model), u64::from(cfg.vocab_size)],
            actual: token_embd.dims.clone(),
        });
    }
    if cfg.vocab_size == 0 {
        cfg.vocab_size =
            u32::try_from(token_embd.dims[1]).map_err(|_| InferirError::InvalidDim {
                reason: format!("vocab size {} exceeds u32", token_embd.dims[1]),
            })?;
    }
    expect_dims(
        &loader.tensor_view("token_embd.weight")?,
        &[u64::from(cfg.d_model), u64::from(cfg.vocab_size)],
    )?;

    let mut global = GlobalWeights {
        token_embd,
        output_norm: None,
        output: None,
    };

    if load_lm_head {
        let output_norm = load_tensor_as_f32(loader, "output_norm.weight", alignment)?;
        expect_dims(
            &loader.tensor_view("output_norm.weight")?,
            &[u64::from(cfg.d_model)],
        )?;
        global.output_norm = Some(output_norm);

        let output = load_tensor_as_f32(loader, "output.weight", alignment)?;
        expect_dims(
            &loader.tensor_view("output.weight")?,
            &[u64::from(cfg.d_model), u64::from(cfg.vocab_size)],
        )?;
        global.output = Some(output);
    }

    let d_model = u64::from(cfg.d_model);
    let kv_dim = u64::from(cfg.kv_dim);
    let ffn = u64::from(cfg.ffn_hidden_dim);

    let mut layers = Vec::with_capacity(layer_indices.len());
    for &i in layer_indices {
        if i >= cfg.n_layers {
            return Err(InferirError::OutOfRange {
                what: "layer index".to_string(),
                index: u64::from(i),
                limit: u64::from(cfg.n_layers),
            });
        }

        let prefix = format!("blk.{i}.");
        let load = |suffix: &str| load_tensor_as_f32(loader, &format!("{prefix}{suffix}"), alignment);
        let check = |suffix: &str, expected: &[u64]| -> Result<()> {
            expect_dims(&loader.tensor_view(&format!("{prefix}{suffix}"))?, expected)
        };

        let lw = LayerWeights {
            index: i,
            attn_norm: load("attn_norm.weight")?,
            attn_q: load("attn_q.weight")?,
            attn_k: load("attn_k.weight")?,
            attn_v: load("attn_v.weight")?,
            attn_output: load("attn_output.weight")?,
            ffn_norm: load("ffn_norm.weight")?,
            ffn_gate: load("ffn_gate.weight")?,
            ffn_up: load("ffn_up.weight")?,
            ffn_down: load("ffn_down.weight")?,
        };

        check("attn_norm.weight", &[d_model])?;
        check("attn_q.weight", &[d_model, d_model])?;
        check("attn_k.weight", &[d_model, kv_dim])?;
        check("attn_v.weight", &[d_model, kv_dim])?;
        check("attn_output.weight", &[d_model, d_model])?;
        check("ffn_norm.weight", &[d_model])?;
        check("ffn_gate.weight", &[d_model, ffn])?;
        check("ffn_up.weight", &[d_model, ffn])?;
        check("ffn_down.weight", &[ffn, d_model])?;

        layers.push(lw);
    }

    Ok(Weights {
        cfg,
        global,
        layers,
    })
}

/// Copy one embedding column into `out`
///
/// The embedding is `[dim, vocab]` with contiguous columns, so token `id`'s
/// vector is the `dim` floats starting at `id * dim`.
///
/// # Errors
///
/// Returns `InvalidDim` unless the tensor is 2-D and `out` has `dim`
/// elements, `OutOfRange` for a token id at or beyond the vocabulary.
pub fn gather_column(embedding: &TensorF32, token_id: u32, out: &mut [f32]) -> Result<()> {
    if embedding.dims.len() != 2 {
        return Err(InferirError::InvalidDim {
            reason: format!("gather expects a 2-D tensor, got {:?}", embedding.dims),
        });
    }
    let dim = embedding.dims[0];
    let vocab = embedding.dims[1];
    if u64::from(token_id) >= vocab {
        return Err(InferirError::OutOfRange {
            what: "token id".to_string(),
            index: u64::from(token_id),
            limit: vocab,
        });
    }
    if out.len() as u64 != dim {
        return Err(InferirError::InvalidDim {
            reason: format!("gather output length {} != dim {dim}", out.len()),
        });
    }

    #[allow(clippy::cast_possible_truncation)]
    let (dim, start) = (dim as usize, (u64::from(token_id) * dim) as usize);
    out.copy_from_slice(&embedding.data()[start..start + dim]);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_factory::{build_tiny_model, TinyModelSpec};
    use std::io::Write;

    fn write_temp_model(spec: &TinyModelSpec) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&build_tiny_model(spec)).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn test_load_weights_shapes() {
        let spec = TinyModelSpec::default();
        let file = write_temp_model(&spec);
        let loader = GGUFLoader::open(file.path()).unwrap();

        let w = load_weights(&loader, &[0], true, WEIGHT_ALIGNMENT).unwrap();
        assert_eq!(w.cfg.vocab_size, spec.vocab);
        assert_eq!(w.global.token_embd.dims, vec![u64::from(spec.d_model), u64::from(spec.vocab)]);
        assert!(w.global.output_norm.is_some());
        assert!(w.global.output.is_some());

        let lw = &w.layers[0];
        assert_eq!(lw.index, 0);
        let d = u64::from(spec.d_model);
        let kv = u64::from(spec.n_kv_heads * spec.d_model / spec.n_heads);
        assert_eq!(lw.attn_q.dims, vec![d, d]);
        assert_eq!(lw.attn_k.dims, vec![d, kv]);
        assert_eq!(lw.attn_v.dims, vec![d, kv]);
        assert_eq!(lw.ffn_down.dims, vec![u64::from(spec.ffn_hidden), d]);
        assert!(lw.attn_q.data().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_load_weights_without_lm_head() {
        let spec = TinyModelSpec::default();
        let file = write_temp_model(&spec);
        let loader = GGUFLoader::open(file.path()).unwrap();

        let w = load_weights(&loader, &[0], false, WEIGHT_ALIGNMENT).unwrap();
        assert!(w.global.output_norm.is_none());
        assert!(w.global.output.is_none());
    }

    #[test]
    fn test_layer_index_out_of_range() {
        let spec = TinyModelSpec::default();
        let file = write_temp_model(&spec);
        let loader = GGUFLoader::open(file.path()).unwrap();

        let err = load_weights(&loader, &[5], false, WEIGHT_ALIGNMENT).unwrap_err();
        assert!(matches!(
            err,
            InferirError::OutOfRange { what, index: 5, .. } if what == "layer index"
        ));
    }

    #[test]
    fn test_vocab_recovered_from_embedding() {
        // No vocab metadata key exists; the config reads it from the
        // second dim of token_embd.weight.
        let spec = TinyModelSpec::default();
        let file = write_temp_model(&spec);
        let loader = GGUFLoader::open(file.path()).unwrap();

        assert_eq!(loader.config().unwrap().vocab_size, spec.vocab);
    }

    #[test]
    fn test_missing_metadata_rejected() {
        let mut spec = TinyModelSpec::default();
        spec.write_ffn_metadata = false;
        let file = write_temp_model(&spec);
        let loader = GGUFLoader::open(file.path()).unwrap();

        let err = load_weights(&loader, &[0], false, WEIGHT_ALIGNMENT).unwrap_err();
        assert!(matches!(
            err,
            InferirError::MissingMetadata { key } if key == "llama.feed_forward_length"
        ));
    }

    #[test]
    fn test_load_tensor_not_found() {
        let spec = TinyModelSpec::default();
        let file = write_temp_model(&spec);
        let loader = GGUFLoader::open(file.path()).unwrap();

        let err = load_tensor_as_f32(&loader, "blk.9.attn_q.weight", 64).unwrap_err();
        assert!(matches!(err, InferirError::TensorNotFound { .. }));
    }

    #[test]
    fn test_gather_column() {
        let spec = TinyModelSpec::default();
        let file = write_temp_model(&spec);
        let loader = GGUFLoader::open(file.path()).unwrap();
        let w = load_weights(&loader, &[0], false, WEIGHT_ALIGNMENT).unwrap();

        let d = spec.d_model as usize;
        let mut out = vec![0.0f32; d];
        gather_column(&w.global.token_embd, 1, &mut out).unwrap();
        assert_eq!(out, &w.global.token_embd.data()[d..2 * d]);

        let err = gather_column(&w.global.token_embd, spec.vocab, &mut out).unwrap_err();
        assert!(matches!(err, InferirError::OutOfRange { .. }));

        let mut short = vec![0.0f32; d - 1];
        let err = gather_column(&w.global.token_embd, 0, &mut short).unwrap_err();
        assert!(matches!(err, InferirError::InvalidDim { .. }));
    }
}
