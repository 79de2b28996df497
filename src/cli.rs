//! CLI command implementations: inspect, smoke-load, layer-step
//!
//! Thin wrappers over the library. Each command prints a structured report
//! to stdout and returns the first error it meets; the binary maps errors
//! to a single `error: ...` line on stderr.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{InferirError, Result};
use crate::gguf::{ggml_type_traits, tensor_nbytes, GGUFLoader};
use crate::layer::LayerContext;
use crate::tensor::TensorF32;
use crate::weights::{gather_column, load_weights, WEIGHT_ALIGNMENT};

/// Sampled summary statistics over a tensor's elements
#[derive(Debug, Default)]
pub struct SampleStats {
    /// Elements visited
    pub samples: usize,
    /// NaN count among visited elements
    pub nans: usize,
    /// Infinity count among visited elements
    pub infs: usize,
    /// Minimum finite value seen (0 when none)
    pub min: f32,
    /// Maximum finite value seen (0 when none)
    pub max: f32,
}

/// Strided min/max/NaN/Inf sweep, visiting at most `max_samples` elements
#[must_use]
pub fn sample_stats(data: &[f32], max_samples: usize) -> SampleStats {
    let mut s = SampleStats {
        min: f32::INFINITY,
        max: f32::NEG_INFINITY,
        ..SampleStats::default()
    };
    if data.is_empty() || max_samples == 0 {
        s.min = 0.0;
        s.max = 0.0;
        return s;
    }
    let step = std::cmp::max(1, data.len() / max_samples);
    let mut i = 0;
    while i < data.len() && s.samples < max_samples {
        let v = data[i];
        s.samples += 1;
        if v.is_nan() {
            s.nans += 1;
        } else if v.is_infinite() {
            s.infs += 1;
        } else {
            s.min = s.min.min(v);
            s.max = s.max.max(v);
        }
        i += step;
    }
    if !s.min.is_finite() {
        s.min = 0.0;
    }
    if !s.max.is_finite() {
        s.max = 0.0;
    }
    s
}

fn dims_to_string(dims: &[u64]) -> String {
    let inner: Vec<String> = dims.iter().map(u64::to_string).collect();
    format!("[{}]", inner.join(", "))
}

fn print_tensor_stats(name: &str, t: &TensorF32) {
    let st = sample_stats(t.data(), 1_000_000);
    println!(
        "{name} dims={} samples={} nan={} inf={} min={:.6} max={:.6}",
        dims_to_string(&t.dims),
        st.samples,
        st.nans,
        st.infs,
        st.min,
        st.max
    );
}

/// `inspect`: header, key metadata, tokenizer keys, dtype histogram, tensors
///
/// # Errors
///
/// Returns any mapping or parse error.
pub fn run_inspect(path: &Path) -> Result<()> {
    let loader = GGUFLoader::open(path)?;
    let file = loader.file();

    println!("A. Header");
    println!("gguf version: {}", file.header.version);
    println!("number of tensors: {}", file.header.tensor_count);
    println!("number of metadata entries: {}", file.header.metadata_kv_count);

    println!("\nB. Key metadata");
    const KEYS: [&str; 7] = [
        "general.architecture",
        "llama.block_count",
        "llama.embedding_length",
        "llama.attention.head_count",
        "llama.attention.head_count_kv",
        "llama.rope.freq_base",
        "llama.context_length",
    ];
    for key in KEYS {
        if let Some(v) = file.kv(key) {
            println!("{key}: {}", v.display(160));
        }
    }

    // Tokenizer entries are bulky arrays; the parser kept only summaries.
    for kv in &file.metadata {
        if kv.key.starts_with("tokenizer.") {
            println!("{}: {}", kv.key, kv.value.display(160));
        }
    }

    let mut hist: BTreeMap<String, u64> = BTreeMap::new();
    for t in &file.tensors {
        let name = ggml_type_traits(t.ggml_type)
            .map_or_else(|| format!("UNKNOWN({})", t.ggml_type), |tr| tr.name.to_string());
        *hist.entry(name).or_insert(0) += 1;
    }
    println!("\nDtype histogram");
    for (dtype, count) in &hist {
        println!("{dtype}: {count} tensors");
    }

    println!("\nC. All tensor entries");
    println!("name | dtype | shape | file_offset | data_size_bytes");
    for (i, t) in file.tensors.iter().enumerate() {
        let dtype = ggml_type_traits(t.ggml_type)
            .map_or_else(|| format!("UNKNOWN({})", t.ggml_type), |tr| tr.name.to_string());
        let abs_off = file.data_section_offset + t.offset;
        let bytes = match tensor_nbytes(t)? {
            Some(n) => n,
            None => loader.size_from_offsets(i),
        };
        println!(
            "{} | {dtype} | {} | {abs_off} | {bytes}",
            t.name,
            dims_to_string(&t.dims)
        );
    }

    Ok(())
}

/// `smoke-load`: load one layer, print config and per-tensor stats
///
/// # Errors
///
/// Returns any load error.
pub fn run_smoke_load(path: &Path, layer: u32, lm_head: bool) -> Result<()> {
    let loader = GGUFLoader::open(path)?;
    let cfg = loader.config()?;

    println!(
        "config: n_layers={} d_model={} n_heads={} n_kv_heads={} head_dim={} kv_dim={} \
         ffn_hidden_dim={} vocab={} rope_dim={} rope_theta={} rms_epsilon={}",
        cfg.n_layers,
        cfg.d_model,
        cfg.n_heads,
        cfg.n_kv_heads,
        cfg.head_dim,
        cfg.kv_dim,
        cfg.ffn_hidden_dim,
        cfg.vocab_size,
        cfg.rope_dim,
        cfg.rope_theta,
        cfg.rms_epsilon
    );

    let weights = load_weights(&loader, &[layer], lm_head, WEIGHT_ALIGNMENT)?;

    print_tensor_stats("token_embd.weight", &weights.global.token_embd);
    if let Some(t) = &weights.global.output_norm {
        print_tensor_stats("output_norm.weight", t);
    }
    if let Some(t) = &weights.global.output {
        print_tensor_stats("output.weight", t);
    }

    let lw = &weights.layers[0];
    print_tensor_stats("blk.attn_norm.weight", &lw.attn_norm);
    print_tensor_stats("blk.attn_q.weight", &lw.attn_q);
    print_tensor_stats("blk.attn_k.weight", &lw.attn_k);
    print_tensor_stats("blk.attn_v.weight", &lw.attn_v);
    print_tensor_stats("blk.attn_output.weight", &lw.attn_output);
    print_tensor_stats("blk.ffn_norm.weight", &lw.ffn_norm);
    print_tensor_stats("blk.ffn_gate.weight", &lw.ffn_gate);
    print_tensor_stats("blk.ffn_up.weight", &lw.ffn_up);
    print_tensor_stats("blk.ffn_down.weight", &lw.ffn_down);

    // Embedding gather sanity check
    let mut emb = vec![0.0f32; weights.cfg.d_model as usize];
    gather_column(&weights.global.token_embd, 1, &mut emb)?;
    let st = sample_stats(&emb, emb.len());
    println!(
        "gather_column(token_embd.weight, token_id=1): min={:.6} max={:.6} nan={} inf={}",
        st.min, st.max, st.nans, st.infs
    );

    Ok(())
}

/// `layer-step`: gather an embedding, run one block step, print the head
///
/// Only `pos == 0` is supported at the CLI; a prefill loop would need to
/// feed earlier tokens first.
///
/// # Errors
///
/// Returns any load error, `OutOfRange` for a token beyond the vocabulary,
/// or `InvalidDim` for a non-zero position.
pub fn run_layer_step(path: &Path, token: u32, pos: u32) -> Result<()> {
    if pos != 0 {
        return Err(InferirError::InvalidDim {
            reason: "single-token step supports only --pos 0".to_string(),
        });
    }

    let loader = GGUFLoader::open(path)?;
    let weights = load_weights(&loader, &[0], false, WEIGHT_ALIGNMENT)?;

    if token >= weights.cfg.vocab_size {
        return Err(InferirError::OutOfRange {
            what: "token id".to_string(),
            index: u64::from(token),
            limit: u64::from(weights.cfg.vocab_size),
        });
    }

    let mut x = vec![0.0f32; weights.cfg.d_model as usize];
    gather_column(&weights.global.token_embd, token, &mut x)?;

    let mut ctx = LayerContext::new(&weights.cfg)?;
    ctx.step(&weights.layers[0], pos as usize, &mut x)?;

    println!("layer0 output (first 16 floats):");
    let head: Vec<String> = x.iter().take(16).map(|v| format!("{v:.7}")).collect();
    println!("{}", head.join(" "));

    Ok(())
}
