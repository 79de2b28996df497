//! GGUF test factory: synthesizes valid GGUF files in memory
//!
//! Provides [`GGUFBuilder`] for creating well-formed GGUF v3 byte buffers
//! without real model files, plus [`build_tiny_model`] which assembles a
//! complete one-block LLaMA model small enough for exhaustive checking.
//! Used by the unit suites, the integration tests, and the CLI tests.
//!
//! # Example
//!
//! ```
//! use inferir::test_factory::GGUFBuilder;
//!
//! let data = GGUFBuilder::new()
//!     .metadata_string("general.architecture", "llama")
//!     .metadata_u32("llama.block_count", 1)
//!     .add_f32_tensor("token_embd.weight", &[4, 10], &[0.0; 40])
//!     .build();
//! let file = inferir::gguf::parse(&data).unwrap();
//! assert_eq!(file.header.tensor_count, 1);
//! ```

use crate::gguf::{GGML_TYPE_F32, GGUF_MAGIC};
use crate::reader::align_up;

/// Builder for valid GGUF v3 files in memory
#[derive(Default)]
pub struct GGUFBuilder {
    /// Metadata entries: key, value type tag, encoded value bytes
    metadata: Vec<(String, u32, Vec<u8>)>,
    /// Tensor entries: name, dims, ggml type, raw data bytes
    tensors: Vec<(String, Vec<u64>, u32, Vec<u8>)>,
}

fn encode_string(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + s.len());
    out.extend_from_slice(&(s.len() as u64).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
    out
}

impl GGUFBuilder {
    /// Start an empty builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a u32 metadata entry
    #[must_use]
    pub fn metadata_u32(mut self, key: &str, value: u32) -> Self {
        self.metadata
            .push((key.to_string(), 4, value.to_le_bytes().to_vec()));
        self
    }

    /// Add an f32 metadata entry
    #[must_use]
    pub fn metadata_f32(mut self, key: &str, value: f32) -> Self {
        self.metadata
            .push((key.to_string(), 6, value.to_le_bytes().to_vec()));
        self
    }

    /// Add a string metadata entry
    #[must_use]
    pub fn metadata_string(mut self, key: &str, value: &str) -> Self {
        self.metadata.push((key.to_string(), 8, encode_string(value)));
        self
    }

    /// Add a string-array metadata entry (exercises the parser's skip path)
    #[must_use]
    pub fn metadata_string_array(mut self, key: &str, items: &[&str]) -> Self {
        let mut value = Vec::new();
        value.extend_from_slice(&8u32.to_le_bytes()); // element type: string
        value.extend_from_slice(&(items.len() as u64).to_le_bytes());
        for item in items {
            value.extend_from_slice(&encode_string(item));
        }
        self.metadata.push((key.to_string(), 9, value));
        self
    }

    /// Add a tensor with raw (possibly quantized) payload bytes
    #[must_use]
    pub fn add_tensor(mut self, name: &str, dims: &[u64], ggml_type: u32, data: &[u8]) -> Self {
        self.tensors
            .push((name.to_string(), dims.to_vec(), ggml_type, data.to_vec()));
        self
    }

    /// Add an F32 tensor from a value slice
    #[must_use]
    pub fn add_f32_tensor(self, name: &str, dims: &[u64], values: &[f32]) -> Self {
        let mut bytes = Vec::with_capacity(values.len() * 4);
        for v in values {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        self.add_tensor(name, dims, GGML_TYPE_F32, &bytes)
    }

    /// Serialize to GGUF v3 bytes
    ///
    /// Tensor data is laid out in insertion order, each tensor aligned to
    /// 32 bytes within the data section.
    #[must_use]
    pub fn build(self) -> Vec<u8> {
        const ALIGNMENT: usize = 32;

        let mut out = Vec::new();
        out.extend_from_slice(&GGUF_MAGIC.to_le_bytes());
        out.extend_from_slice(&3u32.to_le_bytes());
        out.extend_from_slice(&(self.tensors.len() as u64).to_le_bytes());
        out.extend_from_slice(&(self.metadata.len() as u64).to_le_bytes());

        for (key, type_tag, value) in &self.metadata {
            out.extend_from_slice(&encode_string(key));
            out.extend_from_slice(&type_tag.to_le_bytes());
            out.extend_from_slice(value);
        }

        // Relative offsets: each tensor aligned within the data section
        let mut offsets = Vec::with_capacity(self.tensors.len());
        let mut cursor = 0usize;
        for (_, _, _, data) in &self.tensors {
            let offset = align_up(cursor, ALIGNMENT);
            offsets.push(offset as u64);
            cursor = offset + data.len();
        }

        for ((name, dims, ggml_type, _), offset) in self.tensors.iter().zip(&offsets) {
            out.extend_from_slice(&encode_string(name));
            out.extend_from_slice(&(dims.len() as u32).to_le_bytes());
            for d in dims {
                out.extend_from_slice(&d.to_le_bytes());
            }
            out.extend_from_slice(&ggml_type.to_le_bytes());
            out.extend_from_slice(&offset.to_le_bytes());
        }

        let data_section = align_up(out.len(), ALIGNMENT);
        out.resize(data_section, 0);
        for ((_, _, _, data), offset) in self.tensors.iter().zip(&offsets) {
            #[allow(clippy::cast_possible_truncation)]
            out.resize(data_section + *offset as usize, 0);
            out.extend_from_slice(data);
        }
        out
    }
}

/// Shape of the synthetic one-block model produced by [`build_tiny_model`]
#[derive(Debug, Clone)]
pub struct TinyModelSpec {
    /// Embedding dimension
    pub d_model: u32,
    /// Query head count
    pub n_heads: u32,
    /// Key/value head count
    pub n_kv_heads: u32,
    /// FFN intermediate dimension
    pub ffn_hidden: u32,
    /// Vocabulary size
    pub vocab: u32,
    /// Block count
    pub n_layers: u32,
    /// Context length
    pub context_length: u32,
    /// Rotary dimension
    pub rope_dim: u32,
    /// Rotary frequency base
    pub rope_theta: f32,
    /// RMSNorm epsilon
    pub rms_epsilon: f32,
    /// Emit `llama.feed_forward_length`; off to test the missing-key path
    pub write_ffn_metadata: bool,
}

impl Default for TinyModelSpec {
    fn default() -> Self {
        Self {
            d_model: 8,
            n_heads: 2,
            n_kv_heads: 1,
            ffn_hidden: 16,
            vocab: 10,
            n_layers: 1,
            context_length: 16,
            rope_dim: 4,
            rope_theta: 10000.0,
            rms_epsilon: 1e-5,
            write_ffn_metadata: true,
        }
    }
}

/// Deterministic small weight values; phase separates tensors
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn fill(n: usize, phase: u32) -> Vec<f32> {
    (0..n)
        .map(|i| {
            let k = (i as u32).wrapping_mul(37).wrapping_add(phase.wrapping_mul(101)) % 23;
            (k as f32 / 23.0 - 0.5) * 0.2
        })
        .collect()
}

/// Build a complete one-block F32 LLaMA model as GGUF bytes
///
/// Weights are deterministic and small enough that a block step at any
/// position stays finite; norm weights are all ones.
#[must_use]
pub fn build_tiny_model(spec: &TinyModelSpec) -> Vec<u8> {
    let d = u64::from(spec.d_model);
    let kv = u64::from(spec.n_kv_heads * (spec.d_model / spec.n_heads));
    let ffn = u64::from(spec.ffn_hidden);
    let vocab = u64::from(spec.vocab);

    let mut b = GGUFBuilder::new()
        .metadata_string("general.architecture", "llama")
        .metadata_u32("llama.block_count", spec.n_layers)
        .metadata_u32("llama.embedding_length", spec.d_model)
        .metadata_u32("llama.attention.head_count", spec.n_heads)
        .metadata_u32("llama.attention.head_count_kv", spec.n_kv_heads)
        .metadata_u32("llama.context_length", spec.context_length)
        .metadata_u32("llama.rope.dimension_count", spec.rope_dim)
        .metadata_f32("llama.rope.freq_base", spec.rope_theta)
        .metadata_f32("llama.attention.layer_norm_rms_epsilon", spec.rms_epsilon)
        .metadata_string_array("tokenizer.ggml.tokens", &["<unk>", "<s>", "</s>"]);
    if spec.write_ffn_metadata {
        b = b.metadata_u32("llama.feed_forward_length", spec.ffn_hidden);
    }

    let ones = vec![1.0f32; spec.d_model as usize];
    #[allow(clippy::cast_possible_truncation)]
    let numel = |dims: &[u64]| dims.iter().product::<u64>() as usize;

    let embd_dims = [d, vocab];
    b = b.add_f32_tensor("token_embd.weight", &embd_dims, &fill(numel(&embd_dims), 1));
    b = b.add_f32_tensor("output_norm.weight", &[d], &ones);
    let out_dims = [d, vocab];
    b = b.add_f32_tensor("output.weight", &out_dims, &fill(numel(&out_dims), 2));

    for layer in 0..spec.n_layers {
        let p = |suffix: &str| format!("blk.{layer}.{suffix}.weight");
        let phase = 10 + layer * 9;
        b = b
            .add_f32_tensor(&p("attn_norm"), &[d], &ones)
            .add_f32_tensor(&p("attn_q"), &[d, d], &fill(numel(&[d, d]), phase))
            .add_f32_tensor(&p("attn_k"), &[d, kv], &fill(numel(&[d, kv]), phase + 1))
            .add_f32_tensor(&p("attn_v"), &[d, kv], &fill(numel(&[d, kv]), phase + 2))
            .add_f32_tensor(&p("attn_output"), &[d, d], &fill(numel(&[d, d]), phase + 3))
            .add_f32_tensor(&p("ffn_norm"), &[d], &ones)
            .add_f32_tensor(&p("ffn_gate"), &[d, ffn], &fill(numel(&[d, ffn]), phase + 4))
            .add_f32_tensor(&p("ffn_up"), &[d, ffn], &fill(numel(&[d, ffn]), phase + 5))
            .add_f32_tensor(&p("ffn_down"), &[ffn, d], &fill(numel(&[ffn, d]), phase + 6));
    }

    b.build()
}
