//! Model shape configuration extracted from GGUF metadata
//!
//! Holds the LLaMA-architecture parameters the loader and the layer engine
//! need. Derived quantities (`head_dim`, `kv_dim`) are computed once at
//! extraction time.

/// Transformer shape parameters for a LLaMA-family model
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    /// Number of transformer blocks (`llama.block_count`)
    pub n_layers: u32,
    /// Embedding dimension (`llama.embedding_length`)
    pub d_model: u32,
    /// Number of query heads (`llama.attention.head_count`)
    pub n_heads: u32,
    /// Number of key/value heads (`llama.attention.head_count_kv`)
    pub n_kv_heads: u32,
    /// Per-head dimension, `d_model / n_heads`
    pub head_dim: u32,
    /// Key/value projection width, `n_kv_heads * head_dim`
    pub kv_dim: u32,
    /// FFN intermediate dimension (`llama.feed_forward_length`)
    pub ffn_hidden_dim: u32,
    /// Vocabulary size; recovered from `token_embd.weight` when absent
    pub vocab_size: u32,
    /// Maximum context length (`llama.context_length`)
    pub context_length: u32,
    /// Rotary embedding dimension (`llama.rope.dimension_count`)
    pub rope_dim: u32,
    /// Rotary frequency base (`llama.rope.freq_base`)
    pub rope_theta: f32,
    /// RMSNorm epsilon (`llama.attention.layer_norm_rms_epsilon`)
    pub rms_epsilon: f32,
}
