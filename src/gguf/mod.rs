//! GGUF (GPT-Generated Unified Format) container support
//!
//! Pure Rust reader for the GGUF binary format used by llama.cpp, Ollama,
//! and compatible tools.
//!
//! Format specification: <https://github.com/ggerganov/ggml/blob/master/docs/gguf.md>
//!
//! ## Layout
//!
//! ```text
//! GGUF := HEADER METADATA[] TENSOR_INFO[] PADDING TENSOR_DATA
//!
//! HEADER := {
//!   magic: u32 = 0x46554747 ("GGUF")
//!   version: u32
//!   tensor_count: u64
//!   metadata_kv_count: u64
//! }
//! ```
//!
//! The data section starts at the directory end rounded up to the file's
//! alignment (32 unless `general.alignment` overrides it). Tensor offsets
//! are relative to that point.

mod config;
mod loader;
mod parser;
mod types;

pub use config::ModelConfig;
pub use loader::{GGUFLoader, TensorView};
pub use parser::parse;
pub use types::{
    checked_add_u64, checked_mul_u64, ggml_type_traits, tensor_nbytes, ArraySummary, GGUFFile,
    GGUFHeader, GGUFValue, GgmlTypeTraits, KV, TensorInfo, ValueType, GGML_TYPE_F16, GGML_TYPE_F32,
    GGML_TYPE_Q4_K, GGML_TYPE_Q6_K, GGUF_DEFAULT_ALIGNMENT, GGUF_MAGIC,
};
