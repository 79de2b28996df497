//! # Inferir
//!
//! Inference scaffold for LLaMA-family transformer models in the GGUF
//! container format with GGML block-quantized tensors.
//!
//! Inferir (Spanish: "to infer") loads a model file, decodes its metadata
//! and tensor directory, dequantizes weight blocks (F32, F16, `Q4_K`,
//! `Q6_K`) into owned f32 storage, and executes one transformer block
//! forward pass over a token stream with a layer-local KV cache.
//!
//! ## Pipeline
//!
//! ```text
//! path -> MappedFile -> GGUFFile -> GGUFLoader -> Weights -> LayerContext
//! ```
//!
//! ## Example
//!
//! ```
//! use inferir::test_factory::{build_tiny_model, TinyModelSpec};
//! use inferir::gguf::GGUFLoader;
//! use inferir::weights::{load_weights, gather_column, WEIGHT_ALIGNMENT};
//! use inferir::layer::LayerContext;
//!
//! # fn main() -> inferir::Result<()> {
//! let bytes = build_tiny_model(&TinyModelSpec::default());
//! let dir = tempfile::tempdir().unwrap();
//! let path = dir.path().join("tiny.gguf");
//! std::fs::write(&path, &bytes).unwrap();
//!
//! let loader = GGUFLoader::open(&path)?;
//! let weights = load_weights(&loader, &[0], false, WEIGHT_ALIGNMENT)?;
//!
//! let mut x = vec![0.0f32; weights.cfg.d_model as usize];
//! gather_column(&weights.global.token_embd, 1, &mut x)?;
//!
//! let mut ctx = LayerContext::new(&weights.cfg)?;
//! ctx.step(&weights.layers[0], 0, &mut x)?;
//! assert!(x.iter().all(|v| v.is_finite()));
//! # Ok(())
//! # }
//! ```
//!
//! ## Design
//!
//! - The mapped file owns the bytes for the whole run; tensor views borrow
//!   from it and cannot outlive the loader.
//! - Every byte-size derivation from file contents goes through checked
//!   u64 arithmetic.
//! - Kernels are scalar and single-threaded; dot products accumulate in
//!   f64.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod error;
pub mod gguf;
pub mod layer;
pub mod mmap;
pub mod ops;
pub mod quantize;
pub mod reader;
pub mod tensor;
pub mod test_factory;
pub mod weights;

// Re-exports for convenience
pub use error::{InferirError, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
