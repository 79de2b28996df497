//! GGUF loader: mapped file + parsed directory + safe tensor views
//!
//! The loader owns the memory map and the parsed [`GGUFFile`]. Tensor views
//! borrow from the map, so they cannot outlive it. For tensors whose ggml
//! type has no traits, byte sizes fall back to the distance to the next
//! tensor's offset (requiring ascending offsets).

use std::path::Path;

use crate::error::{InferirError, Result};
use crate::mmap::MappedFile;

use super::config::ModelConfig;
use super::parser;
use super::types::{checked_add_u64, tensor_nbytes, GGUFFile};

/// Borrowed view of one tensor's raw bytes inside the mapped file
#[derive(Debug, Clone)]
pub struct TensorView<'a> {
    /// Tensor name
    pub name: &'a str,
    /// Shape; dim 0 is the contiguous axis
    pub dims: &'a [u64],
    /// GGML type code
    pub ggml_type: u32,
    /// Raw tensor bytes (still quantized)
    pub data: &'a [u8],
    /// Absolute file offset of the first byte
    pub file_offset: u64,
}

impl TensorView<'_> {
    /// Number of bytes in the view
    #[must_use]
    pub fn nbytes(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Owns the mapped model file and its parsed directory
#[derive(Debug)]
pub struct GGUFLoader {
    mapped: MappedFile,
    file: GGUFFile,
    /// Per-tensor byte size derived from offset differences, used when the
    /// ggml type has no traits
    size_from_offsets: Vec<u64>,
}

impl GGUFLoader {
    /// Map and parse a GGUF model file
    ///
    /// # Errors
    ///
    /// Returns mapping errors, any parse error, or `NonMonotonicOffsets`
    /// when the fallback size estimator meets out-of-order tensor data.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mapped = MappedFile::open(path)?;
        let file = parser::parse(mapped.data())?;
        let size_from_offsets = compute_sizes_from_offsets(&file, mapped.size() as u64)?;
        Ok(Self {
            mapped,
            file,
            size_from_offsets,
        })
    }

    /// The parsed file structure
    #[must_use]
    pub fn file(&self) -> &GGUFFile {
        &self.file
    }

    /// The underlying memory map
    #[must_use]
    pub fn mapped_file(&self) -> &MappedFile {
        &self.mapped
    }

    /// Offset-derived byte size for the tensor at directory index `idx`
    #[must_use]
    pub fn size_from_offsets(&self, idx: usize) -> u64 {
        self.size_from_offsets[idx]
    }

    /// Look up a tensor view by name, if present
    ///
    /// # Errors
    ///
    /// Returns `OutOfBounds` if the view's range does not fit the file.
    pub fn maybe_tensor_view(&self, name: &str) -> Result<Option<TensorView<'_>>> {
        let Some(&idx) = self.file.tensor_index_by_name.get(name) else {
            return Ok(None);
        };
        let info = &self.file.tensors[idx];

        let abs_off = checked_add_u64(
            self.file.data_section_offset,
            info.offset,
            &format!("absolute offset of {name}"),
        )?;
        let nbytes = match tensor_nbytes(info)? {
            Some(n) => n,
            None => self.size_from_offsets[idx],
        };
        let end = checked_add_u64(abs_off, nbytes, &format!("end of tensor {name}"))?;
        let file_size = self.mapped.size() as u64;
        if end > file_size {
            return Err(InferirError::OutOfBounds {
                what: format!("tensor {name} range [{abs_off}, {end}) beyond file size {file_size}"),
            });
        }

        // abs_off/end were just validated against the mapping length
        #[allow(clippy::cast_possible_truncation)]
        let data = &self.mapped.data()[abs_off as usize..end as usize];
        Ok(Some(TensorView {
            name: &info.name,
            dims: &info.dims,
            ggml_type: info.ggml_type,
            data,
            file_offset: abs_off,
        }))
    }

    /// Look up a tensor view by name
    ///
    /// # Errors
    ///
    /// Returns `TensorNotFound` for unknown names, `OutOfBounds` for ranges
    /// that do not fit the file.
    pub fn tensor_view(&self, name: &str) -> Result<TensorView<'_>> {
        self.maybe_tensor_view(name)?
            .ok_or_else(|| InferirError::TensorNotFound {
                name: name.to_string(),
            })
    }

    /// Metadata value coerced to u32 (widening, rejecting negatives)
    #[must_use]
    pub fn kv_u32(&self, key: &str) -> Option<u32> {
        self.file.kv(key).and_then(super::types::GGUFValue::as_u32)
    }

    /// Metadata value coerced to u64
    #[must_use]
    pub fn kv_u64(&self, key: &str) -> Option<u64> {
        self.file.kv(key).and_then(super::types::GGUFValue::as_u64)
    }

    /// Metadata value coerced to f32
    #[must_use]
    pub fn kv_f32(&self, key: &str) -> Option<f32> {
        self.file.kv(key).and_then(super::types::GGUFValue::as_f32)
    }

    /// Metadata string value
    #[must_use]
    pub fn kv_str(&self, key: &str) -> Option<&str> {
        self.file.kv(key).and_then(super::types::GGUFValue::as_str)
    }

    /// Extract the model shape from the `llama.*` metadata keys
    ///
    /// Missing keys resolve to zero here; [`crate::weights::load_weights`]
    /// validates the fields it needs. Vocabulary size comes from the second
    /// dim of `token_embd.weight` when present.
    ///
    /// # Errors
    ///
    /// Returns `OutOfBounds` only if the embedding tensor's declared range
    /// is invalid.
    pub fn config(&self) -> Result<ModelConfig> {
        let n_layers = self.kv_u32("llama.block_count").unwrap_or(0);
        let d_model = self.kv_u32("llama.embedding_length").unwrap_or(0);
        let n_heads = self.kv_u32("llama.attention.head_count").unwrap_or(0);
        let n_kv_heads = self.kv_u32("llama.attention.head_count_kv").unwrap_or(0);
        let ffn_hidden_dim = self.kv_u32("llama.feed_forward_length").unwrap_or(0);
        let context_length = self.kv_u32("llama.context_length").unwrap_or(0);
        let rope_dim = self.kv_u32("llama.rope.dimension_count").unwrap_or(0);
        let rope_theta = self.kv_f32("llama.rope.freq_base").unwrap_or(0.0);
        let rms_epsilon = self
            .kv_f32("llama.attention.layer_norm_rms_epsilon")
            .unwrap_or(0.0);

        let head_dim = if n_heads != 0 && d_model % n_heads == 0 {
            d_model / n_heads
        } else {
            0
        };
        let kv_dim = n_kv_heads * head_dim;

        let mut vocab_size = 0;
        if let Some(t) = self.maybe_tensor_view("token_embd.weight")? {
            if t.dims.len() == 2 {
                vocab_size = u32::try_from(t.dims[1]).unwrap_or(0);
            }
        }

        Ok(ModelConfig {
            n_layers,
            d_model,
            n_heads,
            n_kv_heads,
            head_dim,
            kv_dim,
            ffn_hidden_dim,
            vocab_size,
            context_length,
            rope_dim,
            rope_theta,
            rms_epsilon,
        })
    }
}

/// Derive per-tensor byte sizes from the gaps between ascending offsets
///
/// The last tensor extends to the end of the file. Works for any ggml type,
/// including ones without traits, but over-reports when padding sits between
/// tensors; the traits-derived size is preferred whenever available.
fn compute_sizes_from_offsets(file: &GGUFFile, file_size: u64) -> Result<Vec<u64>> {
    let mut sizes = vec![0u64; file.tensors.len()];
    if file.tensors.is_empty() {
        return Ok(sizes);
    }

    let mut idx: Vec<usize> = (0..file.tensors.len()).collect();
    idx.sort_by_key(|&i| file.tensors[i].offset);

    for (rank, &cur) in idx.iter().enumerate() {
        let cur_abs = checked_add_u64(
            file.data_section_offset,
            file.tensors[cur].offset,
            &format!("absolute offset of {}", file.tensors[cur].name),
        )?;
        let next_abs = match idx.get(rank + 1) {
            Some(&nxt) => checked_add_u64(
                file.data_section_offset,
                file.tensors[nxt].offset,
                &format!("absolute offset of {}", file.tensors[nxt].name),
            )?,
            None => file_size,
        };
        if next_abs < cur_abs {
            return Err(InferirError::NonMonotonicOffsets {
                name: file.tensors[cur].name.clone(),
                offset: file.tensors[cur].offset,
            });
        }
        sizes[cur] = next_abs - cur_abs;
    }
    Ok(sizes)
}
