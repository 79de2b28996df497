//! GGUF data model: header, metadata values, tensor directory entries
//!
//! Types mirror the on-disk layout described in the GGUF specification:
//! <https://github.com/ggerganov/ggml/blob/master/docs/gguf.md>
//!
//! Array metadata is held as a summary (element type + length) only; the
//! parser skips bulk payloads such as tokenizer vocabularies instead of
//! materializing them.

use std::collections::HashMap;

use crate::error::{InferirError, Result};

/// GGUF magic number: "GGUF" in little-endian
pub const GGUF_MAGIC: u32 = 0x4655_4747;

/// Default data-section alignment when `general.alignment` is absent
pub const GGUF_DEFAULT_ALIGNMENT: u32 = 32;

/// GGML tensor type: F32 (unquantized float32)
pub const GGML_TYPE_F32: u32 = 0;

/// GGML tensor type: F16 (IEEE 754 half-precision)
pub const GGML_TYPE_F16: u32 = 1;

/// GGML tensor type: `Q4_K` (4-bit K-quantization, super-block size 256)
pub const GGML_TYPE_Q4_K: u32 = 12;

/// GGML tensor type: `Q6_K` (6-bit K-quantization, super-block size 256)
pub const GGML_TYPE_Q6_K: u32 = 14;

/// GGUF metadata value type tags, as stored on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ValueType {
    /// Unsigned 8-bit integer
    UInt8 = 0,
    /// Signed 8-bit integer
    Int8 = 1,
    /// Unsigned 16-bit integer
    UInt16 = 2,
    /// Signed 16-bit integer
    Int16 = 3,
    /// Unsigned 32-bit integer
    UInt32 = 4,
    /// Signed 32-bit integer
    Int32 = 5,
    /// 32-bit floating point
    Float32 = 6,
    /// Boolean (one byte, non-zero is true)
    Bool = 7,
    /// UTF-8 string with u64 length prefix
    String = 8,
    /// Homogeneous array: element type + u64 length + payload
    Array = 9,
    /// Unsigned 64-bit integer
    UInt64 = 10,
    /// Signed 64-bit integer
    Int64 = 11,
    /// 64-bit floating point
    Float64 = 12,
}

impl ValueType {
    /// Decode a raw type tag
    ///
    /// # Errors
    ///
    /// Returns `UnknownValueType` for tags outside `[0, 12]`.
    pub fn from_u32(type_id: u32) -> Result<Self> {
        Ok(match type_id {
            0 => Self::UInt8,
            1 => Self::Int8,
            2 => Self::UInt16,
            3 => Self::Int16,
            4 => Self::UInt32,
            5 => Self::Int32,
            6 => Self::Float32,
            7 => Self::Bool,
            8 => Self::String,
            9 => Self::Array,
            10 => Self::UInt64,
            11 => Self::Int64,
            12 => Self::Float64,
            _ => return Err(InferirError::UnknownValueType { type_id }),
        })
    }

    /// Short lowercase name used by the inspector (`u8`, `f32`, `string`, ...)
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::UInt8 => "u8",
            Self::Int8 => "i8",
            Self::UInt16 => "u16",
            Self::Int16 => "i16",
            Self::UInt32 => "u32",
            Self::Int32 => "i32",
            Self::Float32 => "f32",
            Self::Bool => "bool",
            Self::String => "string",
            Self::Array => "array",
            Self::UInt64 => "u64",
            Self::Int64 => "i64",
            Self::Float64 => "f64",
        }
    }
}

/// Summary of an array metadata value; the payload itself is skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArraySummary {
    /// Element type of the array
    pub elem_type: ValueType,
    /// Number of elements
    pub len: u64,
}

/// A decoded GGUF metadata value
#[derive(Debug, Clone, PartialEq)]
pub enum GGUFValue {
    /// Unsigned 8-bit integer
    UInt8(u8),
    /// Signed 8-bit integer
    Int8(i8),
    /// Unsigned 16-bit integer
    UInt16(u16),
    /// Signed 16-bit integer
    Int16(i16),
    /// Unsigned 32-bit integer
    UInt32(u32),
    /// Signed 32-bit integer
    Int32(i32),
    /// 32-bit floating point
    Float32(f32),
    /// Boolean
    Bool(bool),
    /// UTF-8 string
    String(String),
    /// Array summary; bulk payload was skipped during parsing
    Array(ArraySummary),
    /// Unsigned 64-bit integer
    UInt64(u64),
    /// Signed 64-bit integer
    Int64(i64),
    /// 64-bit floating point
    Float64(f64),
}

impl GGUFValue {
    /// Coerce an integer value to u32
    ///
    /// Widens across the unsigned/signed integer variants; negative values
    /// and values above `u32::MAX` yield `None`.
    #[must_use]
    pub fn as_u32(&self) -> Option<u32> {
        match *self {
            Self::UInt8(x) => Some(u32::from(x)),
            Self::UInt16(x) => Some(u32::from(x)),
            Self::UInt32(x) => Some(x),
            Self::UInt64(x) => u32::try_from(x).ok(),
            Self::Int8(x) => u32::try_from(x).ok(),
            Self::Int16(x) => u32::try_from(x).ok(),
            Self::Int32(x) => u32::try_from(x).ok(),
            Self::Int64(x) => u32::try_from(x).ok(),
            _ => None,
        }
    }

    /// Coerce an integer value to u64; negative values yield `None`
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Self::UInt8(x) => Some(u64::from(x)),
            Self::UInt16(x) => Some(u64::from(x)),
            Self::UInt32(x) => Some(u64::from(x)),
            Self::UInt64(x) => Some(x),
            Self::Int8(x) => u64::try_from(x).ok(),
            Self::Int16(x) => u64::try_from(x).ok(),
            Self::Int32(x) => u64::try_from(x).ok(),
            Self::Int64(x) => u64::try_from(x).ok(),
            _ => None,
        }
    }

    /// Coerce a numeric value to f32
    ///
    /// Floats convert directly; integers convert through `as_u64`.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn as_f32(&self) -> Option<f32> {
        match *self {
            Self::Float32(x) => Some(x),
            Self::Float64(x) => Some(x as f32),
            _ => self.as_u64().map(|x| x as f32),
        }
    }

    /// Borrow a string value
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Render the value for the inspector
    ///
    /// Strings longer than `max_string_len` are truncated with an ellipsis;
    /// arrays render as `array<elem>[len]`.
    #[must_use]
    pub fn display(&self, max_string_len: usize) -> String {
        match self {
            Self::UInt8(x) => x.to_string(),
            Self::Int8(x) => x.to_string(),
            Self::UInt16(x) => x.to_string(),
            Self::Int16(x) => x.to_string(),
            Self::UInt32(x) => x.to_string(),
            Self::Int32(x) => x.to_string(),
            Self::UInt64(x) => x.to_string(),
            Self::Int64(x) => x.to_string(),
            Self::Float32(x) => format!("{x}"),
            Self::Float64(x) => format!("{x}"),
            Self::Bool(x) => x.to_string(),
            Self::String(s) => {
                if s.chars().count() <= max_string_len {
                    s.clone()
                } else {
                    let truncated: String = s.chars().take(max_string_len).collect();
                    format!("{truncated}\u{2026}")
                }
            },
            Self::Array(a) => format!("array<{}>[{}]", a.elem_type.name(), a.len),
        }
    }
}

/// A metadata key-value pair, in file order
#[derive(Debug, Clone, PartialEq)]
pub struct KV {
    /// Metadata key
    pub key: String,
    /// Decoded value
    pub value: GGUFValue,
}

/// GGUF file header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GGUFHeader {
    /// Format version
    pub version: u32,
    /// Number of tensors in the directory
    pub tensor_count: u64,
    /// Number of metadata key-value pairs
    pub metadata_kv_count: u64,
}

/// One tensor directory entry
///
/// `dims[0]` is the leading (innermost, fastest-varying) axis. `offset` is
/// relative to the start of the data section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorInfo {
    /// Tensor name
    pub name: String,
    /// Shape; dim 0 is the contiguous axis
    pub dims: Vec<u64>,
    /// GGML type code
    pub ggml_type: u32,
    /// Byte offset relative to the data section
    pub offset: u64,
}

/// Parsed GGUF file: header, ordered metadata, tensor directory, indexes
#[derive(Debug, Clone, PartialEq)]
pub struct GGUFFile {
    /// File header
    pub header: GGUFHeader,
    /// Metadata pairs in parse order
    pub metadata: Vec<KV>,
    /// Tensor directory in parse order
    pub tensors: Vec<TensorInfo>,
    /// Absolute file offset of the aligned data section
    pub data_section_offset: u64,
    /// Tensor index by name
    pub tensor_index_by_name: HashMap<String, usize>,
    /// Metadata index by key (last occurrence wins on duplicates)
    pub kv_index_by_key: HashMap<String, usize>,
}

impl GGUFFile {
    /// Look up a metadata value by key
    #[must_use]
    pub fn kv(&self, key: &str) -> Option<&GGUFValue> {
        self.kv_index_by_key
            .get(key)
            .map(|&i| &self.metadata[i].value)
    }

    /// Look up a tensor directory entry by name
    #[must_use]
    pub fn tensor(&self, name: &str) -> Option<&TensorInfo> {
        self.tensor_index_by_name.get(name).map(|&i| &self.tensors[i])
    }
}

/// Block layout of a GGML tensor type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GgmlTypeTraits {
    /// Display name, e.g. `"Q4_K"`
    pub name: &'static str,
    /// Source elements packed per block
    pub block_size: u32,
    /// Bytes per block
    pub type_size: u32,
}

/// Traits for the tensor types this crate can decode
///
/// Returns `None` for type codes without a dequantization path; callers fall
/// back to offset-derived sizing for those.
#[must_use]
pub fn ggml_type_traits(ggml_type: u32) -> Option<GgmlTypeTraits> {
    match ggml_type {
        GGML_TYPE_F32 => Some(GgmlTypeTraits {
            name: "F32",
            block_size: 1,
            type_size: 4,
        }),
        GGML_TYPE_F16 => Some(GgmlTypeTraits {
            name: "F16",
            block_size: 1,
            type_size: 2,
        }),
        // QK_K=256, 2 f16 scales + 12 packed sub-scales + 128 nibble bytes
        GGML_TYPE_Q4_K => Some(GgmlTypeTraits {
            name: "Q4_K",
            block_size: 256,
            type_size: 144,
        }),
        // QK_K=256, ql[128] + qh[64] + 16 i8 scales + f16 d
        GGML_TYPE_Q6_K => Some(GgmlTypeTraits {
            name: "Q6_K",
            block_size: 256,
            type_size: 210,
        }),
        _ => None,
    }
}

/// Multiply two u64 values, failing on overflow
///
/// # Errors
///
/// Returns `ArithmeticOverflow` naming `what` when the product wraps.
pub fn checked_mul_u64(a: u64, b: u64, what: &str) -> Result<u64> {
    a.checked_mul(b).ok_or_else(|| InferirError::ArithmeticOverflow {
        what: what.to_string(),
    })
}

/// Add two u64 values, failing on overflow
///
/// # Errors
///
/// Returns `ArithmeticOverflow` naming `what` when the sum wraps.
pub fn checked_add_u64(a: u64, b: u64, what: &str) -> Result<u64> {
    a.checked_add(b).ok_or_else(|| InferirError::ArithmeticOverflow {
        what: what.to_string(),
    })
}

/// Byte size of a tensor with known type traits
///
/// Elements are quantized in blocks along dim 0; a partial trailing block
/// still occupies a full block. Unknown types yield `Ok(None)`.
///
/// # Errors
///
/// Returns `ArithmeticOverflow` if the block count or byte count wraps u64.
pub fn tensor_nbytes(info: &TensorInfo) -> Result<Option<u64>> {
    let Some(traits) = ggml_type_traits(info.ggml_type) else {
        return Ok(None);
    };
    if info.dims.is_empty() {
        return Ok(Some(0));
    }

    let bs = u64::from(traits.block_size);
    let blocks_dim0 = if bs == 1 {
        info.dims[0]
    } else {
        info.dims[0].div_ceil(bs)
    };

    let mut n_blocks = blocks_dim0;
    for &d in &info.dims[1..] {
        n_blocks = checked_mul_u64(n_blocks, d, &format!("block count of {}", info.name))?;
    }
    let bytes = checked_mul_u64(
        n_blocks,
        u64::from(traits.type_size),
        &format!("byte size of {}", info.name),
    )?;
    Ok(Some(bytes))
}
