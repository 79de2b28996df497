//! Error types for Inferir
//!
//! This module defines all error types used throughout the library.

use thiserror::Error;

/// Result type alias for Inferir operations
pub type Result<T> = std::result::Result<T, InferirError>;

/// Error type for all Inferir operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferirError {
    /// File does not start with the GGUF magic bytes
    #[error("not a GGUF file (bad magic: {found:02X?})")]
    BadMagic {
        /// First four bytes of the file
        found: [u8; 4],
    },

    /// Metadata value type tag is not one of the 13 defined types
    #[error("unknown GGUF value type {type_id}")]
    UnknownValueType {
        /// Raw type tag read from the file
        type_id: u32,
    },

    /// Nested arrays are not representable in GGUF metadata
    #[error("array-of-array not supported in GGUF metadata (key {key:?})")]
    UnsupportedArrayOfArray {
        /// Key whose value declared a nested array
        key: String,
    },

    /// Length-prefixed string extends past the end of the file
    #[error("string of length {len} past EOF at offset {pos}")]
    StringPastEOF {
        /// Cursor position where the string payload begins
        pos: usize,
        /// Declared string length
        len: u64,
    },

    /// Typed read or skip would cross the end of the buffer
    #[error("read of {needed} bytes past EOF at offset {pos} (buffer size {size})")]
    PastEOF {
        /// Cursor position at the failed read
        pos: usize,
        /// Bytes the read required
        needed: usize,
        /// Total buffer size
        size: usize,
    },

    /// Data section or a tensor range falls outside the file
    #[error("out of bounds: {what}")]
    OutOfBounds {
        /// Description of the violated range
        what: String,
    },

    /// Offset-derived tensor sizing requires ascending data offsets
    #[error("tensor offsets not monotonic ({name} at offset {offset})")]
    NonMonotonicOffsets {
        /// Tensor whose offset precedes its predecessor's
        name: String,
        /// Relative data-section offset of that tensor
        offset: u64,
    },

    /// u64 multiply or add overflowed while deriving a byte size
    #[error("arithmetic overflow computing {what}")]
    ArithmeticOverflow {
        /// Quantity being computed
        what: String,
    },

    /// Required metadata key is absent or has an unusable type
    #[error("missing or invalid metadata: {key}")]
    MissingMetadata {
        /// Metadata key that was required
        key: String,
    },

    /// Tensor dims do not match the shape the model architecture requires
    #[error("unexpected shape for tensor {name}: expected {expected:?}, got {actual:?}")]
    UnexpectedShape {
        /// Tensor name
        name: String,
        /// Shape required by the architecture
        expected: Vec<u64>,
        /// Shape declared in the file
        actual: Vec<u64>,
    },

    /// Tensor name not present in the directory
    #[error("tensor not found: {name}")]
    TensorNotFound {
        /// Requested tensor name
        name: String,
    },

    /// ggml type code has no dequantization path here
    #[error("unsupported ggml type {ggml_type} for tensor {name}")]
    UnsupportedType {
        /// Raw ggml type code
        ggml_type: u32,
        /// Tensor name
        name: String,
    },

    /// Tensor view holds fewer bytes than its shape requires
    #[error("tensor truncated: {name} ({have} bytes, need {need})")]
    Truncated {
        /// Tensor name
        name: String,
        /// Bytes available in the view
        have: u64,
        /// Bytes the shape requires
        need: u64,
    },

    /// Quantized payload length is not a whole number of blocks
    #[error("invalid shape: {reason}")]
    InvalidShape {
        /// Reason for invalidity
        reason: String,
    },

    /// Dimension parameter violates a kernel precondition
    #[error("invalid dimension: {reason}")]
    InvalidDim {
        /// Violated precondition
        reason: String,
    },

    /// Index parameter outside its valid range
    #[error("{what} out of range: {index} >= {limit}")]
    OutOfRange {
        /// Name of the index (layer, token id, cache position)
        what: String,
        /// Requested index
        index: u64,
        /// Exclusive upper bound
        limit: u64,
    },

    /// Model file could not be opened
    #[error("failed to open {path}: {reason}")]
    FileOpen {
        /// Path that failed to open
        path: String,
        /// OS error text
        reason: String,
    },

    /// Memory mapping the model file failed
    #[error("failed to mmap {path}: {reason}")]
    MapFailed {
        /// Path that failed to map
        path: String,
        /// OS error text
        reason: String,
    },

    /// Aligned buffer allocation failed
    #[error("allocation of {bytes} bytes (alignment {alignment}) failed")]
    AllocFailed {
        /// Requested size in bytes
        bytes: usize,
        /// Requested alignment
        alignment: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = InferirError::BadMagic { found: *b"GGU\0" };
        assert!(err.to_string().contains("bad magic"));

        let err = InferirError::UnexpectedShape {
            name: "blk.0.attn_q.weight".to_string(),
            expected: vec![64, 64],
            actual: vec![64, 16],
        };
        assert!(err.to_string().contains("blk.0.attn_q.weight"));
        assert!(err.to_string().contains("[64, 16]"));
    }

    #[test]
    fn test_error_equality() {
        let err1 = InferirError::TensorNotFound {
            name: "output.weight".to_string(),
        };
        let err2 = InferirError::TensorNotFound {
            name: "output.weight".to_string(),
        };
        assert_eq!(err1, err2);
    }

    #[test]
    fn test_out_of_range_display() {
        let err = InferirError::OutOfRange {
            what: "layer index".to_string(),
            index: 40,
            limit: 32,
        };
        assert_eq!(err.to_string(), "layer index out of range: 40 >= 32");
    }
}
