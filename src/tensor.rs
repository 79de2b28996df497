//! Owned, aligned f32 tensor storage
//!
//! Dequantized weights land in [`TensorF32`], whose storage is allocated
//! with an explicit alignment (64 bytes by default throughout the loader).
//! The buffer frees itself with the same layout it was allocated with.

use std::alloc::{alloc_zeroed, dealloc, Layout};

use crate::error::{InferirError, Result};
use crate::gguf::checked_mul_u64;

/// Owned byte buffer with a caller-chosen alignment
pub struct AlignedBuffer {
    ptr: *mut u8,
    layout: Layout,
}

// The buffer is a plain owned allocation; nothing in it is tied to a thread.
unsafe impl Send for AlignedBuffer {}
unsafe impl Sync for AlignedBuffer {}

impl AlignedBuffer {
    /// Allocate `bytes` zeroed bytes aligned to `alignment`
    ///
    /// # Errors
    ///
    /// Returns `AllocFailed` for zero sizes, non-power-of-two alignments,
    /// or allocator failure.
    pub fn allocate(bytes: usize, alignment: usize) -> Result<Self> {
        if bytes == 0 || alignment == 0 || !alignment.is_power_of_two() {
            return Err(InferirError::AllocFailed { bytes, alignment });
        }
        let layout = Layout::from_size_align(bytes, alignment)
            .map_err(|_| InferirError::AllocFailed { bytes, alignment })?;
        // SAFETY: layout has non-zero size, checked above
        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(InferirError::AllocFailed { bytes, alignment });
        }
        Ok(Self { ptr, layout })
    }

    /// Size of the allocation in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.layout.size()
    }

    /// True if the buffer holds no bytes (never the case after `allocate`)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }

    /// The buffer as a byte slice
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: ptr is valid for layout.size() bytes for the buffer's life
        unsafe { std::slice::from_raw_parts(self.ptr, self.layout.size()) }
    }

    /// The buffer as a mutable byte slice
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: ptr is valid and exclusively borrowed through &mut self
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.layout.size()) }
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        // SAFETY: ptr was allocated with exactly this layout
        unsafe { dealloc(self.ptr, self.layout) };
    }
}

impl std::fmt::Debug for AlignedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignedBuffer")
            .field("bytes", &self.layout.size())
            .field("alignment", &self.layout.align())
            .finish()
    }
}

/// Owned f32 tensor with aligned storage
///
/// `dims[0]` is the contiguous axis, matching the GGUF convention: a 2-D
/// `[in, out]` weight stores column `j` starting at element `j * dims[0]`.
#[derive(Debug)]
pub struct TensorF32 {
    /// Shape; dim 0 is the contiguous axis
    pub dims: Vec<u64>,
    /// Element count, product of dims
    pub numel: u64,
    storage: AlignedBuffer,
}

impl TensorF32 {
    /// Allocate a zeroed tensor of the given shape
    ///
    /// # Errors
    ///
    /// Returns `ArithmeticOverflow` if the element or byte count wraps u64,
    /// `AllocFailed` if the byte count exceeds the address space or the
    /// allocation fails.
    pub fn zeroed(dims: Vec<u64>, alignment: usize) -> Result<Self> {
        // f32 reinterpretation needs at least 4-byte alignment
        if alignment < 4 {
            return Err(InferirError::AllocFailed {
                bytes: 0,
                alignment,
            });
        }
        let mut numel = 1u64;
        for &d in &dims {
            numel = checked_mul_u64(numel, d, "tensor element count")?;
        }
        let bytes_u64 = checked_mul_u64(numel, 4, "tensor byte size")?;
        let bytes = usize::try_from(bytes_u64).map_err(|_| InferirError::AllocFailed {
            bytes: usize::MAX,
            alignment,
        })?;
        let storage = AlignedBuffer::allocate(bytes, alignment)?;
        Ok(Self {
            dims,
            numel,
            storage,
        })
    }

    /// The elements as a flat slice
    #[must_use]
    pub fn data(&self) -> &[f32] {
        // SAFETY: storage is 4-byte-aligned (alignment is >= 4 and a power
        // of two) and holds exactly numel f32 values
        unsafe {
            std::slice::from_raw_parts(
                self.storage.as_bytes().as_ptr().cast::<f32>(),
                self.numel as usize,
            )
        }
    }

    /// The elements as a mutable flat slice
    pub fn data_mut(&mut self) -> &mut [f32] {
        let numel = self.numel as usize;
        // SAFETY: as data(), exclusively borrowed through &mut self
        unsafe {
            std::slice::from_raw_parts_mut(
                self.storage.as_bytes_mut().as_mut_ptr().cast::<f32>(),
                numel,
            )
        }
    }
}
