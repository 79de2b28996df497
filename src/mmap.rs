//! Read-only memory-mapped model file
//!
//! Uses `memmap2` for zero-copy access to large model files: no heap copy
//! of the file contents, page management left to the kernel. The mapping is
//! read-only for its whole lifetime; tensor views borrow directly from it.

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::error::{InferirError, Result};

/// Read-only memory map of a model file
pub struct MappedFile {
    path: PathBuf,
    mmap: Mmap,
}

impl MappedFile {
    /// Map a file read-only
    ///
    /// # Errors
    ///
    /// Returns `FileOpen` if the file cannot be opened, `MapFailed` if it is
    /// empty or the mapping syscall fails.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| InferirError::FileOpen {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let len = file
            .metadata()
            .map_err(|e| InferirError::FileOpen {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?
            .len();
        if len == 0 {
            return Err(InferirError::MapFailed {
                path: path.display().to_string(),
                reason: "file is empty".to_string(),
            });
        }

        // SAFETY: the mapping is read-only and we never hand out mutable
        // access. The usual mmap caveat applies: the file must not be
        // truncated by another process while mapped.
        let mmap = unsafe {
            Mmap::map(&file).map_err(|e| InferirError::MapFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?
        };

        Ok(Self {
            path: path.to_path_buf(),
            mmap,
        })
    }

    /// The mapped bytes
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.mmap
    }

    /// Size of the mapped file in bytes
    #[must_use]
    pub fn size(&self) -> usize {
        self.mmap.len()
    }

    /// Path the file was opened from
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for MappedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedFile")
            .field("path", &self.path)
            .field("size", &self.mmap.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_map_reads_contents() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"GGUF test bytes").unwrap();
        f.flush().unwrap();

        let mapped = MappedFile::open(f.path()).unwrap();
        assert_eq!(mapped.size(), 15);
        assert_eq!(&mapped.data()[..4], b"GGUF");
        assert_eq!(mapped.path(), f.path());
    }

    #[test]
    fn test_missing_file_fails() {
        let err = MappedFile::open("/nonexistent/model.gguf").unwrap_err();
        assert!(matches!(err, InferirError::FileOpen { .. }));
    }

    #[test]
    fn test_empty_file_fails() {
        let f = tempfile::NamedTempFile::new().unwrap();
        let err = MappedFile::open(f.path()).unwrap_err();
        assert!(matches!(err, InferirError::MapFailed { .. }));
    }
}
