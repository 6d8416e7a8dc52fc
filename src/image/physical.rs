use super::Backend;
use crate::{
    Error::{FileError, Os, OutOfBounds},
    Result,
};

use memmap2::Mmap;
use std::{fs, path::Path};

/// Image source backed by a memory-mapped file on disk.
///
/// System libraries are accessed in a scattered pattern (export directory, then a handful
/// of stub windows), so mapping the file beats reading it whole. The mapping is read-only
/// and shared.
#[derive(Debug)]
pub struct Physical {
    /// Memory-mapped file data
    data: Mmap,
}

impl Physical {
    /// Create a new physical backend by memory-mapping the file at `path`.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened or
    /// [`crate::Error::Os`] if the mapping fails.
    pub fn new(path: impl AsRef<Path>) -> Result<Physical> {
        let file = match fs::File::open(path) {
            Ok(file) => file,
            Err(error) => return Err(FileError(error)),
        };

        let mmap = match unsafe { Mmap::map(&file) } {
            Ok(mmap) => mmap,
            Err(error) => {
                return Err(Os {
                    call: "Mmap::map",
                    source: error,
                })
            }
        };

        Ok(Physical { data: mmap })
    }
}

impl Backend for Physical {
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let Some(offset_end) = offset.checked_add(len) else {
            return Err(OutOfBounds);
        };

        if offset_end > self.data.len() {
            return Err(OutOfBounds);
        }

        Ok(&self.data[offset..offset_end])
    }

    fn data(&self) -> &[u8] {
        self.data.as_ref()
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_a_file_error() {
        let result = Physical::new("/nonexistent/path/to/library.dll");
        assert!(matches!(result.unwrap_err(), FileError(_)));
    }

    #[test]
    fn maps_and_bounds_checks() {
        let temp_path = std::env::temp_dir().join("sysgate_physical_test.bin");
        std::fs::write(&temp_path, [0x4D, 0x5A, 0x90, 0x00]).unwrap();

        let physical = Physical::new(&temp_path).unwrap();
        assert_eq!(physical.len(), 4);
        assert_eq!(physical.data_slice(0, 2).unwrap(), b"MZ");
        assert!(physical.data_slice(2, 4).is_err());

        std::fs::remove_file(&temp_path).unwrap();
    }
}
