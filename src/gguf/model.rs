//! Memory-mapped GGUF container
//!
//! The source container is mapped read-only; tensor descriptors handed out by
//! [`MappedGGUFContainer::tensor`] borrow their payload straight from the
//! mapping and are never copied unless a later stage needs to.

use std::borrow::Cow;
use std::fs::File;
use std::path::Path;

use memmap2::Mmap;
use tracing::info;

use super::types::{GGUFContainer, GGUFValue, TensorDescriptor};
use crate::error::{CuantizarError, Result};

// ============================================================================
// MappedGGUFContainer - Zero-copy memory-mapped container
// ============================================================================

/// Memory-mapped GGUF container for zero-copy tensor access
///
/// # Example
///
/// ```rust,ignore
/// let source = MappedGGUFContainer::from_path("model-f16.gguf")?;
/// for i in 0..source.tensor_count() {
///     let t = source.tensor(i)?;
///     println!("{} {:?} {}", t.name, t.dims, t.ggml_type);
/// }
/// ```
pub struct MappedGGUFContainer {
    /// Parsed layout (header, metadata, tensor table)
    pub container: GGUFContainer,
    mmap: Mmap,
}

impl MappedGGUFContainer {
    /// Open and parse a GGUF file via memory mapping
    ///
    /// # Errors
    ///
    /// Returns [`CuantizarError::IoError`] if the file cannot be opened or
    /// mapped, and [`CuantizarError::FormatError`] if parsing fails. No
    /// partial state is returned.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| CuantizarError::IoError {
            message: format!("Failed to open {}: {e}", path.display()),
        })?;

        // SAFETY: the mapping is read-only and the pipeline never writes to
        // the source path while it is mapped (output goes through a temp file).
        let mmap = unsafe {
            Mmap::map(&file).map_err(|e| CuantizarError::IoError {
                message: format!("Failed to mmap {}: {e}", path.display()),
            })?
        };

        let container = GGUFContainer::from_bytes(&mmap)?;
        info!(
            path = %path.display(),
            bytes = mmap.len(),
            tensors = container.tensors.len(),
            "opened source container"
        );

        Ok(Self { container, mmap })
    }

    /// Metadata entries in stored order
    #[must_use]
    pub fn metadata(&self) -> &[(String, GGUFValue)] {
        &self.container.metadata
    }

    /// Number of tensors in the table
    #[must_use]
    pub fn tensor_count(&self) -> usize {
        self.container.tensors.len()
    }

    /// Descriptor for tensor `index`, payload borrowed from the mapping
    ///
    /// # Errors
    ///
    /// Returns [`CuantizarError::FormatError`] if `index` is out of range.
    pub fn tensor(&self, index: usize) -> Result<TensorDescriptor<'_>> {
        let info = self
            .container
            .tensors
            .get(index)
            .ok_or_else(|| CuantizarError::FormatError {
                reason: format!(
                    "tensor index {index} out of range (container has {})",
                    self.tensor_count()
                ),
            })?;

        // Bounds were validated at parse time.
        let start = self.container.tensor_data_start + info.offset as usize;
        let end = start + info.byte_size();
        Ok(TensorDescriptor {
            name: &info.name,
            dims: &info.dims,
            ggml_type: info.ggml_type,
            data: Cow::Borrowed(&self.mmap[start..end]),
        })
    }

    /// All descriptors in stored order
    ///
    /// # Errors
    ///
    /// Propagates [`tensor`](Self::tensor) errors.
    pub fn tensors(&self) -> Result<Vec<TensorDescriptor<'_>>> {
        (0..self.tensor_count()).map(|i| self.tensor(i)).collect()
    }

    /// Size of the mapped file in bytes
    #[must_use]
    pub fn file_size(&self) -> usize {
        self.mmap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gguf::test_factory::GGUFBuilder;
    use crate::registry::GgmlType;
    use std::io::Write;

    fn write_temp(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_open_and_borrow_tensors() {
        let data = GGUFBuilder::new()
            .architecture("llama")
            .add_f32_tensor("a", &[4], &[1.0, 2.0, 3.0, 4.0])
            .add_f16_tensor("b", &[2, 2], &[0.5, -0.5, 1.0, -1.0])
            .build();
        let file = write_temp(&data);

        let source = MappedGGUFContainer::from_path(file.path()).unwrap();
        assert_eq!(source.tensor_count(), 2);
        assert_eq!(source.metadata().len(), 1);
        assert_eq!(source.file_size(), data.len());

        let a = source.tensor(0).unwrap();
        assert_eq!(a.name, "a");
        assert_eq!(a.ggml_type, GgmlType::F32);
        assert!(a.is_borrowed());
        assert_eq!(&a.data[0..4], &1.0f32.to_le_bytes());

        let b = source.tensor(1).unwrap();
        assert_eq!(b.dims, &[2, 2]);
        assert_eq!(b.data.len(), 8);
        assert_eq!(&b.data[0..2], &half::f16::from_f32(0.5).to_le_bytes());
    }

    #[test]
    fn test_tensor_index_out_of_range() {
        let file = write_temp(&GGUFBuilder::new().build());
        let source = MappedGGUFContainer::from_path(file.path()).unwrap();
        assert!(source.tensor(0).is_err());
        assert!(source.tensors().unwrap().is_empty());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = MappedGGUFContainer::from_path("/nonexistent/model.gguf")
            .err()
            .unwrap();
        assert!(matches!(err, CuantizarError::IoError { .. }));
        assert!(err.to_string().contains("/nonexistent/model.gguf"));
    }

    #[test]
    fn test_garbage_file_is_format_error() {
        let file = write_temp(b"definitely not a gguf file");
        let err = MappedGGUFContainer::from_path(file.path()).err().unwrap();
        assert!(matches!(err, CuantizarError::FormatError { .. }));
    }
}
