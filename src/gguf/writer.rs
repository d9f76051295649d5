//! GGUF container writer
//!
//! Accumulates metadata and tensor descriptors, then serializes them in GGUF
//! v3 layout: header, metadata in insertion order, tensor infos with
//! recomputed offsets, padding to the alignment, payloads each padded to the
//! alignment.
//!
//! [`GGUFWriter::write`] goes through a temporary file in the destination
//! directory which is renamed into place only after every byte is flushed, so
//! a failed write never leaves a partial container behind.

use std::io::{self, BufWriter, Write};
use std::path::Path;

use tempfile::Builder;
use tracing::{debug, info};

use super::io::{write_kv, write_string};
use super::types::{
    align_offset, GGUFValue, TensorDescriptor, GGUF_DEFAULT_ALIGNMENT, GGUF_MAGIC,
    GGUF_VERSION_V3, KEY_ALIGNMENT,
};
use crate::error::{CuantizarError, Result};

/// Output container under construction
#[derive(Debug, Default)]
pub struct GGUFWriter<'a> {
    metadata: Vec<(String, GGUFValue)>,
    tensors: Vec<TensorDescriptor<'a>>,
}

impl<'a> GGUFWriter<'a> {
    /// Start an empty output container
    #[must_use]
    pub fn begin() -> Self {
        Self {
            metadata: Vec::new(),
            tensors: Vec::new(),
        }
    }

    /// Copy every metadata entry from `source`, in order, as one bulk step
    ///
    /// Replaces anything set before.
    pub fn copy_metadata(&mut self, source: &[(String, GGUFValue)]) {
        self.metadata = source.to_vec();
    }

    /// Set one metadata entry, replacing an existing key in place or
    /// inserting a new one ahead of everything else
    ///
    /// Returns the value it replaced.
    pub fn set_metadata(&mut self, key: &str, value: GGUFValue) -> Option<GGUFValue> {
        match self.metadata.iter_mut().find(|(k, _)| k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.metadata.insert(0, (key.to_string(), value));
                None
            },
        }
    }

    /// Metadata entries as they will be written
    #[must_use]
    pub fn metadata(&self) -> &[(String, GGUFValue)] {
        &self.metadata
    }

    /// Append a tensor; call once per tensor in output order
    pub fn add_tensor(&mut self, tensor: TensorDescriptor<'a>) {
        self.tensors.push(tensor);
    }

    /// Tensors as they will be written
    #[must_use]
    pub fn tensors(&self) -> &[TensorDescriptor<'a>] {
        &self.tensors
    }

    /// Alignment taken from `general.alignment`, else the default
    #[must_use]
    pub fn alignment(&self) -> usize {
        self.metadata
            .iter()
            .find(|(k, _)| k == KEY_ALIGNMENT)
            .and_then(|(_, v)| match v {
                GGUFValue::UInt32(a) if a.is_power_of_two() => Some(*a as usize),
                _ => None,
            })
            .unwrap_or(GGUF_DEFAULT_ALIGNMENT)
    }

    /// Serialize the container into `w`, returning bytes written
    ///
    /// # Errors
    ///
    /// Returns [`CuantizarError::InvalidShape`] if a payload does not match
    /// its declared type and shape, or [`CuantizarError::IoError`] on write
    /// failure.
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<u64> {
        for t in &self.tensors {
            let expected = super::types::payload_size(t.ggml_type, t.dims);
            if t.data.len() != expected {
                return Err(CuantizarError::InvalidShape {
                    reason: format!(
                        "tensor '{}' payload is {} bytes, {} {:?} needs {expected}",
                        t.name,
                        t.data.len(),
                        t.ggml_type,
                        t.dims
                    ),
                });
            }
        }
        self.serialize(w).map_err(|e| CuantizarError::IoError {
            message: format!("Failed to write GGUF container: {e}"),
        })
    }

    fn serialize<W: Write>(&self, w: &mut W) -> io::Result<u64> {
        let alignment = self.alignment();
        let mut out = CountingWriter { inner: w, count: 0 };

        out.write_all(&GGUF_MAGIC.to_le_bytes())?;
        out.write_all(&GGUF_VERSION_V3.to_le_bytes())?;
        out.write_all(&(self.tensors.len() as u64).to_le_bytes())?;
        out.write_all(&(self.metadata.len() as u64).to_le_bytes())?;

        for (key, value) in &self.metadata {
            write_kv(&mut out, key, value)?;
        }

        let mut offset = 0usize;
        for t in &self.tensors {
            write_string(&mut out, t.name)?;
            out.write_all(&(t.dims.len() as u32).to_le_bytes())?;
            for dim in t.dims {
                out.write_all(&dim.to_le_bytes())?;
            }
            out.write_all(&t.ggml_type.id().to_le_bytes())?;
            out.write_all(&(offset as u64).to_le_bytes())?;
            offset = align_offset(offset + t.data.len(), alignment);
        }

        out.pad_to(alignment)?;

        for t in &self.tensors {
            out.write_all(&t.data)?;
            out.pad_to(alignment)?;
        }

        out.flush()?;
        Ok(out.count)
    }

    /// Serialize into a new byte vector
    ///
    /// # Errors
    ///
    /// See [`write_to`](Self::write_to).
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    /// Write the container to `path` atomically
    ///
    /// # Errors
    ///
    /// Returns [`CuantizarError::IoError`] if the temporary file cannot be
    /// created, written, or renamed; the temporary file is removed and `path`
    /// is left untouched.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<u64> {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };

        let mut tmp = temp_builder()
            .tempfile_in(dir)
            .map_err(|e| CuantizarError::IoError {
                message: format!("Failed to create temporary file in {}: {e}", dir.display()),
            })?;
        debug!(tmp = %tmp.path().display(), "writing output container");

        let written = {
            let mut w = BufWriter::new(tmp.as_file_mut());
            self.write_to(&mut w)?
        };
        tmp.as_file().sync_all().map_err(|e| CuantizarError::IoError {
            message: format!("Failed to sync {}: {e}", tmp.path().display()),
        })?;
        tmp.persist(path).map_err(|e| CuantizarError::IoError {
            message: format!("Failed to rename into {}: {}", path.display(), e.error),
        })?;

        info!(path = %path.display(), bytes = written, "wrote output container");
        Ok(written)
    }
}

/// Temporary file created with the mode a plain `File::create` would get
/// (0o666 minus the umask), so readers under other users can open the output
fn temp_builder() -> Builder<'static, 'static> {
    let mut builder = Builder::new();
    builder.prefix(".cuantizar-");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(std::fs::Permissions::from_mode(0o666));
    }
    builder
}

/// Tracks the write position so padding can be computed without `Seek`
struct CountingWriter<'w, W: Write> {
    inner: &'w mut W,
    count: u64,
}

impl<W: Write> CountingWriter<'_, W> {
    fn pad_to(&mut self, alignment: usize) -> io::Result<()> {
        let pos = self.count as usize;
        let pad = align_offset(pos, alignment) - pos;
        if pad > 0 {
            self.write_all(&vec![0u8; pad])?;
        }
        Ok(())
    }
}

impl<W: Write> Write for CountingWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
