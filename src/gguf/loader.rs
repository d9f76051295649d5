//! GGUF container parsing
//!
//! Parses the header, metadata, and tensor table of a GGUF v3 file and
//! validates the tensor layout against the file size. Tensor payloads are not
//! touched here; see [`super::MappedGGUFContainer`] for data access.

use std::collections::HashSet;
use std::io::Cursor;

use tracing::debug;

use super::io;
use super::types::{
    align_offset, checked_n_elements, GGUFContainer, GGUFHeader, GGUFValue,
    GGUFValueType, TensorInfo, GGUF_DEFAULT_ALIGNMENT, GGUF_MAGIC, GGUF_MAX_DIMS,
    GGUF_VERSION_V3, KEY_ALIGNMENT,
};
use crate::error::{CuantizarError, Result};
use crate::registry::GgmlType;

/// Upper bound on the tensor count accepted from a header
const MAX_TENSOR_COUNT: u64 = 100_000;

/// Upper bound on the metadata count accepted from a header
const MAX_METADATA_COUNT: u64 = 100_000;

/// Upper bound on elements in one metadata array
const MAX_ARRAY_LEN: u64 = 10_000_000;

fn format_error(reason: impl Into<String>) -> CuantizarError {
    CuantizarError::FormatError {
        reason: reason.into(),
    }
}

impl GGUFContainer {
    /// Parse a GGUF container from bytes
    ///
    /// # Arguments
    ///
    /// * `data` - Complete file contents (usually a memory mapping)
    ///
    /// # Errors
    ///
    /// Returns [`CuantizarError::FormatError`] if:
    /// - Magic or version is wrong
    /// - Counts exceed sanity limits
    /// - A metadata key or tensor name is duplicated
    /// - A tensor has an unknown type, a zero or overflowing extent, a row
    ///   that is not a whole number of blocks, a misaligned offset, or a
    ///   payload past the end of `data`
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let data = std::fs::read("model.gguf")?;
    /// let container = GGUFContainer::from_bytes(&data)?;
    /// println!("{} tensors", container.tensors.len());
    /// ```
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);

        let header = Self::parse_header(&mut cursor)?;
        let metadata = Self::parse_metadata(&mut cursor, header.metadata_count)?;
        let alignment = Self::alignment_from(&metadata)?;
        let tensors = Self::parse_tensor_info(&mut cursor, header.tensor_count)?;

        let tensor_data_start = align_offset(cursor.position() as usize, alignment);
        Self::validate_layout(&tensors, alignment, tensor_data_start, data.len())?;

        debug!(
            tensors = tensors.len(),
            metadata = metadata.len(),
            alignment,
            tensor_data_start,
            "parsed GGUF container"
        );

        Ok(Self {
            header,
            metadata,
            tensors,
            alignment,
            tensor_data_start,
        })
    }

    /// Look up a metadata value by key
    #[must_use]
    pub fn get_metadata(&self, key: &str) -> Option<&GGUFValue> {
        self.metadata
            .iter()
            .find_map(|(k, v)| (k == key).then_some(v))
    }

    /// Value of `general.architecture`, if present
    #[must_use]
    pub fn architecture(&self) -> Option<&str> {
        self.get_metadata(super::types::KEY_ARCHITECTURE)
            .and_then(GGUFValue::as_str)
    }

    fn parse_header(cursor: &mut Cursor<&[u8]>) -> Result<GGUFHeader> {
        let magic = io::read_u32(cursor)?;
        if magic != GGUF_MAGIC {
            return Err(format_error(format!(
                "invalid magic 0x{magic:08X}, expected 0x{GGUF_MAGIC:08X}"
            )));
        }

        let version = io::read_u32(cursor)?;
        if version != GGUF_VERSION_V3 {
            return Err(format_error(format!(
                "unsupported version {version}, only v{GGUF_VERSION_V3} is supported"
            )));
        }

        let tensor_count = io::read_u64(cursor)?;
        if tensor_count > MAX_TENSOR_COUNT {
            return Err(format_error(format!(
                "tensor_count {tensor_count} exceeds maximum {MAX_TENSOR_COUNT}"
            )));
        }

        let metadata_count = io::read_u64(cursor)?;
        if metadata_count > MAX_METADATA_COUNT {
            return Err(format_error(format!(
                "metadata_count {metadata_count} exceeds maximum {MAX_METADATA_COUNT}"
            )));
        }

        Ok(GGUFHeader {
            magic,
            version,
            tensor_count,
            metadata_count,
        })
    }

    fn parse_metadata(
        cursor: &mut Cursor<&[u8]>,
        count: u64,
    ) -> Result<Vec<(String, GGUFValue)>> {
        let mut metadata = Vec::with_capacity(count as usize);
        let mut seen = HashSet::with_capacity(count as usize);

        for _ in 0..count {
            let key = io::read_string(cursor)?;
            if !seen.insert(key.clone()) {
                return Err(format_error(format!("duplicate metadata key '{key}'")));
            }
            let tag = io::read_u32(cursor)?;
            let value_type = GGUFValueType::from_u32(tag)
                .ok_or_else(|| format_error(format!("key '{key}' has unknown value type {tag}")))?;
            let value = Self::read_value(cursor, value_type)?;
            metadata.push((key, value));
        }

        Ok(metadata)
    }

    fn read_value(cursor: &mut Cursor<&[u8]>, value_type: GGUFValueType) -> Result<GGUFValue> {
        Ok(match value_type {
            GGUFValueType::UInt8 => GGUFValue::UInt8(io::read_u8(cursor)?),
            GGUFValueType::Int8 => GGUFValue::Int8(io::read_i8(cursor)?),
            GGUFValueType::UInt16 => GGUFValue::UInt16(io::read_u16(cursor)?),
            GGUFValueType::Int16 => GGUFValue::Int16(io::read_i16(cursor)?),
            GGUFValueType::UInt32 => GGUFValue::UInt32(io::read_u32(cursor)?),
            GGUFValueType::Int32 => GGUFValue::Int32(io::read_i32(cursor)?),
            GGUFValueType::Float32 => GGUFValue::Float32(io::read_f32(cursor)?),
            GGUFValueType::Bool => GGUFValue::Bool(io::read_bool(cursor)?),
            GGUFValueType::String => GGUFValue::String(io::read_string(cursor)?),
            GGUFValueType::Array => {
                let tag = io::read_u32(cursor)?;
                let element_type = GGUFValueType::from_u32(tag)
                    .ok_or_else(|| format_error(format!("unknown array element type {tag}")))?;
                if !io::is_scalar_type(element_type) {
                    return Err(format_error("nested arrays are not supported"));
                }

                let array_len = io::read_u64(cursor)?;
                if array_len > MAX_ARRAY_LEN {
                    return Err(format_error(format!(
                        "array length {array_len} exceeds maximum {MAX_ARRAY_LEN}"
                    )));
                }

                let mut values = Vec::with_capacity((array_len as usize).min(4096));
                for _ in 0..array_len {
                    values.push(Self::read_value(cursor, element_type)?);
                }
                GGUFValue::Array {
                    element_type,
                    values,
                }
            },
            GGUFValueType::UInt64 => GGUFValue::UInt64(io::read_u64(cursor)?),
            GGUFValueType::Int64 => GGUFValue::Int64(io::read_i64(cursor)?),
            GGUFValueType::Float64 => GGUFValue::Float64(io::read_f64(cursor)?),
        })
    }

    fn alignment_from(metadata: &[(String, GGUFValue)]) -> Result<usize> {
        let Some((_, value)) = metadata.iter().find(|(k, _)| k == KEY_ALIGNMENT) else {
            return Ok(GGUF_DEFAULT_ALIGNMENT);
        };
        match value {
            GGUFValue::UInt32(a) if a.is_power_of_two() => Ok(*a as usize),
            other => Err(format_error(format!(
                "{KEY_ALIGNMENT} must be a power-of-two u32, got {other:?}"
            ))),
        }
    }

    fn parse_tensor_info(cursor: &mut Cursor<&[u8]>, count: u64) -> Result<Vec<TensorInfo>> {
        let mut tensors = Vec::with_capacity(count as usize);
        let mut seen = HashSet::with_capacity(count as usize);

        for _ in 0..count {
            let name = io::read_string(cursor)?;
            if !seen.insert(name.clone()) {
                return Err(format_error(format!("duplicate tensor name '{name}'")));
            }

            let n_dims = io::read_u32(cursor)?;
            if n_dims == 0 || n_dims > GGUF_MAX_DIMS {
                return Err(format_error(format!(
                    "tensor '{name}' has {n_dims} dimensions, expected 1..={GGUF_MAX_DIMS}"
                )));
            }

            // Storage order: dims[0] is the row length. Never reversed here.
            let mut dims = Vec::with_capacity(n_dims as usize);
            for _ in 0..n_dims {
                dims.push(io::read_u64(cursor)?);
            }

            let type_id = io::read_u32(cursor)?;
            let ggml_type = GgmlType::from_id(type_id).ok_or_else(|| {
                format_error(format!("tensor '{name}' has unknown type id {type_id}"))
            })?;

            let offset = io::read_u64(cursor)?;

            tensors.push(TensorInfo {
                name,
                dims,
                ggml_type,
                offset,
            });
        }

        Ok(tensors)
    }

    fn validate_layout(
        tensors: &[TensorInfo],
        alignment: usize,
        tensor_data_start: usize,
        file_len: usize,
    ) -> Result<()> {
        for info in tensors {
            let name = &info.name;
            if info.dims.contains(&0) {
                return Err(format_error(format!(
                    "tensor '{name}' has a zero extent: {:?}",
                    info.dims
                )));
            }
            let ty = info.ggml_type;
            let size = checked_n_elements(&info.dims)
                .and_then(|n| (n / ty.block_size()).checked_mul(ty.type_size()))
                .ok_or_else(|| {
                    format_error(format!(
                        "tensor '{name}' element count overflows: {:?}",
                        info.dims
                    ))
                })?;
            if !info.ggml_type.is_aligned(info.dims[0] as usize) {
                return Err(format_error(format!(
                    "tensor '{name}' row length {} is not a multiple of the {} block size {}",
                    info.dims[0],
                    info.ggml_type,
                    info.ggml_type.block_size()
                )));
            }
            if info.offset % alignment as u64 != 0 {
                return Err(format_error(format!(
                    "tensor '{name}' offset {} is not aligned to {alignment}",
                    info.offset
                )));
            }

            let size = size as u64;
            let end = (tensor_data_start as u64)
                .checked_add(info.offset)
                .and_then(|start| start.checked_add(size));
            match end {
                Some(end) if end <= file_len as u64 => {},
                _ => {
                    return Err(format_error(format!(
                        "tensor '{name}' payload ({size} bytes at offset {}) runs past end of file ({file_len} bytes)",
                        info.offset
                    )))
                },
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gguf::test_factory::GGUFBuilder;

    #[test]
    fn test_parse_minimal_container() {
        let data = GGUFBuilder::new()
            .architecture("llama")
            .add_u32("llama.block_count", 2)
            .add_f32_tensor("output.weight", &[32, 2], &[0.5; 64])
            .build();

        let container = GGUFContainer::from_bytes(&data).unwrap();
        assert_eq!(container.header.version, 3);
        assert_eq!(container.metadata.len(), 2);
        assert_eq!(container.metadata[0].0, "general.architecture");
        assert_eq!(container.architecture(), Some("llama"));
        assert_eq!(container.tensors.len(), 1);
        assert_eq!(container.tensors[0].dims, vec![32, 2]);
        assert_eq!(container.tensors[0].ggml_type, GgmlType::F32);
        assert_eq!(container.tensor_data_start % 32, 0);
        assert_eq!(container.alignment, 32);
    }

    #[test]
    fn test_metadata_order_preserved() {
        let data = GGUFBuilder::new()
            .add_string("z.last", "a")
            .add_u32("a.first", 1)
            .add_f32("m.middle", 0.5)
            .build();
        let container = GGUFContainer::from_bytes(&data).unwrap();
        let keys: Vec<_> = container.metadata.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["z.last", "a.first", "m.middle"]);
    }

    #[test]
    fn test_invalid_magic() {
        let mut data = GGUFBuilder::new().build();
        data[0..4].copy_from_slice(b"GGML");
        let err = GGUFContainer::from_bytes(&data).unwrap_err();
        assert!(err.to_string().contains("invalid magic"));
    }

    #[test]
    fn test_unsupported_version() {
        let mut data = GGUFBuilder::new().build();
        data[4..8].copy_from_slice(&2u32.to_le_bytes());
        let err = GGUFContainer::from_bytes(&data).unwrap_err();
        assert!(err.to_string().contains("unsupported version 2"));
    }

    #[test]
    fn test_truncated_header() {
        let data = GGUFBuilder::new().build();
        assert!(GGUFContainer::from_bytes(&data[..10]).is_err());
        assert!(GGUFContainer::from_bytes(&[]).is_err());
    }

    #[test]
    fn test_tensor_count_limit() {
        let mut data = GGUFBuilder::new().build();
        data[8..16].copy_from_slice(&(MAX_TENSOR_COUNT + 1).to_le_bytes());
        let err = GGUFContainer::from_bytes(&data).unwrap_err();
        assert!(err.to_string().contains("tensor_count"));
    }

    #[test]
    fn test_duplicate_metadata_key() {
        let data = GGUFBuilder::new()
            .add_u32("dup", 1)
            .add_u32("dup", 2)
            .build();
        let err = GGUFContainer::from_bytes(&data).unwrap_err();
        assert!(err.to_string().contains("duplicate metadata key 'dup'"));
    }

    #[test]
    fn test_duplicate_tensor_name() {
        let data = GGUFBuilder::new()
            .add_f32_tensor("w", &[4], &[0.0; 4])
            .add_f32_tensor("w", &[4], &[0.0; 4])
            .build();
        let err = GGUFContainer::from_bytes(&data).unwrap_err();
        assert!(err.to_string().contains("duplicate tensor name 'w'"));
    }

    #[test]
    fn test_unknown_tensor_type() {
        let data = GGUFBuilder::new()
            .add_raw_tensor("w", &[4], 4, vec![0u8; 16])
            .build();
        let err = GGUFContainer::from_bytes(&data).unwrap_err();
        assert!(err.to_string().contains("unknown type id 4"));
    }

    #[test]
    fn test_zero_extent_rejected() {
        let data = GGUFBuilder::new()
            .add_raw_tensor("w", &[4, 0], GgmlType::F32.id(), vec![])
            .build();
        let err = GGUFContainer::from_bytes(&data).unwrap_err();
        assert!(err.to_string().contains("zero extent"));
    }

    #[test]
    fn test_unaligned_quantized_row_rejected() {
        let data = GGUFBuilder::new()
            .add_raw_tensor("w", &[40], GgmlType::Q8_0.id(), vec![0u8; 34])
            .build();
        let err = GGUFContainer::from_bytes(&data).unwrap_err();
        assert!(err.to_string().contains("block size 32"));
    }

    #[test]
    fn test_payload_past_end_rejected() {
        let mut data = GGUFBuilder::new()
            .add_f32_tensor("w", &[8], &[1.0; 8])
            .build();
        data.truncate(data.len() - 4);
        let err = GGUFContainer::from_bytes(&data).unwrap_err();
        assert!(err.to_string().contains("past end of file"));
    }

    #[test]
    fn test_nested_array_rejected() {
        let data = GGUFBuilder::new()
            .add_raw_metadata("bad", 9, {
                let mut v = 9u32.to_le_bytes().to_vec();
                v.extend_from_slice(&0u64.to_le_bytes());
                v
            })
            .build();
        let err = GGUFContainer::from_bytes(&data).unwrap_err();
        assert!(err.to_string().contains("nested arrays"));
    }

    #[test]
    fn test_custom_alignment() {
        let data = GGUFBuilder::new()
            .alignment(64)
            .add_f32_tensor("a", &[3], &[1.0; 3])
            .add_f32_tensor("b", &[3], &[2.0; 3])
            .build();
        let container = GGUFContainer::from_bytes(&data).unwrap();
        assert_eq!(container.alignment, 64);
        assert_eq!(container.tensor_data_start % 64, 0);
        assert_eq!(container.tensors[1].offset, 64);
    }

    #[test]
    fn test_bad_alignment_value() {
        let data = GGUFBuilder::new().add_u32(KEY_ALIGNMENT, 48).build();
        let err = GGUFContainer::from_bytes(&data).unwrap_err();
        assert!(err.to_string().contains("power-of-two"));
    }

    #[test]
    fn test_empty_container() {
        let data = GGUFBuilder::new().architecture("whisper").build();
        let container = GGUFContainer::from_bytes(&data).unwrap();
        assert!(container.tensors.is_empty());
        assert_eq!(container.metadata.len(), 1);
    }
}
