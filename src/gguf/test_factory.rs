//! GGUF Test Factory - Synthesizes GGUF files in memory
//!
//! This module provides `GGUFBuilder` for creating GGUF v3 files without
//! needing real model files. The builder encodes everything by hand so it can
//! also produce deliberately malformed containers for reader tests.
//!
//! # Example
//!
//! ```ignore
//! let data = GGUFBuilder::new()
//!     .architecture("llama")
//!     .add_f32_tensor("blk.0.attn_q.weight", &[256, 4], &weights)
//!     .add_f16_tensor("conv.weight", &[80, 2], &conv)
//!     .build();
//!
//! let container = GGUFContainer::from_bytes(&data)?;
//! ```

use half::f16;

use super::types::{GGUF_DEFAULT_ALIGNMENT, GGUF_MAGIC, GGUF_VERSION_V3, KEY_ALIGNMENT};
use crate::registry::GgmlType;

/// Builder for GGUF v3 files in memory
pub struct GGUFBuilder {
    /// Metadata key-value pairs (key, type, value_bytes)
    metadata: Vec<(String, u32, Vec<u8>)>,
    /// Tensor entries (name, dims, type id, data)
    tensors: Vec<(String, Vec<u64>, u32, Vec<u8>)>,
    alignment: usize,
}

impl Default for GGUFBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GGUFBuilder {
    /// Create a new GGUF builder
    #[must_use]
    pub fn new() -> Self {
        Self {
            metadata: Vec::new(),
            tensors: Vec::new(),
            alignment: GGUF_DEFAULT_ALIGNMENT,
        }
    }

    // =========================================================================
    // Metadata Helpers
    // =========================================================================

    /// Add a metadata entry from pre-encoded bytes
    #[must_use]
    pub fn add_raw_metadata(mut self, key: &str, value_type: u32, bytes: Vec<u8>) -> Self {
        self.metadata.push((key.to_string(), value_type, bytes));
        self
    }

    /// Add a string metadata value
    #[must_use]
    pub fn add_string(self, key: &str, value: &str) -> Self {
        self.add_raw_metadata(key, 8, encode_string(value))
    }

    /// Add a u32 metadata value
    #[must_use]
    pub fn add_u32(self, key: &str, value: u32) -> Self {
        self.add_raw_metadata(key, 4, value.to_le_bytes().to_vec())
    }

    /// Add a f32 metadata value
    #[must_use]
    pub fn add_f32(self, key: &str, value: f32) -> Self {
        self.add_raw_metadata(key, 6, value.to_le_bytes().to_vec())
    }

    /// Add a bool metadata value
    #[must_use]
    pub fn add_bool(self, key: &str, value: bool) -> Self {
        self.add_raw_metadata(key, 7, vec![u8::from(value)])
    }

    /// Add an f32 array metadata value
    #[must_use]
    pub fn add_array_f32(self, key: &str, values: &[f32]) -> Self {
        let mut bytes = 6u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&(values.len() as u64).to_le_bytes());
        for v in values {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        self.add_raw_metadata(key, 9, bytes)
    }

    /// Add a string array metadata value
    #[must_use]
    pub fn add_array_strings(self, key: &str, values: &[&str]) -> Self {
        let mut bytes = 8u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&(values.len() as u64).to_le_bytes());
        for v in values {
            bytes.extend_from_slice(&encode_string(v));
        }
        self.add_raw_metadata(key, 9, bytes)
    }

    /// Set architecture (shorthand for general.architecture)
    #[must_use]
    pub fn architecture(self, arch: &str) -> Self {
        self.add_string("general.architecture", arch)
    }

    /// Set `general.alignment` and lay out tensor data accordingly
    #[must_use]
    pub fn alignment(mut self, alignment: u32) -> Self {
        self.alignment = alignment as usize;
        self.add_u32(KEY_ALIGNMENT, alignment)
    }

    // =========================================================================
    // Tensor Helpers
    // =========================================================================

    /// Add a tensor with an arbitrary type id and payload
    ///
    /// `dims` are in storage order (`dims[0]` is the row length).
    #[must_use]
    pub fn add_raw_tensor(mut self, name: &str, dims: &[u64], type_id: u32, data: Vec<u8>) -> Self {
        self.tensors
            .push((name.to_string(), dims.to_vec(), type_id, data));
        self
    }

    /// Add a tensor of a known type
    #[must_use]
    pub fn add_tensor(self, name: &str, dims: &[u64], ty: GgmlType, data: Vec<u8>) -> Self {
        self.add_raw_tensor(name, dims, ty.id(), data)
    }

    /// Add an F32 tensor
    #[must_use]
    pub fn add_f32_tensor(self, name: &str, dims: &[u64], data: &[f32]) -> Self {
        let bytes: Vec<u8> = data.iter().flat_map(|f| f.to_le_bytes()).collect();
        self.add_tensor(name, dims, GgmlType::F32, bytes)
    }

    /// Add an F16 tensor, converting from f32
    #[must_use]
    pub fn add_f16_tensor(self, name: &str, dims: &[u64], data: &[f32]) -> Self {
        let bytes: Vec<u8> = data
            .iter()
            .flat_map(|&f| f16::from_f32(f).to_le_bytes())
            .collect();
        self.add_tensor(name, dims, GgmlType::F16, bytes)
    }

    // =========================================================================
    // Build
    // =========================================================================

    /// Build the GGUF file as a byte vector
    #[must_use]
    pub fn build(self) -> Vec<u8> {
        let mut data = Vec::new();

        // Header
        data.extend_from_slice(&GGUF_MAGIC.to_le_bytes());
        data.extend_from_slice(&GGUF_VERSION_V3.to_le_bytes());
        data.extend_from_slice(&(self.tensors.len() as u64).to_le_bytes());
        data.extend_from_slice(&(self.metadata.len() as u64).to_le_bytes());

        // Metadata
        for (key, value_type, value_bytes) in &self.metadata {
            data.extend_from_slice(&encode_string(key));
            data.extend_from_slice(&value_type.to_le_bytes());
            data.extend_from_slice(value_bytes);
        }

        // Tensor info
        let mut tensor_data_offset = 0usize;
        for (name, dims, type_id, tensor_bytes) in &self.tensors {
            data.extend_from_slice(&encode_string(name));
            data.extend_from_slice(&(dims.len() as u32).to_le_bytes());
            for dim in dims {
                data.extend_from_slice(&dim.to_le_bytes());
            }
            data.extend_from_slice(&type_id.to_le_bytes());
            data.extend_from_slice(&(tensor_data_offset as u64).to_le_bytes());
            tensor_data_offset =
                (tensor_data_offset + tensor_bytes.len()).div_ceil(self.alignment) * self.alignment;
        }

        pad(&mut data, self.alignment);

        // Tensor data, each payload padded
        for (_, _, _, tensor_bytes) in &self.tensors {
            data.extend_from_slice(tensor_bytes);
            pad(&mut data, self.alignment);
        }

        data
    }
}

fn encode_string(s: &str) -> Vec<u8> {
    let mut bytes = (s.len() as u64).to_le_bytes().to_vec();
    bytes.extend_from_slice(s.as_bytes());
    bytes
}

fn pad(data: &mut Vec<u8>, alignment: usize) {
    let aligned = data.len().div_ceil(alignment) * alignment;
    data.resize(aligned, 0);
}

// =============================================================================
// Helper Functions for Creating Tensor Data
// =============================================================================

/// Deterministic pseudo-random weights in roughly [-1, 1]
#[must_use]
pub fn create_weight_data(num_elements: usize, seed: u32) -> Vec<f32> {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    (0..num_elements)
        .map(|_| {
            // xorshift32
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state as f32 / u32::MAX as f32) * 2.0 - 1.0
        })
        .collect()
}
