//! GGUF type definitions and constants
//!
//! Core types shared by the container reader and writer:
//! - Magic number, version, and alignment constants
//! - Metadata value model (`GGUFValueType`, `GGUFValue`)
//! - Core structs: `GGUFHeader`, `TensorInfo`, `GGUFContainer`, `TensorDescriptor`

use std::borrow::Cow;

use crate::registry::GgmlType;

// ============================================================================
// GGUF Magic and Version Constants
// ============================================================================

/// GGUF magic number: "GGUF" in little-endian
pub const GGUF_MAGIC: u32 = 0x4655_4747;

/// Supported GGUF version
pub const GGUF_VERSION_V3: u32 = 3;

/// Alignment used when `general.alignment` is absent
pub const GGUF_DEFAULT_ALIGNMENT: usize = 32;

/// Metadata key overriding the data-section alignment
pub const KEY_ALIGNMENT: &str = "general.alignment";

/// Metadata key naming the model architecture
pub const KEY_ARCHITECTURE: &str = "general.architecture";

/// Maximum dimensions per tensor accepted by GGML
pub const GGUF_MAX_DIMS: u32 = 4;

// ============================================================================
// Metadata Values
// ============================================================================

/// On-disk metadata value type tag
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GGUFValueType {
    /// u8
    UInt8 = 0,
    /// i8
    Int8 = 1,
    /// u16
    UInt16 = 2,
    /// i16
    Int16 = 3,
    /// u32
    UInt32 = 4,
    /// i32
    Int32 = 5,
    /// f32
    Float32 = 6,
    /// bool (one byte)
    Bool = 7,
    /// u64-length-prefixed UTF-8
    String = 8,
    /// typed array
    Array = 9,
    /// u64
    UInt64 = 10,
    /// i64
    Int64 = 11,
    /// f64
    Float64 = 12,
}

impl GGUFValueType {
    /// Decode a type tag
    #[must_use]
    pub fn from_u32(tag: u32) -> Option<Self> {
        Some(match tag {
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
            _ => return None,
        })
    }
}

/// GGUF metadata value
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
    /// Array of values sharing one element type
    ///
    /// The element type is kept explicitly so empty arrays re-encode
    /// byte-for-byte.
    Array {
        /// Element type tag
        element_type: GGUFValueType,
        /// Elements
        values: Vec<GGUFValue>,
    },
    /// Unsigned 64-bit integer
    UInt64(u64),
    /// Signed 64-bit integer
    Int64(i64),
    /// 64-bit floating point
    Float64(f64),
}

impl GGUFValue {
    /// Type tag written before this value
    #[must_use]
    pub fn value_type(&self) -> GGUFValueType {
        match self {
            Self::UInt8(_) => GGUFValueType::UInt8,
            Self::Int8(_) => GGUFValueType::Int8,
            Self::UInt16(_) => GGUFValueType::UInt16,
            Self::Int16(_) => GGUFValueType::Int16,
            Self::UInt32(_) => GGUFValueType::UInt32,
            Self::Int32(_) => GGUFValueType::Int32,
            Self::Float32(_) => GGUFValueType::Float32,
            Self::Bool(_) => GGUFValueType::Bool,
            Self::String(_) => GGUFValueType::String,
            Self::Array { .. } => GGUFValueType::Array,
            Self::UInt64(_) => GGUFValueType::UInt64,
            Self::Int64(_) => GGUFValueType::Int64,
            Self::Float64(_) => GGUFValueType::Float64,
        }
    }

    /// String payload, if this is a string
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Unsigned integer payload widened to u64
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Self::UInt8(v) => Some(u64::from(v)),
            Self::UInt16(v) => Some(u64::from(v)),
            Self::UInt32(v) => Some(u64::from(v)),
            Self::UInt64(v) => Some(v),
            _ => None,
        }
    }
}

// ============================================================================
// Core GGUF Types
// ============================================================================

/// GGUF file header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GGUFHeader {
    /// Magic number (must be `GGUF_MAGIC`)
    pub magic: u32,
    /// Format version
    pub version: u32,
    /// Number of tensors in the file
    pub tensor_count: u64,
    /// Number of metadata key-value pairs
    pub metadata_count: u64,
}

/// Tensor table entry
///
/// `dims` is kept in storage order: `dims[0]` is the row length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorInfo {
    /// Tensor name
    pub name: String,
    /// Extents, innermost first
    pub dims: Vec<u64>,
    /// Storage type
    pub ggml_type: GgmlType,
    /// Offset of the payload relative to the data section
    pub offset: u64,
}

impl TensorInfo {
    /// Product of all extents
    #[must_use]
    pub fn n_elements(&self) -> usize {
        n_elements(&self.dims)
    }

    /// Payload size in bytes
    #[must_use]
    pub fn byte_size(&self) -> usize {
        payload_size(self.ggml_type, &self.dims)
    }
}

/// Parsed container layout (no tensor data)
#[derive(Debug, Clone)]
pub struct GGUFContainer {
    /// File header
    pub header: GGUFHeader,
    /// Metadata in stored order
    pub metadata: Vec<(String, GGUFValue)>,
    /// Tensor table in stored order
    pub tensors: Vec<TensorInfo>,
    /// Data-section alignment
    pub alignment: usize,
    /// Absolute offset of the data section
    pub tensor_data_start: usize,
}

/// One tensor as it flows through the pipeline
///
/// Descriptors read from a container borrow their payload from the mapping.
/// Descriptors produced by quantization own their payload.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorDescriptor<'a> {
    /// Tensor name
    pub name: &'a str,
    /// Extents, innermost first
    pub dims: &'a [u64],
    /// Storage type of `data`
    pub ggml_type: GgmlType,
    /// Payload bytes
    pub data: Cow<'a, [u8]>,
}

impl TensorDescriptor<'_> {
    /// Row length (`dims[0]`), or 1 for a dimensionless tensor
    #[must_use]
    pub fn row_len(&self) -> usize {
        self.dims.first().map_or(1, |&d| d as usize)
    }

    /// Product of all extents
    #[must_use]
    pub fn n_elements(&self) -> usize {
        n_elements(self.dims)
    }

    /// Number of rows of length [`row_len`](Self::row_len)
    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.n_elements() / self.row_len().max(1)
    }

    /// Whether the payload aliases the source mapping
    #[must_use]
    pub fn is_borrowed(&self) -> bool {
        matches!(self.data, Cow::Borrowed(_))
    }
}

/// Product of extents
///
/// Callers validate extents with [`checked_n_elements`] first.
#[must_use]
pub fn n_elements(dims: &[u64]) -> usize {
    dims.iter().map(|&d| d as usize).product()
}

/// Product of extents, `None` on overflow
#[must_use]
pub fn checked_n_elements(dims: &[u64]) -> Option<usize> {
    dims.iter().try_fold(1usize, |acc, &d| {
        usize::try_from(d).ok().and_then(|d| acc.checked_mul(d))
    })
}

/// Bytes occupied by a tensor of `ty` with `dims`
#[must_use]
pub fn payload_size(ty: GgmlType, dims: &[u64]) -> usize {
    let row_len = dims.first().map_or(1, |&d| d as usize);
    let rows = n_elements(dims) / row_len.max(1);
    ty.row_size(row_len) * rows
}

/// Round `offset` up to a multiple of `alignment`
#[must_use]
pub fn align_offset(offset: usize, alignment: usize) -> usize {
    offset.div_ceil(alignment) * alignment
}
