//! Numeric format registry
//!
//! Maps GGML type ids and user-facing type names to block geometry. Every
//! tensor in a GGUF container is stored as whole blocks of `block_size`
//! elements, each block occupying `type_size` bytes, so the byte size of a row
//! of `n` elements is `type_size * n / block_size`.
//!
//! | Type | Block | Bytes/block |
//! |------|-------|-------------|
//! | `F32` | 1 | 4 |
//! | `F16` | 1 | 2 |
//! | `Q4_0` | 32 | 18 |
//! | `Q4_1` | 32 | 20 |
//! | `Q5_0` | 32 | 22 |
//! | `Q5_1` | 32 | 24 |
//! | `Q8_0` | 32 | 34 |
//! | `Q4_K` | 256 | 144 |
//! | `Q5_K` | 256 | 176 |

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CuantizarError, Result};

/// GGML tensor type
///
/// Discriminants are the on-disk type ids. Ids 4, 5 and 31..=33 were retired
/// upstream and are rejected by the reader.
#[allow(non_camel_case_types)]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GgmlType {
    /// 32-bit float
    F32 = 0,
    /// 16-bit IEEE half
    F16 = 1,
    /// 4-bit, 32-element blocks, f16 scale
    Q4_0 = 2,
    /// 4-bit, 32-element blocks, f16 scale + min
    Q4_1 = 3,
    /// 5-bit, 32-element blocks, f16 scale
    Q5_0 = 6,
    /// 5-bit, 32-element blocks, f16 scale + min
    Q5_1 = 7,
    /// 8-bit, 32-element blocks, f16 scale
    Q8_0 = 8,
    /// 8-bit, 32-element blocks, f16 scale + sum
    Q8_1 = 9,
    /// 2-bit K-quant
    Q2_K = 10,
    /// 3-bit K-quant
    Q3_K = 11,
    /// 4-bit K-quant, 256-element super-blocks
    Q4_K = 12,
    /// 5-bit K-quant, 256-element super-blocks
    Q5_K = 13,
    /// 6-bit K-quant
    Q6_K = 14,
    /// 8-bit K-quant (intermediate format)
    Q8_K = 15,
    /// 2.06 bpw importance quant
    IQ2_XXS = 16,
    /// 2.31 bpw importance quant
    IQ2_XS = 17,
    /// 3.06 bpw importance quant
    IQ3_XXS = 18,
    /// 1.56 bpw importance quant
    IQ1_S = 19,
    /// 4.5 bpw non-linear quant, 32-element blocks
    IQ4_NL = 20,
    /// 3.44 bpw importance quant
    IQ3_S = 21,
    /// 2.5 bpw importance quant
    IQ2_S = 22,
    /// 4.25 bpw non-linear quant
    IQ4_XS = 23,
    /// 8-bit signed integer
    I8 = 24,
    /// 16-bit signed integer
    I16 = 25,
    /// 32-bit signed integer
    I32 = 26,
    /// 64-bit signed integer
    I64 = 27,
    /// 64-bit float
    F64 = 28,
    /// 1.75 bpw importance quant
    IQ1_M = 29,
    /// bfloat16
    BF16 = 30,
    /// ternary, 1.69 bpw
    TQ1_0 = 34,
    /// ternary, 2.06 bpw
    TQ2_0 = 35,
}

impl GgmlType {
    /// Every type the reader accepts, in id order
    pub const ALL: [GgmlType; 31] = [
        Self::F32,
        Self::F16,
        Self::Q4_0,
        Self::Q4_1,
        Self::Q5_0,
        Self::Q5_1,
        Self::Q8_0,
        Self::Q8_1,
        Self::Q2_K,
        Self::Q3_K,
        Self::Q4_K,
        Self::Q5_K,
        Self::Q6_K,
        Self::Q8_K,
        Self::IQ2_XXS,
        Self::IQ2_XS,
        Self::IQ3_XXS,
        Self::IQ1_S,
        Self::IQ4_NL,
        Self::IQ3_S,
        Self::IQ2_S,
        Self::IQ4_XS,
        Self::I8,
        Self::I16,
        Self::I32,
        Self::I64,
        Self::F64,
        Self::IQ1_M,
        Self::BF16,
        Self::TQ1_0,
        Self::TQ2_0,
    ];

    /// On-disk type id
    #[must_use]
    pub const fn id(self) -> u32 {
        self as u32
    }

    /// Look up a type by its on-disk id
    #[must_use]
    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.id() == id)
    }

    /// Number of elements per block
    #[must_use]
    pub const fn block_size(self) -> usize {
        match self {
            Self::F32
            | Self::F16
            | Self::BF16
            | Self::F64
            | Self::I8
            | Self::I16
            | Self::I32
            | Self::I64 => 1,
            Self::Q4_0
            | Self::Q4_1
            | Self::Q5_0
            | Self::Q5_1
            | Self::Q8_0
            | Self::Q8_1
            | Self::IQ4_NL => 32,
            Self::Q2_K
            | Self::Q3_K
            | Self::Q4_K
            | Self::Q5_K
            | Self::Q6_K
            | Self::Q8_K
            | Self::IQ2_XXS
            | Self::IQ2_XS
            | Self::IQ3_XXS
            | Self::IQ1_S
            | Self::IQ3_S
            | Self::IQ2_S
            | Self::IQ4_XS
            | Self::IQ1_M
            | Self::TQ1_0
            | Self::TQ2_0 => 256,
        }
    }

    /// Bytes per block
    #[must_use]
    pub const fn type_size(self) -> usize {
        match self {
            Self::I8 => 1,
            Self::F16 | Self::BF16 | Self::I16 => 2,
            Self::F32 | Self::I32 => 4,
            Self::F64 | Self::I64 => 8,
            Self::Q4_0 | Self::IQ4_NL => 18,
            Self::Q4_1 => 20,
            Self::Q5_0 => 22,
            Self::Q5_1 => 24,
            Self::Q8_0 => 34,
            Self::Q8_1 => 36,
            Self::Q2_K => 84,
            Self::Q3_K | Self::IQ3_S => 110,
            Self::Q4_K => 144,
            Self::Q5_K => 176,
            Self::Q6_K => 210,
            Self::Q8_K => 292,
            Self::IQ2_XXS | Self::TQ2_0 => 66,
            Self::IQ2_XS => 74,
            Self::IQ3_XXS => 98,
            Self::IQ1_S => 50,
            Self::IQ2_S => 82,
            Self::IQ4_XS => 136,
            Self::IQ1_M => 56,
            Self::TQ1_0 => 54,
        }
    }

    /// Bytes needed for a row of `n_per_row` elements
    ///
    /// `n_per_row` must be a multiple of [`block_size`](Self::block_size);
    /// callers check alignment first.
    #[must_use]
    pub const fn row_size(self, n_per_row: usize) -> usize {
        self.type_size() * n_per_row / self.block_size()
    }

    /// Whether `n` elements form a whole number of blocks
    #[must_use]
    pub const fn is_aligned(self, n: usize) -> bool {
        n % self.block_size() == 0
    }

    /// Full- or half-precision float, the only inputs the kernels accept
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F16)
    }

    /// Block-quantized (block size greater than one)
    #[must_use]
    pub const fn is_block_quantized(self) -> bool {
        self.block_size() > 1
    }

    /// Canonical upper-case name, as written by llama.cpp tooling
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::F32 => "F32",
            Self::F16 => "F16",
            Self::Q4_0 => "Q4_0",
            Self::Q4_1 => "Q4_1",
            Self::Q5_0 => "Q5_0",
            Self::Q5_1 => "Q5_1",
            Self::Q8_0 => "Q8_0",
            Self::Q8_1 => "Q8_1",
            Self::Q2_K => "Q2_K",
            Self::Q3_K => "Q3_K",
            Self::Q4_K => "Q4_K",
            Self::Q5_K => "Q5_K",
            Self::Q6_K => "Q6_K",
            Self::Q8_K => "Q8_K",
            Self::IQ2_XXS => "IQ2_XXS",
            Self::IQ2_XS => "IQ2_XS",
            Self::IQ3_XXS => "IQ3_XXS",
            Self::IQ1_S => "IQ1_S",
            Self::IQ4_NL => "IQ4_NL",
            Self::IQ3_S => "IQ3_S",
            Self::IQ2_S => "IQ2_S",
            Self::IQ4_XS => "IQ4_XS",
            Self::I8 => "I8",
            Self::I16 => "I16",
            Self::I32 => "I32",
            Self::I64 => "I64",
            Self::F64 => "F64",
            Self::IQ1_M => "IQ1_M",
            Self::BF16 => "BF16",
            Self::TQ1_0 => "TQ1_0",
            Self::TQ2_0 => "TQ2_0",
        }
    }
}

impl fmt::Display for GgmlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolve a user-supplied type name to a target format
///
/// Matching is case-insensitive. The `_M`/`_S` mixture suffixes used by
/// llama.cpp presets resolve to their base K-quant.
///
/// # Errors
///
/// Returns [`CuantizarError::UnknownType`] for anything else.
pub fn resolve(name: &str) -> Result<GgmlType> {
    let ty = match name.to_ascii_uppercase().as_str() {
        "F32" => GgmlType::F32,
        "F16" => GgmlType::F16,
        "Q4_0" => GgmlType::Q4_0,
        "Q4_1" => GgmlType::Q4_1,
        "Q4_K" | "Q4_K_M" | "Q4_K_S" => GgmlType::Q4_K,
        "Q5_0" => GgmlType::Q5_0,
        "Q5_1" => GgmlType::Q5_1,
        "Q5_K" | "Q5_K_M" | "Q5_K_S" => GgmlType::Q5_K,
        "Q8_0" => GgmlType::Q8_0,
        _ => {
            return Err(CuantizarError::UnknownType {
                name: name.to_string(),
            })
        },
    };
    Ok(ty)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_is_case_insensitive() {
        assert_eq!(resolve("q8_0").unwrap(), GgmlType::Q8_0);
        assert_eq!(resolve("Q8_0").unwrap(), GgmlType::Q8_0);
        assert_eq!(resolve("f16").unwrap(), GgmlType::F16);
    }

    #[test]
    fn test_resolve_k_quant_spellings() {
        for name in ["Q4_K", "q4_k_m", "Q4_K_S"] {
            assert_eq!(resolve(name).unwrap(), GgmlType::Q4_K);
        }
        for name in ["Q5_K", "Q5_K_M", "q5_k_s"] {
            assert_eq!(resolve(name).unwrap(), GgmlType::Q5_K);
        }
        assert_eq!(GgmlType::Q4_K.block_size(), 256);
        assert_eq!(GgmlType::Q5_K.block_size(), 256);
    }

    #[test]
    fn test_resolve_unknown() {
        let err = resolve("Q9_X").unwrap_err();
        assert!(matches!(err, CuantizarError::UnknownType { ref name } if name == "Q9_X"));
        assert!(resolve("").is_err());
        assert!(resolve("Q6_K").is_err());
    }

    #[test]
    fn test_ids_round_trip() {
        for ty in GgmlType::ALL {
            assert_eq!(GgmlType::from_id(ty.id()), Some(ty));
        }
        assert_eq!(GgmlType::from_id(4), None);
        assert_eq!(GgmlType::from_id(5), None);
        assert_eq!(GgmlType::from_id(31), None);
        assert_eq!(GgmlType::from_id(999), None);
    }

    #[test]
    fn test_row_size() {
        assert_eq!(GgmlType::F32.row_size(10), 40);
        assert_eq!(GgmlType::F16.row_size(10), 20);
        assert_eq!(GgmlType::Q4_0.row_size(64), 36);
        assert_eq!(GgmlType::Q8_0.row_size(32), 34);
        assert_eq!(GgmlType::Q4_K.row_size(1024), 576);
        assert_eq!(GgmlType::Q5_K.row_size(256), 176);
    }

    #[test]
    fn test_alignment() {
        assert!(GgmlType::Q4_K.is_aligned(1024));
        assert!(!GgmlType::Q4_K.is_aligned(80));
        assert!(!GgmlType::Q8_0.is_aligned(80));
        assert!(GgmlType::Q8_0.is_aligned(96));
        assert!(GgmlType::F16.is_aligned(7));
    }

    #[test]
    fn test_float_classification() {
        assert!(GgmlType::F32.is_float());
        assert!(GgmlType::F16.is_float());
        assert!(!GgmlType::BF16.is_float());
        assert!(!GgmlType::Q8_0.is_float());
        assert!(!GgmlType::F16.is_block_quantized());
        assert!(GgmlType::Q5_1.is_block_quantized());
    }

    #[test]
    fn test_display_uses_canonical_name() {
        assert_eq!(GgmlType::Q4_K.to_string(), "Q4_K");
        assert_eq!(resolve("q5_k_m").unwrap().to_string(), "Q5_K");
    }
}
