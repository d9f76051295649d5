//! Quantization kernels and the precision bridge
//!
//! Target formats produced by [`ReferenceKernel`]:
//! - `F32`, `F16`: plain float rows
//! - `Q4_0`, `Q4_1`, `Q5_0`, `Q5_1`, `Q8_0`: 32-element blocks
//! - `Q4_K`, `Q5_K`: 256-element super-blocks
//!
//! ## Kernel contract
//!
//! A kernel receives a contiguous row-major f32 buffer of
//! `n_rows * n_per_row` elements and an output buffer of exactly
//! `target.row_size(n_per_row) * n_rows` bytes. `n_per_row` must be a
//! multiple of the target's block size. Kernels are pure functions of their
//! input, so the same input always yields the same bytes.
//!
//! ## Precision bridge
//!
//! [`to_full_precision`] widens F16 payloads to f32 before the kernel call.
//! For F32 payloads it returns a borrowed view when the bytes are suitably
//! aligned, so no copy is made.

pub mod dequantize;
pub mod k_quants;
pub mod legacy;

use std::borrow::Cow;

use half::f16;

use crate::error::{CuantizarError, Result};
use crate::registry::GgmlType;

pub use dequantize::dequantize_row;

// ============================================================================
// Precision bridge
// ============================================================================

/// View `count` elements of a float payload as f32
///
/// # Errors
///
/// Returns [`CuantizarError::UnsupportedOperation`] if `source` is neither
/// F32 nor F16, and [`CuantizarError::InvalidShape`] if `data` does not hold
/// exactly `count` elements. A widened buffer that cannot be allocated is
/// [`CuantizarError::AllocationFailed`] with an empty tensor name; the caller
/// knows which tensor it was.
pub fn to_full_precision(data: &[u8], source: GgmlType, count: usize) -> Result<Cow<'_, [f32]>> {
    if !source.is_float() {
        return Err(CuantizarError::UnsupportedOperation {
            operation: "to_full_precision".to_string(),
            reason: format!("{source} is not a float format"),
        });
    }
    let expected = count * source.type_size();
    if data.len() != expected {
        return Err(CuantizarError::InvalidShape {
            reason: format!(
                "{source} buffer is {} bytes, {count} elements need {expected}",
                data.len()
            ),
        });
    }

    match source {
        GgmlType::F32 => Ok(f32_view(data)),
        _ => {
            let mut wide = try_alloc::<f32>("", count)?;
            wide.extend(
                data.chunks_exact(2)
                    .map(|b| f16::from_le_bytes([b[0], b[1]]).to_f32()),
            );
            Ok(Cow::Owned(wide))
        },
    }
}

/// Empty vector with room for `len` elements, or
/// [`CuantizarError::AllocationFailed`] if the reservation fails
pub(crate) fn try_alloc<T>(tensor: &str, len: usize) -> Result<Vec<T>> {
    let mut out = Vec::new();
    out.try_reserve_exact(len)
        .map_err(|_| CuantizarError::AllocationFailed {
            tensor: tensor.to_string(),
            bytes: len.saturating_mul(std::mem::size_of::<T>()),
        })?;
    Ok(out)
}

fn f32_view(data: &[u8]) -> Cow<'_, [f32]> {
    #[cfg(target_endian = "little")]
    {
        // SAFETY: every 4-byte pattern is a valid f32; align_to only yields a
        // middle slice for correctly aligned bytes.
        let (prefix, floats, suffix) = unsafe { data.align_to::<f32>() };
        if prefix.is_empty() && suffix.is_empty() {
            return Cow::Borrowed(floats);
        }
    }
    Cow::Owned(
        data.chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    )
}

/// Encode f32 values as little-endian F32 bytes
#[must_use]
pub fn f32_to_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

// ============================================================================
// Kernel boundary
// ============================================================================

/// Row quantization kernel
///
/// Implementations must be deterministic and safe to call from many worker
/// threads at once.
pub trait RowQuantizer: Send + Sync {
    /// Whether this kernel can produce `target`
    fn supports(&self, target: GgmlType) -> bool;

    /// Quantize `n_rows` rows of `n_per_row` elements from `src` into `dst`
    ///
    /// Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns [`CuantizarError::InvalidShape`] if buffer sizes or row
    /// alignment violate the kernel contract, and
    /// [`CuantizarError::UnsupportedOperation`] for unsupported targets.
    fn quantize_rows(
        &self,
        target: GgmlType,
        src: &[f32],
        dst: &mut [u8],
        n_rows: usize,
        n_per_row: usize,
    ) -> Result<usize>;
}

/// Scalar reference kernels
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceKernel;

impl RowQuantizer for ReferenceKernel {
    fn supports(&self, target: GgmlType) -> bool {
        matches!(
            target,
            GgmlType::F32
                | GgmlType::F16
                | GgmlType::Q4_0
                | GgmlType::Q4_1
                | GgmlType::Q5_0
                | GgmlType::Q5_1
                | GgmlType::Q8_0
                | GgmlType::Q4_K
                | GgmlType::Q5_K
        )
    }

    fn quantize_rows(
        &self,
        target: GgmlType,
        src: &[f32],
        dst: &mut [u8],
        n_rows: usize,
        n_per_row: usize,
    ) -> Result<usize> {
        let unsupported = || CuantizarError::UnsupportedOperation {
            operation: "quantize_rows".to_string(),
            reason: format!("no kernel produces {target}"),
        };
        if !self.supports(target) {
            return Err(unsupported());
        }
        check_contract(target, src, dst, n_rows, n_per_row)?;

        match target {
            GgmlType::F32 => {
                for (out, v) in dst.chunks_exact_mut(4).zip(src) {
                    out.copy_from_slice(&v.to_le_bytes());
                }
            },
            GgmlType::F16 => {
                for (out, &v) in dst.chunks_exact_mut(2).zip(src) {
                    out.copy_from_slice(&f16::from_f32(v).to_le_bytes());
                }
            },
            GgmlType::Q4_0 => legacy::quantize_row_q4_0(src, dst),
            GgmlType::Q4_1 => legacy::quantize_row_q4_1(src, dst),
            GgmlType::Q5_0 => legacy::quantize_row_q5_0(src, dst),
            GgmlType::Q5_1 => legacy::quantize_row_q5_1(src, dst),
            GgmlType::Q8_0 => legacy::quantize_row_q8_0(src, dst),
            GgmlType::Q4_K => k_quants::quantize_row_q4_k(src, dst),
            GgmlType::Q5_K => k_quants::quantize_row_q5_k(src, dst),
            _ => return Err(unsupported()),
        }
        Ok(dst.len())
    }
}

fn check_contract(
    target: GgmlType,
    src: &[f32],
    dst: &[u8],
    n_rows: usize,
    n_per_row: usize,
) -> Result<()> {
    if !target.is_aligned(n_per_row) {
        return Err(CuantizarError::InvalidShape {
            reason: format!(
                "row length {n_per_row} is not a multiple of the {target} block size {}",
                target.block_size()
            ),
        });
    }
    if src.len() != n_rows * n_per_row {
        return Err(CuantizarError::InvalidShape {
            reason: format!(
                "source holds {} elements, expected {n_rows} x {n_per_row}",
                src.len()
            ),
        });
    }
    let expected = target.row_size(n_per_row) * n_rows;
    if dst.len() != expected {
        return Err(CuantizarError::InvalidShape {
            reason: format!(
                "output buffer is {} bytes, {target} needs {expected}",
                dst.len()
            ),
        });
    }
    Ok(())
}

/// Quantize with the reference kernel into a fresh buffer
///
/// # Errors
///
/// See [`RowQuantizer::quantize_rows`].
pub fn quantize_rows(
    target: GgmlType,
    src: &[f32],
    n_rows: usize,
    n_per_row: usize,
) -> Result<Vec<u8>> {
    let mut dst = vec![0u8; target.row_size(n_per_row) * n_rows];
    ReferenceKernel.quantize_rows(target, src, &mut dst, n_rows, n_per_row)?;
    Ok(dst)
}
