//! Reference dequantization
//!
//! Inverse of every format the kernels produce. Used to check kernel output.

use half::f16;

use super::k_quants::{get_scale_min_k4, Q4_K_BLOCK_BYTES, Q5_K_BLOCK_BYTES};
use super::legacy::{
    QK, Q4_0_BLOCK_BYTES, Q4_1_BLOCK_BYTES, Q5_0_BLOCK_BYTES, Q5_1_BLOCK_BYTES, Q8_0_BLOCK_BYTES,
};
use crate::error::{CuantizarError, Result};
use crate::registry::GgmlType;

#[inline]
fn read_f16(bytes: &[u8]) -> f32 {
    f16::from_le_bytes([bytes[0], bytes[1]]).to_f32()
}

/// Dequantize `n` elements of `ty` from `data`
///
/// # Errors
///
/// Returns [`CuantizarError::InvalidShape`] if `n` is not a whole number of
/// blocks or `data` has the wrong length, and
/// [`CuantizarError::UnsupportedOperation`] for types without a decoder.
pub fn dequantize_row(ty: GgmlType, data: &[u8], n: usize) -> Result<Vec<f32>> {
    if !ty.is_aligned(n) || data.len() != ty.row_size(n) {
        return Err(CuantizarError::InvalidShape {
            reason: format!(
                "{ty}: {} bytes cannot hold {n} elements (expected {})",
                data.len(),
                ty.type_size() * n / ty.block_size()
            ),
        });
    }

    let mut out = Vec::with_capacity(n);
    match ty {
        GgmlType::F32 => out.extend(
            data.chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
        ),
        GgmlType::F16 => out.extend(data.chunks_exact(2).map(read_f16)),
        GgmlType::Q4_0 => {
            for b in data.chunks_exact(Q4_0_BLOCK_BYTES) {
                let d = read_f16(b);
                let qs = &b[2..];
                let mut y = [0.0f32; QK];
                for j in 0..QK / 2 {
                    y[j] = (i32::from(qs[j] & 0x0F) - 8) as f32 * d;
                    y[j + QK / 2] = (i32::from(qs[j] >> 4) - 8) as f32 * d;
                }
                out.extend_from_slice(&y);
            }
        },
        GgmlType::Q4_1 => {
            for b in data.chunks_exact(Q4_1_BLOCK_BYTES) {
                let d = read_f16(b);
                let m = read_f16(&b[2..]);
                let qs = &b[4..];
                let mut y = [0.0f32; QK];
                for j in 0..QK / 2 {
                    y[j] = f32::from(qs[j] & 0x0F) * d + m;
                    y[j + QK / 2] = f32::from(qs[j] >> 4) * d + m;
                }
                out.extend_from_slice(&y);
            }
        },
        GgmlType::Q5_0 => {
            for b in data.chunks_exact(Q5_0_BLOCK_BYTES) {
                let d = read_f16(b);
                let qh = u32::from_le_bytes([b[2], b[3], b[4], b[5]]);
                let qs = &b[6..];
                let mut y = [0.0f32; QK];
                for j in 0..QK / 2 {
                    let xh0 = ((qh >> j) << 4) & 0x10;
                    let xh1 = (qh >> (j + 12)) & 0x10;
                    let x0 = (u32::from(qs[j] & 0x0F) | xh0) as i32 - 16;
                    let x1 = (u32::from(qs[j] >> 4) | xh1) as i32 - 16;
                    y[j] = x0 as f32 * d;
                    y[j + QK / 2] = x1 as f32 * d;
                }
                out.extend_from_slice(&y);
            }
        },
        GgmlType::Q5_1 => {
            for b in data.chunks_exact(Q5_1_BLOCK_BYTES) {
                let d = read_f16(b);
                let m = read_f16(&b[2..]);
                let qh = u32::from_le_bytes([b[4], b[5], b[6], b[7]]);
                let qs = &b[8..];
                let mut y = [0.0f32; QK];
                for j in 0..QK / 2 {
                    let xh0 = ((qh >> j) << 4) & 0x10;
                    let xh1 = (qh >> (j + 12)) & 0x10;
                    y[j] = (u32::from(qs[j] & 0x0F) | xh0) as f32 * d + m;
                    y[j + QK / 2] = (u32::from(qs[j] >> 4) | xh1) as f32 * d + m;
                }
                out.extend_from_slice(&y);
            }
        },
        GgmlType::Q8_0 => {
            for b in data.chunks_exact(Q8_0_BLOCK_BYTES) {
                let d = read_f16(b);
                out.extend(b[2..].iter().map(|&q| f32::from(q as i8) * d));
            }
        },
        GgmlType::Q4_K => {
            for b in data.chunks_exact(Q4_K_BLOCK_BYTES) {
                let d = read_f16(b);
                let dmin = read_f16(&b[2..]);
                let scales = &b[4..16];
                let qs = &b[16..];
                for (k, q) in qs.chunks_exact(32).enumerate() {
                    let (sc1, m1) = get_scale_min_k4(2 * k, scales);
                    let (sc2, m2) = get_scale_min_k4(2 * k + 1, scales);
                    let (d1, dm1) = (d * f32::from(sc1), dmin * f32::from(m1));
                    let (d2, dm2) = (d * f32::from(sc2), dmin * f32::from(m2));
                    out.extend(q.iter().map(|&v| d1 * f32::from(v & 0x0F) - dm1));
                    out.extend(q.iter().map(|&v| d2 * f32::from(v >> 4) - dm2));
                }
            }
        },
        GgmlType::Q5_K => {
            for b in data.chunks_exact(Q5_K_BLOCK_BYTES) {
                let d = read_f16(b);
                let dmin = read_f16(&b[2..]);
                let scales = &b[4..16];
                let qh = &b[16..48];
                let qs = &b[48..];
                let mut u1 = 1u8;
                let mut u2 = 2u8;
                for (k, ql) in qs.chunks_exact(32).enumerate() {
                    let (sc1, m1) = get_scale_min_k4(2 * k, scales);
                    let (sc2, m2) = get_scale_min_k4(2 * k + 1, scales);
                    let (d1, dm1) = (d * f32::from(sc1), dmin * f32::from(m1));
                    let (d2, dm2) = (d * f32::from(sc2), dmin * f32::from(m2));
                    for l in 0..32 {
                        let hi = if qh[l] & u1 != 0 { 16 } else { 0 };
                        out.push(d1 * f32::from((ql[l] & 0x0F) + hi) - dm1);
                    }
                    for l in 0..32 {
                        let hi = if qh[l] & u2 != 0 { 16 } else { 0 };
                        out.push(d2 * f32::from((ql[l] >> 4) + hi) - dm2);
                    }
                    u1 <<= 2;
                    u2 <<= 2;
                }
            }
        },
        other => {
            return Err(CuantizarError::UnsupportedOperation {
                operation: "dequantize_row".to_string(),
                reason: format!("no decoder for {other}"),
            })
        },
    }
    debug_assert_eq!(out.len(), n);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f16_decode() {
        let data: Vec<u8> = [1.0f32, -2.5]
            .iter()
            .flat_map(|&v| f16::from_f32(v).to_le_bytes())
            .collect();
        assert_eq!(dequantize_row(GgmlType::F16, &data, 2).unwrap(), vec![1.0, -2.5]);
    }

    #[test]
    fn test_q8_0_decode() {
        let mut block = vec![0u8; Q8_0_BLOCK_BYTES];
        block[0..2].copy_from_slice(&f16::from_f32(0.5).to_le_bytes());
        block[2] = 4;
        block[3] = (-6i8) as u8;
        let y = dequantize_row(GgmlType::Q8_0, &block, 32).unwrap();
        assert_eq!(y[0], 2.0);
        assert_eq!(y[1], -3.0);
        assert_eq!(y[2], 0.0);
    }

    #[test]
    fn test_length_mismatch() {
        assert!(dequantize_row(GgmlType::Q4_0, &[0u8; 17], 32).is_err());
        assert!(dequantize_row(GgmlType::Q4_0, &[0u8; 18], 31).is_err());
    }

    #[test]
    fn test_unsupported_type() {
        let err = dequantize_row(GgmlType::Q6_K, &[0u8; 210], 256).unwrap_err();
        assert!(matches!(err, CuantizarError::UnsupportedOperation { .. }));
    }
}
