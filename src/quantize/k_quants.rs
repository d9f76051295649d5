//! K-quant super-block quantizers (`Q4_K`, `Q5_K`)
//!
//! A super-block covers 256 elements split into 8 sub-blocks of 32. Each
//! sub-block gets its own 6-bit scale and 6-bit min, packed into 12 bytes and
//! multiplied by the f16 super-block factors `d` and `dmin`:
//!
//! ```text
//! x ≈ d * sc[j] * q - dmin * m[j]
//! ```
//!
//! Sub-block scale/min search follows the iterative least-squares fit from
//! GGML (`make_qkx1_quants`).

use half::f16;

/// Elements per super-block
pub const QK_K: usize = 256;

/// Bytes of packed 6-bit scales and mins
pub const K_SCALE_SIZE: usize = 12;

/// Bytes per `Q4_K` super-block: d, dmin, scales, 128 nibble bytes
pub const Q4_K_BLOCK_BYTES: usize = 2 + 2 + K_SCALE_SIZE + QK_K / 2;

/// Bytes per `Q5_K` super-block: d, dmin, scales, 32 high-bit bytes, 128 nibble bytes
pub const Q5_K_BLOCK_BYTES: usize = 2 + 2 + K_SCALE_SIZE + QK_K / 8 + QK_K / 2;

const _: () = assert!(Q4_K_BLOCK_BYTES == 144);
const _: () = assert!(Q5_K_BLOCK_BYTES == 176);

#[inline]
pub(crate) fn nearest_int(v: f32) -> i32 {
    v.round() as i32
}

/// Fit `x ≈ scale * l - min` with `l` in `0..=nmax`
///
/// Returns `(scale, min)` with `min >= 0`. A constant sub-block returns
/// `(0, 0)`.
pub(crate) fn make_qkx1_quants(nmax: i32, ntry: usize, x: &[f32]) -> (f32, f32) {
    debug_assert!(x.len() <= 32);
    let n = x.len();
    let mut l = [0u8; 32];

    let min = x.iter().copied().fold(f32::INFINITY, f32::min);
    let max = x.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if max == min {
        return (0.0, 0.0);
    }

    let mut min = min.min(0.0);
    let mut iscale = nmax as f32 / (max - min);
    let mut scale = 1.0 / iscale;

    for _ in 0..ntry {
        let mut sumlx = 0.0f32;
        let mut suml2 = 0i32;
        let mut did_change = false;
        for (i, &v) in x.iter().enumerate() {
            let li = nearest_int(iscale * (v - min)).clamp(0, nmax);
            if li as u8 != l[i] {
                l[i] = li as u8;
                did_change = true;
            }
            sumlx += (v - min) * li as f32;
            suml2 += li * li;
        }
        if suml2 == 0 {
            break;
        }
        scale = sumlx / suml2 as f32;

        let sum: f32 = x
            .iter()
            .zip(l.iter())
            .map(|(&xi, &li)| xi - scale * f32::from(li))
            .sum();
        min = (sum / n as f32).min(0.0);
        iscale = 1.0 / scale;
        if !did_change {
            break;
        }
    }
    (scale, -min)
}

/// Unpack the 6-bit (scale, min) pair for sub-block `j`
#[inline]
pub(crate) fn get_scale_min_k4(j: usize, q: &[u8]) -> (u8, u8) {
    if j < 4 {
        (q[j] & 63, q[j + 4] & 63)
    } else {
        let d = (q[j + 4] & 0xF) | ((q[j - 4] >> 6) << 4);
        let m = (q[j + 4] >> 4) | ((q[j] >> 6) << 4);
        (d, m)
    }
}

/// Shared first stage: fit sub-blocks, pack scales, compute per-element codes.
///
/// Writes d, dmin, and scales into `head` (16 bytes) and returns the codes.
fn fit_super_block(x: &[f32], nmax: i32, head: &mut [u8]) -> [u8; QK_K] {
    let mut scales = [0.0f32; QK_K / 32];
    let mut mins = [0.0f32; QK_K / 32];
    for (j, sub) in x.chunks_exact(32).enumerate() {
        (scales[j], mins[j]) = make_qkx1_quants(nmax, 5, sub);
    }

    let max_scale = scales.iter().fold(0.0f32, |m, &v| m.max(v));
    let max_min = mins.iter().fold(0.0f32, |m, &v| m.max(v));
    let inv_scale = if max_scale > 0.0 { 63.0 / max_scale } else { 0.0 };
    let inv_min = if max_min > 0.0 { 63.0 / max_min } else { 0.0 };

    let mut packed = [0u8; K_SCALE_SIZE];
    for j in 0..QK_K / 32 {
        let ls = nearest_int(inv_scale * scales[j]).clamp(0, 63) as u8;
        let lm = nearest_int(inv_min * mins[j]).clamp(0, 63) as u8;
        if j < 4 {
            packed[j] = ls;
            packed[j + 4] = lm;
        } else {
            packed[j + 4] = (ls & 0xF) | ((lm & 0xF) << 4);
            packed[j - 4] |= (ls >> 4) << 6;
            packed[j] |= (lm >> 4) << 6;
        }
    }

    let d = f16::from_f32(max_scale / 63.0);
    let dmin = f16::from_f32(max_min / 63.0);
    head[0..2].copy_from_slice(&d.to_le_bytes());
    head[2..4].copy_from_slice(&dmin.to_le_bytes());
    head[4..4 + K_SCALE_SIZE].copy_from_slice(&packed);

    let mut codes = [0u8; QK_K];
    for j in 0..QK_K / 32 {
        let (sc, m) = get_scale_min_k4(j, &packed);
        let d = d.to_f32() * f32::from(sc);
        if d == 0.0 {
            continue;
        }
        let dm = dmin.to_f32() * f32::from(m);
        for ii in 0..32 {
            let l = nearest_int((x[32 * j + ii] + dm) / d);
            codes[32 * j + ii] = l.clamp(0, nmax) as u8;
        }
    }
    codes
}

/// Quantize to `Q4_K`
pub fn quantize_row_q4_k(x: &[f32], y: &mut [u8]) {
    for (xb, yb) in x.chunks_exact(QK_K).zip(y.chunks_exact_mut(Q4_K_BLOCK_BYTES)) {
        let l = fit_super_block(xb, 15, yb);
        let qs = &mut yb[16..];
        for j in (0..QK_K).step_by(64) {
            for i in 0..32 {
                qs[j / 2 + i] = l[j + i] | (l[j + i + 32] << 4);
            }
        }
    }
}

/// Quantize to `Q5_K`
///
/// The fifth bit of element `64 * k + i` (first half) goes to bit `2k` of
/// `qh[i]`; of element `64 * k + 32 + i` to bit `2k + 1`.
pub fn quantize_row_q5_k(x: &[f32], y: &mut [u8]) {
    for (xb, yb) in x.chunks_exact(QK_K).zip(y.chunks_exact_mut(Q5_K_BLOCK_BYTES)) {
        let l = fit_super_block(xb, 31, yb);
        let (qh, qs) = yb[16..].split_at_mut(QK_K / 8);
        qh.fill(0);

        let mut m1 = 1u8;
        let mut m2 = 2u8;
        for n in (0..QK_K).step_by(64) {
            for j in 0..32 {
                let mut l1 = l[n + j];
                if l1 > 15 {
                    l1 -= 16;
                    qh[j] |= m1;
                }
                let mut l2 = l[n + j + 32];
                if l2 > 15 {
                    l2 -= 16;
                    qh[j] |= m2;
                }
                qs[n / 2 + j] = l1 | (l2 << 4);
            }
            m1 <<= 2;
            m2 <<= 2;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantize::dequantize::dequantize_row;
    use crate::registry::GgmlType;

    fn wave(n: usize) -> Vec<f32> {
        (0..n).map(|i| ((i as f32) * 0.37).sin() * 0.5).collect()
    }

    fn rmse(a: &[f32], b: &[f32]) -> f32 {
        let sum: f32 = a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum();
        (sum / a.len() as f32).sqrt()
    }

    #[test]
    fn test_scale_min_packing_low_subblocks() {
        let q = [1, 2, 3, 4, 5, 6, 7, 8, 0, 0, 0, 0];
        assert_eq!(get_scale_min_k4(0, &q), (1, 5));
        assert_eq!(get_scale_min_k4(3, &q), (4, 8));
    }

    #[test]
    fn test_scale_min_packing_high_subblocks() {
        let mut q = [0u8; 12];
        // sub-block 4: scale 0b11_0101 (53), min 0b10_1010 (42)
        q[8] = 0x5 | (0xA << 4);
        q[0] |= 0b11 << 6;
        q[4] |= 0b10 << 6;
        assert_eq!(get_scale_min_k4(4, &q), (53, 42));
    }

    #[test]
    fn test_make_qkx1_constant_block() {
        assert_eq!(make_qkx1_quants(15, 5, &[0.25; 32]), (0.0, 0.0));
    }

    #[test]
    fn test_make_qkx1_min_is_non_negative() {
        let x: Vec<f32> = (0..32).map(|i| i as f32 / 31.0).collect();
        let (scale, min) = make_qkx1_quants(15, 5, &x);
        assert!(scale > 0.0);
        assert!(min >= 0.0);
        // positive-only data: fit anchored at zero
        assert!((scale * 15.0 - 1.0).abs() < 0.1);
    }

    #[test]
    fn test_q4_k_zero_block() {
        let x = [0.0f32; QK_K];
        let mut y = [0xFFu8; Q4_K_BLOCK_BYTES];
        quantize_row_q4_k(&x, &mut y);
        assert!(y.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_q4_k_accuracy() {
        let x = wave(QK_K * 2);
        let mut y = vec![0u8; 2 * Q4_K_BLOCK_BYTES];
        quantize_row_q4_k(&x, &mut y);
        let back = dequantize_row(GgmlType::Q4_K, &y, x.len()).unwrap();
        let err = rmse(&x, &back);
        assert!(err < 0.04, "Q4_K rmse {err}");
    }

    #[test]
    fn test_q5_k_accuracy_beats_q4_k() {
        let x = wave(QK_K);
        let mut y4 = vec![0u8; Q4_K_BLOCK_BYTES];
        let mut y5 = vec![0u8; Q5_K_BLOCK_BYTES];
        quantize_row_q4_k(&x, &mut y4);
        quantize_row_q5_k(&x, &mut y5);
        let e4 = rmse(&x, &dequantize_row(GgmlType::Q4_K, &y4, QK_K).unwrap());
        let e5 = rmse(&x, &dequantize_row(GgmlType::Q5_K, &y5, QK_K).unwrap());
        assert!(e5 < 0.02, "Q5_K rmse {e5}");
        assert!(e5 < e4);
    }
}
