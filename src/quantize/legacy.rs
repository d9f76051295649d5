//! 32-element block quantizers (`Q4_0`, `Q4_1`, `Q5_0`, `Q5_1`, `Q8_0`)
//!
//! Bit-exact ports of the GGML reference row quantizers. Every function
//! takes a whole number of blocks in `x` and writes exactly
//! `x.len() / 32 * BLOCK_BYTES` bytes into `y`; the caller in
//! [`super::quantize_rows`] checks both lengths.

use half::f16;

/// Elements per block for every format in this module
pub const QK: usize = 32;

/// Bytes per `Q4_0` block: f16 d + 16 nibble bytes
pub const Q4_0_BLOCK_BYTES: usize = 18;
/// Bytes per `Q4_1` block: f16 d + f16 m + 16 nibble bytes
pub const Q4_1_BLOCK_BYTES: usize = 20;
/// Bytes per `Q5_0` block: f16 d + u32 high bits + 16 nibble bytes
pub const Q5_0_BLOCK_BYTES: usize = 22;
/// Bytes per `Q5_1` block: f16 d + f16 m + u32 high bits + 16 nibble bytes
pub const Q5_1_BLOCK_BYTES: usize = 24;
/// Bytes per `Q8_0` block: f16 d + 32 signed bytes
pub const Q8_0_BLOCK_BYTES: usize = 34;

/// Value with the largest magnitude, sign preserved
fn signed_absmax(x: &[f32]) -> f32 {
    let mut amax = 0.0f32;
    let mut max = 0.0f32;
    for &v in x {
        if amax < v.abs() {
            amax = v.abs();
            max = v;
        }
    }
    max
}

fn min_max(x: &[f32]) -> (f32, f32) {
    x.iter()
        .fold((f32::MAX, f32::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)))
}

fn inverse(d: f32) -> f32 {
    if d == 0.0 {
        0.0
    } else {
        1.0 / d
    }
}

/// Quantize to `Q4_0`: `x ≈ d * (q - 8)`, `q` in 0..=15
pub fn quantize_row_q4_0(x: &[f32], y: &mut [u8]) {
    for (xb, yb) in x.chunks_exact(QK).zip(y.chunks_exact_mut(Q4_0_BLOCK_BYTES)) {
        let d = signed_absmax(xb) / -8.0;
        let id = inverse(d);

        yb[0..2].copy_from_slice(&f16::from_f32(d).to_le_bytes());
        for j in 0..QK / 2 {
            let xi0 = ((xb[j] * id + 8.5) as i8).min(15) as u8;
            let xi1 = ((xb[QK / 2 + j] * id + 8.5) as i8).min(15) as u8;
            yb[2 + j] = xi0 | (xi1 << 4);
        }
    }
}

/// Quantize to `Q4_1`: `x ≈ d * q + m`, `q` in 0..=15
pub fn quantize_row_q4_1(x: &[f32], y: &mut [u8]) {
    for (xb, yb) in x.chunks_exact(QK).zip(y.chunks_exact_mut(Q4_1_BLOCK_BYTES)) {
        let (min, max) = min_max(xb);
        let d = (max - min) / 15.0;
        let id = inverse(d);

        yb[0..2].copy_from_slice(&f16::from_f32(d).to_le_bytes());
        yb[2..4].copy_from_slice(&f16::from_f32(min).to_le_bytes());
        for j in 0..QK / 2 {
            let xi0 = (((xb[j] - min) * id + 0.5) as i8).min(15) as u8;
            let xi1 = (((xb[QK / 2 + j] - min) * id + 0.5) as i8).min(15) as u8;
            yb[4 + j] = xi0 | (xi1 << 4);
        }
    }
}

/// Quantize to `Q5_0`: `x ≈ d * (q - 16)`, `q` in 0..=31
///
/// Bit 4 of element `j` lands in bit `j` of the little-endian `qh` word.
pub fn quantize_row_q5_0(x: &[f32], y: &mut [u8]) {
    for (xb, yb) in x.chunks_exact(QK).zip(y.chunks_exact_mut(Q5_0_BLOCK_BYTES)) {
        let d = signed_absmax(xb) / -16.0;
        let id = inverse(d);

        let mut qh = 0u32;
        yb[0..2].copy_from_slice(&f16::from_f32(d).to_le_bytes());
        for j in 0..QK / 2 {
            let xi0 = ((xb[j] * id + 16.5) as i8).min(31) as u8;
            let xi1 = ((xb[QK / 2 + j] * id + 16.5) as i8).min(31) as u8;
            yb[6 + j] = (xi0 & 0x0F) | ((xi1 & 0x0F) << 4);
            qh |= u32::from((xi0 & 0x10) >> 4) << j;
            qh |= u32::from((xi1 & 0x10) >> 4) << (j + QK / 2);
        }
        yb[2..6].copy_from_slice(&qh.to_le_bytes());
    }
}

/// Quantize to `Q5_1`: `x ≈ d * q + m`, `q` in 0..=31
pub fn quantize_row_q5_1(x: &[f32], y: &mut [u8]) {
    for (xb, yb) in x.chunks_exact(QK).zip(y.chunks_exact_mut(Q5_1_BLOCK_BYTES)) {
        let (min, max) = min_max(xb);
        let d = (max - min) / 31.0;
        let id = inverse(d);

        let mut qh = 0u32;
        yb[0..2].copy_from_slice(&f16::from_f32(d).to_le_bytes());
        yb[2..4].copy_from_slice(&f16::from_f32(min).to_le_bytes());
        for j in 0..QK / 2 {
            let xi0 = (((xb[j] - min) * id + 0.5) as u8).min(31);
            let xi1 = (((xb[QK / 2 + j] - min) * id + 0.5) as u8).min(31);
            yb[8 + j] = (xi0 & 0x0F) | ((xi1 & 0x0F) << 4);
            qh |= u32::from((xi0 & 0x10) >> 4) << j;
            qh |= u32::from((xi1 & 0x10) >> 4) << (j + QK / 2);
        }
        yb[4..8].copy_from_slice(&qh.to_le_bytes());
    }
}

/// Quantize to `Q8_0`: `x ≈ d * q`, `q` in -127..=127
pub fn quantize_row_q8_0(x: &[f32], y: &mut [u8]) {
    for (xb, yb) in x.chunks_exact(QK).zip(y.chunks_exact_mut(Q8_0_BLOCK_BYTES)) {
        let amax = xb.iter().fold(0.0f32, |m, v| m.max(v.abs()));
        let d = amax / 127.0;
        let id = inverse(d);

        yb[0..2].copy_from_slice(&f16::from_f32(d).to_le_bytes());
        for (q, &v) in yb[2..].iter_mut().zip(xb) {
            *q = (v * id).round() as i8 as u8;
        }
    }
}
