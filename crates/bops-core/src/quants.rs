//! Block quantization codecs.
//!
//! The legacy kinds pack 32 values into one block that starts with an f16
//! scale (and an f16 minimum for the `_1` variants). Element `j` and element
//! `j + 16` share the low and high nibble of byte `j`.
//!
//! The K kinds pack 256 values into a super-block of sub-blocks, each with its
//! own small integer scale relative to the super-block's f16 scale.
//!
//! | dtype | layout                                  | bytes |
//! |-------|-----------------------------------------|-------|
//! | Q4_0  | d, qs[16]                               | 18    |
//! | Q4_1  | d, m, qs[16]                            | 20    |
//! | Q5_0  | d, qh: u32, qs[16]                      | 22    |
//! | Q5_1  | d, m, qh: u32, qs[16]                   | 24    |
//! | Q8_0  | d, qs[32] (i8)                          | 34    |
//! | Q4_K  | d, dmin, scales[12] (6-bit), qs[128]    | 144   |
//! | Q6_K  | ql[128], qh[64], scales[16] (i8), d     | 210   |

use half::f16;

use crate::types::DType;
use crate::{BopsError, Result};

const QK: usize = 32;
const HALF: usize = QK / 2;
const QK_K: usize = 256;

/// Encode `src` as `dtype`. `src.len()` must be a whole number of blocks.
pub fn quantize_chunk(dtype: DType, src: &[f32]) -> Result<Vec<u8>> {
    let blck = dtype.block_size();
    if src.len() % blck != 0 {
        return Err(BopsError::PartialBlock {
            dtype,
            n: src.len(),
            block: blck,
        });
    }
    let mut out = Vec::with_capacity(src.len() / blck * dtype.type_size());
    match dtype {
        DType::F32 => src.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
        DType::F16 => src
            .iter()
            .for_each(|&x| out.extend_from_slice(&f16::from_f32(x).to_le_bytes())),
        DType::Q4_0 => src.chunks_exact(QK).for_each(|b| quantize_q4_0(b, &mut out)),
        DType::Q4_1 => src.chunks_exact(QK).for_each(|b| quantize_q4_1(b, &mut out)),
        DType::Q5_0 => src.chunks_exact(QK).for_each(|b| quantize_q5_0(b, &mut out)),
        DType::Q5_1 => src.chunks_exact(QK).for_each(|b| quantize_q5_1(b, &mut out)),
        DType::Q8_0 => src.chunks_exact(QK).for_each(|b| quantize_q8_0(b, &mut out)),
        DType::Q4_K => src.chunks_exact(QK_K).for_each(|b| quantize_q4_k(b, &mut out)),
        DType::Q6_K => src.chunks_exact(QK_K).for_each(|b| quantize_q6_k(b, &mut out)),
        DType::I32 => {
            return Err(BopsError::UnsupportedDType {
                dtype,
                context: "quantize_chunk",
            });
        }
    }
    Ok(out)
}

/// Decode whole blocks from `src` into `dst`.
pub fn dequantize_row(dtype: DType, src: &[u8], dst: &mut [f32]) -> Result<()> {
    let blck = dtype.block_size();
    let ts = dtype.type_size();
    if dst.len() % blck != 0 {
        return Err(BopsError::PartialBlock {
            dtype,
            n: dst.len(),
            block: blck,
        });
    }
    let need = dst.len() / blck * ts;
    if src.len() < need {
        return Err(BopsError::OutOfBounds {
            offset: 0,
            len: need,
            size: src.len(),
        });
    }
    let blocks = src[..need].chunks_exact(ts).zip(dst.chunks_exact_mut(blck));
    match dtype {
        DType::F32 => blocks.for_each(|(b, y)| y[0] = f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
        DType::F16 => blocks.for_each(|(b, y)| y[0] = f16::from_le_bytes([b[0], b[1]]).to_f32()),
        DType::Q4_0 => blocks.for_each(|(b, y)| dequantize_q4_0(b, y)),
        DType::Q4_1 => blocks.for_each(|(b, y)| dequantize_q4_1(b, y)),
        DType::Q5_0 => blocks.for_each(|(b, y)| dequantize_q5_0(b, y)),
        DType::Q5_1 => blocks.for_each(|(b, y)| dequantize_q5_1(b, y)),
        DType::Q8_0 => blocks.for_each(|(b, y)| dequantize_q8_0(b, y)),
        DType::Q4_K => blocks.for_each(|(b, y)| dequantize_q4_k(b, y)),
        DType::Q6_K => blocks.for_each(|(b, y)| dequantize_q6_k(b, y)),
        DType::I32 => {
            return Err(BopsError::UnsupportedDType {
                dtype,
                context: "dequantize_row",
            });
        }
    }
    Ok(())
}

/// Largest absolute error a round trip through `dtype` may introduce for any
/// element of `block` (one whole block of source values).
///
/// One quantization step covers the rounding and the clamp at the top code;
/// the extra term covers storing the scale and minimum as f16.
pub fn max_block_error(dtype: DType, block: &[f32]) -> f32 {
    let amax = block.iter().fold(0.0f32, |m, x| m.max(x.abs()));
    let (min, max) = min_max(block);
    let step = match dtype {
        DType::F32 | DType::I32 => return 0.0,
        DType::F16 => return amax / 1024.0 + 1e-7,
        DType::Q4_0 => amax / 8.0,
        DType::Q4_1 => (max - min) / 15.0,
        DType::Q5_0 => amax / 16.0,
        DType::Q5_1 => (max - min) / 31.0,
        DType::Q8_0 => amax / 127.0,
        // Sub-block ranges include zero, and the 6-bit minimum may overshoot
        // by one step before the top code clamps.
        DType::Q4_K => amax / 10.0,
        DType::Q6_K => amax / 31.0,
    };
    step + amax / 512.0 + 1e-6
}

fn min_max(x: &[f32]) -> (f32, f32) {
    x.iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
}

/// Signed value with the largest magnitude.
fn signed_absmax(x: &[f32]) -> f32 {
    let mut amax = 0.0f32;
    let mut max = 0.0f32;
    for &v in x {
        if v.abs() > amax {
            amax = v.abs();
            max = v;
        }
    }
    max
}

fn max_of(x: &[f32]) -> f32 {
    x.iter().fold(0.0f32, |m, &v| m.max(v))
}

fn inv(d: f32) -> f32 {
    if d != 0.0 { 1.0 / d } else { 0.0 }
}

fn read_f16(b: &[u8], at: usize) -> f32 {
    f16::from_le_bytes([b[at], b[at + 1]]).to_f32()
}

// ── Q4_0 ────────────────────────────────────────────────────────────────

fn quantize_q4_0(x: &[f32], out: &mut Vec<u8>) {
    let d = signed_absmax(x) / -8.0;
    let id = inv(d);
    out.extend_from_slice(&f16::from_f32(d).to_le_bytes());
    for j in 0..HALF {
        let xi0 = ((x[j] * id + 8.5) as i8).min(15) as u8;
        let xi1 = ((x[j + HALF] * id + 8.5) as i8).min(15) as u8;
        out.push(xi0 | (xi1 << 4));
    }
}

fn dequantize_q4_0(b: &[u8], y: &mut [f32]) {
    let d = read_f16(b, 0);
    let qs = &b[2..2 + HALF];
    for j in 0..HALF {
        y[j] = ((qs[j] & 0x0F) as i32 - 8) as f32 * d;
        y[j + HALF] = ((qs[j] >> 4) as i32 - 8) as f32 * d;
    }
}

// ── Q4_1 ────────────────────────────────────────────────────────────────

fn quantize_q4_1(x: &[f32], out: &mut Vec<u8>) {
    let (min, max) = min_max(x);
    let d = (max - min) / 15.0;
    let id = inv(d);
    out.extend_from_slice(&f16::from_f32(d).to_le_bytes());
    out.extend_from_slice(&f16::from_f32(min).to_le_bytes());
    for j in 0..HALF {
        let xi0 = (((x[j] - min) * id + 0.5) as i8).min(15) as u8;
        let xi1 = (((x[j + HALF] - min) * id + 0.5) as i8).min(15) as u8;
        out.push(xi0 | (xi1 << 4));
    }
}

fn dequantize_q4_1(b: &[u8], y: &mut [f32]) {
    let d = read_f16(b, 0);
    let m = read_f16(b, 2);
    let qs = &b[4..4 + HALF];
    for j in 0..HALF {
        y[j] = (qs[j] & 0x0F) as f32 * d + m;
        y[j + HALF] = (qs[j] >> 4) as f32 * d + m;
    }
}

// ── Q5_0 ────────────────────────────────────────────────────────────────

fn quantize_q5_0(x: &[f32], out: &mut Vec<u8>) {
    let d = signed_absmax(x) / -16.0;
    let id = inv(d);
    let mut qh = 0u32;
    let mut qs = [0u8; HALF];
    for j in 0..HALF {
        let xi0 = ((x[j] * id + 16.5) as i8).min(31) as u8;
        let xi1 = ((x[j + HALF] * id + 16.5) as i8).min(31) as u8;
        qs[j] = (xi0 & 0x0F) | ((xi1 & 0x0F) << 4);
        qh |= (((xi0 & 0x10) >> 4) as u32) << j;
        qh |= (((xi1 & 0x10) >> 4) as u32) << (j + HALF);
    }
    out.extend_from_slice(&f16::from_f32(d).to_le_bytes());
    out.extend_from_slice(&qh.to_le_bytes());
    out.extend_from_slice(&qs);
}

fn dequantize_q5_0(b: &[u8], y: &mut [f32]) {
    let d = read_f16(b, 0);
    let qh = u32::from_le_bytes([b[2], b[3], b[4], b[5]]);
    let qs = &b[6..6 + HALF];
    for j in 0..HALF {
        let xh0 = (((qh >> j) << 4) & 0x10) as u8;
        let xh1 = ((qh >> (j + 12)) & 0x10) as u8;
        y[j] = (((qs[j] & 0x0F) | xh0) as i32 - 16) as f32 * d;
        y[j + HALF] = (((qs[j] >> 4) | xh1) as i32 - 16) as f32 * d;
    }
}

// ── Q5_1 ────────────────────────────────────────────────────────────────

fn quantize_q5_1(x: &[f32], out: &mut Vec<u8>) {
    let (min, max) = min_max(x);
    let d = (max - min) / 31.0;
    let id = inv(d);
    let mut qh = 0u32;
    let mut qs = [0u8; HALF];
    for j in 0..HALF {
        let xi0 = (((x[j] - min) * id + 0.5) as u8).min(31);
        let xi1 = (((x[j + HALF] - min) * id + 0.5) as u8).min(31);
        qs[j] = (xi0 & 0x0F) | ((xi1 & 0x0F) << 4);
        qh |= (((xi0 & 0x10) >> 4) as u32) << j;
        qh |= (((xi1 & 0x10) >> 4) as u32) << (j + HALF);
    }
    out.extend_from_slice(&f16::from_f32(d).to_le_bytes());
    out.extend_from_slice(&f16::from_f32(min).to_le_bytes());
    out.extend_from_slice(&qh.to_le_bytes());
    out.extend_from_slice(&qs);
}

fn dequantize_q5_1(b: &[u8], y: &mut [f32]) {
    let d = read_f16(b, 0);
    let m = read_f16(b, 2);
    let qh = u32::from_le_bytes([b[4], b[5], b[6], b[7]]);
    let qs = &b[8..8 + HALF];
    for j in 0..HALF {
        let xh0 = (((qh >> j) << 4) & 0x10) as u8;
        let xh1 = ((qh >> (j + 12)) & 0x10) as u8;
        y[j] = ((qs[j] & 0x0F) | xh0) as f32 * d + m;
        y[j + HALF] = ((qs[j] >> 4) | xh1) as f32 * d + m;
    }
}

// ── Q8_0 ────────────────────────────────────────────────────────────────

fn quantize_q8_0(x: &[f32], out: &mut Vec<u8>) {
    let amax = x.iter().fold(0.0f32, |m, v| m.max(v.abs()));
    let d = amax / 127.0;
    let id = inv(d);
    out.extend_from_slice(&f16::from_f32(d).to_le_bytes());
    out.extend(x.iter().map(|&v| (v * id).round() as i8 as u8));
}

fn dequantize_q8_0(b: &[u8], y: &mut [f32]) {
    let d = read_f16(b, 0);
    for (dst, &q) in y.iter_mut().zip(&b[2..2 + QK]) {
        *dst = q as i8 as f32 * d;
    }
}

// ── Q4_K ────────────────────────────────────────────────────────────────
//
// Eight sub-blocks of 32. Each sub-block decodes as `d * sc * q - dmin * m`
// with 6-bit `sc` and `m` packed into 12 bytes: the first four pairs take the
// low 6 bits of bytes 0..8, the last four split into nibbles in bytes 8..12
// plus the spare top bits of bytes 0..8.

const Q4K_SUB: usize = 32;

fn quantize_q4_k(x: &[f32], out: &mut Vec<u8>) {
    let mut scales = [0.0f32; 8];
    let mut mins = [0.0f32; 8];
    for (j, sub) in x.chunks_exact(Q4K_SUB).enumerate() {
        let (min, max) = min_max(sub);
        let min = min.min(0.0);
        scales[j] = (max - min) / 15.0;
        mins[j] = -min;
    }
    let d = f16::from_f32(max_of(&scales) / 63.0);
    let dmin = f16::from_f32(max_of(&mins) / 63.0);
    let (df, dminf) = (d.to_f32(), dmin.to_f32());

    let mut ls = [0u8; 8];
    let mut lm = [0u8; 8];
    for j in 0..8 {
        ls[j] = (scales[j] * inv(df)).ceil().min(63.0) as u8;
        lm[j] = (mins[j] * inv(dminf)).ceil().min(63.0) as u8;
    }

    let mut packed = [0u8; 12];
    for j in 0..8 {
        if j < 4 {
            packed[j] = ls[j];
            packed[j + 4] = lm[j];
        } else {
            packed[j + 4] = (ls[j] & 0x0F) | ((lm[j] & 0x0F) << 4);
            packed[j - 4] |= (ls[j] >> 4) << 6;
            packed[j] |= (lm[j] >> 4) << 6;
        }
    }

    let mut levels = [0u8; QK_K];
    for (j, sub) in x.chunks_exact(Q4K_SUB).enumerate() {
        let scale = df * ls[j] as f32;
        let min = dminf * lm[j] as f32;
        let iscale = inv(scale);
        for (l, &v) in sub.iter().enumerate() {
            levels[j * Q4K_SUB + l] = ((v + min) * iscale).round().clamp(0.0, 15.0) as u8;
        }
    }

    out.extend_from_slice(&d.to_le_bytes());
    out.extend_from_slice(&dmin.to_le_bytes());
    out.extend_from_slice(&packed);
    for chunk in levels.chunks_exact(2 * Q4K_SUB) {
        let (lo, hi) = chunk.split_at(Q4K_SUB);
        out.extend(lo.iter().zip(hi).map(|(&a, &b)| a | (b << 4)));
    }
}

/// Unpack the 6-bit scale and minimum of sub-block `j`.
fn scale_min_k4(j: usize, q: &[u8]) -> (u8, u8) {
    if j < 4 {
        (q[j] & 63, q[j + 4] & 63)
    } else {
        (
            (q[j + 4] & 0x0F) | ((q[j - 4] >> 6) << 4),
            (q[j + 4] >> 4) | ((q[j] >> 6) << 4),
        )
    }
}

fn dequantize_q4_k(b: &[u8], y: &mut [f32]) {
    let d = read_f16(b, 0);
    let dmin = read_f16(b, 2);
    let packed = &b[4..16];
    let qs = &b[16..16 + QK_K / 2];
    for (c, (q, out)) in qs
        .chunks_exact(Q4K_SUB)
        .zip(y.chunks_exact_mut(2 * Q4K_SUB))
        .enumerate()
    {
        let (sc1, m1) = scale_min_k4(2 * c, packed);
        let (sc2, m2) = scale_min_k4(2 * c + 1, packed);
        let (d1, min1) = (d * sc1 as f32, dmin * m1 as f32);
        let (d2, min2) = (d * sc2 as f32, dmin * m2 as f32);
        for l in 0..Q4K_SUB {
            out[l] = d1 * (q[l] & 0x0F) as f32 - min1;
            out[l + Q4K_SUB] = d2 * (q[l] >> 4) as f32 - min2;
        }
    }
}

// ── Q6_K ────────────────────────────────────────────────────────────────
//
// Sixteen sub-blocks of 16 with signed 8-bit scales. Codes are 6 bits: the
// low nibble lives in `ql`, the top two bits in `qh`, both interleaved over
// 128-element halves.

const Q6K_SUB: usize = 16;

fn quantize_q6_k(x: &[f32], out: &mut Vec<u8>) {
    let mut scales = [0.0f32; QK_K / Q6K_SUB];
    for (j, sub) in x.chunks_exact(Q6K_SUB).enumerate() {
        scales[j] = sub.iter().fold(0.0f32, |m, v| m.max(v.abs())) / 31.0;
    }
    let d = f16::from_f32(max_of(&scales) / 127.0);
    let df = d.to_f32();

    let mut sc = [0i8; QK_K / Q6K_SUB];
    let mut levels = [0u8; QK_K];
    for (j, sub) in x.chunks_exact(Q6K_SUB).enumerate() {
        sc[j] = (scales[j] * inv(df)).ceil().min(127.0) as i8;
        let iscale = inv(df * sc[j] as f32);
        for (l, &v) in sub.iter().enumerate() {
            levels[j * Q6K_SUB + l] = ((v * iscale).round().clamp(-32.0, 31.0) as i32 + 32) as u8;
        }
    }

    let mut ql = [0u8; QK_K / 2];
    let mut qh = [0u8; QK_K / 4];
    for n in 0..2 {
        let (l0, qlo, qho) = (128 * n, 64 * n, 32 * n);
        for l in 0..32 {
            let q1 = levels[l0 + l];
            let q2 = levels[l0 + l + 32];
            let q3 = levels[l0 + l + 64];
            let q4 = levels[l0 + l + 96];
            ql[qlo + l] = (q1 & 0x0F) | ((q3 & 0x0F) << 4);
            ql[qlo + l + 32] = (q2 & 0x0F) | ((q4 & 0x0F) << 4);
            qh[qho + l] = (q1 >> 4) | ((q2 >> 4) << 2) | ((q3 >> 4) << 4) | ((q4 >> 4) << 6);
        }
    }

    out.extend_from_slice(&ql);
    out.extend_from_slice(&qh);
    out.extend(sc.iter().map(|&s| s as u8));
    out.extend_from_slice(&d.to_le_bytes());
}

fn dequantize_q6_k(b: &[u8], y: &mut [f32]) {
    let ql = &b[0..128];
    let qh = &b[128..192];
    let sc = &b[192..208];
    let d = read_f16(b, 208);
    let mut put = |i: usize, q: u8| {
        y[i] = d * (sc[i / Q6K_SUB] as i8) as f32 * (q as i32 - 32) as f32;
    };
    for n in 0..2 {
        let (l0, qlo, qho) = (128 * n, 64 * n, 32 * n);
        for l in 0..32 {
            let (lo, hi, h) = (ql[qlo + l], ql[qlo + l + 32], qh[qho + l]);
            put(l0 + l, (lo & 0x0F) | ((h & 3) << 4));
            put(l0 + l + 32, (hi & 0x0F) | (((h >> 2) & 3) << 4));
            put(l0 + l + 64, (lo >> 4) | (((h >> 4) & 3) << 4));
            put(l0 + l + 96, (hi >> 4) | (((h >> 6) & 3) << 4));
        }
    }
}
