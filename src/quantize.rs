//! Dequantization for GGML block-quantized weights
//!
//! Implements the formats a Q4_K_M LLaMA file actually contains:
//! - `F16`: 16-bit IEEE 754 half-precision
//! - `Q4_K`: 4-bit K-quantization (super-block size 256)
//! - `Q6_K`: 6-bit K-quantization (super-block size 256)
//!
//! ## `Q4_K` Format
//!
//! `Q4_K` uses super-blocks of 256 values divided into 8 blocks of 32:
//! - 1 half-precision super-block scale (`d`)
//! - 1 half-precision super-block min (`dmin`)
//! - 12 bytes of packed 6-bit block scales and mins
//! - 128 bytes of 4-bit quantized values
//! - Dequantization: `value = d * scale * q - dmin * min`
//!
//! ## `Q6_K` Format
//!
//! `Q6_K` uses super-blocks of 256 values divided into 16 blocks of 16:
//! - 128 bytes of low 4 bits (2 values per byte)
//! - 64 bytes of high 2 bits (4 values per byte)
//! - 16 bytes of signed 8-bit block scales
//! - 1 half-precision super-block scale (`d`)
//! - Dequantization: `value = d * scale * (q - 32)`
//!
//! Bit layouts follow llama.cpp's `block_q4_K` / `block_q6_K` exactly; the
//! tests pin the layouts with hand-crafted blocks.

use once_cell::sync::Lazy;

use crate::error::{InferirError, Result};

/// Super-block size for K-quantization formats
pub const QK_K: usize = 256;

/// Bytes per `Q4_K` super-block: 2 + 2 + 12 + 128
pub const Q4_K_BLOCK_BYTES: usize = 144;

/// Bytes per `Q6_K` super-block: 128 + 64 + 16 + 2
pub const Q6_K_BLOCK_BYTES: usize = 210;

/// Decode an IEEE 754 half-precision value to f32, bit-exactly
///
/// Subnormals are renormalized by shifting the mantissa up to the implicit
/// bit position; exponent 31 maps to infinity or NaN with the mantissa
/// carried into the high bits of the f32 mantissa.
#[must_use]
pub fn fp16_to_f32(h: u16) -> f32 {
    let sign = u32::from(h & 0x8000) << 16;
    let mut exp = u32::from(h & 0x7C00) >> 10;
    let mut mant = u32::from(h & 0x03FF);

    let bits = if exp == 0 {
        if mant == 0 {
            sign
        } else {
            // Subnormal: shift the mantissa until its leading bit reaches
            // the implicit-one position, adjusting the exponent to match.
            exp = 127 - 15 + 1;
            while mant & 0x0400 == 0 {
                mant <<= 1;
                exp -= 1;
            }
            mant &= 0x03FF;
            sign | (exp << 23) | (mant << 13)
        }
    } else if exp == 31 {
        sign | 0x7F80_0000 | (mant << 13)
    } else {
        sign | ((exp + (127 - 15)) << 23) | (mant << 13)
    };
    f32::from_bits(bits)
}

/// Pre-computed f16 to f32 lookup table (65536 entries = 256KB)
///
/// Eliminates per-block decode overhead in the dequantization inner loops.
static F16_TO_F32_LUT: Lazy<Box<[f32; 65536]>> = Lazy::new(|| {
    let mut lut = Box::new([0.0f32; 65536]);
    for i in 0..65536u32 {
        #[allow(clippy::cast_possible_truncation)]
        {
            lut[i as usize] = fp16_to_f32(i as u16);
        }
    }
    lut
});

/// LUT-backed f16 decode for hot paths
#[inline]
#[must_use]
pub fn f16(bits: u16) -> f32 {
    F16_TO_F32_LUT[bits as usize]
}

/// Read an f16 scale from two little-endian bytes
#[inline]
fn read_f16(bytes: &[u8]) -> f32 {
    f16(u16::from_le_bytes([bytes[0], bytes[1]]))
}

/// Extract the 6-bit scale and min for sub-block `j` of a K-quant block
///
/// The 12 scale bytes pack eight (scale, min) pairs: the first four pairs
/// live in the low 6 bits of bytes 0-7, the last four splice their low 4
/// bits from bytes 8-11 with the high 2 bits of bytes 0-7.
#[inline]
fn get_scale_min_k4(j: usize, scales: &[u8; 12]) -> (u8, u8) {
    if j < 4 {
        (scales[j] & 63, scales[j + 4] & 63)
    } else {
        let sc = (scales[j + 4] & 0x0F) | ((scales[j - 4] >> 6) << 4);
        let m = (scales[j + 4] >> 4) | ((scales[j] >> 6) << 4);
        (sc, m)
    }
}

/// Dequantize `F16` data into a pre-sized output slice
///
/// # Errors
///
/// Returns `InvalidShape` if the byte length is odd or does not match
/// `out.len() * 2`.
pub fn dequantize_f16_into(data: &[u8], out: &mut [f32]) -> Result<()> {
    if data.len() % 2 != 0 || data.len() / 2 != out.len() {
        return Err(InferirError::InvalidShape {
            reason: format!(
                "F16 data length {} does not match {} output elements",
                data.len(),
                out.len()
            ),
        });
    }
    for (dst, chunk) in out.iter_mut().zip(data.chunks_exact(2)) {
        *dst = f16(u16::from_le_bytes([chunk[0], chunk[1]]));
    }
    Ok(())
}

/// Dequantize `F16` data to a fresh vector
///
/// # Errors
///
/// Returns `InvalidShape` if the byte length is odd.
pub fn dequantize_f16(data: &[u8]) -> Result<Vec<f32>> {
    if data.len() % 2 != 0 {
        return Err(InferirError::InvalidShape {
            reason: format!("F16 data length {} is not a multiple of 2", data.len()),
        });
    }
    let mut out = vec![0.0f32; data.len() / 2];
    dequantize_f16_into(data, &mut out)?;
    Ok(out)
}

/// Dequantize `Q4_K` super-blocks into a pre-sized output slice
///
/// Each 144-byte super-block yields 256 values: per 64-value group, 32 low
/// nibbles then 32 high nibbles of the same 32 source bytes.
///
/// # Errors
///
/// Returns `InvalidShape` if the byte length is not a whole number of
/// super-blocks or the output length does not match.
pub fn dequantize_q4_k_into(data: &[u8], out: &mut [f32]) -> Result<()> {
    if data.len() % Q4_K_BLOCK_BYTES != 0 {
        return Err(InferirError::InvalidShape {
            reason: format!(
                "Q4_K data length {} is not a multiple of super-block size {Q4_K_BLOCK_BYTES}",
                data.len()
            ),
        });
    }
    let n_blocks = data.len() / Q4_K_BLOCK_BYTES;
    if out.len() != n_blocks * QK_K {
        return Err(InferirError::InvalidShape {
            reason: format!(
                "Q4_K output length {} does not match {} super-blocks",
                out.len(),
                n_blocks
            ),
        });
    }

    for (block, y) in data
        .chunks_exact(Q4_K_BLOCK_BYTES)
        .zip(out.chunks_exact_mut(QK_K))
    {
        let d = read_f16(&block[0..2]);
        let dmin = read_f16(&block[2..4]);
        let mut scales = [0u8; 12];
        scales.copy_from_slice(&block[4..16]);
        let qs = &block[16..144];

        let mut idx = 0;
        for j in (0..QK_K).step_by(64) {
            let q = &qs[j / 2..j / 2 + 32];
            let is = j / 32;

            let (sc, m) = get_scale_min_k4(is, &scales);
            let d1 = d * f32::from(sc);
            let m1 = dmin * f32::from(m);
            let (sc, m) = get_scale_min_k4(is + 1, &scales);
            let d2 = d * f32::from(sc);
            let m2 = dmin * f32::from(m);

            for &byte in q {
                y[idx] = d1 * f32::from(byte & 0x0F) - m1;
                idx += 1;
            }
            for &byte in q {
                y[idx] = d2 * f32::from(byte >> 4) - m2;
                idx += 1;
            }
        }
    }
    Ok(())
}

/// Dequantize `Q4_K` super-blocks to a fresh vector
///
/// # Errors
///
/// Returns `InvalidShape` if the byte length is not a whole number of
/// 144-byte super-blocks.
pub fn dequantize_q4_k(data: &[u8]) -> Result<Vec<f32>> {
    if data.len() % Q4_K_BLOCK_BYTES != 0 {
        return Err(InferirError::InvalidShape {
            reason: format!(
                "Q4_K data length {} is not a multiple of super-block size {Q4_K_BLOCK_BYTES}",
                data.len()
            ),
        });
    }
    let mut out = vec![0.0f32; data.len() / Q4_K_BLOCK_BYTES * QK_K];
    dequantize_q4_k_into(data, &mut out)?;
    Ok(out)
}

/// Dequantize `Q6_K` super-blocks into a pre-sized output slice
///
/// Each 210-byte super-block yields 256 values, processed as two 128-value
/// halves; every inner iteration emits four outputs at `l`, `l+32`, `l+64`,
/// `l+96` using scales `is`, `is+2`, `is+4`, `is+6`.
///
/// # Errors
///
/// Returns `InvalidShape` if the byte length is not a whole number of
/// super-blocks or the output length does not match.
#[allow(clippy::cast_possible_wrap)]
pub fn dequantize_q6_k_into(data: &[u8], out: &mut [f32]) -> Result<()> {
    if data.len() % Q6_K_BLOCK_BYTES != 0 {
        return Err(InferirError::InvalidShape {
            reason: format!(
                "Q6_K data length {} is not a multiple of super-block size {Q6_K_BLOCK_BYTES}",
                data.len()
            ),
        });
    }
    let n_blocks = data.len() / Q6_K_BLOCK_BYTES;
    if out.len() != n_blocks * QK_K {
        return Err(InferirError::InvalidShape {
            reason: format!(
                "Q6_K output length {} does not match {} super-blocks",
                out.len(),
                n_blocks
            ),
        });
    }

    for (block, y) in data
        .chunks_exact(Q6_K_BLOCK_BYTES)
        .zip(out.chunks_exact_mut(QK_K))
    {
        let ql = &block[0..128];
        let qh = &block[128..192];
        let scales = &block[192..208];
        let d = read_f16(&block[208..210]);

        for n in (0..QK_K).step_by(128) {
            let half = n / 128;
            let ql = &ql[64 * half..];
            let qh = &qh[32 * half..];
            let sc = &scales[8 * half..];

            for l in 0..32 {
                let is = l / 16;
                let q1 = i32::from((ql[l] & 0x0F) | (((qh[l]) & 3) << 4)) - 32;
                let q2 = i32::from((ql[l + 32] & 0x0F) | (((qh[l] >> 2) & 3) << 4)) - 32;
                let q3 = i32::from((ql[l] >> 4) | (((qh[l] >> 4) & 3) << 4)) - 32;
                let q4 = i32::from((ql[l + 32] >> 4) | (((qh[l] >> 6) & 3) << 4)) - 32;

                #[allow(clippy::cast_precision_loss)]
                {
                    y[n + l] = d * f32::from(sc[is] as i8) * q1 as f32;
                    y[n + l + 32] = d * f32::from(sc[is + 2] as i8) * q2 as f32;
                    y[n + l + 64] = d * f32::from(sc[is + 4] as i8) * q3 as f32;
                    y[n + l + 96] = d * f32::from(sc[is + 6] as i8) * q4 as f32;
                }
            }
        }
    }
    Ok(())
}

/// Dequantize `Q6_K` super-blocks to a fresh vector
///
/// # Errors
///
/// Returns `InvalidShape` if the byte length is not a whole number of
/// 210-byte super-blocks.
pub fn dequantize_q6_k(data: &[u8]) -> Result<Vec<f32>> {
    if data.len() % Q6_K_BLOCK_BYTES != 0 {
        return Err(InferirError::InvalidShape {
            reason: format!(
                "Q6_K data length {} is not a multiple of super-block size {Q6_K_BLOCK_BYTES}",
                data.len()
            ),
        });
    }
    let mut out = vec![0.0f32; data.len() / Q6_K_BLOCK_BYTES * QK_K];
    dequantize_q6_k_into(data, &mut out)?;
    Ok(out)
}
