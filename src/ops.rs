//! Pure mathematical operations for the layer engine
//!
//! Standalone kernels shared by the block step engine and the CLI tools:
//!
//! - `rms_norm_into`: RMSNorm normalization (LLaMA, Qwen, Mistral)
//! - `silu`: SiLU/Swish activation used by the SwiGLU FFN
//! - `softmax_inplace`: numerically stable softmax
//! - `matvec_col_major`: column-contiguous matrix-vector product
//! - `dot`, `add_inplace`, `argmax`
//! - [`RopeCache`]: rotary position embedding with precomputed frequencies
//!
//! Dot products and reductions accumulate in f64; at `d_model` in the
//! thousands, f32 accumulation loses enough precision to show up in the
//! block output.

use crate::error::{InferirError, Result};

/// Dot product with f64 accumulation
#[must_use]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    let mut sum = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        sum += f64::from(x) * f64::from(y);
    }
    #[allow(clippy::cast_possible_truncation)]
    {
        sum as f32
    }
}

/// RMSNorm into a pre-allocated buffer
///
/// `out[i] = x[i] * weight[i] / sqrt(mean(x^2) + eps)`, mean square in f64.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn rms_norm_into(x: &[f32], weight: &[f32], eps: f32, out: &mut [f32]) {
    let n = x.len();
    let mut sum_sq = 0.0f64;
    for &v in x {
        sum_sq += f64::from(v) * f64::from(v);
    }
    let mean_sq = sum_sq / n as f64;
    let inv_rms = 1.0 / (mean_sq as f32 + eps).sqrt();

    for i in 0..n {
        out[i] = x[i] * inv_rms * weight[i];
    }
}

/// Numerically stable softmax in place
///
/// Subtracts the max before exponentiating. An empty slice is a no-op; a
/// zero exponent sum (all inputs -inf) produces all zeros rather than NaN.
#[allow(clippy::cast_possible_truncation)]
pub fn softmax_inplace(x: &mut [f32]) {
    if x.is_empty() {
        return;
    }
    let max_v = x.iter().copied().fold(f32::NEG_INFINITY, f32::max);

    let mut sum = 0.0f64;
    for v in x.iter_mut() {
        let e = (*v - max_v).exp();
        *v = e;
        sum += f64::from(e);
    }

    let inv_sum = if sum > 0.0 { (1.0 / sum) as f32 } else { 0.0 };
    for v in x.iter_mut() {
        *v *= inv_sum;
    }
}

/// SiLU (Sigmoid Linear Unit): `x / (1 + exp(-x))`
#[inline]
#[must_use]
pub fn silu(x: f32) -> f32 {
    x / (1.0 + (-x).exp())
}

/// Column-contiguous matrix-vector product
///
/// `w` is `[in_dim, out_dim]` with columns contiguous: column `j` starts at
/// `w[j * in_dim]`. Computes `y[j] = sum_i x[i] * w[j * in_dim + i]` with
/// f64 accumulation.
///
/// # Panics
///
/// Panics in debug builds if the slice lengths disagree with the dims.
#[allow(clippy::cast_possible_truncation)]
pub fn matvec_col_major(w: &[f32], in_dim: usize, out_dim: usize, x: &[f32], y: &mut [f32]) {
    debug_assert_eq!(w.len(), in_dim * out_dim);
    debug_assert_eq!(x.len(), in_dim);
    debug_assert_eq!(y.len(), out_dim);

    for (j, out) in y.iter_mut().enumerate() {
        let col = &w[j * in_dim..(j + 1) * in_dim];
        let mut sum = 0.0f64;
        for (&xi, &wi) in x.iter().zip(col.iter()) {
            sum += f64::from(xi) * f64::from(wi);
        }
        *out = sum as f32;
    }
}

/// Element-wise `a[i] += b[i]`
pub fn add_inplace(a: &mut [f32], b: &[f32]) {
    for (x, &y) in a.iter_mut().zip(b.iter()) {
        *x += y;
    }
}

/// Index of the maximum value (greedy decoding)
///
/// Returns 0 for an empty slice.
#[must_use]
pub fn argmax(x: &[f32]) -> usize {
    let mut best = 0;
    let mut best_v = f32::NEG_INFINITY;
    for (i, &v) in x.iter().enumerate() {
        if v > best_v {
            best_v = v;
            best = i;
        }
    }
    best
}

/// Rotary position embedding with precomputed inverse frequencies
///
/// `inv_freq[i] = theta^(-2i / rope_dim)`; at position `pos` the pair
/// `(x[2i], x[2i+1])` of each head's leading `rope_dim` components rotates
/// by `pos * inv_freq[i]`.
#[derive(Debug, Clone)]
pub struct RopeCache {
    rope_dim: usize,
    theta: f32,
    inv_freq: Vec<f32>,
}

impl RopeCache {
    /// Precompute frequencies for a rotary dimension and base
    ///
    /// # Errors
    ///
    /// Returns `InvalidDim` if `rope_dim` is zero or odd, or `theta` is not
    /// strictly positive.
    #[allow(clippy::cast_precision_loss)]
    pub fn new(rope_dim: usize, theta: f32) -> Result<Self> {
        if rope_dim == 0 || rope_dim % 2 != 0 {
            return Err(InferirError::InvalidDim {
                reason: format!("rope_dim must be non-zero and even, got {rope_dim}"),
            });
        }
        if !(theta > 0.0) {
            return Err(InferirError::InvalidDim {
                reason: format!("rope theta must be > 0, got {theta}"),
            });
        }
        let half = rope_dim / 2;
        let mut inv_freq = Vec::with_capacity(half);
        for i in 0..half {
            let exponent = 2.0 * i as f32 / rope_dim as f32;
            inv_freq.push(theta.powf(-exponent));
        }
        Ok(Self {
            rope_dim,
            theta,
            inv_freq,
        })
    }

    /// Rotary dimension this cache was built for
    #[must_use]
    pub fn rope_dim(&self) -> usize {
        self.rope_dim
    }

    /// Frequency base this cache was built for
    #[must_use]
    pub fn theta(&self) -> f32 {
        self.theta
    }

    /// Rotate the first `rope_dim` components of each head in place
    ///
    /// `x` holds `n_heads` consecutive head vectors of length `head_dim`:
    /// pass the query projection with `n_heads` and the key projection with
    /// `n_kv_heads`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDim` if `rope_dim` exceeds `head_dim` or `x` is
    /// shorter than `n_heads * head_dim`.
    #[allow(clippy::cast_precision_loss)]
    pub fn apply_inplace(
        &self,
        x: &mut [f32],
        n_heads: usize,
        head_dim: usize,
        pos: usize,
    ) -> Result<()> {
        if self.rope_dim > head_dim {
            return Err(InferirError::InvalidDim {
                reason: format!("rope_dim {} > head_dim {head_dim}", self.rope_dim),
            });
        }
        if x.len() < n_heads * head_dim {
            return Err(InferirError::InvalidDim {
                reason: format!(
                    "rope input length {} < {n_heads} heads * {head_dim}",
                    x.len()
                ),
            });
        }

        let pos_f = pos as f32;
        for h in 0..n_heads {
            let head = &mut x[h * head_dim..h * head_dim + head_dim];
            for (i, &freq) in self.inv_freq.iter().enumerate() {
                let angle = pos_f * freq;
                let (s, c) = angle.sin_cos();
                let v0 = head[2 * i];
                let v1 = head[2 * i + 1];
                head[2 * i] = v0 * c - v1 * s;
                head[2 * i + 1] = v0 * s + v1 * c;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dot_f64_accumulation() {
        let a = vec![1.0f32; 4];
        let b = vec![0.5f32; 4];
        assert!((dot(&a, &b) - 2.0).abs() < 1e-7);
        assert_eq!(dot(&[], &[]), 0.0);
    }

    #[test]
    fn test_rms_norm_unit_weight_is_pure_normalization() {
        let x = [1.0f32, -2.0, 3.0, -4.0];
        let weight = [1.0f32; 4];
        let mut out = [0.0f32; 4];
        let eps = 1e-5;
        rms_norm_into(&x, &weight, eps, &mut out);

        let mean_sq: f32 = x.iter().map(|v| v * v).sum::<f32>() / 4.0;
        let expected_scale = 1.0 / (mean_sq + eps).sqrt();
        for i in 0..4 {
            assert!((out[i] - x[i] * expected_scale).abs() < 1e-6);
        }
    }

    #[test]
    fn test_rms_norm_sign_symmetry() {
        let x = [0.5f32, -1.5, 2.5, 0.25];
        let neg: Vec<f32> = x.iter().map(|v| -v).collect();
        let weight = [1.0f32; 4];
        let mut out_pos = [0.0f32; 4];
        let mut out_neg = [0.0f32; 4];
        rms_norm_into(&x, &weight, 1e-6, &mut out_pos);
        rms_norm_into(&neg, &weight, 1e-6, &mut out_neg);
        for i in 0..4 {
            assert!((out_pos[i] + out_neg[i]).abs() < 1e-6);
        }
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let mut x = [1.0f32, 2.0, 3.0, 4.0];
        softmax_inplace(&mut x);
        let sum: f32 = x.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        // Monotonic inputs stay monotonic
        assert!(x[0] < x[1] && x[1] < x[2] && x[2] < x[3]);
    }

    #[test]
    fn test_softmax_shift_invariance() {
        let mut a = [0.1f32, -0.4, 2.0];
        let mut b = [100.1f32, 99.6, 102.0];
        softmax_inplace(&mut a);
        softmax_inplace(&mut b);
        for i in 0..3 {
            assert!((a[i] - b[i]).abs() < 1e-6);
        }
    }

    #[test]
    fn test_softmax_empty_and_degenerate() {
        let mut empty: [f32; 0] = [];
        softmax_inplace(&mut empty);

        let mut x = [f32::NEG_INFINITY, f32::NEG_INFINITY];
        softmax_inplace(&mut x);
        assert_eq!(x, [0.0, 0.0]);

        let mut single = [42.0f32];
        softmax_inplace(&mut single);
        assert!((single[0] - 1.0).abs() < 1e-7);
    }

    #[test]
    fn test_silu() {
        assert_eq!(silu(0.0), 0.0);
        assert!((silu(1.0) - 1.0 / (1.0 + (-1.0f32).exp())).abs() < 1e-7);
        // Large negative saturates to ~0, large positive to ~x
        assert!(silu(-20.0).abs() < 1e-6);
        assert!((silu(20.0) - 20.0).abs() < 1e-3);
    }

    #[test]
    fn test_matvec_col_major() {
        // [in=2, out=3], columns contiguous:
        // col0 = [1, 2], col1 = [3, 4], col2 = [5, 6]
        let w = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
        let x = [10.0f32, 100.0];
        let mut y = [0.0f32; 3];
        matvec_col_major(&w, 2, 3, &x, &mut y);
        assert_eq!(y, [210.0, 430.0, 650.0]);
    }

    #[test]
    fn test_add_inplace() {
        let mut a = [1.0f32, 2.0, 3.0];
        add_inplace(&mut a, &[0.5, -2.0, 1.0]);
        assert_eq!(a, [1.5, 0.0, 4.0]);
    }

    #[test]
    fn test_argmax() {
        assert_eq!(argmax(&[0.1, 0.9, 0.5]), 1);
        assert_eq!(argmax(&[-3.0, -1.0, -2.0]), 1);
        assert_eq!(argmax(&[]), 0);
        // First occurrence wins on ties
        assert_eq!(argmax(&[1.0, 1.0]), 0);
    }

    #[test]
    fn test_rope_rejects_bad_dims() {
        assert!(matches!(
            RopeCache::new(0, 10000.0),
            Err(InferirError::InvalidDim { .. })
        ));
        assert!(matches!(
            RopeCache::new(63, 10000.0),
            Err(InferirError::InvalidDim { .. })
        ));
        assert!(matches!(
            RopeCache::new(64, 0.0),
            Err(InferirError::InvalidDim { .. })
        ));
        assert!(matches!(
            RopeCache::new(64, -1.0),
            Err(InferirError::InvalidDim { .. })
        ));
    }

    #[test]
    fn test_rope_identity_at_pos_zero() {
        let rope = RopeCache::new(4, 10000.0).unwrap();
        let mut x = [0.1f32, -0.2, 0.3, 0.4];
        let orig = x;
        rope.apply_inplace(&mut x, 1, 4, 0).unwrap();
        for i in 0..4 {
            assert!((x[i] - orig[i]).abs() < 1e-7);
        }
    }

    #[test]
    fn test_rope_preserves_pair_norms() {
        let rope = RopeCache::new(8, 10000.0).unwrap();
        let mut x: Vec<f32> = (0..16).map(|i| 0.37 * (i as f32) - 2.0).collect();
        let orig = x.clone();
        rope.apply_inplace(&mut x, 2, 8, 17).unwrap();
        for h in 0..2 {
            for i in 0..4 {
                let o0 = orig[h * 8 + 2 * i];
                let o1 = orig[h * 8 + 2 * i + 1];
                let n0 = x[h * 8 + 2 * i];
                let n1 = x[h * 8 + 2 * i + 1];
                assert!(
                    ((o0 * o0 + o1 * o1) - (n0 * n0 + n1 * n1)).abs() < 1e-4,
                    "pair norm changed at head {h} pair {i}"
                );
            }
        }
    }

    #[test]
    fn test_rope_partial_rotation() {
        // rope_dim 2 < head_dim 4: only the first pair rotates
        let rope = RopeCache::new(2, 10000.0).unwrap();
        let mut x = [1.0f32, 0.0, 5.0, 6.0];
        rope.apply_inplace(&mut x, 1, 4, 3).unwrap();
        assert_eq!(&x[2..], &[5.0, 6.0]);
        // inv_freq[0] = 1.0, so the first pair rotated by angle = 3
        assert!((x[0] - 3.0f32.cos()).abs() < 1e-6);
        assert!((x[1] - 3.0f32.sin()).abs() < 1e-6);
    }

    #[test]
    fn test_rope_dim_exceeding_head_dim() {
        let rope = RopeCache::new(8, 10000.0).unwrap();
        let mut x = [0.0f32; 8];
        let err = rope.apply_inplace(&mut x, 2, 4, 0).unwrap_err();
        assert!(matches!(err, InferirError::InvalidDim { .. }));
    }
}
