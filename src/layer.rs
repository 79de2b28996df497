//! Single transformer-block execution: KV cache and step engine
//!
//! [`LayerContext`] owns everything one block needs across steps: the RoPE
//! frequency cache, a layer-local [`KVCacheLayer`], and scratch buffers
//! reused on every call. `step` runs RMSNorm, grouped-query attention over
//! all cached positions, and the SwiGLU FFN, mutating the activation vector
//! in place.

use crate::error::{InferirError, Result};
use crate::gguf::ModelConfig;
use crate::ops::{add_inplace, dot, matvec_col_major, rms_norm_into, silu, softmax_inplace, RopeCache};
use crate::weights::LayerWeights;

/// Context length used when the model metadata omits one
const DEFAULT_MAX_SEQ: u32 = 2048;

/// RoPE frequency base used when the model metadata omits one
const DEFAULT_ROPE_THETA: f32 = 10000.0;

/// Append-only per-layer key/value storage
///
/// Layout is kv_head-major, position-middle, dim-innermost: the `(head,
/// pos)` slot starts at `(head * max_seq + pos) * head_dim`. After a write
/// at position `p`, every position in `[0, p]` holds valid data.
#[derive(Debug)]
pub struct KVCacheLayer {
    n_kv_heads: usize,
    max_seq: usize,
    head_dim: usize,
    k: Vec<f32>,
    v: Vec<f32>,
}

impl KVCacheLayer {
    /// Allocate zeroed storage for `n_kv_heads * max_seq * head_dim` floats
    ///
    /// # Errors
    ///
    /// Returns `InvalidDim` if any dimension is zero.
    pub fn new(n_kv_heads: usize, max_seq: usize, head_dim: usize) -> Result<Self> {
        if n_kv_heads == 0 || max_seq == 0 || head_dim == 0 {
            return Err(InferirError::InvalidDim {
                reason: format!(
                    "kv cache dims must be non-zero: n_kv_heads={n_kv_heads} max_seq={max_seq} head_dim={head_dim}"
                ),
            });
        }
        let total = n_kv_heads * max_seq * head_dim;
        Ok(Self {
            n_kv_heads,
            max_seq,
            head_dim,
            k: vec![0.0; total],
            v: vec![0.0; total],
        })
    }

    /// Key/value head count
    #[must_use]
    pub fn n_kv_heads(&self) -> usize {
        self.n_kv_heads
    }

    /// Maximum number of positions
    #[must_use]
    pub fn max_seq(&self) -> usize {
        self.max_seq
    }

    /// Per-head vector length
    #[must_use]
    pub fn head_dim(&self) -> usize {
        self.head_dim
    }

    fn slot(&self, kv_head: usize, pos: usize) -> usize {
        (kv_head * self.max_seq + pos) * self.head_dim
    }

    /// The key vector stored for `(kv_head, pos)`
    ///
    /// # Panics
    ///
    /// Panics if `kv_head` or `pos` is out of range.
    #[must_use]
    pub fn k(&self, kv_head: usize, pos: usize) -> &[f32] {
        assert!(kv_head < self.n_kv_heads && pos < self.max_seq);
        let s = self.slot(kv_head, pos);
        &self.k[s..s + self.head_dim]
    }

    /// The value vector stored for `(kv_head, pos)`
    ///
    /// # Panics
    ///
    /// Panics if `kv_head` or `pos` is out of range.
    #[must_use]
    pub fn v(&self, kv_head: usize, pos: usize) -> &[f32] {
        assert!(kv_head < self.n_kv_heads && pos < self.max_seq);
        let s = self.slot(kv_head, pos);
        &self.v[s..s + self.head_dim]
    }

    /// Store the key and value projections for position `pos`
    ///
    /// `k_kv_dim` and `v_kv_dim` hold `n_kv_heads` consecutive head vectors.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` if `pos >= max_seq`, `InvalidDim` if either
    /// input is shorter than `n_kv_heads * head_dim`.
    pub fn write(&mut self, pos: usize, k_kv_dim: &[f32], v_kv_dim: &[f32]) -> Result<()> {
        if pos >= self.max_seq {
            return Err(InferirError::OutOfRange {
                what: "kv cache position".to_string(),
                index: pos as u64,
                limit: self.max_seq as u64,
            });
        }
        let kv_dim = self.n_kv_heads * self.head_dim;
        if k_kv_dim.len() < kv_dim || v_kv_dim.len() < kv_dim {
            return Err(InferirError::InvalidDim {
                reason: format!(
                    "kv write expects {kv_dim} floats, got k={} v={}",
                    k_kv_dim.len(),
                    v_kv_dim.len()
                ),
            });
        }
        for h in 0..self.n_kv_heads {
            let s = self.slot(h, pos);
            let src = h * self.head_dim;
            self.k[s..s + self.head_dim].copy_from_slice(&k_kv_dim[src..src + self.head_dim]);
            self.v[s..s + self.head_dim].copy_from_slice(&v_kv_dim[src..src + self.head_dim]);
        }
        Ok(())
    }
}

/// One-block forward-pass engine with owned scratch state
///
/// Holds the RoPE cache, the KV cache, and every scratch buffer a step
/// needs, so repeated steps allocate nothing.
pub struct LayerContext {
    cfg: ModelConfig,
    rope: RopeCache,
    cache: KVCacheLayer,

    x_norm: Vec<f32>,
    q: Vec<f32>,
    k: Vec<f32>,
    v: Vec<f32>,
    attn_out: Vec<f32>,
    tmp_d_model: Vec<f32>,
    gate: Vec<f32>,
    up: Vec<f32>,
    attn_probs: Vec<f32>,
}

impl LayerContext {
    /// Validate the config and allocate caches and scratch buffers
    ///
    /// `rope_dim` falls back to `head_dim` and `rope_theta` to 10000 when
    /// the metadata left them unset; `context_length` falls back to 2048.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDim` for zero dimensions, a head count that does not
    /// divide evenly into KV groups, or an unusable rope configuration.
    pub fn new(cfg: &ModelConfig) -> Result<Self> {
        if cfg.d_model == 0
            || cfg.n_heads == 0
            || cfg.head_dim == 0
            || cfg.n_kv_heads == 0
            || cfg.kv_dim == 0
            || cfg.ffn_hidden_dim == 0
        {
            return Err(InferirError::InvalidDim {
                reason: format!(
                    "model config has zero dims: d_model={} n_heads={} n_kv_heads={} ffn={}",
                    cfg.d_model, cfg.n_heads, cfg.n_kv_heads, cfg.ffn_hidden_dim
                ),
            });
        }
        if cfg.n_heads % cfg.n_kv_heads != 0 {
            return Err(InferirError::InvalidDim {
                reason: format!(
                    "n_heads {} not divisible by n_kv_heads {}",
                    cfg.n_heads, cfg.n_kv_heads
                ),
            });
        }

        let rope_dim = if cfg.rope_dim != 0 {
            cfg.rope_dim
        } else {
            cfg.head_dim
        };
        let theta = if cfg.rope_theta > 0.0 {
            cfg.rope_theta
        } else {
            DEFAULT_ROPE_THETA
        };
        let rope = RopeCache::new(rope_dim as usize, theta)?;

        let max_seq = if cfg.context_length != 0 {
            cfg.context_length
        } else {
            DEFAULT_MAX_SEQ
        };
        let cache = KVCacheLayer::new(
            cfg.n_kv_heads as usize,
            max_seq as usize,
            cfg.head_dim as usize,
        )?;

        let d_model = cfg.d_model as usize;
        let kv_dim = cfg.kv_dim as usize;
        let ffn = cfg.ffn_hidden_dim as usize;
        Ok(Self {
            cfg: cfg.clone(),
            rope,
            cache,
            x_norm: vec![0.0; d_model],
            q: vec![0.0; d_model],
            k: vec![0.0; kv_dim],
            v: vec![0.0; kv_dim],
            attn_out: vec![0.0; d_model],
            tmp_d_model: vec![0.0; d_model],
            gate: vec![0.0; ffn],
            up: vec![0.0; ffn],
            attn_probs: vec![0.0; max_seq as usize],
        })
    }

    /// The KV cache this context writes into
    #[must_use]
    pub fn cache(&self) -> &KVCacheLayer {
        &self.cache
    }

    /// Run one block forward pass at `pos`, mutating `x` in place
    ///
    /// Writes the position's key/value projections into the cache, attends
    /// over positions `[0, pos]` with grouped-query head routing, then
    /// applies the SwiGLU FFN. `x` must hold `d_model` floats.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` if `pos` exceeds the cache, `InvalidDim` if `x`
    /// has the wrong length.
    pub fn step(&mut self, layer: &LayerWeights, pos: usize, x: &mut [f32]) -> Result<()> {
        let d_model = self.cfg.d_model as usize;
        let kv_dim = self.cfg.kv_dim as usize;
        let head_dim = self.cfg.head_dim as usize;
        let n_heads = self.cfg.n_heads as usize;
        let n_kv_heads = self.cfg.n_kv_heads as usize;
        let ffn = self.cfg.ffn_hidden_dim as usize;

        if x.len() != d_model {
            return Err(InferirError::InvalidDim {
                reason: format!("step input length {} != d_model {d_model}", x.len()),
            });
        }
        if pos >= self.cache.max_seq() {
            return Err(InferirError::OutOfRange {
                what: "step position".to_string(),
                index: pos as u64,
                limit: self.cache.max_seq() as u64,
            });
        }

        // ---- Attention ----
        rms_norm_into(x, layer.attn_norm.data(), self.cfg.rms_epsilon, &mut self.x_norm);

        matvec_col_major(layer.attn_q.data(), d_model, d_model, &self.x_norm, &mut self.q);
        matvec_col_major(layer.attn_k.data(), d_model, kv_dim, &self.x_norm, &mut self.k);
        matvec_col_major(layer.attn_v.data(), d_model, kv_dim, &self.x_norm, &mut self.v);

        self.rope.apply_inplace(&mut self.q, n_heads, head_dim, pos)?;
        self.rope.apply_inplace(&mut self.k, n_kv_heads, head_dim, pos)?;

        self.cache.write(pos, &self.k, &self.v)?;

        #[allow(clippy::cast_precision_loss)]
        let inv_sqrt_hd = 1.0 / (head_dim as f32).sqrt();
        self.attn_out.fill(0.0);

        let group = n_heads / n_kv_heads;
        for h in 0..n_heads {
            let kv_head = h / group;
            let qh = &self.q[h * head_dim..(h + 1) * head_dim];

            let probs = &mut self.attn_probs[..=pos];
            for (t, p) in probs.iter_mut().enumerate() {
                *p = dot(qh, self.cache.k(kv_head, t)) * inv_sqrt_hd;
            }
            softmax_inplace(probs);

            let out_h = &mut self.attn_out[h * head_dim..(h + 1) * head_dim];
            for (t, &p) in probs.iter().enumerate() {
                let vh = self.cache.v(kv_head, t);
                for (o, &vi) in out_h.iter_mut().zip(vh.iter()) {
                    *o += p * vi;
                }
            }
        }

        matvec_col_major(
            layer.attn_output.data(),
            d_model,
            d_model,
            &self.attn_out,
            &mut self.tmp_d_model,
        );
        add_inplace(x, &self.tmp_d_model);

        // ---- FFN ----
        rms_norm_into(x, layer.ffn_norm.data(), self.cfg.rms_epsilon, &mut self.x_norm);

        matvec_col_major(layer.ffn_gate.data(), d_model, ffn, &self.x_norm, &mut self.gate);
        matvec_col_major(layer.ffn_up.data(), d_model, ffn, &self.x_norm, &mut self.up);

        for (g, &u) in self.gate.iter_mut().zip(self.up.iter()) {
            *g = silu(*g) * u;
        }

        matvec_col_major(
            layer.ffn_down.data(),
            ffn,
            d_model,
            &self.gate,
            &mut self.tmp_d_model,
        );
        add_inplace(x, &self.tmp_d_model);

        Ok(())
    }
}
