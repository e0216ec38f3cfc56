//! Scaled-dot-product attention kernel and execution strategies

use burn::prelude::*;

use crate::precision::PrecisionMode;

/// How scaled-dot-product attention is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttentionStrategy {
    /// Explicit matmul + softmax, full attention matrix realized.
    #[default]
    Materialized,
    /// Fused kernel invoked with unit scale; queries are pre-multiplied by
    /// `1/sqrt(head_dim)` before the call.
    FusedPrescaled,
    /// Fused kernel applies the scale internally and may additionally fold
    /// in the head-merge output projection.
    FusedScaled,
}

impl AttentionStrategy {
    /// Get a human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            AttentionStrategy::Materialized => "materialized",
            AttentionStrategy::FusedPrescaled => "fused_prescaled",
            AttentionStrategy::FusedScaled => "fused_scaled",
        }
    }

    /// Whether the strategy delegates to a fused runtime kernel.
    pub fn is_fused(&self) -> bool {
        !matches!(self, AttentionStrategy::Materialized)
    }
}

/// Default `batch * heads` cutoff at or below which the materialized kernel
/// iterates per (batch, head) pair instead of batching every pair into one
/// matmul. Hand-tuned memory/scheduling knob; both regimes are numerically
/// identical.
pub const DEFAULT_MICROLOOP_THRESHOLD: usize = 256;

/// Configuration for attention execution.
#[derive(Debug, Clone)]
pub struct SdpaConfig {
    /// Which strategy to use.
    pub strategy: AttentionStrategy,
    /// Precision of the dot product and softmax.
    pub precision: PrecisionMode,
    /// Micro-loop cutoff for the materialized kernel.
    pub microloop_threshold: usize,
    /// Causal masking. Requires self-attention shape: a uniform context of
    /// the query length and no adapter terms.
    pub causal: bool,
}

impl Default for SdpaConfig {
    fn default() -> Self {
        Self {
            strategy: AttentionStrategy::Materialized,
            precision: PrecisionMode::Native,
            microloop_threshold: DEFAULT_MICROLOOP_THRESHOLD,
            causal: false,
        }
    }
}

impl SdpaConfig {
    /// Materialized attention (works on every runtime).
    pub fn materialized() -> Self {
        Self::default()
    }

    /// Fused attention with the scale applied inside the kernel.
    pub fn fused() -> Self {
        Self {
            strategy: AttentionStrategy::FusedScaled,
            ..Default::default()
        }
    }

    /// Fused attention with pre-scaled queries.
    pub fn fused_prescaled() -> Self {
        Self {
            strategy: AttentionStrategy::FusedPrescaled,
            ..Default::default()
        }
    }

    /// Set the precision mode
    pub fn with_precision(mut self, precision: PrecisionMode) -> Self {
        self.precision = precision;
        self
    }

    /// Set causal masking
    pub fn with_causal(mut self, causal: bool) -> Self {
        self.causal = causal;
        self
    }

    /// Set the materialized micro-loop cutoff
    pub fn with_microloop_threshold(mut self, threshold: usize) -> Self {
        self.microloop_threshold = threshold;
        self
    }
}

/// Causal attention mask for autoregressive blocks
///
/// Upper triangular `-inf` matrix; added to attention scores it prevents
/// attending to future positions.
pub fn causal_mask<B: Backend>(seq_len: usize, device: &B::Device) -> Tensor<B, 2> {
    let mut mask_data = vec![0.0f32; seq_len * seq_len];
    for i in 0..seq_len {
        for j in (i + 1)..seq_len {
            mask_data[i * seq_len + j] = f32::NEG_INFINITY;
        }
    }
    Tensor::<B, 1>::from_floats(mask_data.as_slice(), device).reshape([seq_len, seq_len])
}

/// Materialized scaled-dot-product attention.
///
/// Computes `softmax(scale * q @ k^T [+ causal_mask]) @ v` over kernel-layout
/// tensors `[batch, heads, tokens, head_dim]`.
///
/// When `batch * heads <= microloop_threshold` the kernel walks the
/// (batch, head) pairs one at a time so that a single `[1, 1, n, m]` score
/// matrix is live at any moment; each iteration's matrix is folded into its
/// output row before the next one is produced. Above the threshold all pairs
/// go through one batched matmul.
pub fn materialized_sdpa<B: Backend>(
    q: Tensor<B, 4>,
    k: Tensor<B, 4>,
    v: Tensor<B, 4>,
    scale: f64,
    causal: bool,
    microloop_threshold: usize,
) -> Tensor<B, 4> {
    let [batch, heads, seq_q, head_dim] = q.dims();
    let [_, _, seq_k, _] = k.dims();

    let mask = causal.then(|| causal_mask::<B>(seq_q, &q.device()));

    if batch * heads <= microloop_threshold {
        let mut rows = Vec::with_capacity(batch * heads);
        for b in 0..batch {
            for h in 0..heads {
                let q_bh = q.clone().slice([b..b + 1, h..h + 1, 0..seq_q, 0..head_dim]);
                let k_bh = k.clone().slice([b..b + 1, h..h + 1, 0..seq_k, 0..head_dim]);
                let v_bh = v.clone().slice([b..b + 1, h..h + 1, 0..seq_k, 0..head_dim]);

                // one [1, 1, seq_q, seq_k] score matrix live per iteration
                let scores = q_bh.matmul(k_bh.transpose()) * scale;
                let scores = match &mask {
                    Some(m) => scores + m.clone().unsqueeze::<4>(),
                    None => scores,
                };
                let probs = burn::tensor::activation::softmax(scores, 3);

                rows.push(probs.matmul(v_bh));
            }
        }

        // [batch * heads, 1, seq_q, head_dim] -> [batch, heads, seq_q, head_dim]
        Tensor::cat(rows, 0).reshape([batch, heads, seq_q, head_dim])
    } else {
        let scores = q.matmul(k.transpose()) * scale;
        let scores = match mask {
            Some(m) => scores + m.unsqueeze::<4>(),
            None => scores,
        };
        let probs = burn::tensor::activation::softmax(scores, 3);

        probs.matmul(v)
    }
}
