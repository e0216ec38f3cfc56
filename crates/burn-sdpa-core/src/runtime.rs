//! Fused-kernel runtime boundary
//!
//! Fused scaled-dot-product kernels (flash attention and friends) belong to
//! the surrounding tensor runtime, not to this crate. [`FusedSdpa`] is the
//! seam: the engine asks for availability, the fused primitive, and
//! optionally the fused head-merge projection, and stays agnostic to how the
//! kernel is launched.
//!
//! [`ReferenceSdpa`] computes the same contract with plain batched
//! matmul + softmax; it stands in on CPU backends and in tests.
//! [`NoFusedKernels`] reports nothing available, for exercising the
//! unsupported-strategy path.

use burn::nn::Linear;
use burn::prelude::*;

use crate::error::AttentionError;
use crate::heads::merge_heads;
use crate::kernel::{materialized_sdpa, AttentionStrategy};
use crate::precision::{restore, upcast};

/// Options forwarded to the fused primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FusedOptions {
    /// Request full-precision accumulation for the dot product and softmax.
    pub upcast: bool,
    /// Causal (autoregressive) masking.
    pub causal: bool,
}

/// Fused scaled-dot-product attention supplied by a tensor runtime.
///
/// All tensors use kernel layout `[batch, heads, tokens, head_dim]`.
pub trait FusedSdpa<B: Backend> {
    /// Whether fused kernels can be launched on this runtime.
    fn is_available(&self) -> bool {
        true
    }

    /// Fused attention. `scale` is applied to the scores inside the kernel;
    /// callers that pre-scale their queries pass `1.0`.
    fn sdpa(
        &self,
        query: Tensor<B, 4>,
        key: Tensor<B, 4>,
        value: Tensor<B, 4>,
        scale: f64,
        options: &FusedOptions,
    ) -> Result<Tensor<B, 4>, AttentionError>;

    /// Fused attention with the head-merge output projection folded into the
    /// kernel call. Runtimes without that fusion inherit the unfused default.
    fn sdpa_projected(
        &self,
        query: Tensor<B, 4>,
        key: Tensor<B, 4>,
        value: Tensor<B, 4>,
        scale: f64,
        options: &FusedOptions,
        out_proj: &Linear<B>,
    ) -> Result<Tensor<B, 3>, AttentionError> {
        let out = self.sdpa(query, key, value, scale, options)?;
        Ok(out_proj.forward(merge_heads(out)))
    }
}

/// Reference runtime: the fused contract computed with batched
/// matmul + softmax. `upcast` is honored through the full-precision bridge,
/// mirroring a fused kernel's wide accumulator.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceSdpa;

impl<B: Backend> FusedSdpa<B> for ReferenceSdpa {
    fn sdpa(
        &self,
        query: Tensor<B, 4>,
        key: Tensor<B, 4>,
        value: Tensor<B, 4>,
        scale: f64,
        options: &FusedOptions,
    ) -> Result<Tensor<B, 4>, AttentionError> {
        if options.upcast {
            let out = materialized_sdpa(
                upcast(query),
                upcast(key),
                upcast(value),
                scale,
                options.causal,
                0,
            );
            Ok(restore(out))
        } else {
            Ok(materialized_sdpa(query, key, value, scale, options.causal, 0))
        }
    }
}

/// Runtime with no fused kernels available.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFusedKernels;

impl<B: Backend> FusedSdpa<B> for NoFusedKernels {
    fn is_available(&self) -> bool {
        false
    }

    fn sdpa(
        &self,
        _query: Tensor<B, 4>,
        _key: Tensor<B, 4>,
        _value: Tensor<B, 4>,
        _scale: f64,
        _options: &FusedOptions,
    ) -> Result<Tensor<B, 4>, AttentionError> {
        Err(AttentionError::UnsupportedStrategy(
            AttentionStrategy::FusedScaled,
        ))
    }
}
