//! Composed attention entry point
//!
//! Pipeline: validate → precision policy → batch split → kernel per split →
//! concatenate → adapter injection → restore precision → head merge. Every
//! attention variant in a diffusion graph (self, cross, adapter-conditioned)
//! goes through [`attend`].

use burn::prelude::*;

use crate::adapter::{self, AdapterTerm};
use crate::context::CfgContext;
use crate::error::AttentionError;
use crate::heads::merge_heads;
use crate::kernel::{materialized_sdpa, AttentionStrategy, SdpaConfig};
use crate::precision::{restore, upcast, PrecisionMode};
use crate::runtime::{FusedOptions, FusedSdpa};
use crate::split;

/// Multi-head scaled-dot-product attention over a CFG batch.
///
/// # Arguments
///
/// * `cfg` - Strategy, precision and kernel tuning
/// * `runtime` - Fused-kernel provider consulted by the fused strategies
/// * `scale` - Score scale, normally `1/sqrt(head_dim)`; applied exactly once
///   per attention term regardless of strategy
/// * `queries` - Kernel-layout queries `[batch, heads, tokens, head_dim]`
/// * `context` - Packed key/value buffers with their per-half lengths
/// * `adapters` - Zero or more additive key/value terms
///
/// # Returns
///
/// Channel-layout output `[batch, tokens, heads * head_dim]`; the head merge
/// exactly inverts the split that produced the queries. The unifying output
/// projection is the caller's (see `burn-sdpa-blocks`).
pub fn attend<B: Backend>(
    cfg: &SdpaConfig,
    runtime: &dyn FusedSdpa<B>,
    scale: f64,
    queries: Tensor<B, 4>,
    context: &CfgContext<B>,
    adapters: &[AdapterTerm<B>],
) -> Result<Tensor<B, 3>, AttentionError> {
    validate(cfg, &queries, context, adapters)?;
    if cfg.strategy.is_fused() && !runtime.is_available() {
        return Err(AttentionError::UnsupportedStrategy(cfg.strategy));
    }

    tracing::debug!(
        strategy = cfg.strategy.name(),
        precision = cfg.precision.name(),
        adapters = adapters.len(),
        "dispatching attention"
    );

    match cfg.strategy {
        AttentionStrategy::Materialized => match cfg.precision {
            PrecisionMode::Native => {
                let out = attend_materialized(cfg, scale, queries, context, adapters)?;
                Ok(merge_heads(out))
            }
            PrecisionMode::UpcastForDot => {
                // Dot products, softmax, half concatenation and adapter sums
                // all run in the wide type; one downcast at the end.
                let queries = upcast(queries);
                let context = context.clone().into_full_precision();
                let adapters: Vec<_> = adapters
                    .iter()
                    .map(|term| term.clone().into_full_precision())
                    .collect();
                let out = attend_materialized(cfg, scale, queries, &context, &adapters)?;
                Ok(merge_heads(restore(out)))
            }
        },
        AttentionStrategy::FusedPrescaled => {
            // Scale folded into the queries once; the kernel runs unscaled.
            let options = fused_options(cfg);
            let queries = queries * scale;
            let attend_one =
                |q: Tensor<B, 4>, k: Tensor<B, 4>, v: Tensor<B, 4>| runtime.sdpa(q, k, v, 1.0, &options);
            let out = split_and_inject(queries, context, adapters, &attend_one)?;
            Ok(merge_heads(out))
        }
        AttentionStrategy::FusedScaled => {
            let options = fused_options(cfg);
            let attend_one =
                |q: Tensor<B, 4>, k: Tensor<B, 4>, v: Tensor<B, 4>| runtime.sdpa(q, k, v, scale, &options);
            let out = split_and_inject(queries, context, adapters, &attend_one)?;
            Ok(merge_heads(out))
        }
    }
}

fn fused_options(cfg: &SdpaConfig) -> FusedOptions {
    FusedOptions {
        upcast: cfg.precision.is_upcast(),
        causal: cfg.causal,
    }
}

fn attend_materialized<B: Backend>(
    cfg: &SdpaConfig,
    scale: f64,
    queries: Tensor<B, 4>,
    context: &CfgContext<B>,
    adapters: &[AdapterTerm<B>],
) -> Result<Tensor<B, 4>, AttentionError> {
    let attend_one = |q: Tensor<B, 4>, k: Tensor<B, 4>, v: Tensor<B, 4>| {
        Ok(materialized_sdpa(
            q,
            k,
            v,
            scale,
            cfg.causal,
            cfg.microloop_threshold,
        ))
    };
    split_and_inject(queries, context, adapters, &attend_one)
}

fn split_and_inject<B, F>(
    queries: Tensor<B, 4>,
    context: &CfgContext<B>,
    adapters: &[AdapterTerm<B>],
    attend_one: &F,
) -> Result<Tensor<B, 4>, AttentionError>
where
    B: Backend,
    F: Fn(Tensor<B, 4>, Tensor<B, 4>, Tensor<B, 4>) -> Result<Tensor<B, 4>, AttentionError>,
{
    let primary = split::attend_context(queries.clone(), context, attend_one)?;
    adapter::inject(primary, &queries, adapters, attend_one)
}

fn validate<B: Backend>(
    cfg: &SdpaConfig,
    queries: &Tensor<B, 4>,
    context: &CfgContext<B>,
    adapters: &[AdapterTerm<B>],
) -> Result<(), AttentionError> {
    let [batch, heads, seq_q, head_dim] = queries.dims();
    let lengths = context.lengths();

    let expected = [batch, heads, lengths.max_len(), head_dim];
    if context.dims() != expected {
        return Err(AttentionError::ShapeMismatch {
            tensor: "keys",
            expected: expected.to_vec(),
            actual: context.dims().to_vec(),
        });
    }

    for term in adapters {
        let dims = term.keys().dims();
        let expected = [batch, heads, term.context_len(), head_dim];
        if dims != expected {
            return Err(AttentionError::ShapeMismatch {
                tensor: "adapter keys",
                expected: expected.to_vec(),
                actual: dims.to_vec(),
            });
        }
    }

    // causal masking is only defined for self-attention shape
    if cfg.causal && (!lengths.is_uniform() || lengths.first != seq_q || !adapters.is_empty()) {
        return Err(AttentionError::ShapeMismatch {
            tensor: "causal context",
            expected: vec![batch, heads, seq_q, head_dim],
            actual: context.dims().to_vec(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextLengths;
    use crate::runtime::{NoFusedKernels, ReferenceSdpa};
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn filled(shape: [usize; 4], step: f32) -> Tensor<TestBackend, 4> {
        let device = Default::default();
        let len = shape.iter().product::<usize>();
        let values: Vec<f32> = (0..len).map(|i| (i as f32 * step).sin()).collect();
        Tensor::<TestBackend, 1>::from_floats(values.as_slice(), &device).reshape(shape)
    }

    #[test]
    fn test_strategies_agree() {
        let q = filled([2, 2, 4, 8], 0.13);
        let k = filled([2, 2, 6, 8], 0.29);
        let v = filled([2, 2, 6, 8], 0.41);
        let ctx = CfgContext::uniform(k, v).unwrap();
        let scale = (8f64).powf(-0.5);

        let outputs: Vec<Vec<f32>> = [
            SdpaConfig::materialized(),
            SdpaConfig::fused_prescaled(),
            SdpaConfig::fused(),
        ]
        .iter()
        .map(|cfg| {
            attend(cfg, &ReferenceSdpa, scale, q.clone(), &ctx, &[])
                .unwrap()
                .into_data()
                .to_vec()
                .unwrap()
        })
        .collect();

        for other in &outputs[1..] {
            for (a, b) in outputs[0].iter().zip(other.iter()) {
                assert!((a - b).abs() < 1e-5, "strategy outputs diverge: {} vs {}", a, b);
            }
        }
    }

    #[test]
    fn test_output_is_channel_layout() {
        let q = filled([2, 2, 4, 8], 0.11);
        let k = filled([2, 2, 3, 8], 0.23);
        let v = filled([2, 2, 3, 8], 0.31);
        let ctx = CfgContext::uniform(k, v).unwrap();

        let out = attend(
            &SdpaConfig::materialized(),
            &ReferenceSdpa,
            0.35,
            q,
            &ctx,
            &[],
        )
        .unwrap();
        assert_eq!(out.dims(), [2, 4, 16]);
    }

    #[test]
    fn test_fused_without_kernels_is_rejected() {
        let q = filled([1, 2, 4, 8], 0.17);
        let k = filled([1, 2, 4, 8], 0.19);
        let v = filled([1, 2, 4, 8], 0.37);
        let ctx = CfgContext::uniform(k, v).unwrap();

        let err = attend(&SdpaConfig::fused(), &NoFusedKernels, 0.35, q, &ctx, &[]).unwrap_err();
        assert_eq!(
            err,
            AttentionError::UnsupportedStrategy(AttentionStrategy::FusedScaled)
        );
    }

    #[test]
    fn test_mismatched_keys_rejected_before_dispatch() {
        let q = filled([2, 2, 4, 8], 0.17);
        let k = filled([2, 4, 4, 8], 0.19); // wrong head count
        let v = filled([2, 4, 4, 8], 0.37);
        let ctx = CfgContext::uniform(k, v).unwrap();

        let err = attend(
            &SdpaConfig::materialized(),
            &ReferenceSdpa,
            0.35,
            q,
            &ctx,
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, AttentionError::ShapeMismatch { tensor: "keys", .. }));
    }

    #[test]
    fn test_causal_cross_attention_rejected() {
        let q = filled([2, 2, 4, 8], 0.17);
        let k = filled([2, 2, 6, 8], 0.19);
        let v = filled([2, 2, 6, 8], 0.37);
        let ctx = CfgContext::uniform(k, v).unwrap();

        let err = attend(
            &SdpaConfig::materialized().with_causal(true),
            &ReferenceSdpa,
            0.35,
            q,
            &ctx,
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, AttentionError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_upcast_matches_native_on_f32_backend() {
        let q = filled([2, 2, 4, 8], 0.13);
        let k = filled([2, 2, 5, 8], 0.29);
        let v = filled([2, 2, 5, 8], 0.41);
        let ctx = CfgContext::packed(
            k,
            v,
            ContextLengths::per_half(3, 5),
        )
        .unwrap();
        let scale = (8f64).powf(-0.5);

        let native = attend(
            &SdpaConfig::materialized(),
            &ReferenceSdpa,
            scale,
            q.clone(),
            &ctx,
            &[],
        )
        .unwrap();
        let wide = attend(
            &SdpaConfig::materialized().with_precision(PrecisionMode::UpcastForDot),
            &ReferenceSdpa,
            scale,
            q,
            &ctx,
            &[],
        )
        .unwrap();

        let native: Vec<f32> = native.into_data().to_vec().unwrap();
        let wide: Vec<f32> = wide.into_data().to_vec().unwrap();
        for (a, b) in native.iter().zip(wide.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }
}
