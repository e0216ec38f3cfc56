//! Batch splitting for asymmetric CFG context lengths
//!
//! When the two CFG halves attend against conditioning sequences of
//! different lengths, the batch is split into its halves, each half runs the
//! kernel against its own prefix view of the packed key/value buffers, and
//! the two outputs are concatenated back in original order. Uniform requests
//! pass straight through in one kernel call.

use burn::prelude::*;

use crate::context::CfgContext;
use crate::error::AttentionError;

/// Dispatch an attention request over its context, splitting the batch only
/// when the per-half context lengths differ.
///
/// `attend_one` is the per-(q, k, v) kernel invocation; strategy, scale and
/// precision are already bound into it.
pub fn attend_context<B, F>(
    queries: Tensor<B, 4>,
    context: &CfgContext<B>,
    attend_one: &F,
) -> Result<Tensor<B, 4>, AttentionError>
where
    B: Backend,
    F: Fn(Tensor<B, 4>, Tensor<B, 4>, Tensor<B, 4>) -> Result<Tensor<B, 4>, AttentionError>,
{
    let lengths = context.lengths();
    if lengths.is_uniform() || context.batch() == 1 {
        tracing::trace!(len = lengths.first, "uniform context, no batch split");
        attend_unsplit(queries, context, attend_one)
    } else {
        tracing::trace!(
            t0 = lengths.first,
            t1 = lengths.second,
            "asymmetric context, processing batch halves independently"
        );
        attend_halved(queries, context, attend_one)
    }
}

/// The no-split path: one kernel call over the whole batch.
pub fn attend_unsplit<B, F>(
    queries: Tensor<B, 4>,
    context: &CfgContext<B>,
    attend_one: &F,
) -> Result<Tensor<B, 4>, AttentionError>
where
    B: Backend,
    F: Fn(Tensor<B, 4>, Tensor<B, 4>, Tensor<B, 4>) -> Result<Tensor<B, 4>, AttentionError>,
{
    let (keys, values) = context.full();
    attend_one(queries, keys, values)
}

/// The split path: each CFG half runs against its own context length, first
/// half first, outputs concatenated along the batch axis in original order.
pub fn attend_halved<B, F>(
    queries: Tensor<B, 4>,
    context: &CfgContext<B>,
    attend_one: &F,
) -> Result<Tensor<B, 4>, AttentionError>
where
    B: Backend,
    F: Fn(Tensor<B, 4>, Tensor<B, 4>, Tensor<B, 4>) -> Result<Tensor<B, 4>, AttentionError>,
{
    let [batch, heads, seq_q, head_dim] = queries.dims();
    let half = batch / 2;

    let (k0, v0) = context.half(0);
    let (k1, v1) = context.half(1);

    let q0 = queries.clone().slice([0..half, 0..heads, 0..seq_q, 0..head_dim]);
    let q1 = queries.slice([half..batch, 0..heads, 0..seq_q, 0..head_dim]);

    let out0 = attend_one(q0, k0, v0)?;
    let out1 = attend_one(q1, k1, v1)?;

    Ok(Tensor::cat(vec![out0, out1], 0))
}
