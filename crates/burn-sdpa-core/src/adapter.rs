//! Additive attention terms from adapters
//!
//! IP-Adapter-style conditioning contributes extra key/value pairs that are
//! attended with the same queries and scale as the primary term, each
//! producing an independent softmax-normalized output that is summed into
//! the primary attention output before the unifying projection.

use burn::prelude::*;

use crate::error::AttentionError;
use crate::precision::FullPrecision;

/// One auxiliary key/value pair in kernel layout `[batch, heads, tokens,
/// head_dim]`. Its token count is independent of the primary context.
#[derive(Debug, Clone)]
pub struct AdapterTerm<B: Backend> {
    keys: Tensor<B, 4>,
    values: Tensor<B, 4>,
}

impl<B: Backend> AdapterTerm<B> {
    pub fn new(keys: Tensor<B, 4>, values: Tensor<B, 4>) -> Result<Self, AttentionError> {
        if keys.dims() != values.dims() {
            return Err(AttentionError::ShapeMismatch {
                tensor: "adapter values",
                expected: keys.dims().to_vec(),
                actual: values.dims().to_vec(),
            });
        }
        Ok(Self { keys, values })
    }

    pub fn keys(&self) -> &Tensor<B, 4> {
        &self.keys
    }

    pub fn values(&self) -> &Tensor<B, 4> {
        &self.values
    }

    /// Token count of this term's key/value sequence.
    pub fn context_len(&self) -> usize {
        self.keys.dims()[2]
    }

    pub(crate) fn into_full_precision(self) -> AdapterTerm<FullPrecision<B>> {
        AdapterTerm {
            keys: self.keys.into_full_precision(),
            values: self.values.into_full_precision(),
        }
    }
}

/// Add each term's attention output into `primary`.
///
/// Terms are folded strictly in insertion order so the floating-point sum is
/// reproducible across runs. Zero terms returns `primary` unchanged.
pub fn inject<B, F>(
    primary: Tensor<B, 4>,
    queries: &Tensor<B, 4>,
    terms: &[AdapterTerm<B>],
    attend_one: &F,
) -> Result<Tensor<B, 4>, AttentionError>
where
    B: Backend,
    F: Fn(Tensor<B, 4>, Tensor<B, 4>, Tensor<B, 4>) -> Result<Tensor<B, 4>, AttentionError>,
{
    let mut out = primary;
    for term in terms {
        let extra = attend_one(queries.clone(), term.keys.clone(), term.values.clone())?;
        out = out + extra;
    }
    Ok(out)
}
