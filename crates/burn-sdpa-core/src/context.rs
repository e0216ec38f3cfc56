//! Packed key/value context for CFG batches
//!
//! Classifier-free guidance runs two logical conditions per sample in one
//! batch, and the two halves may carry conditioning sequences of different
//! lengths. Rather than padding-with-masking or repacking, the caller packs
//! both halves' key/value buffers at a uniform stride equal to the longer
//! context length; the shorter half simply addresses a prefix of its slot.
//! [`CfgContext`] is the typed view over that convention.

use burn::prelude::*;

use crate::error::AttentionError;
use crate::precision::FullPrecision;

/// Key/value token counts for the two logical halves of a CFG batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextLengths {
    /// Context length of the first batch half.
    pub first: usize,
    /// Context length of the second batch half.
    pub second: usize,
}

impl ContextLengths {
    /// Both halves share one context length (self-attention, or
    /// cross-attention against a single conditioning sequence).
    pub fn uniform(len: usize) -> Self {
        Self {
            first: len,
            second: len,
        }
    }

    /// Distinct per-half context lengths.
    pub fn per_half(first: usize, second: usize) -> Self {
        Self { first, second }
    }

    pub fn is_uniform(&self) -> bool {
        self.first == self.second
    }

    /// The packing stride: the longer of the two context lengths.
    pub fn max_len(&self) -> usize {
        self.first.max(self.second)
    }
}

/// Packed key/value buffers for one attention request.
///
/// Buffers are kernel layout `[batch, heads, max_len, head_dim]` and stay
/// owned by the caller's graph; [`CfgContext::half`] carves non-owning
/// prefix sub-views instead of repacking.
#[derive(Debug, Clone)]
pub struct CfgContext<B: Backend> {
    keys: Tensor<B, 4>,
    values: Tensor<B, 4>,
    lengths: ContextLengths,
}

impl<B: Backend> CfgContext<B> {
    /// Context with one shared length, taken from the token dimension.
    pub fn uniform(keys: Tensor<B, 4>, values: Tensor<B, 4>) -> Result<Self, AttentionError> {
        let dims = keys.dims();
        check_matching_dims("values", dims, values.dims())?;

        Ok(Self {
            lengths: ContextLengths::uniform(dims[2]),
            keys,
            values,
        })
    }

    /// Context packed at the max-length stride with per-half lengths.
    ///
    /// Requires the token dimension to equal `lengths.max_len()`, and an even
    /// batch when the lengths differ.
    pub fn packed(
        keys: Tensor<B, 4>,
        values: Tensor<B, 4>,
        lengths: ContextLengths,
    ) -> Result<Self, AttentionError> {
        let dims = keys.dims();
        check_matching_dims("values", dims, values.dims())?;

        if dims[2] != lengths.max_len() {
            return Err(AttentionError::ShapeMismatch {
                tensor: "keys",
                expected: vec![dims[0], dims[1], lengths.max_len(), dims[3]],
                actual: dims.to_vec(),
            });
        }
        if !lengths.is_uniform() && dims[0] % 2 != 0 {
            return Err(AttentionError::OddBatchForAsymmetricContext {
                batch: dims[0],
                t0: lengths.first,
                t1: lengths.second,
            });
        }

        Ok(Self {
            keys,
            values,
            lengths,
        })
    }

    pub fn lengths(&self) -> ContextLengths {
        self.lengths
    }

    pub fn batch(&self) -> usize {
        self.keys.dims()[0]
    }

    /// Dimensions of the packed buffers.
    pub fn dims(&self) -> [usize; 4] {
        self.keys.dims()
    }

    /// Whole-batch view for the no-split path, trimmed to the first half's
    /// length. Only meaningful when the lengths are uniform.
    pub fn full(&self) -> (Tensor<B, 4>, Tensor<B, 4>) {
        let [batch, heads, max_len, head_dim] = self.keys.dims();
        let len = self.lengths.first;

        if len == max_len {
            (self.keys.clone(), self.values.clone())
        } else {
            (
                self.keys.clone().slice([0..batch, 0..heads, 0..len, 0..head_dim]),
                self.values.clone().slice([0..batch, 0..heads, 0..len, 0..head_dim]),
            )
        }
    }

    /// Strided sub-view for CFG half `index` (0 or 1): its batch rows and
    /// the prefix of its max-length-strided key/value slot.
    pub fn half(&self, index: usize) -> (Tensor<B, 4>, Tensor<B, 4>) {
        assert!(index < 2, "a CFG batch has exactly two halves");
        let [batch, heads, _, head_dim] = self.keys.dims();
        let half = batch / 2;

        let (rows, len) = if index == 0 {
            (0..half, self.lengths.first)
        } else {
            (half..batch, self.lengths.second)
        };

        (
            self.keys.clone().slice([rows.clone(), 0..heads, 0..len, 0..head_dim]),
            self.values.clone().slice([rows, 0..heads, 0..len, 0..head_dim]),
        )
    }

    pub(crate) fn into_full_precision(self) -> CfgContext<FullPrecision<B>> {
        CfgContext {
            keys: self.keys.into_full_precision(),
            values: self.values.into_full_precision(),
            lengths: self.lengths,
        }
    }
}

fn check_matching_dims(
    tensor: &'static str,
    expected: [usize; 4],
    actual: [usize; 4],
) -> Result<(), AttentionError> {
    if expected != actual {
        return Err(AttentionError::ShapeMismatch {
            tensor,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        });
    }
    Ok(())
}
