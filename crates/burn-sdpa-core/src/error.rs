use thiserror::Error;

use crate::kernel::AttentionStrategy;

/// Errors surfaced by the attention engine.
///
/// All variants indicate a bug in the calling graph-construction code, not a
/// runtime condition to recover from. They are raised before any kernel is
/// dispatched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttentionError {
    #[error("Shape mismatch for {tensor}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        tensor: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Attention strategy {0:?} is not available on this runtime")]
    UnsupportedStrategy(AttentionStrategy),

    #[error("Context lengths ({t0}, {t1}) differ but batch {batch} has no equal halves")]
    OddBatchForAsymmetricContext { batch: usize, t0: usize, t1: usize },
}
