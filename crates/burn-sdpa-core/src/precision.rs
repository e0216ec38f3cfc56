//! Precision policy for the attention dot product
//!
//! Diffusion checkpoints commonly run half precision, where long-context
//! softmax sums lose enough mantissa to shift samples. `UpcastForDot` widens
//! the dot product and softmax to the backend's full-precision float type and
//! restores the native type on the final output.
//!
//! The policy is orthogonal to the execution strategy: the materialized
//! kernel is bridged to [`FullPrecision`], while fused kernels receive the
//! request through their accumulator-precision option (see
//! [`crate::runtime::FusedOptions`]).

use burn::prelude::*;
use burn::tensor::backend::BackendBridge;

/// How queries, keys and values are typed for the dot product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrecisionMode {
    /// Compute in the graph's native float type.
    #[default]
    Native,
    /// Widen q/k/v and the softmax for the dot product, casting the output
    /// back to the native type.
    UpcastForDot,
}

impl PrecisionMode {
    /// Get a human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            PrecisionMode::Native => "native",
            PrecisionMode::UpcastForDot => "upcast_for_dot",
        }
    }

    pub fn is_upcast(&self) -> bool {
        matches!(self, PrecisionMode::UpcastForDot)
    }
}

/// The backend's full-precision counterpart, reached through burn's
/// precision bridge.
pub type FullPrecision<B> = <<B as Backend>::FullPrecisionBridge as BackendBridge<B>>::Target;

/// Widen a tensor to the full-precision backend.
pub fn upcast<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Tensor<FullPrecision<B>, D> {
    tensor.into_full_precision()
}

/// Cast a full-precision tensor back to the native backend type.
///
/// For values exactly representable in the narrower type this is numerically
/// a no-op, so `restore(upcast(x)) == x` holds for such inputs.
pub fn restore<B: Backend, const D: usize>(tensor: Tensor<FullPrecision<B>, D>) -> Tensor<B, D> {
    Tensor::from_full_precision(tensor)
}
