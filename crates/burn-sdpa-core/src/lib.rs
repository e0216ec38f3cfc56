//! CFG-Aware Scaled-Dot-Product Attention for Diffusion Models
//!
//! Diffusion backbones (UNet cross-attention, DiT blocks) share one
//! attention engine with three recurring complications: the two
//! classifier-free-guidance halves of a batch may attend against
//! conditioning sequences of different lengths, adapters contribute extra
//! additive attention terms, and half-precision graphs need a wider type for
//! the dot product. This crate implements that engine once, over any burn
//! backend.
//!
//! # Modules
//!
//! - [`heads`] - Split/merge between channel and per-head layouts
//! - [`precision`] - Native vs upcast-for-dot precision policy
//! - [`context`] - Packed key/value buffers with per-half context lengths
//! - [`split`] - Batch splitting for asymmetric CFG halves
//! - [`kernel`] - Execution strategies and the materialized kernel
//! - [`runtime`] - The fused-kernel boundary trait and reference runtime
//! - [`adapter`] - Additive adapter attention terms
//! - [`attention`] - The composed [`attend`] entry point
//!
//! # Example
//!
//! ```ignore
//! use burn_sdpa_core::{attend, CfgContext, ContextLengths, ReferenceSdpa, SdpaConfig};
//!
//! // queries [batch, heads, tokens, head_dim]; keys/values packed at the
//! // longer of the two CFG halves' context lengths
//! let context = CfgContext::packed(keys, values, ContextLengths::per_half(77, 154))?;
//! let out = attend(
//!     &SdpaConfig::materialized(),
//!     &ReferenceSdpa,
//!     (head_dim as f64).powf(-0.5),
//!     queries,
//!     &context,
//!     &adapter_terms,
//! )?;
//! ```

pub mod adapter;
pub mod attention;
pub mod context;
pub mod error;
pub mod heads;
pub mod kernel;
pub mod precision;
pub mod runtime;
pub mod split;

pub use adapter::AdapterTerm;
pub use attention::attend;
pub use context::{CfgContext, ContextLengths};
pub use error::AttentionError;
pub use heads::{merge_heads, split_heads};
pub use kernel::{causal_mask, AttentionStrategy, SdpaConfig, DEFAULT_MICROLOOP_THRESHOLD};
pub use precision::{FullPrecision, PrecisionMode};
pub use runtime::{FusedOptions, FusedSdpa, NoFusedKernels, ReferenceSdpa};
