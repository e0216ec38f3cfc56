//! Transformer Attention Blocks for Diffusion Backbones
//!
//! Composes `burn-sdpa-core` into the attention module used by every
//! transformer block in a diffusion graph: linear q/k/v projections, the
//! CFG-aware attention engine, and the unifying output projection, with
//! self-attention and cross-attention entry points.

pub mod block;

pub use block::{AttentionBlock, AttentionBlockConfig};
