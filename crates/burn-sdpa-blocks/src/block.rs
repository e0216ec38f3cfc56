//! The attention block: projections around the attention engine

use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;

use burn_sdpa_core::{
    attend, split_heads, AdapterTerm, AttentionError, AttentionStrategy, CfgContext,
    ContextLengths, FusedOptions, FusedSdpa, SdpaConfig,
};

/// Configuration for [`AttentionBlock`]
#[derive(Debug, Clone)]
pub struct AttentionBlockConfig {
    /// Dimension of the query stream
    pub query_dim: usize,
    /// Number of attention heads
    pub num_heads: usize,
    /// Dimension per attention head
    pub head_dim: usize,
    /// Dimension of the conditioning stream (None for self-attention blocks)
    pub context_dim: Option<usize>,
}

impl AttentionBlockConfig {
    /// Self-attention block: keys and values come from the query stream.
    pub fn new(query_dim: usize, num_heads: usize, head_dim: usize) -> Self {
        Self {
            query_dim,
            num_heads,
            head_dim,
            context_dim: None,
        }
    }

    /// Cross-attention block against a conditioning stream.
    pub fn with_context_dim(mut self, context_dim: usize) -> Self {
        self.context_dim = Some(context_dim);
        self
    }

    /// Initialize the block
    pub fn init<B: Backend>(&self, device: &B::Device) -> AttentionBlock<B> {
        let inner_dim = self.num_heads * self.head_dim;
        let context_dim = self.context_dim.unwrap_or(self.query_dim);

        AttentionBlock {
            to_q: LinearConfig::new(self.query_dim, inner_dim)
                .with_bias(false)
                .init(device),
            to_k: LinearConfig::new(context_dim, inner_dim)
                .with_bias(false)
                .init(device),
            to_v: LinearConfig::new(context_dim, inner_dim)
                .with_bias(false)
                .init(device),
            to_out: LinearConfig::new(inner_dim, self.query_dim).init(device),
            num_heads: self.num_heads,
            scale: (self.head_dim as f64).powf(-0.5),
        }
    }
}

/// Multi-head attention block with q/k/v and output projections.
///
/// One instance serves one role: a block built without `context_dim` is used
/// through [`AttentionBlock::forward_self`], a block built with it through
/// [`AttentionBlock::forward_cross`].
#[derive(Module, Debug)]
pub struct AttentionBlock<B: Backend> {
    to_q: Linear<B>,
    to_k: Linear<B>,
    to_v: Linear<B>,
    to_out: Linear<B>,
    #[module(skip)]
    num_heads: usize,
    #[module(skip)]
    scale: f64,
}

impl<B: Backend> AttentionBlock<B> {
    /// Self-attention: queries, keys and values all derived from `x`.
    ///
    /// # Arguments
    ///
    /// * `x` - Input sequence `[batch, tokens, query_dim]`
    /// * `cfg` - Attention execution configuration (`cfg.causal` is honored)
    /// * `runtime` - Fused-kernel provider
    pub fn forward_self(
        &self,
        x: Tensor<B, 3>,
        cfg: &SdpaConfig,
        runtime: &dyn FusedSdpa<B>,
    ) -> Result<Tensor<B, 3>, AttentionError> {
        let q = split_heads(self.to_q.forward(x.clone()), self.num_heads);
        let k = split_heads(self.to_k.forward(x.clone()), self.num_heads);
        let v = split_heads(self.to_v.forward(x), self.num_heads);

        let context = CfgContext::uniform(k, v)?;
        self.finish(cfg, runtime, q, &context, &[])
    }

    /// Cross-attention against a packed conditioning stream.
    ///
    /// # Arguments
    ///
    /// * `x` - Query sequence `[batch, tokens, query_dim]`
    /// * `context` - Conditioning tokens `[batch, max_len, context_dim]`,
    ///   both CFG halves packed at the longer half's stride
    /// * `lengths` - Per-half conditioning lengths
    /// * `adapters` - Additive key/value terms, already projected per head
    pub fn forward_cross(
        &self,
        x: Tensor<B, 3>,
        context: Tensor<B, 3>,
        lengths: ContextLengths,
        adapters: &[AdapterTerm<B>],
        cfg: &SdpaConfig,
        runtime: &dyn FusedSdpa<B>,
    ) -> Result<Tensor<B, 3>, AttentionError> {
        let q = split_heads(self.to_q.forward(x), self.num_heads);

        // project the whole packed buffer; each half addresses a prefix view
        let k = split_heads(self.to_k.forward(context.clone()), self.num_heads);
        let v = split_heads(self.to_v.forward(context), self.num_heads);

        let context = CfgContext::packed(k, v, lengths)?;
        self.finish(cfg, runtime, q, &context, adapters)
    }

    fn finish(
        &self,
        cfg: &SdpaConfig,
        runtime: &dyn FusedSdpa<B>,
        q: Tensor<B, 4>,
        context: &CfgContext<B>,
        adapters: &[AdapterTerm<B>],
    ) -> Result<Tensor<B, 3>, AttentionError> {
        let seq_q = q.dims()[2];

        // FusedScaled may fold the head-merge projection into the kernel
        // call; adapter sums land before the projection, so only the plain
        // uniform case qualifies
        if cfg.strategy == AttentionStrategy::FusedScaled
            && runtime.is_available()
            && context.lengths().is_uniform()
            && adapters.is_empty()
            && (!cfg.causal || context.lengths().first == seq_q)
        {
            let (k, v) = context.full();
            let options = FusedOptions {
                upcast: cfg.precision.is_upcast(),
                causal: cfg.causal,
            };
            return runtime.sdpa_projected(q, k, v, self.scale, &options, &self.to_out);
        }

        let out = attend(cfg, runtime, self.scale, q, context, adapters)?;
        Ok(self.to_out.forward(out))
    }
}
