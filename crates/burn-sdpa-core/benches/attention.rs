//! Benchmark attention strategies and materialized dispatch regimes
//!
//! Run with:
//!   cargo bench -p burn-sdpa-core --bench attention

use burn::prelude::*;
use burn_ndarray::NdArray;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use burn_sdpa_core::{attend, CfgContext, ReferenceSdpa, SdpaConfig};

type BenchBackend = NdArray<f32>;

fn inputs(
    batch: usize,
    heads: usize,
    seq_q: usize,
    seq_k: usize,
    head_dim: usize,
) -> (Tensor<BenchBackend, 4>, CfgContext<BenchBackend>) {
    let device = Default::default();
    let fill = |len: usize, step: f32| -> Vec<f32> {
        (0..len).map(|i| (i as f32 * step).sin()).collect()
    };

    let q = Tensor::<BenchBackend, 1>::from_floats(
        fill(batch * heads * seq_q * head_dim, 0.13).as_slice(),
        &device,
    )
    .reshape([batch, heads, seq_q, head_dim]);
    let k = Tensor::<BenchBackend, 1>::from_floats(
        fill(batch * heads * seq_k * head_dim, 0.29).as_slice(),
        &device,
    )
    .reshape([batch, heads, seq_k, head_dim]);
    let v = k.clone() * 0.5;

    (q, CfgContext::uniform(k, v).unwrap())
}

fn bench_strategies(c: &mut Criterion) {
    // latent self-attention and text cross-attention shapes at 256px SD scale
    let configs = [
        ("self_32x32", 2, 8, 1024, 1024, 40),
        ("cross_text", 2, 8, 1024, 77, 40),
    ];

    let mut group = c.benchmark_group("attention_strategies");
    group.sample_size(10);

    for (name, batch, heads, seq_q, seq_k, head_dim) in configs {
        let (q, context) = inputs(batch, heads, seq_q, seq_k, head_dim);
        let scale = (head_dim as f64).powf(-0.5);

        for cfg in [SdpaConfig::materialized(), SdpaConfig::fused()] {
            group.bench_with_input(
                BenchmarkId::new(cfg.strategy.name(), name),
                &cfg,
                |bencher, cfg| {
                    bencher.iter(|| {
                        attend(cfg, &ReferenceSdpa, scale, q.clone(), &context, &[]).unwrap()
                    });
                },
            );
        }
    }

    group.finish();
}

fn bench_microloop_regimes(c: &mut Criterion) {
    let (q, context) = inputs(2, 8, 1024, 1024, 40);
    let scale = (40f64).powf(-0.5);

    let mut group = c.benchmark_group("materialized_dispatch");
    group.sample_size(10);

    // b*h = 16: threshold 0 forces one batched matmul, the default keeps the
    // per-(batch, head) loop
    for (name, threshold) in [("batched", 0usize), ("microloop", 256usize)] {
        let cfg = SdpaConfig::materialized().with_microloop_threshold(threshold);
        group.bench_function(name, |bencher| {
            bencher.iter(|| attend(&cfg, &ReferenceSdpa, scale, q.clone(), &context, &[]).unwrap());
        });
    }

    group.finish();
}

criterion_group!(benches, bench_strategies, bench_microloop_regimes);
criterion_main!(benches);
