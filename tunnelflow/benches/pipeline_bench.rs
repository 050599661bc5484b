//! Benchmarks for pipeline execution.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tunnelflow::prelude::*;

fn inline_chain(depth: usize) -> Pipeline<u64, u64> {
    let mut builder = Pipeline::builder("bench").stage(FnStage::map("stage-0", |x: u64| x + 1));
    for i in 1..depth {
        builder = builder.stage(FnStage::map(format!("stage-{i}"), |x: u64| x + 1));
    }
    builder.build().expect("pipeline builds")
}

fn pipeline_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("runtime starts");
    let mut group = c.benchmark_group("inline_chain");

    for depth in [1_usize, 4, 16] {
        let pipeline = runtime.block_on(async {
            let pipeline = inline_chain(depth);
            pipeline.init(PipelineContext::new()).expect("init queued");
            pipeline.wait_initialized().await.expect("init finished");
            pipeline
        });

        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            b.iter(|| runtime.block_on(pipeline.process(black_box(7))));
        });
    }
    group.finish();
}

criterion_group!(benches, pipeline_benchmark);
criterion_main!(benches);
