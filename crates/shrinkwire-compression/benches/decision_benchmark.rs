//! Decision path benchmarks
//!
//! Run with: cargo bench --package shrinkwire-compression

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use shrinkwire_compression::compressor::builtin_provider;
use shrinkwire_compression::{
    CompressionLevel, CompressionMetric, DecisionEngine, MetricsStore, ProviderRegistry,
};
use std::sync::Arc;

const ROUTE: &str = "/api/items/{id}";

fn populated_store() -> Arc<MetricsStore> {
    let store = Arc::new(MetricsStore::new());
    for encoding in ["br", "gzip", "deflate"] {
        for level in CompressionLevel::ALL {
            // Powers of three never share a dedup band
            let mut size = 64u64;
            while size < 64 * 1024 * 1024 {
                store.upsert(CompressionMetric {
                    encoding: encoding.to_string(),
                    route: ROUTE.to_string(),
                    level,
                    data_size: size,
                    ratio: 0.35,
                    speed: 250.0,
                });
                size *= 3;
            }
        }
    }
    store
}

fn bench_closest(c: &mut Criterion) {
    let store = populated_store();

    c.bench_function("metrics_closest", |b| {
        b.iter(|| {
            let metric = store.closest(
                black_box(ROUTE),
                black_box("gzip"),
                CompressionLevel::Optimal,
                black_box(50_000),
            );
            black_box(metric);
        });
    });
}

fn bench_decide(c: &mut Criterion) {
    let engine = DecisionEngine::new(
        Arc::new(ProviderRegistry::with_defaults()),
        populated_store(),
        CompressionLevel::ALL.to_vec(),
    );
    let accepted = vec!["gzip".to_string(), "br".to_string(), "deflate".to_string()];

    c.bench_function("engine_decide", |b| {
        b.iter(|| {
            let decision = engine.decide(black_box(12.0), ROUTE, black_box(50_000), &accepted);
            black_box(decision);
        });
    });
}

fn bench_compress(c: &mut Criterion) {
    let mut group = c.benchmark_group("compress_fastest");
    let data = "{\"id\":42,\"name\":\"widget\",\"price\":9.99}\n".repeat(1024).into_bytes();
    group.throughput(Throughput::Bytes(data.len() as u64));

    for encoding in ["br", "gzip", "deflate", "zstd"] {
        let Some(provider) = builtin_provider(encoding) else {
            continue;
        };
        group.bench_with_input(BenchmarkId::from_parameter(encoding), &data, |b, data| {
            b.iter(|| {
                let compressed = provider.compress(black_box(data), CompressionLevel::Fastest);
                black_box(compressed)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_closest, bench_decide, bench_compress);
criterion_main!(benches);
