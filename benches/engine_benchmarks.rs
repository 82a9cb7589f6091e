use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use embedding_service::validation::normalize_text;
use embedding_service::{
    EmbeddingCache, EmbeddingService, Fingerprint, HashBackend, Priority, ResultReport,
    ServiceConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

const DIMENSION: usize = 384;

fn bench_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.embedding.dimension = DIMENSION;
    config.queue.max_lane_depth = 100_000;
    config.cache.max_size = 100_000;
    config
}

/// Benchmark fingerprinting of normalized text
fn bench_fingerprint(c: &mut Criterion) {
    let mut group = c.benchmark_group("fingerprint");

    for words in [10, 100, 1000] {
        let text = "lorem ipsum ".repeat(words / 2);
        group.throughput(Throughput::Bytes(text.len() as u64));
        group.bench_with_input(BenchmarkId::new("normalize_and_hash", words), &text, |b, text| {
            b.iter(|| black_box(Fingerprint::of(&normalize_text(black_box(text)))))
        });
    }

    group.finish();
}

/// Benchmark cache hits and inserts at different fill levels
fn bench_cache_operations(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let backend = HashBackend::new(DIMENSION);

    let mut group = c.benchmark_group("cache_operations");
    group.throughput(Throughput::Elements(1));

    for size in [100, 1_000, 10_000] {
        let cache = EmbeddingCache::new(size, Duration::from_secs(3600)).unwrap();
        let keys: Vec<Fingerprint> = (0..size)
            .map(|i| Fingerprint::of(&format!("text {}", i)))
            .collect();
        rt.block_on(async {
            for key in &keys {
                cache.set(key.clone(), backend.embed(key.as_str())).await;
            }
        });

        group.bench_with_input(BenchmarkId::new("get_hit", size), &size, |b, _| {
            let mut i = 0;
            b.to_async(&rt).iter(|| {
                i = (i + 1) % keys.len();
                let key = &keys[i];
                let cache = &cache;
                async move { black_box(cache.get(key).await) }
            })
        });

        let vector = backend.embed("insert");
        group.bench_with_input(BenchmarkId::new("set_with_eviction", size), &size, |b, _| {
            let mut i = 0u64;
            b.to_async(&rt).iter(|| {
                i += 1;
                let key = Fingerprint::of(&format!("fresh {}", i));
                let vector = vector.clone();
                let cache = &cache;
                async move { cache.set(key, vector).await }
            })
        });
    }

    group.finish();
}

/// Benchmark admission when every request is answered from the cache
fn bench_cached_submit(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let service = rt.block_on(async {
        let service = EmbeddingService::new(bench_config(), Arc::new(HashBackend::new(DIMENSION)))
            .await
            .unwrap();
        service.embed_sync("warm cache entry", true).await.unwrap();
        service
    });

    let mut group = c.benchmark_group("admission");
    group.throughput(Throughput::Elements(1));
    group.bench_function("submit_cache_hit", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(service.submit("warm cache entry", Priority::High).await) })
    });
    group.finish();
}

/// Benchmark end-to-end throughput through the dispatcher
fn bench_dispatch_throughput(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("dispatch_throughput");
    group.sample_size(20);

    for batch in [10, 100] {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::new("batch", batch), &batch, |b, &batch| {
            b.to_async(&rt).iter(|| async move {
                let service =
                    EmbeddingService::new(bench_config(), Arc::new(HashBackend::new(DIMENSION)))
                        .await
                        .unwrap();
                let handle = service.start().unwrap();

                let mut ids = Vec::with_capacity(batch);
                for i in 0..batch {
                    let priority = Priority::ALL[i % 3];
                    ids.push(service.submit(&format!("document {}", i), priority).await.unwrap());
                }
                for id in ids {
                    let result = service.wait_for_result(id, Duration::from_secs(10)).await.unwrap();
                    assert!(matches!(result, ResultReport::Ready { .. }));
                }

                handle.shutdown().await.unwrap();
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_fingerprint,
    bench_cache_operations,
    bench_cached_submit,
    bench_dispatch_throughput
);
criterion_main!(benches);
