use agentcache_core::admission::HeuristicGate;
use agentcache_core::backend::{HashingEmbedder, InMemoryKvStore, InMemoryVectorStore, Usage};
use agentcache_core::cache::{
    fingerprint, CacheBackends, CacheConfig, CachePayload, LookupContext, TieredCache,
};
use agentcache_core::maintenance::ScoringWeights;
use agentcache_core::memory::{binarize, AssociativeMemory, DEFAULT_BETA};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use tokio::sync::RwLock;

fn bench_fingerprint(c: &mut Criterion) {
    let query = "How do I configure   a reverse proxy for WebSocket traffic?";
    c.bench_function("fingerprint", |b| {
        b.iter(|| fingerprint(black_box(query), "openai", "gpt-4o"))
    });
}

fn bench_recall(c: &mut Criterion) {
    let mut group = c.benchmark_group("hopfield_recall");
    for n in [64usize, 256] {
        let embedder = HashingEmbedder::new(n);
        let mut memory = AssociativeMemory::new(n, DEFAULT_BETA);
        let patterns: Vec<Vec<f32>> = (0..memory.capacity().max(1))
            .map(|i| binarize(&embedder.embed_sync(&format!("stored pattern number {}", i))))
            .collect();
        for pattern in &patterns {
            memory.learn(pattern).unwrap();
        }
        let probe = patterns[0].clone();

        group.bench_with_input(BenchmarkId::from_parameter(n), &probe, |b, probe| {
            b.iter(|| memory.recall(black_box(probe), 3).unwrap())
        });
    }
    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let cache = TieredCache::new(
        CacheConfig::testing(),
        CacheBackends {
            kv: Arc::new(InMemoryKvStore::new()),
            semantic: Arc::new(InMemoryVectorStore::new()),
            episodic: Arc::new(InMemoryVectorStore::new()),
            embedder: Arc::new(HashingEmbedder::new(256)),
        },
        Arc::new(HeuristicGate::default()),
        Arc::new(RwLock::new(AssociativeMemory::new(256, DEFAULT_BETA))),
        Arc::new(RwLock::new(ScoringWeights::default())),
    );
    let ctx = LookupContext::new("openai", "gpt-4o");

    runtime.block_on(async {
        for i in 0..200 {
            let payload = CachePayload {
                content: format!("Stored answer number {} with enough text", i),
                usage: Usage::default(),
                provider: "openai".into(),
                model: "gpt-4o".into(),
            };
            cache
                .store(&format!("question number {}", i), payload, &ctx, None)
                .await
                .unwrap()
                .wait()
                .await
                .unwrap();
        }
    });

    c.bench_function("lookup_l1_hit", |b| {
        b.to_async(&runtime)
            .iter(|| async { cache.lookup("question number 7", &ctx).await.unwrap() })
    });
    c.bench_function("lookup_semantic_path", |b| {
        b.to_async(&runtime)
            .iter(|| async { cache.lookup("an entirely new question", &ctx).await.unwrap() })
    });
}

criterion_group!(benches, bench_fingerprint, bench_recall, bench_lookup);
criterion_main!(benches);
