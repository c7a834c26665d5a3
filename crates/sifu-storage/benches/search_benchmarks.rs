//! Benchmarks for ranked knowledge search.
//!
//! Uses 1,000 entries by default. Set `BENCH_FULL_SCALE=1` to run against
//! 20,000 entries:
//!
//! ```bash
//! BENCH_FULL_SCALE=1 cargo bench -p sifu-storage
//! ```

use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};

use sifu_core::config::KnowledgeConfig;
use sifu_core::types::NewKnowledge;
use sifu_storage::KnowledgeStore;

const CI_ENTRY_COUNT: usize = 1_000;
const FULL_SCALE_ENTRY_COUNT: usize = 20_000;

const TOPICS: &[&str] = &["weather", "geography", "cooking", "music", "rust"];

fn entry_count() -> usize {
    if std::env::var("BENCH_FULL_SCALE").is_ok() {
        FULL_SCALE_ENTRY_COUNT
    } else {
        CI_ENTRY_COUNT
    }
}

fn generate_entry(index: usize) -> NewKnowledge {
    let topic = TOPICS[index % TOPICS.len()];
    NewKnowledge::new(format!(
        "Fact {} about {}: the assistant learned this while answering questions \
         about {} during a long conversation with a curious user",
        index, topic, topic
    ))
    .with_tags([topic])
    .with_metadata("index", index as u64)
}

fn build_populated_store(rt: &tokio::runtime::Runtime, count: usize) -> KnowledgeStore {
    let store = KnowledgeStore::in_memory(KnowledgeConfig::default());
    for i in 0..count {
        rt.block_on(store.add(generate_entry(i)))
            .expect("add failed");
    }
    assert_eq!(store.len(), count, "Store should contain all entries");
    store
}

fn bench_search(c: &mut Criterion) {
    let count = entry_count();
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime");
    let store = build_populated_store(&rt, count);

    let mut group = c.benchmark_group("knowledge_search");
    group.sample_size(50);
    group.measurement_time(Duration::from_secs(10));

    group.bench_function(format!("top10_{}entries", count), |b| {
        b.iter(|| {
            let hits = store
                .search_scored("what is the weather like", Some(10))
                .expect("search failed");
            assert!(!hits.is_empty(), "Search should return results");
            hits
        });
    });

    group.bench_function(format!("miss_{}entries", count), |b| {
        b.iter(|| {
            store
                .search_scored("quantum chromodynamics", Some(10))
                .expect("search failed")
        });
    });

    group.bench_function(format!("find_similar_{}entries", count), |b| {
        b.iter(|| {
            store
                .find_similar("fact 42 about weather", 0.9)
                .expect("find_similar failed")
        });
    });

    group.finish();
}

criterion_group!(benches, bench_search);
criterion_main!(benches);
