//! Benchmarks for the month index
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use photomonths::index::{IndexConfig, MonthIndex};
use photomonths::month::{MonthKey, MonthZone};
use photomonths::source::{Asset, IngestAdapter, MemoryLibrary, RawAsset};
use std::sync::Arc;
use tokio::runtime::Runtime;

/// 2024-03-01T00:00:00Z
const MARCH_2024: i64 = 1_709_251_200_000;

fn library(count: usize) -> Arc<MemoryLibrary> {
    Arc::new(MemoryLibrary::with_assets((0..count).map(|i| {
        RawAsset::taken(format!("asset-{:06}", i), MARCH_2024 + i as i64 * 60_000)
    })))
}

fn index_over(lib: Arc<MemoryLibrary>) -> MonthIndex {
    let adapter = IngestAdapter::new(lib, MonthZone::Utc);
    MonthIndex::new(adapter, IndexConfig::default())
}

fn march() -> MonthKey {
    "2024-03".parse().unwrap()
}

fn bench_cold_load(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("cold_load");

    for size in [1_000, 10_000] {
        let lib = library(size);
        group.throughput(Throughput::Elements(size as u64));

        group.bench_function(format!("ensure_loaded_{}", size), |b| {
            b.to_async(&rt).iter(|| {
                let index = index_over(lib.clone());
                async move { index.ensure_loaded(march(), size).await.unwrap() }
            })
        });
    }

    group.finish();
}

fn bench_warm_page(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let index = index_over(library(10_000));
    rt.block_on(index.ensure_loaded(march(), 10_000)).unwrap();

    let mut group = c.benchmark_group("warm_page");

    for offset in [0, 5_000, 9_900] {
        group.bench_function(format!("page_at_{}", offset), |b| {
            b.to_async(&rt).iter(|| async {
                index.page(march(), black_box(offset), 100).await.unwrap()
            })
        });
    }

    group.bench_function("count_cached", |b| {
        b.to_async(&rt)
            .iter(|| async { index.count(march()).await.unwrap() })
    });

    group.finish();
}

fn bench_incremental(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let index = index_over(library(10_000));
    rt.block_on(index.ensure_loaded(march(), 10_000)).unwrap();

    let mut group = c.benchmark_group("incremental");

    group.bench_function("insert_then_remove", |b| {
        let asset = Asset::new("bench-insert", MARCH_2024 + 3_600_000 * 24 * 10 + 1);
        b.to_async(&rt).iter(|| async {
            index.apply_insert(black_box(&asset)).await.unwrap();
            index.apply_remove("bench-insert", None).await
        })
    });

    group.finish();
}

criterion_group!(benches, bench_cold_load, bench_warm_page, bench_incremental);
criterion_main!(benches);
