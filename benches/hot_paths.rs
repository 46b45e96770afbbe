//! Hot path benchmarks for profiling-driven optimization.
//!
//! Run with: `cargo bench --bench hot_paths`
//! Compare baselines: `cargo bench --bench hot_paths -- --baseline main`
//!
//! These benchmarks measure the per-batch and per-scan costs that dominate
//! archive throughput: JSON+gzip encoding, decoding, metadata extraction,
//! key formatting and in-memory query evaluation.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use flow_archive::flow::{Filter, Flow, FlowLayer, FlowMetric, FlowSet, SearchQuery, SortOrder};
use flow_archive::streaming::{
    decode_object, encode_batch, object_key, BatchMetadata, BatchWriter, InMemoryObjectStore,
    SimulatedClock, UnixMillis,
};
use std::sync::Arc;
use std::time::Duration;

fn make_flows(n: usize) -> Vec<Flow> {
    (0..n)
        .map(|i| Flow {
            uuid: format!("{:016x}", i * 7919),
            layers_path: "Ethernet/IPv4/TCP".to_string(),
            application: "TCP".to_string(),
            network: Some(FlowLayer {
                protocol: "IPV4".to_string(),
                a: format!("10.0.{}.{}", i / 256 % 256, i % 256),
                b: "192.168.1.1".to_string(),
                id: 0,
            }),
            metric: Some(FlowMetric {
                ab_packets: i as i64,
                ab_bytes: (i * 1500) as i64,
                ba_packets: i as i64 / 2,
                ba_bytes: (i * 700) as i64,
                start: 1_700_000_000_000,
                last: 1_700_000_000_000 + i as i64,
            }),
            start: 1_700_000_000_000,
            last: 1_700_000_000_000 + (i as i64 * 37) % 10_000,
            node_tid: "probe-1".to_string(),
            ..Flow::default()
        })
        .collect()
}

/// Benchmark encode_batch - serde_json plus gzip for every stored batch
fn bench_encode_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_batch");

    for size in [10, 100, 1000] {
        let flows = make_flows(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_function(format!("flows_{}", size), |b| {
            b.iter(|| encode_batch(black_box(&flows)))
        });
    }

    group.finish();
}

/// Benchmark decode_object - the per-object cost of every query
fn bench_decode_object(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_object");

    for size in [10, 100, 1000] {
        let flows = make_flows(size);
        let gzipped = encode_batch(&flows).unwrap();
        let plain = serde_json::to_vec(&flows).unwrap();
        group.throughput(Throughput::Elements(size as u64));

        group.bench_function(format!("gzip_{}", size), |b| {
            b.iter(|| decode_object("bench", black_box(&gzipped)))
        });
        group.bench_function(format!("plain_{}", size), |b| {
            b.iter(|| decode_object("bench", black_box(&plain)))
        });
    }

    group.finish();
}

/// Benchmark BatchMetadata::from_flows - single pass min/max
fn bench_batch_metadata(c: &mut Criterion) {
    let flows = make_flows(1000);
    let mut group = c.benchmark_group("batch_metadata");
    group.throughput(Throughput::Elements(1000));

    group.bench_function("from_flows_1000", |b| {
        b.iter(|| BatchMetadata::from_flows(black_box(&flows)))
    });
    group.bench_function("to_attributes", |b| {
        let meta = BatchMetadata::from_flows(&flows).unwrap();
        b.iter(|| black_box(&meta).to_attributes())
    });

    group.finish();
}

/// Benchmark object_key - UTC formatting plus zero padding
fn bench_object_key(c: &mut Criterion) {
    let mut group = c.benchmark_group("object_key");
    group.throughput(Throughput::Elements(1));

    let id = UnixMillis::from_millis(1_704_164_645_678);
    group.bench_function("with_prefix", |b| {
        b.iter(|| object_key(black_box("root/agent/eu/entity/probe-1"), black_box(id), black_box(42)))
    });
    group.bench_function("empty_prefix", |b| {
        b.iter(|| object_key(black_box(""), black_box(id), black_box(42)))
    });

    group.finish();
}

/// Benchmark FlowSet::search_query - filter, sort, dedup, paginate
fn bench_search_query(c: &mut Criterion) {
    let flows = make_flows(10_000);
    let mut group = c.benchmark_group("search_query");
    group.throughput(Throughput::Elements(10_000));

    let filter_only = SearchQuery::with_filter(Filter::And(vec![
        Filter::gte("Last", 1_700_000_005_000),
        Filter::prefix("Network.A", "10.0.1"),
    ]));
    group.bench_function("filter", |b| {
        b.iter_batched(
            || FlowSet { flows: flows.clone() },
            |set| set.search_query(black_box(&filter_only)),
            BatchSize::LargeInput,
        )
    });

    let sorted = SearchQuery {
        sort_by: Some("Last".to_string()),
        sort_order: SortOrder::Descending,
        dedup: true,
        ..SearchQuery::default()
    };
    group.bench_function("sort_dedup", |b| {
        b.iter_batched(
            || FlowSet { flows: flows.clone() },
            |set| set.search_query(black_box(&sorted)),
            BatchSize::LargeInput,
        )
    });

    group.finish();
}

/// Benchmark BatchWriter::store end to end against the in-memory store
fn bench_writer_store(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let flows = make_flows(100);
    let writer = BatchWriter::new(
        Arc::new(InMemoryObjectStore::new()),
        SimulatedClock::new(1_704_164_645_000),
        "bench",
        "flows",
        Duration::from_secs(86_400),
    );

    let mut group = c.benchmark_group("writer_store");
    group.throughput(Throughput::Elements(100));
    group.bench_function("flows_100", |b| {
        b.to_async(&rt).iter(|| writer.store(black_box(&flows)))
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_encode_batch,
    bench_decode_object,
    bench_batch_metadata,
    bench_object_key,
    bench_search_query,
    bench_writer_store,
);

criterion_main!(benches);
