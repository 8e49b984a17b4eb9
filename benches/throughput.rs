//! Throughput Benchmark for Aetherg
//!
//! Measures the keyspace under basic workloads and the wire parser over
//! representative request shapes.

use aetherg::keyspace::Keyspace;
use aetherg::protocol::{Parser, Source};
use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

/// Benchmark SET operations
fn bench_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("set");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set_small", |b| {
        let mut ks = Keyspace::new();
        let mut i = 0u64;
        b.iter(|| {
            ks.set(format!("key:{i}"), Bytes::from_static(b"small_value"), 0);
            i += 1;
        });
    });

    group.bench_function("set_medium", |b| {
        let mut ks = Keyspace::new();
        let value = Bytes::from("x".repeat(1024)); // 1KB value
        let mut i = 0u64;
        b.iter(|| {
            ks.set(format!("key:{i}"), value.clone(), 0);
            i += 1;
        });
    });

    group.bench_function("set_transient", |b| {
        let mut ks = Keyspace::new();
        let mut i = 0u64;
        b.iter(|| {
            ks.set(format!("key:{i}"), Bytes::from_static(b"v"), 3600);
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark GET operations
fn bench_get(c: &mut Criterion) {
    let mut ks = Keyspace::new();
    for i in 0..100_000 {
        ks.set(format!("key:{i}"), Bytes::from(format!("value:{i}")), 0);
    }

    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_hit", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key:{}", i % 100_000);
            black_box(ks.get(&key));
            i += 1;
        });
    });

    group.bench_function("get_miss", |b| {
        b.iter(|| {
            black_box(ks.get("no-such-key"));
        });
    });

    group.finish();
}

/// Benchmark eviction sweeps over a mixed keyspace
fn bench_evict(c: &mut Criterion) {
    let mut ks = Keyspace::new();
    for i in 0..10_000 {
        ks.set(format!("perm:{i}"), Bytes::from_static(b"v"), 0);
    }
    for i in 0..1_000 {
        ks.set(format!("ttl:{i}"), Bytes::from_static(b"v"), 3600);
    }

    c.bench_function("evict_nothing_expired", |b| {
        b.iter(|| ks.evict());
    });
}

/// Benchmark parsing both request forms
fn bench_parse(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("benchmark runtime");

    let mut group = c.benchmark_group("parse");
    group.throughput(Throughput::Elements(1));

    group.bench_function("line_form_set", |b| {
        let input = &b"SET key0 'F398BC5672A51D8D' EXP 360\r\n"[..];
        b.iter(|| {
            rt.block_on(async {
                let mut parser = Parser::new(Source::new(input, 128));
                black_box(parser.next().await.unwrap());
            });
        });
    });

    group.bench_function("array_form_set", |b| {
        let input = &b"*3\r\n$3\r\nSET\r\n$4\r\nkey0\r\n$16\r\nF398BC5672A51D8D\r\n"[..];
        b.iter(|| {
            rt.block_on(async {
                let mut parser = Parser::new(Source::new(input, 128));
                black_box(parser.next().await.unwrap());
            });
        });
    });

    group.finish();
}

criterion_group!(benches, bench_set, bench_get, bench_evict, bench_parse);
criterion_main!(benches);
