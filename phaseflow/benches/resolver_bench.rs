//! Benchmarks for dependency resolution.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use phaseflow::pipeline::DependencyResolver;

/// A layered graph: each unit depends on up to three units of the previous layer.
fn layered(size: usize) -> Vec<(String, Vec<String>)> {
    (0..size)
        .map(|i| {
            let deps = if i < 10 {
                Vec::new()
            } else {
                (1..=3).map(|k| format!("u{}", i - 10 + k)).collect()
            };
            (format!("u{i}"), deps)
        })
        .collect()
}

/// A single cycle running through every unit.
fn ring(size: usize) -> Vec<(String, Vec<String>)> {
    (0..size)
        .map(|i| (format!("u{i}"), vec![format!("u{}", (i + 1) % size)]))
        .collect()
}

fn resolve(units: &[(String, Vec<String>)]) -> usize {
    DependencyResolver::new()
        .resolve(
            units
                .iter()
                .map(|(id, deps)| (id.as_str(), deps.iter().map(String::as_str))),
        )
        .order
        .len()
}

fn resolver_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve");
    for size in [10, 100, 1000] {
        let dag = layered(size);
        group.bench_with_input(BenchmarkId::new("layered", size), &dag, |b, units| {
            b.iter(|| black_box(resolve(units)));
        });
        let cycle = ring(size);
        group.bench_with_input(BenchmarkId::new("ring", size), &cycle, |b, units| {
            b.iter(|| black_box(resolve(units)));
        });
    }
    group.finish();
}

criterion_group!(benches, resolver_benchmark);
criterion_main!(benches);
