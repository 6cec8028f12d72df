//! Benchmarks for the polyhedral scheduler.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use polyforge::kernels;
use polyforge::polyhedral::{parse_map, parse_set};

/// Benchmark emptiness tests on sets and relations.
fn bench_emptiness(c: &mut Criterion) {
    let feasible = parse_set("[N] -> { S[i, j] : 0 <= i < N and 0 <= j <= i and 2j >= N }").unwrap();
    let infeasible = parse_set("{ S[i, j] : 0 <= i < 8 and i < j and j < i + 1 }").unwrap();
    let carried = parse_map("[N] -> { A[i] -> A[i'] : 1 <= i < N and i' = i + 1 and i' < N and i' <= i }").unwrap();

    c.bench_function("empty_feasible_set", |b| b.iter(|| black_box(&feasible).is_empty()));
    c.bench_function("empty_integer_gap", |b| b.iter(|| black_box(&infeasible).is_empty()));
    c.bench_function("empty_relation", |b| b.iter(|| black_box(&carried).is_empty()));
}

/// Benchmark dependence analysis of the nine-point stencil.
fn bench_stencil_dependences(c: &mut Criterion) {
    let kernel = kernels::stencil(3000, 1000).unwrap();

    c.bench_function("stencil_dependences", |b| {
        b.iter(|| {
            let mut f = kernel.function.clone();
            f.compute_dependences().unwrap();
            black_box(f.dependences().map(|d| d.raw.len()))
        })
    });
}

/// Benchmark ordering, loop-tree construction and lowering.
fn bench_codegen(c: &mut Criterion) {
    let mut group = c.benchmark_group("codegen");
    for name in ["stencil", "heat", "matmul"] {
        let kernel = kernels::by_name(name, kernels::KernelSize::default()).unwrap().unwrap();
        group.bench_function(name, |b| {
            b.iter(|| {
                let mut f = kernel.function.clone();
                black_box(f.codegen().unwrap().stores().len())
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_emptiness, bench_stencil_dependences, bench_codegen);
criterion_main!(benches);
