use batchtrace_api::sequence::{allocate, next_suffix, sequence_number, LatestSuffix, Suffix};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

// Bulk allocation across letter-block boundaries
fn allocation_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate");

    for quantity in [100usize, 1_000, 10_000, 100_000].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(quantity),
            quantity,
            |b, &quantity| {
                b.iter(|| {
                    let suffixes = allocate(Suffix::first(), black_box(quantity));
                    suffixes
                        .iter()
                        .map(|s| sequence_number("BT100", s))
                        .count()
                });
            },
        );
    }

    group.finish();
}

fn next_suffix_benchmark(c: &mut Criterion) {
    c.bench_function("next_suffix_carry", |b| {
        b.iter(|| next_suffix(black_box("AZZ999")))
    });
}

// Resume point over a large existing range
fn resolve_benchmark(c: &mut Criterion) {
    let existing: Vec<String> = allocate(Suffix::first(), 50_000)
        .iter()
        .map(|s| sequence_number("BT100", s))
        .collect();

    c.bench_function("latest_suffix_resolve_50k", |b| {
        b.iter(|| LatestSuffix::resolve(black_box("BT100"), black_box(&existing)))
    });
}

criterion_group!(
    benches,
    allocation_benchmark,
    next_suffix_benchmark,
    resolve_benchmark
);
criterion_main!(benches);
