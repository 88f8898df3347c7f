//! Root Lookup Benchmarks
//!
//! Measures the two lookups a collection pause performs per frame.
//!
//! # Benchmark Categories
//!
//! 1. **Table Lookup**: exact-match binary search within one function's table
//! 2. **Index Lookup**: return address to table across every loaded module
//! 3. **Stack Walk**: full walk over a synthetic stack

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rootmap_core::{STATEPOINT_STRATEGY, TargetConfig};
use rootmap_gc::{
    Frame, FrameWalker, FunctionSafepoints, LoadedTableIndex, SafepointTable, build, roots_at,
};

// =============================================================================
// Benchmark Helpers
// =============================================================================

/// A table with `n` safepoints 16 bytes apart and four live roots.
fn table_with_safepoints(n: u32, base: u32) -> SafepointTable {
    let mut function =
        FunctionSafepoints::new("bench", 16, 2).with_strategy(STATEPOINT_STRATEGY);
    for i in 0..n {
        function.push_safepoint(base + i * 16, [0, 3, 7, 12]);
    }
    match build(&function, &TargetConfig::default(), STATEPOINT_STRATEGY) {
        Ok(table) => table,
        Err(err) => panic!("benchmark table rejected: {err}"),
    }
}

/// Index holding `modules` modules of 64 functions with 32 safepoints each.
fn populated_index(modules: u32) -> LoadedTableIndex {
    let index = LoadedTableIndex::new();
    for m in 0..modules {
        let tables = (0..64)
            .map(|f| table_with_safepoints(32, (m << 20) | (f << 10)))
            .collect();
        index
            .insert(format!("module{m}"), tables)
            .unwrap_or_else(|err| panic!("{err}"));
    }
    index
}

// =============================================================================
// Table Lookup
// =============================================================================

fn bench_table_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("table_lookup");

    for size in [1u32, 16, 256, 4096] {
        let table = table_with_safepoints(size, 0x1000);
        let hit = u64::from(0x1000 + (size / 2) * 16);
        group.bench_with_input(BenchmarkId::new("hit", size), &size, |b, _| {
            b.iter(|| black_box(roots_at(&table, black_box(hit))))
        });
        group.bench_with_input(BenchmarkId::new("miss", size), &size, |b, _| {
            b.iter(|| black_box(roots_at(&table, black_box(hit + 1)).is_err()))
        });
    }

    group.finish();
}

// =============================================================================
// Index Lookup
// =============================================================================

fn bench_index_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_lookup");

    for modules in [1u32, 8, 64] {
        let index = populated_index(modules);
        let address = u64::from(((modules / 2) << 20) | (17 << 10) | (9 * 16));
        group.bench_with_input(BenchmarkId::from_parameter(modules), &modules, |b, _| {
            b.iter(|| black_box(index.lookup(black_box(address))))
        });
    }

    group.finish();
}

// =============================================================================
// Stack Walk
// =============================================================================

fn bench_stack_walk(c: &mut Criterion) {
    let mut group = c.benchmark_group("stack_walk");
    let index = populated_index(8);
    let walker = FrameWalker::new(&index, &TargetConfig::default());

    for depth in [8u64, 64, 512] {
        let frames: Vec<Frame> = (0..depth)
            .map(|i| Frame {
                return_address: ((i % 8) << 20) | ((i % 64) << 10) | ((i % 32) * 16),
                frame_base: 0x7fff_0000 - i * 256,
            })
            .collect();
        group.throughput(Throughput::Elements(depth));
        group.bench_with_input(BenchmarkId::from_parameter(depth), &frames, |b, frames| {
            b.iter(|| {
                let mut sum = 0u64;
                let visited = walker.walk_stack(frames.iter().copied(), |slot| sum ^= slot.address);
                black_box((visited, sum))
            })
        });
    }

    group.finish();
}

// =============================================================================
// Criterion Groups
// =============================================================================

criterion_group!(
    root_lookup_benches,
    bench_table_lookup,
    bench_index_lookup,
    bench_stack_walk,
);

criterion_main!(root_lookup_benches);
