//! Inline-cache lookup microbenchmarks: linear scan vs. hash-indexed sites.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use garnet_core::intern::SymbolTable;
use garnet_runtime::object::class::ClassId;
use garnet_runtime::object::function::FunctionId;
use garnet_runtime::object::icdata::ICData;

fn build_ic(checks: u32) -> ICData {
    let symbols = SymbolTable::new();
    let mut ic = ICData::new(symbols.intern("f"), 1);
    for raw in 0..checks {
        ic.add_receiver_check(ClassId::from_raw(raw), FunctionId::from_raw(raw));
    }
    ic
}

fn bench_ic_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("ic_lookup");
    for &checks in &[1u32, 4, 8, 16, 64] {
        let ic = build_ic(checks);
        let probe = [ClassId::from_raw(checks - 1)];
        group.bench_with_input(BenchmarkId::from_parameter(checks), &checks, |b, _| {
            b.iter(|| black_box(ic.lookup(black_box(&probe))))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_ic_lookup);
criterion_main!(benches);
