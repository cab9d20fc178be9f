//! End-to-end compile latency for the field kernel suite.
//!
//! Measures suite construction (DSL AST build) and the full pipeline
//! (lowering + codegen) for both backends. Each iteration runs a
//! complete compilation pass with a fresh context.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use limbforge::codegen::Target;
use limbforge::kernels::field::{emit_field_kernels, field_suite};
use limbforge::FieldParams;

const BN254_FP: &str = "0x30644e72e131a029b85045b68181585d97816a916871ca8d3c208c16d87cfd47";

fn bench_suite_build(c: &mut Criterion) {
    let fp = FieldParams::new("bn254_fp", BN254_FP, 64).unwrap();
    c.bench_function("field_suite_build", |b| {
        b.iter(|| field_suite(black_box(&fp)))
    });
}

fn bench_emit(c: &mut Criterion) {
    let fp64 = FieldParams::new("bn254_fp", BN254_FP, 64).unwrap();
    let fp32 = fp64.with_word_bits(32);

    let mut group = c.benchmark_group("emit");
    group.bench_function("cuda_64bit", |b| {
        b.iter(|| emit_field_kernels(black_box(&fp64), Target::Cuda).unwrap())
    });
    group.bench_function("wgsl_32bit", |b| {
        b.iter(|| emit_field_kernels(black_box(&fp32), Target::Wgsl).unwrap())
    });
    group.finish();
}

criterion_group!(benches, bench_suite_build, bench_emit);
criterion_main!(benches);
