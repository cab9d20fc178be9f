//! End-to-end compile tests: host programs in, kernel source out, for
//! both backends.

use limbforge::codegen::Target;
use limbforge::dsl::build::{
    call, float_lit, ident, index, infix, member, prefix, size_lit, u32_lit, ProcBuilder,
    ProgramBuilder,
};
use limbforge::dsl::{Ast, Program, Ty};
use limbforge::kernels::field::{emit_field_kernels, field_suite, KERNEL_NAMES};
use limbforge::{compile, FieldParams};

const BN254_FP: &str = "0x30644e72e131a029b85045b68181585d97816a916871ca8d3c208c16d87cfd47";

/// A device procedure that branches then squares, and a kernel that
/// accumulates it over four elements.
fn square_program() -> Program {
    let mut pb = ProgramBuilder::new();
    pb.proc(
        ProcBuilder::device("square")
            .param("x", Ty::F32)
            .returns(Ty::F32)
            .body(|f| {
                f.if_else(
                    infix("<", ident("x"), float_lit(0.0, Ty::F32)),
                    |b| {
                        b.assign(
                            ident("result"),
                            infix("*", prefix("-", ident("x")), prefix("-", ident("x"))),
                        );
                    },
                    |b| {
                        b.assign(ident("result"), infix("*", ident("x"), ident("x")));
                    },
                );
            }),
    );
    pb.proc(
        ProcBuilder::kernel("accumulate")
            .var_param("acc", Ty::F32)
            .param("xs", Ty::array(Ty::F32, 4))
            .body(|f| {
                f.for_("i", size_lit(0), size_lit(4), |b| {
                    b.assign(
                        ident("acc"),
                        infix(
                            "+",
                            ident("acc"),
                            call("square", vec![index(ident("xs"), ident("i"))]),
                        ),
                    );
                });
            }),
    );
    pb.finish()
}

#[test]
fn square_scenario_cuda() {
    let out = compile(&square_program(), Target::Cuda).unwrap();
    assert!(out.source.contains("__device__ float square(float x)"));
    assert!(out
        .source
        .contains("extern \"C\" __global__ void accumulate(float* acc, float xs[4])"));
    assert!(out.source.contains("for (size_t i = 0; i < 4; ++i)"));
    assert!(out.source.contains("square(xs[i])"));
    // Implicit result variable: synthesized, assigned in both arms,
    // returned at the end.
    assert!(out.source.contains("float result;"));
    assert!(out.source.contains("return result;"));
    assert!(out.warnings.is_empty());
}

#[test]
fn square_scenario_wgsl() {
    let out = compile(&square_program(), Target::Wgsl).unwrap();
    assert!(out.source.contains("fn square(x: f32) -> f32"));
    assert!(out.source.contains("@compute @workgroup_size(64)"));
    assert!(out.source.contains("fn accumulate()"));
    // Parameters surface as storage bindings in declaration order:
    // the mutable result first, the input array second.
    assert!(out
        .source
        .contains("@group(0) @binding(0) var<storage, read_write> accumulate_acc: f32;"));
    assert!(out
        .source
        .contains("@group(0) @binding(1) var<storage, read> accumulate_xs: array<f32, 4>;"));
    assert!(out.source.contains("square(xs[i])"));
    assert!(out.source.contains("accumulate_acc = acc;"));
    assert!(out.warnings.is_empty());
}

/// A generic fill procedure instantiated at two widths from one kernel.
fn generic_fill_program() -> Program {
    let mut pb = ProgramBuilder::new();
    pb.proc(
        ProcBuilder::device("fill")
            .type_param("W")
            .var_param("r", Ty::array_named(Ty::Param("W".into()), "N"))
            .param("v", Ty::Param("W".into()))
            .body(|f| {
                f.for_("i", size_lit(0), ident("N"), |b| {
                    b.assign(index(ident("r"), ident("i")), ident("v"));
                });
            }),
    );
    pb.proc(
        ProcBuilder::kernel("fill_kernel")
            .var_param("a", Ty::array(Ty::U32, 4))
            .var_param("b", Ty::array(Ty::U64, 4))
            .param("x", Ty::U32)
            .param("y", Ty::U64)
            .body(|f| {
                f.expr(call("fill", vec![ident("a"), ident("x")]));
                f.expr(call("fill", vec![ident("b"), ident("y")]));
                // Same combination again: must reuse the instantiation.
                f.expr(call("fill", vec![ident("a"), ident("x")]));
            }),
    );
    pb.finish()
}

#[test]
fn one_definition_per_distinct_instantiation() {
    let out = compile(&generic_fill_program(), Target::Cuda).unwrap();
    // Prototype plus definition for each width, nothing more.
    assert_eq!(out.source.matches("void fill_u32x4_u32(").count(), 2);
    assert_eq!(out.source.matches("void fill_u64x4_u64(").count(), 2);
    // The repeated call references the first instantiation.
    assert_eq!(out.source.matches("fill_u32x4_u32(a, x)").count(), 2);
}

#[test]
fn shadowed_result_variable_warns_and_defers() {
    let mut pb = ProgramBuilder::new();
    pb.proc(
        ProcBuilder::device("clamp_zero")
            .param("x", Ty::F32)
            .returns(Ty::F32)
            .body(|f| {
                f.let_mut("result", Some(Ty::F32), Some(float_lit(0.0, Ty::F32)));
                f.if_(infix(">", ident("x"), float_lit(0.0, Ty::F32)), |b| {
                    b.assign(ident("result"), ident("x"));
                });
                f.ret(Some(ident("result")));
            }),
    );
    let out = compile(&pb.finish(), Target::Cuda).unwrap();
    assert_eq!(out.warnings.len(), 1);
    assert!(out.warnings[0].message.contains("clamp_zero"));
    // The user declaration is kept; no second `result` is synthesized.
    assert_eq!(out.source.matches("float result").count(), 1);
}

#[test]
fn unknown_callee_fails_loudly() {
    let mut pb = ProgramBuilder::new();
    pb.proc(
        ProcBuilder::kernel("bad")
            .var_param("r", Ty::array(Ty::U32, 4))
            .body(|f| {
                f.expr(call("no_such_proc", vec![ident("r")]));
            }),
    );
    let err = compile(&pb.finish(), Target::Cuda).unwrap_err();
    assert!(err.to_string().contains("no_such_proc"));
}

#[test]
fn wgsl_rejects_wide_words_by_type_name() {
    let mut pb = ProgramBuilder::new();
    pb.proc(
        ProcBuilder::kernel("wide")
            .var_param("r", Ty::array(Ty::U64, 4))
            .param("v", Ty::U64)
            .body(|f| {
                f.assign(index(ident("r"), size_lit(0)), ident("v"));
            }),
    );
    let err = compile(&pb.finish(), Target::Wgsl).unwrap_err();
    assert!(err.to_string().contains("u64"));
}

#[test]
fn pointer_struct_fields_diverge_between_backends() {
    let mut pb = ProgramBuilder::new();
    pb.structure(
        "Ctx",
        vec![("len", Ty::U32), ("buf", Ty::ptr(Ty::array(Ty::U32, 8)))],
    );
    pb.proc(
        ProcBuilder::kernel("scan")
            .var_param("out", Ty::array(Ty::U32, 8))
            .body(|f| {
                f.let_shared("scratch", Ty::array(Ty::U32, 8));
                f.let_(
                    "c",
                    None,
                    Some(Ast::Construct {
                        ty: Ty::Named("Ctx".into()),
                        args: vec![u32_lit(8), Ast::AddrOf(Box::new(ident("scratch")))],
                    }),
                );
                f.assign(
                    index(
                        Ast::Deref(Box::new(member(ident("c"), "buf"))),
                        size_lit(0),
                    ),
                    member(ident("c"), "len"),
                );
                f.assign(
                    index(ident("out"), size_lit(0)),
                    index(
                        Ast::Deref(Box::new(member(ident("c"), "buf"))),
                        size_lit(0),
                    ),
                );
            }),
    );
    let program = pb.finish();

    // CUDA keeps the raw pointer field and the injected address.
    let cuda = compile(&program, Target::Cuda).unwrap();
    assert!(cuda.source.contains("uint32_t (*buf)[8];"));
    assert!(cuda.source.contains("__shared__ uint32_t scratch[8];"));
    assert!(cuda.source.contains("Ctx{8u, (&scratch)}"));

    // WGSL drops the pointer-shaped field, moves the workgroup storage
    // to module scope, and rewrites field reads to the lifted global.
    let wgsl = compile(&program, Target::Wgsl).unwrap();
    assert!(wgsl.source.contains("var<workgroup> scratch: array<u32, 8>;"));
    assert!(wgsl.source.contains("(*(&scratch))[0u]"));
    assert!(!wgsl.source.contains("buf"));
}

#[test]
fn same_program_same_target_same_text() {
    let program = square_program();
    let a = compile(&program, Target::Cuda).unwrap();
    let b = compile(&program, Target::Cuda).unwrap();
    assert_eq!(a.source, b.source);
    assert_eq!(a.hash, b.hash);

    let a = compile(&program, Target::Wgsl).unwrap();
    let b = compile(&program, Target::Wgsl).unwrap();
    assert_eq!(a.source, b.source);
}

#[test]
fn field_suite_exports_every_kernel_on_both_backends() {
    let fp64 = FieldParams::new("bn254_fp", BN254_FP, 64).unwrap();
    let cuda = emit_field_kernels(&fp64, Target::Cuda).unwrap();
    let wgsl = emit_field_kernels(&fp64.with_word_bits(32), Target::Wgsl).unwrap();
    for name in KERNEL_NAMES {
        assert!(
            cuda.source.contains(&format!("__global__ void {}(", name)),
            "missing CUDA kernel {}",
            name
        );
        assert!(
            wgsl.source.contains(&format!("fn {}()", name)),
            "missing WGSL kernel {}",
            name
        );
    }
    assert_eq!(cuda.hash.len(), 32);
    assert_ne!(cuda.hash, wgsl.hash);
}

#[test]
fn suite_program_declares_primitives_but_never_emits_them() {
    let fp = FieldParams::new("bn254_fp", BN254_FP, 64).unwrap();
    let program = field_suite(&fp);
    assert!(program.find_proc("add_co").is_some());
    let out = compile(&program, Target::Cuda).unwrap();
    // Called, but externally provided: no definition in the emitted text.
    assert!(out.source.contains("add_co("));
    assert!(!out.source.contains("void add_co("));
}
