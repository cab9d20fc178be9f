//! DSL templates for modular arithmetic kernels.
//!
//! Bodies are unrolled over the limb count at build time because the
//! carry/widening primitives chain a carry flag between adjacent calls;
//! a runtime loop would break the chain. Modulus limbs and the Montgomery
//! constant are baked in as literals.
//!
//! The primitives (`add_co`, `add_cio`, `sub_bo`, `mul_hi`, ...) are
//! declared signature-only: the external numeric library linked into the
//! kernel module provides them.

use crate::codegen::Target;
use crate::diagnostic::Diagnostic;
use crate::dsl::build::{
    call, ident, index, infix, int_lit, size_lit, BlockBuilder, ProcBuilder, ProgramBuilder,
};
use crate::dsl::{Ast, Program, Ty};
use crate::CompileError;

use super::FieldParams;

/// Names of the kernel entry points the suite exports, for module loads.
pub const KERNEL_NAMES: [&str; 4] = [
    "mod_add_kernel",
    "mod_sub_kernel",
    "mont_mul_kernel",
    "ccopy_kernel",
];

/// Emitted source for one field/target pair.
#[derive(Clone, Debug)]
pub struct EmittedKernels {
    pub field: String,
    pub target: Target,
    pub source: String,
    pub hash: String,
    pub warnings: Vec<Diagnostic>,
}

/// Build and compile the full kernel suite for one field.
pub fn emit_field_kernels(
    fp: &FieldParams,
    target: Target,
) -> Result<EmittedKernels, CompileError> {
    let program = field_suite(fp);
    let compiled = crate::compile(&program, target)?;
    Ok(EmittedKernels {
        field: fp.name.clone(),
        target,
        source: compiled.source,
        hash: compiled.hash,
        warnings: compiled.warnings,
    })
}

/// The host program for one field: primitives, helpers, and kernels.
pub fn field_suite(fp: &FieldParams) -> Program {
    let w = word_ty(fp);
    let n = fp.num_words() as u64;
    let arr = Ty::array(w.clone(), n);
    let m = fp.limbs();
    let spare = fp.spare_bits();

    let mut pb = ProgramBuilder::new();

    for name in [
        "add_co", "add_cio", "add_ci", "sub_bo", "sub_bio", "sub_bi", "mul_lo", "mul_hi",
    ] {
        pb.proc(
            ProcBuilder::extern_fn(name)
                .param("a", w.clone())
                .param("b", w.clone())
                .returns(w.clone())
                .declare(),
        );
    }

    pb.proc(ccopy_def());
    // The reduction helper is chosen by the statically known spare-bit
    // count; the suite carries exactly the one its kernels call.
    if spare >= 1 {
        pb.proc(final_sub_noo(fp, &w, &arr, &m));
    } else {
        pb.proc(final_sub_mayo(fp, &w, &arr, &m));
    }
    pb.proc(mod_add(fp, &w, &arr, spare));
    pb.proc(mod_sub(fp, &w, &arr, &m));
    pb.proc(mont_mul(fp, &w, &arr, &m, spare));

    pb.proc(
        ProcBuilder::kernel("mod_add_kernel")
            .var_param("r", arr.clone())
            .param("a", arr.clone())
            .param("b", arr.clone())
            .body(|f| {
                f.expr(call("mod_add", vec![ident("r"), ident("a"), ident("b")]));
            }),
    );
    pb.proc(
        ProcBuilder::kernel("mod_sub_kernel")
            .var_param("r", arr.clone())
            .param("a", arr.clone())
            .param("b", arr.clone())
            .body(|f| {
                f.expr(call("mod_sub", vec![ident("r"), ident("a"), ident("b")]));
            }),
    );
    pb.proc(
        ProcBuilder::kernel("mont_mul_kernel")
            .var_param("r", arr.clone())
            .param("a", arr.clone())
            .param("b", arr.clone())
            .body(|f| {
                f.expr(call("mont_mul", vec![ident("r"), ident("a"), ident("b")]));
            }),
    );
    pb.proc(
        ProcBuilder::kernel("ccopy_kernel")
            .var_param("r", arr.clone())
            .param("b", arr)
            .param("ctl", w)
            .body(|f| {
                f.expr(call("ccopy", vec![ident("r"), ident("b"), ident("ctl")]));
            }),
    );

    pb.finish()
}

fn word_ty(fp: &FieldParams) -> Ty {
    if fp.word_bits == 32 {
        Ty::U32
    } else {
        Ty::U64
    }
}

fn wlit(fp: &FieldParams, value: u64) -> Ast {
    int_lit(value, word_ty(fp))
}

fn word_max(fp: &FieldParams) -> u64 {
    if fp.word_bits == 32 {
        u32::MAX as u64
    } else {
        u64::MAX
    }
}

fn at(name: &str, i: u64) -> Ast {
    index(ident(name), size_lit(i))
}

/// Branchless conditional copy, generic over word type and limb count:
/// `a[i] ^= (a[i] ^ b[i]) & ctl` keeps `a` when `ctl` is zero and takes
/// `b` when `ctl` is all-ones.
fn ccopy_def() -> crate::dsl::ProcDef {
    ProcBuilder::device("ccopy")
        .type_param("W")
        .var_param("a", Ty::array_named(Ty::Param("W".into()), "N"))
        .param("b", Ty::array_named(Ty::Param("W".into()), "N"))
        .param("ctl", Ty::Param("W".into()))
        .body(|f| {
            f.for_("i", size_lit(0), ident("N"), |b| {
                let sel = infix(
                    "and",
                    infix(
                        "xor",
                        index(ident("a"), ident("i")),
                        index(ident("b"), ident("i")),
                    ),
                    ident("ctl"),
                );
                b.assign(
                    index(ident("a"), ident("i")),
                    infix("xor", index(ident("a"), ident("i")), sel),
                );
            });
        })
}

/// Emit the borrow-chained `t - M` into `s`, leaving the borrow mask in
/// a local named `borrow`.
fn subtract_modulus(f: &mut BlockBuilder, fp: &FieldParams, arr: &Ty, m: &[u64]) {
    let n = m.len() as u64;
    f.let_mut("s", Some(arr.clone()), None);
    f.assign(at("s", 0), call("sub_bo", vec![at("t", 0), wlit(fp, m[0])]));
    for j in 1..n {
        f.assign(
            at("s", j),
            call("sub_bio", vec![at("t", j), wlit(fp, m[j as usize])]),
        );
    }
    f.let_(
        "borrow",
        None,
        Some(call("sub_bi", vec![wlit(fp, 0), wlit(fp, 0)])),
    );
}

/// Final reduction when the modulus leaves at least one spare bit: the
/// addition cannot have overflowed the limb array, so `t - M` with a
/// borrow-select is enough.
fn final_sub_noo(fp: &FieldParams, _w: &Ty, arr: &Ty, m: &[u64]) -> crate::dsl::ProcDef {
    ProcBuilder::device("final_sub_noo")
        .var_param("r", arr.clone())
        .param("t", arr.clone())
        .body(|f| {
            subtract_modulus(f, fp, arr, m);
            f.expr(call(
                "ccopy",
                vec![ident("s"), ident("t"), ident("borrow")],
            ));
            f.assign(ident("r"), ident("s"));
        })
}

/// Final reduction when there are no spare bits: the addition may have
/// carried out of the top limb, so the select must honor the overflow
/// word as well as the borrow.
fn final_sub_mayo(fp: &FieldParams, w: &Ty, arr: &Ty, m: &[u64]) -> crate::dsl::ProcDef {
    let ones = word_max(fp);
    ProcBuilder::device("final_sub_mayo")
        .var_param("r", arr.clone())
        .param("t", arr.clone())
        .param("ovf", w.clone())
        .body(|f| {
            subtract_modulus(f, fp, arr, m);
            // Subtract stands when the overflow word is set or the
            // subtraction did not borrow.
            f.let_(
                "no_borrow",
                None,
                Some(infix("xor", ident("borrow"), wlit(fp, ones))),
            );
            f.let_(
                "ovf_mask",
                None,
                Some(infix("-", wlit(fp, 0), ident("ovf"))),
            );
            f.let_(
                "keep_sub",
                None,
                Some(infix("or", ident("no_borrow"), ident("ovf_mask"))),
            );
            f.let_mut("u", Some(arr.clone()), Some(ident("t")));
            f.expr(call(
                "ccopy",
                vec![ident("u"), ident("s"), ident("keep_sub")],
            ));
            f.assign(ident("r"), ident("u"));
        })
}

fn mod_add(fp: &FieldParams, _w: &Ty, arr: &Ty, spare: u32) -> crate::dsl::ProcDef {
    let n = fp.num_words() as u64;
    ProcBuilder::device("mod_add")
        .var_param("r", arr.clone())
        .param("a", arr.clone())
        .param("b", arr.clone())
        .body(|f| {
            f.let_mut("t", Some(arr.clone()), None);
            f.assign(at("t", 0), call("add_co", vec![at("a", 0), at("b", 0)]));
            for j in 1..n {
                f.assign(at("t", j), call("add_cio", vec![at("a", j), at("b", j)]));
            }
            if spare >= 1 {
                f.expr(call("final_sub_noo", vec![ident("r"), ident("t")]));
            } else {
                f.let_(
                    "ovf",
                    None,
                    Some(call("add_ci", vec![wlit(fp, 0), wlit(fp, 0)])),
                );
                f.expr(call(
                    "final_sub_mayo",
                    vec![ident("r"), ident("t"), ident("ovf")],
                ));
            }
        })
}

fn mod_sub(fp: &FieldParams, _w: &Ty, arr: &Ty, m: &[u64]) -> crate::dsl::ProcDef {
    let n = fp.num_words() as u64;
    ProcBuilder::device("mod_sub")
        .var_param("r", arr.clone())
        .param("a", arr.clone())
        .param("b", arr.clone())
        .body(|f| {
            f.let_mut("t", Some(arr.clone()), None);
            f.assign(at("t", 0), call("sub_bo", vec![at("a", 0), at("b", 0)]));
            for j in 1..n {
                f.assign(at("t", j), call("sub_bio", vec![at("a", j), at("b", j)]));
            }
            // All-ones when the subtraction went negative.
            f.let_(
                "under",
                None,
                Some(call("sub_bi", vec![wlit(fp, 0), wlit(fp, 0)])),
            );
            f.let_mut("u", Some(arr.clone()), None);
            f.assign(
                at("u", 0),
                call(
                    "add_co",
                    vec![at("t", 0), infix("and", wlit(fp, m[0]), ident("under"))],
                ),
            );
            for j in 1..n {
                f.assign(
                    at("u", j),
                    call(
                        "add_cio",
                        vec![
                            at("t", j),
                            infix("and", wlit(fp, m[j as usize]), ident("under")),
                        ],
                    ),
                );
            }
            f.assign(ident("r"), ident("u"));
        })
}

/// Montgomery multiplication, FIOS with a word shift per outer round.
/// Fully unrolled; the carry flag chains through adjacent primitive
/// calls and must not cross a loop boundary.
fn mont_mul(
    fp: &FieldParams,
    _w: &Ty,
    arr: &Ty,
    m: &[u64],
    spare: u32,
) -> crate::dsl::ProcDef {
    let n = fp.num_words() as u64;
    let wide = Ty::array(word_ty(fp), n + 2);
    let m0ninv = fp.m0ninv();
    ProcBuilder::device("mont_mul")
        .var_param("r", arr.clone())
        .param("a", arr.clone())
        .param("b", arr.clone())
        .body(|f| {
            let zeros: Vec<Ast> = (0..n + 2).map(|_| wlit(fp, 0)).collect();
            f.let_mut("t", Some(wide.clone()), Some(Ast::ArrayLit(zeros)));

            for i in 0..n {
                let bi = at("b", i);

                // t += a * b[i], low halves then high halves.
                f.assign(
                    at("t", 0),
                    call(
                        "add_co",
                        vec![at("t", 0), call("mul_lo", vec![at("a", 0), bi.clone()])],
                    ),
                );
                for j in 1..n {
                    f.assign(
                        at("t", j),
                        call(
                            "add_cio",
                            vec![at("t", j), call("mul_lo", vec![at("a", j), bi.clone()])],
                        ),
                    );
                }
                f.assign(at("t", n), call("add_cio", vec![at("t", n), wlit(fp, 0)]));
                f.assign(
                    at("t", n + 1),
                    call("add_ci", vec![wlit(fp, 0), wlit(fp, 0)]),
                );

                f.assign(
                    at("t", 1),
                    call(
                        "add_co",
                        vec![at("t", 1), call("mul_hi", vec![at("a", 0), bi.clone()])],
                    ),
                );
                for j in 2..n {
                    f.assign(
                        at("t", j),
                        call(
                            "add_cio",
                            vec![
                                at("t", j),
                                call("mul_hi", vec![at("a", j - 1), bi.clone()]),
                            ],
                        ),
                    );
                }
                if n > 1 {
                    f.assign(
                        at("t", n),
                        call(
                            "add_cio",
                            vec![at("t", n), call("mul_hi", vec![at("a", n - 1), bi])],
                        ),
                    );
                }
                f.assign(
                    at("t", n + 1),
                    call("add_ci", vec![at("t", n + 1), wlit(fp, 0)]),
                );

                // Montgomery round: fold out the low word with q = t[0] * m0ninv.
                let q = format!("q{}", i);
                f.let_(
                    &q,
                    None,
                    Some(call("mul_lo", vec![at("t", 0), wlit(fp, m0ninv)])),
                );
                f.let_(
                    "_",
                    None,
                    Some(call(
                        "add_co",
                        vec![at("t", 0), call("mul_lo", vec![ident(&q), wlit(fp, m[0])])],
                    )),
                );
                for j in 1..n {
                    f.assign(
                        at("t", j),
                        call(
                            "add_cio",
                            vec![
                                at("t", j),
                                call("mul_lo", vec![ident(&q), wlit(fp, m[j as usize])]),
                            ],
                        ),
                    );
                }
                f.assign(at("t", n), call("add_cio", vec![at("t", n), wlit(fp, 0)]));
                f.assign(
                    at("t", n + 1),
                    call("add_ci", vec![at("t", n + 1), wlit(fp, 0)]),
                );

                f.assign(
                    at("t", 1),
                    call(
                        "add_co",
                        vec![at("t", 1), call("mul_hi", vec![ident(&q), wlit(fp, m[0])])],
                    ),
                );
                for j in 2..n {
                    f.assign(
                        at("t", j),
                        call(
                            "add_cio",
                            vec![
                                at("t", j),
                                call("mul_hi", vec![ident(&q), wlit(fp, m[j as usize - 1])]),
                            ],
                        ),
                    );
                }
                if n > 1 {
                    f.assign(
                        at("t", n),
                        call(
                            "add_cio",
                            vec![
                                at("t", n),
                                call("mul_hi", vec![ident(&q), wlit(fp, m[n as usize - 1])]),
                            ],
                        ),
                    );
                }
                f.assign(
                    at("t", n + 1),
                    call("add_ci", vec![at("t", n + 1), wlit(fp, 0)]),
                );

                // Shift one word down for the next round.
                for j in 0..=n {
                    f.assign(at("t", j), at("t", j + 1));
                }
                f.assign(at("t", n + 1), wlit(fp, 0));
            }

            f.let_mut("acc", Some(arr.clone()), None);
            for j in 0..n {
                f.assign(at("acc", j), at("t", j));
            }
            if spare >= 1 {
                f.expr(call("final_sub_noo", vec![ident("r"), ident("acc")]));
            } else {
                f.expr(call(
                    "final_sub_mayo",
                    vec![ident("r"), ident("acc"), at("t", n)],
                ));
            }
        })
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const BN254_FP: &str = "0x30644e72e131a029b85045b68181585d97816a916871ca8d3c208c16d87cfd47";
    const SECP256K1_FP: &str =
        "0xfffffffffffffffffffffffffffffffffffffffffffffffffffffffefffffc2f";

    #[test]
    fn spare_bits_select_the_cheap_final_subtraction() {
        let fp = FieldParams::new("bn254_fp", BN254_FP, 64).unwrap();
        assert!(fp.spare_bits() >= 1);
        let out = emit_field_kernels(&fp, Target::Cuda).unwrap();
        assert!(out.source.contains("final_sub_noo("));
        assert!(!out.source.contains("final_sub_mayo("));
    }

    #[test]
    fn zero_spare_bits_select_the_overflow_aware_subtraction() {
        let fp = FieldParams::new("secp256k1_fp", SECP256K1_FP, 64).unwrap();
        assert_eq!(fp.spare_bits(), 0);
        let out = emit_field_kernels(&fp, Target::Cuda).unwrap();
        assert!(out.source.contains("final_sub_mayo("));
        assert!(!out.source.contains("final_sub_noo("));
    }

    #[test]
    fn ccopy_monomorphizes_once_across_call_sites() {
        let fp = FieldParams::new("bn254_fp", BN254_FP, 64).unwrap();
        let out = emit_field_kernels(&fp, Target::Cuda).unwrap();
        // Prototype plus definition, nothing more.
        let defs = out.source.matches("void ccopy_u64x4_u64x4_u64(").count();
        assert_eq!(defs, 2);
    }

    #[test]
    fn wgsl_suite_emits_for_32_bit_words() {
        let fp = FieldParams::new("bn254_fp", BN254_FP, 32).unwrap();
        let out = emit_field_kernels(&fp, Target::Wgsl).unwrap();
        assert!(out.source.contains("@compute @workgroup_size(64)"));
        assert!(out.source.contains("fn mont_mul("));
        // Aggregate copies are element-wise loops in this dialect.
        assert!(out.source.contains("for (var ci"));
        assert!(!out.source.contains("memcpy"));
    }

    #[test]
    fn cuda_suite_copies_arrays_with_memcpy() {
        let fp = FieldParams::new("bn254_fp", BN254_FP, 64).unwrap();
        let out = emit_field_kernels(&fp, Target::Cuda).unwrap();
        assert!(out.source.contains("memcpy("));
        assert!(out.source.contains("sizeof(uint64_t) * 4"));
    }

    #[test]
    fn emission_is_deterministic_across_fresh_contexts() {
        let fp = FieldParams::new("bn254_fp", BN254_FP, 64).unwrap();
        let a = emit_field_kernels(&fp, Target::Cuda).unwrap();
        let b = emit_field_kernels(&fp, Target::Cuda).unwrap();
        assert_eq!(a.source, b.source);
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn suite_has_no_warnings() {
        let fp = FieldParams::new("bn254_fp", BN254_FP, 64).unwrap();
        let out = emit_field_kernels(&fp, Target::Cuda).unwrap();
        assert!(out.warnings.is_empty());
    }
}
