//! limbforge — a typed DSL compiler emitting CUDA and WGSL kernels for
//! big-integer field arithmetic, with runtime execution harnesses.
//!
//! Pipeline:
//! ```text
//! dsl::Program → lower → ir::Program ─→ codegen (cuda | wgsl) → source
//!                                              │
//!                            runtime (cudarc | wgpu) ← compiled module
//! ```
//!
//! Compilation is a pure tree transformation: each call to [`compile`]
//! builds its own context, so separate compilations can run concurrently
//! without sharing state.

pub mod codegen;
pub mod diagnostic;
pub mod dsl;
pub mod ir;
pub mod kernels;
pub mod lower;
pub mod runtime;

pub use codegen::{CodegenError, Target};
pub use kernels::FieldParams;
pub use lower::LowerError;
pub use runtime::RuntimeError;

use diagnostic::Diagnostic;
use thiserror::Error;

/// Any failure on the way from host AST to kernel source.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Lower(#[from] LowerError),
    #[error(transparent)]
    Codegen(#[from] CodegenError),
}

/// Kernel source for one backend, plus its content hash and any
/// warning-class diagnostics collected while lowering.
#[derive(Clone, Debug)]
pub struct CompiledSource {
    pub source: String,
    pub hash: String,
    pub warnings: Vec<Diagnostic>,
}

/// Compile a host program to kernel source for one target.
pub fn compile(program: &dsl::Program, target: Target) -> Result<CompiledSource, CompileError> {
    let unit = lower::lower_program(program)?;
    let mut generator = codegen::create_codegen(target);
    let source = generator.generate(&unit.program)?;
    let hash = codegen::source_hash(&source);
    Ok(CompiledSource { source, hash, warnings: unit.warnings })
}
