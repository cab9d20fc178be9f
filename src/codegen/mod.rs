//! Code generation: IR program → kernel source text.
//!
//! Two divergent backends share one IR. Each is a recursive descent that
//! either emits a node or fails hard naming the node kind — silently
//! dropping a statement would miscompile the kernel.

mod cuda;
mod wgsl;

pub use cuda::CudaCodegen;
pub use wgsl::WgslCodegen;

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::ir::Program;

// ─── Errors ───────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CodegenError {
    #[error("{backend} backend has no handler for IR node kind `{kind}`")]
    UnsupportedNode {
        backend: &'static str,
        kind: &'static str,
    },
    #[error("{backend} backend cannot represent type {ty}")]
    UnsupportedType { backend: &'static str, ty: String },
    #[error("{backend} backend: {msg}")]
    Invalid { backend: &'static str, msg: String },
}

// ─── Backend selection ────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    Cuda,
    Wgsl,
}

impl Target {
    pub fn all() -> [Target; 2] {
        [Target::Cuda, Target::Wgsl]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Target::Cuda => "cuda",
            Target::Wgsl => "wgsl",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cuda" => Ok(Target::Cuda),
            "wgsl" => Ok(Target::Wgsl),
            other => Err(format!("unknown target `{}` (expected cuda or wgsl)", other)),
        }
    }
}

/// Emits kernel source for one backend dialect.
pub trait KernelCodegen {
    fn target_name(&self) -> &'static str;
    fn file_extension(&self) -> &'static str;
    fn generate(&mut self, program: &Program) -> Result<String, CodegenError>;
}

/// Create a code generator for the given target.
pub fn create_codegen(target: Target) -> Box<dyn KernelCodegen> {
    match target {
        Target::Cuda => Box::new(CudaCodegen::new()),
        Target::Wgsl => Box::new(WgslCodegen::new()),
    }
}

/// Stable content hash of emitted source, for embedder-side caching.
pub fn source_hash(source: &str) -> String {
    blake3::hash(source.as_bytes()).to_hex()[..32].to_string()
}

// ─── Source writer ────────────────────────────────────────────────

/// Line-oriented output buffer with indent tracking.
pub(crate) struct SourceWriter {
    lines: Vec<String>,
    indent: usize,
}

impl SourceWriter {
    pub fn new() -> Self {
        Self { lines: Vec::new(), indent: 0 }
    }

    pub fn line(&mut self, text: impl AsRef<str>) {
        let text = text.as_ref();
        if text.is_empty() {
            self.lines.push(String::new());
        } else {
            self.lines.push(format!("{}{}", "    ".repeat(self.indent), text));
        }
    }

    pub fn blank(&mut self) {
        self.lines.push(String::new());
    }

    pub fn indent(&mut self) {
        self.indent += 1;
    }

    pub fn dedent(&mut self) {
        self.indent = self.indent.saturating_sub(1);
    }

    pub fn append(&mut self, lines: Vec<String>) {
        self.lines.extend(lines);
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }

    pub fn finish(self) -> String {
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_indents() {
        let mut w = SourceWriter::new();
        w.line("a {");
        w.indent();
        w.line("b;");
        w.dedent();
        w.line("}");
        assert_eq!(w.finish(), "a {\n    b;\n}\n");
    }

    #[test]
    fn writer_append_and_into_lines() {
        let mut w = SourceWriter::new();
        w.line("a");
        w.append(vec!["b".into()]);
        assert_eq!(w.into_lines(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn backend_metadata_matches_target() {
        for t in Target::all() {
            let cg = create_codegen(t);
            assert_eq!(cg.target_name(), t.name());
            assert!(cg.file_extension().starts_with('.'));
        }
    }

    #[test]
    fn target_parsing() {
        assert_eq!("cuda".parse::<Target>().unwrap(), Target::Cuda);
        assert_eq!("wgsl".parse::<Target>().unwrap(), Target::Wgsl);
        assert!("metal".parse::<Target>().is_err());
    }

    #[test]
    fn source_hash_is_stable() {
        let a = source_hash("__global__ void k() {}");
        let b = source_hash("__global__ void k() {}");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert_ne!(a, source_hash("__global__ void k2() {}"));
    }
}
