//! CUDA-dialect backend.
//!
//! Emits an extern-"C"-style function-per-kernel C dialect suitable for
//! NVRTC: no includes, self-contained typedef prelude, execution-space
//! qualifiers before each signature. Flagged aggregate copies become
//! `memcpy` calls sized from the element type.

use crate::ir::{Attribute, Node, Program, Symbol, SymbolKind, Type};

use super::{CodegenError, KernelCodegen, SourceWriter};

const BACKEND: &'static str = "cuda";

pub struct CudaCodegen {
    w: SourceWriter,
}

impl CudaCodegen {
    pub fn new() -> Self {
        Self { w: SourceWriter::new() }
    }
}

impl Default for CudaCodegen {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelCodegen for CudaCodegen {
    fn target_name(&self) -> &'static str {
        BACKEND
    }

    fn file_extension(&self) -> &'static str {
        ".cu"
    }

    fn generate(&mut self, program: &Program) -> Result<String, CodegenError> {
        self.w = SourceWriter::new();
        self.prelude();

        for ty in &program.types {
            self.struct_decl(ty)?;
        }

        // Prototypes first: definition order is discovery order, which
        // does not guarantee declaration-before-use in C.
        let mut wrote_proto = false;
        for proc in &program.procs {
            if let Node::Proc { sym, params, attrs, .. } = proc {
                let sig = self.signature(sym, params, attrs)?;
                self.w.line(format!("{};", sig));
                wrote_proto = true;
            }
        }
        if wrote_proto {
            self.w.blank();
        }

        for proc in &program.procs {
            self.emit_proc(proc)?;
        }

        Ok(std::mem::replace(&mut self.w, SourceWriter::new()).finish())
    }
}

impl CudaCodegen {
    fn prelude(&mut self) {
        self.w.line("typedef unsigned char uint8_t;");
        self.w.line("typedef unsigned short uint16_t;");
        self.w.line("typedef unsigned int uint32_t;");
        self.w.line("typedef unsigned long long uint64_t;");
        self.w.line("typedef short int16_t;");
        self.w.line("typedef int int32_t;");
        self.w.line("typedef long long int64_t;");
        self.w.blank();
    }

    fn struct_decl(&mut self, ty: &Type) -> Result<(), CodegenError> {
        let name = ty.decl_name().ok_or_else(|| CodegenError::Invalid {
            backend: BACKEND,
            msg: format!("type {} is not declarable", ty),
        })?;
        let fields = ty.fields().unwrap_or(&[]);
        self.w.line(format!("struct {} {{", name));
        self.w.indent();
        for (fname, fty) in fields {
            let decl = self.cdecl(fty, fname)?;
            self.w.line(format!("{};", decl));
        }
        self.w.dedent();
        self.w.line("};");
        self.w.blank();
        Ok(())
    }

    // ── Types ──

    fn ctype(&self, ty: &Type) -> Result<String, CodegenError> {
        Ok(match ty {
            Type::Void => "void".into(),
            Type::Bool => "bool".into(),
            Type::U8 => "uint8_t".into(),
            Type::U16 => "uint16_t".into(),
            Type::U32 => "uint32_t".into(),
            Type::U64 => "uint64_t".into(),
            Type::I16 => "int16_t".into(),
            Type::I32 => "int32_t".into(),
            Type::I64 => "int64_t".into(),
            Type::F32 => "float".into(),
            Type::F64 => "double".into(),
            Type::Size => "size_t".into(),
            Type::Str => "const char*".into(),
            Type::Array { elem, len: 0 } | Type::UncheckedArray { elem } => {
                format!("{}*", self.ctype(elem)?)
            }
            Type::Ptr { pointee, .. } => match pointee.as_ref() {
                Type::Array { elem, len } if *len > 0 => {
                    format!("{} (*)[{}]", self.ctype(elem)?, len)
                }
                other => format!("{}*", self.ctype(other)?),
            },
            Type::VoidPtr => "void*".into(),
            Type::Object { .. } | Type::Instance { .. } => ty.decl_name().unwrap(),
            other => {
                return Err(CodegenError::UnsupportedType {
                    backend: BACKEND,
                    ty: format!("{}", other),
                })
            }
        })
    }

    /// Declare `name` with type `ty`, array dimensions trailing.
    fn cdecl(&self, ty: &Type, name: &str) -> Result<String, CodegenError> {
        match ty {
            Type::Array { elem, len } if *len > 0 => {
                self.cdecl(elem, &format!("{}[{}]", name, len))
            }
            Type::Array { elem, len: 0 } | Type::UncheckedArray { elem } => {
                Ok(format!("{}* {}", self.ctype(elem)?, name))
            }
            Type::Ptr { pointee, .. } => match pointee.as_ref() {
                Type::Array { elem, len } if *len > 0 => {
                    Ok(format!("{} (*{})[{}]", self.ctype(elem)?, name, len))
                }
                other => Ok(format!("{}* {}", self.ctype(other)?, name)),
            },
            other => Ok(format!("{} {}", self.ctype(other)?, name)),
        }
    }

    fn param_decl(&self, sym: &Symbol) -> Result<String, CodegenError> {
        match &sym.ty {
            // Pass-by-mutable-reference: arrays decay to pointers with no
            // deref syntax at use sites; everything else is an explicit
            // pointer the expression emitter dereferences.
            Type::Ptr { pointee, implicit: true, .. } => match pointee.as_ref() {
                arr @ Type::Array { len, .. } if *len > 0 => self.cdecl(arr, &sym.name),
                Type::Array { elem, len: 0 } | Type::UncheckedArray { elem } => {
                    Ok(format!("{}* {}", self.ctype(elem)?, sym.name))
                }
                other => Ok(format!("{}* {}", self.ctype(other)?, sym.name)),
            },
            other => self.cdecl(other, &sym.name),
        }
    }

    // ── Procedures ──

    fn signature(
        &self,
        sym: &Symbol,
        params: &[Symbol],
        attrs: &crate::ir::AttrSet,
    ) -> Result<String, CodegenError> {
        let mut quals = String::new();
        if attrs.has(Attribute::Kernel) {
            quals.push_str("extern \"C\" __global__ ");
        } else {
            if attrs.has(Attribute::Exported) {
                quals.push_str("extern \"C\" ");
            }
            if attrs.has(Attribute::Device) {
                quals.push_str("__device__ ");
            }
            if attrs.has(Attribute::ForceInline) {
                quals.push_str("__forceinline__ ");
            }
        }

        let mut plist = Vec::new();
        for p in params {
            plist.push(self.param_decl(p)?);
        }
        let plist = plist.join(", ");

        // Function returning pointer to fixed-size array: the declarator
        // wraps the whole signature, so it gets its own template.
        if let Type::Ptr { pointee, .. } = &sym.ty {
            if let Type::Array { elem, len } = pointee.as_ref() {
                if *len > 0 {
                    return Ok(format!(
                        "{}{} (*{}({}))[{}]",
                        quals,
                        self.ctype(elem)?,
                        sym.name,
                        plist,
                        len
                    ));
                }
            }
        }

        Ok(format!("{}{} {}({})", quals, self.ctype(&sym.ty)?, sym.name, plist))
    }

    fn emit_proc(&mut self, node: &Node) -> Result<(), CodegenError> {
        let (sym, params, attrs, body) = match node {
            Node::Proc { sym, params, attrs, body } => (sym, params, attrs, body),
            other => {
                return Err(CodegenError::UnsupportedNode {
                    backend: BACKEND,
                    kind: other.kind_name(),
                })
            }
        };
        let sig = self.signature(sym, params, attrs)?;
        self.w.line(format!("{} {{", sig));
        self.w.indent();
        self.emit_body(body)?;
        self.w.dedent();
        self.w.line("}");
        self.w.blank();
        Ok(())
    }

    fn emit_body(&mut self, body: &Node) -> Result<(), CodegenError> {
        match body {
            Node::Block { body, .. } => {
                for stmt in body {
                    self.emit_stmt(stmt)?;
                }
                Ok(())
            }
            other => self.emit_stmt(other),
        }
    }

    // ── Statements ──

    fn emit_stmt(&mut self, node: &Node) -> Result<(), CodegenError> {
        match node {
            Node::Empty => Ok(()),
            Node::Block { .. } => {
                self.w.line("{");
                self.w.indent();
                self.emit_body(node)?;
                self.w.dedent();
                self.w.line("}");
                Ok(())
            }
            Node::VarDecl { sym, init, needs_copy, .. } => {
                let prefix = match sym.kind {
                    SymbolKind::Shared => "__shared__ ",
                    _ => "",
                };
                let decl = self.cdecl(&sym.ty, &sym.name)?;
                if *needs_copy {
                    let src = init.as_ref().ok_or_else(|| CodegenError::Invalid {
                        backend: BACKEND,
                        msg: format!("copy-flagged declaration of `{}` has no source", sym.name),
                    })?;
                    let src = self.emit_expr(src)?;
                    self.w.line(format!("{}{};", prefix, decl));
                    self.w.line(self.memcpy(&sym.name, &src, &sym.ty)?);
                } else if let Some(init) = init {
                    let init = self.emit_expr(init)?;
                    self.w.line(format!("{}{} = {};", prefix, decl, init));
                } else {
                    self.w.line(format!("{}{};", prefix, decl));
                }
                Ok(())
            }
            Node::Assign { target, value, needs_copy } => {
                let t = self.emit_expr(target)?;
                let v = self.emit_expr(value)?;
                if *needs_copy {
                    self.w.line(self.memcpy(&t, &v, &target.ty())?);
                } else {
                    self.w.line(format!("{} = {};", t, v));
                }
                Ok(())
            }
            Node::If { arms, else_body } => {
                for (i, arm) in arms.iter().enumerate() {
                    let cond = self.emit_expr(&arm.cond)?;
                    if i == 0 {
                        self.w.line(format!("if ({}) {{", cond));
                    } else {
                        self.w.line(format!("}} else if ({}) {{", cond));
                    }
                    self.w.indent();
                    self.emit_body(&arm.body)?;
                    self.w.dedent();
                }
                if let Some(else_body) = else_body {
                    self.w.line("} else {");
                    self.w.indent();
                    self.emit_body(else_body)?;
                    self.w.dedent();
                }
                self.w.line("}");
                Ok(())
            }
            Node::For { var, start, end, body } => {
                let start = self.emit_expr(start)?;
                let end = self.emit_expr(end)?;
                let ty = self.ctype(&var.ty)?;
                self.w.line(format!(
                    "for ({} {} = {}; {} < {}; ++{}) {{",
                    ty, var.name, start, var.name, end, var.name
                ));
                self.w.indent();
                self.emit_body(body)?;
                self.w.dedent();
                self.w.line("}");
                Ok(())
            }
            Node::While { cond, body } => {
                let cond = self.emit_expr(cond)?;
                self.w.line(format!("while ({}) {{", cond));
                self.w.indent();
                self.emit_body(body)?;
                self.w.dedent();
                self.w.line("}");
                Ok(())
            }
            Node::Return(value) => {
                match value {
                    Some(v) => {
                        let v = self.emit_expr(v)?;
                        self.w.line(format!("return {};", v));
                    }
                    None => self.w.line("return;"),
                }
                Ok(())
            }
            Node::Asm(text) => {
                for line in text.lines() {
                    self.w.line(line);
                }
                Ok(())
            }
            expr if expr.is_expression() => {
                let e = self.emit_expr(expr)?;
                self.w.line(format!("{};", e));
                Ok(())
            }
            other => Err(CodegenError::UnsupportedNode {
                backend: BACKEND,
                kind: other.kind_name(),
            }),
        }
    }

    fn memcpy(&self, dst: &str, src: &str, ty: &Type) -> Result<String, CodegenError> {
        match ty {
            Type::Array { elem, len } if *len > 0 => Ok(format!(
                "memcpy({}, {}, sizeof({}) * {});",
                dst,
                src,
                self.ctype(elem)?,
                len
            )),
            other => Err(CodegenError::Invalid {
                backend: BACKEND,
                msg: format!("copy flagged for non-array type {}", other),
            }),
        }
    }

    // ── Expressions ──

    fn emit_expr(&mut self, node: &Node) -> Result<String, CodegenError> {
        Ok(match node {
            Node::Sym(sym) => match &sym.ty {
                Type::Ptr { pointee, implicit: true, .. } => match pointee.as_ref() {
                    Type::Array { .. } | Type::UncheckedArray { .. } => sym.name.clone(),
                    _ => format!("(*{})", sym.name),
                },
                _ => sym.name.clone(),
            },
            Node::IntLit { value, ty } => match ty {
                Type::U64 => format!("{}ULL", value),
                Type::U8 | Type::U16 | Type::U32 => format!("{}u", value),
                Type::F32 | Type::F64 => format!("{:?}", *value as f64),
                _ => format!("{}", value),
            },
            Node::FloatLit { value, ty } => match ty {
                Type::F32 => format!("{:?}f", value),
                _ => format!("{:?}", value),
            },
            Node::BoolLit(b) => format!("{}", b),
            Node::StrLit(s) => format!("\"{}\"", s.escape_default()),
            Node::NilLit { .. } => "0".into(),
            Node::ArrayLit { elems, .. } => {
                let mut parts = Vec::new();
                for e in elems {
                    parts.push(self.emit_expr(e)?);
                }
                format!("{{{}}}", parts.join(", "))
            }
            Node::Construct { ty, args } => {
                let name = ty.decl_name().ok_or_else(|| CodegenError::Invalid {
                    backend: BACKEND,
                    msg: format!("construct of non-struct type {}", ty),
                })?;
                let mut parts = Vec::new();
                for a in args {
                    parts.push(self.emit_expr(a)?);
                }
                format!("{}{{{}}}", name, parts.join(", "))
            }
            Node::Call { callee, args, .. } => {
                let mut parts = Vec::new();
                for a in args {
                    parts.push(self.emit_expr(a)?);
                }
                format!("{}({})", callee.name, parts.join(", "))
            }
            Node::Binary { op, lhs, rhs, .. } => {
                format!(
                    "({} {} {})",
                    self.emit_expr(lhs)?,
                    op.token(),
                    self.emit_expr(rhs)?
                )
            }
            Node::Unary { op, operand, .. } => {
                format!("({}{})", op.token(), self.emit_expr(operand)?)
            }
            Node::Member { obj, field, .. } => {
                format!("{}.{}", self.emit_expr(obj)?, field)
            }
            Node::Index { base, index, .. } => {
                format!("{}[{}]", self.emit_expr(base)?, self.emit_expr(index)?)
            }
            Node::AddrOf { operand, ty } => {
                let implicit = matches!(ty, Type::Ptr { implicit: true, .. });
                let decays = matches!(
                    operand.ty(),
                    Type::Array { .. } | Type::UncheckedArray { .. }
                );
                if implicit && decays {
                    self.emit_expr(operand)?
                } else {
                    format!("(&{})", self.emit_expr(operand)?)
                }
            }
            Node::Deref { operand, .. } => format!("(*{})", self.emit_expr(operand)?),
            Node::Convert { ty, operand } => {
                format!("(({})({}))", self.ctype(ty)?, self.emit_expr(operand)?)
            }
            Node::Cast { ty, operand } => {
                format!("(*({}*)&({}))", self.ctype(ty)?, self.emit_expr(operand)?)
            }
            // Block in value position: GNU statement expression, emitted
            // on one line so it can sit inside any expression.
            Node::Block { body, .. } => {
                let lines = self.capture_stmts(body)?;
                let joined = lines
                    .iter()
                    .map(|l| l.trim())
                    .collect::<Vec<_>>()
                    .join(" ");
                format!("({{ {} }})", joined)
            }
            other => {
                return Err(CodegenError::UnsupportedNode {
                    backend: BACKEND,
                    kind: other.kind_name(),
                })
            }
        })
    }

    /// Emit statements into a side buffer instead of the main writer.
    fn capture_stmts(&mut self, body: &[Node]) -> Result<Vec<String>, CodegenError> {
        let saved = std::mem::replace(&mut self.w, SourceWriter::new());
        let mut result = Ok(());
        for stmt in body {
            result = self.emit_stmt(stmt);
            if result.is_err() {
                break;
            }
        }
        let captured = std::mem::replace(&mut self.w, saved);
        result?;
        Ok(captured.into_lines())
    }
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::AttrSet;

    fn cg() -> CudaCodegen {
        CudaCodegen::new()
    }

    fn limbs(n: u64) -> Type {
        Type::Array { elem: Box::new(Type::U32), len: n }
    }

    #[test]
    fn scalar_type_names() {
        let c = cg();
        assert_eq!(c.ctype(&Type::U64).unwrap(), "uint64_t");
        assert_eq!(c.ctype(&Type::F32).unwrap(), "float");
        assert_eq!(c.ctype(&Type::VoidPtr).unwrap(), "void*");
    }

    #[test]
    fn array_declarator_dimensions_trail() {
        let c = cg();
        assert_eq!(c.cdecl(&limbs(8), "t").unwrap(), "uint32_t t[8]");
        let nested = Type::Array { elem: Box::new(limbs(8)), len: 4 };
        assert_eq!(c.cdecl(&nested, "m").unwrap(), "uint32_t m[4][8]");
    }

    #[test]
    fn flexible_array_is_pointer_like() {
        let c = cg();
        let flex = Type::Array { elem: Box::new(Type::U64), len: 0 };
        assert_eq!(c.cdecl(&flex, "p").unwrap(), "uint64_t* p");
    }

    #[test]
    fn pointer_to_array_return_template() {
        let c = cg();
        let ret = Type::Ptr {
            pointee: Box::new(limbs(8)),
            implicit: false,
            mutable: true,
        };
        let sym = Symbol::new("get_limbs", "get_limbs()", ret, SymbolKind::Proc);
        let mut attrs = AttrSet::new();
        attrs.add(Attribute::Device);
        let sig = c.signature(&sym, &[], &attrs).unwrap();
        assert_eq!(sig, "__device__ uint32_t (*get_limbs())[8]");
    }

    #[test]
    fn kernel_signature_is_extern_c_global() {
        let c = cg();
        let sym = Symbol::new("mod_add", "mod_add()", Type::Void, SymbolKind::Proc);
        let param_ty = Type::Ptr {
            pointee: Box::new(limbs(8)),
            implicit: true,
            mutable: true,
        };
        let p = Symbol::new("r", "mod_add.r", param_ty, SymbolKind::Global);
        let mut attrs = AttrSet::new();
        attrs.add(Attribute::Kernel);
        let sig = c.signature(&sym, &[p], &attrs).unwrap();
        assert_eq!(sig, "extern \"C\" __global__ void mod_add(uint32_t r[8])");
    }

    #[test]
    fn memcpy_is_element_sized() {
        let c = cg();
        let line = c.memcpy("r", "t", &limbs(8)).unwrap();
        assert_eq!(line, "memcpy(r, t, sizeof(uint32_t) * 8);");
    }

    #[test]
    fn implicit_scalar_param_reads_through_pointer() {
        let mut c = cg();
        let ty = Type::Ptr {
            pointee: Box::new(Type::U32),
            implicit: true,
            mutable: true,
        };
        let n = Node::Sym(Symbol::new("x", "f.x", ty, SymbolKind::Param));
        assert_eq!(c.emit_expr(&n).unwrap(), "(*x)");
    }
}
