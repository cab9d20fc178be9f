//! WGSL-dialect backend.
//!
//! Divergences from the CUDA backend that are modeled explicitly:
//! per-parameter address spaces instead of per-function qualifiers,
//! element-wise loops instead of `memcpy`, kernel parameters emitted as
//! storage bindings with copy-in/copy-out materialization, block
//! expressions hoisted into temporaries before the enclosing statement,
//! and pointer-shaped struct fields lifted to module-scope globals.

use std::collections::HashMap;

use crate::ir::{Attribute, IfArm, Node, Program, Symbol, SymbolKind, Type};

use super::{CodegenError, KernelCodegen, SourceWriter};

const BACKEND: &str = "wgsl";

pub struct WgslCodegen {
    w: SourceWriter,
    /// Module-scope declarations discovered during emission (storage
    /// bindings, workgroup/private variables, lifted pointer fields).
    globals: Vec<String>,
    /// `(struct name, field name)` → module-scope variable backing a
    /// pointer-shaped field.
    lifted_fields: HashMap<(String, String), String>,
    /// Kernel parameters that cannot be materialized into locals
    /// (runtime-sized arrays); reads go straight to the binding.
    direct_params: HashMap<String, String>,
    temp_counter: u32,
}

impl WgslCodegen {
    pub fn new() -> Self {
        Self {
            w: SourceWriter::new(),
            globals: Vec::new(),
            lifted_fields: HashMap::new(),
            direct_params: HashMap::new(),
            temp_counter: 0,
        }
    }

    fn fresh(&mut self, prefix: &str) -> String {
        self.temp_counter += 1;
        format!("{}{}", prefix, self.temp_counter)
    }
}

impl Default for WgslCodegen {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelCodegen for WgslCodegen {
    fn target_name(&self) -> &'static str {
        BACKEND
    }

    fn file_extension(&self) -> &'static str {
        ".wgsl"
    }

    fn generate(&mut self, program: &Program) -> Result<String, CodegenError> {
        self.w = SourceWriter::new();
        self.globals.clear();
        self.lifted_fields.clear();
        self.direct_params.clear();
        self.temp_counter = 0;

        // Pointer-shaped struct fields cannot exist in this dialect;
        // find the values injected at construction sites first so both
        // struct declarations and field reads agree on the lifting.
        for proc in &program.procs {
            self.scan_lifted(proc)?;
        }

        let mut struct_lines = Vec::new();
        for ty in &program.types {
            struct_lines.extend(self.struct_decl(ty)?);
        }

        let saved = std::mem::replace(&mut self.w, SourceWriter::new());
        let mut result = Ok(());
        for proc in &program.procs {
            result = self.emit_proc(proc);
            if result.is_err() {
                break;
            }
        }
        let proc_lines = std::mem::replace(&mut self.w, saved).into_lines();
        result?;

        let mut out = SourceWriter::new();
        out.append(struct_lines);
        for g in &self.globals {
            out.line(g);
        }
        if !self.globals.is_empty() {
            out.blank();
        }
        out.append(proc_lines);
        Ok(out.finish())
    }
}

impl WgslCodegen {
    // ── Lifting scan ──

    fn scan_lifted(&mut self, node: &Node) -> Result<(), CodegenError> {
        match node {
            Node::Proc { body, .. } => self.scan_lifted(body),
            Node::Block { body, .. } => {
                for n in body {
                    self.scan_lifted(n)?;
                }
                Ok(())
            }
            Node::VarDecl { init, .. } => match init {
                Some(init) => self.scan_lifted(init),
                None => Ok(()),
            },
            Node::Assign { target, value, .. } => {
                self.scan_lifted(target)?;
                self.scan_lifted(value)
            }
            Node::If { arms, else_body } => {
                for IfArm { cond, body } in arms {
                    self.scan_lifted(cond)?;
                    self.scan_lifted(body)?;
                }
                if let Some(e) = else_body {
                    self.scan_lifted(e)?;
                }
                Ok(())
            }
            Node::For { start, end, body, .. } => {
                self.scan_lifted(start)?;
                self.scan_lifted(end)?;
                self.scan_lifted(body)
            }
            Node::While { cond, body } => {
                self.scan_lifted(cond)?;
                self.scan_lifted(body)
            }
            Node::Return(Some(v)) => self.scan_lifted(v),
            Node::Call { args, .. } | Node::ArrayLit { elems: args, .. } => {
                for a in args {
                    self.scan_lifted(a)?;
                }
                Ok(())
            }
            Node::Construct { ty, args } => {
                for a in args {
                    self.scan_lifted(a)?;
                }
                self.record_lifted(ty, args)
            }
            Node::Binary { lhs, rhs, .. } => {
                self.scan_lifted(lhs)?;
                self.scan_lifted(rhs)
            }
            Node::Unary { operand, .. }
            | Node::Member { obj: operand, .. }
            | Node::AddrOf { operand, .. }
            | Node::Deref { operand, .. }
            | Node::Convert { operand, .. }
            | Node::Cast { operand, .. } => self.scan_lifted(operand),
            Node::Index { base, index, .. } => {
                self.scan_lifted(base)?;
                self.scan_lifted(index)
            }
            _ => Ok(()),
        }
    }

    fn record_lifted(&mut self, ty: &Type, args: &[Node]) -> Result<(), CodegenError> {
        let Some(fields) = ty.fields() else { return Ok(()) };
        let Some(struct_name) = ty.decl_name() else { return Ok(()) };
        for ((fname, fty), arg) in fields.iter().zip(args) {
            if !fty.is_pointer() {
                continue;
            }
            match arg {
                Node::NilLit { .. } => {}
                Node::AddrOf { operand, .. } => match operand.as_ref() {
                    Node::Sym(s)
                        if matches!(s.kind, SymbolKind::Shared | SymbolKind::Private) =>
                    {
                        let key = (struct_name.clone(), fname.clone());
                        if let Some(prev) = self.lifted_fields.get(&key) {
                            if prev != &s.name {
                                return Err(CodegenError::Invalid {
                                    backend: BACKEND,
                                    msg: format!(
                                        "pointer field {}.{} bound to two different globals",
                                        struct_name, fname
                                    ),
                                });
                            }
                        }
                        self.lifted_fields.insert(key, s.name.clone());
                    }
                    _ => {
                        return Err(CodegenError::Invalid {
                            backend: BACKEND,
                            msg: format!(
                                "pointer field {}.{} must be injected from shared or private storage",
                                struct_name, fname
                            ),
                        })
                    }
                },
                _ => {
                    return Err(CodegenError::Invalid {
                        backend: BACKEND,
                        msg: format!(
                            "pointer field {}.{} must be injected as an address or nil",
                            struct_name, fname
                        ),
                    })
                }
            }
        }
        Ok(())
    }

    // ── Types ──

    fn wtype(&self, ty: &Type) -> Result<String, CodegenError> {
        Ok(match ty {
            Type::Bool => "bool".into(),
            Type::U32 => "u32".into(),
            Type::I32 => "i32".into(),
            Type::F32 => "f32".into(),
            Type::Size => "u32".into(),
            Type::Array { elem, len } if *len > 0 => {
                format!("array<{}, {}>", self.wtype(elem)?, len)
            }
            Type::Array { elem, len: 0 } | Type::UncheckedArray { elem } => {
                format!("array<{}>", self.wtype(elem)?)
            }
            Type::Ptr { pointee, .. } => format!("ptr<function, {}>", self.wtype(pointee)?),
            Type::Object { .. } | Type::Instance { .. } => ty.decl_name().unwrap(),
            other => {
                return Err(CodegenError::UnsupportedType {
                    backend: BACKEND,
                    ty: format!("{}", other),
                })
            }
        })
    }

    fn struct_decl(&mut self, ty: &Type) -> Result<Vec<String>, CodegenError> {
        let name = ty.decl_name().ok_or_else(|| CodegenError::Invalid {
            backend: BACKEND,
            msg: format!("type {} is not declarable", ty),
        })?;
        let fields = ty.fields().unwrap_or(&[]);
        let kept: Vec<_> = fields.iter().filter(|(_, t)| !t.is_pointer()).collect();
        if kept.is_empty() {
            return Err(CodegenError::Invalid {
                backend: BACKEND,
                msg: format!("struct {} has only pointer-shaped fields", name),
            });
        }
        let mut lines = Vec::new();
        lines.push(format!("struct {} {{", name));
        for (fname, fty) in kept {
            lines.push(format!("    {}: {},", fname, self.wtype(fty)?));
        }
        lines.push("}".to_string());
        lines.push(String::new());
        Ok(lines)
    }

    /// Address space for a device-function parameter, chosen by the
    /// symbol's role.
    fn param_space(kind: SymbolKind) -> &'static str {
        match kind {
            SymbolKind::Shared => "workgroup",
            SymbolKind::Private => "private",
            SymbolKind::Global => "storage",
            _ => "function",
        }
    }

    // ── Procedures ──

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
        if attrs.has(Attribute::Kernel) {
            self.emit_kernel(sym, params, body)
        } else {
            self.emit_function(sym, params, body)
        }
    }

    fn emit_function(
        &mut self,
        sym: &Symbol,
        params: &[Symbol],
        body: &Node,
    ) -> Result<(), CodegenError> {
        let mut plist = Vec::new();
        for p in params {
            let decl = match &p.ty {
                Type::Ptr { pointee, implicit, .. } => {
                    let space = Self::param_space(p.kind);
                    let access = if *implicit && space == "storage" {
                        ", read_write"
                    } else {
                        ""
                    };
                    format!(
                        "{}: ptr<{}, {}{}>",
                        p.name,
                        space,
                        self.wtype(pointee)?,
                        access
                    )
                }
                other => format!("{}: {}", p.name, self.wtype(other)?),
            };
            plist.push(decl);
        }
        let plist = plist.join(", ");

        let header = match &sym.ty {
            Type::Void => format!("fn {}({}) {{", sym.name, plist),
            // Function returning a pointer to a fixed-size array needs
            // its own template here as well.
            Type::Ptr { pointee, .. } if pointee.is_fixed_array() => format!(
                "fn {}({}) -> ptr<function, {}> {{",
                sym.name,
                plist,
                self.wtype(pointee)?
            ),
            ret => format!("fn {}({}) -> {} {{", sym.name, plist, self.wtype(ret)?),
        };
        self.w.line(header);
        self.w.indent();
        self.emit_body(body)?;
        self.w.dedent();
        self.w.line("}");
        self.w.blank();
        Ok(())
    }

    fn emit_kernel(
        &mut self,
        sym: &Symbol,
        params: &[Symbol],
        body: &Node,
    ) -> Result<(), CodegenError> {
        self.direct_params.clear();

        // Parameters become storage bindings; results (mutable-reference
        // parameters) are read_write, inputs read-only. Binding order is
        // parameter order, which the execution harness mirrors.
        let mut copy_in = Vec::new();
        let mut copy_out = Vec::new();
        for (idx, p) in params.iter().enumerate() {
            let binding = format!("{}_{}", sym.name, p.name);
            let (value_ty, writable) = match &p.ty {
                Type::Ptr { pointee, implicit: true, .. } => (pointee.as_ref().clone(), true),
                other => (other.clone(), false),
            };
            let access = if writable { "read_write" } else { "read" };
            let wty = self.wtype(&value_ty)?;
            self.globals.push(format!(
                "@group(0) @binding({}) var<storage, {}> {}: {};",
                idx, access, binding, wty
            ));

            match &value_ty {
                Type::Array { len, .. } if *len == 0 => {
                    // Runtime-sized: no local materialization possible.
                    self.direct_params.insert(p.name.clone(), binding);
                }
                Type::Array { len, .. } => {
                    copy_in.push((p.name.clone(), binding.clone(), wty.clone(), *len));
                    if writable {
                        copy_out.push((p.name.clone(), binding, *len));
                    }
                }
                _ => {
                    copy_in.push((p.name.clone(), binding.clone(), wty.clone(), 0));
                    if writable {
                        copy_out.push((p.name.clone(), binding, 0));
                    }
                }
            }
        }

        self.w.line("@compute @workgroup_size(64)");
        self.w.line(format!("fn {}() {{", sym.name));
        self.w.indent();

        for (local, binding, wty, len) in &copy_in {
            if *len == 0 {
                self.w.line(format!("var {}: {} = {};", local, wty, binding));
            } else {
                self.w.line(format!("var {}: {};", local, wty));
                self.element_copy(local, binding, *len)?;
            }
        }

        self.emit_body(body)?;

        for (local, binding, len) in &copy_out {
            if *len == 0 {
                self.w.line(format!("{} = {};", binding, local));
            } else {
                self.element_copy(binding, local, *len)?;
            }
        }

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
            Node::VarDecl { sym, init, mutable, needs_copy } => {
                match sym.kind {
                    // Workgroup and private storage live at module scope
                    // in this dialect.
                    SymbolKind::Shared => {
                        let wty = self.wtype(&sym.ty)?;
                        self.globals
                            .push(format!("var<workgroup> {}: {};", sym.name, wty));
                        return Ok(());
                    }
                    SymbolKind::Private => {
                        let wty = self.wtype(&sym.ty)?;
                        self.globals
                            .push(format!("var<private> {}: {};", sym.name, wty));
                        return Ok(());
                    }
                    _ => {}
                }
                let wty = self.wtype(&sym.ty)?;
                if *needs_copy {
                    let src = init.as_ref().ok_or_else(|| CodegenError::Invalid {
                        backend: BACKEND,
                        msg: format!("copy-flagged declaration of `{}` has no source", sym.name),
                    })?;
                    let src = self.emit_expr(src)?;
                    self.w.line(format!("var {}: {};", sym.name, wty));
                    match &sym.ty {
                        Type::Array { len, .. } if *len > 0 => {
                            self.element_copy(&sym.name, &src, *len)?
                        }
                        other => {
                            return Err(CodegenError::Invalid {
                                backend: BACKEND,
                                msg: format!("copy flagged for non-array type {}", other),
                            })
                        }
                    }
                } else if let Some(init) = init {
                    let init = self.emit_expr(init)?;
                    if *mutable {
                        self.w.line(format!("var {}: {} = {};", sym.name, wty, init));
                    } else {
                        self.w.line(format!("let {}: {} = {};", sym.name, wty, init));
                    }
                } else {
                    self.w.line(format!("var {}: {};", sym.name, wty));
                }
                Ok(())
            }
            Node::Assign { target, value, needs_copy } => {
                let t = self.emit_expr(target)?;
                let v = self.emit_expr(value)?;
                if *needs_copy {
                    match target.ty() {
                        Type::Array { len, .. } if len > 0 => self.element_copy(&t, &v, len),
                        other => Err(CodegenError::Invalid {
                            backend: BACKEND,
                            msg: format!("copy flagged for non-array type {}", other),
                        }),
                    }
                } else {
                    self.w.line(format!("{} = {};", t, v));
                    Ok(())
                }
            }
            Node::If { arms, else_body } => self.emit_if(arms, else_body.as_deref()),
            Node::For { var, start, end, body } => {
                let start = self.emit_expr(start)?;
                let end = self.emit_expr(end)?;
                let wty = self.wtype(&var.ty)?;
                self.w.line(format!(
                    "for (var {}: {} = {}; {} < {}; {} = {} + 1{}) {{",
                    var.name,
                    wty,
                    start,
                    var.name,
                    end,
                    var.name,
                    var.name,
                    if wty == "u32" { "u" } else { "" }
                ));
                self.w.indent();
                self.emit_body(body)?;
                self.w.dedent();
                self.w.line("}");
                Ok(())
            }
            Node::While { cond, body } => {
                let (hoists, c) = self.capture_expr(cond)?;
                if hoists.is_empty() {
                    self.w.line(format!("while ({}) {{", c));
                    self.w.indent();
                    self.emit_body(body)?;
                    self.w.dedent();
                    self.w.line("}");
                } else {
                    // The condition needs statements of its own each
                    // iteration; a while header cannot hold them.
                    self.w.line("loop {");
                    self.w.indent();
                    for l in hoists {
                        self.w.line(l);
                    }
                    self.w.line(format!("if (!({})) {{ break; }}", c));
                    self.emit_body(body)?;
                    self.w.dedent();
                    self.w.line("}");
                }
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
            expr if expr.is_expression() => {
                let e = self.emit_expr(expr)?;
                // Non-void results in statement position are discarded
                // through a phony assignment; bare calls keep their form.
                if expr.ty() == Type::Void {
                    self.w.line(format!("{};", e));
                } else {
                    self.w.line(format!("_ = {};", e));
                }
                Ok(())
            }
            other => Err(CodegenError::UnsupportedNode {
                backend: BACKEND,
                kind: other.kind_name(),
            }),
        }
    }

    fn emit_if(
        &mut self,
        arms: &[IfArm],
        else_body: Option<&Node>,
    ) -> Result<(), CodegenError> {
        let mut nested = 0;
        for (i, arm) in arms.iter().enumerate() {
            let (hoists, cond) = self.capture_expr(&arm.cond)?;
            if i == 0 {
                for l in hoists {
                    self.w.line(l);
                }
                self.w.line(format!("if ({}) {{", cond));
            } else if hoists.is_empty() {
                self.w.line(format!("}} else if ({}) {{", cond));
            } else {
                // Later arm whose condition carries hoisted statements:
                // nest inside the previous else instead of chaining.
                self.w.line("} else {");
                self.w.indent();
                nested += 1;
                for l in hoists {
                    self.w.line(l);
                }
                self.w.line(format!("if ({}) {{", cond));
            }
            self.w.indent();
            self.emit_body(&arm.body)?;
            self.w.dedent();
        }
        if let Some(e) = else_body {
            self.w.line("} else {");
            self.w.indent();
            self.emit_body(e)?;
            self.w.dedent();
        }
        self.w.line("}");
        for _ in 0..nested {
            self.w.dedent();
            self.w.line("}");
        }
        Ok(())
    }

    /// Emit an element-wise copy loop (this dialect has no memcpy).
    fn element_copy(&mut self, dst: &str, src: &str, len: u64) -> Result<(), CodegenError> {
        let i = self.fresh("ci");
        self.w.line(format!(
            "for (var {}: u32 = 0u; {} < {}u; {} = {} + 1u) {{",
            i, i, len, i, i
        ));
        self.w.indent();
        self.w.line(format!("{}[{}] = {}[{}];", dst, i, src, i));
        self.w.dedent();
        self.w.line("}");
        Ok(())
    }

    /// Emit an expression, capturing any statements it has to hoist
    /// (block expressions) so the caller can place them first.
    fn capture_expr(&mut self, node: &Node) -> Result<(Vec<String>, String), CodegenError> {
        let saved = std::mem::replace(&mut self.w, SourceWriter::new());
        let result = self.emit_expr(node);
        let captured = std::mem::replace(&mut self.w, saved).into_lines();
        Ok((captured, result?))
    }

    // ── Expressions ──

    fn emit_expr(&mut self, node: &Node) -> Result<String, CodegenError> {
        Ok(match node {
            Node::Sym(sym) => match sym.kind {
                // Kernel parameters were materialized as locals named
                // after the parameter; runtime-sized ones read straight
                // from their binding.
                SymbolKind::Global => self
                    .direct_params
                    .get(&sym.name)
                    .cloned()
                    .unwrap_or_else(|| sym.name.clone()),
                _ => match &sym.ty {
                    Type::Ptr { implicit: true, .. } => format!("(*{})", sym.name),
                    _ => sym.name.clone(),
                },
            },
            Node::IntLit { value, ty } => match ty {
                Type::U32 | Type::Size => format!("{}u", value),
                Type::I32 => format!("{}", value),
                Type::F32 => format!("{:?}f", *value as f64),
                other => {
                    return Err(CodegenError::UnsupportedType {
                        backend: BACKEND,
                        ty: format!("{}", other),
                    })
                }
            },
            Node::FloatLit { value, ty } => match ty {
                Type::F32 => format!("{:?}f", value),
                other => {
                    return Err(CodegenError::UnsupportedType {
                        backend: BACKEND,
                        ty: format!("{}", other),
                    })
                }
            },
            Node::BoolLit(b) => format!("{}", b),
            Node::NilLit { .. } => {
                return Err(CodegenError::UnsupportedNode {
                    backend: BACKEND,
                    kind: "nil-literal",
                })
            }
            Node::StrLit(_) => {
                return Err(CodegenError::UnsupportedNode {
                    backend: BACKEND,
                    kind: "string-literal",
                })
            }
            Node::ArrayLit { ty, elems } => {
                let wty = self.wtype(ty)?;
                let mut parts = Vec::new();
                for e in elems {
                    parts.push(self.emit_expr(e)?);
                }
                format!("{}({})", wty, parts.join(", "))
            }
            Node::Construct { ty, args } => {
                let name = ty.decl_name().ok_or_else(|| CodegenError::Invalid {
                    backend: BACKEND,
                    msg: format!("construct of non-struct type {}", ty),
                })?;
                let fields = ty.fields().unwrap_or(&[]);
                let mut parts = Vec::new();
                for ((_, fty), a) in fields.iter().zip(args) {
                    if fty.is_pointer() {
                        // Lifted to module scope; value omitted here.
                        continue;
                    }
                    parts.push(self.emit_expr(a)?);
                }
                format!("{}({})", name, parts.join(", "))
            }
            Node::Call { callee, args, .. } => {
                let mut parts = Vec::new();
                for a in args {
                    parts.push(self.emit_expr(a)?);
                }
                format!("{}({})", callee.name, parts.join(", "))
            }
            Node::Binary { op, lhs, rhs, .. } => format!(
                "({} {} {})",
                self.emit_expr(lhs)?,
                op.token(),
                self.emit_expr(rhs)?
            ),
            Node::Unary { op, operand, .. } => {
                format!("({}{})", op.token(), self.emit_expr(operand)?)
            }
            Node::Member { obj, field, ty } => {
                if ty.is_pointer() {
                    if let Some(struct_name) = obj.ty().decl_name() {
                        if let Some(global) =
                            self.lifted_fields.get(&(struct_name.clone(), field.clone()))
                        {
                            return Ok(format!("(&{})", global));
                        }
                    }
                    return Err(CodegenError::Invalid {
                        backend: BACKEND,
                        msg: format!("read of unlifted pointer field `{}`", field),
                    });
                }
                format!("{}.{}", self.emit_expr(obj)?, field)
            }
            Node::Index { base, index, .. } => {
                format!("{}[{}]", self.emit_expr(base)?, self.emit_expr(index)?)
            }
            Node::AddrOf { operand, .. } => format!("(&{})", self.emit_expr(operand)?),
            Node::Deref { operand, .. } => format!("(*{})", self.emit_expr(operand)?),
            Node::Convert { ty, operand } => {
                format!("{}({})", self.wtype(ty)?, self.emit_expr(operand)?)
            }
            Node::Cast { ty, operand } => {
                format!("bitcast<{}>({})", self.wtype(ty)?, self.emit_expr(operand)?)
            }
            // Block expression: hoist into a temporary declared before
            // the enclosing statement.
            Node::Block { body, ty } => {
                if *ty == Type::Void || body.is_empty() {
                    return Err(CodegenError::UnsupportedNode {
                        backend: BACKEND,
                        kind: "block",
                    });
                }
                let tmp = self.fresh("blk");
                let wty = self.wtype(ty)?;
                self.w.line(format!("var {}: {};", tmp, wty));
                let (last, init) = body.split_last().unwrap();
                for stmt in init {
                    self.emit_stmt(stmt)?;
                }
                if last.is_expression() {
                    let v = self.emit_expr(last)?;
                    self.w.line(format!("{} = {};", tmp, v));
                } else {
                    return Err(CodegenError::Invalid {
                        backend: BACKEND,
                        msg: "block expression does not end in a value".into(),
                    });
                }
                tmp
            }
            other => {
                return Err(CodegenError::UnsupportedNode {
                    backend: BACKEND,
                    kind: other.kind_name(),
                })
            }
        })
    }
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn cg() -> WgslCodegen {
        WgslCodegen::new()
    }

    fn limbs(n: u64) -> Type {
        Type::Array { elem: Box::new(Type::U32), len: n }
    }

    #[test]
    fn scalar_type_names() {
        let c = cg();
        assert_eq!(c.wtype(&Type::U32).unwrap(), "u32");
        assert_eq!(c.wtype(&Type::Size).unwrap(), "u32");
        assert_eq!(c.wtype(&limbs(8)).unwrap(), "array<u32, 8>");
    }

    #[test]
    fn wide_types_are_rejected() {
        let c = cg();
        assert!(c.wtype(&Type::U64).is_err());
        assert!(c.wtype(&Type::F64).is_err());
        assert!(c.wtype(&Type::Str).is_err());
    }

    #[test]
    fn element_copy_is_a_loop() {
        let mut c = cg();
        c.element_copy("r", "t", 4).unwrap();
        let lines = std::mem::replace(&mut c.w, SourceWriter::new()).into_lines();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("for (var ci1: u32 = 0u; ci1 < 4u;"));
        assert_eq!(lines[1], "    r[ci1] = t[ci1];");
        assert_eq!(lines[2], "}");
    }

    #[test]
    fn block_expression_hoists_into_temp() {
        let mut c = cg();
        let block = Node::Block {
            body: vec![Node::IntLit { value: 7, ty: Type::U32 }],
            ty: Type::U32,
        };
        let cond = Node::Binary {
            op: crate::ir::BinOp::Lt,
            ty: Type::Bool,
            lhs: Box::new(block),
            rhs: Box::new(Node::IntLit { value: 9, ty: Type::U32 }),
        };
        let (hoists, text) = c.capture_expr(&cond).unwrap();
        assert_eq!(hoists, vec!["var blk1: u32;".to_string(), "blk1 = 7u;".to_string()]);
        assert_eq!(text, "(blk1 < 9u)");
    }

    #[test]
    fn implicit_pointer_param_reads_dereferenced() {
        let mut c = cg();
        let ty = Type::Ptr {
            pointee: Box::new(limbs(4)),
            implicit: true,
            mutable: true,
        };
        let n = Node::Sym(Symbol::new("r", "f.r", ty, SymbolKind::Param));
        assert_eq!(c.emit_expr(&n).unwrap(), "(*r)");
    }

    #[test]
    fn kernel_param_sym_reads_bare() {
        let mut c = cg();
        let ty = Type::Ptr {
            pointee: Box::new(limbs(4)),
            implicit: true,
            mutable: true,
        };
        let n = Node::Sym(Symbol::new("r", "k.r", ty, SymbolKind::Global));
        assert_eq!(c.emit_expr(&n).unwrap(), "r");
    }
}
