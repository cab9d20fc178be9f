//! Push-style builders for host programs.
//!
//! Stands in for the host compiler's macro facility: kernel templates
//! assemble their ASTs through these builders rather than from parsed
//! source text.

use super::{Ast, ConstDef, ParamDef, ProcDef, Program, Storage, StructDef, Ty};

// ─── Expression helpers ───────────────────────────────────────────

pub fn ident(name: &str) -> Ast {
    Ast::Ident(name.to_string())
}

pub fn u32_lit(value: u64) -> Ast {
    Ast::Int { value, ty: Ty::U32 }
}

pub fn u64_lit(value: u64) -> Ast {
    Ast::Int { value, ty: Ty::U64 }
}

pub fn size_lit(value: u64) -> Ast {
    Ast::Int { value, ty: Ty::Size }
}

pub fn int_lit(value: u64, ty: Ty) -> Ast {
    Ast::Int { value, ty }
}

pub fn float_lit(value: f64, ty: Ty) -> Ast {
    Ast::Float { value, ty }
}

pub fn bool_lit(value: bool) -> Ast {
    Ast::Bool(value)
}

pub fn call(name: &str, args: Vec<Ast>) -> Ast {
    Ast::Call { name: name.to_string(), args }
}

pub fn infix(op: &str, lhs: Ast, rhs: Ast) -> Ast {
    Ast::Infix {
        op: op.to_string(),
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

pub fn prefix(op: &str, operand: Ast) -> Ast {
    Ast::Prefix { op: op.to_string(), operand: Box::new(operand) }
}

pub fn index(base: Ast, idx: Ast) -> Ast {
    Ast::Index { base: Box::new(base), index: Box::new(idx) }
}

pub fn member(obj: Ast, field: &str) -> Ast {
    Ast::Member { obj: Box::new(obj), field: field.to_string() }
}

pub fn conv(ty: Ty, operand: Ast) -> Ast {
    Ast::Conv { ty, operand: Box::new(operand) }
}

// ─── Block builder ────────────────────────────────────────────────

/// Builds a statement sequence.
#[derive(Default)]
pub struct BlockBuilder {
    stmts: Vec<Ast>,
}

impl BlockBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn let_(&mut self, name: &str, ty: Option<Ty>, init: Option<Ast>) -> &mut Self {
        self.stmts.push(Ast::Let {
            name: name.to_string(),
            ty,
            init: init.map(Box::new),
            mutable: false,
            storage: Storage::Default,
        });
        self
    }

    pub fn let_mut(&mut self, name: &str, ty: Option<Ty>, init: Option<Ast>) -> &mut Self {
        self.stmts.push(Ast::Let {
            name: name.to_string(),
            ty,
            init: init.map(Box::new),
            mutable: true,
            storage: Storage::Default,
        });
        self
    }

    /// Workgroup-shared scratch declaration.
    pub fn let_shared(&mut self, name: &str, ty: Ty) -> &mut Self {
        self.stmts.push(Ast::Let {
            name: name.to_string(),
            ty: Some(ty),
            init: None,
            mutable: true,
            storage: Storage::Shared,
        });
        self
    }

    /// Explicitly thread-private declaration.
    pub fn let_private(&mut self, name: &str, ty: Ty) -> &mut Self {
        self.stmts.push(Ast::Let {
            name: name.to_string(),
            ty: Some(ty),
            init: None,
            mutable: true,
            storage: Storage::Private,
        });
        self
    }

    pub fn assign(&mut self, target: Ast, value: Ast) -> &mut Self {
        self.stmts.push(Ast::Assign {
            target: Box::new(target),
            value: Box::new(value),
        });
        self
    }

    /// Push an expression in statement position (usually a call).
    pub fn expr(&mut self, e: Ast) -> &mut Self {
        self.stmts.push(e);
        self
    }

    pub fn if_(&mut self, cond: Ast, then: impl FnOnce(&mut BlockBuilder)) -> &mut Self {
        let mut b = BlockBuilder::new();
        then(&mut b);
        self.stmts.push(Ast::If {
            arms: vec![(cond, b.finish())],
            else_body: None,
        });
        self
    }

    pub fn if_else(
        &mut self,
        cond: Ast,
        then: impl FnOnce(&mut BlockBuilder),
        otherwise: impl FnOnce(&mut BlockBuilder),
    ) -> &mut Self {
        let mut tb = BlockBuilder::new();
        then(&mut tb);
        let mut eb = BlockBuilder::new();
        otherwise(&mut eb);
        self.stmts.push(Ast::If {
            arms: vec![(cond, tb.finish())],
            else_body: Some(Box::new(eb.finish())),
        });
        self
    }

    pub fn for_(
        &mut self,
        var: &str,
        start: Ast,
        end: Ast,
        body: impl FnOnce(&mut BlockBuilder),
    ) -> &mut Self {
        let mut b = BlockBuilder::new();
        body(&mut b);
        self.stmts.push(Ast::For {
            var: var.to_string(),
            start: Box::new(start),
            end: Box::new(end),
            body: Box::new(b.finish()),
        });
        self
    }

    pub fn while_(&mut self, cond: Ast, body: impl FnOnce(&mut BlockBuilder)) -> &mut Self {
        let mut b = BlockBuilder::new();
        body(&mut b);
        self.stmts.push(Ast::While {
            cond: Box::new(cond),
            body: Box::new(b.finish()),
        });
        self
    }

    pub fn ret(&mut self, value: Option<Ast>) -> &mut Self {
        self.stmts.push(Ast::Return(value.map(Box::new)));
        self
    }

    pub fn asm(&mut self, text: &str) -> &mut Self {
        self.stmts.push(Ast::Asm(text.to_string()));
        self
    }

    pub fn finish(self) -> Ast {
        Ast::Block(self.stmts)
    }
}

// ─── Procedure builder ────────────────────────────────────────────

/// Builds one procedure declaration.
pub struct ProcBuilder {
    def: ProcDef,
}

impl ProcBuilder {
    pub fn new(name: &str, attrs: &[&str]) -> Self {
        Self {
            def: ProcDef {
                name: name.to_string(),
                type_params: Vec::new(),
                params: Vec::new(),
                ret: Ty::Void,
                attrs: attrs.iter().map(|a| a.to_string()).collect(),
                body: None,
            },
        }
    }

    /// Device-callable helper.
    pub fn device(name: &str) -> Self {
        Self::new(name, &["device"])
    }

    /// Kernel entry point (exported, unmangled).
    pub fn kernel(name: &str) -> Self {
        Self::new(name, &["kernel", "exported"])
    }

    /// Signature-only declaration for an externally-provided primitive.
    /// No recognized attributes, so it is recorded but never emitted.
    pub fn extern_fn(name: &str) -> Self {
        Self::new(name, &["importc"])
    }

    pub fn type_param(mut self, name: &str) -> Self {
        self.def.type_params.push(name.to_string());
        self
    }

    pub fn param(mut self, name: &str, ty: Ty) -> Self {
        self.def.params.push(ParamDef { name: name.to_string(), ty });
        self
    }

    /// Pass-by-mutable-reference parameter.
    pub fn var_param(mut self, name: &str, ty: Ty) -> Self {
        self.def.params.push(ParamDef {
            name: name.to_string(),
            ty: Ty::var(ty),
        });
        self
    }

    pub fn returns(mut self, ty: Ty) -> Self {
        self.def.ret = ty;
        self
    }

    pub fn body(mut self, f: impl FnOnce(&mut BlockBuilder)) -> ProcDef {
        let mut b = BlockBuilder::new();
        f(&mut b);
        self.def.body = Some(b.finish());
        self.def
    }

    /// Finish without a body (signature-only declaration).
    pub fn declare(self) -> ProcDef {
        self.def
    }
}

// ─── Program builder ──────────────────────────────────────────────

#[derive(Default)]
pub struct ProgramBuilder {
    program: Program,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn constant(&mut self, name: &str, value: u64) -> &mut Self {
        self.program.consts.push(ConstDef { name: name.to_string(), value });
        self
    }

    pub fn structure(&mut self, name: &str, fields: Vec<(&str, Ty)>) -> &mut Self {
        self.program.structs.push(StructDef {
            name: name.to_string(),
            type_params: Vec::new(),
            fields: fields
                .into_iter()
                .map(|(n, t)| (n.to_string(), t))
                .collect(),
        });
        self
    }

    pub fn generic_structure(
        &mut self,
        name: &str,
        type_params: Vec<&str>,
        fields: Vec<(&str, Ty)>,
    ) -> &mut Self {
        self.program.structs.push(StructDef {
            name: name.to_string(),
            type_params: type_params.iter().map(|p| p.to_string()).collect(),
            fields: fields
                .into_iter()
                .map(|(n, t)| (n.to_string(), t))
                .collect(),
        });
        self
    }

    pub fn proc(&mut self, def: ProcDef) -> &mut Self {
        self.program.procs.push(def);
        self
    }

    pub fn finish(self) -> Program {
        self.program
    }
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_a_proc_with_control_flow() {
        let def = ProcBuilder::device("square")
            .param("x", Ty::F32)
            .returns(Ty::F32)
            .body(|b| {
                b.if_(infix("<", ident("x"), int_lit(0, Ty::F32)), |b| {
                    b.ret(Some(int_lit(0, Ty::F32)));
                });
                b.ret(Some(infix("*", ident("x"), ident("x"))));
            });
        assert_eq!(def.name, "square");
        assert_eq!(def.params.len(), 1);
        let body = def.body.expect("body");
        match body {
            Ast::Block(stmts) => assert_eq!(stmts.len(), 2),
            other => panic!("expected block, got {}", other.kind_name()),
        }
    }

    #[test]
    fn extern_fn_has_no_recognized_attrs() {
        let def = ProcBuilder::extern_fn("add_co")
            .param("a", Ty::U32)
            .param("b", Ty::U32)
            .returns(Ty::U32)
            .declare();
        assert!(def.body.is_none());
        assert_eq!(def.attrs, vec!["importc".to_string()]);
    }

    #[test]
    fn program_builder_collects_items() {
        let mut pb = ProgramBuilder::new();
        pb.constant("N", 4)
            .structure("Pair", vec![("a", Ty::U32), ("b", Ty::U32)])
            .proc(ProcBuilder::device("noop").body(|_| {}));
        let prog = pb.finish();
        assert_eq!(prog.const_value("N"), Some(4));
        assert!(prog.find_struct("Pair").is_some());
        assert!(prog.find_proc("noop").is_some());
    }

    #[test]
    fn nested_loop_builder() {
        let def = ProcBuilder::device("zero")
            .var_param("r", Ty::array(Ty::U32, 4))
            .body(|b| {
                b.for_("i", size_lit(0), size_lit(4), |b| {
                    b.assign(index(ident("r"), ident("i")), u32_lit(0));
                });
            });
        let body = def.body.expect("body");
        match body {
            Ast::Block(stmts) => {
                assert_eq!(stmts.len(), 1);
                assert_eq!(stmts[0].kind_name(), "for");
            }
            _ => panic!("expected block"),
        }
    }
}
