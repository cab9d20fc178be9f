//! AST-to-IR lowering.
//!
//! One pass over the host program: declarations are collected in order,
//! generic procedures are deferred, and call sites drive monomorphization
//! (see [`generics`]). The compilation context is threaded explicitly —
//! there is no ambient state, so concurrent compilations with separate
//! contexts cannot interfere.

mod expr;
mod generics;
pub mod ops;

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::diagnostic::Diagnostic;
use crate::dsl::{self, Ast, Len, ProcDef};
use crate::ir::context::FnEntry;
use crate::ir::{self, AttrSet, Attribute, Context, Node, Symbol, SymbolKind, Type};

use ops::canonical_callee;

// ─── Errors ───────────────────────────────────────────────────────

/// Fatal lowering failures. Every variant names the offending construct;
/// nothing is silently skipped.
#[derive(Debug, Error)]
pub enum LowerError {
    #[error("unsupported construct in {0} position: {1}")]
    UnsupportedConstruct(&'static str, &'static str),
    #[error("unknown identifier `{0}`")]
    UnknownIdent(String),
    #[error("unknown callee `{0}`")]
    UnknownCallee(String),
    #[error("unknown struct `{0}`")]
    UnknownStruct(String),
    #[error("no field `{field}` on type {ty}")]
    UnknownField { field: String, ty: String },
    #[error("type {0} is not indexable")]
    NotIndexable(String),
    #[error("cannot dereference value of type {0}")]
    NotAPointer(String),
    #[error("no operator `{op}` for operand type {ty}")]
    UnknownOperator { op: String, ty: String },
    #[error("call to `{name}` expects {expected} arguments, got {given}")]
    ArityMismatch {
        name: String,
        expected: usize,
        given: usize,
    },
    #[error("constructor for {ty} expects {expected} field values, got {given}")]
    ConstructorArity {
        ty: String,
        expected: usize,
        given: usize,
    },
    #[error("cannot infer a type for {0}")]
    CannotInfer(String),
    #[error("generic `{name}` cannot be instantiated: {reason}")]
    Instantiation { name: String, reason: String },
    #[error("procedure `{0}` has no body")]
    MissingBody(String),
}

// ─── Substitution environment ─────────────────────────────────────

/// Bindings for generic type parameters and named array-length constants,
/// established by call-site inference.
#[derive(Clone, Debug, Default)]
pub(crate) struct Subst {
    pub types: HashMap<String, Type>,
    pub lens: HashMap<String, u64>,
}

// ─── Entry points ─────────────────────────────────────────────────

/// Result of lowering one host program.
#[derive(Debug)]
pub struct LoweredUnit {
    pub program: ir::Program,
    pub warnings: Vec<Diagnostic>,
}

/// Lower a host program into an emission-ready IR program.
///
/// A fresh [`Context`] is created per call; compiling several programs
/// concurrently is safe because nothing is shared between passes.
pub fn lower_program(host: &dsl::Program) -> Result<LoweredUnit, LowerError> {
    let mut lowering = Lowering::new(host);
    for def in &host.procs {
        lowering.lower_decl(def)?;
    }
    let warnings = std::mem::take(&mut lowering.ctx.warnings);
    Ok(LoweredUnit {
        program: lowering.ctx.into_program(),
        warnings,
    })
}

// ─── Lowering state ───────────────────────────────────────────────

pub(crate) struct Lowering<'a> {
    host: &'a dsl::Program,
    pub(crate) ctx: Context,
    /// Lexical scopes of the procedure currently being lowered.
    scopes: Vec<HashMap<String, Symbol>>,
    /// Emission name of the current procedure; prefixes binding
    /// signatures so display names stay distinct across instantiations.
    current_proc: String,
    /// Substitution of the instantiation currently being lowered; types
    /// written in its body resolve against this, and identifiers resolve
    /// against its length bindings before the program's constant section.
    current_subst: Subst,
    /// Emitted procedure names; instantiation renaming avoids these.
    used_proc_names: HashSet<String>,
}

impl<'a> Lowering<'a> {
    fn new(host: &'a dsl::Program) -> Self {
        Self {
            host,
            ctx: Context::new(),
            scopes: Vec::new(),
            current_proc: String::new(),
            current_subst: Subst::default(),
            used_proc_names: HashSet::new(),
        }
    }

    // ── Declarations ──

    fn lower_decl(&mut self, def: &ProcDef) -> Result<(), LowerError> {
        if self.ctx.lookup_fn(&def.name).is_some() {
            // Already lowered eagerly from an earlier call site.
            return Ok(());
        }
        if def.has_type_params() {
            self.ctx.mark_generic(&def.name);
            return Ok(());
        }

        let subst = Subst::default();
        let mut param_tys = Vec::new();
        for p in &def.params {
            param_tys.push(self.resolve_ty(&p.ty, &subst)?);
        }
        let ret = self.resolve_ty(&def.ret, &subst)?;
        if param_tys.contains(&Type::Invalid) || ret == Type::Invalid {
            // Signature mentions a constant not bound yet; defer to the
            // first call site, where concrete types pin it down.
            self.ctx.mark_generic(&def.name);
            return Ok(());
        }

        let attrs = AttrSet::from_host(&def.attrs);
        let emit_name = canonical_callee(&def.name).to_string();
        let key = signature_key(&emit_name, &param_tys, &ret);
        let sym = Symbol::new(emit_name.clone(), &key, ret.clone(), SymbolKind::Proc);
        let entry = FnEntry {
            sym,
            params: param_tys,
            host_only: attrs.is_empty() || def.body.is_none(),
            returns_value: ret != Type::Void,
        };

        if !entry.host_only {
            let node = self.lower_proc(def, &subst, &emit_name, &key, attrs)?;
            self.ctx.push_proc(node);
        }
        self.used_proc_names.insert(emit_name);
        self.ctx.declare_fn(&def.name, entry);
        Ok(())
    }

    /// Lower one procedure body under a substitution environment.
    pub(crate) fn lower_proc(
        &mut self,
        def: &ProcDef,
        subst: &Subst,
        emit_name: &str,
        sig_key: &str,
        attrs: AttrSet,
    ) -> Result<Node, LowerError> {
        let body = def
            .body
            .as_ref()
            .ok_or_else(|| LowerError::MissingBody(def.name.clone()))?;

        let saved_proc = std::mem::replace(&mut self.current_proc, emit_name.to_string());
        let saved_subst = std::mem::replace(&mut self.current_subst, subst.clone());
        // Instantiations are lowered from inside other bodies; their
        // scopes must not see the caller's bindings.
        let saved_scopes = std::mem::take(&mut self.scopes);
        self.scopes.push(HashMap::new());

        let ret = self.resolve_ty(&def.ret, subst)?;
        self.ctx.register_type(&ret);
        let proc_sym = Symbol::new(emit_name, sig_key, ret.clone(), SymbolKind::Proc);

        let param_kind = if attrs.has(Attribute::Kernel) {
            SymbolKind::Global
        } else {
            SymbolKind::Param
        };
        let mut params = Vec::new();
        for p in &def.params {
            let ty = self.resolve_ty(&p.ty, subst)?;
            self.ctx.register_type(ty.deref_implicit());
            let sig = format!("{}.{}:{}", emit_name, p.name, ty.sig());
            let sym = self.ctx.intern_symbol(&p.name, &sig, ty, param_kind);
            self.scope_insert(&p.name, sym.clone());
            params.push(sym);
        }

        let stmts: &[Ast] = match body {
            Ast::Block(stmts) => stmts,
            other => std::slice::from_ref(other),
        };

        // Implicit result variable: non-void procedures that neither end
        // in an explicit return nor shadow `result` get a synthesized
        // result local and a trailing return of it.
        let ends_with_return = matches!(stmts.last(), Some(Ast::Return(_)));
        let shadows_result = stmts.iter().any(declares_result);
        let insert_result = ret != Type::Void && !ends_with_return && !shadows_result;
        if ret != Type::Void && shadows_result {
            self.ctx.warnings.push(
                Diagnostic::warning(format!(
                    "`{}` declares a local named `result`, shadowing the implicit result variable",
                    emit_name
                ))
                .with_note("the user declaration is kept; no result variable is synthesized".into())
                .with_help("return the value explicitly or rename the local".into()),
            );
        }

        let mut body_nodes = Vec::new();
        let result_sym = if insert_result {
            let sig = format!("{}.result:{}", emit_name, ret.sig());
            let sym = self
                .ctx
                .intern_symbol("result", &sig, ret.clone(), SymbolKind::Local);
            self.scope_insert("result", sym.clone());
            body_nodes.push(Node::VarDecl {
                sym: sym.clone(),
                init: None,
                mutable: true,
                needs_copy: false,
            });
            Some(sym)
        } else {
            None
        };

        self.lower_stmts(stmts, &mut body_nodes)?;

        if let Some(sym) = result_sym {
            body_nodes.push(Node::Return(Some(Box::new(Node::Sym(sym)))));
        }

        self.scopes = saved_scopes;
        self.current_proc = saved_proc;
        self.current_subst = saved_subst;

        Ok(Node::Proc {
            sym: proc_sym,
            params,
            attrs,
            body: Box::new(Node::Block { body: body_nodes, ty: Type::Void }),
        })
    }

    // ── Statements ──

    fn lower_stmts(&mut self, stmts: &[Ast], out: &mut Vec<Node>) -> Result<(), LowerError> {
        for stmt in stmts {
            self.lower_stmt(stmt, out)?;
        }
        Ok(())
    }

    fn lower_stmt(&mut self, ast: &Ast, out: &mut Vec<Node>) -> Result<(), LowerError> {
        let mut pre = Vec::new();
        match ast {
            Ast::Let { name, ty, init, mutable, storage } => {
                let init_node = match init {
                    Some(e) => Some(self.lower_expr(e, &mut pre)?),
                    None => None,
                };
                let declared = match ty {
                    Some(t) => Some(self.resolve_ty(t, &self.current_subst)?),
                    None => None,
                };
                let var_ty = match (&declared, &init_node) {
                    (Some(t), _) => t.clone(),
                    (None, Some(n)) => n.ty(),
                    (None, None) => return Err(LowerError::CannotInfer(format!("`{}`", name))),
                };
                self.ctx.register_type(&var_ty);
                let init_node = init_node.map(|n| expr::retype_literal(n, &var_ty));
                let needs_copy = var_ty.is_fixed_array()
                    && init_node
                        .as_ref()
                        .map(|n| !matches!(n, Node::ArrayLit { .. }))
                        .unwrap_or(false);
                let kind = match storage {
                    dsl::Storage::Default => SymbolKind::Local,
                    dsl::Storage::Shared => SymbolKind::Shared,
                    dsl::Storage::Private => SymbolKind::Private,
                };
                let sym = if name == "_" {
                    self.ctx.anon_symbol(var_ty, kind)
                } else {
                    let sig = format!("{}.{}:{}", self.current_proc, name, var_ty.sig());
                    let sym = self.ctx.intern_symbol(name, &sig, var_ty, kind);
                    self.scope_insert(name, sym.clone());
                    sym
                };
                out.extend(pre);
                out.push(Node::VarDecl {
                    sym,
                    init: init_node.map(Box::new),
                    mutable: *mutable,
                    needs_copy,
                });
            }
            Ast::Assign { target, value } => {
                let target = self.lower_expr(target, &mut pre)?;
                let value = self.lower_expr(value, &mut pre)?;
                let value = expr::retype_literal(value, &target.ty());
                let needs_copy =
                    target.ty().is_fixed_array() && !matches!(value, Node::ArrayLit { .. });
                out.extend(pre);
                out.push(Node::Assign {
                    target: Box::new(target),
                    value: Box::new(value),
                    needs_copy,
                });
            }
            Ast::If { arms, else_body } => {
                let mut ir_arms = Vec::new();
                for (cond, body) in arms {
                    let cond = self.lower_expr(cond, &mut pre)?;
                    let body = self.lower_scoped_block(body)?;
                    ir_arms.push(ir::IfArm { cond, body });
                }
                let else_body = match else_body {
                    Some(b) => Some(Box::new(self.lower_scoped_block(b)?)),
                    None => None,
                };
                out.extend(pre);
                out.push(Node::If { arms: ir_arms, else_body });
            }
            Ast::For { var, start, end, body } => {
                let start = self.lower_expr(start, &mut pre)?;
                let end = self.lower_expr(end, &mut pre)?;
                let var_ty = start.ty();
                self.scopes.push(HashMap::new());
                let sig = format!("{}.{}:{}", self.current_proc, var, var_ty.sig());
                let var_sym = self.ctx.intern_symbol(var, &sig, var_ty, SymbolKind::Local);
                self.scope_insert(var, var_sym.clone());
                let body = self.lower_block_inner(body)?;
                self.scopes.pop();
                out.extend(pre);
                out.push(Node::For {
                    var: var_sym,
                    start: Box::new(start),
                    end: Box::new(end),
                    body: Box::new(body),
                });
            }
            Ast::While { cond, body } => {
                let cond = self.lower_expr(cond, &mut pre)?;
                let body = self.lower_scoped_block(body)?;
                out.extend(pre);
                out.push(Node::While { cond: Box::new(cond), body: Box::new(body) });
            }
            Ast::Return(value) => {
                let value = match value {
                    Some(e) => Some(Box::new(self.lower_expr(e, &mut pre)?)),
                    None => None,
                };
                out.extend(pre);
                out.push(Node::Return(value));
            }
            Ast::Asm(text) => out.push(Node::Asm(text.clone())),
            Ast::Block(_) => {
                let block = self.lower_scoped_block(ast)?;
                out.push(block);
            }
            // Expressions in statement position (calls, mostly).
            other => {
                let node = self.lower_expr(other, &mut pre)?;
                out.extend(pre);
                out.push(node);
            }
        }
        Ok(())
    }

    /// Lower a block AST in a fresh lexical scope.
    pub(crate) fn lower_scoped_block(&mut self, ast: &Ast) -> Result<Node, LowerError> {
        self.scopes.push(HashMap::new());
        let node = self.lower_block_inner(ast);
        self.scopes.pop();
        node
    }

    fn lower_block_inner(&mut self, ast: &Ast) -> Result<Node, LowerError> {
        let stmts: &[Ast] = match ast {
            Ast::Block(stmts) => stmts,
            other => std::slice::from_ref(other),
        };
        let mut body = Vec::new();
        self.lower_stmts(stmts, &mut body)?;
        Ok(Node::Block { body, ty: Type::Void })
    }

    // ── Type resolution ──

    /// Resolve a host type descriptor under a substitution environment.
    ///
    /// Array lengths given by named constants resolve against the
    /// substitution first, then the program's constant section; an
    /// unbound constant yields the recoverable `Invalid` sentinel so the
    /// caller can defer to generic instantiation.
    pub(crate) fn resolve_ty(&self, ty: &dsl::Ty, subst: &Subst) -> Result<Type, LowerError> {
        Ok(match ty {
            dsl::Ty::Void => Type::Void,
            dsl::Ty::Bool => Type::Bool,
            dsl::Ty::U8 => Type::U8,
            dsl::Ty::U16 => Type::U16,
            dsl::Ty::U32 => Type::U32,
            dsl::Ty::U64 => Type::U64,
            dsl::Ty::I16 => Type::I16,
            dsl::Ty::I32 => Type::I32,
            dsl::Ty::I64 => Type::I64,
            dsl::Ty::F32 => Type::F32,
            dsl::Ty::F64 => Type::F64,
            dsl::Ty::Size => Type::Size,
            dsl::Ty::Str => Type::Str,
            dsl::Ty::Array { elem, len } => {
                let elem = self.resolve_ty(elem, subst)?;
                let len = match len {
                    Len::Fixed(n) => *n,
                    Len::Named(c) => {
                        match subst.lens.get(c).copied().or_else(|| self.host.const_value(c)) {
                            Some(n) => n,
                            None => return Ok(Type::Invalid),
                        }
                    }
                };
                if elem == Type::Invalid {
                    return Ok(Type::Invalid);
                }
                Type::Array { elem: Box::new(elem), len }
            }
            dsl::Ty::UncheckedArray { elem } => {
                let elem = self.resolve_ty(elem, subst)?;
                if elem == Type::Invalid {
                    return Ok(Type::Invalid);
                }
                Type::UncheckedArray { elem: Box::new(elem) }
            }
            dsl::Ty::Ptr { pointee, mutable } => {
                let pointee = self.resolve_ty(pointee, subst)?;
                if pointee == Type::Invalid {
                    return Ok(Type::Invalid);
                }
                Type::Ptr {
                    pointee: Box::new(pointee),
                    implicit: false,
                    mutable: *mutable,
                }
            }
            dsl::Ty::Var(inner) => {
                let pointee = self.resolve_ty(inner, subst)?;
                if pointee == Type::Invalid {
                    return Ok(Type::Invalid);
                }
                Type::Ptr {
                    pointee: Box::new(pointee),
                    implicit: true,
                    mutable: true,
                }
            }
            dsl::Ty::VoidPtr => Type::VoidPtr,
            dsl::Ty::Named(name) => {
                let def = self
                    .host
                    .find_struct(name)
                    .ok_or_else(|| LowerError::UnknownStruct(name.clone()))?;
                if !def.type_params.is_empty() {
                    return Err(LowerError::Instantiation {
                        name: name.clone(),
                        reason: "generic struct referenced without type arguments".into(),
                    });
                }
                let mut fields = Vec::new();
                for (fname, fty) in &def.fields {
                    let fty = self.resolve_ty(fty, subst)?;
                    if fty == Type::Invalid {
                        return Ok(Type::Invalid);
                    }
                    fields.push((fname.clone(), fty));
                }
                Type::Object { name: name.clone(), fields }
            }
            dsl::Ty::Instance { name, args } => {
                let def = self
                    .host
                    .find_struct(name)
                    .ok_or_else(|| LowerError::UnknownStruct(name.clone()))?;
                if def.type_params.len() != args.len() {
                    return Err(LowerError::Instantiation {
                        name: name.clone(),
                        reason: format!(
                            "expected {} type arguments, got {}",
                            def.type_params.len(),
                            args.len()
                        ),
                    });
                }
                let mut resolved_args = Vec::new();
                for a in args {
                    let a = self.resolve_ty(a, subst)?;
                    if a == Type::Invalid {
                        return Ok(Type::Invalid);
                    }
                    resolved_args.push(a);
                }
                let mut inner = subst.clone();
                for (p, a) in def.type_params.iter().zip(&resolved_args) {
                    inner.types.insert(p.clone(), a.clone());
                }
                let mut fields = Vec::new();
                for (fname, fty) in &def.fields {
                    let fty = self.resolve_ty(fty, &inner)?;
                    if fty == Type::Invalid {
                        return Ok(Type::Invalid);
                    }
                    fields.push((fname.clone(), fty));
                }
                Type::Instance {
                    name: name.clone(),
                    args: resolved_args,
                    fields,
                }
            }
            dsl::Ty::Param(p) => subst.types.get(p).cloned().unwrap_or(Type::Invalid),
        })
    }

    // ── Scopes ──

    pub(crate) fn scope_insert(&mut self, name: &str, sym: Symbol) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), sym);
        }
    }

    pub(crate) fn scope_lookup(&self, name: &str) -> Option<Symbol> {
        for scope in self.scopes.iter().rev() {
            if let Some(sym) = scope.get(name) {
                return Some(sym.clone());
            }
        }
        None
    }

    pub(crate) fn host(&self) -> &'a dsl::Program {
        self.host
    }

    /// Array-length binding of the current instantiation, if any.
    pub(crate) fn len_binding(&self, name: &str) -> Option<u64> {
        self.current_subst.lens.get(name).copied()
    }
}

/// Canonical signature key for a procedure: emission name plus resolved
/// parameter and return types.
pub(crate) fn signature_key(name: &str, params: &[Type], ret: &Type) -> String {
    let mut key = format!("{}(", name);
    for (i, p) in params.iter().enumerate() {
        if i > 0 {
            key.push(',');
        }
        key.push_str(&p.sig());
    }
    key.push_str(")->");
    key.push_str(&ret.sig());
    key
}

/// Does this statement (or any statement nested under it) declare a
/// local named `result`?
fn declares_result(ast: &Ast) -> bool {
    match ast {
        Ast::Let { name, .. } => name == "result",
        Ast::Block(stmts) => stmts.iter().any(declares_result),
        Ast::If { arms, else_body } => {
            arms.iter().any(|(_, b)| declares_result(b))
                || else_body.as_deref().map(declares_result).unwrap_or(false)
        }
        Ast::For { body, .. } | Ast::While { body, .. } => declares_result(body),
        _ => false,
    }
}
