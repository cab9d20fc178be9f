//! Call resolution and lazy monomorphization.
//!
//! A call whose callee is deferred (generic, or signature not yet
//! resolvable) fetches the declaration, infers concrete bindings from the
//! argument types, and lowers one instantiation per distinct signature.
//! Instantiations are recorded before their bodies are lowered, so
//! recursive generics terminate and repeated calls reuse the first
//! instantiation.

use crate::dsl::{self, Ast};
use crate::ir::context::FnEntry;
use crate::ir::{AttrSet, Attribute, Node, Symbol, SymbolKind, Type};

use super::expr::retype_literal;
use super::ops::canonical_callee;
use super::{signature_key, LowerError, Lowering, Subst};

impl<'a> Lowering<'a> {
    pub(crate) fn lower_call(
        &mut self,
        name: &str,
        args: &[Ast],
        pre: &mut Vec<Node>,
    ) -> Result<Node, LowerError> {
        let mut nodes = Vec::new();
        for a in args {
            nodes.push(self.lower_expr(a, pre)?);
        }
        self.lower_call_with(name, nodes, pre)
    }

    /// Lower a call whose arguments are already lowered (operator
    /// rewriting enters here directly).
    pub(crate) fn lower_call_with(
        &mut self,
        host_name: &str,
        args: Vec<Node>,
        pre: &mut Vec<Node>,
    ) -> Result<Node, LowerError> {
        if !self.ctx.is_generic(host_name) {
            if let Some(entry) = self.ctx.lookup_fn(host_name) {
                let entry = entry.clone();
                return self.finish_call(entry, args, pre);
            }
        }

        // Deferred or not-yet-seen callee: fetch the declaration and
        // monomorphize for this call site's concrete types.
        let def = self
            .host()
            .find_proc(host_name)
            .ok_or_else(|| LowerError::UnknownCallee(host_name.to_string()))?
            .clone();
        if def.params.len() != args.len() {
            return Err(LowerError::ArityMismatch {
                name: host_name.to_string(),
                expected: def.params.len(),
                given: args.len(),
            });
        }

        let mut subst = Subst::default();
        for (p, arg) in def.params.iter().zip(&args) {
            unify(&p.ty, &arg.ty(), &mut subst);
        }

        let mut param_tys = Vec::new();
        for p in &def.params {
            let ty = self.resolve_ty(&p.ty, &subst)?;
            if ty == Type::Invalid {
                return Err(LowerError::Instantiation {
                    name: host_name.to_string(),
                    reason: format!(
                        "parameter `{}` does not resolve to a concrete type at this call site",
                        p.name
                    ),
                });
            }
            param_tys.push(ty);
        }
        let ret = self.resolve_ty(&def.ret, &subst)?;
        if ret == Type::Invalid {
            return Err(LowerError::Instantiation {
                name: host_name.to_string(),
                reason: "return type does not resolve to a concrete type at this call site".into(),
            });
        }

        let emit_base = canonical_callee(host_name);
        let key = signature_key(emit_base, &param_tys, &ret);
        if let Some(entry) = self.ctx.instantiation(&key) {
            // Same signature seen before: reference the existing name,
            // never re-lower.
            let entry = entry.clone();
            return self.finish_call(entry, args, pre);
        }

        let generic = self.ctx.is_generic(host_name);
        let emit_name = if generic {
            self.unique_instance_name(emit_base, &param_tys)
        } else {
            self.used_proc_names.insert(emit_base.to_string());
            emit_base.to_string()
        };

        let mut attrs = AttrSet::from_host(&def.attrs);
        let host_only = attrs.is_empty() || def.body.is_none();
        if !host_only {
            attrs.add(Attribute::Device);
        }

        let sym = Symbol::new(emit_name.clone(), &key, ret.clone(), SymbolKind::Proc);
        let entry = FnEntry {
            sym,
            params: param_tys,
            host_only,
            returns_value: ret != Type::Void,
        };
        // Record before lowering the body so self-recursion resolves to
        // this instantiation instead of recursing here forever.
        self.ctx.record_instantiation(key.clone(), entry.clone());
        if !generic {
            self.ctx.declare_fn(host_name, entry.clone());
        }
        if !host_only {
            let node = self.lower_proc(&def, &subst, &emit_name, &key, attrs)?;
            self.ctx.push_proc(node);
        }
        self.finish_call(entry, args, pre)
    }

    /// Bind lowered arguments to a resolved callee: implicit addresses
    /// for `var` parameters, hoisted copies for by-value fixed arrays,
    /// literal coercion for scalar parameters.
    fn finish_call(
        &mut self,
        entry: FnEntry,
        mut args: Vec<Node>,
        pre: &mut Vec<Node>,
    ) -> Result<Node, LowerError> {
        if args.len() != entry.params.len() {
            return Err(LowerError::ArityMismatch {
                name: entry.sym.name.clone(),
                expected: entry.params.len(),
                given: args.len(),
            });
        }
        let mut bound = Vec::new();
        for (param_ty, arg) in entry.params.iter().zip(args.drain(..)) {
            let node = match param_ty {
                Type::Ptr { pointee, implicit: true, .. } => Node::AddrOf {
                    ty: Type::Ptr {
                        pointee: pointee.clone(),
                        implicit: true,
                        mutable: true,
                    },
                    operand: Box::new(arg),
                },
                ty if ty.is_fixed_array()
                    && arg.ty().is_fixed_array()
                    && !matches!(arg, Node::ArrayLit { .. }) =>
                {
                    // By-value array binding: bind through a copied
                    // temporary so callee mutations stay local.
                    let tmp_name = self.ctx.fresh_name("arg");
                    let sig = format!("{}.{}", self.current_proc, tmp_name);
                    let tmp = Symbol::new(&tmp_name, &sig, ty.clone(), SymbolKind::Local);
                    pre.push(Node::VarDecl {
                        sym: tmp.clone(),
                        init: Some(Box::new(arg)),
                        mutable: true,
                        needs_copy: true,
                    });
                    Node::Sym(tmp)
                }
                ty if ty.is_scalar() => retype_literal(arg, ty),
                _ => arg,
            };
            bound.push(node);
        }
        let ty = entry.sym.ty.clone();
        Ok(Node::Call { callee: entry.sym, args: bound, ty })
    }

    /// Pick a backend-legal, per-instantiation-unique name.
    fn unique_instance_name(&mut self, base: &str, params: &[Type]) -> String {
        let mut name = base.to_string();
        for t in params {
            name.push('_');
            name.push_str(&t.deref_implicit().mangle());
        }
        let mut candidate = name.clone();
        let mut n = 1u32;
        while self.used_proc_names.contains(&candidate) {
            n += 1;
            candidate = format!("{}_{}", name, n);
        }
        self.used_proc_names.insert(candidate.clone());
        candidate
    }
}

/// Structural unification of a declared parameter type against the
/// concrete type of a call-site argument. Binds type parameters and named
/// array lengths; mismatches are left for resolution to report.
fn unify(decl: &dsl::Ty, actual: &Type, subst: &mut Subst) {
    match (decl, actual) {
        (dsl::Ty::Param(p), a) => {
            subst
                .types
                .entry(p.clone())
                .or_insert_with(|| a.deref_implicit().clone());
        }
        (dsl::Ty::Var(inner), a) => unify(inner, a.deref_implicit(), subst),
        (dsl::Ty::Array { elem, len }, Type::Array { elem: ae, len: al }) => {
            if let dsl::Len::Named(c) = len {
                subst.lens.entry(c.clone()).or_insert(*al);
            }
            unify(elem, ae, subst);
        }
        (dsl::Ty::UncheckedArray { elem }, Type::UncheckedArray { elem: ae }) => {
            unify(elem, ae, subst)
        }
        (dsl::Ty::UncheckedArray { elem }, Type::Array { elem: ae, .. }) => unify(elem, ae, subst),
        (dsl::Ty::Ptr { pointee, .. }, Type::Ptr { pointee: ap, .. }) => unify(pointee, ap, subst),
        (dsl::Ty::Instance { args, .. }, Type::Instance { args: aa, .. }) => {
            for (d, a) in args.iter().zip(aa) {
                unify(d, a, subst);
            }
        }
        _ => {}
    }
}
