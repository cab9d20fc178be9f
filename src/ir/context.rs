//! Per-pass compilation state.
//!
//! A `Context` is constructed fresh for every top-level compilation and
//! discarded once source text is produced. It is not safe to share one
//! context between concurrent passes; concurrent compilations each get
//! their own.

use std::collections::{HashMap, HashSet};

use crate::diagnostic::Diagnostic;

use super::symbol::{Symbol, SymbolKind};
use super::types::Type;
use super::Node;

/// A declared procedure as seen from call sites.
#[derive(Clone, Debug)]
pub struct FnEntry {
    /// Procedure symbol; its type is the return type.
    pub sym: Symbol,
    /// Resolved parameter types in declaration order.
    pub params: Vec<Type>,
    /// Declared but never emitted (signature recorded for call-site
    /// checking only; the definition lives outside the emitted source).
    pub host_only: bool,
    pub returns_value: bool,
}

/// Mutable state threaded through one lowering pass.
#[derive(Debug, Default)]
pub struct Context {
    /// Declared procedures by DSL-level name.
    fns: HashMap<String, FnEntry>,
    /// Names of generic procedures whose lowering is deferred to the
    /// first concrete call site.
    generics: HashSet<String>,
    /// Monomorphized instantiations by instantiation key. Guards against
    /// re-lowering recursive or repeatedly-called generics.
    processed: HashMap<String, FnEntry>,
    /// Interned symbols by structural signature.
    symbols: HashMap<String, Symbol>,
    /// Struct-shaped declarations in first-registration order.
    type_decls: Vec<Type>,
    type_seen: HashSet<Type>,
    /// Completed procedure definitions in emission order.
    lowered: Vec<Node>,
    /// Counter for synthesized names (anonymous bindings, temporaries).
    tmp_counter: u64,
    /// Warning-class diagnostics collected during the pass.
    pub warnings: Vec<Diagnostic>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Symbol interning ──

    /// Intern a binding by structural signature. The first occurrence
    /// creates the symbol; later occurrences of the same signature return
    /// the cached one so role and type annotations stay consistent.
    pub fn intern_symbol(
        &mut self,
        name: &str,
        signature: &str,
        ty: Type,
        kind: SymbolKind,
    ) -> Symbol {
        if let Some(sym) = self.symbols.get(signature) {
            return sym.clone();
        }
        let sym = Symbol::new(name, signature, ty, kind);
        self.symbols.insert(signature.to_string(), sym.clone());
        sym
    }

    /// Synthesize a symbol for an anonymous (`_`) binding. Never interned:
    /// two anonymous bindings must never collapse.
    pub fn anon_symbol(&mut self, ty: Type, kind: SymbolKind) -> Symbol {
        let name = self.fresh_name("anon");
        let sig = format!("<{}>", name);
        Symbol::new(name, &sig, ty, kind)
    }

    pub fn fresh_name(&mut self, prefix: &str) -> String {
        self.tmp_counter += 1;
        format!("{}_{}", prefix, self.tmp_counter)
    }

    // ── Function table ──

    pub fn declare_fn(&mut self, name: &str, entry: FnEntry) {
        self.fns.insert(name.to_string(), entry);
    }

    pub fn lookup_fn(&self, name: &str) -> Option<&FnEntry> {
        self.fns.get(name)
    }

    // ── Generics ──

    pub fn mark_generic(&mut self, name: &str) {
        self.generics.insert(name.to_string());
    }

    pub fn is_generic(&self, name: &str) -> bool {
        self.generics.contains(name)
    }

    /// Look up an already-monomorphized instantiation.
    pub fn instantiation(&self, key: &str) -> Option<&FnEntry> {
        self.processed.get(key)
    }

    /// Record an instantiation before its body is lowered, so recursive
    /// calls inside the body resolve to the instantiation itself.
    pub fn record_instantiation(&mut self, key: String, entry: FnEntry) {
        self.processed.insert(key, entry);
    }

    pub fn instantiation_count(&self) -> usize {
        self.processed.len()
    }

    // ── Type declarations ──

    /// Register a struct-shaped type for file-scope emission. Idempotent;
    /// keyed by full structural equality; first-registration order is
    /// preserved so output is deterministic across runs.
    pub fn register_type(&mut self, ty: &Type) {
        if !ty.needs_declaration() {
            return;
        }
        if self.type_seen.contains(ty) {
            return;
        }
        // Field types first so declarations precede their uses.
        if let Some(fields) = ty.fields() {
            let nested: Vec<Type> = fields.iter().map(|(_, t)| t.clone()).collect();
            for fty in &nested {
                self.register_type(fty);
            }
        }
        self.type_seen.insert(ty.clone());
        self.type_decls.push(ty.clone());
    }

    // ── Output ──

    /// Append a completed procedure definition.
    pub fn push_proc(&mut self, proc: Node) {
        self.lowered.push(proc);
    }

    /// Consume the context into an emission-ready program.
    pub fn into_program(self) -> super::Program {
        super::Program {
            types: self.type_decls,
            procs: self.lowered,
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_stable_across_references() {
        let mut ctx = Context::new();
        let a = ctx.intern_symbol("x", "f.x:u32", Type::U32, SymbolKind::Local);
        let b = ctx.intern_symbol("x", "f.x:u32", Type::U32, SymbolKind::Local);
        let c = ctx.intern_symbol("x", "f.x:u32", Type::U32, SymbolKind::Local);
        assert_eq!(a.unique_key, b.unique_key);
        assert_eq!(b.unique_key, c.unique_key);
    }

    #[test]
    fn anonymous_bindings_never_collapse() {
        let mut ctx = Context::new();
        let a = ctx.anon_symbol(Type::U32, SymbolKind::Local);
        let b = ctx.anon_symbol(Type::U32, SymbolKind::Local);
        assert_ne!(a.unique_key, b.unique_key);
        assert_ne!(a.name, b.name);
    }

    #[test]
    fn type_registration_is_idempotent_and_ordered() {
        let mut ctx = Context::new();
        let a = Type::Object {
            name: "A".into(),
            fields: vec![("v".into(), Type::U32)],
        };
        let b = Type::Object {
            name: "B".into(),
            fields: vec![("v".into(), Type::U64)],
        };
        ctx.register_type(&b);
        ctx.register_type(&a);
        ctx.register_type(&b);
        ctx.register_type(&a);
        let prog = ctx.into_program();
        let names: Vec<_> = prog.types.iter().filter_map(|t| t.decl_name()).collect();
        assert_eq!(names, vec!["B".to_string(), "A".to_string()]);
    }

    #[test]
    fn nested_struct_fields_register_first() {
        let inner = Type::Object {
            name: "Inner".into(),
            fields: vec![("v".into(), Type::U32)],
        };
        let outer = Type::Object {
            name: "Outer".into(),
            fields: vec![("i".into(), inner.clone())],
        };
        let mut ctx = Context::new();
        ctx.register_type(&outer);
        let prog = ctx.into_program();
        let names: Vec<_> = prog.types.iter().filter_map(|t| t.decl_name()).collect();
        assert_eq!(names, vec!["Inner".to_string(), "Outer".to_string()]);
    }

    #[test]
    fn scalar_types_never_register() {
        let mut ctx = Context::new();
        ctx.register_type(&Type::U64);
        ctx.register_type(&Type::Array { elem: Box::new(Type::U32), len: 4 });
        assert!(ctx.into_program().types.is_empty());
    }

    #[test]
    fn instantiation_guard() {
        let mut ctx = Context::new();
        let sym = Symbol::new("f_u32x4", "f[u32x4]", Type::Void, SymbolKind::Proc);
        let entry = FnEntry {
            sym: sym.clone(),
            params: vec![Type::U32],
            host_only: false,
            returns_value: false,
        };
        assert!(ctx.instantiation("f[u32x4]").is_none());
        ctx.record_instantiation("f[u32x4]".into(), entry);
        assert_eq!(ctx.instantiation("f[u32x4]").map(|e| &e.sym), Some(&sym));
        assert_eq!(ctx.instantiation_count(), 1);
    }
}
