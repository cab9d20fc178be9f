//! Symbols and backend attributes.
//!
//! A symbol carries a display name, a unique underlying identity, the
//! resolved type, and a role tag. Identity is the unique key — display
//! names repeat across instantiations and must never be used alone to
//! distinguish bindings.

use std::hash::{Hash, Hasher};

use super::types::Type;

/// Role of a binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    /// Kernel parameter (global scope on the device).
    Global,
    /// Device-function parameter.
    Param,
    Local,
    /// Procedure name.
    Proc,
    /// Workgroup-shared scratch.
    Shared,
    /// Explicitly thread-private storage.
    Private,
}

/// An interned identifier.
#[derive(Clone, Debug)]
pub struct Symbol {
    /// Display name, as emitted in source.
    pub name: String,
    /// Stable identity: display name plus a hash of the binding's
    /// structural signature. Distinguishes same-named bindings from
    /// different instantiations.
    pub unique_key: String,
    pub ty: Type,
    pub kind: SymbolKind,
}

impl Symbol {
    pub fn new(name: impl Into<String>, signature: &str, ty: Type, kind: SymbolKind) -> Self {
        let name = name.into();
        let digest = blake3::hash(signature.as_bytes()).to_hex();
        let unique_key = format!("{}#{}", name, &digest[..16]);
        Self { name, unique_key, ty, kind }
    }

    /// The type this symbol reads as in an expression. Implicit-pointer
    /// bindings (pass-by-mutable-reference) read as their pointee.
    pub fn value_type(&self) -> &Type {
        self.ty.deref_implicit()
    }
}

// Identity is (unique_key, ty, kind) — never the display name alone.
impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.unique_key == other.unique_key && self.ty == other.ty && self.kind == other.kind
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.unique_key.hash(state);
        self.ty.hash(state);
        self.kind.hash(state);
    }
}

// ─── Attributes ───────────────────────────────────────────────────

/// Backend qualifiers recognized on procedure declarations. Host
/// attributes outside this set are filtered out; a declaration whose set
/// filters to empty is host-only and never emitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Attribute {
    /// Kernel entry point (`__global__` / `@compute`).
    Kernel,
    /// Device-callable function.
    Device,
    ForceInline,
    /// Exported under its unmangled name.
    Exported,
}

impl Attribute {
    fn from_host(name: &str) -> Option<Attribute> {
        match name {
            "kernel" | "global" => Some(Attribute::Kernel),
            "device" => Some(Attribute::Device),
            "forceinline" | "inline" => Some(Attribute::ForceInline),
            "exported" | "exportc" => Some(Attribute::Exported),
            _ => None,
        }
    }
}

/// Small ordered set of recognized attributes.
#[derive(Clone, Debug, Default)]
pub struct AttrSet {
    attrs: Vec<Attribute>,
}

impl AttrSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter a host declaration's attribute list down to the recognized
    /// backend qualifiers.
    pub fn from_host(names: &[String]) -> Self {
        let mut set = Self::new();
        for name in names {
            if let Some(attr) = Attribute::from_host(name) {
                set.add(attr);
            }
        }
        set
    }

    pub fn add(&mut self, attr: Attribute) {
        if !self.attrs.contains(&attr) {
            self.attrs.push(attr);
        }
    }

    pub fn has(&self, attr: Attribute) -> bool {
        self.attrs.contains(&attr)
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_signature_same_key() {
        let a = Symbol::new("x", "f.x:u32", Type::U32, SymbolKind::Local);
        let b = Symbol::new("x", "f.x:u32", Type::U32, SymbolKind::Local);
        assert_eq!(a, b);
        assert_eq!(a.unique_key, b.unique_key);
    }

    #[test]
    fn same_display_name_different_binding_differs() {
        let a = Symbol::new("t", "mod_add.t:[u64;4]", limbs(), SymbolKind::Local);
        let b = Symbol::new("t", "mont_mul.t:[u64;4]", limbs(), SymbolKind::Local);
        assert_eq!(a.name, b.name);
        assert_ne!(a, b);
        assert_ne!(a.unique_key, b.unique_key);
    }

    #[test]
    fn role_and_type_are_part_of_identity() {
        let local = Symbol::new("x", "f.x:u32", Type::U32, SymbolKind::Local);
        let shared = Symbol::new("x", "f.x:u32", Type::U32, SymbolKind::Shared);
        assert_ne!(local, shared);
        let wider = Symbol::new("x", "f.x:u32", Type::U64, SymbolKind::Local);
        assert_ne!(local, wider);
    }

    #[test]
    fn value_type_reads_through_implicit_pointer() {
        let ty = Type::Ptr {
            pointee: Box::new(limbs()),
            implicit: true,
            mutable: true,
        };
        let sym = Symbol::new("r", "mod_add.r", ty, SymbolKind::Param);
        assert_eq!(*sym.value_type(), limbs());
    }

    #[test]
    fn host_attrs_filter_to_recognized_set() {
        let attrs = AttrSet::from_host(&["kernel".into(), "exported".into()]);
        assert!(attrs.has(Attribute::Kernel));
        assert!(attrs.has(Attribute::Exported));
        assert!(!attrs.has(Attribute::Device));

        // Host-only marker: nothing recognized survives.
        let host_only = AttrSet::from_host(&["importc".into()]);
        assert!(host_only.is_empty());
    }

    #[test]
    fn add_deduplicates() {
        let mut attrs = AttrSet::new();
        attrs.add(Attribute::Device);
        attrs.add(Attribute::Device);
        assert!(attrs.has(Attribute::Device));
        assert_eq!(attrs.attrs.len(), 1);
    }

    fn limbs() -> Type {
        Type::Array { elem: Box::new(Type::U64), len: 4 }
    }
}
