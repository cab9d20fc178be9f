//! The typed host AST the compiler accepts.
//!
//! This is the external input boundary: a restricted, typed subset of a
//! general-purpose language, already parsed and shaped as a tree. The
//! lowering stage queries it for node kinds, type descriptors, symbol
//! identity, and literal values. Constructs outside the documented subset
//! fail lowering loudly — they are never corrected or skipped.
//!
//! Programs are built through [`build`], which plays the role of the host
//! compiler's macro facility.

pub mod build;

// ─── Type descriptors ─────────────────────────────────────────────

/// An array length as written in the host program: a literal, or a named
/// constant to be resolved against the constant environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Len {
    Fixed(u64),
    Named(String),
}

/// A host type descriptor (pre-resolution).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Ty {
    Void,
    Bool,
    U8,
    U16,
    U32,
    U64,
    I16,
    I32,
    I64,
    F32,
    F64,
    Size,
    Str,
    Array { elem: Box<Ty>, len: Len },
    UncheckedArray { elem: Box<Ty> },
    Ptr { pointee: Box<Ty>, mutable: bool },
    /// Pass-by-mutable-reference parameter type (implicit pointer).
    Var(Box<Ty>),
    VoidPtr,
    /// Reference to a declared struct.
    Named(String),
    /// Generic struct instantiation, e.g. `BigInt[U32, 8]` spelled with
    /// resolved type arguments.
    Instance { name: String, args: Vec<Ty> },
    /// An unresolved type parameter inside a generic declaration.
    Param(String),
}

impl Ty {
    pub fn array(elem: Ty, len: u64) -> Ty {
        Ty::Array { elem: Box::new(elem), len: Len::Fixed(len) }
    }

    pub fn array_named(elem: Ty, len: &str) -> Ty {
        Ty::Array { elem: Box::new(elem), len: Len::Named(len.to_string()) }
    }

    pub fn var(inner: Ty) -> Ty {
        Ty::Var(Box::new(inner))
    }

    pub fn ptr(pointee: Ty) -> Ty {
        Ty::Ptr { pointee: Box::new(pointee), mutable: true }
    }
}

// ─── Declarations ─────────────────────────────────────────────────

/// Compile-time constant section entry.
#[derive(Clone, Debug)]
pub struct ConstDef {
    pub name: String,
    pub value: u64,
}

/// Struct declaration; `type_params` is non-empty for generic structs.
#[derive(Clone, Debug)]
pub struct StructDef {
    pub name: String,
    pub type_params: Vec<String>,
    pub fields: Vec<(String, Ty)>,
}

#[derive(Clone, Debug)]
pub struct ParamDef {
    pub name: String,
    pub ty: Ty,
}

/// Procedure declaration.
///
/// `body: None` declares a signature only; combined with an attribute set
/// that filters to empty this is how externally-provided primitives are
/// made visible to call sites.
#[derive(Clone, Debug)]
pub struct ProcDef {
    pub name: String,
    pub type_params: Vec<String>,
    pub params: Vec<ParamDef>,
    pub ret: Ty,
    pub attrs: Vec<String>,
    pub body: Option<Ast>,
}

impl ProcDef {
    /// A procedure is generic when it declares type parameters.
    /// Procedures whose signatures mention unbound named constants are
    /// deferred separately during lowering.
    pub fn has_type_params(&self) -> bool {
        !self.type_params.is_empty()
    }
}

/// A complete host compilation unit.
#[derive(Clone, Debug, Default)]
pub struct Program {
    pub consts: Vec<ConstDef>,
    pub structs: Vec<StructDef>,
    pub procs: Vec<ProcDef>,
}

impl Program {
    pub fn find_proc(&self, name: &str) -> Option<&ProcDef> {
        self.procs.iter().find(|p| p.name == name)
    }

    pub fn find_struct(&self, name: &str) -> Option<&StructDef> {
        self.structs.iter().find(|s| s.name == name)
    }

    pub fn const_value(&self, name: &str) -> Option<u64> {
        self.consts.iter().find(|c| c.name == name).map(|c| c.value)
    }
}

// ─── Nodes ────────────────────────────────────────────────────────

/// Storage class of a local binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Storage {
    #[default]
    Default,
    /// Workgroup-shared scratch.
    Shared,
    /// Explicitly thread-private storage.
    Private,
}

/// A host AST node. One uniform enumeration; the lowering stage is a
/// single dispatch over these tags.
#[derive(Clone, Debug)]
pub enum Ast {
    Ident(String),
    Int { value: u64, ty: Ty },
    Float { value: f64, ty: Ty },
    Bool(bool),
    Str(String),
    Nil { ty: Ty },
    ArrayLit(Vec<Ast>),
    /// Struct construction; values are positional per declared field.
    Construct { ty: Ty, args: Vec<Ast> },
    Infix { op: String, lhs: Box<Ast>, rhs: Box<Ast> },
    Prefix { op: String, operand: Box<Ast> },
    Call { name: String, args: Vec<Ast> },
    Member { obj: Box<Ast>, field: String },
    Index { base: Box<Ast>, index: Box<Ast> },
    AddrOf(Box<Ast>),
    Deref(Box<Ast>),
    /// Value conversion `T(x)`.
    Conv { ty: Ty, operand: Box<Ast> },
    /// Bit cast `cast[T](x)`.
    Cast { ty: Ty, operand: Box<Ast> },
    Block(Vec<Ast>),
    Let {
        name: String,
        ty: Option<Ty>,
        init: Option<Box<Ast>>,
        mutable: bool,
        storage: Storage,
    },
    Assign { target: Box<Ast>, value: Box<Ast> },
    If {
        arms: Vec<(Ast, Ast)>,
        else_body: Option<Box<Ast>>,
    },
    For {
        var: String,
        start: Box<Ast>,
        end: Box<Ast>,
        body: Box<Ast>,
    },
    While { cond: Box<Ast>, body: Box<Ast> },
    Return(Option<Box<Ast>>),
    Asm(String),
}

impl Ast {
    /// Tag name for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Ast::Ident(_) => "ident",
            Ast::Int { .. } => "int-literal",
            Ast::Float { .. } => "float-literal",
            Ast::Bool(_) => "bool-literal",
            Ast::Str(_) => "string-literal",
            Ast::Nil { .. } => "nil-literal",
            Ast::ArrayLit(_) => "array-literal",
            Ast::Construct { .. } => "construct",
            Ast::Infix { .. } => "infix",
            Ast::Prefix { .. } => "prefix",
            Ast::Call { .. } => "call",
            Ast::Member { .. } => "member",
            Ast::Index { .. } => "index",
            Ast::AddrOf(_) => "addr-of",
            Ast::Deref(_) => "deref",
            Ast::Conv { .. } => "conv",
            Ast::Cast { .. } => "cast",
            Ast::Block(_) => "block",
            Ast::Let { .. } => "let",
            Ast::Assign { .. } => "assign",
            Ast::If { .. } => "if",
            Ast::For { .. } => "for",
            Ast::While { .. } => "while",
            Ast::Return(_) => "return",
            Ast::Asm(_) => "asm",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_lookup() {
        let mut prog = Program::default();
        prog.consts.push(ConstDef { name: "N".into(), value: 8 });
        prog.procs.push(ProcDef {
            name: "f".into(),
            type_params: vec![],
            params: vec![],
            ret: Ty::Void,
            attrs: vec!["device".into()],
            body: None,
        });
        assert_eq!(prog.const_value("N"), Some(8));
        assert!(prog.find_proc("f").is_some());
        assert!(prog.find_proc("g").is_none());
    }

    #[test]
    fn generic_detection() {
        let p = ProcDef {
            name: "ccopy".into(),
            type_params: vec!["W".into()],
            params: vec![],
            ret: Ty::Void,
            attrs: vec!["device".into()],
            body: None,
        };
        assert!(p.has_type_params());
    }

    #[test]
    fn ty_helpers() {
        assert_eq!(
            Ty::array(Ty::U32, 4),
            Ty::Array { elem: Box::new(Ty::U32), len: Len::Fixed(4) }
        );
        assert_eq!(
            Ty::array_named(Ty::Param("W".into()), "N"),
            Ty::Array {
                elem: Box::new(Ty::Param("W".into())),
                len: Len::Named("N".into())
            }
        );
    }
}
