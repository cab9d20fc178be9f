//! The compiler's type representation.
//!
//! One closed tagged union with structural equality and hashing: two
//! types are equal iff their kinds and payloads are recursively equal,
//! so identical types reached from different call sites collapse to a
//! single declaration. Values are immutable after creation — they are
//! cloned, never mutated in place.

use std::fmt;

/// A resolved DSL type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Type {
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
    /// Platform size type (`size_t` in the CUDA dialect, `u32` in WGSL).
    Size,
    Str,
    /// Fixed-size array. `len == 0` is the runtime-sized (flexible)
    /// form, emitted pointer-like by both backends.
    Array { elem: Box<Type>, len: u64 },
    /// Array with no compile-time bound.
    UncheckedArray { elem: Box<Type> },
    /// Pointer. `implicit` pointers arise from pass-by-mutable-reference
    /// parameters and take no dereference syntax at call sites.
    Ptr {
        pointee: Box<Type>,
        implicit: bool,
        mutable: bool,
    },
    VoidPtr,
    /// Struct with ordered fields; constructors supply values
    /// positionally, so the order is part of the type's identity.
    Object {
        name: String,
        fields: Vec<(String, Type)>,
    },
    /// Generic struct instantiation. Two instantiations are the same
    /// type iff name, type arguments, and expanded fields all match.
    Instance {
        name: String,
        args: Vec<Type>,
        fields: Vec<(String, Type)>,
    },
    /// Recoverable sentinel: resolution met a named constant that is not
    /// bound in the current context. Callers retry once instantiation
    /// binds it; everything else treats it as unresolved.
    Invalid,
}

impl Type {
    /// Base scalar kinds — the types with native operators in both
    /// backends.
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Type::Bool
                | Type::U8
                | Type::U16
                | Type::U32
                | Type::U64
                | Type::I16
                | Type::I32
                | Type::I64
                | Type::F32
                | Type::F64
                | Type::Size
        )
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Type::U8
                | Type::U16
                | Type::U32
                | Type::U64
                | Type::I16
                | Type::I32
                | Type::I64
                | Type::Size
        )
    }

    /// Fixed-size array with a known positive length. The flexible
    /// (`len == 0`) form is pointer-like and never copy-flagged.
    pub fn is_fixed_array(&self) -> bool {
        matches!(self, Type::Array { len, .. } if *len > 0)
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Ptr { .. } | Type::VoidPtr)
    }

    /// Element type for indexing.
    pub fn elem(&self) -> Option<&Type> {
        match self {
            Type::Array { elem, .. } | Type::UncheckedArray { elem } => Some(elem),
            Type::Ptr { pointee, .. } => Some(pointee),
            _ => None,
        }
    }

    /// Ordered fields of a struct-shaped type.
    pub fn fields(&self) -> Option<&[(String, Type)]> {
        match self {
            Type::Object { fields, .. } | Type::Instance { fields, .. } => Some(fields),
            _ => None,
        }
    }

    /// Only struct-shaped types need a file-scope declaration.
    pub fn needs_declaration(&self) -> bool {
        matches!(self, Type::Object { .. } | Type::Instance { .. })
    }

    /// Emitted declaration name. Instantiations fold their type
    /// arguments into the name — the backends have no generics, so each
    /// instantiation declares under its own identifier.
    pub fn decl_name(&self) -> Option<String> {
        match self {
            Type::Object { name, .. } => Some(name.clone()),
            Type::Instance { name, args, .. } => {
                let mut out = name.clone();
                for a in args {
                    out.push('_');
                    out.push_str(&a.mangle());
                }
                Some(out)
            }
            _ => None,
        }
    }

    /// Strip the implicit-pointer wrapper: the value type a
    /// pass-by-mutable-reference binding reads as.
    pub fn deref_implicit(&self) -> &Type {
        match self {
            Type::Ptr { pointee, implicit: true, .. } => pointee,
            other => other,
        }
    }

    /// Structural signature, used as an interning and memoization key.
    /// Distinct types must produce distinct signatures.
    pub fn sig(&self) -> String {
        match self {
            Type::Void => "void".into(),
            Type::Bool => "bool".into(),
            Type::U8 => "u8".into(),
            Type::U16 => "u16".into(),
            Type::U32 => "u32".into(),
            Type::U64 => "u64".into(),
            Type::I16 => "i16".into(),
            Type::I32 => "i32".into(),
            Type::I64 => "i64".into(),
            Type::F32 => "f32".into(),
            Type::F64 => "f64".into(),
            Type::Size => "size".into(),
            Type::Str => "str".into(),
            Type::Array { elem, len } => format!("[{};{}]", elem.sig(), len),
            Type::UncheckedArray { elem } => format!("[{}]", elem.sig()),
            Type::Ptr { pointee, implicit, mutable } => {
                let head = match (implicit, mutable) {
                    (true, _) => "&",
                    (false, true) => "*",
                    (false, false) => "*const ",
                };
                format!("{}{}", head, pointee.sig())
            }
            Type::VoidPtr => "*void".into(),
            Type::Object { name, fields } => {
                format!("{}{{{}}}", name, field_sigs(fields))
            }
            Type::Instance { name, args, fields } => {
                let args: Vec<String> = args.iter().map(Type::sig).collect();
                format!("{}[{}]{{{}}}", name, args.join(","), field_sigs(fields))
            }
            Type::Invalid => "!".into(),
        }
    }

    /// Identifier-safe name fragment, used in per-instantiation
    /// procedure names and instantiated struct names.
    pub fn mangle(&self) -> String {
        match self {
            Type::Void => "void".into(),
            Type::Bool => "bool".into(),
            Type::U8 => "u8".into(),
            Type::U16 => "u16".into(),
            Type::U32 => "u32".into(),
            Type::U64 => "u64".into(),
            Type::I16 => "i16".into(),
            Type::I32 => "i32".into(),
            Type::I64 => "i64".into(),
            Type::F32 => "f32".into(),
            Type::F64 => "f64".into(),
            Type::Size => "size".into(),
            Type::Str => "str".into(),
            Type::Array { elem, len } => format!("{}x{}", elem.mangle(), len),
            Type::UncheckedArray { elem } => format!("{}s", elem.mangle()),
            Type::Ptr { pointee, .. } => format!("p{}", pointee.mangle()),
            Type::VoidPtr => "pv".into(),
            Type::Object { name, .. } => name.clone(),
            Type::Instance { .. } => self.decl_name().unwrap(),
            Type::Invalid => "invalid".into(),
        }
    }
}

fn field_sigs(fields: &[(String, Type)]) -> String {
    let parts: Vec<String> = fields
        .iter()
        .map(|(n, t)| format!("{}:{}", n, t.sig()))
        .collect();
    parts.join(",")
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Array { elem, len } if *len > 0 => write!(f, "{}[{}]", elem, len),
            Type::Array { elem, .. } => write!(f, "{}[]", elem),
            Type::UncheckedArray { elem } => write!(f, "{}[unchecked]", elem),
            Type::Ptr { pointee, implicit: true, .. } => write!(f, "var {}", pointee),
            Type::Ptr { pointee, .. } => write!(f, "ptr {}", pointee),
            Type::VoidPtr => f.write_str("rawptr"),
            Type::Object { name, .. } => f.write_str(name),
            Type::Instance { name, args, .. } => {
                let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{}[{}]", name, args.join(", "))
            }
            Type::Invalid => f.write_str("<invalid>"),
            other => f.write_str(&other.sig()),
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn limbs(n: u64) -> Type {
        Type::Array { elem: Box::new(Type::U64), len: n }
    }

    #[test]
    fn structural_equality_collapses_duplicates() {
        let a = Type::Object {
            name: "Fp".into(),
            fields: vec![("limbs".into(), limbs(4))],
        };
        let b = Type::Object {
            name: "Fp".into(),
            fields: vec![("limbs".into(), limbs(4))],
        };
        let c = Type::Object {
            name: "Fp".into(),
            fields: vec![("limbs".into(), limbs(6))],
        };
        assert_eq!(a, b);
        assert_ne!(a, c);
        let mut set = HashSet::new();
        set.insert(a);
        set.insert(b);
        set.insert(c);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn instance_identity_includes_args_and_fields() {
        let a = Type::Instance {
            name: "BigInt".into(),
            args: vec![Type::U32],
            fields: vec![("limbs".into(), Type::Array { elem: Box::new(Type::U32), len: 8 })],
        };
        let b = Type::Instance {
            name: "BigInt".into(),
            args: vec![Type::U64],
            fields: vec![("limbs".into(), limbs(4))],
        };
        assert_ne!(a, b);
        assert_ne!(a.sig(), b.sig());
        assert_eq!(a.decl_name().unwrap(), "BigInt_u32");
        assert_eq!(b.decl_name().unwrap(), "BigInt_u64");
    }

    #[test]
    fn mangle_is_identifier_safe() {
        assert_eq!(limbs(4).mangle(), "u64x4");
        let p = Type::Ptr {
            pointee: Box::new(limbs(4)),
            implicit: true,
            mutable: true,
        };
        assert_eq!(p.mangle(), "pu64x4");
        for t in [limbs(4).mangle(), p.mangle()] {
            assert!(t.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
        }
    }

    #[test]
    fn sig_distinguishes_pointer_shapes() {
        let implicit = Type::Ptr {
            pointee: Box::new(Type::U32),
            implicit: true,
            mutable: true,
        };
        let explicit = Type::Ptr {
            pointee: Box::new(Type::U32),
            implicit: false,
            mutable: true,
        };
        let frozen = Type::Ptr {
            pointee: Box::new(Type::U32),
            implicit: false,
            mutable: false,
        };
        let sigs: HashSet<String> =
            [implicit.sig(), explicit.sig(), frozen.sig()].into_iter().collect();
        assert_eq!(sigs.len(), 3);
    }

    #[test]
    fn deref_implicit_strips_one_wrapper() {
        let p = Type::Ptr {
            pointee: Box::new(limbs(4)),
            implicit: true,
            mutable: true,
        };
        assert_eq!(*p.deref_implicit(), limbs(4));
        let raw = Type::Ptr {
            pointee: Box::new(Type::U32),
            implicit: false,
            mutable: true,
        };
        assert_eq!(*raw.deref_implicit(), raw);
        assert_eq!(*Type::U32.deref_implicit(), Type::U32);
    }

    #[test]
    fn flexible_array_is_not_fixed() {
        assert!(limbs(4).is_fixed_array());
        assert!(!limbs(0).is_fixed_array());
        assert!(!Type::UncheckedArray { elem: Box::new(Type::U64) }.is_fixed_array());
    }

    #[test]
    fn scalar_predicates() {
        assert!(Type::Bool.is_scalar());
        assert!(Type::Size.is_integer());
        assert!(Type::F32.is_scalar());
        assert!(!Type::F32.is_integer());
        assert!(!Type::Str.is_scalar());
        assert!(!limbs(4).is_scalar());
        assert!(!Type::VoidPtr.is_scalar());
    }

    #[test]
    fn elem_reaches_through_arrays_and_pointers() {
        assert_eq!(limbs(4).elem(), Some(&Type::U64));
        let u = Type::UncheckedArray { elem: Box::new(Type::U32) };
        assert_eq!(u.elem(), Some(&Type::U32));
        let p = Type::Ptr {
            pointee: Box::new(Type::U32),
            implicit: false,
            mutable: true,
        };
        assert_eq!(p.elem(), Some(&Type::U32));
        assert_eq!(Type::U32.elem(), None);
    }

    #[test]
    fn display_is_stable() {
        assert_eq!(format!("{}", limbs(4)), "u64[4]");
        assert_eq!(format!("{}", Type::Invalid), "<invalid>");
        let inst = Type::Instance {
            name: "BigInt".into(),
            args: vec![Type::U32, Type::U32],
            fields: vec![],
        };
        assert_eq!(format!("{}", inst), "BigInt[u32, u32]");
    }
}
