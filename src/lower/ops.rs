//! Operator substitution tables.
//!
//! Host operator spellings map to backend-native tokens where operands
//! are base scalars. `and`/`or` pick logical or bitwise forms by operand
//! type. Struct-valued operands never reach these tables — the lowering
//! rewrites those operations into calls first.

use crate::ir::{BinOp, Type, UnOp};

/// Map a host infix spelling to a native binary operator.
pub fn binop_for(op: &str, operand_ty: &Type) -> Option<BinOp> {
    let is_bool = *operand_ty == Type::Bool;
    match op {
        "+" => Some(BinOp::Add),
        "-" => Some(BinOp::Sub),
        "*" => Some(BinOp::Mul),
        "/" | "div" => Some(BinOp::Div),
        "%" | "mod" => Some(BinOp::Mod),
        "shl" => Some(BinOp::Shl),
        "shr" => Some(BinOp::Shr),
        "and" => Some(if is_bool { BinOp::LogicAnd } else { BinOp::BitAnd }),
        "or" => Some(if is_bool { BinOp::LogicOr } else { BinOp::BitOr }),
        "xor" => Some(BinOp::BitXor),
        "==" => Some(BinOp::Eq),
        "!=" => Some(BinOp::Ne),
        "<" => Some(BinOp::Lt),
        "<=" => Some(BinOp::Le),
        ">" => Some(BinOp::Gt),
        ">=" => Some(BinOp::Ge),
        _ => None,
    }
}

/// Map a host prefix spelling to a native unary operator.
pub fn unop_for(op: &str) -> Option<UnOp> {
    match op {
        "not" | "!" => Some(UnOp::Not),
        "-" => Some(UnOp::Neg),
        _ => None,
    }
}

/// Canonicalize callee names that are spelled with operator symbols the
/// backends cannot use in identifiers.
pub fn canonical_callee(name: &str) -> &str {
    match name {
        "[]" => "get",
        "[]=" => "set",
        "+" => "add",
        "-" => "sub",
        "*" => "mul",
        "/" => "div",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_ops_substitute() {
        assert_eq!(binop_for("div", &Type::U32), Some(BinOp::Div));
        assert_eq!(binop_for("mod", &Type::U32), Some(BinOp::Mod));
        assert_eq!(binop_for("shl", &Type::U64), Some(BinOp::Shl));
        assert_eq!(binop_for("shr", &Type::U64), Some(BinOp::Shr));
        assert_eq!(binop_for("xor", &Type::U32), Some(BinOp::BitXor));
    }

    #[test]
    fn and_or_depend_on_operand_type() {
        assert_eq!(binop_for("and", &Type::Bool), Some(BinOp::LogicAnd));
        assert_eq!(binop_for("and", &Type::U32), Some(BinOp::BitAnd));
        assert_eq!(binop_for("or", &Type::Bool), Some(BinOp::LogicOr));
        assert_eq!(binop_for("or", &Type::U64), Some(BinOp::BitOr));
    }

    #[test]
    fn unknown_op_is_none() {
        assert_eq!(binop_for("**", &Type::U32), None);
        assert_eq!(unop_for("~"), None);
    }

    #[test]
    fn callee_canonicalization() {
        assert_eq!(canonical_callee("[]"), "get");
        assert_eq!(canonical_callee("[]="), "set");
        assert_eq!(canonical_callee("+"), "add");
        assert_eq!(canonical_callee("mont_mul"), "mont_mul");
    }
}
