//! Expression lowering.
//!
//! Operator rewriting happens here: native operators for base scalars,
//! call rewriting for struct-valued operands, and literal type
//! back-propagation for mixed literal/non-literal operands.

use crate::dsl::Ast;
use crate::ir::{Node, Type};

use super::ops::{binop_for, unop_for};
use super::{LowerError, Lowering};

impl<'a> Lowering<'a> {
    /// Lower an expression. Statements synthesized on the way (hoisted
    /// array-copy temporaries) are pushed onto `pre` and must be emitted
    /// before the statement that contains this expression.
    pub(crate) fn lower_expr(
        &mut self,
        ast: &Ast,
        pre: &mut Vec<Node>,
    ) -> Result<Node, LowerError> {
        match ast {
            Ast::Ident(name) => {
                if let Some(sym) = self.scope_lookup(name) {
                    return Ok(Node::Sym(sym));
                }
                if let Some(value) = self.len_binding(name) {
                    return Ok(Node::IntLit { value: value as i128, ty: Type::Size });
                }
                if let Some(value) = self.host().const_value(name) {
                    return Ok(Node::IntLit { value: value as i128, ty: Type::Size });
                }
                Err(LowerError::UnknownIdent(name.clone()))
            }
            Ast::Int { value, ty } => {
                let ty = self.resolve_ty(ty, &self.current_subst)?;
                Ok(Node::IntLit { value: *value as i128, ty })
            }
            Ast::Float { value, ty } => {
                let ty = self.resolve_ty(ty, &self.current_subst)?;
                Ok(Node::FloatLit { value: *value, ty })
            }
            Ast::Bool(b) => Ok(Node::BoolLit(*b)),
            Ast::Str(s) => Ok(Node::StrLit(s.clone())),
            Ast::Nil { ty } => {
                let ty = self.resolve_ty(ty, &self.current_subst)?;
                Ok(Node::NilLit { ty })
            }
            Ast::ArrayLit(elems) => {
                if elems.is_empty() {
                    return Err(LowerError::CannotInfer("an empty array literal".into()));
                }
                let mut nodes = Vec::new();
                for e in elems {
                    nodes.push(self.lower_expr(e, pre)?);
                }
                let elem_ty = nodes[0].ty();
                let nodes: Vec<Node> = nodes
                    .into_iter()
                    .map(|n| retype_literal(n, &elem_ty))
                    .collect();
                let ty = Type::Array {
                    elem: Box::new(elem_ty),
                    len: nodes.len() as u64,
                };
                Ok(Node::ArrayLit { ty, elems: nodes })
            }
            Ast::Construct { ty, args } => {
                let ty = self.resolve_ty(ty, &self.current_subst)?;
                let fields = ty.fields().ok_or_else(|| LowerError::Instantiation {
                    name: format!("{}", ty),
                    reason: "constructed type is not a struct".into(),
                })?;
                if fields.len() != args.len() {
                    return Err(LowerError::ConstructorArity {
                        ty: format!("{}", ty),
                        expected: fields.len(),
                        given: args.len(),
                    });
                }
                let field_tys: Vec<Type> = fields.iter().map(|(_, t)| t.clone()).collect();
                let mut nodes = Vec::new();
                for (a, fty) in args.iter().zip(&field_tys) {
                    let n = self.lower_expr(a, pre)?;
                    nodes.push(retype_literal(n, fty));
                }
                self.ctx.register_type(&ty);
                Ok(Node::Construct { ty, args: nodes })
            }
            Ast::Infix { op, lhs, rhs } => self.lower_infix(op, lhs, rhs, pre),
            Ast::Prefix { op, operand } => self.lower_prefix(op, operand, pre),
            Ast::Call { name, args } => self.lower_call(name, args, pre),
            Ast::Member { obj, field } => {
                let obj = self.lower_expr(obj, pre)?;
                let obj_ty = obj.ty();
                let fields = obj_ty.fields().ok_or_else(|| LowerError::UnknownField {
                    field: field.clone(),
                    ty: format!("{}", obj_ty),
                })?;
                let ty = fields
                    .iter()
                    .find(|(n, _)| n == field)
                    .map(|(_, t)| t.clone())
                    .ok_or_else(|| LowerError::UnknownField {
                        field: field.clone(),
                        ty: format!("{}", obj_ty),
                    })?;
                Ok(Node::Member { obj: Box::new(obj), field: field.clone(), ty })
            }
            Ast::Index { base, index } => {
                let base = self.lower_expr(base, pre)?;
                let base_ty = base.ty();
                let elem = base_ty
                    .elem()
                    .cloned()
                    .ok_or_else(|| LowerError::NotIndexable(format!("{}", base_ty)))?;
                let index = self.lower_expr(index, pre)?;
                Ok(Node::Index {
                    base: Box::new(base),
                    index: Box::new(index),
                    ty: elem,
                })
            }
            Ast::AddrOf(operand) => {
                let operand = self.lower_expr(operand, pre)?;
                let ty = Type::Ptr {
                    pointee: Box::new(operand.ty()),
                    implicit: false,
                    mutable: true,
                };
                Ok(Node::AddrOf { operand: Box::new(operand), ty })
            }
            Ast::Deref(operand) => {
                let operand = self.lower_expr(operand, pre)?;
                let ty = match operand.ty() {
                    Type::Ptr { pointee, .. } => *pointee,
                    other => return Err(LowerError::NotAPointer(format!("{}", other))),
                };
                Ok(Node::Deref { operand: Box::new(operand), ty })
            }
            Ast::Conv { ty, operand } => {
                let ty = self.resolve_ty(ty, &self.current_subst)?;
                self.ctx.register_type(&ty);
                let operand = self.lower_expr(operand, pre)?;
                Ok(Node::Convert { ty, operand: Box::new(operand) })
            }
            Ast::Cast { ty, operand } => {
                let ty = self.resolve_ty(ty, &self.current_subst)?;
                self.ctx.register_type(&ty);
                let operand = self.lower_expr(operand, pre)?;
                Ok(Node::Cast { ty, operand: Box::new(operand) })
            }
            // A block in value position: its last statement is its value.
            Ast::Block(_) => {
                let block = self.lower_scoped_block(ast)?;
                match block {
                    Node::Block { body, .. } => {
                        let ty = body.last().map(|n| n.ty()).unwrap_or(Type::Void);
                        Ok(Node::Block { body, ty })
                    }
                    other => Ok(other),
                }
            }
            other => Err(LowerError::UnsupportedConstruct(
                "expression",
                other.kind_name(),
            )),
        }
    }

    fn lower_infix(
        &mut self,
        op: &str,
        lhs: &Ast,
        rhs: &Ast,
        pre: &mut Vec<Node>,
    ) -> Result<Node, LowerError> {
        let lhs = self.lower_expr(lhs, pre)?;
        let rhs = self.lower_expr(rhs, pre)?;

        // Struct-valued operands mean the operator is sugar over a user
        // procedure; the backends have no operators for those types.
        if !lhs.ty().is_scalar() || !rhs.ty().is_scalar() {
            return self.lower_call_with(op, vec![lhs, rhs], pre);
        }

        let (lhs, rhs) = backpropagate(lhs, rhs);
        let operand_ty = if lhs.is_literal() { rhs.ty() } else { lhs.ty() };
        let bin = binop_for(op, &operand_ty).ok_or_else(|| LowerError::UnknownOperator {
            op: op.to_string(),
            ty: format!("{}", operand_ty),
        })?;
        let ty = if bin.is_comparison() { Type::Bool } else { operand_ty };
        Ok(Node::Binary {
            op: bin,
            ty,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn lower_prefix(
        &mut self,
        op: &str,
        operand: &Ast,
        pre: &mut Vec<Node>,
    ) -> Result<Node, LowerError> {
        let operand = self.lower_expr(operand, pre)?;
        if !operand.ty().is_scalar() {
            let name = if op == "-" { "neg" } else { op };
            return self.lower_call_with(name, vec![operand], pre);
        }
        let un = unop_for(op).ok_or_else(|| LowerError::UnknownOperator {
            op: op.to_string(),
            ty: format!("{}", operand.ty()),
        })?;
        let ty = operand.ty();
        Ok(Node::Unary { op: un, ty, operand: Box::new(operand) })
    }
}

// ─── Literal coercion ─────────────────────────────────────────────

/// Re-type a literal node to match a concrete scalar target type. The
/// WGSL dialect does no numeric literal promotion, so the lowering pins
/// every literal to the type of its non-literal context.
pub(crate) fn retype_literal(node: Node, target: &Type) -> Node {
    if !target.is_scalar() {
        return node;
    }
    match node {
        Node::IntLit { value, .. } => match target {
            Type::F32 | Type::F64 => Node::FloatLit {
                value: value as f64,
                ty: target.clone(),
            },
            t if t.is_integer() => Node::IntLit { value, ty: t.clone() },
            _ => Node::IntLit { value, ty: Type::Size },
        },
        Node::FloatLit { value, .. } if matches!(target, Type::F32 | Type::F64) => {
            Node::FloatLit { value, ty: target.clone() }
        }
        other => other,
    }
}

/// One-literal back-propagation: a literal operand adopts the type of a
/// non-literal partner. When both operands are literals their host types
/// stand as written.
fn backpropagate(lhs: Node, rhs: Node) -> (Node, Node) {
    if lhs.is_literal() && !rhs.is_literal() {
        let ty = rhs.ty();
        (retype_literal(lhs, &ty), rhs)
    } else if !lhs.is_literal() && rhs.is_literal() {
        let ty = lhs.ty();
        let rhs = retype_literal(rhs, &ty);
        (lhs, rhs)
    } else {
        (lhs, rhs)
    }
}
