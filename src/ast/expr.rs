//! Expressions.
//!
//! Expressions are immutable, reference-counted nodes. The free functions
//! in this module build them with fresh identities.

use super::id::ID;
use serde::{Deserialize, Serialize};
use std::rc::Rc;

/// A shared expression node.
pub type Expr = Rc<ExprNode>;

/// One expression node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExprNode {
    #[serde(skip, default = "ID::new")]
    pub id: ID,
    pub kind: ExprKind,
}

/// Expression kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExprKind {
    /// Integer literal
    IntConst(i64),
    /// Boolean literal
    BoolConst(bool),
    /// Loop iterator or scalar parameter
    Var(String),
    /// Element of a variable defined by a `VarDef`
    Load { var: String, indices: Vec<Expr> },
    /// Binary operation
    Binary { op: BinaryOp, lhs: Expr, rhs: Expr },
    /// Unary operation
    Unary { op: UnaryOp, operand: Expr },
    /// `cond ? then_case : else_case`
    IfExpr { cond: Expr, then_case: Expr, else_case: Expr },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    FloorDiv,
    CeilDiv,
    Mod,
    Min,
    Max,
    LT,
    LE,
    GT,
    GE,
    EQ,
    NE,
    LAnd,
    LOr,
}

impl BinaryOp {
    /// Check if the result is boolean.
    pub fn is_predicate(self) -> bool {
        matches!(
            self,
            BinaryOp::LT
                | BinaryOp::LE
                | BinaryOp::GT
                | BinaryOp::GE
                | BinaryOp::EQ
                | BinaryOp::NE
                | BinaryOp::LAnd
                | BinaryOp::LOr
        )
    }

    pub(crate) fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::FloorDiv => "//",
            BinaryOp::CeilDiv => "/^",
            BinaryOp::Mod => "%",
            BinaryOp::Min => "min",
            BinaryOp::Max => "max",
            BinaryOp::LT => "<",
            BinaryOp::LE => "<=",
            BinaryOp::GT => ">",
            BinaryOp::GE => ">=",
            BinaryOp::EQ => "==",
            BinaryOp::NE => "!=",
            BinaryOp::LAnd => "&&",
            BinaryOp::LOr => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    LNot,
}

impl ExprNode {
    /// Rebuild with a different kind, keeping the identity.
    pub fn with_kind(&self, kind: ExprKind) -> Expr {
        Rc::new(ExprNode { id: self.id, kind })
    }

    pub fn as_int(&self) -> Option<i64> {
        match self.kind {
            ExprKind::IntConst(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_var(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Var(n) => Some(n),
            _ => None,
        }
    }

    /// Direct sub-expressions.
    pub fn children(&self) -> Vec<&Expr> {
        match &self.kind {
            ExprKind::IntConst(_) | ExprKind::BoolConst(_) | ExprKind::Var(_) => Vec::new(),
            ExprKind::Load { indices, .. } => indices.iter().collect(),
            ExprKind::Binary { lhs, rhs, .. } => vec![lhs, rhs],
            ExprKind::Unary { operand, .. } => vec![operand],
            ExprKind::IfExpr { cond, then_case, else_case } => vec![cond, then_case, else_case],
        }
    }

    /// Structural equality, ignoring identities.
    pub fn same_structure(&self, other: &ExprNode) -> bool {
        use ExprKind as K;
        match (&self.kind, &other.kind) {
            (K::IntConst(a), K::IntConst(b)) => a == b,
            (K::BoolConst(a), K::BoolConst(b)) => a == b,
            (K::Var(a), K::Var(b)) => a == b,
            (K::Load { var: a, indices: ia }, K::Load { var: b, indices: ib }) => {
                a == b && ia.len() == ib.len() && ia.iter().zip(ib).all(|(x, y)| x.same_structure(y))
            }
            (K::Binary { op: a, lhs: la, rhs: ra }, K::Binary { op: b, lhs: lb, rhs: rb }) => {
                a == b && la.same_structure(lb) && ra.same_structure(rb)
            }
            (K::Unary { op: a, operand: x }, K::Unary { op: b, operand: y }) => a == b && x.same_structure(y),
            (
                K::IfExpr { cond: c1, then_case: t1, else_case: e1 },
                K::IfExpr { cond: c2, then_case: t2, else_case: e2 },
            ) => c1.same_structure(c2) && t1.same_structure(t2) && e1.same_structure(e2),
            _ => false,
        }
    }
}

fn node(kind: ExprKind) -> Expr {
    Rc::new(ExprNode { id: ID::new(), kind })
}

pub fn int(v: i64) -> Expr {
    node(ExprKind::IntConst(v))
}

pub fn boolean(b: bool) -> Expr {
    node(ExprKind::BoolConst(b))
}

pub fn var(name: impl Into<String>) -> Expr {
    node(ExprKind::Var(name.into()))
}

pub fn load(var: impl Into<String>, indices: Vec<Expr>) -> Expr {
    node(ExprKind::Load { var: var.into(), indices })
}

pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    node(ExprKind::Binary { op, lhs, rhs })
}

pub fn add(lhs: Expr, rhs: Expr) -> Expr {
    binary(BinaryOp::Add, lhs, rhs)
}

pub fn sub(lhs: Expr, rhs: Expr) -> Expr {
    binary(BinaryOp::Sub, lhs, rhs)
}

pub fn mul(lhs: Expr, rhs: Expr) -> Expr {
    binary(BinaryOp::Mul, lhs, rhs)
}

pub fn floor_div(lhs: Expr, rhs: Expr) -> Expr {
    binary(BinaryOp::FloorDiv, lhs, rhs)
}

pub fn ceil_div(lhs: Expr, rhs: Expr) -> Expr {
    binary(BinaryOp::CeilDiv, lhs, rhs)
}

pub fn modulo(lhs: Expr, rhs: Expr) -> Expr {
    binary(BinaryOp::Mod, lhs, rhs)
}

pub fn min(lhs: Expr, rhs: Expr) -> Expr {
    binary(BinaryOp::Min, lhs, rhs)
}

pub fn max(lhs: Expr, rhs: Expr) -> Expr {
    binary(BinaryOp::Max, lhs, rhs)
}

pub fn lt(lhs: Expr, rhs: Expr) -> Expr {
    binary(BinaryOp::LT, lhs, rhs)
}

pub fn le(lhs: Expr, rhs: Expr) -> Expr {
    binary(BinaryOp::LE, lhs, rhs)
}

pub fn gt(lhs: Expr, rhs: Expr) -> Expr {
    binary(BinaryOp::GT, lhs, rhs)
}

pub fn ge(lhs: Expr, rhs: Expr) -> Expr {
    binary(BinaryOp::GE, lhs, rhs)
}

pub fn eq(lhs: Expr, rhs: Expr) -> Expr {
    binary(BinaryOp::EQ, lhs, rhs)
}

pub fn ne(lhs: Expr, rhs: Expr) -> Expr {
    binary(BinaryOp::NE, lhs, rhs)
}

pub fn land(lhs: Expr, rhs: Expr) -> Expr {
    binary(BinaryOp::LAnd, lhs, rhs)
}

pub fn lor(lhs: Expr, rhs: Expr) -> Expr {
    binary(BinaryOp::LOr, lhs, rhs)
}

pub fn neg(operand: Expr) -> Expr {
    node(ExprKind::Unary { op: UnaryOp::Neg, operand })
}

pub fn lnot(operand: Expr) -> Expr {
    node(ExprKind::Unary { op: UnaryOp::LNot, operand })
}

pub fn if_expr(cond: Expr, then_case: Expr, else_case: Expr) -> Expr {
    node(ExprKind::IfExpr { cond, then_case, else_case })
}

/// `a + b` folding integer constants.
pub fn add_folded(a: Expr, b: Expr) -> Expr {
    match (a.as_int(), b.as_int()) {
        (Some(x), Some(y)) => int(x + y),
        (Some(0), _) => b,
        (_, Some(0)) => a,
        _ => add(a, b),
    }
}

/// `a - b` folding integer constants.
pub fn sub_folded(a: Expr, b: Expr) -> Expr {
    match (a.as_int(), b.as_int()) {
        (Some(x), Some(y)) => int(x - y),
        (_, Some(0)) => a,
        _ => sub(a, b),
    }
}

/// `a * b` folding integer constants.
pub fn mul_folded(a: Expr, b: Expr) -> Expr {
    match (a.as_int(), b.as_int()) {
        (Some(x), Some(y)) => int(x * y),
        (Some(1), _) => b,
        (_, Some(1)) => a,
        _ => mul(a, b),
    }
}

/// A copy of the expression with fresh identities throughout.
pub fn deep_copy(e: &Expr) -> Expr {
    let kind = match &e.kind {
        ExprKind::Load { var, indices } => {
            ExprKind::Load { var: var.clone(), indices: indices.iter().map(deep_copy).collect() }
        }
        ExprKind::Binary { op, lhs, rhs } => ExprKind::Binary { op: *op, lhs: deep_copy(lhs), rhs: deep_copy(rhs) },
        ExprKind::Unary { op, operand } => ExprKind::Unary { op: *op, operand: deep_copy(operand) },
        ExprKind::IfExpr { cond, then_case, else_case } => ExprKind::IfExpr {
            cond: deep_copy(cond),
            then_case: deep_copy(then_case),
            else_case: deep_copy(else_case),
        },
        leaf => leaf.clone(),
    };
    node(kind)
}

/// Replace every `Var(name)` by `value` (with fresh identities).
pub fn substitute(e: &Expr, name: &str, value: &Expr) -> Expr {
    let rebuilt = match &e.kind {
        ExprKind::Var(n) if n == name => return deep_copy(value),
        ExprKind::IntConst(_) | ExprKind::BoolConst(_) | ExprKind::Var(_) => return e.clone(),
        ExprKind::Load { var, indices } => ExprKind::Load {
            var: var.clone(),
            indices: indices.iter().map(|i| substitute(i, name, value)).collect(),
        },
        ExprKind::Binary { op, lhs, rhs } => ExprKind::Binary {
            op: *op,
            lhs: substitute(lhs, name, value),
            rhs: substitute(rhs, name, value),
        },
        ExprKind::Unary { op, operand } => ExprKind::Unary { op: *op, operand: substitute(operand, name, value) },
        ExprKind::IfExpr { cond, then_case, else_case } => ExprKind::IfExpr {
            cond: substitute(cond, name, value),
            then_case: substitute(then_case, name, value),
            else_case: substitute(else_case, name, value),
        },
    };
    if rebuilt == e.kind {
        e.clone()
    } else {
        e.with_kind(rebuilt)
    }
}

/// Names read through `Var` anywhere in the expression.
pub fn vars_of(e: &Expr, out: &mut Vec<String>) {
    if let ExprKind::Var(n) = &e.kind {
        if !out.contains(n) {
            out.push(n.clone());
        }
    }
    for c in e.children() {
        vars_of(c, out);
    }
}

/// Variables loaded anywhere in the expression.
pub fn loads_of(e: &Expr, out: &mut Vec<String>) {
    if let ExprKind::Load { var, .. } = &e.kind {
        if !out.contains(var) {
            out.push(var.clone());
        }
    }
    for c in e.children() {
        loads_of(c, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_structure_ignores_ids() {
        let a = add(var("i"), int(1));
        let b = add(var("i"), int(1));
        assert_ne!(a, b);
        assert!(a.same_structure(&b));
        assert!(!a.same_structure(&add(var("j"), int(1))));
    }

    #[test]
    fn test_substitute_keeps_untouched_nodes() {
        let idx = add(var("j"), int(1));
        let e = add(load("a", vec![var("i"), idx.clone()]), var("i"));
        let s = substitute(&e, "i", &mul(var("k"), int(2)));
        assert!(s.same_structure(&add(load("a", vec![mul(var("k"), int(2)), add(var("j"), int(1))]), mul(var("k"), int(2)))));
        assert_eq!(s.id, e.id);
        let untouched = substitute(&idx, "i", &int(0));
        assert!(Rc::ptr_eq(&untouched, &idx));
    }

    #[test]
    fn test_folding_and_collection() {
        assert_eq!(add_folded(int(2), int(3)).as_int(), Some(5));
        assert_eq!(mul_folded(var("n"), int(1)).as_var(), Some("n"));
        let mut vars = Vec::new();
        vars_of(&add(load("a", vec![var("i")]), var("n")), &mut vars);
        assert_eq!(vars, vec!["i", "n"]);
        let mut loads = Vec::new();
        loads_of(&add(load("a", vec![load("b", vec![])]), var("n")), &mut loads);
        assert_eq!(loads, vec!["a", "b"]);
    }
}
