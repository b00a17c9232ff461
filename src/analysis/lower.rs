//! Translation of tree expressions into builder expressions.
//!
//! Only the quasi-affine fragment is translated. Anything else yields
//! `None`, and callers widen the relation they are building instead.

use crate::ast::{BinaryOp, Expr, ExprKind, UnaryOp};
use crate::presburger::{BuildConstraints, PBBuildExpr, PBCtx, PBSetBuilder};
use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{Signed, Zero};
use std::collections::HashMap;

/// Relation-text name of a free variable of the tree.
pub fn param_name(name: &str) -> String {
    let clean: String = name.chars().map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' }).collect();
    format!("p_{}", clean)
}

/// Lowers expressions against a map from iterator names to their
/// builder-side values. Other names become parameters.
pub struct Lowering<'b, B: BuildConstraints> {
    builder: &'b mut B,
    env: HashMap<String, PBBuildExpr>,
    params: HashMap<String, String>,
}

impl<'b, B: BuildConstraints> Lowering<'b, B> {
    pub fn new(builder: &'b mut B) -> Self {
        Self { builder, env: HashMap::new(), params: HashMap::new() }
    }

    pub fn builder(&mut self) -> &mut B {
        self.builder
    }

    /// Bind an iterator name, shadowing any outer binding.
    pub fn bind(&mut self, name: &str, value: PBBuildExpr) {
        self.env.insert(name.to_string(), value);
    }

    /// Parameters introduced so far, keyed by relation-text name.
    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    fn name(&mut self, n: &str) -> PBBuildExpr {
        if let Some(v) = self.env.get(n) {
            return v.clone();
        }
        let p = param_name(n);
        self.params.insert(p.clone(), n.to_string());
        self.builder.new_param(&p)
    }

    /// Integer-valued expression, exactly.
    pub fn int(&mut self, e: &Expr) -> Option<PBBuildExpr> {
        use PBBuildExpr as P;
        match &e.kind {
            ExprKind::IntConst(v) => Some(P::int(*v)),
            ExprKind::Var(n) => Some(self.name(n)),
            ExprKind::Unary { op: UnaryOp::Neg, operand } => {
                let v = self.int(operand)?;
                Some(match v {
                    P::Int(c) => P::Int(-c),
                    v => -v,
                })
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let (l, r) = (self.int(lhs)?, self.int(rhs)?);
                match op {
                    BinaryOp::Add => Some(fold(l, r, |a, b| a + b, |a, b| a + b)),
                    BinaryOp::Sub => Some(fold(l, r, |a, b| a - b, |a, b| a - b)),
                    BinaryOp::Mul => match (&l, &r) {
                        (P::Int(a), P::Int(b)) => Some(P::Int(a * b)),
                        (P::Int(_), _) | (_, P::Int(_)) => Some(l * r),
                        _ => None,
                    },
                    BinaryOp::FloorDiv | BinaryOp::CeilDiv | BinaryOp::Mod => {
                        let d = match &r {
                            P::Int(d) if d.is_positive() => d.clone(),
                            _ => return None,
                        };
                        if let P::Int(a) = &l {
                            return Some(P::Int(match op {
                                BinaryOp::FloorDiv => a.div_floor(&d),
                                BinaryOp::CeilDiv => -((-a).div_floor(&d)),
                                _ => a.mod_floor(&d),
                            }));
                        }
                        Some(match op {
                            BinaryOp::FloorDiv => l.floor_div(P::Int(d)),
                            BinaryOp::CeilDiv => l.ceil_div(P::Int(d)),
                            _ => l.modulo(P::Int(d)),
                        })
                    }
                    BinaryOp::Min => Some(l.min(r)),
                    BinaryOp::Max => Some(l.max(r)),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Over-approximation of `e` (or of `!e` when `negate`). `None` stands
    /// for `true`.
    pub fn cond(&mut self, e: &Expr, negate: bool) -> Option<PBBuildExpr> {
        use PBBuildExpr as P;
        match &e.kind {
            ExprKind::BoolConst(b) => Some(P::Bool(*b != negate)),
            ExprKind::Unary { op: UnaryOp::LNot, operand } => self.cond(operand, !negate),
            ExprKind::Binary { op: op @ (BinaryOp::LAnd | BinaryOp::LOr), lhs, rhs } => {
                let (l, r) = (self.cond(lhs, negate), self.cond(rhs, negate));
                // and under an even number of negations, or otherwise
                let conjunctive = (*op == BinaryOp::LAnd) != negate;
                if conjunctive {
                    match (l, r) {
                        (Some(l), Some(r)) => Some(l.and(r)),
                        (l, None) => l,
                        (None, r) => r,
                    }
                } else {
                    Some(l?.or(r?))
                }
            }
            ExprKind::Binary { op, lhs, rhs } if op.is_predicate() => {
                let (l, r) = (self.int(lhs)?, self.int(rhs)?);
                let op = cmp_op(*op)?;
                Some(l.cmp(if negate { op.negated() } else { op }, r))
            }
            _ => None,
        }
    }
}

/// Whether `cond` holds for every value of its free names. `false` when
/// the condition is outside the quasi-affine fragment.
pub fn always_holds(ctx: &PBCtx, cond: &Expr) -> bool {
    let mut b = PBSetBuilder::new();
    let mut l = Lowering::new(&mut b);
    match l.cond(cond, true) {
        Some(neg) => l.builder().add_constraint(neg),
        None => return false,
    }
    b.build(ctx).is_empty()
}

fn cmp_op(op: BinaryOp) -> Option<crate::presburger::CmpOp> {
    use crate::presburger::CmpOp;
    Some(match op {
        BinaryOp::LT => CmpOp::LT,
        BinaryOp::LE => CmpOp::LE,
        BinaryOp::GT => CmpOp::GT,
        BinaryOp::GE => CmpOp::GE,
        BinaryOp::EQ => CmpOp::EQ,
        BinaryOp::NE => CmpOp::NE,
        _ => return None,
    })
}

fn fold(
    l: PBBuildExpr,
    r: PBBuildExpr,
    on_const: impl Fn(BigInt, BigInt) -> BigInt,
    on_expr: impl Fn(PBBuildExpr, PBBuildExpr) -> PBBuildExpr,
) -> PBBuildExpr {
    match (l, r) {
        (PBBuildExpr::Int(a), PBBuildExpr::Int(b)) => PBBuildExpr::Int(on_const(a, b)),
        (l, PBBuildExpr::Int(b)) if b.is_zero() => l,
        (l, r) => on_expr(l, r),
    }
}
