//! Statements.

use super::expr::{self, Expr};
use super::id::ID;
use serde::{Deserialize, Serialize};
use std::rc::Rc;

/// A shared statement node.
pub type Stmt = Rc<StmtNode>;

/// One statement node: an identity, an optional user label and the
/// statement itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StmtNode {
    #[serde(skip, default = "ID::new")]
    pub id: ID,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub kind: StmtKind,
}

/// Statement kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StmtKind {
    /// Statements executed in order
    StmtSeq { stmts: Vec<Stmt> },
    /// Scope of a variable
    VarDef { name: String, buffer: Buffer, body: Stmt },
    /// `var[indices] = expr`
    Store { var: String, indices: Vec<Expr>, expr: Expr },
    /// `var[indices] op= expr`
    ReduceTo { var: String, indices: Vec<Expr>, op: ReduceOp, expr: Expr },
    /// `for iter = begin; iter != end; iter += step`, running `len` times
    For {
        iter: String,
        begin: Expr,
        end: Expr,
        step: Expr,
        len: Expr,
        property: ForProperty,
        body: Stmt,
    },
    If { cond: Expr, then_case: Stmt, else_case: Option<Stmt> },
    /// Run `body` knowing `cond` holds
    Assert { cond: Expr, body: Stmt },
    /// Evaluate for side effects
    Eval { expr: Expr },
}

/// Storage description of a variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Buffer {
    pub shape: Vec<Expr>,
    pub dtype: DataType,
    pub atype: AccessType,
    #[serde(default)]
    pub mtype: MemType,
}

impl Buffer {
    pub fn new(shape: Vec<Expr>, dtype: DataType, atype: AccessType) -> Self {
        Self { shape, dtype, atype, mtype: MemType::default() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Int32,
    Int64,
    Float32,
    Float64,
    Bool,
}

/// How a variable is visible outside the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessType {
    /// Read-only argument
    Input,
    /// Write-only result
    Output,
    /// Argument read and written
    InOut,
    /// Local temporary
    Cache,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MemType {
    #[default]
    CPU,
    GPUGlobal,
    GPUShared,
    GPULocal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReduceOp {
    Add,
    Mul,
    Min,
    Max,
}

/// Loop annotations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForProperty {
    /// Iterations run concurrently
    #[serde(default)]
    pub parallel: bool,
    /// Variables whose dependences across iterations are to be ignored
    #[serde(default)]
    pub no_deps: Vec<String>,
}

impl StmtNode {
    /// Rebuild with a different kind, keeping identity and label.
    pub fn with_kind(&self, kind: StmtKind) -> Stmt {
        Rc::new(StmtNode { id: self.id, label: self.label.clone(), kind })
    }

    /// Direct sub-statements, in execution order.
    pub fn children(&self) -> Vec<&Stmt> {
        match &self.kind {
            StmtKind::StmtSeq { stmts } => stmts.iter().collect(),
            StmtKind::VarDef { body, .. } | StmtKind::For { body, .. } | StmtKind::Assert { body, .. } => {
                vec![body]
            }
            StmtKind::If { then_case, else_case, .. } => {
                let mut out = vec![then_case];
                if let Some(e) = else_case {
                    out.push(e);
                }
                out
            }
            StmtKind::Store { .. } | StmtKind::ReduceTo { .. } | StmtKind::Eval { .. } => Vec::new(),
        }
    }

    /// Expressions owned directly by this node (not by sub-statements).
    pub fn exprs(&self) -> Vec<&Expr> {
        match &self.kind {
            StmtKind::StmtSeq { .. } => Vec::new(),
            StmtKind::VarDef { buffer, .. } => buffer.shape.iter().collect(),
            StmtKind::Store { indices, expr, .. } | StmtKind::ReduceTo { indices, expr, .. } => {
                indices.iter().chain(std::iter::once(expr)).collect()
            }
            StmtKind::For { begin, end, step, len, .. } => vec![begin, end, step, len],
            StmtKind::If { cond, .. } | StmtKind::Assert { cond, .. } => vec![cond],
            StmtKind::Eval { expr } => vec![expr],
        }
    }

    pub fn is_for(&self) -> bool {
        matches!(self.kind, StmtKind::For { .. })
    }

    /// Short description for messages: kind, identity and label.
    pub fn describe(&self) -> String {
        let kind = match &self.kind {
            StmtKind::StmtSeq { .. } => "StmtSeq".to_string(),
            StmtKind::VarDef { name, .. } => format!("VarDef {}", name),
            StmtKind::Store { var, .. } => format!("Store {}", var),
            StmtKind::ReduceTo { var, .. } => format!("ReduceTo {}", var),
            StmtKind::For { iter, .. } => format!("For {}", iter),
            StmtKind::If { .. } => "If".to_string(),
            StmtKind::Assert { .. } => "Assert".to_string(),
            StmtKind::Eval { .. } => "Eval".to_string(),
        };
        match &self.label {
            Some(l) => format!("{} {} \"{}\"", kind, self.id, l),
            None => format!("{} {}", kind, self.id),
        }
    }

    /// Structural equality, ignoring identities and labels.
    pub fn same_structure(&self, other: &StmtNode) -> bool {
        use StmtKind as K;
        let exprs_eq = |a: &[Expr], b: &[Expr]| a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_structure(y));
        match (&self.kind, &other.kind) {
            (K::StmtSeq { stmts: a }, K::StmtSeq { stmts: b }) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_structure(y))
            }
            (K::VarDef { name: n1, buffer: b1, body: s1 }, K::VarDef { name: n2, buffer: b2, body: s2 }) => {
                n1 == n2
                    && b1.dtype == b2.dtype
                    && b1.atype == b2.atype
                    && b1.mtype == b2.mtype
                    && exprs_eq(&b1.shape, &b2.shape)
                    && s1.same_structure(s2)
            }
            (K::Store { var: v1, indices: i1, expr: e1 }, K::Store { var: v2, indices: i2, expr: e2 }) => {
                v1 == v2 && exprs_eq(i1, i2) && e1.same_structure(e2)
            }
            (
                K::ReduceTo { var: v1, indices: i1, op: o1, expr: e1 },
                K::ReduceTo { var: v2, indices: i2, op: o2, expr: e2 },
            ) => v1 == v2 && o1 == o2 && exprs_eq(i1, i2) && e1.same_structure(e2),
            (
                K::For { iter: n1, begin: b1, end: e1, step: t1, len: l1, property: p1, body: s1 },
                K::For { iter: n2, begin: b2, end: e2, step: t2, len: l2, property: p2, body: s2 },
            ) => {
                n1 == n2
                    && p1 == p2
                    && b1.same_structure(b2)
                    && e1.same_structure(e2)
                    && t1.same_structure(t2)
                    && l1.same_structure(l2)
                    && s1.same_structure(s2)
            }
            (
                K::If { cond: c1, then_case: t1, else_case: e1 },
                K::If { cond: c2, then_case: t2, else_case: e2 },
            ) => {
                c1.same_structure(c2)
                    && t1.same_structure(t2)
                    && match (e1, e2) {
                        (None, None) => true,
                        (Some(a), Some(b)) => a.same_structure(b),
                        _ => false,
                    }
            }
            (K::Assert { cond: c1, body: s1 }, K::Assert { cond: c2, body: s2 }) => {
                c1.same_structure(c2) && s1.same_structure(s2)
            }
            (K::Eval { expr: a }, K::Eval { expr: b }) => a.same_structure(b),
            _ => false,
        }
    }
}

fn node(kind: StmtKind) -> Stmt {
    Rc::new(StmtNode { id: ID::new(), label: None, kind })
}

/// A copy of `stmt` carrying a label.
pub fn labeled(label: impl Into<String>, stmt: Stmt) -> Stmt {
    Rc::new(StmtNode { id: stmt.id, label: Some(label.into()), kind: stmt.kind.clone() })
}

pub fn seq(stmts: Vec<Stmt>) -> Stmt {
    node(StmtKind::StmtSeq { stmts })
}

pub fn var_def(name: impl Into<String>, buffer: Buffer, body: Stmt) -> Stmt {
    node(StmtKind::VarDef { name: name.into(), buffer, body })
}

pub fn store(var: impl Into<String>, indices: Vec<Expr>, value: Expr) -> Stmt {
    node(StmtKind::Store { var: var.into(), indices, expr: value })
}

pub fn reduce_to(var: impl Into<String>, indices: Vec<Expr>, op: ReduceOp, value: Expr) -> Stmt {
    node(StmtKind::ReduceTo { var: var.into(), indices, op, expr: value })
}

/// `for iter in begin..end` with unit step.
pub fn for_range(iter: impl Into<String>, begin: Expr, end: Expr, body: Stmt) -> Stmt {
    let len = expr::sub_folded(end.clone(), begin.clone());
    for_loop(iter, begin, end, expr::int(1), len, ForProperty::default(), body)
}

pub fn for_loop(
    iter: impl Into<String>,
    begin: Expr,
    end: Expr,
    step: Expr,
    len: Expr,
    property: ForProperty,
    body: Stmt,
) -> Stmt {
    node(StmtKind::For { iter: iter.into(), begin, end, step, len, property, body })
}

pub fn if_then(cond: Expr, then_case: Stmt) -> Stmt {
    node(StmtKind::If { cond, then_case, else_case: None })
}

pub fn if_else(cond: Expr, then_case: Stmt, else_case: Stmt) -> Stmt {
    node(StmtKind::If { cond, then_case, else_case: Some(else_case) })
}

pub fn assert_stmt(cond: Expr, body: Stmt) -> Stmt {
    node(StmtKind::Assert { cond, body })
}

pub fn eval(value: Expr) -> Stmt {
    node(StmtKind::Eval { expr: value })
}
