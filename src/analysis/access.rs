//! Collection of memory accesses with their iteration context.

use crate::ast::{Expr, ExprKind, ReduceOp, Stmt, StmtKind, ID};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Kind of a memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessKind {
    Read,
    Write,
    /// Read-modify-write by a `ReduceTo`
    Reduce(ReduceOp),
}

impl AccessKind {
    pub fn is_write(self) -> bool {
        !matches!(self, AccessKind::Read)
    }

    pub fn is_read(self) -> bool {
        !matches!(self, AccessKind::Write)
    }
}

/// An enclosing loop as seen from an access.
#[derive(Debug, Clone)]
pub struct LoopInfo {
    pub id: ID,
    pub iter: String,
    pub begin: Expr,
    pub step: Expr,
    pub len: Expr,
    pub no_deps: Vec<String>,
}

/// An enclosing branch condition.
#[derive(Debug, Clone)]
pub struct CondInfo {
    pub cond: Expr,
    /// The access is on the else side
    pub negated: bool,
    /// Number of loops enclosing the condition
    pub depth: usize,
}

/// One occurrence of a read or write.
#[derive(Debug, Clone)]
pub struct AccessPoint {
    /// The statement containing the access
    pub stmt: ID,
    /// The `Load` expression for reads
    pub expr: Option<ID>,
    pub var: String,
    /// The `VarDef` in scope; `None` for variables defined outside the tree
    pub def: Option<ID>,
    pub kind: AccessKind,
    pub indices: Vec<Expr>,
    /// Shape of the variable, when its definition is known
    pub shape: Vec<Expr>,
    /// Enclosing loops, outermost first
    pub loops: Vec<LoopInfo>,
    /// Enclosing conditions, outermost first
    pub conds: Vec<CondInfo>,
    /// Number of loops enclosing the `VarDef`
    pub def_depth: usize,
    /// Textual position; a statement's reads come before its write
    pub pos: usize,
}

impl AccessPoint {
    pub fn is_write(&self) -> bool {
        self.kind.is_write()
    }

    pub fn loop_ids(&self) -> impl Iterator<Item = ID> + '_ {
        self.loops.iter().map(|l| l.id)
    }

    /// Number of leading loops shared with `other`.
    pub fn common_depth(&self, other: &AccessPoint) -> usize {
        self.loops.iter().zip(&other.loops).take_while(|(a, b)| a.id == b.id).count()
    }
}

impl fmt::Display for AccessPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.kind {
            AccessKind::Read => "read",
            AccessKind::Write => "write",
            AccessKind::Reduce(_) => "reduce",
        };
        let idx: String = self.indices.iter().map(|i| format!("[{}]", i)).collect();
        write!(f, "{} {}{} in {}", what, self.var, idx, self.stmt)
    }
}

#[derive(Default)]
struct Collector {
    loops: Vec<LoopInfo>,
    conds: Vec<CondInfo>,
    defs: HashMap<String, Vec<(ID, Vec<Expr>, usize)>>,
    out: Vec<Rc<AccessPoint>>,
    pos: usize,
}

impl Collector {
    fn push(&mut self, stmt: ID, expr: Option<ID>, var: &str, kind: AccessKind, indices: &[Expr]) {
        let (def, shape, def_depth) = match self.defs.get(var).and_then(|d| d.last()) {
            Some((id, shape, depth)) => (Some(*id), shape.clone(), *depth),
            None => (None, Vec::new(), 0),
        };
        self.out.push(Rc::new(AccessPoint {
            stmt,
            expr,
            var: var.to_string(),
            def,
            kind,
            indices: indices.to_vec(),
            shape,
            loops: self.loops.clone(),
            conds: self.conds.clone(),
            def_depth,
            pos: self.pos,
        }));
        self.pos += 1;
    }

    fn reads(&mut self, stmt: ID, e: &Expr) {
        for c in e.children() {
            self.reads(stmt, c);
        }
        if let ExprKind::Load { var, indices } = &e.kind {
            self.push(stmt, Some(e.id), var, AccessKind::Read, indices);
        }
    }

    fn stmt(&mut self, s: &Stmt) {
        match &s.kind {
            StmtKind::StmtSeq { stmts } => {
                for c in stmts {
                    self.stmt(c);
                }
            }
            StmtKind::VarDef { name, buffer, body } => {
                for e in &buffer.shape {
                    self.reads(s.id, e);
                }
                let depth = self.loops.len();
                self.defs.entry(name.clone()).or_default().push((s.id, buffer.shape.clone(), depth));
                self.stmt(body);
                if let Some(d) = self.defs.get_mut(name) {
                    d.pop();
                }
            }
            StmtKind::Store { var, indices, expr } => {
                for e in indices.iter().chain(std::iter::once(expr)) {
                    self.reads(s.id, e);
                }
                self.push(s.id, None, var, AccessKind::Write, indices);
            }
            StmtKind::ReduceTo { var, indices, op, expr } => {
                for e in indices.iter().chain(std::iter::once(expr)) {
                    self.reads(s.id, e);
                }
                self.push(s.id, None, var, AccessKind::Reduce(*op), indices);
            }
            StmtKind::For { iter, begin, end, step, len, property, body } => {
                for e in [begin, end, step, len] {
                    self.reads(s.id, e);
                }
                self.loops.push(LoopInfo {
                    id: s.id,
                    iter: iter.clone(),
                    begin: begin.clone(),
                    step: step.clone(),
                    len: len.clone(),
                    no_deps: property.no_deps.clone(),
                });
                self.stmt(body);
                self.loops.pop();
            }
            StmtKind::If { cond, then_case, else_case } => {
                self.reads(s.id, cond);
                let depth = self.loops.len();
                self.conds.push(CondInfo { cond: cond.clone(), negated: false, depth });
                self.stmt(then_case);
                self.conds.pop();
                if let Some(e) = else_case {
                    self.conds.push(CondInfo { cond: cond.clone(), negated: true, depth });
                    self.stmt(e);
                    self.conds.pop();
                }
            }
            StmtKind::Assert { cond, body } => {
                self.reads(s.id, cond);
                let depth = self.loops.len();
                self.conds.push(CondInfo { cond: cond.clone(), negated: false, depth });
                self.stmt(body);
                self.conds.pop();
            }
            StmtKind::Eval { expr } => self.reads(s.id, expr),
        }
    }
}

/// Every access in the tree, in textual order.
pub fn collect_accesses(root: &Stmt) -> Vec<Rc<AccessPoint>> {
    let mut c = Collector::default();
    c.stmt(root);
    c.out
}
