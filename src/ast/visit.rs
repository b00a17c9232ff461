//! Traversal and functional rewriting of trees.
//!
//! A [`Mutator`] rebuilds only the nodes whose children changed; untouched
//! sub-trees are shared with the input, and rebuilt nodes keep their
//! identities.

use super::expr::{Expr, ExprKind};
use super::id::ID;
use super::stmt::{Stmt, StmtKind};
use std::collections::HashSet;
use std::rc::Rc;

/// Read-only traversal, pre-order.
pub trait Visitor {
    fn visit_stmt(&mut self, s: &Stmt) {
        walk_stmt(self, s);
    }

    fn visit_expr(&mut self, e: &Expr) {
        walk_expr(self, e);
    }
}

pub fn walk_stmt<V: Visitor + ?Sized>(v: &mut V, s: &Stmt) {
    for e in s.exprs() {
        v.visit_expr(e);
    }
    for c in s.children() {
        v.visit_stmt(c);
    }
}

pub fn walk_expr<V: Visitor + ?Sized>(v: &mut V, e: &Expr) {
    for c in e.children() {
        v.visit_expr(c);
    }
}

/// Rebuilding traversal.
pub trait Mutator {
    fn mutate_stmt(&mut self, s: &Stmt) -> Stmt {
        rebuild_stmt(self, s)
    }

    fn mutate_expr(&mut self, e: &Expr) -> Expr {
        rebuild_expr(self, e)
    }
}

fn same_list<T>(a: &[Rc<T>], b: &[Rc<T>]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| Rc::ptr_eq(x, y))
}

/// Mutate the children of `e` and rebuild it if any changed.
pub fn rebuild_expr<M: Mutator + ?Sized>(m: &mut M, e: &Expr) -> Expr {
    let kind = match &e.kind {
        ExprKind::IntConst(_) | ExprKind::BoolConst(_) | ExprKind::Var(_) => return e.clone(),
        ExprKind::Load { var, indices } => {
            let new: Vec<Expr> = indices.iter().map(|i| m.mutate_expr(i)).collect();
            if same_list(&new, indices) {
                return e.clone();
            }
            ExprKind::Load { var: var.clone(), indices: new }
        }
        ExprKind::Binary { op, lhs, rhs } => {
            let (l, r) = (m.mutate_expr(lhs), m.mutate_expr(rhs));
            if Rc::ptr_eq(&l, lhs) && Rc::ptr_eq(&r, rhs) {
                return e.clone();
            }
            ExprKind::Binary { op: *op, lhs: l, rhs: r }
        }
        ExprKind::Unary { op, operand } => {
            let o = m.mutate_expr(operand);
            if Rc::ptr_eq(&o, operand) {
                return e.clone();
            }
            ExprKind::Unary { op: *op, operand: o }
        }
        ExprKind::IfExpr { cond, then_case, else_case } => {
            let (c, t, f) = (m.mutate_expr(cond), m.mutate_expr(then_case), m.mutate_expr(else_case));
            if Rc::ptr_eq(&c, cond) && Rc::ptr_eq(&t, then_case) && Rc::ptr_eq(&f, else_case) {
                return e.clone();
            }
            ExprKind::IfExpr { cond: c, then_case: t, else_case: f }
        }
    };
    e.with_kind(kind)
}

/// Mutate the children and expressions of `s` and rebuild it if any changed.
pub fn rebuild_stmt<M: Mutator + ?Sized>(m: &mut M, s: &Stmt) -> Stmt {
    let kind = match &s.kind {
        StmtKind::StmtSeq { stmts } => {
            let new: Vec<Stmt> = stmts.iter().map(|c| m.mutate_stmt(c)).collect();
            if same_list(&new, stmts) {
                return s.clone();
            }
            StmtKind::StmtSeq { stmts: new }
        }
        StmtKind::VarDef { name, buffer, body } => {
            let shape: Vec<Expr> = buffer.shape.iter().map(|e| m.mutate_expr(e)).collect();
            let b = m.mutate_stmt(body);
            if same_list(&shape, &buffer.shape) && Rc::ptr_eq(&b, body) {
                return s.clone();
            }
            let mut buffer = buffer.clone();
            buffer.shape = shape;
            StmtKind::VarDef { name: name.clone(), buffer, body: b }
        }
        StmtKind::Store { var, indices, expr } => {
            let idx: Vec<Expr> = indices.iter().map(|e| m.mutate_expr(e)).collect();
            let v = m.mutate_expr(expr);
            if same_list(&idx, indices) && Rc::ptr_eq(&v, expr) {
                return s.clone();
            }
            StmtKind::Store { var: var.clone(), indices: idx, expr: v }
        }
        StmtKind::ReduceTo { var, indices, op, expr } => {
            let idx: Vec<Expr> = indices.iter().map(|e| m.mutate_expr(e)).collect();
            let v = m.mutate_expr(expr);
            if same_list(&idx, indices) && Rc::ptr_eq(&v, expr) {
                return s.clone();
            }
            StmtKind::ReduceTo { var: var.clone(), indices: idx, op: *op, expr: v }
        }
        StmtKind::For { iter, begin, end, step, len, property, body } => {
            let hdr = [begin, end, step, len].map(|e| m.mutate_expr(e));
            let b = m.mutate_stmt(body);
            let unchanged = hdr.iter().zip([begin, end, step, len]).all(|(x, y)| Rc::ptr_eq(x, y));
            if unchanged && Rc::ptr_eq(&b, body) {
                return s.clone();
            }
            let [begin, end, step, len] = hdr;
            StmtKind::For { iter: iter.clone(), begin, end, step, len, property: property.clone(), body: b }
        }
        StmtKind::If { cond, then_case, else_case } => {
            let c = m.mutate_expr(cond);
            let t = m.mutate_stmt(then_case);
            let e = else_case.as_ref().map(|e| m.mutate_stmt(e));
            let same_else = match (&e, else_case) {
                (Some(a), Some(b)) => Rc::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            };
            if Rc::ptr_eq(&c, cond) && Rc::ptr_eq(&t, then_case) && same_else {
                return s.clone();
            }
            StmtKind::If { cond: c, then_case: t, else_case: e }
        }
        StmtKind::Assert { cond, body } => {
            let c = m.mutate_expr(cond);
            let b = m.mutate_stmt(body);
            if Rc::ptr_eq(&c, cond) && Rc::ptr_eq(&b, body) {
                return s.clone();
            }
            StmtKind::Assert { cond: c, body: b }
        }
        StmtKind::Eval { expr } => {
            let v = m.mutate_expr(expr);
            if Rc::ptr_eq(&v, expr) {
                return s.clone();
            }
            StmtKind::Eval { expr: v }
        }
    };
    s.with_kind(kind)
}

struct ReplaceStmt<'a> {
    target: ID,
    with: &'a dyn Fn(&Stmt) -> Stmt,
    found: bool,
}

impl Mutator for ReplaceStmt<'_> {
    fn mutate_stmt(&mut self, s: &Stmt) -> Stmt {
        if s.id == self.target {
            self.found = true;
            return (self.with)(s);
        }
        rebuild_stmt(self, s)
    }

    fn mutate_expr(&mut self, e: &Expr) -> Expr {
        e.clone()
    }
}

/// Replace the statement with identity `target` by `with(old)`. Returns
/// `None` when no such statement exists.
pub fn replace_stmt(root: &Stmt, target: ID, with: &dyn Fn(&Stmt) -> Stmt) -> Option<Stmt> {
    let mut m = ReplaceStmt { target, with, found: false };
    let out = m.mutate_stmt(root);
    m.found.then_some(out)
}

struct SubstituteVar<'a> {
    name: &'a str,
    value: &'a Expr,
}

impl Mutator for SubstituteVar<'_> {
    fn mutate_stmt(&mut self, s: &Stmt) -> Stmt {
        if let StmtKind::For { iter, begin, end, step, len, property, body } = &s.kind {
            if iter == self.name {
                // shadowed below this loop; only the header sees the outer name
                let hdr = [begin, end, step, len].map(|e| self.mutate_expr(e));
                let [begin, end, step, len] = hdr;
                return s.with_kind(StmtKind::For {
                    iter: iter.clone(),
                    begin,
                    end,
                    step,
                    len,
                    property: property.clone(),
                    body: body.clone(),
                });
            }
        }
        rebuild_stmt(self, s)
    }

    fn mutate_expr(&mut self, e: &Expr) -> Expr {
        super::expr::substitute(e, self.name, self.value)
    }
}

/// Replace every free `Var(name)` in a statement by `value`.
pub fn substitute_in_stmt(s: &Stmt, name: &str, value: &Expr) -> Stmt {
    SubstituteVar { name, value }.mutate_stmt(s)
}

#[derive(Default)]
struct AccessCollector {
    reads: HashSet<String>,
    writes: HashSet<String>,
}

impl Visitor for AccessCollector {
    fn visit_stmt(&mut self, s: &Stmt) {
        match &s.kind {
            StmtKind::Store { var, .. } | StmtKind::ReduceTo { var, .. } => {
                self.writes.insert(var.clone());
            }
            _ => {}
        }
        if let StmtKind::ReduceTo { var, .. } = &s.kind {
            self.reads.insert(var.clone());
        }
        walk_stmt(self, s);
    }

    fn visit_expr(&mut self, e: &Expr) {
        if let ExprKind::Load { var, .. } = &e.kind {
            self.reads.insert(var.clone());
        }
        walk_expr(self, e);
    }
}

/// Variables read in a statement (loads and reductions).
pub fn all_reads(s: &Stmt) -> HashSet<String> {
    let mut c = AccessCollector::default();
    c.visit_stmt(s);
    c.reads
}

/// Variables written in a statement (stores and reductions).
pub fn all_writes(s: &Stmt) -> HashSet<String> {
    let mut c = AccessCollector::default();
    c.visit_stmt(s);
    c.writes
}

/// Variables accessed in any way.
pub fn all_accessed(s: &Stmt) -> HashSet<String> {
    let mut c = AccessCollector::default();
    c.visit_stmt(s);
    c.reads.extend(c.writes);
    c.reads
}

/// Names read through `Var` in a statement, including loop headers.
pub fn all_names(s: &Stmt) -> HashSet<String> {
    struct Names(HashSet<String>);
    impl Visitor for Names {
        fn visit_expr(&mut self, e: &Expr) {
            if let ExprKind::Var(n) = &e.kind {
                self.0.insert(n.clone());
            }
            walk_expr(self, e);
        }
    }
    let mut v = Names(HashSet::new());
    v.visit_stmt(s);
    v.0
}

/// Every statement of the tree, pre-order.
pub fn all_stmts(s: &Stmt) -> Vec<Stmt> {
    struct Collect(Vec<Stmt>);
    impl Visitor for Collect {
        fn visit_stmt(&mut self, s: &Stmt) {
            self.0.push(s.clone());
            walk_stmt(self, s);
        }
        fn visit_expr(&mut self, _: &Expr) {}
    }
    let mut c = Collect(Vec::new());
    c.visit_stmt(s);
    c.0
}
