//! Whether values change across iterations of their enclosing loops.
//!
//! Facts live on the lattice `Invariant > Unknown > Variant`. Everything
//! starts at `Unknown`; an expression meets its operands, a variable meets
//! every value, index and condition stored under. Passes repeat until the
//! number of `Unknown` facts stops shrinking.

use crate::ast::{Expr, ExprKind, Stmt, StmtKind, ID};
use log::trace;
use std::collections::HashMap;

/// One loop-variance fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Variance {
    Invariant,
    Unknown,
    Variant,
}

impl Variance {
    pub fn meet(self, other: Variance) -> Variance {
        self.max(other)
    }
}

/// Absent entries are `Invariant`.
type Facts = HashMap<ID, HashMap<ID, Variance>>;

/// Result of [`find_loop_variance`].
#[derive(Debug, Clone, Default)]
pub struct LoopVariance {
    exprs: Facts,
    vars: Facts,
}

impl LoopVariance {
    /// Whether expression `expr` may change across iterations of `loop_id`.
    /// An undecided fact counts as variant.
    pub fn is_expr_variant(&self, expr: ID, loop_id: ID) -> bool {
        lookup(&self.exprs, expr, loop_id) != Variance::Invariant
    }

    /// Whether the variable defined by `def` may hold different values
    /// across iterations of `loop_id`.
    pub fn is_var_variant(&self, def: ID, loop_id: ID) -> bool {
        lookup(&self.vars, def, loop_id) != Variance::Invariant
    }

    pub fn expr_variance(&self, expr: ID, loop_id: ID) -> Variance {
        lookup(&self.exprs, expr, loop_id)
    }

    pub fn var_variance(&self, def: ID, loop_id: ID) -> Variance {
        lookup(&self.vars, def, loop_id)
    }
}

fn lookup(facts: &Facts, key: ID, loop_id: ID) -> Variance {
    facts.get(&key).and_then(|m| m.get(&loop_id)).copied().unwrap_or(Variance::Invariant)
}

/// `to = from`
fn copy_info(from_facts: &Facts, from: ID, to_facts: &mut Facts, to: ID) {
    match from_facts.get(&from) {
        Some(m) => {
            to_facts.insert(to, m.clone());
        }
        None => {
            to_facts.remove(&to);
        }
    }
}

/// `to = from meet to`
fn meet_to(from_facts: &Facts, from: ID, to_facts: &mut Facts, to: ID) {
    let Some(from_map) = from_facts.get(&from) else { return };
    let from_map = from_map.clone();
    let to_map = to_facts.entry(to).or_default();
    for (l, v) in from_map {
        let cur = to_map.get(&l).copied().unwrap_or(Variance::Invariant);
        to_map.insert(l, cur.meet(v));
    }
}

fn init_exprs(s: &Stmt, loops: &mut Vec<ID>, facts: &mut Facts) {
    fn expr(e: &Expr, loops: &[ID], facts: &mut Facts) {
        for c in e.children() {
            expr(c, loops, facts);
        }
        if !loops.is_empty() {
            facts.insert(e.id, loops.iter().map(|l| (*l, Variance::Unknown)).collect());
        }
    }
    for e in s.exprs() {
        expr(e, loops, facts);
    }
    if s.is_for() {
        loops.push(s.id);
    }
    for c in s.children() {
        init_exprs(c, loops, facts);
    }
    if s.is_for() {
        loops.pop();
    }
}

struct Solver {
    loop_stack: Vec<ID>,
    cond_stack: Vec<Expr>,
    iters: HashMap<String, Vec<ID>>,
    /// Per variable name, for the definition currently in scope
    var_info: Facts,
    var_ids: HashMap<String, Vec<ID>>,
    uniq_var_info: Facts,
    expr_info: Facts,
}

impl Solver {
    fn unknown_count(&self) -> usize {
        self.expr_info.values().flat_map(|m| m.values()).filter(|v| **v == Variance::Unknown).count()
    }

    fn var_key(&self, name: &str) -> Option<ID> {
        self.var_ids.get(name).and_then(|v| v.last()).copied()
    }

    fn expr(&mut self, e: &Expr) {
        for c in e.children() {
            self.expr(c);
        }
        match &e.kind {
            ExprKind::IntConst(_) | ExprKind::BoolConst(_) => {
                self.expr_info.remove(&e.id);
            }
            ExprKind::Var(n) => {
                self.expr_info.remove(&e.id);
                if let Some(l) = self.iters.get(n).and_then(|v| v.last()) {
                    self.expr_info.entry(e.id).or_default().insert(*l, Variance::Variant);
                }
            }
            ExprKind::Load { var, indices } => {
                match self.var_key(var) {
                    Some(key) => {
                        let info = self.var_info.get(&key).cloned();
                        match info {
                            Some(mut m) => {
                                // facts about loops not around this load do not apply
                                m.retain(|l, _| self.loop_stack.contains(l));
                                self.expr_info.insert(e.id, m);
                            }
                            None => {
                                self.expr_info.remove(&e.id);
                            }
                        }
                    }
                    // defined outside the tree: an input, never written inside
                    None => {
                        self.expr_info.remove(&e.id);
                    }
                }
                for i in indices {
                    meet_to(&self.expr_info.clone(), i.id, &mut self.expr_info, e.id);
                }
            }
            ExprKind::Binary { lhs, rhs, .. } => {
                let snapshot = self.expr_info.clone();
                copy_info(&snapshot, lhs.id, &mut self.expr_info, e.id);
                meet_to(&snapshot, rhs.id, &mut self.expr_info, e.id);
            }
            ExprKind::Unary { operand, .. } => {
                let snapshot = self.expr_info.clone();
                copy_info(&snapshot, operand.id, &mut self.expr_info, e.id);
            }
            ExprKind::IfExpr { cond, then_case, else_case } => {
                let snapshot = self.expr_info.clone();
                copy_info(&snapshot, cond.id, &mut self.expr_info, e.id);
                meet_to(&snapshot, then_case.id, &mut self.expr_info, e.id);
                meet_to(&snapshot, else_case.id, &mut self.expr_info, e.id);
            }
        }
    }

    /// Variance of `name` from every write to it inside `s`.
    fn mark_stores(&mut self, name: &str, key: ID, s: &Stmt, conds: &mut Vec<Expr>) {
        match &s.kind {
            StmtKind::Store { var, indices, expr } | StmtKind::ReduceTo { var, indices, expr, .. } if var == name => {
                let mut from: Vec<ID> = vec![expr.id];
                from.extend(indices.iter().map(|i| i.id));
                from.extend(conds.iter().map(|c| c.id));
                for f in from {
                    let snapshot = &self.expr_info;
                    meet_to(snapshot, f, &mut self.var_info, key);
                }
            }
            StmtKind::For { len, body, .. } => {
                // a trip count that changes may make a reduction variant
                conds.push(len.clone());
                self.mark_stores(name, key, body, conds);
                conds.pop();
            }
            StmtKind::If { cond, then_case, else_case } => {
                conds.push(cond.clone());
                self.mark_stores(name, key, then_case, conds);
                if let Some(e) = else_case {
                    self.mark_stores(name, key, e, conds);
                }
                conds.pop();
            }
            StmtKind::VarDef { name: n, .. } if n == name => {}
            _ => {
                for c in s.children() {
                    self.mark_stores(name, key, c, conds);
                }
            }
        }
    }

    fn stmt(&mut self, s: &Stmt) {
        match &s.kind {
            StmtKind::For { iter, begin, end, step, len, body, .. } => {
                for e in [begin, end, step, len] {
                    self.expr(e);
                }
                self.loop_stack.push(s.id);
                self.cond_stack.push(len.clone());
                self.iters.entry(iter.clone()).or_default().push(s.id);
                self.stmt(body);
                if let Some(v) = self.iters.get_mut(iter) {
                    v.pop();
                }
                self.cond_stack.pop();
                self.loop_stack.pop();
            }
            StmtKind::If { cond, then_case, else_case } => {
                self.expr(cond);
                self.cond_stack.push(cond.clone());
                self.stmt(then_case);
                if let Some(e) = else_case {
                    self.stmt(e);
                }
                self.cond_stack.pop();
            }
            StmtKind::VarDef { name, buffer, body } => {
                for e in &buffer.shape {
                    self.expr(e);
                }
                self.var_ids.entry(name.clone()).or_default().push(s.id);
                self.var_info.remove(&s.id);
                let mut conds = self.cond_stack.clone();
                self.mark_stores(name, s.id, body, &mut conds);
                self.stmt(body);
                copy_info(&self.var_info.clone(), s.id, &mut self.uniq_var_info, s.id);
                if let Some(v) = self.var_ids.get_mut(name) {
                    v.pop();
                }
            }
            _ => {
                for e in s.exprs() {
                    self.expr(e);
                }
                for c in s.children() {
                    self.stmt(c);
                }
            }
        }
    }
}

/// Loop variance of every expression and every `VarDef` of the tree.
///
/// # Panics
///
/// Panics if the number of undecided facts grows between two passes, which
/// would mean the update is not monotone.
pub fn find_loop_variance(root: &Stmt) -> LoopVariance {
    let mut expr_info = Facts::new();
    init_exprs(root, &mut Vec::new(), &mut expr_info);
    let mut solver = Solver {
        loop_stack: Vec::new(),
        cond_stack: Vec::new(),
        iters: HashMap::new(),
        var_info: Facts::new(),
        var_ids: HashMap::new(),
        uniq_var_info: Facts::new(),
        expr_info,
    };
    let mut last = usize::MAX;
    let mut rounds = 0;
    loop {
        solver.stmt(root);
        rounds += 1;
        let cnt = solver.unknown_count();
        assert!(cnt <= last, "loop variance is not monotone: {} unknown facts after {}", cnt, last);
        if cnt == 0 || cnt == last {
            trace!("loop variance converged after {} rounds, {} unknown", rounds, cnt);
            break;
        }
        last = cnt;
    }
    LoopVariance { exprs: solver.expr_info, vars: solver.uniq_var_info }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::expr::{add, int, load, mul, var};
    use crate::ast::stmt::{for_range, seq, store, var_def};
    use crate::ast::{AccessType, Buffer, DataType};

    fn scalar() -> Buffer {
        Buffer::new(vec![], DataType::Int32, AccessType::Cache)
    }

    #[test]
    fn test_iterators_and_constants() {
        let v = mul(var("i"), int(2));
        let c = add(var("N"), int(1));
        let s = for_range("i", int(0), int(4), seq(vec![store("a", vec![v.clone()], c.clone())]));
        let lv = find_loop_variance(&s);
        assert!(lv.is_expr_variant(v.id, s.id));
        assert!(!lv.is_expr_variant(c.id, s.id));
    }

    #[test]
    fn test_variable_through_stores() {
        // t = N * 2 is invariant in i; u = i is variant; w = u is variant too
        let inner = seq(vec![
            store("t", vec![], mul(var("N"), int(2))),
            store("u", vec![], var("i")),
            store("w", vec![], load("u", vec![])),
        ]);
        let l = for_range("i", int(0), int(4), inner);
        let w = var_def("w", scalar(), l.clone());
        let u = var_def("u", scalar(), w.clone());
        let t = var_def("t", scalar(), u.clone());
        let lv = find_loop_variance(&t);
        assert!(!lv.is_var_variant(t.id, l.id));
        assert!(lv.is_var_variant(u.id, l.id));
        assert!(lv.is_var_variant(w.id, l.id));
        assert_eq!(lv.var_variance(t.id, l.id), Variance::Invariant);
    }

    #[test]
    fn test_self_dependence_stays_conservative() {
        // x = x + 1 never resolves to invariant
        let l = for_range("i", int(0), int(4), store("x", vec![], add(load("x", vec![]), int(1))));
        let root = var_def("x", scalar(), l.clone());
        let lv = find_loop_variance(&root);
        assert!(lv.is_var_variant(root.id, l.id));
    }

    #[test]
    fn test_lattice_meet() {
        assert_eq!(Variance::Invariant.meet(Variance::Unknown), Variance::Unknown);
        assert_eq!(Variance::Unknown.meet(Variance::Variant), Variance::Variant);
        assert_eq!(Variance::Invariant.meet(Variance::Invariant), Variance::Invariant);
    }
}
