//! Hoisting variable scopes over statement sequences.
//!
//! `seq [s0, VarDef x { seq [s1, s2] }]` becomes
//! `VarDef x { seq [s0, s1, s2] }`, so that statements from different
//! scopes end up as siblings. `sink_var` undoes it.

use crate::ast::visit::{all_accessed, all_stmts, rebuild_expr, rebuild_stmt, Mutator};
use crate::ast::{Expr, ExprKind, Stmt, StmtKind, ID};
use log::trace;
use std::collections::HashSet;

/// Renames accesses of one variable, stopping at a shadowing definition.
pub(crate) struct RenameVar<'a> {
    pub from: &'a str,
    pub to: &'a str,
}

impl Mutator for RenameVar<'_> {
    fn mutate_stmt(&mut self, s: &Stmt) -> Stmt {
        match &s.kind {
            StmtKind::VarDef { name, .. } if name == self.from => s.clone(),
            StmtKind::Store { var, indices, expr } if var == self.from => s.with_kind(StmtKind::Store {
                var: self.to.to_string(),
                indices: indices.iter().map(|e| self.mutate_expr(e)).collect(),
                expr: self.mutate_expr(expr),
            }),
            StmtKind::ReduceTo { var, indices, op, expr } if var == self.from => s.with_kind(StmtKind::ReduceTo {
                var: self.to.to_string(),
                indices: indices.iter().map(|e| self.mutate_expr(e)).collect(),
                op: *op,
                expr: self.mutate_expr(expr),
            }),
            _ => rebuild_stmt(self, s),
        }
    }

    fn mutate_expr(&mut self, e: &Expr) -> Expr {
        let e = rebuild_expr(self, e);
        match &e.kind {
            ExprKind::Load { var, indices } if var == self.from => {
                e.with_kind(ExprKind::Load { var: self.to.to_string(), indices: indices.clone() })
            }
            _ => e,
        }
    }
}

/// Every variable name defined or accessed in the tree.
pub(crate) fn buffer_names(root: &Stmt) -> HashSet<String> {
    let mut names = all_accessed(root);
    for s in all_stmts(root) {
        if let StmtKind::VarDef { name, .. } = &s.kind {
            names.insert(name.clone());
        }
    }
    names
}

/// A name based on `base` not in `taken`, which is then updated.
pub(crate) fn fresh_name(base: &str, taken: &mut HashSet<String>) -> String {
    let mut n = 1;
    loop {
        let candidate = format!("{}_{}", base, n);
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

struct HoistVarOverStmtSeq<'a> {
    together: Option<&'a [ID]>,
    taken: HashSet<String>,
    changed: bool,
}

impl HoistVarOverStmtSeq<'_> {
    fn should_hoist(&self, stmts: &[Stmt], k: usize) -> bool {
        let Some(ids) = self.together else { return true };
        let contains = |s: &Stmt| all_stmts(s).iter().any(|x| ids.contains(&x.id));
        !ids.contains(&stmts[k].id)
            && contains(&stmts[k])
            && stmts.iter().enumerate().any(|(j, o)| j != k && contains(o))
    }
}

impl Mutator for HoistVarOverStmtSeq<'_> {
    fn mutate_stmt(&mut self, s: &Stmt) -> Stmt {
        let s = rebuild_stmt(self, s);
        let StmtKind::StmtSeq { stmts } = &s.kind else { return s };
        for (k, c) in stmts.iter().enumerate() {
            let StmtKind::VarDef { name, buffer, body } = &c.kind else { continue };
            if !self.should_hoist(stmts, k) {
                continue;
            }
            let clash = stmts.iter().enumerate().any(|(j, o)| j != k && all_accessed(o).contains(name));
            let (name, body) = if clash {
                let to = fresh_name(name, &mut self.taken);
                trace!("renaming {} to {} while hoisting {}", name, to, c.id);
                let body = RenameVar { from: name, to: &to }.mutate_stmt(body);
                (to, body)
            } else {
                (name.clone(), body.clone())
            };
            let mut merged: Vec<Stmt> = stmts[..k].to_vec();
            match &body.kind {
                StmtKind::StmtSeq { stmts: inner } => merged.extend(inner.iter().cloned()),
                _ => merged.push(body.clone()),
            }
            merged.extend(stmts[k + 1..].iter().cloned());
            self.changed = true;
            let seq = s.with_kind(StmtKind::StmtSeq { stmts: merged });
            return c.with_kind(StmtKind::VarDef { name, buffer: buffer.clone(), body: seq });
        }
        s
    }

    fn mutate_expr(&mut self, e: &Expr) -> Expr {
        e.clone()
    }
}

/// Hoist `VarDef`s out of the statement sequences containing them.
///
/// With `together`, only the definitions separating those statements from
/// each other are hoisted; other scopes stay where they are. A hoisted
/// variable whose name is used by a sibling is renamed.
pub fn hoist_var_over_stmt_seq(ast: &Stmt, together: Option<&[ID]>) -> Stmt {
    let mut m = HoistVarOverStmtSeq { together, taken: buffer_names(ast), changed: false };
    let mut ast = ast.clone();
    loop {
        m.changed = false;
        ast = m.mutate_stmt(&ast);
        if !m.changed {
            return ast;
        }
    }
}
