//! Narrowing variable scopes to the statements that use them.

use crate::ast::stmt::seq;
use crate::ast::visit::{all_accessed, rebuild_stmt, Mutator};
use crate::ast::{AccessType, Expr, Stmt, StmtKind, ID};
use std::collections::HashSet;

struct SinkVar<'a> {
    only: Option<&'a HashSet<ID>>,
}

impl Mutator for SinkVar<'_> {
    fn mutate_stmt(&mut self, s: &Stmt) -> Stmt {
        let s = rebuild_stmt(self, s);
        let StmtKind::VarDef { name, buffer, body } = &s.kind else { return s };
        if self.only.map_or(false, |o| !o.contains(&s.id)) {
            return s;
        }
        if !all_accessed(body).contains(name) {
            // an unused local is dropped; an argument keeps its scope
            return if buffer.atype == AccessType::Cache { body.clone() } else { s };
        }
        let StmtKind::StmtSeq { stmts } = &body.kind else { return s };
        let users: Vec<usize> =
            stmts.iter().enumerate().filter(|(_, c)| all_accessed(c).contains(name)).map(|(i, _)| i).collect();
        let (first, last) = match (users.first(), users.last()) {
            (Some(&f), Some(&l)) => (f, l),
            _ => return s,
        };
        if first == 0 && last + 1 == stmts.len() {
            return s;
        }
        let inner = if first == last { stmts[first].clone() } else { seq(stmts[first..=last].to_vec()) };
        let def = s.with_kind(StmtKind::VarDef { name: name.clone(), buffer: buffer.clone(), body: inner });
        let mut out: Vec<Stmt> = stmts[..first].to_vec();
        out.push(def);
        out.extend(stmts[last + 1..].iter().cloned());
        body.with_kind(StmtKind::StmtSeq { stmts: out })
    }

    fn mutate_expr(&mut self, e: &Expr) -> Expr {
        e.clone()
    }
}

/// Shrink each `VarDef` (or only those in `only`) to the range of
/// statements of its body sequence that access the variable. Unused local
/// variables are removed.
pub fn sink_var(ast: &Stmt, only: Option<&HashSet<ID>>) -> Stmt {
    SinkVar { only }.mutate_stmt(ast)
}
