//! Flattening nested statement sequences.

use crate::ast::visit::{rebuild_stmt, Mutator};
use crate::ast::{Expr, Stmt, StmtKind};

struct FlattenStmtSeq;

impl Mutator for FlattenStmtSeq {
    fn mutate_stmt(&mut self, s: &Stmt) -> Stmt {
        let s = rebuild_stmt(self, s);
        let StmtKind::StmtSeq { stmts } = &s.kind else { return s };
        if !stmts.iter().any(|c| matches!(c.kind, StmtKind::StmtSeq { .. })) {
            return s;
        }
        let mut out = Vec::with_capacity(stmts.len());
        for c in stmts {
            match &c.kind {
                StmtKind::StmtSeq { stmts: inner } => out.extend(inner.iter().cloned()),
                _ => out.push(c.clone()),
            }
        }
        s.with_kind(StmtKind::StmtSeq { stmts: out })
    }

    fn mutate_expr(&mut self, e: &Expr) -> Expr {
        e.clone()
    }
}

/// Splice sequences nested directly in sequences into their parent.
pub fn flatten_stmt_seq(ast: &Stmt) -> Stmt {
    FlattenStmtSeq.mutate_stmt(ast)
}
