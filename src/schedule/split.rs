//! Loop tiling.

use super::{get_loop, replace};
use crate::analysis::lower::always_holds;
use crate::ast::expr::{self as ex, Expr};
use crate::ast::stmt::{for_loop, if_then};
use crate::ast::visit::{all_names, all_stmts, substitute_in_stmt};
use crate::ast::{Stmt, StmtKind, StmtNode, TreeIndex, ID};
use crate::pass::hoist_var::{buffer_names, fresh_name};
use crate::presburger::PBCtx;
use crate::utils::{ScheduleError, ScheduleResult};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::rc::Rc;

/// How to cut a loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitBy {
    /// Inner loop of this many iterations
    Factor(i64),
    /// Outer loop of this many iterations
    NParts(i64),
}

/// Every name a new iterator must not shadow or capture.
pub(crate) fn taken_names(ast: &Stmt) -> HashSet<String> {
    let mut taken = all_names(ast);
    taken.extend(buffer_names(ast));
    for s in all_stmts(ast) {
        if let StmtKind::For { iter, .. } = &s.kind {
            taken.insert(iter.clone());
        }
    }
    taken
}

pub(crate) fn unique_name(base: String, taken: &mut HashSet<String>) -> String {
    if taken.insert(base.clone()) {
        base
    } else {
        fresh_name(&base, taken)
    }
}

fn ceil_div_folded(len: &Expr, n: i64) -> Expr {
    match len.as_int() {
        Some(v) => ex::int(-((-v).div_euclid(n))),
        None if n == 1 => len.clone(),
        None => ex::ceil_div(len.clone(), ex::int(n)),
    }
}

/// Split `loop_id` into an outer and an inner loop. Iterations run in the
/// same order, so no dependence can break; a guard skips the overhang when
/// the trip count is not provably a multiple of the cut.
pub fn split(ctx: &PBCtx, ast: &Stmt, loop_id: ID, by: SplitBy) -> ScheduleResult<(Stmt, ID, ID)> {
    let index = TreeIndex::build(ast);
    let (s, l) = get_loop(&index, loop_id)?;
    let (n, inner_len, outer_len) = match by {
        SplitBy::Factor(f) if f > 0 => (f, ex::int(f), ceil_div_folded(&l.len, f)),
        SplitBy::NParts(p) if p > 0 => (p, ceil_div_folded(&l.len, p), ex::int(p)),
        _ => return Err(ScheduleError::malformed(format!("cannot split {} by {:?}", s.describe(), by))),
    };
    let exact = always_holds(ctx, &ex::eq(ex::modulo(l.len.clone(), ex::int(n)), ex::int(0)));

    let mut taken = taken_names(ast);
    let outer_iter = unique_name(format!("{}_o", l.iter), &mut taken);
    let inner_iter = unique_name(format!("{}_i", l.iter), &mut taken);
    let k = ex::add_folded(ex::mul_folded(ex::var(outer_iter.clone()), inner_len.clone()), ex::var(inner_iter.clone()));
    let mut body = substitute_in_stmt(&l.body, &l.iter, &l.value_at(k.clone()));
    if !exact {
        body = if_then(ex::lt(k, l.len.clone()), body);
    }

    let inner = for_loop(inner_iter, ex::int(0), inner_len.clone(), ex::int(1), inner_len, l.property.clone(), body);
    let outer = Rc::new(StmtNode {
        id: ID::new(),
        label: s.label.clone(),
        kind: StmtKind::For {
            iter: outer_iter,
            begin: ex::int(0),
            end: outer_len.clone(),
            step: ex::int(1),
            len: outer_len,
            property: l.property.clone(),
            body: inner.clone(),
        },
    });
    debug!("split {} into {} and {}", loop_id, outer.id, inner.id);
    Ok((replace(ast, loop_id, outer.clone())?, outer.id, inner.id))
}
