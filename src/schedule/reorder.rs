//! Loop interchange.
//!
//! The listed loops must form a chain in the nest, with nothing but
//! statement sequences between them. Statements beside an inner loop are
//! kept where they ran by guarding them on the first or last iteration of
//! the loop that moves out across them.

use super::{get_loop, replace, LoopParts};
use crate::analysis::lower::always_holds;
use crate::analysis::{DepDirection, FindDeps};
use crate::ast::expr::{self as ex};
use crate::ast::stmt::{if_then, seq};
use crate::ast::visit::all_names;
use crate::ast::{Stmt, StmtKind, TreeIndex, ID};
use crate::presburger::PBCtx;
use crate::utils::{ScheduleError, ScheduleResult};
use crate::ScheduleConfig;
use log::debug;
use std::collections::{HashMap, HashSet};

/// Reorder the loops in `order` so that `order[0]` becomes the outermost.
pub fn reorder(ctx: &PBCtx, ast: &Stmt, order: &[ID], config: &ScheduleConfig) -> ScheduleResult<Stmt> {
    if order.is_empty() {
        return Err(ScheduleError::malformed("reorder needs at least one loop"));
    }
    let mut seen = HashSet::new();
    if let Some(dup) = order.iter().find(|id| !seen.insert(**id)) {
        return Err(ScheduleError::malformed(format!("loop {} listed twice", dup)));
    }
    let index = TreeIndex::build(ast);
    for id in order {
        get_loop(&index, *id)?;
    }

    let mut cur = order.to_vec();
    cur.sort_by_key(|id| index.order(*id));
    for pair in cur.windows(2) {
        let (outer, inner) = (pair[0], pair[1]);
        if !index.is_ancestor(outer, inner) {
            return Err(ScheduleError::malformed(format!("loops {} and {} are not nested", outer, inner)));
        }
        for between in index.ancestors(inner).into_iter().filter(|a| *a != outer && index.is_ancestor(outer, *a)) {
            let Some(s) = index.get(between) else { continue };
            match &s.kind {
                StmtKind::StmtSeq { .. } => {}
                StmtKind::For { .. } => {
                    return Err(ScheduleError::malformed(format!(
                        "{} lies between {} and {} but is not reordered",
                        s.describe(),
                        outer,
                        inner
                    )))
                }
                _ => {
                    return Err(ScheduleError::unsupported(format!(
                        "cannot reorder across {}",
                        s.describe()
                    )))
                }
            }
        }
    }
    if cur == order {
        return Ok(ast.clone());
    }

    for p in 0..order.len() {
        let mut dir: Vec<(ID, DepDirection)> = order[..p].iter().map(|id| (*id, DepDirection::Same)).collect();
        dir.push((order[p], DepDirection::Inv));
        let found = FindDeps::new()
            .direction(dir)
            .filter_sub_ast(cur[0])
            .ignore_reduction_waw(config.ignore_reduction_waw)
            .first(ctx, ast);
        if let Some(d) = found {
            return Err(ScheduleError::dependence(format!("reorder would reverse {}", d)));
        }
    }

    let rank: HashMap<ID, usize> = order.iter().enumerate().map(|(k, id)| (*id, k)).collect();
    let mut ast = ast.clone();
    loop {
        let index = TreeIndex::build(&ast);
        let mut chain = order.to_vec();
        chain.sort_by_key(|id| index.order(*id));
        let Some(k) = chain.windows(2).position(|w| rank[&w[0]] > rank[&w[1]]) else { break };
        debug!("interchanging {} and {}", chain[k], chain[k + 1]);
        ast = swap_for(ctx, &ast, chain[k], chain[k + 1])?;
    }
    Ok(ast)
}

/// Interchange `outer` with `inner`, a loop nested in it through statement
/// sequences only. Legality is the caller's business.
pub(crate) fn swap_for(ctx: &PBCtx, ast: &Stmt, outer_id: ID, inner_id: ID) -> ScheduleResult<Stmt> {
    let index = TreeIndex::build(ast);
    let (outer_s, outer) = get_loop(&index, outer_id)?;
    let (inner_s, inner) = get_loop(&index, inner_id)?;
    if inner.header_uses(&outer.iter) {
        return Err(ScheduleError::unsupported(format!(
            "bounds of {} depend on the iterator of {}",
            inner_s.describe(),
            outer_s.describe()
        )));
    }

    let mut fragments = Vec::new();
    let body = lift(&index, &outer.body, &inner, inner_id, &mut fragments)?;
    if !fragments.is_empty() {
        if outer.property.parallel || inner.property.parallel {
            return Err(ScheduleError::unsupported("cannot guard statements around a parallel loop"));
        }
        if fragments.iter().any(|f| all_names(f).contains(&inner.iter)) {
            return Err(ScheduleError::unsupported(format!(
                "statements beside {} use the name {}",
                inner_s.describe(),
                inner.iter
            )));
        }
        if !always_holds(ctx, &ex::gt(inner.len.clone(), ex::int(0))) {
            return Err(ScheduleError::unsupported(format!(
                "{} may run no iteration; guarded statements would be lost",
                inner_s.describe()
            )));
        }
    }

    let swapped = inner.rebuild(&inner_s, outer.rebuild(&outer_s, body));
    replace(ast, outer_id, swapped)
}

/// `s` with the inner loop replaced by its body, and its siblings guarded.
fn lift(
    index: &TreeIndex,
    s: &Stmt,
    inner: &LoopParts,
    inner_id: ID,
    fragments: &mut Vec<Stmt>,
) -> ScheduleResult<Stmt> {
    if s.id == inner_id {
        return Ok(inner.body.clone());
    }
    let StmtKind::StmtSeq { stmts } = &s.kind else {
        return Err(ScheduleError::unsupported(format!("cannot reorder across {}", s.describe())));
    };
    let Some(k) = stmts.iter().position(|c| index.is_ancestor(c.id, inner_id)) else {
        return Err(ScheduleError::malformed(format!("{} is not inside {}", inner_id, s.describe())));
    };
    let guard = |at: ex::Expr, list: &[Stmt]| {
        let body = if list.len() == 1 { list[0].clone() } else { seq(list.to_vec()) };
        if_then(ex::eq(ex::var(inner.iter.clone()), at), body)
    };

    let mut out = Vec::new();
    if k > 0 {
        fragments.extend(stmts[..k].iter().cloned());
        out.push(guard(inner.begin.clone(), &stmts[..k]));
    }
    out.push(lift(index, &stmts[k], inner, inner_id, fragments)?);
    if k + 1 < stmts.len() {
        fragments.extend(stmts[k + 1..].iter().cloned());
        out.push(guard(inner.last(), &stmts[k + 1..]));
    }
    Ok(s.with_kind(StmtKind::StmtSeq { stmts: out }))
}
