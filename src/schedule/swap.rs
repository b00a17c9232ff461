//! Reordering statements of one sequence.

use super::{get_stmt, moved_defs, replace};
use crate::analysis::FindDeps;
use crate::ast::{Stmt, StmtKind, TreeIndex, ID};
use crate::pass::{hoist_var_over_stmt_seq, sink_var};
use crate::presburger::PBCtx;
use crate::utils::{ScheduleError, ScheduleResult};
use crate::ScheduleConfig;
use std::collections::{HashMap, HashSet};

/// Put the consecutive sibling statements `order` in that order.
///
/// Variable scopes separating them are hoisted first and sunk back
/// afterwards. Every pair of accesses from two different statements whose
/// relative order changes must be independent within one iteration of the
/// enclosing loops.
pub fn swap(ctx: &PBCtx, ast: &Stmt, order: &[ID], config: &ScheduleConfig) -> ScheduleResult<Stmt> {
    if order.is_empty() {
        return Err(ScheduleError::malformed("swap needs at least one statement"));
    }
    let mut seen = HashSet::new();
    if let Some(dup) = order.iter().find(|id| !seen.insert(**id)) {
        return Err(ScheduleError::malformed(format!("statement {} listed twice", dup)));
    }
    let before = TreeIndex::build(ast);
    for id in order {
        get_stmt(&before, *id)?;
    }

    let hoisted = hoist_var_over_stmt_seq(ast, Some(order));
    let index = TreeIndex::build(&hoisted);
    let parent_id = index.parent(order[0]);
    if order.iter().any(|id| index.parent(*id) != parent_id) {
        return Err(ScheduleError::malformed("swapped statements must share a parent"));
    }
    let parent = parent_id
        .and_then(|p| index.get(p))
        .ok_or_else(|| ScheduleError::malformed("the root cannot be swapped"))?;
    let StmtKind::StmtSeq { stmts } = &parent.kind else {
        return Err(ScheduleError::malformed(format!("{} is not a sequence", parent.describe())));
    };

    let pos: Vec<usize> =
        order.iter().filter_map(|id| stmts.iter().position(|s| s.id == *id)).collect();
    let (Some(&start), Some(&end)) = (pos.iter().min(), pos.iter().max()) else {
        return Err(ScheduleError::malformed("swapped statements not found in their parent"));
    };
    if end - start + 1 != order.len() {
        return Err(ScheduleError::malformed("swapped statements are not consecutive"));
    }
    if pos.windows(2).all(|w| w[0] < w[1]) {
        return Ok(ast.clone());
    }

    let rank: HashMap<ID, usize> = order.iter().enumerate().map(|(k, id)| (*id, k)).collect();
    let owner = |s: ID| order.iter().copied().find(|o| index.is_ancestor(*o, s));
    let found = FindDeps::new()
        .filter_sub_ast(parent.id)
        .ignore_reduction_waw(config.ignore_reduction_waw)
        .filter(|later, earlier| match (owner(later.stmt), owner(earlier.stmt)) {
            (Some(l), Some(e)) => l != e && rank[&l] < rank[&e],
            _ => false,
        })
        .first(ctx, &hoisted);
    if let Some(d) = found {
        return Err(ScheduleError::dependence(format!("swap would reverse {}", d)));
    }

    let mut new_stmts = stmts[..start].to_vec();
    for id in order {
        if let Some(s) = stmts.iter().find(|s| s.id == *id) {
            new_stmts.push(s.clone());
        }
    }
    new_stmts.extend(stmts[end + 1..].iter().cloned());
    let swapped = replace(&hoisted, parent.id, parent.with_kind(StmtKind::StmtSeq { stmts: new_stmts }))?;
    let moved = moved_defs(&before, &hoisted);
    Ok(sink_var(&swapped, Some(&moved)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::expr::{int, load, var};
    use crate::ast::stmt::{for_range, seq, store, var_def};
    use crate::ast::{AccessType, Buffer, DataType};
    use crate::utils::ScheduleErrorKind;

    fn buf(atype: AccessType) -> Buffer {
        Buffer::new(vec![int(8)], DataType::Int32, atype)
    }

    fn ids(s: &Stmt) -> Vec<ID> {
        match &s.kind {
            StmtKind::StmtSeq { stmts } => stmts.iter().map(|s| s.id).collect(),
            StmtKind::VarDef { body, .. } => ids(body),
            _ => vec![],
        }
    }

    #[test]
    fn test_swap_independent() {
        let a = store("x", vec![int(0)], int(1));
        let b = store("y", vec![int(0)], int(2));
        let root = var_def("x", buf(AccessType::Output), var_def("y", buf(AccessType::Output), seq(vec![a.clone(), b.clone()])));
        let out = swap(&PBCtx::new(), &root, &[b.id, a.id], &ScheduleConfig::default()).unwrap();
        assert_eq!(ids(&out), vec![b.id, a.id]);
    }

    #[test]
    fn test_swap_reversing_flow_rejected() {
        let a = store("x", vec![int(0)], int(1));
        let b = store("y", vec![int(0)], load("x", vec![int(0)]));
        let root = var_def("x", buf(AccessType::Cache), var_def("y", buf(AccessType::Output), seq(vec![a.clone(), b.clone()])));
        let err = swap(&PBCtx::new(), &root, &[b.id, a.id], &ScheduleConfig::default()).unwrap_err();
        assert_eq!(err.kind, ScheduleErrorKind::Dependence);
    }

    #[test]
    fn test_swap_inside_loop_same_iteration() {
        // x[i] = 1; y[i] = x[i-1] only depends across iterations
        let a = store("x", vec![var("i")], int(1));
        let b = store("y", vec![var("i")], load("x", vec![crate::ast::expr::sub(var("i"), int(1))]));
        let l = for_range("i", int(1), int(8), seq(vec![a.clone(), b.clone()]));
        let root = var_def("x", buf(AccessType::Cache), var_def("y", buf(AccessType::Output), l));
        let out = swap(&PBCtx::new(), &root, &[b.id, a.id], &ScheduleConfig::default()).unwrap();
        let index = TreeIndex::build(&out);
        assert!(index.is_before(b.id, a.id));
    }

    #[test]
    fn test_swap_across_scope() {
        let a = store("y", vec![int(0)], int(1));
        let b = store("t", vec![int(0)], int(2));
        let c = store("z", vec![int(0)], load("t", vec![int(0)]));
        let def = var_def("t", buf(AccessType::Cache), seq(vec![b.clone(), c.clone()]));
        let root = seq(vec![a.clone(), def]);
        let out = swap(&PBCtx::new(), &root, &[b.id, a.id], &ScheduleConfig::default()).unwrap();
        let index = TreeIndex::build(&out);
        assert!(index.is_before(b.id, a.id));
        assert!(index.is_before(a.id, c.id));
    }

    #[test]
    fn test_swap_validation() {
        let a = store("x", vec![int(0)], int(1));
        let b = store("y", vec![int(0)], int(2));
        let c = store("z", vec![int(0)], int(3));
        let root = seq(vec![a.clone(), b.clone(), c.clone()]);
        let ctx = PBCtx::new();
        let cfg = ScheduleConfig::default();
        assert_eq!(swap(&ctx, &root, &[c.id, a.id], &cfg).unwrap_err().kind, ScheduleErrorKind::Malformed);
        assert_eq!(swap(&ctx, &root, &[ID::new()], &cfg).unwrap_err().kind, ScheduleErrorKind::NotFound);
        assert!(std::rc::Rc::ptr_eq(&swap(&ctx, &root, &[a.id, b.id], &cfg).unwrap(), &root));
    }
}
