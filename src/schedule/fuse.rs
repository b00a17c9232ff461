//! Loop fusion.

use super::{get_loop, moved_defs, replace};
use crate::analysis::lower::always_holds;
use crate::analysis::FindDeps;
use crate::ast::expr::{self as ex, loads_of};
use crate::ast::stmt::seq;
use crate::ast::visit::{all_names, all_stmts, substitute_in_stmt};
use crate::ast::{ForProperty, Stmt, StmtKind, StmtNode, TreeIndex, ID};
use crate::pass::{hoist_var_over_stmt_seq, sink_var};
use crate::presburger::PBCtx;
use crate::utils::{ScheduleError, ScheduleResult};
use crate::ScheduleConfig;
use std::collections::HashSet;
use std::rc::Rc;

fn fused_property(a: &ForProperty, b: &ForProperty) -> ForProperty {
    ForProperty {
        parallel: a.parallel && b.parallel,
        no_deps: a.no_deps.iter().filter(|v| b.no_deps.contains(v)).cloned().collect(),
    }
}

/// Fuse `loop1` into the loop right before it, `loop0`.
///
/// The two loops must run the same number of iterations. The fused loop
/// takes `loop0`'s header and runs both bodies in turn; it is rejected
/// when some access of the second body would now run before an access of
/// the first body it conflicts with.
pub fn fuse(ctx: &PBCtx, ast: &Stmt, loop0: ID, loop1: ID, config: &ScheduleConfig) -> ScheduleResult<(Stmt, ID)> {
    if loop0 == loop1 {
        return Err(ScheduleError::malformed("cannot fuse a loop with itself"));
    }
    let before = TreeIndex::build(ast);
    get_loop(&before, loop0)?;
    get_loop(&before, loop1)?;

    let hoisted = hoist_var_over_stmt_seq(ast, Some(&[loop0, loop1]));
    let index = TreeIndex::build(&hoisted);
    let (s0, l0) = get_loop(&index, loop0)?;
    let (s1, l1) = get_loop(&index, loop1)?;
    let siblings = match (index.parent(loop0), index.parent(loop1)) {
        (Some(p0), Some(p1)) if p0 == p1 => index.get(p0).and_then(|p| match &p.kind {
            StmtKind::StmtSeq { stmts } => {
                let k0 = stmts.iter().position(|s| s.id == loop0)?;
                let k1 = stmts.iter().position(|s| s.id == loop1)?;
                (k0 + 1 == k1).then(|| (p.clone(), stmts.clone()))
            }
            _ => None,
        }),
        _ => None,
    };
    let Some((parent, stmts)) = siblings else {
        return Err(ScheduleError::malformed(format!(
            "{} is not directly followed by {}",
            s0.describe(),
            s1.describe()
        )));
    };

    if !always_holds(ctx, &ex::eq(l0.len.clone(), l1.len.clone())) {
        return Err(ScheduleError::malformed(format!(
            "cannot prove {} and {} run the same number of iterations ({} vs {})",
            s0.describe(),
            s1.describe(),
            l0.len,
            l1.len
        )));
    }
    let mut loads = Vec::new();
    loads_of(&l1.begin, &mut loads);
    loads_of(&l1.step, &mut loads);
    loads_of(&l1.end, &mut loads);
    if !loads.is_empty() {
        return Err(ScheduleError::unsupported(format!("the header of {} reads memory", s1.describe())));
    }
    if l0.iter != l1.iter && all_names(&l1.body).contains(&l0.iter) {
        return Err(ScheduleError::unsupported(format!(
            "the body of {} uses the name {}",
            s1.describe(),
            l0.iter
        )));
    }

    let body1 = if l0.iter == l1.iter && l0.begin.same_structure(&l1.begin) && l0.step.same_structure(&l1.step) {
        l1.body.clone()
    } else {
        substitute_in_stmt(&l1.body, &l1.iter, &l1.value_at(l0.counter()))
    };
    let first: HashSet<ID> = all_stmts(&l0.body).iter().map(|s| s.id).collect();
    let second: HashSet<ID> = all_stmts(&body1).iter().map(|s| s.id).collect();
    let fused = Rc::new(StmtNode {
        id: ID::new(),
        label: s0.label.clone(),
        kind: StmtKind::For {
            iter: l0.iter.clone(),
            begin: l0.begin.clone(),
            end: l0.end.clone(),
            step: l0.step.clone(),
            len: l0.len.clone(),
            property: fused_property(&l0.property, &l1.property),
            body: seq(vec![l0.body.clone(), body1]),
        },
    });

    let mut new_stmts = Vec::with_capacity(stmts.len() - 1);
    for s in &stmts {
        if s.id == loop0 {
            new_stmts.push(fused.clone());
        } else if s.id != loop1 {
            new_stmts.push(s.clone());
        }
    }
    let candidate = replace(&hoisted, parent.id, parent.with_kind(StmtKind::StmtSeq { stmts: new_stmts }))?;

    let found = FindDeps::new()
        .filter_sub_ast(fused.id)
        .ignore_reduction_waw(config.ignore_reduction_waw)
        .filter(|later, earlier| first.contains(&later.stmt) && second.contains(&earlier.stmt))
        .first(ctx, &candidate);
    if let Some(d) = found {
        return Err(ScheduleError::dependence(format!("fusion would reverse {}", d)));
    }

    let moved = moved_defs(&before, &hoisted);
    Ok((sink_var(&candidate, Some(&moved)), fused.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::expr::{add, int, load, var};
    use crate::ast::stmt::{for_range, store, var_def};
    use crate::ast::{AccessType, Buffer, DataType};
    use crate::utils::ScheduleErrorKind;

    fn args(body: Stmt) -> Stmt {
        let b = |a| Buffer::new(vec![int(16)], DataType::Int32, a);
        var_def("a", b(AccessType::InOut), var_def("b", b(AccessType::Output), body))
    }

    #[test]
    fn test_fuse_independent() {
        let l0 = for_range("i", int(0), int(8), store("a", vec![var("i")], int(1)));
        let l1 = for_range("j", int(0), int(8), store("b", vec![var("j")], int(2)));
        let ast = args(seq(vec![l0.clone(), l1.clone()]));
        let (out, id) = fuse(&PBCtx::new(), &ast, l0.id, l1.id, &ScheduleConfig::default()).unwrap();
        let loops: Vec<ID> = all_stmts(&out).iter().filter(|s| s.is_for()).map(|s| s.id).collect();
        assert_eq!(loops, vec![id]);
        let text = out.to_string();
        assert!(text.contains("a[i] = 1;"), "{}", text);
        assert!(text.contains("b[i] = 2;"), "{}", text);
    }

    #[test]
    fn test_fuse_shifted_ranges() {
        let l0 = for_range("i", int(0), int(8), store("a", vec![var("i")], int(1)));
        let l1 = for_range("j", int(1), int(9), store("b", vec![var("j")], load("a", vec![add(var("j"), int(-1))])));
        let ast = args(seq(vec![l0.clone(), l1.clone()]));
        let (out, _) = fuse(&PBCtx::new(), &ast, l0.id, l1.id, &ScheduleConfig::default()).unwrap();
        assert!(out.to_string().contains("b[(1 + i)]"), "{}", out);
    }

    #[test]
    fn test_fuse_rejects_unequal_lengths() {
        let l0 = for_range("i", int(0), var("n"), store("a", vec![var("i")], int(1)));
        let l1 = for_range("j", int(0), var("m"), store("b", vec![var("j")], int(2)));
        let ast = args(seq(vec![l0.clone(), l1.clone()]));
        let err = fuse(&PBCtx::new(), &ast, l0.id, l1.id, &ScheduleConfig::default()).unwrap_err();
        assert_eq!(err.kind, ScheduleErrorKind::Malformed);
    }

    #[test]
    fn test_fuse_rejects_read_ahead() {
        // the second loop reads a[j+1], written by a later iteration of the first
        let l0 = for_range("i", int(0), int(8), store("a", vec![var("i")], int(1)));
        let l1 = for_range("j", int(0), int(8), store("b", vec![var("j")], load("a", vec![add(var("j"), int(1))])));
        let ast = args(seq(vec![l0.clone(), l1.clone()]));
        let err = fuse(&PBCtx::new(), &ast, l0.id, l1.id, &ScheduleConfig::default()).unwrap_err();
        assert_eq!(err.kind, ScheduleErrorKind::Dependence);
    }

    #[test]
    fn test_fuse_requires_adjacency() {
        let l0 = for_range("i", int(0), int(8), store("a", vec![var("i")], int(1)));
        let mid = store("b", vec![int(0)], int(0));
        let l1 = for_range("j", int(0), int(8), store("b", vec![var("j")], int(2)));
        let ast = args(seq(vec![l0.clone(), mid, l1.clone()]));
        let err = fuse(&PBCtx::new(), &ast, l0.id, l1.id, &ScheduleConfig::default()).unwrap_err();
        assert_eq!(err.kind, ScheduleErrorKind::Malformed);
    }

    #[test]
    fn test_fuse_rejects_loaded_end() {
        // same length, but the end bound of the second loop reads a[0]
        let l0 = for_range("i", int(0), int(8), store("a", vec![var("i")], int(1)));
        let end = add(load("a", vec![int(0)]), int(8));
        let body = store("b", vec![var("j")], int(2));
        let l1 = crate::ast::stmt::for_loop("j", int(0), end, int(1), int(8), ForProperty::default(), body);
        let ast = args(seq(vec![l0.clone(), l1.clone()]));
        let err = fuse(&PBCtx::new(), &ast, l0.id, l1.id, &ScheduleConfig::default()).unwrap_err();
        assert_eq!(err.kind, ScheduleErrorKind::Unsupported);
    }
}
