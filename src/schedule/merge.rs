//! Collapsing two nested loops into one.

use super::split::{taken_names, unique_name};
use super::{get_loop, replace};
use crate::ast::expr::{self as ex};
use crate::ast::visit::substitute_in_stmt;
use crate::ast::{ForProperty, Stmt, StmtKind, StmtNode, TreeIndex, ID};
use crate::utils::{ScheduleError, ScheduleResult};
use std::rc::Rc;

/// Merge `loop0` with `loop1`, nested directly inside it, into one loop
/// over the product of their trip counts. Iteration order is unchanged.
pub fn merge(ast: &Stmt, loop0: ID, loop1: ID) -> ScheduleResult<(Stmt, ID)> {
    let index = TreeIndex::build(ast);
    let (s0, l0) = get_loop(&index, loop0)?;
    let (s1, l1) = get_loop(&index, loop1)?;
    if loop0 == loop1 || !index.is_ancestor(loop0, loop1) {
        return Err(ScheduleError::malformed(format!("{} is not nested in {}", s1.describe(), s0.describe())));
    }
    for between in index.ancestors(loop1).into_iter().filter(|a| *a != loop0 && index.is_ancestor(loop0, *a)) {
        let single = index.get(between).map_or(false, |s| match &s.kind {
            StmtKind::StmtSeq { stmts } => stmts.len() == 1,
            _ => false,
        });
        if !single {
            return Err(ScheduleError::unsupported(format!(
                "{} is not directly nested in {}",
                s1.describe(),
                s0.describe()
            )));
        }
    }
    if l1.header_uses(&l0.iter) {
        return Err(ScheduleError::unsupported(format!(
            "bounds of {} depend on the iterator of {}",
            s1.describe(),
            s0.describe()
        )));
    }

    let iter = unique_name(format!("{}_{}", l0.iter, l1.iter), &mut taken_names(ast));
    let m = ex::var(iter.clone());
    let v1 = l1.value_at(ex::modulo(m.clone(), l1.len.clone()));
    let v0 = l0.value_at(ex::floor_div(m, l1.len.clone()));
    let body = substitute_in_stmt(&l1.body, &l1.iter, &v1);
    let body = substitute_in_stmt(&body, &l0.iter, &v0);
    let len = ex::mul_folded(l0.len.clone(), l1.len.clone());
    let property = ForProperty {
        parallel: l0.property.parallel && l1.property.parallel,
        no_deps: l0.property.no_deps.iter().filter(|v| l1.property.no_deps.contains(v)).cloned().collect(),
    };
    let merged = Rc::new(StmtNode {
        id: ID::new(),
        label: s0.label.clone(),
        kind: StmtKind::For { iter, begin: ex::int(0), end: len.clone(), step: ex::int(1), len, property, body },
    });
    Ok((replace(ast, loop0, merged.clone())?, merged.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::expr::{int, var};
    use crate::ast::stmt::{for_range, seq, store};
    use crate::utils::ScheduleErrorKind;

    #[test]
    fn test_merge() {
        let inner = for_range("j", int(0), int(8), store("a", vec![var("i"), var("j")], int(0)));
        let outer = for_range("i", int(0), int(4), inner.clone());
        let (out, id) = merge(&outer, outer.id, inner.id).unwrap();
        assert_eq!(out.id, id);
        let text = out.to_string();
        assert!(text.starts_with("for i_j in 0..32"), "{}", text);
        assert!(text.contains("a[(i_j // 8)][(i_j % 8)] = 0;"), "{}", text);
    }

    #[test]
    fn test_merge_rejections() {
        let inner = for_range("j", int(0), int(8), store("a", vec![var("i"), var("j")], int(0)));
        let outer = for_range("i", int(0), int(4), seq(vec![store("b", vec![var("i")], int(0)), inner.clone()]));
        let err = merge(&outer, outer.id, inner.id).unwrap_err();
        assert_eq!(err.kind, ScheduleErrorKind::Unsupported);
        let err = merge(&outer, inner.id, outer.id).unwrap_err();
        assert_eq!(err.kind, ScheduleErrorKind::Malformed);

        let tri = for_range("j", int(0), var("i"), store("a", vec![var("i"), var("j")], int(0)));
        let outer = for_range("i", int(0), int(4), tri.clone());
        assert_eq!(merge(&outer, outer.id, tri.id).unwrap_err().kind, ScheduleErrorKind::Unsupported);
    }
}
