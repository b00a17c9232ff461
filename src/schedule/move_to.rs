//! Moving a statement next to another one.

use super::swap::swap;
use super::{get_stmt, moved_defs};
use crate::ast::{Stmt, StmtKind, TreeIndex, ID};
use crate::pass::{hoist_var_over_stmt_seq, sink_var};
use crate::presburger::PBCtx;
use crate::utils::{ScheduleError, ScheduleResult};
use crate::ScheduleConfig;
use serde::{Deserialize, Serialize};

/// Which side of the destination the statement lands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveToSide {
    Before,
    After,
}

/// Move `stmt` right before or after `dst`, a statement of the same
/// sequence once variable scopes are hoisted. The statements it crosses
/// are swapped with it, under the same legality rule as [`swap`].
pub fn move_to(
    ctx: &PBCtx,
    ast: &Stmt,
    stmt: ID,
    side: MoveToSide,
    dst: ID,
    config: &ScheduleConfig,
) -> ScheduleResult<Stmt> {
    let before = TreeIndex::build(ast);
    let s = get_stmt(&before, stmt)?;
    let d = get_stmt(&before, dst)?;
    if before.is_ancestor(stmt, dst) || before.is_ancestor(dst, stmt) {
        return Err(ScheduleError::malformed(format!("cannot move {} next to {}", s.describe(), d.describe())));
    }

    let hoisted = hoist_var_over_stmt_seq(ast, Some(&[stmt, dst]));
    let index = TreeIndex::build(&hoisted);
    let parent = index.parent(stmt).filter(|p| Some(*p) == index.parent(dst)).and_then(|p| index.get(p));
    let Some(StmtKind::StmtSeq { stmts }) = parent.map(|p| &p.kind) else {
        return Err(ScheduleError::unsupported(format!(
            "{} and {} are not in one statement sequence",
            s.describe(),
            d.describe()
        )));
    };
    let pos = |id: ID| stmts.iter().position(|c| c.id == id);
    let (Some(ps), Some(pd)) = (pos(stmt), pos(dst)) else {
        return Err(ScheduleError::malformed("statements not found in their parent"));
    };

    let order: Vec<ID> = if ps < pd {
        let end = match side {
            MoveToSide::Before => pd - 1,
            MoveToSide::After => pd,
        };
        if end == ps {
            return Ok(ast.clone());
        }
        stmts[ps + 1..=end].iter().map(|c| c.id).chain(std::iter::once(stmt)).collect()
    } else {
        let start = match side {
            MoveToSide::Before => pd,
            MoveToSide::After => pd + 1,
        };
        if start == ps {
            return Ok(ast.clone());
        }
        std::iter::once(stmt).chain(stmts[start..ps].iter().map(|c| c.id)).collect()
    };

    let swapped = swap(ctx, &hoisted, &order, config)?;
    let moved = moved_defs(&before, &hoisted);
    Ok(sink_var(&swapped, Some(&moved)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::expr::{int, load};
    use crate::ast::stmt::{seq, store};
    use crate::utils::ScheduleErrorKind;

    fn order(s: &Stmt) -> Vec<ID> {
        match &s.kind {
            StmtKind::StmtSeq { stmts } => stmts.iter().map(|s| s.id).collect(),
            _ => vec![],
        }
    }

    #[test]
    fn test_move_both_ways() {
        let a = store("x", vec![int(0)], int(1));
        let b = store("y", vec![int(0)], int(2));
        let c = store("z", vec![int(0)], int(3));
        let root = seq(vec![a.clone(), b.clone(), c.clone()]);
        let (ctx, cfg) = (PBCtx::new(), ScheduleConfig::default());

        let out = move_to(&ctx, &root, c.id, MoveToSide::Before, a.id, &cfg).unwrap();
        assert_eq!(order(&out), vec![c.id, a.id, b.id]);
        let out = move_to(&ctx, &root, a.id, MoveToSide::After, c.id, &cfg).unwrap();
        assert_eq!(order(&out), vec![b.id, c.id, a.id]);
        let same = move_to(&ctx, &root, a.id, MoveToSide::Before, b.id, &cfg).unwrap();
        assert!(std::rc::Rc::ptr_eq(&same, &root));
    }

    #[test]
    fn test_move_blocked_by_dependence() {
        let a = store("x", vec![int(0)], int(1));
        let b = store("y", vec![int(0)], load("x", vec![int(0)]));
        let root = seq(vec![a.clone(), b.clone()]);
        let err = move_to(&PBCtx::new(), &root, b.id, MoveToSide::Before, a.id, &ScheduleConfig::default()).unwrap_err();
        assert_eq!(err.kind, ScheduleErrorKind::Dependence);
        let err = move_to(&PBCtx::new(), &root, root.id, MoveToSide::Before, a.id, &ScheduleConfig::default()).unwrap_err();
        assert_eq!(err.kind, ScheduleErrorKind::Malformed);
    }
}
