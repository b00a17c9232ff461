//! Automatic fission and fusion.
//!
//! Loops are first split at every statement boundary a decider accepts,
//! innermost nests first; consecutive loops are then fused pairwise. Each
//! attempt runs in its own transaction and goes through the primitive's
//! own legality check, so the decider only steers the search.

use super::{FissionSide, MoveToSide, Schedule};
use crate::analysis::{DepDirection, FindDeps};
use crate::ast::{StmtKind, ID};
use log::{debug, info};
use std::collections::HashMap;

/// Chooses which fissions and fusions to attempt.
///
/// `dep_diff` tells whether exactly one of the two parts involved carries
/// a dependence across iterations of the loop in question.
pub trait FissionFuseDecider {
    /// Whether to split `loop_id` right before `splitter`.
    fn fission(&mut self, loop_id: ID, splitter: ID, dep_diff: bool) -> bool;

    /// Whether to fuse `loop0` with `loop1`, which follows it.
    fn fuse(&mut self, loop0: ID, loop1: ID, dep_diff: bool) -> bool;
}

/// Separates parts that carry dependences from parts that do not, and
/// fuses parts that agree.
#[derive(Debug, Clone, Copy, Default)]
pub struct DepDiffDecider;

impl FissionFuseDecider for DepDiffDecider {
    fn fission(&mut self, _loop_id: ID, _splitter: ID, dep_diff: bool) -> bool {
        dep_diff
    }

    fn fuse(&mut self, _loop0: ID, _loop1: ID, dep_diff: bool) -> bool {
        !dep_diff
    }
}

impl Schedule {
    /// Run the fission pass, then the fusion pass, as enabled in the
    /// configuration.
    pub fn auto_fission_fuse(&mut self, decider: &mut dyn FissionFuseDecider) {
        let mut origin = HashMap::new();
        if self.config.auto_fission {
            for l in self.loops_under(None) {
                self.try_fission(l, decider, &mut origin);
            }
        }
        if self.config.auto_fuse {
            self.try_fuse(None, decider, &origin);
        }
        info!("auto_fission_fuse done, {} primitives applied", self.log.len());
    }

    /// Loops whose nearest enclosing loop is `nest`; top-level loops for `None`.
    fn loops_under(&self, nest: Option<ID>) -> Vec<ID> {
        let index = &self.index;
        index.filter(|s| s.is_for()).into_iter().filter(|id| index.enclosing_loops(*id).last().copied() == nest).collect()
    }

    /// Candidate split points directly in `nest`, in execution order.
    fn splitters(&self, nest: ID) -> Vec<ID> {
        let index = &self.index;
        index
            .filter(|s| {
                matches!(
                    s.kind,
                    StmtKind::For { .. } | StmtKind::Store { .. } | StmtKind::ReduceTo { .. } | StmtKind::Eval { .. }
                )
            })
            .into_iter()
            .filter(|id| *id != nest && index.enclosing_loops(*id).last() == Some(&nest))
            .collect()
    }

    /// Whether some access in `root`, restricted by `part`, conflicts with
    /// another across different iterations of `l`.
    fn carries(&self, l: ID, root: ID, part: impl Fn(ID) -> bool) -> bool {
        FindDeps::new()
            .direction(vec![(l, DepDirection::Different)])
            .filter_sub_ast(root)
            .filter_access(|a| part(a.stmt))
            .ignore_reduction_waw(self.config.ignore_reduction_waw)
            .exists(&self.ctx, &self.ast)
    }

    fn try_fission(&mut self, nest: ID, decider: &mut dyn FissionFuseDecider, origin: &mut HashMap<ID, ID>) {
        for sub in self.loops_under(Some(nest)) {
            self.try_fission(sub, decider, origin);
        }
        for splitter in self.splitters(nest).into_iter().skip(1) {
            if !self.index.contains(splitter) || !self.index.contains(nest) {
                continue;
            }
            let dep_diff = {
                let index = &self.index;
                self.carries(nest, nest, |s| index.is_before(s, splitter))
                    != self.carries(nest, nest, |s| !index.is_before(s, splitter))
            };
            if !decider.fission(nest, splitter, dep_diff) {
                continue;
            }
            match self.transaction(|s| s.fission(nest, FissionSide::Before, splitter)) {
                Ok((front_map, _)) => {
                    let home = origin.get(&nest).copied().unwrap_or(nest);
                    if let Some(f) = front_map.get(&nest) {
                        origin.insert(*f, home);
                    }
                    origin.insert(nest, home);
                }
                Err(e) => debug!("not splitting {} before {}: {}", nest, splitter, e),
            }
        }
    }

    fn try_fuse(&mut self, root: Option<ID>, decider: &mut dyn FissionFuseDecider, origin: &HashMap<ID, ID>) {
        let mut last: Option<ID> = None;
        for l in self.loops_under(root) {
            let Some(prev) = last else {
                last = Some(l);
                continue;
            };
            if !self.index.contains(l) {
                continue;
            }
            let split_apart = matches!((origin.get(&prev), origin.get(&l)), (Some(a), Some(b)) if a == b);
            if !split_apart {
                let dep_diff = self.carries(prev, prev, |_| true) != self.carries(l, l, |_| true);
                if decider.fuse(prev, l, dep_diff) {
                    let attempt = self.transaction(|s| {
                        if s.move_to(prev, MoveToSide::Before, l).is_err() {
                            s.move_to(l, MoveToSide::After, prev)?;
                        }
                        s.fuse(prev, l)
                    });
                    match attempt {
                        Ok(fused) => {
                            last = Some(fused);
                            continue;
                        }
                        Err(e) => debug!("not fusing {} with {}: {}", prev, l, e),
                    }
                }
            }
            self.try_fuse(Some(prev), decider, origin);
            last = Some(l);
        }
        if let Some(l) = last {
            self.try_fuse(Some(l), decider, origin);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::expr::{add, int, load, sub, var};
    use crate::ast::stmt::{for_range, seq, store, var_def};
    use crate::ast::visit::all_stmts;
    use crate::ast::{AccessType, Buffer, DataType, Stmt};
    use crate::ScheduleConfig;

    fn args(body: Stmt) -> Stmt {
        let b = |a| Buffer::new(vec![int(16)], DataType::Int32, a);
        var_def("a", b(AccessType::InOut), var_def("b", b(AccessType::InOut), body))
    }

    fn n_loops(s: &Stmt) -> usize {
        all_stmts(s).iter().filter(|s| s.is_for()).count()
    }

    #[test]
    fn test_separates_carried_part() {
        let carried = store("a", vec![var("i")], add(load("a", vec![sub(var("i"), int(1))]), int(1)));
        let free = store("b", vec![var("i")], int(2));
        let l = for_range("i", int(1), int(8), seq(vec![carried, free]));
        let mut s = Schedule::new(args(l));
        s.auto_fission_fuse(&mut DepDiffDecider);
        assert_eq!(n_loops(s.ast()), 2);
        assert_eq!(s.log().len(), 1);
    }

    #[test]
    fn test_fuses_independent_loops() {
        let l0 = for_range("i", int(0), int(8), store("a", vec![var("i")], int(1)));
        let l1 = for_range("j", int(0), int(8), store("b", vec![var("j")], int(2)));
        let mut s = Schedule::new(args(seq(vec![l0, l1])));
        s.auto_fission_fuse(&mut DepDiffDecider);
        assert_eq!(n_loops(s.ast()), 1);
    }

    struct Never(usize);

    impl FissionFuseDecider for Never {
        fn fission(&mut self, _: ID, _: ID, _: bool) -> bool {
            self.0 += 1;
            false
        }

        fn fuse(&mut self, _: ID, _: ID, _: bool) -> bool {
            self.0 += 1;
            false
        }
    }

    #[test]
    fn test_decider_and_config_gate_attempts() {
        let l0 = for_range("i", int(0), int(8), store("a", vec![var("i")], int(1)));
        let l1 = for_range("j", int(0), int(8), store("b", vec![var("j")], int(2)));
        let ast = args(seq(vec![l0, l1]));

        let mut never = Never(0);
        let mut s = Schedule::new(ast.clone());
        s.auto_fission_fuse(&mut never);
        assert_eq!(never.0, 1);
        assert!(std::rc::Rc::ptr_eq(s.ast(), &ast));

        let mut s = Schedule::with_config(ast.clone(), ScheduleConfig::default().with_auto_fuse(false));
        s.auto_fission_fuse(&mut DepDiffDecider);
        assert_eq!(n_loops(s.ast()), 2);
    }
}
