//! Loop fission.
//!
//! `for i { A; B }` split before `B` becomes `for i { A } for i { B }`.
//! Statements enclosing the split point inside the loop are duplicated on
//! both sides. Variables written on one side and read on the other are
//! hoisted out of the loop first, gaining one dimension per loop they vary
//! in.

use super::{get_loop, get_stmt, replace, replace_by_many, IdMap};
use crate::analysis::{collect_accesses, find_loop_variance, FindDeps};
use crate::ast::expr::{deep_copy, vars_of};
use crate::ast::stmt::seq;
use crate::ast::visit::{all_stmts, rebuild_expr, rebuild_stmt, Mutator};
use crate::ast::{Expr, ExprKind, Stmt, StmtKind, StmtNode, TreeIndex, ID};
use crate::pass::hoist_var::{buffer_names, fresh_name, RenameVar};
use crate::pass::sink_var;
use crate::presburger::PBCtx;
use crate::utils::{ScheduleError, ScheduleResult};
use crate::ScheduleConfig;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::rc::Rc;

/// Where the loop is cut relative to the split point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FissionSide {
    /// The split point starts the back loop
    Before,
    /// The split point ends the front loop
    After,
}

/// Which half of the loop a statement ends up in.
struct Halves<'a> {
    index: &'a TreeIndex,
    loop_id: ID,
    side: FissionSide,
    split_point: ID,
}

impl Halves<'_> {
    /// Encloses the split point inside the loop; the loop itself included.
    fn on_path(&self, s: ID) -> bool {
        s != self.split_point && self.index.is_ancestor(s, self.split_point) && self.index.is_ancestor(self.loop_id, s)
    }

    fn before_split(&self, s: ID) -> bool {
        self.index.is_before(s, self.split_point)
            || (self.side == FissionSide::After && self.index.is_ancestor(self.split_point, s))
    }

    fn in_front(&self, s: ID) -> bool {
        self.on_path(s) || self.before_split(s)
    }

    fn in_back(&self, s: ID) -> bool {
        self.on_path(s) || !self.before_split(s)
    }
}

/// Split `loop_id` at `split_point`.
///
/// Returns the new tree and two maps from the ids of the original loop's
/// statements to their counterparts in the front and in the back loop. The
/// back loop keeps the original ids; the front loop's copies of the loop
/// and of the statements enclosing the split point are new.
pub fn fission(
    ctx: &PBCtx,
    ast: &Stmt,
    loop_id: ID,
    side: FissionSide,
    split_point: ID,
    config: &ScheduleConfig,
) -> ScheduleResult<(Stmt, IdMap, IdMap)> {
    let index = TreeIndex::build(ast);
    get_loop(&index, loop_id)?;
    get_stmt(&index, split_point)?;
    if split_point == loop_id || !index.is_ancestor(loop_id, split_point) {
        return Err(ScheduleError::malformed(format!("{} is not inside loop {}", split_point, loop_id)));
    }

    let hoisted = hoist_shared_defs(ast, loop_id, side, split_point)?;
    let index = TreeIndex::build(&hoisted);
    let (loop_s, l) = get_loop(&index, loop_id)?;
    let halves = Halves { index: &index, loop_id, side, split_point };

    let found = FindDeps::new()
        .filter_sub_ast(loop_id)
        .ignore_reduction_waw(config.ignore_reduction_waw)
        .filter(|later, earlier| halves.in_back(earlier.stmt) && halves.in_front(later.stmt))
        .first(ctx, &hoisted);
    if let Some(d) = found {
        return Err(ScheduleError::dependence(format!("fission would reverse {}", d)));
    }

    let mut copies = IdMap::new();
    let (front, back) = split(&index, &l.body, side, split_point, &mut copies)?;
    let (Some(front), Some(back)) = (front, back) else {
        return Err(ScheduleError::malformed(format!(
            "splitting {} at {} leaves one side empty",
            loop_s.describe(),
            split_point
        )));
    };
    let front_loop = l.build(front);
    copies.insert(loop_id, front_loop.id);
    let back_loop = l.rebuild(&loop_s, back);
    let out = replace_by_many(&hoisted, &index, loop_id, vec![front_loop.clone(), back_loop.clone()])?;

    // duplicated scopes may have lost all their users on one side
    let dup_defs: HashSet<ID> = copies
        .iter()
        .filter(|(old, _)| index.get(**old).map_or(false, |s| matches!(s.kind, StmtKind::VarDef { .. })))
        .flat_map(|(old, new)| [*old, *new])
        .collect();
    let out = sink_var(&out, Some(&dup_defs));
    let live = TreeIndex::build(&out);

    let mut front_map = IdMap::new();
    for s in all_stmts(&front_loop) {
        if live.contains(s.id) && !copies.values().any(|c| *c == s.id) {
            front_map.insert(s.id, s.id);
        }
    }
    for (old, new) in &copies {
        if live.contains(*new) {
            front_map.insert(*old, *new);
        }
    }
    let back_map: IdMap =
        all_stmts(&back_loop).iter().map(|s| s.id).filter(|id| live.contains(*id)).map(|id| (id, id)).collect();
    debug!("split {} into {} and {}", loop_id, front_loop.id, loop_id);
    Ok((out, front_map, back_map))
}

fn with_body_kind(s: &Stmt, body: Stmt) -> Option<StmtKind> {
    Some(match &s.kind {
        StmtKind::For { iter, begin, end, step, len, property, .. } => StmtKind::For {
            iter: iter.clone(),
            begin: begin.clone(),
            end: end.clone(),
            step: step.clone(),
            len: len.clone(),
            property: property.clone(),
            body,
        },
        StmtKind::VarDef { name, buffer, .. } => StmtKind::VarDef { name: name.clone(), buffer: buffer.clone(), body },
        StmtKind::Assert { cond, .. } => StmtKind::Assert { cond: cond.clone(), body },
        StmtKind::If { cond, else_case: None, .. } => StmtKind::If { cond: cond.clone(), then_case: body, else_case: None },
        _ => return None,
    })
}

fn single_body(s: &Stmt) -> Option<&Stmt> {
    match &s.kind {
        StmtKind::For { body, .. } | StmtKind::VarDef { body, .. } | StmtKind::Assert { body, .. } => Some(body),
        StmtKind::If { then_case, else_case: None, .. } => Some(then_case),
        _ => None,
    }
}

/// Cut `s` along the path to the split point. The back half keeps the
/// original nodes; front copies of path nodes are recorded in `copies`.
fn split(
    index: &TreeIndex,
    s: &Stmt,
    side: FissionSide,
    split_point: ID,
    copies: &mut IdMap,
) -> ScheduleResult<(Option<Stmt>, Option<Stmt>)> {
    if s.id == split_point {
        return Ok(match side {
            FissionSide::Before => (None, Some(s.clone())),
            FissionSide::After => (Some(s.clone()), None),
        });
    }
    if let StmtKind::StmtSeq { stmts } = &s.kind {
        let Some(k) = stmts.iter().position(|c| index.is_ancestor(c.id, split_point)) else {
            return Err(ScheduleError::malformed(format!("{} is not inside {}", split_point, s.describe())));
        };
        let (f, b) = split(index, &stmts[k], side, split_point, copies)?;
        let mut fs = stmts[..k].to_vec();
        fs.extend(f);
        let mut bs: Vec<Stmt> = b.into_iter().collect();
        bs.extend(stmts[k + 1..].iter().cloned());
        let front = (!fs.is_empty()).then(|| {
            let c = seq(fs);
            copies.insert(s.id, c.id);
            c
        });
        let back = (!bs.is_empty()).then(|| s.with_kind(StmtKind::StmtSeq { stmts: bs }));
        return Ok((front, back));
    }

    let Some(body) = single_body(s) else {
        return Err(ScheduleError::unsupported(format!("cannot split through {}", s.describe())));
    };
    let (f, b) = split(index, body, side, split_point, copies)?;
    let front = match f.and_then(|f| with_body_kind(s, f)) {
        Some(kind) => {
            let c = Rc::new(StmtNode { id: ID::new(), label: None, kind });
            copies.insert(s.id, c.id);
            Some(c)
        }
        None => None,
    };
    let back = b.and_then(|b| with_body_kind(s, b)).map(|kind| s.with_kind(kind));
    Ok((front, back))
}

/// Prepends fixed indices to every access of one variable.
struct PrependIndices<'a> {
    var: &'a str,
    extra: &'a [Expr],
}

impl PrependIndices<'_> {
    fn indices(&mut self, indices: &[Expr]) -> Vec<Expr> {
        let mut out: Vec<Expr> = self.extra.iter().map(deep_copy).collect();
        out.extend(indices.iter().map(|i| self.mutate_expr(i)));
        out
    }
}

impl Mutator for PrependIndices<'_> {
    fn mutate_stmt(&mut self, s: &Stmt) -> Stmt {
        match &s.kind {
            StmtKind::VarDef { name, .. } if name == self.var => s.clone(),
            StmtKind::Store { var, indices, expr } if var == self.var => s.with_kind(StmtKind::Store {
                var: var.clone(),
                indices: self.indices(indices),
                expr: self.mutate_expr(expr),
            }),
            StmtKind::ReduceTo { var, indices, op, expr } if var == self.var => s.with_kind(StmtKind::ReduceTo {
                var: var.clone(),
                indices: self.indices(indices),
                op: *op,
                expr: self.mutate_expr(expr),
            }),
            _ => rebuild_stmt(self, s),
        }
    }

    fn mutate_expr(&mut self, e: &Expr) -> Expr {
        let e = rebuild_expr(self, e);
        match &e.kind {
            ExprKind::Load { var, indices } if var == self.var => {
                let mut all: Vec<Expr> = self.extra.iter().map(deep_copy).collect();
                all.extend(indices.iter().cloned());
                e.with_kind(ExprKind::Load { var: var.clone(), indices: all })
            }
            _ => e,
        }
    }
}

/// Move every `VarDef` on the path from the loop to the split point that is
/// accessed on both sides out of the loop, innermost first.
fn hoist_shared_defs(ast: &Stmt, loop_id: ID, side: FissionSide, split_point: ID) -> ScheduleResult<Stmt> {
    let variance = find_loop_variance(ast);
    let mut ast = ast.clone();
    let mut visited = HashSet::new();
    loop {
        let index = TreeIndex::build(&ast);
        let halves = Halves { index: &index, loop_id, side, split_point };
        let next = index.ancestors(split_point).into_iter().rev().find(|a| {
            halves.on_path(*a)
                && !visited.contains(a)
                && index.get(*a).map_or(false, |s| matches!(s.kind, StmtKind::VarDef { .. }))
        });
        let Some(def_id) = next else { break };
        visited.insert(def_id);
        let def = get_stmt(&index, def_id)?;
        let StmtKind::VarDef { name, buffer, body } = &def.kind else { continue };

        let accesses = collect_accesses(&ast);
        let own: Vec<_> = accesses.iter().filter(|a| a.def == Some(def_id)).collect();
        let shared = own.iter().any(|a| halves.in_front(a.stmt)) && own.iter().any(|a| halves.in_back(a.stmt));
        if !shared {
            continue;
        }

        let mut iters = Vec::new();
        let mut lens = Vec::new();
        let mut counters = Vec::new();
        for l in index.enclosing_loops(def_id).into_iter().filter(|l| index.is_ancestor(loop_id, *l)) {
            let (_, lp) = get_loop(&index, l)?;
            iters.push(lp.iter.clone());
            if variance.is_var_variant(def_id, l) {
                lens.push(lp.len.clone());
                counters.push(lp.counter());
            }
        }
        let mut used = Vec::new();
        for e in buffer.shape.iter().chain(&lens) {
            vars_of(e, &mut used);
        }
        if let Some(n) = used.iter().find(|n| iters.contains(*n)) {
            return Err(ScheduleError::unsupported(format!(
                "cannot hoist {}: its size depends on {}",
                def.describe(),
                n
            )));
        }

        let clash = accesses.iter().any(|a| a.var == *name && a.def != Some(def_id) && index.is_ancestor(loop_id, a.stmt));
        let new_name = if clash { fresh_name(name, &mut buffer_names(&ast)) } else { name.clone() };
        let mut new_body = body.clone();
        if new_name != *name {
            new_body = RenameVar { from: name, to: &new_name }.mutate_stmt(&new_body);
        }
        if !counters.is_empty() {
            new_body = PrependIndices { var: &new_name, extra: &counters }.mutate_stmt(&new_body);
        }
        let mut new_buffer = buffer.clone();
        new_buffer.shape = lens.into_iter().chain(buffer.shape.iter().cloned()).collect();
        debug!("hoisting {} out of loop {} as {}", def.describe(), loop_id, new_name);

        ast = replace(&ast, def_id, new_body)?;
        let l = get_stmt(&TreeIndex::build(&ast), loop_id)?;
        let wrapped = def.with_kind(StmtKind::VarDef { name: new_name, buffer: new_buffer, body: l });
        ast = replace(&ast, loop_id, wrapped)?;
    }
    Ok(ast)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::expr::{int, load, sub, var};
    use crate::ast::stmt::{for_range, store, var_def};
    use crate::ast::{AccessType, Buffer, DataType};
    use crate::utils::ScheduleErrorKind;

    fn buf(atype: AccessType) -> Buffer {
        Buffer::new(vec![int(8)], DataType::Int32, atype)
    }

    fn args(body: Stmt) -> Stmt {
        var_def("a", buf(AccessType::InOut), var_def("b", buf(AccessType::InOut), body))
    }

    fn loops_of(s: &Stmt) -> Vec<ID> {
        all_stmts(s).iter().filter(|s| s.is_for()).map(|s| s.id).collect()
    }

    #[test]
    fn test_fission_independent() {
        let a = store("a", vec![var("i")], int(1));
        let b = store("b", vec![var("i")], int(2));
        let l = for_range("i", int(0), int(8), seq(vec![a.clone(), b.clone()]));
        let ast = args(l.clone());
        let (out, front, back) =
            fission(&PBCtx::new(), &ast, l.id, FissionSide::Before, b.id, &ScheduleConfig::default()).unwrap();
        let loops = loops_of(&out);
        assert_eq!(loops.len(), 2);
        assert_eq!(loops[1], l.id);
        assert_eq!(front[&l.id], loops[0]);
        assert_eq!(front[&a.id], a.id);
        assert_eq!(back[&b.id], b.id);
        assert!(!back.contains_key(&a.id));
        let index = TreeIndex::build(&out);
        assert!(index.is_ancestor(loops[0], a.id));
        assert!(index.is_ancestor(l.id, b.id));
    }

    #[test]
    fn test_fission_after_side() {
        let a = store("a", vec![var("i")], int(1));
        let b = store("b", vec![var("i")], int(2));
        let l = for_range("i", int(0), int(8), seq(vec![a.clone(), b.clone()]));
        let ast = args(l.clone());
        let (out, _, _) =
            fission(&PBCtx::new(), &ast, l.id, FissionSide::After, a.id, &ScheduleConfig::default()).unwrap();
        assert_eq!(loops_of(&out).len(), 2);
        let err = fission(&PBCtx::new(), &ast, l.id, FissionSide::After, b.id, &ScheduleConfig::default()).unwrap_err();
        assert_eq!(err.kind, ScheduleErrorKind::Malformed);
    }

    #[test]
    fn test_fission_rejects_backward_flow() {
        // A reads b[i-1], written by B of the previous iteration
        let a = store("a", vec![var("i")], load("b", vec![sub(var("i"), int(1))]));
        let b = store("b", vec![var("i")], int(2));
        let l = for_range("i", int(1), int(8), seq(vec![a, b.clone()]));
        let ast = args(l.clone());
        let err = fission(&PBCtx::new(), &ast, l.id, FissionSide::Before, b.id, &ScheduleConfig::default()).unwrap_err();
        assert_eq!(err.kind, ScheduleErrorKind::Dependence);
    }

    #[test]
    fn test_fission_hoists_shared_local() {
        let a = store("t", vec![int(0)], load("a", vec![var("i")]));
        let b = store("b", vec![var("i")], load("t", vec![int(0)]));
        let def = var_def("t", Buffer::new(vec![int(1)], DataType::Int32, AccessType::Cache), seq(vec![a, b.clone()]));
        let l = for_range("i", int(0), int(8), def);
        let ast = args(l.clone());
        let (out, _, _) =
            fission(&PBCtx::new(), &ast, l.id, FissionSide::Before, b.id, &ScheduleConfig::default()).unwrap();
        let text = out.to_string();
        assert!(text.contains("t[8, 1]"), "{}", text);
        assert!(text.contains("t[i][0] = a[i];"), "{}", text);
        assert!(text.contains("b[i] = t[i][0];"), "{}", text);
        assert_eq!(loops_of(&out).len(), 2);
    }

    #[test]
    fn test_fission_drops_unused_copy() {
        let a = store("u", vec![int(0)], int(1));
        let c = store("a", vec![var("i")], load("u", vec![int(0)]));
        let b = store("b", vec![var("i")], int(2));
        let def = var_def("u", Buffer::new(vec![int(1)], DataType::Int32, AccessType::Cache), seq(vec![a, c, b.clone()]));
        let l = for_range("i", int(0), int(8), def.clone());
        let ast = args(l.clone());
        let (out, front, _) =
            fission(&PBCtx::new(), &ast, l.id, FissionSide::Before, b.id, &ScheduleConfig::default()).unwrap();
        let index = TreeIndex::build(&out);
        // the back loop holds b directly, the front loop the only `u`
        assert!(!index.contains(def.id));
        assert!(index.is_ancestor(l.id, b.id));
        let u = front[&def.id];
        assert!(index.is_ancestor(front[&l.id], u));
    }
}
