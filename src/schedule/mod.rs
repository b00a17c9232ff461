//! Schedule transformation engine.
//!
//! A [`Schedule`] owns a tree and a relation context. Each primitive builds
//! a candidate tree, checks it with dependence queries and either installs
//! it or leaves the session untouched:
//!
//! ```rust,ignore
//! let mut s = Schedule::new(ast);
//! let i = s.find("Li")?;
//! let j = s.find("Lj")?;
//! s.reorder(&[j, i])?;
//! s.transaction(|s| {
//!     let (outer, inner) = s.split(j, SplitBy::Factor(4))?;
//!     s.reorder(&[outer, i, inner])
//! })?;
//! ```
//!
//! Transactions nest. Aborting one restores the tree and the log to what
//! they were when it began, whatever happened to the transactions inside.

pub mod auto_fission_fuse;
pub mod fission;
pub mod fuse;
pub mod log;
pub mod merge;
pub mod move_to;
pub mod reorder;
pub mod split;
pub mod swap;

pub use auto_fission_fuse::{DepDiffDecider, FissionFuseDecider};
pub use fission::FissionSide;
pub use self::log::{ScheduleLog, ScheduleLogItem, ScheduleOp};
pub use move_to::MoveToSide;
pub use split::SplitBy;

use crate::analysis::{compute_access_bound, AccessBound, AccessBoundMode, Dependency, FindDeps};
use crate::ast::expr::{self as ex, Expr};
use crate::ast::visit::all_stmts;
use crate::ast::{ForProperty, Stmt, StmtKind, StmtNode, TreeIndex, ID};
use crate::presburger::PBCtx;
use crate::utils::{ScheduleError, ScheduleResult};
use crate::ScheduleConfig;
use ::log::{debug, info};
use self::log::IdTranslation;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

/// Old to new identities of the statements a primitive relocated.
pub type IdMap = HashMap<ID, ID>;

/// Identity map over the statements present in both trees.
fn kept_ids(old: &Stmt, new: &Stmt) -> IdMap {
    let now: HashSet<ID> = all_stmts(new).iter().map(|s| s.id).collect();
    all_stmts(old).iter().map(|s| s.id).filter(|id| now.contains(id)).map(|id| (id, id)).collect()
}

#[derive(Debug, Clone)]
struct Checkpoint {
    ast: Stmt,
    log_len: usize,
}

/// A scheduling session over one tree.
pub struct Schedule {
    ctx: PBCtx,
    ast: Stmt,
    index: TreeIndex,
    log: ScheduleLog,
    checkpoints: Vec<Checkpoint>,
    config: ScheduleConfig,
}

impl Schedule {
    pub fn new(ast: Stmt) -> Self {
        Self::with_config(ast, ScheduleConfig::default())
    }

    pub fn with_config(ast: Stmt, config: ScheduleConfig) -> Self {
        let index = TreeIndex::build(&ast);
        Self {
            ctx: PBCtx::with_profiling(config.profile),
            ast,
            index,
            log: ScheduleLog::new(),
            checkpoints: Vec::new(),
            config,
        }
    }

    /// The current tree.
    pub fn ast(&self) -> &Stmt {
        &self.ast
    }

    pub fn into_ast(self) -> Stmt {
        self.ast
    }

    /// Primitives applied so far and not rolled back.
    pub fn log(&self) -> &ScheduleLog {
        &self.log
    }

    pub fn config(&self) -> &ScheduleConfig {
        &self.config
    }

    pub fn ctx(&self) -> &PBCtx {
        &self.ctx
    }

    pub fn index(&self) -> &TreeIndex {
        &self.index
    }

    /// The single statement labelled `label`.
    pub fn find(&self, label: &str) -> ScheduleResult<ID> {
        match self.index.find_label(label).as_slice() {
            [id] => Ok(*id),
            [] => Err(ScheduleError::not_found(format!("no statement labelled \"{}\"", label))),
            many => Err(ScheduleError::malformed(format!(
                "label \"{}\" names {} statements",
                label,
                many.len()
            ))),
        }
    }

    /// Every statement labelled `label`, in pre-order.
    pub fn find_all(&self, label: &str) -> Vec<ID> {
        self.index.find_label(label)
    }

    pub fn stmt(&self, id: ID) -> Option<&Stmt> {
        self.index.get(id)
    }

    /// Run a dependence query on the current tree.
    pub fn deps(&self, query: &FindDeps<'_>) -> Vec<Dependency> {
        query.collect(&self.ctx, &self.ast)
    }

    /// Bounds of the region of `var_def` accessed under `mode` in the
    /// current tree.
    pub fn access_bound(&self, var_def: ID, mode: AccessBoundMode) -> ScheduleResult<AccessBound> {
        compute_access_bound(&self.ctx, &self.ast, var_def, mode, None, self.config.verify_bounds)
    }

    pub fn begin_transaction(&mut self) {
        self.checkpoints.push(Checkpoint { ast: self.ast.clone(), log_len: self.log.len() });
    }

    /// Keep the changes of the innermost transaction.
    ///
    /// # Panics
    ///
    /// Panics when no transaction is open.
    pub fn commit_transaction(&mut self) {
        if self.checkpoints.pop().is_none() {
            panic!("commit_transaction without an open transaction");
        }
    }

    /// Restore the tree and the log of the innermost transaction.
    ///
    /// # Panics
    ///
    /// Panics when no transaction is open.
    pub fn abort_transaction(&mut self) {
        let Some(cp) = self.checkpoints.pop() else {
            panic!("abort_transaction without an open transaction");
        };
        self.ast = cp.ast;
        self.log.truncate(cp.log_len);
        self.index = TreeIndex::build(&self.ast);
    }

    /// Run `f` in a transaction, committed when it succeeds.
    pub fn transaction<T>(&mut self, f: impl FnOnce(&mut Self) -> ScheduleResult<T>) -> ScheduleResult<T> {
        self.begin_transaction();
        match f(self) {
            Ok(v) => {
                self.commit_transaction();
                Ok(v)
            }
            Err(e) => {
                self.abort_transaction();
                Err(e)
            }
        }
    }

    /// Apply one primitive: run it on the current tree and install the
    /// result, or leave everything as it was.
    fn apply<T>(
        &mut self,
        op: ScheduleOp,
        run: impl FnOnce(&PBCtx, &Stmt, &ScheduleConfig) -> ScheduleResult<(Stmt, T)>,
    ) -> ScheduleResult<T> {
        self.begin_transaction();
        match run(&self.ctx, &self.ast, &self.config) {
            Ok((ast, out)) if Rc::ptr_eq(&ast, &self.ast) => {
                debug!("{} left the tree unchanged", op);
                self.commit_transaction();
                Ok(out)
            }
            Ok((ast, out)) => {
                let new_ids =
                    all_stmts(&ast).iter().map(|s| s.id).filter(|id| !self.index.contains(*id)).collect();
                info!("applied {}", op);
                self.ast = ast;
                self.index = TreeIndex::build(&self.ast);
                self.log.push(ScheduleLogItem { op, new_ids });
                self.commit_transaction();
                Ok(out)
            }
            Err(e) => {
                debug!("rejected {}: {}", op, e);
                self.abort_transaction();
                Err(e)
            }
        }
    }

    /// Reorder the loops of a nest; `order` lists them outermost first.
    /// Every statement keeps its id, so the returned map is the identity
    /// over the statements of the tree.
    pub fn reorder(&mut self, order: &[ID]) -> ScheduleResult<IdMap> {
        let op = ScheduleOp::Reorder { order: order.to_vec() };
        self.apply(op, |ctx, ast, cfg| {
            let new = reorder::reorder(ctx, ast, order, cfg)?;
            let map = kept_ids(ast, &new);
            Ok((new, map))
        })
    }

    /// Reorder consecutive statements of one sequence. Like [`reorder`],
    /// returns the identity map over the kept statements.
    ///
    /// [`reorder`]: Schedule::reorder
    pub fn swap(&mut self, order: &[ID]) -> ScheduleResult<IdMap> {
        let op = ScheduleOp::Swap { order: order.to_vec() };
        self.apply(op, |ctx, ast, cfg| {
            let new = swap::swap(ctx, ast, order, cfg)?;
            let map = kept_ids(ast, &new);
            Ok((new, map))
        })
    }

    /// Split a loop in two at `split_point`. Returns the id maps of the
    /// front and the back loop.
    pub fn fission(&mut self, loop_id: ID, side: FissionSide, split_point: ID) -> ScheduleResult<(IdMap, IdMap)> {
        let op = ScheduleOp::Fission { loop_id, side, split_point };
        self.apply(op, |ctx, ast, cfg| {
            let (ast, front, back) = fission::fission(ctx, ast, loop_id, side, split_point, cfg)?;
            Ok((ast, (front, back)))
        })
    }

    /// Fuse two consecutive loops. Returns the id of the fused loop.
    pub fn fuse(&mut self, loop0: ID, loop1: ID) -> ScheduleResult<ID> {
        let op = ScheduleOp::Fuse { loop0, loop1 };
        self.apply(op, |ctx, ast, cfg| fuse::fuse(ctx, ast, loop0, loop1, cfg))
    }

    /// Tile a loop. Returns the ids of the outer and the inner loop.
    pub fn split(&mut self, loop_id: ID, by: SplitBy) -> ScheduleResult<(ID, ID)> {
        let op = ScheduleOp::Split { loop_id, by };
        self.apply(op, |ctx, ast, _| {
            let (ast, outer, inner) = split::split(ctx, ast, loop_id, by)?;
            Ok((ast, (outer, inner)))
        })
    }

    /// Collapse two directly nested loops. Returns the id of the new loop.
    pub fn merge(&mut self, loop0: ID, loop1: ID) -> ScheduleResult<ID> {
        let op = ScheduleOp::Merge { loop0, loop1 };
        self.apply(op, |_, ast, _| merge::merge(ast, loop0, loop1))
    }

    /// Move a statement next to `dst`. Returns its id.
    pub fn move_to(&mut self, stmt: ID, side: MoveToSide, dst: ID) -> ScheduleResult<ID> {
        let op = ScheduleOp::MoveTo { stmt, side, dst };
        self.apply(op, |ctx, ast, cfg| Ok((move_to::move_to(ctx, ast, stmt, side, dst, cfg)?, stmt)))
    }

    /// Apply a logged operation.
    pub fn apply_op(&mut self, op: &ScheduleOp) -> ScheduleResult<()> {
        match op {
            ScheduleOp::Reorder { order } => self.reorder(order).map(|_| ()),
            ScheduleOp::Swap { order } => self.swap(order).map(|_| ()),
            ScheduleOp::Fission { loop_id, side, split_point } => {
                self.fission(*loop_id, *side, *split_point).map(|_| ())
            }
            ScheduleOp::Fuse { loop0, loop1 } => self.fuse(*loop0, *loop1).map(|_| ()),
            ScheduleOp::Split { loop_id, by } => self.split(*loop_id, *by).map(|_| ()),
            ScheduleOp::Merge { loop0, loop1 } => self.merge(*loop0, *loop1).map(|_| ()),
            ScheduleOp::MoveTo { stmt, side, dst } => self.move_to(*stmt, *side, *dst).map(|_| ()),
        }
    }

    /// Reapply a log recorded on this tree, as one transaction. Statements
    /// created by earlier entries are re-targeted to the ones the replay
    /// creates.
    pub fn replay(&mut self, log: &ScheduleLog) -> ScheduleResult<()> {
        self.transaction(|s| {
            let mut t = IdTranslation::default();
            for item in log.iter() {
                let op = item.op.map_ids(|id| t.get(id));
                s.apply_op(&op)?;
                let replayed = s.log.items().last().map(|i| i.new_ids.clone()).unwrap_or_default();
                if replayed.len() != item.new_ids.len() {
                    return Err(ScheduleError::malformed(format!("replay of {} diverged from the log", item)));
                }
                t.learn(&item.new_ids, &replayed);
            }
            Ok(())
        })
    }

    /// Write the relation profile through the logger.
    pub fn log_profile(&self) {
        self.ctx.log_profile();
    }
}

/// Header and body of a loop, detached from its node.
#[derive(Debug, Clone)]
pub(crate) struct LoopParts {
    pub iter: String,
    pub begin: Expr,
    pub end: Expr,
    pub step: Expr,
    pub len: Expr,
    pub property: ForProperty,
    pub body: Stmt,
}

impl LoopParts {
    pub fn of(s: &Stmt) -> Option<Self> {
        match &s.kind {
            StmtKind::For { iter, begin, end, step, len, property, body } => Some(Self {
                iter: iter.clone(),
                begin: begin.clone(),
                end: end.clone(),
                step: step.clone(),
                len: len.clone(),
                property: property.clone(),
                body: body.clone(),
            }),
            _ => None,
        }
    }

    fn kind(&self, body: Stmt) -> StmtKind {
        StmtKind::For {
            iter: self.iter.clone(),
            begin: self.begin.clone(),
            end: self.end.clone(),
            step: self.step.clone(),
            len: self.len.clone(),
            property: self.property.clone(),
            body,
        }
    }

    /// The loop node `like` with a new body, keeping its identity.
    pub fn rebuild(&self, like: &Stmt, body: Stmt) -> Stmt {
        like.with_kind(self.kind(body))
    }

    /// A new loop node with this header.
    pub fn build(&self, body: Stmt) -> Stmt {
        Rc::new(StmtNode { id: ID::new(), label: None, kind: self.kind(body) })
    }

    pub fn header(&self) -> [&Expr; 4] {
        [&self.begin, &self.end, &self.step, &self.len]
    }

    /// Whether the header mentions `name`.
    pub fn header_uses(&self, name: &str) -> bool {
        let mut names = Vec::new();
        for e in self.header() {
            ex::vars_of(e, &mut names);
        }
        names.iter().any(|n| n == name)
    }

    /// Iterator value of the last iteration.
    pub fn last(&self) -> Expr {
        let k = ex::sub_folded(self.len.clone(), ex::int(1));
        ex::add_folded(self.begin.clone(), ex::mul_folded(self.step.clone(), k))
    }

    /// Normalised iteration counter `(iter - begin) / step`.
    pub fn counter(&self) -> Expr {
        let off = ex::sub_folded(ex::var(self.iter.clone()), self.begin.clone());
        if self.step.as_int() == Some(1) {
            off
        } else {
            ex::floor_div(off, self.step.clone())
        }
    }

    /// Iterator value at counter `k`.
    pub fn value_at(&self, k: Expr) -> Expr {
        ex::add_folded(self.begin.clone(), ex::mul_folded(self.step.clone(), k))
    }
}

pub(crate) fn get_stmt(index: &TreeIndex, id: ID) -> ScheduleResult<Stmt> {
    index.get(id).cloned().ok_or_else(|| ScheduleError::not_found(format!("statement {} not found", id)))
}

pub(crate) fn get_loop(index: &TreeIndex, id: ID) -> ScheduleResult<(Stmt, LoopParts)> {
    let s = get_stmt(index, id)?;
    match LoopParts::of(&s) {
        Some(l) => Ok((s, l)),
        None => Err(ScheduleError::malformed(format!("{} is not a loop", s.describe()))),
    }
}

/// Replace statement `id` in `ast`.
pub(crate) fn replace(ast: &Stmt, id: ID, with: Stmt) -> ScheduleResult<Stmt> {
    crate::ast::visit::replace_stmt(ast, id, &|_| with.clone())
        .ok_or_else(|| ScheduleError::not_found(format!("statement {} not found", id)))
}

/// Replace statement `id` by several statements: spliced into its parent
/// sequence, or wrapped in a new one.
pub(crate) fn replace_by_many(ast: &Stmt, index: &TreeIndex, id: ID, with: Vec<Stmt>) -> ScheduleResult<Stmt> {
    if let Some(parent) = index.parent(id).and_then(|p| index.get(p)) {
        if let StmtKind::StmtSeq { stmts } = &parent.kind {
            let mut out = Vec::with_capacity(stmts.len() + with.len());
            for s in stmts {
                if s.id == id {
                    out.extend(with.iter().cloned());
                } else {
                    out.push(s.clone());
                }
            }
            return replace(ast, parent.id, parent.with_kind(StmtKind::StmtSeq { stmts: out }));
        }
    }
    replace(ast, id, crate::ast::stmt::seq(with))
}

/// `VarDef`s whose parent changed between two versions of a tree.
pub(crate) fn moved_defs(before: &TreeIndex, after: &Stmt) -> HashSet<ID> {
    let after_index = TreeIndex::build(after);
    after_index
        .filter(|s| matches!(s.kind, StmtKind::VarDef { .. }))
        .into_iter()
        .filter(|id| before.parent(*id) != after_index.parent(*id))
        .collect()
}
