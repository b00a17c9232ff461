//! Dependence queries.
//!
//! Every access becomes a map from its iteration vector (one normalised
//! counter per enclosing loop, `iter = begin + step * k`) to the element it
//! touches. A pair of accesses depends on each other when the composition of
//! the later map with the reversed earlier map, restricted to pairs that run
//! in that order and satisfy the requested direction, is non-empty.
//!
//! ```rust,ignore
//! let found = FindDeps::new()
//!     .direction(vec![(outer, DepDirection::Same), (inner, DepDirection::Inv)])
//!     .exists(&ctx, &ast);
//! ```

use super::access::{collect_accesses, AccessPoint};
use super::lower::Lowering;
use crate::ast::expr::vars_of;
use crate::ast::{Stmt, StmtKind, TreeIndex, ID};
use crate::presburger::{ops, BuildConstraints, PBBuildExpr, PBCtx, PBMap, PBMapBuilder};
use bitflags::bitflags;
use log::{debug, warn};
use num_bigint::BigInt;
use num_traits::{One, Zero};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

bitflags! {
    /// Kinds of dependence to report.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct DepKind: u8 {
        /// Read after write
        const RAW = 0b001;
        /// Write after read
        const WAR = 0b010;
        /// Write after write
        const WAW = 0b100;
        const ALL = Self::RAW.bits() | Self::WAR.bits() | Self::WAW.bits();
    }
}

impl DepKind {
    pub fn short_name(self) -> String {
        let mut names = Vec::new();
        for (flag, name) in [(DepKind::RAW, "RAW"), (DepKind::WAR, "WAR"), (DepKind::WAW, "WAW")] {
            if self.contains(flag) {
                names.push(name);
            }
        }
        names.join("|")
    }
}

/// Relation between the later and the earlier access's iteration at one loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DepDirection {
    /// Same iteration
    Same,
    /// Any two different iterations
    Different,
    /// The later access runs in a smaller iteration
    Inv,
    /// Unconstrained
    Normal,
}

impl fmt::Display for DepDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DepDirection::Same => "=",
            DepDirection::Different => "!=",
            DepDirection::Inv => ">",
            DepDirection::Normal => "*",
        };
        f.write_str(s)
    }
}

/// One direction constraint: a relation per loop.
pub type FindDepsDir = Vec<(ID, DepDirection)>;

/// A pair of conflicting accesses.
#[derive(Debug, Clone)]
pub struct Dependency {
    pub var: String,
    /// The `VarDef` of the variable, if inside the tree
    pub def: Option<ID>,
    pub earlier: Rc<AccessPoint>,
    pub later: Rc<AccessPoint>,
    pub kind: DepKind,
    /// The direction constraint under which the pair was found
    pub direction: FindDepsDir,
}

impl Dependency {
    /// Human-readable description.
    pub fn description(&self) -> String {
        let dir: Vec<String> = self.direction.iter().map(|(id, d)| format!("{}: {}", id, d)).collect();
        format!(
            "{} dependence on {}: {} then {} [{}]",
            self.kind.short_name(),
            self.var,
            self.earlier,
            self.later,
            dir.join(", ")
        )
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}

#[derive(Debug, Clone)]
enum Pin {
    First,
    Last(Option<crate::ast::Expr>),
}

type AccessFilter<'a> = Box<dyn Fn(&AccessPoint) -> bool + 'a>;
type PairFilter<'a> = Box<dyn Fn(&AccessPoint, &AccessPoint) -> bool + 'a>;

/// Fluent dependence query.
pub struct FindDeps<'a> {
    directions: Vec<FindDepsDir>,
    sub_ast: Option<ID>,
    access_filter: Option<AccessFilter<'a>>,
    earlier_filter: Option<AccessFilter<'a>>,
    later_filter: Option<AccessFilter<'a>>,
    pair_filter: Option<PairFilter<'a>>,
    kinds: DepKind,
    ignore_reduction_waw: bool,
}

impl Default for FindDeps<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> FindDeps<'a> {
    pub fn new() -> Self {
        Self {
            directions: Vec::new(),
            sub_ast: None,
            access_filter: None,
            earlier_filter: None,
            later_filter: None,
            pair_filter: None,
            kinds: DepKind::ALL,
            ignore_reduction_waw: true,
        }
    }

    /// Add one direction constraint. Several constraints are checked one
    /// after another; without any, pairs are checked unconstrained.
    pub fn direction(mut self, dir: FindDepsDir) -> Self {
        self.directions.push(dir);
        self
    }

    pub fn directions(mut self, dirs: impl IntoIterator<Item = FindDepsDir>) -> Self {
        self.directions.extend(dirs);
        self
    }

    /// Only consider accesses inside the sub-tree rooted at `id`, within
    /// one iteration of the loops enclosing it.
    pub fn filter_sub_ast(mut self, id: ID) -> Self {
        self.sub_ast = Some(id);
        self
    }

    /// Only consider accesses satisfying `f`.
    pub fn filter_access(mut self, f: impl Fn(&AccessPoint) -> bool + 'a) -> Self {
        self.access_filter = Some(Box::new(f));
        self
    }

    pub fn filter_earlier(mut self, f: impl Fn(&AccessPoint) -> bool + 'a) -> Self {
        self.earlier_filter = Some(Box::new(f));
        self
    }

    pub fn filter_later(mut self, f: impl Fn(&AccessPoint) -> bool + 'a) -> Self {
        self.later_filter = Some(Box::new(f));
        self
    }

    /// Only consider pairs `(later, earlier)` satisfying `f`.
    pub fn filter(mut self, f: impl Fn(&AccessPoint, &AccessPoint) -> bool + 'a) -> Self {
        self.pair_filter = Some(Box::new(f));
        self
    }

    pub fn kinds(mut self, kinds: DepKind) -> Self {
        self.kinds = kinds;
        self
    }

    /// Whether two reductions with the same operator may be reordered.
    pub fn ignore_reduction_waw(mut self, ignore: bool) -> Self {
        self.ignore_reduction_waw = ignore;
        self
    }

    /// Report every dependence found.
    pub fn run(&self, ctx: &PBCtx, root: &Stmt, mut found: impl FnMut(&Dependency)) {
        self.search(ctx, root, &mut |d| {
            found(d);
            true
        });
    }

    /// Every dependence found.
    pub fn collect(&self, ctx: &PBCtx, root: &Stmt) -> Vec<Dependency> {
        let mut out = Vec::new();
        self.run(ctx, root, |d| out.push(d.clone()));
        out
    }

    /// Whether any dependence exists. Stops at the first one.
    pub fn exists(&self, ctx: &PBCtx, root: &Stmt) -> bool {
        let mut any = false;
        self.search(ctx, root, &mut |_| {
            any = true;
            false
        });
        any
    }

    /// The first dependence found, if any.
    pub fn first(&self, ctx: &PBCtx, root: &Stmt) -> Option<Dependency> {
        let mut out = None;
        self.search(ctx, root, &mut |d| {
            out = Some(d.clone());
            false
        });
        out
    }

    fn pair_kind(&self, earlier: &AccessPoint, later: &AccessPoint) -> DepKind {
        use super::access::AccessKind;
        if let (AccessKind::Reduce(a), AccessKind::Reduce(b)) = (earlier.kind, later.kind) {
            if a == b && self.ignore_reduction_waw {
                return DepKind::empty();
            }
        }
        let mut kind = DepKind::empty();
        if earlier.kind.is_write() && later.kind.is_read() {
            kind |= DepKind::RAW;
        }
        if earlier.kind.is_read() && later.kind.is_write() {
            kind |= DepKind::WAR;
        }
        if earlier.kind.is_write() && later.kind.is_write() {
            kind |= DepKind::WAW;
        }
        kind & self.kinds
    }

    fn search(&self, ctx: &PBCtx, root: &Stmt, on_found: &mut dyn FnMut(&Dependency) -> bool) {
        let index = TreeIndex::build(root);
        let accesses: Vec<Rc<AccessPoint>> = collect_accesses(root)
            .into_iter()
            .filter(|a| self.sub_ast.map_or(true, |r| index.is_ancestor(r, a.stmt)))
            .filter(|a| self.access_filter.as_ref().map_or(true, |f| f(a)))
            .collect();
        let sub_depth = self.sub_ast.map_or(0, |r| index.enclosing_loops(r).len());

        let mut groups: Vec<Vec<Rc<AccessPoint>>> = Vec::new();
        let mut group_of: HashMap<(Option<ID>, String), usize> = HashMap::new();
        for a in accesses {
            let key = (a.def, a.var.clone());
            let g = *group_of.entry(key).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[g].push(a);
        }

        let unconstrained = vec![Vec::new()];
        let directions = if self.directions.is_empty() { &unconstrained } else { &self.directions };
        for dir in directions {
            let dir: FindDepsDir = dir
                .iter()
                .filter(|(id, _)| {
                    let is_loop = index.get(*id).map_or(false, |s| s.is_for());
                    if !is_loop {
                        warn!("direction on {} ignored: not a loop of this tree", id);
                    }
                    is_loop
                })
                .cloned()
                .collect();
            let mut query = Query { ctx, index: &index, dir: &dir, sub_depth, maps: HashMap::new() };
            for group in &groups {
                for earlier in group {
                    if !self.earlier_filter.as_ref().map_or(true, |f| f(earlier)) {
                        continue;
                    }
                    for later in group {
                        if !self.later_filter.as_ref().map_or(true, |f| f(later)) {
                            continue;
                        }
                        let kind = self.pair_kind(earlier, later);
                        if kind.is_empty() {
                            continue;
                        }
                        if !self.pair_filter.as_ref().map_or(true, |f| f(later, earlier)) {
                            continue;
                        }
                        if !query.conflicts(earlier, later) {
                            continue;
                        }
                        let dep = Dependency {
                            var: earlier.var.clone(),
                            def: earlier.def,
                            earlier: earlier.clone(),
                            later: later.clone(),
                            kind,
                            direction: dir.clone(),
                        };
                        debug!("found {}", dep);
                        if !on_found(&dep) {
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// State of one direction constraint: access maps are cached per access.
struct Query<'q, 'c> {
    ctx: &'c PBCtx,
    index: &'q TreeIndex,
    dir: &'q FindDepsDir,
    sub_depth: usize,
    maps: HashMap<usize, PBMap<'c>>,
}

impl<'q, 'c> Query<'q, 'c> {
    /// Position of each direction loop in the iteration vector of `a`, and
    /// the pins of the loops not enclosing `a`.
    fn layout(&self, a: &AccessPoint) -> (Vec<usize>, Vec<Pin>) {
        let mut pos = Vec::new();
        let mut pins = Vec::new();
        for (id, _) in self.dir {
            if let Some(j) = a.loops.iter().position(|l| l.id == *id) {
                pos.push(j);
                continue;
            }
            pos.push(a.loops.len() + pins.len());
            let before = match (self.index.order(a.stmt), self.index.order(*id)) {
                (Some(x), Some(y)) => x < y,
                _ => true,
            };
            if before {
                pins.push(Pin::First);
                continue;
            }
            pins.push(Pin::Last(self.pinned_len(a, *id)));
        }
        (pos, pins)
    }

    /// Trip count of loop `id` if it can be evaluated where `a` runs.
    fn pinned_len(&self, a: &AccessPoint, id: ID) -> Option<crate::ast::Expr> {
        let len = match &self.index.get(id)?.kind {
            StmtKind::For { len, .. } => len.clone(),
            _ => return None,
        };
        let mut used = Vec::new();
        vars_of(&len, &mut used);
        for outer in self.index.enclosing_loops(id) {
            if a.loops.iter().any(|l| l.id == outer) {
                continue;
            }
            if let Some(StmtKind::For { iter, .. }) = self.index.get(outer).map(|s| &s.kind) {
                if used.contains(iter) {
                    return None;
                }
            }
        }
        Some(len)
    }

    fn access_map(&mut self, a: &AccessPoint) -> PBMap<'c> {
        if let Some(m) = self.maps.get(&a.pos) {
            return m.clone();
        }
        let (_, pins) = self.layout(a);
        let m = build_access_map(self.ctx, a, &pins);
        self.maps.insert(a.pos, m.clone());
        m
    }

    fn conflicts(&mut self, earlier: &AccessPoint, later: &AccessPoint) -> bool {
        if earlier.indices.len() != later.indices.len() {
            // inconsistent use of one variable; assume the worst
            return true;
        }
        let (e_pos, e_pins) = self.layout(earlier);
        let (l_pos, l_pins) = self.layout(later);
        let common = earlier.common_depth(later);

        let mut b = PBMapBuilder::new();
        let lv: Vec<PBBuildExpr> =
            (0..later.loops.len() + l_pins.len()).map(|i| b.new_input(&format!("l{}", i))).collect();
        let ev: Vec<PBBuildExpr> =
            (0..earlier.loops.len() + e_pins.len()).map(|i| b.new_output(&format!("e{}", i))).collect();
        let same = |j: usize| lv[j].clone().eq(ev[j].clone());

        let mut order = PBBuildExpr::Bool(false);
        for d in 0..common {
            let term = PBBuildExpr::all((0..d).map(same)).and(ev[d].clone().lt(lv[d].clone()));
            order = order.or(term);
        }
        if earlier.pos < later.pos {
            order = order.or(PBBuildExpr::all((0..common).map(same)));
        }
        if order == PBBuildExpr::Bool(false) {
            return false;
        }
        b.add_constraint(order);

        let scope_depth = if earlier.def.is_some() { earlier.def_depth } else { 0 };
        for j in 0..common {
            let no_deps = earlier.loops[j].no_deps.contains(&earlier.var);
            if j < scope_depth || j < self.sub_depth || no_deps {
                b.add_constraint(same(j));
            }
        }
        for (k, (_, dir)) in self.dir.iter().enumerate() {
            let (l, e) = (lv[l_pos[k]].clone(), ev[e_pos[k]].clone());
            match dir {
                DepDirection::Same => b.add_constraint(l.eq(e)),
                DepDirection::Different => b.add_constraint(l.ne(e)),
                DepDirection::Inv => b.add_constraint(l.lt(e)),
                DepDirection::Normal => {}
            }
        }
        let order = b.build(self.ctx);

        let lm = self.access_map(later);
        let em = self.access_map(earlier);
        let pairs = lm.apply_range(ops::reverse(&em));
        !pairs.intersect(order).is_empty()
    }
}

fn counter_value(begin: PBBuildExpr, step: BigInt, k: PBBuildExpr) -> PBBuildExpr {
    let scaled = if step.is_one() { k } else { k * PBBuildExpr::Int(step) };
    match begin {
        PBBuildExpr::Int(b) if b.is_zero() => scaled,
        begin => begin + scaled,
    }
}

fn build_access_map<'c>(ctx: &'c PBCtx, a: &AccessPoint, pins: &[Pin]) -> PBMap<'c> {
    let mut b = PBMapBuilder::new();
    let n = a.loops.len();
    let ks: Vec<PBBuildExpr> = (0..n + pins.len()).map(|i| b.new_input(&format!("k{}", i))).collect();
    let mut l = Lowering::new(&mut b);
    for j in 0..=n {
        for c in a.conds.iter().filter(|c| c.depth == j) {
            if let Some(p) = l.cond(&c.cond, c.negated) {
                l.builder().add_constraint(p);
            }
        }
        if j == n {
            break;
        }
        let lp = &a.loops[j];
        let k = ks[j].clone();
        l.builder().add_constraint(k.clone().ge(0));
        if let Some(len) = l.int(&lp.len) {
            l.builder().add_constraint(k.clone().lt(len));
        }
        let value = match (l.int(&lp.begin), l.int(&lp.step)) {
            (Some(begin), Some(PBBuildExpr::Int(step))) => counter_value(begin, step, k),
            // unknown iteration values: leave the iterator free
            _ => l.builder().new_var(""),
        };
        l.bind(&lp.iter, value);
    }
    for (pin, k) in pins.iter().zip(&ks[n..]) {
        match pin {
            Pin::First => l.builder().add_constraint(k.clone().eq(0)),
            Pin::Last(len) => {
                l.builder().add_constraint(k.clone().ge(0));
                if let Some(len) = len.as_ref().and_then(|e| l.int(e)) {
                    l.builder().add_constraint(k.clone().eq(len - 1));
                }
            }
        }
    }
    for (d, idx) in a.indices.iter().enumerate() {
        match l.int(idx) {
            Some(v) => l.builder().add_output(v),
            None => {
                let o = l.builder().new_output("");
                l.builder().add_constraint(o.clone().ge(0));
                if let Some(size) = a.shape.get(d).and_then(|s| l.int(s)) {
                    l.builder().add_constraint(o.lt(size));
                }
            }
        }
    }
    b.build(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::expr::{add, gt, int, load, mul, sub, var};
    use crate::ast::stmt::{for_range, if_then, reduce_to, seq, store, var_def};
    use crate::ast::{AccessType, Buffer, DataType, ReduceOp};

    fn buffer(shape: Vec<crate::ast::Expr>) -> Buffer {
        Buffer::new(shape, DataType::Int32, AccessType::InOut)
    }

    /// `for i in 0..4 { for j in 0..4 { a[i][j] = a[i][j - 1] + 1 } }`
    fn carried_on_j() -> (Stmt, ID, ID) {
        let body = if_then(
            gt(var("j"), int(0)),
            store(
                "a",
                vec![var("i"), var("j")],
                add(load("a", vec![var("i"), sub(var("j"), int(1))]), int(1)),
            ),
        );
        let lj = for_range("j", int(0), int(4), body);
        let li = for_range("i", int(0), int(4), lj.clone());
        (var_def("a", buffer(vec![int(4), int(4)]), li.clone()), li.id, lj.id)
    }

    #[test]
    fn test_carried_dependence() {
        let ctx = PBCtx::new();
        let (ast, li, lj) = carried_on_j();
        // carried by j within one iteration of i
        assert!(FindDeps::new()
            .direction(vec![(li, DepDirection::Same), (lj, DepDirection::Different)])
            .exists(&ctx, &ast));
        // not carried by i
        assert!(!FindDeps::new().direction(vec![(li, DepDirection::Different)]).exists(&ctx, &ast));
        // interchanging keeps every pair in order
        assert!(!FindDeps::new().direction(vec![(lj, DepDirection::Inv)]).exists(&ctx, &ast));
        let deps = FindDeps::new().kinds(DepKind::RAW).collect(&ctx, &ast);
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].var, "a");
        assert!(deps[0].description().contains("RAW"));
    }

    #[test]
    fn test_reversal_detected() {
        // a[i][j] = a[i - 1][j + 1]: interchange reverses it
        let ctx = PBCtx::new();
        let s = store(
            "a",
            vec![var("i"), var("j")],
            load("a", vec![sub(var("i"), int(1)), add(var("j"), int(1))]),
        );
        let lj = for_range("j", int(1), int(8), s);
        let li = for_range("i", int(1), int(8), lj.clone());
        let ast = var_def("a", buffer(vec![int(9), int(9)]), li.clone());
        assert!(FindDeps::new().direction(vec![(lj.id, DepDirection::Inv)]).exists(&ctx, &ast));
        assert!(!FindDeps::new()
            .direction(vec![(li.id, DepDirection::Same), (lj.id, DepDirection::Inv)])
            .exists(&ctx, &ast));
    }

    #[test]
    fn test_independent_statements() {
        let ctx = PBCtx::new();
        let x = store("x", vec![], int(1));
        let y = store("y", vec![], add(load("x", vec![]), int(1)));
        let ast = seq(vec![x.clone(), y.clone()]);
        assert!(FindDeps::new().exists(&ctx, &ast));
        let z = store("z", vec![], int(2));
        let ast = seq(vec![x, z]);
        assert!(!FindDeps::new().exists(&ctx, &ast));
    }

    #[test]
    fn test_scope_and_reductions() {
        let ctx = PBCtx::new();
        // a scalar defined inside the loop does not carry anything
        let inner = var_def(
            "t",
            buffer(vec![]),
            seq(vec![
                store("t", vec![], var("i")),
                store("b", vec![var("i")], load("t", vec![])),
            ]),
        );
        let li = for_range("i", int(0), var("N"), inner);
        let ast = var_def("b", buffer(vec![var("N")]), li.clone());
        assert!(!FindDeps::new().direction(vec![(li.id, DepDirection::Different)]).exists(&ctx, &ast));

        // sum reductions commute
        let red = for_range("i", int(0), int(8), reduce_to("s", vec![], ReduceOp::Add, load("a", vec![var("i")])));
        assert!(!FindDeps::new().direction(vec![(red.id, DepDirection::Different)]).exists(&ctx, &red));
        assert!(FindDeps::new()
            .ignore_reduction_waw(false)
            .direction(vec![(red.id, DepDirection::Different)])
            .exists(&ctx, &red));
    }

    #[test]
    fn test_non_affine_index_is_conservative() {
        let ctx = PBCtx::new();
        let s = store("a", vec![mul(var("i"), var("i"))], load("a", vec![var("i")]));
        let l = for_range("i", int(0), int(4), s);
        let ast = var_def("a", buffer(vec![int(16)]), l.clone());
        assert!(FindDeps::new().direction(vec![(l.id, DepDirection::Different)]).exists(&ctx, &ast));
    }

    #[test]
    fn test_filters() {
        let ctx = PBCtx::new();
        let (ast, _, lj) = carried_on_j();
        assert!(!FindDeps::new().kinds(DepKind::WAW).exists(&ctx, &ast));
        assert!(!FindDeps::new().filter_access(|a| a.var != "a").exists(&ctx, &ast));
        assert!(FindDeps::new().filter_sub_ast(lj).exists(&ctx, &ast));
        // inside one iteration of j nothing conflicts
        assert!(!FindDeps::new().filter_sub_ast(lj).direction(vec![(lj, DepDirection::Same)]).exists(&ctx, &ast));
    }
}
