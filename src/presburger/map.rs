//! Integer relations between an input and an output tuple.

use super::basic::{BasicSet, LexOpt};
use super::linear::{Constraint, LinExpr};
use super::point::PBPoint;
use super::relation::Relation;
use super::set::PBSet;
use super::space::PBSpace;
use super::{parser, PBCtx};
use crate::utils::errors::{PresburgerError, PresburgerErrorKind};
use std::fmt;
use std::rc::Rc;

/// A relation `{ [in] -> [out] : ... }` over shared parameters.
#[derive(Clone)]
pub struct PBMap<'c> {
    ctx: &'c PBCtx,
    rel: Rc<Relation>,
}

impl<'c> PBMap<'c> {
    pub(crate) fn from_relation(ctx: &'c PBCtx, rel: Relation) -> Self {
        debug_assert!(!rel.space.is_set());
        Self { ctx, rel: Rc::new(rel) }
    }

    pub(crate) fn relation(&self) -> &Relation {
        &self.rel
    }

    fn check_ctx(&self, other: &PBCtx) {
        assert!(self.ctx.same(other), "combining objects of different contexts");
    }

    /// Parse a map from its text form.
    pub fn parse(ctx: &'c PBCtx, text: &str) -> Result<Self, PresburgerError> {
        let rel = parser::parse(text)?;
        if rel.space.is_set() {
            return Err(PresburgerError::new(
                PresburgerErrorKind::Unsupported,
                0,
                format!("expected a map, found a set in `{}`", text),
            ));
        }
        ctx.record("parse", rel.n_basic());
        Ok(Self::from_relation(ctx, rel))
    }

    pub fn universe(ctx: &'c PBCtx, space: PBSpace) -> Self {
        Self::from_relation(ctx, Relation::universe(space))
    }

    pub fn empty(ctx: &'c PBCtx, space: PBSpace) -> Self {
        Self::from_relation(ctx, Relation::empty(space))
    }

    /// `{ [x] -> [x] }` over a space with equal input and output arity.
    pub fn identity(ctx: &'c PBCtx, space: PBSpace) -> Self {
        assert_eq!(space.n_in(), space.n_out(), "identity needs equal arities");
        let np = space.n_param();
        let n = space.n_in();
        let mut b = BasicSet::universe(space.n_fixed());
        for k in 0..n {
            let cols = space.n_fixed();
            let e = LinExpr::var(cols, np + k) - LinExpr::var(cols, np + n + k);
            b.add_constraint(Constraint::eq_zero(e));
        }
        Self::from_relation(ctx, Relation { space, parts: vec![b] })
    }

    /// `{ [x] -> [y] : x <<= y }` (or `x << y` when `strict`): lexicographic
    /// order over the first `n` dimensions of both tuples.
    pub fn lex_le(ctx: &'c PBCtx, space: PBSpace, n: usize, strict: bool) -> Self {
        assert!(n <= space.n_in() && n <= space.n_out(), "lexicographic order too long");
        let np = space.n_param();
        let n_in = space.n_in();
        let cols = space.n_fixed();
        let x = |k: usize| LinExpr::var(cols, np + k);
        let y = |k: usize| LinExpr::var(cols, np + n_in + k);
        let mut parts = Vec::new();
        for k in 0..n {
            let mut b = BasicSet::universe(cols);
            for j in 0..k {
                b.add_constraint(Constraint::eq(x(j), y(j)));
            }
            let mut lt = y(k) - x(k);
            lt.constant -= 1;
            b.add_constraint(Constraint::ge_zero(lt));
            parts.push(b);
        }
        if !strict {
            let mut b = BasicSet::universe(cols);
            for j in 0..n {
                b.add_constraint(Constraint::eq(x(j), y(j)));
            }
            parts.push(b);
        }
        Self::from_relation(ctx, Relation { space, parts })
    }

    pub fn ctx(&self) -> &'c PBCtx {
        self.ctx
    }

    pub fn space(&self) -> &PBSpace {
        &self.rel.space
    }

    pub fn n_in(&self) -> usize {
        self.rel.space.n_in()
    }

    pub fn n_out(&self) -> usize {
        self.rel.space.n_out()
    }

    pub fn n_basic_map(&self) -> usize {
        self.rel.n_basic()
    }

    fn binary(self, other: PBMap<'c>, op: &'static str, f: impl Fn(&Relation, &Relation) -> Relation) -> Self {
        self.check_ctx(other.ctx);
        self.ctx.record(op, self.n_basic_map() + other.n_basic_map());
        Self { ctx: self.ctx, rel: Rc::new(f(&self.rel, &other.rel)) }
    }

    pub fn intersect(self, other: PBMap<'c>) -> Self {
        self.binary(other, "intersect", Relation::intersect)
    }

    pub fn union(self, other: PBMap<'c>) -> Self {
        self.binary(other, "union", Relation::union)
    }

    pub fn subtract(self, other: PBMap<'c>) -> Self {
        self.binary(other, "subtract", Relation::subtract)
    }

    /// Composition: `self` then `other`.
    pub fn apply_range(self, other: PBMap<'c>) -> Self {
        self.binary(other, "apply_range", Relation::apply_range)
    }

    /// Composition: `other` then `self`.
    pub fn apply_domain(self, other: PBMap<'c>) -> Self {
        other.apply_range(self)
    }

    pub fn complement(self) -> Self {
        self.ctx.record("complement", self.n_basic_map());
        Self { ctx: self.ctx, rel: Rc::new(self.rel.complement()) }
    }

    pub fn reverse(self) -> Self {
        self.ctx.record("reverse", self.n_basic_map());
        Self { ctx: self.ctx, rel: Rc::new(self.rel.reverse()) }
    }

    pub fn domain(self) -> PBSet<'c> {
        self.ctx.record("domain", self.n_basic_map());
        PBSet::from_relation(self.ctx, self.rel.domain())
    }

    pub fn range(self) -> PBSet<'c> {
        self.ctx.record("range", self.n_basic_map());
        PBSet::from_relation(self.ctx, self.rel.range())
    }

    pub fn intersect_domain(self, set: PBSet<'c>) -> Self {
        self.check_ctx(set.ctx());
        self.ctx.record("intersect_domain", self.n_basic_map() + set.n_basic_set());
        Self { ctx: self.ctx, rel: Rc::new(self.rel.intersect_domain(set.relation())) }
    }

    pub fn intersect_range(self, set: PBSet<'c>) -> Self {
        self.check_ctx(set.ctx());
        self.ctx.record("intersect_range", self.n_basic_map() + set.n_basic_set());
        Self { ctx: self.ctx, rel: Rc::new(self.rel.intersect_range(set.relation())) }
    }

    pub fn is_empty(&self) -> bool {
        self.ctx.record("is_empty", self.n_basic_map());
        self.rel.is_empty()
    }

    pub fn is_subset(&self, other: &PBMap<'c>) -> bool {
        self.check_ctx(other.ctx);
        self.ctx.record("is_subset", self.n_basic_map() + other.n_basic_map());
        self.rel.is_subset(&other.rel)
    }

    pub fn is_equal(&self, other: &PBMap<'c>) -> bool {
        self.check_ctx(other.ctx);
        self.ctx.record("is_equal", self.n_basic_map() + other.n_basic_map());
        self.rel.is_equal(&other.rel)
    }

    /// The map as a set over `[in..., out...]`.
    pub fn wrap(&self) -> PBSet<'c> {
        let mut rel = (*self.rel).clone();
        let mut dims = rel.space.input.take().unwrap_or_default().dims;
        dims.extend(rel.space.output.dims.iter().cloned());
        rel.space.output.dims = dims;
        rel.space.output.name = None;
        PBSet::from_relation(self.ctx, rel)
    }

    fn lexopt(&self, max: bool) -> Option<PBPoint<'c>> {
        self.ctx.record(if max { "lexmax" } else { "lexmin" }, self.n_basic_map());
        match self.rel.lexopt(max) {
            LexOpt::Unbounded => None,
            LexOpt::Empty => Some(PBPoint::void(self.ctx, self.space().clone())),
            LexOpt::Point(p) => Some(PBPoint::new(self.ctx, self.space().clone(), p)),
        }
    }

    /// Lexicographically smallest `[params..., in..., out...]`.
    pub fn lexmin(&self) -> Option<PBPoint<'c>> {
        self.lexopt(false)
    }

    pub fn lexmax(&self) -> Option<PBPoint<'c>> {
        self.lexopt(true)
    }

    pub fn sample(&self) -> PBPoint<'c> {
        self.ctx.record("sample", self.n_basic_map());
        match self.rel.sample() {
            Some(p) => PBPoint::new(self.ctx, self.space().clone(), p),
            None => PBPoint::void(self.ctx, self.space().clone()),
        }
    }

    /// Existentially quantify `n` output dimensions from `first`, in place.
    pub fn project_out_output(&mut self, first: usize, n: usize) {
        self.ctx.record("project_out", self.n_basic_map());
        let projected = self.rel.project_out(first, n);
        *Rc::make_mut(&mut self.rel) = projected;
    }
}

impl fmt::Display for PBMap<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.rel)
    }
}

impl fmt::Debug for PBMap<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PBMap({})", self.rel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigInt;

    fn ints(v: &[i64]) -> Vec<BigInt> {
        v.iter().map(|&x| BigInt::from(x)).collect()
    }

    #[test]
    fn test_reverse_domain_range() {
        let ctx = PBCtx::new();
        let m = PBMap::parse(&ctx, "{ [i] -> [j] : 0 <= i < 4 and j = i + 10 }").unwrap();
        let r = m.clone().reverse();
        assert!(r.relation().contains(&ints(&[12, 2])));
        let dom = PBSet::parse(&ctx, "{ [i] : 0 <= i < 4 }").unwrap();
        let ran = PBSet::parse(&ctx, "{ [j] : 10 <= j < 14 }").unwrap();
        assert!(m.clone().domain().is_equal(&dom));
        assert!(m.range().is_equal(&ran));
    }

    #[test]
    fn test_apply_range_composes() {
        let ctx = PBCtx::new();
        let f = PBMap::parse(&ctx, "{ [i] -> [2i] }").unwrap();
        let g = PBMap::parse(&ctx, "{ [j] -> [j + 1] }").unwrap();
        let h = f.apply_range(g);
        let expected = PBMap::parse(&ctx, "{ [i] -> [2i + 1] }").unwrap();
        assert!(h.is_equal(&expected));
    }

    #[test]
    fn test_apply_set() {
        let ctx = PBCtx::new();
        let s = PBSet::parse(&ctx, "[N] -> { [i] : 0 <= i < N }").unwrap();
        let m = PBMap::parse(&ctx, "{ [i] -> [i, 3i] }").unwrap();
        let image = s.apply(m);
        assert_eq!(image.n_dim(), 2);
        assert!(image.contains(&ints(&[5, 4, 12])));
        assert!(!image.contains(&ints(&[5, 5, 15])));
    }

    #[test]
    fn test_self_dependence_pattern() {
        // write a[i][j], read a[i][j - 1], same i, later j
        let ctx = PBCtx::new();
        let w = PBMap::parse(&ctx, "{ [i, j] -> [i, j] : 0 <= i < 4 and 0 <= j < 4 }").unwrap();
        let r = PBMap::parse(&ctx, "{ [i, j] -> [i, j - 1] : 0 <= i < 4 and 1 <= j < 4 }").unwrap();
        let pairs = w.apply_range(r.reverse());
        let carried = PBMap::parse(&ctx, "{ [i0, j0] -> [i1, j1] : i1 = i0 and j1 > j0 }").unwrap();
        assert!(!pairs.clone().intersect(carried).is_empty());
        let inverse = PBMap::parse(&ctx, "{ [i0, j0] -> [i1, j1] : i1 = i0 and j1 < j0 }").unwrap();
        assert!(pairs.intersect(inverse).is_empty());
    }

    #[test]
    fn test_identity_and_lex_order() {
        let ctx = PBCtx::new();
        let space = PBSpace::map(
            Vec::new(),
            super::super::space::Tuple::new(["a", "b"]),
            super::super::space::Tuple::new(["c", "d"]),
        );
        let id = PBMap::identity(&ctx, space.clone());
        assert!(id.relation().contains(&ints(&[1, 2, 1, 2])));
        let lt = PBMap::lex_le(&ctx, space.clone(), 2, true);
        assert!(lt.relation().contains(&ints(&[1, 5, 2, 0])));
        assert!(!lt.relation().contains(&ints(&[1, 2, 1, 2])));
        let le = PBMap::lex_le(&ctx, space, 2, false);
        assert!(id.is_subset(&le));
    }

    #[test]
    fn test_wrap_and_lexmin() {
        let ctx = PBCtx::new();
        let m = PBMap::parse(&ctx, "{ [i] -> [j] : 0 <= i < 3 and i < j < 5 }").unwrap();
        assert_eq!(m.wrap().n_dim(), 2);
        assert_eq!(m.lexmin().unwrap().coords(), ints(&[0, 1]).as_slice());
    }
}
