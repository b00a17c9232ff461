//! Integer sets.

use super::basic::LexOpt;
use super::map::PBMap;
use super::point::PBPoint;
use super::relation::{DimBounds, Relation};
use super::space::{PBSpace, Tuple};
use super::{parser, PBCtx};
use crate::utils::errors::{PresburgerError, PresburgerErrorKind};
use num_bigint::BigInt;
use std::fmt;
use std::rc::Rc;

/// A set of integer tuples: a union of conjunctions of quasi-affine
/// constraints over parameters and set dimensions.
///
/// Cloning shares the representation; methods taking `self` consume the
/// handle, and in-place operations copy only when the representation is
/// shared.
#[derive(Clone)]
pub struct PBSet<'c> {
    ctx: &'c PBCtx,
    rel: Rc<Relation>,
}

impl<'c> PBSet<'c> {
    pub(crate) fn from_relation(ctx: &'c PBCtx, rel: Relation) -> Self {
        debug_assert!(rel.space.is_set());
        Self { ctx, rel: Rc::new(rel) }
    }

    pub(crate) fn relation(&self) -> &Relation {
        &self.rel
    }

    fn check_ctx(&self, other: &PBCtx) {
        assert!(self.ctx.same(other), "combining objects of different contexts");
    }

    /// Parse a set from its text form.
    pub fn parse(ctx: &'c PBCtx, text: &str) -> Result<Self, PresburgerError> {
        let rel = parser::parse(text)?;
        if !rel.space.is_set() {
            return Err(PresburgerError::new(
                PresburgerErrorKind::Unsupported,
                0,
                format!("expected a set, found a map in `{}`", text),
            ));
        }
        ctx.record("parse", rel.n_basic());
        Ok(Self::from_relation(ctx, rel))
    }

    /// All points of a space.
    pub fn universe(ctx: &'c PBCtx, space: PBSpace) -> Self {
        Self::from_relation(ctx, Relation::universe(space))
    }

    /// No points.
    pub fn empty(ctx: &'c PBCtx, space: PBSpace) -> Self {
        Self::from_relation(ctx, Relation::empty(space))
    }

    pub fn ctx(&self) -> &'c PBCtx {
        self.ctx
    }

    pub fn space(&self) -> &PBSpace {
        &self.rel.space
    }

    pub fn n_dim(&self) -> usize {
        self.rel.space.n_out()
    }

    pub fn n_param(&self) -> usize {
        self.rel.space.n_param()
    }

    /// Number of basic sets in the union.
    pub fn n_basic_set(&self) -> usize {
        self.rel.n_basic()
    }

    fn binary(self, other: PBSet<'c>, op: &'static str, f: impl Fn(&Relation, &Relation) -> Relation) -> Self {
        self.check_ctx(other.ctx);
        self.ctx.record(op, self.n_basic_set() + other.n_basic_set());
        Self { ctx: self.ctx, rel: Rc::new(f(&self.rel, &other.rel)) }
    }

    pub fn intersect(self, other: PBSet<'c>) -> Self {
        self.binary(other, "intersect", Relation::intersect)
    }

    pub fn union(self, other: PBSet<'c>) -> Self {
        self.binary(other, "union", Relation::union)
    }

    pub fn subtract(self, other: PBSet<'c>) -> Self {
        self.binary(other, "subtract", Relation::subtract)
    }

    pub fn complement(self) -> Self {
        self.ctx.record("complement", self.n_basic_set());
        Self { ctx: self.ctx, rel: Rc::new(self.rel.complement()) }
    }

    /// Image of the set under a map.
    pub fn apply(self, map: PBMap<'c>) -> Self {
        self.check_ctx(map.ctx());
        self.ctx.record("apply", self.n_basic_set() + map.n_basic_map());
        Self { ctx: self.ctx, rel: Rc::new(self.rel.apply(map.relation())) }
    }

    pub fn is_empty(&self) -> bool {
        self.ctx.record("is_empty", self.n_basic_set());
        self.rel.is_empty()
    }

    pub fn is_subset(&self, other: &PBSet<'c>) -> bool {
        self.check_ctx(other.ctx);
        self.ctx.record("is_subset", self.n_basic_set() + other.n_basic_set());
        self.rel.is_subset(&other.rel)
    }

    pub fn is_equal(&self, other: &PBSet<'c>) -> bool {
        self.check_ctx(other.ctx);
        self.ctx.record("is_equal", self.n_basic_set() + other.n_basic_set());
        self.rel.is_equal(&other.rel)
    }

    /// Membership of a point given as `[params..., dims...]`.
    pub fn contains(&self, point: &[BigInt]) -> bool {
        self.rel.contains(point)
    }

    fn lexopt(&self, max: bool) -> Option<PBPoint<'c>> {
        self.ctx.record(if max { "lexmax" } else { "lexmin" }, self.n_basic_set());
        match self.rel.lexopt(max) {
            LexOpt::Unbounded => None,
            LexOpt::Empty => Some(PBPoint::void(self.ctx, self.space().clone())),
            LexOpt::Point(p) => Some(PBPoint::new(self.ctx, self.space().clone(), p)),
        }
    }

    /// Lexicographically smallest point over `[params..., dims...]`. `None`
    /// when unbounded below; a void point when empty.
    pub fn lexmin(&self) -> Option<PBPoint<'c>> {
        self.lexopt(false)
    }

    /// Lexicographically largest point; see [`PBSet::lexmin`].
    pub fn lexmax(&self) -> Option<PBPoint<'c>> {
        self.lexopt(true)
    }

    /// Some point of the set, or a void point.
    pub fn sample(&self) -> PBPoint<'c> {
        self.ctx.record("sample", self.n_basic_set());
        match self.rel.sample() {
            Some(p) => PBPoint::new(self.ctx, self.space().clone(), p),
            None => PBPoint::void(self.ctx, self.space().clone()),
        }
    }

    /// Set of `[c_cst, c_params..., c_dims...]` such that
    /// `c_cst + c . x >= 0` on every point `x` of the rational relaxation.
    pub fn coefficients(&self) -> PBSet<'c> {
        self.ctx.record("coefficients", self.n_basic_set());
        Self::from_relation(self.ctx, self.rel.coefficients())
    }

    /// Symbolic bounds of dimension `dim`, one entry per basic set.
    pub fn bounds_of(&self, dim: usize) -> Vec<DimBounds> {
        self.ctx.record("bounds_of", self.n_basic_set());
        self.rel.dim_bounds(dim)
    }

    /// Existentially quantify `n` dimensions from `first`, in place.
    pub fn project_out(&mut self, first: usize, n: usize) {
        self.ctx.record("project_out", self.n_basic_set());
        let projected = self.rel.project_out(first, n);
        *Rc::make_mut(&mut self.rel) = projected;
    }

    /// Move dimension `from` to position `to`, in place.
    pub fn move_dim(&mut self, from: usize, to: usize) {
        let n = self.n_dim();
        assert!(from < n && to < n, "dimension out of range");
        let np = self.n_param();
        let mut order: Vec<usize> = (0..n).collect();
        let d = order.remove(from);
        order.insert(to, d);
        let perm: Vec<usize> = (0..np).chain(order.iter().map(|&d| np + d)).collect();
        let rel = Rc::make_mut(&mut self.rel);
        for b in &mut rel.parts {
            b.permute_fixed(&perm);
        }
        let dims = order.iter().map(|&d| rel.space.output.dims[d].clone()).collect();
        rel.space.output.dims = dims;
    }

    /// Rename the set tuple, in place.
    pub fn set_tuple(&mut self, tuple: Tuple) {
        assert_eq!(tuple.len(), self.n_dim(), "tuple arity mismatch");
        Rc::make_mut(&mut self.rel).space.output = tuple;
    }

    /// Drop basic sets that are empty, in place.
    pub fn coalesce(&mut self) {
        self.ctx.record("coalesce", self.n_basic_set());
        Rc::make_mut(&mut self.rel).remove_empty_parts();
    }
}

impl fmt::Display for PBSet<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.rel)
    }
}

impl fmt::Debug for PBSet<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PBSet({})", self.rel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(v: &[i64]) -> Vec<BigInt> {
        v.iter().map(|&x| BigInt::from(x)).collect()
    }

    #[test]
    fn test_set_algebra() {
        let ctx = PBCtx::new();
        let a = PBSet::parse(&ctx, "{ [i] : 0 <= i < 10 }").unwrap();
        let evens = PBSet::parse(&ctx, "{ [i] : exists (e : i = 2e) }").unwrap();
        let odd = a.clone().subtract(evens.clone());
        let expected = PBSet::parse(&ctx, "{ [i] : 0 <= i < 10 and i mod 2 = 1 }").unwrap();
        assert!(odd.is_equal(&expected));
        assert!(odd.clone().intersect(evens.clone()).is_empty());
        assert!(odd.union(evens.intersect(a.clone())).is_equal(&a));
    }

    #[test]
    fn test_complement() {
        let ctx = PBCtx::new();
        let a = PBSet::parse(&ctx, "[N] -> { [i] : 0 <= i < N }").unwrap();
        let c = a.clone().complement();
        assert!(c.contains(&ints(&[5, 5])));
        assert!(c.contains(&ints(&[5, -1])));
        assert!(!c.contains(&ints(&[5, 4])));
        assert!(c.intersect(a).is_empty());
    }

    #[test]
    fn test_params_are_aligned_by_name() {
        let ctx = PBCtx::new();
        let a = PBSet::parse(&ctx, "[N] -> { [i] : i < N }").unwrap();
        let b = PBSet::parse(&ctx, "[M, N] -> { [i] : i >= M and N = 4 }").unwrap();
        let both = a.intersect(b);
        assert_eq!(both.space().params, vec!["N", "M"]);
        assert!(both.contains(&ints(&[4, 1, 3])));
        assert!(!both.contains(&ints(&[4, 1, 4])));
    }

    #[test]
    fn test_lexmin_lexmax() {
        let ctx = PBCtx::new();
        let s = PBSet::parse(&ctx, "{ [i, j] : 0 <= i < 3 and i <= j < 5 and j mod 2 = 1 }").unwrap();
        assert_eq!(s.lexmin().unwrap().coords(), ints(&[0, 1]).as_slice());
        assert_eq!(s.lexmax().unwrap().coords(), ints(&[2, 3]).as_slice());
        let unbounded = PBSet::parse(&ctx, "{ [i] : i <= 3 }").unwrap();
        assert!(unbounded.lexmin().is_none());
        let empty = PBSet::parse(&ctx, "{ [i] : i > 3 and i < 2 }").unwrap();
        assert!(empty.lexmin().unwrap().is_void());
        assert!(empty.sample().is_void());
    }

    #[test]
    fn test_display_round_trip() {
        let ctx = PBCtx::new();
        for text in [
            "[N] -> { [i, j] : 0 <= i < N and j = floor(i / 3) }",
            "{ [i] : exists (e : i = 3e + 1) and 0 <= i <= 20 }",
            "{ [i] : i < 0 or i > 10 }",
            "{ S[i] : false }",
        ] {
            let s = PBSet::parse(&ctx, text).unwrap();
            let again = PBSet::parse(&ctx, &s.to_string()).unwrap();
            assert!(s.is_equal(&again), "{} vs {}", s, again);
        }
    }

    #[test]
    fn test_project_out_and_move_dim() {
        let ctx = PBCtx::new();
        let mut s = PBSet::parse(&ctx, "{ [i, j] : 0 <= i < 4 and j = 2i }").unwrap();
        let shared = s.clone();
        s.project_out(0, 1);
        assert_eq!(s.n_dim(), 1);
        assert_eq!(shared.n_dim(), 2);
        let evens = PBSet::parse(&ctx, "{ [j] : 0 <= j <= 6 and j mod 2 = 0 }").unwrap();
        assert!(s.is_equal(&evens));

        let mut t = shared.clone();
        t.move_dim(1, 0);
        assert!(t.contains(&ints(&[6, 3])));
        assert!(shared.contains(&ints(&[3, 6])));
    }

    #[test]
    fn test_coefficients_validate_bound() {
        let ctx = PBCtx::new();
        let s = PBSet::parse(&ctx, "[N] -> { [i] : 0 <= i < N }").unwrap();
        let coeffs = s.coefficients();
        // N - 1 - i >= 0 holds: c_cst = -1, c_N = 1, c_i = -1
        assert!(coeffs.contains(&ints(&[-1, 1, -1])));
        // N - 2 - i >= 0 does not
        assert!(!coeffs.contains(&ints(&[-2, 1, -1])));
    }

    #[test]
    fn test_bounds_of() {
        let ctx = PBCtx::new();
        let s = PBSet::parse(&ctx, "[N] -> { [i] : 2 <= i and 2i <= N }").unwrap();
        let b = &s.bounds_of(0)[0];
        assert_eq!(b.lower.len(), 1);
        assert_eq!(b.lower[0].expr.constant, BigInt::from(2));
        assert_eq!(b.upper[0].divisor, BigInt::from(2));
        assert_eq!(b.upper[0].expr.coeffs, ints(&[1]));
    }

    #[test]
    fn test_profile_hook() {
        let ctx = PBCtx::with_profiling(true);
        let s = PBSet::parse(&ctx, "{ [i] : i = 1 or i = 2 }").unwrap();
        s.is_empty();
        s.is_empty();
        let p = ctx.profile()["is_empty"];
        assert_eq!(p.calls, 2);
        assert_eq!(p.basic_sets, 4);
    }

    #[test]
    #[should_panic(expected = "different contexts")]
    fn test_context_mismatch_panics() {
        let c1 = PBCtx::new();
        let c2 = PBCtx::new();
        let a = PBSet::parse(&c1, "{ [i] }").unwrap();
        let b = PBSet::parse(&c2, "{ [i] }").unwrap();
        let _ = a.intersect(b);
    }
}
