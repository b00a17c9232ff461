//! Unions of basic sets over one space: the shared core of sets and maps.

use super::basic::{BasicSet, LexOpt};
use super::linear::LinExpr;
use super::omega;
use super::space::{PBSpace, Tuple};
use num_bigint::BigInt;
use num_traits::{Signed, Zero};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Relation {
    pub space: PBSpace,
    pub parts: Vec<BasicSet>,
}

/// Lower, upper and residual constraints of one dimension, in terms of the
/// parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimBounds {
    /// `dim >= ceil(expr / divisor)` for every entry
    pub lower: Vec<SymbolicBound>,
    /// `dim <= floor(expr / divisor)` for every entry
    pub upper: Vec<SymbolicBound>,
    /// Constraints `expr >= 0` over the parameters alone
    pub cond: Vec<LinExpr>,
}

/// An affine function of the parameters divided by a positive constant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolicBound {
    /// Numerator over the parameter columns
    pub expr: LinExpr,
    /// Positive divisor
    pub divisor: BigInt,
}

impl Relation {
    pub fn universe(space: PBSpace) -> Self {
        let n = space.n_fixed();
        Self { space, parts: vec![BasicSet::universe(n)] }
    }

    pub fn empty(space: PBSpace) -> Self {
        Self { space, parts: Vec::new() }
    }

    pub fn n_basic(&self) -> usize {
        self.parts.len()
    }

    /// Re-express over `params`, which must contain every current parameter.
    fn with_params(&self, params: &[String]) -> Relation {
        if self.space.params == params {
            return self.clone();
        }
        let old = &self.space.params;
        let missing = params.len() - old.len();
        let mut perm = Vec::with_capacity(params.len() + self.space.n_dim());
        let mut next_new = old.len();
        for p in params {
            match old.iter().position(|o| o == p) {
                Some(j) => perm.push(j),
                None => {
                    perm.push(next_new);
                    next_new += 1;
                }
            }
        }
        perm.extend(params.len()..params.len() + self.space.n_dim());
        let parts = self
            .parts
            .iter()
            .map(|b| {
                let mut b = b.clone();
                b.insert_fixed(old.len(), missing);
                b.permute_fixed(&perm);
                b
            })
            .collect();
        let mut space = self.space.clone();
        space.params = params.to_vec();
        Relation { space, parts }
    }

    /// Bring two relations onto a common parameter list.
    pub fn align(a: &Relation, b: &Relation) -> (Relation, Relation) {
        let mut params = a.space.params.clone();
        for p in &b.space.params {
            if !params.contains(p) {
                params.push(p.clone());
            }
        }
        (a.with_params(&params), b.with_params(&params))
    }

    fn check_compatible(&self, other: &Relation) {
        assert!(
            self.space.is_compatible(&other.space),
            "incompatible spaces {} and {}",
            self.space,
            other.space
        );
    }

    pub fn intersect(&self, other: &Relation) -> Relation {
        self.check_compatible(other);
        let (a, b) = Relation::align(self, other);
        let mut parts = Vec::new();
        for x in &a.parts {
            for y in &b.parts {
                let mut z = x.intersect(y);
                if z.simplify() {
                    parts.push(z);
                }
            }
        }
        Relation { space: a.space, parts }
    }

    pub fn union(&self, other: &Relation) -> Relation {
        self.check_compatible(other);
        let (mut a, b) = Relation::align(self, other);
        a.parts.extend(b.parts);
        a
    }

    pub fn subtract(&self, other: &Relation) -> Relation {
        self.check_compatible(other);
        let (a, b) = Relation::align(self, other);
        let removed: Vec<BasicSet> = b.parts.iter().flat_map(BasicSet::resolve).collect();
        let mut parts = Vec::new();
        for x in &a.parts {
            let mut pieces = vec![x.clone()];
            for y in &removed {
                pieces = pieces.iter().flat_map(|p| p.subtract(y)).collect();
                if pieces.is_empty() {
                    break;
                }
            }
            parts.extend(pieces);
        }
        Relation { space: a.space, parts }
    }

    pub fn complement(&self) -> Relation {
        Relation::universe(self.space.clone()).subtract(self)
    }

    pub fn is_empty(&self) -> bool {
        self.parts.iter().all(BasicSet::is_empty)
    }

    pub fn is_subset(&self, other: &Relation) -> bool {
        self.subtract(other).is_empty()
    }

    pub fn is_equal(&self, other: &Relation) -> bool {
        self.is_subset(other) && other.is_subset(self)
    }

    /// Drop basic sets that are empty.
    pub fn remove_empty_parts(&mut self) {
        self.parts.retain(|b| !b.is_empty());
    }

    pub fn reverse(&self) -> Relation {
        let np = self.space.n_param();
        let (n_in, n_out) = (self.space.n_in(), self.space.n_out());
        let perm: Vec<usize> = (0..np)
            .chain(np + n_in..np + n_in + n_out)
            .chain(np..np + n_in)
            .collect();
        let parts = self
            .parts
            .iter()
            .map(|b| {
                let mut b = b.clone();
                b.permute_fixed(&perm);
                b
            })
            .collect();
        Relation { space: self.space.reversed(), parts }
    }

    /// Existentially quantify `n` fixed columns starting at `first`.
    fn quantify(&self, first: usize, n: usize, space: PBSpace) -> Relation {
        let parts = self
            .parts
            .iter()
            .map(|b| {
                let mut b = b.clone();
                b.fixed_to_locals(first, n);
                b
            })
            .collect();
        Relation { space, parts }
    }

    pub fn domain(&self) -> Relation {
        let first = self.space.n_param() + self.space.n_in();
        self.quantify(first, self.space.n_out(), self.space.domain())
    }

    pub fn range(&self) -> Relation {
        self.quantify(self.space.n_param(), self.space.n_in(), self.space.range())
    }

    /// Project out `n` output (set) dimensions starting at `first`.
    pub fn project_out(&self, first: usize, n: usize) -> Relation {
        assert!(first + n <= self.space.n_out(), "projecting out missing dimensions");
        let mut space = self.space.clone();
        space.output.dims.drain(first..first + n);
        let col = self.space.n_param() + self.space.n_in() + first;
        self.quantify(col, n, space)
    }

    /// Insert `n` unconstrained fixed columns at `at`.
    fn lift(&self, at: usize, n: usize, space: PBSpace) -> Relation {
        let parts = self
            .parts
            .iter()
            .map(|b| {
                let mut b = b.clone();
                b.insert_fixed(at, n);
                b
            })
            .collect();
        Relation { space, parts }
    }

    pub fn intersect_domain(&self, set: &Relation) -> Relation {
        assert_eq!(self.space.n_in(), set.space.n_out(), "domain arity mismatch");
        let (map, set) = Relation::align(self, set);
        let end = map.space.n_fixed();
        let lifted = set.lift(end - map.space.n_out(), map.space.n_out(), map.space.clone());
        map.intersect(&lifted)
    }

    pub fn intersect_range(&self, set: &Relation) -> Relation {
        assert_eq!(self.space.n_out(), set.space.n_out(), "range arity mismatch");
        let (map, set) = Relation::align(self, set);
        let np = map.space.n_param();
        let lifted = set.lift(np, map.space.n_in(), map.space.clone());
        map.intersect(&lifted)
    }

    /// Composition: `self: A -> B`, `other: B -> C` gives `A -> C`.
    pub fn apply_range(&self, other: &Relation) -> Relation {
        assert_eq!(self.space.n_out(), other.space.n_in(), "composition arity mismatch");
        let (first, second) = Relation::align(self, other);
        let np = first.space.n_param();
        let (na, nb, nc) = (first.space.n_in(), first.space.n_out(), second.space.n_out());
        let joint = PBSpace::map(
            first.space.params.clone(),
            first.space.input.clone().unwrap_or_default(),
            Tuple::anonymous("t", nb + nc),
        );
        let a = first.lift(np + na + nb, nc, joint.clone());
        let b = second.lift(np, na, joint);
        let both = a.intersect(&b);
        let space = PBSpace::map(
            first.space.params.clone(),
            first.space.input.clone().unwrap_or_default(),
            second.space.output.clone(),
        );
        both.quantify(np + na, nb, space)
    }

    pub fn apply(&self, map: &Relation) -> Relation {
        map.intersect_domain(self).range()
    }

    /// Lexicographic optimum over parameters then tuple dimensions.
    pub fn lexopt(&self, max: bool) -> LexOpt {
        let n = self.space.n_fixed();
        let mut best: Option<Vec<BigInt>> = None;
        for b in &self.parts {
            match b.lexopt(n, max) {
                LexOpt::Empty => {}
                LexOpt::Unbounded => return LexOpt::Unbounded,
                LexOpt::Point(p) => {
                    let better = match &best {
                        None => true,
                        Some(q) => (p < *q) != max && p != *q,
                    };
                    if better {
                        best = Some(p);
                    }
                }
            }
        }
        best.map_or(LexOpt::Empty, LexOpt::Point)
    }

    pub fn sample(&self) -> Option<Vec<BigInt>> {
        let n = self.space.n_fixed();
        self.parts.iter().find_map(|b| b.sample(n))
    }

    pub fn contains(&self, values: &[BigInt]) -> bool {
        self.parts.iter().any(|b| b.contains(values))
    }

    /// The set of `[c_cst, c_params..., c_dims...]` valid on every point.
    pub fn coefficients(&self) -> Relation {
        let names: Vec<String> = std::iter::once("c_cst".to_string())
            .chain(self.space.column_names().iter().map(|n| format!("c_{}", n)))
            .collect();
        let space = PBSpace::set(Vec::new(), Tuple::new(names));
        let mut result = Relation::universe(space.clone());
        for b in &self.parts {
            if b.is_empty() {
                continue;
            }
            let mut part = BasicSet::universe(space.n_fixed());
            for row in b.coefficients() {
                part.add_constraint(super::linear::Constraint::ge_zero(row));
            }
            result = result.intersect(&Relation { space: space.clone(), parts: vec![part] });
        }
        result
    }

    /// Rational bounds of set dimension `dim` in terms of the parameters, one
    /// entry per non-empty basic set.
    pub fn dim_bounds(&self, dim: usize) -> Vec<DimBounds> {
        let np = self.space.n_param();
        let col = np + self.space.n_in() + dim;
        let mut out = Vec::new();
        for b in &self.parts {
            if b.is_empty() {
                continue;
            }
            let mut keep = vec![false; b.n_cols()];
            keep[..np].iter_mut().for_each(|k| *k = true);
            keep[col] = true;
            let rows = omega::rational_project(&b.problem(), &keep);
            let mut bounds = DimBounds { lower: Vec::new(), upper: Vec::new(), cond: Vec::new() };
            for r in rows {
                let a = r.coeff(col).clone();
                let mut params = LinExpr::constant(np, r.constant.clone());
                for (i, c) in r.coeffs[..np].iter().enumerate() {
                    params.coeffs[i] = c.clone();
                }
                if a.is_zero() {
                    bounds.cond.push(params);
                } else if a.is_positive() {
                    bounds.lower.push(SymbolicBound { expr: -params, divisor: a });
                } else {
                    bounds.upper.push(SymbolicBound { expr: params, divisor: -a });
                }
            }
            out.push(bounds);
        }
        out
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let space = self.space.disambiguated();
        if !space.params.is_empty() {
            write!(f, "[{}] -> ", space.params.join(", "))?;
        }
        let tuple = match &space.input {
            Some(input) => format!("{} -> {}", input, space.output),
            None => space.output.to_string(),
        };
        let names = space.column_names();
        write!(f, "{{ ")?;
        if self.parts.is_empty() {
            return write!(f, "{} : false }}", tuple);
        }
        for (i, b) in self.parts.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", tuple)?;
            let (exists, body) = b.render(&names);
            if body.is_empty() {
                continue;
            }
            let body = body.join(" and ");
            if exists.is_empty() {
                write!(f, " : {}", body)?;
            } else {
                write!(f, " : exists ({} : {})", exists.join(", "), body)?;
            }
        }
        write!(f, " }}")
    }
}
