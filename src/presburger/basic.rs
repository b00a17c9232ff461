//! Basic sets: one conjunction of linear constraints with local variables.
//!
//! Columns are laid out as `[fixed..., locals...]`, where the fixed columns
//! are the parameters and tuple dimensions of the owning space. A local is
//! either a free existential or an integer division `floor(num / den)`.
//! Division locals are kept with their definition so that negation stays
//! exact; free locals are rewritten away by [`BasicSet::resolve`] before a
//! basic set is negated.

use super::linear::{mod_hat, Constraint, ConstraintKind, LinExpr, Normalized};
use super::omega::{self, Problem};
use num_bigint::BigInt;
use num_integer::Integer;
use num_rational::BigRational;
use num_traits::{One, Signed, Zero};

/// A local (existentially quantified) column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Local {
    /// Unconstrained except by the constraints of the basic set
    Free,
    /// `floor(num / den)` with `den > 0`; `num` never involves free locals
    Div {
        /// Numerator over all columns
        num: LinExpr,
        /// Positive denominator
        den: BigInt,
    },
}

/// One conjunction of constraints.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BasicSet {
    pub(crate) n_fixed: usize,
    pub(crate) locals: Vec<Local>,
    pub(crate) constraints: Vec<Constraint>,
}

/// Result of a lexicographic optimisation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LexOpt {
    Empty,
    Unbounded,
    Point(Vec<BigInt>),
}

impl BasicSet {
    /// The universe over `n_fixed` columns.
    pub fn universe(n_fixed: usize) -> Self {
        Self { n_fixed, locals: Vec::new(), constraints: Vec::new() }
    }

    /// Total number of columns.
    pub fn n_cols(&self) -> usize {
        self.n_fixed + self.locals.len()
    }

    pub(crate) fn add_constraint(&mut self, c: Constraint) {
        debug_assert_eq!(c.expr.n_cols(), self.n_cols());
        self.constraints.push(c);
    }

    /// Append a local column and return its index.
    pub(crate) fn add_local(&mut self, local: Local) -> usize {
        for c in &mut self.constraints {
            c.expr.coeffs.push(BigInt::zero());
        }
        for l in &mut self.locals {
            if let Local::Div { num, .. } = l {
                num.coeffs.push(BigInt::zero());
            }
        }
        let local = match local {
            Local::Div { mut num, den } => {
                if num.n_cols() < self.n_cols() + 1 {
                    num.coeffs.resize(self.n_cols() + 1, BigInt::zero());
                }
                Local::Div { num, den }
            }
            free => free,
        };
        self.locals.push(local);
        self.n_cols() - 1
    }

    /// Append `floor(num / den)` as a local. A numerator over free locals
    /// leaves the local free with its two defining bounds.
    pub(crate) fn add_div(&mut self, num: LinExpr, den: BigInt) -> usize {
        let col = self.add_local(Local::Div { num, den });
        self.restore_div_invariant();
        col
    }

    fn for_each_expr(&mut self, mut f: impl FnMut(&mut LinExpr)) {
        for c in &mut self.constraints {
            f(&mut c.expr);
        }
        for l in &mut self.locals {
            if let Local::Div { num, .. } = l {
                f(num);
            }
        }
    }

    /// Insert `n` fixed columns at position `at` (`at <= n_fixed`).
    pub(crate) fn insert_fixed(&mut self, at: usize, n: usize) {
        debug_assert!(at <= self.n_fixed);
        self.for_each_expr(|e| e.insert_cols(at, n));
        self.n_fixed += n;
    }

    /// Reorder the fixed columns: new fixed column `i` is old `perm[i]`.
    pub(crate) fn permute_fixed(&mut self, perm: &[usize]) {
        debug_assert_eq!(perm.len(), self.n_fixed);
        let full: Vec<usize> =
            perm.iter().copied().chain(self.n_fixed..self.n_cols()).collect();
        self.for_each_expr(|e| e.permute(&full));
    }

    /// Turn the fixed columns `first..first + n` into free locals.
    pub(crate) fn fixed_to_locals(&mut self, first: usize, n: usize) {
        debug_assert!(first + n <= self.n_fixed);
        let moved = first..first + n;
        let perm: Vec<usize> = (0..self.n_fixed)
            .filter(|c| !moved.contains(c))
            .chain(self.n_fixed..self.n_cols())
            .chain(moved.clone())
            .collect();
        self.for_each_expr(|e| e.permute(&perm));
        self.n_fixed -= n;
        self.locals.extend(std::iter::repeat(Local::Free).take(n));
        self.restore_div_invariant();
    }

    /// Demote divisions whose numerator mentions a free local.
    fn restore_div_invariant(&mut self) {
        loop {
            let n_fixed = self.n_fixed;
            let free: Vec<bool> = self.locals.iter().map(|l| matches!(l, Local::Free)).collect();
            let bad = self.locals.iter().position(|l| match l {
                Local::Div { num, .. } => num.support().any(|c| c >= n_fixed && free[c - n_fixed]),
                Local::Free => false,
            });
            match bad {
                Some(i) => self.demote(i),
                None => return,
            }
        }
    }

    fn demote(&mut self, local: usize) {
        let col = self.n_fixed + local;
        if let Local::Div { num, den } = std::mem::replace(&mut self.locals[local], Local::Free) {
            let [lo, hi] = div_bounds(col, &num, &den);
            self.constraints.push(lo);
            self.constraints.push(hi);
        }
    }

    /// The two inequalities defining each division local.
    pub(crate) fn definitions(&self) -> Vec<Constraint> {
        self.locals
            .iter()
            .enumerate()
            .filter_map(|(i, l)| match l {
                Local::Div { num, den } => Some(div_bounds(self.n_fixed + i, num, den)),
                Local::Free => None,
            })
            .flatten()
            .collect()
    }

    pub(crate) fn problem(&self) -> Problem {
        let mut p = Problem::from_constraints(self.n_cols(), &self.constraints);
        for c in self.definitions() {
            p.push(c);
        }
        p
    }

    /// Exact emptiness.
    pub fn is_empty(&self) -> bool {
        !omega::is_feasible(self.problem())
    }

    /// Membership of a point given values for the fixed columns.
    pub fn contains(&self, values: &[BigInt]) -> bool {
        debug_assert_eq!(values.len(), self.n_fixed);
        let mut b = self.clone();
        for (col, v) in values.iter().enumerate() {
            let mut e = LinExpr::var(b.n_cols(), col);
            e.constant = -v;
            b.add_constraint(Constraint::eq_zero(e));
        }
        !b.is_empty()
    }

    /// Conjunction with another basic set over the same fixed columns.
    pub fn intersect(&self, other: &BasicSet) -> BasicSet {
        let (mut out, mapped) = self.embed(other);
        out.constraints.extend(mapped);
        out
    }

    /// `self` extended with the locals of `other`, plus `other`'s constraints
    /// rewritten into the extended column layout.
    fn embed(&self, other: &BasicSet) -> (BasicSet, Vec<Constraint>) {
        debug_assert_eq!(self.n_fixed, other.n_fixed);
        let mut out = self.clone();
        let base = self.n_cols();
        for _ in &other.locals {
            out.add_local(Local::Free);
        }
        let total = out.n_cols();
        let map = |e: &LinExpr| {
            let mut m = LinExpr::constant(total, e.constant.clone());
            for (c, v) in e.coeffs.iter().enumerate() {
                let target = if c < self.n_fixed { c } else { base + c - self.n_fixed };
                m.coeffs[target] = v.clone();
            }
            m
        };
        for (j, l) in other.locals.iter().enumerate() {
            if let Local::Div { num, den } = l {
                out.locals[self.locals.len() + j] = Local::Div { num: map(num), den: den.clone() };
            }
        }
        let mapped = other
            .constraints
            .iter()
            .map(|c| Constraint { expr: map(&c.expr), kind: c.kind })
            .collect();
        (out, mapped)
    }

    fn substitute(&mut self, col: usize, value: &LinExpr) {
        self.for_each_expr(|e| e.substitute(col, value));
    }

    fn remove_local(&mut self, col: usize) {
        debug_assert!(col >= self.n_fixed);
        self.for_each_expr(|e| e.remove_col(col));
        self.locals.remove(col - self.n_fixed);
    }

    fn is_referenced(&self, col: usize) -> bool {
        self.constraints.iter().any(|c| c.expr.involves(col))
            || self.locals.iter().any(|l| matches!(l, Local::Div { num, .. } if num.involves(col)))
    }

    /// Normalise constraints and drop unused locals. Returns `false` when a
    /// constraint is trivially violated.
    pub(crate) fn simplify(&mut self) -> bool {
        let mut kept: Vec<Constraint> = Vec::with_capacity(self.constraints.len());
        for c in self.constraints.drain(..) {
            match c.normalize() {
                Normalized::Contradiction => return false,
                Normalized::Tautology => {}
                Normalized::Constraint(c) => {
                    if !kept.contains(&c) {
                        kept.push(c);
                    }
                }
            }
        }
        self.constraints = kept;
        loop {
            let unused = (self.n_fixed..self.n_cols()).rev().find(|&c| !self.is_referenced(c));
            match unused {
                Some(col) => self.remove_local(col),
                None => return true,
            }
        }
    }

    fn free_locals(&self) -> Vec<usize> {
        self.locals
            .iter()
            .enumerate()
            .filter(|(_, l)| matches!(l, Local::Free))
            .map(|(i, _)| self.n_fixed + i)
            .collect()
    }

    /// Rewrite into a union of basic sets without free locals.
    ///
    /// Free locals are removed by substitution or exact Fourier-Motzkin,
    /// turned into divisions when an equality defines them, or split with
    /// dark shadow plus splinters.
    pub fn resolve(&self) -> Vec<BasicSet> {
        let mut out = Vec::new();
        let mut stack = vec![self.clone()];
        while let Some(mut b) = stack.pop() {
            if !b.simplify() {
                continue;
            }
            let free = b.free_locals();
            if free.is_empty() {
                out.push(b);
                continue;
            }
            if let Some(next) = b.resolve_equality(&free) {
                stack.push(next);
                continue;
            }
            stack.extend(b.resolve_inequalities(&free));
        }
        out
    }

    fn resolve_equality(&self, free: &[usize]) -> Option<BasicSet> {
        let mut best: Option<(usize, Vec<usize>)> = None;
        for (i, c) in self.constraints.iter().enumerate() {
            if !c.is_equality() {
                continue;
            }
            let here: Vec<usize> = free.iter().copied().filter(|&f| c.expr.involves(f)).collect();
            if here.is_empty() {
                continue;
            }
            if let Some(&col) = here.iter().find(|&&f| c.expr.coeff(f).abs().is_one()) {
                // unit coefficient: substitute the local away
                let mut b = self.clone();
                let eq = b.constraints.remove(i).expr;
                let coef = eq.coeff(col).clone();
                let mut value = eq;
                value.coeffs[col] = BigInt::zero();
                value.scale(&-coef);
                b.substitute(col, &value);
                b.remove_local(col);
                return Some(b);
            }
            if best.as_ref().map_or(true, |(_, h)| here.len() < h.len()) {
                best = Some((i, here));
            }
        }
        let (i, here) = best?;
        let mut b = self.clone();
        if here.len() == 1 {
            // a x + rest = 0 defines x = floor(-rest / a); the equality stays
            let col = here[0];
            let eq = &b.constraints[i].expr;
            let a = eq.coeff(col).clone();
            let mut rest = eq.clone();
            rest.coeffs[col] = BigInt::zero();
            let (num, den) = if a.is_positive() { (-rest, a) } else { (rest, -a) };
            b.locals[col - b.n_fixed] = Local::Div { num, den };
            return Some(b);
        }
        // several free locals and none with a unit coefficient: shrink the
        // coefficients with the symmetric modulus
        let mut eq = b.constraints.remove(i).expr;
        let col = here
            .iter()
            .copied()
            .min_by(|&x, &y| eq.coeff(x).abs().cmp(&eq.coeff(y).abs()))?;
        let ak = eq.coeff(col).clone();
        let m = ak.abs() + BigInt::one();
        let sign = if ak.is_negative() { -BigInt::one() } else { BigInt::one() };
        let sigma = b.add_local(Local::Free);
        eq.coeffs.push(BigInt::zero());
        let mut value = LinExpr::zero(b.n_cols());
        value.constant = &sign * mod_hat(&eq.constant, &m);
        for (c, a) in eq.coeffs.iter().enumerate() {
            if c != col && c != sigma && !a.is_zero() {
                value.coeffs[c] = &sign * mod_hat(a, &m);
            }
        }
        value.coeffs[sigma] = -&sign * &m;
        b.substitute(col, &value);
        eq.substitute(col, &value);
        b.constraints.push(Constraint::eq_zero(eq));
        b.remove_local(col);
        Some(b)
    }

    fn resolve_inequalities(&self, free: &[usize]) -> Vec<BasicSet> {
        let mut pick: Option<(usize, usize)> = None;
        for &col in free {
            let (lo, up, lo_unit, up_unit) = self.bound_counts(col);
            if lo == 0 || up == 0 || lo_unit || up_unit {
                return vec![self.eliminate(col, false)];
            }
            if pick.map_or(true, |(_, cost)| lo * up < cost) {
                pick = Some((col, lo * up));
            }
        }
        let col = match pick {
            Some((col, _)) => col,
            None => return vec![self.clone()],
        };
        let mut pieces = vec![self.eliminate(col, true)];
        let bmax = self
            .constraints
            .iter()
            .filter(|c| c.expr.coeff(col).is_negative())
            .map(|c| -c.expr.coeff(col))
            .max()
            .unwrap_or_else(BigInt::one);
        for l in self.constraints.iter().filter(|c| c.expr.coeff(col).is_positive()) {
            let a = l.expr.coeff(col);
            let top = (a * &bmax - a - &bmax).div_floor(&bmax);
            let mut i = BigInt::zero();
            while i <= top {
                let mut piece = self.clone();
                let mut eq = l.expr.clone();
                eq.constant -= &i;
                piece.add_constraint(Constraint::eq_zero(eq));
                pieces.push(piece);
                i += 1;
            }
        }
        pieces
    }

    fn bound_counts(&self, col: usize) -> (usize, usize, bool, bool) {
        let (mut lo, mut up) = (0, 0);
        let (mut lo_unit, mut up_unit) = (true, true);
        for c in &self.constraints {
            let a = c.expr.coeff(col);
            if a.is_positive() {
                lo += 1;
                lo_unit &= a.is_one();
            } else if a.is_negative() {
                up += 1;
                up_unit &= (-a).is_one();
            }
        }
        (lo, up, lo_unit, up_unit)
    }

    /// Fourier-Motzkin on an inequality-only free local, then drop it.
    fn eliminate(&self, col: usize, dark: bool) -> BasicSet {
        let mut b = self.clone();
        let (mut lowers, mut uppers, mut rest) = (Vec::new(), Vec::new(), Vec::new());
        for c in b.constraints.drain(..) {
            let a = c.expr.coeff(col).clone();
            if a.is_positive() {
                lowers.push(c.expr);
            } else if a.is_negative() {
                uppers.push(c.expr);
            } else {
                rest.push(c);
            }
        }
        for l in &lowers {
            let a = l.coeff(col).clone();
            for u in &uppers {
                let bb = -u.coeff(col);
                let mut combined = l.scaled(&bb);
                combined.add_scaled(u, &a);
                if dark {
                    combined.constant -= (&a - 1) * (&bb - 1);
                }
                rest.push(Constraint::ge_zero(combined));
            }
        }
        b.constraints = rest;
        b.remove_local(col);
        b
    }

    /// Set difference `self - other`, where `other` has no free locals.
    pub fn subtract(&self, other: &BasicSet) -> Vec<BasicSet> {
        debug_assert!(other.free_locals().is_empty());
        let (base, mapped) = self.embed(other);
        let mut out = Vec::new();
        for (i, c) in mapped.iter().enumerate() {
            for neg in c.negate() {
                let mut piece = base.clone();
                piece.constraints.extend(mapped[..i].iter().cloned());
                piece.constraints.push(neg);
                if piece.simplify() && !piece.is_empty() {
                    out.push(piece);
                }
            }
        }
        out
    }

    fn with(&self, c: Constraint) -> BasicSet {
        let mut b = self.clone();
        b.add_constraint(c);
        b
    }

    /// Rational bound of a column: the greatest lower bound (`upper == false`)
    /// or least upper bound implied by the real shadow. `None` if unbounded.
    pub(crate) fn rational_bound(&self, col: usize, upper: bool) -> Option<BigRational> {
        let mut keep = vec![false; self.n_cols()];
        keep[col] = true;
        let rows = omega::rational_project(&self.problem(), &keep);
        let mut best: Option<BigRational> = None;
        for r in rows {
            let a = r.coeff(col);
            if a.is_zero() || a.is_positive() == upper {
                continue;
            }
            // a x + c >= 0  ->  x >= -c/a or x <= -c/a
            let v = BigRational::new(-&r.constant, a.clone());
            best = Some(match best {
                None => v,
                Some(b) if upper => b.min(v),
                Some(b) => b.max(v),
            });
        }
        best
    }

    /// Find the extreme feasible value of `col`, starting from a valid
    /// bound and moving in direction `dir` (+1 looks for the minimum).
    fn search_extreme(&self, col: usize, start: BigInt, dir: i32) -> BigInt {
        let d = BigInt::from(dir);
        // feasible with x*dir <= v*dir
        let test = |v: &BigInt| {
            let mut e = LinExpr::var(self.n_cols(), col);
            e.scale(&-&d);
            e.constant = v * &d;
            !self.with(Constraint::ge_zero(e)).is_empty()
        };
        if test(&start) {
            return start;
        }
        let mut prev = start;
        let mut step = BigInt::one();
        let mut cand;
        loop {
            cand = &prev + &step * &d;
            if test(&cand) {
                break;
            }
            prev = cand;
            step *= 2;
        }
        while (&cand - &prev).abs() > BigInt::one() {
            let mid = (&prev + &cand).div_floor(&BigInt::from(2));
            if test(&mid) {
                cand = mid;
            } else {
                prev = mid;
            }
        }
        cand
    }

    fn fix(&self, col: usize, v: &BigInt) -> BasicSet {
        let mut e = LinExpr::var(self.n_cols(), col);
        e.constant = -v;
        self.with(Constraint::eq_zero(e))
    }

    /// Lexicographic minimum (or maximum) over the first `n` columns.
    pub(crate) fn lexopt(&self, n: usize, max: bool) -> LexOpt {
        if self.is_empty() {
            return LexOpt::Empty;
        }
        let mut cur = self.clone();
        let mut point = Vec::with_capacity(n);
        for col in 0..n {
            let bound = match cur.rational_bound(col, max) {
                Some(b) => b,
                None => return LexOpt::Unbounded,
            };
            let v = if max {
                cur.search_extreme(col, bound.floor().to_integer(), -1)
            } else {
                cur.search_extreme(col, bound.ceil().to_integer(), 1)
            };
            cur = cur.fix(col, &v);
            point.push(v);
        }
        LexOpt::Point(point)
    }

    /// Some point over the first `n` columns, or `None` when empty.
    pub(crate) fn sample(&self, n: usize) -> Option<Vec<BigInt>> {
        if self.is_empty() {
            return None;
        }
        let mut cur = self.clone();
        let mut point = Vec::with_capacity(n);
        for col in 0..n {
            let v = if let Some(lo) = cur.rational_bound(col, false) {
                cur.search_extreme(col, lo.ceil().to_integer(), 1)
            } else if let Some(hi) = cur.rational_bound(col, true) {
                cur.search_extreme(col, hi.floor().to_integer(), -1)
            } else {
                // unbounded both ways: walk outwards from zero
                let mut k = BigInt::zero();
                loop {
                    if !cur.fix(col, &k).is_empty() {
                        break k;
                    }
                    k = if k.is_positive() { -k } else { -k + 1 };
                }
            };
            cur = cur.fix(col, &v);
            point.push(v);
        }
        Some(point)
    }

    /// Farkas description of the affine functions non-negative on this set.
    ///
    /// The result rows are inequalities over `[c0, c_0, ..., c_{n_fixed-1}]`
    /// describing every `(c0, c)` with `c0 + c.x >= 0` for all `x` in the
    /// rational relaxation.
    pub(crate) fn coefficients(&self) -> Vec<LinExpr> {
        let mut rows: Vec<LinExpr> = Vec::new();
        for c in self.constraints.iter().chain(self.definitions().iter()) {
            rows.push(c.expr.clone());
            if c.kind == ConstraintKind::Equality {
                rows.push(-c.expr.clone());
            }
        }
        let nf = self.n_fixed;
        let m = rows.len();
        // columns: c0, c_fixed..., lambda_1..lambda_m, mu
        let n = nf + 1 + m + 1;
        let lambda = |j: usize| nf + 1 + j;
        let mu = n - 1;
        let mut p = Problem::new(n);
        let mut cst = LinExpr::var(n, 0);
        for (j, r) in rows.iter().enumerate() {
            cst.coeffs[lambda(j)] = -&r.constant;
        }
        cst.coeffs[mu] = -BigInt::one();
        p.eqs.push(cst);
        for col in 0..self.n_cols() {
            let mut e = if col < nf { LinExpr::var(n, col + 1) } else { LinExpr::zero(n) };
            for (j, r) in rows.iter().enumerate() {
                e.coeffs[lambda(j)] = -r.coeff(col);
            }
            p.eqs.push(e);
        }
        for j in 0..m {
            p.ineqs.push(LinExpr::var(n, lambda(j)));
        }
        p.ineqs.push(LinExpr::var(n, mu));
        let keep: Vec<bool> = (0..n).map(|c| c <= nf).collect();
        omega::rational_project(&p, &keep)
            .into_iter()
            .map(|mut r| {
                r.coeffs.truncate(nf + 1);
                r
            })
            .collect()
    }

    /// Render the constraints with the given fixed-column names. Division
    /// locals are written inline; free locals are returned for an `exists`.
    pub(crate) fn render(&self, fixed_names: &[String]) -> (Vec<String>, Vec<String>) {
        let mut names: Vec<Option<String>> = fixed_names.iter().cloned().map(Some).collect();
        names.resize(self.n_cols(), None);
        let mut exists = Vec::new();
        let mut k = 0;
        for (i, l) in self.locals.iter().enumerate() {
            if let Local::Free = l {
                let mut name = format!("e{}", k);
                while fixed_names.contains(&name) {
                    k += 1;
                    name = format!("e{}", k);
                }
                k += 1;
                names[self.n_fixed + i] = Some(name.clone());
                exists.push(name);
            }
        }
        // divisions in dependency order
        loop {
            let mut progressed = false;
            for (i, l) in self.locals.iter().enumerate() {
                let col = self.n_fixed + i;
                if names[col].is_some() {
                    continue;
                }
                if let Local::Div { num, den } = l {
                    if num.support().all(|c| names[c].is_some()) {
                        let known: Vec<String> =
                            names.iter().map(|n| n.clone().unwrap_or_default()).collect();
                        names[col] = Some(format!(
                            "floor(({}) / {})",
                            num.to_string_with_names(&known),
                            den
                        ));
                        progressed = true;
                    }
                }
            }
            if !progressed {
                break;
            }
        }
        let known: Vec<String> = names.into_iter().map(Option::unwrap_or_default).collect();
        let body = self.constraints.iter().map(|c| c.to_string_with_names(&known)).collect();
        (exists, body)
    }
}

/// `num - den*x >= 0` and `den*x - num + den - 1 >= 0`.
fn div_bounds(col: usize, num: &LinExpr, den: &BigInt) -> [Constraint; 2] {
    let mut lo = num.clone();
    lo.coeffs[col] -= den;
    let mut hi = -num.clone();
    hi.coeffs[col] += den;
    hi.constant += den - BigInt::one();
    [Constraint::ge_zero(lo), Constraint::ge_zero(hi)]
}
