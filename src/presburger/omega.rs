//! The Omega test: exact integer feasibility of conjunctions of linear
//! constraints, plus the rational (Fourier-Motzkin) projection used for
//! bounds.
//!
//! Every column of a [`Problem`] is an integer variable; there is no notion of
//! parameters here. Feasibility proceeds in three stages:
//!
//! 1. equalities are removed by substitution, using the symmetric-modulo
//!    reduction when no variable has a unit coefficient;
//! 2. variables with a unit coefficient on one side are eliminated exactly by
//!    Fourier-Motzkin;
//! 3. otherwise the real shadow refutes, the dark shadow confirms, and the
//!    remaining gap is covered by splinters.

use super::linear::{mod_hat, Constraint, ConstraintKind, LinExpr, Normalized};
use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{One, Signed, Zero};
use std::collections::HashMap;

/// A conjunction of equalities and inequalities over integer columns.
#[derive(Debug, Clone)]
pub(crate) struct Problem {
    pub n: usize,
    pub eqs: Vec<LinExpr>,
    pub ineqs: Vec<LinExpr>,
}

impl Problem {
    pub fn new(n: usize) -> Self {
        Self { n, eqs: Vec::new(), ineqs: Vec::new() }
    }

    pub fn from_constraints<'a>(n: usize, cs: impl IntoIterator<Item = &'a Constraint>) -> Self {
        let mut p = Self::new(n);
        for c in cs {
            p.push(c.clone());
        }
        p
    }

    pub fn push(&mut self, c: Constraint) {
        debug_assert_eq!(c.expr.n_cols(), self.n);
        match c.kind {
            ConstraintKind::Equality => self.eqs.push(c.expr),
            ConstraintKind::Inequality => self.ineqs.push(c.expr),
        }
    }

    fn add_col(&mut self) -> usize {
        for e in self.eqs.iter_mut().chain(self.ineqs.iter_mut()) {
            e.coeffs.push(BigInt::zero());
        }
        self.n += 1;
        self.n - 1
    }

    fn substitute(&mut self, col: usize, value: &LinExpr) {
        for e in self.eqs.iter_mut().chain(self.ineqs.iter_mut()) {
            e.substitute(col, value);
        }
    }

    /// Gcd-normalise, drop tautologies, merge parallel inequalities and turn
    /// opposite pairs into equalities. Returns `false` on a contradiction.
    fn normalize(&mut self) -> bool {
        let mut eqs = Vec::with_capacity(self.eqs.len());
        for e in self.eqs.drain(..) {
            match Constraint::eq_zero(e).normalize() {
                Normalized::Contradiction => return false,
                Normalized::Tautology => {}
                Normalized::Constraint(c) => eqs.push(c.expr),
            }
        }
        eqs.sort_by(|a, b| a.coeffs.cmp(&b.coeffs).then_with(|| a.constant.cmp(&b.constant)));
        eqs.dedup();

        // tightest constant per coefficient vector
        let mut tightest: HashMap<Vec<BigInt>, BigInt> = HashMap::new();
        let mut order = Vec::new();
        for e in self.ineqs.drain(..) {
            match Constraint::ge_zero(e).normalize() {
                Normalized::Contradiction => return false,
                Normalized::Tautology => {}
                Normalized::Constraint(c) => {
                    let LinExpr { constant, coeffs } = c.expr;
                    match tightest.get_mut(&coeffs) {
                        Some(k) => {
                            if constant < *k {
                                *k = constant;
                            }
                        }
                        None => {
                            order.push(coeffs.clone());
                            tightest.insert(coeffs, constant);
                        }
                    }
                }
            }
        }

        let mut ineqs = Vec::with_capacity(order.len());
        let mut merged: Vec<bool> = vec![false; order.len()];
        let index: HashMap<&Vec<BigInt>, usize> =
            order.iter().enumerate().map(|(i, c)| (c, i)).collect();
        for (i, coeffs) in order.iter().enumerate() {
            if merged[i] {
                continue;
            }
            let k1 = &tightest[coeffs];
            let negated: Vec<BigInt> = coeffs.iter().map(|c| -c).collect();
            if let Some(&j) = index.get(&negated) {
                if !merged[j] {
                    let k2 = &tightest[&order[j]];
                    let sum = k1 + k2;
                    if sum.is_negative() {
                        return false;
                    }
                    if sum.is_zero() {
                        merged[i] = true;
                        merged[j] = true;
                        eqs.push(LinExpr { constant: k1.clone(), coeffs: coeffs.clone() });
                        continue;
                    }
                }
            }
            ineqs.push(LinExpr { constant: k1.clone(), coeffs: coeffs.clone() });
        }
        self.eqs = eqs;
        self.ineqs = ineqs;
        true
    }

    /// Eliminate one equality. The equality is gcd-normalised.
    fn eliminate_equality(&mut self, eq: LinExpr) {
        let (k, ak) = match eq
            .coeffs
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.is_zero())
            .min_by(|(_, a), (_, b)| a.abs().cmp(&b.abs()))
        {
            Some((k, ak)) => (k, ak.clone()),
            None => return,
        };
        if ak.abs().is_one() {
            // x_k = -ak * (eq - ak x_k)
            let mut value = eq;
            value.coeffs[k] = BigInt::zero();
            value.scale(&-&ak);
            self.substitute(k, &value);
            return;
        }
        let m = ak.abs() + BigInt::one();
        let sign = if ak.is_negative() { -BigInt::one() } else { BigInt::one() };
        let sigma = self.add_col();
        let mut eq = eq;
        eq.coeffs.push(BigInt::zero());
        // x_k = sign * (sum_{i != k} modhat(a_i) x_i + modhat(c) - m sigma)
        let mut value = LinExpr::zero(self.n);
        value.constant = &sign * mod_hat(&eq.constant, &m);
        for (i, a) in eq.coeffs.iter().enumerate() {
            if i != k && i != sigma && !a.is_zero() {
                value.coeffs[i] = &sign * mod_hat(a, &m);
            }
        }
        value.coeffs[sigma] = -&sign * &m;
        self.substitute(k, &value);
        eq.substitute(k, &value);
        self.eqs.push(eq);
    }

    /// Combine every lower bound of `col` with every upper bound.
    /// `dark` tightens each combination to the dark shadow.
    fn fourier_motzkin(&self, col: usize, dark: bool) -> Problem {
        let mut out = Problem::new(self.n);
        out.eqs = self.eqs.clone();
        let mut lowers = Vec::new();
        let mut uppers = Vec::new();
        for e in &self.ineqs {
            let c = &e.coeffs[col];
            if c.is_positive() {
                lowers.push(e);
            } else if c.is_negative() {
                uppers.push(e);
            } else {
                out.ineqs.push(e.clone());
            }
        }
        for l in &lowers {
            let a = l.coeffs[col].clone();
            for u in &uppers {
                let b = -&u.coeffs[col];
                let mut combined = l.scaled(&b);
                combined.add_scaled(u, &a);
                if dark {
                    combined.constant -= (&a - 1) * (&b - 1);
                }
                debug_assert!(combined.coeffs[col].is_zero());
                out.ineqs.push(combined);
            }
        }
        out
    }

    fn bound_counts(&self, col: usize) -> (usize, usize, bool, bool) {
        let (mut lo, mut up) = (0, 0);
        let (mut lo_unit, mut up_unit) = (true, true);
        for e in &self.ineqs {
            let c = &e.coeffs[col];
            if c.is_positive() {
                lo += 1;
                lo_unit &= c.is_one();
            } else if c.is_negative() {
                up += 1;
                up_unit &= (-c).is_one();
            }
        }
        (lo, up, lo_unit, up_unit)
    }

    fn drop_rows_with(&mut self, col: usize) {
        self.ineqs.retain(|e| e.coeffs[col].is_zero());
    }
}

/// Exact integer feasibility.
pub(crate) fn is_feasible(mut p: Problem) -> bool {
    loop {
        if !p.normalize() {
            return false;
        }
        if let Some(eq) = p.eqs.pop() {
            p.eliminate_equality(eq);
            continue;
        }
        if p.ineqs.is_empty() {
            return true;
        }

        let mut exact: Option<(usize, usize)> = None;
        let mut inexact: Option<(usize, usize)> = None;
        let mut one_sided = None;
        for col in 0..p.n {
            let (lo, up, lo_unit, up_unit) = p.bound_counts(col);
            if lo + up == 0 {
                continue;
            }
            if lo == 0 || up == 0 {
                one_sided = Some(col);
                break;
            }
            let cost = lo * up;
            if lo_unit || up_unit {
                if exact.map_or(true, |(_, c)| cost < c) {
                    exact = Some((col, cost));
                }
            } else if inexact.map_or(true, |(_, c)| cost < c) {
                inexact = Some((col, cost));
            }
        }
        if let Some(col) = one_sided {
            p.drop_rows_with(col);
            continue;
        }
        if let Some((col, _)) = exact {
            p = p.fourier_motzkin(col, false);
            continue;
        }
        let col = match inexact {
            Some((col, _)) => col,
            // only constant rows remain, and those were normalised away
            None => return true,
        };

        if !is_feasible(p.fourier_motzkin(col, false)) {
            return false;
        }
        if is_feasible(p.fourier_motzkin(col, true)) {
            return true;
        }
        return splinters(&p, col).into_iter().any(is_feasible);
    }
}

/// The splinter problems of `col`: one per lower bound `a x + beta >= 0` and
/// offset `i` in `0..=floor((a*bmax - a - bmax) / bmax)`, each adding
/// `a x + beta = i`.
pub(crate) fn splinters(p: &Problem, col: usize) -> Vec<Problem> {
    let bmax = p
        .ineqs
        .iter()
        .filter(|e| e.coeffs[col].is_negative())
        .map(|e| -&e.coeffs[col])
        .max()
        .unwrap_or_else(BigInt::one);
    let mut out = Vec::new();
    for l in p.ineqs.iter().filter(|e| e.coeffs[col].is_positive()) {
        let a = &l.coeffs[col];
        let top = (a * &bmax - a - &bmax).div_floor(&bmax);
        let mut i = BigInt::zero();
        while i <= top {
            let mut q = p.clone();
            let mut eq = l.clone();
            eq.constant -= &i;
            q.eqs.push(eq);
            out.push(q);
            i += 1;
        }
    }
    out
}

/// Rational projection: eliminate every column not in `keep` over the
/// rationals and return the surviving inequalities (equalities are returned
/// as pairs). Inequalities are reduced by their full content only, so the
/// result is the exact real shadow.
pub(crate) fn rational_project(p: &Problem, keep: &[bool]) -> Vec<LinExpr> {
    let mut eqs = p.eqs.clone();
    let mut ineqs = p.ineqs.clone();
    loop {
        // equalities first: rational substitution
        let pivot = eqs.iter().enumerate().find_map(|(i, e)| {
            (0..p.n).find(|&c| !keep[c] && !e.coeffs[c].is_zero()).map(|c| (i, c))
        });
        if let Some((i, col)) = pivot {
            let eq = eqs.swap_remove(i);
            let a = eq.coeffs[col].clone();
            let (a_abs, eq_signed) =
                if a.is_negative() { (-&a, -eq.clone()) } else { (a.clone(), eq.clone()) };
            for row in eqs.iter_mut().chain(ineqs.iter_mut()) {
                let r = row.coeffs[col].clone();
                if r.is_zero() {
                    continue;
                }
                row.scale(&a_abs);
                row.add_scaled(&eq_signed, &-r);
                reduce_content(row);
            }
            continue;
        }
        let mut best: Option<(usize, usize)> = None;
        for col in (0..p.n).filter(|&c| !keep[c]) {
            let lo = ineqs.iter().filter(|e| e.coeffs[col].is_positive()).count();
            let up = ineqs.iter().filter(|e| e.coeffs[col].is_negative()).count();
            if lo + up == 0 {
                continue;
            }
            let cost = lo * up;
            if best.map_or(true, |(_, c)| cost < c) {
                best = Some((col, cost));
            }
        }
        let col = match best {
            Some((col, _)) => col,
            None => break,
        };
        let mut next = Vec::new();
        let mut lowers = Vec::new();
        let mut uppers = Vec::new();
        for e in ineqs.drain(..) {
            if e.coeffs[col].is_positive() {
                lowers.push(e);
            } else if e.coeffs[col].is_negative() {
                uppers.push(e);
            } else {
                next.push(e);
            }
        }
        for l in &lowers {
            let a = l.coeffs[col].clone();
            for u in &uppers {
                let b = -&u.coeffs[col];
                let mut combined = l.scaled(&b);
                combined.add_scaled(u, &a);
                reduce_content(&mut combined);
                next.push(combined);
            }
        }
        next.sort_by(|a, b| a.coeffs.cmp(&b.coeffs).then_with(|| a.constant.cmp(&b.constant)));
        next.dedup_by(|later, earlier| later.coeffs == earlier.coeffs);
        ineqs = next;
    }
    let mut out = ineqs;
    for e in eqs {
        out.push(-e.clone());
        out.push(e);
    }
    out
}

fn reduce_content(e: &mut LinExpr) {
    let g = e.content();
    if !g.is_zero() && !g.is_one() {
        e.constant /= &g;
        for c in &mut e.coeffs {
            *c /= &g;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(constant: i64, coeffs: &[i64]) -> LinExpr {
        LinExpr { constant: constant.into(), coeffs: coeffs.iter().map(|&c| c.into()).collect() }
    }

    fn problem(n: usize, eqs: &[LinExpr], ineqs: &[LinExpr]) -> Problem {
        Problem { n, eqs: eqs.to_vec(), ineqs: ineqs.to_vec() }
    }

    #[test]
    fn test_box_is_feasible() {
        // 0 <= x <= 3, 0 <= y <= 3
        let p = problem(2, &[], &[row(0, &[1, 0]), row(3, &[-1, 0]), row(0, &[0, 1]), row(3, &[0, -1])]);
        assert!(is_feasible(p));
    }

    #[test]
    fn test_parity_gap_is_infeasible() {
        // 2x = 2y + 1 has no integer solution
        let p = problem(2, &[row(-1, &[2, -2])], &[]);
        assert!(!is_feasible(p));
    }

    #[test]
    fn test_non_unit_equality() {
        // 3x + 5y = 1, 0 <= x <= 10, 0 <= y  -> x = 2, y = -1 fails; x = 7, y = -4 fails
        // with y >= 0 there is no solution below x = 10
        let p = problem(
            2,
            &[row(-1, &[3, 5])],
            &[row(0, &[1, 0]), row(10, &[-1, 0]), row(0, &[0, 1])],
        );
        assert!(!is_feasible(p));
        // dropping y >= 0 makes it feasible
        let q = problem(2, &[row(-1, &[3, 5])], &[row(0, &[1, 0]), row(10, &[-1, 0])]);
        assert!(is_feasible(q));
    }

    #[test]
    fn test_real_but_not_integer() {
        // 1 <= 3x <= 2
        let p = problem(1, &[], &[row(-1, &[3]), row(2, &[-3])]);
        assert!(!is_feasible(p));
    }

    #[test]
    fn test_needs_splinters() {
        // 27 <= 11x + 13y <= 45, -10 <= 7x - 9y <= 4 (Pugh's example, infeasible)
        let p = problem(
            2,
            &[],
            &[row(-27, &[11, 13]), row(45, &[-11, -13]), row(10, &[7, -9]), row(4, &[-7, 9])],
        );
        assert!(!is_feasible(p));
    }

    #[test]
    fn test_rational_project_bounds() {
        // 0 <= y <= 2x, x <= 3  -> project x: 0 <= y <= 6
        let p = problem(2, &[], &[row(0, &[0, 1]), row(0, &[2, -1]), row(3, &[-1, 0])]);
        let rows = rational_project(&p, &[false, true]);
        assert!(rows.contains(&row(0, &[0, 1])));
        assert!(rows.contains(&row(6, &[0, -1])));
    }
}
