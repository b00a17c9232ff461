//! Linear expressions and constraints over integer columns.
//!
//! A linear expression is a constant plus a sum of coefficients times
//! columns: `e(x) = c0 + c1*x1 + ... + cn*xn`. The meaning of each column
//! (parameter, tuple dimension or local variable) is decided by the owner of
//! the expression; this module only does the arithmetic.

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{One, Signed, Zero};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Neg, Sub};

/// A linear expression with arbitrary-precision coefficients.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinExpr {
    /// Constant term
    pub constant: BigInt,
    /// Coefficient per column
    pub coeffs: Vec<BigInt>,
}

impl LinExpr {
    /// The zero expression over `n` columns.
    pub fn zero(n: usize) -> Self {
        Self { constant: BigInt::zero(), coeffs: vec![BigInt::zero(); n] }
    }

    /// A constant expression over `n` columns.
    pub fn constant(n: usize, value: impl Into<BigInt>) -> Self {
        Self { constant: value.into(), coeffs: vec![BigInt::zero(); n] }
    }

    /// The expression `x_col` over `n` columns.
    pub fn var(n: usize, col: usize) -> Self {
        let mut e = Self::zero(n);
        e.coeffs[col] = BigInt::one();
        e
    }

    /// Number of columns.
    pub fn n_cols(&self) -> usize {
        self.coeffs.len()
    }

    /// Coefficient of a column.
    pub fn coeff(&self, col: usize) -> &BigInt {
        &self.coeffs[col]
    }

    /// True when no column has a non-zero coefficient.
    pub fn is_constant(&self) -> bool {
        self.coeffs.iter().all(Zero::is_zero)
    }

    /// True when the column occurs with a non-zero coefficient.
    pub fn involves(&self, col: usize) -> bool {
        !self.coeffs[col].is_zero()
    }

    /// Columns with non-zero coefficients.
    pub fn support(&self) -> impl Iterator<Item = usize> + '_ {
        self.coeffs
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.is_zero())
            .map(|(i, _)| i)
    }

    /// `self += factor * other`.
    pub fn add_scaled(&mut self, other: &LinExpr, factor: &BigInt) {
        debug_assert_eq!(self.coeffs.len(), other.coeffs.len());
        if factor.is_zero() {
            return;
        }
        self.constant += &other.constant * factor;
        for (a, b) in self.coeffs.iter_mut().zip(&other.coeffs) {
            if !b.is_zero() {
                *a += b * factor;
            }
        }
    }

    /// Multiply every term by a constant.
    pub fn scale(&mut self, factor: &BigInt) {
        self.constant *= factor;
        for c in &mut self.coeffs {
            *c *= factor;
        }
    }

    /// A scaled copy.
    pub fn scaled(&self, factor: &BigInt) -> Self {
        let mut e = self.clone();
        e.scale(factor);
        e
    }

    /// GCD of the column coefficients (zero when the expression is constant).
    pub fn coeff_gcd(&self) -> BigInt {
        self.coeffs.iter().fold(BigInt::zero(), |g, c| g.gcd(c))
    }

    /// GCD of the coefficients and the constant.
    pub fn content(&self) -> BigInt {
        self.coeff_gcd().gcd(&self.constant)
    }

    /// Insert `n` zero columns before position `at`.
    pub fn insert_cols(&mut self, at: usize, n: usize) {
        self.coeffs.splice(at..at, std::iter::repeat(BigInt::zero()).take(n));
    }

    /// Remove a column. The column must not occur.
    pub fn remove_col(&mut self, col: usize) {
        debug_assert!(self.coeffs[col].is_zero(), "removing a live column");
        self.coeffs.remove(col);
    }

    /// Reorder columns: new column `i` is old column `perm[i]`.
    pub fn permute(&mut self, perm: &[usize]) {
        debug_assert_eq!(perm.len(), self.coeffs.len());
        let old = std::mem::take(&mut self.coeffs);
        self.coeffs = perm.iter().map(|&p| old[p].clone()).collect();
    }

    /// Replace column `col` by `value` (which must not involve `col`).
    pub fn substitute(&mut self, col: usize, value: &LinExpr) {
        if self.coeffs[col].is_zero() {
            return;
        }
        let factor = std::mem::take(&mut self.coeffs[col]);
        self.add_scaled(value, &factor);
    }

    /// Evaluate at a point (one value per column).
    pub fn eval(&self, values: &[BigInt]) -> BigInt {
        let mut acc = self.constant.clone();
        for (c, v) in self.coeffs.iter().zip(values) {
            if !c.is_zero() {
                acc += c * v;
            }
        }
        acc
    }

    /// Render with the given column names.
    pub fn to_string_with_names(&self, names: &[String]) -> String {
        let mut out = String::new();
        for (i, c) in self.coeffs.iter().enumerate() {
            if c.is_zero() {
                continue;
            }
            let name = names.get(i).cloned().unwrap_or_else(|| format!("x{}", i));
            write_term(&mut out, c, &name);
        }
        if out.is_empty() {
            return self.constant.to_string();
        }
        if !self.constant.is_zero() {
            if self.constant.is_negative() {
                out.push_str(&format!(" - {}", -&self.constant));
            } else {
                out.push_str(&format!(" + {}", self.constant));
            }
        }
        out
    }
}

fn write_term(out: &mut String, c: &BigInt, name: &str) {
    let mag = c.abs();
    let term = if mag.is_one() { name.to_string() } else { format!("{}*{}", mag, name) };
    if out.is_empty() {
        if c.is_negative() {
            out.push('-');
        }
        out.push_str(&term);
    } else if c.is_negative() {
        out.push_str(" - ");
        out.push_str(&term);
    } else {
        out.push_str(" + ");
        out.push_str(&term);
    }
}

impl Add for LinExpr {
    type Output = Self;

    fn add(mut self, other: Self) -> Self {
        self.add_scaled(&other, &BigInt::one());
        self
    }
}

impl Sub for LinExpr {
    type Output = Self;

    fn sub(mut self, other: Self) -> Self {
        self.add_scaled(&other, &-BigInt::one());
        self
    }
}

impl Neg for LinExpr {
    type Output = Self;

    fn neg(mut self) -> Self {
        self.scale(&-BigInt::one());
        self
    }
}

impl fmt::Display for LinExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = (0..self.n_cols()).map(|i| format!("x{}", i)).collect();
        write!(f, "{}", self.to_string_with_names(&names))
    }
}

/// Kind of constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstraintKind {
    /// `expr >= 0`
    Inequality,
    /// `expr = 0`
    Equality,
}

/// A linear constraint `expr >= 0` or `expr = 0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Constraint {
    /// The constrained expression
    pub expr: LinExpr,
    /// Kind of constraint
    pub kind: ConstraintKind,
}

/// Outcome of normalising a constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    /// Always true; can be dropped
    Tautology,
    /// Never true; the whole conjunction is empty
    Contradiction,
    /// A canonical, gcd-reduced constraint
    Constraint(Constraint),
}

impl Constraint {
    /// `expr >= 0`
    pub fn ge_zero(expr: LinExpr) -> Self {
        Self { expr, kind: ConstraintKind::Inequality }
    }

    /// `expr = 0`
    pub fn eq_zero(expr: LinExpr) -> Self {
        Self { expr, kind: ConstraintKind::Equality }
    }

    /// `lhs >= rhs`
    pub fn ge(lhs: LinExpr, rhs: LinExpr) -> Self {
        Self::ge_zero(lhs - rhs)
    }

    /// `lhs <= rhs`
    pub fn le(lhs: LinExpr, rhs: LinExpr) -> Self {
        Self::ge_zero(rhs - lhs)
    }

    /// `lhs = rhs`
    pub fn eq(lhs: LinExpr, rhs: LinExpr) -> Self {
        Self::eq_zero(lhs - rhs)
    }

    /// Check if this is an equality constraint.
    pub fn is_equality(&self) -> bool {
        matches!(self.kind, ConstraintKind::Equality)
    }

    /// Check if the constraint holds at a point.
    pub fn is_satisfied(&self, values: &[BigInt]) -> bool {
        let v = self.expr.eval(values);
        match self.kind {
            ConstraintKind::Inequality => !v.is_negative(),
            ConstraintKind::Equality => v.is_zero(),
        }
    }

    /// Negation as a disjunction of constraints.
    ///
    /// `e >= 0` negates to `-e - 1 >= 0`; `e = 0` to `e - 1 >= 0 or -e - 1 >= 0`.
    pub fn negate(&self) -> Vec<Constraint> {
        let one = BigInt::one();
        let mut neg = -self.expr.clone();
        neg.constant -= &one;
        match self.kind {
            ConstraintKind::Inequality => vec![Constraint::ge_zero(neg)],
            ConstraintKind::Equality => {
                let mut pos = self.expr.clone();
                pos.constant -= &one;
                vec![Constraint::ge_zero(pos), Constraint::ge_zero(neg)]
            }
        }
    }

    /// Divide by the coefficient gcd, tightening inequalities over the integers.
    pub fn normalize(&self) -> Normalized {
        let g = self.expr.coeff_gcd();
        if g.is_zero() {
            let holds = match self.kind {
                ConstraintKind::Inequality => !self.expr.constant.is_negative(),
                ConstraintKind::Equality => self.expr.constant.is_zero(),
            };
            return if holds { Normalized::Tautology } else { Normalized::Contradiction };
        }
        let mut expr = self.expr.clone();
        match self.kind {
            ConstraintKind::Equality => {
                if !expr.constant.is_multiple_of(&g) {
                    return Normalized::Contradiction;
                }
                // canonical sign: first non-zero coefficient positive
                let first_negative = expr
                    .coeffs
                    .iter()
                    .find(|c| !c.is_zero())
                    .map_or(false, |c| c.is_negative());
                let divisor = if first_negative { -g } else { g };
                expr.constant /= &divisor;
                for c in &mut expr.coeffs {
                    *c /= &divisor;
                }
            }
            ConstraintKind::Inequality => {
                if !g.is_one() {
                    expr.constant = expr.constant.div_floor(&g);
                    for c in &mut expr.coeffs {
                        *c /= &g;
                    }
                }
            }
        }
        Normalized::Constraint(Constraint { expr, kind: self.kind })
    }

    /// Render with the given column names.
    pub fn to_string_with_names(&self, names: &[String]) -> String {
        let expr_str = self.expr.to_string_with_names(names);
        match self.kind {
            ConstraintKind::Inequality => format!("{} >= 0", expr_str),
            ConstraintKind::Equality => format!("{} = 0", expr_str),
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = (0..self.expr.n_cols()).map(|i| format!("x{}", i)).collect();
        write!(f, "{}", self.to_string_with_names(&names))
    }
}

/// Symmetric remainder used by equality reduction: `a - m * floor(a/m + 1/2)`.
pub(crate) fn mod_hat(a: &BigInt, m: &BigInt) -> BigInt {
    let two = BigInt::from(2);
    let q = (a * &two + m).div_floor(&(m * &two));
    a - m * q
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(constant: i64, coeffs: &[i64]) -> LinExpr {
        LinExpr {
            constant: constant.into(),
            coeffs: coeffs.iter().map(|&c| BigInt::from(c)).collect(),
        }
    }

    #[test]
    fn test_eval_and_substitute() {
        // 3 + 2x0 - x1
        let mut e = expr(3, &[2, -1]);
        assert_eq!(e.eval(&[5.into(), 4.into()]), BigInt::from(9));
        // x0 := x1 + 1
        e.substitute(0, &expr(1, &[0, 1]));
        assert_eq!(e, expr(5, &[0, 1]));
    }

    #[test]
    fn test_normalize_tightens_inequality() {
        // 2x + 3 >= 0  ->  x + 1 >= 0
        let c = Constraint::ge_zero(expr(3, &[2]));
        assert_eq!(c.normalize(), Normalized::Constraint(Constraint::ge_zero(expr(1, &[1]))));
    }

    #[test]
    fn test_normalize_equality() {
        assert_eq!(Constraint::eq_zero(expr(3, &[2, 4])).normalize(), Normalized::Contradiction);
        assert_eq!(
            Constraint::eq_zero(expr(-4, &[-2, 6])).normalize(),
            Normalized::Constraint(Constraint::eq_zero(expr(2, &[1, -3])))
        );
        assert_eq!(Constraint::eq_zero(expr(0, &[0])).normalize(), Normalized::Tautology);
    }

    #[test]
    fn test_negate_equality() {
        let c = Constraint::eq_zero(expr(0, &[1]));
        let neg = c.negate();
        assert_eq!(neg.len(), 2);
        assert!(neg[0].is_satisfied(&[1.into()]));
        assert!(neg[1].is_satisfied(&[(-1).into()]));
        assert!(!neg.iter().any(|n| n.is_satisfied(&[0.into()])));
    }

    #[test]
    fn test_mod_hat() {
        let m = BigInt::from(4);
        assert_eq!(mod_hat(&BigInt::from(3), &m), BigInt::from(-1));
        assert_eq!(mod_hat(&BigInt::from(-3), &m), BigInt::from(1));
        assert_eq!(mod_hat(&BigInt::from(6), &m), BigInt::from(-2));
    }

    #[test]
    fn test_display() {
        let e = expr(-5, &[2, -1]);
        assert_eq!(e.to_string_with_names(&["i".into(), "N".into()]), "2*i - N - 5");
    }
}
