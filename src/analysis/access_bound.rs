//! Region of a variable actually touched.
//!
//! For each dimension, a symbolic lower and upper bound over the names in
//! scope at the variable's definition (parameters and iterators of the loops
//! around it), plus the condition under which any access happens.

use super::access::{collect_accesses, AccessKind, AccessPoint};
use super::lower::Lowering;
use crate::ast::expr::{self as ex, Expr};
use crate::ast::{Stmt, StmtKind, TreeIndex, ID};
use crate::presburger::{BuildConstraints, DimBounds, LinExpr, PBCtx, PBSet, PBSetBuilder, SymbolicBound};
use crate::utils::{ScheduleError, ScheduleResult};
use log::{debug, trace};
use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{One, Signed, ToPrimitive, Zero};
use std::collections::HashMap;

/// Which accesses to bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessBoundMode {
    Read,
    Write,
    All,
}

impl AccessBoundMode {
    fn accepts(self, kind: AccessKind) -> bool {
        match self {
            AccessBoundMode::Read => kind.is_read(),
            AccessBoundMode::Write => kind.is_write(),
            AccessBoundMode::All => true,
        }
    }
}

/// Bounds of the accessed region, per dimension. `None` means unbounded.
#[derive(Debug, Clone, Default)]
pub struct AccessBound {
    pub lower: Vec<Option<Expr>>,
    pub upper: Vec<Option<Expr>>,
    /// `upper - lower + 1`
    pub len: Vec<Option<Expr>>,
    /// Condition surrounding the accesses; `None` means always
    pub cond: Option<Expr>,
}

/// Build `sum(c_i * names_i) + constant` over the parameter columns.
fn lin_to_expr(e: &LinExpr, names: &[String]) -> Expr {
    let mut out = ex::int(0);
    for (c, name) in e.coeffs.iter().zip(names) {
        if c.is_zero() {
            continue;
        }
        let v = ex::var(name.clone());
        let term = if c.is_one() { v } else { ex::mul_folded(ex::int(to_i64(c)), v) };
        out = if out.as_int() == Some(0) { term } else { ex::add(out, term) };
    }
    ex::add_folded(out, ex::int(to_i64(&e.constant)))
}

fn min_folded(a: Expr, b: Expr) -> Expr {
    match (a.as_int(), b.as_int()) {
        (Some(x), Some(y)) => ex::int(x.min(y)),
        _ => ex::min(a, b),
    }
}

fn max_folded(a: Expr, b: Expr) -> Expr {
    match (a.as_int(), b.as_int()) {
        (Some(x), Some(y)) => ex::int(x.max(y)),
        _ => ex::max(a, b),
    }
}

fn to_i64(v: &BigInt) -> i64 {
    // bounds of real programs fit; saturate otherwise
    v.to_i64().unwrap_or(if v.is_negative() { i64::MIN } else { i64::MAX })
}

fn bound_expr(b: &SymbolicBound, names: &[String], lower: bool) -> Expr {
    if b.expr.is_constant() {
        let (q, r) = b.expr.constant.div_mod_floor(&b.divisor);
        let v = if lower && !r.is_zero() { q + 1 } else { q };
        return ex::int(to_i64(&v));
    }
    let num = lin_to_expr(&b.expr, names);
    if b.divisor.is_one() {
        num
    } else if lower {
        ex::ceil_div(num, ex::int(to_i64(&b.divisor)))
    } else {
        ex::floor_div(num, ex::int(to_i64(&b.divisor)))
    }
}

/// Whether `[c_cst, c_params.., c_dims..]` lies in the coefficient set.
fn verified(coeffs: &PBSet, bound: &SymbolicBound, dim: usize, n_dim: usize, lower: bool) -> bool {
    let sign = if lower { -BigInt::one() } else { BigInt::one() };
    let mut point = vec![&bound.expr.constant * &sign];
    point.extend(bound.expr.coeffs.iter().map(|c| c * &sign));
    for d in 0..n_dim {
        point.push(if d == dim { -&sign * &bound.divisor } else { BigInt::zero() });
    }
    coeffs.contains(&point)
}

fn access_set<'c>(
    ctx: &'c PBCtx,
    a: &AccessPoint,
    extra_cond: Option<&Expr>,
    params: &mut HashMap<String, String>,
) -> PBSet<'c> {
    let mut b = PBSetBuilder::new();
    let mut l = Lowering::new(&mut b);
    let inner = &a.loops[a.def_depth..];
    for j in 0..=inner.len() {
        for c in a.conds.iter().filter(|c| c.depth == a.def_depth + j || (j == 0 && c.depth < a.def_depth)) {
            if let Some(p) = l.cond(&c.cond, c.negated) {
                l.builder().add_constraint(p);
            }
        }
        if j == inner.len() {
            break;
        }
        let lp = &inner[j];
        let k = l.builder().new_var("");
        l.builder().add_constraint(k.clone().ge(0));
        if let Some(len) = l.int(&lp.len) {
            l.builder().add_constraint(k.clone().lt(len));
        }
        let value = match (l.int(&lp.begin), l.int(&lp.step)) {
            (Some(begin), Some(step @ crate::presburger::PBBuildExpr::Int(_))) => begin + k * step,
            _ => l.builder().new_var(""),
        };
        l.bind(&lp.iter, value);
    }
    if let Some(p) = extra_cond.and_then(|c| l.cond(c, false)) {
        l.builder().add_constraint(p);
    }
    let mut dims = Vec::new();
    for (d, idx) in a.indices.iter().enumerate() {
        let o = l.builder().new_var(&format!("d{}", d));
        match l.int(idx) {
            Some(v) => l.builder().add_constraint(o.clone().eq(v)),
            None => {
                if let Some(size) = a.shape.get(d).and_then(|s| l.int(s)) {
                    l.builder().add_constraint(o.clone().ge(0).and(o.clone().lt(size)));
                }
            }
        }
        dims.push(o);
    }
    params.extend(l.params().iter().map(|(k, v)| (k.clone(), v.clone())));
    for o in dims {
        b.add_var(o);
    }
    b.build(ctx)
}

/// Bounds of the region of `var_def` accessed under `mode`, optionally
/// assuming `extra_cond`. With `verify`, every bound is checked against the
/// coefficient set of the region and dropped if it does not hold.
pub fn compute_access_bound(
    ctx: &PBCtx,
    root: &Stmt,
    var_def: ID,
    mode: AccessBoundMode,
    extra_cond: Option<&Expr>,
    verify: bool,
) -> ScheduleResult<AccessBound> {
    let index = TreeIndex::build(root);
    let n_dim = match index.get(var_def).map(|s| &s.kind) {
        Some(StmtKind::VarDef { buffer, .. }) => buffer.shape.len(),
        _ => return Err(ScheduleError::not_found(format!("VarDef {} not found", var_def))),
    };
    let accesses: Vec<_> = collect_accesses(root)
        .into_iter()
        .filter(|a| a.def == Some(var_def) && mode.accepts(a.kind) && a.indices.len() == n_dim)
        .collect();

    let mut result = AccessBound {
        lower: vec![None; n_dim],
        upper: vec![None; n_dim],
        len: vec![None; n_dim],
        cond: None,
    };
    if accesses.is_empty() {
        debug!("no access to {} under {:?}", var_def, mode);
        result.cond = Some(ex::boolean(false));
        return Ok(result);
    }

    // per dimension: one candidate list per basic set, over all accesses
    let mut lowers: Vec<Vec<Option<Expr>>> = vec![Vec::new(); n_dim];
    let mut uppers: Vec<Vec<Option<Expr>>> = vec![Vec::new(); n_dim];
    let mut conds: Vec<Option<Expr>> = Vec::new();
    for a in &accesses {
        let mut params = HashMap::new();
        let mut set = access_set(ctx, a, extra_cond, &mut params);
        set.coalesce();
        if set.is_empty() {
            continue;
        }
        trace!("access region of {}: {}", a, set);
        let names: Vec<String> =
            set.space().params.iter().map(|p| params.get(p).cloned().unwrap_or_else(|| p.clone())).collect();
        let coeffs = (verify && set.n_basic_set() == 1).then(|| set.coefficients());
        for d in 0..n_dim {
            for part in set.bounds_of(d) {
                let DimBounds { lower, upper, cond } = part;
                let pick = |bounds: &[SymbolicBound], is_lower: bool| -> Option<Expr> {
                    let kept: Vec<Expr> = bounds
                        .iter()
                        .filter(|b| coeffs.as_ref().map_or(true, |c| verified(c, b, d, n_dim, is_lower)))
                        .map(|b| bound_expr(b, &names, is_lower))
                        .collect();
                    let fold = if is_lower { max_folded } else { min_folded };
                    kept.into_iter().reduce(fold)
                };
                lowers[d].push(pick(&lower, true));
                uppers[d].push(pick(&upper, false));
                if d == 0 {
                    let c = cond
                        .iter()
                        .map(|c| ex::ge(lin_to_expr(c, &names), ex::int(0)))
                        .reduce(ex::land);
                    conds.push(c);
                }
            }
        }
    }

    for d in 0..n_dim {
        let lo: Option<Vec<Expr>> = lowers[d].iter().cloned().collect();
        let hi: Option<Vec<Expr>> = uppers[d].iter().cloned().collect();
        result.lower[d] = lo.and_then(|v| v.into_iter().reduce(min_folded));
        result.upper[d] = hi.and_then(|v| v.into_iter().reduce(max_folded));
        if let (Some(l), Some(u)) = (&result.lower[d], &result.upper[d]) {
            result.len[d] = Some(ex::add_folded(ex::sub_folded(u.clone(), l.clone()), ex::int(1)));
        }
    }
    // the accesses happen when any part is feasible
    result.cond = if conds.iter().any(Option::is_none) { None } else { conds.into_iter().flatten().reduce(ex::lor) };
    Ok(result)
}
