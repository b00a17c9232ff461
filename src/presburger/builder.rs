//! Symbolic construction of sets and maps.
//!
//! [`PBBuildExpr`] is a small expression algebra over named variables. A
//! builder collects tuple entries and constraints, renders them into the
//! relation text syntax and parses the result.

use super::map::PBMap;
use super::set::PBSet;
use super::PBCtx;
use num_bigint::BigInt;
use std::fmt;
use std::ops::{Add, Mul, Neg, Not, Sub};

/// Comparison operators of [`PBBuildExpr::Cmp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    /// `<`
    LT,
    /// `<=`
    LE,
    /// `>`
    GT,
    /// `>=`
    GE,
    /// `=`
    EQ,
    /// `!=`
    NE,
}

impl CmpOp {
    /// The operator testing the opposite outcome.
    pub fn negated(self) -> Self {
        match self {
            CmpOp::LT => CmpOp::GE,
            CmpOp::LE => CmpOp::GT,
            CmpOp::GT => CmpOp::LE,
            CmpOp::GE => CmpOp::LT,
            CmpOp::EQ => CmpOp::NE,
            CmpOp::NE => CmpOp::EQ,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            CmpOp::LT => "<",
            CmpOp::LE => "<=",
            CmpOp::GT => ">",
            CmpOp::GE => ">=",
            CmpOp::EQ => "=",
            CmpOp::NE => "!=",
        }
    }
}

/// An integer or boolean expression over named variables.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PBBuildExpr {
    Int(BigInt),
    Bool(bool),
    Var(String),
    Neg(Box<PBBuildExpr>),
    Add(Box<PBBuildExpr>, Box<PBBuildExpr>),
    Sub(Box<PBBuildExpr>, Box<PBBuildExpr>),
    Mul(Box<PBBuildExpr>, Box<PBBuildExpr>),
    FloorDiv(Box<PBBuildExpr>, Box<PBBuildExpr>),
    CeilDiv(Box<PBBuildExpr>, Box<PBBuildExpr>),
    Mod(Box<PBBuildExpr>, Box<PBBuildExpr>),
    Min(Box<PBBuildExpr>, Box<PBBuildExpr>),
    Max(Box<PBBuildExpr>, Box<PBBuildExpr>),
    Cmp(CmpOp, Box<PBBuildExpr>, Box<PBBuildExpr>),
    And(Box<PBBuildExpr>, Box<PBBuildExpr>),
    Or(Box<PBBuildExpr>, Box<PBBuildExpr>),
    Not(Box<PBBuildExpr>),
    Exists(Vec<String>, Box<PBBuildExpr>),
}

use PBBuildExpr as E;

fn bx(e: PBBuildExpr) -> Box<PBBuildExpr> {
    Box::new(e)
}

impl PBBuildExpr {
    /// Integer literal.
    pub fn int(v: impl Into<BigInt>) -> Self {
        E::Int(v.into())
    }

    /// Named variable.
    pub fn var(name: impl Into<String>) -> Self {
        E::Var(name.into())
    }

    pub fn floor_div(self, d: impl Into<PBBuildExpr>) -> Self {
        E::FloorDiv(bx(self), bx(d.into()))
    }

    pub fn ceil_div(self, d: impl Into<PBBuildExpr>) -> Self {
        E::CeilDiv(bx(self), bx(d.into()))
    }

    /// Remainder, non-negative for a positive modulus.
    pub fn modulo(self, m: impl Into<PBBuildExpr>) -> Self {
        E::Mod(bx(self), bx(m.into()))
    }

    pub fn min(self, other: impl Into<PBBuildExpr>) -> Self {
        E::Min(bx(self), bx(other.into()))
    }

    pub fn max(self, other: impl Into<PBBuildExpr>) -> Self {
        E::Max(bx(self), bx(other.into()))
    }

    pub fn cmp(self, op: CmpOp, other: impl Into<PBBuildExpr>) -> Self {
        E::Cmp(op, bx(self), bx(other.into()))
    }

    pub fn lt(self, other: impl Into<PBBuildExpr>) -> Self {
        self.cmp(CmpOp::LT, other)
    }

    pub fn le(self, other: impl Into<PBBuildExpr>) -> Self {
        self.cmp(CmpOp::LE, other)
    }

    pub fn gt(self, other: impl Into<PBBuildExpr>) -> Self {
        self.cmp(CmpOp::GT, other)
    }

    pub fn ge(self, other: impl Into<PBBuildExpr>) -> Self {
        self.cmp(CmpOp::GE, other)
    }

    pub fn eq(self, other: impl Into<PBBuildExpr>) -> Self {
        self.cmp(CmpOp::EQ, other)
    }

    pub fn ne(self, other: impl Into<PBBuildExpr>) -> Self {
        self.cmp(CmpOp::NE, other)
    }

    pub fn and(self, other: impl Into<PBBuildExpr>) -> Self {
        match (self, other.into()) {
            (E::Bool(true), x) | (x, E::Bool(true)) => x,
            (a, b) => E::And(bx(a), bx(b)),
        }
    }

    pub fn or(self, other: impl Into<PBBuildExpr>) -> Self {
        match (self, other.into()) {
            (E::Bool(false), x) | (x, E::Bool(false)) => x,
            (a, b) => E::Or(bx(a), bx(b)),
        }
    }

    /// Conjunction of all items; `true` when empty.
    pub fn all(items: impl IntoIterator<Item = PBBuildExpr>) -> Self {
        items.into_iter().fold(E::Bool(true), PBBuildExpr::and)
    }

    /// `exists (names : body)`
    pub fn exists(names: Vec<String>, body: PBBuildExpr) -> Self {
        if names.is_empty() {
            body
        } else {
            E::Exists(names, bx(body))
        }
    }
}

impl From<i64> for PBBuildExpr {
    fn from(v: i64) -> Self {
        E::Int(v.into())
    }
}

impl From<BigInt> for PBBuildExpr {
    fn from(v: BigInt) -> Self {
        E::Int(v)
    }
}

impl From<bool> for PBBuildExpr {
    fn from(b: bool) -> Self {
        E::Bool(b)
    }
}

impl<T: Into<PBBuildExpr>> Add<T> for PBBuildExpr {
    type Output = PBBuildExpr;

    fn add(self, rhs: T) -> PBBuildExpr {
        E::Add(bx(self), bx(rhs.into()))
    }
}

impl<T: Into<PBBuildExpr>> Sub<T> for PBBuildExpr {
    type Output = PBBuildExpr;

    fn sub(self, rhs: T) -> PBBuildExpr {
        E::Sub(bx(self), bx(rhs.into()))
    }
}

impl<T: Into<PBBuildExpr>> Mul<T> for PBBuildExpr {
    type Output = PBBuildExpr;

    fn mul(self, rhs: T) -> PBBuildExpr {
        E::Mul(bx(self), bx(rhs.into()))
    }
}

impl Neg for PBBuildExpr {
    type Output = PBBuildExpr;

    fn neg(self) -> PBBuildExpr {
        E::Neg(bx(self))
    }
}

impl Not for PBBuildExpr {
    type Output = PBBuildExpr;

    fn not(self) -> PBBuildExpr {
        match self {
            E::Bool(b) => E::Bool(!b),
            E::Not(x) => *x,
            x => E::Not(bx(x)),
        }
    }
}

impl fmt::Display for PBBuildExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            E::Int(v) if v.sign() == num_bigint::Sign::Minus => write!(f, "({})", v),
            E::Int(v) => write!(f, "{}", v),
            E::Bool(b) => write!(f, "{}", b),
            E::Var(n) => write!(f, "{}", n),
            E::Neg(a) => write!(f, "(-{})", a),
            E::Add(a, b) => write!(f, "({} + {})", a, b),
            E::Sub(a, b) => write!(f, "({} - {})", a, b),
            E::Mul(a, b) => write!(f, "({} * {})", a, b),
            E::FloorDiv(a, b) => write!(f, "floor({} / {})", a, b),
            E::CeilDiv(a, b) => write!(f, "ceil({} / {})", a, b),
            E::Mod(a, b) => write!(f, "({} mod {})", a, b),
            E::Min(a, b) => write!(f, "min({}, {})", a, b),
            E::Max(a, b) => write!(f, "max({}, {})", a, b),
            E::Cmp(op, a, b) => write!(f, "({} {} {})", a, op.symbol(), b),
            E::And(a, b) => write!(f, "({} and {})", a, b),
            E::Or(a, b) => write!(f, "({} or {})", a, b),
            E::Not(a) => write!(f, "(not {})", a),
            E::Exists(names, body) => write!(f, "(exists ({} : {}))", names.join(", "), body),
        }
    }
}

/// State shared by set and map builders: variable names and constraints.
#[derive(Debug, Clone, Default)]
pub struct PBBuilder {
    anon_var_num: usize,
    named_vars: Vec<String>,
    params: Vec<String>,
    constraints: Vec<PBBuildExpr>,
}

impl PBBuilder {
    /// A fresh variable. An empty name gives an anonymous variable; a taken
    /// name gets a numeric suffix.
    pub fn new_var(&mut self, name: &str) -> PBBuildExpr {
        let name = if name.is_empty() {
            let n = format!("_v{}", self.anon_var_num);
            self.anon_var_num += 1;
            n
        } else {
            name.to_string()
        };
        let mut unique = name.clone();
        let mut k = 1;
        while self.named_vars.contains(&unique) || self.params.contains(&unique) {
            unique = format!("{}_{}", name, k);
            k += 1;
        }
        self.named_vars.push(unique.clone());
        E::Var(unique)
    }

    pub fn new_vars(&mut self, n: usize, prefix: &str) -> Vec<PBBuildExpr> {
        (0..n)
            .map(|i| if prefix.is_empty() { self.new_var("") } else { self.new_var(&format!("{}{}", prefix, i)) })
            .collect()
    }

    /// A parameter, shared by name with every other relation.
    pub fn new_param(&mut self, name: &str) -> PBBuildExpr {
        if !self.params.iter().any(|p| p == name) {
            self.params.push(name.to_string());
        }
        E::Var(name.to_string())
    }

    pub fn add_constraint(&mut self, c: impl Into<PBBuildExpr>) {
        let c = c.into();
        if c != E::Bool(true) {
            self.constraints.push(c);
        }
    }

    pub fn add_constraints(&mut self, cs: impl IntoIterator<Item = PBBuildExpr>) {
        for c in cs {
            self.add_constraint(c);
        }
    }

    pub fn constraints(&self) -> &[PBBuildExpr] {
        &self.constraints
    }

    pub fn clear_constraints(&mut self) {
        self.constraints.clear();
    }

    /// Render `[params] -> { <tuples> : exists (<rest> : <constraints>) }`.
    fn render(&self, tuples: &str, entries: &[&PBBuildExpr]) -> String {
        let in_tuple: Vec<&str> = entries
            .iter()
            .filter_map(|e| match e {
                E::Var(n) => Some(n.as_str()),
                _ => None,
            })
            .collect();
        let hidden: Vec<String> =
            self.named_vars.iter().filter(|v| !in_tuple.contains(&v.as_str())).cloned().collect();
        let mut out = String::new();
        if !self.params.is_empty() {
            out.push_str(&format!("[{}] -> ", self.params.join(", ")));
        }
        out.push_str("{ ");
        out.push_str(tuples);
        if !self.constraints.is_empty() {
            let body = self.constraints.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(" and ");
            if hidden.is_empty() {
                out.push_str(&format!(" : {}", body));
            } else {
                out.push_str(&format!(" : exists ({} : {})", hidden.join(", "), body));
            }
        }
        out.push_str(" }");
        out
    }
}

/// Access to the shared builder state.
pub trait BuildConstraints {
    fn builder_mut(&mut self) -> &mut PBBuilder;

    fn new_var(&mut self, name: &str) -> PBBuildExpr {
        self.builder_mut().new_var(name)
    }

    fn new_param(&mut self, name: &str) -> PBBuildExpr {
        self.builder_mut().new_param(name)
    }

    fn add_constraint(&mut self, c: impl Into<PBBuildExpr>) {
        self.builder_mut().add_constraint(c)
    }

    fn add_constraints(&mut self, cs: impl IntoIterator<Item = PBBuildExpr>) {
        self.builder_mut().add_constraints(cs)
    }
}

fn tuple_text(entries: &[PBBuildExpr]) -> String {
    format!("[{}]", entries.iter().map(|e| e.to_string()).collect::<Vec<_>>().join(", "))
}

/// Builds a [`PBSet`].
#[derive(Debug, Clone, Default)]
pub struct PBSetBuilder {
    base: PBBuilder,
    vars: Vec<PBBuildExpr>,
}

impl BuildConstraints for PBSetBuilder {
    fn builder_mut(&mut self) -> &mut PBBuilder {
        &mut self.base
    }
}

impl PBSetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a tuple entry.
    pub fn add_var(&mut self, e: PBBuildExpr) {
        self.vars.push(e);
    }

    /// Create a variable and append it to the tuple.
    pub fn new_tuple_var(&mut self, name: &str) -> PBBuildExpr {
        let v = self.base.new_var(name);
        self.vars.push(v.clone());
        v
    }

    pub fn vars(&self) -> &[PBBuildExpr] {
        &self.vars
    }

    /// The relation text this builder describes.
    pub fn to_text(&self) -> String {
        let entries: Vec<&PBBuildExpr> = self.vars.iter().collect();
        self.base.render(&tuple_text(&self.vars), &entries)
    }

    /// Parse the rendered text.
    ///
    /// # Panics
    ///
    /// Panics when the rendered text does not parse, which means the
    /// builder was fed an expression outside the supported fragment.
    pub fn build<'c>(&self, ctx: &'c PBCtx) -> PBSet<'c> {
        let text = self.to_text();
        log::trace!("build set {}", text);
        match PBSet::parse(ctx, &text) {
            Ok(s) => s,
            Err(e) => panic!("cannot build set from `{}`: {}", text, e),
        }
    }
}

/// Builds a [`PBMap`].
#[derive(Debug, Clone, Default)]
pub struct PBMapBuilder {
    base: PBBuilder,
    inputs: Vec<PBBuildExpr>,
    outputs: Vec<PBBuildExpr>,
}

impl BuildConstraints for PBMapBuilder {
    fn builder_mut(&mut self) -> &mut PBBuilder {
        &mut self.base
    }
}

impl PBMapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_input(&mut self, e: PBBuildExpr) {
        self.inputs.push(e);
    }

    pub fn add_inputs(&mut self, es: impl IntoIterator<Item = PBBuildExpr>) {
        self.inputs.extend(es);
    }

    pub fn new_input(&mut self, name: &str) -> PBBuildExpr {
        let v = self.base.new_var(name);
        self.inputs.push(v.clone());
        v
    }

    pub fn add_output(&mut self, e: PBBuildExpr) {
        self.outputs.push(e);
    }

    pub fn add_outputs(&mut self, es: impl IntoIterator<Item = PBBuildExpr>) {
        self.outputs.extend(es);
    }

    pub fn new_output(&mut self, name: &str) -> PBBuildExpr {
        let v = self.base.new_var(name);
        self.outputs.push(v.clone());
        v
    }

    pub fn inputs(&self) -> &[PBBuildExpr] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[PBBuildExpr] {
        &self.outputs
    }

    pub fn to_text(&self) -> String {
        let entries: Vec<&PBBuildExpr> = self.inputs.iter().chain(&self.outputs).collect();
        let tuples = format!("{} -> {}", tuple_text(&self.inputs), tuple_text(&self.outputs));
        self.base.render(&tuples, &entries)
    }

    /// Parse the rendered text.
    ///
    /// # Panics
    ///
    /// Panics when the rendered text does not parse.
    pub fn build<'c>(&self, ctx: &'c PBCtx) -> PBMap<'c> {
        let text = self.to_text();
        log::trace!("build map {}", text);
        match PBMap::parse(ctx, &text) {
            Ok(m) => m,
            Err(e) => panic!("cannot build map from `{}`: {}", text, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_expr() {
        let i = PBBuildExpr::var("i");
        let e = (i.clone() * 2 + 1).floor_div(3).le(PBBuildExpr::var("N") - 1).and(i.ge(0));
        assert_eq!(e.to_string(), "((floor(((i * 2) + 1) / 3) <= (N - 1)) and (i >= 0))");
        assert_eq!(PBBuildExpr::int(-2).to_string(), "(-2)");
    }

    #[test]
    fn test_trivial_connectives_fold() {
        let c = PBBuildExpr::var("x").lt(1);
        assert_eq!(PBBuildExpr::Bool(true).and(c.clone()), c);
        assert_eq!(PBBuildExpr::all(Vec::new()), PBBuildExpr::Bool(true));
        assert_eq!(!!c.clone(), c);
    }

    #[test]
    fn test_set_builder_hides_non_tuple_vars() {
        let mut b = PBSetBuilder::new();
        let n = b.new_param("N");
        let i = b.new_tuple_var("i");
        let e = b.new_var("e");
        b.add_constraint(i.clone().eq(e * 2));
        b.add_constraint(i.clone().ge(0).and(i.lt(n)));
        assert_eq!(
            b.to_text(),
            "[N] -> { [i] : exists (e : (i = (e * 2)) and ((i >= 0) and (i < N))) }"
        );
    }

    #[test]
    fn test_map_builder_text() {
        let mut b = PBMapBuilder::new();
        let i = b.new_input("i");
        b.add_output(i.clone() + 1);
        b.add_constraint(i.clone().ge(0));
        assert_eq!(b.to_text(), "{ [i] -> [(i + 1)] : (i >= 0) }");

        let mut anon = PBMapBuilder::new();
        let v = anon.base.new_vars(2, "");
        assert_eq!(v, vec![PBBuildExpr::var("_v0"), PBBuildExpr::var("_v1")]);
        let dup = anon.new_var("_v0");
        assert_eq!(dup, PBBuildExpr::var("_v0_1"));
    }
}
