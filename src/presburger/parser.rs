//! Text syntax for sets and maps.
//!
//! ```text
//! [N] -> { S[i, j] -> [i + j] : 0 <= i < N and (j = 2i or exists (e : j = 3e)) ; ... }
//! ```
//!
//! Formulas are parsed into [`PBBuildExpr`] and lowered into disjunctive
//! normal form: negations are pushed to the comparisons, `min`/`max` split
//! a basic set in two, and `floor`/`ceil`/`mod` introduce division locals.

use super::basic::{BasicSet, Local};
use super::builder::{CmpOp, PBBuildExpr};
use super::linear::{Constraint, LinExpr};
use super::relation::Relation;
use super::space::{PBSpace, Tuple};
use crate::utils::errors::{PresburgerError, PresburgerErrorKind};
use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{Signed, Zero};
use once_cell::sync::Lazy;
use std::collections::HashSet;

static KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["and", "or", "not", "exists", "floor", "ceil", "mod", "min", "max", "true", "false"]
        .into_iter()
        .collect()
});

type Result<T> = std::result::Result<T, PresburgerError>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Tok {
    Int(BigInt),
    Ident(String),
    Sym(&'static str),
    End,
}

const SYMBOLS: [&str; 24] = [
    "->", "<=", ">=", "==", "!=", "&&", "||", "[", "]", "{", "}", "(", ")", ",", ";", ":", "+",
    "-", "*", "/", "%", "<", ">", "=",
];

fn lex(text: &str) -> Result<Vec<(Tok, usize)>> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut pos = 0;
    'outer: while pos < bytes.len() {
        let c = bytes[pos] as char;
        if c.is_whitespace() {
            pos += 1;
            continue;
        }
        if c.is_ascii_digit() {
            let start = pos;
            while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                pos += 1;
            }
            let v = text[start..pos]
                .parse::<BigInt>()
                .map_err(|e| PresburgerError::new(PresburgerErrorKind::Syntax, start, e.to_string()))?;
            out.push((Tok::Int(v), start));
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' {
            let start = pos;
            while pos < bytes.len()
                && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_' || bytes[pos] == b'\'')
            {
                pos += 1;
            }
            out.push((Tok::Ident(text[start..pos].to_string()), start));
            continue;
        }
        for s in SYMBOLS {
            if text[pos..].starts_with(s) {
                out.push((Tok::Sym(s), pos));
                pos += s.len();
                continue 'outer;
            }
        }
        if c == '!' {
            out.push((Tok::Sym("!"), pos));
            pos += 1;
            continue;
        }
        return Err(PresburgerError::new(
            PresburgerErrorKind::Syntax,
            pos,
            format!("unexpected character `{}`", c),
        ));
    }
    out.push((Tok::End, text.len()));
    Ok(out)
}

struct Parser {
    toks: Vec<(Tok, usize)>,
    pos: usize,
}

/// One `tuple [-> tuple] [: formula]` item of the text.
struct Part {
    offset: usize,
    input: Option<(Option<String>, Vec<PBBuildExpr>)>,
    output: (Option<String>, Vec<PBBuildExpr>),
    formula: PBBuildExpr,
}

impl Parser {
    fn peek(&self) -> &Tok {
        &self.toks[self.pos].0
    }

    fn offset(&self) -> usize {
        self.toks[self.pos].1
    }

    fn bump(&mut self) -> Tok {
        let t = self.toks[self.pos].0.clone();
        if self.pos + 1 < self.toks.len() {
            self.pos += 1;
        }
        t
    }

    fn error<T>(&self, message: impl Into<String>) -> Result<T> {
        Err(PresburgerError::new(PresburgerErrorKind::Syntax, self.offset(), message))
    }

    fn is_sym(&self, s: &str) -> bool {
        matches!(self.peek(), Tok::Sym(x) if *x == s)
    }

    fn is_keyword(&self, k: &str) -> bool {
        matches!(self.peek(), Tok::Ident(x) if x == k)
    }

    fn eat_sym(&mut self, s: &str) -> bool {
        if self.is_sym(s) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, k: &str) -> bool {
        if self.is_keyword(k) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect_sym(&mut self, s: &str) -> Result<()> {
        if self.eat_sym(s) {
            Ok(())
        } else {
            self.error(format!("expected `{}`, found {:?}", s, self.peek()))
        }
    }

    fn ident(&mut self) -> Result<String> {
        match self.peek().clone() {
            Tok::Ident(name) if !KEYWORDS.contains(name.as_str()) => {
                self.bump();
                Ok(name)
            }
            t => self.error(format!("expected a name, found {:?}", t)),
        }
    }

    fn names(&mut self, close: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        if self.is_sym(close) {
            return Ok(names);
        }
        loop {
            names.push(self.ident()?);
            if !self.eat_sym(",") {
                return Ok(names);
            }
        }
    }

    fn input(&mut self) -> Result<(Vec<String>, Vec<Part>)> {
        let mut params = Vec::new();
        if self.eat_sym("[") {
            params = self.names("]")?;
            self.expect_sym("]")?;
            self.expect_sym("->")?;
        }
        self.expect_sym("{")?;
        let mut parts = Vec::new();
        if !self.is_sym("}") {
            loop {
                parts.push(self.part()?);
                if !self.eat_sym(";") {
                    break;
                }
            }
        }
        self.expect_sym("}")?;
        if *self.peek() != Tok::End {
            return self.error("trailing input");
        }
        Ok((params, parts))
    }

    fn part(&mut self) -> Result<Part> {
        let offset = self.offset();
        let mut output = if self.is_sym(":") { (None, Vec::new()) } else { self.tuple()? };
        let mut input = None;
        if self.eat_sym("->") {
            input = Some(output);
            output = self.tuple()?;
        }
        let formula = if self.eat_sym(":") { self.formula()? } else { PBBuildExpr::Bool(true) };
        Ok(Part { offset, input, output, formula })
    }

    fn tuple(&mut self) -> Result<(Option<String>, Vec<PBBuildExpr>)> {
        let name = match self.peek() {
            Tok::Ident(_) => Some(self.ident()?),
            _ => None,
        };
        self.expect_sym("[")?;
        let mut entries = Vec::new();
        if !self.is_sym("]") {
            loop {
                entries.push(self.expr()?);
                if !self.eat_sym(",") {
                    break;
                }
            }
        }
        self.expect_sym("]")?;
        Ok((name, entries))
    }

    fn formula(&mut self) -> Result<PBBuildExpr> {
        let mut f = self.conjunction()?;
        while self.eat_keyword("or") || self.eat_sym("||") {
            f = PBBuildExpr::Or(Box::new(f), Box::new(self.conjunction()?));
        }
        Ok(f)
    }

    fn conjunction(&mut self) -> Result<PBBuildExpr> {
        let mut f = self.negation()?;
        while self.eat_keyword("and") || self.eat_sym("&&") {
            f = PBBuildExpr::And(Box::new(f), Box::new(self.negation()?));
        }
        Ok(f)
    }

    fn negation(&mut self) -> Result<PBBuildExpr> {
        if self.eat_keyword("not") || self.eat_sym("!") {
            return Ok(PBBuildExpr::Not(Box::new(self.negation()?)));
        }
        self.atom()
    }

    fn atom(&mut self) -> Result<PBBuildExpr> {
        if self.eat_keyword("true") {
            return Ok(PBBuildExpr::Bool(true));
        }
        if self.eat_keyword("false") {
            return Ok(PBBuildExpr::Bool(false));
        }
        if self.eat_keyword("exists") {
            self.expect_sym("(")?;
            let names = self.names(":")?;
            self.expect_sym(":")?;
            let body = self.formula()?;
            self.expect_sym(")")?;
            return Ok(PBBuildExpr::Exists(names, Box::new(body)));
        }
        if self.is_sym("(") {
            // a parenthesised formula, unless it turns out to be an operand
            let save = self.pos;
            self.bump();
            if let Ok(f) = self.formula() {
                if self.eat_sym(")") && !self.continues_operand() {
                    return Ok(f);
                }
            }
            self.pos = save;
        }
        self.comparison()
    }

    fn continues_operand(&self) -> bool {
        ["<", "<=", ">", ">=", "=", "==", "!=", "+", "-", "*", "%"].iter().any(|s| self.is_sym(s))
            || self.is_keyword("mod")
    }

    fn cmp_op(&mut self) -> Option<CmpOp> {
        let op = match self.peek() {
            Tok::Sym("<") => CmpOp::LT,
            Tok::Sym("<=") => CmpOp::LE,
            Tok::Sym(">") => CmpOp::GT,
            Tok::Sym(">=") => CmpOp::GE,
            Tok::Sym("=") | Tok::Sym("==") => CmpOp::EQ,
            Tok::Sym("!=") => CmpOp::NE,
            _ => return None,
        };
        self.bump();
        Some(op)
    }

    fn comparison(&mut self) -> Result<PBBuildExpr> {
        let mut lhs = self.expr()?;
        let mut result: Option<PBBuildExpr> = None;
        while let Some(op) = self.cmp_op() {
            let rhs = self.expr()?;
            let c = lhs.cmp(op, rhs.clone());
            result = Some(match result {
                None => c,
                Some(r) => PBBuildExpr::And(Box::new(r), Box::new(c)),
            });
            lhs = rhs;
        }
        match result {
            Some(r) => Ok(r),
            None => self.error("expected a comparison"),
        }
    }

    fn expr(&mut self) -> Result<PBBuildExpr> {
        let mut e = self.term()?;
        loop {
            if self.eat_sym("+") {
                e = e + self.term()?;
            } else if self.eat_sym("-") {
                e = e - self.term()?;
            } else {
                return Ok(e);
            }
        }
    }

    fn starts_factor(&self) -> bool {
        match self.peek() {
            Tok::Ident(name) => {
                !KEYWORDS.contains(name.as_str()) || ["floor", "ceil", "min", "max"].contains(&name.as_str())
            }
            Tok::Sym("(") => true,
            _ => false,
        }
    }

    fn term(&mut self) -> Result<PBBuildExpr> {
        let mut e = self.unary()?;
        loop {
            if self.eat_sym("*") {
                e = e * self.unary()?;
            } else if self.eat_sym("%") || self.eat_keyword("mod") {
                e = e.modulo(self.unary()?);
            } else if matches!(e, PBBuildExpr::Int(_)) && self.starts_factor() {
                // juxtaposition: `2i`, `3(i + 1)`
                e = e * self.primary()?;
            } else {
                return Ok(e);
            }
        }
    }

    fn unary(&mut self) -> Result<PBBuildExpr> {
        if self.eat_sym("-") {
            return Ok(-self.unary()?);
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<PBBuildExpr> {
        match self.peek().clone() {
            Tok::Int(v) => {
                self.bump();
                Ok(PBBuildExpr::Int(v))
            }
            Tok::Sym("(") => {
                self.bump();
                let e = self.expr()?;
                self.expect_sym(")")?;
                Ok(e)
            }
            Tok::Ident(name) if name == "floor" || name == "ceil" => {
                self.bump();
                self.expect_sym("(")?;
                let num = self.expr()?;
                self.expect_sym("/")?;
                let den = self.expr()?;
                self.expect_sym(")")?;
                Ok(if name == "floor" { num.floor_div(den) } else { num.ceil_div(den) })
            }
            Tok::Ident(name) if name == "min" || name == "max" => {
                self.bump();
                self.expect_sym("(")?;
                let mut e = self.expr()?;
                while self.eat_sym(",") {
                    let next = self.expr()?;
                    e = if name == "min" { e.min(next) } else { e.max(next) };
                }
                self.expect_sym(")")?;
                Ok(e)
            }
            Tok::Ident(_) => Ok(PBBuildExpr::Var(self.ident()?)),
            t => self.error(format!("expected an expression, found {:?}", t)),
        }
    }
}

/// Fold an expression to a constant, if it is one.
fn eval_constant(e: &PBBuildExpr) -> Option<BigInt> {
    use PBBuildExpr as E;
    Some(match e {
        E::Int(v) => v.clone(),
        E::Neg(a) => -eval_constant(a)?,
        E::Add(a, b) => eval_constant(a)? + eval_constant(b)?,
        E::Sub(a, b) => eval_constant(a)? - eval_constant(b)?,
        E::Mul(a, b) => eval_constant(a)? * eval_constant(b)?,
        E::FloorDiv(a, b) => {
            let d = eval_constant(b)?;
            if d.is_zero() {
                return None;
            }
            eval_constant(a)?.div_floor(&d)
        }
        E::CeilDiv(a, b) => {
            let d = eval_constant(b)?;
            if d.is_zero() {
                return None;
            }
            -(-eval_constant(a)?).div_floor(&d)
        }
        E::Mod(a, b) => {
            let d = eval_constant(b)?.abs();
            if d.is_zero() {
                return None;
            }
            eval_constant(a)?.mod_floor(&d)
        }
        E::Min(a, b) => eval_constant(a)?.min(eval_constant(b)?),
        E::Max(a, b) => eval_constant(a)?.max(eval_constant(b)?),
        _ => return None,
    })
}

fn pad(mut e: LinExpr, n: usize) -> LinExpr {
    e.coeffs.resize(n, BigInt::zero());
    e
}

/// Lowering of one part into basic sets.
struct Lowering {
    offset: usize,
    env: Vec<(String, usize)>,
}

impl Lowering {
    fn err<T>(&self, kind: PresburgerErrorKind, message: impl Into<String>) -> Result<T> {
        Err(PresburgerError::new(kind, self.offset, message))
    }

    fn lookup(&self, name: &str) -> Option<usize> {
        self.env.iter().rev().find(|(n, _)| n == name).map(|(_, c)| *c)
    }

    fn formula(&mut self, f: &PBBuildExpr, positive: bool, base: BasicSet) -> Result<Vec<BasicSet>> {
        use PBBuildExpr as E;
        match f {
            E::Bool(b) => Ok(if *b == positive { vec![base] } else { Vec::new() }),
            E::Not(a) => self.formula(a, !positive, base),
            E::And(a, b) | E::Or(a, b) => {
                let conjunctive = matches!(f, E::And(..)) == positive;
                if conjunctive {
                    let mut out = Vec::new();
                    for x in self.formula(a, positive, base)? {
                        out.extend(self.formula(b, positive, x)?);
                    }
                    Ok(out)
                } else {
                    let mut out = self.formula(a, positive, base.clone())?;
                    out.extend(self.formula(b, positive, base)?);
                    Ok(out)
                }
            }
            E::Exists(names, body) => {
                if !positive {
                    return self.err(PresburgerErrorKind::Unsupported, "quantifier under negation");
                }
                let mut base = base;
                let depth = self.env.len();
                for n in names {
                    let col = base.add_local(Local::Free);
                    self.env.push((n.clone(), col));
                }
                let out = self.formula(body, true, base);
                self.env.truncate(depth);
                out
            }
            E::Cmp(op, a, b) => {
                let op = if positive { *op } else { op.negated() };
                let mut out = Vec::new();
                for (b1, x) in self.expr(a, base)? {
                    for (mut b2, y) in self.expr(b, b1)? {
                        let n = b2.n_cols();
                        let diff = pad(x.clone(), n) - y; // lhs - rhs
                        let minus_one = |mut e: LinExpr| {
                            e.constant -= 1;
                            e
                        };
                        match op {
                            CmpOp::LT => b2.add_constraint(Constraint::ge_zero(minus_one(-diff))),
                            CmpOp::LE => b2.add_constraint(Constraint::ge_zero(-diff)),
                            CmpOp::GT => b2.add_constraint(Constraint::ge_zero(minus_one(diff))),
                            CmpOp::GE => b2.add_constraint(Constraint::ge_zero(diff)),
                            CmpOp::EQ => b2.add_constraint(Constraint::eq_zero(diff)),
                            CmpOp::NE => {
                                let mut other = b2.clone();
                                other.add_constraint(Constraint::ge_zero(minus_one(-diff.clone())));
                                out.push(other);
                                b2.add_constraint(Constraint::ge_zero(minus_one(diff)));
                            }
                        }
                        out.push(b2);
                    }
                }
                Ok(out)
            }
            _ => self.err(PresburgerErrorKind::Syntax, format!("expected a condition, found `{}`", f)),
        }
    }

    fn constant_of(&self, e: &PBBuildExpr) -> Result<BigInt> {
        match eval_constant(e) {
            Some(v) if !v.is_zero() => Ok(v),
            Some(_) => self.err(PresburgerErrorKind::NonAffine, "division by zero"),
            None => self.err(PresburgerErrorKind::NonAffine, format!("`{}` is not a constant", e)),
        }
    }

    /// Piecewise lowering: each piece extends `base` with its condition.
    fn expr(&mut self, e: &PBBuildExpr, base: BasicSet) -> Result<Vec<(BasicSet, LinExpr)>> {
        use PBBuildExpr as E;
        let n = base.n_cols();
        match e {
            E::Int(v) => Ok(vec![(base, LinExpr::constant(n, v.clone()))]),
            E::Var(name) => match self.lookup(name) {
                Some(col) => Ok(vec![(base, LinExpr::var(n, col))]),
                None => self.err(PresburgerErrorKind::UnknownName, format!("unknown name `{}`", name)),
            },
            E::Neg(a) => Ok(self.expr(a, base)?.into_iter().map(|(b, x)| (b, -x)).collect()),
            E::Add(a, b) | E::Sub(a, b) | E::Mul(a, b) | E::Min(a, b) | E::Max(a, b) => {
                let mut out = Vec::new();
                for (b1, x) in self.expr(a, base)? {
                    for (mut b2, y) in self.expr(b, b1)? {
                        let x = pad(x.clone(), b2.n_cols());
                        match e {
                            E::Add(..) => out.push((b2, x + y)),
                            E::Sub(..) => out.push((b2, x - y)),
                            E::Mul(..) => {
                                let v = if x.is_constant() {
                                    y.scaled(&x.constant)
                                } else if y.is_constant() {
                                    x.scaled(&y.constant)
                                } else {
                                    return self.err(
                                        PresburgerErrorKind::NonAffine,
                                        format!("non-affine product `{}`", e),
                                    );
                                };
                                out.push((b2, v));
                            }
                            _ => {
                                let is_min = matches!(e, E::Min(..));
                                // piece choosing x: x <= y for min, x >= y for max
                                let mut pick_x = b2.clone();
                                let d = if is_min { y.clone() - x.clone() } else { x.clone() - y.clone() };
                                pick_x.add_constraint(Constraint::ge_zero(d.clone()));
                                out.push((pick_x, x));
                                let mut strict = -d;
                                strict.constant -= 1;
                                b2.add_constraint(Constraint::ge_zero(strict));
                                out.push((b2, y));
                            }
                        }
                    }
                }
                Ok(out)
            }
            E::FloorDiv(a, d) | E::CeilDiv(a, d) => {
                let den = self.constant_of(d)?;
                let ceil = matches!(e, E::CeilDiv(..));
                let mut out = Vec::new();
                for (mut b, x) in self.expr(a, base)? {
                    // floor(x / -d) = floor(-x / d); ceil(x / d) = -floor(-x / d)
                    let mut num = if den.is_negative() { -x } else { x };
                    if ceil {
                        num = -num;
                    }
                    let col = b.add_div(num, den.abs());
                    let mut v = LinExpr::var(b.n_cols(), col);
                    if ceil {
                        v = -v;
                    }
                    out.push((b, v));
                }
                Ok(out)
            }
            E::Mod(a, m) => {
                let m = self.constant_of(m)?.abs();
                let mut out = Vec::new();
                for (mut b, x) in self.expr(a, base)? {
                    let col = b.add_div(x.clone(), m.clone());
                    let n = b.n_cols();
                    let mut v = pad(x, n);
                    v.coeffs[col] -= &m;
                    out.push((b, v));
                }
                Ok(out)
            }
            _ => self.err(PresburgerErrorKind::Syntax, format!("expected an expression, found `{}`", e)),
        }
    }
}

fn tuple_of(
    lowering: &mut Lowering,
    entries: &[PBBuildExpr],
    prefix: &str,
    first_col: usize,
    name: Option<String>,
    extra: &mut Vec<PBBuildExpr>,
) -> Tuple {
    let mut dims = Vec::with_capacity(entries.len());
    for (k, e) in entries.iter().enumerate() {
        let col = first_col + k;
        match e {
            PBBuildExpr::Var(n) if lowering.lookup(n).is_none() => {
                lowering.env.push((n.clone(), col));
                dims.push(n.clone());
            }
            _ => {
                let hidden = format!("#{}{}", prefix, k);
                lowering.env.push((hidden.clone(), col));
                extra.push(PBBuildExpr::Var(hidden).eq(e.clone()));
                dims.push(format!("{}{}", prefix, k));
            }
        }
    }
    Tuple { name, dims }
}

/// Parse relation text into a relation.
pub(crate) fn parse(text: &str) -> Result<Relation> {
    let mut parser = Parser { toks: lex(text)?, pos: 0 };
    let (params, parts) = parser.input()?;
    let mut space: Option<PBSpace> = None;
    let mut basics = Vec::new();
    for part in parts {
        let mut lowering = Lowering {
            offset: part.offset,
            env: params.iter().cloned().enumerate().map(|(i, p)| (p, i)).collect(),
        };
        let np = params.len();
        let mut extra = Vec::new();
        let input = part.input.map(|(name, entries)| tuple_of(&mut lowering, &entries, "i", np, name, &mut extra));
        let n_in = input.as_ref().map_or(0, Tuple::len);
        let (out_name, out_entries) = part.output;
        let out_prefix = if input.is_some() { "o" } else { "i" };
        let output = tuple_of(&mut lowering, &out_entries, out_prefix, np + n_in, out_name, &mut extra);
        let this = match input {
            Some(input) => PBSpace::map(params.clone(), input, output),
            None => PBSpace::set(params.clone(), output),
        };
        match &space {
            None => space = Some(this.clone()),
            Some(s) if !s.is_compatible(&this) => {
                return Err(PresburgerError::new(
                    PresburgerErrorKind::Unsupported,
                    part.offset,
                    format!("disjunct {} does not match {}", this, s),
                ))
            }
            Some(_) => {}
        }
        let formula = extra.into_iter().fold(part.formula, PBBuildExpr::and);
        let base = BasicSet::universe(this.n_fixed());
        for mut b in lowering.formula(&formula, true, base)? {
            if b.simplify() {
                basics.push(b);
            }
        }
    }
    let space = space.unwrap_or_else(|| PBSpace::set(params, Tuple::default()));
    Ok(Relation { space, parts: basics })
}
