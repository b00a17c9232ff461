//! Exhaustive small-bound checks of reorder, swap and fuse.
//!
//! A tiny interpreter runs a tree and records every memory access together
//! with the statement instance it belongs to. Two runs are compared pair by
//! pair: an access pair to one element, at least one a write, that appears
//! in opposite orders is a reversed dependence. Rewrites that move
//! statements under other loops are compared by final memory instead.

use polysched::ast::expr::{add, int, load, var};
use polysched::ast::stmt::{for_loop, for_range, labeled, seq, store, var_def};
use polysched::ast::{AccessType, BinaryOp, Buffer, DataType, Expr, ExprKind, ForProperty, Stmt, StmtKind, UnaryOp, ID};
use polysched::schedule::Schedule;
use std::collections::{BTreeMap, HashMap};

/// One access: the statement instance, its ordinal inside the instance,
/// the element touched and whether it was a write.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Event {
    stmt: ID,
    env: Vec<(String, i64)>,
    ordinal: usize,
    var: String,
    elem: Vec<i64>,
    write: bool,
}

#[derive(Default)]
struct Machine {
    env: BTreeMap<String, i64>,
    mem: HashMap<(String, Vec<i64>), i64>,
    trace: Vec<Event>,
    stmt: Option<ID>,
    ordinal: usize,
}

impl Machine {
    fn record(&mut self, var: &str, elem: Vec<i64>, write: bool) {
        let stmt = self.stmt.expect("access outside a statement");
        self.trace.push(Event {
            stmt,
            env: self.env.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            ordinal: self.ordinal,
            var: var.to_string(),
            elem,
            write,
        });
        self.ordinal += 1;
    }

    fn eval(&mut self, e: &Expr) -> i64 {
        match &e.kind {
            ExprKind::IntConst(v) => *v,
            ExprKind::BoolConst(b) => *b as i64,
            ExprKind::Var(n) => *self.env.get(n).unwrap_or_else(|| panic!("unbound {}", n)),
            ExprKind::Load { var, indices } => {
                let elem: Vec<i64> = indices.iter().map(|i| self.eval(i)).collect();
                self.record(var, elem.clone(), false);
                self.mem.get(&(var.clone(), elem.clone())).copied().unwrap_or_else(|| initial(var, &elem))
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let (a, b) = (self.eval(lhs), self.eval(rhs));
                match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::FloorDiv => a.div_euclid(b),
                    BinaryOp::CeilDiv => -((-a).div_euclid(b)),
                    BinaryOp::Mod => a.rem_euclid(b),
                    BinaryOp::Min => a.min(b),
                    BinaryOp::Max => a.max(b),
                    BinaryOp::LT => (a < b) as i64,
                    BinaryOp::LE => (a <= b) as i64,
                    BinaryOp::GT => (a > b) as i64,
                    BinaryOp::GE => (a >= b) as i64,
                    BinaryOp::EQ => (a == b) as i64,
                    BinaryOp::NE => (a != b) as i64,
                    BinaryOp::LAnd => (a != 0 && b != 0) as i64,
                    BinaryOp::LOr => (a != 0 || b != 0) as i64,
                }
            }
            ExprKind::Unary { op, operand } => {
                let v = self.eval(operand);
                match op {
                    UnaryOp::Neg => -v,
                    UnaryOp::LNot => (v == 0) as i64,
                }
            }
            ExprKind::IfExpr { cond, then_case, else_case } => {
                if self.eval(cond) != 0 {
                    self.eval(then_case)
                } else {
                    self.eval(else_case)
                }
            }
        }
    }

    fn run(&mut self, s: &Stmt) {
        match &s.kind {
            StmtKind::StmtSeq { stmts } => stmts.iter().for_each(|c| self.run(c)),
            StmtKind::VarDef { body, .. } | StmtKind::Assert { body, .. } => self.run(body),
            StmtKind::Store { var, indices, expr } => {
                self.begin(s.id);
                let elem: Vec<i64> = indices.iter().map(|i| self.eval(i)).collect();
                let v = self.eval(expr);
                self.record(var, elem.clone(), true);
                self.mem.insert((var.clone(), elem), v);
            }
            StmtKind::ReduceTo { var, indices, expr, .. } => {
                self.begin(s.id);
                let elem: Vec<i64> = indices.iter().map(|i| self.eval(i)).collect();
                let v = self.eval(expr);
                self.record(var, elem.clone(), false);
                self.record(var, elem.clone(), true);
                let old = self.mem.get(&(var.clone(), elem.clone())).copied().unwrap_or_else(|| initial(var, &elem));
                self.mem.insert((var.clone(), elem), old + v);
            }
            StmtKind::Eval { expr } => {
                self.begin(s.id);
                self.eval(expr);
            }
            StmtKind::For { iter, begin, step, len, body, .. } => {
                self.stmt = Some(s.id);
                let (b, st, n) = (self.eval(begin), self.eval(step), self.eval(len));
                let saved = self.env.get(iter).copied();
                for k in 0..n.max(0) {
                    self.env.insert(iter.clone(), b + st * k);
                    self.run(body);
                }
                match saved {
                    Some(v) => self.env.insert(iter.clone(), v),
                    None => self.env.remove(iter),
                };
            }
            StmtKind::If { cond, then_case, else_case } => {
                self.stmt = Some(s.id);
                if self.eval(cond) != 0 {
                    self.run(then_case);
                } else if let Some(e) = else_case {
                    self.run(e);
                }
            }
        }
    }

    fn begin(&mut self, id: ID) {
        self.stmt = Some(id);
        self.ordinal = 0;
    }
}

/// Value of an element never written: distinct per element so that a
/// misplaced read shows up in the result.
fn initial(var: &str, elem: &[i64]) -> i64 {
    elem.iter().fold(var.len() as i64 * 7919, |h, x| h * 31 + x)
}

fn memory(s: &Stmt) -> HashMap<(String, Vec<i64>), i64> {
    let mut m = Machine::default();
    m.run(s);
    m.mem
}

fn trace(s: &Stmt) -> Vec<Event> {
    let mut m = Machine::default();
    m.run(s);
    m.trace
}

/// Whether some conflicting pair runs in opposite orders in `a` and `b`.
/// Both runs must perform the same accesses.
fn reversed(a: &[Event], b: &[Event]) -> bool {
    let pos: HashMap<&Event, usize> = b.iter().enumerate().map(|(k, e)| (e, k)).collect();
    assert_eq!(pos.len(), a.len(), "the runs access memory differently");
    let mut by_elem: HashMap<(&str, &[i64]), Vec<&Event>> = HashMap::new();
    for e in a {
        by_elem.entry((e.var.as_str(), e.elem.as_slice())).or_default().push(e);
    }
    by_elem.values().any(|events| {
        events.iter().enumerate().any(|(k, x)| {
            events[k + 1..].iter().any(|y| (x.write || y.write) && pos[*x] > pos[*y])
        })
    })
}

fn args(body: Stmt) -> Stmt {
    let buf = || Buffer::new(vec![int(8), int(8)], DataType::Int32, AccessType::InOut);
    var_def("a", buf(), var_def("b", buf(), body))
}

/// `for iter in 1..=3`, counting down when `down` is set.
fn counted(iter: &str, down: bool, body: Stmt) -> Stmt {
    if down {
        for_loop(iter, int(3), int(0), int(-1), int(3), ForProperty::default(), body)
    } else {
        for_range(iter, int(1), int(4), body)
    }
}

fn offset(name: &str, d: i64) -> Expr {
    if d == 0 {
        var(name)
    } else {
        add(var(name), int(d))
    }
}

const OFFSETS: [i64; 3] = [-1, 0, 1];

#[test]
fn test_reorder_matches_simulation() {
    let (mut accepted, mut rejected) = (0, 0);
    for wi in OFFSETS {
        for wj in OFFSETS {
            for ri in OFFSETS {
                for rj in OFFSETS {
                    for transpose in [false, true] {
                        let read = if transpose {
                            load("a", vec![offset("j", rj), offset("i", ri)])
                        } else {
                            load("a", vec![offset("i", ri), offset("j", rj)])
                        };
                        let body = store("a", vec![offset("i", wi), offset("j", wj)], add(read, int(1)));
                        let inner = labeled("Lj", for_range("j", int(1), int(4), body.clone()));
                        let ast = args(labeled("Li", for_range("i", int(1), int(4), inner)));
                        let interchanged = args(for_range("j", int(1), int(4), for_range("i", int(1), int(4), body)));

                        let original = trace(&ast);
                        let must_reject = reversed(&original, &trace(&interchanged));

                        let mut s = Schedule::new(ast.clone());
                        let (i, j) = (s.find("Li").unwrap(), s.find("Lj").unwrap());
                        match s.reorder(&[j, i]) {
                            Ok(_) => {
                                accepted += 1;
                                assert!(!must_reject, "accepted an illegal interchange of {}", ast);
                                assert!(!reversed(&original, &trace(s.ast())), "unsound result for {}", ast);
                            }
                            Err(_) => rejected += 1,
                        }
                    }
                }
            }
        }
    }
    assert!(accepted > 0 && rejected > 0);
}

#[test]
fn test_swap_matches_simulation() {
    let (mut accepted, mut rejected) = (0, 0);
    for o0 in OFFSETS {
        for o1 in OFFSETS {
            for (w0, w1) in [(true, true), (true, false), (false, true), (false, false)] {
                let access = |w: bool, o: i64, other: &str| {
                    if w {
                        store("a", vec![offset("i", o), int(0)], int(1))
                    } else {
                        store(other, vec![var("i"), int(0)], load("a", vec![offset("i", o), int(0)]))
                    }
                };
                let s0 = labeled("S0", access(w0, o0, "b"));
                let s1 = labeled("S1", access(w1, o1, "b"));
                let ast = args(for_range("i", int(1), int(4), seq(vec![s0.clone(), s1.clone()])));
                let swapped = args(for_range("i", int(1), int(4), seq(vec![s1, s0])));

                let original = trace(&ast);
                let must_reject = reversed(&original, &trace(&swapped));

                let mut s = Schedule::new(ast.clone());
                let (a, b) = (s.find("S0").unwrap(), s.find("S1").unwrap());
                match s.swap(&[b, a]) {
                    Ok(_) => {
                        accepted += 1;
                        assert!(!must_reject, "accepted an illegal swap in {}", ast);
                        assert!(!reversed(&original, &trace(s.ast())), "unsound result for {}", ast);
                    }
                    Err(_) => rejected += 1,
                }
            }
        }
    }
    assert!(accepted > 0 && rejected > 0);
}

#[test]
fn test_fuse_matches_simulation() {
    let (mut accepted, mut rejected) = (0, 0);
    for p in -2..=2 {
        for q in -2..=2 {
            for second_writes in [false, true] {
                let body0 = store("a", vec![offset("i", p), int(0)], int(1));
                let body1 = if second_writes {
                    store("a", vec![offset("i", q), int(0)], int(2))
                } else {
                    store("b", vec![var("i"), int(0)], load("a", vec![offset("i", q), int(0)]))
                };
                let l0 = labeled("L0", for_range("i", int(2), int(5), body0.clone()));
                let l1 = labeled("L1", for_range("i", int(2), int(5), body1.clone()));
                let ast = args(seq(vec![l0, l1]));
                let fused = args(for_range("i", int(2), int(5), seq(vec![body0, body1])));

                let original = trace(&ast);
                let must_reject = reversed(&original, &trace(&fused));

                let mut s = Schedule::new(ast.clone());
                let (a, b) = (s.find("L0").unwrap(), s.find("L1").unwrap());
                match s.fuse(a, b) {
                    Ok(_) => {
                        accepted += 1;
                        assert!(!must_reject, "accepted an illegal fusion of {}", ast);
                        assert!(!reversed(&original, &trace(s.ast())), "unsound result for {}", ast);
                    }
                    Err(_) => rejected += 1,
                }
            }
        }
    }
    assert!(accepted > 0 && rejected > 0);
}

#[test]
fn test_reorder_imperfect_nest_keeps_memory() {
    let (mut accepted, mut rejected) = (0, 0);
    for ri in OFFSETS {
        for rj in OFFSETS {
            for pre in [None, Some(("a", -1)), Some(("a", 0)), Some(("b", 0))] {
                for post in [None, Some(0), Some(1)] {
                    let body = store(
                        "a",
                        vec![var("i"), var("j")],
                        add(load("a", vec![offset("i", ri), offset("j", rj)]), int(1)),
                    );
                    let mut stmts = Vec::new();
                    if let Some((buf, po)) = pre {
                        stmts.push(store(buf, vec![var("i"), int(0)], add(load("a", vec![offset("i", po), int(1)]), int(3))));
                    }
                    stmts.push(labeled("Lj", for_range("j", int(1), int(4), body)));
                    if let Some(qo) = post {
                        stmts.push(store("b", vec![var("i"), int(1)], load("a", vec![offset("i", qo), int(2)])));
                    }
                    let ast = args(labeled("Li", for_range("i", int(1), int(4), seq(stmts))));
                    let expected = memory(&ast);

                    let mut s = Schedule::new(ast.clone());
                    let (i, j) = (s.find("Li").unwrap(), s.find("Lj").unwrap());
                    match s.reorder(&[j, i]) {
                        Ok(_) => {
                            accepted += 1;
                            assert_eq!(memory(s.ast()), expected, "{} became {}", ast, s.ast());
                        }
                        Err(_) => rejected += 1,
                    }
                }
            }
        }
    }
    assert!(accepted > 0 && rejected > 0);
}

#[test]
fn test_reorder_three_level_nest_with_negative_steps() {
    let cube = || Buffer::new(vec![int(8), int(8), int(8)], DataType::Int32, AccessType::InOut);
    let steps = [[false, false, false], [true, false, false], [false, true, false], [false, false, true]];
    let orders: [[usize; 3]; 5] = [[0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];
    let (mut accepted, mut rejected) = (0, 0);
    for oi in OFFSETS {
        for oj in OFFSETS {
            for ok in OFFSETS {
                for down in steps {
                    let body = store(
                        "c",
                        vec![var("i"), var("j"), var("k")],
                        add(load("c", vec![offset("i", oi), offset("j", oj), offset("k", ok)]), int(1)),
                    );
                    let lk = labeled("Lk", counted("k", down[2], body));
                    let lj = labeled("Lj", counted("j", down[1], lk));
                    let ast = var_def("c", cube(), labeled("Li", counted("i", down[0], lj)));
                    let expected = memory(&ast);

                    for order in orders {
                        let mut s = Schedule::new(ast.clone());
                        let ids = [s.find("Li").unwrap(), s.find("Lj").unwrap(), s.find("Lk").unwrap()];
                        let wanted: Vec<ID> = order.iter().map(|&p| ids[p]).collect();
                        match s.reorder(&wanted) {
                            Ok(_) => {
                                accepted += 1;
                                assert_eq!(memory(s.ast()), expected, "{} became {}", ast, s.ast());
                            }
                            Err(_) => rejected += 1,
                        }
                    }
                }
            }
        }
    }
    assert!(accepted > 0 && rejected > 0);
}

#[test]
fn test_swap_of_loops_matches_simulation() {
    let (mut accepted, mut rejected) = (0, 0);
    for p in OFFSETS {
        for q in OFFSETS {
            for (w0, w1) in [(true, true), (true, false), (false, true), (false, false)] {
                for down in [false, true] {
                    // readers write b[i][col], writers read b[i][2]
                    let access = |w: bool, o: i64, col: i64| {
                        if w {
                            store("a", vec![offset("i", o), int(0)], add(load("b", vec![var("i"), int(2)]), int(5)))
                        } else {
                            store("b", vec![var("i"), int(col)], add(load("a", vec![offset("i", o), int(0)]), int(1)))
                        }
                    };
                    let l0 = labeled("L0", counted("i", down, access(w0, p, 0)));
                    let l1 = labeled("L1", counted("i", false, access(w1, q, 1)));
                    let ast = args(seq(vec![l0.clone(), l1.clone()]));
                    let swapped = args(seq(vec![l1, l0]));

                    let original = trace(&ast);
                    let must_reject = reversed(&original, &trace(&swapped));
                    let expected = memory(&ast);

                    let mut s = Schedule::new(ast.clone());
                    let (a, b) = (s.find("L0").unwrap(), s.find("L1").unwrap());
                    match s.swap(&[b, a]) {
                        Ok(_) => {
                            accepted += 1;
                            assert!(!must_reject, "accepted an illegal swap in {}", ast);
                            assert_eq!(memory(s.ast()), expected, "{} became {}", ast, s.ast());
                        }
                        Err(_) => rejected += 1,
                    }
                }
            }
        }
    }
    assert!(accepted > 0 && rejected > 0);
}
