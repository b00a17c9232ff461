//! Integration tests for the scheduling session.

use polysched::prelude::*;
use polysched::analysis::AccessBoundMode;
use polysched::ast::expr::{add, int, load, sub, var};
use polysched::ast::stmt::{for_range, labeled, seq, store, var_def};
use polysched::ast::visit::all_stmts;
use polysched::ast::{AccessType, Buffer, DataType};
use std::rc::Rc;

fn args(body: Stmt) -> Stmt {
    let buf = |atype| Buffer::new(vec![int(8), int(8)], DataType::Int32, atype);
    var_def("a", buf(AccessType::InOut), var_def("b", buf(AccessType::InOut), body))
}

/// `Li: for i in i0..4 { Lj: for j in j0..4 { body } }`
fn nest(i0: i64, j0: i64, body: Stmt) -> Stmt {
    let inner = labeled("Lj", for_range("j", int(j0), int(4), body));
    args(labeled("Li", for_range("i", int(i0), int(4), inner)))
}

fn loop_iters(s: &Stmt) -> Vec<String> {
    all_stmts(s)
        .iter()
        .filter_map(|s| match &s.kind {
            StmtKind::For { iter, .. } => Some(iter.clone()),
            _ => None,
        })
        .collect()
}

fn find2(s: &Schedule, a: &str, b: &str) -> (ID, ID) {
    (s.find(a).expect("first label"), s.find(b).expect("second label"))
}

#[test]
fn test_interchange_of_inner_carried_recurrence_accepted() {
    // a[i][j] = a[i][j-1] + 1 for j > 0: the only distance is (0, 1), which
    // stays lexicographically positive as (1, 0) after the interchange, so
    // [j, i] is accepted.
    let body = store("a", vec![var("i"), var("j")], add(load("a", vec![var("i"), sub(var("j"), int(1))]), int(1)));
    let mut s = Schedule::new(nest(0, 1, body));
    let (i, j) = find2(&s, "Li", "Lj");

    let carried_j = FindDeps::new().direction(vec![(j, DepDirection::Different)]);
    let carried_i = FindDeps::new().direction(vec![(i, DepDirection::Different)]);
    assert!(!s.deps(&carried_j).is_empty());
    assert!(s.deps(&carried_i).is_empty());

    s.reorder(&[j, i]).expect("interchange is legal");
    assert_eq!(loop_iters(s.ast()), vec!["j", "i"]);
    assert_eq!(s.log().len(), 1);
    // the recurrence is now carried by the outer loop only
    assert!(!s.deps(&carried_j).is_empty());
    assert!(s.deps(&FindDeps::new().direction(vec![(j, DepDirection::Same), (i, DepDirection::Different)])).is_empty());
}

#[test]
fn test_interchange_reversing_dependence_rejected() {
    // a[i][j] = a[i-1][j+1] + 1: distance (1, -1), interchange would read
    // a value before it is written
    let body = store(
        "a",
        vec![var("i"), var("j")],
        add(load("a", vec![sub(var("i"), int(1)), add(var("j"), int(1))]), int(1)),
    );
    let mut s = Schedule::new(nest(1, 0, body));
    let before = s.ast().clone();
    let (i, j) = find2(&s, "Li", "Lj");

    let err = s.reorder(&[j, i]).unwrap_err();
    assert_eq!(err.kind, ScheduleErrorKind::Dependence);
    assert!(Rc::ptr_eq(s.ast(), &before));
    assert!(s.log().is_empty());
}

#[test]
fn test_interchange_of_independent_nest() {
    let body = store("a", vec![var("i"), var("j")], load("b", vec![var("i"), var("j")]));
    let mut s = Schedule::new(nest(0, 0, body));
    let (i, j) = find2(&s, "Li", "Lj");

    let map = s.reorder(&[j, i]).unwrap();
    assert_eq!(loop_iters(s.ast()), vec!["j", "i"]);
    assert_eq!(s.log().len(), 1);
    assert_eq!(map.get(&i), Some(&i));
    assert_eq!(map.get(&j), Some(&j));
    assert!(map.iter().all(|(old, new)| old == new));
    // the loops keep their identities and labels
    assert_eq!(s.find("Lj").unwrap(), j);
    assert_eq!(s.find("Li").unwrap(), i);
    assert!(s.index().is_ancestor(j, i));
}

#[test]
fn test_statement_swap() {
    let x = labeled("X", store("a", vec![int(0), int(0)], int(1)));
    let y = labeled("Y", store("b", vec![int(0), int(0)], add(load("a", vec![int(0), int(0)]), int(1))));
    let mut s = Schedule::new(args(seq(vec![x, y])));
    let (x, y) = find2(&s, "X", "Y");
    let err = s.swap(&[y, x]).unwrap_err();
    assert_eq!(err.kind, ScheduleErrorKind::Dependence);

    let x = labeled("X", store("a", vec![int(0), int(0)], int(1)));
    let y = labeled("Y", store("b", vec![int(0), int(0)], int(2)));
    let mut s = Schedule::new(args(seq(vec![x, y])));
    let (x, y) = find2(&s, "X", "Y");
    let map = s.swap(&[y, x]).unwrap();
    assert_eq!((map.get(&x), map.get(&y)), (Some(&x), Some(&y)));
    let order: Vec<ID> = all_stmts(s.ast()).iter().filter(|s| s.label.is_some()).map(|s| s.id).collect();
    assert_eq!(order, vec![y, x]);
}

#[test]
fn test_fusion_of_equal_and_unequal_loops() {
    let l0 = labeled("L0", for_range("i", int(0), int(8), store("a", vec![var("i"), int(0)], int(1))));
    let l1 = labeled("L1", for_range("j", int(0), int(8), store("b", vec![var("j"), int(0)], int(2))));
    let mut s = Schedule::new(args(seq(vec![l0, l1])));
    let (l0, l1) = find2(&s, "L0", "L1");
    let fused = s.fuse(l0, l1).unwrap();
    assert_eq!(loop_iters(s.ast()), vec!["i"]);
    let text = s.stmt(fused).unwrap().to_string();
    assert!(text.contains("a[i][0] = 1;"), "{}", text);
    assert!(text.contains("b[i][0] = 2;"), "{}", text);
    assert!(text.find("a[i][0]").unwrap() < text.find("b[i][0]").unwrap());

    let l0 = labeled("L0", for_range("i", int(0), var("n"), store("a", vec![var("i"), int(0)], int(1))));
    let l1 = labeled("L1", for_range("j", int(0), var("m"), store("b", vec![var("j"), int(0)], int(2))));
    let mut s = Schedule::new(args(seq(vec![l0, l1])));
    let (l0, l1) = find2(&s, "L0", "L1");
    assert!(s.fuse(l0, l1).is_err());
    assert_eq!(loop_iters(s.ast()), vec!["i", "j"]);
}

#[test]
fn test_reorder_to_current_order_is_identity() {
    let body = store("a", vec![var("i"), var("j")], load("b", vec![var("i"), var("j")]));
    let ast = nest(0, 0, body);
    let mut s = Schedule::new(ast.clone());
    let (i, j) = find2(&s, "Li", "Lj");
    s.reorder(&[i, j]).unwrap();
    assert!(s.ast().same_structure(&ast));
    assert!(s.log().is_empty());
}

#[test]
fn test_reorder_round_trip() {
    let body = store("a", vec![var("i"), var("j")], add(load("a", vec![var("i"), var("j")]), int(1)));
    let ast = nest(0, 0, body);
    let mut s = Schedule::new(ast.clone());
    let (i, j) = find2(&s, "Li", "Lj");
    s.reorder(&[j, i]).unwrap();
    assert!(!s.ast().same_structure(&ast));
    s.reorder(&[i, j]).unwrap();
    assert!(s.ast().same_structure(&ast));
    assert_eq!(s.log().len(), 2);
}

#[test]
fn test_aborted_transaction_restores_everything() {
    let body = store("a", vec![var("i"), var("j")], load("b", vec![var("i"), var("j")]));
    let ast = nest(0, 0, body);
    let mut s = Schedule::new(ast.clone());
    let ids_before: Vec<ID> = all_stmts(&ast).iter().map(|s| s.id).collect();
    let (i, j) = find2(&s, "Li", "Lj");

    s.begin_transaction();
    s.reorder(&[j, i]).unwrap();
    let (outer, inner) = s.split(i, SplitBy::Factor(2)).unwrap();
    s.merge(outer, inner).unwrap();
    assert_eq!(s.log().len(), 3);
    s.abort_transaction();

    assert!(Rc::ptr_eq(s.ast(), &ast));
    assert!(s.log().is_empty());
    let ids_after: Vec<ID> = all_stmts(s.ast()).iter().map(|s| s.id).collect();
    assert_eq!(ids_before, ids_after);
    assert_eq!(s.find("Li").unwrap(), i);
}

#[test]
fn test_failed_closure_transaction_rolls_back() {
    let l0 = labeled("L0", for_range("i", int(0), int(8), store("a", vec![var("i"), int(0)], int(1))));
    let l1 = labeled("L1", for_range("j", int(0), int(6), store("b", vec![var("j"), int(0)], int(2))));
    let ast = args(seq(vec![l0, l1]));
    let mut s = Schedule::new(ast.clone());
    let (l0, l1) = find2(&s, "L0", "L1");
    let r = s.transaction(|s| {
        s.split(l0, SplitBy::Factor(4))?;
        s.fuse(l0, l1)
    });
    assert!(r.is_err());
    assert!(Rc::ptr_eq(s.ast(), &ast));
}

#[test]
fn test_fission_then_fuse_back() {
    let body = seq(vec![
        labeled("S0", store("a", vec![var("i"), int(0)], int(1))),
        labeled("S1", store("b", vec![var("i"), int(0)], load("a", vec![var("i"), int(0)]))),
    ]);
    let ast = args(labeled("L", for_range("i", int(0), int(8), body)));
    let mut s = Schedule::new(ast.clone());
    let (l, s1) = find2(&s, "L", "S1");
    let (front, back) = s.fission(l, FissionSide::Before, s1).unwrap();
    assert_eq!(loop_iters(s.ast()), vec!["i", "i"]);
    let front_loop = front[&l];
    assert_eq!(back[&l], l);
    assert_ne!(front_loop, l);

    s.fuse(front_loop, l).unwrap();
    assert_eq!(loop_iters(s.ast()), vec!["i"]);
    let text = s.ast().to_string();
    assert!(text.find("a[i][0] = 1;").unwrap() < text.find("b[i][0] = a[i][0];").unwrap(), "{}", text);
    assert!(s.find("S0").is_ok() && s.find("S1").is_ok());
}

#[test]
fn test_move_and_swap_keep_dependent_order() {
    let w = labeled("W", store("a", vec![int(0), int(0)], int(1)));
    let u = labeled("U", store("b", vec![int(1), int(0)], int(3)));
    let r = labeled("R", store("b", vec![int(0), int(0)], load("a", vec![int(0), int(0)])));
    let mut s = Schedule::new(args(seq(vec![w, u, r])));
    let (w, r) = find2(&s, "W", "R");
    let u = s.find("U").unwrap();

    assert_eq!(s.move_to(r, MoveToSide::Before, w).unwrap_err().kind, ScheduleErrorKind::Dependence);
    s.move_to(u, MoveToSide::After, r).unwrap();
    let order: Vec<ID> = all_stmts(s.ast()).iter().filter(|s| s.label.is_some()).map(|s| s.id).collect();
    assert_eq!(order, vec![w, r, u]);
}

#[test]
fn test_replay_reproduces_schedule() {
    let body = store("a", vec![var("i"), var("j")], load("b", vec![var("i"), var("j")]));
    let ast = nest(0, 0, body);

    let mut first = Schedule::new(ast.clone());
    let (i, j) = find2(&first, "Li", "Lj");
    let (outer, inner) = first.split(j, SplitBy::Factor(2)).unwrap();
    first.reorder(&[outer, i, inner]).unwrap();

    let text = serde_json::to_string(first.log()).unwrap();
    let log: ScheduleLog = serde_json::from_str(&text).unwrap();
    assert_eq!(&log, first.log());

    let mut second = Schedule::new(ast);
    second.replay(&log).unwrap();
    assert!(second.ast().same_structure(first.ast()));
    assert_eq!(second.log().len(), 2);
}

#[test]
fn test_tree_json_round_trip_keeps_labels() {
    let body = store("a", vec![var("i"), var("j")], load("b", vec![var("i"), var("j")]));
    let ast = nest(0, 0, body);
    let text = serde_json::to_string(&ast).unwrap();
    let back: Stmt = serde_json::from_str(&text).unwrap();
    assert!(back.same_structure(&ast));

    let mut s = Schedule::new(back);
    let (i, j) = find2(&s, "Li", "Lj");
    s.reorder(&[j, i]).unwrap();
    assert_eq!(loop_iters(s.ast()), vec!["j", "i"]);
}

#[test]
fn test_access_bound_through_session() {
    let body = seq(vec![
        store("t", vec![add(var("i"), int(2))], int(0)),
        store("a", vec![var("i"), int(0)], load("t", vec![add(var("i"), int(2))])),
    ]);
    let local = Buffer::new(vec![int(16)], DataType::Int32, AccessType::Cache);
    let t = var_def("t", local, for_range("i", int(0), int(4), body));
    let def = t.id;
    let s = Schedule::new(args(t));
    let b = s.access_bound(def, AccessBoundMode::All).unwrap();
    assert_eq!(b.lower[0].as_ref().and_then(|e| e.as_int()), Some(2));
    assert_eq!(b.upper[0].as_ref().and_then(|e| e.as_int()), Some(5));
}

#[test]
fn test_auto_fission_fuse_separates_and_regroups() {
    let carried = store("a", vec![var("i"), int(0)], add(load("a", vec![sub(var("i"), int(1)), int(0)]), int(1)));
    let free = store("b", vec![var("i"), int(0)], int(2));
    let l0 = for_range("i", int(1), int(8), seq(vec![carried, free]));
    let l1 = for_range("k", int(1), int(8), store("b", vec![var("k"), int(1)], int(3)));
    let mut s = Schedule::new(args(seq(vec![l0, l1])));
    s.auto_fission_fuse(&mut DepDiffDecider);

    // the carried statement gets its own loop; the two free parts end up
    // together
    assert_eq!(loop_iters(s.ast()).len(), 2);
    assert!(s.log().len() >= 2);
}
