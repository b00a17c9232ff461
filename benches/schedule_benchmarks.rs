//! Benchmarks for the relation engine and the schedule primitives.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use polysched::analysis::{DepDirection, FindDeps};
use polysched::ast::expr::{add, int, load, mul, var};
use polysched::ast::stmt::{for_range, labeled, reduce_to, var_def};
use polysched::ast::{AccessType, Buffer, DataType, ReduceOp, Stmt};
use polysched::presburger::{PBCtx, PBSet};
use polysched::schedule::Schedule;

/// `C[i][j] += A[i][k] * B[k][j]` over an `n`-sized cube.
fn matmul(n: i64) -> Stmt {
    let buf = |atype| Buffer::new(vec![int(n), int(n)], DataType::Float32, atype);
    let body = reduce_to(
        "C",
        vec![var("i"), var("j")],
        ReduceOp::Add,
        mul(load("A", vec![var("i"), var("k")]), load("B", vec![var("k"), var("j")])),
    );
    let k = labeled("Lk", for_range("k", int(0), int(n), body));
    let j = labeled("Lj", for_range("j", int(0), int(n), k));
    let i = labeled("Li", for_range("i", int(0), int(n), j));
    var_def("A", buf(AccessType::Input), var_def("B", buf(AccessType::Input), var_def("C", buf(AccessType::InOut), i)))
}

/// A stencil with a carried dependence on both loops.
fn stencil(n: i64) -> Stmt {
    let body = polysched::ast::stmt::store(
        "a",
        vec![var("i"), var("j")],
        add(load("a", vec![add(var("i"), int(-1)), var("j")]), load("a", vec![var("i"), add(var("j"), int(-1))])),
    );
    let j = labeled("Lj", for_range("j", int(1), int(n), body));
    let i = labeled("Li", for_range("i", int(1), int(n), j));
    var_def("a", Buffer::new(vec![int(n), int(n)], DataType::Float32, AccessType::InOut), i)
}

/// Benchmark emptiness tests.
fn bench_emptiness(c: &mut Criterion) {
    let ctx = PBCtx::new();
    let text = "[N] -> { [i, j, k] : 0 <= i < N and 0 <= j < N and 0 <= k < N \
                and i + j = 2k + 1 and exists (e : i = 3e + 1) }";
    c.bench_function("parse_and_test_empty", |b| {
        b.iter(|| PBSet::parse(&ctx, black_box(text)).unwrap().is_empty())
    });

    let a = PBSet::parse(&ctx, "{ [i, j] : 0 <= i < 64 and 0 <= j < 64 }").unwrap();
    let d = PBSet::parse(&ctx, "{ [i, j] : 0 <= i < 64 and i <= j < 64 and (i + j) mod 2 = 0 }").unwrap();
    c.bench_function("subtract_and_test_empty", |b| {
        b.iter(|| black_box(a.clone()).subtract(black_box(d.clone())).is_empty())
    });
}

/// Benchmark dependence queries.
fn bench_find_deps(c: &mut Criterion) {
    let ctx = PBCtx::new();
    let ast = matmul(64);
    let s = Schedule::new(ast.clone());
    let k = s.find("Lk").unwrap();
    c.bench_function("find_deps_matmul_all", |b| {
        b.iter(|| FindDeps::new().ignore_reduction_waw(false).collect(&ctx, black_box(&ast)).len())
    });
    c.bench_function("find_deps_matmul_carried_k", |b| {
        b.iter(|| FindDeps::new().direction(vec![(k, DepDirection::Different)]).exists(&ctx, black_box(&ast)))
    });
}

/// Benchmark loop interchange, legal and rejected.
fn bench_reorder(c: &mut Criterion) {
    let ast = matmul(64);
    c.bench_function("reorder_matmul_kij", |b| {
        b.iter(|| {
            let mut s = Schedule::new(ast.clone());
            let (i, j, k) = (s.find("Li").unwrap(), s.find("Lj").unwrap(), s.find("Lk").unwrap());
            s.reorder(black_box(&[k, i, j])).is_ok()
        })
    });

    let ast = stencil(64);
    c.bench_function("reorder_stencil", |b| {
        b.iter(|| {
            let mut s = Schedule::new(ast.clone());
            let (i, j) = (s.find("Li").unwrap(), s.find("Lj").unwrap());
            s.reorder(black_box(&[j, i])).is_ok()
        })
    });
}

criterion_group!(benches, bench_emptiness, bench_find_deps, bench_reorder);
criterion_main!(benches);
