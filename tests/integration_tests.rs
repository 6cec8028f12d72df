//! Integration tests for the scheduling, analysis and lowering pipeline.

use polyforge::kernels::{self, KernelSize};
use polyforge::prelude::*;

fn small() -> KernelSize {
    KernelSize { n: 16, steps: 4 }
}

fn recurrence() -> (Function, CompId) {
    let mut f = Function::new("recurrence");
    f.buffer("bA", vec![Expr::var("N")], PrimType::Int32, ArgumentRole::Output);
    let a = f
        .computation(
            "A",
            "[N] -> { A[i] : 1 <= i < N }",
            Expr::access("A", vec![Expr::var("i") - 1]) + 1,
            PrimType::Int32,
        )
        .expect("valid domain");
    f.store_in(a, "bA").expect("known buffer");
    (f, a)
}

#[test]
fn test_align_gives_equal_dimensionality() {
    let mut f = Function::new("align");
    let a = f.computation("A", "{ A[i] : 0 <= i < 8 }", Expr::int(0), PrimType::Int32).unwrap();
    let b = f.computation("B", "{ B[i, j] : 0 <= i < 8 and 0 <= j < 8 }", Expr::int(1), PrimType::Int32).unwrap();
    let c = f
        .computation("C", "{ C[i, j, k] : 0 <= i < 8 and 0 <= j < 8 and 0 <= k < 8 }", Expr::int(2), PrimType::Int32)
        .unwrap();
    f.then(a, b, Level::Loop(0)).unwrap();
    f.then(b, c, Level::Root).unwrap();
    assert!(f.is_sched_graph_tree());
    f.gen_ordering_schedules().unwrap();
    f.align_schedules();

    let dims: Vec<usize> = [a, b, c].iter().map(|&id| f.comp(id).schedule.n_out()).collect();
    assert_eq!(dims, vec![7, 7, 7]);
    // B runs after A inside the shared i loop
    assert!(f.comp(a).schedule.contains_point(&[3, 0, 3, 0, 0, 0, 0, 0], &[]));
    assert!(f.comp(b).schedule.contains_point(&[3, 5, 0, 3, 1, 5, 0, 0, 0], &[]));
}

#[test]
fn test_independent_computations_are_parallel() {
    let mut f = Function::new("independent");
    f.buffer("b0", vec![Expr::int(8), Expr::int(8)], PrimType::Float32, ArgumentRole::Output);
    f.buffer("b1", vec![Expr::int(8), Expr::int(8)], PrimType::Float32, ArgumentRole::Output);
    let s0 = f.computation("S0", "{ S0[i, j] : 0 <= i < 8 and 0 <= j < 8 }", Expr::f32(0.0), PrimType::Float32).unwrap();
    let s1 = f.computation("S1", "{ S1[i, j] : 0 <= i < 8 and 0 <= j < 8 }", Expr::f32(1.0), PrimType::Float32).unwrap();
    f.store_in(s0, "b0").unwrap();
    f.store_in(s1, "b1").unwrap();
    f.then(s0, s1, Level::Loop(1)).unwrap();
    f.compute_dependences().unwrap();

    for level in 0..2 {
        assert!(f.is_parallel_legal(level, &[s0, s1]).unwrap(), "level {}", level);
    }
    assert!(f.check_legality_for_function().unwrap());
}

#[test]
fn test_backward_carried_dependence_blocks_parallelism() {
    let (mut f, a) = recurrence();
    f.compute_dependences().unwrap();
    assert!(!f.is_parallel_legal(0, &[a]).unwrap());

    let summaries = f.dependence_summaries().unwrap();
    let flow = summaries.iter().find(|d| d.kind == DependenceKind::Flow).expect("a flow dependence");
    assert_eq!(flow.distance, Some(vec![1]));
    assert_eq!(flow.direction, vec![Direction::Lt]);
}

#[test]
fn test_single_loop_round_trip() {
    let mut f = Function::new("scale");
    f.buffer("bA", vec![Expr::var("N")], PrimType::Int32, ArgumentRole::Output);
    let a = f.computation("A", "[N] -> { A[i] : 0 <= i < N }", Expr::var("i") * 2, PrimType::Int32).unwrap();
    f.store_in(a, "bA").unwrap();

    let body = f.codegen().unwrap().clone();
    assert_eq!(body.loops().len(), 1);
    match &body {
        Stmt::For { min, extent, body, kind, .. } => {
            assert_eq!(min.to_string(), "0");
            assert_eq!(extent.to_string(), "N");
            assert_eq!(*kind, ForKind::Serial);
            assert!(matches!(body.as_ref(), Stmt::Store { buffer, .. } if buffer == "bA"));
        }
        other => panic!("expected a single loop, got {}", other),
    }
    assert_eq!(body.to_string(), "for (c1, 0, N) {\n  bA[c1] = (c1 * 2)\n}\n");
}

#[test]
fn test_legality_checks_are_idempotent() {
    let (mut f, a) = recurrence();
    f.compute_dependences().unwrap();
    let first = (f.check_legality_for_function().unwrap(), f.is_parallel_legal(0, &[a]).unwrap());
    let second = (f.check_legality_for_function().unwrap(), f.is_parallel_legal(0, &[a]).unwrap());
    assert_eq!(first, (true, false));
    assert_eq!(first, second);
}

#[test]
fn test_reversal_violates_recurrence() {
    let (mut f, a) = recurrence();
    f.compute_dependences().unwrap();
    f.reverse(a, 0).unwrap();
    assert!(!f.check_legality_for_function().unwrap());
}

#[test]
fn test_stencil_dependences() {
    let mut k = kernels::stencil(16, 4).unwrap();
    k.function.compute_dependences().unwrap();
    let deps = k.function.dependences().unwrap();

    // C_init[5, 5] feeds S0 at the same (i, j) for every t
    for t in 1..4 {
        assert!(deps.raw.pieces.iter().any(|p| p.contains_point(&[5, 5, t, 5, 5], &[])), "t = {}", t);
    }
    let summaries = k.function.dependence_summaries().unwrap();
    assert!(summaries.iter().all(|d| !(d.source == "S0" && d.target == "S0")));

    let s0 = k.comp("S0").unwrap();
    assert!(k.function.is_parallel_legal(0, &[s0]).unwrap());
}

#[test]
fn test_stencil_tiling_is_legal() {
    let mut k = kernels::stencil(16, 4).unwrap();
    let s0 = k.comp("S0").unwrap();
    k.function.compute_dependences().unwrap();
    k.function.tile(s0, 1, 2, 4, 4).unwrap();
    assert!(k.function.check_legality_for_function().unwrap());
}

#[test]
fn test_stencil_lowering_keeps_nine_term_sum() {
    let mut k = kernels::stencil(16, 4).unwrap();
    let body = k.function.codegen().unwrap().clone();
    let stores = body.stores();
    let Stmt::Store { buffer, value, .. } = stores[1] else { panic!("expected a store") };
    assert_eq!(buffer, "b_out");
    let loads = value.loads();
    assert_eq!(loads.len(), 9);
    assert!(loads.iter().all(|(b, _)| *b == "b_init"));
    match value {
        IrExpr::Binary(BinaryOp::Div, _, rhs) => assert_eq!(rhs.to_string(), "9.0"),
        other => panic!("expected a division by 9, got {}", other),
    }
}

#[test]
fn test_row_major_linearization() {
    let mut f = Function::new("copy");
    f.buffer("bOut", vec![Expr::var("N"), Expr::var("M")], PrimType::Float32, ArgumentRole::Output);
    let s = f
        .computation("S", "[N, M] -> { S[i, j] : 0 <= i < N and 0 <= j < M }", Expr::f32(1.0), PrimType::Float32)
        .unwrap();
    f.store_in(s, "bOut").unwrap();
    let body = f.codegen().unwrap().clone();
    let stores = body.stores();
    let Stmt::Store { index, .. } = stores[0] else { panic!("expected a store") };
    assert_eq!(index.to_string(), "(c3 + (c1 * M))");
}

#[test]
fn test_matmul_tiling_moves_fused_init() {
    let mut k = kernels::matmul(16).unwrap();
    let init = k.comp("C_init").unwrap();
    let acc = k.comp("C").unwrap();
    k.function.compute_dependences().unwrap();

    let group = k.function.fused_computations(acc, 1);
    assert_eq!(group, vec![init, acc]);

    // tiling C alone runs C_init of later tiles after their first update
    let mut alone = k.function.clone();
    alone.tile(acc, 0, 1, 4, 4).unwrap();
    assert!(!alone.check_legality_for_function().unwrap());

    for &id in &group {
        k.function.tile(id, 0, 1, 4, 4).unwrap();
    }
    assert!(k.function.check_legality_for_function().unwrap());
    assert!(k.function.is_parallel_legal(0, &group).unwrap());
    let body = k.function.codegen().unwrap();
    let stores = body.stores();
    assert!(!stores.is_empty());
    assert!(stores.iter().all(|s| matches!(s, Stmt::Store { buffer, .. } if buffer == "bC")));
}

#[test]
fn test_large_skew_and_tile_factors_do_not_overflow() {
    let mut k = kernels::seidel(16, 4).unwrap();
    let s = k.comp("S").unwrap();
    k.function.compute_dependences().unwrap();
    k.function.skew(s, 0, 1, 100_000).unwrap();
    k.function.tile(s, 0, 1, 1_000_000, 1_000_000).unwrap();
    k.function.check_legality_for_function().unwrap();
    k.function.gen_ordering_schedules().unwrap();
    k.function.align_schedules();
    assert!(k.function.dump_schedules().contains("S["));
}

#[test]
fn test_heat_time_loop_is_sequential() {
    let mut k = kernels::heat(16, 4).unwrap();
    k.function.compute_dependences().unwrap();
    let steps = [k.comp("B_out").unwrap(), k.comp("A_out").unwrap()];
    assert!(!k.function.is_parallel_legal(0, &steps).unwrap());
    assert!(k.function.is_parallel_legal(1, &steps).unwrap());
}

#[test]
fn test_blur_allocates_temporary() {
    let mut k = kernels::blur(8).unwrap();
    let text = k.function.codegen().unwrap().to_string();
    assert!(text.contains("allocate b_blurx["));
    assert!(text.contains("free b_blurx"));
    assert_eq!(k.function.arguments().len(), 2);
}

#[test]
fn test_every_kernel_lowers() {
    for name in kernels::NAMES {
        let mut k = kernels::by_name(name, small()).unwrap().unwrap();
        k.function.compute_dependences().unwrap();
        assert!(k.function.check_legality_for_function().unwrap(), "{}", name);
        let body = k.function.codegen().unwrap();
        assert!(!body.stores().is_empty(), "{}", name);
    }
}

#[test]
fn test_unordered_function_is_rejected() {
    let mut f = Function::new("unordered");
    f.computation("A", "{ A[i] : 0 <= i < 4 }", Expr::int(0), PrimType::Int32).unwrap();
    f.computation("B", "{ B[i] : 0 <= i < 4 }", Expr::int(0), PrimType::Int32).unwrap();
    match f.gen_ast().unwrap_err() {
        PolyError::Schedule(e) => assert_eq!(e.kind, ScheduleErrorKind::NotATree),
        other => panic!("unexpected error {}", other),
    }
}
