//! Built-in kernel catalog.
//!
//! Small loop nests used by the command line driver, the benchmarks and
//! the integration tests. Each builder returns a [`Kernel`] whose function
//! has its computations, buffers, accesses and default ordering in place;
//! nothing is analyzed or lowered yet.

use crate::ir::{ArgumentRole, CompId, Expr, Function, PrimType};
use crate::transform::Level;
use crate::utils::errors::PolyResult;

/// Names accepted by [`by_name`].
pub const NAMES: &[&str] = &["stencil", "blur", "matmul", "heat", "seidel"];

/// Default problem sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelSize {
    /// Spatial extent
    pub n: i64,
    /// Number of time steps for iterative kernels
    pub steps: i64,
}

impl Default for KernelSize {
    fn default() -> Self {
        Self { n: 3000, steps: 1000 }
    }
}

/// A function together with the ids of its scheduled computations, in
/// definition order.
#[derive(Debug, Clone)]
pub struct Kernel {
    /// The function under compilation
    pub function: Function,
    /// Scheduled computations
    pub comps: Vec<CompId>,
}

impl Kernel {
    fn new(function: Function) -> Self {
        let comps = function.scheduled();
        Self { function, comps }
    }

    /// Computation id by name.
    pub fn comp(&self, name: &str) -> PolyResult<CompId> {
        self.function.comp_by_name(name)
    }
}

/// Build a catalog kernel, or `None` for an unknown name.
pub fn by_name(name: &str, size: KernelSize) -> Option<PolyResult<Kernel>> {
    let kernel = match name {
        "stencil" => stencil(size.n, size.steps),
        "blur" => blur(size.n),
        "matmul" => matmul(size.n),
        "heat" => heat(size.n, size.steps),
        "seidel" => seidel(size.n, size.steps),
        _ => return None,
    };
    Some(kernel)
}

fn at(comp: &str, idx: &[Expr]) -> Expr {
    Expr::access(comp, idx.to_vec())
}

fn v(name: &str) -> Expr {
    Expr::var(name)
}

/// Nine-point Jacobi stencil.
///
/// ```text
/// C_init(i, j) = 0.5                                   0 <= i, j < n
/// S0(t, i, j)  = (sum of C_init(i + di, j + dj)) / 9.0  1 <= t < steps, 1 <= i, j < n - 1
/// ```
pub fn stencil(n: i64, steps: i64) -> PolyResult<Kernel> {
    let mut f = Function::new("stencil");
    f.buffer("b_init", vec![Expr::int64(n), Expr::int64(n)], PrimType::Float64, ArgumentRole::Output);
    f.buffer("b_out", vec![Expr::int64(steps), Expr::int64(n), Expr::int64(n)], PrimType::Float64, ArgumentRole::Output);

    let init = f.computation(
        "C_init",
        &format!("{{ C_init[i, j] : 0 <= i < {n} and 0 <= j < {n} }}"),
        Expr::f64(0.5),
        PrimType::Float64,
    )?;
    let mut sum: Option<Expr> = None;
    for di in -1..=1 {
        for dj in -1..=1 {
            let read = at("C_init", &[v("i") + di, v("j") + dj]);
            sum = Some(match sum {
                Some(s) => s + read,
                None => read,
            });
        }
    }
    let body = sum.unwrap_or_else(|| Expr::f64(0.0)) / Expr::f64(9.0);
    let s0 = f.computation(
        "S0",
        &format!("{{ S0[t, i, j] : 1 <= t < {steps} and 1 <= i < {m} and 1 <= j < {m} }}", m = n - 1),
        body,
        PrimType::Float64,
    )?;
    f.then(init, s0, Level::Root)?;
    f.store_in(init, "b_init")?;
    f.store_in(s0, "b_out")?;
    f.set_arguments(&["b_init", "b_out"])?;
    Ok(Kernel::new(f))
}

/// Separable 3x3 box blur over an 8-bit three-channel image.
pub fn blur(n: i64) -> PolyResult<Kernel> {
    let mut f = Function::new("blurxy");
    f.buffer("b_input", vec![Expr::int(3), Expr::int64(n + 2), Expr::int64(n + 2)], PrimType::UInt8, ArgumentRole::Input);
    f.buffer("b_blury", vec![Expr::int(3), Expr::int64(n), Expr::int64(n)], PrimType::UInt8, ArgumentRole::Output);
    f.buffer("b_blurx", vec![], PrimType::UInt8, ArgumentRole::Temporary);

    let p0 = f.input(
        "p0",
        &format!("{{ p0[c, y, x] : 0 <= c < 3 and 0 <= y < {e} and 0 <= x < {e} }}", e = n + 2),
        PrimType::UInt8,
    )?;
    let (c, y, x) = (v("c"), v("y"), v("x"));
    let bx = f.computation(
        "bx",
        &format!("{{ bx[c, y, x] : 0 <= c < 3 and 0 <= y < {e} and 0 <= x < {n} }}", e = n + 2),
        (at("p0", &[c.clone(), y.clone(), x.clone()])
            + at("p0", &[c.clone(), y.clone(), x.clone() + 1])
            + at("p0", &[c.clone(), y.clone(), x.clone() + 2]))
            / Expr::int(3),
        PrimType::UInt8,
    )?;
    let by = f.computation(
        "by",
        &format!("{{ by[c, y, x] : 0 <= c < 3 and 0 <= y < {n} and 0 <= x < {n} }}"),
        (at("bx", &[c.clone(), y.clone(), x.clone()])
            + at("bx", &[c.clone(), y.clone() + 1, x.clone()])
            + at("bx", &[c, y + 2, x]))
            / Expr::int(3),
        PrimType::UInt8,
    )?;
    f.after(by, bx, Level::Root)?;
    f.store_in(p0, "b_input")?;
    f.store_in(bx, "b_blurx")?;
    f.store_in(by, "b_blury")?;
    f.set_arguments(&["b_input", "b_blury"])?;
    Ok(Kernel::new(f))
}

/// Dense matrix multiply with a separate initialization of the output.
///
/// The size is a parameter `N` bound by an invariant.
pub fn matmul(n: i64) -> PolyResult<Kernel> {
    let mut f = Function::new("matmul");
    f.add_invariant("N", Expr::int64(n));
    for (name, role) in [("bA", ArgumentRole::Input), ("bB", ArgumentRole::Input), ("bC", ArgumentRole::Output)] {
        f.buffer(name, vec![v("N"), v("N")], PrimType::Float32, role);
    }
    let a = f.input("A", "[N] -> { A[i, k] : 0 <= i < N and 0 <= k < N }", PrimType::Float32)?;
    let b = f.input("B", "[N] -> { B[k, j] : 0 <= k < N and 0 <= j < N }", PrimType::Float32)?;
    let init = f.computation("C_init", "[N] -> { C_init[i, j] : 0 <= i < N and 0 <= j < N }", Expr::f32(0.0), PrimType::Float32)?;
    let (i, j, k) = (v("i"), v("j"), v("k"));
    let acc = f.computation(
        "C",
        "[N] -> { C[i, j, k] : 0 <= i < N and 0 <= j < N and 0 <= k < N }",
        at("C", &[i.clone(), j.clone(), k.clone() - 1]) + at("A", &[i.clone(), k.clone()]) * at("B", &[k, j]),
        PrimType::Float32,
    )?;
    f.then(init, acc, Level::Loop(1))?;
    f.store_in(a, "bA")?;
    f.store_in(b, "bB")?;
    f.store_in(init, "bC")?;
    f.store_in_at(acc, "bC", vec![v("i"), v("j")])?;
    f.set_arguments(&["bA", "bB", "bC"])?;
    Ok(Kernel::new(f))
}

/// One-dimensional heat diffusion alternating between two buffers.
///
/// ```text
/// A(i) = 0.5, B(i) = 0.5
/// B_out(t, i) = (A(i - 1) + A(i) + A(i + 1)) * 0.33333
/// A_out(t, i) = (B(i - 1) + B(i) + B(i + 1)) * 0.33333
/// ```
pub fn heat(n: i64, steps: i64) -> PolyResult<Kernel> {
    let mut f = Function::new("heat");
    f.buffer("b_A", vec![Expr::int64(n)], PrimType::Float64, ArgumentRole::Output);
    f.buffer("b_B", vec![Expr::int64(n)], PrimType::Float64, ArgumentRole::Output);

    let init = format!("0 <= i < {n}");
    let step = format!("1 <= t < {steps} and 1 <= i < {}", n - 1);
    let a = f.computation("A", &format!("{{ A[i] : {init} }}"), Expr::f64(0.5), PrimType::Float64)?;
    let b = f.computation("B", &format!("{{ B[i] : {init} }}"), Expr::f64(0.5), PrimType::Float64)?;
    let three = |src: &str| (at(src, &[v("i") - 1]) + at(src, &[v("i")]) + at(src, &[v("i") + 1])) * Expr::f64(0.33333);
    let b_out = f.computation("B_out", &format!("{{ B_out[t, i] : {step} }}"), three("A"), PrimType::Float64)?;
    let a_out = f.computation("A_out", &format!("{{ A_out[t, i] : {step} }}"), three("B"), PrimType::Float64)?;

    let last = f.then(a, b, Level::Loop(0))?;
    let last = f.then(last, b_out, Level::Root)?;
    f.then(last, a_out, Level::Loop(0))?;

    f.store_in(a, "b_A")?;
    f.store_in(b, "b_B")?;
    f.store_in_at(a_out, "b_A", vec![v("i")])?;
    f.store_in_at(b_out, "b_B", vec![v("i")])?;
    f.set_arguments(&["b_A", "b_B"])?;
    Ok(Kernel::new(f))
}

/// In-place two-dimensional Gauss-Seidel sweep.
pub fn seidel(n: i64, steps: i64) -> PolyResult<Kernel> {
    let mut f = Function::new("seidel");
    f.buffer("b_A", vec![Expr::int64(n), Expr::int64(n)], PrimType::Float64, ArgumentRole::Output);

    let init = f.computation(
        "A_init",
        &format!("{{ A_init[i, j] : 0 <= i < {n} and 0 <= j < {n} }}"),
        Expr::f64(1.0),
        PrimType::Float64,
    )?;
    let (t, i, j) = (v("t"), v("i"), v("j"));
    let cross = at("S", &[t.clone(), i.clone() - 1, j.clone()])
        + at("S", &[t.clone(), i.clone(), j.clone() - 1])
        + at("S", &[t.clone(), i.clone(), j.clone()])
        + at("S", &[t.clone(), i.clone(), j.clone() + 1])
        + at("S", &[t, i + 1, j]);
    let s = f.computation(
        "S",
        &format!("{{ S[t, i, j] : 0 <= t < {steps} and 1 <= i < {m} and 1 <= j < {m} }}", m = n - 1),
        cross * Expr::f64(0.2),
        PrimType::Float64,
    )?;
    f.then(init, s, Level::Root)?;
    f.store_in(init, "b_A")?;
    f.store_in_at(s, "b_A", vec![v("i"), v("j")])?;
    f.set_arguments(&["b_A"])?;
    Ok(Kernel::new(f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{IrExpr, Stmt};

    fn small() -> KernelSize {
        KernelSize { n: 16, steps: 4 }
    }

    #[test]
    fn test_catalog_builds_every_name() {
        for name in NAMES {
            let kernel = by_name(name, small()).expect("known kernel").unwrap();
            assert!(!kernel.comps.is_empty(), "{name}");
            assert!(kernel.function.is_sched_graph_tree(), "{name}");
        }
        assert!(by_name("fft", small()).is_none());
    }

    #[test]
    fn test_stencil_reads_and_writes() {
        let k = stencil(16, 4).unwrap();
        let s0 = k.comp("S0").unwrap();
        let reads = k.function.comp(s0).expr.as_ref().unwrap().accesses();
        assert_eq!(reads.len(), 9);
        assert!(reads.iter().all(|(name, idx)| *name == "C_init" && idx.len() == 2));
        assert_eq!(k.function.arguments().len(), 2);
    }

    #[test]
    fn test_stencil_flow_from_init_only() {
        let mut k = stencil(16, 4).unwrap();
        k.function.compute_dependences().unwrap();
        let summaries = k.function.dependence_summaries().unwrap();
        assert!(summaries.iter().any(|d| d.source == "C_init" && d.target == "S0"));
        assert!(!summaries.iter().any(|d| d.source == "S0" && d.target == "S0"));
    }

    #[test]
    fn test_stencil_lowers_nine_term_sum() {
        let mut k = stencil(16, 4).unwrap();
        let body = k.function.codegen().unwrap().clone();
        let stores = body.stores();
        assert_eq!(stores.len(), 2);
        match stores[1] {
            Stmt::Store { buffer, value, .. } => {
                assert_eq!(buffer, "b_out");
                assert_eq!(value.loads().iter().filter(|(b, _)| *b == "b_init").count(), 9);
                assert!(matches!(value, IrExpr::Binary(_, _, d) if d.to_string() == "9.0"));
            }
            other => panic!("expected a store, got {other}"),
        }
    }

    #[test]
    fn test_matmul_accumulates_in_place() {
        let k = matmul(8).unwrap();
        let acc = k.comp("C").unwrap();
        let access = k.function.comp(acc).access.as_ref().unwrap();
        assert_eq!(access.space.output.name_str(), "bC");
        assert_eq!(access.space.output.len(), 2);
        assert_eq!(k.function.invariants().len(), 1);
    }

    #[test]
    fn test_blur_sizes_temporary() {
        let mut k = blur(8).unwrap();
        k.function.compute_bounds().unwrap();
        let tmp = k.function.get_buffer("b_blurx").unwrap();
        assert_eq!(tmp.extents.len(), 3);
    }
}
