//! Lowering of loop trees to statements over flat buffers.
//!
//! Every leaf of the loop tree becomes a store: the iterators of its
//! computation are recovered from the time point by inverting the
//! schedule, reads of stored computations become loads at a row-major
//! offset, and reads of inlined computations become `let` bindings. Loop
//! tags are applied to the loops they name and consumed there.

use log::{debug, info, warn};

use crate::codegen::ast_builder::AstNode;
use crate::ir::{Computation, DeviceApi, Expr, ForKind, Function, IrExpr, Stmt};
use crate::ir::computation::ArgumentRole;
use crate::polyhedral::{AffineExpr, BasicMap};
use crate::transform::tags::{gpu_iterator_name, LoopTag, TagTable};
use crate::utils::errors::{LoweringError, LoweringErrorKind, PolyError, PolyResult};

fn lowering_error(kind: LoweringErrorKind, message: impl Into<String>) -> PolyError {
    LoweringError::new(kind, message).into()
}

/// Express each column in `unknown` through the remaining tuple columns and
/// the parameters, using equalities with a unit coefficient on it. Returns
/// `None` if some column cannot be solved that way.
fn solve_columns(map: &BasicMap, unknown: &[usize]) -> Option<Vec<AffineExpr>> {
    let first_local = map.n_in() + map.n_out();
    let mut solved: Vec<Option<AffineExpr>> = vec![None; map.n_cols()];
    loop {
        let mut progress = false;
        for c in map.constraints.iter().filter(|c| c.is_equality()) {
            if (first_local..map.n_cols()).any(|col| c.coeff(col) != 0) {
                continue;
            }
            let open: Vec<usize> = unknown.iter().copied().filter(|&k| c.coeff(k) != 0 && solved[k].is_none()).collect();
            let [k] = open[..] else { continue };
            let a = c.coeff(k);
            if a.abs() != 1 {
                continue;
            }
            let mut rest = c.expr.clone();
            rest.set_coeff(k, 0);
            for (j, value) in solved.iter().enumerate() {
                if let Some(value) = value {
                    if rest.coeff(j) != 0 {
                        rest = rest.substitute(j, value);
                    }
                }
            }
            solved[k] = Some(if a == 1 { -rest } else { rest });
            progress = true;
        }
        if !progress {
            break;
        }
    }
    unknown.iter().map(|&k| solved[k].clone()).collect()
}

/// Translate an expression, handing computation reads to `read`.
fn translate(e: &Expr, read: &mut dyn FnMut(&str, &[Expr]) -> PolyResult<IrExpr>) -> PolyResult<IrExpr> {
    Ok(match e {
        Expr::Const(l) => IrExpr::Const(*l),
        Expr::Var(name) => IrExpr::Var(name.clone()),
        Expr::Unary(op, a) => IrExpr::Unary(*op, Box::new(translate(a, read)?)),
        Expr::Binary(op, a, b) => IrExpr::binary(*op, translate(a, read)?, translate(b, read)?),
        Expr::Select(c, a, b) => IrExpr::Select(
            Box::new(translate(c, read)?),
            Box::new(translate(a, read)?),
            Box::new(translate(b, read)?),
        ),
        Expr::Cast(ty, a) => IrExpr::Cast(*ty, Box::new(translate(a, read)?)),
        Expr::Access { comp, indices } => read(comp, indices)?,
    })
}

/// Translate an index or bound expression.
fn to_ir(e: &Expr) -> PolyResult<IrExpr> {
    translate(e, &mut |comp, _| {
        Err(lowering_error(
            LoweringErrorKind::UnsupportedExpr,
            format!("read of `{}` in an index or bound expression", comp),
        ))
    })
}

/// Wrap everything that follows an empty-bodied `let` in that `let`.
fn thread_lets(items: Vec<Stmt>) -> Stmt {
    let mut tail: Vec<Stmt> = Vec::new();
    for s in items.into_iter().rev() {
        match s {
            Stmt::LetStmt { name, value, body } if *body == Stmt::no_op() => {
                let rest = block_of(std::mem::take(&mut tail));
                tail.push(Stmt::LetStmt { name, value, body: Box::new(rest) });
            }
            other => tail.insert(0, other),
        }
    }
    block_of(tail)
}

fn block_of(mut items: Vec<Stmt>) -> Stmt {
    if items.len() == 1 {
        if let Some(s) = items.pop() {
            return s;
        }
    }
    Stmt::Block(items)
}

/// Rank of a tag when several apply to one loop (lowest wins).
fn tag_rank(tag: &LoopTag) -> u8 {
    match tag {
        LoopTag::GpuBlock(_) | LoopTag::GpuThread(_) => 0,
        LoopTag::Vector(_) => 1,
        LoopTag::Parallel => 2,
        LoopTag::Unroll(_) => 3,
        LoopTag::Distributed => 4,
    }
}

fn for_kind(tag: LoopTag) -> ForKind {
    match tag {
        LoopTag::Parallel => ForKind::Parallel,
        LoopTag::Vector(w) => ForKind::Vectorized(w),
        LoopTag::Unroll(_) => ForKind::Unrolled,
        LoopTag::Distributed => ForKind::Distributed,
        LoopTag::GpuBlock(axis) => ForKind::GpuBlock(axis),
        LoopTag::GpuThread(axis) => ForKind::GpuThread(axis),
    }
}

/// Lowers one loop tree of a function.
struct Lowerer<'a> {
    f: &'a Function,
    tags: TagTable,
    prefix: String,
}

impl<'a> Lowerer<'a> {
    fn new(f: &'a Function) -> Self {
        Self { f, tags: f.tags().clone(), prefix: f.config().iterator_prefix.clone() }
    }

    fn lookup(&self, name: &str) -> PolyResult<&'a Computation> {
        let id = self.f.find(name).ok_or_else(|| {
            lowering_error(LoweringErrorKind::UnknownComputation, format!("no computation named `{}`", name))
        })?;
        Ok(self.f.comp(id))
    }

    fn lower_node(&mut self, node: &AstNode) -> PolyResult<Stmt> {
        match node {
            AstNode::Block(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.lower_node(item)?);
                }
                Ok(thread_lets(out))
            }
            AstNode::For { dim, iterator, lower, upper, stride, body } => {
                if *stride != 1 {
                    return Err(lowering_error(
                        LoweringErrorKind::NonUnitStride,
                        format!("loop over {} has stride {}", iterator, stride),
                    ));
                }
                let tag = self.take_loop_tag(*dim, body);
                let min = to_ir(lower)?;
                let extent = to_ir(&(upper.clone() - lower.clone()).fold())?;
                let mut body = self.lower_node(body)?;
                let mut var = iterator.clone();
                let (kind, device) = match tag {
                    Some(t) => {
                        if let Some(hw) = gpu_iterator_name(t) {
                            body = Stmt::LetStmt { name: iterator.clone(), value: IrExpr::var(hw.as_str()), body: Box::new(body) };
                            var = hw;
                            (for_kind(t), DeviceApi::Gpu)
                        } else {
                            (for_kind(t), DeviceApi::Host)
                        }
                    }
                    None => (ForKind::Serial, DeviceApi::Host),
                };
                Ok(Stmt::For { var, min, extent, kind, device, body: Box::new(body) })
            }
            AstNode::If { cond, then_node, else_node } => {
                let else_case = match else_node {
                    Some(e) => Some(Box::new(self.lower_node(e)?)),
                    None => None,
                };
                Ok(Stmt::IfThenElse {
                    cond: to_ir(cond)?,
                    then_case: Box::new(self.lower_node(then_node)?),
                    else_case,
                })
            }
            AstNode::User { comp, time } => self.lower_user(comp, time),
        }
    }

    /// Consume the tags of every computation under a loop at its level and
    /// pick the one that decides the loop kind.
    fn take_loop_tag(&mut self, dim: usize, body: &AstNode) -> Option<LoopTag> {
        if dim % 2 == 0 {
            return None;
        }
        let level = (dim - 1) / 2;
        let mut found: Vec<LoopTag> = Vec::new();
        for comp in body.users() {
            found.extend(self.tags.take(comp, level));
        }
        if found.len() > 1 {
            debug!("loop level {} carries tags {:?}", level, found);
        }
        found.into_iter().min_by_key(tag_rank)
    }

    fn time_name(&self, p: usize) -> String {
        format!("{}{}", self.prefix, p)
    }

    /// Iterator values of `comp` at a time point.
    fn iterator_values(&self, comp: &Computation, time: &[Expr]) -> PolyResult<Vec<(String, Expr)>> {
        let sched = &comp.schedule;
        let unknown: Vec<usize> = (0..sched.n_in()).collect();
        let solved = solve_columns(sched, &unknown).ok_or_else(|| {
            lowering_error(
                LoweringErrorKind::UnsupportedExpr,
                format!("schedule of {} cannot be inverted: {}", comp.name, sched),
            )
        })?;
        let mut names: Vec<String> = comp.iterators().to_vec();
        names.extend((0..sched.n_out()).map(|p| self.time_name(p)));
        let coords: Vec<(String, Expr)> = (0..sched.n_out())
            .map(|p| (self.time_name(p), time.get(p).cloned().unwrap_or_else(|| Expr::int(0))))
            .collect();
        Ok(comp
            .iterators()
            .iter()
            .cloned()
            .zip(solved.iter().map(|e| Expr::from_affine(e, &names, &sched.space.params).substitute(&coords).fold()))
            .collect())
    }

    /// Row-major offset into the buffer written by `access`, with the
    /// iterators bound by `bindings`.
    fn buffer_index(&self, access: &BasicMap, iterators: &[String], bindings: &[(String, Expr)]) -> PolyResult<IrExpr> {
        let buffer = access.space.output.name_str();
        let unknown: Vec<usize> = (0..access.n_out()).map(|k| access.out_col(k)).collect();
        let exprs = solve_columns(access, &unknown).ok_or_else(|| {
            lowering_error(
                LoweringErrorKind::UnsupportedExpr,
                format!("access {} is not a function of the iterators", access),
            )
        })?;
        let indices: Vec<Expr> = exprs
            .iter()
            .map(|e| Expr::from_affine(e, iterators, &access.space.params).substitute(bindings).fold())
            .collect();
        to_ir(&self.linearize(buffer, &indices)?)
    }

    fn linearize(&self, buffer: &str, indices: &[Expr]) -> PolyResult<Expr> {
        let buf = self.f.get_buffer(buffer).ok_or_else(|| {
            lowering_error(LoweringErrorKind::UnknownBuffer, format!("no buffer named `{}`", buffer))
        })?;
        if buf.extents.len() != indices.len() {
            return Err(lowering_error(
                LoweringErrorKind::UnknownBuffer,
                format!("buffer `{}` has {} dimension(s), accessed with {}", buffer, buf.extents.len(), indices.len()),
            ));
        }
        let mut offset: Option<Expr> = None;
        let mut stride: Option<Expr> = None;
        for (idx, extent) in indices.iter().zip(&buf.extents).rev() {
            let term = match &stride {
                Some(s) => idx.clone() * s.clone(),
                None => idx.clone(),
            };
            offset = Some(match offset {
                Some(acc) => acc + term,
                None => term,
            });
            stride = Some(match stride {
                Some(s) => extent.clone() * s,
                None => extent.clone(),
            });
        }
        Ok(offset.map_or_else(|| Expr::int(0), |e| e.fold()))
    }

    fn lower_value(&self, e: &Expr, lets: &mut Vec<(String, IrExpr)>) -> PolyResult<IrExpr> {
        translate(e, &mut |comp, indices| self.lower_read(comp, indices, lets))
    }

    fn lower_read(&self, name: &str, indices: &[Expr], lets: &mut Vec<(String, IrExpr)>) -> PolyResult<IrExpr> {
        let comp = self.lookup(name)?;
        let bindings: Vec<(String, Expr)> = comp.iterators().iter().cloned().zip(indices.iter().cloned()).collect();
        if comp.inline {
            let body = comp.expr.as_ref().ok_or_else(|| {
                lowering_error(LoweringErrorKind::UnsupportedExpr, format!("inlined computation {} has no expression", name))
            })?;
            let value = self.lower_value(&body.substitute(&bindings).fold(), lets)?;
            if let Some((bound, _)) = lets.iter().find(|(_, v)| *v == value) {
                return Ok(IrExpr::var(bound.as_str()));
            }
            let bound = if lets.iter().any(|(n, _)| n == name) { format!("{}_{}", name, lets.len()) } else { name.to_string() };
            lets.push((bound.clone(), value));
            return Ok(IrExpr::Var(bound));
        }
        let access = comp.access.as_ref().ok_or_else(|| {
            lowering_error(LoweringErrorKind::UnknownBuffer, format!("computation {} is not stored in a buffer", name))
        })?;
        let index = self.buffer_index(access, comp.iterators(), &bindings)?;
        Ok(IrExpr::Load { buffer: access.space.output.name_str().to_string(), index: Box::new(index), ty: comp.elem_type })
    }

    fn lower_user(&mut self, name: &str, time: &[Expr]) -> PolyResult<Stmt> {
        let comp = self.lookup(name)?;
        let bindings = self.iterator_values(comp, time)?;
        let body = comp.expr.as_ref().ok_or_else(|| {
            lowering_error(LoweringErrorKind::UnsupportedExpr, format!("computation {} has no expression", name))
        })?;
        let access = comp.access.as_ref().ok_or_else(|| {
            lowering_error(LoweringErrorKind::UnknownBuffer, format!("computation {} is not stored in a buffer", name))
        })?;
        let index = self.buffer_index(access, comp.iterators(), &bindings)?;
        let mut lets = Vec::new();
        let value = self.lower_value(&body.substitute(&bindings).fold(), &mut lets)?;
        let mut items: Vec<Stmt> = lets
            .into_iter()
            .map(|(name, value)| Stmt::LetStmt { name, value, body: Box::new(Stmt::no_op()) })
            .collect();
        items.push(Stmt::Store { buffer: access.space.output.name_str().to_string(), index, value });
        Ok(thread_lets(items))
    }
}

impl Function {
    /// Lower the loop tree (built first if missing) to a statement tree.
    /// Temporaries are allocated around it and invariants bound outside
    /// everything. The result is kept on the function.
    pub fn lower(&mut self) -> PolyResult<&Stmt> {
        let ast = match self.ast.clone() {
            Some(ast) => ast,
            None => self.gen_ast()?.clone(),
        };
        self.compute_bounds()?;

        let mut lowerer = Lowerer::new(self);
        let mut body = lowerer.lower_node(&ast)?;
        for (comp, level, tag) in lowerer.tags.iter() {
            warn!("tag {:?} on {} level {} matches no loop", tag, comp, level);
        }

        for buf in self.buffers().values().rev() {
            if buf.role != ArgumentRole::Temporary {
                continue;
            }
            let mut extents = Vec::with_capacity(buf.extents.len());
            for e in &buf.extents {
                extents.push(to_ir(e)?);
            }
            body = Stmt::Allocate { buffer: buf.name.clone(), elem_type: buf.elem_type, extents, body: Box::new(body) };
        }
        for inv in self.invariants().iter().rev() {
            body = Stmt::LetStmt { name: inv.name.clone(), value: to_ir(&inv.value)?, body: Box::new(body) };
        }
        info!("lowered {} to {} loop(s) and {} store(s)", self.name(), body.loops().len(), body.stores().len());
        Ok(self.body.insert(body))
    }

    /// Order and align the schedules, build the loop tree and lower it.
    pub fn codegen(&mut self) -> PolyResult<&Stmt> {
        self.gen_ast()?;
        self.lower()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{CompId, PrimType};
    use crate::transform::Level;

    fn copy_2d() -> (Function, CompId) {
        let mut f = Function::new("copy");
        f.buffer("bIn", vec![Expr::var("N"), Expr::var("M")], PrimType::Float32, ArgumentRole::Input);
        f.buffer("bOut", vec![Expr::var("N"), Expr::var("M")], PrimType::Float32, ArgumentRole::Output);
        let input = f.input("In", "[N, M] -> { In[i, j] : 0 <= i < N and 0 <= j < M }", PrimType::Float32).unwrap();
        let s = f
            .computation(
                "S",
                "[N, M] -> { S[i, j] : 0 <= i < N and 0 <= j < M }",
                Expr::access("In", vec![Expr::var("i"), Expr::var("j")]) * Expr::f32(2.0),
                PrimType::Float32,
            )
            .unwrap();
        f.store_in(input, "bIn").unwrap();
        f.store_in(s, "bOut").unwrap();
        (f, s)
    }

    #[test]
    fn test_solve_columns_inverts_split() {
        let (mut f, s) = copy_2d();
        f.split(s, 1, 4).unwrap();
        let sched = &f.comp(s).schedule;
        let solved = solve_columns(sched, &[0, 1]).unwrap();
        // j = 4 * j0 + j1
        assert_eq!(solved[1].coeff(sched.out_col(3)), 4);
        assert_eq!(solved[1].coeff(sched.out_col(5)), 1);
    }

    #[test]
    fn test_row_major_store() {
        let (mut f, _) = copy_2d();
        let body = f.codegen().unwrap().clone();
        let text = body.to_string();
        assert_eq!(
            text,
            "for (c1, 0, N) {\n  for (c3, 0, M) {\n    bOut[(c3 + (c1 * M))] = (bIn[(c3 + (c1 * M))] * 2.0f)\n  }\n}\n"
        );
    }

    #[test]
    fn test_parallel_and_vector_tags() {
        let (mut f, s) = copy_2d();
        f.parallelize(s, 0).unwrap();
        f.vectorize(s, 1, 8).unwrap();
        let body = f.codegen().unwrap().clone();
        let kinds: Vec<ForKind> = body
            .loops()
            .iter()
            .filter_map(|l| match l {
                Stmt::For { kind, .. } => Some(*kind),
                _ => None,
            })
            .collect();
        assert_eq!(kinds, vec![ForKind::Parallel, ForKind::Serial, ForKind::Vectorized(8)]);
        // tags survive for the next lowering
        assert!(f.should_parallelize("S", 0));
    }

    #[test]
    fn test_gpu_loops_rebind_iterators() {
        let (mut f, s) = copy_2d();
        f.tag_gpu(s, &[0], &[1]).unwrap();
        let body = f.codegen().unwrap().clone();
        match &body {
            Stmt::For { var, kind, device, body, .. } => {
                assert_eq!(var, "__block_id_z");
                assert_eq!(*kind, ForKind::GpuBlock(2));
                assert_eq!(*device, DeviceApi::Gpu);
                assert!(matches!(body.as_ref(), Stmt::LetStmt { name, .. } if name == "c1"));
            }
            other => panic!("expected a loop, got {}", other),
        }
    }

    #[test]
    fn test_inline_read_becomes_let() {
        let mut f = Function::new("inline");
        f.buffer("bOut", vec![Expr::int(8)], PrimType::Int32, ArgumentRole::Output);
        let t = f.computation("T", "{ T[i] : 0 <= i < 8 }", Expr::var("i") * 3, PrimType::Int32).unwrap();
        let s = f
            .computation("S", "{ S[i] : 0 <= i < 8 }", Expr::access("T", vec![Expr::var("i")]) + 1, PrimType::Int32)
            .unwrap();
        f.set_inline(t);
        f.store_in(s, "bOut").unwrap();
        let text = f.codegen().unwrap().to_string();
        assert_eq!(text, "for (c1, 0, 8) {\n  let T = (c1 * 3)\n  bOut[c1] = (T + 1)\n}\n");
    }

    #[test]
    fn test_temporaries_and_invariants() {
        let mut f = Function::new("tmp");
        f.add_invariant("N", Expr::int(16));
        f.buffer("tmp", vec![], PrimType::Int32, ArgumentRole::Temporary);
        f.buffer("bOut", vec![Expr::var("N")], PrimType::Int32, ArgumentRole::Output);
        let a = f.computation("A", "[N] -> { A[i] : 0 <= i < N }", Expr::var("i"), PrimType::Int32).unwrap();
        let b = f
            .computation("B", "[N] -> { B[i] : 0 <= i < N }", Expr::access("A", vec![Expr::var("i")]), PrimType::Int32)
            .unwrap();
        f.store_in(a, "tmp").unwrap();
        f.store_in(b, "bOut").unwrap();
        f.then(a, b, Level::Root).unwrap();
        let body = f.codegen().unwrap().clone();
        match &body {
            Stmt::LetStmt { name, body, .. } => {
                assert_eq!(name, "N");
                assert!(matches!(body.as_ref(), Stmt::Allocate { buffer, extents, .. } if buffer == "tmp" && extents.len() == 1));
            }
            other => panic!("expected the invariant binding, got {}", other),
        }
        assert_eq!(body.stores().len(), 2);
    }

    #[test]
    fn test_thread_lets() {
        let store = Stmt::Store { buffer: "A".into(), index: IrExpr::var("i"), value: IrExpr::var("x") };
        let items = vec![
            Stmt::LetStmt { name: "x".into(), value: IrExpr::var("y"), body: Box::new(Stmt::no_op()) },
            store.clone(),
            store.clone(),
        ];
        match thread_lets(items) {
            Stmt::LetStmt { body, .. } => assert_eq!(*body, Stmt::Block(vec![store.clone(), store])),
            other => panic!("expected a let, got {}", other),
        }
    }

    fn scale_1d() -> Function {
        let mut f = Function::new("scale");
        f.buffer("bA", vec![Expr::int(8)], PrimType::Int32, ArgumentRole::Output);
        let a = f.computation("A", "{ A[i] : 0 <= i < 8 }", Expr::var("i") * 2, PrimType::Int32).unwrap();
        f.store_in(a, "bA").unwrap();
        f
    }

    fn user_at(time: Expr) -> AstNode {
        AstNode::User { comp: "A".into(), time: vec![Expr::int(0), time, Expr::int(0)] }
    }

    #[test]
    fn test_if_else_lowers_both_branches() {
        let f = scale_1d();
        let node = AstNode::If {
            cond: Expr::var("c1").lt(Expr::int(4)),
            then_node: Box::new(user_at(Expr::var("c1"))),
            else_node: Some(Box::new(user_at(Expr::int(7)))),
        };
        let stmt = Lowerer::new(&f).lower_node(&node).unwrap();
        match &stmt {
            Stmt::IfThenElse { then_case, else_case: Some(else_case), .. } => {
                assert!(matches!(then_case.as_ref(), Stmt::Store { buffer, .. } if buffer == "bA"));
                match else_case.as_ref() {
                    Stmt::Store { index, .. } => assert_eq!(index.to_string(), "7"),
                    other => panic!("expected a store, got {}", other),
                }
            }
            other => panic!("expected a conditional with both branches, got {}", other),
        }
        assert_eq!(stmt.stores().len(), 2);
    }

    #[test]
    fn test_non_unit_stride_is_rejected() {
        let f = scale_1d();
        let node = AstNode::For {
            dim: 1,
            iterator: "c1".into(),
            lower: Expr::int(0),
            upper: Expr::int(8),
            stride: 2,
            body: Box::new(user_at(Expr::var("c1"))),
        };
        match Lowerer::new(&f).lower_node(&node).unwrap_err() {
            PolyError::Lowering(e) => assert_eq!(e.kind, LoweringErrorKind::NonUnitStride),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_unknown_buffer() {
        let mut f = Function::new("f");
        f.computation("S", "{ S[i] : 0 <= i < 4 }", Expr::int(0), PrimType::Int32).unwrap();
        match f.codegen().unwrap_err() {
            PolyError::Lowering(e) => assert_eq!(e.kind, LoweringErrorKind::UnknownBuffer),
            other => panic!("unexpected error {other}"),
        }
    }
}
