//! Dependence analysis for polyhedral programs.
//!
//! Dependences are computed from the access relations of every scheduled
//! computation, using the current schedules as the execution order:
//! - memory-based pairs: two instances touch the same cell, one of them
//!   writes, and the first runs strictly before the second
//! - flow (RAW) pairs are refined to last-writer pairs by removing pairs
//!   killed by an intermediate write to the same cell
//! - output (WAW) and anti (WAR) pairs keep only the nearest writer
//! - live-in reads have no in-function source, live-out writes are never
//!   overwritten
//!
//! All relations are between computation tuples, e.g.
//! `{ C_init[i, j] -> S0[t, i', j'] }`.

use log::{debug, info, warn};
use serde::{Serialize, Deserialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::analysis::access::access_relation;
use crate::ir::{CompId, Expr, Function};
use crate::polyhedral::{bounding_box, lex_lt, BasicMap, Tuple, UnionMap, UnionSet};
use crate::utils::errors::{AnalysisError, AnalysisErrorKind, PolyResult};

/// Nesting limit when resolving reads through inline computations.
const MAX_INLINE_DEPTH: usize = 32;

/// Kind of data dependence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DependenceKind {
    /// Read-after-write (true/flow dependence)
    Flow,
    /// Write-after-read (anti dependence)
    Anti,
    /// Write-after-write (output dependence)
    Output,
}

impl DependenceKind {
    /// Get short name for the dependence kind.
    pub fn short_name(&self) -> &'static str {
        match self {
            DependenceKind::Flow => "RAW",
            DependenceKind::Anti => "WAR",
            DependenceKind::Output => "WAW",
        }
    }
}

/// Direction of a dependence in one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// < (forward dependence, positive distance)
    Lt,
    /// = (same iteration, zero distance)
    Eq,
    /// > (backward dependence, negative distance)
    Gt,
    /// <= (forward or same)
    Le,
    /// >= (backward or same)
    Ge,
    /// * (unknown/any direction)
    Star,
}

impl Direction {
    /// Get the character representation.
    pub fn to_char(&self) -> char {
        match self {
            Direction::Lt => '<',
            Direction::Eq => '=',
            Direction::Gt => '>',
            Direction::Le => '≤',
            Direction::Ge => '≥',
            Direction::Star => '*',
        }
    }

    /// Direction from the constant bounds of a distance.
    pub fn from_bounds(lo: Option<i64>, hi: Option<i64>) -> Direction {
        match (lo, hi) {
            (Some(0), Some(0)) => Direction::Eq,
            (Some(l), _) if l > 0 => Direction::Lt,
            (_, Some(h)) if h < 0 => Direction::Gt,
            (Some(l), _) if l >= 0 => Direction::Le,
            (_, Some(h)) if h <= 0 => Direction::Ge,
            _ => Direction::Star,
        }
    }
}

/// One piece of a dependence relation with its distance summary.
#[derive(Debug, Clone)]
pub struct Dependence {
    /// Source computation
    pub source: String,
    /// Target computation
    pub target: String,
    /// Kind of dependence
    pub kind: DependenceKind,
    /// Pairs of iterations in dependence
    pub relation: BasicMap,
    /// Distance vector over the shared leading iterators (if uniform)
    pub distance: Option<Vec<i64>>,
    /// Direction vector over the shared leading iterators
    pub direction: Vec<Direction>,
}

impl Dependence {
    fn from_piece(kind: DependenceKind, relation: &BasicMap) -> Self {
        let deltas = relation.deltas();
        let mut distance = Some(Vec::new());
        let mut direction = Vec::new();
        for b in bounding_box(&deltas) {
            let lo = b.lower.iter().filter_map(|l| l.expr.as_constant().map(|c| crate::polyhedral::ceil_div(c, l.div))).max();
            let hi = b.upper.iter().filter_map(|u| u.expr.as_constant().map(|c| crate::polyhedral::floor_div(c, u.div))).min();
            direction.push(Direction::from_bounds(lo, hi));
            let uniform = match (lo, hi) {
                (Some(l), Some(h)) if l == h => Some(l),
                _ => None,
            };
            distance = match (distance, uniform) {
                (Some(mut d), Some(v)) => {
                    d.push(v);
                    Some(d)
                }
                _ => None,
            };
        }
        Self {
            source: relation.space.input_tuple().name_str().to_string(),
            target: relation.space.output.name_str().to_string(),
            kind,
            relation: relation.clone(),
            distance,
            direction,
        }
    }

    /// Check if this is a loop-carried dependence.
    pub fn is_loop_carried(&self) -> bool {
        !self.direction.iter().all(|d| *d == Direction::Eq)
    }

    /// Get a human-readable description.
    pub fn description(&self) -> String {
        let dir: String = self.direction.iter().map(|d| d.to_char()).collect();
        match &self.distance {
            Some(d) => format!("{} -> {} [{}] dir=<{}> dist={:?}", self.source, self.target, self.kind.short_name(), dir, d),
            None => format!("{} -> {} [{}] dir=<{}>", self.source, self.target, self.kind.short_name(), dir),
        }
    }
}

impl fmt::Display for Dependence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Result of dependence analysis.
#[derive(Debug, Clone, Default)]
pub struct Dependences {
    /// Read-after-write pairs, writer to reader
    pub raw: UnionMap,
    /// Write-after-write pairs, earlier writer to the next writer
    pub waw: UnionMap,
    /// Write-after-read pairs, reader to the next writer
    pub war: UnionMap,
    /// Reads with no writer inside the function, reader to cell
    pub live_in: UnionMap,
    /// Writes never overwritten, writer to cell
    pub live_out: UnionMap,
}

impl Dependences {
    /// Union of the three dependence kinds.
    pub fn all(&self) -> UnionMap {
        self.raw.union(&self.war).union(&self.waw)
    }

    /// Per-piece summaries of every dependence.
    pub fn summaries(&self) -> Vec<Dependence> {
        let kinds = [
            (DependenceKind::Flow, &self.raw),
            (DependenceKind::Anti, &self.war),
            (DependenceKind::Output, &self.waw),
        ];
        kinds
            .iter()
            .flat_map(|(kind, rel)| rel.pieces.iter().map(move |p| Dependence::from_piece(*kind, p)))
            .collect()
    }
}

impl fmt::Display for Dependences {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "RAW:      {}", self.raw)?;
        writeln!(f, "WAW:      {}", self.waw)?;
        writeln!(f, "WAR:      {}", self.war)?;
        writeln!(f, "live-in:  {}", self.live_in)?;
        write!(f, "live-out: {}", self.live_out)
    }
}

/// `a - b`, or `a` itself with a warning when the difference is inexact.
fn subtract_or_keep(a: &UnionMap, b: &UnionMap, what: &str) -> UnionMap {
    match a.subtract(b) {
        Ok(d) => d.simplify(),
        Err(_) => {
            warn!("{}: cannot subtract exactly, keeping the over-approximation", what);
            a.clone()
        }
    }
}

/// Restrict `m` to the inputs in `dom(m) - removed`, or keep `m` when the
/// difference is inexact.
fn restrict_domain_or_keep(m: &UnionMap, removed: &UnionSet, what: &str) -> UnionMap {
    match m.domain().subtract(removed) {
        Ok(keep) => m.intersect_domain(&keep.simplify()),
        Err(_) => {
            warn!("{}: cannot subtract exactly, keeping every access", what);
            m.clone()
        }
    }
}

fn missing_dependences() -> AnalysisError {
    AnalysisError::new(
        AnalysisErrorKind::DependencesNotComputed,
        "dependences have not been computed; call compute_dependences first",
    )
}

impl Function {
    /// Dependences from the last analysis, or `DependencesNotComputed`.
    pub(crate) fn require_dependences(&self) -> PolyResult<&Dependences> {
        self.deps.as_ref().ok_or_else(|| missing_dependences().into())
    }

    /// Write relations (computation to buffer cell) of every scheduled,
    /// stored computation, restricted to its domain.
    pub fn write_relations(&self) -> PolyResult<UnionMap> {
        let mut out = UnionMap::empty();
        for id in self.scheduled() {
            let comp = self.comp(id);
            let access = comp.access.as_ref().ok_or_else(|| {
                AnalysisError::new(
                    AnalysisErrorKind::MissingAccess,
                    format!("computation `{}` is not stored in any buffer", comp.name),
                )
            })?;
            if let Some(w) = access.intersect_domain(&self.domain_in_context(id)) {
                out.add(w.simplify());
            }
        }
        Ok(out)
    }

    /// Read relations of `id`, one per access in its expression, each from
    /// `id` to the cell (or to the input tuple when the producer is not
    /// stored). Reads of inline computations are replaced by their own reads.
    pub fn read_relations(&self, id: CompId) -> PolyResult<Vec<BasicMap>> {
        let comp = self.comp(id);
        let Some(expr) = &comp.expr else { return Ok(Vec::new()) };
        let source = comp.domain.space.output.clone();
        let mut out = Vec::new();
        for (producer, indices) in expr.accesses() {
            for r in self.resolve_read(&source, &comp.domain.space.params, producer, indices, 0)? {
                if let Some(r) = r.intersect_domain(&self.domain_in_context(id)) {
                    out.push(r.simplify());
                }
            }
        }
        Ok(out)
    }

    fn resolve_read(
        &self,
        source: &Tuple,
        params: &[String],
        producer: &str,
        indices: &[Expr],
        depth: usize,
    ) -> PolyResult<Vec<BasicMap>> {
        if depth > MAX_INLINE_DEPTH {
            return Err(AnalysisError::new(
                AnalysisErrorKind::UnsupportedAccess,
                format!("inline computations nest deeper than {} at `{}`", MAX_INLINE_DEPTH, producer),
            )
            .into());
        }
        let pid = self.find(producer).ok_or_else(|| {
            AnalysisError::new(AnalysisErrorKind::UnknownComputation, format!("read of unknown computation `{}`", producer))
        })?;
        let p = self.comp(pid);
        let target = Tuple::named(producer, p.iterators().to_vec());
        let rel = access_relation(source, params, target, indices)?;
        if p.inline {
            let Some(p_expr) = &p.expr else { return Ok(Vec::new()) };
            let mut out = Vec::new();
            for (inner, inner_indices) in p_expr.accesses() {
                for tail in self.resolve_read(&p.domain.space.output, &p.domain.space.params, inner, inner_indices, depth + 1)? {
                    if let Some(r) = rel.apply_range(&tail) {
                        out.push(r);
                    }
                }
            }
            return Ok(out);
        }
        match &p.access {
            Some(access) => Ok(rel.apply_range(access).into_iter().collect()),
            None => Ok(vec![rel]),
        }
    }

    /// Order every computation, align the schedules and compute all
    /// dependences under the resulting execution order.
    pub fn compute_dependences(&mut self) -> PolyResult<()> {
        info!("computing dependences of {}", self.name());
        self.gen_ordering_schedules()?;
        self.align_schedules();

        let params = self.params();
        let sched = self.schedule();
        let n_time = sched.pieces.first().map_or(0, BasicMap::n_out);
        let time = Tuple::anonymous_n("t", n_time);
        let before = sched
            .apply_range(&lex_lt(&time, &time, &params))
            .apply_range(&sched.reverse())
            .simplify();
        debug!("execution order: {}", before);

        let writes = self.write_relations()?;
        let overwrite = writes.apply_range(&writes.reverse()).intersect(&before).simplify();
        debug!("overwrites: {}", overwrite);

        let mut deps = Dependences::default();
        let exact = self.config().exact_dataflow;
        for id in self.scheduled() {
            for read in self.read_relations(id)? {
                let read = UnionMap::from_basic(read);
                let memory = writes.apply_range(&read.reverse()).intersect(&before).simplify();
                let flow = if exact && !memory.is_empty() {
                    subtract_or_keep(&memory, &overwrite.apply_range(&memory), "last-writer refinement")
                } else {
                    memory
                };
                deps.live_in = deps.live_in.union(&restrict_domain_or_keep(&read, &flow.range(), "live-in"));
                deps.raw = deps.raw.union(&flow);

                let anti = read.apply_range(&writes.reverse()).intersect(&before).simplify();
                if !anti.is_empty() {
                    let killed = anti.apply_range(&overwrite);
                    deps.war = deps.war.union(&subtract_or_keep(&anti, &killed, "anti-dependence refinement"));
                }
            }
        }
        deps.waw = subtract_or_keep(&overwrite, &overwrite.apply_range(&overwrite), "output-dependence refinement");
        deps.live_out = restrict_domain_or_keep(&writes, &overwrite.domain(), "live-out");
        deps.live_in = deps.live_in.simplify();

        debug!("dependences of {}:\n{}", self.name(), deps);
        info!(
            "{} RAW, {} WAW and {} WAR piece(s)",
            deps.raw.len(),
            deps.waw.len(),
            deps.war.len()
        );
        self.deps = Some(deps);
        Ok(())
    }

    /// Computations with at least one read that has no in-function writer.
    pub fn live_in_computations(&self) -> PolyResult<Vec<CompId>> {
        let deps = self.require_dependences()?;
        Ok(self.ids_named(deps.live_in.pieces.iter().filter(|p| !p.is_empty()).map(|p| p.space.input_tuple())))
    }

    /// Computations with at least one write that is never overwritten.
    pub fn live_out_computations(&self) -> PolyResult<Vec<CompId>> {
        let deps = self.require_dependences()?;
        Ok(self.ids_named(deps.live_out.pieces.iter().filter(|p| !p.is_empty()).map(|p| p.space.input_tuple())))
    }

    fn ids_named(&self, tuples: impl Iterator<Item = Tuple>) -> Vec<CompId> {
        let names: BTreeSet<String> = tuples.map(|t| t.name_str().to_string()).collect();
        self.scheduled().into_iter().filter(|&id| names.contains(&self.comp(id).name)).collect()
    }

    /// Producer/consumer graph: `{ P[...] -> C[...] }` for every read of `P`
    /// in the expression of a scheduled computation `C`.
    pub fn dependence_graph(&self) -> PolyResult<UnionMap> {
        let mut out = UnionMap::empty();
        for id in self.scheduled() {
            let comp = self.comp(id);
            let Some(expr) = &comp.expr else { continue };
            for (producer, indices) in expr.accesses() {
                let pid = self.find(producer).ok_or_else(|| {
                    AnalysisError::new(AnalysisErrorKind::UnknownComputation, format!("read of unknown computation `{}`", producer))
                })?;
                let target = Tuple::named(producer, self.comp(pid).iterators().to_vec());
                let rel = access_relation(&comp.domain.space.output, &comp.domain.space.params, target, indices)?;
                if let Some(rel) = rel.intersect_domain(&self.domain_in_context(id)) {
                    out.add(rel.reverse().simplify());
                }
            }
        }
        Ok(out)
    }

    /// Per-piece summaries of the computed dependences.
    pub fn dependence_summaries(&self) -> PolyResult<Vec<Dependence>> {
        Ok(self.require_dependences()?.summaries())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ArgumentRole, PrimType};
    use crate::transform::Level;
    use crate::utils::errors::PolyError;

    /// `A(i) = A(i - 1) + 1` stored in one buffer.
    fn recurrence() -> (Function, CompId) {
        let mut f = Function::new("recurrence");
        f.buffer("bA", vec![Expr::int(10)], PrimType::Int32, ArgumentRole::Output);
        let a = f
            .computation(
                "A",
                "{ A[i] : 1 <= i < 10 }",
                Expr::access("A", vec![Expr::var("i") - 1]) + 1,
                PrimType::Int32,
            )
            .unwrap();
        f.store_in(a, "bA").unwrap();
        (f, a)
    }

    #[test]
    fn test_recurrence_flow_distance() {
        let (mut f, a) = recurrence();
        f.compute_dependences().unwrap();
        let deps = f.dependences().unwrap();
        assert!(deps.raw.pieces.iter().any(|p| p.contains_point(&[3, 4], &[])));
        assert!(!deps.raw.pieces.iter().any(|p| p.contains_point(&[3, 5], &[])));
        assert!(deps.waw.is_empty());
        let summaries = f.dependence_summaries().unwrap();
        let flow = summaries.iter().find(|d| d.kind == DependenceKind::Flow).unwrap();
        assert_eq!(flow.distance, Some(vec![1]));
        assert_eq!(flow.direction, vec![Direction::Lt]);
        assert!(flow.is_loop_carried());
        // A[0] is read by A(1) and never written
        assert_eq!(f.live_in_computations().unwrap(), vec![a]);
        assert_eq!(f.live_out_computations().unwrap(), vec![a]);
    }

    #[test]
    fn test_not_computed() {
        let (f, _) = recurrence();
        match f.live_in_computations().unwrap_err() {
            PolyError::Analysis(e) => assert_eq!(e.kind, AnalysisErrorKind::DependencesNotComputed),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_missing_access() {
        let mut f = Function::new("missing");
        f.computation("S", "{ S[i] : 0 <= i < 4 }", Expr::int(0), PrimType::Int32).unwrap();
        match f.compute_dependences().unwrap_err() {
            PolyError::Analysis(e) => assert_eq!(e.kind, AnalysisErrorKind::MissingAccess),
            other => panic!("unexpected error {other}"),
        }
    }

    /// Two writes of the same cells followed by a read: only the second
    /// write reaches the read.
    #[test]
    fn test_last_writer_and_output_dependence() {
        let mut f = Function::new("overwrite");
        f.buffer("b", vec![Expr::int(4)], PrimType::Int32, ArgumentRole::Temporary);
        f.buffer("out", vec![Expr::int(4)], PrimType::Int32, ArgumentRole::Output);
        let w1 = f.computation("W1", "{ W1[i] : 0 <= i < 4 }", Expr::int(1), PrimType::Int32).unwrap();
        let w2 = f.computation("W2", "{ W2[i] : 0 <= i < 4 }", Expr::int(2), PrimType::Int32).unwrap();
        let r = f
            .computation("R", "{ R[i] : 0 <= i < 4 }", Expr::access("W2", vec![Expr::var("i")]), PrimType::Int32)
            .unwrap();
        f.store_in(w1, "b").unwrap();
        f.store_in(w2, "b").unwrap();
        f.store_in(r, "out").unwrap();
        f.then(w1, w2, Level::Root).unwrap();
        f.then(w2, r, Level::Root).unwrap();
        f.compute_dependences().unwrap();
        let deps = f.dependences().unwrap();
        assert!(!deps.raw.between("W2", "R").is_empty());
        assert!(deps.raw.between("W1", "R").is_empty());
        assert!(deps.waw.between("W1", "W2").pieces.iter().any(|p| p.contains_point(&[2, 2], &[])));
        assert_eq!(f.live_out_computations().unwrap(), vec![w2, r]);
        assert!(f.live_in_computations().unwrap().is_empty());
    }

    #[test]
    fn test_anti_dependence() {
        let mut f = Function::new("anti");
        f.buffer("b", vec![Expr::int(4)], PrimType::Int32, ArgumentRole::Output);
        f.buffer("c", vec![Expr::int(4)], PrimType::Int32, ArgumentRole::Output);
        let init = f.computation("I", "{ I[i] : 0 <= i < 4 }", Expr::int(0), PrimType::Int32).unwrap();
        let rd = f
            .computation("R", "{ R[i] : 0 <= i < 4 }", Expr::access("I", vec![Expr::var("i")]), PrimType::Int32)
            .unwrap();
        let wr = f.computation("W", "{ W[i] : 0 <= i < 4 }", Expr::int(5), PrimType::Int32).unwrap();
        f.store_in(init, "b").unwrap();
        f.store_in(rd, "c").unwrap();
        f.store_in(wr, "b").unwrap();
        f.then(init, rd, Level::Root).unwrap();
        f.then(rd, wr, Level::Root).unwrap();
        f.compute_dependences().unwrap();
        let deps = f.dependences().unwrap();
        assert!(deps.war.between("R", "W").pieces.iter().any(|p| p.contains_point(&[1, 1], &[])));
        assert!(!deps.war.between("R", "W").pieces.iter().any(|p| p.contains_point(&[1, 2], &[])));
    }

    #[test]
    fn test_inline_reads_resolve_to_producer() {
        let mut f = Function::new("inline");
        f.buffer("bin", vec![Expr::int(8)], PrimType::Int32, ArgumentRole::Input);
        f.buffer("bout", vec![Expr::int(8)], PrimType::Int32, ArgumentRole::Output);
        let input = f.input("In", "{ In[i] : 0 <= i < 8 }", PrimType::Int32).unwrap();
        let tmp = f
            .computation("T", "{ T[i] : 0 <= i < 8 }", Expr::access("In", vec![Expr::var("i")]) * 2, PrimType::Int32)
            .unwrap();
        let out = f
            .computation("O", "{ O[i] : 0 <= i < 8 }", Expr::access("T", vec![Expr::var("i")]), PrimType::Int32)
            .unwrap();
        f.store_in(input, "bin").unwrap();
        f.store_in(out, "bout").unwrap();
        f.set_inline(tmp);
        let reads = f.read_relations(out).unwrap();
        assert_eq!(reads.len(), 1);
        assert_eq!(reads[0].space.output.name_str(), "bin");
        f.compute_dependences().unwrap();
        assert_eq!(f.live_in_computations().unwrap(), vec![out]);
    }

    #[test]
    fn test_dependence_graph_orientation() {
        let (f, _) = recurrence();
        let g = f.dependence_graph().unwrap();
        assert_eq!(g.len(), 1);
        assert!(g.pieces[0].contains_point(&[2, 3], &[]));
    }
}
