//! The compilation context.
//!
//! A [`Function`] owns every computation (an arena indexed by [`CompId`]),
//! the buffers, invariants and parameter context, the ordering graph, the
//! loop tags, the computed dependences and the generated code. All
//! cross-references between computations are names or ids resolved here.

use log::{debug, info};
use std::collections::BTreeMap;

use crate::analysis::access::access_relation;
use crate::analysis::dependence::Dependences;
use crate::codegen::ast_builder::AstNode;
use crate::ir::computation::{ArgumentRole, Buffer, CompId, Computation, Invariant};
use crate::ir::expr::{Expr, PrimType};
use crate::ir::stmt::Stmt;
use crate::polyhedral::{bounding_box, parse_set, BasicSet, Space, Tuple, UnionMap, UnionSet};
use crate::transform::ordering::SchedGraph;
use crate::transform::tags::TagTable;
use crate::utils::errors::{
    LoweringError, LoweringErrorKind, PolyError, PolyResult, ScheduleError, ScheduleErrorKind,
};
use crate::CompileConfig;

/// A function under compilation.
#[derive(Debug, Clone)]
pub struct Function {
    name: String,
    config: CompileConfig,
    computations: Vec<Computation>,
    buffers: BTreeMap<String, Buffer>,
    arguments: Vec<String>,
    invariants: Vec<Invariant>,
    context: Option<BasicSet>,
    pub(crate) sched_graph: SchedGraph,
    pub(crate) tags: TagTable,
    pub(crate) deps: Option<Dependences>,
    pub(crate) ast: Option<AstNode>,
    pub(crate) body: Option<Stmt>,
}

impl Function {
    /// Create an empty function with the default configuration.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, CompileConfig::default())
    }

    /// Create an empty function.
    pub fn with_config(name: impl Into<String>, config: CompileConfig) -> Self {
        Self {
            name: name.into(),
            config,
            computations: Vec::new(),
            buffers: BTreeMap::new(),
            arguments: Vec::new(),
            invariants: Vec::new(),
            context: None,
            sched_graph: SchedGraph::default(),
            tags: TagTable::default(),
            deps: None,
            ast: None,
            body: None,
        }
    }

    /// Function name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Active configuration.
    pub fn config(&self) -> &CompileConfig {
        &self.config
    }

    /// Replace the configuration.
    pub fn set_config(&mut self, config: CompileConfig) {
        self.config = config;
    }

    // ---- computations ----

    /// Add a computation over `domain`; the domain tuple is renamed to `name`.
    pub fn add_computation(&mut self, name: &str, domain: BasicSet, expr: Option<Expr>, elem_type: PrimType) -> CompId {
        let id = CompId(self.computations.len());
        let comp = Computation::new(id, name, domain, expr, elem_type);
        if comp.schedule_this {
            self.sched_graph.add_node(id);
        }
        debug!("added computation {} {} over {}", id, name, comp.domain);
        self.computations.push(comp);
        id
    }

    /// Add a computation whose domain is given as text, e.g.
    /// `"[N] -> { S[i] : 0 <= i < N }"`.
    pub fn computation(&mut self, name: &str, domain: &str, expr: Expr, elem_type: PrimType) -> PolyResult<CompId> {
        let domain = parse_set(domain)?;
        Ok(self.add_computation(name, domain, Some(expr), elem_type))
    }

    /// Add an input (a computation without a right-hand side that is never
    /// scheduled; reading it reads its buffer).
    pub fn input(&mut self, name: &str, domain: &str, elem_type: PrimType) -> PolyResult<CompId> {
        let domain = parse_set(domain)?;
        Ok(self.add_computation(name, domain, None, elem_type))
    }

    /// Computation by id.
    pub fn comp(&self, id: CompId) -> &Computation {
        &self.computations[id.0]
    }

    /// Mutable computation by id.
    pub fn comp_mut(&mut self, id: CompId) -> &mut Computation {
        &mut self.computations[id.0]
    }

    /// All computations in definition order.
    pub fn computations(&self) -> &[Computation] {
        &self.computations
    }

    /// Ids of the computations that take part in scheduling.
    pub fn scheduled(&self) -> Vec<CompId> {
        self.computations.iter().filter(|c| c.schedule_this).map(|c| c.id).collect()
    }

    /// First computation with the given name.
    pub fn find(&self, name: &str) -> Option<CompId> {
        self.computations.iter().find(|c| c.name == name).map(|c| c.id)
    }

    /// First computation with the given name, or an error.
    pub fn comp_by_name(&self, name: &str) -> PolyResult<CompId> {
        self.find(name).ok_or_else(|| {
            ScheduleError::new(ScheduleErrorKind::UnknownComputation, format!("no computation named `{}`", name)).into()
        })
    }

    /// All computations with the given name.
    pub fn comps_named(&self, name: &str) -> Vec<CompId> {
        self.computations.iter().filter(|c| c.name == name).map(|c| c.id).collect()
    }

    /// Mark a computation inline: it is substituted into its consumers and
    /// never stored.
    pub fn set_inline(&mut self, id: CompId) {
        let comp = self.comp_mut(id);
        comp.inline = true;
        comp.schedule_this = false;
        self.sched_graph.remove_node(id);
    }

    /// Exclude a computation from scheduling, analysis and lowering.
    pub fn skip_schedule(&mut self, id: CompId) {
        self.comp_mut(id).schedule_this = false;
        self.sched_graph.remove_node(id);
    }

    /// Disambiguate computations that share a name: each of them becomes
    /// `_<name>_update_<k>`.
    pub fn rename_computations(&mut self) {
        let mut seen: BTreeMap<String, Vec<CompId>> = BTreeMap::new();
        for c in &self.computations {
            seen.entry(c.name.clone()).or_default().push(c.id);
        }
        for (name, ids) in seen.into_iter().filter(|(_, ids)| ids.len() > 1) {
            for (k, id) in ids.into_iter().enumerate() {
                let new_name = format!("_{}_update_{}", name, k);
                debug!("renaming {} {} to {}", id, name, new_name);
                self.comp_mut(id).rename(&new_name);
            }
        }
    }

    // ---- buffers and arguments ----

    /// Declare a buffer.
    pub fn add_buffer(&mut self, buffer: Buffer) {
        self.buffers.insert(buffer.name.clone(), buffer);
    }

    /// Declare a buffer from its parts.
    pub fn buffer(&mut self, name: &str, extents: Vec<Expr>, elem_type: PrimType, role: ArgumentRole) {
        self.add_buffer(Buffer::new(name, extents, elem_type, role));
    }

    /// Buffer by name.
    pub fn get_buffer(&self, name: &str) -> Option<&Buffer> {
        self.buffers.get(name)
    }

    /// All buffers.
    pub fn buffers(&self) -> &BTreeMap<String, Buffer> {
        &self.buffers
    }

    /// Store `id` into `buffer` at its own iterators.
    pub fn store_in(&mut self, id: CompId, buffer: &str) -> PolyResult<()> {
        let indices = self.comp(id).iterators().iter().map(|it| Expr::var(it.as_str())).collect();
        self.store_in_at(id, buffer, indices)
    }

    /// Store `id` into `buffer` at the given indices.
    pub fn store_in_at(&mut self, id: CompId, buffer: &str, indices: Vec<Expr>) -> PolyResult<()> {
        let buf = self.buffers.get(buffer).ok_or_else(|| {
            PolyError::from(LoweringError::new(LoweringErrorKind::UnknownBuffer, format!("no buffer named `{}`", buffer)))
        })?;
        let target = Tuple { name: Some(buf.name.clone()), ..Tuple::anonymous_n("b", indices.len()) };
        let comp = self.comp(id);
        let access = access_relation(&comp.domain.space.output, &comp.domain.space.params, target, &indices)?;
        debug!("access of {}: {}", comp.name, access);
        self.comp_mut(id).access = Some(access);
        Ok(())
    }

    /// Record the argument buffers in order. Temporaries may not be
    /// arguments.
    pub fn set_arguments(&mut self, names: &[&str]) -> PolyResult<()> {
        let mut args = Vec::with_capacity(names.len());
        for name in names {
            let buf = self.buffers.get(*name).ok_or_else(|| {
                PolyError::from(LoweringError::new(LoweringErrorKind::UnknownBuffer, format!("no buffer named `{}`", name)))
            })?;
            if buf.role == ArgumentRole::Temporary {
                return Err(LoweringError::new(
                    LoweringErrorKind::InvalidArgument,
                    format!("temporary buffer `{}` cannot be a function argument", name),
                )
                .into());
            }
            args.push(name.to_string());
        }
        self.arguments = args;
        Ok(())
    }

    /// Argument buffers in order.
    pub fn arguments(&self) -> Vec<&Buffer> {
        self.arguments.iter().filter_map(|n| self.buffers.get(n)).collect()
    }

    // ---- invariants and context ----

    /// Add a symbolic constant.
    pub fn add_invariant(&mut self, name: &str, value: Expr) {
        self.invariants.push(Invariant { name: name.to_string(), value });
    }

    /// Symbolic constants in definition order.
    pub fn invariants(&self) -> &[Invariant] {
        &self.invariants
    }

    /// Replace the parameter context, e.g. `"[N] -> { : N >= 16 }"`.
    pub fn set_context(&mut self, text: &str) -> PolyResult<()> {
        self.context = Some(parse_context(text)?);
        Ok(())
    }

    /// Intersect more constraints into the parameter context.
    pub fn add_context_constraints(&mut self, text: &str) -> PolyResult<()> {
        let extra = parse_context(text)?;
        self.context = Some(match self.context.take() {
            Some(ctx) => ctx.intersect(&extra).simplify(),
            None => extra,
        });
        Ok(())
    }

    /// Parameter context (a zero-dimensional set), if any.
    pub fn context(&self) -> Option<&BasicSet> {
        self.context.as_ref()
    }

    /// Every parameter name used by a domain or the context.
    pub fn params(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let all = self
            .computations
            .iter()
            .map(|c| &c.domain.space.params)
            .chain(self.context.iter().map(|c| &c.space.params));
        for params in all {
            out = Space::merge_params(&out, params);
        }
        out
    }

    /// Domain of `id` with the context folded in.
    pub fn domain_in_context(&self, id: CompId) -> BasicSet {
        let dom = &self.comp(id).domain;
        match &self.context {
            Some(ctx) => with_context(dom, ctx),
            None => dom.clone(),
        }
    }

    // ---- domains and schedules ----

    /// Union of the iteration domains of scheduled computations.
    pub fn iteration_domain(&self) -> UnionSet {
        UnionSet::from_pieces(self.scheduled().into_iter().map(|id| self.domain_in_context(id)).collect())
    }

    /// Union of the schedules restricted to their domains.
    pub fn schedule(&self) -> UnionMap {
        let pieces = self
            .scheduled()
            .into_iter()
            .filter_map(|id| self.comp(id).schedule.intersect_domain(&self.domain_in_context(id)))
            .collect();
        UnionMap::from_pieces(pieces)
    }

    /// Image of one domain under its schedule, tuple named after the
    /// computation.
    pub fn comp_time_processor_domain(&self, id: CompId) -> PolyResult<BasicSet> {
        let comp = self.comp(id);
        let image = self.domain_in_context(id).apply_to_set(&comp.schedule).ok_or_else(|| {
            PolyError::from(
                ScheduleError::new(ScheduleErrorKind::InvalidSchedule, "schedule input does not match the domain")
                    .for_computation(comp.name.as_str()),
            )
        })?;
        Ok(image.with_output_name(Some(comp.name.clone())).simplify())
    }

    /// Images of every scheduled domain under its schedule.
    pub fn time_processor_domain(&self) -> PolyResult<UnionSet> {
        let mut out = UnionSet::empty();
        for id in self.scheduled() {
            out.add(self.comp_time_processor_domain(id)?);
        }
        Ok(out)
    }

    /// Time-processor domain without the static dimensions.
    pub fn trimmed_time_processor_domain(&self) -> PolyResult<UnionSet> {
        let full = self.time_processor_domain()?;
        Ok(UnionSet::from_pieces(
            full.pieces
                .iter()
                .map(|p| {
                    let statics: Vec<usize> = (0..p.n_out()).step_by(2).collect();
                    p.project_out_outputs(&statics)
                })
                .collect(),
        ))
    }

    /// Scheduled computations sorted by their static coordinates.
    fn by_static_order(&self) -> Vec<CompId> {
        let mut ids = self.scheduled();
        ids.sort_by_key(|&id| (self.comp(id).static_dims(), id));
        ids
    }

    /// Computation that runs first in the current ordering.
    pub fn first_computation(&self) -> Option<CompId> {
        self.by_static_order().first().copied()
    }

    /// Computation that runs last in the current ordering.
    pub fn last_computation(&self) -> Option<CompId> {
        self.by_static_order().last().copied()
    }

    /// Snapshot every schedule.
    pub fn save_default_schedules(&mut self) {
        for c in &mut self.computations {
            c.default_schedule = Some(c.schedule.clone());
        }
    }

    /// Restore the snapshots and drop every loop tag.
    pub fn restore_default_schedules(&mut self) {
        for c in &mut self.computations {
            if let Some(s) = &c.default_schedule {
                c.schedule = s.clone();
            }
        }
        self.tags.clear();
        info!("restored default schedules of {}", self.name);
    }

    /// Fill in the extents of buffers declared without any, from the
    /// bounding box of every write into them.
    pub fn compute_bounds(&mut self) -> PolyResult<()> {
        let mut updates = Vec::new();
        for (name, buf) in &self.buffers {
            if !buf.extents.is_empty() {
                continue;
            }
            let mut extents: Vec<Option<Expr>> = Vec::new();
            for id in self.scheduled() {
                let Some(access) = &self.comp(id).access else { continue };
                if access.space.output.name_str() != name {
                    continue;
                }
                let cells = self.domain_in_context(id).apply_to_set(access);
                let Some(cells) = cells else { continue };
                let bounds = bounding_box(&cells);
                extents.resize(bounds.len(), None);
                for (k, b) in bounds.iter().enumerate() {
                    if b.upper.is_empty() {
                        return Err(LoweringError::new(
                            LoweringErrorKind::UnboundedLoop,
                            format!("dimension {} of buffer `{}` has no upper bound", k, name),
                        )
                        .into());
                    }
                    let mut ext: Option<Expr> = None;
                    for ub in &b.upper {
                        let mut num = ub.expr.clone();
                        num.constant += ub.div;
                        let e = Expr::from_affine_div(&num, ub.div, &cells.space.dim_names(), &cells.space.params, false);
                        ext = Some(match ext {
                            Some(prev) => Expr::min(prev, e),
                            None => e,
                        });
                    }
                    if let Some(e) = ext {
                        extents[k] = Some(match extents[k].take() {
                            Some(prev) => Expr::max(prev, e),
                            None => e,
                        });
                    }
                }
            }
            if !extents.is_empty() {
                let extents: Vec<Expr> = extents.into_iter().map(|e| e.unwrap_or_else(|| Expr::int(1))).collect();
                debug!("bounds of {}: {:?}", name, extents.iter().map(|e| e.to_string()).collect::<Vec<_>>());
                updates.push((name.clone(), extents));
            }
        }
        for (name, extents) in updates {
            if let Some(buf) = self.buffers.get_mut(&name) {
                buf.extents = extents;
            }
        }
        Ok(())
    }

    // ---- results ----

    /// Dependences from the last `compute_dependences` call.
    pub fn dependences(&self) -> Option<&Dependences> {
        self.deps.as_ref()
    }

    /// Loop tree from the last AST construction.
    pub fn ast(&self) -> Option<&AstNode> {
        self.ast.as_ref()
    }

    /// Lowered statement tree from the last `codegen` call.
    pub fn body(&self) -> Option<&Stmt> {
        self.body.as_ref()
    }

    /// Text dump of every computation's domain and schedule.
    pub fn dump_schedules(&self) -> String {
        let mut out = String::new();
        for c in &self.computations {
            let marker = if c.schedule_this { "" } else { " (not scheduled)" };
            out.push_str(&format!("{}{}\n  domain:   {}\n  schedule: {}\n", c.name, marker, c.domain, c.schedule));
        }
        out
    }
}

fn parse_context(text: &str) -> PolyResult<BasicSet> {
    Ok(parse_set(text)?)
}

/// Intersect a domain with a zero-dimensional parameter context.
fn with_context(dom: &BasicSet, ctx: &BasicSet) -> BasicSet {
    let (d, c) = BasicSet::align_params(dom, &ctx.drop_locals_approx());
    let mut out = d;
    let n = out.n_cols();
    for con in &c.constraints {
        let mut lifted = con.clone();
        lifted.expr.coeffs.resize(n, 0);
        out.add_constraint(lifted);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_stage() -> (Function, CompId, CompId) {
        let mut f = Function::new("f");
        let a = f.computation("A", "[N] -> { A[i] : 0 <= i < N }", Expr::int(1), PrimType::Int32).unwrap();
        let b = f
            .computation("B", "[N] -> { B[i] : 0 <= i < N }", Expr::access("A", vec![Expr::var("i")]), PrimType::Int32)
            .unwrap();
        f.buffer("buf_a", vec![Expr::var("N")], PrimType::Int32, ArgumentRole::Temporary);
        f.buffer("buf_b", vec![Expr::var("N")], PrimType::Int32, ArgumentRole::Output);
        f.store_in(a, "buf_a").unwrap();
        f.store_in(b, "buf_b").unwrap();
        (f, a, b)
    }

    #[test]
    fn test_lookup_and_arguments() {
        let (mut f, a, _) = two_stage();
        assert_eq!(f.find("A"), Some(a));
        assert!(f.comp_by_name("Z").is_err());
        assert!(f.set_arguments(&["buf_a"]).is_err());
        f.set_arguments(&["buf_b"]).unwrap();
        assert_eq!(f.arguments().len(), 1);
        assert_eq!(f.params(), vec!["N".to_string()]);
    }

    #[test]
    fn test_store_in_unknown_buffer() {
        let (mut f, a, _) = two_stage();
        let err = f.store_in(a, "nope").unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_rename_computations() {
        let mut f = Function::new("f");
        f.computation("S", "{ S[i] : 0 <= i < 4 }", Expr::int(0), PrimType::Int32).unwrap();
        f.computation("S", "{ S[i] : 0 <= i < 4 }", Expr::int(1), PrimType::Int32).unwrap();
        f.computation("T", "{ T[i] : 0 <= i < 4 }", Expr::int(1), PrimType::Int32).unwrap();
        f.rename_computations();
        let names: Vec<&str> = f.computations().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["_S_update_0", "_S_update_1", "T"]);
    }

    #[test]
    fn test_context_restricts_domains() {
        let (mut f, a, _) = two_stage();
        f.set_context("[N] -> { : N <= 3 }").unwrap();
        let dom = f.domain_in_context(a);
        assert!(dom.contains_point(&[2], &[3]));
        assert!(!dom.contains_point(&[5], &[8]));
    }

    #[test]
    fn test_time_processor_domain_is_named() {
        let (f, a, _) = two_stage();
        let tp = f.comp_time_processor_domain(a).unwrap();
        assert_eq!(tp.space.output.name_str(), "A");
        assert_eq!(tp.n_out(), 3);
        assert!(tp.contains_point(&[0, 4, 0], &[10]));
        let trimmed = f.trimmed_time_processor_domain().unwrap();
        assert!(trimmed.pieces.iter().all(|p| p.n_out() == 1));
    }

    #[test]
    fn test_compute_bounds_sizes_temporaries() {
        let mut f = Function::new("f");
        let a = f.computation("A", "{ A[i, j] : 0 <= i < 10 and 0 <= j <= i }", Expr::int(0), PrimType::Int32).unwrap();
        f.buffer("tmp", vec![], PrimType::Int32, ArgumentRole::Temporary);
        f.store_in(a, "tmp").unwrap();
        f.compute_bounds().unwrap();
        let ext: Vec<String> = f.get_buffer("tmp").unwrap().extents.iter().map(|e| e.to_string()).collect();
        assert_eq!(ext, vec!["10", "10"]);
    }

    #[test]
    fn test_save_restore_schedules() {
        let (mut f, a, _) = two_stage();
        f.save_default_schedules();
        let original = f.comp(a).schedule.clone();
        f.comp_mut(a).schedule = f.comp(a).schedule.fix_out(0, 5);
        f.restore_default_schedules();
        assert_eq!(f.comp(a).schedule, original);
    }
}
