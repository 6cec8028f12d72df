//! Loop trees from time-processor domains.
//!
//! The builder scans the aligned schedule images of every scheduled
//! computation one time dimension at a time:
//!
//! - a dimension every statement fixes to a constant becomes a sequence,
//!   ordered by that constant;
//! - any other dimension becomes one loop spanning the hull of the
//!   statements' bounds, and statements with tighter bounds are guarded.
//!
//! Loop iterators are named `c<dim>` (prefix configurable); leaves carry one
//! expression per time dimension.

use log::{debug, info};
use std::collections::BTreeMap;
use std::fmt;

use crate::ir::expr::index_const;
use crate::ir::{BinaryOp, Expr, Function};
use crate::polyhedral::{ceil_div, dim_bounds, floor_div, BasicSet};
use crate::utils::errors::{LoweringError, LoweringErrorKind, PolyError, PolyResult};
use crate::utils::pretty::{CodeFormatter, PrettyPrint};

/// A node of the generated loop tree.
#[derive(Debug, Clone, PartialEq)]
pub enum AstNode {
    /// Children in execution order
    Block(Vec<AstNode>),
    /// `for (iterator = lower; iterator < upper; iterator += stride)`
    For {
        /// Time dimension scanned by the loop
        dim: usize,
        /// Loop variable
        iterator: String,
        /// First value (inclusive)
        lower: Expr,
        /// Exclusive bound
        upper: Expr,
        /// Increment
        stride: i64,
        /// Loop body
        body: Box<AstNode>,
    },
    /// Guarded subtree. The builder only emits guards; `else_node` is
    /// filled by callers that assemble trees by hand.
    If {
        /// Condition
        cond: Expr,
        /// Executed when the condition holds
        then_node: Box<AstNode>,
        /// Executed otherwise
        else_node: Option<Box<AstNode>>,
    },
    /// One instance of a computation at a time point
    User {
        /// Computation name
        comp: String,
        /// Coordinates of the time point, one per time dimension
        time: Vec<Expr>,
    },
}

impl AstNode {
    /// A single node stays as is; anything else becomes a block.
    pub fn from_nodes(mut nodes: Vec<AstNode>) -> AstNode {
        if nodes.len() == 1 {
            if let Some(node) = nodes.pop() {
                return node;
            }
        }
        AstNode::Block(nodes)
    }

    /// Visit every node, parents before children.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a AstNode)) {
        visit(self);
        match self {
            AstNode::Block(items) => items.iter().for_each(|n| n.walk(visit)),
            AstNode::For { body, .. } => body.walk(visit),
            AstNode::If { then_node, else_node, .. } => {
                then_node.walk(visit);
                if let Some(e) = else_node {
                    e.walk(visit);
                }
            }
            AstNode::User { .. } => {}
        }
    }

    /// Computation names of the leaves, in execution order.
    pub fn users(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.walk(&mut |n| {
            if let AstNode::User { comp, .. } = n {
                out.push(comp.as_str());
            }
        });
        out
    }

    /// Number of loops in the tree.
    pub fn n_loops(&self) -> usize {
        let mut n = 0;
        self.walk(&mut |node| {
            if matches!(node, AstNode::For { .. }) {
                n += 1;
            }
        });
        n
    }
}

impl PrettyPrint for AstNode {
    fn pretty_into(&self, f: &mut CodeFormatter) {
        match self {
            AstNode::Block(items) => items.iter().for_each(|n| n.pretty_into(f)),
            AstNode::For { iterator, lower, upper, stride, body, .. } => {
                let step = if *stride == 1 { format!("{}++", iterator) } else { format!("{} += {}", iterator, stride) };
                let header = format!("for ({it} = {}; {it} < {}; {})", lower, upper, step, it = iterator);
                f.block(&header, |f| body.pretty_into(f));
            }
            AstNode::If { cond, then_node, else_node } => {
                f.block(&format!("if ({})", cond), |f| then_node.pretty_into(f));
                if let Some(e) = else_node {
                    f.block("else", |f| e.pretty_into(f));
                }
            }
            AstNode::User { comp, time } => {
                let coords: Vec<String> = time.iter().map(|e| e.to_string()).collect();
                f.writeln(&format!("{}({});", comp, coords.join(", ")));
            }
        }
    }
}

impl fmt::Display for AstNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pretty())
    }
}

/// A statement while its time dimensions are scanned.
struct Entry {
    name: String,
    set: BasicSet,
    time: Vec<Expr>,
    guards: Vec<Expr>,
}

impl Entry {
    fn into_leaf(self) -> AstNode {
        let leaf = AstNode::User { comp: self.name, time: self.time };
        let cond = self.guards.into_iter().reduce(|a, b| Expr::binary(BinaryOp::And, a, b));
        match cond {
            Some(cond) => AstNode::If { cond, then_node: Box::new(leaf), else_node: None },
            None => leaf,
        }
    }
}

/// Builds a loop tree from named time-processor domains.
pub struct AstBuilder {
    prefix: String,
    n_dims: usize,
    bindings: Vec<(String, Expr)>,
}

impl AstBuilder {
    /// Builder naming loop iterators `<prefix><dim>`.
    pub fn new(prefix: &str) -> Self {
        Self { prefix: prefix.to_string(), n_dims: 0, bindings: Vec::new() }
    }

    /// Scan the domains, each tuple named after its computation. Every
    /// domain must have the same number of time dimensions.
    pub fn build(&mut self, domains: Vec<BasicSet>) -> PolyResult<AstNode> {
        let domains: Vec<BasicSet> = domains.into_iter().filter(|d| !d.is_empty()).collect();
        let Some(n) = domains.first().map(BasicSet::n_out) else {
            return Ok(AstNode::Block(Vec::new()));
        };
        if domains.iter().any(|d| d.n_out() != n) {
            return Err(PolyError::Internal("time-processor domains are not aligned".to_string()));
        }
        self.n_dims = n;
        self.bindings.clear();
        let entries = domains
            .into_iter()
            .map(|set| Entry {
                name: set.space.output.name_str().to_string(),
                set,
                time: Vec::with_capacity(n),
                guards: Vec::new(),
            })
            .collect();
        let nodes = self.scan(entries, 0)?;
        Ok(AstNode::from_nodes(nodes))
    }

    fn iterator(&self, d: usize) -> String {
        format!("{}{}", self.prefix, d)
    }

    fn bind(&self, e: Expr) -> Expr {
        e.substitute(&self.bindings).fold()
    }

    fn scan(&mut self, entries: Vec<Entry>, d: usize) -> PolyResult<Vec<AstNode>> {
        if d == self.n_dims {
            return Ok(entries.into_iter().map(Entry::into_leaf).collect());
        }
        let projected: Vec<BasicSet> = entries.iter().map(|e| project_to(&e.set, d)).collect();
        let fixed: Vec<Option<i64>> = projected.iter().map(|p| fixed_value(p, d)).collect();
        if fixed.iter().all(Option::is_some) {
            let values = fixed.into_iter().flatten().collect();
            return self.scan_sequence(entries, values, d);
        }
        self.scan_loop(entries, &projected, &fixed, d)
    }

    fn scan_sequence(&mut self, entries: Vec<Entry>, values: Vec<i64>, d: usize) -> PolyResult<Vec<AstNode>> {
        let mut groups: BTreeMap<i64, Vec<Entry>> = BTreeMap::new();
        for (mut e, v) in entries.into_iter().zip(values) {
            e.time.push(index_const(v));
            groups.entry(v).or_default().push(e);
        }
        let mut out = Vec::new();
        for (v, group) in groups {
            self.bindings.push((self.iterator(d), index_const(v)));
            let nodes = self.scan(group, d + 1);
            self.bindings.pop();
            out.extend(nodes?);
        }
        Ok(out)
    }

    fn scan_loop(
        &mut self,
        entries: Vec<Entry>,
        projected: &[BasicSet],
        fixed: &[Option<i64>],
        d: usize,
    ) -> PolyResult<Vec<AstNode>> {
        let iterator = self.iterator(d);
        let mut bounds = Vec::with_capacity(entries.len());
        for (e, p) in entries.iter().zip(projected) {
            bounds.push(self.loop_bounds(p, d, &e.name)?);
        }
        let lower = hull(bounds.iter().map(|b| &b.0), Expr::min);
        let upper = hull(bounds.iter().map(|b| &b.1), Expr::max);

        let mut children = Vec::with_capacity(entries.len());
        for ((mut e, (lo, hi)), v) in entries.into_iter().zip(bounds).zip(fixed) {
            if lo != lower {
                e.guards.push(Expr::var(iterator.as_str()).ge(lo));
            }
            if hi != upper {
                e.guards.push(Expr::var(iterator.as_str()).lt(hi));
            }
            e.time.push(match v {
                Some(v) => index_const(*v),
                None => Expr::var(iterator.as_str()),
            });
            children.push(e);
        }
        debug!("loop over {} in [{}, {})", iterator, lower, upper);
        let body = self.scan(children, d + 1)?;
        Ok(vec![AstNode::For {
            dim: d,
            iterator,
            lower,
            upper,
            stride: 1,
            body: Box::new(AstNode::from_nodes(body)),
        }])
    }

    /// Inclusive lower and exclusive upper bound of dimension `d`, over the
    /// iterators of the enclosing dimensions.
    fn loop_bounds(&self, set: &BasicSet, d: usize, comp: &str) -> PolyResult<(Expr, Expr)> {
        let names: Vec<String> = (0..=d).map(|p| self.iterator(p)).collect();
        let params = &set.space.params;
        let b = dim_bounds(set, set.out_col(d));
        if !b.is_bounded() {
            let side = if b.lower.is_empty() { "lower" } else { "upper" };
            return Err(LoweringError::new(
                LoweringErrorKind::UnboundedLoop,
                format!("time dimension {} of {} has no {} bound", d, comp, side),
            )
            .into());
        }
        let lowers: Vec<Expr> = b
            .lower
            .iter()
            .map(|l| self.bind(Expr::from_affine_div(&l.expr, l.div, &names, params, true)))
            .collect();
        let uppers: Vec<Expr> = b
            .upper
            .iter()
            .map(|u| {
                let mut num = u.expr.clone();
                num.constant += u.div;
                self.bind(Expr::from_affine_div(&num, u.div, &names, params, false))
            })
            .collect();
        Ok((hull(lowers.iter(), Expr::max), hull(uppers.iter(), Expr::min)))
    }
}

/// Combine distinct expressions with `combine`, folding constants.
fn hull<'a>(exprs: impl Iterator<Item = &'a Expr>, combine: fn(Expr, Expr) -> Expr) -> Expr {
    let mut unique: Vec<&Expr> = Vec::new();
    for e in exprs {
        if !unique.contains(&e) {
            unique.push(e);
        }
    }
    unique.into_iter().cloned().reduce(combine).map_or_else(|| Expr::int(0), |e| e.fold())
}

/// The set restricted to dimensions `0..=d`.
fn project_to(set: &BasicSet, d: usize) -> BasicSet {
    let inner: Vec<usize> = (d + 1..set.n_out()).collect();
    set.project_out_outputs(&inner).drop_locals_approx().remove_redundancies()
}

/// Constant value of dimension `d`, if it takes exactly one.
fn fixed_value(set: &BasicSet, d: usize) -> Option<i64> {
    if let Some(v) = set.fixed_out_value(d) {
        return Some(v);
    }
    let b = dim_bounds(set, set.out_col(d));
    let lo = b.lower.iter().filter(|l| l.expr.is_constant()).map(|l| ceil_div(l.expr.constant, l.div)).max()?;
    let hi = b.upper.iter().filter(|u| u.expr.is_constant()).map(|u| floor_div(u.expr.constant, u.div)).min()?;
    (lo == hi).then_some(lo)
}

impl Function {
    /// Order and align the schedules, then build the loop tree of every
    /// scheduled computation. The tree is kept on the function.
    pub fn gen_ast(&mut self) -> PolyResult<&AstNode> {
        self.gen_ordering_schedules()?;
        self.align_schedules();
        let mut domains = Vec::new();
        for id in self.scheduled() {
            domains.push(self.comp_time_processor_domain(id)?);
        }
        let mut builder = AstBuilder::new(&self.config().iterator_prefix);
        let ast = builder.build(domains)?;
        info!("built loop tree of {} with {} loop(s)", self.name(), ast.n_loops());
        Ok(self.ast.insert(ast))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{CompId, PrimType};
    use crate::transform::Level;

    fn two(f: &mut Function, a_dom: &str, b_dom: &str) -> (CompId, CompId) {
        let a = f.computation("A", a_dom, Expr::int(0), PrimType::Int32).unwrap();
        let b = f.computation("B", b_dom, Expr::int(1), PrimType::Int32).unwrap();
        (a, b)
    }

    #[test]
    fn test_single_loop_nest() {
        let mut f = Function::new("f");
        f.computation("S", "[N] -> { S[i, j] : 0 <= i < N and 0 <= j <= i }", Expr::int(0), PrimType::Int32)
            .unwrap();
        let text = f.gen_ast().unwrap().to_string();
        assert_eq!(
            text,
            "for (c1 = 0; c1 < N; c1++) {\n  for (c3 = 0; c3 < (c1 + 1); c3++) {\n    S(0, c1, 0, c3, 0);\n  }\n}\n"
        );
    }

    #[test]
    fn test_root_ordering_gives_sequence() {
        let mut f = Function::new("f");
        let (a, b) = two(&mut f, "{ A[i] : 0 <= i < 4 }", "{ B[i] : 0 <= i < 4 }");
        f.then(a, b, Level::Root).unwrap();
        let ast = f.gen_ast().unwrap();
        match ast {
            AstNode::Block(items) => {
                assert_eq!(items.len(), 2);
                assert!(items.iter().all(|n| matches!(n, AstNode::For { dim: 1, .. })));
            }
            other => panic!("expected a sequence, got {}", other),
        }
        assert_eq!(ast.users(), vec!["A", "B"]);
    }

    #[test]
    fn test_fused_loop_with_guard() {
        let mut f = Function::new("f");
        let (a, b) = two(&mut f, "{ A[i] : 0 <= i < 10 }", "{ B[i] : 0 <= i < 5 }");
        f.then(a, b, Level::Loop(0)).unwrap();
        let text = f.gen_ast().unwrap().to_string();
        assert_eq!(
            text,
            "for (c1 = 0; c1 < 10; c1++) {\n  A(0, c1, 0);\n  if ((c1 < 5)) {\n    B(0, c1, 1);\n  }\n}\n"
        );
        assert_eq!(f.ast().map(AstNode::n_loops), Some(1));
    }

    #[test]
    fn test_unbounded_dimension() {
        let mut f = Function::new("f");
        f.computation("S", "{ S[i] : i >= 0 }", Expr::int(0), PrimType::Int32).unwrap();
        match f.gen_ast().unwrap_err() {
            PolyError::Lowering(e) => assert_eq!(e.kind, LoweringErrorKind::UnboundedLoop),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_empty_function() {
        let mut f = Function::new("f");
        assert_eq!(f.gen_ast().unwrap(), &AstNode::Block(Vec::new()));
    }
}
