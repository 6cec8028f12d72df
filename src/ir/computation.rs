//! Computations, buffers and invariants.

use serde::{Serialize, Deserialize};
use std::fmt;

use crate::ir::expr::{Expr, PrimType};
use crate::polyhedral::{BasicMap, BasicSet, Constraint, Space, Tuple};

/// Stable index of a computation inside its [`Function`](crate::ir::Function).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CompId(pub usize);

impl fmt::Display for CompId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a buffer is passed to the generated code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArgumentRole {
    /// Read-only argument
    Input,
    /// Argument written by the function
    Output,
    /// Local storage allocated around the function body
    Temporary,
}

/// A named multi-dimensional array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Buffer {
    /// Buffer name
    pub name: String,
    /// Element type
    pub elem_type: PrimType,
    /// Extent of each dimension, outermost first
    pub extents: Vec<Expr>,
    /// Argument role
    pub role: ArgumentRole,
}

impl Buffer {
    /// Create a buffer.
    pub fn new(name: impl Into<String>, extents: Vec<Expr>, elem_type: PrimType, role: ArgumentRole) -> Self {
        Self { name: name.into(), elem_type, extents, role }
    }

    /// Number of dimensions.
    pub fn n_dims(&self) -> usize {
        self.extents.len()
    }
}

/// A named symbolic constant bound before the function body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invariant {
    /// Name visible to expressions and bounds
    pub name: String,
    /// Defining expression
    pub value: Expr,
}

/// One computation: a statement executed for every point of its domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Computation {
    /// Index in the owning function
    pub id: CompId,
    /// Name, also the tuple name of the domain, access and schedule
    pub name: String,
    /// Iteration domain
    pub domain: BasicSet,
    /// Right-hand side (`None` for inputs)
    pub expr: Option<Expr>,
    /// Element type of the value
    pub elem_type: PrimType,
    /// Write access `S[i] -> buf[...]`
    pub access: Option<BasicMap>,
    /// Substituted into its consumers instead of being stored
    pub inline: bool,
    /// Schedule `S[i] -> [s0, d0, s1, ..., sn]`
    pub schedule: BasicMap,
    /// Schedule snapshot taken by `save_default_schedules`
    pub default_schedule: Option<BasicMap>,
    /// Excluded computations are skipped by ordering, analysis and lowering
    pub schedule_this: bool,
}

impl Computation {
    /// Create a computation over `domain`, which gets renamed to `name`.
    pub fn new(id: CompId, name: &str, domain: BasicSet, expr: Option<Expr>, elem_type: PrimType) -> Self {
        let domain = domain.with_output_name(Some(name.to_string()));
        let schedule = identity_schedule(&domain.space.output, &domain.space.params);
        let schedule_this = expr.is_some();
        Self {
            id,
            name: name.to_string(),
            domain,
            expr,
            elem_type,
            access: None,
            inline: false,
            schedule,
            default_schedule: None,
            schedule_this,
        }
    }

    /// Iterator names.
    pub fn iterators(&self) -> &[String] {
        &self.domain.space.output.dims
    }

    /// Number of iterators.
    pub fn n_iterators(&self) -> usize {
        self.domain.n_out()
    }

    /// True if the computation has a right-hand side.
    pub fn is_defined(&self) -> bool {
        self.expr.is_some()
    }

    /// Number of dynamic (loop) dimensions of the schedule.
    pub fn n_loop_levels(&self) -> usize {
        self.schedule.n_out() / 2
    }

    /// Names of the dynamic dimensions, outermost first.
    pub fn loop_level_names(&self) -> Vec<String> {
        self.schedule
            .space
            .output
            .dims
            .iter()
            .skip(1)
            .step_by(2)
            .cloned()
            .collect()
    }

    /// Values of the static dimensions (unfixed ones read as 0).
    pub fn static_dims(&self) -> Vec<i64> {
        (0..self.schedule.n_out())
            .step_by(2)
            .map(|k| self.schedule.fixed_out_value(k).unwrap_or(0))
            .collect()
    }

    /// Rename the computation and every tuple that carries its name.
    pub fn rename(&mut self, new_name: &str) {
        let name = Some(new_name.to_string());
        self.name = new_name.to_string();
        self.domain = self.domain.clone().with_output_name(name.clone());
        self.schedule = self.schedule.clone().with_input_name(name.clone());
        self.access = self.access.take().map(|a| a.with_input_name(name.clone()));
        self.default_schedule = self.default_schedule.take().map(|s| s.with_input_name(name));
    }
}

/// Name of the static dimension at schedule position `2k`.
pub fn static_dim_name(k: usize) -> String {
    format!("_s{}", k)
}

/// `{ S[i, j] -> [0, i, 0, j, 0] }`
pub fn identity_schedule(domain: &Tuple, params: &[String]) -> BasicMap {
    let n = domain.len();
    let mut names = Vec::with_capacity(2 * n + 1);
    for (k, it) in domain.dims.iter().enumerate() {
        names.push(static_dim_name(k));
        names.push(it.clone());
    }
    names.push(static_dim_name(n));
    let mut m = BasicMap::universe(Space::map(domain.clone(), Tuple::anonymous(names), params.to_vec()));
    for k in 0..n {
        let e = m.var(m.out_col(2 * k + 1)) - m.var(k);
        m.add_constraint(Constraint::eq_zero(e));
    }
    for k in 0..=n {
        m = m.fix_out(2 * k, 0);
    }
    m
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polyhedral::parse_set;

    #[test]
    fn test_identity_schedule_shape() {
        let dom = parse_set("[N] -> { S[i, j] : 0 <= i < N and 0 <= j < N }").unwrap();
        let c = Computation::new(CompId(0), "S", dom, Some(Expr::int(0)), PrimType::Int32);
        assert_eq!(c.schedule.n_out(), 5);
        assert_eq!(c.n_loop_levels(), 2);
        assert_eq!(c.loop_level_names(), vec!["i", "j"]);
        assert_eq!(c.static_dims(), vec![0, 0, 0]);
        assert!(c.schedule.contains_point(&[2, 3, 0, 2, 0, 3, 0], &[10]));
        assert!(!c.schedule.contains_point(&[2, 3, 0, 3, 0, 2, 0], &[10]));
    }

    #[test]
    fn test_rename_updates_tuples() {
        let dom = parse_set("{ S[i] : 0 <= i < 4 }").unwrap();
        let mut c = Computation::new(CompId(0), "S", dom, None, PrimType::Float32);
        assert!(!c.schedule_this);
        c.rename("_S_update_0");
        assert_eq!(c.domain.space.output.name_str(), "_S_update_0");
        assert_eq!(c.schedule.space.input_tuple().name_str(), "_S_update_0");
    }
}
