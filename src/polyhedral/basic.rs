//! Basic (conjunctive) integer sets and relations.
//!
//! A [`BasicMap`] is a conjunction of affine constraints over the columns
//! `[input dims | output dims | locals]` of its [`Space`]. Locals are
//! existentially quantified. A basic set is a `BasicMap` whose space has no
//! input tuple, so every operation below works on both.

use log::debug;
use serde::{Serialize, Deserialize};
use std::fmt;

use super::constraint::{Constraint, ConstraintKind, Normalized};
use super::expr::AffineExpr;
use super::omega::{Projection, Row, System};
use super::space::{Space, Tuple};

/// A basic set is a basic map without an input tuple.
pub type BasicSet = BasicMap;

/// Returned when an operation needs a quantifier-free operand but some
/// existential variable could not be eliminated exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inexact;

/// A conjunction of affine constraints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicMap {
    /// Tuples and parameters
    pub space: Space,
    /// Number of existential (local) columns after the tuple columns
    pub n_local: usize,
    /// Constraints over `[in | out | locals]` and the parameters
    pub constraints: Vec<Constraint>,
}

impl BasicMap {
    /// The unconstrained relation over `space`.
    pub fn universe(space: Space) -> Self {
        Self { space, n_local: 0, constraints: Vec::new() }
    }

    /// The empty relation over `space`.
    pub fn empty(space: Space) -> Self {
        let mut m = Self::universe(space);
        let n = m.n_cols();
        let p = m.n_param();
        m.constraints.push(Constraint::ge_zero(AffineExpr::constant(-1, n, p)));
        m
    }

    /// `{ in[...] -> out[...] : out_k = in_k }`; arities must agree.
    pub fn identity(input: Tuple, output: Tuple, params: Vec<String>) -> Self {
        let n = input.len();
        let mut m = Self::universe(Space::map(input, output, params));
        for k in 0..n {
            let e = m.var(m.out_col(k)) - m.var(k);
            m.add_constraint(Constraint::eq_zero(e));
        }
        m
    }

    /// Build a relation whose outputs are the given affine functions of the
    /// inputs (expressions are over the input columns and parameters).
    pub fn from_outputs(input: Tuple, output: Tuple, params: Vec<String>, outputs: &[AffineExpr]) -> Self {
        let n_in = input.len();
        let mut m = Self::universe(Space::map(input, output, params));
        let n = m.n_cols();
        for (k, f) in outputs.iter().enumerate() {
            let mut lifted = f.clone();
            lifted.coeffs.resize(n_in, 0);
            lifted.insert_vars(n_in, n - n_in);
            lifted.param_coeffs.resize(m.n_param(), 0);
            m.add_constraint(Constraint::eq(m.var(m.out_col(k)), lifted));
        }
        m
    }

    /// Number of input dimensions.
    pub fn n_in(&self) -> usize {
        self.space.n_in()
    }

    /// Number of output (set) dimensions.
    pub fn n_out(&self) -> usize {
        self.space.n_out()
    }

    /// Number of parameters.
    pub fn n_param(&self) -> usize {
        self.space.n_param()
    }

    /// Number of variable columns (tuple dims plus locals).
    pub fn n_cols(&self) -> usize {
        self.space.n_dims() + self.n_local
    }

    /// Column of output dimension `k`.
    pub fn out_col(&self, k: usize) -> usize {
        self.space.out_col(k)
    }

    /// Column of local `k`.
    pub fn local_col(&self, k: usize) -> usize {
        self.space.n_dims() + k
    }

    /// Zero expression sized for this relation.
    pub fn zero_expr(&self) -> AffineExpr {
        AffineExpr::zero(self.n_cols(), self.n_param())
    }

    /// Expression for a single column.
    pub fn var(&self, col: usize) -> AffineExpr {
        AffineExpr::var(col, self.n_cols(), self.n_param())
    }

    /// Expression for a parameter, by name.
    pub fn param(&self, name: &str) -> Option<AffineExpr> {
        self.space
            .param_index(name)
            .map(|i| AffineExpr::param(i, self.n_cols(), self.n_param()))
    }

    /// Constant expression sized for this relation.
    pub fn constant(&self, v: i64) -> AffineExpr {
        AffineExpr::constant(v, self.n_cols(), self.n_param())
    }

    /// Add a constraint (sized for this relation).
    pub fn add_constraint(&mut self, c: Constraint) {
        self.constraints.push(c);
    }

    /// Builder form of [`add_constraint`](Self::add_constraint).
    pub fn with_constraint(mut self, c: Constraint) -> Self {
        self.add_constraint(c);
        self
    }

    /// Add a parameter column if it is not present yet; returns its index.
    pub fn add_param(&mut self, name: &str) -> usize {
        if let Some(i) = self.space.param_index(name) {
            return i;
        }
        self.space.params.push(name.to_string());
        let n = self.n_param();
        for c in &mut self.constraints {
            c.expr.param_coeffs.resize(n, 0);
        }
        n - 1
    }

    /// Re-express over `params`, which must contain every current parameter.
    pub fn with_params(&self, params: &[String]) -> Self {
        if self.space.params == params {
            return self.clone();
        }
        let mapping = self.space.param_mapping(params);
        let mut out = self.clone();
        out.space.params = params.to_vec();
        for c in &mut out.constraints {
            c.expr = c.expr.remap_params(&mapping, params.len());
        }
        out
    }

    /// Bring two relations onto the union of their parameters.
    pub fn align_params(a: &Self, b: &Self) -> (Self, Self) {
        let merged = Space::merge_params(&a.space.params, &b.space.params);
        (a.with_params(&merged), b.with_params(&merged))
    }

    /// Rebuild every constraint with the column mapping `mapping` into a
    /// relation with `space` and `n_local` locals.
    fn remapped(&self, mapping: &[usize], space: Space, n_local: usize) -> Self {
        let n = space.n_dims() + n_local;
        let constraints = self
            .constraints
            .iter()
            .map(|c| Constraint::new(c.expr.remap_vars(mapping, n), c.kind))
            .collect();
        Self { space, n_local, constraints }
    }

    fn to_system(&self) -> System {
        let n = self.n_cols();
        let mut sys = System::new(n + self.n_param());
        for c in &self.constraints {
            let mut coeffs = c.expr.coeffs.clone();
            coeffs.resize(n, 0);
            coeffs.extend(c.expr.param_coeffs.iter().copied());
            coeffs.resize(n + self.n_param(), 0);
            let row = Row::new(coeffs, c.expr.constant);
            match c.kind {
                ConstraintKind::Equality => sys.eqs.push(row),
                ConstraintKind::Inequality => sys.ineqs.push(row),
            }
        }
        sys
    }

    fn constraints_from_system(sys: &System, n_cols: usize) -> Vec<Constraint> {
        let to_expr = |r: &Row| AffineExpr {
            constant: r.constant,
            coeffs: r.coeffs[..n_cols].to_vec(),
            param_coeffs: r.coeffs[n_cols..].to_vec(),
        };
        sys.eqs
            .iter()
            .map(|r| Constraint::eq_zero(to_expr(r)))
            .chain(sys.ineqs.iter().map(|r| Constraint::ge_zero(to_expr(r))))
            .collect()
    }

    /// Exact emptiness over the integers (parameters are existential).
    pub fn is_empty(&self) -> bool {
        !self.to_system().is_feasible()
    }

    /// Membership of a concrete tuple point (`[in | out]` values).
    pub fn contains_point(&self, point: &[i64], params: &[i64]) -> bool {
        let mut m = self.clone();
        for (col, &v) in point.iter().enumerate().take(self.space.n_dims()) {
            let e = m.var(col) - m.constant(v);
            m.add_constraint(Constraint::eq_zero(e));
        }
        for (idx, &v) in params.iter().enumerate().take(self.n_param()) {
            let mut e = m.constant(-v);
            e.set_param_coeff(idx, 1);
            m.add_constraint(Constraint::eq_zero(e));
        }
        !m.is_empty()
    }

    /// Normalize constraints, drop duplicates and tautologies, and eliminate
    /// every local that can be removed exactly.
    pub fn simplify(&self) -> Self {
        let mut out = self.clone();
        if !out.normalize_constraints() {
            return Self::empty(self.space.clone());
        }
        let mut k = out.n_local;
        while k > 0 {
            k -= 1;
            let col = out.local_col(k);
            let mentioned = out.constraints.iter().any(|c| c.involves(col));
            if mentioned {
                match out.to_system().project_out(col) {
                    Projection::Exact(sys) => {
                        out.constraints = Self::constraints_from_system(&sys, out.n_cols());
                    }
                    Projection::Shadow(_) => continue,
                }
            }
            for c in &mut out.constraints {
                c.expr.remove_var(col);
            }
            out.n_local -= 1;
            if !out.normalize_constraints() {
                return Self::empty(self.space.clone());
            }
        }
        out
    }

    fn normalize_constraints(&mut self) -> bool {
        let mut kept: Vec<Constraint> = Vec::with_capacity(self.constraints.len());
        for c in &self.constraints {
            match c.normalize() {
                Normalized::Tautology => {}
                Normalized::Infeasible => return false,
                Normalized::Constraint(c) => {
                    if !kept.contains(&c) {
                        kept.push(c);
                    }
                }
            }
        }
        self.constraints = kept;
        true
    }

    /// Drop constraints implied by the others.
    pub fn remove_redundancies(&self) -> Self {
        let mut out = self.simplify();
        let mut i = 0;
        while i < out.constraints.len() {
            if out.constraints[i].is_inequality() {
                let mut others = out.clone();
                let c = others.constraints.remove(i);
                let mut probe = others.clone();
                probe.constraints.extend(c.negate());
                if probe.is_empty() {
                    out = others;
                    continue;
                }
            }
            i += 1;
        }
        out
    }

    /// Eliminate all locals exactly or report [`Inexact`].
    pub fn without_locals(&self) -> Result<Self, Inexact> {
        let s = self.simplify();
        if s.n_local == 0 {
            Ok(s)
        } else {
            Err(Inexact)
        }
    }

    /// Over-approximate by projecting every local with the rational shadow.
    pub fn drop_locals_approx(&self) -> Self {
        let mut out = self.simplify();
        while out.n_local > 0 {
            let col = out.local_col(out.n_local - 1);
            let sys = match out.to_system().project_out(col) {
                Projection::Exact(sys) | Projection::Shadow(sys) => sys,
            };
            out.constraints = Self::constraints_from_system(&sys, out.n_cols());
            for c in &mut out.constraints {
                c.expr.remove_var(col);
            }
            out.n_local -= 1;
        }
        out.simplify()
    }

    /// Intersection of two relations in matching spaces.
    pub fn intersect(&self, other: &Self) -> Self {
        let (a, b) = Self::align_params(self, other);
        let n_dims = a.space.n_dims();
        let n_local = a.n_local + b.n_local;
        let mapping: Vec<usize> = (0..n_dims)
            .chain((0..b.n_local).map(|l| n_dims + a.n_local + l))
            .collect();
        let mut out = a.remapped(&(0..a.n_cols()).collect::<Vec<_>>(), a.space.clone(), n_local);
        out.constraints
            .extend(b.remapped(&mapping, a.space.clone(), n_local).constraints);
        out
    }

    /// Domain of a relation as a set.
    pub fn domain(&self) -> Self {
        let space = self.space.domain();
        let n_local = self.n_out() + self.n_local;
        let mapping: Vec<usize> = (0..self.n_cols()).collect();
        self.remapped(&mapping, space, n_local).simplify()
    }

    /// Range of a relation as a set.
    pub fn range(&self) -> Self {
        let (n_in, n_out) = (self.n_in(), self.n_out());
        let space = self.space.range();
        let mapping: Vec<usize> = (0..n_in)
            .map(|i| n_out + i)
            .chain(0..n_out)
            .chain((0..self.n_local).map(|l| n_in + n_out + l))
            .collect();
        self.remapped(&mapping, space, n_in + self.n_local).simplify()
    }

    /// Swap input and output.
    pub fn reverse(&self) -> Self {
        let (n_in, n_out) = (self.n_in(), self.n_out());
        let mapping: Vec<usize> = (0..n_in)
            .map(|i| n_out + i)
            .chain(0..n_out)
            .chain((0..self.n_local).map(|l| n_in + n_out + l))
            .collect();
        self.remapped(&mapping, self.space.reverse(), self.n_local)
    }

    /// Composition `self: A -> B` followed by `other: B -> C`, giving `A -> C`.
    /// Returns `None` when the middle tuples do not match.
    pub fn apply_range(&self, other: &Self) -> Option<Self> {
        if !other.space.input_tuple().matches(&self.space.output) {
            return None;
        }
        let (a, b) = Self::align_params(self, other);
        let (n_a, n_b, n_c) = (a.n_in(), a.n_out(), b.n_out());
        let n_local = n_b + a.n_local + b.n_local;
        let space = Space::map(a.space.input_tuple(), b.space.output.clone(), a.space.params.clone());
        let base = n_a + n_c;
        let map_a: Vec<usize> = (0..n_a)
            .chain((0..n_b).map(|j| base + j))
            .chain((0..a.n_local).map(|l| base + n_b + l))
            .collect();
        let map_b: Vec<usize> = (0..n_b)
            .map(|j| base + j)
            .chain((0..n_c).map(|k| n_a + k))
            .chain((0..b.n_local).map(|l| base + n_b + a.n_local + l))
            .collect();
        let mut out = a.remapped(&map_a, space.clone(), n_local);
        out.constraints.extend(b.remapped(&map_b, space, n_local).constraints);
        Some(out.simplify())
    }

    /// Image of a set under a relation whose input tuple matches the set.
    pub fn apply_to_set(&self, map: &Self) -> Option<Self> {
        let as_map = Self {
            space: Space::map(Tuple::anonymous(vec![]), self.space.output.clone(), self.space.params.clone()),
            n_local: self.n_local,
            constraints: self.constraints.clone(),
        };
        let image = as_map.apply_range(map)?;
        Some(image.range())
    }

    /// Restrict the input to a set over the same tuple.
    pub fn intersect_domain(&self, set: &Self) -> Option<Self> {
        self.intersect_side(set, 0, self.space.input.as_ref()?)
    }

    /// Restrict the output to a set over the same tuple.
    pub fn intersect_range(&self, set: &Self) -> Option<Self> {
        let offset = self.n_in();
        let tuple = self.space.output.clone();
        self.intersect_side(set, offset, &tuple)
    }

    fn intersect_side(&self, set: &Self, offset: usize, tuple: &Tuple) -> Option<Self> {
        if !set.space.output.matches(tuple) {
            return None;
        }
        let (a, s) = Self::align_params(self, set);
        let n_dims = a.space.n_dims();
        let n_local = a.n_local + s.n_local;
        let mapping: Vec<usize> = (0..s.n_out())
            .map(|j| offset + j)
            .chain((0..s.n_local).map(|l| n_dims + a.n_local + l))
            .collect();
        let mut out = a.remapped(&(0..a.n_cols()).collect::<Vec<_>>(), a.space.clone(), n_local);
        out.constraints.extend(s.remapped(&mapping, a.space.clone(), n_local).constraints);
        Some(out)
    }

    /// Add `in_k = out_k`.
    pub fn equate(&self, in_k: usize, out_k: usize) -> Self {
        let e = self.var(in_k) - self.var(self.out_col(out_k));
        self.clone().with_constraint(Constraint::eq_zero(e))
    }

    /// Fix output dimension `k` to `value`, replacing any previous fixing.
    pub fn fix_out(&self, k: usize, value: i64) -> Self {
        let col = self.out_col(k);
        let mut out = self.clone();
        out.constraints.retain(|c| !(c.is_equality() && c.expr.support().eq(std::iter::once(col)) && c.expr.param_coeffs.iter().all(|&p| p == 0)));
        let e = out.var(col) - out.constant(value);
        out.add_constraint(Constraint::eq_zero(e));
        out
    }

    /// Value of output dimension `k` when fixed to a constant by an explicit
    /// equality.
    pub fn fixed_out_value(&self, k: usize) -> Option<i64> {
        let col = self.out_col(k);
        self.constraints.iter().find_map(|c| {
            let only_col = c.is_equality()
                && c.expr.support().eq(std::iter::once(col))
                && c.expr.param_coeffs.iter().all(|&p| p == 0);
            if !only_col {
                return None;
            }
            let a = c.coeff(col);
            (c.expr.constant % a == 0).then(|| -c.expr.constant / a)
        })
    }

    /// Insert `names.len()` unconstrained output dimensions at `pos`.
    pub fn insert_out_dims(&self, pos: usize, names: &[String]) -> Self {
        let mut out = self.clone();
        let pos = pos.min(self.n_out());
        let col = self.out_col(pos);
        for c in &mut out.constraints {
            c.expr.insert_vars(col, names.len());
        }
        for (i, n) in names.iter().enumerate() {
            out.space.output.dims.insert(pos + i, n.clone());
        }
        out
    }

    /// Turn the listed output dimensions into existentials.
    pub fn project_out_outputs(&self, dims: &[usize]) -> Self {
        let n_in = self.n_in();
        let keep: Vec<usize> = (0..self.n_out()).filter(|k| !dims.contains(k)).collect();
        let mut space = self.space.clone();
        space.output.dims = keep.iter().map(|&k| self.space.output.dims[k].clone()).collect();
        let n_keep = keep.len();
        let n_local = self.n_local + dims.len();
        let mut mapping: Vec<usize> = (0..n_in).collect();
        let mut next_local = n_in + n_keep;
        for k in 0..self.n_out() {
            if let Some(pos) = keep.iter().position(|&x| x == k) {
                mapping.push(n_in + pos);
            } else {
                mapping.push(next_local);
                next_local += 1;
            }
        }
        mapping.extend((0..self.n_local).map(|l| next_local + l));
        self.remapped(&mapping, space, n_local).simplify()
    }

    /// Difference set `{ out - in }` of a relation between tuples of equal
    /// arity.
    pub fn deltas(&self) -> Self {
        let n = self.n_in().min(self.n_out());
        let space = Space::set(Tuple::anonymous_n("d", n), self.space.params.clone());
        let n_local = self.space.n_dims() + self.n_local;
        let mapping: Vec<usize> = (0..self.n_cols()).map(|c| n + c).collect();
        let mut out = self.remapped(&mapping, space, n_local);
        for k in 0..n {
            let e = out.var(k) - out.var(n + self.out_col(k)) + out.var(n + k);
            out.add_constraint(Constraint::eq_zero(e));
        }
        out.simplify()
    }

    /// Rename the output tuple.
    pub fn with_output_name(mut self, name: Option<String>) -> Self {
        self.space.output.name = name;
        self
    }

    /// Rename the input tuple (no-op for sets).
    pub fn with_input_name(mut self, name: Option<String>) -> Self {
        if let Some(input) = self.space.input.as_mut() {
            input.name = name;
        }
        self
    }

    /// `self \ other` as a list of disjoint pieces, exact when `other` has no
    /// existential that resists elimination.
    pub fn subtract(&self, other: &Self) -> Result<Vec<Self>, Inexact> {
        if !self.space.matches(&other.space) {
            return Ok(vec![self.clone()]);
        }
        let (a, b) = Self::align_params(self, other);
        if a.intersect(&b).is_empty() {
            return Ok(vec![a]);
        }
        let b = b.without_locals()?;
        let n_local = a.n_local;
        let lift = |c: &Constraint| {
            let mut e = c.expr.clone();
            e.coeffs.resize(a.space.n_dims(), 0);
            e.coeffs.resize(a.space.n_dims() + n_local, 0);
            Constraint::new(e, c.kind)
        };
        let mut pieces = Vec::new();
        let mut prefix = a.clone();
        for c in &b.constraints {
            for neg in c.negate() {
                let piece = prefix.clone().with_constraint(lift(&neg));
                if !piece.is_empty() {
                    pieces.push(piece.simplify());
                }
            }
            prefix.add_constraint(lift(c));
        }
        debug!("subtract produced {} piece(s)", pieces.len());
        Ok(pieces)
    }

    /// True if every point of `self` is in `other`.
    pub fn is_subset(&self, other: &Self) -> Result<bool, Inexact> {
        Ok(self.subtract(other)?.is_empty())
    }

    /// Column names used for printing (duplicates get a prime).
    fn column_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for n in self.space.dim_names() {
            let mut name = n;
            while names.contains(&name) {
                name.push('\'');
            }
            names.push(name);
        }
        names.extend((0..self.n_local).map(|l| format!("e{}", l)));
        names
    }

    /// Render the constraint part as `a <= b` style text.
    pub fn constraints_to_string(&self) -> String {
        let names = self.column_names();
        self.constraints
            .iter()
            .map(|c| {
                let (pos, neg) = split_signs(&c.expr);
                let lhs = pos.to_string_with_names(&names, &self.space.params);
                let rhs = neg.to_string_with_names(&names, &self.space.params);
                match c.kind {
                    ConstraintKind::Equality => format!("{} = {}", lhs, rhs),
                    ConstraintKind::Inequality => format!("{} >= {}", lhs, rhs),
                }
            })
            .collect::<Vec<_>>()
            .join(" and ")
    }
}

/// Split an expression into its positive part and the negation of its
/// negative part, so `e >= 0` prints as `pos >= neg`.
fn split_signs(e: &AffineExpr) -> (AffineExpr, AffineExpr) {
    let mut pos = AffineExpr::zero(e.n_var(), e.n_param());
    let mut neg = AffineExpr::zero(e.n_var(), e.n_param());
    for (i, &c) in e.coeffs.iter().enumerate() {
        if c > 0 {
            pos.coeffs[i] = c;
        } else {
            neg.coeffs[i] = -c;
        }
    }
    for (i, &c) in e.param_coeffs.iter().enumerate() {
        if c > 0 {
            pos.param_coeffs[i] = c;
        } else {
            neg.param_coeffs[i] = -c;
        }
    }
    if e.constant > 0 {
        pos.constant = e.constant;
    } else {
        neg.constant = -e.constant;
    }
    (pos, neg)
}

impl fmt::Display for BasicMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = self.column_names();
        if !self.space.params.is_empty() {
            write!(f, "[{}] -> ", self.space.params.join(", "))?;
        }
        let tuple = |t: &Tuple, offset: usize| {
            format!("{}[{}]", t.name_str(), names[offset..offset + t.len()].join(", "))
        };
        write!(f, "{{ ")?;
        if let Some(input) = &self.space.input {
            write!(f, "{} -> ", tuple(input, 0))?;
        }
        write!(f, "{}", tuple(&self.space.output, self.n_in()))?;
        if !self.constraints.is_empty() {
            write!(f, " : ")?;
            if self.n_local > 0 {
                write!(f, "exists ({}: ", names[self.space.n_dims()..].join(", "))?;
            }
            write!(f, "{}", self.constraints_to_string())?;
            if self.n_local > 0 {
                write!(f, ")")?;
            }
        }
        write!(f, " }}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    /// `{ S[i] : lo <= i < hi }`
    fn interval(name: &str, lo: i64, hi: i64) -> BasicMap {
        let mut s = BasicMap::universe(Space::set(Tuple::named(name, names(&["i"])), vec![]));
        s.add_constraint(Constraint::lower_bound(0, lo, 1, 0));
        s.add_constraint(Constraint::upper_bound(0, hi - 1, 1, 0));
        s
    }

    #[test]
    fn test_emptiness() {
        assert!(!interval("S", 0, 10).is_empty());
        assert!(interval("S", 5, 5).is_empty());
        assert!(interval("S", 0, 4).intersect(&interval("S", 4, 8)).is_empty());
    }

    #[test]
    fn test_domain_range_reverse() {
        // { S[i] -> T[i + 1] : 0 <= i < 10 }
        let mut shift = AffineExpr::var(0, 1, 0);
        shift.constant = 1;
        let m = BasicMap::from_outputs(
            Tuple::named("S", names(&["i"])),
            Tuple::named("T", names(&["j"])),
            vec![],
            &[shift],
        )
        .intersect_domain(&interval("S", 0, 10))
        .unwrap();
        let r = m.range();
        assert_eq!(r.space.output.name_str(), "T");
        assert!(r.contains_point(&[1], &[]));
        assert!(r.contains_point(&[10], &[]));
        assert!(!r.contains_point(&[0], &[]));
        assert_eq!(r.n_local, 0);
        assert!(m.domain().contains_point(&[9], &[]));
        assert!(m.reverse().contains_point(&[3, 2], &[]));
    }

    #[test]
    fn test_apply_range_composes() {
        let mut plus1 = AffineExpr::var(0, 1, 0);
        plus1.constant = 1;
        let f = BasicMap::from_outputs(Tuple::named("S", names(&["i"])), Tuple::anonymous(names(&["t"])), vec![], &[plus1.clone()]);
        let g = BasicMap::from_outputs(Tuple::anonymous(names(&["t"])), Tuple::anonymous(names(&["u"])), vec![], &[plus1.scale(2)]);
        let h = f.apply_range(&g).unwrap();
        // u = 2 * (i + 1) + ... where plus1.scale(2) = 2t + 2
        assert!(h.contains_point(&[1, 6], &[]));
        assert!(!h.contains_point(&[1, 5], &[]));
        assert_eq!(h.n_local, 0);
    }

    #[test]
    fn test_deltas_of_shift() {
        // { S[i] -> S[i + 1] : 0 <= i < 10 } has the single delta 1
        let mut shift = AffineExpr::var(0, 1, 0);
        shift.constant = 1;
        let m = BasicMap::from_outputs(Tuple::named("S", names(&["i"])), Tuple::named("S", names(&["i"])), vec![], &[shift])
            .intersect_domain(&interval("S", 0, 10))
            .unwrap();
        let d = m.deltas();
        assert_eq!(d.n_out(), 1);
        assert!(d.contains_point(&[1], &[]));
        assert!(!d.contains_point(&[0], &[]));
        assert!(!d.contains_point(&[2], &[]));
    }

    #[test]
    fn test_subtract() {
        let a = interval("S", 0, 10);
        let b = interval("S", 3, 5);
        let pieces = a.subtract(&b).unwrap();
        let inside = |p: i64| pieces.iter().any(|s| s.contains_point(&[p], &[]));
        assert!(inside(0) && inside(2) && inside(5) && inside(9));
        assert!(!inside(3) && !inside(4));
    }

    #[test]
    fn test_fixed_out_value_and_fix() {
        let s = BasicMap::universe(Space::set(Tuple::anonymous(names(&["a", "b"])), vec![])).fix_out(1, 3);
        assert_eq!(s.fixed_out_value(1), Some(3));
        assert_eq!(s.fixed_out_value(0), None);
        let s = s.fix_out(1, 7);
        assert_eq!(s.fixed_out_value(1), Some(7));
        assert_eq!(s.constraints.len(), 1);
    }

    #[test]
    fn test_parameter_alignment() {
        let mut a = BasicMap::universe(Space::set(Tuple::named("S", names(&["i"])), names(&["N"])));
        let n = a.param("N").unwrap();
        a.add_constraint(Constraint::lt(a.var(0), n));
        let mut b = BasicMap::universe(Space::set(Tuple::named("S", names(&["i"])), names(&["M"])));
        let m = b.param("M").unwrap();
        b.add_constraint(Constraint::ge(b.var(0), m));
        let c = a.intersect(&b);
        assert_eq!(c.space.params, names(&["N", "M"]));
        // i < N and i >= M: points exist for M < N
        assert!(c.contains_point(&[2], &[5, 1]));
        assert!(!c.contains_point(&[2], &[5, 3]));
    }

    #[test]
    fn test_display() {
        let s = interval("S", 0, 10);
        assert_eq!(s.to_string(), "{ S[i] : i >= 0 and 9 >= i }");
    }
}
