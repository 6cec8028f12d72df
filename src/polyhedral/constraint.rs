//! Linear constraints for polyhedral representation.
//!
//! A constraint is a linear inequality or equality:
//! - Inequality: expr >= 0
//! - Equality: expr = 0

use crate::polyhedral::expr::{floor_div, AffineExpr};
use serde::{Serialize, Deserialize};
use std::fmt;

/// A linear constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Constraint {
    /// The affine expression (constraint is: expr >= 0 or expr = 0)
    pub expr: AffineExpr,
    /// Kind of constraint
    pub kind: ConstraintKind,
}

/// Kind of constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstraintKind {
    /// Greater than or equal: expr >= 0
    Inequality,
    /// Equal: expr = 0
    Equality,
}

/// Outcome of normalizing a constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    /// Holds for every point.
    Tautology,
    /// Holds for no integer point.
    Infeasible,
    /// Reduced form (coefficients divided by their GCD, inequality tightened).
    Constraint(Constraint),
}

impl Constraint {
    /// Create a new constraint.
    pub fn new(expr: AffineExpr, kind: ConstraintKind) -> Self {
        Self { expr, kind }
    }

    /// Create an inequality constraint: expr >= 0
    pub fn ge_zero(expr: AffineExpr) -> Self {
        Self::new(expr, ConstraintKind::Inequality)
    }

    /// Create an equality constraint: expr = 0
    pub fn eq_zero(expr: AffineExpr) -> Self {
        Self::new(expr, ConstraintKind::Equality)
    }

    /// Create a constraint: lhs >= rhs
    pub fn ge(lhs: AffineExpr, rhs: AffineExpr) -> Self {
        Self::ge_zero(lhs - rhs)
    }

    /// Create a constraint: lhs <= rhs
    pub fn le(lhs: AffineExpr, rhs: AffineExpr) -> Self {
        Self::ge_zero(rhs - lhs)
    }

    /// Create a constraint: lhs < rhs (i.e. rhs - lhs - 1 >= 0)
    pub fn lt(lhs: AffineExpr, rhs: AffineExpr) -> Self {
        let mut e = rhs - lhs;
        e.constant -= 1;
        Self::ge_zero(e)
    }

    /// Create a constraint: lhs = rhs
    pub fn eq(lhs: AffineExpr, rhs: AffineExpr) -> Self {
        Self::eq_zero(lhs - rhs)
    }

    /// Create a lower bound constraint: var >= lower
    pub fn lower_bound(col: usize, lower: i64, n_var: usize, n_param: usize) -> Self {
        let mut expr = AffineExpr::var(col, n_var, n_param);
        expr.constant = -lower;
        Self::ge_zero(expr)
    }

    /// Create an upper bound constraint: var <= upper
    pub fn upper_bound(col: usize, upper: i64, n_var: usize, n_param: usize) -> Self {
        let mut expr = -AffineExpr::var(col, n_var, n_param);
        expr.constant = upper;
        Self::ge_zero(expr)
    }

    /// Create a fixing constraint: var = value
    pub fn fix(col: usize, value: i64, n_var: usize, n_param: usize) -> Self {
        let mut expr = AffineExpr::var(col, n_var, n_param);
        expr.constant = -value;
        Self::eq_zero(expr)
    }

    /// Check if this is an equality constraint.
    pub fn is_equality(&self) -> bool {
        matches!(self.kind, ConstraintKind::Equality)
    }

    /// Check if this is an inequality constraint.
    pub fn is_inequality(&self) -> bool {
        matches!(self.kind, ConstraintKind::Inequality)
    }

    /// Check if this constraint is satisfied by the given point.
    pub fn is_satisfied(&self, vars: &[i64], params: &[i64]) -> bool {
        let value = self.expr.evaluate(vars, params);
        match self.kind {
            ConstraintKind::Inequality => value >= 0,
            ConstraintKind::Equality => value == 0,
        }
    }

    /// Coefficient of a variable column.
    pub fn coeff(&self, col: usize) -> i64 {
        self.expr.coeff(col)
    }

    /// True if the constraint mentions the column.
    pub fn involves(&self, col: usize) -> bool {
        self.expr.coeff(col) != 0
    }

    /// Divide through by the coefficient GCD. Inequalities get their constant
    /// floored (integer tightening); equalities whose constant is not a
    /// multiple of the GCD have no integer solution.
    pub fn normalize(&self) -> Normalized {
        let g = self.expr.coeff_gcd();
        if g == 0 {
            let holds = match self.kind {
                ConstraintKind::Inequality => self.expr.constant >= 0,
                ConstraintKind::Equality => self.expr.constant == 0,
            };
            return if holds { Normalized::Tautology } else { Normalized::Infeasible };
        }
        let mut expr = self.expr.clone();
        if g > 1 {
            match self.kind {
                ConstraintKind::Equality if expr.constant % g != 0 => return Normalized::Infeasible,
                _ => {}
            }
            expr.coeffs.iter_mut().for_each(|c| *c /= g);
            expr.param_coeffs.iter_mut().for_each(|c| *c /= g);
            expr.constant = floor_div(expr.constant, g);
        }
        if self.is_equality() {
            // canonical sign: first non-zero coefficient positive
            let lead = expr
                .coeffs
                .iter()
                .chain(expr.param_coeffs.iter())
                .find(|&&c| c != 0)
                .copied()
                .unwrap_or(1);
            if lead < 0 {
                expr = -expr;
            }
        }
        Normalized::Constraint(Self::new(expr, self.kind))
    }

    /// The disjuncts of the complement. An inequality has one, an equality
    /// two (`expr <= -1` or `expr >= 1`).
    pub fn negate(&self) -> Vec<Constraint> {
        let mut below = -self.expr.clone();
        below.constant -= 1;
        match self.kind {
            ConstraintKind::Inequality => vec![Self::ge_zero(below)],
            ConstraintKind::Equality => {
                let mut above = self.expr.clone();
                above.constant -= 1;
                vec![Self::ge_zero(below), Self::ge_zero(above)]
            }
        }
    }

    /// Convert to string with given names.
    pub fn to_string_with_names(&self, var_names: &[String], param_names: &[String]) -> String {
        let expr_str = self.expr.to_string_with_names(var_names, param_names);
        match self.kind {
            ConstraintKind::Inequality => format!("{} >= 0", expr_str),
            ConstraintKind::Equality => format!("{} = 0", expr_str),
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_with_names(&[], &[]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_tightens_inequality() {
        // 2i - 3 >= 0  =>  i - 2 >= 0
        let mut e = AffineExpr::var(0, 1, 0).scale(2);
        e.constant = -3;
        match Constraint::ge_zero(e).normalize() {
            Normalized::Constraint(c) => {
                assert_eq!(c.coeff(0), 1);
                assert_eq!(c.expr.constant, -2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_normalize_equality_without_integer_solution() {
        // 2i = 3
        let mut e = AffineExpr::var(0, 1, 0).scale(2);
        e.constant = -3;
        assert_eq!(Constraint::eq_zero(e).normalize(), Normalized::Infeasible);
    }

    #[test]
    fn test_constant_constraints() {
        assert_eq!(Constraint::ge_zero(AffineExpr::constant(0, 1, 0)).normalize(), Normalized::Tautology);
        assert_eq!(Constraint::ge_zero(AffineExpr::constant(-1, 1, 0)).normalize(), Normalized::Infeasible);
    }

    #[test]
    fn test_negate_equality() {
        let c = Constraint::fix(0, 3, 1, 0);
        let parts = c.negate();
        assert_eq!(parts.len(), 2);
        assert!(parts[0].is_satisfied(&[2], &[]));
        assert!(!parts[0].is_satisfied(&[3], &[]));
        assert!(parts[1].is_satisfied(&[4], &[]));
    }

    #[test]
    fn test_bounds() {
        let lo = Constraint::lower_bound(0, 1, 2, 0);
        let hi = Constraint::upper_bound(1, 5, 2, 0);
        assert!(lo.is_satisfied(&[1, 9], &[]));
        assert!(!lo.is_satisfied(&[0, 0], &[]));
        assert!(hi.is_satisfied(&[0, 5], &[]));
        assert!(!hi.is_satisfied(&[0, 6], &[]));
    }
}
