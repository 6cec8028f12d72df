//! Derived relations and bound extraction.
//!
//! Lexicographic order relations between two tuples of equal arity, and the
//! per-dimension affine bounds used by loop construction and buffer sizing.

use super::basic::BasicMap;
use super::constraint::{Constraint, ConstraintKind};
use super::expr::{ceil_div, floor_div, AffineExpr};
use super::space::{Space, Tuple};
use super::union::UnionMap;

/// Which lexicographic relation to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexOrder {
    Lt,
    Le,
    Gt,
    Ge,
}

fn lex_order(input: &Tuple, output: &Tuple, params: &[String], order: LexOrder) -> UnionMap {
    let n = input.len().min(output.len());
    let space = Space::map(input.clone(), output.clone(), params.to_vec());
    let base = BasicMap::universe(space);
    let mut pieces = Vec::with_capacity(n + 1);
    for k in 0..n {
        let mut piece = base.clone();
        for j in 0..k {
            piece = piece.equate(j, j);
        }
        let x = piece.var(k);
        let y = piece.var(piece.out_col(k));
        let c = match order {
            LexOrder::Lt | LexOrder::Le => Constraint::lt(x, y),
            LexOrder::Gt | LexOrder::Ge => Constraint::lt(y, x),
        };
        pieces.push(piece.with_constraint(c));
    }
    if matches!(order, LexOrder::Le | LexOrder::Ge) {
        let mut eq = base;
        for j in 0..n {
            eq = eq.equate(j, j);
        }
        pieces.push(eq);
    }
    UnionMap::from_pieces(pieces)
}

/// `{ x -> y : x <lex y }`.
pub fn lex_lt(input: &Tuple, output: &Tuple, params: &[String]) -> UnionMap {
    lex_order(input, output, params, LexOrder::Lt)
}

/// `{ x -> y : x <=lex y }`.
pub fn lex_le(input: &Tuple, output: &Tuple, params: &[String]) -> UnionMap {
    lex_order(input, output, params, LexOrder::Le)
}

/// `{ x -> y : x >=lex y }`.
pub fn lex_ge(input: &Tuple, output: &Tuple, params: &[String]) -> UnionMap {
    lex_order(input, output, params, LexOrder::Ge)
}

/// `{ x -> y : x >lex y }`.
pub fn lex_gt(input: &Tuple, output: &Tuple, params: &[String]) -> UnionMap {
    lex_order(input, output, params, LexOrder::Gt)
}

/// One affine bound on a column: `x >= ceil(expr / div)` when used as a
/// lower bound, `x <= floor(expr / div)` when used as an upper bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DivBound {
    /// Numerator over the relation's columns (the bounded column is zero)
    pub expr: AffineExpr,
    /// Positive divisor
    pub div: i64,
}

impl DivBound {
    /// Value as a lower bound at a concrete point.
    pub fn eval_lower(&self, vars: &[i64], params: &[i64]) -> i64 {
        ceil_div(self.expr.evaluate(vars, params), self.div)
    }

    /// Value as an upper bound at a concrete point.
    pub fn eval_upper(&self, vars: &[i64], params: &[i64]) -> i64 {
        floor_div(self.expr.evaluate(vars, params), self.div)
    }
}

/// Lower and upper bounds of one column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DimBounds {
    /// The column is at least the maximum of these
    pub lower: Vec<DivBound>,
    /// The column is at most the minimum of these
    pub upper: Vec<DivBound>,
}

impl DimBounds {
    /// True if the column has a bound on both sides.
    pub fn is_bounded(&self) -> bool {
        !self.lower.is_empty() && !self.upper.is_empty()
    }
}

/// Read the bounds of column `col` off the constraints that involve it.
pub fn dim_bounds(set: &BasicMap, col: usize) -> DimBounds {
    let mut out = DimBounds::default();
    for c in &set.constraints {
        let a = c.coeff(col);
        if a == 0 {
            continue;
        }
        let mut rest = c.expr.clone();
        rest.set_coeff(col, 0);
        let lower = DivBound { expr: -&rest, div: a };
        let upper = DivBound { expr: rest, div: -a };
        match (c.kind, a > 0) {
            (ConstraintKind::Inequality, true) => out.lower.push(lower),
            (ConstraintKind::Inequality, false) => out.upper.push(upper),
            (ConstraintKind::Equality, true) => {
                out.upper.push(DivBound { expr: lower.expr.clone(), div: a });
                out.lower.push(lower);
            }
            (ConstraintKind::Equality, false) => {
                out.lower.push(DivBound { expr: upper.expr.clone(), div: -a });
                out.upper.push(upper);
            }
        }
    }
    out
}

/// Parametric box of a set: for each output dimension, its bounds once every
/// other dimension has been projected away (rational shadow when the
/// projection is not exact).
pub fn bounding_box(set: &BasicMap) -> Vec<DimBounds> {
    let n = set.n_out();
    (0..n)
        .map(|k| {
            let others: Vec<usize> = (0..n).filter(|&j| j != k).collect();
            let single = set.project_out_outputs(&others).drop_locals_approx();
            dim_bounds(&single, single.out_col(0))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polyhedral::parse::parse_set;

    fn anon(n: usize) -> Tuple {
        Tuple::anonymous_n("t", n)
    }

    #[test]
    fn test_lex_lt_points() {
        let lt = lex_lt(&anon(2), &anon(2), &[]);
        let has = |p: &[i64]| lt.pieces.iter().any(|m| m.contains_point(p, &[]));
        assert!(has(&[0, 5, 1, 0]));
        assert!(has(&[1, 2, 1, 3]));
        assert!(!has(&[1, 3, 1, 3]));
        assert!(!has(&[2, 0, 1, 9]));
    }

    #[test]
    fn test_lex_ge_includes_equal() {
        let ge = lex_ge(&anon(2), &anon(2), &[]);
        let has = |p: &[i64]| ge.pieces.iter().any(|m| m.contains_point(p, &[]));
        assert!(has(&[1, 3, 1, 3]));
        assert!(has(&[2, 0, 1, 9]));
        assert!(!has(&[1, 2, 1, 3]));
        let le = lex_le(&anon(1), &anon(1), &[]);
        assert_eq!(le.len(), 2);
        assert_eq!(lex_gt(&anon(1), &anon(1), &[]).len(), 1);
    }

    #[test]
    fn test_bounding_box_triangle() {
        let s = parse_set("[N] -> { S[i, j] : 0 <= i < N and 0 <= j <= i }").unwrap();
        let bb = bounding_box(&s);
        assert_eq!(bb.len(), 2);
        assert!(bb[1].is_bounded());
        // j <= i < N gives j <= N - 1
        let hi = bb[1].upper.iter().map(|b| b.eval_upper(&[0], &[10])).min();
        assert_eq!(hi, Some(9));
        let lo = bb[0].lower.iter().map(|b| b.eval_lower(&[0], &[10])).max();
        assert_eq!(lo, Some(0));
    }

    #[test]
    fn test_dim_bounds_with_divisor() {
        let s = parse_set("{ S[i] : 2i >= 3 and 3i <= 10 }").unwrap();
        let b = dim_bounds(&s, 0);
        assert_eq!(b.lower[0].eval_lower(&[0], &[]), 2);
        assert_eq!(b.upper[0].eval_upper(&[0], &[]), 3);
    }
}
