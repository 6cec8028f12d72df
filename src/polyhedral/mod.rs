//! Integer sets and relations.
//!
//! This module is the affine arithmetic the rest of the optimizer is built on:
//! - Affine expressions and constraints
//! - Spaces with named tuples and parameters
//! - Basic (conjunctive) sets and relations with existential locals
//! - Finite unions of those
//! - An Omega-test core for exact integer emptiness and projection
//! - A reader for isl-style text

pub mod space;
pub mod expr;
pub mod constraint;
pub mod omega;
pub mod basic;
pub mod union;
pub mod parse;
pub mod operations;

pub use space::{Space, Tuple};
pub use expr::{AffineExpr, floor_div, ceil_div};
pub use constraint::{Constraint, ConstraintKind};
pub use basic::{BasicMap, BasicSet, Inexact};
pub use union::{UnionMap, UnionSet};
pub use parse::{parse_map, parse_set, parse_union_map, parse_union_set};
pub use operations::{lex_lt, lex_le, lex_ge, dim_bounds, bounding_box, DivBound, DimBounds};
