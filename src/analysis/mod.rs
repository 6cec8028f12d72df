//! Analysis passes for polyhedral optimization.
//!
//! - [`access`]: access relations from index expressions
//! - [`dependence`]: flow, anti and output dependences, live-in and live-out
//! - [`legality`]: parallelization and whole-function legality checks

pub mod access;
pub mod dependence;
pub mod legality;

pub use access::{access_relation, to_affine};
pub use dependence::{Dependence, DependenceKind, Dependences, Direction};
