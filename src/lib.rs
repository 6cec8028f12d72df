//! # PolyForge - Polyhedral Schedule and Lowering Engine
//!
//! A framework for scheduling loop nests in the polyhedral model, including:
//! - Computations over integer iteration domains and their access relations
//! - Dependence analysis (flow, anti, output, live-in and live-out)
//! - Legality checks for parallelization and whole-function reordering
//! - Ordering, tiling, skewing, fusion and loop tags
//! - Loop-tree construction and lowering to statements over flat buffers
//!
//! ## Architecture
//!
//! ```text
//! Function (computations, buffers) → Schedules → Dependences / Legality → Loop tree → Stmt
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use polyforge::prelude::*;
//!
//! let mut f = Function::new("scale");
//! f.buffer("bA", vec![Expr::var("N")], PrimType::Float32, ArgumentRole::Input);
//! f.buffer("bB", vec![Expr::var("N")], PrimType::Float32, ArgumentRole::Output);
//! let a = f.input("A", "[N] -> { A[i] : 0 <= i < N }", PrimType::Float32)?;
//! let b = f.computation("B", "[N] -> { B[i] : 0 <= i < N }",
//!     Expr::access("A", vec![Expr::var("i")]) * Expr::f32(2.0), PrimType::Float32)?;
//! f.store_in(a, "bA")?;
//! f.store_in(b, "bB")?;
//! f.compute_dependences()?;
//! if f.is_parallel_legal(0, &[b])? {
//!     f.parallelize(b, 0)?;
//! }
//! println!("{}", f.codegen()?);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod polyhedral;
pub mod ir;
pub mod analysis;
pub mod transform;
pub mod codegen;
pub mod kernels;
pub mod utils;

use serde::{Deserialize, Serialize};

// Re-export commonly used types
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::ir::{
        ArgumentRole, BinaryOp, Buffer, CompId, Expr, ForKind, Function, IrExpr, PrimType, Stmt, UnaryOp,
    };
    pub use crate::polyhedral::{
        parse_map, parse_set, AffineExpr, BasicMap, BasicSet, Constraint, Space, Tuple, UnionMap, UnionSet,
    };
    pub use crate::analysis::{Dependence, DependenceKind, Dependences, Direction};
    pub use crate::transform::{Level, LoopTag, Transform};
    pub use crate::codegen::AstNode;
    pub use crate::utils::errors::*;
    pub use crate::CompileConfig;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Options of one compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileConfig {
    /// Largest total shift tried when repairing a fusion
    pub fuse_repair_bound: i64,
    /// Refine memory-based flow pairs to last-writer pairs
    pub exact_dataflow: bool,
    /// Split a vectorized loop by the vector length when it is longer
    pub vectorize_splits: bool,
    /// Prefix of generated loop iterators
    pub iterator_prefix: String,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            fuse_repair_bound: 4,
            exact_dataflow: true,
            vectorize_splits: true,
            iterator_prefix: "c".to_string(),
        }
    }
}

impl CompileConfig {
    /// Set the fusion repair search bound.
    pub fn with_fuse_repair_bound(mut self, bound: i64) -> Self {
        self.fuse_repair_bound = bound;
        self
    }

    /// Enable or disable last-writer refinement.
    pub fn with_exact_dataflow(mut self, exact: bool) -> Self {
        self.exact_dataflow = exact;
        self
    }

    /// Enable or disable splitting on vectorization.
    pub fn with_vectorize_splits(mut self, split: bool) -> Self {
        self.vectorize_splits = split;
        self
    }

    /// Set the loop iterator prefix.
    pub fn with_iterator_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.iterator_prefix = prefix.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_config_builders() {
        let c = CompileConfig::default().with_fuse_repair_bound(2).with_exact_dataflow(false).with_iterator_prefix("t");
        assert_eq!(c.fuse_repair_bound, 2);
        assert!(!c.exact_dataflow);
        assert!(c.vectorize_splits);
        assert_eq!(c.iterator_prefix, "t");
    }
}
