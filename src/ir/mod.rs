//! Intermediate representations.
//!
//! This module defines two levels of IR:
//! - Computations: expressions over iteration domains, owned by a [`Function`]
//! - Statements: the lowered loop tree over flat buffers

pub mod expr;
pub mod computation;
pub mod function;
pub mod stmt;

pub use expr::{BinaryOp, Expr, Literal, PrimType, UnaryOp};
pub use computation::{static_dim_name, ArgumentRole, Buffer, CompId, Computation, Invariant};
pub use function::Function;
pub use stmt::{DeviceApi, ForKind, IrExpr, Stmt};
