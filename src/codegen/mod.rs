//! Code generation from schedules.
//!
//! - [`ast_builder`]: loop trees scanned from the time-processor domain
//! - [`lower`]: loop trees lowered to statements over flat buffers

pub mod ast_builder;
pub mod lower;

pub use ast_builder::{AstBuilder, AstNode};
