//! Utility modules for the polyhedral optimizer.
//!
//! - Error types
//! - Source location tracking for the set and relation reader
//! - Indented text output

pub mod errors;
pub mod location;
pub mod pretty;

// Re-exports
pub use errors::*;
pub use location::{SourceLocation, Span};
pub use pretty::{CodeFormatter, PrettyPrint};
