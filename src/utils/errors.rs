//! Error types for the optimizer.
//!
//! Errors are organized by the phase that produces them. All of them are
//! fatal for the current compilation: they report a caller ordering bug or an
//! unsupported construct, never a condition worth retrying. Legality
//! negatives are not errors and are reported as plain booleans.

use thiserror::Error;
use crate::utils::location::Span;
use std::fmt;

/// Top-level error type for the optimizer.
#[derive(Error, Debug)]
pub enum PolyError {
    /// Error while reading a textual set or relation
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Error while ordering or transforming schedules
    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    /// Error during dependence or legality analysis
    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    /// Error while lowering the loop tree to statements
    #[error("Lowering error: {0}")]
    Lowering(#[from] LoweringError),

    /// Internal invariant broken
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error while parsing set or relation text.
#[derive(Error, Debug, Clone)]
pub struct ParseError {
    /// The error message
    pub message: String,
    /// Location in the text
    pub span: Span,
    /// The kind of parse error
    pub kind: ParseErrorKind,
    /// Expected tokens (if applicable)
    pub expected: Vec<String>,
    /// What was found
    pub found: Option<String>,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.message, self.span)?;
        if !self.expected.is_empty() {
            write!(f, " (expected: {})", self.expected.join(", "))?;
        }
        if let Some(ref found) = self.found {
            write!(f, " (found: {})", found)?;
        }
        Ok(())
    }
}

/// Kinds of parse errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Character that starts no token
    UnexpectedChar,
    /// Token out of place
    UnexpectedToken,
    /// Identifier that is neither a dimension nor a parameter
    UnknownIdentifier,
    /// Product of two variables or division by a non-constant
    NonAffine,
    /// Integer literal out of range
    InvalidNumber,
    /// Input ended early
    UnexpectedEof,
    /// A basic (single-piece) object was requested from a union
    NotBasic,
}

/// Error raised by schedule construction and transformation.
#[derive(Error, Debug, Clone)]
pub struct ScheduleError {
    /// The error message
    pub message: String,
    /// The kind of schedule error
    pub kind: ScheduleErrorKind,
    /// Computation the error refers to, if any
    pub computation: Option<String>,
}

impl ScheduleError {
    /// Create an error of the given kind.
    pub fn new(kind: ScheduleErrorKind, message: impl Into<String>) -> Self {
        Self { message: message.into(), kind, computation: None }
    }

    /// Attach the computation name.
    pub fn for_computation(mut self, name: impl Into<String>) -> Self {
        self.computation = Some(name.into());
        self
    }
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.computation {
            Some(name) => write!(f, "{} (computation {})", self.message, name),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Kinds of schedule errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleErrorKind {
    /// The ordering graph is not a tree and no low-level schedule was set
    NotATree,
    /// No computation with that name or id
    UnknownComputation,
    /// Loop level or dimension name not present on the computation
    UnknownDimension,
    /// Non-positive tile, split, vector or unroll size
    InvalidSize,
    /// Schedule relation with an unexpected shape
    InvalidSchedule,
}

/// Error during dependence or legality analysis.
#[derive(Error, Debug, Clone)]
pub struct AnalysisError {
    /// The error message
    pub message: String,
    /// The kind of analysis error
    pub kind: AnalysisErrorKind,
}

impl AnalysisError {
    /// Create an error of the given kind.
    pub fn new(kind: AnalysisErrorKind, message: impl Into<String>) -> Self {
        Self { message: message.into(), kind }
    }
}

impl fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Kinds of analysis errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisErrorKind {
    /// A legality query ran before `compute_dependences`
    DependencesNotComputed,
    /// Access index outside {add, subtract, constant scaling}
    UnsupportedAccess,
    /// A materialized computation has no access relation
    MissingAccess,
    /// A read refers to an unknown computation
    UnknownComputation,
}

/// Error while lowering the loop tree.
#[derive(Error, Debug, Clone)]
pub struct LoweringError {
    /// The error message
    pub message: String,
    /// The kind of lowering error
    pub kind: LoweringErrorKind,
}

impl LoweringError {
    /// Create an error of the given kind.
    pub fn new(kind: LoweringErrorKind, message: impl Into<String>) -> Self {
        Self { message: message.into(), kind }
    }
}

impl fmt::Display for LoweringError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Kinds of lowering errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoweringErrorKind {
    /// Loop increment other than +1
    NonUnitStride,
    /// Expression node with no translation
    UnsupportedExpr,
    /// Access to a buffer the function does not own
    UnknownBuffer,
    /// Leaf naming a computation the function does not own
    UnknownComputation,
    /// Loop dimension without a lower or upper bound
    UnboundedLoop,
    /// Temporary buffer listed as a function argument
    InvalidArgument,
}

/// Result type using PolyError.
pub type PolyResult<T> = Result<T, PolyError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::location::SourceLocation;

    #[test]
    fn test_error_display() {
        let err = ParseError {
            message: "Unexpected token".to_string(),
            span: Span::new(SourceLocation::new(1, 5, 4), SourceLocation::new(1, 10, 9)),
            kind: ParseErrorKind::UnexpectedToken,
            expected: vec!["identifier".to_string()],
            found: Some("number".to_string()),
        };
        let s = format!("{}", err);
        assert!(s.contains("Unexpected token"));
        assert!(s.contains("identifier"));
        assert!(s.contains("1:5-10"));
    }

    #[test]
    fn test_schedule_error_names_computation() {
        let err: PolyError = ScheduleError::new(ScheduleErrorKind::UnknownDimension, "no loop level 3")
            .for_computation("S0")
            .into();
        assert_eq!(err.to_string(), "Schedule error: no loop level 3 (computation S0)");
    }
}
