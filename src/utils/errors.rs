//! Error types for the schedule engine.
//!
//! Only two error kinds are recoverable: an illegal schedule request and a
//! malformed relation text supplied by a user. Contract violations inside
//! the engine panic.

use thiserror::Error;
use std::fmt;

/// Top-level error type, used by the command line front end.
#[derive(Error, Debug)]
pub enum PolySchedError {
    /// A schedule primitive rejected the request
    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    /// Relation text could not be parsed
    #[error("Presburger error: {0}")]
    Presburger(#[from] PresburgerError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON input
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The recoverable illegal-schedule signal.
///
/// Raised by every primitive that refuses a rewrite; the enclosing
/// transaction is rolled back before the error reaches the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct ScheduleError {
    /// Why the request was refused
    pub kind: ScheduleErrorKind,
    /// Human-readable explanation
    pub message: String,
}

impl ScheduleError {
    /// Create a new error of the given kind.
    pub fn new(kind: ScheduleErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    /// A dependence would be reversed or broken.
    pub fn dependence(message: impl Into<String>) -> Self {
        Self::new(ScheduleErrorKind::Dependence, message)
    }

    /// A requested node does not exist.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ScheduleErrorKind::NotFound, message)
    }

    /// The request is inconsistent with the tree.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ScheduleErrorKind::Malformed, message)
    }

    /// The tree shape is outside what the primitive handles.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ScheduleErrorKind::Unsupported, message)
    }
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Kinds of illegal schedule requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScheduleErrorKind {
    /// The rewrite would reverse a dependence
    Dependence,
    /// A referenced node is missing
    NotFound,
    /// The request does not fit the tree (not a loop chain, not a permutation, ...)
    Malformed,
    /// The tree shape is not handled
    Unsupported,
}

impl fmt::Display for ScheduleErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScheduleErrorKind::Dependence => "dependence violated",
            ScheduleErrorKind::NotFound => "not found",
            ScheduleErrorKind::Malformed => "invalid request",
            ScheduleErrorKind::Unsupported => "unsupported",
        };
        write!(f, "{}", s)
    }
}

/// Error reading relation text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct PresburgerError {
    /// The error message
    pub message: String,
    /// Byte offset into the text
    pub offset: usize,
    /// The kind of error
    pub kind: PresburgerErrorKind,
}

impl PresburgerError {
    pub(crate) fn new(kind: PresburgerErrorKind, offset: usize, message: impl Into<String>) -> Self {
        Self { message: message.into(), offset, kind }
    }
}

impl fmt::Display for PresburgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at offset {}", self.message, self.offset)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresburgerErrorKind {
    /// Unexpected character or token
    Syntax,
    /// Name not declared as parameter, dimension or existential
    UnknownName,
    /// Product of two non-constant terms, division by a non-constant, ...
    NonAffine,
    /// Quantifier under negation, arity mismatch between disjuncts
    Unsupported,
}

/// Result type of the schedule primitives.
pub type ScheduleResult<T> = Result<T, ScheduleError>;

/// Result type using PolySchedError.
pub type PolySchedResult<T> = Result<T, PolySchedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ScheduleError::dependence("a[i] written by #3 is read by #5");
        let s = format!("{}", err);
        assert!(s.starts_with("dependence violated"));
        assert!(s.contains("#5"));

        let top: PolySchedError = err.into();
        assert!(top.to_string().contains("Schedule error"));
    }

    #[test]
    fn test_presburger_error_display() {
        let err = PresburgerError::new(PresburgerErrorKind::UnknownName, 7, "unknown name `k`");
        assert_eq!(err.to_string(), "unknown name `k` at offset 7");
    }
}
