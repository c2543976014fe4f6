//! Parse-time errors.

use thiserror::Error;

/// A malformed token stream or unexpected construct.
///
/// Carries the source position and an expected-construct hint; the caller
/// must fix the source, nothing here is recoverable within the call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("syntax error at {line}:{col}: expected {expected}, found {found}")]
pub struct SyntaxError {
    pub line: u32,
    pub col: u32,
    pub expected: String,
    pub found: String,
}

impl SyntaxError {
    pub fn new(line: u32, col: u32, expected: impl Into<String>, found: impl Into<String>) -> Self {
        SyntaxError { line, col, expected: expected.into(), found: found.into() }
    }
}
