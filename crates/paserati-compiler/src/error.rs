//! Compile errors

use thiserror::Error;

/// Which stage of the front end reported the error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileErrorKind {
    /// Malformed input AST (the parser's responsibility, but validated
    /// defensively here)
    Parse,
    /// Type-level error carried through from the checker
    Type,
    /// Lowering error (TDZ violation, bad assignment target, private
    /// name outside its class, ...)
    Compile,
}

/// A compile-time error with its source position
#[derive(Debug, Error)]
#[error("{kind:?} error at {origin}:{line}:{column}: {message}")]
pub struct CompileError {
    /// Error category
    pub kind: CompileErrorKind,
    /// Human-readable description
    pub message: String,
    /// Source origin
    pub origin: String,
    /// Line (1-indexed)
    pub line: u32,
    /// Column (1-indexed)
    pub column: u32,
}

impl CompileError {
    /// Create a lowering error
    pub fn compile(message: impl Into<String>, origin: &str, line: u32, column: u32) -> Self {
        Self {
            kind: CompileErrorKind::Compile,
            message: message.into(),
            origin: origin.to_string(),
            line,
            column,
        }
    }
}

/// Result type for compilation
pub type CompileResult<T> = Result<T, CompileError>;
