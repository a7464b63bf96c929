//! Bytecode errors

use thiserror::Error;

/// Errors produced while encoding or decoding programs
#[derive(Debug, Error)]
pub enum BytecodeError {
    /// Serialized data ended early
    #[error("unexpected end of bytecode data")]
    UnexpectedEnd,

    /// Magic bytes did not match
    #[error("invalid bytecode magic")]
    InvalidMagic,

    /// Version tag is not supported
    #[error("unsupported bytecode version: {0}")]
    UnsupportedVersion(u32),

    /// Underlying I/O failure
    #[error("bytecode I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for bytecode operations
pub type Result<T> = std::result::Result<T, BytecodeError>;
