//! VM error types

use crate::value::Value;
use thiserror::Error;

/// VM execution errors
#[derive(Debug, Error)]
pub enum VmError {
    /// Type error (calling a non-function, destructuring null, ...)
    #[error("TypeError: {0}")]
    TypeError(String),

    /// Reference error (unresolvable name, TDZ access)
    #[error("ReferenceError: {0}")]
    ReferenceError(String),

    /// Range error (invalid array length, ...)
    #[error("RangeError: {0}")]
    RangeError(String),

    /// Syntax error surfaced at runtime (host-fed source)
    #[error("SyntaxError: {0}")]
    SyntaxError(String),

    /// Internal invariant violation; never observable to script
    #[error("InternalError: {0}")]
    InternalError(String),

    /// Frame stack exceeded its bound; surfaces to script as a
    /// catchable RangeError through the normal unwinding path
    #[error("RangeError: Maximum call stack size exceeded")]
    StackOverflow,

    /// Thrown script value that reached the host uncaught
    #[error("Uncaught exception: {0}")]
    Exception(Box<ThrownValue>),

    /// Malformed chunk
    #[error("Bytecode error: {0}")]
    Bytecode(#[from] paserati_bytecode::BytecodeError),

    /// Execution was interrupted by the host
    #[error("Execution interrupted")]
    Interrupted,
}

/// A thrown script value with its trace
#[derive(Debug)]
pub struct ThrownValue {
    /// The thrown value
    pub value: Value,
    /// A printable rendering of the value
    pub message: String,
    /// Stack trace, innermost frame first
    pub stack: Vec<StackFrame>,
}

impl std::fmt::Display for ThrownValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        for frame in &self.stack {
            write!(
                f,
                "\n    at {} ({}:{}:{})",
                frame.function_name, frame.origin, frame.line, frame.column
            )?;
        }
        Ok(())
    }
}

/// A stack frame in an error trace
#[derive(Debug, Clone)]
pub struct StackFrame {
    /// Function name
    pub function_name: String,
    /// Source origin
    pub origin: String,
    /// Line number
    pub line: u32,
    /// Column number
    pub column: u32,
}

fn render_thrown(value: &Value) -> String {
    if let Some(s) = value.as_string() {
        return s.as_str().to_string();
    }
    // Error-shaped objects print as "Name: message"
    if let Some(obj) = value.as_object() {
        let name = obj
            .get(&crate::object::PropertyKey::string("name"))
            .and_then(|v| v.as_string().map(|s| s.as_str().to_string()));
        let message = obj
            .get(&crate::object::PropertyKey::string("message"))
            .and_then(|v| v.as_string().map(|s| s.as_str().to_string()));
        match (name, message) {
            (Some(name), Some(message)) => return format!("{}: {}", name, message),
            (Some(name), None) => return name,
            _ => {}
        }
    }
    format!("{:?}", value)
}

impl VmError {
    /// Create a type error
    pub fn type_error(msg: impl Into<String>) -> Self {
        Self::TypeError(msg.into())
    }

    /// Create a reference error
    pub fn reference_error(msg: impl Into<String>) -> Self {
        Self::ReferenceError(msg.into())
    }

    /// Create a range error
    pub fn range_error(msg: impl Into<String>) -> Self {
        Self::RangeError(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::InternalError(msg.into())
    }

    /// Wrap a thrown script value
    pub fn exception(value: Value) -> Self {
        Self::Exception(Box::new(ThrownValue {
            message: render_thrown(&value),
            value,
            stack: Vec::new(),
        }))
    }

    /// Wrap a thrown script value with its stack trace
    pub fn exception_with_stack(value: Value, stack: Vec<StackFrame>) -> Self {
        Self::Exception(Box::new(ThrownValue {
            message: render_thrown(&value),
            value,
            stack,
        }))
    }
}

/// Result type for VM operations
pub type VmResult<T> = Result<T, VmError>;
