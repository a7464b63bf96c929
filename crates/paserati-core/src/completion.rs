//! Completion records
//!
//! Control flow is propagated explicitly as tagged completions, never as
//! host-level panics. At runtime, `finally` handlers stash the pending
//! completion before their body runs and `EndFinally` resumes it; in the
//! compiler, the same type tracks what a statement does to control flow
//! when it crosses protected regions.

use crate::value::Value;

/// How a block of code completed.
#[derive(Debug, Clone)]
pub enum Completion {
    /// Fell through normally
    Normal,
    /// `return value`
    Return(Value),
    /// `throw value`
    Throw(Value),
    /// `break`, resolved to an absolute pc in the current chunk
    Break {
        /// Jump target after any intervening finally bodies
        target_pc: usize,
    },
    /// `continue`, resolved to an absolute pc in the current chunk
    Continue {
        /// Jump target after any intervening finally bodies
        target_pc: usize,
    },
}

impl Completion {
    /// Is this an abrupt completion?
    pub fn is_abrupt(&self) -> bool {
        !matches!(self, Self::Normal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abruptness() {
        assert!(!Completion::Normal.is_abrupt());
        assert!(Completion::Return(Value::undefined()).is_abrupt());
        assert!(Completion::Throw(Value::int32(1)).is_abrupt());
        assert!(Completion::Break { target_pc: 3 }.is_abrupt());
    }
}
