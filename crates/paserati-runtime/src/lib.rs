//! # Paserati VM Runtime
//!
//! The host-facing shell around the execution core: the microtask queue
//! drain discipline, a timer-backed event loop, and the [`Paserati`]
//! embedder handle (compile, interpret, call, register natives).

#![warn(clippy::all)]

pub mod event_loop;
pub mod microtask;
pub mod runtime;

pub use event_loop::{EventLoop, TimerId};
pub use microtask::MicrotaskQueue;
pub use runtime::{Paserati, RuntimeError};

// Re-exports for embedders
pub use paserati_compiler::ast;
pub use paserati_compiler::{CompileError, Compiler};
pub use paserati_core::{
    Interpreter, JsObject, JsPromise, JsString, NativeContext, PropertyKey, Value, VmContext,
    VmError,
};
