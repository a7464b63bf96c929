//! The embedder API
//!
//! [`Paserati`] owns one VM: a context, the interpreter, and an event
//! loop. The host compiles typed ASTs to programs, interprets them,
//! calls script functions reentrantly, and registers native functions
//! the script can call back into.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use paserati_bytecode::Program;
use paserati_compiler::ast;
use paserati_compiler::{CompileError, Compiler};
use paserati_core::promise::PromiseState;
use paserati_core::{
    Interpreter, JsObject, JsPromise, Outcome, PropertyKey, Value, VmContext, VmError,
};

use crate::event_loop::{EventLoop, TimerId};
use crate::microtask::MicrotaskQueue;

/// Errors surfaced to the host
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Compilation failed; never reaches runtime
    #[error(transparent)]
    Compile(#[from] CompileError),
    /// Runtime failure, including uncaught script throws (printable with
    /// message and stack)
    #[error(transparent)]
    Vm(#[from] VmError),
}

/// An embedded VM instance
pub struct Paserati {
    ctx: VmContext,
    interpreter: Interpreter,
    event_loop: EventLoop,
}

impl Paserati {
    /// Create a VM with an empty global object
    pub fn new() -> Self {
        Self {
            ctx: VmContext::new(),
            interpreter: Interpreter::new(),
            event_loop: EventLoop::new(),
        }
    }

    /// Compile a typed AST into a program
    pub fn compile(
        &self,
        program: &ast::Program,
        origin: &str,
    ) -> Result<Arc<Program>, RuntimeError> {
        let compiled = Compiler::new(origin).compile(program)?;
        Ok(Arc::new(compiled))
    }

    /// Execute a program to completion.
    ///
    /// Microtasks are drained when the turn completes. A top-level await
    /// drains microtasks (and fires due timers) until the awaited promise
    /// settles; if the queue runs dry while it is still pending, the
    /// script's result is the unsettled promise itself.
    pub fn interpret(&mut self, program: Arc<Program>) -> Result<Value, RuntimeError> {
        let outcome = self.interpreter.execute(&mut self.ctx, program)?;
        match outcome {
            Outcome::Complete(value) => {
                self.interpreter.drain_jobs(&mut self.ctx)?;
                Ok(value)
            }
            Outcome::Pending(promise) => {
                self.pump_until_settled(&promise)?;
                match promise.state() {
                    PromiseState::Fulfilled(value) => Ok(value),
                    PromiseState::Rejected(reason) => {
                        Err(RuntimeError::Vm(VmError::exception(reason)))
                    }
                    PromiseState::Pending => Ok(Value::promise(promise)),
                }
            }
        }
    }

    fn pump_until_settled(&mut self, promise: &Arc<JsPromise>) -> Result<(), RuntimeError> {
        loop {
            self.interpreter.drain_jobs(&mut self.ctx)?;
            if !promise.is_pending() {
                return Ok(());
            }
            if !self.ctx.jobs().is_empty() {
                continue;
            }
            let Some(deadline) = self.event_loop.next_deadline() else {
                // Starved: nothing left that could settle it
                return Ok(());
            };
            self.event_loop.sleep_until(deadline);
            self.fire_due_timers()?;
        }
    }

    fn fire_due_timers(&mut self) -> Result<(), RuntimeError> {
        for callback in self.event_loop.take_due(Instant::now()) {
            callback(&self.interpreter, &mut self.ctx)?;
        }
        Ok(())
    }

    /// Call a script (or native) function reentrantly. The microtask
    /// queue drains when the turn completes.
    pub fn call(
        &mut self,
        func: &Value,
        this: Value,
        args: &[Value],
    ) -> Result<Value, RuntimeError> {
        let result = self
            .interpreter
            .call_function(&mut self.ctx, func, this, args)?;
        self.interpreter.drain_jobs(&mut self.ctx)?;
        Ok(result)
    }

    /// Run the event loop until every job and timer is spent
    pub fn run_event_loop(&mut self) -> Result<(), RuntimeError> {
        loop {
            self.interpreter.drain_jobs(&mut self.ctx)?;
            if !self.ctx.jobs().is_empty() {
                continue;
            }
            let Some(deadline) = self.event_loop.next_deadline() else {
                return Ok(());
            };
            self.event_loop.sleep_until(deadline);
            self.fire_due_timers()?;
        }
    }

    /// Register a native function as a global
    pub fn register_native<F>(&mut self, name: &str, arity: u8, f: F)
    where
        F: Fn(
                &Value,
                &[Value],
                &mut paserati_core::NativeContext<'_>,
            ) -> Result<Value, VmError>
            + Send
            + Sync
            + 'static,
    {
        let func = Value::native_function(name, arity, f);
        self.ctx.set_global(name, func);
    }

    /// Create (or fetch) a global namespace object, for grouping natives
    /// the way hosts install `Math` or `JSON`
    pub fn register_namespace(&mut self, name: &str) -> Arc<JsObject> {
        if let Some(existing) = self
            .ctx
            .get_global(name)
            .and_then(|v| v.as_object())
        {
            return existing;
        }
        let namespace = Arc::new(JsObject::new(Value::null()));
        self.ctx
            .set_global(name, Value::object(namespace.clone()));
        namespace
    }

    /// Register a named constructor with a prototype object, returning
    /// the prototype for method attachment. The VM picks these up for
    /// object defaults (`Object`, `Array`) and thrown errors
    /// (`TypeError`, ...).
    pub fn register_constructor(&mut self, name: &str) -> Arc<JsObject> {
        let prototype = Arc::new(JsObject::new(Value::null()));
        let ctor = Value::native_function(name, 0, |_, args, _| {
            Ok(args.first().cloned().unwrap_or_else(Value::undefined))
        });
        if let Some(ctor_obj) = ctor.as_object() {
            ctor_obj.set(
                PropertyKey::string("prototype"),
                Value::object(prototype.clone()),
            );
        }
        self.ctx.set_global(name, ctor);
        prototype
    }

    /// Set a global binding
    pub fn set_global(&mut self, name: &str, value: Value) {
        self.ctx.set_global(name, value);
    }

    /// Read a global binding
    pub fn get_global(&self, name: &str) -> Option<Value> {
        self.ctx.get_global(name)
    }

    /// The global object
    pub fn global(&self) -> &Arc<JsObject> {
        self.ctx.global()
    }

    /// The microtask queue handle
    pub fn microtasks(&self) -> MicrotaskQueue {
        MicrotaskQueue::new(self.ctx.jobs().clone())
    }

    /// Schedule a host timer that calls a script function
    pub fn set_timeout(&mut self, delay: Duration, func: Value) -> TimerId {
        self.event_loop.set_timeout(delay, move |interpreter, ctx| {
            interpreter
                .call_function(ctx, &func, Value::undefined(), &[])
                .map(|_| ())
        })
    }

    /// Cancel a scheduled timer
    pub fn clear_timeout(&mut self, id: TimerId) {
        self.event_loop.clear_timeout(id);
    }

    /// Drain pending microtasks without running a script
    pub fn drain_microtasks(&mut self) -> Result<(), RuntimeError> {
        self.interpreter.drain_jobs(&mut self.ctx)?;
        Ok(())
    }

    /// Direct access to the context (advanced embedding)
    pub fn context_mut(&mut self) -> &mut VmContext {
        &mut self.ctx
    }

    /// Direct access to the interpreter (advanced embedding)
    pub fn interpreter(&self) -> &Interpreter {
        &self.interpreter
    }
}

impl Default for Paserati {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_native_and_call() {
        let mut vm = Paserati::new();
        vm.register_native("double", 1, |_, args, _| {
            let n = args
                .first()
                .and_then(|v| v.as_number())
                .unwrap_or(f64::NAN);
            Ok(Value::number(n * 2.0))
        });

        let func = vm.get_global("double").unwrap();
        let result = vm.call(&func, Value::undefined(), &[Value::int32(21)]).unwrap();
        assert_eq!(result.as_int32(), Some(42));
    }

    #[test]
    fn test_native_reentry() {
        let mut vm = Paserati::new();
        // A native that calls whatever function it's given — the reentry
        // path every array callback builtin depends on
        vm.register_native("invoke", 1, |_, args, ncx| {
            let callback = args.first().cloned().unwrap_or_else(Value::undefined);
            ncx.call_function(&callback, Value::undefined(), &[Value::int32(7)])
        });

        let invoke = vm.get_global("invoke").unwrap();
        let add_one = Value::native_function("addOne", 1, |_, args, _| {
            let n = args.first().and_then(|v| v.as_int32()).unwrap_or(0);
            Ok(Value::int32(n + 1))
        });
        let result = vm.call(&invoke, Value::undefined(), &[add_one]).unwrap();
        assert_eq!(result.as_int32(), Some(8));
    }
}
