//! Generator values
//!
//! A generator is a detached frame on the heap: when a generator function
//! is called, its parameter prologue runs in an ordinary frame (so
//! argument destructuring throws at the call site), then `CreateGenerator`
//! lifts the frame into a `JsGenerator` and returns the object. `next`,
//! `throw`, and `return` restore the frame into the register stack and
//! run until the next yield or completion.
//!
//! Async function bodies reuse the same machinery: their awaits surface
//! as yields that the async driver interprets.

use parking_lot::Mutex;
use paserati_bytecode::{HandlerKind, Program};
use paserati_gc::object::tags;
use paserati_gc::{GcHeader, GcObject, Tracer};
use std::sync::Arc;

use crate::completion::Completion;
use crate::object::JsObject;
use crate::value::{UpvalueCell, Value};

/// Generator life-cycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    /// Created, body not yet entered
    SuspendedStart,
    /// Paused at a yield (or await)
    SuspendedYield,
    /// Currently executing (reentry is a TypeError)
    Running,
    /// Returned or threw; all further `next` calls are done
    Completed,
}

/// A handler captured with a suspended frame
#[derive(Debug, Clone)]
pub struct SavedHandler {
    /// Catch or finally
    pub kind: HandlerKind,
    /// Absolute handler pc within the chunk
    pub handler_pc: usize,
}

/// The detached frame of a suspended generator
#[derive(Debug)]
pub struct GeneratorFrame {
    /// Resumption pc
    pub pc: usize,
    /// Local slots
    pub locals: Vec<Value>,
    /// Register window snapshot
    pub registers: Vec<Value>,
    /// Handlers that were live in this frame
    pub handlers: Vec<SavedHandler>,
    /// Pending finally completions in flight
    pub pending_completions: Vec<Completion>,
    /// Register receiving the next sent value
    pub yield_dst: Option<u16>,
}

/// A generator object
pub struct JsGenerator {
    header: GcHeader,
    /// Body chunk index
    pub chunk_index: u32,
    /// Owning program
    pub program: Arc<Program>,
    /// Captured upvalues
    pub upvalues: Vec<UpvalueCell>,
    /// Captured `this`
    pub this_value: Value,
    /// True for async function drivers
    pub is_async: bool,
    /// Property object (iterator protocol view hangs off this)
    pub object: Arc<JsObject>,
    state: Mutex<GeneratorState>,
    frame: Mutex<Option<GeneratorFrame>>,
}

/// How a suspended generator is being resumed
#[derive(Debug)]
pub enum ResumeMode {
    /// `next(value)`: the value lands in the yield's destination register
    Next(Value),
    /// `throw(value)`: a synthetic throw at the suspension point
    Throw(Value),
    /// `return(value)`: run finally blocks, then complete
    Return(Value),
}

impl JsGenerator {
    /// Create a generator whose prologue already ran; `frame` resumes
    /// just past `CreateGenerator`.
    pub fn new(
        chunk_index: u32,
        program: Arc<Program>,
        upvalues: Vec<UpvalueCell>,
        this_value: Value,
        is_async: bool,
        frame: GeneratorFrame,
    ) -> Arc<Self> {
        Arc::new(Self {
            header: GcHeader::new(tags::GENERATOR),
            chunk_index,
            program,
            upvalues,
            this_value,
            is_async,
            object: Arc::new(JsObject::new(Value::null())),
            state: Mutex::new(GeneratorState::SuspendedStart),
            frame: Mutex::new(Some(frame)),
        })
    }

    /// Current state
    pub fn state(&self) -> GeneratorState {
        *self.state.lock()
    }

    /// Transition to Running
    pub fn set_running(&self) {
        *self.state.lock() = GeneratorState::Running;
    }

    /// Park the frame and suspend at a yield
    pub fn suspend(&self, frame: GeneratorFrame) {
        *self.frame.lock() = Some(frame);
        *self.state.lock() = GeneratorState::SuspendedYield;
    }

    /// Transition to Completed and drop any saved frame
    pub fn complete(&self) {
        *self.state.lock() = GeneratorState::Completed;
        *self.frame.lock() = None;
    }

    /// Take the saved frame for resumption
    pub fn take_frame(&self) -> Option<GeneratorFrame> {
        self.frame.lock().take()
    }

    /// The body chunk
    pub fn chunk(&self) -> &paserati_bytecode::Chunk {
        &self.program.chunks[self.chunk_index as usize]
    }
}

impl std::fmt::Debug for JsGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generator")
            .field("chunk_index", &self.chunk_index)
            .field("state", &*self.state.lock())
            .field("is_async", &self.is_async)
            .finish()
    }
}

impl GcObject for JsGenerator {
    fn header(&self) -> &GcHeader {
        &self.header
    }

    fn trace(&self, tracer: &mut Tracer) {
        self.this_value.trace(tracer);
        tracer.mark(self.object.as_ref());
        for upvalue in &self.upvalues {
            upvalue.get().trace(tracer);
        }
        if let Some(frame) = &*self.frame.lock() {
            for v in frame.locals.iter().chain(frame.registers.iter()) {
                v.trace(tracer);
            }
            for completion in &frame.pending_completions {
                match completion {
                    Completion::Return(v) | Completion::Throw(v) => v.trace(tracer),
                    _ => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_frame() -> GeneratorFrame {
        GeneratorFrame {
            pc: 0,
            locals: Vec::new(),
            registers: Vec::new(),
            handlers: Vec::new(),
            pending_completions: Vec::new(),
            yield_dst: None,
        }
    }

    fn empty_program() -> Arc<Program> {
        Arc::new(Program::builder("test").build())
    }

    #[test]
    fn test_state_transitions() {
        let generator = JsGenerator::new(
            0,
            empty_program(),
            vec![],
            Value::undefined(),
            false,
            empty_frame(),
        );
        assert_eq!(generator.state(), GeneratorState::SuspendedStart);

        generator.set_running();
        assert_eq!(generator.state(), GeneratorState::Running);

        let mut frame = empty_frame();
        frame.pc = 10;
        generator.suspend(frame);
        assert_eq!(generator.state(), GeneratorState::SuspendedYield);
        assert_eq!(generator.take_frame().unwrap().pc, 10);

        generator.complete();
        assert_eq!(generator.state(), GeneratorState::Completed);
        assert!(generator.take_frame().is_none());
    }
}
