//! Bytecode interpreter
//!
//! A single dispatch loop consumes the current frame's pc. Calls push new
//! frames, tail calls replace the current frame, throws walk the handler
//! stack across frames, and generator/async chunks detach their frames to
//! the heap at `CreateGenerator` and are re-entered through the same loop.

use std::sync::Arc;

use paserati_bytecode::{HandlerKind, Instruction, Program};

use crate::completion::Completion;
use crate::context::{FramePlan, NativeContext, VmContext, VmJob};
use crate::convert;
use crate::error::{VmError, VmResult};
use crate::generator::{GeneratorFrame, GeneratorState, JsGenerator, ResumeMode, SavedHandler};
use crate::ic::IcAction;
use crate::object::{JsObject, PropertyAttributes, PropertyKey, PropertySlot};
use crate::promise::{JsPromise, PromiseState};
use crate::proxy::JsProxy;
use crate::symbol::well_known;
use crate::value::Value;

/// How often the loop polls the interrupt flag and the GC threshold
const SAFEPOINT_INTERVAL: u64 = 4096;

/// Recursion bound for abstract equality through ToPrimitive chains
const MAX_ABSTRACT_EQUAL_DEPTH: usize = 64;

/// Result of executing a whole program
#[derive(Debug)]
pub enum Outcome {
    /// Ran to completion with a value
    Complete(Value),
    /// Top-level await left the script parked on an unsettled promise
    Pending(Arc<JsPromise>),
}

/// Result of resuming a generator
#[derive(Debug)]
pub enum GeneratorResult {
    /// Paused at a yield with this value
    Yielded(Value),
    /// Paused at an await on this value (async drivers only)
    Awaited(Value),
    /// Completed with this value
    Returned(Value),
}

/// Conversion hint for ToPrimitive
#[derive(Copy, Clone, Debug)]
pub enum PreferredType {
    /// No preference
    Default,
    /// Number-flavored (comparisons, arithmetic)
    Number,
    /// String-flavored (template interpolation, property keys)
    String,
}

/// Identifies an inline-cache site
#[derive(Clone)]
pub struct Site {
    /// Owning program
    pub program: Arc<Program>,
    /// Owning chunk
    pub chunk: u32,
    /// IC slot index
    pub ic: u16,
}

/// How the run loop exited back to its caller
enum LoopExit {
    Returned(Value),
    Yielded(Value),
    Awaited(Value),
}

/// What one instruction asks the loop to do next
enum Step {
    Continue,
    Jump(i32),
    Return(Value),
    Throw(Value),
    PushFrame(FramePlan),
    ReplaceFrame(FramePlan),
    MakeGenerator,
    Yield { value: Value, dst: u16 },
    Await { value: Value, dst: u16 },
}

#[derive(Clone, Copy)]
enum IndexedKind {
    Array,
    String,
}

/// The bytecode interpreter
pub struct Interpreter;

impl Interpreter {
    /// Create a new interpreter
    pub fn new() -> Self {
        Self
    }

    /// Execute a program's entry chunk. A top-level-await entry (compiled
    /// as an async chunk) reports `Pending` when its promise has not
    /// settled by the time the frame stack unwinds; the host then drains
    /// jobs until it settles.
    pub fn execute(&self, ctx: &mut VmContext, program: Arc<Program>) -> VmResult<Outcome> {
        let entry = program.entry;
        let is_async = program.entry_chunk().map(|c| c.is_async()).unwrap_or(false);
        let base = ctx.stack_depth();
        ctx.push_frame(FramePlan {
            chunk_index: entry,
            program,
            return_register: None,
            is_construct: false,
            this_value: Value::object(ctx.global().clone()),
            upvalues: Vec::new(),
            args: Vec::new(),
        })?;

        match self.run(ctx, base, None)? {
            LoopExit::Returned(value) => {
                if is_async {
                    if let Some(promise) = value.as_promise().cloned() {
                        return match promise.state() {
                            PromiseState::Fulfilled(v) => Ok(Outcome::Complete(v)),
                            PromiseState::Rejected(reason) => Err(self.to_exception(ctx, reason)),
                            PromiseState::Pending => Ok(Outcome::Pending(promise)),
                        };
                    }
                }
                Ok(Outcome::Complete(value))
            }
            _ => Err(VmError::internal("top-level suspended outside async entry")),
        }
    }

    /// Call a function value reentrantly (host `Call`, native reentry,
    /// promise reactions). Runs nested frames to completion.
    pub fn call_function(
        &self,
        ctx: &mut VmContext,
        func: &Value,
        this: Value,
        args: &[Value],
    ) -> VmResult<Value> {
        let mut callee = func.clone();
        let mut this = this;
        let mut args = args.to_vec();

        while let Some(bound) = callee.as_bound_function().cloned() {
            let mut combined = bound.bound_args.clone();
            combined.extend(args);
            args = combined;
            this = bound.bound_this.clone();
            callee = bound.target.clone();
        }

        if let Some(native) = callee.as_native_function() {
            let func = native.func.clone();
            let _boundary = ctx.enter_native();
            let mut ncx = NativeContext {
                interpreter: self,
                ctx,
            };
            return func(&this, &args, &mut ncx);
        }

        if let Some(proxy) = callee.as_proxy().cloned() {
            if proxy.is_revoked() {
                return Err(VmError::type_error(
                    "Cannot perform 'apply' on a revoked proxy",
                ));
            }
            if let Some(trap) = proxy.get_trap("apply") {
                let args_array = self.new_array_from(ctx, args);
                let handler = proxy.handler().unwrap_or_else(Value::undefined);
                return self.call_function(
                    ctx,
                    &trap,
                    handler,
                    &[proxy.target_raw().clone(), this, args_array],
                );
            }
            let target = proxy.target_raw().clone();
            return self.call_function(ctx, &target, this, &args);
        }

        if let Some(closure) = callee.as_closure().cloned() {
            let chunk = closure.chunk();
            let this_value = if chunk.is_arrow() {
                closure
                    .captured_this
                    .clone()
                    .unwrap_or_else(Value::undefined)
            } else {
                this
            };
            let base = ctx.stack_depth();
            let plan = FramePlan {
                chunk_index: closure.chunk_index,
                program: closure.program.clone(),
                return_register: None,
                is_construct: false,
                this_value,
                upvalues: closure.upvalues.clone(),
                args,
            };
            if let Err(e) = ctx.push_frame(plan) {
                let value = self.overflow_to_throw_value(ctx, e)?;
                return Err(self.to_exception(ctx, value));
            }
            return match self.run(ctx, base, None)? {
                LoopExit::Returned(v) => Ok(v),
                _ => Err(VmError::internal("call suspended outside generator")),
            };
        }

        Err(VmError::type_error(format!(
            "{} is not a function",
            convert::to_display_string(&callee)
        )))
    }

    /// Resume (or start) a generator. Also drives async function bodies,
    /// whose awaits surface as [`GeneratorResult::Awaited`].
    pub fn execute_generator(
        &self,
        ctx: &mut VmContext,
        gen: &Arc<JsGenerator>,
        mode: ResumeMode,
    ) -> VmResult<GeneratorResult> {
        match gen.state() {
            GeneratorState::Running => Err(VmError::type_error("Generator is already running")),
            GeneratorState::Completed => match mode {
                ResumeMode::Next(_) => Ok(GeneratorResult::Returned(Value::undefined())),
                ResumeMode::Return(v) => Ok(GeneratorResult::Returned(v)),
                ResumeMode::Throw(v) => Err(self.to_exception(ctx, v)),
            },
            GeneratorState::SuspendedStart => match mode {
                ResumeMode::Throw(v) => {
                    gen.complete();
                    Err(self.to_exception(ctx, v))
                }
                ResumeMode::Return(v) => {
                    gen.complete();
                    Ok(GeneratorResult::Returned(v))
                }
                next @ ResumeMode::Next(_) => self.resume_generator(ctx, gen, next),
            },
            GeneratorState::SuspendedYield => self.resume_generator(ctx, gen, mode),
        }
    }

    fn resume_generator(
        &self,
        ctx: &mut VmContext,
        gen: &Arc<JsGenerator>,
        mode: ResumeMode,
    ) -> VmResult<GeneratorResult> {
        let frame = gen
            .take_frame()
            .ok_or_else(|| VmError::internal("generator has no saved frame"))?;
        let yield_dst = frame.yield_dst;
        gen.set_running();

        let base = ctx.stack_depth();
        if let Err(e) = self.restore_generator_frame(ctx, gen, frame) {
            gen.complete();
            return Err(e);
        }

        match mode {
            ResumeMode::Next(v) => {
                if let Some(dst) = yield_dst {
                    ctx.set_register(dst, v);
                }
            }
            ResumeMode::Throw(v) => {
                if let Err(e) = self.unwind_throw(ctx, v, base) {
                    gen.complete();
                    return Err(e);
                }
            }
            ResumeMode::Return(v) => {
                if let Some(handler) = ctx.take_finally_in_current_frame() {
                    if let Some(frame) = ctx.current_frame_mut() {
                        frame.pending_completions.push(Completion::Return(v));
                        frame.pc = handler.handler_pc;
                    }
                } else {
                    ctx.pop_frame();
                    gen.complete();
                    return Ok(GeneratorResult::Returned(v));
                }
            }
        }

        match self.run(ctx, base, Some(gen)) {
            Ok(LoopExit::Returned(v)) => {
                gen.complete();
                Ok(GeneratorResult::Returned(v))
            }
            Ok(LoopExit::Yielded(v)) => Ok(GeneratorResult::Yielded(v)),
            Ok(LoopExit::Awaited(v)) => Ok(GeneratorResult::Awaited(v)),
            Err(e) => {
                gen.complete();
                Err(e)
            }
        }
    }

    fn restore_generator_frame(
        &self,
        ctx: &mut VmContext,
        gen: &Arc<JsGenerator>,
        frame: GeneratorFrame,
    ) -> VmResult<()> {
        ctx.push_frame(FramePlan {
            chunk_index: gen.chunk_index,
            program: gen.program.clone(),
            return_register: None,
            is_construct: false,
            this_value: gen.this_value.clone(),
            upvalues: gen.upvalues.clone(),
            args: Vec::new(),
        })?;

        for (i, v) in frame.registers.iter().enumerate() {
            ctx.set_register(i as u16, v.clone());
        }
        for handler in &frame.handlers {
            ctx.push_handler(handler.kind, handler.handler_pc);
        }
        if let Some(active) = ctx.current_frame_mut() {
            active.locals = frame.locals;
            active.pc = frame.pc;
            active.pending_completions = frame.pending_completions;
        }
        Ok(())
    }

    fn capture_generator_frame(
        &self,
        ctx: &mut VmContext,
        resume_pc: usize,
        yield_dst: Option<u16>,
    ) -> VmResult<GeneratorFrame> {
        let handlers: Vec<SavedHandler> = ctx
            .handlers_for_current_frame()
            .into_iter()
            .map(|h| SavedHandler {
                kind: h.kind,
                handler_pc: h.handler_pc,
            })
            .collect();
        ctx.drop_handlers_for_current_frame();

        let (window, locals, pending) = {
            let frame = ctx
                .current_frame_mut()
                .ok_or_else(|| VmError::internal("no frame to capture"))?;
            (
                frame.window,
                frame.locals.clone(),
                std::mem::take(&mut frame.pending_completions),
            )
        };
        let mut registers = Vec::with_capacity(window);
        for i in 0..window {
            registers.push(ctx.get_register(i as u16).clone());
        }

        Ok(GeneratorFrame {
            pc: resume_pc,
            locals,
            registers,
            handlers,
            pending_completions: pending,
            yield_dst,
        })
    }

    /// Pump an async function body: run until it awaits a pending promise
    /// (then park a resume job on it) or completes (then settle its
    /// result promise). Exceptions become rejections.
    pub fn drive_async(
        &self,
        ctx: &mut VmContext,
        gen: Arc<JsGenerator>,
        result_promise: Arc<JsPromise>,
        mode: ResumeMode,
    ) -> VmResult<()> {
        let mut mode = mode;
        loop {
            let step = match self.execute_generator(ctx, &gen, mode) {
                Ok(step) => step,
                Err(VmError::Exception(thrown)) => {
                    result_promise.reject(thrown.value);
                    return Ok(());
                }
                Err(other) => return Err(other),
            };
            match step {
                GeneratorResult::Returned(v) => {
                    result_promise.resolve(v);
                    return Ok(());
                }
                GeneratorResult::Yielded(_) => {
                    return Err(VmError::internal("yield in async function body"));
                }
                GeneratorResult::Awaited(awaited) => {
                    let promise = match awaited.as_promise().cloned() {
                        Some(p) => p,
                        None => {
                            // Awaiting a plain value continues with it
                            mode = ResumeMode::Next(awaited);
                            continue;
                        }
                    };
                    match promise.state() {
                        PromiseState::Fulfilled(v) => mode = ResumeMode::Next(v),
                        PromiseState::Rejected(reason) => mode = ResumeMode::Throw(reason),
                        PromiseState::Pending => {
                            let jobs = ctx.jobs().clone();
                            let gen = gen.clone();
                            let result_promise = result_promise.clone();
                            promise.on_settled(Box::new(move |input| {
                                jobs.enqueue(VmJob::DriveAsync {
                                    generator: gen,
                                    result_promise,
                                    input,
                                });
                            }));
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// Drain the job queue (FIFO). Jobs enqueued while draining run in
    /// the same cycle.
    pub fn drain_jobs(&self, ctx: &mut VmContext) -> VmResult<()> {
        while let Some(job) = ctx.jobs().pop() {
            match job {
                VmJob::DriveAsync {
                    generator,
                    result_promise,
                    input,
                } => {
                    let mode = match input {
                        Ok(v) => ResumeMode::Next(v),
                        Err(e) => ResumeMode::Throw(e),
                    };
                    self.drive_async(ctx, generator, result_promise, mode)?;
                }
                VmJob::Call {
                    func,
                    this,
                    args,
                    target,
                } => {
                    let result = self.call_function(ctx, &func, this, &args);
                    match (result, target) {
                        (Ok(v), Some(promise)) => promise.resolve(v),
                        (Err(VmError::Exception(thrown)), Some(promise)) => {
                            promise.reject(thrown.value)
                        }
                        (Err(e), _) => return Err(e),
                        (Ok(_), None) => {}
                    }
                }
                VmJob::Native(f) => f(self, ctx)?,
            }
        }
        Ok(())
    }

    // ================================================================
    // The dispatch loop
    // ================================================================

    fn run(
        &self,
        ctx: &mut VmContext,
        base_depth: usize,
        gen: Option<&Arc<JsGenerator>>,
    ) -> VmResult<LoopExit> {
        let mut cached_program: Option<Arc<Program>> = None;
        let mut cached_frame_id: usize = usize::MAX;
        let mut instruction_count: u64 = 0;

        loop {
            instruction_count += 1;
            if instruction_count % SAFEPOINT_INTERVAL == 0 {
                if ctx.is_interrupted() {
                    return Err(VmError::Interrupted);
                }
                ctx.maybe_collect_garbage();
            }

            let (pc, chunk_index, frame_id) = {
                let frame = ctx
                    .current_frame()
                    .ok_or_else(|| VmError::internal("no frame"))?;
                (frame.pc, frame.chunk_index, frame.frame_id)
            };

            if frame_id != cached_frame_id {
                let frame = ctx
                    .current_frame()
                    .ok_or_else(|| VmError::internal("no frame"))?;
                cached_program = Some(Arc::clone(&frame.program));
                cached_frame_id = frame_id;
            }
            let program = cached_program
                .as_ref()
                .ok_or_else(|| VmError::internal("no cached program"))?
                .clone();
            let chunk = program
                .chunk(chunk_index)
                .ok_or_else(|| VmError::internal("chunk not found"))?;

            // Falling off the end of a chunk returns undefined
            let step = if pc >= chunk.instructions.len() {
                Step::Return(Value::undefined())
            } else {
                match self.execute_instruction(ctx, &program, &chunk.instructions[pc]) {
                    Ok(step) => step,
                    Err(err) => match self.error_to_throw(ctx, err) {
                        Ok(value) => Step::Throw(value),
                        Err(fatal) => return Err(fatal),
                    },
                }
            };

            match step {
                Step::Continue => ctx.advance_pc(),
                Step::Jump(offset) => ctx.jump(offset),
                Step::Return(value) => {
                    if let Some(exit) = self.handle_return(ctx, value, base_depth)? {
                        return Ok(exit);
                    }
                    cached_frame_id = usize::MAX;
                }
                Step::Throw(value) => {
                    self.unwind_throw(ctx, value, base_depth)?;
                    cached_frame_id = usize::MAX;
                }
                Step::PushFrame(plan) => {
                    ctx.advance_pc();
                    if let Err(e) = ctx.push_frame(plan) {
                        let thrown = self.overflow_to_throw_value(ctx, e)?;
                        self.unwind_throw(ctx, thrown, base_depth)?;
                    }
                    cached_frame_id = usize::MAX;
                }
                Step::ReplaceFrame(plan) => {
                    ctx.pop_frame();
                    if let Err(e) = ctx.push_frame(plan) {
                        let thrown = self.overflow_to_throw_value(ctx, e)?;
                        self.unwind_throw(ctx, thrown, base_depth)?;
                    }
                    cached_frame_id = usize::MAX;
                }
                Step::MakeGenerator => {
                    let (gen_chunk, gen_program, upvalues, this_value, is_async) = {
                        let frame = ctx
                            .current_frame()
                            .ok_or_else(|| VmError::internal("no frame"))?;
                        (
                            frame.chunk_index,
                            frame.program.clone(),
                            frame.upvalues.clone(),
                            frame.this_value.clone(),
                            chunk.is_async(),
                        )
                    };
                    let gframe = self.capture_generator_frame(ctx, pc + 1, None)?;
                    let generator = JsGenerator::new(
                        gen_chunk, gen_program, upvalues, this_value, is_async, gframe,
                    );

                    if is_async {
                        let promise = JsPromise::new();
                        let exit = self.finish_return(
                            ctx,
                            Value::promise(promise.clone()),
                            base_depth,
                        )?;
                        // The body runs synchronously until its first
                        // await, before the caller resumes.
                        self.drive_async(
                            ctx,
                            generator,
                            promise,
                            ResumeMode::Next(Value::undefined()),
                        )?;
                        if let Some(exit) = exit {
                            return Ok(exit);
                        }
                    } else if let Some(exit) =
                        self.finish_return(ctx, Value::generator(generator), base_depth)?
                    {
                        return Ok(exit);
                    }
                    cached_frame_id = usize::MAX;
                }
                Step::Yield { value, dst } => {
                    let g = gen.ok_or_else(|| VmError::internal("yield outside generator"))?;
                    let gframe = self.capture_generator_frame(ctx, pc + 1, Some(dst))?;
                    ctx.pop_frame();
                    g.suspend(gframe);
                    return Ok(LoopExit::Yielded(value));
                }
                Step::Await { value, dst } => {
                    let g = gen.ok_or_else(|| VmError::internal("await outside async body"))?;
                    if let Some(promise) = value.as_promise().cloned() {
                        match promise.state() {
                            PromiseState::Fulfilled(v) => {
                                // Settled awaits continue inline
                                ctx.set_register(dst, v);
                                ctx.advance_pc();
                            }
                            PromiseState::Rejected(reason) => {
                                self.unwind_throw(ctx, reason, base_depth)?;
                                cached_frame_id = usize::MAX;
                            }
                            PromiseState::Pending => {
                                let gframe =
                                    self.capture_generator_frame(ctx, pc + 1, Some(dst))?;
                                ctx.pop_frame();
                                g.suspend(gframe);
                                return Ok(LoopExit::Awaited(value));
                            }
                        }
                    } else {
                        // Awaiting a plain value continues with it
                        ctx.set_register(dst, value);
                        ctx.advance_pc();
                    }
                }
            }
        }
    }

    /// Return-path logic: a finally handler in the returning frame
    /// intercepts the completion; otherwise the frame pops and the value
    /// lands in the caller. `Some(exit)` means the loop's base frame
    /// finished.
    fn handle_return(
        &self,
        ctx: &mut VmContext,
        value: Value,
        base_depth: usize,
    ) -> VmResult<Option<LoopExit>> {
        if let Some(handler) = ctx.take_finally_in_current_frame() {
            if let Some(frame) = ctx.current_frame_mut() {
                frame.pending_completions.push(Completion::Return(value));
                frame.pc = handler.handler_pc;
            }
            return Ok(None);
        }
        self.finish_return(ctx, value, base_depth)
    }

    /// Pop the current frame and deliver `value` to the caller (or exit
    /// the loop when the base frame finished).
    fn finish_return(
        &self,
        ctx: &mut VmContext,
        value: Value,
        base_depth: usize,
    ) -> VmResult<Option<LoopExit>> {
        let frame = ctx
            .pop_frame()
            .ok_or_else(|| VmError::internal("return without frame"))?;

        let value = if frame.is_construct && !value.is_object() {
            frame.this_value.clone()
        } else {
            value
        };

        if ctx.stack_depth() <= base_depth {
            return Ok(Some(LoopExit::Returned(value)));
        }
        if let Some(reg) = frame.return_register {
            ctx.set_register(reg, value);
        }
        Ok(None)
    }

    /// Throw-path logic: find the innermost handler above `base_depth`,
    /// unwind frames to it, and either enter the catch or stash the
    /// completion for the finally. With no handler in range, unwind to
    /// base and surface the exception to the caller.
    fn unwind_throw(&self, ctx: &mut VmContext, value: Value, base_depth: usize) -> VmResult<()> {
        let stack = ctx.stack_trace();
        match ctx.take_nearest_handler() {
            Some(handler) if handler.frame_depth > base_depth => {
                while ctx.stack_depth() > handler.frame_depth {
                    ctx.pop_frame();
                }
                match handler.kind {
                    HandlerKind::Catch => {
                        ctx.set_exception(value);
                        ctx.set_pc(handler.handler_pc);
                    }
                    HandlerKind::Finally => {
                        if let Some(frame) = ctx.current_frame_mut() {
                            frame.pending_completions.push(Completion::Throw(value));
                            frame.pc = handler.handler_pc;
                        }
                    }
                }
                Ok(())
            }
            other => {
                if let Some(outer) = other {
                    // Belongs to a caller's loop segment; leave it installed
                    ctx.push_handler(outer.kind, outer.handler_pc);
                }
                while ctx.stack_depth() > base_depth {
                    ctx.pop_frame();
                }
                Err(VmError::exception_with_stack(value, stack))
            }
        }
    }

    /// Convert recoverable errors into throwable error objects; fatal
    /// errors (internal invariants) pass through.
    fn error_to_throw(&self, ctx: &mut VmContext, err: VmError) -> Result<Value, VmError> {
        match err {
            VmError::Exception(thrown) => Ok(thrown.value),
            VmError::TypeError(m) => Ok(self.make_error(ctx, "TypeError", &m)),
            VmError::ReferenceError(m) => Ok(self.make_error(ctx, "ReferenceError", &m)),
            VmError::RangeError(m) => Ok(self.make_error(ctx, "RangeError", &m)),
            VmError::SyntaxError(m) => Ok(self.make_error(ctx, "SyntaxError", &m)),
            VmError::StackOverflow => {
                Ok(self.make_error(ctx, "RangeError", "Maximum call stack size exceeded"))
            }
            fatal => Err(fatal),
        }
    }

    fn overflow_to_throw_value(&self, ctx: &mut VmContext, err: VmError) -> VmResult<Value> {
        match err {
            VmError::StackOverflow => {
                Ok(self.make_error(ctx, "RangeError", "Maximum call stack size exceeded"))
            }
            other => Err(other),
        }
    }

    fn to_exception(&self, ctx: &VmContext, value: Value) -> VmError {
        VmError::exception_with_stack(value, ctx.stack_trace())
    }

    // ================================================================
    // Instruction execution
    // ================================================================

    #[allow(clippy::too_many_lines)]
    fn execute_instruction(
        &self,
        ctx: &mut VmContext,
        program: &Arc<Program>,
        instruction: &Instruction,
    ) -> VmResult<Step> {
        use Instruction as I;

        match instruction {
            // ---- constants ----
            I::LoadUndefined { dst } => {
                ctx.set_register(dst.0, Value::undefined());
                Ok(Step::Continue)
            }
            I::LoadNull { dst } => {
                ctx.set_register(dst.0, Value::null());
                Ok(Step::Continue)
            }
            I::LoadTrue { dst } => {
                ctx.set_register(dst.0, Value::boolean(true));
                Ok(Step::Continue)
            }
            I::LoadFalse { dst } => {
                ctx.set_register(dst.0, Value::boolean(false));
                Ok(Step::Continue)
            }
            I::LoadInt32 { dst, value } => {
                ctx.set_register(dst.0, Value::int32(*value));
                Ok(Step::Continue)
            }
            I::LoadConst { dst, idx } => {
                let value = self.constant_to_value(ctx, program, idx.0)?;
                ctx.set_register(dst.0, value);
                Ok(Step::Continue)
            }
            I::LoadHole { dst } => {
                ctx.set_register(dst.0, Value::hole());
                Ok(Step::Continue)
            }

            // ---- variables ----
            I::GetLocal { dst, idx } => {
                let value = ctx.get_local(idx.0)?;
                ctx.set_register(dst.0, value);
                Ok(Step::Continue)
            }
            I::SetLocal { idx, src } => {
                let value = ctx.get_register(src.0).clone();
                ctx.set_local(idx.0, value)?;
                Ok(Step::Continue)
            }
            I::GetLocalChecked { dst, idx, name } => {
                let value = ctx.get_local(idx.0)?;
                if value.is_hole() {
                    let name = self.constant_str(program, name.0)?;
                    return Err(VmError::reference_error(format!(
                        "Cannot access '{}' before initialization",
                        name
                    )));
                }
                ctx.set_register(dst.0, value);
                Ok(Step::Continue)
            }
            I::GetUpvalue { dst, idx } => {
                let value = ctx.get_upvalue(idx.0)?;
                ctx.set_register(dst.0, value);
                Ok(Step::Continue)
            }
            I::SetUpvalue { idx, src } => {
                let value = ctx.get_register(src.0).clone();
                ctx.set_upvalue(idx.0, value)?;
                Ok(Step::Continue)
            }
            I::GetUpvalueChecked { dst, idx, name } => {
                let value = ctx.get_upvalue(idx.0)?;
                if value.is_hole() {
                    let name = self.constant_str(program, name.0)?;
                    return Err(VmError::reference_error(format!(
                        "Cannot access '{}' before initialization",
                        name
                    )));
                }
                ctx.set_register(dst.0, value);
                Ok(Step::Continue)
            }
            I::SetUpvalueChecked { idx, src, name } => {
                let current = ctx.get_upvalue(idx.0)?;
                if current.is_hole() {
                    let name = self.constant_str(program, name.0)?;
                    return Err(VmError::reference_error(format!(
                        "Cannot access '{}' before initialization",
                        name
                    )));
                }
                let value = ctx.get_register(src.0).clone();
                ctx.set_upvalue(idx.0, value)?;
                Ok(Step::Continue)
            }
            I::GetGlobal { dst, name } => {
                let name = self.constant_str(program, name.0)?;
                match ctx.get_global(&name) {
                    Some(value) => {
                        ctx.set_register(dst.0, value);
                        Ok(Step::Continue)
                    }
                    None => Err(VmError::reference_error(format!(
                        "{} is not defined",
                        name
                    ))),
                }
            }
            I::SetGlobal { name, src } => {
                let name = self.constant_str(program, name.0)?;
                let value = ctx.get_register(src.0).clone();
                ctx.set_global(&name, value);
                Ok(Step::Continue)
            }
            I::LoadThis { dst } => {
                let this = ctx
                    .current_frame()
                    .map(|f| f.this_value.clone())
                    .unwrap_or_else(Value::undefined);
                ctx.set_register(dst.0, this);
                Ok(Step::Continue)
            }
            I::CloseUpvalue { local_idx } => {
                ctx.close_upvalue(local_idx.0)?;
                Ok(Step::Continue)
            }

            // ---- arithmetic ----
            I::Add { dst, lhs, rhs } => {
                let a = ctx.get_register(lhs.0).clone();
                let b = ctx.get_register(rhs.0).clone();
                let result = self.op_add(ctx, &a, &b)?;
                ctx.set_register(dst.0, result);
                Ok(Step::Continue)
            }
            I::Sub { dst, lhs, rhs } => self.numeric_binop(ctx, dst.0, lhs.0, rhs.0, |a, b| a - b),
            I::Mul { dst, lhs, rhs } => self.numeric_binop(ctx, dst.0, lhs.0, rhs.0, |a, b| a * b),
            I::Div { dst, lhs, rhs } => self.numeric_binop(ctx, dst.0, lhs.0, rhs.0, |a, b| a / b),
            I::Mod { dst, lhs, rhs } => {
                // JS % is the remainder operation; the sign follows the dividend
                self.numeric_binop(ctx, dst.0, lhs.0, rhs.0, |a, b| a % b)
            }
            I::Pow { dst, lhs, rhs } => {
                self.numeric_binop(ctx, dst.0, lhs.0, rhs.0, |a, b| a.powf(b))
            }
            I::Neg { dst, src } => {
                let v = ctx.get_register(src.0).clone();
                let n = self.to_number_value(ctx, &v)?;
                ctx.set_register(dst.0, Value::number(-n));
                Ok(Step::Continue)
            }
            I::Inc { dst, src } => {
                let v = ctx.get_register(src.0).clone();
                if let Some(i) = v.as_int32() {
                    if let Some(n) = i.checked_add(1) {
                        ctx.set_register(dst.0, Value::int32(n));
                        return Ok(Step::Continue);
                    }
                }
                let n = self.to_number_value(ctx, &v)?;
                ctx.set_register(dst.0, Value::number(n + 1.0));
                Ok(Step::Continue)
            }
            I::Dec { dst, src } => {
                let v = ctx.get_register(src.0).clone();
                if let Some(i) = v.as_int32() {
                    if let Some(n) = i.checked_sub(1) {
                        ctx.set_register(dst.0, Value::int32(n));
                        return Ok(Step::Continue);
                    }
                }
                let n = self.to_number_value(ctx, &v)?;
                ctx.set_register(dst.0, Value::number(n - 1.0));
                Ok(Step::Continue)
            }

            // ---- bitwise ----
            I::BitAnd { dst, lhs, rhs } => self.int_binop(ctx, dst.0, lhs.0, rhs.0, |a, b| a & b),
            I::BitOr { dst, lhs, rhs } => self.int_binop(ctx, dst.0, lhs.0, rhs.0, |a, b| a | b),
            I::BitXor { dst, lhs, rhs } => self.int_binop(ctx, dst.0, lhs.0, rhs.0, |a, b| a ^ b),
            I::BitNot { dst, src } => {
                let v = ctx.get_register(src.0).clone();
                let n = self.to_number_value(ctx, &v)?;
                ctx.set_register(dst.0, Value::int32(!convert::to_int32(n)));
                Ok(Step::Continue)
            }
            I::Shl { dst, lhs, rhs } => {
                self.int_binop(ctx, dst.0, lhs.0, rhs.0, |a, b| a << (b & 31))
            }
            I::Shr { dst, lhs, rhs } => {
                self.int_binop(ctx, dst.0, lhs.0, rhs.0, |a, b| a >> (b & 31))
            }
            I::Ushr { dst, lhs, rhs } => {
                let a = ctx.get_register(lhs.0).clone();
                let b = ctx.get_register(rhs.0).clone();
                let a = convert::to_uint32(self.to_number_value(ctx, &a)?);
                let b = convert::to_uint32(self.to_number_value(ctx, &b)?) & 31;
                ctx.set_register(dst.0, Value::number((a >> b) as f64));
                Ok(Step::Continue)
            }

            // ---- comparison ----
            I::Eq { dst, lhs, rhs } => {
                let a = ctx.get_register(lhs.0).clone();
                let b = ctx.get_register(rhs.0).clone();
                let eq = self.abstract_equal(ctx, &a, &b, 0)?;
                ctx.set_register(dst.0, Value::boolean(eq));
                Ok(Step::Continue)
            }
            I::Ne { dst, lhs, rhs } => {
                let a = ctx.get_register(lhs.0).clone();
                let b = ctx.get_register(rhs.0).clone();
                let eq = self.abstract_equal(ctx, &a, &b, 0)?;
                ctx.set_register(dst.0, Value::boolean(!eq));
                Ok(Step::Continue)
            }
            I::StrictEq { dst, lhs, rhs } => {
                let eq = ctx
                    .get_register(lhs.0)
                    .strict_equals(ctx.get_register(rhs.0));
                ctx.set_register(dst.0, Value::boolean(eq));
                Ok(Step::Continue)
            }
            I::StrictNe { dst, lhs, rhs } => {
                let eq = ctx
                    .get_register(lhs.0)
                    .strict_equals(ctx.get_register(rhs.0));
                ctx.set_register(dst.0, Value::boolean(!eq));
                Ok(Step::Continue)
            }
            I::Lt { dst, lhs, rhs } => {
                self.compare(ctx, dst.0, lhs.0, rhs.0, |o| o == std::cmp::Ordering::Less)
            }
            I::Le { dst, lhs, rhs } => self.compare(ctx, dst.0, lhs.0, rhs.0, |o| {
                o != std::cmp::Ordering::Greater
            }),
            I::Gt { dst, lhs, rhs } => self.compare(ctx, dst.0, lhs.0, rhs.0, |o| {
                o == std::cmp::Ordering::Greater
            }),
            I::Ge { dst, lhs, rhs } => {
                self.compare(ctx, dst.0, lhs.0, rhs.0, |o| o != std::cmp::Ordering::Less)
            }

            // ---- logical / nullish ----
            I::Not { dst, src } => {
                let b = ctx.get_register(src.0).to_boolean();
                ctx.set_register(dst.0, Value::boolean(!b));
                Ok(Step::Continue)
            }
            I::IsNull { dst, src } => {
                let b = ctx.get_register(src.0).is_null();
                ctx.set_register(dst.0, Value::boolean(b));
                Ok(Step::Continue)
            }
            I::IsUndefined { dst, src } => {
                let b = ctx.get_register(src.0).is_undefined();
                ctx.set_register(dst.0, Value::boolean(b));
                Ok(Step::Continue)
            }
            I::IsNullish { dst, src } => {
                let b = ctx.get_register(src.0).is_nullish();
                ctx.set_register(dst.0, Value::boolean(b));
                Ok(Step::Continue)
            }

            // ---- type operations ----
            I::TypeOf { dst, src } => {
                let name = ctx.get_register(src.0).type_of();
                ctx.set_register(dst.0, Value::str(name));
                Ok(Step::Continue)
            }
            I::TypeOfName { dst, name } => {
                let name = self.constant_str(program, name.0)?;
                let result = match ctx.get_global(&name) {
                    Some(value) => value.type_of(),
                    None => "undefined",
                };
                ctx.set_register(dst.0, Value::str(result));
                Ok(Step::Continue)
            }
            I::InstanceOf { dst, lhs, rhs } => {
                let obj = ctx.get_register(lhs.0).clone();
                let ctor = ctx.get_register(rhs.0).clone();
                let result = self.instance_of(&obj, &ctor)?;
                ctx.set_register(dst.0, Value::boolean(result));
                Ok(Step::Continue)
            }
            I::In { dst, lhs, rhs } => {
                let key_value = ctx.get_register(lhs.0).clone();
                let target = ctx.get_register(rhs.0).clone();
                let key = self.value_to_property_key(ctx, &key_value)?;
                let result = self.has_property(ctx, &target, &key)?;
                ctx.set_register(dst.0, Value::boolean(result));
                Ok(Step::Continue)
            }
            I::ToNumber { dst, src } => {
                let v = ctx.get_register(src.0).clone();
                let n = self.to_number_value(ctx, &v)?;
                ctx.set_register(dst.0, Value::number(n));
                Ok(Step::Continue)
            }

            // ---- property access ----
            I::GetProp { dst, obj, name, ic } => {
                let receiver = ctx.get_register(obj.0).clone();
                let name = self.constant_str(program, name.0)?;
                let key = PropertyKey::string(&name);
                let site = self.site(ctx, program, *ic);
                let value = self.get_property(ctx, &receiver, &key, site)?;
                ctx.set_register(dst.0, value);
                Ok(Step::Continue)
            }
            I::SetProp { obj, name, src, ic } => {
                let receiver = ctx.get_register(obj.0).clone();
                let value = ctx.get_register(src.0).clone();
                let name = self.constant_str(program, name.0)?;
                let key = PropertyKey::string(&name);
                let site = self.site(ctx, program, *ic);
                self.set_property(ctx, &receiver, key, value, site)?;
                Ok(Step::Continue)
            }
            I::GetIndex { dst, obj, key, ic } => {
                let receiver = ctx.get_register(obj.0).clone();
                let key_value = ctx.get_register(key.0).clone();
                let key = self.value_to_property_key(ctx, &key_value)?;
                let site = self.site(ctx, program, *ic);
                let value = self.get_property(ctx, &receiver, &key, site)?;
                ctx.set_register(dst.0, value);
                Ok(Step::Continue)
            }
            I::SetIndex { obj, key, src, ic } => {
                let receiver = ctx.get_register(obj.0).clone();
                let key_value = ctx.get_register(key.0).clone();
                let value = ctx.get_register(src.0).clone();
                let key = self.value_to_property_key(ctx, &key_value)?;
                let site = self.site(ctx, program, *ic);
                self.set_property(ctx, &receiver, key, value, site)?;
                Ok(Step::Continue)
            }
            I::DeleteProp { dst, obj, key } => {
                let receiver = ctx.get_register(obj.0).clone();
                let key_value = ctx.get_register(key.0).clone();
                let result = self.delete_property(ctx, &receiver, &key_value)?;
                ctx.set_register(dst.0, Value::boolean(result));
                Ok(Step::Continue)
            }
            I::NewObject { dst } => {
                let proto = self.default_prototype(ctx, "Object");
                ctx.set_register(dst.0, Value::object(Arc::new(JsObject::new(proto))));
                Ok(Step::Continue)
            }
            I::DefineGetter { obj, key, func } => {
                self.define_accessor(ctx, obj.0, key.0, func.0, true)?;
                Ok(Step::Continue)
            }
            I::DefineSetter { obj, key, func } => {
                self.define_accessor(ctx, obj.0, key.0, func.0, false)?;
                Ok(Step::Continue)
            }

            // ---- arrays ----
            I::NewArray { dst, len } => {
                let proto = self.default_prototype(ctx, "Array");
                ctx.set_register(
                    dst.0,
                    Value::array(Arc::new(JsObject::array(*len as usize, proto))),
                );
                Ok(Step::Continue)
            }
            I::AppendArray { arr, src } => {
                let value = ctx.get_register(src.0).clone();
                let target = ctx.get_register(arr.0).clone();
                if let Some(array) = target.as_array() {
                    array.push_element(value);
                }
                Ok(Step::Continue)
            }
            I::AppendSpread { arr, src } => {
                let source = ctx.get_register(src.0).clone();
                let target = ctx.get_register(arr.0).clone();
                let items = self.iterate_to_vec(ctx, &source)?;
                if let Some(array) = target.as_array() {
                    for item in items {
                        array.push_element(item);
                    }
                }
                Ok(Step::Continue)
            }

            // ---- closures ----
            I::MakeClosure { dst, chunk } => {
                let value = self.make_closure(ctx, program, chunk.0)?;
                ctx.set_register(dst.0, value);
                Ok(Step::Continue)
            }

            // ---- calls ----
            I::Call {
                dst,
                func,
                first_arg,
                argc,
            } => {
                let callee = ctx.get_register(func.0).clone();
                let args = ctx.register_span(first_arg.0, *argc as usize);
                self.dispatch_call(ctx, callee, Value::undefined(), args, Some(dst.0), false)
            }
            I::CallMethod {
                dst,
                obj,
                name,
                first_arg,
                argc,
                ic,
            } => {
                let receiver = ctx.get_register(obj.0).clone();
                let name = self.constant_str(program, name.0)?;
                let key = PropertyKey::string(&name);
                let site = self.site(ctx, program, *ic);
                let callee = self.get_property(ctx, &receiver, &key, site)?;
                if !callee.is_callable() {
                    return Err(VmError::type_error(format!(
                        "{}.{} is not a function",
                        convert::to_display_string(&receiver),
                        name
                    )));
                }
                let args = ctx.register_span(first_arg.0, *argc as usize);
                self.dispatch_call(ctx, callee, receiver, args, Some(dst.0), false)
            }
            I::TailCall {
                func,
                first_arg,
                argc,
            } => {
                let callee = ctx.get_register(func.0).clone();
                let args = ctx.register_span(first_arg.0, *argc as usize);
                self.dispatch_call(ctx, callee, Value::undefined(), args, None, true)
            }
            I::New {
                dst,
                ctor,
                first_arg,
                argc,
            } => {
                let callee = ctx.get_register(ctor.0).clone();
                let args = ctx.register_span(first_arg.0, *argc as usize);
                self.dispatch_construct(ctx, callee, args, dst.0)
            }
            I::CallSpread {
                dst,
                func,
                this,
                spread,
            } => {
                let callee = ctx.get_register(func.0).clone();
                let receiver = ctx.get_register(this.0).clone();
                let spread_value = ctx.get_register(spread.0).clone();
                let args = self.iterate_to_vec(ctx, &spread_value)?;
                self.dispatch_call(ctx, callee, receiver, args, Some(dst.0), false)
            }
            I::NewSpread { dst, ctor, spread } => {
                let callee = ctx.get_register(ctor.0).clone();
                let spread_value = ctx.get_register(spread.0).clone();
                let args = self.iterate_to_vec(ctx, &spread_value)?;
                self.dispatch_construct(ctx, callee, args, dst.0)
            }
            I::Return { src } => Ok(Step::Return(ctx.get_register(src.0).clone())),
            I::ReturnUndefined => Ok(Step::Return(Value::undefined())),

            // ---- control flow ----
            I::Jump { offset } => Ok(Step::Jump(offset.0)),
            I::JumpIfTrue { cond, offset } => {
                if ctx.get_register(cond.0).to_boolean() {
                    Ok(Step::Jump(offset.0))
                } else {
                    Ok(Step::Continue)
                }
            }
            I::JumpIfFalse { cond, offset } => {
                if !ctx.get_register(cond.0).to_boolean() {
                    Ok(Step::Jump(offset.0))
                } else {
                    Ok(Step::Continue)
                }
            }
            I::JumpIfNullish { src, offset } => {
                if ctx.get_register(src.0).is_nullish() {
                    Ok(Step::Jump(offset.0))
                } else {
                    Ok(Step::Continue)
                }
            }
            I::JumpIfNotNullish { src, offset } => {
                if !ctx.get_register(src.0).is_nullish() {
                    Ok(Step::Jump(offset.0))
                } else {
                    Ok(Step::Continue)
                }
            }
            I::JumpIfEq { lhs, rhs, offset } => {
                if ctx
                    .get_register(lhs.0)
                    .strict_equals(ctx.get_register(rhs.0))
                {
                    Ok(Step::Jump(offset.0))
                } else {
                    Ok(Step::Continue)
                }
            }

            // ---- exception handling ----
            I::PushHandler { kind, target } => {
                let pc = ctx.pc();
                let handler_pc = (pc as i64 + target.0 as i64) as usize;
                ctx.push_handler(*kind, handler_pc);
                Ok(Step::Continue)
            }
            I::PopHandler => {
                ctx.pop_handler();
                Ok(Step::Continue)
            }
            I::Throw { src } => Ok(Step::Throw(ctx.get_register(src.0).clone())),
            I::Catch { dst } => {
                let exc = ctx.take_exception().unwrap_or_else(Value::undefined);
                ctx.set_register(dst.0, exc);
                Ok(Step::Continue)
            }
            I::EndFinally => {
                let completion = ctx
                    .current_frame_mut()
                    .and_then(|f| f.pending_completions.pop())
                    .unwrap_or(Completion::Normal);
                match completion {
                    Completion::Normal => Ok(Step::Continue),
                    Completion::Return(v) => Ok(Step::Return(v)),
                    Completion::Throw(v) => Ok(Step::Throw(v)),
                    Completion::Break { target_pc } | Completion::Continue { target_pc } => {
                        ctx.set_pc(target_pc);
                        Ok(Step::Jump(0))
                    }
                }
            }

            // ---- iteration ----
            I::GetIterator { dst, src } => {
                let source = ctx.get_register(src.0).clone();
                let iterator = self.get_iterator(ctx, &source)?;
                ctx.set_register(dst.0, iterator);
                Ok(Step::Continue)
            }
            I::IteratorNext { dst, done, iter } => {
                let iterator = ctx.get_register(iter.0).clone();
                let (value, is_done) = self.iterator_next(ctx, &iterator, Value::undefined())?;
                ctx.set_register(dst.0, value);
                ctx.set_register(done.0, Value::boolean(is_done));
                Ok(Step::Continue)
            }
            I::IteratorClose { iter } => {
                let iterator = ctx.get_register(iter.0).clone();
                let unwinding_from_throw = ctx
                    .current_frame()
                    .map(|f| matches!(f.pending_completions.last(), Some(Completion::Throw(_))))
                    .unwrap_or(false);
                match self.iterator_close(ctx, &iterator) {
                    Ok(()) => Ok(Step::Continue),
                    // return() errors must not mask an in-flight throw
                    Err(_) if unwinding_from_throw => Ok(Step::Continue),
                    Err(e) => Err(e),
                }
            }
            I::ForInKeys { dst, obj } => {
                let target = ctx.get_register(obj.0).clone();
                let keys = self.for_in_keys(ctx, &target)?;
                ctx.set_register(dst.0, keys);
                Ok(Step::Continue)
            }
            I::CopyRestProps {
                dst,
                src,
                exclude_start,
                exclude_count,
            } => {
                let source = ctx.get_register(src.0).clone();
                let excluded = ctx.register_span(exclude_start.0, *exclude_count as usize);
                let rest = self.copy_rest_props(ctx, &source, &excluded)?;
                ctx.set_register(dst.0, rest);
                Ok(Step::Continue)
            }
            I::CopyDataProps { dst, src } => {
                let source = ctx.get_register(src.0).clone();
                let target = ctx.get_register(dst.0).clone();
                if !source.is_nullish() {
                    if let (Some(target_obj), Some(source_obj)) =
                        (target.as_object(), source.as_object())
                    {
                        for key in source_obj.own_enumerable_string_keys() {
                            let value = self.get_property(ctx, &source, &key, None)?;
                            target_obj.set(key, value);
                        }
                    }
                }
                Ok(Step::Continue)
            }

            // ---- generators / async ----
            I::CreateGenerator => Ok(Step::MakeGenerator),
            I::Yield { dst, src } => Ok(Step::Yield {
                value: ctx.get_register(src.0).clone(),
                dst: dst.0,
            }),
            I::Await { dst, src } => Ok(Step::Await {
                value: ctx.get_register(src.0).clone(),
                dst: dst.0,
            }),

            // ---- misc ----
            I::Move { dst, src } => {
                let value = ctx.get_register(src.0).clone();
                ctx.set_register(dst.0, value);
                Ok(Step::Continue)
            }
            I::Nop => Ok(Step::Continue),
        }
    }

    fn site(&self, ctx: &VmContext, program: &Arc<Program>, ic: u16) -> Option<Site> {
        let chunk = ctx.current_frame()?.chunk_index;
        Some(Site {
            program: program.clone(),
            chunk,
            ic,
        })
    }

    fn define_accessor(
        &self,
        ctx: &mut VmContext,
        obj: u16,
        key: u16,
        func: u16,
        is_getter: bool,
    ) -> VmResult<()> {
        let receiver = ctx.get_register(obj).clone();
        let key_value = ctx.get_register(key).clone();
        let accessor = ctx.get_register(func).clone();
        let key = self.value_to_property_key(ctx, &key_value)?;
        if let Some(object) = receiver.as_object() {
            let (mut get, mut set) = match object.own_slot(&key) {
                Some(PropertySlot::Accessor { get, set, .. }) => (get, set),
                _ => (None, None),
            };
            if is_getter {
                get = Some(accessor);
            } else {
                set = Some(accessor);
            }
            object.define_property(
                key,
                PropertySlot::Accessor {
                    get,
                    set,
                    attributes: PropertyAttributes::data(),
                },
            );
        }
        Ok(())
    }

    // ================================================================
    // Calls
    // ================================================================

    fn dispatch_call(
        &self,
        ctx: &mut VmContext,
        callee: Value,
        this: Value,
        args: Vec<Value>,
        dst: Option<u16>,
        tail: bool,
    ) -> VmResult<Step> {
        let mut callee = callee;
        let mut this = this;
        let mut args = args;

        while let Some(bound) = callee.as_bound_function().cloned() {
            let mut combined = bound.bound_args.clone();
            combined.extend(args);
            args = combined;
            this = bound.bound_this.clone();
            callee = bound.target.clone();
        }

        if let Some(closure) = callee.as_closure().cloned() {
            let chunk = closure.chunk();
            let this_value = if chunk.is_arrow() {
                closure
                    .captured_this
                    .clone()
                    .unwrap_or_else(Value::undefined)
            } else {
                this
            };
            let return_register = if tail {
                ctx.current_frame().and_then(|f| f.return_register)
            } else {
                dst
            };
            let plan = FramePlan {
                chunk_index: closure.chunk_index,
                program: closure.program.clone(),
                return_register,
                is_construct: false,
                this_value,
                upvalues: closure.upvalues.clone(),
                args,
            };
            return Ok(if tail {
                Step::ReplaceFrame(plan)
            } else {
                Step::PushFrame(plan)
            });
        }

        if callee.as_native_function().is_some() || callee.is_proxy() {
            let result = self.call_function(ctx, &callee, this, &args)?;
            return Ok(if tail {
                Step::Return(result)
            } else {
                if let Some(dst) = dst {
                    ctx.set_register(dst, result);
                }
                Step::Continue
            });
        }

        Err(VmError::type_error(format!(
            "{} is not a function",
            convert::to_display_string(&callee)
        )))
    }

    fn dispatch_construct(
        &self,
        ctx: &mut VmContext,
        callee: Value,
        args: Vec<Value>,
        dst: u16,
    ) -> VmResult<Step> {
        if let Some(proxy) = callee.as_proxy().cloned() {
            if proxy.is_revoked() {
                return Err(VmError::type_error(
                    "Cannot perform 'construct' on a revoked proxy",
                ));
            }
            if let Some(trap) = proxy.get_trap("construct") {
                let args_array = self.new_array_from(ctx, args);
                let handler = proxy.handler().unwrap_or_else(Value::undefined);
                let target = proxy.target_raw().clone();
                let result = self.call_function(
                    ctx,
                    &trap,
                    handler,
                    &[target.clone(), args_array, target],
                )?;
                if !result.is_object() {
                    return Err(VmError::type_error(
                        "proxy construct trap must return an object",
                    ));
                }
                ctx.set_register(dst, result);
                return Ok(Step::Continue);
            }
            let target = proxy.target_raw().clone();
            return self.dispatch_construct(ctx, target, args, dst);
        }

        if let Some(bound) = callee.as_bound_function().cloned() {
            let mut combined = bound.bound_args.clone();
            combined.extend(args);
            let target = bound.target.clone();
            return self.dispatch_construct(ctx, target, combined, dst);
        }

        let prototype = callee
            .as_object()
            .and_then(|o| o.get(&PropertyKey::string("prototype")))
            .filter(|p| p.is_object())
            .unwrap_or_else(|| self.default_prototype(ctx, "Object"));
        let this = Value::object(Arc::new(JsObject::new(prototype)));

        if let Some(closure) = callee.as_closure().cloned() {
            let plan = FramePlan {
                chunk_index: closure.chunk_index,
                program: closure.program.clone(),
                return_register: Some(dst),
                is_construct: true,
                this_value: this,
                upvalues: closure.upvalues.clone(),
                args,
            };
            return Ok(Step::PushFrame(plan));
        }

        if callee.as_native_function().is_some() {
            let result = self.call_function(ctx, &callee, this.clone(), &args)?;
            let value = if result.is_object() { result } else { this };
            ctx.set_register(dst, value);
            return Ok(Step::Continue);
        }

        Err(VmError::type_error(format!(
            "{} is not a constructor",
            convert::to_display_string(&callee)
        )))
    }

    // ================================================================
    // Property access
    // ================================================================

    /// Script-visible property read, with inline caching and accessor /
    /// proxy dispatch.
    pub fn get_property(
        &self,
        ctx: &mut VmContext,
        receiver: &Value,
        key: &PropertyKey,
        site: Option<Site>,
    ) -> VmResult<Value> {
        if receiver.is_nullish() {
            return Err(VmError::type_error(format!(
                "Cannot read properties of {} (reading '{}')",
                convert::to_display_string(receiver),
                key.to_display_string()
            )));
        }

        if let Some(proxy) = receiver.as_proxy().cloned() {
            return self.proxy_get(ctx, receiver, &proxy, key);
        }

        if let Some(s) = receiver.as_string().cloned() {
            if let PropertyKey::String(name) = key {
                if name.as_str() == "length" {
                    return Ok(Value::int32(s.len_utf16() as i32));
                }
            }
            if let PropertyKey::Index(i) = key {
                return Ok(s
                    .char_at_utf16(*i as usize)
                    .map(Value::string)
                    .unwrap_or_else(Value::undefined));
            }
            // String.prototype is host-registered
            if let Some(value) = self.builtin_prototype_lookup(ctx, "String", key) {
                return Ok(value);
            }
            return Ok(Value::undefined());
        }

        if let Some(ta) = receiver.as_typed_array().cloned() {
            if let PropertyKey::Index(i) = key {
                return Ok(ta.get(*i as usize));
            }
            if let PropertyKey::String(name) = key {
                if name.as_str() == "length" {
                    return Ok(Value::int32(ta.length() as i32));
                }
            }
            return Ok(Value::undefined());
        }

        if let Some(generator) = receiver.as_generator().cloned() {
            if let PropertyKey::String(name) = key {
                match name.as_str() {
                    "next" | "throw" | "return" => {
                        return Ok(self.generator_method(generator, name.as_str()));
                    }
                    _ => {}
                }
            }
            if let PropertyKey::Symbol(id) = key {
                if *id == well_known::ITERATOR {
                    let self_value = receiver.clone();
                    return Ok(Value::native_function(
                        "[Symbol.iterator]",
                        0,
                        move |_, _, _| Ok(self_value.clone()),
                    ));
                }
            }
            // Fall through to the generator's property object
        }

        if let Some(promise) = receiver.as_promise().cloned() {
            if let PropertyKey::String(name) = key {
                match name.as_str() {
                    "then" => return Ok(self.promise_then_method(promise, false)),
                    "catch" => return Ok(self.promise_then_method(promise, true)),
                    _ => {}
                }
            }
            return Ok(Value::undefined());
        }

        if let Some(object) = receiver.as_object() {
            // IC fast path
            if let Some(site) = &site {
                if let Some(shape_id) = object.shape_id() {
                    if let Some(cache) = ctx.feedback_cache(&site.program, site.chunk, site.ic) {
                        if let Some(IcAction::Load { offset, depth }) = cache.lookup(shape_id) {
                            let mut holder = Some(object.clone());
                            for _ in 0..depth {
                                holder = holder.and_then(|h| h.prototype().as_object());
                            }
                            if let Some(value) = holder.and_then(|h| h.slot(offset)) {
                                return Ok(value);
                            }
                        }
                    }
                }
            }

            // Slow path: full chain walk
            if let Some((slot, depth)) = object.lookup_with_depth(key) {
                match slot {
                    PropertySlot::Data { value, .. } => {
                        if let Some(site) = site {
                            self.record_load_ic(ctx, &object, key, depth, site);
                        }
                        return Ok(value);
                    }
                    PropertySlot::Accessor { get, .. } => {
                        return match get {
                            Some(getter) => self.call_function(ctx, &getter, receiver.clone(), &[]),
                            None => Ok(Value::undefined()),
                        };
                    }
                }
            }
            return Ok(Value::undefined());
        }

        // Remaining primitives have nothing without a host-registered
        // prototype surface
        Ok(Value::undefined())
    }

    fn record_load_ic(
        &self,
        ctx: &mut VmContext,
        object: &Arc<JsObject>,
        key: &PropertyKey,
        depth: usize,
        site: Site,
    ) {
        let Some(shape_id) = object.shape_id() else {
            return;
        };
        let mut holder = Some(object.clone());
        for _ in 0..depth {
            holder = holder.and_then(|h| h.prototype().as_object());
        }
        let Some(offset) = holder.and_then(|h| h.own_offset(key)) else {
            return;
        };
        if let Some(cache) = ctx.feedback_cache(&site.program, site.chunk, site.ic) {
            cache.record(shape_id, IcAction::Load { offset, depth });
        }
    }

    /// Script-visible property write, with store caching and setter /
    /// proxy dispatch.
    pub fn set_property(
        &self,
        ctx: &mut VmContext,
        receiver: &Value,
        key: PropertyKey,
        value: Value,
        site: Option<Site>,
    ) -> VmResult<()> {
        if receiver.is_nullish() {
            return Err(VmError::type_error(format!(
                "Cannot set properties of {} (setting '{}')",
                convert::to_display_string(receiver),
                key.to_display_string()
            )));
        }

        if let Some(proxy) = receiver.as_proxy().cloned() {
            return self.proxy_set(ctx, receiver, &proxy, key, value);
        }

        if let Some(ta) = receiver.as_typed_array().cloned() {
            if let PropertyKey::Index(i) = key {
                let n = self.to_number_value(ctx, &value)?;
                ta.set(i as usize, n);
            }
            return Ok(());
        }

        let Some(object) = receiver.as_object() else {
            // Writes to other primitives silently no-op
            return Ok(());
        };

        // IC fast path: stores into known own slots
        if let Some(site) = &site {
            if let Some(shape_id) = object.shape_id() {
                if let Some(cache) = ctx.feedback_cache(&site.program, site.chunk, site.ic) {
                    if let Some(IcAction::StoreOwn { offset }) = cache.lookup(shape_id) {
                        if object.set_slot(offset, value.clone()) {
                            return Ok(());
                        }
                    }
                }
            }
        }

        // A setter (or read-only data slot) anywhere on the chain
        // intercepts the write
        if let Some((slot, depth)) = object.lookup_with_depth(&key) {
            match slot {
                PropertySlot::Accessor { set, .. } => {
                    return match set {
                        Some(setter) => self
                            .call_function(ctx, &setter, receiver.clone(), &[value])
                            .map(|_| ()),
                        None => Err(VmError::type_error(format!(
                            "Cannot set property {} which has only a getter",
                            key.to_display_string()
                        ))),
                    };
                }
                PropertySlot::Data { attributes, .. } => {
                    if !attributes.writable && depth > 0 {
                        return Err(VmError::type_error(format!(
                            "Cannot assign to read only property '{}'",
                            key.to_display_string()
                        )));
                    }
                }
            }
        }

        let had_own = object.own_offset(&key).is_some();
        let old_shape_id = object.shape_id();

        if !object.set(key.clone(), value) {
            return Err(VmError::type_error(format!(
                "Cannot assign to read only property '{}'",
                key.to_display_string()
            )));
        }

        if let Some(site) = site {
            if let (Some(old_id), Some(offset)) = (old_shape_id, object.own_offset(&key)) {
                if let Some(cache) = ctx.feedback_cache(&site.program, site.chunk, site.ic) {
                    if had_own {
                        cache.record(old_id, IcAction::StoreOwn { offset });
                    } else if let Some(new_shape) = object.shape() {
                        cache.record(old_id, IcAction::StoreTransition { new_shape, offset });
                    }
                }
            }
        }
        Ok(())
    }

    fn delete_property(
        &self,
        ctx: &mut VmContext,
        receiver: &Value,
        key_value: &Value,
    ) -> VmResult<bool> {
        if receiver.is_nullish() {
            return Err(VmError::type_error(
                "Cannot convert undefined or null to object",
            ));
        }
        let key = self.value_to_property_key(ctx, key_value)?;

        if let Some(proxy) = receiver.as_proxy().cloned() {
            if let Some(trap) = proxy.get_trap("deleteProperty") {
                let handler = proxy.handler().unwrap_or_else(Value::undefined);
                let key_arg = self.property_key_to_value(&key);
                let result = self.call_function(
                    ctx,
                    &trap,
                    handler,
                    &[proxy.target_raw().clone(), key_arg],
                )?;
                return Ok(result.to_boolean());
            }
            let target = proxy.target_raw().clone();
            return self.delete_property(ctx, &target, key_value);
        }

        if let Some(object) = receiver.as_object() {
            return Ok(object.delete(&key));
        }
        Ok(true)
    }

    fn has_property(
        &self,
        ctx: &mut VmContext,
        target: &Value,
        key: &PropertyKey,
    ) -> VmResult<bool> {
        if let Some(proxy) = target.as_proxy().cloned() {
            if let Some(trap) = proxy.get_trap("has") {
                let handler = proxy.handler().unwrap_or_else(Value::undefined);
                let key_arg = self.property_key_to_value(key);
                let result = self.call_function(
                    ctx,
                    &trap,
                    handler,
                    &[proxy.target_raw().clone(), key_arg],
                )?;
                return Ok(result.to_boolean());
            }
            let inner = proxy.target_raw().clone();
            return self.has_property(ctx, &inner, key);
        }
        if let Some(object) = target.as_object() {
            return Ok(object.has(key));
        }
        Err(VmError::type_error(
            "Cannot use 'in' operator on a non-object",
        ))
    }

    fn proxy_get(
        &self,
        ctx: &mut VmContext,
        receiver: &Value,
        proxy: &Arc<JsProxy>,
        key: &PropertyKey,
    ) -> VmResult<Value> {
        if proxy.is_revoked() {
            return Err(VmError::type_error(
                "Cannot perform 'get' on a revoked proxy",
            ));
        }
        if let Some(trap) = proxy.get_trap("get") {
            let handler = proxy.handler().unwrap_or_else(Value::undefined);
            let key_arg = self.property_key_to_value(key);
            return self.call_function(
                ctx,
                &trap,
                handler,
                &[proxy.target_raw().clone(), key_arg, receiver.clone()],
            );
        }
        let target = proxy.target_raw().clone();
        self.get_property(ctx, &target, key, None)
    }

    fn proxy_set(
        &self,
        ctx: &mut VmContext,
        receiver: &Value,
        proxy: &Arc<JsProxy>,
        key: PropertyKey,
        value: Value,
    ) -> VmResult<()> {
        if proxy.is_revoked() {
            return Err(VmError::type_error(
                "Cannot perform 'set' on a revoked proxy",
            ));
        }
        if let Some(trap) = proxy.get_trap("set") {
            let handler = proxy.handler().unwrap_or_else(Value::undefined);
            let key_arg = self.property_key_to_value(&key);
            self.call_function(
                ctx,
                &trap,
                handler,
                &[proxy.target_raw().clone(), key_arg, value, receiver.clone()],
            )?;
            return Ok(());
        }
        let target = proxy.target_raw().clone();
        self.set_property(ctx, &target, key, value, None)
    }

    fn builtin_prototype_lookup(
        &self,
        ctx: &VmContext,
        ctor_name: &str,
        key: &PropertyKey,
    ) -> Option<Value> {
        let ctor = ctx.get_global(ctor_name)?;
        let proto = ctor.as_object()?.get(&PropertyKey::string("prototype"))?;
        proto.as_object()?.get(key)
    }

    fn default_prototype(&self, ctx: &VmContext, ctor_name: &str) -> Value {
        ctx.get_global(ctor_name)
            .and_then(|c| {
                c.as_object()
                    .and_then(|o| o.get(&PropertyKey::string("prototype")))
            })
            .filter(|p| p.is_object())
            .unwrap_or_else(Value::null)
    }

    // ================================================================
    // Iteration protocol
    // ================================================================

    fn get_iterator(&self, ctx: &mut VmContext, source: &Value) -> VmResult<Value> {
        if source.is_generator() {
            return Ok(source.clone());
        }
        if source.as_array().is_some() {
            return Ok(self.make_indexed_iterator(source.clone(), IndexedKind::Array));
        }
        if source.as_string().is_some() {
            return Ok(self.make_indexed_iterator(source.clone(), IndexedKind::String));
        }
        if source.is_nullish() {
            return Err(VmError::type_error(format!(
                "{} is not iterable",
                convert::to_display_string(source)
            )));
        }

        // Custom iterables: call [Symbol.iterator]()
        let method =
            self.get_property(ctx, source, &PropertyKey::Symbol(well_known::ITERATOR), None)?;
        if !method.is_callable() {
            return Err(VmError::type_error(format!(
                "{} is not iterable",
                convert::to_display_string(source)
            )));
        }
        let iterator = self.call_function(ctx, &method, source.clone(), &[])?;
        if !iterator.is_object() {
            return Err(VmError::type_error(
                "Result of the Symbol.iterator method is not an object",
            ));
        }
        Ok(iterator)
    }

    fn iterator_next(
        &self,
        ctx: &mut VmContext,
        iterator: &Value,
        sent: Value,
    ) -> VmResult<(Value, bool)> {
        if let Some(generator) = iterator.as_generator().cloned() {
            return match self.execute_generator(ctx, &generator, ResumeMode::Next(sent))? {
                GeneratorResult::Yielded(v) => Ok((v, false)),
                GeneratorResult::Returned(v) => Ok((v, true)),
                GeneratorResult::Awaited(_) => {
                    Err(VmError::internal("await surfaced through sync iteration"))
                }
            };
        }

        let next = self.get_property(ctx, iterator, &PropertyKey::string("next"), None)?;
        if !next.is_callable() {
            return Err(VmError::type_error("iterator.next is not a function"));
        }
        let result = self.call_function(ctx, &next, iterator.clone(), &[sent])?;
        if !result.is_object() {
            return Err(VmError::type_error("Iterator result is not an object"));
        }
        let value = self.get_property(ctx, &result, &PropertyKey::string("value"), None)?;
        let done = self
            .get_property(ctx, &result, &PropertyKey::string("done"), None)?
            .to_boolean();
        Ok((value, done))
    }

    fn iterator_close(&self, ctx: &mut VmContext, iterator: &Value) -> VmResult<()> {
        if let Some(generator) = iterator.as_generator().cloned() {
            self.execute_generator(ctx, &generator, ResumeMode::Return(Value::undefined()))?;
            return Ok(());
        }
        let method = self.get_property(ctx, iterator, &PropertyKey::string("return"), None)?;
        if method.is_callable() {
            self.call_function(ctx, &method, iterator.clone(), &[])?;
        }
        Ok(())
    }

    fn iterate_to_vec(&self, ctx: &mut VmContext, source: &Value) -> VmResult<Vec<Value>> {
        if let Some(array) = source.as_array() {
            return Ok(array.elements_vec());
        }
        let iterator = self.get_iterator(ctx, source)?;
        let mut out = Vec::new();
        loop {
            let (value, done) = self.iterator_next(ctx, &iterator, Value::undefined())?;
            if done {
                break;
            }
            out.push(value);
        }
        Ok(out)
    }

    fn for_in_keys(&self, ctx: &mut VmContext, target: &Value) -> VmResult<Value> {
        if let Some(proxy) = target.as_proxy().cloned() {
            if let Some(trap) = proxy.get_trap("ownKeys") {
                let handler = proxy.handler().unwrap_or_else(Value::undefined);
                return self.call_function(ctx, &trap, handler, &[proxy.target_raw().clone()]);
            }
            let inner = proxy.target_raw().clone();
            return self.for_in_keys(ctx, &inner);
        }

        let mut seen = std::collections::HashSet::new();
        let mut keys = Vec::new();
        let mut current = target.clone();
        while let Some(object) = current.as_object() {
            for key in object.own_enumerable_string_keys() {
                let display = key.to_display_string();
                if seen.insert(display.clone()) {
                    keys.push(Value::str(&display));
                }
            }
            current = object.prototype();
        }
        Ok(self.new_array_from(ctx, keys))
    }

    fn copy_rest_props(
        &self,
        ctx: &mut VmContext,
        source: &Value,
        excluded: &[Value],
    ) -> VmResult<Value> {
        if source.is_nullish() {
            return Err(VmError::type_error(
                "Cannot destructure 'null' or 'undefined'",
            ));
        }
        let excluded: Vec<String> = excluded.iter().map(convert::to_display_string).collect();
        let rest = Arc::new(JsObject::new(self.default_prototype(ctx, "Object")));
        if let Some(object) = source.as_object() {
            for key in object.own_enumerable_string_keys() {
                if excluded.contains(&key.to_display_string()) {
                    continue;
                }
                let value = self.get_property(ctx, source, &key, None)?;
                rest.set(key, value);
            }
        }
        Ok(Value::object(rest))
    }

    // ================================================================
    // Synthesized protocol methods (generator / promise views)
    // ================================================================

    fn generator_method(&self, generator: Arc<JsGenerator>, kind: &str) -> Value {
        let mode_kind = kind.to_string();
        Value::native_function(kind, 1, move |_, args, ncx| {
            let arg = args.first().cloned().unwrap_or_else(Value::undefined);
            let mode = match mode_kind.as_str() {
                "throw" => ResumeMode::Throw(arg),
                "return" => ResumeMode::Return(arg),
                _ => ResumeMode::Next(arg),
            };
            let step = ncx.interpreter.execute_generator(ncx.ctx, &generator, mode)?;
            let (value, done) = match step {
                GeneratorResult::Yielded(v) => (v, false),
                GeneratorResult::Returned(v) => (v, true),
                GeneratorResult::Awaited(_) => {
                    return Err(VmError::internal("await surfaced through generator method"));
                }
            };
            let result = Arc::new(JsObject::new(Value::null()));
            result.set(PropertyKey::string("value"), value);
            result.set(PropertyKey::string("done"), Value::boolean(done));
            Ok(Value::object(result))
        })
    }

    fn promise_then_method(&self, promise: Arc<JsPromise>, catch_only: bool) -> Value {
        let name = if catch_only { "catch" } else { "then" };
        Value::native_function(name, 2, move |_, args, ncx| {
            let (on_fulfilled, on_rejected) = if catch_only {
                (None, args.first().cloned())
            } else {
                (args.first().cloned(), args.get(1).cloned())
            };
            let target = JsPromise::new();
            let jobs = ncx.ctx.jobs().clone();
            let reaction_target = target.clone();
            promise.on_settled(Box::new(move |result| {
                let job = match result {
                    Ok(value) => match on_fulfilled.filter(|f| f.is_callable()) {
                        Some(f) => VmJob::Call {
                            func: f,
                            this: Value::undefined(),
                            args: vec![value],
                            target: Some(reaction_target),
                        },
                        None => {
                            reaction_target.resolve(value);
                            return;
                        }
                    },
                    Err(reason) => match on_rejected.filter(|f| f.is_callable()) {
                        Some(f) => VmJob::Call {
                            func: f,
                            this: Value::undefined(),
                            args: vec![reason],
                            target: Some(reaction_target),
                        },
                        None => {
                            reaction_target.reject(reason);
                            return;
                        }
                    },
                };
                jobs.enqueue(job);
            }));
            Ok(Value::promise(target))
        })
    }

    fn make_indexed_iterator(&self, target: Value, kind: IndexedKind) -> Value {
        let index = std::sync::atomic::AtomicUsize::new(0);
        let iter_target = target;
        let next = Value::native_function("next", 0, move |_, _, _| {
            let i = index.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            let (value, done) = match kind {
                IndexedKind::Array => match iter_target.as_array() {
                    Some(arr) if i < arr.elements_len() => (
                        arr.element(i as u32).unwrap_or_else(Value::undefined),
                        false,
                    ),
                    _ => (Value::undefined(), true),
                },
                IndexedKind::String => match iter_target.as_string() {
                    Some(s) => match s.char_at_utf16(i) {
                        Some(c) => (Value::string(c), false),
                        None => (Value::undefined(), true),
                    },
                    None => (Value::undefined(), true),
                },
            };
            let result = Arc::new(JsObject::new(Value::null()));
            result.set(PropertyKey::string("value"), value);
            result.set(PropertyKey::string("done"), Value::boolean(done));
            Ok(Value::object(result))
        });
        let iterator = Arc::new(JsObject::new(Value::null()));
        iterator.set(PropertyKey::string("next"), next);
        Value::object(iterator)
    }

    // ================================================================
    // Operators and conversions
    // ================================================================

    fn op_add(&self, ctx: &mut VmContext, left: &Value, right: &Value) -> VmResult<Value> {
        // int32 fast path with overflow escape to doubles
        if let (Some(a), Some(b)) = (left.as_int32(), right.as_int32()) {
            return Ok(match a.checked_add(b) {
                Some(n) => Value::int32(n),
                None => Value::number(a as f64 + b as f64),
            });
        }

        let lp = self.to_primitive(ctx, left, PreferredType::Default)?;
        let rp = self.to_primitive(ctx, right, PreferredType::Default)?;

        if lp.is_string() || rp.is_string() {
            let ls = self.to_string_value(ctx, &lp)?;
            let rs = self.to_string_value(ctx, &rp)?;
            return Ok(Value::str(&format!("{}{}", ls, rs)));
        }

        if let (Some(a), Some(b)) = (lp.as_bigint(), rp.as_bigint()) {
            let sum = &a.value + &b.value;
            return Ok(Value::bigint_from_str(&sum.to_string()));
        }

        let a = self.to_number_value(ctx, &lp)?;
        let b = self.to_number_value(ctx, &rp)?;
        Ok(Value::number(a + b))
    }

    fn numeric_binop(
        &self,
        ctx: &mut VmContext,
        dst: u16,
        lhs: u16,
        rhs: u16,
        op: fn(f64, f64) -> f64,
    ) -> VmResult<Step> {
        let a = ctx.get_register(lhs).clone();
        let b = ctx.get_register(rhs).clone();
        let a = self.to_number_value(ctx, &a)?;
        let b = self.to_number_value(ctx, &b)?;
        ctx.set_register(dst, Value::number(op(a, b)));
        Ok(Step::Continue)
    }

    fn int_binop(
        &self,
        ctx: &mut VmContext,
        dst: u16,
        lhs: u16,
        rhs: u16,
        op: fn(i32, i32) -> i32,
    ) -> VmResult<Step> {
        let a = ctx.get_register(lhs).clone();
        let b = ctx.get_register(rhs).clone();
        let a = convert::to_int32(self.to_number_value(ctx, &a)?);
        let b = convert::to_int32(self.to_number_value(ctx, &b)?);
        ctx.set_register(dst, Value::int32(op(a, b)));
        Ok(Step::Continue)
    }

    fn compare(
        &self,
        ctx: &mut VmContext,
        dst: u16,
        lhs: u16,
        rhs: u16,
        pick: fn(std::cmp::Ordering) -> bool,
    ) -> VmResult<Step> {
        let a = ctx.get_register(lhs).clone();
        let b = ctx.get_register(rhs).clone();
        let a = self.to_primitive(ctx, &a, PreferredType::Number)?;
        let b = self.to_primitive(ctx, &b, PreferredType::Number)?;

        let result = if let (Some(x), Some(y)) = (a.as_string(), b.as_string()) {
            Some(x.as_str().cmp(y.as_str()))
        } else {
            let x = self.to_number_value(ctx, &a)?;
            let y = self.to_number_value(ctx, &b)?;
            x.partial_cmp(&y)
        };

        // NaN comparisons are always false
        let value = result.map(pick).unwrap_or(false);
        ctx.set_register(dst, Value::boolean(value));
        Ok(Step::Continue)
    }

    fn abstract_equal(
        &self,
        ctx: &mut VmContext,
        left: &Value,
        right: &Value,
        depth: usize,
    ) -> VmResult<bool> {
        if depth > MAX_ABSTRACT_EQUAL_DEPTH {
            return Err(VmError::internal("abstract equality recursion limit"));
        }
        if left.is_nullish() && right.is_nullish() {
            return Ok(true);
        }
        let left_prim = !left.is_object();
        let right_prim = !right.is_object();
        if left_prim && right_prim {
            if left.is_nullish() || right.is_nullish() {
                return Ok(false);
            }
            if left.is_number() || right.is_number() || left.is_boolean() || right.is_boolean() {
                let a = self.to_number_value(ctx, left)?;
                let b = self.to_number_value(ctx, right)?;
                return Ok(a == b);
            }
            return Ok(left.strict_equals(right));
        }
        if left_prim != right_prim {
            let (obj, prim) = if left_prim { (right, left) } else { (left, right) };
            if prim.is_nullish() {
                return Ok(false);
            }
            let converted = self.to_primitive(ctx, obj, PreferredType::Default)?;
            return self.abstract_equal(ctx, &converted, prim, depth + 1);
        }
        Ok(left.strict_equals(right))
    }

    fn instance_of(&self, obj: &Value, ctor: &Value) -> VmResult<bool> {
        if !ctor.is_callable() {
            return Err(VmError::type_error(
                "Right-hand side of 'instanceof' is not callable",
            ));
        }
        let prototype = ctor
            .as_object()
            .and_then(|o| o.get(&PropertyKey::string("prototype")));
        let Some(prototype) = prototype.filter(|p| p.is_object()) else {
            return Ok(false);
        };

        let mut current = obj.as_object().map(|o| o.prototype());
        while let Some(proto) = current {
            if proto.is_null() {
                return Ok(false);
            }
            if proto.strict_equals(&prototype) {
                return Ok(true);
            }
            current = proto.as_object().map(|o| o.prototype());
        }
        Ok(false)
    }

    /// ToPrimitive: already-primitive values pass through; objects try
    /// valueOf then toString (reversed for the string hint).
    pub fn to_primitive(
        &self,
        ctx: &mut VmContext,
        value: &Value,
        hint: PreferredType,
    ) -> VmResult<Value> {
        if !value.is_object() {
            return Ok(value.clone());
        }
        let methods: [&str; 2] = match hint {
            PreferredType::String => ["toString", "valueOf"],
            _ => ["valueOf", "toString"],
        };
        for name in methods {
            let method = self.get_property(ctx, value, &PropertyKey::string(name), None)?;
            if method.is_callable() {
                let result = self.call_function(ctx, &method, value.clone(), &[])?;
                if !result.is_object() {
                    return Ok(result);
                }
            }
        }
        // Arrays without an overridden toString render their elements
        if let Some(array) = value.as_array() {
            let parts: Vec<String> = array
                .elements_vec()
                .iter()
                .map(convert::to_display_string)
                .collect();
            return Ok(Value::str(&parts.join(",")));
        }
        Err(VmError::type_error(
            "Cannot convert object to primitive value",
        ))
    }

    /// ToNumber through ToPrimitive
    pub fn to_number_value(&self, ctx: &mut VmContext, value: &Value) -> VmResult<f64> {
        if value.is_object() {
            let prim = self.to_primitive(ctx, value, PreferredType::Number)?;
            return Ok(convert::to_number(&prim));
        }
        Ok(convert::to_number(value))
    }

    /// ToString through ToPrimitive
    pub fn to_string_value(&self, ctx: &mut VmContext, value: &Value) -> VmResult<String> {
        if value.is_object() {
            let prim = self.to_primitive(ctx, value, PreferredType::String)?;
            return Ok(convert::to_display_string(&prim));
        }
        Ok(convert::to_display_string(value))
    }

    fn value_to_property_key(&self, ctx: &mut VmContext, value: &Value) -> VmResult<PropertyKey> {
        if let Some(sym) = value.as_symbol() {
            return Ok(PropertyKey::Symbol(sym.id));
        }
        if let Some(i) = value.as_int32() {
            if i >= 0 {
                return Ok(PropertyKey::Index(i as u32));
            }
        }
        let s = self.to_string_value(ctx, value)?;
        Ok(PropertyKey::string(&s))
    }

    fn property_key_to_value(&self, key: &PropertyKey) -> Value {
        match key {
            PropertyKey::String(s) => Value::string(s.clone()),
            PropertyKey::Index(i) => Value::int32(*i as i32),
            PropertyKey::Symbol(id) => Value::str(&format!("Symbol({})", id)),
        }
    }

    // ================================================================
    // Values from constants, closures, errors
    // ================================================================

    fn constant_str(&self, program: &Arc<Program>, index: u32) -> VmResult<String> {
        program
            .constants
            .get(index)
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| VmError::internal(format!("constant {} is not a string", index)))
    }

    fn constant_to_value(
        &self,
        ctx: &mut VmContext,
        program: &Arc<Program>,
        index: u32,
    ) -> VmResult<Value> {
        use paserati_bytecode::Constant;
        let constant = program
            .constants
            .get(index)
            .ok_or_else(|| VmError::internal(format!("constant {} out of bounds", index)))?;
        Ok(match constant {
            Constant::Number(n) => Value::number(*n),
            Constant::String(s) => Value::str(s),
            Constant::BigInt(digits) => Value::bigint_from_str(digits),
            Constant::RegExp { pattern, flags } => {
                let obj = Arc::new(JsObject::new(Value::null()));
                obj.set(PropertyKey::string("source"), Value::str(pattern));
                obj.set(PropertyKey::string("flags"), Value::str(flags));
                Value::object(obj)
            }
            Constant::Symbol(id) => Value::symbol(ctx.symbol_for_constant(program, *id)),
        })
    }

    fn make_closure(
        &self,
        ctx: &mut VmContext,
        program: &Arc<Program>,
        chunk_index: u32,
    ) -> VmResult<Value> {
        let chunk = program
            .chunk(chunk_index)
            .ok_or_else(|| VmError::internal("closure chunk out of bounds"))?;

        let mut upvalues = Vec::with_capacity(chunk.upvalues.len());
        for capture in &chunk.upvalues {
            let cell = match capture {
                paserati_bytecode::UpvalueCapture::Local(idx) => ctx.capture_local(idx.0)?,
                paserati_bytecode::UpvalueCapture::Upvalue(idx) => ctx.upvalue_cell(idx.0)?,
            };
            upvalues.push(cell);
        }

        let captured_this = if chunk.is_arrow() {
            Some(
                ctx.current_frame()
                    .map(|f| f.this_value.clone())
                    .unwrap_or_else(Value::undefined),
            )
        } else {
            None
        };

        let object = Arc::new(JsObject::new(Value::null()));
        object.define_property(
            PropertyKey::string("name"),
            PropertySlot::data_with_attrs(
                Value::str(chunk.display_name()),
                PropertyAttributes::hidden(),
            ),
        );
        object.define_property(
            PropertyKey::string("length"),
            PropertySlot::data_with_attrs(
                Value::int32(chunk.param_count as i32),
                PropertyAttributes::hidden(),
            ),
        );

        let is_arrow = chunk.is_arrow();
        let closure = Value::new_closure(
            chunk_index,
            program.clone(),
            upvalues,
            captured_this,
            object.clone(),
        );

        if !is_arrow {
            let prototype = Arc::new(JsObject::new(self.default_prototype(ctx, "Object")));
            prototype.define_property(
                PropertyKey::string("constructor"),
                PropertySlot::data_with_attrs(closure.clone(), PropertyAttributes::hidden()),
            );
            object.define_property(
                PropertyKey::string("prototype"),
                PropertySlot::data_with_attrs(
                    Value::object(prototype),
                    PropertyAttributes::hidden(),
                ),
            );
        }

        Ok(closure)
    }

    /// Build a thrown error object `{name, message, stack}`, using a
    /// host-registered constructor's prototype when available.
    pub fn make_error(&self, ctx: &mut VmContext, name: &str, message: &str) -> Value {
        let proto = self.default_prototype(ctx, name);
        let error = Arc::new(JsObject::new(proto));
        error.set(PropertyKey::string("name"), Value::str(name));
        error.set(PropertyKey::string("message"), Value::str(message));
        let stack = ctx
            .stack_trace()
            .iter()
            .map(|f| {
                format!(
                    "    at {} ({}:{}:{})",
                    f.function_name, f.origin, f.line, f.column
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        error.set(
            PropertyKey::string("stack"),
            Value::str(&format!("{}: {}\n{}", name, message, stack)),
        );
        Value::object(error)
    }

    fn new_array_from(&self, ctx: &mut VmContext, values: Vec<Value>) -> Value {
        let array = Arc::new(JsObject::array(0, self.default_prototype(ctx, "Array")));
        for v in values {
            array.push_element(v);
        }
        Value::array(array)
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}
