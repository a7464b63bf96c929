//! VM execution context
//!
//! The context owns per-execution state: the contiguous register stack
//! and the frame windows carved from it, the handler stack, open
//! upvalues, the job queue, and the GC root set.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use paserati_bytecode::{HandlerKind, Program};
use paserati_gc::object::tags;
use paserati_gc::{Collector, GcHeader, GcHeap, GcObject, Tracer};

use crate::completion::Completion;
use crate::error::{StackFrame, VmError, VmResult};
use crate::generator::JsGenerator;
use crate::ic::{FeedbackVector, InlineCache};
use crate::object::{JsObject, PropertyKey};
use crate::promise::JsPromise;
use crate::symbol::JsSymbol;
use crate::value::{UpvalueCell, Value};

/// Maximum call stack depth; exceeding it surfaces as a catchable
/// RangeError through the normal unwinding path
pub const MAX_STACK_DEPTH: usize = 1024;

/// A call frame: a register window plus pc, handler bookkeeping, and
/// caller linkage
#[derive(Debug)]
pub struct CallFrame {
    /// Chunk being executed
    pub chunk_index: u32,
    /// Program the chunk belongs to
    pub program: Arc<Program>,
    /// Program counter (instruction index)
    pub pc: usize,
    /// First register of this frame's window
    pub register_base: usize,
    /// Window size
    pub window: usize,
    /// Local variable slots
    pub locals: Vec<Value>,
    /// Captured upvalue cells
    pub upvalues: Vec<UpvalueCell>,
    /// Caller register receiving the return value
    pub return_register: Option<u16>,
    /// `new` invocation?
    pub is_construct: bool,
    /// The frame's `this`
    pub this_value: Value,
    /// Pending finally completions, innermost last
    pub pending_completions: Vec<Completion>,
    /// Unique id for open-upvalue tracking
    pub frame_id: usize,
}

/// An installed exception handler
#[derive(Debug, Clone)]
pub struct Handler {
    /// Catch or finally
    pub kind: HandlerKind,
    /// Absolute pc of the handler body
    pub handler_pc: usize,
    /// Stack depth of the owning frame
    pub frame_depth: usize,
}

/// Everything needed to push a frame
pub struct FramePlan {
    /// Chunk to execute
    pub chunk_index: u32,
    /// Owning program
    pub program: Arc<Program>,
    /// Caller register for the result
    pub return_register: Option<u16>,
    /// `new` invocation?
    pub is_construct: bool,
    /// Receiver
    pub this_value: Value,
    /// Captured cells
    pub upvalues: Vec<UpvalueCell>,
    /// Call arguments
    pub args: Vec<Value>,
}

/// A deferred unit of work drained between turns (the microtask queue's
/// VM-facing half)
pub enum VmJob {
    /// Resume an async function driver with a settlement
    DriveAsync {
        /// The suspended async body
        generator: Arc<JsGenerator>,
        /// The promise the async function returned
        result_promise: Arc<JsPromise>,
        /// The settlement being delivered
        input: Result<Value, Value>,
    },
    /// Call a script function with arguments (promise reactions)
    Call {
        /// The callback
        func: Value,
        /// Receiver
        this: Value,
        /// Arguments
        args: Vec<Value>,
        /// Promise to settle with the call outcome, if any
        target: Option<Arc<JsPromise>>,
    },
    /// Arbitrary host work running with VM access
    Native(Box<dyn FnOnce(&crate::interpreter::Interpreter, &mut VmContext) -> VmResult<()> + Send>),
}

impl std::fmt::Debug for VmJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DriveAsync { .. } => write!(f, "VmJob::DriveAsync"),
            Self::Call { .. } => write!(f, "VmJob::Call"),
            Self::Native(_) => write!(f, "VmJob::Native"),
        }
    }
}

/// FIFO of [`VmJob`]s, shared with promise reactions
pub struct JobQueue {
    queue: Mutex<VecDeque<VmJob>>,
}

impl JobQueue {
    /// Create an empty queue
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
        })
    }

    /// Append a job
    pub fn enqueue(&self, job: VmJob) {
        self.queue.lock().push_back(job);
    }

    /// Take the next job
    pub fn pop(&self) -> Option<VmJob> {
        self.queue.lock().pop_front()
    }

    /// Anything queued?
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Number of queued jobs
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }
}

/// Guard marking a native-call boundary. The sentinel must be cleared on
/// every exit path — success, script throw, or native error — which the
/// Drop impl guarantees.
pub struct NativeBoundary {
    depth: Arc<AtomicUsize>,
}

impl Drop for NativeBoundary {
    fn drop(&mut self) {
        self.depth.fetch_sub(1, Ordering::SeqCst);
    }
}

/// VM execution context
pub struct VmContext {
    gc_root: GcHeader,
    /// Contiguous register stack; frames are windows into it
    registers: Vec<Value>,
    call_stack: Vec<CallFrame>,
    global: Arc<JsObject>,
    exception: Option<Value>,
    handler_stack: Vec<Handler>,
    /// Open upvalues keyed by (frame id, local index); closures over the
    /// same binding share one cell
    open_upvalues: FxHashMap<(usize, u16), UpvalueCell>,
    next_frame_id: usize,
    /// Per-(program, chunk) inline-cache feedback
    feedback: FxHashMap<(usize, u32), FeedbackVector>,
    /// Runtime symbols backing compile-time symbol constants
    const_symbols: FxHashMap<(usize, u64), Arc<JsSymbol>>,
    /// Deferred work (microtasks)
    jobs: Arc<JobQueue>,
    /// Native-boundary sentinel depth
    native_depth: Arc<AtomicUsize>,
    /// Host-set interrupt flag
    interrupt_flag: Arc<AtomicBool>,
    /// GC plumbing
    heap: Arc<GcHeap>,
    collector: Collector,
    ephemerons: Vec<std::sync::Weak<crate::map_set::EphemeronMap>>,
    /// Values kept alive by the host between turns
    host_roots: Vec<Value>,
}

impl VmContext {
    /// Create a context with a fresh global object
    pub fn new() -> Self {
        let heap = GcHeap::new();
        Self {
            gc_root: GcHeader::new(tags::OBJECT),
            registers: Vec::with_capacity(1024),
            call_stack: Vec::with_capacity(64),
            global: Arc::new(JsObject::new(Value::null())),
            exception: None,
            handler_stack: Vec::new(),
            open_upvalues: FxHashMap::default(),
            next_frame_id: 0,
            feedback: FxHashMap::default(),
            const_symbols: FxHashMap::default(),
            jobs: JobQueue::new(),
            native_depth: Arc::new(AtomicUsize::new(0)),
            interrupt_flag: Arc::new(AtomicBool::new(false)),
            collector: Collector::new(heap.clone()),
            heap,
            ephemerons: Vec::new(),
            host_roots: Vec::new(),
        }
    }

    /// The global object
    pub fn global(&self) -> &Arc<JsObject> {
        &self.global
    }

    /// Read a global binding
    pub fn get_global(&self, name: &str) -> Option<Value> {
        self.global.get(&PropertyKey::string(name))
    }

    /// Write a global binding
    pub fn set_global(&self, name: &str, value: Value) {
        self.global.set(PropertyKey::string(name), value);
    }

    /// The job queue (shared with promise reactions)
    pub fn jobs(&self) -> &Arc<JobQueue> {
        &self.jobs
    }

    /// Keep a value alive across turns on behalf of the host
    pub fn add_host_root(&mut self, value: Value) {
        self.host_roots.push(value);
    }

    // ---- registers ----

    /// Read a register in the current frame's window
    #[inline]
    pub fn get_register(&self, index: u16) -> &Value {
        let base = self
            .call_stack
            .last()
            .map(|f| f.register_base)
            .unwrap_or(0);
        &self.registers[base + index as usize]
    }

    /// Write a register in the current frame's window
    #[inline]
    pub fn set_register(&mut self, index: u16, value: Value) {
        let base = self
            .call_stack
            .last()
            .map(|f| f.register_base)
            .unwrap_or(0);
        self.registers[base + index as usize] = value;
    }

    /// Copy `count` registers starting at `first` (call argument spans)
    pub fn register_span(&self, first: u16, count: usize) -> Vec<Value> {
        let base = self
            .call_stack
            .last()
            .map(|f| f.register_base)
            .unwrap_or(0);
        let start = base + first as usize;
        self.registers[start..start + count].to_vec()
    }

    // ---- locals ----

    /// Read a local slot
    #[inline]
    pub fn get_local(&self, index: u16) -> VmResult<Value> {
        let frame = self
            .current_frame()
            .ok_or_else(|| VmError::internal("no call frame"))?;
        frame
            .locals
            .get(index as usize)
            .cloned()
            .ok_or_else(|| VmError::internal(format!("local index {} out of bounds", index)))
    }

    /// Write a local slot, keeping any open upvalue cell in sync
    #[inline]
    pub fn set_local(&mut self, index: u16, value: Value) -> VmResult<()> {
        let frame = self
            .call_stack
            .last_mut()
            .ok_or_else(|| VmError::internal("no call frame"))?;
        if (index as usize) >= frame.locals.len() {
            return Err(VmError::internal(format!(
                "local index {} out of bounds",
                index
            )));
        }
        frame.locals[index as usize] = value.clone();
        let frame_id = frame.frame_id;
        if let Some(cell) = self.open_upvalues.get(&(frame_id, index)) {
            cell.set(value);
        }
        Ok(())
    }

    // ---- upvalues ----

    /// Read an upvalue of the current frame
    #[inline]
    pub fn get_upvalue(&self, index: u16) -> VmResult<Value> {
        let frame = self
            .current_frame()
            .ok_or_else(|| VmError::internal("no call frame"))?;
        frame
            .upvalues
            .get(index as usize)
            .map(|cell| cell.get())
            .ok_or_else(|| VmError::internal(format!("upvalue index {} out of bounds", index)))
    }

    /// Write an upvalue of the current frame
    #[inline]
    pub fn set_upvalue(&self, index: u16, value: Value) -> VmResult<()> {
        let frame = self
            .current_frame()
            .ok_or_else(|| VmError::internal("no call frame"))?;
        let cell = frame
            .upvalues
            .get(index as usize)
            .ok_or_else(|| VmError::internal(format!("upvalue index {} out of bounds", index)))?;
        cell.set(value);
        Ok(())
    }

    /// The upvalue cell itself (for transitive capture)
    pub fn upvalue_cell(&self, index: u16) -> VmResult<UpvalueCell> {
        let frame = self
            .current_frame()
            .ok_or_else(|| VmError::internal("no call frame"))?;
        frame
            .upvalues
            .get(index as usize)
            .cloned()
            .ok_or_else(|| VmError::internal(format!("upvalue index {} out of bounds", index)))
    }

    /// Get or create the shared open-upvalue cell for a local of the
    /// current frame. All closures capturing the binding get this cell.
    pub fn capture_local(&mut self, local_idx: u16) -> VmResult<UpvalueCell> {
        let frame = self
            .current_frame()
            .ok_or_else(|| VmError::internal("no call frame"))?;
        let key = (frame.frame_id, local_idx);
        if let Some(cell) = self.open_upvalues.get(&key) {
            return Ok(cell.clone());
        }
        let value = self.get_local(local_idx)?;
        let cell = UpvalueCell::new(value);
        self.open_upvalues.insert(key, cell.clone());
        Ok(cell)
    }

    /// Close the upvalue for a local leaving scope: snapshot the current
    /// value into the cell and detach it, so the next loop iteration (or
    /// scope entry) gets a fresh binding.
    pub fn close_upvalue(&mut self, local_idx: u16) -> VmResult<()> {
        let frame = self
            .current_frame()
            .ok_or_else(|| VmError::internal("no call frame"))?;
        let key = (frame.frame_id, local_idx);
        if let Some(cell) = self.open_upvalues.get(&key) {
            let value = self.get_local(local_idx)?;
            cell.set(value);
        }
        self.open_upvalues.remove(&key);
        Ok(())
    }

    // ---- frames ----

    /// Push a call frame
    pub fn push_frame(&mut self, plan: FramePlan) -> VmResult<()> {
        if self.call_stack.len() >= MAX_STACK_DEPTH {
            return Err(VmError::StackOverflow);
        }

        let chunk = plan
            .program
            .chunk(plan.chunk_index)
            .ok_or_else(|| VmError::internal("chunk index out of bounds"))?;

        let register_base = self
            .call_stack
            .last()
            .map(|f| f.register_base + f.window)
            .unwrap_or(0);
        let window = chunk.register_count as usize;

        let needed = register_base + window;
        if needed > self.registers.len() {
            self.registers.resize(needed, Value::undefined());
        }

        let param_count = chunk.param_count as usize;
        let mut locals = vec![Value::undefined(); chunk.local_count as usize];
        let mut args = plan.args;
        if chunk.flags.has_rest {
            let rest: Vec<Value> = if args.len() > param_count {
                args.drain(param_count..).collect()
            } else {
                Vec::new()
            };
            let rest_arr = Arc::new(JsObject::array(0, Value::null()));
            for v in rest {
                rest_arr.push_element(v);
            }
            if param_count < locals.len() {
                locals[param_count] = Value::array(rest_arr);
            }
        }
        for (i, arg) in args.into_iter().enumerate() {
            if i >= param_count {
                break;
            }
            if i < locals.len() {
                locals[i] = arg;
            }
        }

        let frame_id = self.next_frame_id;
        self.next_frame_id += 1;

        self.call_stack.push(CallFrame {
            chunk_index: plan.chunk_index,
            program: plan.program,
            pc: 0,
            register_base,
            window,
            locals,
            upvalues: plan.upvalues,
            return_register: plan.return_register,
            is_construct: plan.is_construct,
            this_value: plan.this_value,
            pending_completions: Vec::new(),
            frame_id,
        });

        Ok(())
    }

    /// Pop the current frame, pruning its handlers and open upvalues
    pub fn pop_frame(&mut self) -> Option<CallFrame> {
        let frame = self.call_stack.pop()?;
        let depth = self.call_stack.len();
        self.handler_stack.retain(|h| h.frame_depth <= depth);
        let frame_id = frame.frame_id;
        self.open_upvalues.retain(|(fid, _), _| *fid != frame_id);
        Some(frame)
    }

    /// Current frame
    #[inline]
    pub fn current_frame(&self) -> Option<&CallFrame> {
        self.call_stack.last()
    }

    /// Current frame, mutably
    #[inline]
    pub fn current_frame_mut(&mut self) -> Option<&mut CallFrame> {
        self.call_stack.last_mut()
    }

    /// Current pc
    #[inline]
    pub fn pc(&self) -> usize {
        self.current_frame().map(|f| f.pc).unwrap_or(0)
    }

    /// Set the current pc
    #[inline]
    pub fn set_pc(&mut self, pc: usize) {
        if let Some(frame) = self.current_frame_mut() {
            frame.pc = pc;
        }
    }

    /// Advance pc by one
    #[inline]
    pub fn advance_pc(&mut self) {
        if let Some(frame) = self.current_frame_mut() {
            frame.pc += 1;
        }
    }

    /// Relative jump
    #[inline]
    pub fn jump(&mut self, offset: i32) {
        if let Some(frame) = self.current_frame_mut() {
            frame.pc = (frame.pc as i64 + offset as i64) as usize;
        }
    }

    /// Call stack depth
    pub fn stack_depth(&self) -> usize {
        self.call_stack.len()
    }

    /// The call stack (for inspection)
    pub fn call_stack(&self) -> &[CallFrame] {
        &self.call_stack
    }

    // ---- exception & handlers ----

    /// The in-flight exception
    pub fn exception(&self) -> Option<&Value> {
        self.exception.as_ref()
    }

    /// Set the in-flight exception
    pub fn set_exception(&mut self, value: Value) {
        self.exception = Some(value);
    }

    /// Take the in-flight exception
    pub fn take_exception(&mut self) -> Option<Value> {
        self.exception.take()
    }

    /// Install a handler owned by the current frame
    pub fn push_handler(&mut self, kind: HandlerKind, handler_pc: usize) {
        self.handler_stack.push(Handler {
            kind,
            handler_pc,
            frame_depth: self.call_stack.len(),
        });
    }

    /// Uninstall the most recent handler
    pub fn pop_handler(&mut self) -> Option<Handler> {
        self.handler_stack.pop()
    }

    /// Take the innermost handler anywhere on the stack
    pub fn take_nearest_handler(&mut self) -> Option<Handler> {
        self.handler_stack.pop()
    }

    /// Take the innermost handler belonging to the current frame and of
    /// kind Finally (for return-crossing-finally); discards any catch
    /// handlers of the current frame above it.
    pub fn take_finally_in_current_frame(&mut self) -> Option<Handler> {
        let depth = self.call_stack.len();
        while let Some(top) = self.handler_stack.last() {
            if top.frame_depth != depth {
                return None;
            }
            let handler = self.handler_stack.pop()?;
            if handler.kind == HandlerKind::Finally {
                return Some(handler);
            }
        }
        None
    }

    /// Handlers owned by the current frame, innermost last (generator
    /// suspension). The entries stay installed.
    pub fn handlers_for_current_frame(&self) -> Vec<Handler> {
        let depth = self.call_stack.len();
        self.handler_stack
            .iter()
            .filter(|h| h.frame_depth == depth)
            .cloned()
            .collect()
    }

    /// Drop the current frame's handlers (generator suspension detaches
    /// them along with the frame)
    pub fn drop_handlers_for_current_frame(&mut self) {
        let depth = self.call_stack.len();
        self.handler_stack.retain(|h| h.frame_depth != depth);
    }

    // ---- feedback & symbols ----

    /// The inline cache for an access site
    pub fn feedback_cache(
        &mut self,
        program: &Arc<Program>,
        chunk_index: u32,
        ic: u16,
    ) -> Option<&mut InlineCache> {
        let key = (Arc::as_ptr(program) as usize, chunk_index);
        let vector = self.feedback.entry(key).or_insert_with(|| {
            let count = program
                .chunk(chunk_index)
                .map(|c| c.ic_count)
                .unwrap_or(0);
            FeedbackVector::new(count)
        });
        vector.cache(ic)
    }

    /// The runtime symbol for a compile-time symbol constant
    pub fn symbol_for_constant(&mut self, program: &Arc<Program>, symbol_id: u64) -> Arc<JsSymbol> {
        let key = (Arc::as_ptr(program) as usize, symbol_id);
        self.const_symbols
            .entry(key)
            .or_insert_with(|| JsSymbol::new(None))
            .clone()
    }

    // ---- native boundary ----

    /// Enter a native call; the returned guard clears the sentinel on
    /// every exit path
    pub fn enter_native(&self) -> NativeBoundary {
        self.native_depth.fetch_add(1, Ordering::SeqCst);
        NativeBoundary {
            depth: Arc::clone(&self.native_depth),
        }
    }

    /// Inside a native call?
    pub fn in_native(&self) -> bool {
        self.native_depth.load(Ordering::SeqCst) > 0
    }

    // ---- interrupts ----

    /// The interrupt flag, for host-side cancellation
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt_flag)
    }

    /// Interrupted?
    #[inline]
    pub fn is_interrupted(&self) -> bool {
        self.interrupt_flag.load(Ordering::Relaxed)
    }

    // ---- diagnostics ----

    /// Stack trace of the current frames, innermost first
    pub fn stack_trace(&self) -> Vec<StackFrame> {
        self.call_stack
            .iter()
            .rev()
            .map(|frame| {
                let chunk = frame.program.chunk(frame.chunk_index);
                let name = chunk
                    .map(|c| c.display_name().to_string())
                    .unwrap_or_else(|| "<unknown>".to_string());
                let (line, column) = chunk
                    .and_then(|c| c.source_map.find(frame.pc.min(u32::MAX as usize) as u32))
                    .map(|e| (e.line, e.column))
                    .unwrap_or((0, 0));
                StackFrame {
                    function_name: name,
                    origin: frame.program.origin.clone(),
                    line,
                    column,
                }
            })
            .collect()
    }

    // ---- GC ----

    /// Register a WeakMap backing store for ephemeron collection
    pub fn register_ephemeron(&mut self, table: &Arc<crate::map_set::EphemeronMap>) {
        self.ephemerons.push(Arc::downgrade(table));
    }

    /// Run a mark cycle if the heap crossed its threshold
    pub fn maybe_collect_garbage(&mut self) {
        if self.heap.should_gc() {
            self.collect_garbage();
        }
    }

    /// Run a mark cycle over the root set: registers, frames, globals,
    /// the job queue, and host roots; then sweep ephemerons.
    pub fn collect_garbage(&mut self) {
        self.ephemerons.retain(|w| w.strong_count() > 0);
        let strong: Vec<Arc<crate::map_set::EphemeronMap>> = self
            .ephemerons
            .iter()
            .filter_map(|w| w.upgrade())
            .collect();
        let tables: Vec<&dyn paserati_gc::EphemeronTable> = strong
            .iter()
            .map(|t| t.as_ref() as &dyn paserati_gc::EphemeronTable)
            .collect();

        // Move the collector out so the context can serve as the root
        // object (`trace` below walks every register, frame, global, and
        // queued job) while the collector holds no borrow of it.
        let mut collector =
            std::mem::replace(&mut self.collector, Collector::new(self.heap.clone()));
        {
            let root = RootView(self);
            collector.collect(&[&root], &tables);
        }
        self.collector = collector;
    }

    /// The heap accounting handle
    pub fn heap(&self) -> &Arc<GcHeap> {
        &self.heap
    }

    /// Teardown: break reference cycles reachable through the global
    /// object. Script-created cycles are reference-counted, so this
    /// best-effort sweep is what releases them at end of life.
    pub fn teardown(&mut self) {
        for key in self.global.own_keys() {
            self.global.set(key, Value::undefined());
        }
        self.host_roots.clear();
        while self.jobs.pop().is_some() {}
        self.feedback.clear();
    }
}

/// Borrow of the context presented to the collector as a single root
struct RootView<'a>(&'a VmContext);

impl GcObject for RootView<'_> {
    fn header(&self) -> &GcHeader {
        &self.0.gc_root
    }

    fn trace(&self, tracer: &mut Tracer) {
        let ctx = self.0;
        let live = ctx
            .call_stack
            .last()
            .map(|f| f.register_base + f.window)
            .unwrap_or(0);
        for v in ctx.registers.iter().take(live) {
            v.trace(tracer);
        }
        for frame in &ctx.call_stack {
            frame.this_value.trace(tracer);
            for v in &frame.locals {
                v.trace(tracer);
            }
            for cell in &frame.upvalues {
                cell.get().trace(tracer);
            }
            for completion in &frame.pending_completions {
                match completion {
                    Completion::Return(v) | Completion::Throw(v) => v.trace(tracer),
                    _ => {}
                }
            }
        }
        tracer.mark(ctx.global.as_ref());
        if let Some(exc) = &ctx.exception {
            exc.trace(tracer);
        }
        for cell in ctx.open_upvalues.values() {
            cell.get().trace(tracer);
        }
        for v in &ctx.host_roots {
            v.trace(tracer);
        }
        for job in ctx.jobs.queue.lock().iter() {
            match job {
                VmJob::DriveAsync {
                    generator,
                    result_promise,
                    input,
                } => {
                    tracer.mark(generator.as_ref());
                    tracer.mark(result_promise.as_ref());
                    match input {
                        Ok(v) | Err(v) => v.trace(tracer),
                    }
                }
                VmJob::Call {
                    func, this, args, target,
                } => {
                    func.trace(tracer);
                    this.trace(tracer);
                    for a in args {
                        a.trace(tracer);
                    }
                    if let Some(p) = target {
                        tracer.mark(p.as_ref());
                    }
                }
                VmJob::Native(_) => {}
            }
        }
    }
}

impl Default for VmContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for VmContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmContext")
            .field("stack_depth", &self.call_stack.len())
            .field("handlers", &self.handler_stack.len())
            .field("has_exception", &self.exception.is_some())
            .finish()
    }
}

/// What natives see: the context plus reentry into the interpreter.
pub struct NativeContext<'a> {
    /// The interpreter, for reentrant calls
    pub interpreter: &'a crate::interpreter::Interpreter,
    /// The execution context
    pub ctx: &'a mut VmContext,
}

impl NativeContext<'_> {
    /// The global object
    pub fn global(&self) -> &Arc<JsObject> {
        self.ctx.global()
    }

    /// Reenter the VM: call a script (or native) function
    pub fn call_function(&mut self, func: &Value, this: Value, args: &[Value]) -> VmResult<Value> {
        self.interpreter.call_function(self.ctx, func, this, args)
    }

    /// Enqueue a deferred job (runs at the next microtask drain)
    pub fn enqueue_job(&self, job: VmJob) {
        self.ctx.jobs().enqueue(job);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paserati_bytecode::{Chunk, Instruction, Register};

    fn one_chunk_program() -> Arc<Program> {
        let mut builder = Program::builder("test.ts");
        builder.add_chunk(
            Chunk::builder()
                .register_count(8)
                .local_count(4)
                .instruction(Instruction::ReturnUndefined)
                .build(),
        );
        Arc::new(builder.build())
    }

    fn plan(program: Arc<Program>) -> FramePlan {
        FramePlan {
            chunk_index: 0,
            program,
            return_register: None,
            is_construct: false,
            this_value: Value::undefined(),
            upvalues: Vec::new(),
            args: Vec::new(),
        }
    }

    #[test]
    fn test_register_windows_do_not_overlap() {
        let program = one_chunk_program();
        let mut ctx = VmContext::new();
        ctx.push_frame(plan(program.clone())).unwrap();
        ctx.set_register(0, Value::int32(1));

        ctx.push_frame(plan(program)).unwrap();
        ctx.set_register(0, Value::int32(2));
        assert_eq!(ctx.get_register(0).as_int32(), Some(2));

        ctx.pop_frame();
        assert_eq!(ctx.get_register(0).as_int32(), Some(1));
    }

    #[test]
    fn test_stack_overflow() {
        let program = one_chunk_program();
        let mut ctx = VmContext::new();
        for _ in 0..MAX_STACK_DEPTH {
            ctx.push_frame(plan(program.clone())).unwrap();
        }
        let result = ctx.push_frame(plan(program));
        assert!(matches!(result, Err(VmError::StackOverflow)));
    }

    #[test]
    fn test_open_upvalue_shared_and_closed() {
        let program = one_chunk_program();
        let mut ctx = VmContext::new();
        ctx.push_frame(plan(program)).unwrap();

        ctx.set_local(0, Value::int32(10)).unwrap();
        let cell_a = ctx.capture_local(0).unwrap();
        let cell_b = ctx.capture_local(0).unwrap();

        // Both captures see writes to the local
        ctx.set_local(0, Value::int32(11)).unwrap();
        assert_eq!(cell_a.get().as_int32(), Some(11));
        assert_eq!(cell_b.get().as_int32(), Some(11));

        // After closing, the binding is detached: future captures get a
        // fresh cell
        ctx.close_upvalue(0).unwrap();
        ctx.set_local(0, Value::int32(12)).unwrap();
        assert_eq!(cell_a.get().as_int32(), Some(11));
    }

    #[test]
    fn test_handler_pruned_on_pop() {
        let program = one_chunk_program();
        let mut ctx = VmContext::new();
        ctx.push_frame(plan(program.clone())).unwrap();
        ctx.push_frame(plan(program)).unwrap();
        ctx.push_handler(HandlerKind::Catch, 5);

        ctx.pop_frame();
        assert!(ctx.take_nearest_handler().is_none());
    }

    #[test]
    fn test_native_boundary_guard_clears() {
        let ctx = VmContext::new();
        assert!(!ctx.in_native());
        {
            let _guard = ctx.enter_native();
            assert!(ctx.in_native());
        }
        assert!(!ctx.in_native());
    }
}
