//! Code generation state
//!
//! Register allocation, per-function emission buffers, lexical scopes
//! with TDZ tracking, upvalue registration across the function stack,
//! and jump patching.

use rustc_hash::FxHashMap;

use paserati_bytecode::{
    Chunk, ChunkFlags, Constant, ConstantPool, ExceptionEntry, Instruction, JumpOffset, Program,
    Register, SourceMap, UpvalueCapture,
};

use crate::ast::{FunctionKind, Span, Stmt};

/// Greedy register allocator with a free list. Temporaries are taken and
/// released within a statement; `position`/`restore` reclaim everything a
/// statement allocated in one go.
#[derive(Debug, Default)]
pub struct RegisterAllocator {
    next: u16,
    free: Vec<u16>,
    max_used: u16,
}

impl RegisterAllocator {
    /// Create a fresh allocator
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate one register
    pub fn alloc(&mut self) -> Register {
        if let Some(reg) = self.free.pop() {
            return Register(reg);
        }
        let reg = self.next;
        self.next += 1;
        if self.next > self.max_used {
            self.max_used = self.next;
        }
        Register(reg)
    }

    /// Allocate `count` registers with consecutive indices (argument
    /// spans for calls). Never reuses freed registers, so the span is
    /// guaranteed contiguous.
    pub fn alloc_block(&mut self, count: u16) -> Register {
        let first = self.next;
        self.next += count;
        if self.next > self.max_used {
            self.max_used = self.next;
        }
        Register(first)
    }

    /// Release a register for reuse
    pub fn free(&mut self, reg: Register) {
        if reg.0 + 1 == self.next {
            self.next -= 1;
        } else {
            self.free.push(reg.0);
        }
    }

    /// Current high-water position
    pub fn position(&self) -> u16 {
        self.next
    }

    /// Roll back to a position, dropping the free-list entries above it
    pub fn restore(&mut self, pos: u16) {
        self.next = pos;
        self.free.retain(|&r| r < pos);
    }

    /// Highest register index ever used (the window size)
    pub fn max_used(&self) -> u16 {
        self.max_used
    }
}

/// A variable binding in a lexical scope
#[derive(Debug, Clone)]
pub struct Binding {
    /// Local slot
    pub index: u16,
    /// const?
    pub is_const: bool,
    /// Captured by some closure
    pub is_captured: bool,
    /// Declared with TDZ (let/const)
    pub tdz: bool,
    /// Still in the dead zone at the current compile point
    pub tdz_live: bool,
}

/// One lexical scope within a function
#[derive(Debug, Default)]
struct Scope {
    bindings: FxHashMap<String, Binding>,
    order: Vec<String>,
}

/// How a name resolved
#[derive(Debug, Clone)]
pub enum Resolved {
    /// A local in the current function
    Local {
        /// Slot index
        index: u16,
        /// const?
        is_const: bool,
        /// TDZ-declared?
        tdz: bool,
        /// Still dead at this compile point (a statically-known error
        /// for reads)
        tdz_live: bool,
    },
    /// Captured from an enclosing function
    Upvalue {
        /// Upvalue index in the current function
        index: u16,
        /// const?
        is_const: bool,
        /// TDZ-declared (runtime hole checks required)
        tdz: bool,
    },
    /// Unresolved: a module global
    Global(String),
}

/// Compile-time control-flow scopes, for break/continue lowering across
/// loops and protected regions
#[derive(Debug)]
pub enum ControlScope {
    /// A loop body
    Loop {
        /// Label, if any
        label: Option<String>,
        /// Jump indices to patch to the loop exit
        break_jumps: Vec<usize>,
        /// Jump indices to patch to the continue point
        continue_jumps: Vec<usize>,
        /// for-of iterator register; break crossing the loop closes it
        iter: Option<Register>,
    },
    /// A labeled non-loop statement (break only)
    LabeledBlock {
        /// Label name
        label: String,
        /// Jump indices to patch to the statement end
        break_jumps: Vec<usize>,
    },
    /// A try-with-finally region: break/continue crossing it run the
    /// finally body inline (a copy) after uninstalling the handler
    Finally {
        /// The finally body, re-compiled at each crossing exit
        body: Vec<Stmt>,
    },
    /// A switch body: unlabeled break targets it
    Switch {
        /// Jump indices to patch past the switch
        break_jumps: Vec<usize>,
    },
}

/// Per-function emission state
pub struct FunctionContext {
    /// Function name
    pub name: Option<String>,
    /// Function kind
    pub kind: FunctionKind,
    /// Emitted instructions
    pub instructions: Vec<Instruction>,
    /// Source map under construction
    pub source_map: SourceMap,
    /// Exception table under construction
    pub exception_table: Vec<ExceptionEntry>,
    /// Register allocator
    pub regs: RegisterAllocator,
    /// Upvalue descriptors
    pub upvalues: Vec<UpvalueCapture>,
    /// Declared parameter count
    pub param_count: u8,
    /// Rest parameter present
    pub has_rest: bool,
    /// Control-scope stack
    pub control: Vec<ControlScope>,
    /// Number of protected regions (try, for-of) lexically enclosing the
    /// current compile point; tail calls are disabled inside them
    pub handler_depth: usize,
    scopes: Vec<Scope>,
    next_local: u16,
    ic_count: u16,
    current_span: Span,
}

impl FunctionContext {
    fn new(name: Option<String>, kind: FunctionKind) -> Self {
        Self {
            name,
            kind,
            instructions: Vec::new(),
            source_map: SourceMap::new(),
            exception_table: Vec::new(),
            regs: RegisterAllocator::new(),
            upvalues: Vec::new(),
            param_count: 0,
            has_rest: false,
            control: Vec::new(),
            handler_depth: 0,
            scopes: vec![Scope::default()],
            next_local: 0,
            ic_count: 0,
            current_span: Span::default(),
        }
    }

    /// Emit an instruction, recording the current source span
    pub fn emit(&mut self, instruction: Instruction) -> usize {
        let pc = self.instructions.len();
        if self.current_span.line != 0 {
            self.source_map
                .add(pc as u32, self.current_span.line, self.current_span.column);
        }
        self.instructions.push(instruction);
        pc
    }

    /// Index of the next instruction
    pub fn current_index(&self) -> usize {
        self.instructions.len()
    }

    /// Patch a previously emitted jump to target `self.current_index()`
    /// relative to the jump instruction.
    pub fn patch_jump_to_here(&mut self, index: usize) {
        let offset = (self.current_index() as i64 - index as i64) as i32;
        self.patch_jump(index, offset);
    }

    /// Patch a jump's offset in place
    pub fn patch_jump(&mut self, index: usize, offset: i32) {
        let offset = JumpOffset(offset);
        match &mut self.instructions[index] {
            Instruction::Jump { offset: o }
            | Instruction::JumpIfTrue { offset: o, .. }
            | Instruction::JumpIfFalse { offset: o, .. }
            | Instruction::JumpIfNullish { offset: o, .. }
            | Instruction::JumpIfNotNullish { offset: o, .. }
            | Instruction::JumpIfEq { offset: o, .. }
            | Instruction::PushHandler { target: o, .. } => *o = offset,
            other => {
                debug_assert!(false, "patch_jump on non-jump {:?}", other);
            }
        }
    }

    /// Reserve an inline-cache slot
    pub fn alloc_ic(&mut self) -> u16 {
        let slot = self.ic_count;
        self.ic_count += 1;
        slot
    }

    /// Enter a nested lexical scope
    pub fn enter_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    /// Leave the current lexical scope, returning the locals of captured
    /// bindings so the caller can emit `CloseUpvalue` for each.
    pub fn exit_scope(&mut self) -> Vec<u16> {
        let scope = self.scopes.pop().unwrap_or_default();
        scope
            .order
            .iter()
            .filter_map(|name| {
                let binding = scope.bindings.get(name)?;
                if binding.is_captured {
                    Some(binding.index)
                } else {
                    None
                }
            })
            .collect()
    }

    /// Declare a binding in the current scope. Local slots are allocated
    /// at the function level so indices stay valid after block exit.
    /// Redeclaration in the same scope is last-wins for `var`, and the
    /// caller's responsibility to reject for let/const.
    pub fn declare(&mut self, name: &str, is_const: bool, tdz: bool) -> u16 {
        if let Some(scope) = self.scopes.last() {
            if let Some(existing) = scope.bindings.get(name) {
                return existing.index;
            }
        }
        let index = self.next_local;
        self.next_local += 1;
        let scope = self.scopes.last_mut().expect("scope stack empty");
        scope.bindings.insert(
            name.to_string(),
            Binding {
                index,
                is_const,
                is_captured: false,
                tdz,
                tdz_live: tdz,
            },
        );
        scope.order.push(name.to_string());
        index
    }

    /// Look up a binding in this function's scopes, innermost first
    fn lookup(&self, name: &str) -> Option<&Binding> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.bindings.get(name))
    }

    fn lookup_mut(&mut self, name: &str) -> Option<&mut Binding> {
        self.scopes
            .iter_mut()
            .rev()
            .find_map(|scope| scope.bindings.get_mut(name))
    }

    /// Mark a binding initialized: reads after this point are plain
    pub fn clear_tdz(&mut self, name: &str) {
        if let Some(binding) = self.lookup_mut(name) {
            binding.tdz_live = false;
        }
    }

    /// Locals of bindings captured in the current scope (for emitting
    /// per-iteration `CloseUpvalue` without leaving the scope)
    pub fn captured_in_current_scope(&self) -> Vec<u16> {
        self.scopes
            .last()
            .map(|scope| {
                scope
                    .order
                    .iter()
                    .filter_map(|name| {
                        let binding = scope.bindings.get(name)?;
                        if binding.is_captured {
                            Some(binding.index)
                        } else {
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Was this name declared in the current (innermost) scope?
    pub fn declared_in_current_scope(&self, name: &str) -> bool {
        self.scopes
            .last()
            .map(|s| s.bindings.contains_key(name))
            .unwrap_or(false)
    }

    /// Number of locals allocated so far
    pub fn local_count(&self) -> u16 {
        self.next_local
    }

    fn add_upvalue(&mut self, capture: UpvalueCapture) -> u16 {
        for (i, existing) in self.upvalues.iter().enumerate() {
            if *existing == capture {
                return i as u16;
            }
        }
        let index = self.upvalues.len() as u16;
        self.upvalues.push(capture);
        index
    }
}

/// Whole-compilation code generation state: the function stack, the
/// constant pool, finished chunks, and private-name scopes.
pub struct CodeGen {
    functions: Vec<FunctionContext>,
    chunks: Vec<Chunk>,
    constants: ConstantPool,
    /// #name -> symbol-constant index, one map per enclosing class
    private_scopes: Vec<FxHashMap<String, u32>>,
    next_symbol_id: u64,
    origin: String,
}

impl CodeGen {
    /// Create code generation state for one program
    pub fn new(origin: &str) -> Self {
        Self {
            functions: Vec::new(),
            chunks: Vec::new(),
            constants: ConstantPool::new(),
            private_scopes: Vec::new(),
            next_symbol_id: 0,
            origin: origin.to_string(),
        }
    }

    /// The source origin
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// The current function context
    pub fn fc(&mut self) -> &mut FunctionContext {
        self.functions.last_mut().expect("no function context")
    }

    /// The current function context, read-only
    pub fn fc_ref(&self) -> &FunctionContext {
        self.functions.last().expect("no function context")
    }

    /// Record the source span applied to subsequently emitted code
    pub fn mark_span(&mut self, span: Span) {
        if span.line != 0 {
            self.fc().current_span = span;
        }
    }

    // ---- constants ----

    /// Intern a string constant
    pub fn add_string(&mut self, s: &str) -> u32 {
        self.constants.add_string(s)
    }

    /// Intern a number constant
    pub fn add_number(&mut self, n: f64) -> u32 {
        self.constants.add_number(n)
    }

    /// Intern a BigInt constant
    pub fn add_bigint(&mut self, digits: &str) -> u32 {
        self.constants.add(Constant::bigint(digits))
    }

    /// Intern a regex template constant
    pub fn add_regexp(&mut self, pattern: &str, flags: &str) -> u32 {
        self.constants.add(Constant::regexp(pattern, flags))
    }

    /// Allocate a fresh private-name symbol constant. Ids are assigned in
    /// compile order, so equal source yields equal chunks.
    pub fn add_symbol(&mut self) -> u32 {
        let id = self.next_symbol_id;
        self.next_symbol_id += 1;
        self.constants.add(Constant::Symbol(id))
    }

    // ---- private-name scopes ----

    /// Enter a class body: private names declared inside resolve here
    pub fn enter_private_scope(&mut self) {
        self.private_scopes.push(FxHashMap::default());
    }

    /// Leave a class body
    pub fn exit_private_scope(&mut self) {
        self.private_scopes.pop();
    }

    /// Declare a #name in the current class, returning its symbol
    /// constant index
    pub fn declare_private(&mut self, name: &str) -> u32 {
        let idx = self.add_symbol();
        if let Some(scope) = self.private_scopes.last_mut() {
            scope.insert(name.to_string(), idx);
        }
        idx
    }

    /// Resolve a #name against enclosing class bodies. None means the
    /// access is outside any declaring class: a compile error.
    pub fn resolve_private(&self, name: &str) -> Option<u32> {
        self.private_scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
    }

    // ---- functions ----

    /// Begin compiling a function body
    pub fn enter_function(&mut self, name: Option<String>, kind: FunctionKind) {
        self.functions.push(FunctionContext::new(name, kind));
    }

    /// Finish the current function, producing its chunk index
    pub fn exit_function(&mut self) -> u32 {
        let fc = self.functions.pop().expect("no function context");
        let flags = ChunkFlags {
            is_async: fc.kind == FunctionKind::Async,
            is_generator: fc.kind == FunctionKind::Generator,
            is_arrow: fc.kind == FunctionKind::Arrow,
            is_strict: true,
            has_rest: fc.has_rest,
        };
        let chunk = Chunk {
            name: fc.name,
            param_count: fc.param_count,
            local_count: fc.next_local,
            register_count: fc.regs.max_used().max(1),
            flags,
            upvalues: fc.upvalues,
            instructions: fc.instructions,
            exception_table: fc.exception_table,
            ic_count: fc.ic_count,
            source_map: fc.source_map,
        };
        let index = self.chunks.len() as u32;
        self.chunks.push(chunk);
        index
    }

    /// Resolve a name: local, transitively captured upvalue, or global.
    /// Capturing marks the source binding so its scope exit closes the
    /// cell.
    pub fn resolve(&mut self, name: &str) -> Resolved {
        // Current function's own scopes
        if let Some(binding) = self.functions.last().and_then(|fc| fc.lookup(name)) {
            return Resolved::Local {
                index: binding.index,
                is_const: binding.is_const,
                tdz: binding.tdz,
                tdz_live: binding.tdz_live,
            };
        }

        // Enclosing functions, nearest first
        let current = self.functions.len().saturating_sub(1);
        for owner in (0..current).rev() {
            let found = self.functions[owner]
                .lookup(name)
                .map(|b| (b.index, b.is_const, b.tdz));
            let Some((local_index, is_const, tdz)) = found else {
                continue;
            };
            if let Some(binding) = self.functions[owner].lookup_mut(name) {
                binding.is_captured = true;
            }
            // Thread the capture through every intermediate function
            let mut upvalue_index =
                self.functions[owner + 1].add_upvalue(UpvalueCapture::Local(
                    paserati_bytecode::LocalIndex(local_index),
                ));
            for fc_idx in (owner + 2)..=current {
                upvalue_index = self.functions[fc_idx].add_upvalue(UpvalueCapture::Upvalue(
                    paserati_bytecode::LocalIndex(upvalue_index),
                ));
            }
            return Resolved::Upvalue {
                index: upvalue_index,
                is_const,
                tdz,
            };
        }

        Resolved::Global(name.to_string())
    }

    /// Finish compilation: assemble the program
    pub fn finish(self, entry: u32) -> Program {
        let mut builder = Program::builder(self.origin);
        *builder.constants_mut() = self.constants;
        for chunk in self.chunks {
            builder.add_chunk(chunk);
        }
        builder.entry(entry).build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_allocator_reuse() {
        let mut regs = RegisterAllocator::new();
        let a = regs.alloc();
        let b = regs.alloc();
        assert_eq!(a.0, 0);
        assert_eq!(b.0, 1);

        regs.free(b);
        let c = regs.alloc();
        assert_eq!(c.0, 1);
        assert_eq!(regs.max_used(), 2);
    }

    #[test]
    fn test_register_block_is_contiguous() {
        let mut regs = RegisterAllocator::new();
        let a = regs.alloc();
        regs.free(a);
        let block = regs.alloc_block(3);
        // alloc_block never takes from the free list
        assert_eq!(block.0, 0);
        assert_eq!(regs.max_used(), 3);
    }

    #[test]
    fn test_position_restore() {
        let mut regs = RegisterAllocator::new();
        let pos = regs.position();
        regs.alloc();
        regs.alloc();
        regs.restore(pos);
        let a = regs.alloc();
        assert_eq!(a.0, 0);
    }

    #[test]
    fn test_scope_declare_and_capture() {
        let mut cg = CodeGen::new("test.ts");
        cg.enter_function(Some("outer".into()), FunctionKind::Normal);
        cg.fc().declare("x", false, false);

        cg.enter_function(Some("inner".into()), FunctionKind::Normal);
        match cg.resolve("x") {
            Resolved::Upvalue { index, .. } => assert_eq!(index, 0),
            other => panic!("expected upvalue, got {:?}", other),
        }
        let inner = cg.exit_function();
        assert_eq!(
            cg.chunks[inner as usize].upvalues,
            vec![UpvalueCapture::Local(paserati_bytecode::LocalIndex(0))]
        );

        // The captured binding's scope exit must close it
        let closed = cg.fc().exit_scope();
        assert_eq!(closed, vec![0]);
    }

    #[test]
    fn test_transitive_capture() {
        let mut cg = CodeGen::new("test.ts");
        cg.enter_function(Some("a".into()), FunctionKind::Normal);
        cg.fc().declare("x", false, false);
        cg.enter_function(Some("b".into()), FunctionKind::Normal);
        cg.enter_function(Some("c".into()), FunctionKind::Normal);

        match cg.resolve("x") {
            Resolved::Upvalue { index, .. } => assert_eq!(index, 0),
            other => panic!("expected upvalue, got {:?}", other),
        }

        let c = cg.exit_function();
        let b = cg.exit_function();
        // c captures b's upvalue; b captures a's local
        assert_eq!(
            cg.chunks[c as usize].upvalues,
            vec![UpvalueCapture::Upvalue(paserati_bytecode::LocalIndex(0))]
        );
        assert_eq!(
            cg.chunks[b as usize].upvalues,
            vec![UpvalueCapture::Local(paserati_bytecode::LocalIndex(0))]
        );
    }

    #[test]
    fn test_tdz_tracking() {
        let mut cg = CodeGen::new("test.ts");
        cg.enter_function(None, FunctionKind::Normal);
        cg.fc().declare("x", true, true);
        match cg.resolve("x") {
            Resolved::Local { tdz_live: true, .. } => {}
            other => panic!("expected dead binding, got {:?}", other),
        }
        cg.fc().clear_tdz("x");
        match cg.resolve("x") {
            Resolved::Local {
                tdz_live: false,
                tdz: true,
                ..
            } => {}
            other => panic!("expected initialized binding, got {:?}", other),
        }
    }

    #[test]
    fn test_unresolved_is_global() {
        let mut cg = CodeGen::new("test.ts");
        cg.enter_function(None, FunctionKind::Normal);
        assert!(matches!(cg.resolve("console"), Resolved::Global(_)));
    }
}
