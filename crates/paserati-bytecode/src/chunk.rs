//! Compiled function chunks

use serde::{Deserialize, Serialize};

use crate::instruction::Instruction;
use crate::operand::LocalIndex;

/// Chunk flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkFlags {
    /// Async function (body drives a promise)
    pub is_async: bool,
    /// Generator function (calls create a suspended generator)
    pub is_generator: bool,
    /// Arrow function (closes over the enclosing `this`)
    pub is_arrow: bool,
    /// Strict mode (always true in this implementation; kept in the
    /// format so chunks stay self-describing)
    pub is_strict: bool,
    /// Has a rest parameter (...args)
    pub has_rest: bool,
}

/// Upvalue capture descriptor, consumed by `MakeClosure`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpvalueCapture {
    /// Capture a local slot of the immediately enclosing frame
    Local(LocalIndex),
    /// Capture an upvalue of the enclosing function (transitive capture)
    Upvalue(LocalIndex),
}

/// Kind of exception handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandlerKind {
    /// `catch` clause: receives the exception and resumes normal flow
    Catch,
    /// `finally` clause: runs for every completion kind, then resumes
    /// the pending completion via `EndFinally`
    Finally,
}

/// An entry in a chunk's exception table.
///
/// Mirrors the `PushHandler` regions the compiler emits, so a serialized
/// chunk describes its protected regions without decoding instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionEntry {
    /// First protected pc (inclusive)
    pub start: u32,
    /// Last protected pc (exclusive)
    pub end: u32,
    /// Handler entry pc
    pub handler: u32,
    /// Handler kind
    pub kind: HandlerKind,
}

/// A compiled function: instructions plus the metadata the VM needs to
/// create and run a frame for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Function name (None for anonymous)
    pub name: Option<String>,

    /// Number of declared parameters (not counting rest)
    pub param_count: u8,

    /// Number of local variable slots (parameters included)
    pub local_count: u16,

    /// Size of the register window
    pub register_count: u16,

    /// Chunk flags
    pub flags: ChunkFlags,

    /// Upvalue captures, in descriptor order
    pub upvalues: Vec<UpvalueCapture>,

    /// Bytecode instructions
    pub instructions: Vec<Instruction>,

    /// Exception-handler regions
    pub exception_table: Vec<ExceptionEntry>,

    /// Number of inline-cache slots reserved for this chunk
    pub ic_count: u16,

    /// Source position map
    pub source_map: SourceMap,
}

impl Chunk {
    /// Create a new chunk builder
    pub fn builder() -> ChunkBuilder {
        ChunkBuilder::new()
    }

    /// Get the function name or `<anonymous>`
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }

    /// Check if this chunk is an async function body
    #[inline]
    pub fn is_async(&self) -> bool {
        self.flags.is_async
    }

    /// Check if this chunk is a generator body
    #[inline]
    pub fn is_generator(&self) -> bool {
        self.flags.is_generator
    }

    /// Check if this chunk is an arrow function
    #[inline]
    pub fn is_arrow(&self) -> bool {
        self.flags.is_arrow
    }
}

/// Builder for chunks
#[derive(Debug, Default)]
pub struct ChunkBuilder {
    name: Option<String>,
    param_count: u8,
    local_count: u16,
    register_count: u16,
    flags: ChunkFlags,
    upvalues: Vec<UpvalueCapture>,
    instructions: Vec<Instruction>,
    exception_table: Vec<ExceptionEntry>,
    ic_count: u16,
    source_map: SourceMap,
}

impl ChunkBuilder {
    /// Create a new chunk builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set function name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set parameter count
    pub fn param_count(mut self, count: u8) -> Self {
        self.param_count = count;
        self
    }

    /// Set local slot count
    pub fn local_count(mut self, count: u16) -> Self {
        self.local_count = count;
        self
    }

    /// Set register window size
    pub fn register_count(mut self, count: u16) -> Self {
        self.register_count = count;
        self
    }

    /// Set flags
    pub fn flags(mut self, flags: ChunkFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Mark as async
    pub fn is_async(mut self, value: bool) -> Self {
        self.flags.is_async = value;
        self
    }

    /// Mark as generator
    pub fn is_generator(mut self, value: bool) -> Self {
        self.flags.is_generator = value;
        self
    }

    /// Set all upvalue captures
    pub fn upvalues(mut self, upvalues: Vec<UpvalueCapture>) -> Self {
        self.upvalues = upvalues;
        self
    }

    /// Set all instructions
    pub fn instructions(mut self, instructions: Vec<Instruction>) -> Self {
        self.instructions = instructions;
        self
    }

    /// Add a single instruction
    pub fn instruction(mut self, instruction: Instruction) -> Self {
        self.instructions.push(instruction);
        self
    }

    /// Set the exception table
    pub fn exception_table(mut self, table: Vec<ExceptionEntry>) -> Self {
        self.exception_table = table;
        self
    }

    /// Set the IC slot count
    pub fn ic_count(mut self, count: u16) -> Self {
        self.ic_count = count;
        self
    }

    /// Set the source map
    pub fn source_map(mut self, source_map: SourceMap) -> Self {
        self.source_map = source_map;
        self
    }

    /// Build the chunk
    pub fn build(self) -> Chunk {
        Chunk {
            name: self.name,
            param_count: self.param_count,
            local_count: self.local_count,
            register_count: self.register_count,
            flags: self.flags,
            upvalues: self.upvalues,
            instructions: self.instructions,
            exception_table: self.exception_table,
            ic_count: self.ic_count,
            source_map: self.source_map,
        }
    }
}

/// Run-length source position map: each entry covers the pc range from its
/// `start_pc` up to the next entry's `start_pc`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceMap {
    /// Entries sorted by `start_pc`
    pub entries: Vec<SourceMapEntry>,
}

/// A single source map entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMapEntry {
    /// First instruction index this entry covers
    pub start_pc: u32,
    /// Line number (1-indexed)
    pub line: u32,
    /// Column number (1-indexed)
    pub column: u32,
}

impl SourceMap {
    /// Create a new empty source map
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a mapping. Consecutive instructions on the same line/column
    /// collapse into one run.
    pub fn add(&mut self, start_pc: u32, line: u32, column: u32) {
        if let Some(last) = self.entries.last() {
            if last.line == line && last.column == column {
                return;
            }
        }
        self.entries.push(SourceMapEntry {
            start_pc,
            line,
            column,
        });
    }

    /// Find the source location covering an instruction index
    pub fn find(&self, pc: u32) -> Option<SourceMapEntry> {
        let idx = self.entries.binary_search_by_key(&pc, |e| e.start_pc);
        match idx {
            Ok(i) => Some(self.entries[i]),
            Err(i) if i > 0 => Some(self.entries[i - 1]),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operand::Register;

    #[test]
    fn test_chunk_builder() {
        let chunk = Chunk::builder()
            .name("add")
            .param_count(2)
            .local_count(2)
            .register_count(3)
            .instruction(Instruction::Add {
                dst: Register(2),
                lhs: Register(0),
                rhs: Register(1),
            })
            .instruction(Instruction::Return { src: Register(2) })
            .build();

        assert_eq!(chunk.display_name(), "add");
        assert_eq!(chunk.param_count, 2);
        assert_eq!(chunk.instructions.len(), 2);
        assert!(!chunk.is_generator());
    }

    #[test]
    fn test_source_map_run_length() {
        let mut map = SourceMap::new();
        map.add(0, 1, 1);
        map.add(1, 1, 1); // same position folds into the previous run
        map.add(5, 2, 5);
        map.add(10, 3, 1);

        assert_eq!(map.entries.len(), 3);
        assert_eq!(map.find(0).unwrap().line, 1);
        assert_eq!(map.find(4).unwrap().line, 1);
        assert_eq!(map.find(5).unwrap().line, 2);
        assert_eq!(map.find(7).unwrap().line, 2);
        assert_eq!(map.find(10).unwrap().line, 3);
    }

    #[test]
    fn test_exception_table_serializes() {
        let chunk = Chunk::builder()
            .exception_table(vec![ExceptionEntry {
                start: 1,
                end: 9,
                handler: 12,
                kind: HandlerKind::Finally,
            }])
            .build();

        let bytes = serde_json::to_vec(&chunk).unwrap();
        let restored: Chunk = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(restored.exception_table.len(), 1);
        assert_eq!(restored.exception_table[0].kind, HandlerKind::Finally);
    }
}
