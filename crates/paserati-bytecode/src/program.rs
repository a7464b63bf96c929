//! Compiled program format

use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

use crate::chunk::Chunk;
use crate::constant::ConstantPool;
use crate::error::{BytecodeError, Result};
use crate::{BYTECODE_MAGIC, BYTECODE_VERSION};

/// A compiled program: the unit the VM loads and executes.
///
/// Holds the shared constant pool, one chunk per function plus the
/// top-level chunk, and the source origin for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    /// Source origin (path or synthetic name) for stack traces
    pub origin: String,

    /// Constant pool shared by all chunks
    pub constants: ConstantPool,

    /// Chunks, indexed by `ChunkIndex`
    pub chunks: Vec<Chunk>,

    /// Entry chunk index (the top-level script body)
    pub entry: u32,
}

impl Program {
    /// Create a new program builder
    pub fn builder(origin: impl Into<String>) -> ProgramBuilder {
        ProgramBuilder::new(origin)
    }

    /// Serialize to a versioned byte stream
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&BYTECODE_MAGIC);
        bytes.extend_from_slice(&BYTECODE_VERSION.to_le_bytes());

        let data = serde_json::to_vec(self).map_err(|e| {
            BytecodeError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                e.to_string(),
            ))
        })?;
        bytes.extend_from_slice(&(data.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&data);

        Ok(bytes)
    }

    /// Deserialize from a byte stream, validating magic and version
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 16 {
            return Err(BytecodeError::UnexpectedEnd);
        }

        if bytes[0..8] != BYTECODE_MAGIC {
            return Err(BytecodeError::InvalidMagic);
        }

        let version = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        if version != BYTECODE_VERSION {
            return Err(BytecodeError::UnsupportedVersion(version));
        }

        let data_len = u32::from_le_bytes(bytes[12..16].try_into().unwrap()) as usize;
        if bytes.len() < 16 + data_len {
            return Err(BytecodeError::UnexpectedEnd);
        }

        let mut program: Program =
            serde_json::from_slice(&bytes[16..16 + data_len]).map_err(|e| {
                BytecodeError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    e.to_string(),
                ))
            })?;
        program.constants.rebuild_dedup_index();
        Ok(program)
    }

    /// Write to a writer
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let bytes = self.to_bytes()?;
        writer.write_all(&bytes)?;
        Ok(())
    }

    /// Read from a reader
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Self::from_bytes(&bytes)
    }

    /// Get the entry chunk
    pub fn entry_chunk(&self) -> Option<&Chunk> {
        self.chunks.get(self.entry as usize)
    }

    /// Get a chunk by index
    #[inline]
    pub fn chunk(&self, index: u32) -> Option<&Chunk> {
        self.chunks.get(index as usize)
    }

    /// Number of chunks
    #[inline]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

/// Builder for programs
#[derive(Debug)]
pub struct ProgramBuilder {
    origin: String,
    constants: ConstantPool,
    chunks: Vec<Chunk>,
    entry: u32,
}

impl ProgramBuilder {
    /// Create a new program builder
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            constants: ConstantPool::new(),
            chunks: Vec::new(),
            entry: 0,
        }
    }

    /// Get mutable access to the constant pool
    pub fn constants_mut(&mut self) -> &mut ConstantPool {
        &mut self.constants
    }

    /// Add a chunk, returning its index
    pub fn add_chunk(&mut self, chunk: Chunk) -> u32 {
        let idx = self.chunks.len() as u32;
        self.chunks.push(chunk);
        idx
    }

    /// Set the entry chunk index
    pub fn entry(mut self, index: u32) -> Self {
        self.entry = index;
        self
    }

    /// Build the program
    pub fn build(self) -> Program {
        Program {
            origin: self.origin,
            constants: self.constants,
            chunks: self.chunks,
            entry: self.entry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Instruction;
    use crate::operand::Register;

    #[test]
    fn test_program_roundtrip() {
        let mut builder = Program::builder("test.ts");
        builder.constants_mut().add_string("hello");
        builder.constants_mut().add_number(42.0);

        let chunk = Chunk::builder()
            .name("main")
            .instruction(Instruction::LoadTrue { dst: Register(0) })
            .instruction(Instruction::Return { src: Register(0) })
            .build();
        builder.add_chunk(chunk);

        let program = builder.build();
        let bytes = program.to_bytes().unwrap();
        let restored = Program::from_bytes(&bytes).unwrap();

        assert_eq!(restored.origin, "test.ts");
        assert_eq!(restored.constants.len(), 2);
        assert_eq!(restored.chunk_count(), 1);
    }

    #[test]
    fn test_deterministic_bytes() {
        let build = || {
            let mut builder = Program::builder("same.ts");
            builder.constants_mut().add_string("a");
            builder.constants_mut().add_string("b");
            builder.add_chunk(
                Chunk::builder()
                    .instruction(Instruction::ReturnUndefined)
                    .build(),
            );
            builder.build().to_bytes().unwrap()
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn test_invalid_magic() {
        let bytes = b"INVALID\0........";
        let result = Program::from_bytes(bytes);
        assert!(matches!(result, Err(BytecodeError::InvalidMagic)));
    }

    #[test]
    fn test_unsupported_version() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&BYTECODE_MAGIC);
        bytes.extend_from_slice(&99u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        let result = Program::from_bytes(&bytes);
        assert!(matches!(result, Err(BytecodeError::UnsupportedVersion(99))));
    }
}
