//! # Paserati VM Bytecode
//!
//! This crate defines the bytecode format for the Paserati
//! TypeScript/JavaScript execution core.
//!
//! ## Design Principles
//!
//! - **Register-based**: three-address operations on virtual registers,
//!   not a stack
//! - **Self-describing**: a compiled [`Program`] carries counts and lengths
//!   for every table it contains and can be serialized to a versioned,
//!   magic-tagged byte stream
//! - **Deterministic**: compiling the same source twice yields the same
//!   serialized bytes (constant dedup and symbol ids are assigned in
//!   compile order)

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod chunk;
pub mod constant;
pub mod error;
pub mod instruction;
pub mod operand;
pub mod program;

pub use chunk::{Chunk, ChunkFlags, ExceptionEntry, HandlerKind, SourceMap, SourceMapEntry, UpvalueCapture};
pub use constant::{Constant, ConstantPool};
pub use error::BytecodeError;
pub use instruction::Instruction;
pub use operand::{ChunkIndex, ConstantIndex, JumpOffset, LocalIndex, Register};
pub use program::Program;

/// Bytecode format version
pub const BYTECODE_VERSION: u32 = 1;

/// Magic bytes for serialized programs
pub const BYTECODE_MAGIC: [u8; 8] = *b"PSRTBC\0\0";
