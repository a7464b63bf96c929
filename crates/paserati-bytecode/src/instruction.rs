//! Bytecode instructions

use serde::{Deserialize, Serialize};

use crate::chunk::HandlerKind;
use crate::operand::{ChunkIndex, ConstantIndex, JumpOffset, LocalIndex, Register};

/// A decoded instruction with its operands
///
/// Register-based instruction set. Most instructions take a destination
/// register and one or more source registers/operands. Call instructions
/// address a contiguous argument span starting at `first_arg`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[allow(missing_docs)] // operand fields are named for what they are
pub enum Instruction {
    // ==================== Constants ====================
    /// dst = undefined
    LoadUndefined { dst: Register },
    /// dst = null
    LoadNull { dst: Register },
    /// dst = true
    LoadTrue { dst: Register },
    /// dst = false
    LoadFalse { dst: Register },
    /// dst = imm32 (integer immediate)
    LoadInt32 { dst: Register, value: i32 },
    /// dst = constants\[idx\]
    LoadConst { dst: Register, idx: ConstantIndex },
    /// dst = the TDZ hole sentinel (uninitialized let/const slot)
    LoadHole { dst: Register },

    // ==================== Variables ====================
    /// dst = locals\[idx\]
    GetLocal { dst: Register, idx: LocalIndex },
    /// locals\[idx\] = src
    SetLocal { idx: LocalIndex, src: Register },
    /// dst = locals\[idx\], throwing ReferenceError if the slot still holds
    /// the TDZ hole. `name` is the declared binding name for the message.
    GetLocalChecked {
        dst: Register,
        idx: LocalIndex,
        name: ConstantIndex,
    },
    /// dst = upvalues\[idx\]
    GetUpvalue { dst: Register, idx: LocalIndex },
    /// upvalues\[idx\] = src
    SetUpvalue { idx: LocalIndex, src: Register },
    /// dst = upvalues\[idx\], throwing ReferenceError on the TDZ hole
    GetUpvalueChecked {
        dst: Register,
        idx: LocalIndex,
        name: ConstantIndex,
    },
    /// upvalues\[idx\] = src, throwing ReferenceError if the cell still
    /// holds the TDZ hole (write-before-init from an inner closure)
    SetUpvalueChecked {
        idx: LocalIndex,
        src: Register,
        name: ConstantIndex,
    },
    /// dst = globals\[name\]; throws ReferenceError if absent
    GetGlobal { dst: Register, name: ConstantIndex },
    /// globals\[name\] = src
    SetGlobal { name: ConstantIndex, src: Register },
    /// dst = this
    LoadThis { dst: Register },
    /// Close the upvalue for a captured local when leaving its scope:
    /// snapshots the local into the shared heap cell and detaches it.
    CloseUpvalue { local_idx: LocalIndex },

    // ==================== Arithmetic ====================
    /// dst = lhs + rhs (numeric add or string concat)
    Add { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs - rhs
    Sub { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs * rhs
    Mul { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs / rhs
    Div { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs % rhs
    Mod { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs ** rhs
    Pow { dst: Register, lhs: Register, rhs: Register },
    /// dst = -src
    Neg { dst: Register, src: Register },
    /// dst = src + 1
    Inc { dst: Register, src: Register },
    /// dst = src - 1
    Dec { dst: Register, src: Register },

    // ==================== Bitwise ====================
    /// dst = lhs & rhs
    BitAnd { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs | rhs
    BitOr { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs ^ rhs
    BitXor { dst: Register, lhs: Register, rhs: Register },
    /// dst = ~src
    BitNot { dst: Register, src: Register },
    /// dst = lhs << rhs
    Shl { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs >> rhs
    Shr { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs >>> rhs
    Ushr { dst: Register, lhs: Register, rhs: Register },

    // ==================== Comparison ====================
    /// dst = lhs == rhs (abstract equality)
    Eq { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs === rhs
    StrictEq { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs != rhs
    Ne { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs !== rhs
    StrictNe { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs < rhs
    Lt { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs <= rhs
    Le { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs > rhs
    Gt { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs >= rhs
    Ge { dst: Register, lhs: Register, rhs: Register },

    // ==================== Logical / nullish ====================
    /// dst = !src
    Not { dst: Register, src: Register },
    /// dst = (src === null). Single-register test for the dominant idiom.
    IsNull { dst: Register, src: Register },
    /// dst = (src === undefined)
    IsUndefined { dst: Register, src: Register },
    /// dst = (src === null || src === undefined)
    IsNullish { dst: Register, src: Register },

    // ==================== Type operations ====================
    /// dst = typeof src
    TypeOf { dst: Register, src: Register },
    /// dst = typeof globals\[name\] without ReferenceError on unresolvable
    /// names (`typeof undefinedVar` === "undefined")
    TypeOfName { dst: Register, name: ConstantIndex },
    /// dst = lhs instanceof rhs
    InstanceOf { dst: Register, lhs: Register, rhs: Register },
    /// dst = lhs in rhs
    In { dst: Register, lhs: Register, rhs: Register },
    /// dst = ToNumber(src)
    ToNumber { dst: Register, src: Register },

    // ==================== Property access ====================
    /// dst = obj.name, through the per-site inline cache
    GetProp {
        dst: Register,
        obj: Register,
        name: ConstantIndex,
        ic: u16,
    },
    /// obj.name = src, through the per-site inline cache
    SetProp {
        obj: Register,
        name: ConstantIndex,
        src: Register,
        ic: u16,
    },
    /// dst = obj\[key\] (computed key)
    GetIndex {
        dst: Register,
        obj: Register,
        key: Register,
        ic: u16,
    },
    /// obj\[key\] = src (computed key)
    SetIndex {
        obj: Register,
        key: Register,
        src: Register,
        ic: u16,
    },
    /// dst = delete obj\[key\] (boolean result)
    DeleteProp { dst: Register, obj: Register, key: Register },
    /// dst = {}
    NewObject { dst: Register },
    /// Install a getter: defineProperty(obj, key, { get: func })
    DefineGetter { obj: Register, key: Register, func: Register },
    /// Install a setter: defineProperty(obj, key, { set: func })
    DefineSetter { obj: Register, key: Register, func: Register },

    // ==================== Arrays ====================
    /// dst = new array of `len` holes
    NewArray { dst: Register, len: u16 },
    /// Append src to the end of arr (array literal building, spread)
    AppendArray { arr: Register, src: Register },
    /// Append every element of the iterable src to arr (spread element)
    AppendSpread { arr: Register, src: Register },

    // ==================== Closures ====================
    /// dst = closure over chunk `chunk`, capturing per the chunk's
    /// upvalue descriptors
    MakeClosure { dst: Register, chunk: ChunkIndex },

    // ==================== Calls ====================
    /// dst = func(args...) where args live in the contiguous span
    /// \[first_arg, first_arg + argc)
    Call {
        dst: Register,
        func: Register,
        first_arg: Register,
        argc: u8,
    },
    /// dst = obj.name(args...) — method call fusing the property load,
    /// with `this = obj`
    CallMethod {
        dst: Register,
        obj: Register,
        name: ConstantIndex,
        first_arg: Register,
        argc: u8,
        ic: u16,
    },
    /// return func(args...) reusing the current frame window
    TailCall {
        func: Register,
        first_arg: Register,
        argc: u8,
    },
    /// dst = new ctor(args...)
    New {
        dst: Register,
        ctor: Register,
        first_arg: Register,
        argc: u8,
    },
    /// dst = func(...spread) where spread is an array of arguments
    CallSpread {
        dst: Register,
        func: Register,
        this: Register,
        spread: Register,
    },
    /// dst = new ctor(...spread)
    NewSpread {
        dst: Register,
        ctor: Register,
        spread: Register,
    },
    /// Return src from the current function
    Return { src: Register },
    /// Return undefined from the current function
    ReturnUndefined,

    // ==================== Control flow ====================
    /// pc += offset
    Jump { offset: JumpOffset },
    /// pc += offset if ToBoolean(cond)
    JumpIfTrue { cond: Register, offset: JumpOffset },
    /// pc += offset if !ToBoolean(cond)
    JumpIfFalse { cond: Register, offset: JumpOffset },
    /// pc += offset if src is null or undefined
    JumpIfNullish { src: Register, offset: JumpOffset },
    /// pc += offset if src is neither null nor undefined
    JumpIfNotNullish { src: Register, offset: JumpOffset },
    /// Fused strict-equality branch: pc += offset if lhs === rhs
    JumpIfEq {
        lhs: Register,
        rhs: Register,
        offset: JumpOffset,
    },

    // ==================== Exception handling ====================
    /// Install a handler for the protected region that follows. `target`
    /// is the handler body relative to this instruction.
    PushHandler { kind: HandlerKind, target: JumpOffset },
    /// Uninstall the most recent handler (normal exit from the region)
    PopHandler,
    /// Throw src
    Throw { src: Register },
    /// At catch-handler entry: dst = the in-flight exception
    Catch { dst: Register },
    /// At the end of a finally body: resume the pending completion
    /// (rethrow, re-return, or resume the recorded jump)
    EndFinally,

    // ==================== Iteration ====================
    /// dst = GetIterator(src): src\[Symbol.iterator\]() with fast paths
    /// for arrays, strings, generators, and map/set
    GetIterator { dst: Register, src: Register },
    /// Step the iterator: value = iter.next(); dst = value.value,
    /// done = ToBoolean(value.done)
    IteratorNext {
        dst: Register,
        done: Register,
        iter: Register,
    },
    /// Call iter.return() if present. An error thrown by return() is
    /// swallowed when the frame is unwinding from a throw (it must not
    /// mask the original exception) and propagated otherwise.
    IteratorClose { iter: Register },
    /// dst = array of enumerable string keys of obj (own + inherited,
    /// deduplicated) for for-in lowering
    ForInKeys { dst: Register, obj: Register },
    /// Object rest element: dst = a fresh object holding src's own
    /// enumerable properties except the keys held in the contiguous
    /// register span \[exclude_start, exclude_start + exclude_count)
    CopyRestProps {
        dst: Register,
        src: Register,
        exclude_start: Register,
        exclude_count: u8,
    },
    /// Object spread: copy src's own enumerable properties onto dst
    CopyDataProps { dst: Register, src: Register },

    // ==================== Generators / async ====================
    /// In a generator or async chunk, after the parameter prologue has
    /// run: detach the current frame to the heap and return the generator
    /// object to the caller (async chunks instead begin driving the body
    /// and return a promise). Parameter destructuring that throws does so
    /// before this instruction, in the caller's dynamic extent.
    CreateGenerator,
    /// Suspend the generator, yielding src. On resume, dst receives the
    /// value sent via next(v).
    Yield { dst: Register, src: Register },
    /// Await src: settled promises continue inline; pending promises
    /// suspend the frame and resume with the settlement in dst.
    Await { dst: Register, src: Register },

    // ==================== Misc ====================
    /// dst = src
    Move { dst: Register, src: Register },
    /// No operation
    Nop,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_roundtrip() {
        let instrs = vec![
            Instruction::LoadInt32 { dst: Register(0), value: -5 },
            Instruction::Add {
                dst: Register(2),
                lhs: Register(0),
                rhs: Register(1),
            },
            Instruction::PushHandler {
                kind: HandlerKind::Catch,
                target: JumpOffset(12),
            },
            Instruction::Return { src: Register(2) },
        ];

        let bytes = serde_json::to_vec(&instrs).unwrap();
        let decoded: Vec<Instruction> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, instrs);
    }
}
