//! ArrayBuffer and TypedArray value kinds
//!
//! The builtin constructor surface lives with the host; the VM provides
//! the storage and the indexed fast paths.

use parking_lot::Mutex;
use paserati_gc::object::tags;
use paserati_gc::{GcHeader, GcObject, Tracer};
use std::sync::Arc;

use crate::value::Value;

/// A raw binary data buffer
pub struct JsArrayBuffer {
    header: GcHeader,
    data: Mutex<Vec<u8>>,
}

impl JsArrayBuffer {
    /// Create a zeroed buffer of `len` bytes
    pub fn new(len: usize) -> Arc<Self> {
        Arc::new(Self {
            header: GcHeader::new(tags::OBJECT),
            data: Mutex::new(vec![0; len]),
        })
    }

    /// Buffer length in bytes
    pub fn byte_length(&self) -> usize {
        self.data.lock().len()
    }

    /// Read a byte
    pub fn read_u8(&self, offset: usize) -> Option<u8> {
        self.data.lock().get(offset).copied()
    }

    /// Write a byte; false when out of range
    pub fn write_u8(&self, offset: usize, byte: u8) -> bool {
        let mut data = self.data.lock();
        match data.get_mut(offset) {
            Some(slot) => {
                *slot = byte;
                true
            }
            None => false,
        }
    }

    /// Run `f` over the raw bytes
    pub fn with_bytes<R>(&self, f: impl FnOnce(&mut Vec<u8>) -> R) -> R {
        f(&mut self.data.lock())
    }
}

impl std::fmt::Debug for JsArrayBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ArrayBuffer({})", self.byte_length())
    }
}

impl GcObject for JsArrayBuffer {
    fn header(&self) -> &GcHeader {
        &self.header
    }

    fn trace(&self, _tracer: &mut Tracer) {}
}

/// Element kind of a typed array view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypedArrayKind {
    /// Int8Array
    Int8,
    /// Uint8Array
    Uint8,
    /// Int16Array
    Int16,
    /// Uint16Array
    Uint16,
    /// Int32Array
    Int32,
    /// Uint32Array
    Uint32,
    /// Float32Array
    Float32,
    /// Float64Array
    Float64,
}

impl TypedArrayKind {
    /// Bytes per element
    pub fn element_size(self) -> usize {
        match self {
            Self::Int8 | Self::Uint8 => 1,
            Self::Int16 | Self::Uint16 => 2,
            Self::Int32 | Self::Uint32 | Self::Float32 => 4,
            Self::Float64 => 8,
        }
    }
}

/// A typed view over an ArrayBuffer
pub struct JsTypedArray {
    header: GcHeader,
    /// The backing buffer
    pub buffer: Arc<JsArrayBuffer>,
    /// Element kind
    pub kind: TypedArrayKind,
    /// View start, in bytes
    pub byte_offset: usize,
    /// View length, in elements
    pub length: usize,
}

impl JsTypedArray {
    /// Create a view covering `length` elements from `byte_offset`
    pub fn new(
        buffer: Arc<JsArrayBuffer>,
        kind: TypedArrayKind,
        byte_offset: usize,
        length: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            header: GcHeader::new(tags::OBJECT),
            buffer,
            kind,
            byte_offset,
            length,
        })
    }

    /// View length in elements
    pub fn length(&self) -> usize {
        self.length
    }

    /// Read element `index` as a number value; out-of-range reads are
    /// undefined per the indexed access semantics
    pub fn get(&self, index: usize) -> Value {
        if index >= self.length {
            return Value::undefined();
        }
        let size = self.kind.element_size();
        let base = self.byte_offset + index * size;
        let mut bytes = [0u8; 8];
        for (i, b) in bytes.iter_mut().enumerate().take(size) {
            match self.buffer.read_u8(base + i) {
                Some(byte) => *b = byte,
                None => return Value::undefined(),
            }
        }
        let n = match self.kind {
            TypedArrayKind::Int8 => bytes[0] as i8 as f64,
            TypedArrayKind::Uint8 => bytes[0] as f64,
            TypedArrayKind::Int16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f64,
            TypedArrayKind::Uint16 => u16::from_le_bytes([bytes[0], bytes[1]]) as f64,
            TypedArrayKind::Int32 => {
                i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64
            }
            TypedArrayKind::Uint32 => {
                u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64
            }
            TypedArrayKind::Float32 => {
                f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64
            }
            TypedArrayKind::Float64 => f64::from_le_bytes(bytes),
        };
        Value::number(n)
    }

    /// Write element `index` from a number; out-of-range writes are
    /// silently dropped
    pub fn set(&self, index: usize, n: f64) {
        if index >= self.length {
            return;
        }
        let size = self.kind.element_size();
        let base = self.byte_offset + index * size;
        let bytes: [u8; 8] = match self.kind {
            TypedArrayKind::Int8 => {
                let mut b = [0u8; 8];
                b[0] = (to_int32(n) as i8) as u8;
                b
            }
            TypedArrayKind::Uint8 => {
                let mut b = [0u8; 8];
                b[0] = to_int32(n) as u8;
                b
            }
            TypedArrayKind::Int16 => pad(&(to_int32(n) as i16).to_le_bytes()),
            TypedArrayKind::Uint16 => pad(&(to_int32(n) as u16).to_le_bytes()),
            TypedArrayKind::Int32 => pad(&to_int32(n).to_le_bytes()),
            TypedArrayKind::Uint32 => pad(&(to_int32(n) as u32).to_le_bytes()),
            TypedArrayKind::Float32 => pad(&(n as f32).to_le_bytes()),
            TypedArrayKind::Float64 => n.to_le_bytes(),
        };
        for i in 0..size {
            self.buffer.write_u8(base + i, bytes[i]);
        }
    }
}

fn pad(src: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out[..src.len()].copy_from_slice(src);
    out
}

fn to_int32(n: f64) -> i32 {
    if !n.is_finite() {
        return 0;
    }
    (n.trunc() as i64) as i32
}

impl std::fmt::Debug for JsTypedArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TypedArray({:?}, {})", self.kind, self.length)
    }
}

impl GcObject for JsTypedArray {
    fn header(&self) -> &GcHeader {
        &self.header
    }

    fn trace(&self, tracer: &mut Tracer) {
        tracer.mark(self.buffer.as_ref());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int32_roundtrip() {
        let buf = JsArrayBuffer::new(16);
        let ta = JsTypedArray::new(buf, TypedArrayKind::Int32, 0, 4);
        ta.set(2, -7.0);
        assert_eq!(ta.get(2), Value::int32(-7));
        assert_eq!(ta.get(4), Value::undefined());
    }

    #[test]
    fn test_uint8_truncation() {
        let buf = JsArrayBuffer::new(4);
        let ta = JsTypedArray::new(buf, TypedArrayKind::Uint8, 0, 4);
        ta.set(0, 257.0);
        assert_eq!(ta.get(0), Value::int32(1));
    }

    #[test]
    fn test_float64() {
        let buf = JsArrayBuffer::new(16);
        let ta = JsTypedArray::new(buf, TypedArrayKind::Float64, 0, 2);
        ta.set(1, 1.5);
        assert_eq!(ta.get(1), Value::number(1.5));
    }
}
