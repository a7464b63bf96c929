//! Script values with NaN-boxing
//!
//! NaN-boxing encodes values in 64 bits using the IEEE 754 NaN space.
//! Regular doubles are stored directly; everything else lives in the
//! quiet-NaN payload.
//!
//! ```text
//! Double:     stored directly (except NaN)
//! NaN:        0x7FFA_0000_0000_0000 (canonical NaN, distinct from undefined)
//! Integer:    0x7FF8_0001_XXXX_XXXX (32-bit signed in the low bits)
//! Pointer:    0x7FFC_XXXX_XXXX_XXXX (48-bit pointer)
//! Undefined:  0x7FF8_0000_0000_0000
//! Null:       0x7FF8_0000_0000_0001
//! True:       0x7FF8_0000_0000_0002
//! False:      0x7FF8_0000_0000_0003
//! Hole:       0x7FF8_0000_0000_0004 (TDZ / array hole, never user-visible)
//! ```

use std::cell::RefCell;
use std::sync::Arc;

use paserati_gc::object::tags;
use paserati_gc::{GcHeader, GcObject, Tracer};

use crate::generator::JsGenerator;
use crate::map_set::{EphemeronMap, MapData, SetData};
use crate::object::JsObject;
use crate::promise::JsPromise;
use crate::proxy::JsProxy;
use crate::string::JsString;
use crate::symbol::JsSymbol;
use crate::typed_array::{JsArrayBuffer, JsTypedArray};

/// Heap-allocated cell for captured variables.
///
/// When a closure captures a local, the local is backed by an
/// `UpvalueCell`; every closure over the same binding shares the same
/// cell, which is what makes the counter pattern work:
///
/// ```javascript
/// function make(n) { return () => n++; }
/// ```
#[derive(Clone)]
pub struct UpvalueCell(Arc<RefCell<Value>>);

// SAFETY: UpvalueCell is only accessed from the single VM thread.
unsafe impl Send for UpvalueCell {}
unsafe impl Sync for UpvalueCell {}

impl UpvalueCell {
    /// Create a new cell holding `value`
    pub fn new(value: Value) -> Self {
        Self(Arc::new(RefCell::new(value)))
    }

    /// Read the cell
    pub fn get(&self) -> Value {
        self.0.borrow().clone()
    }

    /// Write the cell
    pub fn set(&self, value: Value) {
        *self.0.borrow_mut() = value;
    }
}

impl std::fmt::Debug for UpvalueCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "UpvalueCell({:?})", *self.0.borrow())
    }
}

// NaN-boxing constants
const QUIET_NAN: u64 = 0x7FF8_0000_0000_0000;
const PAYLOAD_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

const TAG_UNDEFINED: u64 = 0x7FF8_0000_0000_0000;
const TAG_NULL: u64 = 0x7FF8_0000_0000_0001;
const TAG_TRUE: u64 = 0x7FF8_0000_0000_0002;
const TAG_FALSE: u64 = 0x7FF8_0000_0000_0003;
const TAG_HOLE: u64 = 0x7FF8_0000_0000_0004;
const TAG_NAN: u64 = 0x7FFA_0000_0000_0000;
const TAG_INT32: u64 = 0x7FF8_0001_0000_0000;
const TAG_POINTER: u64 = 0x7FFC_0000_0000_0000;

/// Native function handler.
///
/// Receives `(this, args, &mut NativeContext)`. The context gives natives
/// access to globals, the job queue, and — critically — reentry into the
/// VM via `ncx.call_function()`. The `Result` is the error channel the
/// interpreter inspects on return; no panics cross the boundary.
pub type NativeFn = Arc<
    dyn Fn(
            &Value,
            &[Value],
            &mut crate::context::NativeContext<'_>,
        ) -> std::result::Result<Value, crate::error::VmError>
        + Send
        + Sync,
>;

/// A script value.
///
/// The `bits` carry the NaN-boxed encoding; `heap_ref` keeps the pointee
/// alive and discriminates heap kinds.
#[derive(Clone)]
pub struct Value {
    bits: u64,
    heap_ref: Option<HeapRef>,
}

// SAFETY: heap payloads are behind Arc and thread-confined types.
unsafe impl Send for Value {}
unsafe impl Sync for Value {}

/// Reference to heap-allocated data
#[derive(Clone)]
pub enum HeapRef {
    /// String
    String(Arc<JsString>),
    /// Symbol
    Symbol(Arc<JsSymbol>),
    /// BigInt
    BigInt(Arc<JsBigInt>),
    /// Plain object
    Object(Arc<JsObject>),
    /// Array (a JsObject with element storage)
    Array(Arc<JsObject>),
    /// Bytecode closure
    Closure(Arc<Closure>),
    /// Native function
    NativeFunction(Arc<NativeFunction>),
    /// Bound function (partially applied this/args)
    BoundFunction(Arc<BoundFunction>),
    /// Generator object
    Generator(Arc<JsGenerator>),
    /// Promise
    Promise(Arc<JsPromise>),
    /// Proxy
    Proxy(Arc<JsProxy>),
    /// Raw binary buffer
    ArrayBuffer(Arc<JsArrayBuffer>),
    /// Typed view over a buffer
    TypedArray(Arc<JsTypedArray>),
    /// Map backing store
    MapData(Arc<MapData>),
    /// Set backing store
    SetData(Arc<SetData>),
    /// WeakMap/WeakSet backing store (ephemeron semantics)
    EphemeronMap(Arc<EphemeronMap>),
}

/// A bytecode closure: a compiled chunk plus its captured environment.
pub struct Closure {
    gc: GcHeader,
    /// Chunk index in the program
    pub chunk_index: u32,
    /// The program this chunk belongs to
    pub program: Arc<paserati_bytecode::Program>,
    /// Captured upvalues (shared mutable cells)
    pub upvalues: Vec<UpvalueCell>,
    /// `this` captured at creation (arrow functions only)
    pub captured_this: Option<Value>,
    /// Function object carrying `.prototype`, `.name`, `.length`
    pub object: Arc<JsObject>,
}

impl Closure {
    /// The chunk this closure executes
    pub fn chunk(&self) -> &paserati_bytecode::Chunk {
        &self.program.chunks[self.chunk_index as usize]
    }
}

impl std::fmt::Debug for Closure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Closure")
            .field("chunk_index", &self.chunk_index)
            .field("upvalues", &self.upvalues.len())
            .finish()
    }
}

impl GcObject for Closure {
    fn header(&self) -> &GcHeader {
        &self.gc
    }

    fn trace(&self, tracer: &mut Tracer) {
        tracer.mark(self.object.as_ref());
        if let Some(this) = &self.captured_this {
            this.trace(tracer);
        }
        for upvalue in &self.upvalues {
            upvalue.get().trace(tracer);
        }
    }
}

/// A native function with an attached object for properties.
pub struct NativeFunction {
    gc: GcHeader,
    /// Display name
    pub name: String,
    /// Declared arity (informational)
    pub arity: u8,
    /// The handler
    pub func: NativeFn,
    /// Attached object for properties
    pub object: Arc<JsObject>,
}

impl GcObject for NativeFunction {
    fn header(&self) -> &GcHeader {
        &self.gc
    }

    fn trace(&self, tracer: &mut Tracer) {
        // NativeFn is an opaque Rust closure; any values it needs flow
        // through arguments, not captures.
        tracer.mark(self.object.as_ref());
    }
}

/// A bound function: a callable wrapping a target with a fixed `this`
/// and leading arguments.
pub struct BoundFunction {
    gc: GcHeader,
    /// The wrapped callable
    pub target: Value,
    /// The bound receiver
    pub bound_this: Value,
    /// Leading arguments
    pub bound_args: Vec<Value>,
}

impl GcObject for BoundFunction {
    fn header(&self) -> &GcHeader {
        &self.gc
    }

    fn trace(&self, tracer: &mut Tracer) {
        self.target.trace(tracer);
        self.bound_this.trace(tracer);
        for arg in &self.bound_args {
            arg.trace(tracer);
        }
    }
}

/// A BigInt (arbitrary precision integer)
pub struct JsBigInt {
    gc: GcHeader,
    /// The value
    pub value: num_bigint::BigInt,
}

impl std::fmt::Debug for JsBigInt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}n", self.value)
    }
}

impl GcObject for JsBigInt {
    fn header(&self) -> &GcHeader {
        &self.gc
    }

    fn trace(&self, _tracer: &mut Tracer) {}
}

impl Value {
    /// undefined
    #[inline]
    pub const fn undefined() -> Self {
        Self {
            bits: TAG_UNDEFINED,
            heap_ref: None,
        }
    }

    /// null
    #[inline]
    pub const fn null() -> Self {
        Self {
            bits: TAG_NULL,
            heap_ref: None,
        }
    }

    /// boolean
    #[inline]
    pub const fn boolean(b: bool) -> Self {
        Self {
            bits: if b { TAG_TRUE } else { TAG_FALSE },
            heap_ref: None,
        }
    }

    /// The hole sentinel: an uninitialized let/const slot or an absent
    /// array element. Never user-visible; reads through `GetLocalChecked`
    /// raise ReferenceError, element reads convert it to undefined.
    #[inline]
    pub const fn hole() -> Self {
        Self {
            bits: TAG_HOLE,
            heap_ref: None,
        }
    }

    /// 32-bit integer fast path
    #[inline]
    pub fn int32(n: i32) -> Self {
        Self {
            bits: TAG_INT32 | (n as u32 as u64),
            heap_ref: None,
        }
    }

    /// Number: int32 when representable (preserving -0.0 as a double),
    /// else an IEEE-754 double
    #[inline]
    pub fn number(n: f64) -> Self {
        if n.is_nan() {
            return Self {
                bits: TAG_NAN,
                heap_ref: None,
            };
        }

        if n.fract() == 0.0
            && n >= i32::MIN as f64
            && n <= i32::MAX as f64
            && (n != 0.0 || (1.0_f64 / n).is_sign_positive())
        {
            return Self::int32(n as i32);
        }

        Self {
            bits: n.to_bits(),
            heap_ref: None,
        }
    }

    /// Canonical NaN
    #[inline]
    pub const fn nan() -> Self {
        Self {
            bits: TAG_NAN,
            heap_ref: None,
        }
    }

    fn pointer(ptr: usize, heap_ref: HeapRef) -> Self {
        Self {
            bits: TAG_POINTER | (ptr as u64 & PAYLOAD_MASK),
            heap_ref: Some(heap_ref),
        }
    }

    /// String value
    pub fn string(s: Arc<JsString>) -> Self {
        let ptr = Arc::as_ptr(&s) as usize;
        Self::pointer(ptr, HeapRef::String(s))
    }

    /// Interned string from a str
    pub fn str(s: &str) -> Self {
        Self::string(JsString::intern(s))
    }

    /// Symbol value
    pub fn symbol(sym: Arc<JsSymbol>) -> Self {
        let ptr = Arc::as_ptr(&sym) as usize;
        Self::pointer(ptr, HeapRef::Symbol(sym))
    }

    /// BigInt value from a decimal string; invalid digits yield zero
    pub fn bigint_from_str(digits: &str) -> Self {
        use num_traits::Zero;
        let value = digits
            .parse::<num_bigint::BigInt>()
            .unwrap_or_else(|_| num_bigint::BigInt::zero());
        let bi = Arc::new(JsBigInt {
            gc: GcHeader::new(tags::OBJECT),
            value,
        });
        let ptr = Arc::as_ptr(&bi) as usize;
        Self::pointer(ptr, HeapRef::BigInt(bi))
    }

    /// Object value
    pub fn object(obj: Arc<JsObject>) -> Self {
        let ptr = Arc::as_ptr(&obj) as usize;
        Self::pointer(ptr, HeapRef::Object(obj))
    }

    /// Array value
    pub fn array(arr: Arc<JsObject>) -> Self {
        let ptr = Arc::as_ptr(&arr) as usize;
        Self::pointer(ptr, HeapRef::Array(arr))
    }

    /// Closure value
    pub fn closure(closure: Arc<Closure>) -> Self {
        let ptr = Arc::as_ptr(&closure) as usize;
        Self::pointer(ptr, HeapRef::Closure(closure))
    }

    /// Build a closure value from parts
    pub fn new_closure(
        chunk_index: u32,
        program: Arc<paserati_bytecode::Program>,
        upvalues: Vec<UpvalueCell>,
        captured_this: Option<Value>,
        object: Arc<JsObject>,
    ) -> Self {
        Self::closure(Arc::new(Closure {
            gc: GcHeader::new(tags::CLOSURE),
            chunk_index,
            program,
            upvalues,
            captured_this,
            object,
        }))
    }

    /// Native function value
    pub fn native_function<F>(name: &str, arity: u8, f: F) -> Self
    where
        F: Fn(
                &Value,
                &[Value],
                &mut crate::context::NativeContext<'_>,
            ) -> Result<Value, crate::error::VmError>
            + Send
            + Sync
            + 'static,
    {
        let object = Arc::new(JsObject::new(Value::null()));
        let native = Arc::new(NativeFunction {
            gc: GcHeader::new(tags::CLOSURE),
            name: name.to_string(),
            arity,
            func: Arc::new(f),
            object,
        });
        let ptr = Arc::as_ptr(&native) as usize;
        Self::pointer(ptr, HeapRef::NativeFunction(native))
    }

    /// Bound function value
    pub fn bound_function(target: Value, bound_this: Value, bound_args: Vec<Value>) -> Self {
        let bound = Arc::new(BoundFunction {
            gc: GcHeader::new(tags::CLOSURE),
            target,
            bound_this,
            bound_args,
        });
        let ptr = Arc::as_ptr(&bound) as usize;
        Self::pointer(ptr, HeapRef::BoundFunction(bound))
    }

    /// Generator value
    pub fn generator(generator: Arc<JsGenerator>) -> Self {
        let ptr = Arc::as_ptr(&generator) as usize;
        Self::pointer(ptr, HeapRef::Generator(generator))
    }

    /// Promise value
    pub fn promise(promise: Arc<JsPromise>) -> Self {
        let ptr = Arc::as_ptr(&promise) as usize;
        Self::pointer(ptr, HeapRef::Promise(promise))
    }

    /// Proxy value
    pub fn proxy(proxy: Arc<JsProxy>) -> Self {
        let ptr = Arc::as_ptr(&proxy) as usize;
        Self::pointer(ptr, HeapRef::Proxy(proxy))
    }

    /// ArrayBuffer value
    pub fn array_buffer(ab: Arc<JsArrayBuffer>) -> Self {
        let ptr = Arc::as_ptr(&ab) as usize;
        Self::pointer(ptr, HeapRef::ArrayBuffer(ab))
    }

    /// TypedArray value
    pub fn typed_array(ta: Arc<JsTypedArray>) -> Self {
        let ptr = Arc::as_ptr(&ta) as usize;
        Self::pointer(ptr, HeapRef::TypedArray(ta))
    }

    /// Map backing store value
    pub fn map_data(data: Arc<MapData>) -> Self {
        let ptr = Arc::as_ptr(&data) as usize;
        Self::pointer(ptr, HeapRef::MapData(data))
    }

    /// Set backing store value
    pub fn set_data(data: Arc<SetData>) -> Self {
        let ptr = Arc::as_ptr(&data) as usize;
        Self::pointer(ptr, HeapRef::SetData(data))
    }

    /// WeakMap backing store value
    pub fn ephemeron_map(data: Arc<EphemeronMap>) -> Self {
        let ptr = Arc::as_ptr(&data) as usize;
        Self::pointer(ptr, HeapRef::EphemeronMap(data))
    }

    // ---- predicates ----

    /// undefined?
    #[inline]
    pub fn is_undefined(&self) -> bool {
        self.bits == TAG_UNDEFINED
    }

    /// null?
    #[inline]
    pub fn is_null(&self) -> bool {
        self.bits == TAG_NULL
    }

    /// null or undefined?
    #[inline]
    pub fn is_nullish(&self) -> bool {
        self.bits == TAG_UNDEFINED || self.bits == TAG_NULL
    }

    /// boolean?
    #[inline]
    pub fn is_boolean(&self) -> bool {
        self.bits == TAG_TRUE || self.bits == TAG_FALSE
    }

    /// hole sentinel?
    #[inline]
    pub fn is_hole(&self) -> bool {
        self.bits == TAG_HOLE
    }

    /// int32 fast path?
    #[inline]
    pub fn is_int32(&self) -> bool {
        (self.bits & 0xFFFF_FFFF_0000_0000) == TAG_INT32
    }

    /// NaN?
    #[inline]
    pub fn is_nan(&self) -> bool {
        self.bits == TAG_NAN
    }

    /// number (int32, double, or NaN)?
    #[inline]
    pub fn is_number(&self) -> bool {
        self.is_int32() || self.is_nan() || !self.is_nan_boxed()
    }

    /// string?
    #[inline]
    pub fn is_string(&self) -> bool {
        matches!(&self.heap_ref, Some(HeapRef::String(_)))
    }

    /// symbol?
    #[inline]
    pub fn is_symbol(&self) -> bool {
        matches!(&self.heap_ref, Some(HeapRef::Symbol(_)))
    }

    /// bigint?
    #[inline]
    pub fn is_bigint(&self) -> bool {
        matches!(&self.heap_ref, Some(HeapRef::BigInt(_)))
    }

    /// Object in the broad sense: anything `typeof x === "object"` or
    /// `"function"` except null
    #[inline]
    pub fn is_object(&self) -> bool {
        matches!(
            &self.heap_ref,
            Some(
                HeapRef::Object(_)
                    | HeapRef::Array(_)
                    | HeapRef::Closure(_)
                    | HeapRef::NativeFunction(_)
                    | HeapRef::BoundFunction(_)
                    | HeapRef::Generator(_)
                    | HeapRef::Promise(_)
                    | HeapRef::Proxy(_)
                    | HeapRef::ArrayBuffer(_)
                    | HeapRef::TypedArray(_)
                    | HeapRef::MapData(_)
                    | HeapRef::SetData(_)
                    | HeapRef::EphemeronMap(_)
            )
        )
    }

    /// array?
    #[inline]
    pub fn is_array(&self) -> bool {
        matches!(&self.heap_ref, Some(HeapRef::Array(_)))
    }

    /// Callable (closure, native, bound, or a proxy over a callable)?
    pub fn is_callable(&self) -> bool {
        match &self.heap_ref {
            Some(HeapRef::Closure(_))
            | Some(HeapRef::NativeFunction(_))
            | Some(HeapRef::BoundFunction(_)) => true,
            Some(HeapRef::Proxy(p)) => p.target_raw().is_callable(),
            _ => false,
        }
    }

    /// promise?
    #[inline]
    pub fn is_promise(&self) -> bool {
        matches!(&self.heap_ref, Some(HeapRef::Promise(_)))
    }

    /// proxy?
    #[inline]
    pub fn is_proxy(&self) -> bool {
        matches!(&self.heap_ref, Some(HeapRef::Proxy(_)))
    }

    /// generator?
    #[inline]
    pub fn is_generator(&self) -> bool {
        matches!(&self.heap_ref, Some(HeapRef::Generator(_)))
    }

    #[inline]
    fn is_nan_boxed(&self) -> bool {
        (self.bits & QUIET_NAN) == QUIET_NAN
    }

    // ---- accessors ----

    /// boolean payload
    pub fn as_boolean(&self) -> Option<bool> {
        match self.bits {
            TAG_TRUE => Some(true),
            TAG_FALSE => Some(false),
            _ => None,
        }
    }

    /// int32 payload
    pub fn as_int32(&self) -> Option<i32> {
        if self.is_int32() {
            Some((self.bits & 0xFFFF_FFFF) as i32)
        } else {
            None
        }
    }

    /// numeric payload (int32 widened, NaN canonical)
    pub fn as_number(&self) -> Option<f64> {
        if self.is_int32() {
            Some((self.bits & 0xFFFF_FFFF) as i32 as f64)
        } else if self.bits == TAG_NAN {
            Some(f64::NAN)
        } else if !self.is_nan_boxed() {
            Some(f64::from_bits(self.bits))
        } else {
            None
        }
    }

    /// string payload
    pub fn as_string(&self) -> Option<&Arc<JsString>> {
        match &self.heap_ref {
            Some(HeapRef::String(s)) => Some(s),
            _ => None,
        }
    }

    /// symbol payload
    pub fn as_symbol(&self) -> Option<&Arc<JsSymbol>> {
        match &self.heap_ref {
            Some(HeapRef::Symbol(s)) => Some(s),
            _ => None,
        }
    }

    /// bigint payload
    pub fn as_bigint(&self) -> Option<&Arc<JsBigInt>> {
        match &self.heap_ref {
            Some(HeapRef::BigInt(b)) => Some(b),
            _ => None,
        }
    }

    /// The underlying `JsObject`, including the property object attached
    /// to arrays, closures, natives, and generators
    pub fn as_object(&self) -> Option<Arc<JsObject>> {
        match &self.heap_ref {
            Some(HeapRef::Object(o)) => Some(o.clone()),
            Some(HeapRef::Array(a)) => Some(a.clone()),
            Some(HeapRef::Closure(c)) => Some(c.object.clone()),
            Some(HeapRef::NativeFunction(n)) => Some(n.object.clone()),
            Some(HeapRef::Generator(g)) => Some(g.object.clone()),
            _ => None,
        }
    }

    /// array payload
    pub fn as_array(&self) -> Option<&Arc<JsObject>> {
        match &self.heap_ref {
            Some(HeapRef::Array(a)) => Some(a),
            _ => None,
        }
    }

    /// closure payload
    pub fn as_closure(&self) -> Option<&Arc<Closure>> {
        match &self.heap_ref {
            Some(HeapRef::Closure(c)) => Some(c),
            _ => None,
        }
    }

    /// native function payload
    pub fn as_native_function(&self) -> Option<&Arc<NativeFunction>> {
        match &self.heap_ref {
            Some(HeapRef::NativeFunction(n)) => Some(n),
            _ => None,
        }
    }

    /// bound function payload
    pub fn as_bound_function(&self) -> Option<&Arc<BoundFunction>> {
        match &self.heap_ref {
            Some(HeapRef::BoundFunction(b)) => Some(b),
            _ => None,
        }
    }

    /// generator payload
    pub fn as_generator(&self) -> Option<&Arc<JsGenerator>> {
        match &self.heap_ref {
            Some(HeapRef::Generator(g)) => Some(g),
            _ => None,
        }
    }

    /// promise payload
    pub fn as_promise(&self) -> Option<&Arc<JsPromise>> {
        match &self.heap_ref {
            Some(HeapRef::Promise(p)) => Some(p),
            _ => None,
        }
    }

    /// proxy payload
    pub fn as_proxy(&self) -> Option<&Arc<JsProxy>> {
        match &self.heap_ref {
            Some(HeapRef::Proxy(p)) => Some(p),
            _ => None,
        }
    }

    /// array buffer payload
    pub fn as_array_buffer(&self) -> Option<&Arc<JsArrayBuffer>> {
        match &self.heap_ref {
            Some(HeapRef::ArrayBuffer(ab)) => Some(ab),
            _ => None,
        }
    }

    /// typed array payload
    pub fn as_typed_array(&self) -> Option<&Arc<JsTypedArray>> {
        match &self.heap_ref {
            Some(HeapRef::TypedArray(ta)) => Some(ta),
            _ => None,
        }
    }

    /// map backing store payload
    pub fn as_map_data(&self) -> Option<&Arc<MapData>> {
        match &self.heap_ref {
            Some(HeapRef::MapData(m)) => Some(m),
            _ => None,
        }
    }

    /// set backing store payload
    pub fn as_set_data(&self) -> Option<&Arc<SetData>> {
        match &self.heap_ref {
            Some(HeapRef::SetData(s)) => Some(s),
            _ => None,
        }
    }

    /// weak map backing store payload
    pub fn as_ephemeron_map(&self) -> Option<&Arc<EphemeronMap>> {
        match &self.heap_ref {
            Some(HeapRef::EphemeronMap(e)) => Some(e),
            _ => None,
        }
    }

    /// The heap discriminator
    pub fn heap_ref(&self) -> Option<&HeapRef> {
        self.heap_ref.as_ref()
    }

    /// A stable identity for this value: the boxed bits. Two heap values
    /// have the same identity iff they point at the same allocation.
    #[inline]
    pub fn identity(&self) -> usize {
        self.bits as usize
    }

    // ---- conversions & equality ----

    /// ToBoolean
    pub fn to_boolean(&self) -> bool {
        match self.bits {
            TAG_UNDEFINED | TAG_NULL | TAG_FALSE | TAG_NAN | TAG_HOLE => false,
            TAG_TRUE => true,
            _ if self.is_int32() => self.as_int32() != Some(0),
            _ if !self.is_nan_boxed() => {
                let n = f64::from_bits(self.bits);
                !n.is_nan() && n != 0.0
            }
            _ => match &self.heap_ref {
                Some(HeapRef::String(s)) => !s.is_empty(),
                Some(HeapRef::BigInt(b)) => {
                    use num_traits::Zero;
                    !b.value.is_zero()
                }
                _ => true,
            },
        }
    }

    /// typeof
    pub fn type_of(&self) -> &'static str {
        match self.bits {
            TAG_UNDEFINED | TAG_HOLE => "undefined",
            TAG_NULL => "object", // typeof null === "object" (historical)
            TAG_TRUE | TAG_FALSE => "boolean",
            TAG_NAN => "number",
            _ if self.is_int32() || !self.is_nan_boxed() => "number",
            _ => match &self.heap_ref {
                Some(HeapRef::String(_)) => "string",
                Some(HeapRef::Symbol(_)) => "symbol",
                Some(HeapRef::BigInt(_)) => "bigint",
                Some(
                    HeapRef::Closure(_) | HeapRef::NativeFunction(_) | HeapRef::BoundFunction(_),
                ) => "function",
                Some(HeapRef::Proxy(_)) => {
                    if self.is_callable() {
                        "function"
                    } else {
                        "object"
                    }
                }
                Some(_) => "object",
                None => "undefined",
            },
        }
    }

    /// Strict equality (`===`): `NaN !== NaN`, `+0 === -0`, strings by
    /// content, symbols and objects by identity.
    pub fn strict_equals(&self, other: &Value) -> bool {
        if self.bits == TAG_NAN || other.bits == TAG_NAN {
            return false;
        }
        if self.bits == other.bits {
            return true;
        }
        if self.is_number() && other.is_number() {
            // +0 === -0 and int32/double cross-representation
            return self.as_number() == other.as_number();
        }
        if let (Some(a), Some(b)) = (self.as_string(), other.as_string()) {
            return a == b;
        }
        if let (Some(a), Some(b)) = (self.as_bigint(), other.as_bigint()) {
            return a.value == b.value;
        }
        false
    }

    /// SameValueZero: strict equality except `NaN` equals `NaN`.
    /// Map/Set key comparison uses this.
    pub fn same_value_zero(&self, other: &Value) -> bool {
        if self.bits == TAG_NAN && other.bits == TAG_NAN {
            return true;
        }
        self.strict_equals(other)
    }

    /// Trace references for the mark phase
    pub fn trace(&self, tracer: &mut Tracer) {
        match &self.heap_ref {
            Some(HeapRef::String(s)) => tracer.mark(s.as_ref()),
            Some(HeapRef::Symbol(s)) => tracer.mark(s.as_ref()),
            Some(HeapRef::BigInt(b)) => tracer.mark(b.as_ref()),
            Some(HeapRef::Object(o)) | Some(HeapRef::Array(o)) => tracer.mark(o.as_ref()),
            Some(HeapRef::Closure(c)) => tracer.mark(c.as_ref()),
            Some(HeapRef::NativeFunction(n)) => tracer.mark(n.as_ref()),
            Some(HeapRef::BoundFunction(b)) => tracer.mark(b.as_ref()),
            Some(HeapRef::Generator(g)) => tracer.mark(g.as_ref()),
            Some(HeapRef::Promise(p)) => tracer.mark(p.as_ref()),
            Some(HeapRef::Proxy(p)) => tracer.mark(p.as_ref()),
            Some(HeapRef::ArrayBuffer(ab)) => tracer.mark(ab.as_ref()),
            Some(HeapRef::TypedArray(ta)) => tracer.mark(ta.as_ref()),
            Some(HeapRef::MapData(m)) => tracer.mark(m.as_ref()),
            Some(HeapRef::SetData(s)) => tracer.mark(s.as_ref()),
            Some(HeapRef::EphemeronMap(e)) => tracer.mark(e.as_ref()),
            None => {}
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::undefined()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.strict_equals(other)
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.bits {
            TAG_UNDEFINED => write!(f, "undefined"),
            TAG_HOLE => write!(f, "<hole>"),
            TAG_NULL => write!(f, "null"),
            TAG_TRUE => write!(f, "true"),
            TAG_FALSE => write!(f, "false"),
            _ if self.is_int32() => write!(f, "{}", self.as_int32().unwrap_or(0)),
            TAG_NAN => write!(f, "NaN"),
            _ if !self.is_nan_boxed() => write!(f, "{}", f64::from_bits(self.bits)),
            _ => match &self.heap_ref {
                Some(HeapRef::String(s)) => write!(f, "{:?}", s.as_str()),
                Some(HeapRef::Symbol(s)) => write!(f, "{:?}", s),
                Some(HeapRef::BigInt(b)) => write!(f, "{:?}", b),
                Some(HeapRef::Object(_)) => write!(f, "[object Object]"),
                Some(HeapRef::Array(_)) => write!(f, "[object Array]"),
                Some(HeapRef::Closure(_)) => write!(f, "[Function]"),
                Some(HeapRef::NativeFunction(n)) => write!(f, "[NativeFunction {}]", n.name),
                Some(HeapRef::BoundFunction(_)) => write!(f, "[Function (bound)]"),
                Some(HeapRef::Generator(_)) => write!(f, "[object Generator]"),
                Some(HeapRef::Promise(_)) => write!(f, "[object Promise]"),
                Some(HeapRef::Proxy(_)) => write!(f, "[object Proxy]"),
                Some(HeapRef::ArrayBuffer(ab)) => write!(f, "ArrayBuffer({})", ab.byte_length()),
                Some(HeapRef::TypedArray(ta)) => write!(f, "TypedArray({})", ta.length()),
                Some(HeapRef::MapData(_)) => write!(f, "[object Map]"),
                Some(HeapRef::SetData(_)) => write!(f, "[object Set]"),
                Some(HeapRef::EphemeronMap(_)) => write!(f, "[object WeakMap]"),
                None => write!(f, "<unknown>"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undefined() {
        let v = Value::undefined();
        assert!(v.is_undefined());
        assert!(!v.to_boolean());
        assert_eq!(v.type_of(), "undefined");
    }

    #[test]
    fn test_null() {
        let v = Value::null();
        assert!(v.is_null());
        assert!(v.is_nullish());
        assert_eq!(v.type_of(), "object");
    }

    #[test]
    fn test_int32() {
        let v = Value::int32(42);
        assert!(v.is_int32());
        assert!(v.is_number());
        assert_eq!(v.as_int32(), Some(42));
        assert_eq!(v.as_number(), Some(42.0));
    }

    #[test]
    fn test_number_int32_promotion() {
        assert!(Value::number(7.0).is_int32());
        assert!(!Value::number(7.5).is_int32());
        // -0.0 must stay a double so +0 and -0 stay distinguishable bits
        assert!(!Value::number(-0.0).is_int32());
    }

    #[test]
    fn test_nan_not_equal_to_itself() {
        let a = Value::nan();
        let b = Value::number(f64::NAN);
        assert!(a.is_nan());
        assert!(!a.strict_equals(&b));
        assert!(!a.strict_equals(&a));
        assert!(a.same_value_zero(&b));
    }

    #[test]
    fn test_zero_signs_strict_equal() {
        let pos = Value::number(0.0);
        let neg = Value::number(-0.0);
        assert!(pos.strict_equals(&neg));
    }

    #[test]
    fn test_string_equality_by_content() {
        let a = Value::str("abc");
        let b = Value::str("abc");
        assert!(a.strict_equals(&b));
    }

    #[test]
    fn test_hole_is_invisible_undefined() {
        let v = Value::hole();
        assert!(v.is_hole());
        assert!(!v.is_undefined());
        assert_eq!(v.type_of(), "undefined");
        assert!(!v.to_boolean());
    }

    #[test]
    fn test_typeof_function_kinds() {
        let native = Value::native_function("f", 0, |_, _, _| Ok(Value::undefined()));
        assert_eq!(native.type_of(), "function");
        assert!(native.is_callable());

        let bound = Value::bound_function(native, Value::null(), vec![]);
        assert_eq!(bound.type_of(), "function");
        assert!(bound.is_callable());
    }

    #[test]
    fn test_object_identity() {
        let obj = Arc::new(JsObject::new(Value::null()));
        let a = Value::object(obj.clone());
        let b = Value::object(obj);
        assert!(a.strict_equals(&b));

        let other = Value::object(Arc::new(JsObject::new(Value::null())));
        assert!(!a.strict_equals(&other));
    }
}
