//! Script objects
//!
//! An object is a shape pointer plus a slot vector. Property adds follow
//! the shape transition tree; after a `delete`, a prototype change, or too
//! many transitions the object converts to dictionary mode (an
//! insertion-ordered hash map) and never goes back.

use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use paserati_gc::object::tags;
use paserati_gc::{GcHeader, GcObject, Tracer};

use crate::shape::{DICTIONARY_THRESHOLD, Shape};
use crate::string::JsString;
use crate::value::Value;

/// Epoch counter invalidating prototype-chain inline-cache entries.
/// Bumped on any mutation that could change what a chain walk observes
/// above the receiver: property add/delete, descriptor changes, prototype
/// changes. Depth-0 entries don't consult it (the receiver's own shape
/// already keys those).
static PROTO_EPOCH: AtomicU64 = AtomicU64::new(0);

/// Current prototype-chain epoch
#[inline]
pub fn proto_epoch() -> u64 {
    PROTO_EPOCH.load(Ordering::Relaxed)
}

#[inline]
fn bump_proto_epoch() {
    PROTO_EPOCH.fetch_add(1, Ordering::Relaxed);
}

/// Property key (string, symbol, or integer index)
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    /// String property key
    String(Arc<JsString>),
    /// Symbol property key (by id)
    Symbol(u64),
    /// Integer index (array elements)
    Index(u32),
}

impl PropertyKey {
    /// Create a string property key
    pub fn string(s: &str) -> Self {
        // Canonical numeric strings are element accesses
        if let Ok(i) = s.parse::<u32>() {
            if i.to_string() == s {
                return Self::Index(i);
            }
        }
        Self::String(JsString::intern(s))
    }

    /// Create from an interned string
    pub fn from_js_string(s: Arc<JsString>) -> Self {
        if let Ok(i) = s.as_str().parse::<u32>() {
            if i.to_string() == s.as_str() {
                return Self::Index(i);
            }
        }
        Self::String(s)
    }

    /// Create an index property key
    pub fn index(i: u32) -> Self {
        Self::Index(i)
    }

    /// The key as a display string (for for-in and diagnostics)
    pub fn to_display_string(&self) -> String {
        match self {
            Self::String(s) => s.as_str().to_string(),
            Self::Symbol(id) => format!("Symbol({})", id),
            Self::Index(i) => i.to_string(),
        }
    }
}

impl From<&str> for PropertyKey {
    fn from(s: &str) -> Self {
        Self::string(s)
    }
}

impl From<u32> for PropertyKey {
    fn from(i: u32) -> Self {
        Self::Index(i)
    }
}

/// Property attributes
#[derive(Clone, Copy, Debug)]
pub struct PropertyAttributes {
    /// Property is writable
    pub writable: bool,
    /// Property is enumerable
    pub enumerable: bool,
    /// Property is configurable
    pub configurable: bool,
}

impl PropertyAttributes {
    /// Default data property attributes
    pub const fn data() -> Self {
        Self {
            writable: true,
            enumerable: true,
            configurable: true,
        }
    }

    /// Non-enumerable but writable/configurable (function `name` etc.)
    pub const fn hidden() -> Self {
        Self {
            writable: true,
            enumerable: false,
            configurable: true,
        }
    }

    /// Fully locked
    pub const fn frozen() -> Self {
        Self {
            writable: false,
            enumerable: false,
            configurable: false,
        }
    }
}

impl Default for PropertyAttributes {
    fn default() -> Self {
        Self::data()
    }
}

/// A property slot: data or accessor
#[derive(Clone, Debug)]
pub enum PropertySlot {
    /// Data property
    Data {
        /// The value
        value: Value,
        /// Attributes
        attributes: PropertyAttributes,
    },
    /// Accessor property
    Accessor {
        /// Getter function
        get: Option<Value>,
        /// Setter function
        set: Option<Value>,
        /// Attributes
        attributes: PropertyAttributes,
    },
}

impl PropertySlot {
    /// Create a data slot with default attributes
    pub fn data(value: Value) -> Self {
        Self::Data {
            value,
            attributes: PropertyAttributes::data(),
        }
    }

    /// Create a data slot with given attributes
    pub fn data_with_attrs(value: Value, attributes: PropertyAttributes) -> Self {
        Self::Data { value, attributes }
    }

    /// Data value, if this is a data slot
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Data { value, .. } => Some(value),
            Self::Accessor { .. } => None,
        }
    }

    /// Attributes of either slot kind
    pub fn attributes(&self) -> PropertyAttributes {
        match self {
            Self::Data { attributes, .. } | Self::Accessor { attributes, .. } => *attributes,
        }
    }

    /// Writable data slot?
    pub fn is_writable(&self) -> bool {
        match self {
            Self::Data { attributes, .. } => attributes.writable,
            Self::Accessor { .. } => false,
        }
    }
}

/// Property storage: shape mode or dictionary mode
enum Storage {
    Shaped {
        shape: Arc<Shape>,
        slots: Vec<PropertySlot>,
    },
    Dictionary(IndexMap<PropertyKey, PropertySlot>),
}

struct ObjectInner {
    storage: Storage,
    /// Array element storage; absent elements are holes
    elements: Vec<Value>,
    /// Authoritative prototype. In shape mode this mirrors the shape's
    /// prototype; in dictionary mode the shape is gone.
    prototype: Value,
    extensible: bool,
    is_array: bool,
}

/// A script object
pub struct JsObject {
    header: GcHeader,
    inner: RwLock<ObjectInner>,
}

// SAFETY: interior mutability behind RwLock; the VM itself is
// thread-confined.
unsafe impl Send for JsObject {}
unsafe impl Sync for JsObject {}

impl JsObject {
    /// Create a new empty object with the given prototype (null or object)
    pub fn new(prototype: Value) -> Self {
        let shape = Shape::root_for(prototype.clone());
        Self {
            header: GcHeader::new(tags::OBJECT),
            inner: RwLock::new(ObjectInner {
                storage: Storage::Shaped {
                    shape,
                    slots: Vec::new(),
                },
                elements: Vec::new(),
                prototype,
                extensible: true,
                is_array: false,
            }),
        }
    }

    /// Create a new array of `length` holes
    pub fn array(length: usize, prototype: Value) -> Self {
        let shape = Shape::root_for(prototype.clone());
        Self {
            header: GcHeader::new(tags::ARRAY),
            inner: RwLock::new(ObjectInner {
                storage: Storage::Shaped {
                    shape,
                    slots: Vec::new(),
                },
                elements: vec![Value::hole(); length],
                prototype,
                extensible: true,
                is_array: true,
            }),
        }
    }

    /// Is this object an array?
    pub fn is_array(&self) -> bool {
        self.inner.read().is_array
    }

    /// The prototype value (null or object)
    pub fn prototype(&self) -> Value {
        self.inner.read().prototype.clone()
    }

    /// Replace the prototype. Forces dictionary mode: the shape encodes
    /// the prototype, and per-object shape trees would defeat IC sharing.
    pub fn set_prototype(&self, prototype: Value) {
        let mut inner = self.inner.write();
        Self::to_dictionary(&mut inner);
        inner.prototype = prototype;
        bump_proto_epoch();
    }

    /// Shape identity for inline caches; None once in dictionary mode
    pub fn shape_id(&self) -> Option<usize> {
        match &self.inner.read().storage {
            Storage::Shaped { shape, .. } => Some(shape.id()),
            Storage::Dictionary(_) => None,
        }
    }

    /// The current shape; None once in dictionary mode
    pub fn shape(&self) -> Option<Arc<Shape>> {
        match &self.inner.read().storage {
            Storage::Shaped { shape, .. } => Some(shape.clone()),
            Storage::Dictionary(_) => None,
        }
    }

    /// Read a data slot by shape offset (IC fast path)
    pub fn slot(&self, offset: usize) -> Option<Value> {
        match &self.inner.read().storage {
            Storage::Shaped { slots, .. } => slots.get(offset).and_then(|s| s.value().cloned()),
            Storage::Dictionary(_) => None,
        }
    }

    /// Write a data slot by shape offset (IC fast path). Fails on
    /// accessor slots and non-writable data.
    pub fn set_slot(&self, offset: usize, value: Value) -> bool {
        let mut inner = self.inner.write();
        match &mut inner.storage {
            Storage::Shaped { slots, .. } => match slots.get_mut(offset) {
                Some(PropertySlot::Data { value: v, attributes }) if attributes.writable => {
                    *v = value;
                    true
                }
                _ => false,
            },
            Storage::Dictionary(_) => false,
        }
    }

    /// Look up an own property slot
    pub fn own_slot(&self, key: &PropertyKey) -> Option<PropertySlot> {
        let inner = self.inner.read();

        if let PropertyKey::Index(i) = key {
            if let Some(v) = Self::element_at(&inner, *i) {
                return Some(PropertySlot::data(v));
            }
        }

        if inner.is_array {
            if let PropertyKey::String(s) = key {
                if s.as_str() == "length" {
                    return Some(PropertySlot::data_with_attrs(
                        Value::number(inner.elements.len() as f64),
                        PropertyAttributes {
                            writable: true,
                            enumerable: false,
                            configurable: false,
                        },
                    ));
                }
            }
        }

        match &inner.storage {
            Storage::Shaped { shape, slots } => shape
                .get_offset(key)
                .and_then(|offset| slots.get(offset).cloned()),
            Storage::Dictionary(map) => map.get(key).cloned(),
        }
    }

    /// Look up a slot along the prototype chain. Returns the slot and the
    /// chain depth it was found at (0 = own).
    pub fn lookup_with_depth(&self, key: &PropertyKey) -> Option<(PropertySlot, usize)> {
        if let Some(slot) = self.own_slot(key) {
            return Some((slot, 0));
        }
        let mut proto = self.prototype();
        let mut depth = 1;
        while let Some(obj) = proto.as_object() {
            if let Some(slot) = obj.own_slot(key) {
                return Some((slot, depth));
            }
            proto = obj.prototype();
            depth += 1;
        }
        None
    }

    /// Chain lookup returning the data value (accessors excluded).
    /// Internal plumbing; script-visible reads go through the interpreter
    /// so getters can run.
    pub fn get(&self, key: &PropertyKey) -> Option<Value> {
        self.lookup_with_depth(key)
            .and_then(|(slot, _)| slot.value().cloned())
    }

    /// The shape-offset an own data property lives at (for IC recording)
    pub fn own_offset(&self, key: &PropertyKey) -> Option<usize> {
        match &self.inner.read().storage {
            Storage::Shaped { shape, .. } => shape.get_offset(key),
            Storage::Dictionary(_) => None,
        }
    }

    /// Set a property on this object. Adds follow the shape transition
    /// tree; writes to existing writable data slots update in place.
    /// Returns false on non-writable or non-extensible failures and on
    /// accessor slots (the interpreter dispatches setters before calling
    /// this).
    pub fn set(&self, key: PropertyKey, value: Value) -> bool {
        let mut inner = self.inner.write();

        if let PropertyKey::Index(i) = &key {
            return Self::set_element_inner(&mut inner, *i, value);
        }

        if inner.is_array {
            if let PropertyKey::String(s) = &key {
                if s.as_str() == "length" {
                    let new_len = value.as_number().unwrap_or(f64::NAN);
                    if new_len.fract() != 0.0 || !(0.0..=u32::MAX as f64).contains(&new_len) {
                        return false;
                    }
                    inner.elements.resize(new_len as usize, Value::hole());
                    return true;
                }
            }
        }

        // Existing own property: write in place
        let existing = match &mut inner.storage {
            Storage::Shaped { shape, slots } => shape
                .get_offset(&key)
                .map(|offset| Self::write_slot(&mut slots[offset], value.clone())),
            Storage::Dictionary(map) => map
                .get_mut(&key)
                .map(|slot| Self::write_slot(slot, value.clone())),
        };
        if let Some(wrote) = existing {
            return wrote;
        }

        // New property: follow the transition tree, or convert to
        // dictionary mode past the threshold
        if !inner.extensible {
            return false;
        }
        let over_threshold = matches!(
            &inner.storage,
            Storage::Shaped { shape, .. } if shape.property_count() >= DICTIONARY_THRESHOLD
        );
        if over_threshold {
            Self::to_dictionary(&mut inner);
        }
        bump_proto_epoch();
        match &mut inner.storage {
            Storage::Shaped { shape, slots } => {
                let new_shape = shape.transition(key);
                *shape = new_shape;
                slots.push(PropertySlot::data(value));
            }
            Storage::Dictionary(map) => {
                map.insert(key, PropertySlot::data(value));
            }
        }
        true
    }

    fn write_slot(slot: &mut PropertySlot, value: Value) -> bool {
        match slot {
            PropertySlot::Data { value: v, attributes } if attributes.writable => {
                *v = value;
                true
            }
            _ => false,
        }
    }

    /// Define a property with an explicit slot, bypassing writability
    /// (but not extensibility for new keys)
    pub fn define_property(&self, key: PropertyKey, slot: PropertySlot) -> bool {
        let mut inner = self.inner.write();

        if let PropertyKey::Index(i) = &key {
            if let Some(v) = slot.value().cloned() {
                return Self::set_element_inner(&mut inner, *i, v);
            }
            // Accessor elements force dictionary mode
            Self::to_dictionary(&mut inner);
        }

        // Redefinition of an existing own property
        let redefined = match &mut inner.storage {
            Storage::Shaped { shape, slots } => match shape.get_offset(&key) {
                Some(offset) => {
                    slots[offset] = slot.clone();
                    true
                }
                None => false,
            },
            Storage::Dictionary(map) => match map.get_mut(&key) {
                Some(existing) => {
                    *existing = slot.clone();
                    true
                }
                None => false,
            },
        };
        if redefined {
            bump_proto_epoch();
            return true;
        }

        if !inner.extensible {
            return false;
        }
        let over_threshold = matches!(
            &inner.storage,
            Storage::Shaped { shape, .. } if shape.property_count() >= DICTIONARY_THRESHOLD
        );
        if over_threshold {
            Self::to_dictionary(&mut inner);
        }
        bump_proto_epoch();
        match &mut inner.storage {
            Storage::Shaped { shape, slots } => {
                let new_shape = shape.transition(key);
                *shape = new_shape;
                slots.push(slot);
            }
            Storage::Dictionary(map) => {
                map.insert(key, slot);
            }
        }
        true
    }

    /// Delete a property. Returns true when the property is gone
    /// afterwards (including "was never there"). Converts to dictionary
    /// mode irreversibly.
    pub fn delete(&self, key: &PropertyKey) -> bool {
        let mut inner = self.inner.write();

        if let PropertyKey::Index(i) = key {
            let idx = *i as usize;
            if idx < inner.elements.len() {
                inner.elements[idx] = Value::hole();
            }
            bump_proto_epoch();
            return true;
        }

        if inner.is_array {
            if let PropertyKey::String(s) = key {
                if s.as_str() == "length" {
                    return false;
                }
            }
        }

        Self::to_dictionary(&mut inner);
        let result = match &mut inner.storage {
            Storage::Dictionary(map) => {
                let configurable = map.get(key).map(|slot| slot.attributes().configurable);
                match configurable {
                    Some(false) => false,
                    Some(true) => {
                        map.shift_remove(key);
                        true
                    }
                    None => true,
                }
            }
            Storage::Shaped { .. } => true,
        };
        bump_proto_epoch();
        result
    }

    /// Own property present?
    pub fn has_own(&self, key: &PropertyKey) -> bool {
        self.own_slot(key).is_some()
    }

    /// Property present anywhere on the chain?
    pub fn has(&self, key: &PropertyKey) -> bool {
        self.lookup_with_depth(key).is_some()
    }

    /// Own keys: element indices first (ascending), then named keys in
    /// insertion order.
    pub fn own_keys(&self) -> Vec<PropertyKey> {
        let inner = self.inner.read();
        let mut keys = Vec::new();
        for (i, v) in inner.elements.iter().enumerate() {
            if !v.is_hole() {
                keys.push(PropertyKey::Index(i as u32));
            }
        }
        match &inner.storage {
            Storage::Shaped { shape, .. } => keys.extend(shape.own_keys()),
            Storage::Dictionary(map) => keys.extend(map.keys().cloned()),
        }
        keys
    }

    /// Own enumerable string/index keys, for for-in and object rest
    pub fn own_enumerable_string_keys(&self) -> Vec<PropertyKey> {
        self.own_keys()
            .into_iter()
            .filter(|key| {
                if matches!(key, PropertyKey::Symbol(_)) {
                    return false;
                }
                self.own_slot(key)
                    .map(|slot| slot.attributes().enumerable)
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Extensible?
    pub fn is_extensible(&self) -> bool {
        self.inner.read().extensible
    }

    /// Prevent further property additions
    pub fn prevent_extensions(&self) {
        self.inner.write().extensible = false;
    }

    // ---- element storage ----

    /// Read an element; holes read as None
    pub fn element(&self, index: u32) -> Option<Value> {
        Self::element_at(&self.inner.read(), index)
    }

    /// Write an element, growing the storage with holes as needed
    pub fn set_element(&self, index: u32, value: Value) -> bool {
        Self::set_element_inner(&mut self.inner.write(), index, value)
    }

    /// Number of elements (array `length`)
    pub fn elements_len(&self) -> usize {
        self.inner.read().elements.len()
    }

    /// Append an element
    pub fn push_element(&self, value: Value) {
        self.inner.write().elements.push(value);
    }

    /// Snapshot the element vector (holes read as undefined)
    pub fn elements_vec(&self) -> Vec<Value> {
        self.inner
            .read()
            .elements
            .iter()
            .map(|v| if v.is_hole() { Value::undefined() } else { v.clone() })
            .collect()
    }

    fn element_at(inner: &ObjectInner, index: u32) -> Option<Value> {
        let v = inner.elements.get(index as usize)?;
        if v.is_hole() { None } else { Some(v.clone()) }
    }

    fn set_element_inner(inner: &mut ObjectInner, index: u32, value: Value) -> bool {
        let idx = index as usize;
        if idx < inner.elements.len() {
            inner.elements[idx] = value;
            return true;
        }
        if !inner.extensible {
            return false;
        }
        inner.elements.resize(idx, Value::hole());
        inner.elements.push(value);
        true
    }

    // ---- dictionary conversion ----

    fn to_dictionary(inner: &mut ObjectInner) {
        if let Storage::Shaped { shape, slots } = &inner.storage {
            let mut map = IndexMap::with_capacity(slots.len());
            for (key, slot) in shape.own_keys().into_iter().zip(slots.iter()) {
                map.insert(key, slot.clone());
            }
            inner.storage = Storage::Dictionary(map);
        }
    }

}

impl std::fmt::Debug for JsObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        let (mode, count) = match &inner.storage {
            Storage::Shaped { shape, .. } => ("shaped", shape.property_count()),
            Storage::Dictionary(map) => ("dictionary", map.len()),
        };
        f.debug_struct("JsObject")
            .field("mode", &mode)
            .field("properties", &count)
            .field("elements", &inner.elements.len())
            .field("is_array", &inner.is_array)
            .finish()
    }
}

impl GcObject for JsObject {
    fn header(&self) -> &GcHeader {
        &self.header
    }

    fn trace(&self, tracer: &mut Tracer) {
        let inner = self.inner.read();
        inner.prototype.trace(tracer);
        for v in &inner.elements {
            v.trace(tracer);
        }
        let trace_slot = |slot: &PropertySlot, tracer: &mut Tracer| match slot {
            PropertySlot::Data { value, .. } => value.trace(tracer),
            PropertySlot::Accessor { get, set, .. } => {
                if let Some(g) = get {
                    g.trace(tracer);
                }
                if let Some(s) = set {
                    s.trace(tracer);
                }
            }
        };
        match &inner.storage {
            Storage::Shaped { slots, .. } => {
                for slot in slots {
                    trace_slot(slot, tracer);
                }
            }
            Storage::Dictionary(map) => {
                for slot in map.values() {
                    trace_slot(slot, tracer);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_set() {
        let obj = JsObject::new(Value::null());
        assert!(obj.set(PropertyKey::string("foo"), Value::int32(42)));
        assert_eq!(obj.get(&PropertyKey::string("foo")), Some(Value::int32(42)));
    }

    #[test]
    fn test_shape_sharing_across_objects() {
        let a = JsObject::new(Value::null());
        let b = JsObject::new(Value::null());
        a.set(PropertyKey::string("x"), Value::int32(1));
        b.set(PropertyKey::string("x"), Value::int32(2));
        assert_eq!(a.shape_id(), b.shape_id());

        b.set(PropertyKey::string("y"), Value::int32(3));
        assert_ne!(a.shape_id(), b.shape_id());
    }

    #[test]
    fn test_delete_forces_dictionary_forever() {
        let obj = JsObject::new(Value::null());
        obj.set(PropertyKey::string("a"), Value::int32(1));
        obj.set(PropertyKey::string("b"), Value::int32(2));
        assert!(obj.shape_id().is_some());

        assert!(obj.delete(&PropertyKey::string("a")));
        assert!(obj.shape_id().is_none());
        assert!(!obj.has_own(&PropertyKey::string("a")));
        assert_eq!(obj.get(&PropertyKey::string("b")), Some(Value::int32(2)));

        // Adding more properties doesn't restore shape mode
        obj.set(PropertyKey::string("c"), Value::int32(3));
        assert!(obj.shape_id().is_none());
    }

    #[test]
    fn test_dictionary_after_threshold() {
        let obj = JsObject::new(Value::null());
        for i in 0..(DICTIONARY_THRESHOLD + 1) {
            obj.set(PropertyKey::string(&format!("p{}", i)), Value::int32(i as i32));
        }
        assert!(obj.shape_id().is_none());
        assert_eq!(obj.get(&PropertyKey::string("p0")), Some(Value::int32(0)));
    }

    #[test]
    fn test_prototype_chain_lookup() {
        let proto = Arc::new(JsObject::new(Value::null()));
        proto.set(PropertyKey::string("inherited"), Value::int32(7));

        let obj = JsObject::new(Value::object(proto));
        let (slot, depth) = obj.lookup_with_depth(&PropertyKey::string("inherited")).unwrap();
        assert_eq!(slot.value(), Some(&Value::int32(7)));
        assert_eq!(depth, 1);
        assert!(obj.has(&PropertyKey::string("inherited")));
        assert!(!obj.has_own(&PropertyKey::string("inherited")));
    }

    #[test]
    fn test_array_length() {
        let arr = JsObject::array(3, Value::null());
        assert!(arr.is_array());
        assert_eq!(
            arr.get(&PropertyKey::string("length")),
            Some(Value::int32(3))
        );

        arr.set_element(5, Value::int32(9));
        assert_eq!(
            arr.get(&PropertyKey::string("length")),
            Some(Value::int32(6))
        );

        // delete arr.length is refused
        assert!(!arr.delete(&PropertyKey::string("length")));
    }

    #[test]
    fn test_delete_element_leaves_hole() {
        let arr = JsObject::array(0, Value::null());
        arr.push_element(Value::int32(1));
        arr.push_element(Value::int32(2));

        assert!(arr.delete(&PropertyKey::Index(0)));
        assert_eq!(arr.element(0), None);
        assert_eq!(arr.element(1), Some(Value::int32(2)));
        // length unchanged by the hole
        assert_eq!(arr.elements_len(), 2);
    }

    #[test]
    fn test_non_writable_rejects_set() {
        let obj = JsObject::new(Value::null());
        obj.define_property(
            PropertyKey::string("ro"),
            PropertySlot::data_with_attrs(Value::int32(1), PropertyAttributes::frozen()),
        );
        assert!(!obj.set(PropertyKey::string("ro"), Value::int32(2)));
        assert_eq!(obj.get(&PropertyKey::string("ro")), Some(Value::int32(1)));
    }

    #[test]
    fn test_non_configurable_rejects_delete() {
        let obj = JsObject::new(Value::null());
        obj.define_property(
            PropertyKey::string("keep"),
            PropertySlot::data_with_attrs(Value::int32(1), PropertyAttributes::frozen()),
        );
        assert!(!obj.delete(&PropertyKey::string("keep")));
        assert!(obj.has_own(&PropertyKey::string("keep")));
    }

    #[test]
    fn test_numeric_string_key_is_index() {
        let arr = JsObject::array(0, Value::null());
        arr.set(PropertyKey::string("0"), Value::int32(5));
        assert_eq!(arr.element(0), Some(Value::int32(5)));
    }

    #[test]
    fn test_own_keys_order() {
        let obj = JsObject::new(Value::null());
        obj.set(PropertyKey::string("z"), Value::int32(1));
        obj.set(PropertyKey::string("a"), Value::int32(2));
        let keys = obj.own_keys();
        assert_eq!(keys[0], PropertyKey::string("z"));
        assert_eq!(keys[1], PropertyKey::string("a"));
    }

    #[test]
    fn test_set_prototype_bumps_epoch_and_dictionaries() {
        let obj = JsObject::new(Value::null());
        obj.set(PropertyKey::string("x"), Value::int32(1));
        let before = proto_epoch();
        obj.set_prototype(Value::object(Arc::new(JsObject::new(Value::null()))));
        assert!(proto_epoch() > before);
        assert!(obj.shape_id().is_none());
        assert_eq!(obj.get(&PropertyKey::string("x")), Some(Value::int32(1)));
    }
}
