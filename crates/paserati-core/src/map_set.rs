//! Map/Set/WeakMap backing stores
//!
//! These are the value-model stores the VM hands to the builtin surface;
//! key comparison is SameValueZero (so `NaN` can be a key) and iteration
//! order is insertion order.

use parking_lot::Mutex;
use paserati_gc::object::tags;
use paserati_gc::{GcHeader, GcObject, Tracer};

use crate::value::Value;

/// Map entries in insertion order
pub struct MapData {
    header: GcHeader,
    entries: Mutex<Vec<(Value, Value)>>,
}

impl MapData {
    /// Create an empty map store
    pub fn new() -> Self {
        Self {
            header: GcHeader::new(tags::OBJECT),
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Get the value for a key
    pub fn get(&self, key: &Value) -> Option<Value> {
        self.entries
            .lock()
            .iter()
            .find(|(k, _)| k.same_value_zero(key))
            .map(|(_, v)| v.clone())
    }

    /// Insert or update a key
    pub fn set(&self, key: Value, value: Value) {
        let mut entries = self.entries.lock();
        for (k, v) in entries.iter_mut() {
            if k.same_value_zero(&key) {
                *v = value;
                return;
            }
        }
        entries.push((key, value));
    }

    /// Remove a key; true if it was present
    pub fn delete(&self, key: &Value) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(k, _)| !k.same_value_zero(key));
        entries.len() != before
    }

    /// Key present?
    pub fn has(&self, key: &Value) -> bool {
        self.entries.lock().iter().any(|(k, _)| k.same_value_zero(key))
    }

    /// Number of entries
    pub fn size(&self) -> usize {
        self.entries.lock().len()
    }

    /// Remove everything
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Snapshot entries in insertion order
    pub fn entries_vec(&self) -> Vec<(Value, Value)> {
        self.entries.lock().clone()
    }
}

impl Default for MapData {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MapData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MapData({} entries)", self.size())
    }
}

impl GcObject for MapData {
    fn header(&self) -> &GcHeader {
        &self.header
    }

    fn trace(&self, tracer: &mut Tracer) {
        for (k, v) in self.entries.lock().iter() {
            k.trace(tracer);
            v.trace(tracer);
        }
    }
}

/// Set entries in insertion order
pub struct SetData {
    header: GcHeader,
    entries: Mutex<Vec<Value>>,
}

impl SetData {
    /// Create an empty set store
    pub fn new() -> Self {
        Self {
            header: GcHeader::new(tags::OBJECT),
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Add a value; no-op if already present
    pub fn add(&self, value: Value) {
        let mut entries = self.entries.lock();
        if !entries.iter().any(|v| v.same_value_zero(&value)) {
            entries.push(value);
        }
    }

    /// Remove a value; true if it was present
    pub fn delete(&self, value: &Value) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|v| !v.same_value_zero(value));
        entries.len() != before
    }

    /// Value present?
    pub fn has(&self, value: &Value) -> bool {
        self.entries.lock().iter().any(|v| v.same_value_zero(value))
    }

    /// Number of entries
    pub fn size(&self) -> usize {
        self.entries.lock().len()
    }

    /// Snapshot values in insertion order
    pub fn values_vec(&self) -> Vec<Value> {
        self.entries.lock().clone()
    }
}

impl Default for SetData {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SetData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SetData({} entries)", self.size())
    }
}

impl GcObject for SetData {
    fn header(&self) -> &GcHeader {
        &self.header
    }

    fn trace(&self, tracer: &mut Tracer) {
        for v in self.entries.lock().iter() {
            v.trace(tracer);
        }
    }
}

/// WeakMap/WeakSet backing store with ephemeron reachability: an entry's
/// value is kept alive only while its key is. Keys must be objects.
pub struct EphemeronMap {
    header: GcHeader,
    entries: Mutex<Vec<(Value, Value)>>,
}

impl EphemeronMap {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            header: GcHeader::new(tags::OBJECT),
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Get the value for an object key
    pub fn get(&self, key: &Value) -> Option<Value> {
        self.entries
            .lock()
            .iter()
            .find(|(k, _)| k.strict_equals(key))
            .map(|(_, v)| v.clone())
    }

    /// Insert or update an object key
    pub fn set(&self, key: Value, value: Value) {
        let mut entries = self.entries.lock();
        for (k, v) in entries.iter_mut() {
            if k.strict_equals(&key) {
                *v = value;
                return;
            }
        }
        entries.push((key, value));
    }

    /// Remove a key; true if it was present
    pub fn delete(&self, key: &Value) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(k, _)| !k.strict_equals(key));
        entries.len() != before
    }

    /// Key present?
    pub fn has(&self, key: &Value) -> bool {
        self.entries.lock().iter().any(|(k, _)| k.strict_equals(key))
    }
}

impl Default for EphemeronMap {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EphemeronMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EphemeronMap({} entries)", self.entries.lock().len())
    }
}

impl GcObject for EphemeronMap {
    fn header(&self) -> &GcHeader {
        &self.header
    }

    fn trace(&self, _tracer: &mut Tracer) {
        // Keys are weak and values are key-dependent; both are handled by
        // the collector's ephemeron fixpoint, not by ordinary tracing.
    }
}

impl paserati_gc::EphemeronTable for EphemeronMap {
    fn trace_live(&self, tracer: &mut Tracer) -> usize {
        let mut traced = 0;
        for (key, value) in self.entries.lock().iter() {
            let key_marked = key
                .as_object()
                .map(|o| o.header().is_marked())
                .unwrap_or(false);
            if key_marked {
                value.trace(tracer);
                traced += 1;
            }
        }
        traced
    }

    fn sweep_dead(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(key, _)| {
            key.as_object()
                .map(|o| o.header().is_marked())
                .unwrap_or(false)
        });
        before - entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_nan_key() {
        let map = MapData::new();
        map.set(Value::nan(), Value::int32(1));
        assert_eq!(map.get(&Value::nan()), Some(Value::int32(1)));
        assert!(map.has(&Value::nan()));
        assert!(map.delete(&Value::nan()));
        assert_eq!(map.size(), 0);
    }

    #[test]
    fn test_map_insertion_order() {
        let map = MapData::new();
        map.set(Value::str("b"), Value::int32(2));
        map.set(Value::str("a"), Value::int32(1));
        let entries = map.entries_vec();
        assert!(entries[0].0.strict_equals(&Value::str("b")));
        assert!(entries[1].0.strict_equals(&Value::str("a")));
    }

    #[test]
    fn test_set_dedup() {
        let set = SetData::new();
        set.add(Value::int32(1));
        set.add(Value::int32(1));
        assert_eq!(set.size(), 1);
    }
}
