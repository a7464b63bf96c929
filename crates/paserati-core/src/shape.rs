//! Hidden classes (shapes)
//!
//! A shape describes an object's property layout: which keys it has and at
//! what offsets in the slot vector, plus the object's prototype. Shapes
//! form a transition tree; adding property P to shape S yields a memoized
//! successor, so objects built the same way share layouts and inline
//! caches can key on shape identity.

use dashmap::DashMap;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::sync::{Arc, Weak};

use crate::object::PropertyKey;
use crate::value::Value;

/// Number of properties after which an object leaves shape mode for
/// dictionary mode.
pub const DICTIONARY_THRESHOLD: usize = 32;

/// Root shapes cached per prototype identity, so two `{}` literals with the
/// same prototype start from the same shape and ICs hit across objects.
static ROOT_SHAPES: std::sync::LazyLock<DashMap<usize, Arc<Shape>>> =
    std::sync::LazyLock::new(DashMap::new);

/// A shape: one node in the transition tree.
pub struct Shape {
    /// The parent shape this one was transitioned from (None at roots)
    pub parent: Option<Arc<Shape>>,

    /// The property key whose addition created this shape
    pub key: Option<PropertyKey>,

    /// Slot offset of that property in the object's slot vector
    pub offset: Option<usize>,

    /// The prototype all objects of this shape share. Changing an object's
    /// prototype moves it off this shape tree entirely.
    prototype: Value,

    /// Memoized transitions to child shapes. Weak to break cycles:
    /// child -> parent is Arc, parent -> child is Weak. RefCell is fine
    /// here since transitions are off the IC fast path.
    transitions: RefCell<FxHashMap<PropertyKey, Weak<Shape>>>,

    /// All property offsets visible in this shape (inherited + own)
    property_map: FxHashMap<PropertyKey, usize>,

    /// Keys in insertion order, for own_keys and for-in
    keys_ordered: Vec<PropertyKey>,
}

// SAFETY: Shape is only accessed from the single VM thread; RefCell is
// !Sync but the VM is thread-confined.
unsafe impl Send for Shape {}
unsafe impl Sync for Shape {}

impl Shape {
    /// Get the cached root shape for a prototype value (null or object).
    pub fn root_for(prototype: Value) -> Arc<Self> {
        let key = prototype.identity();
        if let Some(existing) = ROOT_SHAPES.get(&key) {
            return existing.clone();
        }
        let root = Arc::new(Self {
            parent: None,
            key: None,
            offset: None,
            prototype,
            transitions: RefCell::new(FxHashMap::default()),
            property_map: FxHashMap::default(),
            keys_ordered: Vec::new(),
        });
        ROOT_SHAPES.insert(key, root.clone());
        root
    }

    /// The shared prototype of objects with this shape.
    pub fn prototype(&self) -> &Value {
        &self.prototype
    }

    /// Find the memoized transition for `key`, or create it.
    pub fn transition(self: &Arc<Self>, key: PropertyKey) -> Arc<Self> {
        {
            let transitions = self.transitions.borrow();
            if let Some(weak_shape) = transitions.get(&key) {
                if let Some(shape) = weak_shape.upgrade() {
                    return shape;
                }
            }
        }

        let mut transitions = self.transitions.borrow_mut();

        // Double-check after acquiring the mutable borrow
        if let Some(weak_shape) = transitions.get(&key) {
            if let Some(shape) = weak_shape.upgrade() {
                return shape;
            }
        }

        let next_offset = self.offset.map(|o| o + 1).unwrap_or(0);

        let mut next_property_map = self.property_map.clone();
        next_property_map.insert(key.clone(), next_offset);

        let mut next_keys_ordered = self.keys_ordered.clone();
        next_keys_ordered.push(key.clone());

        let new_shape = Arc::new(Self {
            parent: Some(Arc::clone(self)),
            key: Some(key.clone()),
            offset: Some(next_offset),
            prototype: self.prototype.clone(),
            transitions: RefCell::new(FxHashMap::default()),
            property_map: next_property_map,
            keys_ordered: next_keys_ordered,
        });

        transitions.insert(key, Arc::downgrade(&new_shape));
        new_shape
    }

    /// Get the slot offset of a property key in this shape.
    #[inline]
    pub fn get_offset(&self, key: &PropertyKey) -> Option<usize> {
        self.property_map.get(key).copied()
    }

    /// Own property keys in insertion order.
    pub fn own_keys(&self) -> Vec<PropertyKey> {
        self.keys_ordered.clone()
    }

    /// Number of properties defined in this shape.
    pub fn property_count(&self) -> usize {
        self.property_map.len()
    }

    /// Identity of this shape, for inline-cache keys.
    #[inline]
    pub fn id(self: &Arc<Self>) -> usize {
        Arc::as_ptr(self) as usize
    }
}

impl std::fmt::Debug for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shape")
            .field("key", &self.key)
            .field("offset", &self.offset)
            .field("property_count", &self.property_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_sharing() {
        let root = Shape::root_for(Value::null());
        let a1 = root.transition(PropertyKey::string("a"));
        let a2 = root.transition(PropertyKey::string("a"));
        assert!(Arc::ptr_eq(&a1, &a2));

        let ab = a1.transition(PropertyKey::string("b"));
        assert_eq!(ab.get_offset(&PropertyKey::string("a")), Some(0));
        assert_eq!(ab.get_offset(&PropertyKey::string("b")), Some(1));
        assert_eq!(ab.property_count(), 2);
    }

    #[test]
    fn test_root_shape_shared_per_prototype() {
        let r1 = Shape::root_for(Value::null());
        let r2 = Shape::root_for(Value::null());
        assert!(Arc::ptr_eq(&r1, &r2));
    }

    #[test]
    fn test_key_order_preserved() {
        let root = Shape::root_for(Value::null());
        let s = root
            .transition(PropertyKey::string("z"))
            .transition(PropertyKey::string("a"));
        let keys = s.own_keys();
        assert_eq!(keys[0], PropertyKey::string("z"));
        assert_eq!(keys[1], PropertyKey::string("a"));
    }
}
