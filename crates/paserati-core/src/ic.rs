//! Inline caches
//!
//! Each property-access site owns a feedback slot. On a slow-path lookup
//! the site records `(shape, offset, proto depth)`; later executions with
//! a matching shape read the slot directly. A site holds up to four
//! entries, then goes megamorphic and stays on the slow path. Entries
//! that looked through the prototype chain also record the global proto
//! epoch and are dropped when it moves, so a hit can never disagree with
//! a full chain walk.

use smallvec::SmallVec;
use std::sync::Arc;

use crate::object::proto_epoch;
use crate::shape::Shape;

/// Maximum polymorphism per site before going megamorphic
pub const IC_CAPACITY: usize = 4;

/// What a hit at this site means
#[derive(Clone, Debug)]
pub enum IcAction {
    /// Load the data slot at `offset`, `depth` steps up the chain
    Load {
        /// Slot offset in the holder
        offset: usize,
        /// Chain depth (0 = receiver itself)
        depth: usize,
    },
    /// Store into an existing own data slot
    StoreOwn {
        /// Slot offset in the receiver
        offset: usize,
    },
    /// Store that adds a property: move the receiver to `new_shape` and
    /// append at `offset`
    StoreTransition {
        /// The successor shape
        new_shape: Arc<Shape>,
        /// Appended slot offset
        offset: usize,
    },
}

/// One cache entry
#[derive(Clone, Debug)]
pub struct IcEntry {
    /// Receiver shape identity this entry applies to
    pub shape_id: usize,
    /// The cached action
    pub action: IcAction,
    /// Proto epoch at record time; entries with depth > 0 are invalid
    /// once the epoch moves
    pub epoch: u64,
    /// Hit counter (diagnostics)
    pub hits: u64,
}

/// A polymorphic inline cache for one access site
#[derive(Default)]
pub struct InlineCache {
    entries: SmallVec<[IcEntry; IC_CAPACITY]>,
    megamorphic: bool,
}

impl InlineCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the action for a receiver shape. Stale proto-chain
    /// entries are dropped here rather than returned.
    pub fn lookup(&mut self, shape_id: usize) -> Option<IcAction> {
        let epoch = proto_epoch();
        let mut stale = None;
        for (i, entry) in self.entries.iter_mut().enumerate() {
            if entry.shape_id != shape_id {
                continue;
            }
            let depth_sensitive = matches!(
                entry.action,
                IcAction::Load { depth, .. } if depth > 0
            ) || matches!(entry.action, IcAction::StoreTransition { .. });
            if depth_sensitive && entry.epoch != epoch {
                stale = Some(i);
                break;
            }
            entry.hits += 1;
            return Some(entry.action.clone());
        }
        if let Some(i) = stale {
            self.entries.remove(i);
        }
        None
    }

    /// Record an observed action for a shape. Past capacity the site is
    /// marked megamorphic and stops caching.
    pub fn record(&mut self, shape_id: usize, action: IcAction) {
        if self.megamorphic {
            return;
        }
        if self.entries.iter().any(|e| e.shape_id == shape_id) {
            return;
        }
        if self.entries.len() >= IC_CAPACITY {
            self.megamorphic = true;
            tracing::trace!(target: "paserati::ic", "site went megamorphic");
            return;
        }
        self.entries.push(IcEntry {
            shape_id,
            action,
            epoch: proto_epoch(),
            hits: 0,
        });
    }

    /// Has this site given up on caching?
    pub fn is_megamorphic(&self) -> bool {
        self.megamorphic
    }

    /// Number of entries currently cached
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// No entries yet?
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-chunk feedback vector: one cache per reserved IC slot
pub struct FeedbackVector {
    caches: Vec<InlineCache>,
}

impl FeedbackVector {
    /// Create a vector with `count` empty caches
    pub fn new(count: u16) -> Self {
        let mut caches = Vec::with_capacity(count as usize);
        caches.resize_with(count as usize, InlineCache::new);
        Self { caches }
    }

    /// The cache for a slot index
    pub fn cache(&mut self, index: u16) -> Option<&mut InlineCache> {
        self.caches.get_mut(index as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{JsObject, PropertyKey};
    use crate::value::Value;

    #[test]
    fn test_record_and_hit() {
        let obj = JsObject::new(Value::null());
        obj.set(PropertyKey::string("x"), Value::int32(1));
        let shape_id = obj.shape_id().unwrap();

        let mut ic = InlineCache::new();
        assert!(ic.lookup(shape_id).is_none());

        ic.record(shape_id, IcAction::Load { offset: 0, depth: 0 });
        match ic.lookup(shape_id) {
            Some(IcAction::Load { offset: 0, depth: 0 }) => {}
            other => panic!("unexpected IC result: {:?}", other),
        }
    }

    #[test]
    fn test_megamorphic_after_capacity() {
        let mut ic = InlineCache::new();
        for shape_id in 0..IC_CAPACITY {
            ic.record(shape_id, IcAction::Load { offset: 0, depth: 0 });
        }
        assert!(!ic.is_megamorphic());
        ic.record(999, IcAction::Load { offset: 0, depth: 0 });
        assert!(ic.is_megamorphic());
        assert!(ic.lookup(999).is_none());
    }

    #[test]
    fn test_proto_entry_invalidated_by_epoch() {
        let mut ic = InlineCache::new();
        ic.record(1, IcAction::Load { offset: 0, depth: 1 });
        assert!(ic.lookup(1).is_some());

        // Any chain-shape mutation bumps the epoch and kills the entry
        let obj = JsObject::new(Value::null());
        obj.set(PropertyKey::string("whatever"), Value::int32(1));

        assert!(ic.lookup(1).is_none());
    }

    #[test]
    fn test_own_entry_survives_epoch() {
        let mut ic = InlineCache::new();
        ic.record(1, IcAction::Load { offset: 2, depth: 0 });

        let obj = JsObject::new(Value::null());
        obj.set(PropertyKey::string("whatever"), Value::int32(1));

        assert!(ic.lookup(1).is_some());
    }
}
