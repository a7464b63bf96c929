//! Symbols
//!
//! Symbols are identified by a process-unique id; well-known protocol
//! symbols get fixed ids below the dynamic range so chunk constants can
//! refer to them deterministically.

use paserati_gc::object::tags;
use paserati_gc::{GcHeader, GcObject, Tracer};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Well-known symbol ids
pub mod well_known {
    /// `Symbol.iterator`
    pub const ITERATOR: u64 = 1;
    /// `Symbol.asyncIterator`
    pub const ASYNC_ITERATOR: u64 = 2;
}

/// First id handed out to dynamically created symbols (private names,
/// `Symbol()` calls from the host)
const FIRST_DYNAMIC_ID: u64 = 1024;

static NEXT_SYMBOL_ID: AtomicU64 = AtomicU64::new(FIRST_DYNAMIC_ID);

/// Allocate a fresh symbol id
pub fn next_symbol_id() -> u64 {
    NEXT_SYMBOL_ID.fetch_add(1, Ordering::Relaxed)
}

/// A script symbol
pub struct JsSymbol {
    header: GcHeader,
    /// Symbol description
    pub description: Option<String>,
    /// Unique id; identity for equality and property keying
    pub id: u64,
}

impl JsSymbol {
    /// Create a new unique symbol
    pub fn new(description: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            header: GcHeader::new(tags::SYMBOL),
            description,
            id: next_symbol_id(),
        })
    }

    /// Create a symbol with a fixed id (well-known symbols)
    pub fn with_id(id: u64, description: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            header: GcHeader::new(tags::SYMBOL),
            description,
            id,
        })
    }
}

impl PartialEq for JsSymbol {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for JsSymbol {}

impl std::hash::Hash for JsSymbol {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl std::fmt::Debug for JsSymbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.description {
            Some(desc) => write!(f, "Symbol({})", desc),
            None => write!(f, "Symbol()"),
        }
    }
}

impl GcObject for JsSymbol {
    fn header(&self) -> &GcHeader {
        &self.header
    }

    fn trace(&self, _tracer: &mut Tracer) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_identity() {
        let a = JsSymbol::new(Some("x".into()));
        let b = JsSymbol::new(Some("x".into()));
        assert_ne!(a.id, b.id);
        assert_ne!(a, b);
        assert_eq!(*a, *a);
    }

    #[test]
    fn test_well_known_below_dynamic_range() {
        let iter = JsSymbol::with_id(well_known::ITERATOR, Some("Symbol.iterator".into()));
        let fresh = JsSymbol::new(None);
        assert!(iter.id < FIRST_DYNAMIC_ID);
        assert!(fresh.id >= FIRST_DYNAMIC_ID);
    }
}
