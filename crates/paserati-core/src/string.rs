//! Interned strings
//!
//! Strings are immutable and interned for deduplication, so equality can
//! fall back to a hash check plus a content compare, and repeated property
//! names share one allocation.

use dashmap::DashMap;
use paserati_gc::object::tags;
use paserati_gc::{GcHeader, GcObject, Tracer};
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Global string intern table
static STRING_TABLE: std::sync::LazyLock<DashMap<u64, Arc<JsString>>> =
    std::sync::LazyLock::new(DashMap::new);

/// An interned script string
#[repr(C)]
pub struct JsString {
    /// GC header for tracing
    header: GcHeader,
    /// The actual string data
    data: Arc<str>,
    /// Precomputed hash for fast lookup
    hash: u64,
}

impl JsString {
    /// Create or retrieve an interned string
    pub fn intern(s: &str) -> Arc<Self> {
        let hash = Self::compute_hash(s);

        if let Some(existing) = STRING_TABLE.get(&hash) {
            if existing.data.as_ref() == s {
                return existing.clone();
            }
        }

        let js_str = Arc::new(Self {
            header: GcHeader::new(tags::STRING),
            data: Arc::from(s),
            hash,
        });

        STRING_TABLE.insert(hash, js_str.clone());
        js_str
    }

    /// Get the string as a str slice
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.data
    }

    /// Length in UTF-16 code units (script-visible `length`)
    pub fn len_utf16(&self) -> usize {
        self.data.encode_utf16().count()
    }

    /// Length in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if string is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get precomputed hash value
    #[inline]
    pub fn hash_value(&self) -> u64 {
        self.hash
    }

    /// Concatenate two strings
    pub fn concat(&self, other: &JsString) -> Arc<Self> {
        let mut result = String::with_capacity(self.len() + other.len());
        result.push_str(&self.data);
        result.push_str(&other.data);
        Self::intern(&result)
    }

    /// Code unit at a UTF-16 index, as a one-character string
    pub fn char_at_utf16(&self, index: usize) -> Option<Arc<Self>> {
        let units: Vec<u16> = self.data.encode_utf16().collect();
        if index >= units.len() {
            return None;
        }
        let s = String::from_utf16_lossy(&units[index..index + 1]);
        Some(Self::intern(&s))
    }

    fn compute_hash(s: &str) -> u64 {
        let mut hasher = FxHasher::default();
        s.hash(&mut hasher);
        hasher.finish()
    }
}

impl std::fmt::Debug for JsString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JsString({:?})", self.data)
    }
}

impl std::fmt::Display for JsString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.data)
    }
}

impl PartialEq for JsString {
    fn eq(&self, other: &Self) -> bool {
        if self.hash != other.hash {
            return false;
        }
        self.data == other.data
    }
}

impl Eq for JsString {}

impl Hash for JsString {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl AsRef<str> for JsString {
    fn as_ref(&self) -> &str {
        &self.data
    }
}

impl GcObject for JsString {
    fn header(&self) -> &GcHeader {
        &self.header
    }

    fn trace(&self, _tracer: &mut Tracer) {
        // Strings hold no references to other GC objects
    }
}
