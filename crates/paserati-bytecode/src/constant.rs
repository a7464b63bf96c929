//! Constant pool for compiled programs

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// A constant value in the constant pool
///
/// Constants hold values that cannot be materialized by immediate
/// operands: strings, numbers outside the int32 range, bigints, regex
/// templates, and private-name symbols.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    /// 64-bit floating point number
    Number(f64),
    /// String value
    String(Box<str>),
    /// BigInt value (decimal digits)
    BigInt(Box<str>),
    /// Regular expression template
    RegExp {
        /// The regex pattern
        pattern: Box<str>,
        /// The regex flags (e.g., "gi")
        flags: Box<str>,
    },
    /// Symbol id (private `#name` fields compile to these)
    Symbol(u64),
}

impl Constant {
    /// Create a number constant
    #[inline]
    pub fn number(n: f64) -> Self {
        Self::Number(n)
    }

    /// Create a string constant
    #[inline]
    pub fn string(s: impl Into<Box<str>>) -> Self {
        Self::String(s.into())
    }

    /// Create a BigInt constant
    #[inline]
    pub fn bigint(s: impl Into<Box<str>>) -> Self {
        Self::BigInt(s.into())
    }

    /// Create a RegExp constant
    #[inline]
    pub fn regexp(pattern: impl Into<Box<str>>, flags: impl Into<Box<str>>) -> Self {
        Self::RegExp {
            pattern: pattern.into(),
            flags: flags.into(),
        }
    }

    /// Get as number if this is a number constant
    #[inline]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Get as string if this is a string constant
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Compute a hash for deduplication.
    ///
    /// f64 does not implement Hash; we hash the bit pattern, which also
    /// gives every NaN payload a stable slot.
    fn hash_for_dedup<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Number(n) => n.to_bits().hash(state),
            Self::String(s) => s.hash(state),
            Self::BigInt(s) => s.hash(state),
            Self::RegExp { pattern, flags } => {
                pattern.hash(state);
                flags.hash(state);
            }
            Self::Symbol(id) => id.hash(state),
        }
    }
}

/// Constant pool with O(1) hash-based deduplication
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConstantPool {
    constants: Vec<Constant>,
    /// hash -> indices with that hash (a list, since hashes can collide)
    #[serde(skip)]
    dedup_index: FxHashMap<u64, Vec<u32>>,
}

impl ConstantPool {
    /// Create a new empty constant pool
    pub fn new() -> Self {
        Self {
            constants: Vec::new(),
            dedup_index: FxHashMap::default(),
        }
    }

    #[inline]
    fn hash_constant(constant: &Constant) -> u64 {
        let mut hasher = rustc_hash::FxHasher::default();
        constant.hash_for_dedup(&mut hasher);
        hasher.finish()
    }

    /// Add a constant to the pool, returning its index.
    /// Identical constants are deduplicated.
    pub fn add(&mut self, constant: Constant) -> u32 {
        let hash = Self::hash_constant(&constant);

        if let Some(indices) = self.dedup_index.get(&hash) {
            for &idx in indices {
                if self.constants[idx as usize] == constant {
                    return idx;
                }
            }
        }

        let idx = self.constants.len() as u32;
        self.constants.push(constant);
        self.dedup_index.entry(hash).or_default().push(idx);
        idx
    }

    /// Rebuild the dedup index after deserialization
    pub fn rebuild_dedup_index(&mut self) {
        self.dedup_index.clear();
        for (idx, constant) in self.constants.iter().enumerate() {
            let hash = Self::hash_constant(constant);
            self.dedup_index.entry(hash).or_default().push(idx as u32);
        }
    }

    /// Add a number constant
    #[inline]
    pub fn add_number(&mut self, n: f64) -> u32 {
        self.add(Constant::number(n))
    }

    /// Add a string constant
    #[inline]
    pub fn add_string(&mut self, s: &str) -> u32 {
        self.add(Constant::string(s))
    }

    /// Get a constant by index
    #[inline]
    pub fn get(&self, index: u32) -> Option<&Constant> {
        self.constants.get(index as usize)
    }

    /// Number of constants in the pool
    #[inline]
    pub fn len(&self) -> usize {
        self.constants.len()
    }

    /// Check if the pool is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.constants.is_empty()
    }

    /// Iterate over constants
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Constant> {
        self.constants.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_pool_dedup() {
        let mut pool = ConstantPool::new();

        let idx1 = pool.add_string("hello");
        let idx2 = pool.add_string("world");
        let idx3 = pool.add_string("hello"); // duplicate

        assert_eq!(idx1, 0);
        assert_eq!(idx2, 1);
        assert_eq!(idx3, 0);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_constant_pool_number() {
        let mut pool = ConstantPool::new();

        let idx1 = pool.add_number(42.0);
        let idx2 = pool.add_number(3.25);
        let idx3 = pool.add_number(42.0);

        assert_eq!(idx1, 0);
        assert_eq!(idx2, 1);
        assert_eq!(idx3, 0);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_nan_dedup_is_stable() {
        let mut pool = ConstantPool::new();
        let a = pool.add_number(f64::NAN);
        let b = pool.add_number(f64::NAN);
        // NaN != NaN under PartialEq, so each NaN literal gets its own slot,
        // but indices stay deterministic across compiles.
        assert_eq!(a, 0);
        assert_eq!(b, 1);
    }

    #[test]
    fn test_rebuild_dedup_index() {
        let mut pool = ConstantPool::new();
        pool.add_string("x");
        pool.add_number(1.0);

        let bytes = serde_json::to_vec(&pool).unwrap();
        let mut restored: ConstantPool = serde_json::from_slice(&bytes).unwrap();
        restored.rebuild_dedup_index();

        assert_eq!(restored.add_string("x"), 0);
        assert_eq!(restored.len(), 2);
    }
}
