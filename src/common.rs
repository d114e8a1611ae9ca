use serde::{Deserialize, Serialize};

use crate::error::{MapError, Result};

/// A durable identifier for an object in the external store.
///
/// Handles support equality, hashing and ordering, survive process restarts,
/// and are serialized as fields of other stored objects. Resolving a handle
/// to live object state goes through [`crate::store::ObjectStore::get`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Handle(u64);

impl Handle {
    pub fn from_raw(raw: u64) -> Self {
        Handle(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Maximum trie depth: one level per bit of the 32-bit mixed hash.
pub const MAX_DEPTH: u8 = 32;

/// Stable 32-bit hash for map keys.
///
/// The hash routes keys into persistent trie structure, so it must be
/// deterministic across processes and program runs; `std::hash::Hash` with a
/// randomized hasher cannot be used here. Integer keys hash to themselves.
pub trait HashCode {
    fn hash_code(&self) -> u32;
}

impl HashCode for u8 {
    fn hash_code(&self) -> u32 {
        *self as u32
    }
}

impl HashCode for u16 {
    fn hash_code(&self) -> u32 {
        *self as u32
    }
}

impl HashCode for u32 {
    fn hash_code(&self) -> u32 {
        *self
    }
}

impl HashCode for u64 {
    fn hash_code(&self) -> u32 {
        ((*self >> 32) ^ *self) as u32
    }
}

impl HashCode for usize {
    fn hash_code(&self) -> u32 {
        (*self as u64).hash_code()
    }
}

impl HashCode for i8 {
    fn hash_code(&self) -> u32 {
        *self as u32
    }
}

impl HashCode for i16 {
    fn hash_code(&self) -> u32 {
        *self as u32
    }
}

impl HashCode for i32 {
    fn hash_code(&self) -> u32 {
        *self as u32
    }
}

impl HashCode for i64 {
    fn hash_code(&self) -> u32 {
        (*self as u64).hash_code()
    }
}

impl HashCode for isize {
    fn hash_code(&self) -> u32 {
        (*self as u64).hash_code()
    }
}

impl HashCode for bool {
    fn hash_code(&self) -> u32 {
        *self as u32
    }
}

impl HashCode for char {
    fn hash_code(&self) -> u32 {
        *self as u32
    }
}

impl HashCode for str {
    fn hash_code(&self) -> u32 {
        self.as_bytes()
            .iter()
            .fold(0u32, |h, b| h.wrapping_mul(31).wrapping_add(*b as u32))
    }
}

impl HashCode for String {
    fn hash_code(&self) -> u32 {
        self.as_str().hash_code()
    }
}

impl<T: HashCode> HashCode for [T] {
    fn hash_code(&self) -> u32 {
        self.iter()
            .fold(1u32, |h, e| h.wrapping_mul(31).wrapping_add(e.hash_code()))
    }
}

impl<T: HashCode> HashCode for Vec<T> {
    fn hash_code(&self) -> u32 {
        self.as_slice().hash_code()
    }
}

/// `None` hashes to 0, which is how a map with nullable keys is expressed:
/// instantiate the key type as `Option<T>`.
impl<T: HashCode> HashCode for Option<T> {
    fn hash_code(&self) -> u32 {
        match self {
            Some(v) => v.hash_code(),
            None => 0,
        }
    }
}

impl<T: HashCode + ?Sized> HashCode for &T {
    fn hash_code(&self) -> u32 {
        (**self).hash_code()
    }
}

/// Shift-xor smear applied to every native hash code before routing.
/// The router consumes the high bits, so entropy is diffused upward.
pub(crate) fn mix(mut h: u32) -> u32 {
    h ^= (h >> 20) ^ (h >> 12);
    h ^ (h >> 7) ^ (h >> 4)
}

/// Configuration for a [`crate::map::HashTrieMap`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapConfig {
    /// Minimum number of leaves the trie is pre-split to support; writers
    /// touching distinct leaves never conflict, so this is the write
    /// parallelism floor. The trie never contracts below `log2` of this.
    pub min_concurrency: u32,
    /// A leaf splits when its entry count reaches `leaf_capacity * split_factor`.
    pub split_factor: f32,
    /// A leaf asks its parent to merge when its entry count drops below
    /// `leaf_capacity * merge_factor`.
    pub merge_factor: f32,
    /// Bucket table width of each leaf; normalized up to a power of two.
    pub leaf_capacity: u32,
    /// Derive the merge threshold the way the historical implementation did:
    /// `min(split_factor * capacity, split_threshold - 1)`. That derivation
    /// uses `split_factor` where `merge_factor` was almost certainly meant,
    /// so it is off by default.
    pub legacy_merge_threshold: bool,
}

impl Default for MapConfig {
    fn default() -> Self {
        MapConfig {
            min_concurrency: 1,
            split_factor: 1.0,
            merge_factor: 0.25,
            leaf_capacity: 128,
            legacy_merge_threshold: false,
        }
    }
}

impl MapConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_concurrency == 0 {
            return Err(MapError::InvalidConfig(
                "min_concurrency must be positive".to_string(),
            ));
        }
        if self.split_factor <= 0.0 {
            return Err(MapError::InvalidConfig(
                "split_factor must be positive".to_string(),
            ));
        }
        if self.merge_factor < 0.0 {
            return Err(MapError::InvalidConfig(
                "merge_factor must not be negative".to_string(),
            ));
        }
        if self.merge_factor >= self.split_factor {
            return Err(MapError::InvalidConfig(format!(
                "merge_factor {} must be below split_factor {}",
                self.merge_factor, self.split_factor
            )));
        }
        if self.leaf_capacity == 0 {
            return Err(MapError::InvalidConfig(
                "leaf_capacity must be positive".to_string(),
            ));
        }
        if self.min_depth() > MAX_DEPTH {
            return Err(MapError::InvalidConfig(format!(
                "min_concurrency {} needs a pre-split deeper than {} levels",
                self.min_concurrency, MAX_DEPTH
            )));
        }
        Ok(())
    }

    /// Depth the trie is eagerly split to at construction:
    /// `ceil(log2(min_concurrency))`.
    pub(crate) fn min_depth(&self) -> u8 {
        if self.min_concurrency <= 1 {
            0
        } else {
            (32 - (self.min_concurrency - 1).leading_zeros()) as u8
        }
    }

    /// Bucket table width, rounded up so `hash & (width - 1)` is a valid
    /// bucket index.
    pub(crate) fn normalized_capacity(&self) -> u32 {
        self.leaf_capacity.next_power_of_two()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mix_is_identity_below_sixteen() {
        // Every shift in the cascade drops at least 4 bits, so tiny hashes
        // pass through untouched. Several tests rely on this.
        for h in 0u32..16 {
            assert_eq!(mix(h), h);
        }
        assert_ne!(mix(1 << 31), 1 << 31);
    }

    #[test]
    fn integer_hashes_are_identity() {
        assert_eq!(7u32.hash_code(), 7);
        assert_eq!((-1i32).hash_code(), u32::MAX);
        assert_eq!(0x1_0000_0001u64.hash_code(), 0);
    }

    #[test]
    fn option_none_hashes_to_zero() {
        assert_eq!(None::<u32>.hash_code(), 0);
        assert_eq!(Some(9u32).hash_code(), 9);
    }

    #[test]
    fn string_hash_is_stable() {
        assert_eq!("".hash_code(), 0);
        assert_eq!("a".hash_code(), 97);
        assert_eq!("ab".hash_code(), 97 * 31 + 98);
        assert_eq!("ab".to_string().hash_code(), "ab".hash_code());
    }

    #[test]
    fn min_depth_is_ceil_log2() {
        let mut config = MapConfig::default();
        for (conc, depth) in [(1, 0), (2, 1), (3, 2), (4, 2), (5, 3), (8, 3), (9, 4)] {
            config.min_concurrency = conc;
            assert_eq!(config.min_depth(), depth, "min_concurrency {conc}");
        }
    }
}
