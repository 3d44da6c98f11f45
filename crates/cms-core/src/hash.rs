//! Fast hash map and hash set type aliases.
//!
//! The engine keys almost every lookup table by a path or a cache key, so
//! the workspace standardizes on the Fx hash from `rustc-hash`. None of the
//! tables are exposed to untrusted input.
//!
//! # Examples
//!
//! ```
//! use cms_core::{FxHashMap, FxHashSet, fx_hash_map, fx_hash_set};
//!
//! let mut map: FxHashMap<String, i32> = FxHashMap::default();
//! map.insert("CMAKE_BUILD_TYPE".to_owned(), 1);
//!
//! let map: FxHashMap<&str, i32> = fx_hash_map();
//! let set: FxHashSet<&str> = fx_hash_set();
//! assert!(map.is_empty() && set.is_empty());
//! ```

/// A [`HashMap`](std::collections::HashMap) using the Fx hash algorithm.
pub type FxHashMap<K, V> = rustc_hash::FxHashMap<K, V>;

/// A [`HashSet`](std::collections::HashSet) using the Fx hash algorithm.
pub type FxHashSet<V> = rustc_hash::FxHashSet<V>;

/// The hasher used by [`FxHashMap`] and [`FxHashSet`].
pub type FxBuildHasher = rustc_hash::FxBuildHasher;

/// Creates a new empty [`FxHashMap`].
#[inline]
#[must_use]
pub fn fx_hash_map<K, V>() -> FxHashMap<K, V> {
    FxHashMap::default()
}

/// Creates a new empty [`FxHashSet`].
#[inline]
#[must_use]
pub fn fx_hash_set<V>() -> FxHashSet<V> {
    FxHashSet::default()
}

/// Creates an [`FxHashMap`] with room for at least `capacity` entries.
///
/// # Examples
///
/// ```
/// use cms_core::hash::fx_hash_map_with_capacity;
///
/// let map: cms_core::FxHashMap<String, u32> = fx_hash_map_with_capacity(64);
/// assert!(map.capacity() >= 64);
/// ```
#[inline]
#[must_use]
pub fn fx_hash_map_with_capacity<K, V>(capacity: usize) -> FxHashMap<K, V> {
    FxHashMap::with_capacity_and_hasher(capacity, FxBuildHasher::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fx_hash_map_roundtrip() {
        let mut map: FxHashMap<&str, u32> = fx_hash_map();
        map.insert("a", 1);
        map.insert("b", 2);
        assert_eq!(map.get("a"), Some(&1));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_fx_hash_set_dedups() {
        let mut set: FxHashSet<&str> = fx_hash_set();
        assert!(set.insert("src/main.cpp"));
        assert!(!set.insert("src/main.cpp"));
    }

    #[test]
    fn test_with_capacity() {
        let map: FxHashMap<u64, u64> = fx_hash_map_with_capacity(10);
        assert!(map.capacity() >= 10);
    }
}
