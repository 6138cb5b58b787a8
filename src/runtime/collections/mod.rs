//! Collection type aliases used throughout the runtime.
//!
//! Centralized here so the hasher backend can be swapped with a feature
//! flag.

#[cfg(feature = "collections_randomstate_twox_hash")]
type RandomState = std::hash::BuildHasherDefault<twox_hash::XxHash64>;

#[cfg(not(feature = "collections_randomstate_twox_hash"))]
type RandomState = std::collections::hash_map::RandomState;

/// A `HashMap` using this crate's chosen hasher backend.
pub type HashMap<K, V> = std::collections::HashMap<K, V, RandomState>;

/// A `HashSet` using this crate's chosen hasher backend.
pub type HashSet<T> = std::collections::HashSet<T, RandomState>;

/// Returns a new, empty `HashMap` with room for `cap` entries.
pub fn hash_map_capacity<K, V>(cap: usize) -> HashMap<K, V> {
    HashMap::with_capacity_and_hasher(cap, RandomState::default())
}

/// Returns a new, empty `HashMap`.
pub fn hash_map<K, V>() -> HashMap<K, V> {
    HashMap::with_hasher(RandomState::default())
}

/// Returns a new, empty `HashSet`.
pub fn hash_set<T>() -> HashSet<T> {
    HashSet::with_hasher(RandomState::default())
}
