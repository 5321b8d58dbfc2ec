use std::collections::{HashMap, HashSet};
use std::hash::{BuildHasherDefault, Hasher};

use fxhash::FxHasher;

pub type FastHashMap<K, V> = HashMap<K, V, BuildHasherDefault<FxHasher>>;
pub type FastHashSet<V> = HashSet<V, BuildHasherDefault<FxHasher>>;

/// Stable 64-bit content hash of a string.
///
/// Used wherever a string stands in for an interning key: demangled function
/// names (preset matching), timeline names and GPU stage names. Two equal
/// strings always produce the same hash, across runs and across processes.
pub fn hash_string(s: &str) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write(s.as_bytes());
    hasher.finish()
}

/// Stable 64-bit content hash of a program-counter slice, including its
/// length.
pub fn hash_pcs(pcs: &[u64]) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write_usize(pcs.len());
    for &pc in pcs {
        hasher.write_u64(pc);
    }
    hasher.finish()
}
