/// Hash map alias used throughout the engine.
pub type HashMap<K, V> = std::collections::HashMap<K, V, ahash::RandomState>;

/// Hash set alias used throughout the engine.
pub type HashSet<V> = std::collections::HashSet<V, ahash::RandomState>;
