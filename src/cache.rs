//! A capacity-bounded, thread-safe LRU cache with a paginated,
//! most-recent-first view. The engine keeps one instance for rules and one
//! for incidents; both are kept warm by the store's change notifications.

use parking_lot::Mutex;

/// A single cached item together with its key.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    /// The key the value is stored under.
    pub key: String,
    /// The cached value.
    pub value: T,
}

/// A keyed LRU cache.
///
/// Values are stored opaquely and cloned out on every read, so callers may
/// mutate what they get back without affecting the cached copy. All
/// operations take the same lock; `get` mutates recency, so there is no
/// shared read path.
#[derive(Debug)]
pub struct Cache<T> {
    /// Entries ordered most-recent-first.
    entries: Mutex<Vec<CacheEntry<T>>>,
    /// Maximum number of entries; non-positive means unbounded.
    capacity: i64,
    /// Label used in log lines to tell cache instances apart.
    tag: &'static str,
}

impl<T: Clone> Cache<T> {
    /// Creates a new cache with the given capacity and log tag. A
    /// non-positive capacity means the cache is unbounded.
    pub fn new(capacity: i64, tag: &'static str) -> Self {
        tracing::debug!(capacity, tag, "Initializing a new cache.");
        Self { entries: Mutex::new(Vec::new()), capacity, tag }
    }

    /// Inserts or updates a value, making it the most recent entry. When the
    /// cache is at capacity, inserting a new key evicts the least recent
    /// entry.
    pub fn set(&self, key: &str, value: T) {
        let mut entries = self.entries.lock();

        if let Some(pos) = entries.iter().position(|e| e.key == key) {
            tracing::debug!(key, tag = self.tag, "Key found; updating existing item in the cache.");
            entries.remove(pos);
        } else {
            tracing::debug!(key, tag = self.tag, "Key not found; adding new item to the cache.");
            if self.capacity > 0 && entries.len() as i64 == self.capacity {
                if let Some(evicted) = entries.pop() {
                    tracing::debug!(
                        key = %evicted.key,
                        tag = self.tag,
                        "Removing the least recently used item from the cache."
                    );
                }
            }
        }

        entries.insert(0, CacheEntry { key: key.to_string(), value });
    }

    /// Returns a clone of the value stored under `key`, promoting the entry
    /// to most recent on a hit.
    pub fn get(&self, key: &str) -> Option<T> {
        let mut entries = self.entries.lock();

        let pos = entries.iter().position(|e| e.key == key)?;
        let entry = entries.remove(pos);
        let value = entry.value.clone();
        entries.insert(0, entry);

        Some(value)
    }

    /// Removes the entry stored under `key`; a miss is a no-op.
    pub fn delete(&self, key: &str) {
        let mut entries = self.entries.lock();
        entries.retain(|e| e.key != key);
    }

    /// Returns the entries of page `page_num` (1-based) with `page_size`
    /// entries per page, in most-recent-first order.
    pub fn page(&self, page_num: usize, page_size: usize) -> Vec<CacheEntry<T>> {
        let entries = self.entries.lock();
        let start = page_num.saturating_sub(1).saturating_mul(page_size);
        entries.iter().skip(start).take(page_size).cloned().collect()
    }

    /// Returns a most-recent-first snapshot of every entry.
    pub fn all(&self) -> Vec<CacheEntry<T>> {
        self.entries.lock().clone()
    }

    /// Returns the current number of entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Returns the configured capacity; non-positive means unbounded.
    pub fn capacity(&self) -> i64 {
        self.capacity
    }

    /// Removes every entry.
    pub fn clear(&self) {
        tracing::debug!(tag = self.tag, "Clearing the cache.");
        self.entries.lock().clear();
    }
}
