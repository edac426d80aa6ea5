//! Bounded LRU cache with synchronous removal notification.
//!
//! Every operation serializes on one lock per cache instance. Session counts
//! are expected in the thousands, so there is no per-entry striping.

use std::borrow::Borrow;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use tracing::trace;

/// Observer of entries leaving a [`BoundedCache`].
///
/// Listeners run on the calling thread, after the cache lock is released,
/// in registration order.
pub trait CacheListener<K, V>: Send + Sync {
    /// An entry was evicted to make room. The entry is already gone.
    fn on_evict(&self, key: &K, value: &V);

    /// An entry is about to be invalidated. It is still in the cache.
    fn on_invalidate(&self, _key: &K, _value: &V) {}
}

/// Thread-safe map bounded to a fixed number of entries, LRU-ordered.
pub struct BoundedCache<K, V> {
    entries: Mutex<LruCache<K, V>>,
    capacity: NonZeroUsize,
    listeners: RwLock<Vec<Arc<dyn CacheListener<K, V>>>>,
}

impl<K, V> BoundedCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a cache holding at most `capacity` entries (zero is treated as one).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::unbounded()),
            capacity,
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Register a removal listener. Listeners fire in registration order.
    pub fn register_listener(&self, listener: Arc<dyn CacheListener<K, V>>) {
        self.listeners.write().push(listener);
    }

    /// Insert or overwrite an entry, marking it most recently used.
    ///
    /// Returns the previous value for the key. If the cache is now over
    /// capacity the least recently used entry is evicted and eviction
    /// listeners are called with it.
    pub fn put(&self, key: K, value: V) -> Option<V> {
        let (previous, evicted) = {
            let mut entries = self.entries.lock();
            let previous = entries.put(key, value);
            (previous, self.pop_overflow(&mut entries))
        };

        if let Some((key, value)) = evicted {
            self.notify_evicted(&key, &value);
        }
        previous
    }

    /// Insert only if the key is absent. Hands the value back otherwise.
    pub fn put_if_absent(&self, key: K, value: V) -> std::result::Result<(), V> {
        let evicted = {
            let mut entries = self.entries.lock();
            if entries.contains(&key) {
                return Err(value);
            }
            entries.put(key, value);
            self.pop_overflow(&mut entries)
        };

        if let Some((key, value)) = evicted {
            self.notify_evicted(&key, &value);
        }
        Ok(())
    }

    /// Look up an entry, marking it most recently used on a hit.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.lock().get(key).cloned()
    }

    /// Look up an entry without touching recency.
    pub fn peek<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.lock().peek(key).cloned()
    }

    /// Check whether a key is present without touching recency.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.lock().contains(key)
    }

    /// Remove an entry, notifying invalidation listeners first.
    ///
    /// The entry stays queryable while listeners run. Returns the removed
    /// value, or `None` if the key was absent.
    pub fn invalidate(&self, key: &K) -> Option<V> {
        let value = self.entries.lock().peek(key).cloned()?;

        let listeners = self.listeners.read().clone();
        for listener in &listeners {
            listener.on_invalidate(key, &value);
        }

        self.entries.lock().pop(key)
    }

    /// Drop every entry. No listener is notified.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of entries.
    pub fn size(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Configured maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Snapshot of keys, most recently used first.
    pub fn keys(&self) -> Vec<K> {
        self.entries.lock().iter().map(|(k, _)| k.clone()).collect()
    }

    fn pop_overflow(&self, entries: &mut LruCache<K, V>) -> Option<(K, V)> {
        if entries.len() > self.capacity.get() {
            trace!(size = entries.len(), capacity = self.capacity.get(), "Cache over capacity");
            entries.pop_lru()
        } else {
            None
        }
    }

    fn notify_evicted(&self, key: &K, value: &V) {
        let listeners = self.listeners.read().clone();
        for listener in &listeners {
            listener.on_evict(key, value);
        }
    }
}
