//! LRU cache with pinning handles
//!
//! Used for the shared block cache (decompressed data blocks) and the table
//! cache (open SSTable readers).
//!
//! ## Pinning
//! A lookup or insert returns a [`CacheHandle`]. While any handle for an
//! entry is alive the entry is *pinned*: it is not on the eviction list and
//! cannot be evicted. Dropping the last handle moves the entry to the
//! most-recently-used end of the eviction list.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::Hash;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::storage::sstable::Block;

/// Block cache key: (per-table cache id, block offset)
pub type BlockCacheKey = (u64, u64);

/// Shared cache of decompressed SSTable blocks
pub type BlockCache = LruCache<BlockCacheKey, Block>;

struct CacheEntry<V> {
    value: Arc<V>,
    charge: usize,
    /// Distinguishes an entry from a later one inserted under the same key
    id: u64,
    /// Outstanding handles
    refs: usize,
    /// Position in the eviction list while unpinned
    lru_tick: Option<u64>,
}

struct LruState<K, V> {
    capacity: usize,
    usage: usize,
    next_tick: u64,
    next_entry_id: u64,
    entries: HashMap<K, CacheEntry<V>>,
    /// tick → key, oldest first; only unpinned entries appear here
    lru: BTreeMap<u64, K>,
    hits: u64,
    misses: u64,
}

impl<K: Clone + Eq + Hash, V> LruState<K, V> {
    fn remove(&mut self, key: &K) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        if let Some(tick) = entry.lru_tick {
            self.lru.remove(&tick);
        }
        self.usage -= entry.charge;
        Some(entry)
    }

    fn evict(&mut self) {
        while self.usage > self.capacity {
            let Some((_, key)) = self.lru.pop_first() else {
                // Everything left is pinned
                break;
            };
            if let Some(entry) = self.entries.remove(&key) {
                self.usage -= entry.charge;
            }
        }
    }

    fn release(&mut self, key: &K, id: u64) {
        let tick = self.next_tick;
        let Some(entry) = self.entries.get_mut(key) else {
            return;
        };
        if entry.id != id {
            return;
        }
        entry.refs -= 1;
        if entry.refs == 0 {
            entry.lru_tick = Some(tick);
            self.next_tick += 1;
            self.lru.insert(tick, key.clone());
            self.evict();
        }
    }
}

/// Capacity-bounded LRU cache, charged in caller-defined units
pub struct LruCache<K, V> {
    state: Arc<Mutex<LruState<K, V>>>,
    next_cache_id: AtomicU64,
}

impl<K: Clone + Eq + Hash, V> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(LruState {
                capacity,
                usage: 0,
                next_tick: 0,
                next_entry_id: 0,
                entries: HashMap::new(),
                lru: BTreeMap::new(),
                hits: 0,
                misses: 0,
            })),
            next_cache_id: AtomicU64::new(1),
        }
    }

    /// Insert `value`, replacing any entry under `key`, and return it pinned
    pub fn insert(&self, key: K, value: V, charge: usize) -> CacheHandle<K, V> {
        let value = Arc::new(value);
        let mut state = self.state.lock();
        state.remove(&key);

        let id = state.next_entry_id;
        state.next_entry_id += 1;
        state.usage += charge;
        state.entries.insert(
            key.clone(),
            CacheEntry {
                value: Arc::clone(&value),
                charge,
                id,
                refs: 1,
                lru_tick: None,
            },
        );
        state.evict();

        CacheHandle {
            state: Arc::clone(&self.state),
            key,
            id,
            value,
        }
    }

    /// Look up `key`, pinning the entry if present
    pub fn lookup(&self, key: &K) -> Option<CacheHandle<K, V>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(entry) = state.entries.get_mut(key) else {
            state.misses += 1;
            return None;
        };
        entry.refs += 1;
        let id = entry.id;
        let value = Arc::clone(&entry.value);
        if let Some(tick) = entry.lru_tick.take() {
            state.lru.remove(&tick);
        }
        state.hits += 1;

        Some(CacheHandle {
            state: Arc::clone(&self.state),
            key: key.clone(),
            id,
            value,
        })
    }

    /// Drop the entry under `key`. Outstanding handles keep their value.
    pub fn erase(&self, key: &K) {
        self.state.lock().remove(key);
    }

    /// A fresh id for partitioning the key space among clients
    pub fn new_id(&self) -> u64 {
        self.next_cache_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Sum of charges of all resident entries
    pub fn total_charge(&self) -> usize {
        self.state.lock().usage
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// (hits, misses) since creation
    pub fn stats(&self) -> (u64, u64) {
        let state = self.state.lock();
        (state.hits, state.misses)
    }
}

impl<K, V> fmt::Debug for LruCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("LruCache")
            .field("capacity", &state.capacity)
            .field("usage", &state.usage)
            .field("entries", &state.entries.len())
            .finish()
    }
}

/// Pinned reference to a cached value; unpins on drop
pub struct CacheHandle<K: Clone + Eq + Hash, V> {
    state: Arc<Mutex<LruState<K, V>>>,
    key: K,
    id: u64,
    value: Arc<V>,
}

impl<K: Clone + Eq + Hash, V> CacheHandle<K, V> {
    pub fn value(&self) -> &Arc<V> {
        &self.value
    }
}

impl<K: Clone + Eq + Hash, V> Deref for CacheHandle<K, V> {
    type Target = V;

    fn deref(&self) -> &V {
        &self.value
    }
}

impl<K: Clone + Eq + Hash, V> Drop for CacheHandle<K, V> {
    fn drop(&mut self) {
        self.state.lock().release(&self.key, self.id);
    }
}
