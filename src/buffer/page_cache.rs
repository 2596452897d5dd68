use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;

use crate::common::{LockMode, Result};

use super::{CacheEntry, CacheHandle, ReadHandle, WriteHandle};

/// Source and sink of the objects a [`PageCache`] holds.
pub trait CacheBacking<V> {
    /// Materializes the object stored at `key`.
    fn load(&self, key: u64) -> Result<V>;

    /// Writes a dirty object back to `key`.
    fn store(&self, key: u64, value: &V) -> Result<()>;
}

struct CacheState<V> {
    /// Resident entries by key
    entries: HashMap<u64, Arc<CacheEntry<V>>>,
    /// Clock ring; the front is the next eviction candidate
    ring: VecDeque<u64>,
}

/// PageCache keeps a bounded set of decoded page-backed objects in memory.
/// Each object is guarded by its own read/write lock, handed out as RAII
/// handles. Eviction is a clock hand over the ring of resident keys that
/// skips entries still referenced by a handle, and writes dirty victims
/// back through the caller's [`CacheBacking`] before dropping them.
pub struct PageCache<V> {
    /// Number of entries kept before eviction starts
    capacity: usize,
    /// Shared state
    state: Mutex<CacheState<V>>,
    /// Lookups served from memory
    hits: AtomicU64,
    /// Lookups that went to the backing
    misses: AtomicU64,
    /// Entries dropped to make room
    evictions: AtomicU64,
}

impl<V: Send + Sync + 'static> PageCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                ring: VecDeque::new(),
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Returns a handle on a resident entry in the requested mode, or `None`
    /// if the key is not cached.
    pub fn get(&self, key: u64, mode: LockMode) -> Option<CacheHandle<V>> {
        let entry = self.state.lock().entries.get(&key).cloned()?;
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(CacheHandle::acquire(entry, mode))
    }

    /// Returns a handle on `key`, loading it through `backing` on a miss.
    pub fn add(
        &self,
        key: u64,
        mode: LockMode,
        backing: &dyn CacheBacking<V>,
    ) -> Result<CacheHandle<V>> {
        let entry = {
            let mut state = self.state.lock();
            match state.entries.get(&key) {
                Some(entry) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    Arc::clone(entry)
                }
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    let value = backing.load(key)?;
                    self.insert_locked(&mut state, key, value, false, backing)?
                }
            }
        };
        Ok(CacheHandle::acquire(entry, mode))
    }

    /// Shared handle on `key`, loading on a miss.
    pub fn read(&self, key: u64, backing: &dyn CacheBacking<V>) -> Result<ReadHandle<V>> {
        let entry = self.entry(key, backing)?;
        entry.touch();
        Ok(ReadHandle::new(entry))
    }

    /// Exclusive handle on `key`, loading on a miss.
    pub fn write(&self, key: u64, backing: &dyn CacheBacking<V>) -> Result<WriteHandle<V>> {
        let entry = self.entry(key, backing)?;
        entry.touch();
        Ok(WriteHandle::new(entry))
    }

    /// Installs a freshly created object as dirty and returns it write-locked.
    /// Any resident entry under the same key is replaced.
    pub fn install(
        &self,
        key: u64,
        value: V,
        backing: &dyn CacheBacking<V>,
    ) -> Result<WriteHandle<V>> {
        let entry = {
            let mut state = self.state.lock();
            if state.entries.remove(&key).is_some() {
                state.ring.retain(|k| *k != key);
            }
            self.insert_locked(&mut state, key, value, true, backing)?
        };
        Ok(WriteHandle::new(entry))
    }

    /// Drops `key` from the cache without writing it back.
    pub fn delete(&self, key: u64) -> bool {
        let mut state = self.state.lock();
        if state.entries.remove(&key).is_some() {
            state.ring.retain(|k| *k != key);
            true
        } else {
            false
        }
    }

    /// Writes every dirty entry back. Callers must not hold write handles
    /// on this cache while flushing.
    pub fn flush(&self, backing: &dyn CacheBacking<V>) -> Result<usize> {
        let entries: Vec<Arc<CacheEntry<V>>> =
            self.state.lock().entries.values().cloned().collect();

        let mut written = 0;
        for entry in entries {
            if !entry.is_dirty() {
                continue;
            }
            let guard = entry.lock().read();
            backing.store(entry.key(), &guard)?;
            entry.set_dirty(false);
            written += 1;
        }
        Ok(written)
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn contains(&self, key: u64) -> bool {
        self.state.lock().entries.contains_key(&key)
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    fn entry(&self, key: u64, backing: &dyn CacheBacking<V>) -> Result<Arc<CacheEntry<V>>> {
        let mut state = self.state.lock();
        if let Some(entry) = state.entries.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(entry));
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let value = backing.load(key)?;
        self.insert_locked(&mut state, key, value, false, backing)
    }

    fn insert_locked(
        &self,
        state: &mut CacheState<V>,
        key: u64,
        value: V,
        dirty: bool,
        backing: &dyn CacheBacking<V>,
    ) -> Result<Arc<CacheEntry<V>>> {
        while state.entries.len() >= self.capacity {
            if !self.evict_one(state, backing)? {
                warn!(
                    "page cache over capacity ({} entries, capacity {}): all entries pinned",
                    state.entries.len(),
                    self.capacity
                );
                break;
            }
        }

        let entry = Arc::new(CacheEntry::new(key, value, dirty));
        state.entries.insert(key, Arc::clone(&entry));
        state.ring.push_back(key);
        Ok(entry)
    }

    /// Advances the clock hand until an unpinned, unreferenced entry is
    /// found and evicted. Returns false if every entry is pinned.
    fn evict_one(&self, state: &mut CacheState<V>, backing: &dyn CacheBacking<V>) -> Result<bool> {
        // Two sweeps: the first may only clear reference bits.
        let sweeps = state.ring.len() * 2;
        for _ in 0..sweeps {
            let key = match state.ring.pop_front() {
                Some(key) => key,
                None => return Ok(false),
            };
            let entry = match state.entries.get(&key) {
                Some(entry) => Arc::clone(entry),
                None => continue,
            };

            // One reference from the map, one from `entry` above.
            let pinned = Arc::strong_count(&entry) > 2;
            if pinned || entry.take_reference() {
                state.ring.push_back(key);
                continue;
            }

            if entry.is_dirty() {
                let guard = match entry.lock().try_read() {
                    Some(guard) => guard,
                    None => {
                        state.ring.push_back(key);
                        continue;
                    }
                };
                if let Err(e) = backing.store(key, &guard) {
                    drop(guard);
                    state.ring.push_back(key);
                    return Err(e);
                }
                entry.set_dirty(false);
            }

            state.entries.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!("page cache evicted {}", key);
            return Ok(true);
        }
        Ok(false)
    }
}
