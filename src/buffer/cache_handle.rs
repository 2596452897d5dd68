use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, RawRwLock, RwLock};

use crate::common::LockMode;

/// A decoded object held by the cache together with its bookkeeping.
pub struct CacheEntry<V> {
    /// Cache key (the object's on-disk address)
    key: u64,
    /// The decoded object
    value: Arc<RwLock<V>>,
    /// Whether the object changed since it was loaded or last written back
    dirty: AtomicBool,
    /// Second-chance bit for the clock hand
    referenced: AtomicBool,
}

impl<V> CacheEntry<V> {
    pub(crate) fn new(key: u64, value: V, dirty: bool) -> Self {
        Self {
            key,
            value: Arc::new(RwLock::new(value)),
            dirty: AtomicBool::new(dirty),
            referenced: AtomicBool::new(true),
        }
    }

    pub fn key(&self) -> u64 {
        self.key
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub(crate) fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::Release);
    }

    pub(crate) fn touch(&self) {
        self.referenced.store(true, Ordering::Relaxed);
    }

    /// Clears the second-chance bit, returning its previous value.
    pub(crate) fn take_reference(&self) -> bool {
        self.referenced.swap(false, Ordering::Relaxed)
    }

    pub(crate) fn lock(&self) -> &Arc<RwLock<V>> {
        &self.value
    }
}

/// RAII handle holding a shared lock on a cached object.
pub struct ReadHandle<V> {
    guard: ArcRwLockReadGuard<RawRwLock, V>,
    entry: Arc<CacheEntry<V>>,
}

impl<V> ReadHandle<V> {
    pub(crate) fn new(entry: Arc<CacheEntry<V>>) -> Self {
        let guard = entry.value.read_arc();
        Self { guard, entry }
    }

    pub fn key(&self) -> u64 {
        self.entry.key
    }
}

impl<V> Deref for ReadHandle<V> {
    type Target = V;

    fn deref(&self) -> &V {
        &self.guard
    }
}

/// RAII handle holding an exclusive lock on a cached object.
/// Mutable access marks the entry dirty.
pub struct WriteHandle<V> {
    guard: ArcRwLockWriteGuard<RawRwLock, V>,
    entry: Arc<CacheEntry<V>>,
}

impl<V> WriteHandle<V> {
    pub(crate) fn new(entry: Arc<CacheEntry<V>>) -> Self {
        let guard = entry.value.write_arc();
        Self { guard, entry }
    }

    pub fn key(&self) -> u64 {
        self.entry.key
    }
}

impl<V> Deref for WriteHandle<V> {
    type Target = V;

    fn deref(&self) -> &V {
        &self.guard
    }
}

impl<V> DerefMut for WriteHandle<V> {
    fn deref_mut(&mut self) -> &mut V {
        self.entry.set_dirty(true);
        &mut self.guard
    }
}

/// Keeps an entry resident without locking it.
pub struct PinnedHandle<V> {
    entry: Arc<CacheEntry<V>>,
}

impl<V> PinnedHandle<V> {
    pub fn key(&self) -> u64 {
        self.entry.key
    }

    pub fn read(self) -> ReadHandle<V> {
        ReadHandle::new(self.entry)
    }

    pub fn write(self) -> WriteHandle<V> {
        WriteHandle::new(self.entry)
    }
}

/// A handle in whichever mode was requested.
pub enum CacheHandle<V> {
    Read(ReadHandle<V>),
    Write(WriteHandle<V>),
    Pinned(PinnedHandle<V>),
}

impl<V> CacheHandle<V> {
    pub(crate) fn acquire(entry: Arc<CacheEntry<V>>, mode: LockMode) -> Self {
        entry.touch();
        match mode {
            LockMode::Read => CacheHandle::Read(ReadHandle::new(entry)),
            LockMode::Write => CacheHandle::Write(WriteHandle::new(entry)),
            LockMode::None => CacheHandle::Pinned(PinnedHandle { entry }),
        }
    }

    pub fn key(&self) -> u64 {
        match self {
            CacheHandle::Read(h) => h.key(),
            CacheHandle::Write(h) => h.key(),
            CacheHandle::Pinned(h) => h.key(),
        }
    }

    pub fn mode(&self) -> LockMode {
        match self {
            CacheHandle::Read(_) => LockMode::Read,
            CacheHandle::Write(_) => LockMode::Write,
            CacheHandle::Pinned(_) => LockMode::None,
        }
    }

    pub fn into_read(self) -> Option<ReadHandle<V>> {
        match self {
            CacheHandle::Read(h) => Some(h),
            _ => None,
        }
    }

    pub fn into_write(self) -> Option<WriteHandle<V>> {
        match self {
            CacheHandle::Write(h) => Some(h),
            _ => None,
        }
    }
}
