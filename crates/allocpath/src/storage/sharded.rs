//! Per-thread sharded storage with idle reclamation.
//!
//! Each thread gets a private [`AddressMap`] created lazily on first use
//! and registered in a shard directory. The owning thread is the only
//! frequent accessor; strangers (cross-thread frees, reporting walks, the
//! sweeper) are rare and serialize through a spin flag, a single
//! compare-and-swap with busy-wait and no fairness guarantee.
//!
//! Thread death is observed through an explicit lifecycle hook: the
//! thread-local registration table marks its shards dead when the thread's
//! locals are torn down. A background sweep then reclaims shards whose
//! owner is dead and whose map is empty.

use std::cell::{RefCell, UnsafeCell};
use std::collections::HashMap;
use std::hint;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use log::debug;

use crate::key::PathKey;
use crate::storage::{AddressMap, AllocationPathStorage, MapBacking};
use crate::tid;

/// Default idle-sweep interval.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

const DEFAULT_SHARD_CAPACITY: usize = 256;

/// Busy-wait mutual exclusion for rare cross-thread shard access.
struct SpinFlag(AtomicBool);

struct SpinGuard<'a>(&'a SpinFlag);

impl SpinFlag {
    const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    #[inline]
    fn acquire(&self) -> SpinGuard<'_> {
        while self
            .0
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            hint::spin_loop();
        }
        SpinGuard(self)
    }
}

impl Drop for SpinGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.0 .0.store(false, Ordering::Release);
    }
}

struct Shard {
    owner_tid: u64,
    owner_alive: AtomicBool,
    flag: SpinFlag,
    map: UnsafeCell<AddressMap>,
}

// SAFETY: every access to `map` goes through `with_map`, which serializes
// readers and writers behind the spin flag.
unsafe impl Send for Shard {}
unsafe impl Sync for Shard {}

impl Shard {
    fn new(backing: MapBacking, capacity: usize) -> Self {
        Self {
            owner_tid: tid::current_tid(),
            owner_alive: AtomicBool::new(true),
            flag: SpinFlag::new(),
            map: UnsafeCell::new(AddressMap::with_capacity(backing, capacity)),
        }
    }

    #[inline]
    fn with_map<R>(&self, f: impl FnOnce(&mut AddressMap) -> R) -> R {
        let _guard = self.flag.acquire();
        // SAFETY: the spin flag grants exclusive access for the guard's
        // lifetime.
        f(unsafe { &mut *self.map.get() })
    }
}

struct ShardDirectory {
    shards: Mutex<Vec<Arc<Shard>>>,
}

impl ShardDirectory {
    fn register(&self, shard: Arc<Shard>) {
        self.shards
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(shard);
    }

    fn snapshot(&self) -> Vec<Arc<Shard>> {
        self.shards
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn reclaim_idle(&self) {
        let mut shards = self.shards.lock().unwrap_or_else(PoisonError::into_inner);
        let before = shards.len();
        shards.retain(|shard| {
            shard.owner_alive.load(Ordering::Acquire) || !shard.with_map(|map| map.is_empty())
        });
        let reclaimed = before - shards.len();
        if reclaimed > 0 {
            debug!("reclaimed {reclaimed} idle thread shard(s)");
        }
    }
}

/// One thread's registration with one storage instance. A dead directory
/// handle means the storage itself is gone and the entry is stale.
struct ShardEntry {
    directory: Weak<ShardDirectory>,
    shard: Arc<Shard>,
}

/// Marks this thread's shards dead when the thread's locals are dropped.
struct ThreadShardTable {
    by_storage: RefCell<HashMap<u64, ShardEntry>>,
}

impl Drop for ThreadShardTable {
    fn drop(&mut self) {
        for entry in self.by_storage.get_mut().values() {
            entry.shard.owner_alive.store(false, Ordering::Release);
        }
    }
}

thread_local! {
    static THREAD_SHARDS: ThreadShardTable = ThreadShardTable {
        by_storage: RefCell::new(HashMap::new()),
    };
}

#[cfg(test)]
fn registered_storage_count() -> usize {
    THREAD_SHARDS.with(|table| table.by_storage.borrow().len())
}

static NEXT_STORAGE_ID: AtomicU64 = AtomicU64::new(1);

/// Address→key storage holding one private map per allocating thread.
pub struct ThreadShardedPathStorage {
    storage_id: u64,
    backing: MapBacking,
    shard_capacity: usize,
    directory: Arc<ShardDirectory>,
    sweeper_shutdown: Option<Sender<()>>,
    sweeper: Option<thread::JoinHandle<()>>,
}

impl ThreadShardedPathStorage {
    pub fn new(backing: MapBacking) -> Self {
        Self::with_sweep_interval(backing, DEFAULT_SWEEP_INTERVAL)
    }

    pub fn with_sweep_interval(backing: MapBacking, sweep_interval: Duration) -> Self {
        Self::with_options(backing, sweep_interval, DEFAULT_SHARD_CAPACITY)
    }

    pub fn with_options(
        backing: MapBacking,
        sweep_interval: Duration,
        shard_capacity: usize,
    ) -> Self {
        let directory = Arc::new(ShardDirectory {
            shards: Mutex::new(Vec::new()),
        });
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let sweep_directory = Arc::clone(&directory);
        let sweeper = thread::Builder::new()
            .name("ap-sweep".into())
            .spawn(move || loop {
                match shutdown_rx.recv_timeout(sweep_interval) {
                    Err(RecvTimeoutError::Timeout) => sweep_directory.reclaim_idle(),
                    _ => break,
                }
            })
            .expect("failed to spawn allocpath sweeper thread");

        Self {
            storage_id: NEXT_STORAGE_ID.fetch_add(1, Ordering::Relaxed),
            backing,
            shard_capacity,
            directory,
            sweeper_shutdown: Some(shutdown_tx),
            sweeper: Some(sweeper),
        }
    }

    /// Shard of the calling thread, created and registered on first use.
    fn own_shard(&self) -> Arc<Shard> {
        THREAD_SHARDS.with(|table| {
            let mut by_storage = table.by_storage.borrow_mut();
            if let Some(entry) = by_storage.get(&self.storage_id) {
                return Arc::clone(&entry.shard);
            }

            // First touch of this storage from this thread; drop stale
            // registrations so dropped storages cannot pile up here.
            by_storage.retain(|_, entry| entry.directory.strong_count() > 0);

            let shard = Arc::new(Shard::new(self.backing, self.shard_capacity));
            debug!("created thread shard for tid {}", shard.owner_tid);
            self.directory.register(Arc::clone(&shard));
            by_storage.insert(
                self.storage_id,
                ShardEntry {
                    directory: Arc::downgrade(&self.directory),
                    shard: Arc::clone(&shard),
                },
            );
            shard
        })
    }

    /// This thread's shard if it already exists. Lookups go through here
    /// so reporting threads that never allocate never acquire a shard.
    fn existing_shard(&self) -> Option<Arc<Shard>> {
        THREAD_SHARDS.with(|table| {
            table
                .by_storage
                .borrow()
                .get(&self.storage_id)
                .map(|entry| Arc::clone(&entry.shard))
        })
    }

    /// Searches every other registered shard. Cross-thread traffic is rare
    /// by design, so the spin-flag cost stays off the hot path.
    fn find_elsewhere(
        &self,
        own: Option<&Arc<Shard>>,
        address: u64,
    ) -> Option<(Arc<Shard>, PathKey)> {
        for shard in self.directory.snapshot() {
            if own.is_some_and(|own| Arc::ptr_eq(&shard, own)) {
                continue;
            }
            if let Some(key) = shard.with_map(|map| map.get(address)) {
                return Some((shard, key));
            }
        }
        None
    }

    /// Number of registered shards, including dead-but-nonempty ones.
    pub fn shard_count(&self) -> usize {
        self.directory.snapshot().len()
    }

    /// Runs one idle sweep immediately. The background sweeper performs
    /// the same pass on its fixed interval; a shard is reclaimed only once
    /// its owning thread is dead and its map is empty.
    pub fn reclaim_idle_shards(&self) {
        self.directory.reclaim_idle();
    }
}

impl AllocationPathStorage for ThreadShardedPathStorage {
    #[inline]
    fn get(&self, address: u64) -> Option<PathKey> {
        let own = self.existing_shard();
        if let Some(shard) = &own {
            if let Some(key) = shard.with_map(|map| map.get(address)) {
                return Some(key);
            }
        }
        self.find_elsewhere(own.as_ref(), address).map(|(_, key)| key)
    }

    #[inline]
    fn put(&self, address: u64, key: PathKey) {
        self.own_shard().with_map(|map| map.put(address, key));
    }

    #[inline]
    fn remove(&self, address: u64) -> Option<PathKey> {
        let own = self.existing_shard();
        if let Some(shard) = &own {
            if let Some(key) = shard.with_map(|map| map.remove(address)) {
                return Some(key);
            }
        }
        // A region may be freed by a different thread than the one that
        // allocated it.
        self.find_elsewhere(own.as_ref(), address)
            .and_then(|(shard, _)| shard.with_map(|map| map.remove(address)))
    }

    fn is_empty(&self) -> bool {
        self.directory
            .snapshot()
            .iter()
            .all(|shard| shard.with_map(|map| map.is_empty()))
    }
}

impl Drop for ThreadShardedPathStorage {
    fn drop(&mut self) {
        // Wake the sweeper and wait for it, so the directory's last
        // reference is released by the time drop returns and thread
        // tables can prune this storage's entries.
        drop(self.sweeper_shutdown.take());
        if let Some(sweeper) = self.sweeper.take() {
            let _ = sweeper.join();
        }
    }
}

impl std::fmt::Debug for ThreadShardedPathStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadShardedPathStorage")
            .field("storage_id", &self.storage_id)
            .field("backing", &self.backing)
            .field("shards", &self.shard_count())
            .finish()
    }
}
