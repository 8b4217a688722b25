//! Routing between thread-sharded and global storage.

use crate::key::PathKey;
use crate::storage::{
    AllocationPathStorage, GlobalPathStorage, MapBacking, ThreadShardedPathStorage,
};

/// Embedder-supplied predicate over the calling thread.
///
/// Long-lived worker threads that allocate heavily earn a private shard;
/// everything else shares the global map. The classification must be
/// stable for a given thread, but lookups tolerate a misroute by falling
/// back to the other side.
pub trait ThreadClassifier: Send + Sync {
    fn use_thread_shard(&self) -> bool;
}

impl<F> ThreadClassifier for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn use_thread_shard(&self) -> bool {
        self()
    }
}

/// Storage that dispatches each call to sharded or global storage based on
/// a [`ThreadClassifier`].
pub struct DispatchingPathStorage {
    sharded: ThreadShardedPathStorage,
    global: GlobalPathStorage,
    classifier: Box<dyn ThreadClassifier>,
}

impl DispatchingPathStorage {
    pub fn new(classifier: Box<dyn ThreadClassifier>, backing: MapBacking) -> Self {
        Self {
            sharded: ThreadShardedPathStorage::new(backing),
            global: GlobalPathStorage::new(),
            classifier,
        }
    }

    pub fn with_parts(
        classifier: Box<dyn ThreadClassifier>,
        sharded: ThreadShardedPathStorage,
        global: GlobalPathStorage,
    ) -> Self {
        Self {
            sharded,
            global,
            classifier,
        }
    }

    fn routed(&self) -> (&dyn AllocationPathStorage, &dyn AllocationPathStorage) {
        if self.classifier.use_thread_shard() {
            (&self.sharded, &self.global)
        } else {
            (&self.global, &self.sharded)
        }
    }
}

impl AllocationPathStorage for DispatchingPathStorage {
    #[inline]
    fn get(&self, address: u64) -> Option<PathKey> {
        let (primary, fallback) = self.routed();
        primary.get(address).or_else(|| fallback.get(address))
    }

    #[inline]
    fn put(&self, address: u64, key: PathKey) {
        self.routed().0.put(address, key);
    }

    #[inline]
    fn remove(&self, address: u64) -> Option<PathKey> {
        let (primary, fallback) = self.routed();
        primary.remove(address).or_else(|| fallback.remove(address))
    }

    fn is_empty(&self) -> bool {
        self.sharded.is_empty() && self.global.is_empty()
    }
}
