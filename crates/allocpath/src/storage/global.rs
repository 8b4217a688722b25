//! Shared storage for threads not worth a private shard.

use dashmap::DashMap;

use crate::key::PathKey;
use crate::storage::AllocationPathStorage;

/// One concurrently-accessible address→key map shared by all threads.
#[derive(Debug, Default)]
pub struct GlobalPathStorage {
    entries: DashMap<u64, PathKey>,
}

impl GlobalPathStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries. Approximate under concurrent mutation.
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl AllocationPathStorage for GlobalPathStorage {
    #[inline]
    fn get(&self, address: u64) -> Option<PathKey> {
        self.entries.get(&address).map(|entry| *entry)
    }

    #[inline]
    fn put(&self, address: u64, key: PathKey) {
        self.entries.insert(address, key);
    }

    #[inline]
    fn remove(&self, address: u64) -> Option<PathKey> {
        self.entries.remove(&address).map(|(_, key)| key)
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn round_trips_entries() {
        let storage = GlobalPathStorage::new();
        storage.put(0x10, 7);
        assert_eq!(storage.get(0x10), Some(7));
        assert_eq!(storage.remove(0x10), Some(7));
        assert_eq!(storage.get(0x10), None);
        assert!(storage.is_empty());
    }

    #[test]
    fn concurrent_writers_do_not_lose_entries() {
        let storage = Arc::new(GlobalPathStorage::new());
        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let storage = Arc::clone(&storage);
                thread::spawn(move || {
                    for i in 0..1000u64 {
                        storage.put(t * 10_000 + i + 1, t);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(storage.len(), 4000);
    }
}
