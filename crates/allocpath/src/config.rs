//! Tracker configuration.

use std::time::Duration;

use crate::key::MAX_PATH_DEPTH;
use crate::storage::{
    DispatchingPathStorage, GlobalPathStorage, MapBacking, ThreadClassifier,
    ThreadShardedPathStorage,
};

/// Recognized tracker options, with fluent setters in the builder style.
///
/// ```rust
/// use allocpath::{MapBacking, TrackerConfig};
///
/// let config = TrackerConfig::new()
///     .max_depth(3)
///     .shard_backing(MapBacking::Raw)
///     .sweep_interval(std::time::Duration::from_secs(1));
/// ```
#[derive(Clone, Debug)]
pub struct TrackerConfig {
    max_depth: usize,
    shard_backing: MapBacking,
    shard_capacity: usize,
    sweep_interval: Duration,
}

const DEFAULT_SHARD_CAPACITY: usize = 256;

impl Default for TrackerConfig {
    fn default() -> Self {
        let sweep_interval = std::env::var("ALLOCPATH_SWEEP_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(crate::storage::DEFAULT_SWEEP_INTERVAL);
        Self {
            max_depth: MAX_PATH_DEPTH,
            shard_backing: MapBacking::Heap,
            shard_capacity: DEFAULT_SHARD_CAPACITY,
            sweep_interval,
        }
    }
}

impl TrackerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum capture depth. Hard-capped at [`MAX_PATH_DEPTH`] regardless
    /// of the requested value; values below 1 are raised to 1.
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth.clamp(1, MAX_PATH_DEPTH);
        self
    }

    /// Heap- vs raw-memory-backed shard maps.
    pub fn shard_backing(mut self, backing: MapBacking) -> Self {
        self.shard_backing = backing;
        self
    }

    /// Initial slot count of each per-thread shard map.
    pub fn shard_capacity(mut self, capacity: usize) -> Self {
        self.shard_capacity = capacity;
        self
    }

    /// Interval of the idle shard sweep. Default 5 s, overridable with the
    /// `ALLOCPATH_SWEEP_MS` environment variable.
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Thread-sharded storage configured per this config.
    pub fn sharded_storage(&self) -> ThreadShardedPathStorage {
        ThreadShardedPathStorage::with_options(
            self.shard_backing,
            self.sweep_interval,
            self.shard_capacity,
        )
    }

    /// Dispatching storage routing between a fresh sharded and global map.
    pub fn dispatching_storage(
        &self,
        classifier: Box<dyn ThreadClassifier>,
    ) -> DispatchingPathStorage {
        DispatchingPathStorage::with_parts(
            classifier,
            self.sharded_storage(),
            GlobalPathStorage::new(),
        )
    }
}

// Crate-private accessors; the fluent setters above shadow the field names.
impl TrackerConfig {
    pub(crate) fn max_depth_value(&self) -> usize {
        self.max_depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requested_depth_is_hard_capped() {
        assert_eq!(TrackerConfig::new().max_depth(64).max_depth_value(), 4);
        assert_eq!(TrackerConfig::new().max_depth(0).max_depth_value(), 1);
        assert_eq!(TrackerConfig::new().max_depth(2).max_depth_value(), 2);
    }
}
