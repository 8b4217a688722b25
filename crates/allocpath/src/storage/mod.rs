//! Address → path-key storage layer.
//!
//! Addresses are opaque 64-bit handles; nothing here dereferences them.
//! Entries are created on allocation and removed on free. An address freed
//! without a free notification simply lingers until overwritten; a
//! documented limitation, not an error.

mod address_map;
mod dispatch;
mod global;
mod sharded;

pub use address_map::{AddressMap, MapBacking};
pub use dispatch::{DispatchingPathStorage, ThreadClassifier};
pub use global::GlobalPathStorage;
pub use sharded::{ThreadShardedPathStorage, DEFAULT_SWEEP_INTERVAL};

use crate::key::PathKey;

/// Contract shared by every address→key map.
///
/// Absence is an explicit result, never an error: `get` on a never-recorded
/// or already-freed address returns `None`, and `remove` of a missing entry
/// is a no-op.
pub trait AllocationPathStorage: Send + Sync {
    fn get(&self, address: u64) -> Option<PathKey>;
    fn put(&self, address: u64, key: PathKey);
    fn remove(&self, address: u64) -> Option<PathKey>;
    fn is_empty(&self) -> bool;
}
