//! Attribute every live native-memory address to the call chain that
//! produced it, so a diagnostic tool can report "this leaked block was
//! allocated from A -> B -> C" with bounded overhead.
//!
//! The engine interns call-site names into 15-bit ids, packs up to four of
//! them into a single 64-bit path key, accumulates the in-progress key per
//! thread through push/pop notifications from instrumented call sites, and
//! maps live addresses to keys in lock-light storage. Once a call chain's
//! sites are known, recording an allocation is a thread-local read plus
//! one map insert, with no stack walk and no locks.
//!
//! ```rust
//! use allocpath::{AllocationPathManager, GlobalPathStorage, TrackerConfig};
//!
//! let config = TrackerConfig::new();
//! let manager = AllocationPathManager::new(&config);
//! let storage = GlobalPathStorage::new();
//!
//! manager.on_allocate(&storage, 0x7f00_dead_b000, 0).unwrap();
//! if let Some(path) = manager.lookup(&storage, 0x7f00_dead_b000) {
//!     println!("allocated from {path}");
//! }
//! manager.on_free(&storage, 0x7f00_dead_b000);
//! assert!(manager.lookup(&storage, 0x7f00_dead_b000).is_none());
//! ```

pub use allocpath_macros::{skip, track, track_all};

pub mod config;
pub mod error;
pub mod global;
pub mod key;
pub mod manager;
pub mod path;
pub mod provider;
pub mod registry;
pub mod storage;
pub mod tracker;
pub mod walker;

#[cfg(feature = "alloc-hook")]
pub mod hook;

pub(crate) mod tid;

pub use config::TrackerConfig;
pub use error::PathTrackError;
pub use global::{install, installed, TrackerContext};
pub use key::{CallPointId, PathKey, MAX_CALL_POINTS, MAX_PATH_DEPTH, NO_PATH};
pub use manager::AllocationPathManager;
pub use path::AllocationPath;
pub use provider::{EagerWalkInstrumentation, InstrumentError, InstrumentationProvider};
pub use registry::{CallPoint, CallPointRegistry, UNKNOWN_CALL_POINT};
pub use storage::{
    AddressMap, AllocationPathStorage, DispatchingPathStorage, GlobalPathStorage, MapBacking,
    ThreadClassifier, ThreadShardedPathStorage,
};
pub use tracker::CallGuard;
pub use walker::{BacktraceWalker, CallStackSource};

#[cfg(feature = "alloc-hook")]
pub use hook::PathTrackingAllocator;
