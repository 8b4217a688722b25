//! Optional process-default tracker context.
//!
//! The engine itself is built from explicit context objects constructed
//! once and passed by reference. The `#[allocpath::track]` macro and the
//! `alloc-hook` allocator wrapper, however, run from code that cannot
//! thread a context through, so a single installable default lives here.

use std::sync::OnceLock;

use crate::key::PathKey;
use crate::manager::AllocationPathManager;
use crate::path::AllocationPath;
use crate::storage::AllocationPathStorage;

/// A manager paired with the storage its events land in.
pub struct TrackerContext {
    manager: AllocationPathManager,
    storage: Box<dyn AllocationPathStorage>,
}

impl TrackerContext {
    pub fn new(manager: AllocationPathManager, storage: Box<dyn AllocationPathStorage>) -> Self {
        Self { manager, storage }
    }

    #[inline]
    pub fn manager(&self) -> &AllocationPathManager {
        &self.manager
    }

    #[inline]
    pub fn storage(&self) -> &dyn AllocationPathStorage {
        &*self.storage
    }

    /// Records an allocation against this context's storage.
    pub fn record_allocation(&self, address: u64, skip_frames: usize) -> Option<PathKey> {
        self.manager
            .on_allocate(self.storage(), address, skip_frames)
            .ok()
    }

    /// Records a free against this context's storage.
    pub fn record_free(&self, address: u64) {
        self.manager.on_free(self.storage(), address);
    }

    pub fn lookup(&self, address: u64) -> Option<AllocationPath> {
        self.manager.lookup(self.storage(), address)
    }
}

static INSTALLED: OnceLock<TrackerContext> = OnceLock::new();

/// Installs `context` as the process default.
///
/// # Panics
///
/// Panics if a context is already installed; the default is fixed for the
/// process lifetime.
pub fn install(context: TrackerContext) {
    if INSTALLED.set(context).is_err() {
        panic!("an allocpath tracker context is already installed");
    }
}

/// The installed context, if any.
#[inline]
pub fn installed() -> Option<&'static TrackerContext> {
    INSTALLED.get()
}
