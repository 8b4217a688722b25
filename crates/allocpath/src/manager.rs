//! Orchestration of allocation and free events.
//!
//! Per allocation, the manager is in one of three conceptual states
//! depending on the calling thread's accumulated call depth:
//!
//! - **NEW** (depth 0): nothing accumulated; walk the stack, registering
//!   and instrumenting call points seen for the first time.
//! - **BUILDING** (0 < depth < max): the live key could be a genuinely
//!   shallow chain or a chain with uninstrumented sites in it. A key the
//!   premature set has already vouched for is trusted; anything else is
//!   resolved by re-walking.
//! - **COMPLETE** (depth ≥ max): the live key is definitive. Store it and
//!   return. This is the steady-state fast path that amortizes the
//!   one-time instrumentation cost down to nothing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashSet;
use log::debug;

use crate::config::TrackerConfig;
use crate::error::PathTrackError;
use crate::key::{self, CallPointId, PathKey, NO_PATH};
use crate::path::AllocationPath;
use crate::provider::{EagerWalkInstrumentation, InstrumentationProvider};
use crate::registry::CallPointRegistry;
use crate::storage::AllocationPathStorage;
use crate::tracker;
use crate::walker::{BacktraceWalker, CallStackSource};

/// Attributes every live allocation to the call chain that produced it.
pub struct AllocationPathManager {
    registry: CallPointRegistry,
    /// Keys known to come from call chains shallower than the capture
    /// depth (e.g. allocations near program start). Membership lets the
    /// BUILDING state skip a redundant re-walk.
    premature_keys: DashSet<PathKey>,
    provider: Box<dyn InstrumentationProvider>,
    walker: Box<dyn CallStackSource>,
    /// The single true global lock: serializes first-time call-point
    /// registration plus the instrumentation request. Taken at most once
    /// per distinct call site in the process lifetime, never per
    /// allocation.
    instrument_gate: Mutex<()>,
    max_depth: usize,
    stack_walks: AtomicU64,
}

impl AllocationPathManager {
    /// Manager with the default backtrace walker and the eager-walk
    /// (no-op) instrumentation provider.
    pub fn new(config: &TrackerConfig) -> Self {
        Self::with_parts(
            config,
            Box::new(EagerWalkInstrumentation),
            Box::new(BacktraceWalker),
        )
    }

    /// Manager with an embedder-supplied instrumentation provider and
    /// stack-walk source.
    pub fn with_parts(
        config: &TrackerConfig,
        provider: Box<dyn InstrumentationProvider>,
        walker: Box<dyn CallStackSource>,
    ) -> Self {
        Self {
            registry: CallPointRegistry::new(),
            premature_keys: DashSet::new(),
            provider,
            walker,
            instrument_gate: Mutex::new(()),
            max_depth: config.max_depth_value(),
            stack_walks: AtomicU64::new(0),
        }
    }

    /// Records the call path of a freshly allocated `address`.
    ///
    /// `skip_frames` is the number of tracker-internal frames to discard
    /// when a stack walk is needed. Registry exhaustion is fatal; an
    /// instrumentation failure poisons only this capture attempt.
    pub fn on_allocate(
        &self,
        storage: &dyn AllocationPathStorage,
        address: u64,
        skip_frames: usize,
    ) -> Result<PathKey, PathTrackError> {
        let (live_key, depth) = tracker::current();
        let depth = depth as usize;

        let path_key = if depth == 0 {
            self.capture(skip_frames)?
        } else if depth >= self.max_depth {
            live_key
        } else if self.premature_keys.contains(&live_key) {
            live_key
        } else {
            self.capture(skip_frames)?
        };

        storage.put(address, path_key);
        Ok(path_key)
    }

    /// Drops the mapping for a released `address`. Absence is not an
    /// error; regions allocated before tracking started free through
    /// here too.
    pub fn on_free(&self, storage: &dyn AllocationPathStorage, address: u64) {
        storage.remove(address);
    }

    /// Resolves the recorded path for a live `address`, or `None` when the
    /// address was never recorded or already freed.
    pub fn lookup(
        &self,
        storage: &dyn AllocationPathStorage,
        address: u64,
    ) -> Option<AllocationPath> {
        storage.get(address).map(|key| self.lookup_by_key(key))
    }

    /// Decodes a path key without touching storage.
    pub fn lookup_by_key(&self, path_key: PathKey) -> AllocationPath {
        AllocationPath::decode(path_key, &self.registry)
    }

    #[inline]
    pub fn registry(&self) -> &CallPointRegistry {
        &self.registry
    }

    #[inline]
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Total number of backtrace walks performed so far. The premature-key
    /// cache exists to keep this flat for repeated shallow chains.
    pub fn stack_walk_count(&self) -> u64 {
        self.stack_walks.load(Ordering::Relaxed)
    }

    /// Walks the current stack and builds a key from the innermost
    /// `max_depth` frames, registering and instrumenting new call points
    /// along the way. Chains shorter than the capture depth are remembered
    /// as premature so the next identical chain skips the walk.
    fn capture(&self, skip_frames: usize) -> Result<PathKey, PathTrackError> {
        self.stack_walks.fetch_add(1, Ordering::Relaxed);
        let frames = self.walker.collect_frames(skip_frames, self.max_depth);

        // Oldest frame first, so the allocation-nearest call ends up in
        // the low bits.
        let mut path_key = NO_PATH;
        for name in frames.iter().rev() {
            let id = self.call_point_id(name)?;
            path_key = key::append_call(path_key, id);
        }

        if frames.len() < self.max_depth {
            debug!(
                "caching premature path key {path_key:#x} ({} of {} frames)",
                frames.len(),
                self.max_depth
            );
            self.premature_keys.insert(path_key);
        }
        Ok(path_key)
    }

    /// Id for `name`, registering it and requesting instrumentation on
    /// first use. The request happens at most once per distinct call site:
    /// once a name is interned it is never re-requested, even if the
    /// provider failed it.
    fn call_point_id(&self, name: &str) -> Result<CallPointId, PathTrackError> {
        if let Some(existing) = self.registry.find(name) {
            return Ok(existing.id());
        }

        let _gate = self
            .instrument_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = self.registry.find(name) {
            return Ok(existing.id());
        }

        let call_point = self.registry.intern(name)?;
        self.provider
            .request(&call_point)
            .map_err(|source| PathTrackError::Instrumentation {
                call_point: Arc::clone(call_point.name()),
                source,
            })?;
        Ok(call_point.id())
    }
}

impl std::fmt::Debug for AllocationPathManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocationPathManager")
            .field("call_points", &self.registry.len())
            .field("premature_keys", &self.premature_keys.len())
            .field("max_depth", &self.max_depth)
            .field("stack_walks", &self.stack_walk_count())
            .finish()
    }
}
