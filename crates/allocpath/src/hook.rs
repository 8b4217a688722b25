//! Global-allocator wrapper reporting to the installed tracker context.
//!
//! The raw allocator stays the embedder's business: this type only wraps
//! one and forwards every alloc/free to the installed [`TrackerContext`].
//! A thread-local latch keeps the tracker's own allocations (map growth,
//! interned names, walk buffers) from being recursively tracked.

use std::alloc::{GlobalAlloc, Layout};
use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::global;

/// Engine-internal frames between the allocation site and the walker:
/// the hook, the manager's capture path and the walk itself. Inlining
/// makes the exact count build-dependent; this is calibrated for debug
/// builds and errs toward keeping application frames.
const HOOK_SKIP_FRAMES: usize = 5;

thread_local! {
    static IN_HOOK: Cell<bool> = const { Cell::new(false) };
}

static DROPPED_CAPTURES: AtomicU64 = AtomicU64::new(0);

/// Allocations whose path capture failed (registry full, instrumentation
/// refusal) and were therefore stored without attribution.
pub fn dropped_captures() -> u64 {
    DROPPED_CAPTURES.load(Ordering::Relaxed)
}

/// Wraps any [`GlobalAlloc`], attributing each allocation to its call
/// chain.
///
/// ```rust,no_run
/// use std::alloc::System;
/// use allocpath::PathTrackingAllocator;
///
/// #[global_allocator]
/// static ALLOC: PathTrackingAllocator<System> = PathTrackingAllocator::new(System);
/// ```
pub struct PathTrackingAllocator<A> {
    inner: A,
}

impl<A> PathTrackingAllocator<A> {
    pub const fn new(inner: A) -> Self {
        Self { inner }
    }
}

fn report_alloc(address: u64) {
    // try_with: allocations can happen while thread-locals are being
    // torn down, at which point tracking quietly stops for this thread.
    let _ = IN_HOOK.try_with(|latch| {
        if latch.get() {
            return;
        }
        latch.set(true);
        if let Some(context) = global::installed() {
            if context.record_allocation(address, HOOK_SKIP_FRAMES).is_none() {
                DROPPED_CAPTURES.fetch_add(1, Ordering::Relaxed);
            }
        }
        latch.set(false);
    });
}

fn report_free(address: u64) {
    let _ = IN_HOOK.try_with(|latch| {
        if latch.get() {
            return;
        }
        latch.set(true);
        if let Some(context) = global::installed() {
            context.record_free(address);
        }
        latch.set(false);
    });
}

// SAFETY: delegates allocation to `inner` unchanged; the tracking side
// never touches the allocated memory, only the address value.
unsafe impl<A: GlobalAlloc> GlobalAlloc for PathTrackingAllocator<A> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { self.inner.alloc(layout) };
        if !ptr.is_null() {
            report_alloc(ptr as u64);
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        report_free(ptr as u64);
        unsafe { self.inner.dealloc(ptr, layout) };
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = unsafe { self.inner.realloc(ptr, layout, new_size) };
        if !new_ptr.is_null() {
            report_free(ptr as u64);
            report_alloc(new_ptr as u64);
        }
        new_ptr
    }
}
