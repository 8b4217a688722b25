//! Per-thread accumulation of the in-progress allocation path.
//!
//! Every thread owns a `(current_key, depth)` pair updated by `push`/`pop`
//! notifications from instrumented call sites, plus a spill stack for ids
//! pushed past the key's depth cap. The hot state is plain `Cell`s in a
//! `thread_local!`; the hot path takes no locks and never observes another
//! thread's accumulator.
//!
//! Depth 0 means the thread is idle, outside any tracked call.

use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::sync::OnceLock;

use log::warn;

use crate::key::{self, CallPointId, PathKey, MAX_PATH_DEPTH, NO_PATH};

struct CallDepthState {
    key: Cell<PathKey>,
    depth: Cell<u32>,
    /// Ids the key's fixed width cannot hold, oldest first. A push past
    /// the depth cap spills the outgoing outermost id here; the matching
    /// pop refills it, so the key always encodes the innermost
    /// [`MAX_PATH_DEPTH`] calls of the true chain and pops stay sound at
    /// any nesting depth.
    overflow: RefCell<Vec<CallPointId>>,
}

impl CallDepthState {
    fn reset(&self) {
        self.key.set(NO_PATH);
        self.depth.set(0);
        self.overflow.borrow_mut().clear();
    }
}

thread_local! {
    static CURRENT_PATH: CallDepthState = const {
        CallDepthState {
            key: Cell::new(NO_PATH),
            depth: Cell::new(0),
            overflow: RefCell::new(Vec::new()),
        }
    };
}

/// Records entry into the call site `id`.
#[inline]
pub fn push(id: CallPointId) {
    CURRENT_PATH.with(|state| {
        let depth = state.depth.get();
        if depth as usize >= MAX_PATH_DEPTH {
            let outgoing = key::outermost_call(state.key.get());
            state.overflow.borrow_mut().push(outgoing);
        }
        state.key.set(key::append_call(state.key.get(), id));
        state.depth.set(depth + 1);
    });
}

/// Records exit from the call site `id`.
///
/// `id` must match the most recently pushed call (strict LIFO). A mismatch
/// or a pop at depth 0 signals tracker corruption: diagnostic builds halt
/// on a `debug_assert!`, release builds reset the accumulator and keep the
/// host alive.
#[inline]
pub fn pop(id: CallPointId) {
    CURRENT_PATH.with(|state| {
        let depth = state.depth.get();
        if depth == 0 {
            debug_assert!(false, "pop({id:?}) on an empty call-depth tracker");
            warn!("call-depth tracker popped while idle; resetting");
            state.reset();
            return;
        }
        match key::remove_call(state.key.get(), id) {
            Some(shorter) => {
                let shorter = if depth as usize > MAX_PATH_DEPTH {
                    match state.overflow.borrow_mut().pop() {
                        Some(older) => key::refill_outermost(shorter, older),
                        None => shorter,
                    }
                } else {
                    shorter
                };
                state.key.set(shorter);
                state.depth.set(depth - 1);
            }
            None => {
                debug_assert!(false, "pop({id:?}) does not match the innermost pushed call");
                warn!("call-depth tracker id mismatch on pop; resetting");
                state.reset();
            }
        }
    });
}

/// Returns this thread's live `(key, depth)` snapshot.
#[inline]
pub fn current() -> (PathKey, u32) {
    CURRENT_PATH.with(|state| (state.key.get(), state.depth.get()))
}

#[cfg(test)]
pub(crate) fn reset_for_test() {
    CURRENT_PATH.with(CallDepthState::reset);
}

/// RAII push/pop pair for one instrumented call.
///
/// Pushes its call point on construction and pops it on drop, so the pop
/// fires exactly once on every exit path, panics included, and nests
/// correctly with inner guards. Generated by `#[allocpath::track]`; usable
/// directly for hand-instrumented blocks.
///
/// Not `Send`: the guard must drop on the thread that created it.
pub struct CallGuard {
    id: Option<CallPointId>,
    _not_send: PhantomData<*const ()>,
}

impl CallGuard {
    /// Starts tracking a call through an already-interned call point.
    #[inline]
    pub fn new(id: CallPointId) -> Self {
        push(id);
        Self {
            id: Some(id),
            _not_send: PhantomData,
        }
    }

    /// Starts tracking a call site named `name`, interning it in the
    /// installed process-default context on first use.
    ///
    /// `cache` is a per-call-site slot so the name→id lookup happens once
    /// per site rather than once per invocation. When no context is
    /// installed (or the registry is full) the guard is a no-op.
    #[inline]
    pub fn enter(cache: &OnceLock<CallPointId>, name: &'static str) -> Self {
        let id = match cache.get() {
            Some(&id) => Some(id),
            None => crate::global::installed().and_then(|ctx| {
                let id = ctx.manager().registry().intern(name).ok()?.id();
                let _ = cache.set(id);
                Some(id)
            }),
        };

        match id {
            Some(id) => Self::new(id),
            None => Self {
                id: None,
                _not_send: PhantomData,
            },
        }
    }
}

impl Drop for CallGuard {
    #[inline]
    fn drop(&mut self) {
        if let Some(id) = self.id {
            pop(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::append_call;

    #[test]
    fn lifo_push_pop_restores_the_key() {
        reset_for_test();
        let (before, depth_before) = current();
        assert_eq!(depth_before, 0);

        push(CallPointId(1));
        push(CallPointId(2));

        let (mid, depth_mid) = current();
        assert_eq!(depth_mid, 2);
        let expected = append_call(append_call(before, CallPointId(1)), CallPointId(2));
        assert_eq!(mid, expected);

        pop(CallPointId(2));
        pop(CallPointId(1));

        assert_eq!(current(), (before, 0));
    }

    #[test]
    fn mid_sequence_decode_reflects_nesting() {
        reset_for_test();
        push(CallPointId(10));
        push(CallPointId(11));

        let (key, _) = current();
        let decoded = key::decode(key);
        assert_eq!(decoded[0], CallPointId(11));
        assert_eq!(decoded[1], CallPointId(10));
        assert!(decoded[2].is_none());

        pop(CallPointId(11));
        pop(CallPointId(10));
    }

    #[test]
    fn guard_pops_on_scope_exit() {
        reset_for_test();
        let (before, _) = current();
        {
            let _outer = CallGuard::new(CallPointId(3));
            let _inner = CallGuard::new(CallPointId(4));
            assert_eq!(current().1, 2);
        }
        assert_eq!(current(), (before, 0));
    }

    #[test]
    fn nesting_past_the_cap_keeps_pops_sound() {
        reset_for_test();
        for i in 1..=5u16 {
            push(CallPointId(i));
        }
        assert_eq!(current().1, 5);

        // Returning from the fifth call restores the full innermost-four
        // window, oldest slot included.
        pop(CallPointId(5));
        let (key, depth) = current();
        assert_eq!(depth, 4);
        assert_eq!(
            key::decode(key),
            [
                CallPointId(4),
                CallPointId(3),
                CallPointId(2),
                CallPointId(1)
            ]
        );

        pop(CallPointId(4));
        pop(CallPointId(3));
        pop(CallPointId(2));
        pop(CallPointId(1));
        assert_eq!(current(), (NO_PATH, 0));
    }

    #[test]
    fn deep_recursion_unwinds_cleanly() {
        reset_for_test();
        for i in 1..=32u16 {
            push(CallPointId(i));
        }
        for i in (1..=32u16).rev() {
            pop(CallPointId(i));
        }
        assert_eq!(current(), (NO_PATH, 0));
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn mismatched_pop_resets_in_release() {
        reset_for_test();
        push(CallPointId(1));
        pop(CallPointId(2));
        assert_eq!(current(), (NO_PATH, 0));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "does not match the innermost pushed call")]
    fn mismatched_pop_halts_in_debug() {
        reset_for_test();
        push(CallPointId(1));
        pop(CallPointId(2));
    }
}
