//! Interning of call-site names into small integer ids.
//!
//! Ids are handed out monotonically starting at 1 and are never reused for
//! the lifetime of the process; id 0 is reserved for "none/unknown". The
//! id space is deliberately small (15 bits) so four ids pack into one
//! [`PathKey`](crate::key::PathKey).

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::PathTrackError;
use crate::key::{CallPointId, MAX_CALL_POINTS};

/// Display name rendered for call-point ids that do not resolve.
pub const UNKNOWN_CALL_POINT: &str = "<unknown call point>";

/// An interned (id, qualified name) pair. Immutable once registered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallPoint {
    id: CallPointId,
    name: Arc<str>,
}

impl CallPoint {
    #[inline]
    pub fn id(&self) -> CallPointId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }
}

struct Maps {
    by_name: HashMap<Arc<str>, CallPointId>,
    // by_id[i] holds the name for id i + 1.
    by_id: Vec<Arc<str>>,
}

/// Process-wide call-point table: name → id and id → name.
///
/// Reads are frequent (every resolved lookup and every stack walk), writes
/// happen at most once per distinct call site, so both directions live
/// under one `RwLock` with a double-checked write section closing the
/// concurrent first-use race.
pub struct CallPointRegistry {
    maps: RwLock<Maps>,
    unknown: Arc<str>,
}

impl Default for CallPointRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CallPointRegistry {
    pub fn new() -> Self {
        Self {
            maps: RwLock::new(Maps {
                by_name: HashMap::new(),
                by_id: Vec::new(),
            }),
            unknown: Arc::from(UNKNOWN_CALL_POINT),
        }
    }

    /// Returns the id for `name`, registering it if this is the first use.
    ///
    /// Idempotent process-wide: every caller interning the same name
    /// observes the same id. Fails with [`PathTrackError::RegistryFull`]
    /// once the id counter would exceed [`MAX_CALL_POINTS`].
    pub fn intern(&self, name: &str) -> Result<CallPoint, PathTrackError> {
        if let Some(existing) = self.find(name) {
            return Ok(existing);
        }

        let mut maps = self.maps.write().unwrap_or_else(PoisonError::into_inner);
        // Re-check under the write guard: another thread may have won the
        // registration race between our read and write sections.
        if let Some(&id) = maps.by_name.get(name) {
            let name = Arc::clone(&maps.by_id[usize::from(id.0) - 1]);
            return Ok(CallPoint { id, name });
        }

        if maps.by_id.len() >= usize::from(MAX_CALL_POINTS) {
            return Err(PathTrackError::RegistryFull);
        }

        let name: Arc<str> = Arc::from(name);
        maps.by_id.push(Arc::clone(&name));
        let id = CallPointId(maps.by_id.len() as u16);
        maps.by_name.insert(Arc::clone(&name), id);
        Ok(CallPoint { id, name })
    }

    /// Looks up an already-interned name without registering it.
    pub fn find(&self, name: &str) -> Option<CallPoint> {
        let maps = self.maps.read().unwrap_or_else(PoisonError::into_inner);
        maps.by_name.get(name).map(|&id| CallPoint {
            id,
            name: Arc::clone(&maps.by_id[usize::from(id.0) - 1]),
        })
    }

    /// Resolves an id back to its qualified name.
    ///
    /// Never fails: id 0, or an id that was never assigned, resolves to
    /// [`UNKNOWN_CALL_POINT`].
    pub fn resolve(&self, id: CallPointId) -> Arc<str> {
        if id.is_none() {
            return Arc::clone(&self.unknown);
        }
        let maps = self.maps.read().unwrap_or_else(PoisonError::into_inner);
        match maps.by_id.get(usize::from(id.0) - 1) {
            Some(name) => Arc::clone(name),
            None => Arc::clone(&self.unknown),
        }
    }

    /// Number of distinct call points registered so far.
    pub fn len(&self) -> usize {
        self.maps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_id
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn intern_is_idempotent() {
        let registry = CallPointRegistry::new();
        let first = registry.intern("app::parse").unwrap();
        let second = registry.intern("app::parse").unwrap();
        assert_eq!(first.id(), second.id());
        assert_eq!(registry.len(), 1);
        assert_eq!(&*registry.resolve(first.id()), "app::parse");
    }

    #[test]
    fn ids_are_monotonic_from_one() {
        let registry = CallPointRegistry::new();
        assert_eq!(registry.intern("a").unwrap().id(), CallPointId(1));
        assert_eq!(registry.intern("b").unwrap().id(), CallPointId(2));
        assert_eq!(registry.intern("a").unwrap().id(), CallPointId(1));
    }

    #[test]
    fn unresolved_ids_render_the_unknown_sentinel() {
        let registry = CallPointRegistry::new();
        assert_eq!(&*registry.resolve(CallPointId::NONE), UNKNOWN_CALL_POINT);
        assert_eq!(&*registry.resolve(CallPointId(999)), UNKNOWN_CALL_POINT);
    }

    #[test]
    fn concurrent_intern_yields_one_id() {
        let registry = Arc::new(CallPointRegistry::new());
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    registry.intern("shared::site").unwrap().id()
                })
            })
            .collect();

        let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.iter().all(|&id| id == ids[0]));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn capacity_boundary_is_exact() {
        let registry = CallPointRegistry::new();
        for i in 0..u32::from(MAX_CALL_POINTS) {
            registry.intern(&format!("site_{i}")).unwrap();
        }
        assert_eq!(registry.len(), usize::from(MAX_CALL_POINTS));

        let overflow = registry.intern("one_too_many");
        assert!(matches!(overflow, Err(PathTrackError::RegistryFull)));
        // Interning an existing name still works after exhaustion.
        assert!(registry.intern("site_0").is_ok());
    }
}
