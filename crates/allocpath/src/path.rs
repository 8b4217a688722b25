//! Decoded, human-readable view of an allocation path.

use std::fmt;
use std::sync::Arc;

use crate::key::{self, PathKey, MAX_PATH_DEPTH};
use crate::registry::CallPointRegistry;

/// A path key together with its resolved display names.
///
/// The name sequence always has [`MAX_PATH_DEPTH`] entries, ordered from
/// the allocation site outward to the oldest captured frame; slots the key
/// does not encode (and ids that never resolve) carry the
/// [`UNKNOWN_CALL_POINT`](crate::registry::UNKNOWN_CALL_POINT) sentinel.
/// Decoding never fails, and the same key always decodes to the same
/// sequence.
#[derive(Clone, Debug)]
pub struct AllocationPath {
    key: PathKey,
    names: [Arc<str>; MAX_PATH_DEPTH],
}

impl AllocationPath {
    pub(crate) fn decode(key: PathKey, registry: &CallPointRegistry) -> Self {
        let names = key::decode(key).map(|id| registry.resolve(id));
        Self { key, names }
    }

    #[inline]
    pub fn key(&self) -> PathKey {
        self.key
    }

    /// Resolved names, innermost (closest to the allocation site) first.
    #[inline]
    pub fn names(&self) -> &[Arc<str>; MAX_PATH_DEPTH] {
        &self.names
    }
}

impl fmt::Display for AllocationPath {
    /// Renders the call chain in call order, outermost first:
    /// `outer -> middle -> inner`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for name in self.names.iter().rev() {
            if !first {
                write!(f, " -> ")?;
            }
            write!(f, "{name}")?;
            first = false;
        }
        Ok(())
    }
}
