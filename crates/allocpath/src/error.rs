use std::sync::Arc;

use thiserror::Error;

use crate::key::MAX_CALL_POINTS;

/// Errors surfaced by the allocation-path tracking engine.
///
/// Absent lookups are not errors; storage and resolution APIs model them
/// with `Option`.
#[derive(Debug, Error)]
pub enum PathTrackError {
    /// The call-point id space is exhausted. Fatal and unrecoverable: the
    /// engine cannot safely track further distinct call points, so callers
    /// must not retry.
    #[error("no call point ids left, at most {MAX_CALL_POINTS} unique call points supported")]
    RegistryFull,

    /// The instrumentation provider rejected a call site. Fatal for the
    /// triggering path-capture attempt only; unrelated call points keep
    /// working.
    #[error("instrumentation request failed for call point `{call_point}`")]
    Instrumentation {
        call_point: Arc<str>,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}
