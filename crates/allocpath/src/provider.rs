//! Seam to the call-site instrumentation mechanism.
//!
//! The engine itself never rewrites code. When a stack walk discovers a
//! call point for the first time, the manager asks the provider to arrange
//! push/pop notifications for it; the request happens at most once per
//! distinct call site for the process lifetime, under the manager's single
//! global registration lock.

use crate::registry::CallPoint;

/// Error type a provider may surface for one call site.
pub type InstrumentError = Box<dyn std::error::Error + Send + Sync>;

/// Arranges that [`tracker::push`](crate::tracker::push) fires immediately
/// before the call site's body and [`tracker::pop`](crate::tracker::pop)
/// immediately after it returns, on every exit path, exactly once per
/// invocation and correctly nested with inner instrumented sites.
pub trait InstrumentationProvider: Send + Sync {
    fn request(&self, call_point: &CallPoint) -> Result<(), InstrumentError>;
}

/// Provider for deployments with no runtime instrumentation mechanism.
///
/// Accepts every request and installs nothing, which leaves shallow paths
/// permanently ambiguous and therefore resolved by eager re-walking. This
/// is the intended default for builds whose call sites are instrumented
/// ahead of time with `#[allocpath::track]`, and the fallback for
/// everything else.
#[derive(Debug, Default)]
pub struct EagerWalkInstrumentation;

impl InstrumentationProvider for EagerWalkInstrumentation {
    fn request(&self, _call_point: &CallPoint) -> Result<(), InstrumentError> {
        Ok(())
    }
}
