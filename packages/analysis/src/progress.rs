//! Progress reporting for the slow stages of an analysis run.
//!
//! The analysis crate only knows about the [`ProgressCallback`] trait; the
//! CLI plugs in an `indicatif` bar, tests and library callers use
//! [`NullProgress`].

use std::sync::Arc;

/// Receives progress from long-running stages (parameter tuning grid cells).
///
/// Must be `Send + Sync`: tuning cells report from worker threads.
pub trait ProgressCallback: Send + Sync {
    /// Total units of work in the current stage.
    fn set_total(&self, total: u64);

    /// Advance by `delta` units.
    fn inc(&self, delta: u64);

    /// Replace the status message.
    fn set_message(&self, msg: String);

    /// Stage complete; keep the indicator with a final message.
    fn finish(&self, msg: String);

    /// Stage complete; remove the indicator.
    fn finish_and_clear(&self);
}

/// Discards all progress updates.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
    fn finish_and_clear(&self) {}
}

/// Shared [`NullProgress`].
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}
