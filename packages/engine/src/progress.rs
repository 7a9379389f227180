//! Progress reporting for region runs.
//!
//! A run has one counted phase (point evaluation) followed by short
//! uncounted phases (composition, writing, export). Callers choose how to
//! render them by implementing [`ProgressCallback`].

use std::sync::Arc;

/// Receives progress from a region run.
///
/// `advance` is called from the coordinator's aggregator thread, so
/// implementations must be `Send + Sync`.
pub trait ProgressCallback: Send + Sync {
    /// Point evaluation begins with `pending` points to compute.
    fn start(&self, pending: u64, label: &str);

    /// `points` more points have been evaluated.
    fn advance(&self, points: u64);

    /// An uncounted phase begins.
    fn phase(&self, label: &str);

    /// The run is complete.
    fn finish(&self, summary: &str);
}

/// Discards all progress.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn start(&self, _pending: u64, _label: &str) {}
    fn advance(&self, _points: u64) {}
    fn phase(&self, _label: &str) {}
    fn finish(&self, _summary: &str) {}
}

#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}
