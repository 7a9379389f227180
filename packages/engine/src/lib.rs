#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Batch liveability run for one study region.
//!
//! [`pipeline::run_region`] loads the region inputs, builds the shared
//! network, density grid and accessibility index, evaluates every analysis
//! point in parallel with resumable checkpoints, then composes indicators,
//! aggregates them to grid cells and the city, and persists and exports the
//! results.

pub mod context;
pub mod coordinator;
pub mod pipeline;
pub mod progress;

pub use context::RegionContext;
pub use pipeline::{RunOptions, RunReport, ValidationReport, run_region, validate_region};
pub use progress::{NullProgress, ProgressCallback, null_progress};

use liveability_access::AccessError;
use liveability_config::ConfigError;
use liveability_database::DbError;
use liveability_network::NetworkError;
use liveability_spatial::SpatialError;

/// Errors that abort a region run.
///
/// Per-point problems never surface here; they are recorded as exclusion
/// reasons on the point.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DbError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Spatial(#[from] SpatialError),

    #[error(transparent)]
    Access(#[from] AccessError),

    /// The worker pool could not be started.
    #[error("Failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// The progress aggregator thread panicked.
    #[error("Progress aggregator thread panicked")]
    AggregatorPanicked,
}
