//! Parallel evaluation of analysis points with checkpointed writes.
//!
//! Points are evaluated on a dedicated `rayon` pool in chunks of
//! `batch_size`. Each chunk is committed in one transaction before the next
//! starts, and points already in the checkpoint are skipped, so an
//! interrupted run resumes where it stopped. Workers report completions over
//! an unbounded channel to a single aggregator thread that drives the
//! progress display and tallies outcomes.

use std::collections::{BTreeMap, BTreeSet};

use duckdb::Connection;
use liveability_database::results_db;
use liveability_indicator_models::{ExclusionReason, RawPointResult};
use liveability_region_models::{AnalysisPoint, PointId};
use rayon::prelude::*;
use tokio::sync::mpsc;

use crate::EngineError;
use crate::context::RegionContext;
use crate::progress::ProgressCallback;

/// Completion event sent by a worker.
#[derive(Debug, Clone, Copy)]
struct PointEvaluated {
    exclusion: Option<ExclusionReason>,
}

/// Outcome counts for the points evaluated in this run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvaluationTally {
    pub evaluated: u64,
    pub excluded: BTreeMap<ExclusionReason, u64>,
}

impl EvaluationTally {
    fn record(&mut self, event: PointEvaluated) {
        self.evaluated += 1;
        if let Some(reason) = event.exclusion {
            *self.excluded.entry(reason).or_default() += 1;
        }
    }
}

/// Result of one coordinator pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinatorReport {
    /// Points found in the checkpoint and not recomputed.
    pub skipped: u64,
    /// New checkpoint rows written.
    pub written: u64,
    pub tally: EvaluationTally,
}

/// Runs every pending point of a region through the worker pool.
pub struct Coordinator {
    workers: usize,
    batch_size: usize,
}

impl Coordinator {
    #[must_use]
    pub fn new(workers: usize, batch_size: usize) -> Self {
        Self {
            workers: workers.max(1),
            batch_size: batch_size.max(1),
        }
    }

    /// Evaluates all points not yet in the results checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] if the worker pool cannot be created, a
    /// checkpoint write fails, or the aggregator thread panics. Chunks
    /// committed before the failure stay committed.
    pub fn run(
        &self,
        conn: &Connection,
        context: &RegionContext,
        progress: &dyn ProgressCallback,
    ) -> Result<CoordinatorReport, EngineError> {
        let completed = results_db::completed_point_ids(conn)?;
        let pending = pending_points(&context.points, &completed);
        let skipped = (context.points.len() - pending.len()) as u64;

        if skipped > 0 {
            log::info!("Resuming: {skipped} points already computed");
        }
        log::info!(
            "Evaluating {} points on {} workers in batches of {}",
            pending.len(),
            self.workers,
            self.batch_size
        );

        progress.start(pending.len() as u64, "Evaluating points");

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("liveability-worker-{i}"))
            .build()?;

        let (tx, mut rx) = mpsc::unbounded_channel::<PointEvaluated>();

        let (written, tally) = std::thread::scope(|scope| {
            let aggregator = scope.spawn(move || {
                let mut tally = EvaluationTally::default();
                while let Some(event) = rx.blocking_recv() {
                    tally.record(event);
                    progress.advance(1);
                }
                tally
            });

            let written = self.process_chunks(conn, context, &pool, &pending, tx);
            let tally = aggregator
                .join()
                .map_err(|_| EngineError::AggregatorPanicked)?;
            written.map(|written| (written, tally))
        })?;

        Ok(CoordinatorReport {
            skipped,
            written,
            tally,
        })
    }

    /// Evaluates and commits chunk by chunk. Dropping `tx` on return closes
    /// the channel and lets the aggregator finish.
    fn process_chunks(
        &self,
        conn: &Connection,
        context: &RegionContext,
        pool: &rayon::ThreadPool,
        pending: &[&AnalysisPoint],
        tx: mpsc::UnboundedSender<PointEvaluated>,
    ) -> Result<u64, EngineError> {
        let mut written = 0u64;

        for (chunk_idx, chunk) in pending.chunks(self.batch_size).enumerate() {
            let results: Vec<RawPointResult> = pool.install(|| {
                chunk
                    .par_iter()
                    .map_with(tx.clone(), |tx, point| {
                        let result = context.evaluate(point);
                        // A closed channel only loses progress output.
                        let _ = tx.send(PointEvaluated {
                            exclusion: result.exclusion,
                        });
                        result
                    })
                    .collect()
            });

            let inserted = results_db::insert_raw_results(conn, &results)?;
            written += inserted;
            log::debug!(
                "Committed batch {} ({} points, {inserted} new rows)",
                chunk_idx + 1,
                results.len()
            );
        }

        Ok(written)
    }
}

/// Points not yet checkpointed, in point-id order.
fn pending_points<'a>(
    points: &'a [AnalysisPoint],
    completed: &BTreeSet<PointId>,
) -> Vec<&'a AnalysisPoint> {
    points
        .iter()
        .filter(|p| !completed.contains(&p.id))
        .collect()
}
