//! End-to-end region run and the read-only commands built on its stores.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use duckdb::Connection;
use liveability_aggregate::{city_summary, grid_summaries};
use liveability_config::RegionConfig;
use liveability_database::{DbError, export, inputs, results_db};
use liveability_indicator_models::{CitySummary, NullSummary, RawPointResult};
use liveability_indicators::compose;
use liveability_region_models::PointId;

use crate::EngineError;
use crate::context::RegionContext;
use crate::coordinator::{Coordinator, CoordinatorReport};
use crate::progress::ProgressCallback;

/// Options for [`run_region`] that are not part of the region config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Write CSV files after the results tables.
    pub export: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self { export: true }
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub region: String,
    pub total_points: u64,
    pub evaluation: CoordinatorReport,
    pub indicator_count: usize,
    pub grid_cells: usize,
    pub nulls: NullSummary,
    pub city: CitySummary,
    pub exported: Vec<PathBuf>,
    pub elapsed: Duration,
}

/// What `validate` found in a region's inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub nodes: usize,
    pub edges: usize,
    pub grid_cells: usize,
    pub points: usize,
    pub unassigned_points: usize,
    /// Categories with no features in the region.
    pub unavailable_categories: Vec<String>,
}

/// Loads a region's inputs and builds its shared structures.
///
/// # Errors
///
/// Returns [`EngineError`] if a required input is missing or malformed.
pub fn load_context(config: &RegionConfig) -> Result<RegionContext, EngineError> {
    log::info!("Loading inputs from {}", config.paths.input_db.display());
    let conn = inputs::open(&config.paths.input_db)?;
    let region_inputs = inputs::load(&conn)?;
    RegionContext::build(config, region_inputs)
}

/// Checks that a region's inputs load and assemble without computing
/// anything.
///
/// # Errors
///
/// Returns [`EngineError`] if a required input is missing or malformed.
pub fn validate_region(config: &RegionConfig) -> Result<ValidationReport, EngineError> {
    let context = load_context(config)?;
    Ok(ValidationReport {
        nodes: context.store.node_count(),
        edges: context.store.edge_count(),
        grid_cells: context.grid.len(),
        points: context.points.len(),
        unassigned_points: context.points.iter().filter(|p| p.node.is_none()).count(),
        unavailable_categories: context.catalogue.unavailable(),
    })
}

/// Runs the full computation for one region.
///
/// Safe to re-run: checkpointed points are not recomputed and every derived
/// table is rebuilt from the checkpoint, so a second run over unchanged
/// inputs produces identical tables. A checkpoint computed under different
/// network or category settings is discarded first.
///
/// If evaluation stops partway, the null summary is still written for the
/// points committed so far before the error is returned.
///
/// # Errors
///
/// Returns [`EngineError`] if inputs are missing or malformed, or a results
/// write fails.
pub fn run_region(
    config: &RegionConfig,
    options: RunOptions,
    progress: &dyn ProgressCallback,
) -> Result<RunReport, EngineError> {
    let start = Instant::now();
    let context = load_context(config)?;

    let conn = results_db::open(&config.paths.output_db)?;
    results_db::reconcile_checkpoint(&conn, &config.checkpoint_signature()?)?;

    let current = context.points.iter().map(|p| p.id).collect::<BTreeSet<_>>();
    let coordinator = Coordinator::new(
        config.execution.effective_workers(),
        config.execution.batch_size,
    );
    let evaluation = match coordinator.run(&conn, &context, progress) {
        Ok(evaluation) => evaluation,
        Err(e) => {
            log::error!("Evaluation stopped: {e}");
            match write_partial_nulls(&conn, config, &current) {
                Ok(nulls) => log::warn!(
                    "Null summary written for the {} points committed before the failure",
                    nulls.total_points
                ),
                Err(summary_err) => log::error!("Failed to write null summary: {summary_err}"),
            }
            return Err(e);
        }
    };

    let finalized = finalize(&conn, config, &context, &current, progress)?;

    let exported = if options.export {
        progress.phase("Exporting CSV");
        export::export_all(&conn, &config.paths.output_dir)?
    } else {
        Vec::new()
    };

    let report = RunReport {
        region: config.region.clone(),
        total_points: context.points.len() as u64,
        evaluation,
        indicator_count: finalized.indicator_count,
        grid_cells: finalized.grid_cells,
        nulls: finalized.nulls,
        city: finalized.city,
        exported,
        elapsed: start.elapsed(),
    };
    progress.finish(&format!(
        "{}: {} points, {} indicators",
        report.region, report.total_points, report.indicator_count
    ));
    log::info!(
        "Region '{}' complete: {} points, {} indicators, {} grid cells in {:.1}s",
        report.region,
        report.total_points,
        report.indicator_count,
        report.grid_cells,
        report.elapsed.as_secs_f64()
    );
    Ok(report)
}

struct Finalized {
    indicator_count: usize,
    grid_cells: usize,
    nulls: NullSummary,
    city: CitySummary,
}

/// Checkpoint rows for the points still in the region inputs.
fn current_raws(
    conn: &Connection,
    current: &BTreeSet<PointId>,
) -> Result<Vec<RawPointResult>, EngineError> {
    let mut raws = results_db::load_raw_results(conn)?;
    let stored = raws.len();
    raws.retain(|r| current.contains(&r.point_id));
    if raws.len() < stored {
        log::warn!(
            "Ignoring {} checkpointed points that are no longer in the region inputs",
            stored - raws.len()
        );
    }
    Ok(raws)
}

/// Writes the null summary of whatever the checkpoint holds.
fn write_partial_nulls(
    conn: &Connection,
    config: &RegionConfig,
    current: &BTreeSet<PointId>,
) -> Result<NullSummary, EngineError> {
    let raws = current_raws(conn, current)?;
    let composed = compose(config, &raws);
    results_db::write_null_summary(conn, &composed.nulls)?;
    Ok(composed.nulls)
}

/// Composes indicators from the checkpoint and rewrites every derived
/// table.
fn finalize(
    conn: &Connection,
    config: &RegionConfig,
    context: &RegionContext,
    current: &BTreeSet<PointId>,
    progress: &dyn ProgressCallback,
) -> Result<Finalized, EngineError> {
    let raws = current_raws(conn, current)?;

    progress.phase("Composing indicators");
    log::info!("Composing indicators for {} points", raws.len());
    let composed = compose(config, &raws);

    let populations = context.grid.populations().collect::<BTreeMap<_, _>>();
    let grids = grid_summaries(&composed.schema, &composed.records, &populations);
    let city = city_summary(&config.region, &composed.schema, &grids);

    progress.phase("Writing results");
    results_db::write_indicators(conn, &composed.schema, &composed.records)?;
    results_db::write_null_summary(conn, &composed.nulls)?;
    results_db::write_grid_summaries(conn, &composed.schema, &grids)?;
    results_db::write_city_summary(conn, &composed.schema, &city)?;
    results_db::record_run(conn, &config.region, raws.len() as u64)?;

    for (reason, count) in &composed.nulls.by_reason {
        log::info!("{count} points excluded from catchment indicators: {reason}");
    }

    Ok(Finalized {
        indicator_count: composed.schema.len(),
        grid_cells: grids.len(),
        nulls: composed.nulls,
        city,
    })
}

/// Opens an existing results store without creating one.
fn open_existing_results(config: &RegionConfig) -> Result<Connection, EngineError> {
    let path = &config.paths.output_db;
    if !path.exists() {
        return Err(DbError::DataAbsent {
            input: path.display().to_string(),
            reason: "no results yet; run the region first".to_string(),
        }
        .into());
    }
    Ok(results_db::open(path)?)
}

/// Rewrites the CSV files from an existing results store.
///
/// # Errors
///
/// Returns [`EngineError`] if the store does not exist or an export fails.
pub fn export_region(config: &RegionConfig) -> Result<Vec<PathBuf>, EngineError> {
    let conn = open_existing_results(config)?;
    Ok(export::export_all(&conn, &config.paths.output_dir)?)
}

/// Reads the null summary of the last completed run.
///
/// # Errors
///
/// Returns [`EngineError`] if the store does not exist or cannot be read.
pub fn load_null_summary(config: &RegionConfig) -> Result<NullSummary, EngineError> {
    let conn = open_existing_results(config)?;
    Ok(results_db::load_null_summary(&conn)?)
}
