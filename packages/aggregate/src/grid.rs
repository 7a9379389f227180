//! Per-cell means of the point indicators.

use std::collections::BTreeMap;

use liveability_indicator_models::{CompositeIndicatorRecord, GridSummary, IndicatorSchema};
use liveability_region_models::GridId;

/// Means of every indicator over the points attributed to each cell.
///
/// Only cells with at least one point get a summary. Points without a cell
/// are left out. Cells missing from `populations` are reported with zero
/// population.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn grid_summaries(
    schema: &IndicatorSchema,
    records: &[CompositeIndicatorRecord],
    populations: &BTreeMap<GridId, f64>,
) -> Vec<GridSummary> {
    let mut by_cell: BTreeMap<GridId, Vec<&CompositeIndicatorRecord>> = BTreeMap::new();
    for record in records {
        if let Some(grid_id) = record.grid_id {
            by_cell.entry(grid_id).or_default().push(record);
        }
    }

    let unattributed = records.iter().filter(|r| r.grid_id.is_none()).count();
    if unattributed > 0 {
        log::warn!("{unattributed} points fall outside the density grid and are not aggregated");
    }

    by_cell
        .into_iter()
        .map(|(grid_id, points)| {
            let values = schema
                .names()
                .map(|name| {
                    let present = points
                        .iter()
                        .filter_map(|p| p.value(name))
                        .collect::<Vec<_>>();
                    let mean = (!present.is_empty())
                        .then(|| present.iter().sum::<f64>() / present.len() as f64);
                    (name.to_string(), mean)
                })
                .collect();

            GridSummary {
                grid_id,
                population: populations.get(&grid_id).copied().unwrap_or(0.0),
                point_count: points.len() as u64,
                values,
            }
        })
        .collect()
}
