//! Population-weighted city rollup of the grid summaries.

use std::collections::BTreeMap;

use liveability_indicator_models::{CitySummary, GridSummary, IndicatorSchema};

/// Population-weighted mean of the grid summaries.
///
/// Each indicator is averaged over the cells where it is non-null, weighted
/// by cell population. An indicator that is null in every cell, or whose
/// non-null cells have no population, is null.
#[must_use]
pub fn city_summary(region: &str, schema: &IndicatorSchema, grids: &[GridSummary]) -> CitySummary {
    let values = schema
        .names()
        .map(|name| {
            let (weighted, weight) = grids
                .iter()
                .filter_map(|g| g.values.get(name).copied().flatten().map(|v| (v, g.population)))
                .fold((0.0, 0.0), |(sum, total), (v, pop)| (v.mul_add(pop, sum), total + pop));
            let mean = (weight > 0.0).then(|| weighted / weight);
            (name.to_string(), mean)
        })
        .collect::<BTreeMap<_, _>>();

    CitySummary {
        region: region.to_string(),
        population: grids.iter().map(|g| g.population).sum(),
        cell_count: grids.len() as u64,
        point_count: grids.iter().map(|g| g.point_count).sum(),
        values,
    }
}

#[cfg(test)]
mod tests {
    use liveability_indicator_models::{IndicatorColumn, IndicatorKind};

    use super::*;

    fn schema() -> IndicatorSchema {
        IndicatorSchema {
            columns: ["walkability", "access_clinic"]
                .iter()
                .map(|name| IndicatorColumn {
                    name: (*name).to_string(),
                    kind: IndicatorKind::Composite,
                    catchment_dependent: true,
                })
                .collect(),
        }
    }

    fn grid(grid_id: i64, population: f64, walkability: Option<f64>) -> GridSummary {
        GridSummary {
            grid_id,
            population,
            point_count: 2,
            values: BTreeMap::from([
                ("walkability".to_string(), walkability),
                ("access_clinic".to_string(), None),
            ]),
        }
    }

    #[test]
    fn weights_cells_by_population() {
        let summary = city_summary(
            "testville",
            &schema(),
            &[grid(1, 1_000.0, Some(50.0)), grid(2, 3_000.0, Some(70.0))],
        );
        assert!((summary.values["walkability"].unwrap() - 65.0).abs() < 1e-9);
        assert_eq!(summary.population, 4_000.0);
        assert_eq!(summary.cell_count, 2);
        assert_eq!(summary.point_count, 4);
    }

    #[test]
    fn null_cells_are_skipped_and_all_null_stays_null() {
        let summary = city_summary(
            "testville",
            &schema(),
            &[grid(1, 1_000.0, Some(50.0)), grid(2, 3_000.0, None)],
        );
        assert!((summary.values["walkability"].unwrap() - 50.0).abs() < 1e-9);
        assert_eq!(summary.values["access_clinic"], None);
    }
}
