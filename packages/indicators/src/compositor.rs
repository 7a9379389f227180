//! Turns raw per-point statistics into the per-point indicator table.
//!
//! Runs once after every point has been processed, since cleaning and
//! normalization are relative to the whole run.

use std::collections::BTreeMap;

use liveability_config::RegionConfig;
use liveability_indicator_models::{
    AccessibilityResult, CompositeIndicatorRecord, IndicatorColumn, IndicatorKind,
    IndicatorSchema, NullSummary, RawPointResult, ThresholdType, names,
};

use crate::binary::{hard_access, soft_access};
use crate::clean::clean_outliers;
use crate::composite::combine;
use crate::normalize::normalize;

/// The composed indicator table with its null audit.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedIndicators {
    pub schema: IndicatorSchema,
    /// One record per raw result, ascending by point id.
    pub records: Vec<CompositeIndicatorRecord>,
    pub nulls: NullSummary,
}

/// Column-major working table.
#[derive(Default)]
struct Columns {
    schema: IndicatorSchema,
    values: BTreeMap<String, Vec<Option<f64>>>,
}

impl Columns {
    fn push(&mut self, name: String, kind: IndicatorKind, dependent: bool, values: Vec<Option<f64>>) {
        self.schema.columns.push(IndicatorColumn {
            name: name.clone(),
            kind,
            catchment_dependent: dependent,
        });
        self.values.insert(name, values);
    }

    fn is_dependent(&self, name: &str) -> bool {
        self.schema
            .column(name)
            .is_some_and(|c| c.catchment_dependent)
    }

    /// Name of the normalized variant of `name`, adding it if missing.
    fn ensure_normalized(&mut self, name: &str) -> Option<String> {
        let target = if name.ends_with("_norm") {
            name.to_string()
        } else {
            names::normalized(name)
        };
        if self.values.contains_key(&target) {
            return Some(target);
        }
        let normalized = normalize(self.values.get(name)?);
        let dependent = self.is_dependent(name);
        self.push(target.clone(), IndicatorKind::Normalized, dependent, normalized);
        Some(target)
    }
}

/// Builds binary, soft, density, cleaned, normalized and composite columns
/// for every raw result, plus the null summary.
#[must_use]
pub fn compose(config: &RegionConfig, raws: &[RawPointResult]) -> ComposedIndicators {
    let mut raws = raws.iter().collect::<Vec<_>>();
    raws.sort_by_key(|r| r.point_id);
    let n = raws.len();
    let mut columns = Columns::default();

    for category in &config.categories {
        let results = raws
            .iter()
            .map(|r| r.access.get(&category.name))
            .collect::<Vec<_>>();

        columns.push(
            names::distance(&category.name),
            IndicatorKind::Distance,
            false,
            results
                .iter()
                .map(|a| a.and_then(AccessibilityResult::nearest))
                .collect(),
        );

        for threshold in &config.indicators.threshold_types {
            let (kind, values) = match threshold {
                ThresholdType::Hard => (
                    IndicatorKind::Binary,
                    results
                        .iter()
                        .map(|a| a.and_then(|a| hard_access(a, category)))
                        .collect(),
                ),
                ThresholdType::Soft => (
                    IndicatorKind::Soft,
                    results
                        .iter()
                        .map(|a| {
                            a.and_then(|a| soft_access(a, category, config.indicators.soft_slope))
                        })
                        .collect(),
                ),
            };
            columns.push(names::access(&category.name, *threshold), kind, false, values);
        }
    }

    let densities: [(&str, fn(&RawPointResult) -> Option<f64>); 2] = [
        (names::POP_DENSITY, |r| r.catchment.population_density),
        (names::INTERSECTION_DENSITY, |r| r.catchment.intersection_density),
    ];
    for (name, extract) in densities {
        let raw = raws
            .iter()
            .map(|r| if r.exclusion.is_some() { None } else { extract(r) })
            .collect::<Vec<_>>();
        let base = if config.indicators.clean_outliers {
            let cleaned = clean_outliers(&raw);
            columns.push(name.to_string(), IndicatorKind::Density, true, raw);
            columns.push(names::cleaned(name), IndicatorKind::Cleaned, true, cleaned.clone());
            cleaned
        } else {
            columns.push(name.to_string(), IndicatorKind::Density, true, raw.clone());
            raw
        };
        columns.push(
            names::normalized(name),
            IndicatorKind::Normalized,
            true,
            normalize(&base),
        );
    }

    for composite in config.composites() {
        let mut inputs = Vec::with_capacity(composite.components.len());
        for component in &composite.components {
            let source = if composite.formula.uses_normalized() {
                columns.ensure_normalized(component)
            } else {
                columns
                    .values
                    .contains_key(component)
                    .then(|| component.clone())
            };
            if source.is_none() {
                log::warn!(
                    "Composite '{}' references unknown component '{component}'; it will be null",
                    composite.name
                );
            }
            inputs.push(source);
        }

        let dependent = inputs
            .iter()
            .flatten()
            .any(|name| columns.is_dependent(name));
        let values = (0..n)
            .map(|i| {
                let row = inputs
                    .iter()
                    .map(|source| {
                        source
                            .as_ref()
                            .and_then(|name| columns.values.get(name))
                            .and_then(|v| v[i])
                    })
                    .collect::<Vec<_>>();
                combine(composite.formula, &row)
            })
            .collect::<Vec<_>>();

        let normalized = (!composite.formula.uses_normalized()).then(|| normalize(&values));
        columns.push(
            composite.name.clone(),
            IndicatorKind::Composite,
            dependent,
            values,
        );
        if let Some(normalized) = normalized {
            columns.push(
                names::normalized(&composite.name),
                IndicatorKind::Normalized,
                dependent,
                normalized,
            );
        }
    }

    let records = raws
        .iter()
        .enumerate()
        .map(|(i, raw)| {
            let values = columns
                .schema
                .names()
                .map(|name| {
                    let value = columns.values.get(name).and_then(|v| v[i]);
                    (name.to_string(), value)
                })
                .collect::<BTreeMap<_, _>>();
            let nulls = values.values().filter(|v| v.is_none()).count();
            CompositeIndicatorRecord {
                point_id: raw.point_id,
                grid_id: raw.grid_id,
                exclusion: raw.exclusion,
                values,
                null_tally: u32::try_from(nulls).unwrap_or(u32::MAX),
            }
        })
        .collect::<Vec<_>>();

    let nulls = summarize_nulls(config, &raws, &columns);
    log::info!(
        "Composed {} indicator columns for {} points ({} excluded)",
        columns.schema.len(),
        records.len(),
        nulls.by_reason.values().sum::<u64>()
    );

    ComposedIndicators {
        schema: columns.schema,
        records,
        nulls,
    }
}

fn summarize_nulls(config: &RegionConfig, raws: &[&RawPointResult], columns: &Columns) -> NullSummary {
    let by_indicator = columns
        .schema
        .names()
        .map(|name| {
            let count = columns
                .values
                .get(name)
                .map_or(0, |v| v.iter().filter(|x| x.is_none()).count());
            (name.to_string(), count as u64)
        })
        .collect();

    let mut by_reason = BTreeMap::new();
    for reason in raws.iter().filter_map(|r| r.exclusion) {
        *by_reason.entry(reason).or_insert(0) += 1;
    }

    let unavailable_categories = config
        .categories
        .iter()
        .filter(|c| {
            raws.iter()
                .any(|r| matches!(r.access.get(&c.name), Some(AccessibilityResult::Unavailable)))
        })
        .map(|c| c.name.clone())
        .collect();

    NullSummary {
        total_points: raws.len() as u64,
        by_indicator,
        by_reason,
        unavailable_categories,
    }
}

#[cfg(test)]
mod tests {
    use liveability_config::parse_region_toml;
    use liveability_indicator_models::{CatchmentResult, ExclusionReason};

    use super::*;

    const CONFIG: &str = r#"
        region = "testville"

        [indicators]
        threshold_types = ["hard", "soft"]

        [[categories]]
        name = "shop"
        cutoff_m = 500
        include = { kind = "all" }

        [[categories]]
        name = "clinic"
        cutoff_m = 1000
        include = { kind = "all" }
    "#;

    fn raw(point_id: i64, shop_m: Option<f64>, density: Option<f64>) -> RawPointResult {
        let exclusion = density.is_none().then_some(ExclusionReason::UndersizedIsland);
        RawPointResult {
            point_id,
            node_id: Some(point_id),
            grid_id: Some(1),
            exclusion,
            catchment: CatchmentResult {
                cells: vec![1],
                population_density: density,
                intersection_density: density.map(|d| d / 10.0),
            },
            access: BTreeMap::from([
                (
                    "shop".to_string(),
                    AccessibilityResult::Reached(shop_m.into_iter().collect()),
                ),
                ("clinic".to_string(), AccessibilityResult::Unavailable),
            ]),
        }
    }

    fn composed() -> ComposedIndicators {
        let config = parse_region_toml(CONFIG).unwrap();
        compose(
            &config,
            &[
                raw(3, None, None),
                raw(1, Some(100.0), Some(1_000.0)),
                raw(2, Some(600.0), Some(3_000.0)),
            ],
        )
    }

    #[test]
    fn records_are_ordered_and_complete() {
        let result = composed();
        let ids = result.records.iter().map(|r| r.point_id).collect::<Vec<_>>();
        assert_eq!(ids, vec![1, 2, 3]);
        for record in &result.records {
            assert_eq!(record.values.len(), result.schema.len());
        }
    }

    #[test]
    fn hard_and_soft_columns_are_separate() {
        let result = composed();
        let a = &result.records[0];
        let b = &result.records[1];

        assert_eq!(a.value("access_shop"), Some(1.0));
        assert_eq!(b.value("access_shop"), Some(0.0));
        assert!(a.value("access_shop_soft").unwrap() > b.value("access_shop_soft").unwrap());
        assert_eq!(a.value("dist_shop"), Some(100.0));
    }

    #[test]
    fn excluded_point_keeps_access_but_loses_catchment_indicators() {
        let result = composed();
        let c = &result.records[2];

        assert_eq!(c.exclusion, Some(ExclusionReason::UndersizedIsland));
        assert_eq!(c.value("access_shop"), Some(0.0));
        assert_eq!(c.value("dist_shop"), None);
        assert_eq!(c.value(names::POP_DENSITY), None);
        assert_eq!(c.value(names::WALKABILITY), None);
        assert!(c.null_tally > result.records[0].null_tally);
    }

    #[test]
    fn unavailable_category_is_null_everywhere() {
        let result = composed();
        for record in &result.records {
            assert_eq!(record.value("access_clinic"), None);
        }
        assert_eq!(result.nulls.unavailable_categories, vec!["clinic".to_string()]);
        assert_eq!(result.nulls.by_indicator["access_clinic"], 3);
    }

    #[test]
    fn daily_living_with_unavailable_category_is_null() {
        let result = composed();
        for record in &result.records {
            assert_eq!(record.value(names::DAILY_LIVING), None);
        }
    }

    #[test]
    fn densities_are_normalized_over_the_run() {
        let result = composed();
        let a = result.records[0].value("local_pop_density_norm").unwrap();
        let b = result.records[1].value("local_pop_density_norm").unwrap();
        assert!((a + b - 200.0).abs() < 1e-9);
        assert!(a < b);
        assert_eq!(result.nulls.by_reason[&ExclusionReason::UndersizedIsland], 1);
    }

    #[test]
    fn walkability_uses_normalized_components() {
        let mut config = parse_region_toml(CONFIG).unwrap();
        config.categories.truncate(1);
        let result = compose(
            &config,
            &[
                raw(1, Some(100.0), Some(1_000.0)),
                raw(2, Some(600.0), Some(3_000.0)),
            ],
        );

        assert!(result.schema.column("daily_living_norm").is_some());
        let walkability = result.schema.column(names::WALKABILITY).unwrap();
        assert!(walkability.catchment_dependent);
        assert!(result.records.iter().all(|r| r.value(names::WALKABILITY).is_some()));
    }
}
