#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Indicator result types.
//!
//! Point-level results move through three shapes: the raw per-point
//! statistics written by the parallel workers ([`RawPointResult`]), the
//! composed record with binary, normalized and composite values
//! ([`CompositeIndicatorRecord`]), and the grid/city rollups
//! ([`GridSummary`], [`CitySummary`]).
//!
//! Missing values are always `None`. A zero is a measured zero.

use std::collections::BTreeMap;

use liveability_region_models::{GridId, NodeId, PointId};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Column naming shared by the compositor, the store and the config
/// validation.
pub mod names {
    use super::ThresholdType;

    /// Catchment population density (persons per km²).
    pub const POP_DENSITY: &str = "local_pop_density";

    /// Catchment intersection density (intersections per km²).
    pub const INTERSECTION_DENSITY: &str = "local_intersection_density";

    /// Default daily-living composite.
    pub const DAILY_LIVING: &str = "daily_living";

    /// Default walkability composite.
    pub const WALKABILITY: &str = "walkability";

    /// Nearest-destination distance column for a category.
    #[must_use]
    pub fn distance(category: &str) -> String {
        format!("dist_{category}")
    }

    /// Access column for a category and threshold type.
    #[must_use]
    pub fn access(category: &str, threshold: ThresholdType) -> String {
        match threshold {
            ThresholdType::Hard => format!("access_{category}"),
            ThresholdType::Soft => format!("access_{category}_soft"),
        }
    }

    /// Cleaned variant of a continuous measure.
    #[must_use]
    pub fn cleaned(base: &str) -> String {
        format!("{base}_clean")
    }

    /// Normalized variant of a measure.
    #[must_use]
    pub fn normalized(base: &str) -> String {
        format!("{base}_norm")
    }
}

/// Whether an access indicator uses a hard cutoff or a logistic decay.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ThresholdType {
    /// 1 within the cutoff, 0 beyond it.
    Hard,
    /// Logistic decay centred on the cutoff, in `(0, 1)`.
    Soft,
}

/// Why a point has no catchment-dependent indicators.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExclusionReason {
    /// No network node could be assigned to the point.
    Unassigned,
    /// The point's node lies on a component below the minimum size.
    UndersizedIsland,
    /// The catchment contains no edges.
    NoNetwork,
    /// The catchment touches no density grid cell with a positive area.
    OutsideGrid,
}

/// Densities within a point's walkable catchment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatchmentResult {
    /// Grid cells intersecting the catchment, ascending.
    pub cells: Vec<GridId>,
    /// Persons per km², `None` when the catchment is empty.
    pub population_density: Option<f64>,
    /// Intersections per km², `None` when the catchment is empty.
    pub intersection_density: Option<f64>,
}

impl CatchmentResult {
    /// The result for a point without a usable catchment.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            cells: Vec::new(),
            population_density: None,
            intersection_density: None,
        }
    }
}

/// Network distances from one point to the features of one category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "distances_m", rename_all = "snake_case")]
pub enum AccessibilityResult {
    /// The category has no features in the region.
    Unavailable,
    /// Ascending distances to the nearest features within the search
    /// bound. Empty when nothing is reachable.
    Reached(Vec<f64>),
}

impl AccessibilityResult {
    /// Distance to the nearest feature, if one is within the bound.
    #[must_use]
    pub fn nearest(&self) -> Option<f64> {
        self.kth_nearest(1)
    }

    /// Distance to the `k`-th nearest feature (1-based).
    #[must_use]
    pub fn kth_nearest(&self, k: u32) -> Option<f64> {
        match self {
            Self::Unavailable => None,
            Self::Reached(distances) => {
                let idx = usize::try_from(k.max(1)).ok()? - 1;
                distances.get(idx).copied()
            }
        }
    }

    #[must_use]
    pub const fn is_available(&self) -> bool {
        matches!(self, Self::Reached(_))
    }
}

/// Per-point output of the parallel stage.
///
/// This is the resumable checkpoint: once written it is never rewritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPointResult {
    pub point_id: PointId,
    pub node_id: Option<NodeId>,
    /// Grid cell containing the point's node.
    pub grid_id: Option<GridId>,
    pub exclusion: Option<ExclusionReason>,
    pub catchment: CatchmentResult,
    /// Keyed by category name.
    pub access: BTreeMap<String, AccessibilityResult>,
}

/// What a point-level indicator column holds.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IndicatorKind {
    /// Network distance to the nearest destination.
    Distance,
    /// Hard access flag.
    Binary,
    /// Soft access score.
    Soft,
    /// Raw catchment density.
    Density,
    /// Density after outlier compression.
    Cleaned,
    /// `100 + 10z` normalized value.
    Normalized,
    /// Composite score.
    Composite,
}

/// One column of the per-point indicator table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicatorColumn {
    pub name: String,
    pub kind: IndicatorKind,
    /// Whether the column is null for points without a catchment.
    pub catchment_dependent: bool,
}

/// Ordered column layout of the per-point indicator table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicatorSchema {
    pub columns: Vec<IndicatorColumn>,
}

impl IndicatorSchema {
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&IndicatorColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Final per-point indicator values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeIndicatorRecord {
    pub point_id: PointId,
    pub grid_id: Option<GridId>,
    pub exclusion: Option<ExclusionReason>,
    /// Keyed by column name; every schema column is present.
    pub values: BTreeMap<String, Option<f64>>,
    /// Number of schema columns that are null for this point.
    pub null_tally: u32,
}

impl CompositeIndicatorRecord {
    #[must_use]
    pub fn value(&self, column: &str) -> Option<f64> {
        self.values.get(column).copied().flatten()
    }
}

/// Null counts per indicator and per exclusion reason.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NullSummary {
    pub total_points: u64,
    /// Null count per indicator column.
    pub by_indicator: BTreeMap<String, u64>,
    /// Excluded point count per reason.
    pub by_reason: BTreeMap<ExclusionReason, u64>,
    /// Categories with no in-region features.
    pub unavailable_categories: Vec<String>,
}

/// Point indicators averaged over one grid cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSummary {
    pub grid_id: GridId,
    pub population: f64,
    pub point_count: u64,
    pub values: BTreeMap<String, Option<f64>>,
}

/// Population-weighted city rollup of the grid summaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitySummary {
    pub region: String,
    pub population: f64,
    pub cell_count: u64,
    pub point_count: u64,
    pub values: BTreeMap<String, Option<f64>>,
}
