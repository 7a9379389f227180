#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Region run configuration.
//!
//! A [`RegionConfig`] is parsed from a TOML file once at process start,
//! validated, and then passed by reference into every component. Nothing
//! downstream reads environment variables or global state.
//!
//! ```toml
//! region = "odense"
//!
//! [network]
//! catchment_distance_m = 1600
//! search_bound_m = 1600
//!
//! [[categories]]
//! name = "supermarket"
//! domain = "food"
//! cutoff_m = 500
//! include = { kind = "equals", attribute = "shop", value = "supermarket" }
//! ```

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use liveability_indicator_models::{ThresholdType, names};
use liveability_region_models::{DestinationCategory, is_valid_identifier};
use serde::{Deserialize, Serialize};

/// Errors from loading or validating a region configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// TOML syntax or shape error.
    #[error("Invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The checkpoint signature could not be serialized.
    #[error("Failed to serialize checkpoint signature: {0}")]
    Signature(#[from] serde_json::Error),

    /// A value failed validation.
    #[error("Invalid config value for {field}: {message}")]
    Invalid {
        /// Dotted path of the offending field.
        field: String,
        message: String,
    },
}

impl ConfigError {
    fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Input and output locations. Relative paths are resolved against the
/// directory containing the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// `DuckDB` file holding the network, grid, destinations and points.
    pub input_db: PathBuf,
    /// `DuckDB` file receiving the indicator tables.
    pub output_db: PathBuf,
    /// Directory receiving the CSV exports.
    pub output_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            input_db: PathBuf::from("inputs.duckdb"),
            output_db: PathBuf::from("results.duckdb"),
            output_dir: PathBuf::from("output"),
        }
    }
}

/// Network analysis distances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Maximum network distance of a walkable catchment, in metres.
    pub catchment_distance_m: f64,
    /// Search bound of the accessibility index, in metres. Must be at
    /// least every category cutoff.
    pub search_bound_m: f64,
    /// Points on components with fewer nodes than this get no catchment.
    pub min_component_nodes: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            catchment_distance_m: 1600.0,
            search_bound_m: 1600.0,
            min_component_nodes: 10,
        }
    }
}

/// Indicator compositor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    /// Access indicator variants to produce for every category.
    pub threshold_types: Vec<ThresholdType>,
    /// Slope `k` of the soft threshold decay.
    pub soft_slope: f64,
    /// Whether densities are outlier-compressed before normalization.
    pub clean_outliers: bool,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            threshold_types: vec![ThresholdType::Hard],
            soft_slope: 5.0,
            clean_outliers: true,
        }
    }
}

/// How a composite combines its components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositeFormula {
    /// Sum of access values.
    Sum,
    /// Maximum of access values.
    Max,
    /// Sum of the components' z-scores.
    SumOfZScores,
    /// Mean of the normalized components minus a dispersion penalty.
    PenalizedMean,
}

impl CompositeFormula {
    /// Whether the formula reads normalized values rather than raw ones.
    #[must_use]
    pub const fn uses_normalized(self) -> bool {
        matches!(self, Self::SumOfZScores | Self::PenalizedMean)
    }
}

/// A composite indicator built from other point indicators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeDefinition {
    pub name: String,
    pub formula: CompositeFormula,
    /// Column names (for `sum`/`max`) or measure names whose normalized
    /// value is used (for `sum_of_z_scores`/`penalized_mean`).
    pub components: Vec<String>,
}

/// Parallel execution settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Worker threads; `0` uses the available parallelism.
    pub workers: usize,
    /// Points per write transaction.
    pub batch_size: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            batch_size: 1_000,
        }
    }
}

impl ExecutionConfig {
    /// Worker count with `0` resolved to the machine's parallelism.
    #[must_use]
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
    }
}

/// Everything a region run needs to know.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionConfig {
    /// Study region name, recorded in the city summary.
    pub region: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub indicators: IndicatorConfig,
    #[serde(default)]
    pub categories: Vec<DestinationCategory>,
    /// Explicit composites; the daily-living and walkability defaults are
    /// used when absent.
    #[serde(default)]
    pub composites: Option<Vec<CompositeDefinition>>,
    #[serde(default)]
    pub execution: ExecutionConfig,
}

/// Parses a region config from a TOML string without validating it.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] if the TOML is malformed.
pub fn parse_region_toml(toml_str: &str) -> Result<RegionConfig, ConfigError> {
    Ok(toml::de::from_str(toml_str)?)
}

impl RegionConfig {
    /// Reads, parses and validates a config file, resolving relative paths
    /// against the file's directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, parsed or
    /// validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = parse_region_toml(&text)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        config.validate()?;
        log::info!(
            "Loaded config for region '{}' ({} categories, {} composites)",
            config.region,
            config.categories.len(),
            config.composites().len()
        );
        Ok(config)
    }

    /// Makes relative paths absolute with respect to `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        for path in [
            &mut self.paths.input_db,
            &mut self.paths.output_db,
            &mut self.paths.output_dir,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    /// Canonical text of every setting the per-point checkpoint depends on:
    /// the network distances and the destination categories.
    ///
    /// Indicator, composite and execution settings are left out since they
    /// only affect work redone on every run.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Signature`] if serialization fails.
    pub fn checkpoint_signature(&self) -> Result<String, ConfigError> {
        #[derive(Serialize)]
        struct Signature<'a> {
            network: &'a NetworkConfig,
            categories: &'a [DestinationCategory],
        }

        Ok(serde_json::to_string(&Signature {
            network: &self.network,
            categories: &self.categories,
        })?)
    }

    #[must_use]
    pub fn category(&self, name: &str) -> Option<&DestinationCategory> {
        self.categories.iter().find(|c| c.name == name)
    }

    /// The threshold type used for composites and rollups: hard when it is
    /// produced, otherwise soft.
    #[must_use]
    pub fn primary_threshold(&self) -> ThresholdType {
        if self
            .indicators
            .threshold_types
            .contains(&ThresholdType::Hard)
        {
            ThresholdType::Hard
        } else {
            ThresholdType::Soft
        }
    }

    /// Configured composites, or the daily-living/walkability defaults.
    #[must_use]
    pub fn composites(&self) -> Vec<CompositeDefinition> {
        if let Some(composites) = &self.composites {
            return composites.clone();
        }
        let threshold = self.primary_threshold();
        vec![
            CompositeDefinition {
                name: names::DAILY_LIVING.to_string(),
                formula: CompositeFormula::Sum,
                components: self
                    .categories
                    .iter()
                    .map(|c| names::access(&c.name, threshold))
                    .collect(),
            },
            CompositeDefinition {
                name: names::WALKABILITY.to_string(),
                formula: CompositeFormula::PenalizedMean,
                components: vec![
                    names::DAILY_LIVING.to_string(),
                    names::POP_DENSITY.to_string(),
                    names::INTERSECTION_DENSITY.to_string(),
                ],
            },
        ]
    }

    /// Access columns produced for the configured categories and threshold
    /// types.
    #[must_use]
    pub fn access_columns(&self) -> Vec<String> {
        self.categories
            .iter()
            .flat_map(|c| {
                self.indicators
                    .threshold_types
                    .iter()
                    .map(|t| names::access(&c.name, *t))
            })
            .collect()
    }

    /// Checks the whole config for consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.region.trim().is_empty() {
            return Err(ConfigError::invalid("region", "must not be empty"));
        }
        check_positive("network.catchment_distance_m", self.network.catchment_distance_m)?;
        check_positive("network.search_bound_m", self.network.search_bound_m)?;
        if self.indicators.threshold_types.is_empty() {
            return Err(ConfigError::invalid(
                "indicators.threshold_types",
                "at least one threshold type is required",
            ));
        }
        check_positive("indicators.soft_slope", self.indicators.soft_slope)?;
        if self.execution.batch_size == 0 {
            return Err(ConfigError::invalid(
                "execution.batch_size",
                "must be greater than zero",
            ));
        }

        self.validate_categories()?;
        self.validate_composites()
    }

    fn validate_categories(&self) -> Result<(), ConfigError> {
        if self.categories.is_empty() {
            return Err(ConfigError::invalid(
                "categories",
                "at least one destination category is required",
            ));
        }
        let mut seen = BTreeSet::new();
        for category in &self.categories {
            let field = format!("categories.{}", category.name);
            if !is_valid_identifier(&category.name) {
                return Err(ConfigError::invalid(
                    field,
                    "name must be lowercase letters, digits and underscores",
                ));
            }
            if !seen.insert(category.name.as_str()) {
                return Err(ConfigError::invalid(field, "duplicate category name"));
            }
            check_positive(&format!("{field}.cutoff_m"), category.cutoff_m)?;
            if category.count_cutoff == 0 {
                return Err(ConfigError::invalid(
                    format!("{field}.count_cutoff"),
                    "must be at least 1",
                ));
            }
            if category.cutoff_m > self.network.search_bound_m {
                return Err(ConfigError::invalid(
                    format!("{field}.cutoff_m"),
                    format!(
                        "{} exceeds network.search_bound_m ({})",
                        category.cutoff_m, self.network.search_bound_m
                    ),
                ));
            }
        }
        Ok(())
    }

    fn validate_composites(&self) -> Result<(), ConfigError> {
        let access_columns: BTreeSet<String> = self.access_columns().into_iter().collect();
        let mut raw_composites: BTreeSet<String> = BTreeSet::new();
        let mut seen: BTreeSet<String> = BTreeSet::new();

        for composite in self.composites() {
            let field = format!("composites.{}", composite.name);
            if !is_valid_identifier(&composite.name) {
                return Err(ConfigError::invalid(
                    field,
                    "name must be lowercase letters, digits and underscores",
                ));
            }
            if !seen.insert(composite.name.clone())
                || access_columns.contains(&composite.name)
                || [names::POP_DENSITY, names::INTERSECTION_DENSITY]
                    .contains(&composite.name.as_str())
            {
                return Err(ConfigError::invalid(field, "name clashes with another column"));
            }
            if composite.components.is_empty() {
                return Err(ConfigError::invalid(field, "needs at least one component"));
            }

            for component in &composite.components {
                let known = if composite.formula.uses_normalized() {
                    access_columns.contains(component)
                        || raw_composites.contains(component)
                        || component == names::POP_DENSITY
                        || component == names::INTERSECTION_DENSITY
                } else {
                    access_columns.contains(component) || raw_composites.contains(component)
                };
                if !known {
                    return Err(ConfigError::invalid(
                        format!("{field}.components"),
                        format!("unknown or not yet defined component '{component}'"),
                    ));
                }
            }

            if !composite.formula.uses_normalized() {
                raw_composites.insert(composite.name.clone());
            }
        }
        Ok(())
    }
}

fn check_positive(field: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("{value} is not a positive distance")))
    }
}
