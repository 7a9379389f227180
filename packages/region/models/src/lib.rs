#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Region input types shared across the liveability workspace.
//!
//! Everything in here is produced by the upstream import steps (network
//! extraction, population gridding, destination compilation) and is
//! treated as read-only for the lifetime of a region run.

use std::collections::BTreeMap;

use geo::{LineString, Polygon};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Identifier of a [`NetworkNode`] (OSM-style 64-bit id).
pub type NodeId = i64;

/// Identifier of a [`NetworkEdge`].
pub type EdgeId = i64;

/// Identifier of an [`AnalysisPoint`].
pub type PointId = i64;

/// Identifier of a [`DensityGridCell`].
pub type GridId = i64;

/// A junction in the pedestrian network, in projected metres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetworkNode {
    pub id: NodeId,
    pub x: f64,
    pub y: f64,
}

/// A street segment between two junctions.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkEdge {
    pub id: EdgeId,
    pub from: NodeId,
    pub to: NodeId,
    /// Segment length in metres.
    pub length_m: f64,
    pub geometry: LineString<f64>,
}

/// The network node an [`AnalysisPoint`] is attached to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeAssignment {
    pub node: NodeId,
    /// Straight-line distance between the point and the node, in metres.
    pub offset_m: f64,
}

/// A residential address or regular sample location.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisPoint {
    pub id: PointId,
    pub x: f64,
    pub y: f64,
    /// Nearest network node. Assigned once before catchment computation.
    pub node: Option<NodeAssignment>,
}

impl AnalysisPoint {
    #[must_use]
    pub const fn new(id: PointId, x: f64, y: f64) -> Self {
        Self {
            id,
            x,
            y,
            node: None,
        }
    }

    /// Attaches the point to `node`, unless it already has a node.
    ///
    /// Returns `true` if the assignment was made.
    pub fn assign_node(&mut self, node: NodeId, offset_m: f64) -> bool {
        if self.node.is_some() {
            return false;
        }
        self.node = Some(NodeAssignment { node, offset_m });
        true
    }
}

/// A cell of the regular small-area tessellation.
#[derive(Debug, Clone, PartialEq)]
pub struct DensityGridCell {
    pub id: GridId,
    pub geometry: Polygon<f64>,
    /// Cell area in square kilometres.
    pub area_sqkm: f64,
    pub population: f64,
    /// Number of street intersections inside the cell.
    pub intersections: f64,
}

/// Broad grouping of destination categories, used for reporting only.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
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
pub enum DestinationDomain {
    /// Food retail (supermarkets, fresh food markets).
    Food,
    /// Convenience retail.
    Convenience,
    /// Public transport stops.
    Transport,
    /// Public open space entry points.
    OpenSpace,
    /// Schools, libraries, community centres.
    Community,
    /// Health services.
    Health,
    #[default]
    Other,
}

/// Attribute-based rule deciding whether a raw destination belongs to a
/// category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InclusionRule {
    /// Every destination is included.
    All,
    /// `attribute` equals `value` exactly.
    Equals { attribute: String, value: String },
    /// `attribute` equals one of `values`.
    OneOf {
        attribute: String,
        values: Vec<String>,
    },
    /// `attribute` is present with a non-empty value.
    Exists { attribute: String },
    /// At least one nested rule matches.
    Any { rules: Vec<Self> },
    /// Every nested rule matches.
    Every { rules: Vec<Self> },
}

impl InclusionRule {
    /// Evaluates the rule against a destination's attributes.
    #[must_use]
    pub fn matches(&self, attributes: &BTreeMap<String, String>) -> bool {
        match self {
            Self::All => true,
            Self::Equals { attribute, value } => attributes.get(attribute) == Some(value),
            Self::OneOf { attribute, values } => attributes
                .get(attribute)
                .is_some_and(|v| values.iter().any(|candidate| candidate == v)),
            Self::Exists { attribute } => attributes.get(attribute).is_some_and(|v| !v.is_empty()),
            Self::Any { rules } => rules.iter().any(|r| r.matches(attributes)),
            Self::Every { rules } => rules.iter().all(|r| r.matches(attributes)),
        }
    }
}

const fn default_count_cutoff() -> u32 {
    1
}

/// A destination category with its access cutoffs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationCategory {
    /// Short identifier, used to build indicator column names.
    pub name: String,
    #[serde(default)]
    pub domain: DestinationDomain,
    /// Maximum network distance (metres) counted as access.
    pub cutoff_m: f64,
    /// Minimum number of features within `cutoff_m` counted as access.
    #[serde(default = "default_count_cutoff")]
    pub count_cutoff: u32,
    pub include: InclusionRule,
}

/// A destination as delivered by the upstream compilation step.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDestination {
    pub source_id: String,
    pub x: f64,
    pub y: f64,
    pub attributes: BTreeMap<String, String>,
}

/// A destination admitted into one category.
#[derive(Debug, Clone, PartialEq)]
pub struct DestinationFeature {
    /// Running index within the category, contiguous from zero.
    pub id: u32,
    pub category: String,
    pub source_id: String,
    pub x: f64,
    pub y: f64,
}

/// Returns `true` if `name` is usable as a column-name fragment:
/// lowercase ASCII letters, digits and underscores, starting with a letter.
#[must_use]
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn inclusion_rules_match_attributes() {
        let shop = attrs(&[("shop", "supermarket"), ("name", "Foodland")]);

        assert!(InclusionRule::All.matches(&shop));
        assert!(
            InclusionRule::Equals {
                attribute: "shop".to_string(),
                value: "supermarket".to_string(),
            }
            .matches(&shop)
        );
        assert!(
            !InclusionRule::OneOf {
                attribute: "shop".to_string(),
                values: vec!["convenience".to_string(), "kiosk".to_string()],
            }
            .matches(&shop)
        );
        assert!(
            InclusionRule::Any {
                rules: vec![
                    InclusionRule::Exists {
                        attribute: "amenity".to_string()
                    },
                    InclusionRule::Exists {
                        attribute: "name".to_string()
                    },
                ],
            }
            .matches(&shop)
        );
        assert!(
            !InclusionRule::Every {
                rules: vec![
                    InclusionRule::All,
                    InclusionRule::Exists {
                        attribute: "amenity".to_string()
                    },
                ],
            }
            .matches(&shop)
        );
    }

    #[test]
    fn node_is_assigned_only_once() {
        let mut point = AnalysisPoint::new(1, 0.0, 0.0);
        assert!(point.assign_node(10, 4.0));
        assert!(!point.assign_node(11, 1.0));
        assert_eq!(point.node.map(|n| n.node), Some(10));
    }

    #[test]
    fn identifiers_are_validated() {
        assert!(is_valid_identifier("supermarket"));
        assert!(is_valid_identifier("pt_any_2"));
        assert!(!is_valid_identifier("2pt"));
        assert!(!is_valid_identifier("Fresh Food"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("a;drop"));
    }
}
