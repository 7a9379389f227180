//! Precomputed nearest-destination distances per network node.
//!
//! For each category a multi-source bounded Dijkstra seeds every feature at
//! its nearest node (at the feature's snapping offset) and records, for
//! every node, the distances to the `k` nearest distinct features within the
//! search bound. A point query is then a lookup at the point's node plus
//! the point's own offset.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};

use liveability_indicator_models::AccessibilityResult;
use liveability_network::NetworkStore;
use liveability_region_models::{AnalysisPoint, DestinationCategory};
use rayon::prelude::*;

use crate::{AccessError, DestinationCatalogue};

/// Heap entry: a feature reaching a node at a distance. Pops nearest first.
#[derive(Debug, Clone, Copy)]
struct FeatureDistance {
    distance: f64,
    node: usize,
    feature: u32,
}

impl PartialEq for FeatureDistance {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FeatureDistance {}

impl PartialOrd for FeatureDistance {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FeatureDistance {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .distance
            .total_cmp(&self.distance)
            .then_with(|| other.node.cmp(&self.node))
            .then_with(|| other.feature.cmp(&self.feature))
    }
}

/// Per-node nearest distances for one category.
#[derive(Debug, Clone)]
enum CategoryIndex {
    /// No features in the region.
    Unavailable,
    /// `nearest[node]` holds up to `k` ascending distances.
    Reached { nearest: Vec<Vec<f64>> },
}

/// Read-only accessibility lookups shared by every worker.
#[derive(Debug, Clone)]
pub struct AccessibilityIndex {
    bound_m: f64,
    categories: BTreeMap<String, CategoryIndex>,
}

impl AccessibilityIndex {
    /// Builds the per-node distance tables for every category, in parallel.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::BoundBelowCutoff`] if a category cutoff
    /// exceeds the search bound, since its access could not be decided.
    pub fn build(
        store: &NetworkStore,
        categories: &[DestinationCategory],
        catalogue: &DestinationCatalogue,
        bound_m: f64,
    ) -> Result<Self, AccessError> {
        if let Some(category) = categories.iter().find(|c| c.cutoff_m > bound_m) {
            return Err(AccessError::BoundBelowCutoff {
                category: category.name.clone(),
                cutoff_m: category.cutoff_m,
                bound_m,
            });
        }

        let categories = categories
            .par_iter()
            .map(|category| {
                let features = catalogue.features(&category.name);
                let index = if features.is_empty() {
                    log::warn!(
                        "Category '{}' has no features in the region; its access indicators will be null",
                        category.name
                    );
                    CategoryIndex::Unavailable
                } else {
                    let k = usize::try_from(category.count_cutoff.max(1)).unwrap_or(1);
                    let seeds = features
                        .iter()
                        .filter_map(|f| {
                            let snapped = store.nearest_node(f.x, f.y)?;
                            let node = store.node_index(snapped.node)?;
                            Some((node, snapped.offset_m, f.id))
                        })
                        .collect::<Vec<_>>();
                    CategoryIndex::Reached {
                        nearest: k_nearest(store, &seeds, k, bound_m),
                    }
                };
                (category.name.clone(), index)
            })
            .collect::<BTreeMap<_, _>>();

        log::info!(
            "Accessibility index built for {} categories (bound {bound_m} m)",
            categories.len()
        );

        Ok(Self {
            bound_m,
            categories,
        })
    }

    #[must_use]
    pub const fn bound_m(&self) -> f64 {
        self.bound_m
    }

    /// Distances from a node (plus the point's offset) to a category's
    /// nearest features.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::UnknownCategory`] if the category was not
    /// indexed.
    pub fn query(
        &self,
        node: usize,
        offset_m: f64,
        category: &str,
    ) -> Result<AccessibilityResult, AccessError> {
        match self.categories.get(category) {
            None => Err(AccessError::UnknownCategory(category.to_string())),
            Some(CategoryIndex::Unavailable) => Ok(AccessibilityResult::Unavailable),
            Some(CategoryIndex::Reached { nearest }) => Ok(AccessibilityResult::Reached(
                nearest
                    .get(node)
                    .map(|distances| {
                        distances
                            .iter()
                            .map(|d| d + offset_m)
                            .filter(|d| *d <= self.bound_m)
                            .collect()
                    })
                    .unwrap_or_default(),
            )),
        }
    }

    /// Accessibility of a point to every indexed category.
    ///
    /// A point without a network node gets no entries.
    #[must_use]
    pub fn query_point(
        &self,
        store: &NetworkStore,
        point: &AnalysisPoint,
    ) -> BTreeMap<String, AccessibilityResult> {
        let Some((node, offset_m)) = point
            .node
            .and_then(|a| store.node_index(a.node).map(|idx| (idx, a.offset_m)))
        else {
            return BTreeMap::new();
        };

        self.categories
            .keys()
            .filter_map(|name| {
                self.query(node, offset_m, name)
                    .ok()
                    .map(|result| (name.clone(), result))
            })
            .collect()
    }
}

/// Multi-source bounded Dijkstra keeping the `k` nearest distinct features
/// per node.
fn k_nearest(
    store: &NetworkStore,
    seeds: &[(usize, f64, u32)],
    k: usize,
    bound_m: f64,
) -> Vec<Vec<f64>> {
    let n = store.node_count();
    let mut nearest: Vec<Vec<f64>> = vec![Vec::new(); n];
    let mut reached_by: Vec<Vec<u32>> = vec![Vec::new(); n];
    let mut active = BinaryHeap::new();

    for &(node, offset_m, feature) in seeds {
        if offset_m <= bound_m {
            active.push(FeatureDistance {
                distance: offset_m,
                node,
                feature,
            });
        }
    }

    while let Some(FeatureDistance {
        distance,
        node,
        feature,
    }) = active.pop()
    {
        if nearest[node].len() >= k || reached_by[node].contains(&feature) {
            continue;
        }
        nearest[node].push(distance);
        reached_by[node].push(feature);

        for neighbor in store.neighbors(node) {
            let total = distance + neighbor.length_m;
            if total > bound_m
                || nearest[neighbor.node].len() >= k
                || reached_by[neighbor.node].contains(&feature)
            {
                continue;
            }
            active.push(FeatureDistance {
                distance: total,
                node: neighbor.node,
                feature,
            });
        }
    }

    nearest
}
