//! Walkable catchments: the ego network within a network distance of a
//! point's node.

use std::cmp::Ordering;
use std::collections::{BTreeSet, BinaryHeap, HashMap};

use geo::MultiLineString;
use liveability_indicator_models::ExclusionReason;
use liveability_region_models::{AnalysisPoint, EdgeId, NodeId};

use crate::NetworkStore;

/// Heap entry for the bounded Dijkstra expansion. Ordered so that
/// [`BinaryHeap`] pops the smallest distance first, lowest node on ties.
#[derive(Debug, Clone, Copy)]
struct NodeDistance {
    node: usize,
    distance: f64,
}

impl PartialEq for NodeDistance {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for NodeDistance {}

impl PartialOrd for NodeDistance {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NodeDistance {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .distance
            .total_cmp(&self.distance)
            .then_with(|| other.node.cmp(&self.node))
    }
}

/// Shortest distances from `origin` to every node within `max_distance_m`.
///
/// Keys are node indices.
#[must_use]
pub fn bounded_distances(
    store: &NetworkStore,
    origin: usize,
    max_distance_m: f64,
) -> HashMap<usize, f64> {
    let mut settled: HashMap<usize, f64> = HashMap::new();
    let mut best: HashMap<usize, f64> = HashMap::new();
    let mut active = BinaryHeap::new();

    best.insert(origin, 0.0);
    active.push(NodeDistance {
        node: origin,
        distance: 0.0,
    });

    while let Some(NodeDistance { node, distance }) = active.pop() {
        if settled.contains_key(&node) {
            continue;
        }
        settled.insert(node, distance);

        for neighbor in store.neighbors(node) {
            if settled.contains_key(&neighbor.node) {
                continue;
            }
            let total = distance + neighbor.length_m;
            if total > max_distance_m {
                continue;
            }
            if best.get(&neighbor.node).is_none_or(|d| total < *d) {
                best.insert(neighbor.node, total);
                active.push(NodeDistance {
                    node: neighbor.node,
                    distance: total,
                });
            }
        }
    }

    settled
}

/// The ego network of one analysis point.
#[derive(Debug, Clone, PartialEq)]
pub struct Catchment {
    pub origin: NodeId,
    /// Reachable node ids, ascending.
    pub nodes: Vec<NodeId>,
    /// Edge ids with both endpoints reachable, ascending.
    pub edges: Vec<EdgeId>,
    /// Edge geometries in edge-id order.
    pub geometry: MultiLineString<f64>,
}

impl Catchment {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

/// Builds catchments against a shared [`NetworkStore`].
#[derive(Debug, Clone, Copy)]
pub struct CatchmentBuilder<'a> {
    store: &'a NetworkStore,
    max_distance_m: f64,
    min_component_nodes: usize,
}

impl<'a> CatchmentBuilder<'a> {
    #[must_use]
    pub const fn new(
        store: &'a NetworkStore,
        max_distance_m: f64,
        min_component_nodes: usize,
    ) -> Self {
        Self {
            store,
            max_distance_m,
            min_component_nodes,
        }
    }

    /// Expands the network from the point's node up to the maximum
    /// distance.
    ///
    /// # Errors
    ///
    /// Returns the [`ExclusionReason`] when the point has no node, its node
    /// is on an undersized component, or the ego network has no edges.
    pub fn build(&self, point: &AnalysisPoint) -> Result<Catchment, ExclusionReason> {
        let origin = point
            .node
            .and_then(|a| self.store.node_index(a.node))
            .ok_or(ExclusionReason::Unassigned)?;

        if self.store.component_size(origin) < self.min_component_nodes {
            return Err(ExclusionReason::UndersizedIsland);
        }

        let reached = bounded_distances(self.store, origin, self.max_distance_m);

        let mut edge_indices = BTreeSet::new();
        for &node in reached.keys() {
            for neighbor in self.store.neighbors(node) {
                if reached.contains_key(&neighbor.node) {
                    edge_indices.insert(neighbor.edge);
                }
            }
        }

        if edge_indices.is_empty() {
            return Err(ExclusionReason::NoNetwork);
        }

        let mut nodes = reached
            .keys()
            .map(|idx| self.store.node_id(*idx))
            .collect::<Vec<_>>();
        nodes.sort_unstable();

        let edges = edge_indices
            .iter()
            .map(|idx| self.store.edge(*idx).id)
            .collect();
        let geometry = MultiLineString::new(
            edge_indices
                .iter()
                .map(|idx| self.store.edge(*idx).geometry.clone())
                .collect(),
        );

        Ok(Catchment {
            origin: self.store.node_id(origin),
            nodes,
            edges,
            geometry,
        })
    }
}
