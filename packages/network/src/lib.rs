#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Routable pedestrian network for one study region.
//!
//! The [`NetworkStore`] holds the undirected street graph in compressed
//! sparse row form, a connected-component label per node and an R-tree over
//! node coordinates for nearest-node snapping. It is built once, never
//! mutated, and lent to every worker by shared reference.

pub mod catchment;

pub use catchment::{Catchment, CatchmentBuilder};

use std::collections::BTreeMap;

use liveability_region_models::{
    AnalysisPoint, EdgeId, NetworkEdge, NetworkNode, NodeAssignment, NodeId,
};
use rstar::RTree;
use rstar::primitives::GeomWithData;

/// Errors raised while assembling the network.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// The region has no network nodes.
    #[error("Network has no nodes")]
    Empty,

    /// Two nodes share an id.
    #[error("Duplicate network node id {0}")]
    DuplicateNode(NodeId),

    /// An edge endpoint is not a known node.
    #[error("Edge {edge} references unknown node {node}")]
    UnknownNode { edge: EdgeId, node: NodeId },

    /// An edge length is negative or not finite.
    #[error("Edge {edge} has invalid length {length}")]
    InvalidLength { edge: EdgeId, length: f64 },
}

type NodeEntry = GeomWithData<[f64; 2], usize>;

/// Adjacency slot in the CSR arrays.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Index of the adjacent node.
    pub node: usize,
    /// Length of the connecting edge in metres.
    pub length_m: f64,
    /// Index of the connecting edge.
    pub edge: usize,
}

/// Immutable undirected street graph.
///
/// Nodes and edges are addressed by dense indices ordered by ascending id,
/// so iterating indices is iterating ids.
#[derive(Debug)]
pub struct NetworkStore {
    node_ids: Vec<NodeId>,
    coords: Vec<[f64; 2]>,
    index_of: BTreeMap<NodeId, usize>,
    offsets: Vec<usize>,
    adjacency: Vec<Neighbor>,
    edges: Vec<NetworkEdge>,
    component: Vec<usize>,
    component_sizes: Vec<usize>,
    tree: RTree<NodeEntry>,
}

impl NetworkStore {
    /// Builds the store from imported nodes and edges.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError`] if there are no nodes, node ids repeat, or
    /// an edge is malformed.
    pub fn from_parts(
        mut nodes: Vec<NetworkNode>,
        mut edges: Vec<NetworkEdge>,
    ) -> Result<Self, NetworkError> {
        if nodes.is_empty() {
            return Err(NetworkError::Empty);
        }
        nodes.sort_by_key(|n| n.id);
        edges.sort_by_key(|e| e.id);

        let mut index_of = BTreeMap::new();
        for (idx, node) in nodes.iter().enumerate() {
            if index_of.insert(node.id, idx).is_some() {
                return Err(NetworkError::DuplicateNode(node.id));
            }
        }

        let mut lists: Vec<Vec<Neighbor>> = vec![Vec::new(); nodes.len()];
        for (edge_idx, edge) in edges.iter().enumerate() {
            if !edge.length_m.is_finite() || edge.length_m < 0.0 {
                return Err(NetworkError::InvalidLength {
                    edge: edge.id,
                    length: edge.length_m,
                });
            }
            let from = lookup(&index_of, edge.id, edge.from)?;
            let to = lookup(&index_of, edge.id, edge.to)?;
            if from == to {
                continue;
            }
            lists[from].push(Neighbor {
                node: to,
                length_m: edge.length_m,
                edge: edge_idx,
            });
            lists[to].push(Neighbor {
                node: from,
                length_m: edge.length_m,
                edge: edge_idx,
            });
        }

        let offsets = std::iter::once(0)
            .chain(lists.iter().scan(0, |acc, list| {
                *acc += list.len();
                Some(*acc)
            }))
            .collect::<Vec<_>>();
        let adjacency = lists.into_iter().flatten().collect::<Vec<_>>();

        let coords = nodes.iter().map(|n| [n.x, n.y]).collect::<Vec<_>>();
        let tree = RTree::bulk_load(
            coords
                .iter()
                .enumerate()
                .map(|(idx, c)| GeomWithData::new(*c, idx))
                .collect(),
        );

        let mut store = Self {
            node_ids: nodes.iter().map(|n| n.id).collect(),
            coords,
            index_of,
            offsets,
            adjacency,
            edges,
            component: Vec::new(),
            component_sizes: Vec::new(),
            tree,
        };
        store.label_components();

        log::info!(
            "Network loaded: {} nodes, {} edges, {} components (largest {})",
            store.node_count(),
            store.edge_count(),
            store.component_sizes.len(),
            store.component_sizes.iter().max().copied().unwrap_or(0)
        );

        Ok(store)
    }

    fn label_components(&mut self) {
        let n = self.node_ids.len();
        let mut component = vec![usize::MAX; n];
        let mut sizes = Vec::new();
        let mut stack = Vec::new();

        for start in 0..n {
            if component[start] != usize::MAX {
                continue;
            }
            let label = sizes.len();
            let mut size = 0;
            component[start] = label;
            stack.push(start);
            while let Some(u) = stack.pop() {
                size += 1;
                for neighbor in self.neighbors(u) {
                    if component[neighbor.node] == usize::MAX {
                        component[neighbor.node] = label;
                        stack.push(neighbor.node);
                    }
                }
            }
            sizes.push(size);
        }

        self.component = component;
        self.component_sizes = sizes;
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.node_ids.len()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Dense index of a node id.
    #[must_use]
    pub fn node_index(&self, id: NodeId) -> Option<usize> {
        self.index_of.get(&id).copied()
    }

    #[must_use]
    pub fn node_id(&self, idx: usize) -> NodeId {
        self.node_ids[idx]
    }

    #[must_use]
    pub fn coord(&self, idx: usize) -> [f64; 2] {
        self.coords[idx]
    }

    #[must_use]
    pub fn edge(&self, idx: usize) -> &NetworkEdge {
        &self.edges[idx]
    }

    #[inline]
    fn range(&self, idx: usize) -> std::ops::Range<usize> {
        self.offsets[idx]..self.offsets[idx + 1]
    }

    /// Adjacent nodes of `idx` with the connecting edge.
    pub fn neighbors(&self, idx: usize) -> impl Iterator<Item = Neighbor> + '_ {
        self.adjacency[self.range(idx)].iter().copied()
    }

    /// Number of nodes in the connected component containing `idx`.
    #[must_use]
    pub fn component_size(&self, idx: usize) -> usize {
        self.component_sizes[self.component[idx]]
    }

    /// Finds the node nearest to a coordinate.
    ///
    /// Equidistant candidates resolve to the lowest node id so snapping is
    /// deterministic.
    #[must_use]
    pub fn nearest_node(&self, x: f64, y: f64) -> Option<NodeAssignment> {
        if !x.is_finite() || !y.is_finite() {
            return None;
        }
        let mut candidates = self.tree.nearest_neighbor_iter_with_distance_2(&[x, y]);
        let (first, best_d2) = candidates.next()?;
        let idx = candidates
            .take_while(|(_, d2)| *d2 <= best_d2)
            .map(|(entry, _)| entry.data)
            .fold(first.data, usize::min);

        Some(NodeAssignment {
            node: self.node_ids[idx],
            offset_m: best_d2.sqrt(),
        })
    }

    /// Attaches a point to its network node.
    ///
    /// A `hint` naming a known node is used as-is (with the straight-line
    /// offset to it); otherwise the nearest node is chosen. Points that
    /// already carry a node are left untouched. Returns `false` if the point
    /// ends up without a node.
    pub fn assign_node(&self, point: &mut AnalysisPoint, hint: Option<NodeId>) -> bool {
        if point.node.is_some() {
            return true;
        }
        let hinted = hint.and_then(|id| self.node_index(id)).map(|idx| {
            let [nx, ny] = self.coords[idx];
            NodeAssignment {
                node: self.node_ids[idx],
                offset_m: (nx - point.x).hypot(ny - point.y),
            }
        });
        if let Some(id) = hint
            && hinted.is_none()
        {
            log::warn!(
                "Point {} references unknown node {id}, snapping instead",
                point.id
            );
        }

        match hinted.or_else(|| self.nearest_node(point.x, point.y)) {
            Some(assignment) => point.assign_node(assignment.node, assignment.offset_m),
            None => false,
        }
    }
}

fn lookup(
    index_of: &BTreeMap<NodeId, usize>,
    edge: EdgeId,
    node: NodeId,
) -> Result<usize, NetworkError> {
    index_of
        .get(&node)
        .copied()
        .ok_or(NetworkError::UnknownNode { edge, node })
}

/// Builds a straight two-vertex edge geometry between nodes.
#[must_use]
pub fn straight_edge_geometry(from: &NetworkNode, to: &NetworkNode) -> geo::LineString<f64> {
    geo::LineString::from(vec![(from.x, from.y), (to.x, to.y)])
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn node(id: NodeId, x: f64, y: f64) -> NetworkNode {
        NetworkNode { id, x, y }
    }

    pub fn edge(id: EdgeId, from: &NetworkNode, to: &NetworkNode) -> NetworkEdge {
        NetworkEdge {
            id,
            from: from.id,
            to: to.id,
            length_m: (to.x - from.x).hypot(to.y - from.y),
            geometry: straight_edge_geometry(from, to),
        }
    }

    /// A 100 m spaced chain `1 - 2 - 3 - 4` plus an isolated pair `10 - 11`.
    pub fn chain_with_island() -> NetworkStore {
        let nodes = vec![
            node(1, 0.0, 0.0),
            node(2, 100.0, 0.0),
            node(3, 200.0, 0.0),
            node(4, 300.0, 0.0),
            node(10, 5_000.0, 0.0),
            node(11, 5_100.0, 0.0),
        ];
        let edges = vec![
            edge(100, &nodes[0], &nodes[1]),
            edge(101, &nodes[1], &nodes[2]),
            edge(102, &nodes[2], &nodes[3]),
            edge(200, &nodes[4], &nodes[5]),
        ];
        NetworkStore::from_parts(nodes, edges).unwrap()
    }
}
