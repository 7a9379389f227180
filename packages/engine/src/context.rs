//! Read-only region structures shared by every worker.

use liveability_access::{AccessibilityIndex, DestinationCatalogue};
use liveability_config::RegionConfig;
use liveability_database::inputs::RegionInputs;
use liveability_indicator_models::{CatchmentResult, ExclusionReason, RawPointResult};
use liveability_network::{CatchmentBuilder, NetworkStore};
use liveability_region_models::{AnalysisPoint, GridId};
use liveability_spatial::DensityGrid;

use crate::EngineError;

/// The network, density grid and accessibility index of one region, plus
/// its analysis points with their nodes assigned.
///
/// Built once before evaluation and only borrowed afterwards.
pub struct RegionContext {
    pub store: NetworkStore,
    pub grid: DensityGrid,
    pub catalogue: DestinationCatalogue,
    pub index: AccessibilityIndex,
    /// Ascending by point id.
    pub points: Vec<AnalysisPoint>,
    catchment_distance_m: f64,
    min_component_nodes: usize,
}

impl RegionContext {
    /// Assembles the shared structures from loaded inputs.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] if the network or grid is malformed or the
    /// accessibility index cannot be built.
    pub fn build(config: &RegionConfig, inputs: RegionInputs) -> Result<Self, EngineError> {
        let RegionInputs {
            nodes,
            edges,
            grid,
            destinations,
            points,
        } = inputs;

        let store = NetworkStore::from_parts(nodes, edges)?;
        log::info!(
            "Network store: {} nodes, {} edges",
            store.node_count(),
            store.edge_count()
        );

        let grid = DensityGrid::new(grid)?;
        log::info!("Density grid: {} cells", grid.len());

        let catalogue = DestinationCatalogue::compile(&config.categories, &destinations);
        let index = AccessibilityIndex::build(
            &store,
            &config.categories,
            &catalogue,
            config.network.search_bound_m,
        )?;

        let mut assigned = points
            .into_iter()
            .map(|input| {
                let mut point = input.point;
                store.assign_node(&mut point, input.node_hint);
                point
            })
            .collect::<Vec<_>>();
        assigned.sort_by_key(|p| p.id);

        let unassigned = assigned.iter().filter(|p| p.node.is_none()).count();
        if unassigned > 0 {
            log::warn!("{unassigned} analysis points could not be assigned a network node");
        }

        Ok(Self {
            store,
            grid,
            catalogue,
            index,
            points: assigned,
            catchment_distance_m: config.network.catchment_distance_m,
            min_component_nodes: config.network.min_component_nodes,
        })
    }

    /// Grid cell a point is attributed to: the cell containing its node,
    /// or its own coordinate when it has no node.
    #[must_use]
    pub fn grid_cell(&self, point: &AnalysisPoint) -> Option<GridId> {
        let [x, y] = point
            .node
            .and_then(|a| self.store.node_index(a.node))
            .map_or([point.x, point.y], |idx| self.store.coord(idx));
        self.grid.cell_containing(x, y)
    }

    /// Computes the catchment densities and accessibility of one point.
    ///
    /// Never fails: a point without a usable catchment is recorded with its
    /// exclusion reason and null densities, and keeps whatever access its
    /// node provides. A catchment that touches no grid cell is excluded as
    /// [`ExclusionReason::OutsideGrid`].
    #[must_use]
    pub fn evaluate(&self, point: &AnalysisPoint) -> RawPointResult {
        let builder =
            CatchmentBuilder::new(&self.store, self.catchment_distance_m, self.min_component_nodes);

        let (exclusion, catchment) = match builder.build(point) {
            Ok(catchment) => {
                let densities = self.grid.aggregate(Some(&catchment.geometry));
                let reason = densities
                    .cells
                    .is_empty()
                    .then_some(ExclusionReason::OutsideGrid);
                (reason, densities)
            }
            Err(reason) => (Some(reason), CatchmentResult::empty()),
        };

        RawPointResult {
            point_id: point.id,
            node_id: point.node.map(|a| a.node),
            grid_id: self.grid_cell(point),
            exclusion,
            catchment,
            access: self.index.query_point(&self.store, point),
        }
    }
}
