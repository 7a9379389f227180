#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! In-memory spatial index over the density grid.
//!
//! Grid cells are bulk-loaded into an R-tree once per region. Catchment
//! densities are computed by an envelope prefilter followed by an exact
//! intersection test, and analysis points are attributed to the cell that
//! contains their network node.

use std::collections::BTreeMap;

use geo::{BoundingRect, Intersects, LineString, MultiLineString, Point, Polygon};
use geojson::GeoJson;
use liveability_indicator_models::CatchmentResult;
use liveability_region_models::{DensityGridCell, GridId};
use rstar::{AABB, RTree, RTreeObject};

/// Errors raised while building the density grid.
#[derive(Debug, thiserror::Error)]
pub enum SpatialError {
    /// The region has no grid cells.
    #[error("Density grid has no cells")]
    Empty,

    /// Two cells share an id.
    #[error("Duplicate grid cell id {0}")]
    DuplicateCell(GridId),

    /// A cell has a zero, negative or non-finite area.
    #[error("Grid cell {grid_id} has invalid area {area}")]
    InvalidArea { grid_id: GridId, area: f64 },
}

/// A grid cell stored in the R-tree.
struct GridEntry {
    id: GridId,
    population: f64,
    intersections: f64,
    area_sqkm: f64,
    envelope: AABB<[f64; 2]>,
    polygon: Polygon<f64>,
}

impl RTreeObject for GridEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Pre-built spatial index over the density grid.
///
/// Constructed once and shared across all workers.
pub struct DensityGrid {
    cells: RTree<GridEntry>,
    populations: BTreeMap<GridId, f64>,
}

impl DensityGrid {
    /// Builds the R-tree over the given cells.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError`] if there are no cells, ids repeat, or an
    /// area is not positive.
    pub fn new(cells: Vec<DensityGridCell>) -> Result<Self, SpatialError> {
        if cells.is_empty() {
            return Err(SpatialError::Empty);
        }

        let mut populations = BTreeMap::new();
        let mut entries = Vec::with_capacity(cells.len());

        for cell in cells {
            if !cell.area_sqkm.is_finite() || cell.area_sqkm <= 0.0 {
                return Err(SpatialError::InvalidArea {
                    grid_id: cell.id,
                    area: cell.area_sqkm,
                });
            }
            if populations.insert(cell.id, cell.population).is_some() {
                return Err(SpatialError::DuplicateCell(cell.id));
            }

            entries.push(GridEntry {
                id: cell.id,
                population: cell.population,
                intersections: cell.intersections,
                area_sqkm: cell.area_sqkm,
                envelope: compute_envelope(&cell.geometry),
                polygon: cell.geometry,
            });
        }

        let cells = RTree::bulk_load(entries);
        log::info!("Loaded {} grid cells into spatial index", cells.size());

        Ok(Self { cells, populations })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.size()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.size() == 0
    }

    /// Population of a cell.
    #[must_use]
    pub fn population(&self, id: GridId) -> Option<f64> {
        self.populations.get(&id).copied()
    }

    /// Every cell id with its population, ascending by id.
    pub fn populations(&self) -> impl Iterator<Item = (GridId, f64)> + '_ {
        self.populations.iter().map(|(id, pop)| (*id, *pop))
    }

    /// Looks up the cell containing a coordinate.
    ///
    /// Points on a shared boundary resolve to the lowest cell id.
    #[must_use]
    pub fn cell_containing(&self, x: f64, y: f64) -> Option<GridId> {
        let point = Point::new(x, y);
        self.cells
            .locate_in_envelope_intersecting(&AABB::from_point([x, y]))
            .filter(|entry| entry.polygon.intersects(&point))
            .map(|entry| entry.id)
            .min()
    }

    /// Cells whose polygon intersects `geometry`, ascending by id.
    fn hits(&self, geometry: &MultiLineString<f64>) -> Vec<&GridEntry> {
        let Some(rect) = geometry.bounding_rect() else {
            return Vec::new();
        };
        let query_env =
            AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]);

        let mut hits = self
            .cells
            .locate_in_envelope_intersecting(&query_env)
            .filter(|entry| entry.polygon.intersects(geometry))
            .collect::<Vec<_>>();
        hits.sort_unstable_by_key(|entry| entry.id);
        hits
    }

    /// Ids of the cells intersecting a catchment geometry, ascending.
    #[must_use]
    pub fn intersecting(&self, geometry: &MultiLineString<f64>) -> Vec<GridId> {
        self.hits(geometry).iter().map(|e| e.id).collect()
    }

    /// Population and intersection density (per km²) over the cells a
    /// catchment touches.
    ///
    /// `None` (no catchment) yields an empty result with null densities,
    /// distinct from a measured zero.
    #[must_use]
    pub fn aggregate(&self, catchment: Option<&MultiLineString<f64>>) -> CatchmentResult {
        let Some(geometry) = catchment else {
            return CatchmentResult::empty();
        };
        let hits = self.hits(geometry);

        let area: f64 = hits.iter().map(|e| e.area_sqkm).sum();
        if hits.is_empty() || area <= 0.0 {
            return CatchmentResult::empty();
        }
        let population: f64 = hits.iter().map(|e| e.population).sum();
        let intersections: f64 = hits.iter().map(|e| e.intersections).sum();

        CatchmentResult {
            cells: hits.iter().map(|e| e.id).collect(),
            population_density: Some(population / area),
            intersection_density: Some(intersections / area),
        }
    }
}

/// Parses a `GeoJSON` string into a [`Polygon`].
///
/// Single-part `MultiPolygon`s are accepted; anything else is rejected.
#[must_use]
pub fn parse_geojson_polygon(geojson_str: &str) -> Option<Polygon<f64>> {
    match parse_geojson_geometry(geojson_str)? {
        geo::Geometry::Polygon(p) => Some(p),
        geo::Geometry::MultiPolygon(mut mp) if mp.0.len() == 1 => mp.0.pop(),
        _ => None,
    }
}

/// Parses a `GeoJSON` string into a [`LineString`].
#[must_use]
pub fn parse_geojson_linestring(geojson_str: &str) -> Option<LineString<f64>> {
    match parse_geojson_geometry(geojson_str)? {
        geo::Geometry::LineString(ls) => Some(ls),
        _ => None,
    }
}

/// Serializes a polygon as a `GeoJSON` geometry string.
#[must_use]
pub fn polygon_to_geojson(polygon: &Polygon<f64>) -> String {
    geojson::Geometry::new(geojson::Value::from(polygon)).to_string()
}

/// Serializes a line string as a `GeoJSON` geometry string.
#[must_use]
pub fn linestring_to_geojson(line: &LineString<f64>) -> String {
    geojson::Geometry::new(geojson::Value::from(line)).to_string()
}

fn parse_geojson_geometry(geojson_str: &str) -> Option<geo::Geometry<f64>> {
    let geojson: GeoJson = geojson_str.parse().ok()?;
    match geojson {
        GeoJson::Geometry(geom) => geom.try_into().ok(),
        GeoJson::Feature(feature) => feature.geometry?.try_into().ok(),
        GeoJson::FeatureCollection(_) => None,
    }
}

/// Computes the bounding box envelope of a polygon.
fn compute_envelope(polygon: &Polygon<f64>) -> AABB<[f64; 2]> {
    polygon.bounding_rect().map_or_else(
        || AABB::from_point([0.0, 0.0]),
        |rect| AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
    )
}
