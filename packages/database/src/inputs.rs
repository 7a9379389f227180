//! Region input tables.
//!
//! The upstream import steps deliver one `DuckDB` file per region with the
//! pedestrian network, the density grid, the compiled destinations and the
//! analysis points. Geometry travels as `GeoJSON` text.

use std::collections::BTreeMap;
use std::path::Path;

use duckdb::{Connection, Statement};
use geo::LineString;
use liveability_region_models::{
    AnalysisPoint, DensityGridCell, NetworkEdge, NetworkNode, NodeId, RawDestination,
};
use liveability_spatial::{
    linestring_to_geojson, parse_geojson_linestring, parse_geojson_polygon, polygon_to_geojson,
};

use crate::{DbError, table_exists};

/// Number of rows per INSERT chunk.
const CHUNK_SIZE: usize = 5_000;

/// An analysis point as stored, with the node assigned upstream if any.
#[derive(Debug, Clone, PartialEq)]
pub struct PointInput {
    pub point: AnalysisPoint,
    pub node_hint: Option<NodeId>,
}

/// Everything read from a region's input database.
#[derive(Debug, Clone, Default)]
pub struct RegionInputs {
    pub nodes: Vec<NetworkNode>,
    pub edges: Vec<NetworkEdge>,
    pub grid: Vec<DensityGridCell>,
    pub destinations: Vec<RawDestination>,
    pub points: Vec<PointInput>,
}

/// Opens an existing region input database.
///
/// # Errors
///
/// Returns [`DbError::DataAbsent`] if the file does not exist, or
/// [`DbError::DuckDb`] if it cannot be opened.
pub fn open(path: &Path) -> Result<Connection, DbError> {
    if !path.exists() {
        return Err(DbError::DataAbsent {
            input: path.display().to_string(),
            reason: "input database not found".to_string(),
        });
    }
    Ok(Connection::open(path)?)
}

/// Creates the input tables if they do not exist.
///
/// # Errors
///
/// Returns [`DbError`] if schema creation fails.
pub fn create_schema(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS network_nodes (
            node_id BIGINT NOT NULL PRIMARY KEY,
            x DOUBLE NOT NULL,
            y DOUBLE NOT NULL
        );

        CREATE TABLE IF NOT EXISTS network_edges (
            edge_id BIGINT NOT NULL PRIMARY KEY,
            from_node BIGINT NOT NULL,
            to_node BIGINT NOT NULL,
            length DOUBLE NOT NULL,
            geometry_geojson TEXT
        );

        CREATE TABLE IF NOT EXISTS density_grid (
            grid_id BIGINT NOT NULL PRIMARY KEY,
            geometry_geojson TEXT NOT NULL,
            area_sqkm DOUBLE NOT NULL,
            population DOUBLE NOT NULL,
            intersections DOUBLE NOT NULL
        );

        CREATE TABLE IF NOT EXISTS destinations (
            source_id TEXT NOT NULL,
            x DOUBLE NOT NULL,
            y DOUBLE NOT NULL,
            attributes_json TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS analysis_points (
            point_id BIGINT NOT NULL PRIMARY KEY,
            x DOUBLE NOT NULL,
            y DOUBLE NOT NULL,
            node_id BIGINT
        );",
    )?;
    Ok(())
}

/// Reads every input table.
///
/// # Errors
///
/// Returns [`DbError::DataAbsent`] naming the first required table that is
/// missing or empty. An empty `destinations` table is allowed; every
/// category is then unavailable.
pub fn load(conn: &Connection) -> Result<RegionInputs, DbError> {
    let nodes = load_nodes(conn)?;
    require_rows("network_nodes", nodes.len())?;

    let edges = load_edges(conn, &nodes)?;
    require_rows("network_edges", edges.len())?;

    let grid = load_grid(conn)?;
    require_rows("density_grid", grid.len())?;

    let destinations = load_destinations(conn)?;
    if destinations.is_empty() {
        log::warn!("Input table destinations is empty; every category will be unavailable");
    }

    let points = load_points(conn)?;
    require_rows("analysis_points", points.len())?;

    log::info!(
        "Loaded inputs: {} nodes, {} edges, {} grid cells, {} destinations, {} points",
        nodes.len(),
        edges.len(),
        grid.len(),
        destinations.len(),
        points.len()
    );

    Ok(RegionInputs {
        nodes,
        edges,
        grid,
        destinations,
        points,
    })
}

fn require_table(conn: &Connection, table: &str) -> Result<(), DbError> {
    if table_exists(conn, table)? {
        Ok(())
    } else {
        Err(DbError::DataAbsent {
            input: table.to_string(),
            reason: "table not found in input database".to_string(),
        })
    }
}

fn require_rows(table: &str, count: usize) -> Result<(), DbError> {
    if count == 0 {
        return Err(DbError::DataAbsent {
            input: table.to_string(),
            reason: "table has no rows".to_string(),
        });
    }
    Ok(())
}

fn load_nodes(conn: &Connection) -> Result<Vec<NetworkNode>, DbError> {
    require_table(conn, "network_nodes")?;
    let mut stmt = conn.prepare("SELECT node_id, x, y FROM network_nodes ORDER BY node_id")?;
    let rows = stmt.query_map([], |row| {
        Ok(NetworkNode {
            id: row.get(0)?,
            x: row.get(1)?,
            y: row.get(2)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn load_edges(conn: &Connection, nodes: &[NetworkNode]) -> Result<Vec<NetworkEdge>, DbError> {
    require_table(conn, "network_edges")?;
    let coords = nodes
        .iter()
        .map(|n| (n.id, (n.x, n.y)))
        .collect::<BTreeMap<_, _>>();

    let mut stmt = conn.prepare(
        "SELECT edge_id, from_node, to_node, length, geometry_geojson
         FROM network_edges ORDER BY edge_id",
    )?;
    let mut rows = stmt.query([])?;
    let mut edges = Vec::new();
    let mut straightened = 0usize;

    while let Some(row) = rows.next()? {
        let id: i64 = row.get(0)?;
        let from: NodeId = row.get(1)?;
        let to: NodeId = row.get(2)?;
        let length_m: f64 = row.get(3)?;
        let geojson: Option<String> = row.get(4)?;

        let geometry = match geojson.as_deref().and_then(parse_geojson_linestring) {
            Some(line) => line,
            None => {
                straightened += 1;
                match (coords.get(&from), coords.get(&to)) {
                    (Some(a), Some(b)) => LineString::from(vec![*a, *b]),
                    _ => LineString::new(Vec::new()),
                }
            }
        };

        edges.push(NetworkEdge {
            id,
            from,
            to,
            length_m,
            geometry,
        });
    }

    if straightened > 0 {
        log::warn!("{straightened} edges had no usable geometry; using straight segments");
    }

    Ok(edges)
}

fn load_grid(conn: &Connection) -> Result<Vec<DensityGridCell>, DbError> {
    require_table(conn, "density_grid")?;
    let mut stmt = conn.prepare(
        "SELECT grid_id, geometry_geojson, area_sqkm, population, intersections
         FROM density_grid ORDER BY grid_id",
    )?;
    let mut rows = stmt.query([])?;
    let mut cells = Vec::new();

    while let Some(row) = rows.next()? {
        let id: i64 = row.get(0)?;
        let geojson: String = row.get(1)?;

        let Some(geometry) = parse_geojson_polygon(&geojson) else {
            log::warn!("Failed to parse GeoJSON for grid cell {id}");
            continue;
        };

        cells.push(DensityGridCell {
            id,
            geometry,
            area_sqkm: row.get(2)?,
            population: row.get(3)?,
            intersections: row.get(4)?,
        });
    }

    Ok(cells)
}

fn load_destinations(conn: &Connection) -> Result<Vec<RawDestination>, DbError> {
    require_table(conn, "destinations")?;
    let mut stmt = conn.prepare(
        "SELECT source_id, x, y, attributes_json FROM destinations ORDER BY source_id, x, y",
    )?;
    let mut rows = stmt.query([])?;
    let mut destinations = Vec::new();

    while let Some(row) = rows.next()? {
        let source_id: String = row.get(0)?;
        let json: String = row.get(3)?;
        let attributes = match parse_attributes(&json) {
            Ok(attributes) => attributes,
            Err(e) => {
                log::warn!("Skipping destination {source_id}: bad attributes ({e})");
                continue;
            }
        };

        destinations.push(RawDestination {
            source_id,
            x: row.get(1)?,
            y: row.get(2)?,
            attributes,
        });
    }

    Ok(destinations)
}

/// Flattens a JSON object into string attributes. Nulls are dropped and
/// non-string scalars keep their JSON text.
fn parse_attributes(json: &str) -> Result<BTreeMap<String, String>, serde_json::Error> {
    let object: serde_json::Map<String, serde_json::Value> = serde_json::from_str(json)?;
    Ok(object
        .into_iter()
        .filter_map(|(key, value)| match value {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some((key, s)),
            other => Some((key, other.to_string())),
        })
        .collect())
}

fn load_points(conn: &Connection) -> Result<Vec<PointInput>, DbError> {
    require_table(conn, "analysis_points")?;
    let mut stmt =
        conn.prepare("SELECT point_id, x, y, node_id FROM analysis_points ORDER BY point_id")?;
    let rows = stmt.query_map([], |row| {
        Ok(PointInput {
            point: AnalysisPoint::new(row.get(0)?, row.get(1)?, row.get(2)?),
            node_hint: row.get(3)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Multi-row chunked INSERT: one `(?, ...)` group per row, bound in order.
pub(crate) fn insert_chunked<T>(
    conn: &Connection,
    insert_prefix: &str,
    conflict_clause: &str,
    columns: usize,
    rows: &[T],
    bind: impl Fn(&mut Statement<'_>, usize, &T) -> Result<(), DbError>,
) -> Result<u64, DbError> {
    let placeholders = format!("({})", vec!["?"; columns].join(", "));
    let mut total = 0u64;

    for chunk in rows.chunks(CHUNK_SIZE) {
        let mut sql = String::from(insert_prefix);
        sql.push_str(" VALUES ");
        for i in 0..chunk.len() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push_str(&placeholders);
        }
        sql.push(' ');
        sql.push_str(conflict_clause);

        let mut stmt = conn.prepare(&sql)?;
        let mut param_idx = 1usize;
        for row in chunk {
            bind(&mut stmt, param_idx, row)?;
            param_idx += columns;
        }
        let rows = stmt.raw_execute()?;
        total += u64::try_from(rows).unwrap_or(0);
    }

    Ok(total)
}

/// Inserts network nodes, ignoring ids already present.
///
/// # Errors
///
/// Returns [`DbError`] if any database operation fails.
pub fn insert_nodes(conn: &Connection, nodes: &[NetworkNode]) -> Result<u64, DbError> {
    insert_chunked(
        conn,
        "INSERT INTO network_nodes (node_id, x, y)",
        "ON CONFLICT DO NOTHING",
        3,
        nodes,
        |stmt, idx, node| {
            stmt.raw_bind_parameter(idx, node.id)?;
            stmt.raw_bind_parameter(idx + 1, node.x)?;
            stmt.raw_bind_parameter(idx + 2, node.y)?;
            Ok(())
        },
    )
}

/// Inserts network edges with their geometry, ignoring ids already
/// present.
///
/// # Errors
///
/// Returns [`DbError`] if any database operation fails.
pub fn insert_edges(conn: &Connection, edges: &[NetworkEdge]) -> Result<u64, DbError> {
    insert_chunked(
        conn,
        "INSERT INTO network_edges (edge_id, from_node, to_node, length, geometry_geojson)",
        "ON CONFLICT DO NOTHING",
        5,
        edges,
        |stmt, idx, edge| {
            let geometry =
                (!edge.geometry.0.is_empty()).then(|| linestring_to_geojson(&edge.geometry));
            stmt.raw_bind_parameter(idx, edge.id)?;
            stmt.raw_bind_parameter(idx + 1, edge.from)?;
            stmt.raw_bind_parameter(idx + 2, edge.to)?;
            stmt.raw_bind_parameter(idx + 3, edge.length_m)?;
            stmt.raw_bind_parameter(idx + 4, geometry)?;
            Ok(())
        },
    )
}

/// Inserts density grid cells, ignoring ids already present.
///
/// # Errors
///
/// Returns [`DbError`] if any database operation fails.
pub fn insert_grid_cells(conn: &Connection, cells: &[DensityGridCell]) -> Result<u64, DbError> {
    insert_chunked(
        conn,
        "INSERT INTO density_grid (grid_id, geometry_geojson, area_sqkm, population, intersections)",
        "ON CONFLICT DO NOTHING",
        5,
        cells,
        |stmt, idx, cell| {
            stmt.raw_bind_parameter(idx, cell.id)?;
            stmt.raw_bind_parameter(idx + 1, polygon_to_geojson(&cell.geometry))?;
            stmt.raw_bind_parameter(idx + 2, cell.area_sqkm)?;
            stmt.raw_bind_parameter(idx + 3, cell.population)?;
            stmt.raw_bind_parameter(idx + 4, cell.intersections)?;
            Ok(())
        },
    )
}

/// Appends raw destinations.
///
/// # Errors
///
/// Returns [`DbError`] if any database operation fails.
pub fn insert_destinations(
    conn: &Connection,
    destinations: &[RawDestination],
) -> Result<u64, DbError> {
    insert_chunked(
        conn,
        "INSERT INTO destinations (source_id, x, y, attributes_json)",
        "",
        4,
        destinations,
        |stmt, idx, destination| {
            stmt.raw_bind_parameter(idx, &destination.source_id)?;
            stmt.raw_bind_parameter(idx + 1, destination.x)?;
            stmt.raw_bind_parameter(idx + 2, destination.y)?;
            stmt.raw_bind_parameter(idx + 3, serde_json::to_string(&destination.attributes)?)?;
            Ok(())
        },
    )
}

/// Inserts analysis points, ignoring ids already present.
///
/// # Errors
///
/// Returns [`DbError`] if any database operation fails.
pub fn insert_points(conn: &Connection, points: &[PointInput]) -> Result<u64, DbError> {
    insert_chunked(
        conn,
        "INSERT INTO analysis_points (point_id, x, y, node_id)",
        "ON CONFLICT DO NOTHING",
        4,
        points,
        |stmt, idx, input| {
            stmt.raw_bind_parameter(idx, input.point.id)?;
            stmt.raw_bind_parameter(idx + 1, input.point.x)?;
            stmt.raw_bind_parameter(idx + 2, input.point.y)?;
            stmt.raw_bind_parameter(idx + 3, input.node_hint)?;
            Ok(())
        },
    )
}
