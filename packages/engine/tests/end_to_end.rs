use std::collections::BTreeMap;
use std::path::Path;

use duckdb::Connection;
use geo::polygon;
use liveability_config::RegionConfig;
use liveability_database::inputs::{self, PointInput};
use liveability_engine::pipeline::{export_region, load_null_summary};
use liveability_engine::{NullProgress, RunOptions, run_region, validate_region};
use liveability_indicator_models::ExclusionReason;
use liveability_network::straight_edge_geometry;
use liveability_region_models::{
    AnalysisPoint, DensityGridCell, NetworkEdge, NetworkNode, RawDestination,
};
use tempfile::TempDir;

const REGION_TOML: &str = r#"
region = "testville"

[paths]
input_db = "inputs.duckdb"
output_db = "results.duckdb"
output_dir = "output"

[network]
catchment_distance_m = 250.0
min_component_nodes = 5

[[categories]]
name = "supermarket"
domain = "food"
cutoff_m = 500.0
include = { kind = "equals", attribute = "shop", value = "supermarket" }
"#;

const BAKERY_TOML: &str = r#"
[[categories]]
name = "bakery"
domain = "food"
cutoff_m = 500.0
include = { kind = "equals", attribute = "shop", value = "bakery" }
"#;

fn temp_region(name: &str) -> TempDir {
    tempfile::Builder::new()
        .prefix(&format!("liveability_engine_{name}_"))
        .tempdir()
        .unwrap()
}

fn cell(id: i64, min_x: f64, max_x: f64, area_sqkm: f64, population: f64) -> DensityGridCell {
    DensityGridCell {
        id,
        geometry: polygon![
            (x: min_x, y: -100.0),
            (x: max_x, y: -100.0),
            (x: max_x, y: 100.0),
            (x: min_x, y: 100.0),
        ],
        area_sqkm,
        population,
        intersections: population / 10.0,
    }
}

/// A 700 m street with a supermarket at its west end, plus a two-node
/// island far to the east.
///
/// Point 1 (A) sits 100 m from the supermarket, point 2 (B) 600 m, and
/// point 3 (C) on the island. Cell 1 (population 100, 1 km²) covers the
/// west end of the street, cell 2 (population 300, 2 km²) the rest and the
/// island.
fn write_inputs(dir: &Path) {
    let mut nodes = (0..8)
        .map(|i| NetworkNode {
            id: i + 1,
            x: f64::from(u8::try_from(i).unwrap()) * 100.0,
            y: 0.0,
        })
        .collect::<Vec<_>>();
    nodes.push(NetworkNode {
        id: 20,
        x: 5_000.0,
        y: 0.0,
    });
    nodes.push(NetworkNode {
        id: 21,
        x: 5_100.0,
        y: 0.0,
    });

    let mut edges = nodes[..8]
        .windows(2)
        .map(|pair| NetworkEdge {
            id: pair[0].id,
            from: pair[0].id,
            to: pair[1].id,
            length_m: 100.0,
            geometry: straight_edge_geometry(&pair[0], &pair[1]),
        })
        .collect::<Vec<_>>();
    edges.push(NetworkEdge {
        id: 20,
        from: 20,
        to: 21,
        length_m: 100.0,
        geometry: straight_edge_geometry(&nodes[8], &nodes[9]),
    });

    let destinations = vec![
        RawDestination {
            source_id: "osm:1".to_string(),
            x: 0.0,
            y: 0.0,
            attributes: BTreeMap::from([("shop".to_string(), "supermarket".to_string())]),
        },
        RawDestination {
            source_id: "osm:2".to_string(),
            x: 300.0,
            y: 0.0,
            attributes: BTreeMap::from([("shop".to_string(), "bakery".to_string())]),
        },
    ];

    let points = [(1, 100.0, 0.0), (2, 600.0, 0.0), (3, 5_000.0, 0.0)]
        .into_iter()
        .map(|(id, x, y)| PointInput {
            point: AnalysisPoint::new(id, x, y),
            node_hint: None,
        })
        .collect::<Vec<_>>();

    let conn = Connection::open(dir.join("inputs.duckdb")).unwrap();
    inputs::create_schema(&conn).unwrap();
    inputs::insert_nodes(&conn, &nodes).unwrap();
    inputs::insert_edges(&conn, &edges).unwrap();
    inputs::insert_grid_cells(
        &conn,
        &[cell(1, -50.0, 350.0, 1.0, 100.0), cell(2, 350.0, 6_000.0, 2.0, 300.0)],
    )
    .unwrap();
    inputs::insert_destinations(&conn, &destinations).unwrap();
    inputs::insert_points(&conn, &points).unwrap();
}

fn load_config(dir: &Path, workers: usize) -> RegionConfig {
    load_config_with(dir, workers, "")
}

fn load_config_with(dir: &Path, workers: usize, extra_categories: &str) -> RegionConfig {
    let toml = format!(
        "{REGION_TOML}{extra_categories}\n[execution]\nworkers = {workers}\nbatch_size = 2\n"
    );
    let path = dir.join("region.toml");
    std::fs::write(&path, toml).unwrap();
    RegionConfig::load(&path).unwrap()
}

fn indicator(conn: &Connection, point_id: i64, column: &str) -> Option<f64> {
    conn.query_row(
        &format!("SELECT {column} FROM point_indicators WHERE point_id = ?"),
        [point_id],
        |row| row.get(0),
    )
    .unwrap()
}

fn grid_value(conn: &Connection, grid_id: i64, column: &str) -> Option<f64> {
    conn.query_row(
        &format!("SELECT {column} FROM grid_summary WHERE grid_id = ?"),
        [grid_id],
        |row| row.get(0),
    )
    .unwrap()
}

fn count_rows(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        .unwrap()
}

fn assert_close(actual: Option<f64>, expected: f64) {
    let actual = actual.unwrap();
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

#[test]
fn three_points_two_cells_one_category() {
    let tmp = temp_region("scenario");
    let dir = tmp.path();
    write_inputs(dir);
    let config = load_config(dir, 2);

    let report = run_region(&config, RunOptions::default(), &NullProgress).unwrap();
    assert_eq!(report.total_points, 3);
    assert_eq!(report.evaluation.written, 3);
    assert_eq!(
        report.evaluation.tally.excluded,
        BTreeMap::from([(ExclusionReason::UndersizedIsland, 1)])
    );
    assert_eq!(report.exported.len(), 6);

    let conn = Connection::open(&config.paths.output_db).unwrap();

    // Access does not depend on the catchment, so the island point still
    // gets a measured zero rather than a null.
    assert_close(indicator(&conn, 1, "access_supermarket"), 1.0);
    assert_close(indicator(&conn, 2, "access_supermarket"), 0.0);
    assert_close(indicator(&conn, 3, "access_supermarket"), 0.0);
    assert_close(indicator(&conn, 1, "dist_supermarket"), 100.0);
    assert_close(indicator(&conn, 2, "dist_supermarket"), 600.0);

    assert_close(indicator(&conn, 1, "local_pop_density"), 100.0);
    assert_close(indicator(&conn, 2, "local_pop_density"), 150.0);
    assert_eq!(indicator(&conn, 3, "local_pop_density"), None);
    assert_eq!(indicator(&conn, 3, "walkability"), None);

    let exclusion: Option<String> = conn
        .query_row(
            "SELECT exclusion FROM point_indicators WHERE point_id = 3",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exclusion.as_deref(), Some("undersized_island"));

    // Cell 2 holds B and C; C's null density is skipped, not averaged in
    // as zero.
    assert_close(grid_value(&conn, 1, "access_supermarket"), 1.0);
    assert_close(grid_value(&conn, 2, "access_supermarket"), 0.0);
    assert_close(grid_value(&conn, 2, "local_pop_density"), 150.0);

    let (city_access, city_density): (Option<f64>, Option<f64>) = conn
        .query_row(
            "SELECT access_supermarket, local_pop_density FROM city_summary WHERE region = 'testville'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_close(city_access, 0.25);
    assert_close(city_density, 137.5);
    drop(conn);

    let nulls = load_null_summary(&config).unwrap();
    assert_eq!(nulls.total_points, 3);
    assert_eq!(nulls.by_reason.get(&ExclusionReason::UndersizedIsland), Some(&1));
    assert_eq!(nulls.by_indicator.get("local_pop_density"), Some(&1));
    assert_eq!(nulls.by_indicator.get("access_supermarket"), Some(&0));
}

#[test]
fn rerun_is_idempotent() {
    let tmp = temp_region("rerun");
    let dir = tmp.path();
    write_inputs(dir);
    let config = load_config(dir, 2);

    run_region(&config, RunOptions::default(), &NullProgress).unwrap();
    let first = std::fs::read_to_string(dir.join("output/point_indicators.csv")).unwrap();
    let first_city = std::fs::read_to_string(dir.join("output/city_summary.csv")).unwrap();

    let report = run_region(&config, RunOptions::default(), &NullProgress).unwrap();
    assert_eq!(report.evaluation.skipped, 3);
    assert_eq!(report.evaluation.written, 0);

    let second = std::fs::read_to_string(dir.join("output/point_indicators.csv")).unwrap();
    let second_city = std::fs::read_to_string(dir.join("output/city_summary.csv")).unwrap();
    assert_eq!(first, second);
    assert_eq!(first_city, second_city);

    let conn = Connection::open(&config.paths.output_db).unwrap();
    assert_eq!(count_rows(&conn, "point_raw"), 3);
}

#[test]
fn results_do_not_depend_on_worker_count() {
    let mut exports = Vec::new();
    for workers in [1, 4] {
        let tmp = temp_region(&format!("workers_{workers}"));
        let dir = tmp.path();
        write_inputs(dir);
        let config = load_config(dir, workers);

        run_region(&config, RunOptions { export: false }, &NullProgress).unwrap();
        let written = export_region(&config).unwrap();
        assert!(written.iter().all(|p| p.starts_with(dir.join("output"))));

        exports.push(std::fs::read_to_string(dir.join("output/point_indicators.csv")).unwrap());
    }
    assert_eq!(exports[0], exports[1]);
}

#[test]
fn validate_reports_inputs_without_writing_results() {
    let tmp = temp_region("validate");
    let dir = tmp.path();
    write_inputs(dir);
    let config = load_config(dir, 1);

    let report = validate_region(&config).unwrap();
    assert_eq!(report.nodes, 10);
    assert_eq!(report.edges, 8);
    assert_eq!(report.grid_cells, 2);
    assert_eq!(report.points, 3);
    assert_eq!(report.unassigned_points, 0);
    assert!(report.unavailable_categories.is_empty());
    assert!(!config.paths.output_db.exists());
}

#[test]
fn missing_inputs_are_reported_before_computation() {
    let tmp = temp_region("missing");
    let config = load_config(tmp.path(), 1);

    let err = run_region(&config, RunOptions::default(), &NullProgress).unwrap_err();
    assert!(err.to_string().contains("inputs.duckdb"), "{err}");
    assert!(!config.paths.output_db.exists());
}

#[test]
fn removed_point_leaves_every_output() {
    let tmp = temp_region("removed");
    let dir = tmp.path();
    write_inputs(dir);
    let config = load_config(dir, 2);
    run_region(&config, RunOptions::default(), &NullProgress).unwrap();

    let inputs = Connection::open(dir.join("inputs.duckdb")).unwrap();
    inputs
        .execute("DELETE FROM analysis_points WHERE point_id = 3", [])
        .unwrap();
    drop(inputs);

    let report = run_region(&config, RunOptions::default(), &NullProgress).unwrap();
    assert_eq!(report.total_points, 2);
    assert_eq!(report.nulls.total_points, 2);
    assert!(report.nulls.by_reason.is_empty());

    let conn = Connection::open(&config.paths.output_db).unwrap();
    assert_eq!(count_rows(&conn, "point_indicators"), 2);
    assert_eq!(count_rows(&conn, "point_null_tally"), 2);
    let exclusions: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM point_indicators WHERE exclusion IS NOT NULL",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exclusions, 0);
    drop(conn);

    let csv = std::fs::read_to_string(dir.join("output/point_indicators.csv")).unwrap();
    assert_eq!(csv.lines().count(), 3);
}

#[test]
fn added_category_recomputes_checkpointed_points() {
    let tmp = temp_region("added_category");
    let dir = tmp.path();
    write_inputs(dir);
    run_region(&load_config(dir, 2), RunOptions::default(), &NullProgress).unwrap();

    let config = load_config_with(dir, 2, BAKERY_TOML);
    let report = run_region(&config, RunOptions::default(), &NullProgress).unwrap();
    assert_eq!(report.evaluation.skipped, 0);
    assert_eq!(report.evaluation.written, 3);

    let conn = Connection::open(&config.paths.output_db).unwrap();
    assert_close(indicator(&conn, 1, "access_bakery"), 1.0);
    assert_close(indicator(&conn, 1, "dist_bakery"), 200.0);
    assert_close(indicator(&conn, 1, "daily_living"), 2.0);
    assert_close(indicator(&conn, 2, "daily_living"), 1.0);
}

#[test]
fn failed_batch_still_writes_null_summary() {
    let tmp = temp_region("failed_batch");
    let dir = tmp.path();
    write_inputs(dir);
    let config = load_config(dir, 2);

    // Point 3 lands in the second batch; rejecting it fails that batch
    // after the first has been committed.
    let conn = Connection::open(&config.paths.output_db).unwrap();
    conn.execute_batch(
        "CREATE TABLE point_raw (
            point_id BIGINT NOT NULL PRIMARY KEY CHECK (point_id <> 3),
            node_id BIGINT,
            grid_id BIGINT,
            exclusion TEXT,
            population_density DOUBLE,
            intersection_density DOUBLE,
            catchment_cells TEXT NOT NULL
        );",
    )
    .unwrap();
    drop(conn);

    assert!(run_region(&config, RunOptions::default(), &NullProgress).is_err());

    let nulls = load_null_summary(&config).unwrap();
    assert_eq!(nulls.total_points, 2);
    assert_eq!(nulls.by_indicator.get("access_supermarket"), Some(&0));
    assert!(nulls.by_reason.is_empty());
}
