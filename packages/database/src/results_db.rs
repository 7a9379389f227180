//! Results `DuckDB` for one region.
//!
//! `point_raw` and `point_access` are the resumable checkpoint: rows are
//! inserted once per point with `ON CONFLICT DO NOTHING` and never
//! rewritten. The checkpoint is only valid for the config signature stored
//! in `_meta`; [`reconcile_checkpoint`] clears it when the signature
//! changes. The indicator, schema, null summary, grid and city tables are
//! derived from the checkpoint on every run and replaced wholesale.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use duckdb::Connection;
use duckdb::types::Value;
use liveability_indicator_models::{
    AccessibilityResult, CatchmentResult, CitySummary, CompositeIndicatorRecord, ExclusionReason,
    GridSummary, IndicatorSchema, NullSummary, RawPointResult,
};
use liveability_region_models::PointId;

use crate::ident::{SqlIdent, idents};
use crate::inputs::insert_chunked;
use crate::{DbError, in_transaction, table_columns};

/// Upper bound on bound parameters per wide-table INSERT.
const WIDE_PARAM_BUDGET: usize = 30_000;

const CHECKPOINT_SIGNATURE_KEY: &str = "checkpoint_signature";

/// Opens (or creates) the results database and ensures the fixed tables
/// exist.
///
/// # Errors
///
/// Returns [`DbError`] if the connection or schema creation fails.
pub fn open(path: &Path) -> Result<Connection, DbError> {
    if let Some(parent) = path.parent() {
        crate::paths::ensure_dir(parent)?;
    }

    let conn = Connection::open(path)?;
    conn.execute_batch(
        "SET threads = 4;
         SET memory_limit = '1GB';",
    )?;
    create_schema(&conn)?;

    Ok(conn)
}

/// Creates the fixed results tables.
///
/// # Errors
///
/// Returns [`DbError`] if schema creation fails.
pub fn create_schema(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS point_raw (
            point_id BIGINT NOT NULL PRIMARY KEY,
            node_id BIGINT,
            grid_id BIGINT,
            exclusion TEXT,
            population_density DOUBLE,
            intersection_density DOUBLE,
            catchment_cells TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS point_access (
            point_id BIGINT NOT NULL,
            category TEXT NOT NULL,
            available BOOLEAN NOT NULL,
            distances_json TEXT NOT NULL,
            PRIMARY KEY (point_id, category)
        );

        CREATE TABLE IF NOT EXISTS null_summary (
            scope TEXT NOT NULL,
            name TEXT NOT NULL,
            null_count BIGINT NOT NULL,
            total_points BIGINT NOT NULL,
            PRIMARY KEY (scope, name)
        );

        CREATE TABLE IF NOT EXISTS indicator_schema (
            position INTEGER NOT NULL PRIMARY KEY,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            catchment_dependent BOOLEAN NOT NULL
        );

        CREATE TABLE IF NOT EXISTS point_null_tally (
            point_id BIGINT NOT NULL PRIMARY KEY,
            null_tally INTEGER NOT NULL,
            exclusion TEXT
        );

        CREATE TABLE IF NOT EXISTS _meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )?;
    Ok(())
}

/// Point ids already in the checkpoint.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn completed_point_ids(conn: &Connection) -> Result<BTreeSet<PointId>, DbError> {
    let mut stmt = conn.prepare("SELECT point_id FROM point_raw")?;
    let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
    Ok(rows.collect::<Result<BTreeSet<_>, _>>()?)
}

/// Makes the checkpoint consistent with the config it is resumed under.
///
/// When the stored signature differs from `signature`, or checkpoint rows
/// exist without one, every checkpoint row is deleted so all points are
/// recomputed. The new signature is then stored. Returns whether the
/// checkpoint was cleared.
///
/// # Errors
///
/// Returns [`DbError`] if a query or the clearing transaction fails.
pub fn reconcile_checkpoint(conn: &Connection, signature: &str) -> Result<bool, DbError> {
    let stored = get_meta(conn, CHECKPOINT_SIGNATURE_KEY)?;
    let rows: i64 = conn.query_row("SELECT COUNT(*) FROM point_raw", [], |row| row.get(0))?;

    let cleared = rows > 0 && stored.as_deref() != Some(signature);
    in_transaction(conn, |conn| {
        if cleared {
            log::warn!(
                "Checkpoint of {rows} points was computed under different network or category settings, recomputing every point"
            );
            conn.execute_batch("DELETE FROM point_access; DELETE FROM point_raw;")?;
        }
        set_meta(conn, CHECKPOINT_SIGNATURE_KEY, signature)
    })?;

    Ok(cleared)
}

/// Writes one batch of raw results in a single transaction.
///
/// Points already present are left untouched. Returns the number of new
/// `point_raw` rows.
///
/// # Errors
///
/// Returns [`DbError`] if any database operation fails; the batch is then
/// rolled back as a whole.
pub fn insert_raw_results(conn: &Connection, results: &[RawPointResult]) -> Result<u64, DbError> {
    if results.is_empty() {
        return Ok(0);
    }

    let access_rows = results
        .iter()
        .flat_map(|r| r.access.iter().map(move |(category, access)| (r.point_id, category, access)))
        .collect::<Vec<_>>();

    in_transaction(conn, |conn| {
        let inserted = insert_chunked(
            conn,
            "INSERT INTO point_raw (point_id, node_id, grid_id, exclusion,
                population_density, intersection_density, catchment_cells)",
            "ON CONFLICT DO NOTHING",
            7,
            results,
            |stmt, idx, r| {
                stmt.raw_bind_parameter(idx, r.point_id)?;
                stmt.raw_bind_parameter(idx + 1, r.node_id)?;
                stmt.raw_bind_parameter(idx + 2, r.grid_id)?;
                stmt.raw_bind_parameter(idx + 3, r.exclusion.as_ref().map(AsRef::<str>::as_ref))?;
                stmt.raw_bind_parameter(idx + 4, r.catchment.population_density)?;
                stmt.raw_bind_parameter(idx + 5, r.catchment.intersection_density)?;
                stmt.raw_bind_parameter(idx + 6, serde_json::to_string(&r.catchment.cells)?)?;
                Ok(())
            },
        )?;

        insert_chunked(
            conn,
            "INSERT INTO point_access (point_id, category, available, distances_json)",
            "ON CONFLICT DO NOTHING",
            4,
            &access_rows,
            |stmt, idx, (point_id, category, access)| {
                let distances: &[f64] = match access {
                    AccessibilityResult::Unavailable => &[],
                    AccessibilityResult::Reached(d) => d,
                };
                stmt.raw_bind_parameter(idx, *point_id)?;
                stmt.raw_bind_parameter(idx + 1, category.as_str())?;
                stmt.raw_bind_parameter(idx + 2, access.is_available())?;
                stmt.raw_bind_parameter(idx + 3, serde_json::to_string(distances)?)?;
                Ok(())
            },
        )?;

        Ok(inserted)
    })
}

/// Reads the whole checkpoint, ascending by point id.
///
/// # Errors
///
/// Returns [`DbError`] if a query fails or a stored value cannot be
/// decoded.
pub fn load_raw_results(conn: &Connection) -> Result<Vec<RawPointResult>, DbError> {
    let mut access: BTreeMap<PointId, BTreeMap<String, AccessibilityResult>> = BTreeMap::new();
    {
        let mut stmt = conn.prepare(
            "SELECT point_id, category, available, distances_json
             FROM point_access ORDER BY point_id, category",
        )?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let point_id: i64 = row.get(0)?;
            let category: String = row.get(1)?;
            let available: bool = row.get(2)?;
            let json: String = row.get(3)?;
            let result = if available {
                AccessibilityResult::Reached(serde_json::from_str(&json)?)
            } else {
                AccessibilityResult::Unavailable
            };
            access.entry(point_id).or_default().insert(category, result);
        }
    }

    let mut stmt = conn.prepare(
        "SELECT point_id, node_id, grid_id, exclusion, population_density,
                intersection_density, catchment_cells
         FROM point_raw ORDER BY point_id",
    )?;
    let mut rows = stmt.query([])?;
    let mut results = Vec::new();

    while let Some(row) = rows.next()? {
        let point_id: i64 = row.get(0)?;
        let exclusion: Option<String> = row.get(3)?;
        let cells: String = row.get(6)?;

        results.push(RawPointResult {
            point_id,
            node_id: row.get(1)?,
            grid_id: row.get(2)?,
            exclusion: exclusion.as_deref().map(parse_reason).transpose()?,
            catchment: CatchmentResult {
                cells: serde_json::from_str(&cells)?,
                population_density: row.get(4)?,
                intersection_density: row.get(5)?,
            },
            access: access.remove(&point_id).unwrap_or_default(),
        });
    }

    Ok(results)
}

fn parse_reason(code: &str) -> Result<ExclusionReason, DbError> {
    code.parse().map_err(|_| DbError::Conversion {
        message: format!("unknown exclusion reason '{code}'"),
    })
}

/// Fixed leading columns of a derived wide table.
struct WideTable<'a> {
    name: &'a str,
    /// `(column, SQL type)` pairs preceding the indicator columns.
    keys: &'a [(&'a str, &'a str)],
    primary_key: &'a str,
}

const POINT_INDICATORS: WideTable<'static> = WideTable {
    name: "point_indicators",
    keys: &[
        ("point_id", "BIGINT NOT NULL"),
        ("grid_id", "BIGINT"),
        ("exclusion", "TEXT"),
        ("null_tally", "INTEGER NOT NULL"),
    ],
    primary_key: "point_id",
};

const GRID_SUMMARY: WideTable<'static> = WideTable {
    name: "grid_summary",
    keys: &[
        ("grid_id", "BIGINT NOT NULL"),
        ("population", "DOUBLE NOT NULL"),
        ("point_count", "BIGINT NOT NULL"),
    ],
    primary_key: "grid_id",
};

const CITY_SUMMARY: WideTable<'static> = WideTable {
    name: "city_summary",
    keys: &[
        ("region", "TEXT NOT NULL"),
        ("population", "DOUBLE NOT NULL"),
        ("cell_count", "BIGINT NOT NULL"),
        ("point_count", "BIGINT NOT NULL"),
    ],
    primary_key: "region",
};

/// Creates the table for the current indicator layout, dropping it first
/// if an earlier run left a different layout, and empties it.
fn reset_wide_table(
    conn: &Connection,
    table: &WideTable<'_>,
    indicators: &[SqlIdent],
) -> Result<(), DbError> {
    let expected = table
        .keys
        .iter()
        .map(|(name, _)| (*name).to_string())
        .chain(indicators.iter().map(ToString::to_string))
        .collect::<Vec<_>>();

    let existing = table_columns(conn, table.name)?;
    if !existing.is_empty() && existing != expected {
        log::info!("Indicator layout of {} changed, recreating table", table.name);
        conn.execute_batch(&format!("DROP TABLE {}", table.name))?;
    }

    let mut ddl = format!("CREATE TABLE IF NOT EXISTS {} (", table.name);
    for (name, sql_type) in table.keys {
        ddl.push_str(&format!("{name} {sql_type}, "));
    }
    for ident in indicators {
        ddl.push_str(&format!("{} DOUBLE, ", ident.quoted()));
    }
    ddl.push_str(&format!("PRIMARY KEY ({}))", table.primary_key));
    conn.execute_batch(&ddl)?;
    conn.execute_batch(&format!("DELETE FROM {}", table.name))?;
    Ok(())
}

/// Inserts rows of `(key values, indicator values)` into a wide table.
fn insert_wide_rows(
    conn: &Connection,
    table: &WideTable<'_>,
    indicators: &[SqlIdent],
    rows: &[(Vec<Value>, &BTreeMap<String, Option<f64>>)],
) -> Result<u64, DbError> {
    let columns = table
        .keys
        .iter()
        .map(|(name, _)| (*name).to_string())
        .chain(indicators.iter().map(SqlIdent::quoted))
        .collect::<Vec<_>>();
    let prefix = format!("INSERT INTO {} ({})", table.name, columns.join(", "));
    let placeholders = format!("({})", vec!["?"; columns.len()].join(", "));
    let rows_per_chunk = (WIDE_PARAM_BUDGET / columns.len()).max(1);

    let mut total = 0u64;
    for chunk in rows.chunks(rows_per_chunk) {
        let mut sql = format!("{prefix} VALUES ");
        for i in 0..chunk.len() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push_str(&placeholders);
        }

        let mut stmt = conn.prepare(&sql)?;
        let mut param_idx = 1usize;
        for (keys, values) in chunk {
            for key in keys {
                stmt.raw_bind_parameter(param_idx, key)?;
                param_idx += 1;
            }
            for ident in indicators {
                let value = values.get(ident.as_str()).copied().flatten();
                stmt.raw_bind_parameter(param_idx, value)?;
                param_idx += 1;
            }
        }
        total += u64::try_from(stmt.raw_execute()?).unwrap_or(0);
    }

    Ok(total)
}

fn count_value(count: u64) -> Value {
    Value::BigInt(i64::try_from(count).unwrap_or(i64::MAX))
}

fn optional_id(id: Option<i64>) -> Value {
    id.map_or(Value::Null, Value::BigInt)
}

/// Replaces the per-point indicator table, its column schema and the
/// per-point null tallies. Points absent from `records` are dropped.
///
/// # Errors
///
/// Returns [`DbError::InvalidIdentifier`] if a column name is not a safe
/// identifier, or [`DbError`] if a write fails.
pub fn write_indicators(
    conn: &Connection,
    schema: &IndicatorSchema,
    records: &[CompositeIndicatorRecord],
) -> Result<u64, DbError> {
    let indicators = idents(schema.names())?;

    in_transaction(conn, |conn| {
        reset_wide_table(conn, &POINT_INDICATORS, &indicators)?;
        let rows = records
            .iter()
            .map(|r| {
                let keys = vec![
                    Value::BigInt(r.point_id),
                    optional_id(r.grid_id),
                    r.exclusion
                        .map_or(Value::Null, |e| Value::Text(e.to_string())),
                    Value::Int(i32::try_from(r.null_tally).unwrap_or(i32::MAX)),
                ];
                (keys, &r.values)
            })
            .collect::<Vec<_>>();
        let written = insert_wide_rows(conn, &POINT_INDICATORS, &indicators, &rows)?;

        conn.execute("DELETE FROM indicator_schema", [])?;
        let positions = schema.columns.iter().enumerate().collect::<Vec<_>>();
        insert_chunked(
            conn,
            "INSERT INTO indicator_schema (position, name, kind, catchment_dependent)",
            "",
            4,
            &positions,
            |stmt, idx, (position, column)| {
                stmt.raw_bind_parameter(idx, i64::try_from(*position).unwrap_or(i64::MAX))?;
                stmt.raw_bind_parameter(idx + 1, column.name.as_str())?;
                stmt.raw_bind_parameter(idx + 2, AsRef::<str>::as_ref(&column.kind))?;
                stmt.raw_bind_parameter(idx + 3, column.catchment_dependent)?;
                Ok(())
            },
        )?;

        conn.execute("DELETE FROM point_null_tally", [])?;
        insert_chunked(
            conn,
            "INSERT INTO point_null_tally (point_id, null_tally, exclusion)",
            "",
            3,
            records,
            |stmt, idx, r| {
                stmt.raw_bind_parameter(idx, r.point_id)?;
                stmt.raw_bind_parameter(idx + 1, r.null_tally)?;
                stmt.raw_bind_parameter(idx + 2, r.exclusion.as_ref().map(AsRef::<str>::as_ref))?;
                Ok(())
            },
        )?;

        Ok(written)
    })
}

/// Replaces the null summary.
///
/// # Errors
///
/// Returns [`DbError`] if a write fails.
pub fn write_null_summary(conn: &Connection, summary: &NullSummary) -> Result<(), DbError> {
    let mut rows: Vec<(&str, String, u64)> = Vec::new();
    for (indicator, count) in &summary.by_indicator {
        rows.push(("indicator", indicator.clone(), *count));
    }
    for (reason, count) in &summary.by_reason {
        rows.push(("exclusion", reason.as_ref().to_string(), *count));
    }
    for category in &summary.unavailable_categories {
        rows.push(("unavailable_category", category.clone(), summary.total_points));
    }
    let total = i64::try_from(summary.total_points).unwrap_or(i64::MAX);

    in_transaction(conn, |conn| {
        conn.execute("DELETE FROM null_summary", [])?;
        insert_chunked(
            conn,
            "INSERT INTO null_summary (scope, name, null_count, total_points)",
            "",
            4,
            &rows,
            |stmt, idx, (scope, name, count)| {
                stmt.raw_bind_parameter(idx, *scope)?;
                stmt.raw_bind_parameter(idx + 1, name.as_str())?;
                stmt.raw_bind_parameter(idx + 2, i64::try_from(*count).unwrap_or(i64::MAX))?;
                stmt.raw_bind_parameter(idx + 3, total)?;
                Ok(())
            },
        )?;
        Ok(())
    })
}

/// Reads the null summary back.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or a reason code is unknown.
pub fn load_null_summary(conn: &Connection) -> Result<NullSummary, DbError> {
    let mut stmt = conn.prepare(
        "SELECT scope, name, null_count, total_points FROM null_summary ORDER BY scope, name",
    )?;
    let mut rows = stmt.query([])?;
    let mut summary = NullSummary::default();

    while let Some(row) = rows.next()? {
        let scope: String = row.get(0)?;
        let name: String = row.get(1)?;
        let count = u64::try_from(row.get::<_, i64>(2)?).unwrap_or(0);
        summary.total_points = u64::try_from(row.get::<_, i64>(3)?).unwrap_or(0);

        match scope.as_str() {
            "indicator" => {
                summary.by_indicator.insert(name, count);
            }
            "exclusion" => {
                summary.by_reason.insert(parse_reason(&name)?, count);
            }
            "unavailable_category" => summary.unavailable_categories.push(name),
            other => log::warn!("Ignoring null summary row with unknown scope '{other}'"),
        }
    }

    Ok(summary)
}

/// Replaces the grid summaries.
///
/// # Errors
///
/// Returns [`DbError`] if a column name is invalid or a write fails.
pub fn write_grid_summaries(
    conn: &Connection,
    schema: &IndicatorSchema,
    grids: &[GridSummary],
) -> Result<u64, DbError> {
    let indicators = idents(schema.names())?;
    in_transaction(conn, |conn| {
        reset_wide_table(conn, &GRID_SUMMARY, &indicators)?;
        let rows = grids
            .iter()
            .map(|g| {
                let keys = vec![
                    Value::BigInt(g.grid_id),
                    Value::Double(g.population),
                    count_value(g.point_count),
                ];
                (keys, &g.values)
            })
            .collect::<Vec<_>>();
        insert_wide_rows(conn, &GRID_SUMMARY, &indicators, &rows)
    })
}

/// Replaces the city summary.
///
/// # Errors
///
/// Returns [`DbError`] if a column name is invalid or a write fails.
pub fn write_city_summary(
    conn: &Connection,
    schema: &IndicatorSchema,
    city: &CitySummary,
) -> Result<(), DbError> {
    let indicators = idents(schema.names())?;
    in_transaction(conn, |conn| {
        reset_wide_table(conn, &CITY_SUMMARY, &indicators)?;
        let keys = vec![
            Value::Text(city.region.clone()),
            Value::Double(city.population),
            count_value(city.cell_count),
            count_value(city.point_count),
        ];
        insert_wide_rows(conn, &CITY_SUMMARY, &indicators, &[(keys, &city.values)])?;
        Ok(())
    })
}

/// Gets a metadata value from the `_meta` table.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>, DbError> {
    let mut stmt = conn.prepare("SELECT value FROM _meta WHERE key = ?")?;
    let result = stmt.query_row([key], |row| row.get(0));
    match result {
        Ok(v) => Ok(Some(v)),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(DbError::DuckDb(e)),
    }
}

/// Sets a metadata value in the `_meta` table.
///
/// # Errors
///
/// Returns [`DbError`] if the upsert fails.
pub fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<(), DbError> {
    conn.execute(
        "INSERT INTO _meta (key, value) VALUES (?, ?)
         ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
        duckdb::params![key, value],
    )?;
    Ok(())
}

/// Records the region and completion time of a finished run.
///
/// # Errors
///
/// Returns [`DbError`] if the metadata update fails.
pub fn record_run(conn: &Connection, region: &str, point_count: u64) -> Result<(), DbError> {
    set_meta(conn, "region", region)?;
    set_meta(conn, "point_count", &point_count.to_string())?;
    set_meta(conn, "completed_at", &chrono::Utc::now().to_rfc3339())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use liveability_indicator_models::{IndicatorColumn, IndicatorKind};

    use super::*;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        create_schema(&conn).unwrap();
        conn
    }

    fn raw(point_id: PointId, exclusion: Option<ExclusionReason>) -> RawPointResult {
        RawPointResult {
            point_id,
            node_id: Some(point_id * 10),
            grid_id: Some(1),
            exclusion,
            catchment: CatchmentResult {
                cells: vec![1, 2],
                population_density: exclusion.is_none().then_some(150.0),
                intersection_density: exclusion.is_none().then_some(12.5),
            },
            access: BTreeMap::from([
                (
                    "shop".to_string(),
                    AccessibilityResult::Reached(vec![120.0, 480.5]),
                ),
                ("clinic".to_string(), AccessibilityResult::Unavailable),
            ]),
        }
    }

    #[test]
    fn raw_results_round_trip_and_never_overwrite() {
        let conn = conn();
        let first = vec![raw(1, None), raw(2, Some(ExclusionReason::NoNetwork))];
        assert_eq!(insert_raw_results(&conn, &first).unwrap(), 2);

        let mut changed = raw(1, Some(ExclusionReason::Unassigned));
        changed.node_id = None;
        assert_eq!(insert_raw_results(&conn, &[changed, raw(3, None)]).unwrap(), 1);

        let loaded = load_raw_results(&conn).unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0], first[0]);
        assert_eq!(loaded[1].exclusion, Some(ExclusionReason::NoNetwork));
        assert_eq!(
            completed_point_ids(&conn).unwrap(),
            BTreeSet::from([1, 2, 3])
        );
    }

    fn schema(names: &[&str]) -> IndicatorSchema {
        IndicatorSchema {
            columns: names
                .iter()
                .map(|name| IndicatorColumn {
                    name: (*name).to_string(),
                    kind: IndicatorKind::Binary,
                    catchment_dependent: false,
                })
                .collect(),
        }
    }

    fn record(point_id: PointId, value: Option<f64>) -> CompositeIndicatorRecord {
        CompositeIndicatorRecord {
            point_id,
            grid_id: Some(1),
            exclusion: None,
            values: BTreeMap::from([("access_shop".to_string(), value)]),
            null_tally: u32::from(value.is_none()),
        }
    }

    #[test]
    fn reconcile_keeps_checkpoint_for_same_signature() {
        let conn = conn();
        assert!(!reconcile_checkpoint(&conn, "a").unwrap());
        insert_raw_results(&conn, &[raw(1, None), raw(2, None)]).unwrap();

        assert!(!reconcile_checkpoint(&conn, "a").unwrap());
        assert_eq!(completed_point_ids(&conn).unwrap(), BTreeSet::from([1, 2]));
    }

    #[test]
    fn reconcile_clears_checkpoint_on_signature_change() {
        let conn = conn();
        reconcile_checkpoint(&conn, "a").unwrap();
        insert_raw_results(&conn, &[raw(1, None)]).unwrap();

        assert!(reconcile_checkpoint(&conn, "b").unwrap());
        assert!(completed_point_ids(&conn).unwrap().is_empty());
        assert!(load_raw_results(&conn).unwrap().is_empty());
        assert_eq!(
            get_meta(&conn, CHECKPOINT_SIGNATURE_KEY).unwrap().as_deref(),
            Some("b")
        );
    }

    #[test]
    fn reconcile_clears_unsigned_checkpoint() {
        let conn = conn();
        insert_raw_results(&conn, &[raw(1, None)]).unwrap();
        assert!(reconcile_checkpoint(&conn, "a").unwrap());
        assert!(completed_point_ids(&conn).unwrap().is_empty());
    }

    #[test]
    fn indicator_table_is_rewritten_idempotently() {
        let conn = conn();
        let schema = schema(&["access_shop"]);
        let records = vec![record(1, Some(1.0)), record(2, None)];

        write_indicators(&conn, &schema, &records).unwrap();
        write_indicators(&conn, &schema, &records).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM point_indicators", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);
        let value: Option<f64> = conn
            .query_row(
                "SELECT access_shop FROM point_indicators WHERE point_id = 2",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(value, None);
    }

    #[test]
    fn rewriting_indicators_drops_points_no_longer_present() {
        let conn = conn();
        let schema = schema(&["access_shop"]);
        write_indicators(&conn, &schema, &[record(1, Some(1.0)), record(2, None)]).unwrap();
        write_indicators(&conn, &schema, &[record(1, Some(0.0))]).unwrap();

        for table in ["point_indicators", "point_null_tally"] {
            let ids = conn
                .prepare(&format!("SELECT point_id FROM {table} ORDER BY point_id"))
                .unwrap()
                .query_map([], |row| row.get::<_, i64>(0))
                .unwrap()
                .collect::<Result<Vec<_>, _>>()
                .unwrap();
            assert_eq!(ids, vec![1], "{table}");
        }
    }

    #[test]
    fn indicator_schema_records_column_kinds() {
        let conn = conn();
        let mut schema = schema(&["access_shop", "walkability"]);
        schema.columns[1].kind = IndicatorKind::Composite;
        schema.columns[1].catchment_dependent = true;
        write_indicators(&conn, &schema, &[record(1, Some(1.0))]).unwrap();

        let rows = conn
            .prepare("SELECT name, kind, catchment_dependent FROM indicator_schema ORDER BY position")
            .unwrap()
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, bool>(2)?,
                ))
            })
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(
            rows,
            vec![
                ("access_shop".to_string(), "binary".to_string(), false),
                ("walkability".to_string(), "composite".to_string(), true),
            ]
        );
    }

    #[test]
    fn indicator_table_follows_layout_changes() {
        let conn = conn();
        write_indicators(&conn, &schema(&["access_shop"]), &[record(1, Some(1.0))]).unwrap();
        write_indicators(
            &conn,
            &schema(&["access_shop", "access_shop_soft"]),
            &[record(1, Some(1.0))],
        )
        .unwrap();

        assert_eq!(
            table_columns(&conn, "point_indicators").unwrap(),
            vec![
                "point_id",
                "grid_id",
                "exclusion",
                "null_tally",
                "access_shop",
                "access_shop_soft"
            ]
        );
    }

    #[test]
    fn null_summary_round_trips() {
        let conn = conn();
        let summary = NullSummary {
            total_points: 3,
            by_indicator: BTreeMap::from([("access_shop".to_string(), 1)]),
            by_reason: BTreeMap::from([(ExclusionReason::UndersizedIsland, 1)]),
            unavailable_categories: vec!["clinic".to_string()],
        };
        write_null_summary(&conn, &summary).unwrap();
        write_null_summary(&conn, &summary).unwrap();

        assert_eq!(load_null_summary(&conn).unwrap(), summary);
    }

    #[test]
    fn grid_summaries_drop_cells_without_points() {
        let conn = conn();
        let schema = schema(&["access_shop"]);
        let grid = |grid_id| GridSummary {
            grid_id,
            population: 100.0,
            point_count: 1,
            values: BTreeMap::from([("access_shop".to_string(), Some(1.0))]),
        };
        write_grid_summaries(&conn, &schema, &[grid(1), grid(2)]).unwrap();
        write_grid_summaries(&conn, &schema, &[grid(2)]).unwrap();

        let ids = conn
            .prepare("SELECT grid_id FROM grid_summary")
            .unwrap()
            .query_map([], |row| row.get::<_, i64>(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(ids, vec![2]);
    }

    #[test]
    fn city_summary_is_keyed_by_region() {
        let conn = conn();
        let schema = schema(&["walkability"]);
        let mut city = CitySummary {
            region: "testville".to_string(),
            population: 4_000.0,
            cell_count: 2,
            point_count: 3,
            values: BTreeMap::from([("walkability".to_string(), Some(65.0))]),
        };
        write_city_summary(&conn, &schema, &city).unwrap();
        city.values.insert("walkability".to_string(), Some(66.0));
        write_city_summary(&conn, &schema, &city).unwrap();

        let value: f64 = conn
            .query_row("SELECT walkability FROM city_summary", [], |row| row.get(0))
            .unwrap();
        assert!((value - 66.0).abs() < 1e-12);

        city.region = "renamed".to_string();
        write_city_summary(&conn, &schema, &city).unwrap();
        let regions = conn
            .prepare("SELECT region FROM city_summary")
            .unwrap()
            .query_map([], |row| row.get::<_, String>(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(regions, vec!["renamed".to_string()]);
    }

    #[test]
    fn meta_values_upsert() {
        let conn = conn();
        assert_eq!(get_meta(&conn, "region").unwrap(), None);
        record_run(&conn, "testville", 3).unwrap();
        assert_eq!(get_meta(&conn, "region").unwrap().as_deref(), Some("testville"));
        assert_eq!(get_meta(&conn, "point_count").unwrap().as_deref(), Some("3"));
    }
}
