//! CSV export of the derived results tables.

use std::path::{Path, PathBuf};

use duckdb::Connection;
use duckdb::types::Value;

use crate::{DbError, table_columns};

/// Tables written by [`export_all`], in output order.
pub const EXPORT_TABLES: &[&str] = &[
    "point_indicators",
    "indicator_schema",
    "point_null_tally",
    "grid_summary",
    "city_summary",
    "null_summary",
];

/// Writes one table to a CSV file with a header row. Rows are ordered by
/// every column left to right so repeated exports are byte-identical.
///
/// Returns the number of data rows written.
///
/// # Errors
///
/// Returns [`DbError::DataAbsent`] if the table does not exist, or
/// [`DbError`] if the query or the file write fails.
pub fn export_table(conn: &Connection, table: &str, path: &Path) -> Result<u64, DbError> {
    let columns = table_columns(conn, table)?;
    if columns.is_empty() {
        return Err(DbError::DataAbsent {
            input: table.to_string(),
            reason: "table has not been written yet".to_string(),
        });
    }

    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(&columns)?;

    let mut stmt = conn.prepare(&format!("SELECT * FROM {table} ORDER BY ALL"))?;
    let mut rows = stmt.query([])?;
    let mut count = 0u64;

    while let Some(row) = rows.next()? {
        let mut record = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            record.push(format_value(&row.get::<_, Value>(i)?));
        }
        writer.write_record(&record)?;
        count += 1;
    }

    writer.flush()?;
    log::info!("Exported {count} rows of {table} to {}", path.display());
    Ok(count)
}

/// Exports every table in [`EXPORT_TABLES`] that exists into `dir` as
/// `<table>.csv`.
///
/// # Errors
///
/// Returns [`DbError`] if the directory cannot be created or an export
/// fails.
pub fn export_all(conn: &Connection, dir: &Path) -> Result<Vec<PathBuf>, DbError> {
    crate::paths::ensure_dir(dir)?;
    let mut written = Vec::new();

    for table in EXPORT_TABLES {
        if !crate::table_exists(conn, table)? {
            log::warn!("Skipping export of {table}: table does not exist");
            continue;
        }
        let path = dir.join(format!("{table}.csv"));
        export_table(conn, table, &path)?;
        written.push(path);
    }

    Ok(written)
}

/// Renders a cell; SQL NULL becomes an empty field.
fn format_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Boolean(b) => b.to_string(),
        Value::TinyInt(v) => v.to_string(),
        Value::SmallInt(v) => v.to_string(),
        Value::Int(v) => v.to_string(),
        Value::BigInt(v) => v.to_string(),
        Value::HugeInt(v) => v.to_string(),
        Value::UTinyInt(v) => v.to_string(),
        Value::USmallInt(v) => v.to_string(),
        Value::UInt(v) => v.to_string(),
        Value::UBigInt(v) => v.to_string(),
        Value::Float(v) => v.to_string(),
        Value::Double(v) => v.to_string(),
        Value::Text(s) => s.clone(),
        other => format!("{other:?}"),
    }
}
