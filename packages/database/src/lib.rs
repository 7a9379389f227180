#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! `DuckDB` storage for liveability runs.
//!
//! Region inputs (network, grid, destinations, analysis points) are read
//! from one `DuckDB` file and results are written to another. Per-point
//! checkpoint rows are insert-or-ignore so a restarted run never rewrites a
//! committed point; derived tables are rebuilt in full on every run.

pub mod export;
pub mod ident;
pub mod inputs;
pub mod paths;
pub mod results_db;

use duckdb::Connection;

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// `DuckDB` error.
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV writer error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON column error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A required region input is missing or empty.
    #[error("Required input '{input}' is unavailable: {reason}")]
    DataAbsent {
        /// Table or file naming the missing input.
        input: String,
        reason: String,
    },

    /// A name could not be used as a SQL identifier.
    #[error("Invalid SQL identifier '{0}'")]
    InvalidIdentifier(String),

    /// Data conversion error.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },
}

/// Runs `f` inside a single transaction, rolling back on error.
///
/// # Errors
///
/// Returns the error from `f`, or [`DbError::DuckDb`] if the transaction
/// cannot be opened or committed.
pub fn in_transaction<T>(
    conn: &Connection,
    f: impl FnOnce(&Connection) -> Result<T, DbError>,
) -> Result<T, DbError> {
    conn.execute_batch("BEGIN TRANSACTION")?;
    match f(conn) {
        Ok(value) => {
            conn.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = conn.execute_batch("ROLLBACK") {
                log::warn!("Rollback failed after error ({e}): {rollback}");
            }
            Err(e)
        }
    }
}

/// Returns whether a table exists in the main schema.
///
/// # Errors
///
/// Returns [`DbError`] if the catalog query fails.
pub fn table_exists(conn: &Connection, table: &str) -> Result<bool, DbError> {
    let mut stmt = conn.prepare(
        "SELECT COUNT(*) FROM information_schema.tables
         WHERE table_schema = 'main' AND table_name = ?",
    )?;
    let count: i64 = stmt.query_row([table], |row| row.get(0))?;
    Ok(count > 0)
}

/// Column names of a table in declaration order; empty if it does not
/// exist.
///
/// # Errors
///
/// Returns [`DbError`] if the catalog query fails.
pub fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT column_name FROM information_schema.columns
         WHERE table_schema = 'main' AND table_name = ?
         ORDER BY ordinal_position",
    )?;
    let rows = stmt.query_map([table], |row| row.get::<_, String>(0))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_rolls_back_on_error() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY)")
            .unwrap();

        let result: Result<(), DbError> = in_transaction(&conn, |conn| {
            conn.execute("INSERT INTO t VALUES (1)", [])?;
            Err(DbError::Conversion {
                message: "boom".to_string(),
            })
        });
        assert!(result.is_err());

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn reports_tables_and_columns() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE sample (a BIGINT, b TEXT)")
            .unwrap();

        assert!(table_exists(&conn, "sample").unwrap());
        assert!(!table_exists(&conn, "missing").unwrap());
        assert_eq!(table_columns(&conn, "sample").unwrap(), vec!["a", "b"]);
    }
}
