//! Validated SQL identifiers for per-indicator columns.
//!
//! Indicator column names come from configuration, so they are checked
//! against a strict character set before being spliced into DDL or
//! `INSERT` statements. Values are always bound as parameters.

use std::fmt;

use liveability_region_models::is_valid_identifier;

use crate::DbError;

/// A lowercase `[a-z][a-z0-9_]*` identifier, safe to quote into SQL.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SqlIdent(String);

impl SqlIdent {
    /// Validates `name` as an identifier.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidIdentifier`] if the name has characters
    /// outside `[a-z0-9_]` or does not start with a letter.
    pub fn new(name: &str) -> Result<Self, DbError> {
        if is_valid_identifier(name) {
            Ok(Self(name.to_string()))
        } else {
            Err(DbError::InvalidIdentifier(name.to_string()))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Double-quoted form for SQL text.
    #[must_use]
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl fmt::Display for SqlIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validates every name, preserving order.
///
/// # Errors
///
/// Returns [`DbError::InvalidIdentifier`] for the first invalid name.
pub fn idents<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<Vec<SqlIdent>, DbError> {
    names.into_iter().map(SqlIdent::new).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_indicator_names() {
        let ident = SqlIdent::new("access_supermarket_soft").unwrap();
        assert_eq!(ident.quoted(), "\"access_supermarket_soft\"");
        assert_eq!(ident.to_string(), "access_supermarket_soft");
    }

    #[test]
    fn rejects_injection_attempts() {
        for name in ["x\"; DROP TABLE t; --", "Access", "", "1st", "a b"] {
            assert!(matches!(
                SqlIdent::new(name),
                Err(DbError::InvalidIdentifier(_))
            ));
        }
        assert!(idents(["ok", "not ok"]).is_err());
    }
}
