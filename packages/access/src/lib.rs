#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Destination access: the categorized destination catalogue and the
//! accessibility index built from it.

pub mod catalogue;
pub mod index;

pub use catalogue::DestinationCatalogue;
pub use index::AccessibilityIndex;

/// Errors from building or querying the accessibility index.
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    /// A category cutoff lies beyond the index search bound.
    #[error("Category '{category}' cutoff {cutoff_m} m exceeds the search bound {bound_m} m")]
    BoundBelowCutoff {
        category: String,
        cutoff_m: f64,
        bound_m: f64,
    },

    /// The category was not part of the index.
    #[error("Unknown destination category '{0}'")]
    UnknownCategory(String),
}
