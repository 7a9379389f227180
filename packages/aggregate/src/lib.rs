#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Rollups of point indicators to grid cells and to the whole city.
//!
//! Nulls are never collapsed into zeros: a grid value is null when every
//! contributing point is null, and a city value is null when every cell is.

pub mod city;
pub mod grid;

pub use city::city_summary;
pub use grid::grid_summaries;
