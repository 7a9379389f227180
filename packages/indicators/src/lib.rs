#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Indicator compositor.
//!
//! Point indicators move through raw, binary, cleaned, normalized and
//! composite stages. Each stage lives in its own module; [`compose`] runs
//! them in order over a whole region run.

pub mod binary;
pub mod clean;
pub mod composite;
pub mod compositor;
pub mod normalize;

pub use compositor::{ComposedIndicators, compose};
