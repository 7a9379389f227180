//! Canonical file locations for region runs.
//!
//! By default everything lives under the project's `data/` directory;
//! `LIVEABILITY_DATA_DIR` points the command-line tools elsewhere.

use std::path::{Path, PathBuf};

/// Environment variable overriding [`data_dir`].
pub const DATA_DIR_ENV: &str = "LIVEABILITY_DATA_DIR";

/// Returns the workspace root directory.
///
/// Resolved at compile time from `CARGO_MANIFEST_DIR`.
#[must_use]
pub fn project_root() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    manifest
        .ancestors()
        .nth(2)
        .unwrap_or(manifest)
        .to_path_buf()
}

/// Returns the data directory: `$LIVEABILITY_DATA_DIR` if set, otherwise
/// `data/` under the project root.
#[must_use]
pub fn data_dir() -> PathBuf {
    std::env::var_os(DATA_DIR_ENV).map_or_else(|| project_root().join("data"), PathBuf::from)
}

/// Returns the directory holding one region's config and databases.
#[must_use]
pub fn region_dir(region: &str) -> PathBuf {
    data_dir().join("regions").join(region)
}

/// Returns the default config path for a region.
#[must_use]
pub fn region_config_path(region: &str) -> PathBuf {
    region_dir(region).join("region.toml")
}

/// Ensures a directory exists, creating it if necessary.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be created.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}
