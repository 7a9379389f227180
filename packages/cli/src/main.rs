#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for neighbourhood liveability runs.
//!
//! The computation is synchronous and runs on a blocking task; log output
//! goes through [`liveability_cli_utils::init_logger`] so it does not tear
//! the progress bar.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use liveability_cli_utils::RunProgress;
use liveability_config::RegionConfig;
use liveability_database::paths;
use liveability_engine::pipeline::{export_region, load_null_summary};
use liveability_engine::{RunOptions, run_region, validate_region};

#[derive(Parser)]
#[command(name = "liveability", about = "Neighbourhood liveability indicator engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Where to find the region config.
#[derive(Args)]
struct ConfigArgs {
    /// Path to a region TOML file
    #[arg(long, conflicts_with = "region")]
    config: Option<PathBuf>,
    /// Region name, resolved to `regions/<name>/region.toml` under
    /// `LIVEABILITY_DATA_DIR`
    #[arg(long)]
    region: Option<String>,
}

impl ConfigArgs {
    fn load(&self) -> Result<RegionConfig, Box<dyn std::error::Error>> {
        let path = match (&self.config, &self.region) {
            (Some(path), _) => path.clone(),
            (None, Some(region)) => paths::region_config_path(region),
            (None, None) => return Err("either --config or --region is required".into()),
        };
        Ok(RegionConfig::load(&path)?)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Compute, persist and export every indicator for a region
    Run {
        #[command(flatten)]
        config: ConfigArgs,
        /// Worker threads (overrides the config; 0 = available parallelism)
        #[arg(long)]
        workers: Option<usize>,
        /// Points per committed batch (overrides the config)
        #[arg(long)]
        batch_size: Option<usize>,
        /// Skip writing CSV files
        #[arg(long)]
        no_export: bool,
    },
    /// Rewrite the CSV files from the results store
    Export {
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Print the null summary of the last run
    Nulls {
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Load and check the config and region inputs without computing
    Validate {
        #[command(flatten)]
        config: ConfigArgs,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = liveability_cli_utils::init_logger();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            workers,
            batch_size,
            no_export,
        } => {
            let mut config = config.load()?;
            if let Some(workers) = workers {
                config.execution.workers = workers;
            }
            if let Some(batch_size) = batch_size {
                config.execution.batch_size = batch_size;
            }
            config.validate()?;

            let progress = RunProgress::new(&multi, "Loading region");
            let options = RunOptions { export: !no_export };
            let report =
                tokio::task::spawn_blocking(move || run_region(&config, options, progress.as_ref()))
                    .await??;

            println!("Region:      {}", report.region);
            println!(
                "Points:      {} ({} computed, {} resumed)",
                report.total_points, report.evaluation.written, report.evaluation.skipped
            );
            for (reason, count) in &report.nulls.by_reason {
                println!("  excluded:  {count} {reason}");
            }
            println!("Indicators:  {}", report.indicator_count);
            println!("Grid cells:  {}", report.grid_cells);
            for path in &report.exported {
                println!("Wrote        {}", path.display());
            }
            println!("Elapsed:     {:.1}s", report.elapsed.as_secs_f64());
        }
        Commands::Export { config } => {
            let config = config.load()?;
            let written = tokio::task::spawn_blocking(move || export_region(&config)).await??;
            for path in written {
                println!("{}", path.display());
            }
        }
        Commands::Nulls { config } => {
            let config = config.load()?;
            let summary = tokio::task::spawn_blocking(move || load_null_summary(&config)).await??;

            println!("Points: {}", summary.total_points);
            println!();
            println!("{:<40} NULLS", "INDICATOR");
            println!("{}", "-".repeat(50));
            for (indicator, count) in &summary.by_indicator {
                println!("{indicator:<40} {count}");
            }
            if !summary.by_reason.is_empty() {
                println!();
                println!("{:<40} POINTS", "EXCLUSION");
                println!("{}", "-".repeat(50));
                for (reason, count) in &summary.by_reason {
                    println!("{:<40} {count}", reason.to_string());
                }
            }
            for category in &summary.unavailable_categories {
                println!("Category '{category}' has no features in the region");
            }
        }
        Commands::Validate { config } => {
            let config = config.load()?;
            let region = config.region.clone();
            let report = tokio::task::spawn_blocking(move || validate_region(&config)).await??;

            println!("Region '{region}' is valid");
            println!("  network:   {} nodes, {} edges", report.nodes, report.edges);
            println!("  grid:      {} cells", report.grid_cells);
            println!(
                "  points:    {} ({} without a network node)",
                report.points, report.unassigned_points
            );
            for category in &report.unavailable_categories {
                log::warn!("Category '{category}' has no features in the region");
            }
        }
    }

    Ok(())
}
