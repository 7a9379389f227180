#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Terminal wiring for the liveability command-line tools.
//!
//! [`RunProgress`] renders a region run on one `indicatif` line: a spinner
//! while inputs load, a counted bar while points are evaluated, and a
//! spinner again for the composition and write phases. [`init_logger`]
//! routes `log` output through the same [`MultiProgress`] so log lines
//! never tear the bar.

use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use liveability_engine::ProgressCallback;

pub use indicatif::MultiProgress;

const TICK: Duration = Duration::from_millis(120);

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed}]")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn points_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "  {msg} {wide_bar:.cyan/dim} {human_pos}/{human_len} points {per_sec} [{eta}]",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("##-")
}

/// One progress line for a region run.
pub struct RunProgress {
    bar: ProgressBar,
}

impl RunProgress {
    /// Adds the line to `multi`, spinning with `message` until evaluation
    /// starts.
    #[must_use]
    pub fn new(multi: &MultiProgress, message: &str) -> Arc<dyn ProgressCallback> {
        let bar = multi.add(ProgressBar::new_spinner());
        bar.set_style(spinner_style());
        bar.enable_steady_tick(TICK);
        bar.set_message(message.to_string());
        Arc::new(Self { bar })
    }
}

impl ProgressCallback for RunProgress {
    fn start(&self, pending: u64, label: &str) {
        self.bar.set_length(pending);
        self.bar.set_position(0);
        self.bar.set_style(points_style());
        self.bar.set_message(label.to_string());
    }

    fn advance(&self, points: u64) {
        self.bar.inc(points);
    }

    fn phase(&self, label: &str) {
        self.bar.set_style(spinner_style());
        self.bar.set_message(label.to_string());
    }

    fn finish(&self, summary: &str) {
        self.bar.finish_with_message(summary.to_string());
    }
}

/// Installs `pretty_env_logger` (filtered by `RUST_LOG`) behind
/// `indicatif-log-bridge` and returns the [`MultiProgress`] that progress
/// lines must be added to.
#[must_use]
pub fn init_logger() -> MultiProgress {
    let multi = MultiProgress::new();
    let logger = pretty_env_logger::formatted_builder()
        .parse_env("RUST_LOG")
        .build();
    let level = logger.filter();

    if indicatif_log_bridge::LogWrapper::new(multi.clone(), logger)
        .try_init()
        .is_ok()
    {
        log::set_max_level(level);
    }
    multi
}
