// src/progress.rs
//! Progress bar for a running scan job using indicatif

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Progress bar wrapper; a disabled indicator swallows every call
///
/// Dropping the indicator clears the bar, so an aborted job leaves nothing on screen.
pub struct ProgressIndicator {
    bar: Option<ProgressBar>,
}

impl ProgressIndicator {
    /// Bar over `total` targets, or a no-op when `enabled` is false
    pub fn new(enabled: bool, total: u64, job_name: &str) -> Self {
        if !enabled || total == 0 {
            return Self::disabled();
        }

        let bar = ProgressBar::new(total);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {prefix} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            bar.set_style(style.progress_chars("=> "));
        }
        bar.set_prefix(job_name.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar: Some(bar) }
    }

    pub fn disabled() -> Self {
        Self { bar: None }
    }

    /// One target finished
    pub fn inc(&self) {
        if let Some(ref bar) = self.bar {
            bar.inc(1);
        }
    }

    pub fn set_message(&self, msg: impl Into<String>) {
        if let Some(ref bar) = self.bar {
            bar.set_message(msg.into());
        }
    }

    pub fn finish(&self) {
        if let Some(ref bar) = self.bar {
            bar.finish_and_clear();
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.bar.is_some()
    }
}

impl Drop for ProgressIndicator {
    fn drop(&mut self) {
        self.finish();
    }
}
