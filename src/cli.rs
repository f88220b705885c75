// src/cli.rs
use clap::Parser;

/// cert-inventory: TLS certificate inventory scanner
///
/// Connects to every address and port of the configured jobs, records the
/// certificate chain each endpoint presents and keeps a deduplicated
/// certificate inventory in PostgreSQL.
#[derive(Parser, Debug, Clone)]
#[command(name = "cert-inventory")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    // ===== Input & Configuration =====
    /// Path to TOML config file
    #[arg(short = 'c', long = "config", default_value = "config.toml")]
    pub config: String,

    /// Job to run (repeatable; default: every job in the config)
    #[arg(short = 'j', long = "job", value_name = "NAME")]
    pub jobs: Vec<String>,

    // ===== Scanning =====
    /// Maximum number of concurrent connections (overrides scan.parallelism)
    #[arg(short = 'p', long = "parallel", value_name = "N")]
    pub parallel: Option<usize>,

    /// Connect and handshake timeout in seconds (overrides scan.timeout_secs)
    #[arg(long = "timeout", value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Keep results in memory instead of writing them to PostgreSQL
    #[arg(long = "dry-run")]
    pub dry_run: bool,

    // ===== Output =====
    /// Print run summaries as JSON lines
    #[arg(long = "json")]
    pub json: bool,

    /// Disable progress bar
    #[arg(long = "no-progress")]
    pub no_progress: bool,

    // ===== Logging =====
    /// Verbose logging (set log level to debug)
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Quiet logging (set log level to warn)
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,
}

impl Cli {
    /// Validate flag combinations and return errors for invalid usage
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.verbose && self.quiet {
            anyhow::bail!("Cannot specify both --verbose and --quiet");
        }

        if self.parallel == Some(0) {
            anyhow::bail!("--parallel must be greater than 0");
        }

        if self.timeout == Some(0) {
            anyhow::bail!("--timeout must be greater than 0");
        }

        Ok(())
    }

    /// Check if the progress bar should be enabled
    pub fn should_show_progress(&self) -> bool {
        !self.no_progress && !self.json && !self.quiet
    }

    /// Log level from verbose/quiet flags, if either is set
    pub fn log_level(&self) -> Option<&str> {
        if self.verbose {
            Some("debug")
        } else if self.quiet {
            Some("warn")
        } else {
            None
        }
    }
}
