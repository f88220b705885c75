// src/main.rs
use anyhow::Context;
use cert_inventory::cli::Cli;
use cert_inventory::config::Config;
use cert_inventory::database::{DatabaseBackend, MemoryBackend, PostgresBackend};
use cert_inventory::scheduler::ConnectionScheduler;
use cert_inventory::stats::ScanStats;
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Validate arguments
    cli.validate()?;

    // Load config file; malformed jobs fail here, before anything is persisted
    let mut config = Config::from_file(Path::new(&cli.config))?;

    // Apply CLI overrides
    if let Some(parallel) = cli.parallel {
        config.scan.parallelism = parallel;
    }
    if let Some(timeout) = cli.timeout {
        config.scan.timeout_secs = timeout;
    }

    // Initialize logging
    let log_level = cli.log_level().unwrap_or(&config.logging.level);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting cert-inventory...");

    let jobs = config.select_jobs(&cli.jobs)?;
    let sni = config.sni_map()?;

    // Initialize database
    let postgres = if cli.dry_run || !config.database.enabled {
        None
    } else {
        tracing::info!("Initializing PostgreSQL database...");
        let postgres = PostgresBackend::new(&config.database.url, config.database.max_connections)
            .await
            .context("Failed to connect to PostgreSQL")?;
        postgres.migrate().await?;
        tracing::info!("Database initialized and migrated successfully");
        Some(Arc::new(postgres))
    };

    let backend: Arc<dyn DatabaseBackend> = match postgres {
        Some(ref postgres) => postgres.clone(),
        None => {
            if cli.dry_run {
                tracing::info!("Dry run: results are kept in memory only");
            } else {
                tracing::warn!("Database disabled in config; results are kept in memory only");
            }
            Arc::new(MemoryBackend::new())
        }
    };
    backend.ping().await.context("Database health check failed")?;

    let show_progress = cli.should_show_progress() && is_terminal::is_terminal(std::io::stderr());
    let timeout = config.scan.timeout();

    for job in jobs {
        let description = job.description()?;
        let stats = ScanStats::new();

        let scheduler = ConnectionScheduler::new(
            job.name.clone(),
            Arc::clone(&backend),
            description,
            sni.clone(),
            config.scan.parallelism,
        )
        .with_timeout(timeout)
        .with_stats(stats.clone())
        .with_progress(show_progress);

        let summary = scheduler
            .run()
            .await
            .with_context(|| format!("Job '{}' aborted", job.name))?;

        if cli.json {
            println!("{}", serde_json::to_string(&summary)?);
        } else {
            println!("{}", summary);
            if !summary.is_noop() {
                println!("  {}", stats.format_stats());
            }
        }
    }

    if let Some(postgres) = postgres {
        postgres.close().await;
    }

    Ok(())
}
