//! Directory Compaction Binary
//!
//! Runs the compaction job against a directory database, either once or on
//! its configured schedule until Ctrl-C.
//!
//! # Usage
//!
//! ```bash
//! # Scheduled mode (default settings, ./data/directory.db)
//! cargo run --bin directory-compactor
//!
//! # Single pass, then exit
//! cargo run --bin directory-compactor -- --once
//!
//! # Purge after a week, daily at 03:00 UTC
//! DIRECTORY_RETENTION_DAYS=7 DIRECTORY_DAILY_TIME_UTC=03:00 cargo run --bin directory-compactor
//! ```
//!
//! # Environment Variables
//!
//! - `DIRECTORY_CONFIG`: JSON config file
//! - `DIRECTORY_DATABASE_PATH`, `DIRECTORY_LOCK_TIMEOUT_MS`, `DIRECTORY_CACHE_TTL_SECS`
//! - `DIRECTORY_RETENTION_DAYS`, `DIRECTORY_INTERVAL_HOURS`, `DIRECTORY_DAILY_TIME_UTC`,
//!   `DIRECTORY_BATCH_SIZE`
//! - `RUST_LOG`: Logging level (e.g., "info", "debug", "trace")

use std::sync::Arc;

use directory_core::services::{CompactionOutcome, Directory};
use directory_core::{CancelToken, DirectoryConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let run_once = std::env::args().skip(1).any(|arg| arg == "--once");

    let config = DirectoryConfig::from_env()?;
    tracing::info!("Database: {:?}", config.database_path);
    tracing::info!(
        "Retention: {} days, batch size {}",
        config.compaction.retention_days,
        config.compaction.batch_size
    );

    let directory = Directory::open(&config).await?;
    let job = directory.compaction_job()?;

    if run_once {
        match job.run_once(&CancelToken::new()).await? {
            CompactionOutcome::Completed(report) => tracing::info!(
                "Selected {}, purged {}, {} failed batches",
                report.selected,
                report.purged,
                report.failed_batches
            ),
            CompactionOutcome::Skipped => tracing::warn!("Another compaction run was in progress"),
        }
        return Ok(());
    }

    let handle = Arc::new(job).start();
    tokio::signal::ctrl_c().await?;
    tracing::info!("Ctrl-C received, stopping compaction");
    handle.shutdown().await;

    Ok(())
}
