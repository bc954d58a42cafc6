//! Shared utilities for CLI commands.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use aq_agent::Background;
use aq_core::SystemClock;
use aq_db::Database;

use crate::Config;

/// Opens the configured database, ensuring the parent directory exists.
pub fn open_database(config: &Config) -> Result<Database> {
    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }
    Database::open(&config.database_path)
        .with_context(|| format!("failed to open {}", config.database_path.display()))
}

/// Runs `task` against a background aggregator over the configured database.
///
/// The aggregator is shut down after `task` finishes, so every queued update
/// is persisted before this returns, even when `task` fails.
pub fn with_background<T, F, Fut>(config: &Config, task: F) -> Result<T>
where
    F: FnOnce(Arc<Background>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let db = open_database(config)?;
    let runtime = tokio::runtime::Runtime::new().context("failed to initialize tokio runtime")?;
    runtime.block_on(async move {
        let background = Arc::new(
            Background::spawn(db, config.aggregator(), Arc::new(SystemClock))
                .context("failed to start aggregator")?,
        );
        let result = task(Arc::clone(&background)).await;
        background.shutdown().await;
        result
    })
}

/// Formats whole seconds as `1h 02m 03s`, dropping leading zero units.
pub fn format_seconds(total: u64) -> String {
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{hours}h {minutes:02}m {seconds:02}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds:02}s")
    } else {
        format!("{seconds}s")
    }
}
