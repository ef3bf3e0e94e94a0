//! Durable, single-flight media download queue.
//!
//! Inbound media requests are queued in memory, recorded in SQLite, and
//! downloaded strictly one at a time. Rows left `pending` by a previous run
//! are re-queued on startup.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Mutex;

pub mod commands;
pub mod console;
pub mod db;
pub mod download_manager;
pub mod error;
pub mod models;
pub mod pause;
pub mod progress;
pub mod queue;
pub mod settings;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use download_manager::{DownloadConfig, DownloadManager};
pub use error::{NotifyError, TransferError};
pub use models::{ProgressSnapshot, TaskRecord, TaskStatus};
pub use transport::{InboundMedia, MediaSource, Notifier, ProgressHook, StatusMessage, Transfer};

use console::{ConsoleNotifier, LocalFileTransfer};
use db::Db;
use settings::{ManagerSettings, SettingsManager};

/// Startup overrides taken from the command line.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub db_path: Option<PathBuf>,
    pub download_dir: Option<PathBuf>,
}

/// Load stored settings, apply overrides, and persist the result.
pub fn resolve_settings(db: &Db, options: &RunOptions) -> Result<ManagerSettings> {
    let manager = SettingsManager::new(db.conn());
    let mut settings = manager.get_manager_settings()?;

    if let Some(dir) = &options.download_dir {
        settings.download_dir = dir.clone();
    }
    manager.save_manager_settings(&settings)?;
    Ok(settings)
}

/// Run the console front end until stdin closes and the queue is idle.
pub async fn run(options: RunOptions) -> Result<()> {
    let db = match &options.db_path {
        Some(path) => Db::open_at(path)?,
        None => Db::open()?,
    };
    if let Some(path) = db.path() {
        log::info!("Using database at {}", path.display());
    }

    let settings = resolve_settings(&db, &options)?;
    log::info!("Downloading into {}", settings.download_dir.display());

    let transfer = Arc::new(LocalFileTransfer::new(settings.transfer_chunk_bytes));
    let manager = Arc::new(DownloadManager::new(
        DownloadConfig::from(&settings),
        Arc::new(Mutex::new(db)),
        transfer,
    ));

    match manager.recover_pending().await {
        Ok(0) => {}
        Ok(n) => log::info!("Recovered {} pending download(s)", n),
        Err(e) => log::error!("Failed to recover pending downloads: {:#}", e),
    }

    let notifier: Arc<dyn Notifier> = Arc::new(ConsoleNotifier::new());
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    console::serve(manager.clone(), stdin, notifier).await?;

    log::info!("Input closed, waiting for queued downloads");
    manager.wait_idle().await;
    Ok(())
}
