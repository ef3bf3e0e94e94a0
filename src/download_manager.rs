//! Download Manager
//!
//! Owns the task queue, pause gate, progress tracker and session history, and
//! drives every queued item through the transfer capability one at a time.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Mutex;

use crate::commands::StatusReport;
use crate::db::Db;
use crate::error::{NotifyError, TransferError};
use crate::models::TaskStatus;
use crate::pause::PauseGate;
use crate::progress::{ProgressReporter, ProgressTracker};
use crate::queue::{QueueItem, TaskQueue};
use crate::settings::ManagerSettings;
use crate::transport::{InboundMedia, MediaSource, Notifier, StatusMessage, Transfer};

/// Configuration for download execution.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub download_dir: PathBuf,
    pub progress_step_percent: u8,
    pub pause_poll_interval: Duration,
}

impl From<&ManagerSettings> for DownloadConfig {
    fn from(settings: &ManagerSettings) -> Self {
        Self {
            download_dir: settings.download_dir.clone(),
            progress_step_percent: settings.progress_step_percent,
            pause_poll_interval: settings.pause_poll_interval(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self::from(&ManagerSettings::default())
    }
}

/// Completed paths and failed names seen since this process started.
#[derive(Debug, Default)]
struct History {
    completed: Vec<String>,
    failed: Vec<String>,
}

/// Single-flight download manager.
///
/// Durable status lives in the store; queue, progress and history are
/// process-local and start empty on every run.
pub struct DownloadManager {
    config: DownloadConfig,
    db: Arc<Mutex<Db>>,
    transfer: Arc<dyn Transfer>,
    queue: TaskQueue,
    gate: PauseGate,
    progress: ProgressTracker,
    history: std::sync::Mutex<History>,
}

impl DownloadManager {
    pub fn new(config: DownloadConfig, db: Arc<Mutex<Db>>, transfer: Arc<dyn Transfer>) -> Self {
        Self {
            config,
            db,
            transfer,
            queue: TaskQueue::new(),
            gate: PauseGate::new(),
            progress: ProgressTracker::new(),
            history: std::sync::Mutex::new(History::default()),
        }
    }

    /// Handle an inbound media event: queue it, acknowledge, start draining.
    pub async fn submit(self: &Arc<Self>, media: InboundMedia) {
        let source = MediaSource::new(media.source_id, media.display_name);
        log::info!(
            "Queued {} ({}), {} waiting",
            source.display_name,
            source.source_id,
            self.queue.len() + 1
        );
        self.queue
            .push(QueueItem::live(source, media.notifier.clone()));

        reply(
            media.notifier.as_ref(),
            "Your media was added to the download queue.",
        )
        .await;

        self.kick();
    }

    /// Re-enqueue every row left `pending` by a previous run.
    ///
    /// Rows stuck at `downloading` are not picked up.
    pub async fn recover_pending(self: &Arc<Self>) -> Result<usize> {
        let pending = self.db.lock().await.list_by_status(TaskStatus::Pending)?;
        let count = pending.len();

        for (source_id, display_name) in pending {
            let source = MediaSource::new(source_id, display_name);
            log::info!(
                "Recovering pending download: {} ({})",
                source.display_name,
                source.source_id
            );
            self.queue.push(QueueItem::recovered(source));
        }

        if !self.queue.is_empty() {
            self.kick();
        }
        Ok(count)
    }

    /// Spawn a drain unless a worker is already draining.
    pub fn kick(self: &Arc<Self>) -> bool {
        if self.queue.is_draining() {
            return false;
        }
        let this = self.clone();
        tokio::spawn(async move { this.drain().await });
        true
    }

    /// Process queued items until the queue is empty. Returns immediately when
    /// another worker holds the single-flight slot.
    pub async fn drain(&self) {
        loop {
            let Some(guard) = self.queue.try_begin_drain() else {
                return;
            };
            while let Some(item) = self.queue.pop() {
                self.process(item).await;
                self.queue.task_done();
            }
            drop(guard);

            // An item pushed after the last pop but before the guard was
            // released found the slot taken and did not start a worker.
            if self.queue.is_empty() {
                return;
            }
        }
    }

    /// Resolves once every queued item reached a terminal state.
    pub async fn wait_idle(&self) {
        self.queue.wait_idle().await;
    }

    pub fn pause(&self) {
        self.gate.pause();
        log::info!("Downloads paused");
    }

    pub fn resume(&self) {
        self.gate.resume();
        log::info!("Downloads resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.gate.is_paused()
    }

    /// Drop every waiting item and reopen the pause gate. The in-flight
    /// transfer keeps running.
    pub fn cancel(&self) -> usize {
        let removed = self.queue.clear();
        self.gate.resume();
        log::info!("Cancelled {} queued download(s)", removed);
        removed
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn completed(&self) -> Vec<String> {
        self.lock_history().completed.clone()
    }

    pub fn failed(&self) -> Vec<String> {
        self.lock_history().failed.clone()
    }

    pub fn status_report(&self) -> StatusReport {
        let busy = self.queue.is_draining();
        let history = self.lock_history();
        StatusReport {
            busy,
            in_progress: if busy { self.progress.all() } else { Vec::new() },
            queued: self.queue.len(),
            completed: history.completed.clone(),
            failed: history.failed.clone(),
        }
    }

    /// Run one item to a terminal outcome. Errors never escape.
    async fn process(&self, item: QueueItem) {
        let QueueItem { source, notifier } = item;
        let notifier = notifier.as_deref();
        let name = source.display_name.as_str();

        match self.prepare_record(&source).await {
            Ok(true) => {
                log::info!("{} ({}) already downloaded, skipping", name, source.source_id);
                if let Some(n) = notifier {
                    reply(n, &format!("The download of {name} was already completed.")).await;
                }
                return;
            }
            Ok(false) => {}
            Err(e) => log::error!("Failed to prepare record for {}: {:#}", source.source_id, e),
        }

        let status_message = match notifier {
            Some(n) => reply(n, &format!("Starting download of {name}...")).await,
            None => None,
        };

        self.set_status(&source.source_id, TaskStatus::Downloading, None)
            .await;
        log::info!("Starting download {} ({})", name, source.source_id);

        let result = self
            .run_transfer(&source, status_message.as_deref())
            .await
            .and_then(|path| {
                if path.exists() {
                    Ok(path)
                } else {
                    Err(TransferError::MissingOutput(path))
                }
            });

        match result {
            Ok(path) => {
                log::info!("Download {} completed: {}", name, path.display());
                self.lock_history()
                    .completed
                    .push(path.display().to_string());
                self.set_status(&source.source_id, TaskStatus::Completed, Some(&path))
                    .await;
                if let Some(message) = status_message.as_deref() {
                    let text = format!("Download complete! Saved to {}", path.display());
                    edit_with_retry(message, &text).await;
                }
            }
            Err(err) => match err.retry_after() {
                Some(wait) => {
                    log::warn!(
                        "Transfer of {} rate limited, waiting {:?}; task left at downloading",
                        name,
                        wait
                    );
                    tokio::time::sleep(wait).await;
                }
                None => {
                    log::error!("Download {} failed: {}", name, err);
                    self.lock_history().failed.push(name.to_string());
                    self.set_status(&source.source_id, TaskStatus::Failed, None)
                        .await;
                    if let Some(n) = notifier {
                        reply(
                            n,
                            &format!("An error occurred while downloading {name}: {err}"),
                        )
                        .await;
                    }
                }
            },
        }
    }

    /// Make sure a `pending` row exists for this attempt.
    ///
    /// Returns `true` when the media is already downloaded and still on disk.
    async fn prepare_record(&self, source: &MediaSource) -> Result<bool> {
        let mut db = self.db.lock().await;
        if db.check_completed(&source.source_id)? {
            return Ok(true);
        }

        match db.lookup(&source.source_id)? {
            None => {
                db.create(
                    &source.source_id,
                    Some(&source.display_name),
                    TaskStatus::Pending,
                )?;
            }
            Some((TaskStatus::Pending, _)) => {}
            Some((previous, _)) => {
                log::info!(
                    "Re-attempting {} (was {})",
                    source.source_id,
                    previous.as_str()
                );
                db.update_status(&source.source_id, TaskStatus::Pending, None)?;
            }
        }
        Ok(false)
    }

    async fn run_transfer(
        &self,
        source: &MediaSource,
        message: Option<&dyn StatusMessage>,
    ) -> Result<PathBuf, TransferError> {
        tokio::fs::create_dir_all(&self.config.download_dir)
            .await
            .map_err(|e| {
                TransferError::Failed(format!(
                    "cannot create download dir {}: {}",
                    self.config.download_dir.display(),
                    e
                ))
            })?;

        let reporter =
            ProgressReporter::new(&source.display_name, message, &self.gate, &self.progress)
                .poll_interval(self.config.pause_poll_interval)
                .step_percent(self.config.progress_step_percent);

        self.transfer
            .transfer(source, &self.config.download_dir, &reporter)
            .await
    }

    async fn set_status(&self, source_id: &str, status: TaskStatus, path: Option<&Path>) {
        let mut db = self.db.lock().await;
        if let Ok(Some((current, _))) = db.lookup(source_id) {
            if !current.can_transition_to(status) {
                log::warn!(
                    "Unexpected transition for {}: {} -> {}",
                    source_id,
                    current.as_str(),
                    status.as_str()
                );
            }
        }
        if let Err(e) = db.update_status(source_id, status, path) {
            log::error!(
                "Failed to set {} to {}: {:#}",
                source_id,
                status.as_str(),
                e
            );
        }
    }

    fn lock_history(&self) -> std::sync::MutexGuard<'_, History> {
        self.history.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Best-effort reply. A rate limit is waited out and the reply dropped.
async fn reply(notifier: &dyn Notifier, text: &str) -> Option<Box<dyn StatusMessage>> {
    match notifier.reply(text).await {
        Ok(message) => Some(message),
        Err(err) => {
            backoff_or_log(&err, "reply").await;
            None
        }
    }
}

/// Edit a terminal message, trying once more after a rate-limit backoff.
async fn edit_with_retry(message: &dyn StatusMessage, text: &str) {
    match message.edit(text).await {
        Ok(()) => {}
        Err(err) if err.retry_after().is_some() => {
            backoff_or_log(&err, "edit").await;
            if let Err(err) = message.edit(text).await {
                log::warn!("Retried edit failed again: {}", err);
            }
        }
        Err(err) => log::warn!("Edit failed: {}", err),
    }
}

async fn backoff_or_log(err: &NotifyError, what: &str) {
    match err.retry_after() {
        Some(wait) => {
            log::warn!("Rate limited on {}, waiting {:?}", what, wait);
            tokio::time::sleep(wait).await;
        }
        None => log::warn!("Failed to {}: {}", what, err),
    }
}
