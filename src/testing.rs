//! Fakes for the transport and transfer seams.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::error::{NotifyError, TransferError};
use crate::transport::{MediaSource, Notifier, ProgressHook, StatusMessage, Transfer};

/// Poll `cond` until it holds. Panics after a few seconds.
pub async fn wait_until(cond: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Message that records every successful edit.
#[derive(Debug, Default)]
pub struct RecordingMessage {
    edits: Mutex<Vec<String>>,
    attempts: AtomicUsize,
    failures: Mutex<VecDeque<NotifyError>>,
}

impl RecordingMessage {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next edit fails with `err` instead of being recorded.
    pub fn fail_next(&self, err: NotifyError) {
        self.failures.lock().unwrap().push_back(err);
    }

    pub fn edits(&self) -> Vec<String> {
        self.edits.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusMessage for RecordingMessage {
    async fn edit(&self, text: &str) -> Result<(), NotifyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.edits.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

struct SharedMessage(Arc<RecordingMessage>);

#[async_trait]
impl StatusMessage for SharedMessage {
    async fn edit(&self, text: &str) -> Result<(), NotifyError> {
        self.0.edit(text).await
    }
}

/// Notifier that records replies and keeps a handle to every sent message.
#[derive(Default)]
pub struct RecordingNotifier {
    replies: Mutex<Vec<String>>,
    messages: Mutex<Vec<Arc<RecordingMessage>>>,
    scripted_edit_failures: Mutex<HashMap<usize, Vec<NotifyError>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replies(&self) -> Vec<String> {
        self.replies.lock().unwrap().clone()
    }

    /// Message sent by the `index`-th reply.
    pub fn message(&self, index: usize) -> Arc<RecordingMessage> {
        self.messages.lock().unwrap()[index].clone()
    }

    /// Script an edit failure on the message the `index`-th reply will create.
    pub fn fail_next_edit_on_message(&self, index: usize, err: NotifyError) {
        self.scripted_edit_failures
            .lock()
            .unwrap()
            .entry(index)
            .or_default()
            .push(err);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn reply(&self, text: &str) -> Result<Box<dyn StatusMessage>, NotifyError> {
        let index = {
            let mut replies = self.replies.lock().unwrap();
            replies.push(text.to_string());
            replies.len() - 1
        };

        let message = Arc::new(RecordingMessage::new());
        if let Some(failures) = self.scripted_edit_failures.lock().unwrap().remove(&index) {
            for err in failures {
                message.fail_next(err);
            }
        }
        self.messages.lock().unwrap().push(message.clone());
        Ok(Box::new(SharedMessage(message)))
    }
}

pub enum ScriptOutcome {
    /// Write a file named after the media and return its path.
    WriteFile,
    /// Report success with a path that does not exist.
    NoFile,
    Fail(TransferError),
}

/// What one transfer call does.
pub struct Script {
    progress: Vec<(u64, u64)>,
    outcome: ScriptOutcome,
}

impl Script {
    pub fn progress(steps: &[(u64, u64)]) -> Self {
        Self {
            progress: steps.to_vec(),
            outcome: ScriptOutcome::WriteFile,
        }
    }

    pub fn outcome(outcome: ScriptOutcome) -> Self {
        Self {
            progress: Vec::new(),
            outcome,
        }
    }
}

/// Transfer driven by per-source scripts. Unscripted calls write a file.
#[derive(Default)]
pub struct ScriptedTransfer {
    scripts: Mutex<HashMap<String, VecDeque<Script>>>,
    holds: Mutex<HashMap<String, Arc<Semaphore>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, source_id: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .entry(source_id.to_string())
            .or_default()
            .push_back(script);
    }

    /// Block transfers of `source_id` until a permit is added.
    pub fn hold(&self, source_id: &str) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.holds
            .lock()
            .unwrap()
            .insert(source_id.to_string(), gate.clone());
        gate
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transfer for ScriptedTransfer {
    async fn transfer(
        &self,
        source: &MediaSource,
        destination_dir: &Path,
        progress: &dyn ProgressHook,
    ) -> Result<PathBuf, TransferError> {
        self.calls.lock().unwrap().push(source.source_id.clone());

        let hold = self.holds.lock().unwrap().get(&source.source_id).cloned();
        if let Some(hold) = hold {
            hold.acquire().await.unwrap().forget();
        }

        let script = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&source.source_id)
            .and_then(|s| s.pop_front())
            .unwrap_or_else(|| Script::progress(&[]));

        for (downloaded, total) in script.progress {
            progress.on_progress(downloaded, total).await;
        }

        match script.outcome {
            ScriptOutcome::WriteFile => {
                let path = destination_dir.join(&source.display_name);
                std::fs::write(&path, b"media bytes").unwrap();
                Ok(path)
            }
            ScriptOutcome::NoFile => {
                Ok(destination_dir.join(format!("{}.missing", source.source_id)))
            }
            ScriptOutcome::Fail(err) => Err(err),
        }
    }
}

/// Transfer whose bytes arrive on a background task, independent of how
/// quickly progress callbacks return.
pub struct WireTransfer {
    pub received: Arc<AtomicU64>,
    total: u64,
    bytes_per_tick: u64,
}

impl WireTransfer {
    pub fn new(total: u64, bytes_per_tick: u64) -> Self {
        Self {
            received: Arc::new(AtomicU64::new(0)),
            total,
            bytes_per_tick,
        }
    }
}

#[async_trait]
impl Transfer for WireTransfer {
    async fn transfer(
        &self,
        source: &MediaSource,
        destination_dir: &Path,
        progress: &dyn ProgressHook,
    ) -> Result<PathBuf, TransferError> {
        let received = self.received.clone();
        let (total, step) = (self.total, self.bytes_per_tick);
        let wire = tokio::spawn(async move {
            while received.load(Ordering::SeqCst) < total {
                let next = (received.load(Ordering::SeqCst) + step).min(total);
                received.store(next, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        });

        loop {
            let now = self.received.load(Ordering::SeqCst);
            progress.on_progress(now, self.total).await;
            if now >= self.total {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        wire.await.unwrap();

        let path = destination_dir.join(&source.display_name);
        std::fs::write(&path, b"wire bytes").unwrap();
        Ok(path)
    }
}
