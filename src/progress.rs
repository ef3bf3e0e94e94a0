//! Progress Tracker and reporting.
//!
//! Every transfer callback refreshes the in-memory snapshot for its task; only
//! callbacks landing on a report step edit the requester's status message.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::models::ProgressSnapshot;
use crate::pause::PauseGate;
use crate::transport::{ProgressHook, StatusMessage};

/// Last-known progress per display name, in first-seen order.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    snapshots: Mutex<Vec<(String, ProgressSnapshot)>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, name: &str, snapshot: ProgressSnapshot) {
        let mut snapshots = self.lock();
        match snapshots.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => *existing = snapshot,
            None => snapshots.push((name.to_string(), snapshot)),
        }
    }

    pub fn get(&self, name: &str) -> Option<ProgressSnapshot> {
        self.lock()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| *s)
    }

    pub fn all(&self) -> Vec<(String, ProgressSnapshot)> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(String, ProgressSnapshot)>> {
        self.snapshots.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Human readable remaining time.
pub fn format_remaining(seconds: Option<f64>) -> String {
    match seconds {
        Some(s) => format!("{s:.2} seconds"),
        None => "unknown".to_string(),
    }
}

pub fn progress_text(name: &str, snapshot: &ProgressSnapshot) -> String {
    format!(
        "Downloading {}...\nProgress: {:.2}%\nTime remaining: {}",
        name,
        snapshot.percent_complete,
        format_remaining(snapshot.estimated_seconds_remaining)
    )
}

/// Progress hook handed to the transfer for one task.
pub struct ProgressReporter<'a> {
    display_name: &'a str,
    started: Instant,
    message: Option<&'a dyn StatusMessage>,
    gate: &'a PauseGate,
    tracker: &'a ProgressTracker,
    poll_interval: Duration,
    step_percent: u8,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(
        display_name: &'a str,
        message: Option<&'a dyn StatusMessage>,
        gate: &'a PauseGate,
        tracker: &'a ProgressTracker,
    ) -> Self {
        Self {
            display_name,
            started: Instant::now(),
            message,
            gate,
            tracker,
            poll_interval: Duration::from_secs(1),
            step_percent: 5,
        }
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn step_percent(mut self, step: u8) -> Self {
        self.step_percent = step;
        self
    }
}

#[async_trait]
impl ProgressHook for ProgressReporter<'_> {
    async fn on_progress(&self, downloaded: u64, total: u64) {
        self.gate.wait_open(self.poll_interval).await;

        let elapsed = self.started.elapsed().as_secs_f64();
        let snapshot = ProgressSnapshot::compute(downloaded, total, elapsed);
        self.tracker.update(self.display_name, snapshot);

        if !snapshot.crosses_report_step(self.step_percent) {
            return;
        }
        let Some(message) = self.message else {
            return;
        };

        // A progress edit that hits a rate limit is dropped after the backoff.
        if let Err(err) = message.edit(&progress_text(self.display_name, &snapshot)).await {
            match err.retry_after() {
                Some(wait) => {
                    log::warn!(
                        "Rate limited while reporting progress of {}, waiting {:?}",
                        self.display_name,
                        wait
                    );
                    tokio::time::sleep(wait).await;
                }
                None => log::debug!("Progress edit for {} failed: {}", self.display_name, err),
            }
        }
    }
}
