use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persistent lifecycle status for a task row.
///
/// Transitions are strictly `Pending -> Downloading -> {Completed | Failed}`.
/// The only way back to `Pending` is the self-healing demotion of a completed
/// row whose file disappeared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Downloading,
    Completed,
    /// Terminal. Never retried automatically.
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Downloading => "downloading",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => TaskStatus::Pending,
            "downloading" => TaskStatus::Downloading,
            "completed" => TaskStatus::Completed,
            "failed" => TaskStatus::Failed,
            _ => return None,
        })
    }

    /// Whether the worker is allowed to move a row from `self` to `next`.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Downloading)
                | (TaskStatus::Downloading, TaskStatus::Completed)
                | (TaskStatus::Downloading, TaskStatus::Failed)
        )
    }
}

/// One durable row per transfer attempt ever seen.
#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    /// Store-assigned surrogate key.
    pub id: i64,
    /// Identifier of the media as known to the messaging transport.
    pub source_id: String,
    pub display_name: Option<String>,
    /// Set once the file is materialized.
    pub local_path: Option<PathBuf>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Last-known progress of a running task. Overwritten on every update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    /// 0..=100
    pub percent_complete: f64,
    /// `None` while the observed speed is zero.
    pub estimated_seconds_remaining: Option<f64>,
}

impl ProgressSnapshot {
    /// Derive a snapshot from raw byte counts and the time spent so far.
    pub fn compute(downloaded: u64, total: u64, elapsed_secs: f64) -> Self {
        let percent_complete = if total > 0 {
            downloaded as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        let speed = if elapsed_secs > 0.0 {
            downloaded as f64 / elapsed_secs
        } else {
            0.0
        };

        let estimated_seconds_remaining = if speed > 0.0 {
            Some(total as f64 / speed - elapsed_secs)
        } else {
            None
        };

        Self {
            percent_complete,
            estimated_seconds_remaining,
        }
    }

    /// Coarse throttle: only whole-percent multiples of `step` are reported.
    /// Stalling on a boundary re-fires on every callback.
    pub fn crosses_report_step(&self, step: u8) -> bool {
        let step = u64::from(step.max(1));
        (self.percent_complete.floor() as u64) % step == 0
    }
}

/// Display name used when the transport does not know the file name.
pub const UNKNOWN_MEDIA_NAME: &str = "unknown media";
