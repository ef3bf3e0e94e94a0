//! Command Surface
//!
//! Text commands and menu buttons that inspect or steer the download queue.

use std::fmt::Write as _;

use crate::download_manager::DownloadManager;
use crate::models::ProgressSnapshot;
use crate::progress::format_remaining;
use crate::transport::Notifier;

pub const STATUS_LABEL: &str = "📊 Status";
pub const PAUSE_LABEL: &str = "⏸️ Pause download";
pub const RESUME_LABEL: &str = "▶️ Resume download";
pub const CANCEL_LABEL: &str = "🚫 Cancel all";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Status,
    Pause,
    Resume,
    Cancel,
    Menu,
}

impl Command {
    /// Parse `/command` text (an optional `@botname` suffix is ignored) or an
    /// exact menu button label.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        match text {
            STATUS_LABEL => return Some(Command::Status),
            PAUSE_LABEL => return Some(Command::Pause),
            RESUME_LABEL => return Some(Command::Resume),
            CANCEL_LABEL => return Some(Command::Cancel),
            _ => {}
        }

        let word = text.strip_prefix('/')?.split_whitespace().next()?;
        let word = word.split('@').next().unwrap_or(word).to_lowercase();
        Some(match word.as_str() {
            "status" => Command::Status,
            "pause" | "pausar" => Command::Pause,
            "resume" | "continuar" => Command::Resume,
            "cancel" | "cancelar" => Command::Cancel,
            "menu" => Command::Menu,
            _ => return None,
        })
    }
}

/// Rows of selectable options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Menu {
    pub rows: Vec<Vec<&'static str>>,
}

impl Menu {
    pub fn standard() -> Self {
        Self {
            rows: vec![
                vec![STATUS_LABEL],
                vec![PAUSE_LABEL, RESUME_LABEL],
                vec![CANCEL_LABEL],
            ],
        }
    }

    pub fn labels(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.rows.iter().flatten().copied()
    }
}

/// Point-in-time view of the manager for the `status` command.
#[derive(Debug, Clone, Default)]
pub struct StatusReport {
    pub busy: bool,
    pub in_progress: Vec<(String, ProgressSnapshot)>,
    pub queued: usize,
    pub completed: Vec<String>,
    pub failed: Vec<String>,
}

pub fn render_status(report: &StatusReport) -> String {
    let mut out = String::from("📊 **Download status** 📊\n\n");

    if report.busy {
        out.push_str("⏳ Download in progress:\n");
        for (name, snap) in &report.in_progress {
            let _ = writeln!(
                out,
                "- {}: {:.2}% done, {} remaining",
                name,
                snap.percent_complete,
                format_remaining(snap.estimated_seconds_remaining)
            );
        }
    } else {
        out.push_str("✅ No download in progress right now.\n");
    }

    if report.queued > 0 {
        out.push_str("\n🎬 Queued:\n");
        let _ = writeln!(out, "{} item(s) waiting in the queue.", report.queued);
    } else {
        out.push_str("\n📭 The download queue is empty.\n");
    }

    if !report.completed.is_empty() {
        out.push_str("\n✅ **Completed downloads**:\n");
        for path in &report.completed {
            let _ = writeln!(out, "- {path}");
        }
    }

    if !report.failed.is_empty() {
        out.push_str("\n❌ **Failed downloads**:\n");
        for name in &report.failed {
            let _ = writeln!(out, "- {name}");
        }
    }

    out
}

/// Run `command` against the manager and answer through `notifier`.
pub async fn dispatch(manager: &DownloadManager, command: Command, notifier: &dyn Notifier) {
    log::info!("Command received: {:?}", command);

    let sent = match command {
        Command::Status => notifier.reply(&render_status(&manager.status_report())).await,
        Command::Pause => {
            manager.pause();
            notifier.reply("⏸️ Downloads paused.").await
        }
        Command::Resume => {
            manager.resume();
            notifier.reply("▶️ Downloads resumed.").await
        }
        Command::Cancel => {
            manager.cancel();
            notifier.reply("🚫 All queued downloads were cancelled.").await
        }
        Command::Menu => {
            notifier
                .reply_menu("📋 **Options** 📋\nChoose an option:", &Menu::standard())
                .await
        }
    };

    if let Err(e) = sent {
        log::warn!("Failed to answer {:?} command: {}", command, e);
    }
}
