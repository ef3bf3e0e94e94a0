//! Seams to the outside world.
//!
//! The messaging transport (replies, message edits, menus) and the byte-level
//! transfer are consumed only through these traits, so the worker can be
//! driven by a chat bot, the console adapter, or test fakes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::commands::Menu;
use crate::error::{NotifyError, TransferError};
use crate::models::UNKNOWN_MEDIA_NAME;

/// A message previously sent by the bot that can be edited in place.
#[async_trait]
pub trait StatusMessage: Send + Sync {
    async fn edit(&self, text: &str) -> Result<(), NotifyError>;
}

/// Reply capability bound to the request that originated a task.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn reply(&self, text: &str) -> Result<Box<dyn StatusMessage>, NotifyError>;

    /// Reply with selectable options. Transports without buttons get a plain
    /// listing of the labels.
    async fn reply_menu(
        &self,
        text: &str,
        menu: &Menu,
    ) -> Result<Box<dyn StatusMessage>, NotifyError> {
        let mut body = String::from(text);
        for label in menu.labels() {
            body.push_str("\n- ");
            body.push_str(label);
        }
        self.reply(&body).await
    }
}

/// Receives `(downloaded, total)` byte counts while a transfer runs.
#[async_trait]
pub trait ProgressHook: Send + Sync {
    async fn on_progress(&self, downloaded: u64, total: u64);
}

/// What the worker knows about a piece of media.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSource {
    pub source_id: String,
    pub display_name: String,
}

impl MediaSource {
    pub fn new(source_id: impl Into<String>, display_name: Option<String>) -> Self {
        Self {
            source_id: source_id.into(),
            display_name: display_name.unwrap_or_else(|| UNKNOWN_MEDIA_NAME.to_string()),
        }
    }
}

/// Moves the bytes of a media item into `destination_dir`.
///
/// Returns the local path of the materialized file. The worker still checks
/// that the path exists before marking the task completed.
#[async_trait]
pub trait Transfer: Send + Sync {
    async fn transfer(
        &self,
        source: &MediaSource,
        destination_dir: &Path,
        progress: &dyn ProgressHook,
    ) -> Result<PathBuf, TransferError>;
}

/// An inbound media event from the messaging transport.
#[derive(Clone)]
pub struct InboundMedia {
    pub source_id: String,
    pub display_name: Option<String>,
    pub notifier: Arc<dyn Notifier>,
}

impl std::fmt::Debug for InboundMedia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundMedia")
            .field("source_id", &self.source_id)
            .field("display_name", &self.display_name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingNotifier;

    #[test]
    fn media_source_defaults_unknown_name() {
        let source = MediaSource::new("9", None);
        assert_eq!(source.display_name, UNKNOWN_MEDIA_NAME);
        let source = MediaSource::new("9", Some("a.mkv".to_string()));
        assert_eq!(source.display_name, "a.mkv");
    }

    #[tokio::test]
    async fn default_menu_reply_lists_labels() {
        let notifier = RecordingNotifier::new();
        notifier
            .reply_menu("Pick one", &Menu::standard())
            .await
            .unwrap();

        let replies = notifier.replies();
        assert_eq!(replies.len(), 1);
        assert!(replies[0].starts_with("Pick one"));
        for label in Menu::standard().labels() {
            assert!(replies[0].contains(label));
        }
    }
}
