//! Settings Manager
//!
//! Handles persistence and retrieval of manager settings using SQLite.
//! Settings are stored as JSON values keyed by setting name.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Tunables for the download manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerSettings {
    /// Directory downloaded media is written to.
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Progress messages are edited only on multiples of this percentage.
    #[serde(default = "default_progress_step")]
    pub progress_step_percent: u8,

    /// How often a paused progress report re-checks the pause gate.
    #[serde(default = "default_pause_poll_interval_ms")]
    pub pause_poll_interval_ms: u64,

    /// Chunk size of the local file transfer.
    #[serde(default = "default_transfer_chunk_bytes")]
    pub transfer_chunk_bytes: usize,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            progress_step_percent: default_progress_step(),
            pause_poll_interval_ms: default_pause_poll_interval_ms(),
            transfer_chunk_bytes: default_transfer_chunk_bytes(),
        }
    }
}

impl ManagerSettings {
    pub fn pause_poll_interval(&self) -> Duration {
        Duration::from_millis(self.pause_poll_interval_ms.max(1))
    }
}

// Default value functions
fn default_download_dir() -> PathBuf {
    dirs::download_dir()
        .map(|d| d.join("mediaq"))
        .unwrap_or_else(|| PathBuf::from("./downloads"))
}

fn default_progress_step() -> u8 {
    5
}

fn default_pause_poll_interval_ms() -> u64 {
    1000
}

fn default_transfer_chunk_bytes() -> usize {
    64 * 1024
}

/// Settings keys used in the database.
pub mod keys {
    pub const MANAGER_SETTINGS: &str = "manager_settings";
}

/// Settings manager for reading and writing settings to the database.
pub struct SettingsManager<'a> {
    conn: &'a Connection,
}

impl<'a> SettingsManager<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Get a setting value by key.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let result: Option<String> = self
            .conn
            .query_row(
                "SELECT value_json FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query settings")?;

        match result {
            Some(json) => {
                let value: T =
                    serde_json::from_str(&json).context("Failed to deserialize setting")?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Set a setting value by key.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value).context("Failed to serialize setting")?;

        self.conn
            .execute(
                "INSERT INTO settings (key, value_json) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
                params![key, json],
            )
            .context("Failed to save setting")?;

        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM settings WHERE key = ?1", params![key])
            .context("Failed to delete setting")?;
        Ok(())
    }

    /// Get the manager settings, returning defaults if not set.
    pub fn get_manager_settings(&self) -> Result<ManagerSettings> {
        self.get::<ManagerSettings>(keys::MANAGER_SETTINGS)
            .map(|opt| opt.unwrap_or_default())
    }

    pub fn save_manager_settings(&self, settings: &ManagerSettings) -> Result<()> {
        self.set(keys::MANAGER_SETTINGS, settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;

    #[test]
    fn test_default_settings() {
        let settings = ManagerSettings::default();
        assert_eq!(settings.progress_step_percent, 5);
        assert_eq!(settings.pause_poll_interval(), Duration::from_secs(1));
        assert_eq!(settings.transfer_chunk_bytes, 64 * 1024);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let settings: ManagerSettings =
            serde_json::from_str(r#"{"download_dir":"/srv/media"}"#).unwrap();
        assert_eq!(settings.download_dir, PathBuf::from("/srv/media"));
        assert_eq!(settings.progress_step_percent, 5);
        assert_eq!(settings.pause_poll_interval_ms, 1000);
    }

    #[test]
    fn test_settings_roundtrip() {
        let db = Db::open_in_memory().unwrap();
        let manager = SettingsManager::new(db.conn());

        assert_eq!(
            manager.get_manager_settings().unwrap(),
            ManagerSettings::default()
        );

        let settings = ManagerSettings {
            download_dir: PathBuf::from("/custom/path"),
            progress_step_percent: 10,
            ..ManagerSettings::default()
        };
        manager.save_manager_settings(&settings).unwrap();

        let loaded = manager.get_manager_settings().unwrap();
        assert_eq!(loaded.download_dir, PathBuf::from("/custom/path"));
        assert_eq!(loaded.progress_step_percent, 10);
    }

    #[test]
    fn test_delete_setting() {
        let db = Db::open_in_memory().unwrap();
        let manager = SettingsManager::new(db.conn());

        manager.set("scratch", &"value").unwrap();
        assert_eq!(
            manager.get::<String>("scratch").unwrap(),
            Some("value".to_string())
        );

        manager.delete("scratch").unwrap();
        assert!(manager.get::<String>("scratch").unwrap().is_none());
    }
}
