use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::models::{TaskRecord, TaskStatus};

/// Database handle wrapper.
///
/// Notes:
/// - This uses `rusqlite::Connection`, which is not `Sync`.
/// - Callers share it as `Arc<tokio::sync::Mutex<Db>>`; only the worker and the
///   recovery procedure mutate task rows.
/// - `source_id` carries no uniqueness constraint. Callers look a row up before
///   creating one; concurrent producers could still insert duplicates.
pub struct Db {
    conn: Connection,
    path: Option<PathBuf>,
}

/// Determines the per-user app data directory.
///
/// macOS:  ~/Library/Application Support/mediaq
/// Windows: %APPDATA%\\mediaq
/// Linux:  ~/.local/share/mediaq (depending on XDG)
pub fn app_project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("com", "mediaq", "mediaq")
        .ok_or_else(|| anyhow!("failed to resolve per-user app data directory"))
}

/// Create the per-user data directory and return it.
pub fn ensure_data_dir() -> Result<PathBuf> {
    let data = app_project_dirs()?.data_dir().to_path_buf();
    fs::create_dir_all(&data).with_context(|| format!("create data dir: {}", data.display()))?;
    Ok(data)
}

impl Db {
    /// Open the database at the per-user location.
    pub fn open() -> Result<Self> {
        Self::open_at(ensure_data_dir()?.join("mediaq.sqlite3"))
    }

    /// Open (or create) the database file at `path` and create missing tables.
    pub fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create db dir: {}", parent.display()))?;
        }

        let mut conn = Connection::open(&path)
            .with_context(|| format!("open sqlite db: {}", path.display()))?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        create_tables(&mut conn)?;

        Ok(Self {
            conn,
            path: Some(path),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory().context("open in-memory sqlite db")?;
        create_tables(&mut conn)?;
        Ok(Self { conn, path: None })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Insert a new task row. Does not check for an existing `source_id`.
    pub fn create(
        &mut self,
        source_id: &str,
        display_name: Option<&str>,
        status: TaskStatus,
    ) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            r#"
            INSERT INTO downloads (source_id, display_name, local_path, status, created_at, updated_at)
            VALUES (?1, ?2, NULL, ?3, ?4, ?4)
            "#,
            params![source_id, display_name, status.as_str(), now],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Overwrite status and path for every row matching `source_id`.
    ///
    /// `local_path = None` clears the column. Returns the number of rows touched;
    /// zero means there was nothing to update, which is not an error.
    pub fn update_status(
        &mut self,
        source_id: &str,
        status: TaskStatus,
        local_path: Option<&Path>,
    ) -> Result<usize> {
        let now = Utc::now().to_rfc3339();
        let path = local_path.map(|p| p.to_string_lossy().into_owned());
        let changed = self.conn.execute(
            r#"
            UPDATE downloads
            SET status = ?2, local_path = ?3, updated_at = ?4
            WHERE source_id = ?1
            "#,
            params![source_id, status.as_str(), path, now],
        )?;
        if changed == 0 {
            log::debug!("update_status({source_id}): no matching row");
        }
        Ok(changed)
    }

    /// Status and path of the first row for `source_id`.
    pub fn lookup(&self, source_id: &str) -> Result<Option<(TaskStatus, Option<PathBuf>)>> {
        Ok(self.get(source_id)?.map(|r| (r.status, r.local_path)))
    }

    /// Full record of the first row for `source_id`.
    pub fn get(&self, source_id: &str) -> Result<Option<TaskRecord>> {
        let row = self
            .conn
            .query_row(
                r#"
                SELECT id, source_id, display_name, local_path, status, created_at, updated_at
                FROM downloads
                WHERE source_id = ?1
                ORDER BY id ASC
                LIMIT 1
                "#,
                params![source_id],
                Self::row_to_record,
            )
            .optional()?;
        Ok(row)
    }

    /// `(source_id, display_name)` of every row in `status`, oldest first.
    pub fn list_by_status(&self, status: TaskStatus) -> Result<Vec<(String, Option<String>)>> {
        let mut stmt = self.conn.prepare(
            "SELECT source_id, display_name FROM downloads WHERE status = ?1 ORDER BY id ASC",
        )?;

        let rows = stmt.query_map(params![status.as_str()], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Count rows by status.
    pub fn count_by_status(&self, status: TaskStatus) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM downloads WHERE status = ?1",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Whether `source_id` already finished and its file still exists.
    ///
    /// A completed row whose file is gone is demoted back to `pending` (path
    /// cleared) so it can be downloaded again.
    pub fn check_completed(&mut self, source_id: &str) -> Result<bool> {
        match self.lookup(source_id)? {
            Some((TaskStatus::Completed, Some(path))) if path.exists() => Ok(true),
            Some((TaskStatus::Completed, path)) => {
                log::warn!(
                    "Completed file for {} is missing ({:?}), marking as pending",
                    source_id,
                    path
                );
                self.update_status(source_id, TaskStatus::Pending, None)?;
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    fn row_to_record(row: &Row) -> rusqlite::Result<TaskRecord> {
        let id: i64 = row.get(0)?;
        let source_id: String = row.get(1)?;
        let display_name: Option<String> = row.get(2)?;
        let local_path: Option<String> = row.get(3)?;
        let status: String = row.get(4)?;
        let created_at: String = row.get(5)?;
        let updated_at: String = row.get(6)?;

        let status = TaskStatus::from_str(&status).ok_or(rusqlite::Error::InvalidQuery)?;
        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map_err(|_| rusqlite::Error::InvalidQuery)?
            .with_timezone(&Utc);
        let updated_at = DateTime::parse_from_rfc3339(&updated_at)
            .map_err(|_| rusqlite::Error::InvalidQuery)?
            .with_timezone(&Utc);

        Ok(TaskRecord {
            id,
            source_id,
            display_name,
            local_path: local_path.map(PathBuf::from),
            status,
            created_at,
            updated_at,
        })
    }
}

fn create_tables(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS downloads (
          id INTEGER PRIMARY KEY,
          source_id TEXT NOT NULL,
          display_name TEXT NULL,
          local_path TEXT NULL,
          status TEXT NOT NULL,
          created_at TEXT NOT NULL,
          updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_downloads_status ON downloads(status);
        CREATE INDEX IF NOT EXISTS idx_downloads_source_id ON downloads(source_id);

        CREATE TABLE IF NOT EXISTS settings (
          key TEXT PRIMARY KEY,
          value_json TEXT NOT NULL
        );
        "#,
    )
    .context("create tables")?;

    Ok(())
}
