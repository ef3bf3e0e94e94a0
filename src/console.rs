//! Console adapter.
//!
//! Stands in for a chat transport: stdin lines are either commands or paths to
//! local media files, replies go to stdout, and the "download" is a chunked
//! copy of the file into the download directory.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt};

use crate::commands::{dispatch, Command};
use crate::download_manager::DownloadManager;
use crate::error::{NotifyError, TransferError};
use crate::transport::{InboundMedia, MediaSource, Notifier, ProgressHook, StatusMessage, Transfer};

/// Prints replies to stdout. Every reply gets a number so edits can refer to it.
#[derive(Debug, Default)]
pub struct ConsoleNotifier {
    next_id: AtomicUsize,
}

impl ConsoleNotifier {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn reply(&self, text: &str) -> Result<Box<dyn StatusMessage>, NotifyError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        println!("[#{id}] {text}");
        Ok(Box::new(ConsoleMessage { id }))
    }
}

#[derive(Debug)]
pub struct ConsoleMessage {
    id: usize,
}

#[async_trait]
impl StatusMessage for ConsoleMessage {
    async fn edit(&self, text: &str) -> Result<(), NotifyError> {
        println!("[#{} edited] {}", self.id, text);
        Ok(())
    }
}

/// Copies a local file (the media's `source_id` is its path) in chunks.
#[derive(Debug, Clone)]
pub struct LocalFileTransfer {
    chunk_bytes: usize,
}

impl LocalFileTransfer {
    pub fn new(chunk_bytes: usize) -> Self {
        Self {
            chunk_bytes: chunk_bytes.max(1),
        }
    }
}

/// File name for `display_name` that is safe to create in the download dir.
pub fn destination_name(display_name: &str) -> String {
    let name = sanitize_filename::sanitize(display_name);
    if name.trim().is_empty() {
        "download".to_string()
    } else {
        name
    }
}

/// `name` with ` (n)` inserted before the extension; `n == 0` keeps it as is.
pub fn numbered_name(name: &str, n: u32) -> String {
    if n == 0 {
        return name.to_string();
    }
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    match path.extension() {
        Some(ext) => format!("{} ({}).{}", stem, n, ext.to_string_lossy()),
        None => format!("{stem} ({n})"),
    }
}

/// Create a new file for `name` in `dir`, never replacing an existing one.
async fn create_unique(dir: &Path, name: &str) -> std::io::Result<(PathBuf, tokio::fs::File)> {
    let mut n = 0;
    loop {
        let path = dir.join(numbered_name(name, n));
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => n += 1,
            Err(e) => return Err(e),
        }
    }
}

/// The canonical source path when it already lives in `destination_dir`.
async fn already_in_place(from: &Path, destination_dir: &Path) -> Option<PathBuf> {
    let from = tokio::fs::canonicalize(from).await.ok()?;
    let dir = tokio::fs::canonicalize(destination_dir).await.ok()?;
    (from.parent() == Some(dir.as_path())).then_some(from)
}

async fn copy_chunks(
    input: &mut tokio::fs::File,
    output: &mut tokio::fs::File,
    chunk_bytes: usize,
    total: u64,
    progress: &dyn ProgressHook,
) -> Result<u64, TransferError> {
    let mut buffer = vec![0u8; chunk_bytes];
    let mut copied: u64 = 0;
    loop {
        let read = input
            .read(&mut buffer)
            .await
            .map_err(|e| TransferError::Failed(format!("read failed: {e}")))?;
        if read == 0 {
            break;
        }
        output
            .write_all(&buffer[..read])
            .await
            .map_err(|e| TransferError::Failed(format!("write failed: {e}")))?;
        copied += read as u64;
        progress.on_progress(copied, total).await;
    }
    output
        .flush()
        .await
        .map_err(|e| TransferError::Failed(format!("write failed: {e}")))?;
    Ok(copied)
}

#[async_trait]
impl Transfer for LocalFileTransfer {
    async fn transfer(
        &self,
        source: &MediaSource,
        destination_dir: &Path,
        progress: &dyn ProgressHook,
    ) -> Result<PathBuf, TransferError> {
        let from = Path::new(&source.source_id);
        let mut input = tokio::fs::File::open(from)
            .await
            .map_err(|e| TransferError::Failed(format!("cannot open {}: {}", from.display(), e)))?;
        let total = input
            .metadata()
            .await
            .map_err(|e| TransferError::Failed(format!("cannot stat {}: {}", from.display(), e)))?
            .len();

        if let Some(existing) = already_in_place(from, destination_dir).await {
            log::debug!("{} is already in the download dir", existing.display());
            progress.on_progress(total, total).await;
            return Ok(existing);
        }

        let name = destination_name(&source.display_name);
        let (dest, mut output) = create_unique(destination_dir, &name)
            .await
            .map_err(|e| {
                TransferError::Failed(format!(
                    "cannot create {} in {}: {}",
                    name,
                    destination_dir.display(),
                    e
                ))
            })?;

        match copy_chunks(&mut input, &mut output, self.chunk_bytes, total, progress).await {
            Ok(copied) => {
                log::debug!("Copied {} bytes to {}", copied, dest.display());
                Ok(dest)
            }
            Err(err) => {
                drop(output);
                if let Err(e) = tokio::fs::remove_file(&dest).await {
                    log::debug!("Failed to remove partial {}: {}", dest.display(), e);
                }
                Err(err)
            }
        }
    }
}

/// Read lines from `input` until EOF, dispatching commands and submitting
/// every other line as a media path.
pub async fn serve<R>(manager: Arc<DownloadManager>, input: R, notifier: Arc<dyn Notifier>) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines
        .next_line()
        .await
        .context("Failed to read console input")?
    {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = Command::parse(line) {
            dispatch(&manager, command, notifier.as_ref()).await;
            continue;
        }

        let path = Path::new(line);
        if line.starts_with('/') && !path.exists() {
            if let Err(e) = notifier.reply(&format!("Unknown command: {line}")).await {
                log::warn!("Failed to answer unknown command: {}", e);
            }
            continue;
        }

        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
        manager
            .submit(InboundMedia {
                source_id: line.to_string(),
                display_name,
                notifier: notifier.clone(),
            })
            .await;
    }

    log::debug!("Console input closed");
    Ok(())
}
