//! Durable checkpoint storage backed by append-only JSON-lines files
//!
//! [`FileCheckpointSaver`] writes one file per thread under a directory:
//!
//! ```text
//! checkpoints/
//! ├── session-1.jsonl        {"step":0,...}\n{"step":1,...}\n
//! └── user%3A42.jsonl        thread id "user:42", escaped
//! ```
//!
//! Each `put` appends one line and syncs the file before returning, so an `Ok`
//! means the checkpoint is on disk. A `put` that fails after writing truncates
//! its line away again. A line torn by a crash mid-write is dropped on the next
//! read and truncated away by the next `put`; every checkpoint that was
//! acknowledged stays readable.
//!
//! Operations on one thread are serialized through a per-thread async lock,
//! which also caches the thread's latest checkpoint and file length. `put` and
//! `get_latest` parse the file only the first time a thread is touched, or when
//! its length no longer matches the cache. Cache entries are kept until
//! [`delete_thread`](CheckpointSaver::delete_thread), one per thread touched.
//! Distinct threads touch distinct files and proceed in parallel.

use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::checkpoint::Checkpoint;
use crate::error::{CheckpointError, Result};
use crate::serializer::{JsonSerializer, SerializerProtocol};
use crate::traits::{check_next_step, tail, CheckpointSaver};

const EXTENSION: &str = "jsonl";

/// Cached end of a thread's history file
#[derive(Debug, Default)]
struct Tail {
    latest: Option<Checkpoint>,
    /// Length of the prefix made of complete lines
    intact: u64,
    /// Length of the file, including a torn trailing line
    on_disk: u64,
}

type ThreadSlot = Arc<Mutex<Option<Tail>>>;

/// File-backed checkpoint saver with full per-thread history
#[derive(Debug, Clone)]
pub struct FileCheckpointSaver {
    dir: PathBuf,
    threads: Arc<DashMap<String, ThreadSlot>>,
    serializer: JsonSerializer,
    #[cfg(test)]
    fail_sync: Arc<std::sync::atomic::AtomicBool>,
}

impl FileCheckpointSaver {
    /// Open (and create if needed) a checkpoint directory
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        tracing::debug!(dir = %dir.display(), "Opened file checkpoint store");
        Ok(Self {
            dir,
            threads: Arc::new(DashMap::new()),
            serializer: JsonSerializer::new(),
            #[cfg(test)]
            fail_sync: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        })
    }

    /// Directory holding the thread files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Ids of all threads that have a history file
    pub async fn thread_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(decode_thread_id)
            {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn path_for(&self, thread_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", encode_thread_id(thread_id), EXTENSION))
    }

    fn slot_for(&self, thread_id: &str) -> ThreadSlot {
        self.threads
            .entry(thread_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// Read a history file, dropping a torn trailing line
    async fn read_file(&self, path: &Path) -> Result<(Vec<u8>, usize)> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(e.into()),
        };

        let intact = bytes
            .iter()
            .rposition(|b| *b == b'\n')
            .map(|pos| pos + 1)
            .unwrap_or(0);

        if intact < bytes.len() {
            tracing::warn!(
                path = %path.display(),
                dropped_bytes = bytes.len() - intact,
                "Ignoring torn trailing checkpoint line"
            );
        }
        Ok((bytes, intact))
    }

    async fn read_history(&self, path: &Path) -> Result<Vec<Checkpoint>> {
        let (bytes, intact) = self.read_file(path).await?;
        let mut history = Vec::new();
        for line in bytes[..intact].split(|b| *b == b'\n') {
            if line.is_empty() {
                continue;
            }
            history.push(self.serializer.loads::<Checkpoint>(line)?);
        }
        Ok(history)
    }

    /// Load only the last complete line of a history file
    async fn read_tail(&self, path: &Path) -> Result<Tail> {
        let (bytes, intact) = self.read_file(path).await?;
        let body = &bytes[..intact.saturating_sub(1)];
        let start = body
            .iter()
            .rposition(|b| *b == b'\n')
            .map(|pos| pos + 1)
            .unwrap_or(0);

        let line = &body[start..];
        let latest = if line.is_empty() {
            None
        } else {
            Some(self.serializer.loads::<Checkpoint>(line)?)
        };
        Ok(Tail {
            latest,
            intact: intact as u64,
            on_disk: bytes.len() as u64,
        })
    }

    /// Reload the cached tail unless it still matches the file's length
    async fn refresh(&self, cached: &mut Option<Tail>, path: &Path) -> Result<()> {
        let on_disk = match fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };
        if cached.as_ref().map(|tail| tail.on_disk) != Some(on_disk) {
            *cached = Some(self.read_tail(path).await?);
        }
        Ok(())
    }

    async fn sync(&self, file: &File) -> std::io::Result<()> {
        #[cfg(test)]
        if self.fail_sync.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(std::io::Error::new(std::io::ErrorKind::Other, "sync failed"));
        }
        file.sync_data().await
    }
}

#[async_trait]
impl CheckpointSaver for FileCheckpointSaver {
    async fn put(&self, checkpoint: Checkpoint) -> Result<()> {
        let slot = self.slot_for(&checkpoint.thread_id);
        let mut cached = slot.lock().await;

        let path = self.path_for(&checkpoint.thread_id);
        self.refresh(&mut cached, &path).await?;
        let tail = cached.get_or_insert_with(Tail::default);
        check_next_step(tail.latest.as_ref(), &checkpoint)?;

        let mut line = self.serializer.dumps(&checkpoint)?;
        if line.contains(&b'\n') {
            return Err(CheckpointError::Invalid(
                "serialized checkpoint spans multiple lines".to_string(),
            ));
        }
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let intact = tail.intact;
        if intact < tail.on_disk {
            file.set_len(intact).await?;
            tail.on_disk = intact;
        }

        let written = match file.write_all(&line).await {
            Ok(()) => self.sync(&file).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            // The line must not be read back as committed.
            if let Err(rollback) = file.set_len(intact).await {
                tracing::warn!(
                    path = %path.display(),
                    error = %rollback,
                    "Could not truncate unacknowledged checkpoint line"
                );
            }
            *cached = None;
            return Err(e.into());
        }

        tail.intact = intact + line.len() as u64;
        tail.on_disk = tail.intact;
        tracing::debug!(
            thread_id = %checkpoint.thread_id,
            step = checkpoint.step,
            "Checkpoint persisted"
        );
        tail.latest = Some(checkpoint);
        Ok(())
    }

    async fn get_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let slot = self.slot_for(thread_id);
        let mut cached = slot.lock().await;
        self.refresh(&mut cached, &self.path_for(thread_id)).await?;
        Ok(cached.as_ref().and_then(|tail| tail.latest.clone()))
    }

    async fn list(&self, thread_id: &str, limit: Option<usize>) -> Result<Vec<Checkpoint>> {
        let slot = self.slot_for(thread_id);
        let _guard = slot.lock().await;
        let history = self.read_history(&self.path_for(thread_id)).await?;
        Ok(tail(history, limit))
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        let slot = self.slot_for(thread_id);
        let mut cached = slot.lock().await;
        *cached = None;
        let removed = match fs::remove_file(self.path_for(thread_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        };
        drop(cached);
        drop(slot);
        // Keep the entry if another call is holding or waiting on it.
        self.threads
            .remove_if(thread_id, |_, slot| Arc::strong_count(slot) == 1);
        removed
    }
}

/// Escape a thread id into a portable file stem
///
/// ASCII alphanumerics, `-` and `_` pass through; every other byte becomes `%XX`.
fn encode_thread_id(thread_id: &str) -> String {
    let mut out = String::with_capacity(thread_id.len());
    for byte in thread_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

fn decode_thread_id(stem: &str) -> Option<String> {
    let bytes = stem.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = stem.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
