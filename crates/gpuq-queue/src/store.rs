//! Durable storage behind the ticket queue
//!
//! A [`QueueStore`] owns the persisted ticket sequence and offers one
//! primitive: an atomic read-modify-write. Every queue operation is expressed
//! as a single transaction, so interleaving between processes is resolved by
//! the store rather than by anything held in memory.

use gpuq_core::{GpuqError, GpuqResult, Ticket};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

use crate::lock;

/// Name of the persisted queue document inside the queue directory
pub const STATE_FILE: &str = "queue.json";
/// Name of the lock file inside the queue directory
pub const LOCK_FILE: &str = "queue.lock";

const FORMAT_VERSION: u32 = 1;

/// Storage primitive for the ticket sequence
pub trait QueueStore: Send + Sync {
    /// Run `f` against the current sequence with exclusive access.
    ///
    /// `f` returns whether it mutated the sequence; the new state is persisted
    /// only in that case.
    fn transact(&self, f: &mut dyn FnMut(&mut VecDeque<Ticket>) -> bool) -> GpuqResult<()>;
}

/// In-process store, for tests and single-process embedding
#[derive(Default)]
pub struct MemoryQueueStore {
    tickets: Mutex<VecDeque<Ticket>>,
}

impl MemoryQueueStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl QueueStore for MemoryQueueStore {
    fn transact(&self, f: &mut dyn FnMut(&mut VecDeque<Ticket>) -> bool) -> GpuqResult<()> {
        let mut tickets = self
            .tickets
            .lock()
            .map_err(|_| GpuqError::Storage("in-memory queue lock poisoned".to_string()))?;
        f(&mut *tickets);
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct QueueDocument {
    version: u32,
    tickets: VecDeque<Ticket>,
}

/// File-backed store shared by every process on the host
///
/// Layout inside the queue directory:
/// - `queue.lock`: held with an exclusive `flock` for the whole transaction
/// - `queue.json`: the ticket sequence, replaced by an atomic rename
pub struct FileQueueStore {
    dir: PathBuf,
}

impl FileQueueStore {
    /// Open (creating if needed) the queue directory at `dir`
    pub fn open(dir: impl Into<PathBuf>) -> GpuqResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            GpuqError::Storage(format!(
                "Failed to create queue directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        Ok(Self { dir })
    }

    /// Directory holding the queue files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    fn lock(&self) -> GpuqResult<File> {
        let path = self.dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| storage_error("open lock file", &path, e))?;
        lock::acquire_exclusive(&file).map_err(|e| storage_error("lock", &path, e))?;
        Ok(file)
    }

    fn load(&self) -> GpuqResult<VecDeque<Ticket>> {
        let path = self.state_path();
        let content = match std::fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(VecDeque::new()),
            Err(e) => return Err(storage_error("read", &path, e)),
        };

        let document: QueueDocument = serde_json::from_slice(&content).map_err(|e| {
            GpuqError::Storage(format!("Queue file {} is corrupt: {}", path.display(), e))
        })?;

        if document.version != FORMAT_VERSION {
            return Err(GpuqError::Storage(format!(
                "Queue file {} has unsupported version {}",
                path.display(),
                document.version
            )));
        }

        Ok(document.tickets)
    }

    fn persist(&self, tickets: VecDeque<Ticket>) -> GpuqResult<()> {
        let path = self.state_path();
        let document = QueueDocument {
            version: FORMAT_VERSION,
            tickets,
        };
        let json = serde_json::to_vec_pretty(&document)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)
            .map_err(|e| storage_error("create temp file in", &self.dir, e))?;
        tmp.write_all(&json)
            .map_err(|e| storage_error("write", &path, e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| storage_error("sync", &path, e))?;
        tmp.persist(&path)
            .map_err(|e| storage_error("replace", &path, e.error))?;

        debug!(path = %path.display(), tickets = document.tickets.len(), "Queue persisted");
        Ok(())
    }
}

impl QueueStore for FileQueueStore {
    fn transact(&self, f: &mut dyn FnMut(&mut VecDeque<Ticket>) -> bool) -> GpuqResult<()> {
        let _guard = self.lock()?;
        let mut tickets = self.load()?;
        if f(&mut tickets) {
            self.persist(tickets)?;
        }
        Ok(())
    }
}

fn storage_error(action: &str, path: &Path, err: std::io::Error) -> GpuqError {
    GpuqError::Storage(format!("Failed to {} {}: {}", action, path.display(), err))
}
