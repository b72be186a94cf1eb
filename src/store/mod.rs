//! Append-only results sink.
//!
//! The core only assumes that a record has a unique id and a JSON payload.
//! [`JsonlSink`] writes one record per line for later aggregation;
//! [`MemorySink`] keeps records in memory for tests and the `play` command.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{GameError, Result};

/// Record type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Roles assigned, game about to start
    GameStarted,
    /// One round closed: events and graph snapshots
    RoundCommitted,
    /// Game over with an outcome
    GameFinished,
    /// Game aborted by an unrecoverable error
    GameFailed,
    /// Game stopped by cancellation before it finished
    GameCancelled,
    /// Aggregate of a whole batch
    BatchSummary,
}

/// One entry of the results log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreRecord {
    /// Unique record id
    pub id: Uuid,
    /// Record type
    pub kind: RecordKind,
    /// Batch the record belongs to
    pub batch_id: Uuid,
    /// Game the record belongs to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_id: Option<Uuid>,
    /// Game index inside the batch, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_index: Option<usize>,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    /// Record body
    pub payload: serde_json::Value,
}

impl StoreRecord {
    /// Create a record with a fresh id
    pub fn new(kind: RecordKind, batch_id: Uuid, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            batch_id,
            game_id: None,
            game_index: None,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Attach the game this record belongs to
    pub fn for_game(mut self, game_id: Uuid, game_index: usize) -> Self {
        self.game_id = Some(game_id);
        self.game_index = Some(game_index);
        self
    }
}

/// Destination for result records.
///
/// Shared by every game of a batch, so implementations must be thread safe.
pub trait ResultSink: Send + Sync {
    /// Append one record
    fn append(&self, record: StoreRecord) -> Result<()>;

    /// Flush buffered records
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ResultSink for NullSink {
    fn append(&self, _record: StoreRecord) -> Result<()> {
        Ok(())
    }
}

/// Sink that keeps records in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<StoreRecord>>,
}

impl MemorySink {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every record so far
    pub fn records(&self) -> Vec<StoreRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Records of one kind
    pub fn of_kind(&self, kind: RecordKind) -> Vec<StoreRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.kind == kind)
            .collect()
    }
}

impl ResultSink for MemorySink {
    fn append(&self, record: StoreRecord) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| GameError::Store("memory sink lock poisoned".to_string()))?
            .push(record);
        Ok(())
    }
}

/// JSON Lines file sink
#[derive(Debug)]
pub struct JsonlSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonlSink {
    /// Open `path` for appending, creating parent directories
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// File being written
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record back from a JSONL file
    pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<StoreRecord>> {
        let content = std::fs::read_to_string(path)?;
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(GameError::from))
            .collect()
    }
}

impl ResultSink for JsonlSink {
    fn append(&self, record: StoreRecord) -> Result<()> {
        let line = serde_json::to_string(&record)?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| GameError::Store("results file lock poisoned".to_string()))?;
        writeln!(writer, "{line}").map_err(|e| GameError::Store(e.to_string()))?;
        writer.flush().map_err(|e| GameError::Store(e.to_string()))
    }

    fn flush(&self) -> Result<()> {
        self.writer
            .lock()
            .map_err(|_| GameError::Store("results file lock poisoned".to_string()))?
            .flush()
            .map_err(|e| GameError::Store(e.to_string()))
    }
}
