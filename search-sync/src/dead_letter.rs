//! Dead-letter sinks for operations that could not be synchronized.
//!
//! Sinks are append-only. Each failed operation is recorded exactly once, together with
//! the history of its failed attempts, for operators to inspect and replay.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use search_sync_shared::{AttemptFailure, IndexOperation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::SyncError;

/// A dead-lettered operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub operation: IndexOperation,
    pub failure_history: Vec<AttemptFailure>,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetterRecord {
    pub fn new(operation: &IndexOperation, failure_history: &[AttemptFailure]) -> Self {
        Self {
            operation: operation.clone(),
            failure_history: failure_history.to_vec(),
            dead_lettered_at: Utc::now(),
        }
    }
}

/// Destination for operations that exhausted their attempts or failed terminally.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Append a record for `operation`.
    async fn record(
        &self,
        operation: &IndexOperation,
        failure_history: &[AttemptFailure],
    ) -> Result<(), SyncError>;
}

/// Keeps dead letters in memory. Used when no dead-letter file is configured.
#[derive(Debug, Default)]
pub struct MemoryDeadLetterSink {
    records: Mutex<Vec<DeadLetterRecord>>,
}

impl MemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn records(&self) -> Vec<DeadLetterRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DeadLetterSink for MemoryDeadLetterSink {
    async fn record(
        &self,
        operation: &IndexOperation,
        failure_history: &[AttemptFailure],
    ) -> Result<(), SyncError> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| SyncError::journal("dead-letter store poisoned"))?;
        records.push(DeadLetterRecord::new(operation, failure_history));
        Ok(())
    }
}

/// Appends dead letters to a JSON-lines file, one record per line.
#[derive(Debug)]
pub struct JsonLinesDeadLetterSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesDeadLetterSink {
    /// Open (or create) the dead-letter file for appending.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(path = %path.display(), "Opened dead-letter file");
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back every record in the file.
    pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<DeadLetterRecord>, SyncError> {
        let reader = BufReader::new(File::open(path)?);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(&line)
                .map_err(|e| SyncError::journal(format!("Invalid dead-letter record: {}", e)))?;
            records.push(record);
        }
        Ok(records)
    }
}

#[async_trait]
impl DeadLetterSink for JsonLinesDeadLetterSink {
    async fn record(
        &self,
        operation: &IndexOperation,
        failure_history: &[AttemptFailure],
    ) -> Result<(), SyncError> {
        let record = DeadLetterRecord::new(operation, failure_history);
        let mut line = serde_json::to_string(&record)
            .map_err(|e| SyncError::journal(format!("Failed to encode dead letter: {}", e)))?;
        line.push('\n');

        let mut file = self
            .file
            .lock()
            .map_err(|_| SyncError::journal("dead-letter file poisoned"))?;
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}
