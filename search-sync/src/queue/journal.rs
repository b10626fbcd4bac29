//! Append-only journal backing the queue.
//!
//! Every enqueued operation and every settlement is written as one JSON line. On open,
//! the journal is replayed: operations without a settlement are returned in their
//! original order and the file is compacted to contain only them.
//!
//! Each record is synced to disk before the call that wrote it returns.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use search_sync_shared::{IndexOperation, OperationStatus};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::SyncError;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
enum JournalRecord {
    Enqueued {
        operation: IndexOperation,
    },
    Settled {
        operation_id: Uuid,
        status: OperationStatus,
    },
}

/// A JSON-lines journal file.
#[derive(Debug)]
pub struct FileJournal {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl FileJournal {
    /// Open the journal at `path`, returning it with the operations left unsettled.
    pub fn open(path: impl AsRef<Path>) -> Result<(Self, Vec<IndexOperation>), SyncError> {
        let path = path.as_ref().to_path_buf();
        let unsettled = if path.exists() {
            Self::replay(&path)?
        } else {
            Vec::new()
        };

        Self::compact(&path, &unsettled)?;

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!(
            path = %path.display(),
            restored = unsettled.len(),
            "Opened queue journal"
        );

        Ok((
            Self {
                path,
                writer: BufWriter::new(file),
            },
            unsettled,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record a newly enqueued operation.
    pub fn append_enqueued(&mut self, operation: &IndexOperation) -> Result<(), SyncError> {
        self.append(&JournalRecord::Enqueued {
            operation: operation.clone(),
        })
    }

    /// Record that an operation reached a terminal status.
    pub fn append_settled(
        &mut self,
        operation_id: Uuid,
        status: OperationStatus,
    ) -> Result<(), SyncError> {
        self.append(&JournalRecord::Settled {
            operation_id,
            status,
        })
    }

    fn append(&mut self, record: &JournalRecord) -> Result<(), SyncError> {
        serde_json::to_writer(&mut self.writer, record)
            .map_err(|e| SyncError::journal(format!("Failed to encode journal record: {}", e)))?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }

    fn replay(path: &Path) -> Result<Vec<IndexOperation>, SyncError> {
        let reader = BufReader::new(File::open(path)?);
        let mut order: Vec<Uuid> = Vec::new();
        let mut operations: HashMap<Uuid, IndexOperation> = HashMap::new();

        for (line_number, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            // a crash can leave a torn final line behind
            let record: JournalRecord = match serde_json::from_str(&line) {
                Ok(record) => record,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        line = line_number + 1,
                        error = %e,
                        "Skipping unreadable journal line"
                    );
                    continue;
                }
            };

            match record {
                JournalRecord::Enqueued { operation } => {
                    if !operations.contains_key(&operation.operation_id) {
                        order.push(operation.operation_id);
                    }
                    operations.insert(operation.operation_id, operation);
                }
                JournalRecord::Settled { operation_id, .. } => {
                    operations.remove(&operation_id);
                }
            }
        }

        let mut unsettled: Vec<IndexOperation> = order
            .into_iter()
            .filter_map(|id| operations.remove(&id))
            .collect();
        unsettled.sort_by_key(|op| op.sequence);
        Ok(unsettled)
    }

    fn compact(path: &Path, unsettled: &[IndexOperation]) -> Result<(), SyncError> {
        let tmp_path = path.with_extension("compacting");
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            for operation in unsettled {
                let record = JournalRecord::Enqueued {
                    operation: operation.clone(),
                };
                serde_json::to_writer(&mut writer, &record).map_err(|e| {
                    SyncError::journal(format!("Failed to encode journal record: {}", e))
                })?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, path)?;
        Self::sync_parent(path)
    }

    /// Persist the directory entry after a rename.
    #[cfg(unix)]
    fn sync_parent(path: &Path) -> Result<(), SyncError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            File::open(parent)?.sync_all()?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_parent(_path: &Path) -> Result<(), SyncError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use search_sync_shared::{ChangeKind, EntityRecord};
    use serde_json::json;

    fn sequenced(mut op: IndexOperation, sequence: u64) -> IndexOperation {
        op.sequence = sequence;
        op
    }

    #[test]
    fn test_replay_returns_unsettled_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.jsonl");

        let create = sequenced(
            IndexOperation::upsert(
                EntityRecord::new("article", "1").with_attribute("title", json!("a")),
                ChangeKind::Create,
            ),
            1,
        );
        let update = sequenced(
            IndexOperation::upsert(EntityRecord::new("article", "1"), ChangeKind::Update),
            2,
        );
        let delete = sequenced(IndexOperation::delete("user", "9"), 3);

        {
            let (mut journal, restored) = FileJournal::open(&path).unwrap();
            assert!(restored.is_empty());

            journal.append_enqueued(&create).unwrap();
            journal.append_enqueued(&update).unwrap();
            journal.append_enqueued(&delete).unwrap();
            journal
                .append_settled(create.operation_id, OperationStatus::Succeeded)
                .unwrap();
        }

        let (_journal, restored) = FileJournal::open(&path).unwrap();
        let ids: Vec<Uuid> = restored.iter().map(|op| op.operation_id).collect();
        assert_eq!(ids, vec![update.operation_id, delete.operation_id]);
    }

    #[test]
    fn test_open_compacts_settled_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.jsonl");

        let op = sequenced(IndexOperation::delete("article", "1"), 1);
        {
            let (mut journal, _) = FileJournal::open(&path).unwrap();
            journal.append_enqueued(&op).unwrap();
            journal
                .append_settled(op.operation_id, OperationStatus::Failed)
                .unwrap();
        }

        let (_journal, restored) = FileJournal::open(&path).unwrap();
        assert!(restored.is_empty());
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_appends_are_on_disk_while_journal_is_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.jsonl");

        let op = sequenced(IndexOperation::delete("article", "1"), 1);
        let (mut journal, _) = FileJournal::open(&path).unwrap();
        journal.append_enqueued(&op).unwrap();

        // the writer is still alive, nothing was dropped or closed
        let contents = fs::read_to_string(journal.path()).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains(&op.operation_id.to_string()));
        assert!(!path.with_extension("compacting").exists());
    }

    #[test]
    fn test_torn_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.jsonl");

        let op = sequenced(IndexOperation::delete("article", "1"), 1);
        {
            let (mut journal, _) = FileJournal::open(&path).unwrap();
            journal.append_enqueued(&op).unwrap();
        }
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"record\":\"enqueued\",\"operat").unwrap();
        drop(file);

        let (_journal, restored) = FileJournal::open(&path).unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].operation_id, op.operation_id);
    }
}
