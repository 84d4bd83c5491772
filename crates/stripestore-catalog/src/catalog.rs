//! Catalog implementation

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use stripestore_common::{BlockRef, Error, FileId, FileRecord, Result};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Outcome of startup reconciliation
#[derive(Debug, Default)]
pub struct Reconciliation {
    /// Blocks referenced by dropped incomplete records; they live on as
    /// node-side orphans until deleted or reaped
    pub orphaned_blocks: Vec<BlockRef>,
    /// Incomplete records dropped
    pub dropped_records: usize,
}

/// Durable mapping from file name to its block layout.
///
/// File names are unique case-insensitively. Mutations follow a single-writer
/// discipline per name: a name is reserved while its upload is in flight, and
/// the in-memory index only ever holds complete records.
pub struct Catalog {
    dir: PathBuf,
    /// Lowercased name -> complete record
    index: RwLock<HashMap<String, FileRecord>>,
    /// Lowercased names with an upload in flight
    pending: Mutex<HashSet<String>>,
}

impl Catalog {
    /// Load the catalog from `dir`, dropping partial entries left by a crash
    pub async fn open(dir: impl Into<PathBuf>) -> Result<(Self, Reconciliation)> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;

        let mut index = HashMap::new();
        let mut reconciliation = Reconciliation::default();

        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let record: FileRecord = match tokio::fs::read(&path).await {
                Ok(bytes) => match serde_json::from_slice(&bytes) {
                    Ok(record) => record,
                    Err(e) => {
                        warn!(path = %path.display(), "unreadable catalog record: {e}");
                        continue;
                    }
                },
                Err(e) => {
                    warn!(path = %path.display(), "failed to read catalog record: {e}");
                    continue;
                }
            };

            if record.complete {
                index.insert(record.file_name.to_lowercase(), record);
            } else {
                info!(
                    file = %record.file_name,
                    blocks = record.blocks.len(),
                    "dropping incomplete catalog record"
                );
                reconciliation.orphaned_blocks.extend(record.blocks);
                reconciliation.dropped_records += 1;
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!(path = %path.display(), "failed to drop record: {e}");
                }
            }
        }

        info!(
            files = index.len(),
            dropped = reconciliation.dropped_records,
            "catalog loaded"
        );
        Ok((
            Self {
                dir,
                index: RwLock::new(index),
                pending: Mutex::new(HashSet::new()),
            },
            reconciliation,
        ))
    }

    /// Look up a complete record by name (case-insensitive)
    #[must_use]
    pub fn get(&self, file_name: &str) -> Option<FileRecord> {
        self.index.read().get(&file_name.to_lowercase()).cloned()
    }

    /// Whether a name is taken, either published or reserved by an in-flight
    /// upload
    #[must_use]
    pub fn contains(&self, file_name: &str) -> bool {
        let key = file_name.to_lowercase();
        self.index.read().contains_key(&key) || self.pending.lock().contains(&key)
    }

    /// All complete records, sorted by name
    #[must_use]
    pub fn list(&self) -> Vec<FileRecord> {
        let mut records: Vec<FileRecord> = self.index.read().values().cloned().collect();
        records.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        records
    }

    /// Case-insensitive substring search over file names
    #[must_use]
    pub fn search(&self, query: &str) -> Vec<FileRecord> {
        let needle = query.to_lowercase();
        let mut records: Vec<FileRecord> = self
            .index
            .read()
            .iter()
            .filter(|(name, _)| name.contains(&needle))
            .map(|(_, record)| record.clone())
            .collect();
        records.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        records
    }

    /// Count of complete records and their total declared size
    #[must_use]
    pub fn stats(&self) -> (usize, u64) {
        let index = self.index.read();
        let total_size = index.values().map(|r| r.size).sum();
        (index.len(), total_size)
    }

    /// Reserve a name and persist the incomplete record before any block is
    /// dispatched. Fails when the name is already taken.
    pub async fn begin(&self, record: &FileRecord) -> Result<()> {
        debug_assert!(!record.complete);
        let key = record.file_name.to_lowercase();
        {
            let index = self.index.read();
            let mut pending = self.pending.lock();
            if index.contains_key(&key) || !pending.insert(key.clone()) {
                return Err(Error::validation(format!(
                    "file name already exists: {}",
                    record.file_name
                )));
            }
        }
        if let Err(e) = self.write_record(record).await {
            self.pending.lock().remove(&key);
            return Err(e);
        }
        debug!(file = %record.file_name, "catalog intent recorded");
        Ok(())
    }

    /// Publish a record: rewrite it complete and make it visible to readers
    pub async fn publish(&self, mut record: FileRecord) -> Result<()> {
        record.complete = true;
        self.write_record(&record).await?;
        let key = record.file_name.to_lowercase();
        self.index.write().insert(key.clone(), record);
        self.pending.lock().remove(&key);
        Ok(())
    }

    /// Abort an in-flight upload: drop the intent record and free the name
    pub async fn abort(&self, file_id: FileId, file_name: &str) -> Result<()> {
        let path = self.record_path(file_id);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), "failed to drop aborted record: {e}");
            }
        }
        self.pending.lock().remove(&file_name.to_lowercase());
        Ok(())
    }

    /// Remove a published record, returning it for block cleanup
    pub async fn remove(&self, file_name: &str) -> Result<FileRecord> {
        let key = file_name.to_lowercase();
        let record = self
            .index
            .write()
            .remove(&key)
            .ok_or_else(|| Error::FileNotFound(file_name.to_string()))?;
        let path = self.record_path(record.file_id);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), "failed to remove record file: {e}");
            }
        }
        Ok(record)
    }

    fn record_path(&self, file_id: FileId) -> PathBuf {
        self.dir.join(format!("{file_id}.json"))
    }

    async fn write_record(&self, record: &FileRecord) -> Result<()> {
        let path = self.record_path(record.file_id);
        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        write_atomic(&path, &json).await
    }
}

async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
