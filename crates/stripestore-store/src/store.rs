//! Block store implementation

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use stripestore_common::{checksum, checksums_equal, Error, Result};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

const PAYLOAD_EXT: &str = "blk";
const SIDECAR_EXT: &str = "meta";

/// Sidecar record persisted next to every payload
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockSidecar {
    /// Payload length in bytes
    pub size: u64,
    /// SHA-256 of the payload, lowercase hex
    pub checksum: String,
    /// When the block was stored
    pub created_at: DateTime<Utc>,
    /// Whether the block is a stripe's parity member
    #[serde(default)]
    pub is_parity: bool,
}

/// Result of a successful store
#[derive(Clone, Debug)]
pub struct StoredBlock {
    pub checksum: String,
    pub stored_at: DateTime<Utc>,
    pub size: u64,
}

/// Durable key→bytes store with per-block integrity metadata.
///
/// Operations on distinct block ids proceed in parallel; operations on the
/// same id are serialized through a per-id async lock. Space accounting is
/// advisory: concurrent stores may race the admission check.
pub struct BlockStore {
    root: PathBuf,
    capacity: u64,
    used: AtomicU64,
    data_blocks: AtomicU64,
    parity_blocks: AtomicU64,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl BlockStore {
    /// Open (or create) a block store rooted at `root` with an advisory
    /// capacity in bytes. Scans existing blocks to rebuild space accounting.
    pub async fn open(root: impl Into<PathBuf>, capacity: u64) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;

        let store = Self {
            root,
            capacity,
            used: AtomicU64::new(0),
            data_blocks: AtomicU64::new(0),
            parity_blocks: AtomicU64::new(0),
            locks: Mutex::new(HashMap::new()),
        };
        store.scan().await?;
        Ok(store)
    }

    async fn scan(&self) -> Result<()> {
        let mut used = 0u64;
        let mut data = 0u64;
        let mut parity = 0u64;

        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(PAYLOAD_EXT) {
                continue;
            }
            let meta_path = path.with_extension(SIDECAR_EXT);
            match read_sidecar(&meta_path).await {
                Ok(Some(sidecar)) => {
                    used += entry.metadata().await?.len();
                    if sidecar.is_parity {
                        parity += 1;
                    } else {
                        data += 1;
                    }
                }
                Ok(None) => {
                    // Payload without a sidecar: an orphan, counted and
                    // reaped by cleanup_orphans.
                    debug!(path = %path.display(), "payload without sidecar");
                }
                Err(e) => warn!(path = %meta_path.display(), "unreadable sidecar: {e}"),
            }
        }

        self.used.store(used, Ordering::SeqCst);
        self.data_blocks.store(data, Ordering::SeqCst);
        self.parity_blocks.store(parity, Ordering::SeqCst);
        Ok(())
    }

    /// Store a block, overwriting any previous content under the same id
    pub async fn store_block(
        &self,
        block_id: &str,
        data: Bytes,
        is_parity: bool,
    ) -> Result<StoredBlock> {
        validate_block_id(block_id)?;

        let required = data.len() as u64;
        let available = self.available_space();
        if required > available {
            return Err(Error::InsufficientSpace {
                required,
                available,
            });
        }

        let lock = self.lock_for(block_id);
        let _guard = lock.lock().await;

        // Overwrite: retire the previous artifacts from the accounting.
        let previous = read_sidecar(&self.sidecar_path(block_id)).await?;

        let sum = checksum(&data);
        let now = Utc::now();
        let sidecar = BlockSidecar {
            size: data.len() as u64,
            checksum: sum.clone(),
            created_at: now,
            is_parity,
        };

        write_atomic(&self.payload_path(block_id), &data).await?;
        let sidecar_json = serde_json::to_vec(&sidecar)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        write_atomic(&self.sidecar_path(block_id), &sidecar_json).await?;

        if let Some(prev) = previous {
            self.used.fetch_sub(prev.size.min(self.used.load(Ordering::SeqCst)), Ordering::SeqCst);
            self.count_for(prev.is_parity).fetch_sub(1, Ordering::SeqCst);
        }
        self.used.fetch_add(sidecar.size, Ordering::SeqCst);
        self.count_for(is_parity).fetch_add(1, Ordering::SeqCst);

        debug!(block_id, size = sidecar.size, is_parity, "stored block");
        Ok(StoredBlock {
            checksum: sum,
            stored_at: now,
            size: sidecar.size,
        })
    }

    /// Retrieve a block, verifying its payload against the sidecar checksum
    pub async fn retrieve_block(&self, block_id: &str) -> Result<(Bytes, BlockSidecar)> {
        validate_block_id(block_id)?;
        let lock = self.lock_for(block_id);
        let _guard = lock.lock().await;

        let sidecar = read_sidecar(&self.sidecar_path(block_id))
            .await?
            .ok_or_else(|| Error::BlockNotFound(block_id.to_string()))?;

        let payload = match tokio::fs::read(self.payload_path(block_id)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::BlockNotFound(block_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let actual = checksum(&payload);
        if !checksums_equal(&actual, &sidecar.checksum) {
            warn!(block_id, "integrity failure on retrieve");
            return Err(Error::Integrity(format!(
                "expected {}, got {actual}",
                sidecar.checksum
            )));
        }

        Ok((Bytes::from(payload), sidecar))
    }

    /// Delete a block's payload and sidecar
    pub async fn delete_block(&self, block_id: &str) -> Result<()> {
        validate_block_id(block_id)?;
        let lock = self.lock_for(block_id);
        let _guard = lock.lock().await;

        let sidecar = read_sidecar(&self.sidecar_path(block_id)).await?;
        let payload_existed = remove_if_exists(&self.payload_path(block_id)).await?;
        let sidecar_existed = remove_if_exists(&self.sidecar_path(block_id)).await?;

        if !payload_existed && !sidecar_existed {
            return Err(Error::BlockNotFound(block_id.to_string()));
        }

        if let Some(prev) = sidecar {
            if payload_existed {
                self.used
                    .fetch_sub(prev.size.min(self.used.load(Ordering::SeqCst)), Ordering::SeqCst);
            }
            self.count_for(prev.is_parity).fetch_sub(1, Ordering::SeqCst);
        }
        debug!(block_id, "deleted block");
        Ok(())
    }

    /// Check whether a block is fully present (payload and sidecar)
    pub async fn block_exists(&self, block_id: &str) -> bool {
        if validate_block_id(block_id).is_err() {
            return false;
        }
        let payload = tokio::fs::try_exists(self.payload_path(block_id))
            .await
            .unwrap_or(false);
        let sidecar = tokio::fs::try_exists(self.sidecar_path(block_id))
            .await
            .unwrap_or(false);
        payload && sidecar
    }

    /// List the ids of all fully-present blocks
    pub async fn list_blocks(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(PAYLOAD_EXT) {
                continue;
            }
            if !tokio::fs::try_exists(path.with_extension(SIDECAR_EXT))
                .await
                .unwrap_or(false)
            {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Verify a block's payload against an expected checksum.
    ///
    /// Missing blocks verify false; this never errors.
    pub async fn verify_integrity(&self, block_id: &str, expected: &str) -> bool {
        if validate_block_id(block_id).is_err() {
            return false;
        }
        match tokio::fs::read(self.payload_path(block_id)).await {
            Ok(payload) => checksums_equal(&checksum(&payload), expected),
            Err(_) => false,
        }
    }

    /// Remove artifacts that lost their counterpart: sidecars without a
    /// payload and payloads without a sidecar. Returns the number removed.
    pub async fn cleanup_orphans(&self) -> Result<usize> {
        let mut removed = 0usize;
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
                continue;
            };
            match ext {
                SIDECAR_EXT => {
                    if !tokio::fs::try_exists(path.with_extension(PAYLOAD_EXT))
                        .await
                        .unwrap_or(false)
                        && remove_if_exists(&path).await?
                    {
                        warn!(path = %path.display(), "removed orphan sidecar");
                        removed += 1;
                    }
                }
                PAYLOAD_EXT => {
                    // Orphan payloads were never admitted into the space
                    // accounting (used grows only once both artifacts land),
                    // so removal does not touch `used`.
                    if !tokio::fs::try_exists(path.with_extension(SIDECAR_EXT))
                        .await
                        .unwrap_or(false)
                        && remove_if_exists(&path).await?
                    {
                        warn!(path = %path.display(), "removed orphan payload");
                        removed += 1;
                    }
                }
                _ => {}
            }
        }
        Ok(removed)
    }

    /// Bytes currently stored in payloads
    #[must_use]
    pub fn used_space(&self) -> u64 {
        self.used.load(Ordering::SeqCst)
    }

    /// Bytes still available under the advisory capacity
    #[must_use]
    pub fn available_space(&self) -> u64 {
        self.capacity.saturating_sub(self.used_space())
    }

    /// Advisory capacity in bytes
    #[must_use]
    pub const fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Total fully-present blocks
    #[must_use]
    pub fn total_blocks(&self) -> u64 {
        self.data_blocks() + self.parity_blocks()
    }

    /// Data blocks stored
    #[must_use]
    pub fn data_blocks(&self) -> u64 {
        self.data_blocks.load(Ordering::SeqCst)
    }

    /// Parity blocks stored
    #[must_use]
    pub fn parity_blocks(&self) -> u64 {
        self.parity_blocks.load(Ordering::SeqCst)
    }

    fn count_for(&self, is_parity: bool) -> &AtomicU64 {
        if is_parity {
            &self.parity_blocks
        } else {
            &self.data_blocks
        }
    }

    fn lock_for(&self, block_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(block_id.to_string())
            .or_default()
            .clone()
    }

    fn payload_path(&self, block_id: &str) -> PathBuf {
        self.root.join(format!("{block_id}.{PAYLOAD_EXT}"))
    }

    fn sidecar_path(&self, block_id: &str) -> PathBuf {
        self.root.join(format!("{block_id}.{SIDECAR_EXT}"))
    }
}

fn validate_block_id(block_id: &str) -> Result<()> {
    if block_id.is_empty() {
        return Err(Error::InvalidBlockId("empty block id".into()));
    }
    if block_id.len() > 256 {
        return Err(Error::InvalidBlockId("block id too long".into()));
    }
    let ok = block_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, ':' | '=' | '-' | '_' | '.'));
    if !ok || block_id.contains("..") || block_id.starts_with('.') {
        return Err(Error::InvalidBlockId(block_id.to_string()));
    }
    Ok(())
}

async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn read_sidecar(path: &Path) -> Result<Option<BlockSidecar>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let sidecar = serde_json::from_slice(&bytes)
                .map_err(|e| Error::Serialization(e.to_string()))?;
            Ok(Some(sidecar))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn remove_if_exists(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn open_store(dir: &tempfile::TempDir, capacity: u64) -> BlockStore {
        BlockStore::open(dir.path(), capacity).await.unwrap()
    }

    #[tokio::test]
    async fn test_store_retrieve_roundtrip() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir, 1 << 20).await;

        let data = Bytes::from_static(b"block payload bytes");
        let stored = store.store_block("f:s=0:k=0:d", data.clone(), false).await.unwrap();
        assert_eq!(stored.size, data.len() as u64);

        let (payload, sidecar) = store.retrieve_block("f:s=0:k=0:d").await.unwrap();
        assert_eq!(payload, data);
        assert_eq!(sidecar.checksum, stored.checksum);
        assert!(!sidecar.is_parity);

        assert_eq!(store.used_space(), data.len() as u64);
        assert_eq!(store.total_blocks(), 1);
        assert_eq!(store.data_blocks(), 1);
    }

    #[tokio::test]
    async fn test_retrieve_missing_block() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir, 1 << 20).await;
        assert!(matches!(
            store.retrieve_block("f:s=0:k=0:d").await,
            Err(Error::BlockNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_integrity_failure_on_corruption() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir, 1 << 20).await;

        store
            .store_block("f:s=0:k=1:d", Bytes::from_static(b"original"), false)
            .await
            .unwrap();

        // Corrupt the payload behind the store's back.
        let path = dir.path().join("f:s=0:k=1:d.blk");
        std::fs::write(&path, b"tampered").unwrap();

        assert!(matches!(
            store.retrieve_block("f:s=0:k=1:d").await,
            Err(Error::Integrity(_))
        ));
        assert!(!store.verify_integrity("f:s=0:k=1:d", &checksum(b"original")).await);
    }

    #[tokio::test]
    async fn test_overwrite_updates_accounting() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir, 1 << 20).await;

        store
            .store_block("f:s=0:k=0:d", Bytes::from_static(b"aaaaaaaaaa"), false)
            .await
            .unwrap();
        store
            .store_block("f:s=0:k=0:d", Bytes::from_static(b"bb"), false)
            .await
            .unwrap();

        assert_eq!(store.used_space(), 2);
        assert_eq!(store.total_blocks(), 1);
    }

    #[tokio::test]
    async fn test_delete_block() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir, 1 << 20).await;

        store
            .store_block("f:s=1:k=3:p", Bytes::from_static(b"parity"), true)
            .await
            .unwrap();
        assert_eq!(store.parity_blocks(), 1);

        store.delete_block("f:s=1:k=3:p").await.unwrap();
        assert!(!store.block_exists("f:s=1:k=3:p").await);
        assert_eq!(store.used_space(), 0);
        assert_eq!(store.parity_blocks(), 0);

        assert!(matches!(
            store.delete_block("f:s=1:k=3:p").await,
            Err(Error::BlockNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_insufficient_space() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir, 8).await;

        let result = store
            .store_block("f:s=0:k=0:d", Bytes::from_static(b"way too large"), false)
            .await;
        assert!(matches!(result, Err(Error::InsufficientSpace { .. })));
        assert!(!store.block_exists("f:s=0:k=0:d").await);
    }

    #[tokio::test]
    async fn test_invalid_block_ids() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir, 1 << 20).await;

        for id in ["", "../etc/passwd", "a/b", ".hidden"] {
            assert!(
                matches!(
                    store.store_block(id, Bytes::from_static(b"x"), false).await,
                    Err(Error::InvalidBlockId(_))
                ),
                "id {id:?} accepted"
            );
        }
    }

    #[tokio::test]
    async fn test_cleanup_orphans() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir, 1 << 20).await;

        store
            .store_block("keep:s=0:k=0:d", Bytes::from_static(b"keep"), false)
            .await
            .unwrap();

        // Orphan sidecar (payload gone) and orphan payload (sidecar gone).
        std::fs::write(dir.path().join("gone:s=0:k=1:d.meta"), b"{}").unwrap();
        std::fs::write(dir.path().join("lone:s=0:k=2:d.blk"), b"bytes").unwrap();

        let removed = store.cleanup_orphans().await.unwrap();
        assert_eq!(removed, 2);
        assert!(store.block_exists("keep:s=0:k=0:d").await);
        assert_eq!(store.list_blocks().await.unwrap(), vec!["keep:s=0:k=0:d"]);
    }

    #[tokio::test]
    async fn test_reopen_rebuilds_accounting() {
        let dir = tempdir().unwrap();
        {
            let store = open_store(&dir, 1 << 20).await;
            store
                .store_block("f:s=0:k=0:d", Bytes::from_static(b"0123456789"), false)
                .await
                .unwrap();
            store
                .store_block("f:s=0:k=3:p", Bytes::from_static(b"par"), true)
                .await
                .unwrap();
        }
        let store = open_store(&dir, 1 << 20).await;
        assert_eq!(store.used_space(), 13);
        assert_eq!(store.data_blocks(), 1);
        assert_eq!(store.parity_blocks(), 1);
    }
}
