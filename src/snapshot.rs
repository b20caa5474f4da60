//! Snapshot records and persistence for process manager state.
//!
//! A snapshot captures the workflow state after a specific event so the
//! instance can resume without re-handling its history. The storage
//! interface is a small key/value contract; [`FileSnapshotStore`] is a
//! local file-backed implementation storing each snapshot as JSON at
//! `<base_dir>/process_managers/<key>/snapshot.json`. Writes are atomic
//! via a temp-rename pattern to prevent corruption from crashes mid-write.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A persisted point-in-time record of a process manager instance.
///
/// The field names are part of the storage format and must stay
/// compatibility-stable. Invariant: a stored snapshot always reflects the
/// state *after* applying the event numbered `source_version`, with all
/// commands produced by that event successfully dispatched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// The instance's state key (`"<name>-<uuid>"`).
    pub source_uuid: String,
    /// The event number of the last event folded into `data`.
    pub source_version: u64,
    /// Stable workflow type identifier, for detecting schema drift.
    pub source_type: String,
    /// The serialized workflow state.
    pub data: Value,
}

/// Key/value snapshot persistence consumed by process manager instances.
///
/// Writes must be atomic at the granularity of a single key. A missing
/// key is not an error: reads return `Ok(None)` and deletes succeed.
pub trait SnapshotStore: Send + Sync {
    /// Read the snapshot stored under `key`, if any.
    ///
    /// Failures other than "not found" are fatal to the calling instance.
    fn read<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = io::Result<Option<StateSnapshot>>> + Send + 'a>>;

    /// Atomically record `snapshot` under its `source_uuid` key.
    fn record<'a>(
        &'a self,
        snapshot: StateSnapshot,
    ) -> Pin<Box<dyn Future<Output = io::Result<()>> + Send + 'a>>;

    /// Delete the snapshot stored under `key`. Deleting a missing key
    /// succeeds.
    fn delete<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = io::Result<()>> + Send + 'a>>;
}

/// Compute the filesystem path for a snapshot file.
///
/// # Returns
///
/// `<base_dir>/process_managers/<key>/snapshot.json`
pub fn snapshot_path(base_dir: &Path, key: &str) -> PathBuf {
    base_dir
        .join("process_managers")
        .join(key)
        .join("snapshot.json")
}

/// Local file-backed [`SnapshotStore`].
///
/// Each key maps to its own directory so writes stay atomic per key.
/// Filesystem work runs on the blocking pool via `spawn_blocking`.
///
/// An unparsable snapshot file surfaces as an I/O error rather than a
/// cache miss: a process manager snapshot is the only copy of the
/// workflow state at this layer, so silently discarding it would lose
/// data.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    base_dir: PathBuf,
}

impl FileSnapshotStore {
    /// Create a store rooted at `base_dir`. Directories are created
    /// lazily on first write.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn read_sync(path: &Path) -> io::Result<Option<StateSnapshot>> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let snapshot = serde_json::from_slice(&bytes)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(Some(snapshot))
    }

    fn record_sync(path: &Path, snapshot: &StateSnapshot) -> io::Result<()> {
        let dir = path
            .parent()
            .expect("snapshot_path always has a parent directory");
        std::fs::create_dir_all(dir)?;

        let tmp_path = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        std::fs::write(&tmp_path, &json)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    fn delete_sync(path: &Path) -> io::Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn read<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = io::Result<Option<StateSnapshot>>> + Send + 'a>> {
        let path = snapshot_path(&self.base_dir, key);
        Box::pin(async move {
            tokio::task::spawn_blocking(move || Self::read_sync(&path))
                .await
                .map_err(io::Error::other)?
        })
    }

    fn record<'a>(
        &'a self,
        snapshot: StateSnapshot,
    ) -> Pin<Box<dyn Future<Output = io::Result<()>> + Send + 'a>> {
        let path = snapshot_path(&self.base_dir, &snapshot.source_uuid);
        Box::pin(async move {
            tokio::task::spawn_blocking(move || Self::record_sync(&path, &snapshot))
                .await
                .map_err(io::Error::other)?
        })
    }

    fn delete<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = io::Result<()>> + Send + 'a>> {
        let path = snapshot_path(&self.base_dir, key);
        Box::pin(async move {
            tokio::task::spawn_blocking(move || Self::delete_sync(&path))
                .await
                .map_err(io::Error::other)?
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_snapshot() -> StateSnapshot {
        StateSnapshot {
            source_uuid: "fulfillment-abc".to_string(),
            source_version: 7,
            source_type: "fulfillment".to_string(),
            data: json!({"orders_seen": 3}),
        }
    }

    #[test]
    fn snapshot_path_returns_expected_path() {
        let path = snapshot_path(Path::new("/data/myapp"), "fulfillment-abc");
        assert_eq!(
            path,
            PathBuf::from("/data/myapp/process_managers/fulfillment-abc/snapshot.json")
        );
    }

    #[test]
    fn snapshot_serde_roundtrip_preserves_storage_fields() {
        let snapshot = sample_snapshot();
        let json = serde_json::to_string(&snapshot).expect("serialization should succeed");
        // Field names are the storage format; breaking them breaks old data.
        assert!(json.contains("source_uuid"));
        assert!(json.contains("source_version"));
        assert!(json.contains("source_type"));
        assert!(json.contains("data"));

        let back: StateSnapshot =
            serde_json::from_str(&json).expect("deserialization should succeed");
        assert_eq!(back, snapshot);
    }

    #[tokio::test]
    async fn record_then_read_roundtrips() {
        let tmp = tempfile::tempdir().expect("failed to create temp dir");
        let store = FileSnapshotStore::new(tmp.path());
        let snapshot = sample_snapshot();

        store
            .record(snapshot.clone())
            .await
            .expect("record should succeed");
        let loaded = store
            .read("fulfillment-abc")
            .await
            .expect("read should succeed");

        assert_eq!(loaded, Some(snapshot));
    }

    #[tokio::test]
    async fn read_missing_key_returns_none() {
        let tmp = tempfile::tempdir().expect("failed to create temp dir");
        let store = FileSnapshotStore::new(tmp.path());

        let loaded = store.read("no-such-key").await.expect("read should succeed");
        assert_eq!(loaded, None);
    }

    #[tokio::test]
    async fn read_corrupt_file_is_an_error() {
        let tmp = tempfile::tempdir().expect("failed to create temp dir");
        let store = FileSnapshotStore::new(tmp.path());
        let path = snapshot_path(tmp.path(), "bad-key");
        std::fs::create_dir_all(path.parent().unwrap()).expect("create dir");
        std::fs::write(&path, b"this is not valid json!!!").expect("write corrupt file");

        let result = store.read("bad-key").await;
        let err = result.expect_err("corrupt snapshot should be an error, not a miss");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn record_overwrites_previous_snapshot() {
        let tmp = tempfile::tempdir().expect("failed to create temp dir");
        let store = FileSnapshotStore::new(tmp.path());

        store
            .record(sample_snapshot())
            .await
            .expect("first record should succeed");
        let mut updated = sample_snapshot();
        updated.source_version = 8;
        updated.data = json!({"orders_seen": 4});
        store
            .record(updated.clone())
            .await
            .expect("second record should succeed");

        let loaded = store
            .read("fulfillment-abc")
            .await
            .expect("read should succeed");
        assert_eq!(loaded, Some(updated));
    }

    #[tokio::test]
    async fn delete_removes_snapshot() {
        let tmp = tempfile::tempdir().expect("failed to create temp dir");
        let store = FileSnapshotStore::new(tmp.path());

        store
            .record(sample_snapshot())
            .await
            .expect("record should succeed");
        store
            .delete("fulfillment-abc")
            .await
            .expect("delete should succeed");

        let loaded = store
            .read("fulfillment-abc")
            .await
            .expect("read should succeed");
        assert_eq!(loaded, None);
    }

    #[tokio::test]
    async fn delete_missing_key_succeeds() {
        let tmp = tempfile::tempdir().expect("failed to create temp dir");
        let store = FileSnapshotStore::new(tmp.path());

        store
            .delete("never-existed")
            .await
            .expect("deleting a missing key should succeed");
    }

    #[tokio::test]
    async fn record_uses_atomic_temp_rename() {
        let tmp = tempfile::tempdir().expect("failed to create temp dir");
        let store = FileSnapshotStore::new(tmp.path());

        store
            .record(sample_snapshot())
            .await
            .expect("record should succeed");

        let final_path = snapshot_path(tmp.path(), "fulfillment-abc");
        let tmp_path = final_path.with_extension("json.tmp");
        assert!(final_path.exists(), "final snapshot file should exist");
        assert!(
            !tmp_path.exists(),
            "temp file should not exist after successful record"
        );
    }
}
