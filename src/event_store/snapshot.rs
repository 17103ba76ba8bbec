//! Snapshot Manager
//!
//! A snapshot is a point-in-time capture of a `ColumnStore` so startup does
//! not have to replay the whole log. The file holds two JSON lines: a
//! `SnapshotMeta` header, then the `StoreDict` of the store.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::store::{ColumnStore, StoreDict};
use crate::utils::{atomic_write_with, atomic_write_with_backup};

use super::store::EventStoreConfig;

const META_TYPE: &str = "snapshot_meta";

/// Header line of a snapshot file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    /// Always "snapshot_meta"
    #[serde(rename = "type")]
    pub meta_type: String,

    /// Store version (last applied event) captured by the snapshot
    pub version: u64,

    /// Unix timestamp when the snapshot was written
    pub created_at: i64,

    pub nrows: usize,
    pub ncols: usize,

    /// Snapshot file format
    #[serde(default = "default_format")]
    pub format: u32,
}

fn default_format() -> u32 {
    1
}

impl SnapshotMeta {
    /// Describe `store` as of now
    pub fn for_store(store: &ColumnStore) -> Self {
        Self {
            meta_type: META_TYPE.to_string(),
            version: store.version(),
            created_at: chrono::Utc::now().timestamp(),
            nrows: store.nrows(),
            ncols: store.ncols(),
            format: default_format(),
        }
    }

    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Creates, loads and rotates snapshots under `data_dir/snapshots`
pub struct SnapshotManager {
    config: EventStoreConfig,
}

impl SnapshotManager {
    pub fn new(config: EventStoreConfig) -> Self {
        Self { config }
    }

    pub fn latest_path(&self) -> PathBuf {
        self.config.latest_snapshot_path()
    }

    /// Path of the backup kept from the previous snapshot
    pub fn previous_path(&self) -> PathBuf {
        self.config.previous_snapshot_path()
    }

    pub fn snapshot_exists(&self) -> bool {
        self.latest_path().exists()
    }

    /// Write a snapshot of `store` atomically.
    ///
    /// With `keep_previous_snapshot` the current `latest.json` is moved to
    /// `previous.json` before the new file is renamed into place.
    pub fn create_snapshot(&self, store: &ColumnStore) -> StoreResult<SnapshotMeta> {
        let latest_path = self.latest_path();
        let meta = SnapshotMeta::for_store(store);
        let meta_json = meta.to_json_line()?;
        let state_json = serde_json::to_string(&store.to_dict())?;

        let write_lines = |out: &mut BufWriter<File>| {
            writeln!(out, "{}", meta_json)?;
            writeln!(out, "{}", state_json)
        };
        if self.config.keep_previous_snapshot {
            atomic_write_with_backup(&latest_path, self.previous_path(), write_lines)?;
        } else {
            atomic_write_with(&latest_path, write_lines)?;
        }

        tracing::info!(
            version = meta.version,
            nrows = meta.nrows,
            ncols = meta.ncols,
            "Created snapshot"
        );
        Ok(meta)
    }

    /// Read only the header of the latest snapshot
    pub fn load_meta(&self) -> StoreResult<Option<SnapshotMeta>> {
        let path = self.latest_path();
        if !path.exists() {
            return Ok(None);
        }

        let reader = BufReader::new(File::open(&path)?);
        match reader.lines().next() {
            Some(line) => Ok(Some(parse_meta(&line?)?)),
            None => Err(StoreError::SnapshotCorrupted(
                "Empty snapshot file".to_string(),
            )),
        }
    }

    /// Load the latest snapshot as a store
    pub fn load_full(&self) -> StoreResult<Option<(SnapshotMeta, ColumnStore)>> {
        let path = self.latest_path();
        if !path.exists() {
            return Ok(None);
        }
        read_snapshot(&path).map(Some)
    }

    /// Load the backup snapshot, if there is one
    pub fn recover_from_backup(&self) -> StoreResult<Option<(SnapshotMeta, ColumnStore)>> {
        let path = self.previous_path();
        if !path.exists() {
            return Ok(None);
        }

        tracing::warn!(path = %path.display(), "Recovering from backup snapshot");
        let (meta, store) = read_snapshot(&path)?;
        tracing::info!(version = meta.version, "Recovered from backup snapshot");
        Ok(Some((meta, store)))
    }

    /// Delete both snapshot files
    pub fn clear_snapshots(&self) -> StoreResult<()> {
        for path in [self.latest_path(), self.previous_path()] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

fn parse_meta(line: &str) -> StoreResult<SnapshotMeta> {
    let meta = SnapshotMeta::from_json_line(line)
        .map_err(|e| StoreError::SnapshotCorrupted(format!("header: {}", e)))?;
    if meta.meta_type != META_TYPE {
        return Err(StoreError::SnapshotCorrupted(format!(
            "unexpected header type {:?}",
            meta.meta_type
        )));
    }
    Ok(meta)
}

fn read_snapshot(path: &Path) -> StoreResult<(SnapshotMeta, ColumnStore)> {
    let reader = BufReader::new(File::open(path)?);
    let mut lines = reader.lines();

    let meta_line = lines
        .next()
        .ok_or_else(|| StoreError::SnapshotCorrupted("Empty snapshot".to_string()))??;
    let meta = parse_meta(&meta_line)?;

    let state_line = lines
        .next()
        .ok_or_else(|| StoreError::SnapshotCorrupted("Missing store state".to_string()))??;
    let dict: StoreDict = serde_json::from_str(&state_line)
        .map_err(|e| StoreError::SnapshotCorrupted(format!("line 2: {}", e)))?;
    let store = ColumnStore::from_dict(dict)
        .map_err(|e| StoreError::SnapshotCorrupted(e.to_string()))?;

    if store.version() != meta.version || store.shape() != (meta.nrows, meta.ncols) {
        return Err(StoreError::SnapshotCorrupted(format!(
            "header says version {} shape ({}, {}), state has version {} shape {:?}",
            meta.version,
            meta.nrows,
            meta.ncols,
            store.version(),
            store.shape()
        )));
    }

    Ok((meta, store))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{AppendRows, Event, RenameColumn};
    use crate::row;
    use tempfile::TempDir;

    fn create_test_manager() -> (SnapshotManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config = EventStoreConfig::new(temp_dir.path());
        (SnapshotManager::new(config), temp_dir)
    }

    fn store_at_version_two() -> ColumnStore {
        ColumnStore::from_events(&[
            Event::new(
                1,
                AppendRows {
                    rows: vec![row! { "a" => 1, "b" => "x" }, row! { "a" => 2, "b" => "y" }],
                },
            ),
            Event::new(
                2,
                RenameColumn {
                    old_name: "b".into(),
                    new_name: "label".into(),
                },
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_create_and_load_snapshot() {
        let (manager, _temp_dir) = create_test_manager();
        let store = store_at_version_two();

        let meta = manager.create_snapshot(&store).unwrap();
        assert_eq!(meta.version, 2);
        assert_eq!((meta.nrows, meta.ncols), (2, 2));

        let (loaded_meta, loaded) = manager.load_full().unwrap().unwrap();
        assert_eq!(loaded_meta, meta);
        assert!(loaded.same_state(&store));
        assert_eq!(loaded.version(), 2);
        assert_eq!(loaded.row_ids(), store.row_ids());
        assert_eq!(loaded.column_id("label"), store.column_id("label"));
    }

    #[test]
    fn test_snapshot_backup() {
        let (manager, _temp_dir) = create_test_manager();
        let first = store_at_version_two();
        manager.create_snapshot(&first).unwrap();

        let mut second = first.snapshot();
        second
            .apply(&[Event::new(3, AppendRows { rows: vec![row! { "a" => 3 }] })])
            .unwrap();
        manager.create_snapshot(&second).unwrap();

        assert!(manager.previous_path().exists());
        let (meta, latest) = manager.load_full().unwrap().unwrap();
        assert_eq!(meta.version, 3);
        assert_eq!(latest.nrows(), 3);

        let (backup_meta, backup) = manager.recover_from_backup().unwrap().unwrap();
        assert_eq!(backup_meta.version, 2);
        assert!(backup.same_state(&first));
    }

    #[test]
    fn test_no_backup_when_disabled() {
        let temp_dir = TempDir::new().unwrap();
        let config = EventStoreConfig {
            keep_previous_snapshot: false,
            ..EventStoreConfig::new(temp_dir.path())
        };
        let manager = SnapshotManager::new(config);
        let store = store_at_version_two();

        manager.create_snapshot(&store).unwrap();
        manager.create_snapshot(&store).unwrap();
        assert!(!manager.previous_path().exists());
        assert!(manager.recover_from_backup().unwrap().is_none());
    }

    #[test]
    fn test_load_meta_only() {
        let (manager, _temp_dir) = create_test_manager();
        assert!(manager.load_meta().unwrap().is_none());

        manager.create_snapshot(&store_at_version_two()).unwrap();
        let meta = manager.load_meta().unwrap().unwrap();
        assert_eq!(meta.meta_type, "snapshot_meta");
        assert_eq!(meta.version, 2);
    }

    #[test]
    fn test_corrupted_snapshot() {
        let (manager, _temp_dir) = create_test_manager();
        fs::create_dir_all(manager.latest_path().parent().unwrap()).unwrap();

        fs::write(manager.latest_path(), "").unwrap();
        assert!(matches!(
            manager.load_full(),
            Err(StoreError::SnapshotCorrupted(_))
        ));

        let meta = SnapshotMeta::for_store(&store_at_version_two());
        fs::write(
            manager.latest_path(),
            format!("{}\n{{\"cols\": 1}}\n", meta.to_json_line().unwrap()),
        )
        .unwrap();
        assert!(matches!(
            manager.load_full(),
            Err(StoreError::SnapshotCorrupted(_))
        ));
    }

    #[test]
    fn test_header_must_match_state() {
        let (manager, _temp_dir) = create_test_manager();
        let store = store_at_version_two();
        let mut meta = SnapshotMeta::for_store(&store);
        meta.version = 7;
        fs::create_dir_all(manager.latest_path().parent().unwrap()).unwrap();
        fs::write(
            manager.latest_path(),
            format!(
                "{}\n{}\n",
                meta.to_json_line().unwrap(),
                serde_json::to_string(&store.to_dict()).unwrap()
            ),
        )
        .unwrap();

        assert!(matches!(
            manager.load_full(),
            Err(StoreError::SnapshotCorrupted(_))
        ));
    }

    #[test]
    fn test_clear_snapshots() {
        let (manager, _temp_dir) = create_test_manager();
        let store = store_at_version_two();
        manager.create_snapshot(&store).unwrap();
        manager.create_snapshot(&store).unwrap();

        manager.clear_snapshots().unwrap();
        assert!(!manager.snapshot_exists());
        assert!(!manager.previous_path().exists());
        manager.clear_snapshots().unwrap();
    }
}
