//! Event Store - append-only event log with snapshot-assisted replay
//!
//! The log is a JSONL file holding one [`Event`] per line in version order.
//! A [`ColumnStore`] is rebuilt by loading the latest snapshot and applying
//! the events recorded after it.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::error::StoreResult;
use crate::events::{Event, EventOp};
use crate::store::ColumnStore;
use crate::utils::cleanup_temp_files;

use super::snapshot::{SnapshotManager, SnapshotMeta};

/// Environment variable overriding [`EventStoreConfig::data_dir`]
pub const DATA_DIR_ENV: &str = "COLSTORE_DATA_DIR";

/// Environment variable overriding [`EventStoreConfig::snapshot_threshold`]
pub const SNAPSHOT_THRESHOLD_ENV: &str = "COLSTORE_SNAPSHOT_THRESHOLD";

/// Configuration for the EventStore
#[derive(Debug, Clone)]
pub struct EventStoreConfig {
    /// Directory holding `events.jsonl` and `snapshots/`
    pub data_dir: PathBuf,
    /// Events recorded between automatic snapshots; 0 disables them
    pub snapshot_threshold: usize,
    /// Keep the replaced snapshot as `previous.json`
    pub keep_previous_snapshot: bool,
}

impl Default for EventStoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            snapshot_threshold: 1000,
            keep_previous_snapshot: true,
        }
    }
}

impl EventStoreConfig {
    /// Create config with custom data directory
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Defaults overridden by `COLSTORE_DATA_DIR` and
    /// `COLSTORE_SNAPSHOT_THRESHOLD`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            if !dir.trim().is_empty() {
                config.data_dir = PathBuf::from(dir);
            }
        }
        if let Ok(raw) = std::env::var(SNAPSHOT_THRESHOLD_ENV) {
            match raw.trim().parse() {
                Ok(threshold) => config.snapshot_threshold = threshold,
                Err(_) => tracing::warn!(
                    value = %raw,
                    default = config.snapshot_threshold,
                    "Ignoring invalid {}", SNAPSHOT_THRESHOLD_ENV
                ),
            }
        }
        config
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Get path to events.jsonl
    pub fn events_path(&self) -> PathBuf {
        self.data_dir.join("events.jsonl")
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.data_dir.join("snapshots")
    }

    pub fn latest_snapshot_path(&self) -> PathBuf {
        self.snapshots_dir().join("latest.json")
    }

    /// Get path to previous snapshot (backup)
    pub fn previous_snapshot_path(&self) -> PathBuf {
        self.snapshots_dir().join("previous.json")
    }
}

/// The EventStore manages the append-only event log and state replay
pub struct EventStore {
    config: EventStoreConfig,
    snapshots: SnapshotManager,
    /// Number of events recorded since the last snapshot
    events_since_snapshot: usize,
    /// Store version captured by the most recent snapshot
    last_snapshot_version: u64,
}

impl EventStore {
    /// Create a new EventStore with default config
    pub fn new() -> Self {
        Self::with_config(EventStoreConfig::default())
    }

    pub fn with_config(config: EventStoreConfig) -> Self {
        Self {
            snapshots: SnapshotManager::new(config.clone()),
            config,
            events_since_snapshot: 0,
            last_snapshot_version: 0,
        }
    }

    pub fn config(&self) -> &EventStoreConfig {
        &self.config
    }

    pub fn snapshots(&self) -> &SnapshotManager {
        &self.snapshots
    }

    pub fn events_since_snapshot(&self) -> usize {
        self.events_since_snapshot
    }

    pub fn last_snapshot_version(&self) -> u64 {
        self.last_snapshot_version
    }

    /// Check if snapshot should be created
    pub fn should_snapshot(&self) -> bool {
        self.config.snapshot_threshold > 0
            && self.events_since_snapshot >= self.config.snapshot_threshold
    }

    /// Append an event to the log.
    ///
    /// The line is fsynced before returning. The event is not applied to
    /// any store; see [`EventStore::record`] for that.
    pub fn append_event(&mut self, event: &Event) -> StoreResult<()> {
        let events_path = self.config.events_path();

        if let Some(parent) = events_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&events_path)?;

        let json_line = event.to_json_line()?;
        writeln!(file, "{}", json_line)?;
        file.sync_all()?;

        self.events_since_snapshot += 1;
        Ok(())
    }

    /// Apply `op` to `store` as the next version, then append it to the log.
    ///
    /// An operation that fails to apply is not logged. A snapshot is taken
    /// once `snapshot_threshold` events have been recorded since the last one.
    pub fn record(&mut self, store: &mut ColumnStore, op: impl Into<EventOp>) -> StoreResult<Event> {
        let event = Event::new(store.version() + 1, op);
        store.apply(std::slice::from_ref(&event))?;
        self.append_event(&event)?;

        tracing::debug!(
            version = event.version,
            event_type = event.event_type(),
            "Recorded event"
        );

        if self.should_snapshot() {
            self.snapshot(store)?;
        }
        Ok(event)
    }

    /// Write a snapshot of `store` and reset the snapshot counter
    pub fn snapshot(&mut self, store: &ColumnStore) -> StoreResult<SnapshotMeta> {
        let meta = self.snapshots.create_snapshot(store)?;
        self.snapshot_created(meta.version);
        Ok(meta)
    }

    /// Reset snapshot counter (called after snapshot creation)
    pub fn snapshot_created(&mut self, version: u64) {
        self.last_snapshot_version = version;
        self.events_since_snapshot = 0;
    }

    /// Load all events from the log.
    ///
    /// Lines that do not parse are skipped with a warning.
    pub fn load_events(&self) -> StoreResult<Vec<Event>> {
        let events_path = self.config.events_path();

        if !events_path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(&events_path)?);
        let mut events = Vec::new();

        for (line_num, line_result) in reader.lines().enumerate() {
            let line = line_result?;
            if line.trim().is_empty() {
                continue;
            }

            match Event::from_json_line(&line) {
                Ok(event) => events.push(event),
                Err(e) => {
                    tracing::warn!(line = line_num + 1, error = %e, "Skipping unparseable event");
                }
            }
        }

        Ok(events)
    }

    /// Load events that produce a version above `version`
    pub fn load_events_after(&self, version: u64) -> StoreResult<Vec<Event>> {
        let all_events = self.load_events()?;
        Ok(all_events
            .into_iter()
            .filter(|e| e.version > version)
            .collect())
    }

    /// Rebuild the store from the full log, ignoring snapshots
    pub fn replay_all(&self) -> StoreResult<ColumnStore> {
        let events = self.load_events()?;
        ColumnStore::from_events(&events)
    }

    /// Startup path: latest snapshot (or its backup) plus the log tail.
    ///
    /// With no usable snapshot the whole log is replayed.
    pub fn initialize(&mut self) -> StoreResult<ColumnStore> {
        let removed = cleanup_temp_files(self.config.snapshots_dir())?;
        if removed > 0 {
            tracing::warn!(removed, "Removed leftover temp files from an interrupted snapshot");
        }

        match self.load_snapshot()? {
            Some((meta, mut store)) => {
                let tail = self.load_events_after(meta.version)?;
                store.apply(&tail)?;

                self.last_snapshot_version = meta.version;
                self.events_since_snapshot = (store.version() - meta.version) as usize;
                tracing::info!(
                    snapshot_version = meta.version,
                    replayed = self.events_since_snapshot,
                    nrows = store.nrows(),
                    ncols = store.ncols(),
                    "Loaded snapshot and replayed log tail"
                );
                Ok(store)
            }
            None => {
                let store = self.replay_all()?;

                self.last_snapshot_version = 0;
                self.events_since_snapshot = store.version() as usize;
                tracing::info!(
                    replayed = store.version(),
                    nrows = store.nrows(),
                    ncols = store.ncols(),
                    "No snapshot found, replayed full log"
                );
                Ok(store)
            }
        }
    }

    /// Latest snapshot, falling back to the backup when it is unreadable
    fn load_snapshot(&self) -> StoreResult<Option<(SnapshotMeta, ColumnStore)>> {
        match self.snapshots.load_full() {
            Ok(found) => Ok(found),
            Err(e) => {
                tracing::warn!(error = %e, "Latest snapshot unreadable");
                match self.snapshots.recover_from_backup() {
                    Ok(found) => Ok(found),
                    Err(e) => {
                        tracing::warn!(error = %e, "Backup snapshot unreadable, replaying full log");
                        Ok(None)
                    }
                }
            }
        }
    }
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::events::{AppendRows, FilterRows, RenameColumn};
    use crate::row;
    use crate::types::Value;
    use tempfile::TempDir;

    fn create_test_store(threshold: usize) -> (EventStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config = EventStoreConfig {
            snapshot_threshold: threshold,
            ..EventStoreConfig::new(temp_dir.path())
        };
        (EventStore::with_config(config), temp_dir)
    }

    fn append(n: i64) -> AppendRows {
        AppendRows {
            rows: vec![row! { "n" => n }],
        }
    }

    #[test]
    fn test_append_and_load_events() {
        let (mut log, _temp_dir) = create_test_store(0);

        log.append_event(&Event::new(1, append(1))).unwrap();
        log.append_event(&Event::new(2, append(2))).unwrap();
        assert_eq!(log.events_since_snapshot(), 2);

        let events = log.load_events().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type(), "append_rows");
        assert_eq!(events[1].version, 2);
    }

    #[test]
    fn test_load_events_after() {
        let (mut log, _temp_dir) = create_test_store(0);
        for version in 1..=5 {
            log.append_event(&Event::new(version, append(version as i64)))
                .unwrap();
        }

        let events = log.load_events_after(3).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].version, 4);
        assert_eq!(events[1].version, 5);
    }

    #[test]
    fn test_corrupt_lines_are_skipped() {
        let (mut log, _temp_dir) = create_test_store(0);
        log.append_event(&Event::new(1, append(1))).unwrap();
        {
            let mut file = OpenOptions::new()
                .append(true)
                .open(log.config().events_path())
                .unwrap();
            writeln!(file, "{{not json").unwrap();
            writeln!(file).unwrap();
        }
        log.append_event(&Event::new(2, append(2))).unwrap();

        let events = log.load_events().unwrap();
        assert_eq!(events.iter().map(|e| e.version).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_record_applies_then_appends() {
        let (mut log, _temp_dir) = create_test_store(0);
        let mut store = ColumnStore::new();

        let event = log.record(&mut store, append(1)).unwrap();
        assert_eq!(event.version, 1);
        log.record(
            &mut store,
            RenameColumn {
                old_name: "n".into(),
                new_name: "count".into(),
            },
        )
        .unwrap();

        assert_eq!(store.version(), 2);
        assert_eq!(store.columns(), vec!["count"]);
        assert!(log.replay_all().unwrap().same_state(&store));
    }

    #[test]
    fn test_failed_record_is_not_logged() {
        let (mut log, _temp_dir) = create_test_store(0);
        let mut store = ColumnStore::new();
        log.record(&mut store, append(1)).unwrap();

        let result = log.record(
            &mut store,
            FilterRows {
                expression: "n >".into(),
            },
        );
        assert!(matches!(result, Err(StoreError::Expression(_))));
        assert_eq!(store.version(), 1);
        assert_eq!(log.load_events().unwrap().len(), 1);
    }

    #[test]
    fn test_snapshot_every_threshold_events() {
        let (mut log, _temp_dir) = create_test_store(3);
        let mut store = ColumnStore::new();

        for n in 1..=4 {
            log.record(&mut store, append(n)).unwrap();
        }

        let meta = log.snapshots().load_meta().unwrap().unwrap();
        assert_eq!(meta.version, 3);
        assert_eq!(log.last_snapshot_version(), 3);
        assert_eq!(log.events_since_snapshot(), 1);
    }

    #[test]
    fn test_initialize_from_snapshot_and_tail() {
        let (mut log, _temp_dir) = create_test_store(2);
        let mut store = ColumnStore::new();
        for n in 1..=5 {
            log.record(&mut store, append(n)).unwrap();
        }

        let mut reopened = EventStore::with_config(log.config().clone());
        let restored = reopened.initialize().unwrap();

        assert!(restored.same_state(&store));
        assert_eq!(restored.version(), 5);
        assert_eq!(reopened.last_snapshot_version(), 4);
        assert_eq!(reopened.events_since_snapshot(), 1);
    }

    #[test]
    fn test_initialize_without_snapshot() {
        let (mut log, _temp_dir) = create_test_store(0);
        let mut store = ColumnStore::new();
        log.record(&mut store, append(1)).unwrap();
        log.record(&mut store, append(2)).unwrap();

        let mut reopened = EventStore::with_config(log.config().clone());
        let restored = reopened.initialize().unwrap();
        assert_eq!(restored["n"], [Value::Int(1), Value::Int(2)]);
        assert_eq!(reopened.events_since_snapshot(), 2);
    }

    #[test]
    fn test_initialize_recovers_from_backup() {
        let (mut log, _temp_dir) = create_test_store(2);
        let mut store = ColumnStore::new();
        for n in 1..=4 {
            log.record(&mut store, append(n)).unwrap();
        }
        std::fs::write(log.config().latest_snapshot_path(), "garbage\n").unwrap();

        let mut reopened = EventStore::with_config(log.config().clone());
        let restored = reopened.initialize().unwrap();
        assert!(restored.same_state(&store));
        assert_eq!(reopened.last_snapshot_version(), 2);
    }

    #[test]
    fn test_initialize_empty_dir() {
        let (mut log, _temp_dir) = create_test_store(0);
        let store = log.initialize().unwrap();
        assert_eq!(store.version(), 0);
        assert_eq!(store.shape(), (0, 0));
    }
}
