//! Persistent event log for a [`ColumnStore`](crate::ColumnStore)
//!
//! - `EventStore`: append-only `events.jsonl`, replay and startup
//! - `SnapshotManager`: atomic snapshots with a one-deep backup
//! - `StatsCollector`: counts and sizes for a data directory
//!
//! # Layout
//!
//! ```text
//! data/
//! ├── events.jsonl          one Event per line, fsynced on append
//! └── snapshots/
//!     ├── latest.json       SnapshotMeta line + StoreDict line
//!     └── previous.json     the snapshot latest.json replaced
//! ```
//!
//! Write path: `record` applies the operation, appends it, and snapshots
//! every `snapshot_threshold` events. Startup: load `latest.json` (or
//! `previous.json` if it is unreadable), then apply the events after it.

mod snapshot;
mod stats;
mod store;

pub use snapshot::{SnapshotManager, SnapshotMeta};
pub use stats::{EventStoreStats, ReplayBenchmark, StatsCollector};
pub use store::{EventStore, EventStoreConfig, DATA_DIR_ENV, SNAPSHOT_THRESHOLD_ENV};
