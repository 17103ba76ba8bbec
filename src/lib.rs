//! Event-sourced column store
//!
//! Data lives in columns keyed by stable ids, rows carry stable ids, and
//! every change is an immutable, versioned event. Replaying the same event
//! log onto an empty store always reproduces the same data.
//!
//! # Features
//!
//! - **Columnar**: rename is a metadata change, column ids survive it
//! - **Event-sourced**: ~40 operations, strict version contiguity on replay
//! - **Deterministic**: seeded shuffle and sample, safe expression language
//! - **Branching**: fork a store and let the branches diverge
//! - **Persistent**: fsynced JSONL log with snapshot-assisted startup
//! - **Interop**: Arrow `RecordBatch` and Parquet (feature `arrow`)
//!
//! # Modules
//!
//! - `types`: cell values, rows and ids
//! - `store`: the `ColumnStore` and its codecs
//! - `events`: the `Event` envelope and every operation
//! - `expr`: expression parser and evaluator used by filters and transforms
//! - `random`: seeded PRNG behind shuffle and sample
//! - `event_store`: on-disk log, snapshots and statistics
//! - `branch`: named branches behind a lock
//! - `error`: `StoreError`
//!
//! # Example
//!
//! ```
//! use colstore::events::{AppendRows, FilterRows, RenameColumn};
//! use colstore::{row, ColumnStore, Event, Value};
//!
//! let events = vec![
//!     Event::new(1, AppendRows { rows: vec![row! { "a" => 1 }, row! { "a" => 5 }] }),
//!     Event::new(2, RenameColumn { old_name: "a".into(), new_name: "score".into() }),
//!     Event::new(3, FilterRows { expression: "score > 2".into() }),
//! ];
//! let store = ColumnStore::from_events(&events).unwrap();
//! assert_eq!(store.version(), 3);
//! assert_eq!(store["score"], [Value::Int(5)]);
//! ```

pub mod branch;
pub mod error;
pub mod event_store;
pub mod events;
pub mod expr;
pub mod random;
pub mod store;
pub mod types;
pub mod utils;

// Re-export commonly used items at crate root
pub use branch::{BranchRegistry, MAIN_BRANCH};
pub use error::{StoreError, StoreResult};
pub use event_store::{EventStore, EventStoreConfig, SnapshotManager};
pub use events::{AggFn, Event, EventOp};
pub use store::{ColumnStore, StoreDict, CODEBOOK_KEY, DEFAULT_PARQUET_PATH, ROW_ID_KEY};
pub use types::{ColumnId, Row, RowId, Value, ValueMap};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
