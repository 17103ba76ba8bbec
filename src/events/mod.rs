//! Event types for the column store
//!
//! Every change to a [`ColumnStore`] is an immutable, versioned [`Event`].
//! The store's state is whatever the ordered event log says it is: replaying
//! the same log onto an empty store always yields the same data.
//!
//! Events are serialized one per line (JSONL). The operation payload is
//! internally tagged by `"type"`:
//!
//! ```json
//! {"version":3,"eventId":"…","ts":1704067200,"op":{"type":"rename_column","old_name":"a","new_name":"x"}}
//! ```

mod aggregate;
mod cells;
mod columns;
mod meta;
mod reshape;
mod rows;
mod transform;

use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::store::ColumnStore;
use crate::types::new_event_id;

pub use aggregate::{AggFn, GroupByAggregate};
pub use cells::{FillNA, ReplaceValues, SetValue};
pub use columns::{
    AddColumn, ConcatToColumn, DropColumns, RenameColumn, RenameColumnsToValid, ReorderColumns,
    SelectColumns, UniquifyColumn, ZipColumns,
};
pub use meta::{MetaSet, MetaUpdate, VibesSnapshot};
pub use reshape::{
    ChunkRows, CollapseRows, ExpandRows, PivotRows, UnpackColumn, UnpackList, UnpivotRows,
};
pub use rows::{
    AppendRow, AppendRows, DeleteRows, DropDuplicates, FilterNA, FilterRows, HeadRows,
    SampleRows, ShuffleRows, SortRows, TackOnRow,
};
pub use transform::{CastTypes, DeriveColumn, NumberifyColumns, TransformColumn};

/// The mutation contract shared by every operation.
///
/// `execute` changes the store in place and must be deterministic given the
/// same starting state. Data-shape problems (unknown columns, out-of-range
/// indices) are silent no-ops; only malformed expressions are errors.
pub trait Execute {
    fn execute(&self, store: &mut ColumnStore) -> StoreResult<()>;
}

macro_rules! event_ops {
    ($($variant:ident => $tag:literal),* $(,)?) => {
        /// Payload of an event, tagged by operation name
        #[derive(Debug, Clone, Serialize, Deserialize)]
        #[serde(tag = "type")]
        pub enum EventOp {
            $(
                #[serde(rename = $tag)]
                $variant($variant),
            )*
        }

        impl EventOp {
            /// Wire name of the operation
            pub fn name(&self) -> &'static str {
                match self {
                    $(EventOp::$variant(_) => $tag,)*
                }
            }
        }

        impl Execute for EventOp {
            fn execute(&self, store: &mut ColumnStore) -> StoreResult<()> {
                match self {
                    $(EventOp::$variant(op) => op.execute(store),)*
                }
            }
        }

        $(
            impl From<$variant> for EventOp {
                fn from(op: $variant) -> Self {
                    EventOp::$variant(op)
                }
            }
        )*
    };
}

event_ops! {
    // Rows
    AppendRow => "append_row",
    AppendRows => "append_rows",
    DeleteRows => "delete_rows",
    TackOnRow => "tack_on_row",
    DropDuplicates => "drop_duplicates",
    HeadRows => "head_rows",
    FilterRows => "filter_rows",
    SortRows => "sort_rows",
    FilterNA => "filter_na",
    ShuffleRows => "shuffle_rows",
    SampleRows => "sample_rows",
    // Columns
    RenameColumn => "rename_column",
    DropColumns => "drop_columns",
    AddColumn => "add_column",
    ReorderColumns => "reorder_columns",
    SelectColumns => "select_columns",
    RenameColumnsToValid => "rename_columns_to_valid",
    ConcatToColumn => "concat_to_column",
    UniquifyColumn => "uniquify_column",
    ZipColumns => "zip_columns",
    // Cells
    SetValue => "set_value",
    ReplaceValues => "replace_values",
    FillNA => "fill_na",
    // Reshaping
    ExpandRows => "expand_rows",
    UnpivotRows => "unpivot_rows",
    PivotRows => "pivot_rows",
    UnpackList => "unpack_list",
    UnpackColumn => "unpack_column",
    CollapseRows => "collapse_rows",
    ChunkRows => "chunk_rows",
    // Aggregation
    GroupByAggregate => "group_by_aggregate",
    // Value transforms
    TransformColumn => "transform_column",
    DeriveColumn => "derive_column",
    CastTypes => "cast_types",
    NumberifyColumns => "numberify_columns",
    // Metadata and wholesale replacement
    MetaUpdate => "meta_update",
    MetaSet => "meta_set",
    VibesSnapshot => "vibes_snapshot",
}

/// An immutable event in the log
///
/// `version` is the store version the event produces: it must equal the
/// store's current version plus one when applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub version: u64,

    /// Unique id for audit and deduplication
    #[serde(rename = "eventId")]
    pub event_id: String,

    /// Unix timestamp when the event was created
    #[serde(rename = "ts", default)]
    pub timestamp: i64,

    pub op: EventOp,
}

impl Event {
    /// Create an event with a fresh id and the current timestamp
    pub fn new(version: u64, op: impl Into<EventOp>) -> Self {
        Self {
            version,
            event_id: new_event_id(),
            timestamp: chrono::Utc::now().timestamp(),
            op: op.into(),
        }
    }

    /// Create an event with a specific timestamp
    pub fn with_timestamp(version: u64, timestamp: i64, op: impl Into<EventOp>) -> Self {
        Self {
            timestamp,
            ..Self::new(version, op)
        }
    }

    /// Operation name, e.g. `"rename_column"`
    pub fn event_type(&self) -> &'static str {
        self.op.name()
    }

    /// Run the operation against `store` without touching its version
    pub fn execute(&self, store: &mut ColumnStore) -> StoreResult<()> {
        self.op.execute(store)
    }

    /// Serialize event to a JSON string (for JSONL)
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize event from a JSON string
    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

/// Resolve an optional column subset against the store.
///
/// `None` selects every column. Unknown names are dropped.
pub(crate) fn target_columns(store: &ColumnStore, columns: Option<&[String]>) -> Vec<String> {
    match columns {
        Some(names) => names
            .iter()
            .filter(|n| store.has_column(n))
            .cloned()
            .collect(),
        None => store.columns(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;
    use crate::types::Value;

    #[test]
    fn test_event_serialization() {
        let event = Event::with_timestamp(
            3,
            1_704_067_200,
            RenameColumn {
                old_name: "a".into(),
                new_name: "x".into(),
            },
        );

        let json = event.to_json_line().unwrap();
        assert!(json.contains("\"version\":3"));
        assert!(json.contains("\"ts\":1704067200"));
        assert!(json.contains("\"type\":\"rename_column\""));
        assert!(json.contains("\"old_name\":\"a\""));

        let parsed = Event::from_json_line(&json).unwrap();
        assert_eq!(parsed.version, 3);
        assert_eq!(parsed.event_id, event.event_id);
        assert_eq!(parsed.event_type(), "rename_column");
    }

    #[test]
    fn test_optional_fields_default_when_absent() {
        let json = r#"{"version":1,"eventId":"e1","op":{"type":"unpivot_rows","id_vars":["id"]}}"#;
        let event = Event::from_json_line(json).unwrap();
        assert_eq!(event.timestamp, 0);
        match event.op {
            EventOp::UnpivotRows(op) => {
                assert_eq!(op.var_name, "variable");
                assert_eq!(op.value_name, "value");
                assert!(op.value_vars.is_none());
            }
            other => panic!("unexpected op {}", other.name()),
        }
    }

    #[test]
    fn test_unknown_operation_fails_to_parse() {
        let json = r#"{"version":1,"eventId":"e1","op":{"type":"launch_rockets"}}"#;
        assert!(Event::from_json_line(json).is_err());
    }

    #[test]
    fn test_execute_does_not_advance_version() {
        let mut store = ColumnStore::from_rows(&[row! { "a" => 1 }]);
        let event = Event::new(1, AppendRow { row: row! { "a" => 2 } });
        event.execute(&mut store).unwrap();
        assert_eq!(store.nrows(), 2);
        assert_eq!(store.version(), 0);
        assert_eq!(store["a"], [Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn test_row_payloads_keep_cell_types() {
        let event = Event::new(
            1,
            AppendRow {
                row: row! { "n" => 1, "f" => 1.5, "s" => "x", "b" => true, "z" => Value::Null },
            },
        );
        let parsed = Event::from_json_line(&event.to_json_line().unwrap()).unwrap();
        let EventOp::AppendRow(op) = parsed.op else {
            panic!("expected append_row");
        };
        assert_eq!(op.row["n"], Value::Int(1));
        assert!(matches!(op.row["f"], Value::Float(_)));
        assert_eq!(op.row["s"], Value::from("x"));
        assert_eq!(op.row["b"], Value::Bool(true));
        assert!(op.row["z"].is_null());
    }
}
