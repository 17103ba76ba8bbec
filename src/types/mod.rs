//! Core data types
//!
//! Cell values, rows, and the opaque identities the store keys its data by.

mod ids;
mod value;

pub use ids::{new_event_id, ColumnId, IdMinter, RowId};
pub use value::{GroupKey, Row, Value, ValueMap, FLOAT_TAG};
