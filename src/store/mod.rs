//! ColumnStore - the versioned, column-oriented state container
//!
//! Data is keyed by opaque column ids rather than names, so renames and
//! column reorders only touch the name index. Rows carry their own ids and
//! keep them through sorts, shuffles and filters.
//!
//! The store is only ever changed by applying [`Event`]s in version order.

#[cfg(feature = "arrow")]
mod columnar;

use std::ops::Index;

use indexmap::{IndexMap, IndexSet};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::events::Event;
use crate::types::{ColumnId, IdMinter, Row, RowId, Value, ValueMap};

#[cfg(feature = "arrow")]
pub use columnar::{JSON_ENCODING, META_KEY};

/// Key under which `to_rows(true)` exposes each row's id
pub const ROW_ID_KEY: &str = "__row_id__";

/// Default file used by `to_parquet_default` / `from_parquet_default`
pub const DEFAULT_PARQUET_PATH: &str = "store.parquet";

/// Metadata key holding the column codebook (name -> description)
pub const CODEBOOK_KEY: &str = "codebook";

/// Serialized form of a store. Preserves every internal id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreDict {
    pub cols: IndexMap<ColumnId, Vec<Value>>,
    pub col_names: IndexMap<String, ColumnId>,
    pub row_ids: Vec<RowId>,
    pub nrows: usize,
    #[serde(default)]
    pub meta: ValueMap,
    #[serde(default)]
    pub version: u64,
}

/// Event-sourced column store
#[derive(Debug, Clone, Default)]
pub struct ColumnStore {
    pub(crate) cols: IndexMap<ColumnId, Vec<Value>>,
    pub(crate) col_names: IndexMap<String, ColumnId>,
    pub(crate) row_ids: Vec<RowId>,
    pub(crate) nrows: usize,
    pub(crate) meta: ValueMap,
    pub(crate) version: u64,
    ids: IdMinter,
}

impl ColumnStore {
    /// Create an empty store at version 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from row dictionaries.
    ///
    /// Columns are ordered by the first appearance of each name across the
    /// rows; a row that lacks a column holds `Null` there.
    pub fn from_rows(rows: &[Row]) -> Self {
        let mut store = Self::new();
        store.load_rows(rows);
        store
    }

    /// Replay a full event list onto an empty store
    pub fn from_events<'a, I>(events: I) -> StoreResult<Self>
    where
        I: IntoIterator<Item = &'a Event>,
    {
        let mut store = Self::new();
        store.apply(events)?;
        Ok(store)
    }

    /// Apply events in version order.
    ///
    /// Events at or below the current version are skipped, so replaying an
    /// already-applied prefix is a no-op. The remaining events must continue
    /// the version sequence without gaps or duplicates.
    pub fn apply<'a, I>(&mut self, events: I) -> StoreResult<()>
    where
        I: IntoIterator<Item = &'a Event>,
    {
        let mut pending: Vec<&Event> = events
            .into_iter()
            .filter(|e| e.version > self.version)
            .collect();
        pending.sort_by_key(|e| e.version);

        for event in pending {
            let expected = self.version + 1;
            if event.version != expected {
                return Err(StoreError::NonContiguous {
                    expected,
                    found: event.version,
                });
            }
            self.ids = IdMinter::for_event(&event.event_id, event.version);
            let result = event.execute(self);
            self.ids = IdMinter::default();
            result?;
            self.version = event.version;
        }
        Ok(())
    }

    /// Independent deep copy sharing no state with `self`
    pub fn snapshot(&self) -> Self {
        self.clone()
    }

    /// One dictionary per row, in row order
    pub fn to_rows(&self, include_row_id: bool) -> Vec<Row> {
        (0..self.nrows)
            .map(|i| {
                let mut row = Row::with_capacity(self.col_names.len() + 1);
                if include_row_id {
                    row.insert(
                        ROW_ID_KEY.to_string(),
                        Value::Str(self.row_ids[i].to_string()),
                    );
                }
                for (name, id) in &self.col_names {
                    row.insert(name.clone(), self.cols[id][i].clone());
                }
                row
            })
            .collect()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.col_names.len()
    }

    /// `(nrows, ncols)`
    pub fn shape(&self) -> (usize, usize) {
        (self.nrows, self.col_names.len())
    }

    /// Current column names, in order
    pub fn columns(&self) -> Vec<String> {
        self.col_names.keys().cloned().collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.col_names.contains_key(name)
    }

    pub fn column(&self, name: &str) -> Option<&[Value]> {
        let id = self.col_names.get(name)?;
        self.cols.get(id).map(Vec::as_slice)
    }

    pub fn column_id(&self, name: &str) -> Option<&ColumnId> {
        self.col_names.get(name)
    }

    pub fn column_by_id(&self, id: &ColumnId) -> Option<&[Value]> {
        self.cols.get(id).map(Vec::as_slice)
    }

    pub fn row_ids(&self) -> &[RowId] {
        &self.row_ids
    }

    pub fn meta(&self) -> &ValueMap {
        &self.meta
    }

    /// Column name -> description map kept under `meta["codebook"]`
    pub fn codebook(&self) -> Option<&ValueMap> {
        self.meta.get(CODEBOOK_KEY).and_then(Value::as_map)
    }

    /// Row id at `index`; negative indices count from the end
    pub fn get_row_id(&self, index: i64) -> Option<&RowId> {
        self.resolve_index(index).map(|i| &self.row_ids[i])
    }

    /// Position of `row_id`, or `-1` when absent
    pub fn get_row_index(&self, row_id: &str) -> i64 {
        self.position_of(row_id)
            .and_then(|i| i64::try_from(i).ok())
            .unwrap_or(-1)
    }

    pub fn get_row_by_id(&self, row_id: &str) -> Option<Row> {
        self.position_of(row_id).map(|i| self.row_at(i))
    }

    /// Serialized form preserving ids
    pub fn to_dict(&self) -> StoreDict {
        StoreDict {
            cols: self.cols.clone(),
            col_names: self.col_names.clone(),
            row_ids: self.row_ids.clone(),
            nrows: self.nrows,
            meta: self.meta.clone(),
            version: self.version,
        }
    }

    /// Restore a store from its serialized form, validating every invariant
    pub fn from_dict(dict: StoreDict) -> StoreResult<Self> {
        let store = Self {
            cols: dict.cols,
            col_names: dict.col_names,
            row_ids: dict.row_ids,
            nrows: dict.nrows,
            meta: dict.meta,
            version: dict.version,
            ids: IdMinter::default(),
        };
        store.check_invariants()?;
        Ok(store)
    }

    pub fn to_json(&self) -> StoreResult<String> {
        Ok(serde_json::to_string(&self.to_dict())?)
    }

    pub fn from_json(json: &str) -> StoreResult<Self> {
        let dict: StoreDict = serde_json::from_str(json)?;
        Self::from_dict(dict)
    }

    /// Verify the structural invariants
    pub fn check_invariants(&self) -> StoreResult<()> {
        if self.row_ids.len() != self.nrows {
            return Err(StoreError::InvalidState(format!(
                "{} row ids for {} rows",
                self.row_ids.len(),
                self.nrows
            )));
        }
        for (id, values) in &self.cols {
            if values.len() != self.nrows {
                return Err(StoreError::InvalidState(format!(
                    "column {} has {} values for {} rows",
                    id,
                    values.len(),
                    self.nrows
                )));
            }
        }
        let mut seen_rows = std::collections::HashSet::with_capacity(self.nrows);
        for row_id in &self.row_ids {
            if !seen_rows.insert(row_id) {
                return Err(StoreError::InvalidState(format!(
                    "duplicate row id {row_id}"
                )));
            }
        }
        let mut seen_cols = std::collections::HashSet::with_capacity(self.col_names.len());
        for (name, id) in &self.col_names {
            if !self.cols.contains_key(id) {
                return Err(StoreError::InvalidState(format!(
                    "column '{name}' points at unknown id {id}"
                )));
            }
            if !seen_cols.insert(id) {
                return Err(StoreError::InvalidState(format!(
                    "column id {id} is bound to more than one name"
                )));
            }
        }
        Ok(())
    }

    /// Structural equality over data, names, row ids, row count and metadata.
    ///
    /// The version counter is deliberately not compared: two branches that
    /// reached the same data through different histories are the same state.
    pub fn same_state(&self, other: &ColumnStore) -> bool {
        self.nrows == other.nrows
            && self.row_ids == other.row_ids
            && self.col_names.len() == other.col_names.len()
            && self.col_names.iter().eq(other.col_names.iter())
            && self.cols.len() == other.cols.len()
            && self.cols.iter().all(|(id, values)| {
                other.cols.get(id).is_some_and(|o| {
                    o.len() == values.len()
                        && values.iter().zip(o).all(|(a, b)| a.structurally_eq(b))
                })
            })
            && self.meta.len() == other.meta.len()
            && self.meta.iter().all(|(k, v)| {
                other.meta.get(k).is_some_and(|o| v.structurally_eq(o))
            })
    }

    // ------------------------------------------------------------------
    // Mutation helpers used by events
    // ------------------------------------------------------------------

    /// Map a possibly-negative index onto a row position
    pub(crate) fn resolve_index(&self, index: i64) -> Option<usize> {
        let n = i64::try_from(self.nrows).ok()?;
        let idx = if index < 0 { index + n } else { index };
        if (0..n).contains(&idx) {
            usize::try_from(idx).ok()
        } else {
            None
        }
    }

    pub(crate) fn position_of(&self, row_id: &str) -> Option<usize> {
        self.row_ids.iter().position(|r| r.as_str() == row_id)
    }

    pub(crate) fn row_at(&self, index: usize) -> Row {
        self.col_names
            .iter()
            .map(|(name, id)| (name.clone(), self.cols[id][index].clone()))
            .collect()
    }

    pub(crate) fn cell(&self, index: usize, name: &str) -> Option<&Value> {
        self.column(name).and_then(|values| values.get(index))
    }

    pub(crate) fn column_mut(&mut self, name: &str) -> Option<&mut Vec<Value>> {
        let id = self.col_names.get(name)?;
        self.cols.get_mut(id)
    }

    /// Bind `name` to a fresh column id holding `values`.
    ///
    /// An existing binding for `name` is replaced in place (keeping the
    /// column's position) and its data dropped.
    pub(crate) fn bind_column(&mut self, name: &str, values: Vec<Value>) -> ColumnId {
        debug_assert_eq!(values.len(), self.nrows);
        let id = self.ids.column_id();
        self.cols.insert(id.clone(), values);
        if let Some(old) = self.col_names.insert(name.to_string(), id.clone()) {
            self.cols.shift_remove(&old);
        }
        id
    }

    /// Overwrite column `name` with `values`, keeping its id when it exists
    pub(crate) fn set_column(&mut self, name: &str, values: Vec<Value>) {
        debug_assert_eq!(values.len(), self.nrows);
        match self.column_mut(name) {
            Some(existing) => *existing = values,
            None => {
                self.bind_column(name, values);
            }
        }
    }

    /// Id of column `name`, creating a `Null`-filled column if needed
    pub(crate) fn ensure_column(&mut self, name: &str) -> ColumnId {
        if let Some(id) = self.col_names.get(name) {
            return id.clone();
        }
        self.bind_column(name, vec![Value::Null; self.nrows])
    }

    pub(crate) fn drop_column(&mut self, name: &str) -> bool {
        match self.col_names.shift_remove(name) {
            Some(id) => {
                self.cols.shift_remove(&id);
                true
            }
            None => false,
        }
    }

    /// Append rows, creating columns for names not seen before
    pub(crate) fn push_rows(&mut self, rows: &[Row]) {
        for row in rows {
            for key in row.keys() {
                self.ensure_column(key);
            }
        }
        for (name, id) in &self.col_names {
            if let Some(values) = self.cols.get_mut(id) {
                values.extend(rows.iter().map(|r| r.get(name).cloned().unwrap_or_default()));
            }
        }
        let fresh = self.ids.row_ids(rows.len());
        self.row_ids.extend(fresh);
        self.nrows += rows.len();
    }

    /// Keep the rows at `positions`, in that order.
    ///
    /// Positions must be distinct. Row ids travel with their rows; each
    /// column is rebuilt independently.
    pub(crate) fn take_rows(&mut self, positions: &[usize]) {
        self.cols.par_values_mut().for_each(|values| {
            let mut slots: Vec<Option<Value>> =
                std::mem::take(values).into_iter().map(Some).collect();
            *values = positions
                .iter()
                .map(|&i| slots.get_mut(i).and_then(Option::take).unwrap_or_default())
                .collect();
        });
        let mut ids: Vec<Option<RowId>> = std::mem::take(&mut self.row_ids)
            .into_iter()
            .map(Some)
            .collect();
        self.row_ids = positions
            .iter()
            .filter_map(|&i| ids.get_mut(i).and_then(Option::take))
            .collect();
        self.nrows = positions.len();
    }

    /// Keep rows whose position satisfies `keep`, preserving order
    pub(crate) fn retain_rows<F>(&mut self, mut keep: F)
    where
        F: FnMut(usize) -> bool,
    {
        let positions: Vec<usize> = (0..self.nrows).filter(|&i| keep(i)).collect();
        if positions.len() != self.nrows {
            self.take_rows(&positions);
        }
    }

    /// Replace all rows with freshly built columns.
    ///
    /// Output columns whose name already exists keep their column id and new
    /// names get fresh ids. Columns not listed are dropped, a repeated name
    /// keeps its last values, and every row gets a fresh row id.
    pub(crate) fn rebuild(&mut self, columns: Vec<(String, Vec<Value>)>, nrows: usize) {
        let mut cols: IndexMap<ColumnId, Vec<Value>> = IndexMap::with_capacity(columns.len());
        let mut col_names: IndexMap<String, ColumnId> = IndexMap::with_capacity(columns.len());
        for (name, mut values) in columns {
            values.resize(nrows, Value::Null);
            if let Some(id) = col_names.get(&name) {
                cols.insert(id.clone(), values);
                continue;
            }
            let id = self
                .col_names
                .get(&name)
                .cloned()
                .filter(|id| !cols.contains_key(id))
                .unwrap_or_else(|| self.ids.column_id());
            cols.insert(id.clone(), values);
            col_names.insert(name, id);
        }
        self.cols = cols;
        self.col_names = col_names;
        self.row_ids = self.ids.row_ids(nrows);
        self.nrows = nrows;
    }

    /// Discard all data and load `rows` with fresh ids. Metadata is kept.
    pub(crate) fn load_rows(&mut self, rows: &[Row]) {
        let mut names: IndexSet<&str> = IndexSet::new();
        for row in rows {
            names.extend(row.keys().map(String::as_str));
        }
        self.cols.clear();
        self.col_names.clear();
        for name in names {
            let values = rows
                .iter()
                .map(|r| r.get(name).cloned().unwrap_or_default())
                .collect();
            let id = self.ids.column_id();
            self.cols.insert(id.clone(), values);
            self.col_names.insert(name.to_string(), id);
        }
        self.row_ids = self.ids.row_ids(rows.len());
        self.nrows = rows.len();
    }
}

impl PartialEq for ColumnStore {
    fn eq(&self, other: &Self) -> bool {
        self.same_state(other)
    }
}

impl Index<&str> for ColumnStore {
    type Output = [Value];

    fn index(&self, name: &str) -> &[Value] {
        match self.column(name) {
            Some(values) => values,
            None => panic!("no column named '{name}'"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;

    fn sample() -> ColumnStore {
        ColumnStore::from_rows(&[
            row! { "a" => 1, "b" => 2 },
            row! { "a" => 3, "c" => "x" },
        ])
    }

    #[test]
    fn test_from_rows_orders_columns_by_first_appearance() {
        let store = sample();
        assert_eq!(store.columns(), vec!["a", "b", "c"]);
        assert_eq!(store.shape(), (2, 3));
        assert_eq!(store["b"], [Value::Int(2), Value::Null]);
        assert_eq!(store["c"], [Value::Null, Value::from("x")]);
        assert!(store.check_invariants().is_ok());
    }

    #[test]
    fn test_to_rows_with_row_id() {
        let store = sample();
        let rows = store.to_rows(true);
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[1][ROW_ID_KEY],
            Value::Str(store.row_ids()[1].to_string())
        );
        assert_eq!(rows[0]["a"], Value::Int(1));
        assert!(!store.to_rows(false)[0].contains_key(ROW_ID_KEY));
    }

    #[test]
    fn test_row_lookups() {
        let store = sample();
        let last = store.get_row_id(-1).unwrap().clone();
        assert_eq!(store.get_row_index(last.as_str()), 1);
        assert_eq!(store.get_row_index("missing"), -1);
        assert_eq!(store.get_row_by_id(last.as_str()).unwrap()["a"], Value::Int(3));
        assert!(store.get_row_by_id("missing").is_none());
        assert!(store.get_row_id(2).is_none());
        assert!(store.get_row_id(-3).is_none());
    }

    #[test]
    fn test_dict_round_trip_preserves_ids() {
        let store = sample();
        let restored = ColumnStore::from_json(&store.to_json().unwrap()).unwrap();
        assert!(restored.same_state(&store));
        assert_eq!(restored.column_id("a"), store.column_id("a"));
        assert_eq!(restored.row_ids(), store.row_ids());
    }

    #[test]
    fn test_from_dict_rejects_broken_invariants() {
        let mut dict = sample().to_dict();
        dict.nrows = 5;
        assert!(matches!(
            ColumnStore::from_dict(dict),
            Err(StoreError::InvalidState(_))
        ));

        let mut dict = sample().to_dict();
        dict.col_names.insert("ghost".into(), ColumnId::from("nope"));
        assert!(ColumnStore::from_dict(dict).is_err());
    }

    #[test]
    fn test_take_rows_moves_ids_with_rows() {
        let mut store = sample();
        let ids = store.row_ids().to_vec();
        store.take_rows(&[1, 0]);
        assert_eq!(store.row_ids(), &[ids[1].clone(), ids[0].clone()]);
        assert_eq!(store["a"], [Value::Int(3), Value::Int(1)]);
    }

    #[test]
    fn test_snapshot_is_independent() {
        let store = sample();
        let mut branch = store.snapshot();
        branch.column_mut("a").unwrap()[0] = Value::Int(99);
        assert_eq!(store["a"][0], Value::Int(1));
        assert_eq!(branch["a"][0], Value::Int(99));
    }
}
