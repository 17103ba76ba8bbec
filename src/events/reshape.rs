//! Shape-changing events: expand, melt, widen, unpack, collapse and chunk.
//!
//! Events that fan rows out or fold them together rebuild the store with
//! fresh row ids. Output columns that already existed by name keep their
//! column id. Unpacking only adds columns, so row ids survive it.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::Execute;
use crate::error::StoreResult;
use crate::store::ColumnStore;
use crate::types::{GroupKey, Value};

/// Fan list cells out into one row per element.
///
/// All expanded columns must hold lists of equal length in a row, otherwise
/// the row is dropped. Non-list cells count as one-element lists and empty
/// lists produce no rows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExpandRows {
    pub columns: Vec<String>,
    /// Add a 1-based `{column}_number` position column per expanded column
    #[serde(default)]
    pub number_field: bool,
}

impl Execute for ExpandRows {
    fn execute(&self, store: &mut ColumnStore) -> StoreResult<()> {
        if self.columns.is_empty() || !self.columns.iter().all(|c| store.has_column(c)) {
            return Ok(());
        }
        let number_names: Vec<String> = if self.number_field {
            self.columns.iter().map(|c| format!("{c}_number")).collect()
        } else {
            Vec::new()
        };
        let base: Vec<String> = store
            .columns()
            .into_iter()
            .filter(|n| !number_names.contains(n))
            .collect();

        let mut out: Vec<Vec<Value>> = vec![Vec::new(); base.len() + number_names.len()];
        let mut nrows = 0;
        for i in 0..store.nrows() {
            let items: Vec<Vec<Value>> = self
                .columns
                .iter()
                .map(|c| match store.cell(i, c) {
                    Some(Value::List(items)) => items.clone(),
                    Some(other) => vec![other.clone()],
                    None => vec![Value::Null],
                })
                .collect();
            let width = items[0].len();
            if items.iter().any(|list| list.len() != width) {
                continue;
            }
            for j in 0..width {
                for (k, name) in base.iter().enumerate() {
                    let value = match self.columns.iter().position(|c| c == name) {
                        Some(e) => items[e][j].clone(),
                        None => store.cell(i, name).cloned().unwrap_or_default(),
                    };
                    out[k].push(value);
                }
                for k in 0..number_names.len() {
                    out[base.len() + k].push(Value::from(j + 1));
                }
                nrows += 1;
            }
        }

        let columns = base.into_iter().chain(number_names).zip(out).collect();
        store.rebuild(columns, nrows);
        Ok(())
    }
}

fn default_var_name() -> String {
    "variable".to_string()
}

fn default_value_name() -> String {
    "value".to_string()
}

/// Melt wide columns into `(variable, value)` pairs, row-major
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnpivotRows {
    pub id_vars: Vec<String>,
    /// Columns to melt; defaults to every non-id column
    #[serde(default)]
    pub value_vars: Option<Vec<String>>,
    #[serde(default = "default_var_name")]
    pub var_name: String,
    #[serde(default = "default_value_name")]
    pub value_name: String,
}

impl Default for UnpivotRows {
    fn default() -> Self {
        Self {
            id_vars: Vec::new(),
            value_vars: None,
            var_name: default_var_name(),
            value_name: default_value_name(),
        }
    }
}

impl Execute for UnpivotRows {
    fn execute(&self, store: &mut ColumnStore) -> StoreResult<()> {
        if !self.id_vars.iter().all(|c| store.has_column(c)) {
            return Ok(());
        }
        let value_vars: Vec<String> = match &self.value_vars {
            Some(vars) => vars.iter().filter(|v| store.has_column(v)).cloned().collect(),
            None => store
                .columns()
                .into_iter()
                .filter(|c| !self.id_vars.contains(c))
                .collect(),
        };

        let mut ids: Vec<Vec<Value>> = vec![Vec::new(); self.id_vars.len()];
        let mut variables = Vec::new();
        let mut values = Vec::new();
        for i in 0..store.nrows() {
            for var in &value_vars {
                for (k, id) in self.id_vars.iter().enumerate() {
                    ids[k].push(store.cell(i, id).cloned().unwrap_or_default());
                }
                variables.push(Value::Str(var.clone()));
                values.push(store.cell(i, var).cloned().unwrap_or_default());
            }
        }

        let nrows = variables.len();
        let mut columns: Vec<(String, Vec<Value>)> =
            self.id_vars.iter().cloned().zip(ids).collect();
        columns.push((self.var_name.clone(), variables));
        columns.push((self.value_name.clone(), values));
        store.rebuild(columns, nrows);
        Ok(())
    }
}

/// Widen long data: one row per `index` tuple, one column per distinct
/// `columns` value, filled from `values`. Later duplicates win.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PivotRows {
    pub index: Vec<String>,
    pub columns: String,
    pub values: String,
}

impl Execute for PivotRows {
    fn execute(&self, store: &mut ColumnStore) -> StoreResult<()> {
        let known = |c: &String| store.has_column(c);
        if !self.index.iter().all(known) || !known(&self.columns) || !known(&self.values) {
            return Ok(());
        }

        // group key -> first row of the group
        let mut groups: IndexMap<Vec<GroupKey>, usize> = IndexMap::new();
        let mut new_columns: IndexSet<String> = IndexSet::new();
        let mut cells: IndexMap<(usize, usize), Value> = IndexMap::new();
        for i in 0..store.nrows() {
            let key: Vec<GroupKey> = self
                .index
                .iter()
                .map(|c| store.cell(i, c).map_or(GroupKey::Null, Value::group_key))
                .collect();
            let entry = groups.entry(key);
            let group = entry.index();
            entry.or_insert(i);
            let label = store
                .cell(i, &self.columns)
                .map(Value::to_key_string)
                .unwrap_or_default();
            let (column, _) = new_columns.insert_full(label);
            let value = store.cell(i, &self.values).cloned().unwrap_or_default();
            cells.insert((group, column), value);
        }

        let nrows = groups.len();
        let mut columns: Vec<(String, Vec<Value>)> = self
            .index
            .iter()
            .map(|c| {
                let values: Vec<Value> = groups
                    .values()
                    .map(|&first| store.cell(first, c).cloned().unwrap_or_default())
                    .collect();
                (c.clone(), values)
            })
            .collect();
        for (k, name) in new_columns.iter().enumerate() {
            let values: Vec<Value> = (0..nrows)
                .map(|g| cells.get(&(g, k)).cloned().unwrap_or_default())
                .collect();
            columns.push((name.clone(), values));
        }
        store.rebuild(columns, nrows);
        Ok(())
    }
}

/// Spread a list column over several columns.
///
/// Width is `new_names.len()` when given, otherwise the longest list. Auto
/// names are `{prefix}_{i}` (1-based), with `prefix` defaulting to the column.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnpackList {
    pub column: String,
    #[serde(default)]
    pub new_names: Option<Vec<String>>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub drop_original: bool,
}

impl Execute for UnpackList {
    fn execute(&self, store: &mut ColumnStore) -> StoreResult<()> {
        let Some(source) = store.column(&self.column) else {
            return Ok(());
        };
        let names: Vec<String> = match &self.new_names {
            Some(names) => names.clone(),
            None => {
                let width = source
                    .iter()
                    .filter_map(Value::as_list)
                    .map(<[Value]>::len)
                    .max()
                    .unwrap_or(0);
                let prefix = self.prefix.as_deref().unwrap_or(&self.column);
                (1..=width).map(|i| format!("{prefix}_{i}")).collect()
            }
        };
        let spread: Vec<Vec<Value>> = (0..names.len())
            .map(|k| {
                source
                    .iter()
                    .map(|v| {
                        v.as_list()
                            .and_then(|items| items.get(k))
                            .cloned()
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .collect();

        for (name, values) in names.iter().zip(spread) {
            store.set_column(name, values);
        }
        if self.drop_original && !names.contains(&self.column) {
            store.drop_column(&self.column);
        }
        Ok(())
    }
}

/// Spread a map column over one column per key, named `{prefix}{key}`.
///
/// Keys default to the union of all map keys in first-appearance order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnpackColumn {
    pub column: String,
    #[serde(default)]
    pub keys: Option<Vec<String>>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub drop_original: bool,
}

impl Execute for UnpackColumn {
    fn execute(&self, store: &mut ColumnStore) -> StoreResult<()> {
        let Some(source) = store.column(&self.column) else {
            return Ok(());
        };
        let keys: Vec<String> = match &self.keys {
            Some(keys) => keys.clone(),
            None => {
                let mut union: IndexSet<String> = IndexSet::new();
                for map in source.iter().filter_map(Value::as_map) {
                    union.extend(map.keys().cloned());
                }
                union.into_iter().collect()
            }
        };
        let prefix = self.prefix.as_deref().unwrap_or_default();
        let spread: Vec<(String, Vec<Value>)> = keys
            .iter()
            .map(|key| {
                let values = source
                    .iter()
                    .map(|v| {
                        v.as_map()
                            .and_then(|m| m.get(key))
                            .cloned()
                            .unwrap_or_default()
                    })
                    .collect();
                (format!("{prefix}{key}"), values)
            })
            .collect();

        let written: Vec<String> = spread.iter().map(|(n, _)| n.clone()).collect();
        for (name, values) in spread {
            store.set_column(&name, values);
        }
        if self.drop_original && !written.contains(&self.column) {
            store.drop_column(&self.column);
        }
        Ok(())
    }
}

/// Fold rows that agree on every other column, gathering `field`.
///
/// `field` becomes a list, or a `separator`-joined string of the non-null
/// values' canonical forms. `exclude` columns are ignored for grouping and
/// dropped from the output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollapseRows {
    pub field: String,
    #[serde(default)]
    pub separator: Option<String>,
    /// Column receiving the number of rows folded into each group
    #[serde(default)]
    pub count_field: Option<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl Execute for CollapseRows {
    fn execute(&self, store: &mut ColumnStore) -> StoreResult<()> {
        if !store.has_column(&self.field) {
            return Ok(());
        }
        let output: Vec<String> = store
            .columns()
            .into_iter()
            .filter(|c| !self.exclude.contains(c) || *c == self.field)
            .collect();
        let group_by: Vec<&String> = output.iter().filter(|c| **c != self.field).collect();

        let mut groups: IndexMap<Vec<GroupKey>, Vec<usize>> = IndexMap::new();
        for i in 0..store.nrows() {
            let key = group_by
                .iter()
                .map(|c| store.cell(i, c).map_or(GroupKey::Null, Value::group_key))
                .collect();
            groups.entry(key).or_default().push(i);
        }

        let mut columns: Vec<(String, Vec<Value>)> = output
            .iter()
            .map(|name| {
                let values: Vec<Value> = groups
                    .values()
                    .map(|members| {
                        if *name != self.field {
                            return store.cell(members[0], name).cloned().unwrap_or_default();
                        }
                        let gathered = members
                            .iter()
                            .map(|&i| store.cell(i, name).cloned().unwrap_or_default());
                        match &self.separator {
                            Some(sep) => Value::Str(
                                gathered
                                    .filter(|v| !v.is_null())
                                    .map(|v| v.to_key_string())
                                    .collect::<Vec<_>>()
                                    .join(sep.as_str()),
                            ),
                            None => Value::List(gathered.collect()),
                        }
                    })
                    .collect();
                (name.clone(), values)
            })
            .collect();
        if let Some(count_field) = &self.count_field {
            let counts: Vec<Value> = groups.values().map(|m| Value::from(m.len())).collect();
            columns.push((count_field.clone(), counts));
        }
        let nrows = groups.len();
        store.rebuild(columns, nrows);
        Ok(())
    }
}

const DEFAULT_CHUNK_WORDS: usize = 200;

/// Split a text column into bounded chunks, one output row per chunk.
///
/// Chunks hold at most `max_lines` lines when set, otherwise at most
/// `max_words` words (200 by default). Every output row gets
/// `chunk_index`, `chunk_char_count` and `chunk_word_count`; non-text cells
/// pass through as a single row with `Null` metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkRows {
    pub column: String,
    #[serde(default)]
    pub max_words: Option<usize>,
    #[serde(default)]
    pub max_lines: Option<usize>,
    /// Keep the full text in `{column}_original`
    #[serde(default)]
    pub keep_original: bool,
    /// Store the hex SHA-256 of the full text in `{column}_sha256`
    #[serde(default)]
    pub hash_original: bool,
}

impl ChunkRows {
    fn split(&self, text: &str) -> Vec<String> {
        let chunks: Vec<String> = match self.max_lines {
            Some(limit) => {
                let lines: Vec<&str> = text.lines().collect();
                lines.chunks(limit.max(1)).map(|c| c.join("\n")).collect()
            }
            None => {
                let limit = self.max_words.unwrap_or(DEFAULT_CHUNK_WORDS).max(1);
                let words: Vec<&str> = text.split_whitespace().collect();
                words.chunks(limit).map(|c| c.join(" ")).collect()
            }
        };
        if chunks.is_empty() {
            vec![String::new()]
        } else {
            chunks
        }
    }
}

impl Execute for ChunkRows {
    fn execute(&self, store: &mut ColumnStore) -> StoreResult<()> {
        if !store.has_column(&self.column) {
            return Ok(());
        }
        let mut extra = vec![
            "chunk_index".to_string(),
            "chunk_char_count".to_string(),
            "chunk_word_count".to_string(),
        ];
        if self.keep_original {
            extra.push(format!("{}_original", self.column));
        }
        if self.hash_original {
            extra.push(format!("{}_sha256", self.column));
        }
        let base: Vec<String> = store
            .columns()
            .into_iter()
            .filter(|n| !extra.contains(n))
            .collect();

        let mut out: Vec<Vec<Value>> = vec![Vec::new(); base.len() + extra.len()];
        let mut nrows = 0;
        for i in 0..store.nrows() {
            let cell = store.cell(i, &self.column).cloned().unwrap_or_default();
            let pieces: Vec<(Value, [Value; 3])> = match &cell {
                Value::Str(text) => self
                    .split(text)
                    .into_iter()
                    .enumerate()
                    .map(|(k, chunk)| {
                        let meta = [
                            Value::from(k),
                            Value::from(chunk.chars().count()),
                            Value::from(chunk.split_whitespace().count()),
                        ];
                        (Value::Str(chunk), meta)
                    })
                    .collect(),
                other => vec![(other.clone(), [Value::Null, Value::Null, Value::Null])],
            };
            let digest = match (&cell, self.hash_original) {
                (Value::Str(text), true) => Value::Str(hex::encode(Sha256::digest(text.as_bytes()))),
                _ => Value::Null,
            };

            for (chunk, meta) in pieces {
                for (k, name) in base.iter().enumerate() {
                    let value = if *name == self.column {
                        chunk.clone()
                    } else {
                        store.cell(i, name).cloned().unwrap_or_default()
                    };
                    out[k].push(value);
                }
                let mut tail = meta.into_iter().collect::<Vec<_>>();
                if self.keep_original {
                    tail.push(cell.clone());
                }
                if self.hash_original {
                    tail.push(digest.clone());
                }
                for (k, value) in tail.into_iter().enumerate() {
                    out[base.len() + k].push(value);
                }
                nrows += 1;
            }
        }

        let columns = base.into_iter().chain(extra).zip(out).collect();
        store.rebuild(columns, nrows);
        Ok(())
    }
}
