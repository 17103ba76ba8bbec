//! Column-level events. Renames and reorders only touch the name index.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::Execute;
use crate::error::StoreResult;
use crate::store::{ColumnStore, CODEBOOK_KEY};
use crate::types::{ColumnId, Value, ValueMap};

/// Rename a column in place. Its data and id are untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenameColumn {
    pub old_name: String,
    pub new_name: String,
}

impl Execute for RenameColumn {
    fn execute(&self, store: &mut ColumnStore) -> StoreResult<()> {
        rename(store, &self.old_name, &self.new_name);
        Ok(())
    }
}

/// Swap the name binding, keeping the column's position. Returns whether
/// anything changed.
fn rename(store: &mut ColumnStore, old_name: &str, new_name: &str) -> bool {
    if store.col_names.contains_key(new_name) {
        return false;
    }
    match store.col_names.shift_remove_full(old_name) {
        Some((position, _, id)) => {
            store.col_names.shift_insert(position, new_name.to_string(), id);
            true
        }
        None => false,
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DropColumns {
    pub columns: Vec<String>,
}

impl Execute for DropColumns {
    fn execute(&self, store: &mut ColumnStore) -> StoreResult<()> {
        for name in &self.columns {
            store.drop_column(name);
        }
        Ok(())
    }
}

/// Bind `name` to a fresh column holding `values`.
///
/// `values` must have one entry per row, otherwise nothing happens.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddColumn {
    pub name: String,
    pub values: Vec<Value>,
}

impl Execute for AddColumn {
    fn execute(&self, store: &mut ColumnStore) -> StoreResult<()> {
        if self.values.len() == store.nrows() {
            store.bind_column(&self.name, self.values.clone());
        }
        Ok(())
    }
}

/// Put `order` first, then every unlisted column in its current order.
/// Any unknown name makes this a no-op.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReorderColumns {
    pub order: Vec<String>,
}

impl Execute for ReorderColumns {
    fn execute(&self, store: &mut ColumnStore) -> StoreResult<()> {
        if !self.order.iter().all(|n| store.has_column(n)) {
            return Ok(());
        }
        let mut reordered: IndexMap<String, ColumnId> =
            IndexMap::with_capacity(store.col_names.len());
        for name in &self.order {
            if let Some(id) = store.col_names.get(name) {
                reordered.entry(name.clone()).or_insert_with(|| id.clone());
            }
        }
        for (name, id) in &store.col_names {
            reordered.entry(name.clone()).or_insert_with(|| id.clone());
        }
        store.col_names = reordered;
        Ok(())
    }
}

/// Keep only `columns`, in the listed order; unknown names are ignored
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectColumns {
    pub columns: Vec<String>,
}

impl Execute for SelectColumns {
    fn execute(&self, store: &mut ColumnStore) -> StoreResult<()> {
        let mut kept: IndexMap<String, ColumnId> = IndexMap::with_capacity(self.columns.len());
        for name in &self.columns {
            if let Some(id) = store.col_names.get(name) {
                kept.entry(name.clone()).or_insert_with(|| id.clone());
            }
        }
        store.cols.retain(|id, _| kept.values().any(|k| k == id));
        store.col_names = kept;
        Ok(())
    }
}

/// Batch rename that records each applied rename in the codebook.
///
/// The codebook entry for the new name is the old name's description if one
/// exists, otherwise the old name itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenameColumnsToValid {
    pub mapping: IndexMap<String, String>,
}

impl Execute for RenameColumnsToValid {
    fn execute(&self, store: &mut ColumnStore) -> StoreResult<()> {
        for (old_name, new_name) in &self.mapping {
            if old_name == new_name || !rename(store, old_name, new_name) {
                continue;
            }
            let entry = store
                .meta
                .entry(CODEBOOK_KEY.to_string())
                .or_insert_with(|| Value::Map(ValueMap::new()));
            if !matches!(entry, Value::Map(_)) {
                *entry = Value::Map(ValueMap::new());
            }
            if let Value::Map(codebook) = entry {
                let description = codebook
                    .shift_remove(old_name)
                    .unwrap_or_else(|| Value::Str(old_name.clone()));
                codebook.insert(new_name.clone(), description);
            }
        }
        Ok(())
    }
}

/// Wrap every non-null cell as `prefix + value + suffix`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConcatToColumn {
    pub column: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub suffix: String,
    /// Write into this column instead of overwriting the source
    #[serde(default)]
    pub new_column: Option<String>,
}

impl Execute for ConcatToColumn {
    fn execute(&self, store: &mut ColumnStore) -> StoreResult<()> {
        let Some(values) = store.column(&self.column) else {
            return Ok(());
        };
        let wrapped = values
            .iter()
            .map(|v| match v {
                Value::Null => Value::Null,
                other => Value::Str(format!(
                    "{}{}{}",
                    self.prefix,
                    other.to_key_string(),
                    self.suffix
                )),
            })
            .collect();
        let target = self.new_column.as_deref().unwrap_or(&self.column);
        store.set_column(target, wrapped);
        Ok(())
    }
}

/// Suffix repeated values with `_1`, `_2`, ...; first occurrences stay as is
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UniquifyColumn {
    pub column: String,
}

impl Execute for UniquifyColumn {
    fn execute(&self, store: &mut ColumnStore) -> StoreResult<()> {
        let Some(values) = store.column_mut(&self.column) else {
            return Ok(());
        };
        let mut taken: HashSet<String> = values
            .iter()
            .filter(|v| !v.is_null())
            .map(Value::to_key_string)
            .collect();
        let mut seen: HashMap<String, usize> = HashMap::new();
        for value in values.iter_mut().filter(|v| !v.is_null()) {
            let key = value.to_key_string();
            let count = seen.entry(key.clone()).or_insert(0);
            if *count > 0 {
                // Skip suffixes already present in the column
                let mut name = format!("{key}_{count}");
                while taken.contains(&name) {
                    *count += 1;
                    name = format!("{key}_{count}");
                }
                taken.insert(name.clone());
                *value = Value::Str(name);
            }
            *count += 1;
        }
        Ok(())
    }
}

/// Pair two list columns into a map column, row by row.
///
/// Rows where either cell is not a list, or the lengths differ, get `Null`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ZipColumns {
    pub keys_column: String,
    pub values_column: String,
    pub new_column: String,
}

impl Execute for ZipColumns {
    fn execute(&self, store: &mut ColumnStore) -> StoreResult<()> {
        let (Some(keys), Some(values)) = (
            store.column(&self.keys_column),
            store.column(&self.values_column),
        ) else {
            return Ok(());
        };
        let zipped = keys
            .iter()
            .zip(values)
            .map(|(k, v)| match (k.as_list(), v.as_list()) {
                (Some(ks), Some(vs)) if ks.len() == vs.len() => Value::Map(
                    ks.iter()
                        .zip(vs)
                        .map(|(k, v)| (k.to_key_string(), v.clone()))
                        .collect(),
                ),
                _ => Value::Null,
            })
            .collect();
        store.set_column(&self.new_column, zipped);
        Ok(())
    }
}
