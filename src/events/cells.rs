//! Cell-level events

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::{target_columns, Execute};
use crate::error::StoreResult;
use crate::store::ColumnStore;
use crate::types::Value;

/// Write a single cell; `row` may be negative
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetValue {
    pub row: i64,
    pub column: String,
    pub value: Value,
}

impl Execute for SetValue {
    fn execute(&self, store: &mut ColumnStore) -> StoreResult<()> {
        if let Some(position) = store.resolve_index(self.row) {
            if let Some(values) = store.column_mut(&self.column) {
                values[position] = self.value.clone();
            }
        }
        Ok(())
    }
}

/// Find and replace, keyed by the canonical string form of each cell
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplaceValues {
    pub mapping: IndexMap<String, Value>,
    #[serde(default)]
    pub columns: Option<Vec<String>>,
}

impl Execute for ReplaceValues {
    fn execute(&self, store: &mut ColumnStore) -> StoreResult<()> {
        if self.mapping.is_empty() {
            return Ok(());
        }
        for name in target_columns(store, self.columns.as_deref()) {
            if let Some(values) = store.column_mut(&name) {
                for value in values.iter_mut() {
                    if let Some(replacement) = self.mapping.get(&value.to_key_string()) {
                        *value = replacement.clone();
                    }
                }
            }
        }
        Ok(())
    }
}

/// Replace `Null` cells with `value`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FillNA {
    pub value: Value,
    #[serde(default)]
    pub columns: Option<Vec<String>>,
}

impl Execute for FillNA {
    fn execute(&self, store: &mut ColumnStore) -> StoreResult<()> {
        for name in target_columns(store, self.columns.as_deref()) {
            if let Some(values) = store.column_mut(&name) {
                values
                    .iter_mut()
                    .filter(|v| v.is_null())
                    .for_each(|v| *v = self.value.clone());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;

    fn grid() -> ColumnStore {
        ColumnStore::from_rows(&[
            row! { "a" => 1, "b" => "yes" },
            row! { "a" => Value::Null, "b" => true },
            row! { "a" => 3.0, "b" => Value::Null },
        ])
    }

    #[test]
    fn test_set_value_with_negative_row() {
        let mut store = grid();
        SetValue {
            row: -1,
            column: "a".into(),
            value: Value::from("z"),
        }
        .execute(&mut store)
        .unwrap();
        assert_eq!(store["a"][2], Value::from("z"));

        let before = store.snapshot();
        SetValue {
            row: 3,
            column: "a".into(),
            value: Value::Null,
        }
        .execute(&mut store)
        .unwrap();
        SetValue {
            row: 0,
            column: "nope".into(),
            value: Value::Null,
        }
        .execute(&mut store)
        .unwrap();
        assert!(store.same_state(&before));
    }

    #[test]
    fn test_replace_values_uses_canonical_strings() {
        let mut store = grid();
        ReplaceValues {
            mapping: IndexMap::from([
                ("True".to_string(), Value::from("yes")),
                ("3.0".to_string(), Value::Int(3)),
                ("None".to_string(), Value::from("missing")),
            ]),
            columns: Some(vec!["b".into()]),
        }
        .execute(&mut store)
        .unwrap();
        assert_eq!(
            store["b"],
            [Value::from("yes"), Value::from("yes"), Value::from("missing")]
        );
        assert!(store["a"][2].structurally_eq(&Value::Float(3.0)));
        assert!(matches!(store["a"][2], Value::Float(_)));
    }

    #[test]
    fn test_fill_na_store_wide() {
        let mut store = grid();
        FillNA {
            value: Value::Int(0),
            columns: None,
        }
        .execute(&mut store)
        .unwrap();
        assert_eq!(store["a"][1], Value::Int(0));
        assert_eq!(store["b"][2], Value::Int(0));
        assert_eq!(store["b"][0], Value::from("yes"));
    }
}
