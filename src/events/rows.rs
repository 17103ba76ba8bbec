//! Row-level events: append, delete, duplicate, filter, sort and sample

use std::cmp::Ordering;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::{target_columns, Execute};
use crate::error::StoreResult;
use crate::expr::Expr;
use crate::random::{sample_positions, shuffle_positions};
use crate::store::ColumnStore;
use crate::types::{GroupKey, Row, Value};

/// Append one row; unseen keys become new columns
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppendRow {
    pub row: Row,
}

impl Execute for AppendRow {
    fn execute(&self, store: &mut ColumnStore) -> StoreResult<()> {
        store.push_rows(std::slice::from_ref(&self.row));
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppendRows {
    pub rows: Vec<Row>,
}

impl Execute for AppendRows {
    fn execute(&self, store: &mut ColumnStore) -> StoreResult<()> {
        store.push_rows(&self.rows);
        Ok(())
    }
}

/// Delete rows by position, by row id, or both
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteRows {
    /// Positions; negative values count from the end
    #[serde(default)]
    pub indices: Vec<i64>,
    #[serde(default)]
    pub row_ids: Vec<String>,
}

impl Execute for DeleteRows {
    fn execute(&self, store: &mut ColumnStore) -> StoreResult<()> {
        let mut doomed: HashSet<usize> = self
            .indices
            .iter()
            .filter_map(|&i| store.resolve_index(i))
            .collect();
        if !self.row_ids.is_empty() {
            let ids: HashSet<&str> = self.row_ids.iter().map(String::as_str).collect();
            doomed.extend(
                store
                    .row_ids()
                    .iter()
                    .enumerate()
                    .filter(|(_, id)| ids.contains(id.as_str()))
                    .map(|(i, _)| i),
            );
        }
        if !doomed.is_empty() {
            store.retain_rows(|i| !doomed.contains(&i));
        }
        Ok(())
    }
}

/// Copy an existing row, override some fields and append it with a fresh id
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TackOnRow {
    pub index: i64,
    #[serde(default)]
    pub overrides: Row,
}

impl Execute for TackOnRow {
    fn execute(&self, store: &mut ColumnStore) -> StoreResult<()> {
        let Some(position) = store.resolve_index(self.index) else {
            return Ok(());
        };
        let mut row = store.row_at(position);
        for (key, value) in &self.overrides {
            row.insert(key.clone(), value.clone());
        }
        store.push_rows(&[row]);
        Ok(())
    }
}

/// Keep the first row of each distinct key over `columns` (all by default)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DropDuplicates {
    #[serde(default)]
    pub columns: Option<Vec<String>>,
}

impl Execute for DropDuplicates {
    fn execute(&self, store: &mut ColumnStore) -> StoreResult<()> {
        let names = target_columns(store, self.columns.as_deref());
        if names.is_empty() {
            return Ok(());
        }
        let columns: Vec<&[Value]> = names.iter().filter_map(|n| store.column(n)).collect();
        let mut seen = HashSet::with_capacity(store.nrows());
        let keep: Vec<bool> = (0..store.nrows())
            .map(|i| {
                let key: Vec<GroupKey> = columns.iter().map(|c| c[i].group_key()).collect();
                seen.insert(key)
            })
            .collect();
        store.retain_rows(|i| keep[i]);
        Ok(())
    }
}

/// Keep only the first `n` rows
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeadRows {
    pub n: usize,
}

impl Execute for HeadRows {
    fn execute(&self, store: &mut ColumnStore) -> StoreResult<()> {
        if self.n < store.nrows() {
            let positions: Vec<usize> = (0..self.n).collect();
            store.take_rows(&positions);
        }
        Ok(())
    }
}

/// Keep rows for which `expression` is truthy.
///
/// Names resolve to the row's cells; unknown columns read as `Null`. A row
/// whose evaluation fails is dropped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterRows {
    pub expression: String,
}

impl Execute for FilterRows {
    fn execute(&self, store: &mut ColumnStore) -> StoreResult<()> {
        let expr = Expr::parse(&self.expression)?;
        let keep: Vec<bool> = (0..store.nrows())
            .map(|i| {
                let lookup = |name: &str| Some(store.cell(i, name).cloned().unwrap_or_default());
                expr.evaluate(&lookup)
                    .map(|v| v.is_truthy())
                    .unwrap_or(false)
            })
            .collect();
        store.retain_rows(|i| keep[i]);
        Ok(())
    }
}

/// Stable multi-key sort. Nulls and NaN sort last in either direction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SortRows {
    pub columns: Vec<String>,
    /// Per-column direction; missing entries mean ascending
    #[serde(default)]
    pub descending: Vec<bool>,
}

impl Execute for SortRows {
    fn execute(&self, store: &mut ColumnStore) -> StoreResult<()> {
        let keys: Vec<(&[Value], bool)> = self
            .columns
            .iter()
            .enumerate()
            .filter_map(|(k, name)| {
                let desc = self.descending.get(k).copied().unwrap_or(false);
                store.column(name).map(|values| (values, desc))
            })
            .collect();
        if keys.is_empty() {
            return Ok(());
        }

        let mut order: Vec<usize> = (0..store.nrows()).collect();
        order.sort_by(|&a, &b| {
            for (values, desc) in &keys {
                let ord = compare_for_sort(&values[a], &values[b], *desc);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        store.take_rows(&order);
        Ok(())
    }
}

fn compare_for_sort(a: &Value, b: &Value, descending: bool) -> Ordering {
    match (a.sorts_last(), b.sorts_last()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) if descending => b.sort_cmp(a),
        (false, false) => a.sort_cmp(b),
    }
}

/// Drop rows holding a missing value in any of `columns` (all by default)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterNA {
    #[serde(default)]
    pub columns: Option<Vec<String>>,
}

impl Execute for FilterNA {
    fn execute(&self, store: &mut ColumnStore) -> StoreResult<()> {
        let names = target_columns(store, self.columns.as_deref());
        let keep: Vec<bool> = {
            let columns: Vec<&[Value]> = names.iter().filter_map(|n| store.column(n)).collect();
            (0..store.nrows())
                .map(|i| !columns.iter().any(|c| c[i].is_missing()))
                .collect()
        };
        store.retain_rows(|i| keep[i]);
        Ok(())
    }
}

/// Seeded Fisher-Yates shuffle of row order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShuffleRows {
    pub seed: String,
}

impl Execute for ShuffleRows {
    fn execute(&self, store: &mut ColumnStore) -> StoreResult<()> {
        let order = shuffle_positions(store.nrows(), &self.seed);
        store.take_rows(&order);
        Ok(())
    }
}

/// Seeded sample of `n` rows without replacement, in draw order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SampleRows {
    pub n: usize,
    pub seed: String,
}

impl Execute for SampleRows {
    fn execute(&self, store: &mut ColumnStore) -> StoreResult<()> {
        let picked = sample_positions(store.nrows(), self.n, &self.seed);
        store.take_rows(&picked);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::row;

    fn people() -> ColumnStore {
        ColumnStore::from_rows(&[
            row! { "name" => "ada", "age" => 36 },
            row! { "name" => "bob", "age" => Value::Null },
            row! { "name" => "cy", "age" => 25 },
            row! { "name" => "di", "age" => 41 },
        ])
    }

    fn names(store: &ColumnStore) -> Vec<String> {
        store["name"]
            .iter()
            .map(|v| v.as_str().unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn test_append_row_adds_new_columns() {
        let mut store = people();
        AppendRow {
            row: row! { "name" => "ed", "city" => "Oslo" },
        }
        .execute(&mut store)
        .unwrap();

        assert_eq!(store.columns(), vec!["name", "age", "city"]);
        assert_eq!(store.nrows(), 5);
        assert!(store["age"][4].is_null());
        assert!(store["city"][0].is_null());
        assert_eq!(store["city"][4], Value::from("Oslo"));
        store.check_invariants().unwrap();
    }

    #[test]
    fn test_delete_rows_by_index_and_id() {
        let mut store = people();
        let cy = store.row_ids()[2].to_string();
        DeleteRows {
            indices: vec![-1, 99],
            row_ids: vec![cy, "unknown".into()],
        }
        .execute(&mut store)
        .unwrap();
        assert_eq!(names(&store), vec!["ada", "bob"]);
    }

    #[test]
    fn test_tack_on_row_copies_with_overrides() {
        let mut store = people();
        TackOnRow {
            index: -4,
            overrides: row! { "age" => 37, "note" => "copy" },
        }
        .execute(&mut store)
        .unwrap();
        assert_eq!(store.nrows(), 5);
        assert_eq!(store["name"][4], Value::from("ada"));
        assert_eq!(store["age"][4], Value::Int(37));
        assert_eq!(store["note"][4], Value::from("copy"));
        assert_ne!(store.row_ids()[4], store.row_ids()[0]);

        let before = store.snapshot();
        TackOnRow {
            index: 10,
            overrides: Row::new(),
        }
        .execute(&mut store)
        .unwrap();
        assert!(store.same_state(&before));
    }

    #[test]
    fn test_drop_duplicates_keeps_first() {
        let mut store = ColumnStore::from_rows(&[
            row! { "k" => 1, "v" => "a" },
            row! { "k" => 2, "v" => "b" },
            row! { "k" => 1, "v" => "c" },
        ]);
        let first = store.row_ids()[0].clone();
        DropDuplicates {
            columns: Some(vec!["k".into()]),
        }
        .execute(&mut store)
        .unwrap();
        assert_eq!(store["v"], [Value::from("a"), Value::from("b")]);
        assert_eq!(store.row_ids()[0], first);
    }

    #[test]
    fn test_drop_duplicates_compares_typed_values() {
        let mut store = ColumnStore::from_rows(&[
            row! { "k" => 1 },
            row! { "k" => "1" },
            row! { "k" => 1.0 },
            row! { "k" => Value::Null },
            row! { "k" => "None" },
        ]);
        DropDuplicates { columns: None }.execute(&mut store).unwrap();
        assert_eq!(
            store["k"],
            [Value::Int(1), Value::from("1"), Value::Null, Value::from("None")]
        );
    }

    #[test]
    fn test_head_rows() {
        let mut store = people();
        HeadRows { n: 2 }.execute(&mut store).unwrap();
        assert_eq!(names(&store), vec!["ada", "bob"]);
        HeadRows { n: 10 }.execute(&mut store).unwrap();
        assert_eq!(store.nrows(), 2);
    }

    #[test]
    fn test_filter_rows_preserves_ids() {
        let mut store = people();
        let ids = store.row_ids().to_vec();
        FilterRows {
            expression: "age > 30".into(),
        }
        .execute(&mut store)
        .unwrap();
        assert_eq!(names(&store), vec!["ada", "di"]);
        assert_eq!(store.row_ids(), &[ids[0].clone(), ids[3].clone()]);
    }

    #[test]
    fn test_filter_rows_rejects_bad_expression() {
        let mut store = people();
        let err = FilterRows {
            expression: "exec('rm')".into(),
        }
        .execute(&mut store)
        .unwrap_err();
        assert!(matches!(err, StoreError::Expression(_)));
        assert_eq!(store.nrows(), 4);
    }

    #[test]
    fn test_sort_rows_nulls_last_both_directions() {
        let mut store = people();
        SortRows {
            columns: vec!["age".into()],
            descending: vec![],
        }
        .execute(&mut store)
        .unwrap();
        assert_eq!(names(&store), vec!["cy", "ada", "di", "bob"]);

        SortRows {
            columns: vec!["age".into()],
            descending: vec![true],
        }
        .execute(&mut store)
        .unwrap();
        assert_eq!(names(&store), vec!["di", "ada", "cy", "bob"]);
    }

    #[test]
    fn test_sort_rows_multi_key_is_stable() {
        let mut store = ColumnStore::from_rows(&[
            row! { "g" => "b", "n" => 1, "tag" => "first" },
            row! { "g" => "a", "n" => 2, "tag" => "second" },
            row! { "g" => "b", "n" => 1, "tag" => "third" },
            row! { "g" => "a", "n" => 1, "tag" => "fourth" },
        ]);
        SortRows {
            columns: vec!["g".into(), "missing".into(), "n".into()],
            descending: vec![false, false, true],
        }
        .execute(&mut store)
        .unwrap();
        let tags: Vec<&str> = store["tag"].iter().filter_map(Value::as_str).collect();
        assert_eq!(tags, vec!["second", "fourth", "first", "third"]);
    }

    #[test]
    fn test_filter_na_recognizes_missing_strings() {
        let mut store = ColumnStore::from_rows(&[
            row! { "a" => 1, "b" => "ok" },
            row! { "a" => 2, "b" => " NaN " },
            row! { "a" => f64::NAN, "b" => "fine" },
            row! { "a" => 4, "b" => "null" },
        ]);
        FilterNA {
            columns: Some(vec!["a".into()]),
        }
        .execute(&mut store)
        .unwrap();
        assert_eq!(store.nrows(), 3);

        FilterNA { columns: None }.execute(&mut store).unwrap();
        assert_eq!(store["a"], [Value::Int(1)]);
    }

    #[test]
    fn test_shuffle_rows_follows_seeded_permutation() {
        let mut store = ColumnStore::from_rows(
            &(0..5).map(|i| row! { "i" => i }).collect::<Vec<_>>(),
        );
        ShuffleRows { seed: "abc".into() }
            .execute(&mut store)
            .unwrap();
        let order: Vec<i64> = store["i"].iter().filter_map(Value::coerce_int).collect();
        assert_eq!(order, vec![2, 4, 3, 0, 1]);
    }

    #[test]
    fn test_sample_rows_clamps_to_available() {
        let rows: Vec<Row> = (0..4).map(|i| row! { "i" => i }).collect();
        let mut store = ColumnStore::from_rows(&rows);
        SampleRows {
            n: 10,
            seed: "x".into(),
        }
        .execute(&mut store)
        .unwrap();
        let order: Vec<i64> = store["i"].iter().filter_map(Value::coerce_int).collect();
        assert_eq!(order, vec![3, 1, 2, 0]);
        store.check_invariants().unwrap();
    }
}
