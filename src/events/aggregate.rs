//! Group-by aggregation

use std::cmp::Ordering;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::Execute;
use crate::error::StoreResult;
use crate::store::ColumnStore;
use crate::types::{GroupKey, Value};

/// Aggregation applied to one column within each group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggFn {
    Sum,
    #[serde(alias = "avg")]
    Mean,
    Min,
    Max,
    /// Number of non-null cells
    Count,
    First,
    Last,
    /// All cells, in row order
    List,
    /// Canonical forms of non-null cells joined with `", "`
    Concat,
}

impl AggFn {
    /// Reduce one group's cells
    pub fn reduce(self, cells: &[&Value]) -> Value {
        let numbers = || cells.iter().copied().filter(|v| v.is_number());
        match self {
            AggFn::Sum => sum(numbers()),
            AggFn::Mean => {
                let (total, n) = numbers()
                    .filter_map(Value::as_number)
                    .fold((0.0, 0usize), |(t, n), x| (t + x, n + 1));
                if n == 0 {
                    Value::Null
                } else {
                    Value::Float(total / n as f64)
                }
            }
            AggFn::Min => extreme(numbers(), Ordering::Less),
            AggFn::Max => extreme(numbers(), Ordering::Greater),
            AggFn::Count => Value::from(cells.iter().filter(|v| !v.is_null()).count()),
            AggFn::First => cells.first().map(|v| (*v).clone()).unwrap_or_default(),
            AggFn::Last => cells.last().map(|v| (*v).clone()).unwrap_or_default(),
            AggFn::List => Value::List(cells.iter().map(|v| (*v).clone()).collect()),
            AggFn::Concat => Value::Str(
                cells
                    .iter()
                    .filter(|v| !v.is_null())
                    .map(|v| v.to_key_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            ),
        }
    }
}

/// Sum that stays integral while every term is an `Int`
fn sum<'a>(numbers: impl Iterator<Item = &'a Value>) -> Value {
    let mut int_total: Option<i64> = Some(0);
    let mut float_total = 0.0;
    for value in numbers {
        match value {
            Value::Int(i) => {
                int_total = int_total.and_then(|t| t.checked_add(*i));
                float_total += *i as f64;
            }
            other => {
                int_total = None;
                float_total += other.as_number().unwrap_or(0.0);
            }
        }
    }
    match int_total {
        Some(total) => Value::Int(total),
        None => Value::Float(float_total),
    }
}

fn extreme<'a>(numbers: impl Iterator<Item = &'a Value>, want: Ordering) -> Value {
    numbers
        .filter(|v| !v.sorts_last())
        .fold(None::<&Value>, |best, v| match best {
            Some(b) if v.sort_cmp(b) != want => Some(b),
            _ => Some(v),
        })
        .cloned()
        .unwrap_or_default()
}

/// Group by `id_vars` and reduce each listed column.
///
/// Output holds the id columns followed by the aggregated columns, one row
/// per group in first-appearance order. Rows get fresh ids.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupByAggregate {
    pub id_vars: Vec<String>,
    pub aggregations: IndexMap<String, AggFn>,
}

impl Execute for GroupByAggregate {
    fn execute(&self, store: &mut ColumnStore) -> StoreResult<()> {
        if !self.id_vars.iter().all(|c| store.has_column(c)) {
            return Ok(());
        }

        let mut groups: IndexMap<Vec<GroupKey>, Vec<usize>> = IndexMap::new();
        for i in 0..store.nrows() {
            let key = self
                .id_vars
                .iter()
                .map(|c| store.cell(i, c).map_or(GroupKey::Null, Value::group_key))
                .collect();
            groups.entry(key).or_default().push(i);
        }

        let mut columns: Vec<(String, Vec<Value>)> = self
            .id_vars
            .iter()
            .map(|c| {
                let values: Vec<Value> = groups
                    .values()
                    .map(|members| store.cell(members[0], c).cloned().unwrap_or_default())
                    .collect();
                (c.clone(), values)
            })
            .collect();
        for (name, agg) in &self.aggregations {
            let Some(source) = store.column(name) else {
                continue;
            };
            let values: Vec<Value> = groups
                .values()
                .map(|members| {
                    let cells: Vec<&Value> = members.iter().map(|&i| &source[i]).collect();
                    agg.reduce(&cells)
                })
                .collect();
            columns.push((name.clone(), values));
        }

        let nrows = groups.len();
        store.rebuild(columns, nrows);
        Ok(())
    }
}
