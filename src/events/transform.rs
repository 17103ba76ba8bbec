//! Per-cell value transforms and type coercion

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::{target_columns, Execute};
use crate::error::StoreResult;
use crate::expr::{binary, float_to_int, round_int, round_to, BinaryOp, Expr};
use crate::store::ColumnStore;
use crate::types::{Value, ValueMap};

/// A parsed `TransformColumn` operation
#[derive(Debug, Clone)]
enum CellOp {
    Upper,
    Lower,
    Title,
    Strip,
    LStrip,
    RStrip,
    Replace { old: String, new: String },
    Slice { start: Option<i64>, end: Option<i64> },
    Len,
    Abs,
    Round(Option<i32>),
    Floor,
    Ceil,
    Sqrt,
    Log,
    Exp,
    Arith(BinaryOp, Value),
    ToInt,
    ToFloat,
    ToStr,
    ToBool,
    Expr(Expr),
}

impl CellOp {
    /// Build the operation from its name and parameters.
    ///
    /// `Ok(None)` means the operation is unknown or lacks a required
    /// parameter. Only an unparseable `expr` is an error.
    fn parse(name: &str, params: &ValueMap) -> StoreResult<Option<CellOp>> {
        let text = |key: &str| params.get(key).and_then(Value::as_str).map(str::to_string);
        let int = |key: &str| params.get(key).and_then(Value::coerce_int);

        let op = match name {
            "upper" => CellOp::Upper,
            "lower" => CellOp::Lower,
            "title" => CellOp::Title,
            "strip" => CellOp::Strip,
            "lstrip" => CellOp::LStrip,
            "rstrip" => CellOp::RStrip,
            "replace" => match (text("old"), text("new")) {
                (Some(old), Some(new)) => CellOp::Replace { old, new },
                _ => return Ok(None),
            },
            "slice" => CellOp::Slice {
                start: int("start"),
                end: int("end"),
            },
            "len" => CellOp::Len,
            "abs" => CellOp::Abs,
            "round" => CellOp::Round(int("digits").map(|d| d.clamp(-300, 300) as i32)),
            "floor" => CellOp::Floor,
            "ceil" => CellOp::Ceil,
            "sqrt" => CellOp::Sqrt,
            "log" => CellOp::Log,
            "exp" => CellOp::Exp,
            "add" | "sub" | "mul" | "div" | "pow" | "mod" => {
                let Some(operand) = params.get("value").filter(|v| v.is_number()) else {
                    return Ok(None);
                };
                let op = match name {
                    "add" => BinaryOp::Add,
                    "sub" => BinaryOp::Subtract,
                    "mul" => BinaryOp::Multiply,
                    "div" => BinaryOp::Divide,
                    "pow" => BinaryOp::Power,
                    _ => BinaryOp::Modulo,
                };
                CellOp::Arith(op, operand.clone())
            }
            "to_int" => CellOp::ToInt,
            "to_float" => CellOp::ToFloat,
            "to_str" => CellOp::ToStr,
            "to_bool" => CellOp::ToBool,
            "expr" => match text("expression").or_else(|| text("expr")) {
                Some(source) => CellOp::Expr(Expr::parse(&source)?),
                None => return Ok(None),
            },
            _ => return Ok(None),
        };
        Ok(Some(op))
    }

    /// Transformed cell, or `None` to leave it unchanged
    fn apply(&self, value: &Value) -> Option<Value> {
        match self {
            CellOp::Upper => map_str(value, str::to_uppercase),
            CellOp::Lower => map_str(value, str::to_lowercase),
            CellOp::Title => map_str(value, title_case),
            CellOp::Strip => map_str(value, |s| s.trim().to_string()),
            CellOp::LStrip => map_str(value, |s| s.trim_start().to_string()),
            CellOp::RStrip => map_str(value, |s| s.trim_end().to_string()),
            CellOp::Replace { old, new } => map_str(value, |s| s.replace(old.as_str(), new)),
            CellOp::Slice { start, end } => map_str(value, |s| slice_chars(s, *start, *end)),
            CellOp::Len => match value {
                Value::Str(s) => Some(Value::from(s.chars().count())),
                Value::List(items) => Some(Value::from(items.len())),
                Value::Map(map) => Some(Value::from(map.len())),
                _ => None,
            },
            CellOp::Abs => match value {
                Value::Int(i) => i.checked_abs().map(Value::Int),
                Value::Float(f) => Some(Value::Float(f.abs())),
                _ => None,
            },
            CellOp::Round(digits) => match (value, digits) {
                (Value::Int(_), None) => Some(value.clone()),
                (Value::Int(i), Some(d)) => round_int(*i, *d).map(Value::Int),
                (Value::Float(f), None) => Some(float_to_int(f.round_ties_even())),
                (Value::Float(f), Some(d)) => Some(Value::Float(round_to(*f, *d))),
                _ => None,
            },
            CellOp::Floor => match value {
                Value::Int(_) => Some(value.clone()),
                Value::Float(f) => Some(float_to_int(f.floor())),
                _ => None,
            },
            CellOp::Ceil => match value {
                Value::Int(_) => Some(value.clone()),
                Value::Float(f) => Some(float_to_int(f.ceil())),
                _ => None,
            },
            CellOp::Sqrt => value
                .as_number()
                .filter(|x| *x >= 0.0)
                .map(|x| Value::Float(x.sqrt())),
            CellOp::Log => value
                .as_number()
                .filter(|x| *x > 0.0)
                .map(|x| Value::Float(x.ln())),
            CellOp::Exp => value.as_number().map(|x| Value::Float(x.exp())),
            CellOp::Arith(op, operand) => {
                if !value.is_number() {
                    return None;
                }
                binary(*op, value.clone(), operand.clone()).ok()
            }
            CellOp::ToInt => value.coerce_int().map(Value::Int),
            CellOp::ToFloat => value.coerce_float().map(Value::Float),
            CellOp::ToStr => match value {
                Value::Null => None,
                other => Some(Value::Str(other.to_key_string())),
            },
            CellOp::ToBool => value.coerce_bool().map(Value::Bool),
            CellOp::Expr(expr) => expr
                .evaluate(&|name: &str| matches!(name, "x" | "value").then(|| value.clone()))
                .ok(),
        }
    }
}

fn map_str<F: Fn(&str) -> String>(value: &Value, f: F) -> Option<Value> {
    value.as_str().map(|s| Value::Str(f(s)))
}

/// Capitalize the first letter of every alphabetic run
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_word = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if in_word {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(c);
            in_word = false;
        }
    }
    out
}

/// Character slice with negative indices counting from the end
fn slice_chars(s: &str, start: Option<i64>, end: Option<i64>) -> String {
    let chars: Vec<char> = s.chars().collect();
    let len = chars.len() as i64;
    let clamp = |i: i64| -> usize {
        let i = if i < 0 { i + len } else { i };
        i.clamp(0, len) as usize
    };
    let from = start.map(clamp).unwrap_or(0);
    let to = end.map(clamp).unwrap_or(chars.len());
    if from >= to {
        String::new()
    } else {
        chars[from..to].iter().collect()
    }
}

/// Apply a named operation to every cell of a column.
///
/// Cells the operation cannot handle are left as they are. An unknown
/// operation leaves the store unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransformColumn {
    pub column: String,
    pub operation: String,
    #[serde(default)]
    pub params: ValueMap,
    /// Write into this column instead of overwriting the source
    #[serde(default)]
    pub new_column: Option<String>,
}

impl Execute for TransformColumn {
    fn execute(&self, store: &mut ColumnStore) -> StoreResult<()> {
        let Some(op) = CellOp::parse(&self.operation, &self.params)? else {
            return Ok(());
        };
        let Some(source) = store.column(&self.column) else {
            return Ok(());
        };
        let transformed = source
            .iter()
            .map(|v| op.apply(v).unwrap_or_else(|| v.clone()))
            .collect();
        let target = self.new_column.as_deref().unwrap_or(&self.column);
        store.set_column(target, transformed);
        Ok(())
    }
}

/// Compute a column from an expression over each row.
///
/// Names refer to columns. A row whose evaluation fails gets `Null`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeriveColumn {
    pub name: String,
    pub expression: String,
}

impl Execute for DeriveColumn {
    fn execute(&self, store: &mut ColumnStore) -> StoreResult<()> {
        let expr = Expr::parse(&self.expression)?;
        let derived = (0..store.nrows())
            .map(|i| {
                let lookup = |name: &str| store.cell(i, name).cloned();
                expr.evaluate(&lookup).unwrap_or_default()
            })
            .collect();
        store.set_column(&self.name, derived);
        Ok(())
    }
}

/// Best-effort cast of columns to `int`, `float`, `str` or `bool`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CastTypes {
    pub types: IndexMap<String, String>,
}

impl Execute for CastTypes {
    fn execute(&self, store: &mut ColumnStore) -> StoreResult<()> {
        for (name, target) in &self.types {
            let op = match target.to_ascii_lowercase().as_str() {
                "int" | "integer" => CellOp::ToInt,
                "float" | "double" => CellOp::ToFloat,
                "str" | "string" => CellOp::ToStr,
                "bool" | "boolean" => CellOp::ToBool,
                _ => continue,
            };
            if let Some(values) = store.column_mut(name) {
                for value in values.iter_mut() {
                    if let Some(cast) = op.apply(value) {
                        *value = cast;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Turn numeric-looking strings into numbers (`"1,234"` becomes `1234`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NumberifyColumns {
    #[serde(default)]
    pub columns: Option<Vec<String>>,
}

impl Execute for NumberifyColumns {
    fn execute(&self, store: &mut ColumnStore) -> StoreResult<()> {
        for name in target_columns(store, self.columns.as_deref()) {
            if let Some(values) = store.column_mut(&name) {
                for value in values.iter_mut() {
                    if let Some(number) = value.as_str().and_then(Value::parse_number) {
                        *value = number;
                    }
                }
            }
        }
        Ok(())
    }
}
