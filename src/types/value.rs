//! Cell values
//!
//! A cell holds one of a small closed set of shapes. JSON is the wire form,
//! so `Value` (de)serializes untagged: `null`, `true`, `1`, `1.5`, `"s"`,
//! `[..]`, `{..}`. JSON has no NaN or infinities, so those floats travel as
//! the one-entry map `{"$float": "nan" | "inf" | "-inf"}`.

use std::cmp::Ordering;
use std::fmt;

use indexmap::IndexMap;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// Map key tagging a non-finite float on the wire
pub const FLOAT_TAG: &str = "$float";

/// Ordered string-keyed map of values (map cells, store metadata)
pub type ValueMap = IndexMap<String, Value>;

/// One row as seen by callers: column name to value, in column order
pub type Row = IndexMap<String, Value>;

/// A single cell value
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "WireValue")]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(ValueMap),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// `Null`, NaN, or one of the strings `nan` / `none` / `null` (any case)
    pub fn is_missing(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Float(f) => f.is_nan(),
            Value::Str(s) => {
                let s = s.trim();
                s.eq_ignore_ascii_case("nan")
                    || s.eq_ignore_ascii_case("none")
                    || s.eq_ignore_ascii_case("null")
            }
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&ValueMap> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Numeric view of `Int` and `Float` cells (bools and strings are not numbers)
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    /// Truthiness used by filters and boolean operators
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0 && !f.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(map) => !map.is_empty(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Canonical string form.
    ///
    /// Used wherever values are matched or grouped by text: replacements,
    /// grouping keys, pivot headers, uniquifying and joins. Floats always keep
    /// a fractional part (`3.0`), bools are `True` / `False`, null is `None`,
    /// containers are compact JSON.
    pub fn to_key_string(&self) -> String {
        match self {
            Value::Null => "None".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Str(s) => s.clone(),
            Value::List(_) | Value::Map(_) => {
                serde_json::to_string(self).unwrap_or_else(|_| String::new())
            }
        }
    }

    /// Hashable key for grouping and de-duplication.
    ///
    /// Keys agree with [`Value::structurally_eq`]: `1` and `1.0` are one key,
    /// while `1` and `"1"`, or null and `"None"`, stay apart.
    pub fn group_key(&self) -> GroupKey {
        match self {
            Value::Null => GroupKey::Null,
            Value::Bool(b) => GroupKey::Bool(*b),
            Value::Int(i) => GroupKey::Int(*i),
            Value::Float(f) => float_key(*f),
            Value::Str(s) => GroupKey::Str(s.clone()),
            Value::List(items) => GroupKey::List(items.iter().map(Value::group_key).collect()),
            Value::Map(map) => {
                let mut entries: Vec<(String, GroupKey)> =
                    map.iter().map(|(k, v)| (k.clone(), v.group_key())).collect();
                entries.sort_by(|a, b| a.0.cmp(&b.0));
                GroupKey::Map(entries)
            }
        }
    }

    /// Structural equality: ints and floats compare numerically, NaN equals
    /// NaN, and maps compare by key regardless of insertion order.
    pub fn structurally_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.structurally_eq(y))
            }
            (Value::Map(a), Value::Map(b)) => maps_structurally_eq(a, b),
            _ => false,
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 5,
            Value::Bool(_) => 0,
            Value::Int(_) | Value::Float(_) => 1,
            Value::Str(_) => 2,
            Value::List(_) => 3,
            Value::Map(_) => 4,
        }
    }

    /// Total order used for sorting and min/max over mixed cells.
    ///
    /// Bools < numbers < strings < lists < maps < null. NaN sorts with null.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        let (a_missing, b_missing) = (self.sorts_last(), other.sorts_last());
        match (a_missing, b_missing) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Greater,
            (false, true) => return Ordering::Less,
            _ => {}
        }

        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (a, b) if a.is_number() && b.is_number() => {
                let (x, y) = (a.as_number().unwrap_or(0.0), b.as_number().unwrap_or(0.0));
                x.total_cmp(&y)
            }
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => {
                for (x, y) in a.iter().zip(b) {
                    let ord = x.sort_cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Value::Map(_), Value::Map(_)) => self.to_key_string().cmp(&other.to_key_string()),
            (a, b) => a.type_rank().cmp(&b.type_rank()),
        }
    }

    /// `Null` and NaN sort after everything else regardless of direction
    pub(crate) fn sorts_last(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Float(f) => f.is_nan(),
            _ => false,
        }
    }

    /// Best-effort integer coercion
    pub fn coerce_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.is_finite() => Some(f.trunc() as i64),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Str(s) => {
                let s = s.trim();
                s.parse::<i64>().ok().or_else(|| {
                    s.parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite())
                        .map(|f| f.trunc() as i64)
                })
            }
            _ => None,
        }
    }

    /// Best-effort float coercion
    pub fn coerce_float(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Str(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Best-effort boolean coercion
    pub fn coerce_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            Value::Float(f) if !f.is_nan() => Some(*f != 0.0),
            Value::Str(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "yes" | "y" | "1" => Some(true),
                "false" | "f" | "no" | "n" | "0" | "" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Parse numeric-looking text into `Int` or `Float`.
    ///
    /// Thousands separators (`,` and `_`) are dropped. Returns `None` for
    /// anything that is not a plain number.
    pub fn parse_number(text: &str) -> Option<Value> {
        let cleaned: String = text
            .trim()
            .chars()
            .filter(|c| *c != ',' && *c != '_')
            .collect();
        if cleaned.is_empty() {
            return None;
        }
        if let Ok(i) = cleaned.parse::<i64>() {
            return Some(Value::Int(i));
        }
        match cleaned.parse::<f64>() {
            // Rust accepts "inf"/"nan" spellings; those stay text.
            Ok(f) if f.is_finite() => Some(Value::Float(f)),
            _ => None,
        }
    }
}

/// Typed, hashable image of a [`Value`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupKey {
    Null,
    Bool(bool),
    Int(i64),
    /// Bit pattern of a float with no exact `i64` equivalent
    Float(u64),
    Str(String),
    List(Vec<GroupKey>),
    /// Entries sorted by key
    Map(Vec<(String, GroupKey)>),
}

fn float_key(f: f64) -> GroupKey {
    const LIMIT: f64 = 9_223_372_036_854_775_808.0; // 2^63
    if f.is_nan() {
        GroupKey::Float(f64::NAN.to_bits())
    } else if f.fract() == 0.0 && (-LIMIT..LIMIT).contains(&f) {
        GroupKey::Int(f as i64)
    } else {
        GroupKey::Float(f.to_bits())
    }
}

/// Untagged JSON shapes, before non-finite floats are recovered
#[derive(Deserialize)]
#[serde(untagged)]
enum WireValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(ValueMap),
}

impl From<WireValue> for Value {
    fn from(wire: WireValue) -> Self {
        match wire {
            WireValue::Null => Value::Null,
            WireValue::Bool(b) => Value::Bool(b),
            WireValue::Int(i) => Value::Int(i),
            WireValue::Float(f) => Value::Float(f),
            WireValue::Str(s) => Value::Str(s),
            WireValue::List(items) => Value::List(items),
            WireValue::Map(map) => match tagged_float(&map) {
                Some(f) => Value::Float(f),
                None => Value::Map(map),
            },
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) if f.is_finite() => serializer.serialize_f64(*f),
            Value::Float(f) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(FLOAT_TAG, &format_float(*f))?;
                map.end()
            }
            Value::Str(s) => serializer.serialize_str(s),
            Value::List(items) => serializer.collect_seq(items),
            Value::Map(map) => serializer.collect_map(map),
        }
    }
}

/// The float carried by `{"$float": ..}`, if `map` is exactly that
fn tagged_float(map: &ValueMap) -> Option<f64> {
    if map.len() != 1 {
        return None;
    }
    match map.get(FLOAT_TAG)?.as_str()? {
        "nan" => Some(f64::NAN),
        "inf" => Some(f64::INFINITY),
        "-inf" => Some(f64::NEG_INFINITY),
        _ => None,
    }
}

fn maps_structurally_eq(a: &ValueMap, b: &ValueMap) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .all(|(k, v)| b.get(k).is_some_and(|other| v.structurally_eq(other)))
}

fn format_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        let text = if f > 0.0 { "inf" } else { "-inf" };
        text.to_string()
    } else {
        // Debug keeps the shortest round-trip digits and a trailing `.0`.
        format!("{:?}", f)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.structurally_eq(other)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_key_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        i64::try_from(i).map(Value::Int).unwrap_or(Value::Float(i as f64))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<ValueMap> for Value {
    fn from(map: ValueMap) -> Self {
        Value::Map(map)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                let map: ValueMap = map.into_iter().map(|(k, v)| (k, Value::from(v))).collect();
                match tagged_float(&map) {
                    Some(f) => Value::Float(f),
                    None => Value::Map(map),
                }
            }
        }
    }
}

/// Build a [`Row`] from `key => value` pairs.
///
/// ```
/// use colstore::{row, Value};
///
/// let r = row! { "a" => 1, "b" => "two" };
/// assert_eq!(r["b"], Value::from("two"));
/// ```
#[macro_export]
macro_rules! row {
    () => {
        $crate::Row::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut row = $crate::Row::new();
        $( row.insert(::std::string::String::from($key), $crate::Value::from($value)); )+
        row
    }};
}
