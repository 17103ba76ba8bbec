//! Arrow and Parquet interop.
//!
//! The columnar boundary is keyed by column *name*; ids stay internal. Each
//! column maps onto the narrowest Arrow type that holds it losslessly:
//!
//! | cells (ignoring nulls) | Arrow type |
//! |---|---|
//! | all bool | `Boolean` |
//! | all int | `Int64` |
//! | all float | `Float64` |
//! | all string | `Utf8` |
//! | anything else | `Utf8` holding JSON, field metadata `colstore:encoding = json` |
//!
//! Store metadata rides along as JSON in the schema metadata.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow_array::{
    Array, ArrayRef, BooleanArray, Float32Array, Float64Array, Int16Array, Int32Array,
    Int64Array, Int8Array, LargeStringArray, RecordBatch, RecordBatchOptions, StringArray,
    UInt16Array, UInt32Array, UInt64Array, UInt8Array,
};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::file::reader::ChunkReader;

use super::{ColumnStore, DEFAULT_PARQUET_PATH};
use crate::error::StoreResult;
use crate::types::{Value, ValueMap};

/// Field metadata key marking a JSON-encoded column
pub const JSON_ENCODING: &str = "colstore:encoding";

/// Schema metadata key carrying the store's `meta` map
pub const META_KEY: &str = "colstore:meta";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Boolean,
    Int,
    Float,
    Utf8,
    Json,
}

fn infer_kind(values: &[Value]) -> ColumnKind {
    let mut kind: Option<ColumnKind> = None;
    for value in values {
        let this = match value {
            Value::Null => continue,
            Value::Bool(_) => ColumnKind::Boolean,
            Value::Int(_) => ColumnKind::Int,
            Value::Float(_) => ColumnKind::Float,
            Value::Str(_) => ColumnKind::Utf8,
            Value::List(_) | Value::Map(_) => return ColumnKind::Json,
        };
        match kind {
            None => kind = Some(this),
            Some(k) if k == this => {}
            Some(_) => return ColumnKind::Json,
        }
    }
    kind.unwrap_or(ColumnKind::Utf8)
}

fn encode_column(values: &[Value]) -> StoreResult<(DataType, bool, ArrayRef)> {
    let kind = infer_kind(values);
    let array: ArrayRef = match kind {
        ColumnKind::Boolean => Arc::new(BooleanArray::from(
            values
                .iter()
                .map(|v| match v {
                    Value::Bool(b) => Some(*b),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        ColumnKind::Int => Arc::new(Int64Array::from(
            values
                .iter()
                .map(|v| match v {
                    Value::Int(i) => Some(*i),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        ColumnKind::Float => Arc::new(Float64Array::from(
            values
                .iter()
                .map(|v| match v {
                    Value::Float(f) => Some(*f),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        ColumnKind::Utf8 => Arc::new(StringArray::from(
            values
                .iter()
                .map(|v| match v {
                    Value::Str(s) => Some(s.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        ColumnKind::Json => {
            let encoded = values
                .iter()
                .map(|v| match v {
                    Value::Null => Ok(None),
                    other => serde_json::to_string(other).map(Some),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Arc::new(StringArray::from(encoded))
        }
    };
    let data_type = match kind {
        ColumnKind::Boolean => DataType::Boolean,
        ColumnKind::Int => DataType::Int64,
        ColumnKind::Float => DataType::Float64,
        ColumnKind::Utf8 | ColumnKind::Json => DataType::Utf8,
    };
    Ok((data_type, kind == ColumnKind::Json, array))
}

macro_rules! read_primitive {
    ($array:expr, $ty:ty, $wrap:expr) => {
        match $array.as_any().downcast_ref::<$ty>() {
            Some(arr) => (0..arr.len())
                .map(|i| {
                    if arr.is_null(i) {
                        Value::Null
                    } else {
                        $wrap(arr.value(i))
                    }
                })
                .collect(),
            None => vec![Value::Null; $array.len()],
        }
    };
}

fn decode_column(array: &dyn Array, json: bool) -> StoreResult<Vec<Value>> {
    let values: Vec<Value> = match array.data_type() {
        DataType::Boolean => read_primitive!(array, BooleanArray, Value::Bool),
        DataType::Int8 => read_primitive!(array, Int8Array, |v: i8| Value::Int(i64::from(v))),
        DataType::Int16 => read_primitive!(array, Int16Array, |v: i16| Value::Int(i64::from(v))),
        DataType::Int32 => read_primitive!(array, Int32Array, |v: i32| Value::Int(i64::from(v))),
        DataType::Int64 => read_primitive!(array, Int64Array, Value::Int),
        DataType::UInt8 => read_primitive!(array, UInt8Array, |v: u8| Value::Int(i64::from(v))),
        DataType::UInt16 => {
            read_primitive!(array, UInt16Array, |v: u16| Value::Int(i64::from(v)))
        }
        DataType::UInt32 => {
            read_primitive!(array, UInt32Array, |v: u32| Value::Int(i64::from(v)))
        }
        DataType::UInt64 => read_primitive!(array, UInt64Array, |v: u64| {
            i64::try_from(v)
                .map(Value::Int)
                .unwrap_or(Value::Float(v as f64))
        }),
        DataType::Float32 => {
            read_primitive!(array, Float32Array, |v: f32| Value::Float(f64::from(v)))
        }
        DataType::Float64 => read_primitive!(array, Float64Array, Value::Float),
        DataType::Utf8 => {
            read_primitive!(array, StringArray, |v: &str| Value::Str(v.to_string()))
        }
        DataType::LargeUtf8 => {
            read_primitive!(array, LargeStringArray, |v: &str| Value::Str(v.to_string()))
        }
        _ => vec![Value::Null; array.len()],
    };

    if !json {
        return Ok(values);
    }
    values
        .into_iter()
        .map(|v| match v {
            Value::Str(text) => Ok(serde_json::from_str::<Value>(&text)?),
            other => Ok(other),
        })
        .collect()
}

impl ColumnStore {
    /// Export as an Arrow record batch keyed by column name
    pub fn to_arrow(&self) -> StoreResult<RecordBatch> {
        let mut fields = Vec::with_capacity(self.col_names.len());
        let mut arrays = Vec::with_capacity(self.col_names.len());
        for (name, id) in &self.col_names {
            let (data_type, json, array) = encode_column(&self.cols[id])?;
            let mut field = Field::new(name, data_type, true);
            if json {
                field = field.with_metadata(HashMap::from([(
                    JSON_ENCODING.to_string(),
                    "json".to_string(),
                )]));
            }
            fields.push(field);
            arrays.push(array);
        }

        let mut schema_meta = HashMap::new();
        if !self.meta.is_empty() {
            schema_meta.insert(META_KEY.to_string(), serde_json::to_string(&self.meta)?);
        }
        let schema = Arc::new(Schema::new_with_metadata(fields, schema_meta));
        let options = RecordBatchOptions::new().with_row_count(Some(self.nrows));
        Ok(RecordBatch::try_new_with_options(schema, arrays, &options)?)
    }

    /// Build a store from an Arrow record batch. Ids are minted fresh.
    pub fn from_arrow(batch: &RecordBatch) -> StoreResult<Self> {
        Self::from_arrow_batches(&batch.schema(), std::slice::from_ref(batch))
    }

    fn from_arrow_batches(schema: &SchemaRef, batches: &[RecordBatch]) -> StoreResult<Self> {
        let mut store = ColumnStore::new();
        let mut columns: Vec<(String, Vec<Value>)> = schema
            .fields()
            .iter()
            .map(|f| (f.name().clone(), Vec::new()))
            .collect();
        let mut nrows = 0;
        for batch in batches {
            for (i, field) in schema.fields().iter().enumerate() {
                let json = field
                    .metadata()
                    .get(JSON_ENCODING)
                    .is_some_and(|enc| enc == "json");
                let values = decode_column(batch.column(i).as_ref(), json)?;
                columns[i].1.extend(values);
            }
            nrows += batch.num_rows();
        }

        store.rebuild(columns, nrows);
        if let Some(meta_json) = schema.metadata().get(META_KEY) {
            store.meta = serde_json::from_str::<ValueMap>(meta_json)?;
        }
        Ok(store)
    }

    /// Write the store to a Parquet file
    pub fn to_parquet<P: AsRef<Path>>(&self, path: P) -> StoreResult<()> {
        let file = File::create(path.as_ref())?;
        self.write_parquet(file)
    }

    /// Write the store to `store.parquet` in the working directory
    pub fn to_parquet_default(&self) -> StoreResult<()> {
        self.to_parquet(DEFAULT_PARQUET_PATH)
    }

    /// Encode the store as in-memory Parquet bytes
    pub fn to_parquet_bytes(&self) -> StoreResult<Vec<u8>> {
        let mut out = Vec::new();
        self.write_parquet(&mut out)?;
        Ok(out)
    }

    fn write_parquet<W: std::io::Write + Send>(&self, sink: W) -> StoreResult<()> {
        let batch = self.to_arrow()?;
        let mut writer = ArrowWriter::try_new(sink, batch.schema(), None)?;
        writer.write(&batch)?;
        writer.close()?;
        Ok(())
    }

    /// Read a store from a Parquet file
    pub fn from_parquet<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let file = File::open(path.as_ref())?;
        Self::read_parquet(file)
    }

    /// Read `store.parquet` from the working directory
    pub fn from_parquet_default() -> StoreResult<Self> {
        Self::from_parquet(DEFAULT_PARQUET_PATH)
    }

    /// Decode a store from in-memory Parquet bytes
    pub fn from_parquet_bytes(bytes: &[u8]) -> StoreResult<Self> {
        Self::read_parquet(Bytes::copy_from_slice(bytes))
    }

    fn read_parquet<R: ChunkReader + 'static>(source: R) -> StoreResult<Self> {
        let builder = ParquetRecordBatchReaderBuilder::try_new(source)?;
        let schema = builder.schema().clone();
        let batches = builder.build()?.collect::<Result<Vec<_>, _>>()?;
        Self::from_arrow_batches(&schema, &batches)
    }
}
