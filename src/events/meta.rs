//! Metadata events and wholesale replacement

use serde::{Deserialize, Serialize};

use super::Execute;
use crate::error::StoreResult;
use crate::store::ColumnStore;
use crate::types::{Row, Value, ValueMap};

/// Merge `updates` into the store metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetaUpdate {
    pub updates: ValueMap,
}

impl Execute for MetaUpdate {
    fn execute(&self, store: &mut ColumnStore) -> StoreResult<()> {
        store
            .meta
            .extend(self.updates.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetaSet {
    pub key: String,
    pub value: Value,
}

impl Execute for MetaSet {
    fn execute(&self, store: &mut ColumnStore) -> StoreResult<()> {
        store.meta.insert(self.key.clone(), self.value.clone());
        Ok(())
    }
}

/// Replace every row with an externally computed result set.
///
/// All columns and row ids are discarded and rebuilt from `rows` with fresh
/// ids; metadata is kept. `operation` and `params` describe the external
/// transformation for the audit trail only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VibesSnapshot {
    pub rows: Vec<Row>,
    #[serde(default)]
    pub operation: String,
    #[serde(default)]
    pub params: ValueMap,
}

impl Execute for VibesSnapshot {
    fn execute(&self, store: &mut ColumnStore) -> StoreResult<()> {
        store.load_rows(&self.rows);
        Ok(())
    }
}
