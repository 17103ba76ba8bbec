//! Named branches of a column store
//!
//! A branch is an independent [`ColumnStore`]. Forking deep-copies the
//! source, so the two branches can diverge under different events without
//! affecting each other. The registry can be shared between threads; readers
//! get snapshots and never hold the lock while working.

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::events::Event;
use crate::store::ColumnStore;

/// Name of the branch created by [`BranchRegistry::with_main`]
pub const MAIN_BRANCH: &str = "main";

/// Thread-safe registry of named branches
#[derive(Debug, Default)]
pub struct BranchRegistry {
    branches: RwLock<IndexMap<String, ColumnStore>>,
}

impl BranchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `store` as the `main` branch
    pub fn with_main(store: ColumnStore) -> Self {
        let registry = Self::new();
        registry.branches.write().insert(MAIN_BRANCH.to_string(), store);
        registry
    }

    /// Register `store` under a new name
    pub fn create(&self, name: &str, store: ColumnStore) -> StoreResult<()> {
        let mut branches = self.branches.write();
        if branches.contains_key(name) {
            return Err(StoreError::BranchExists(name.to_string()));
        }
        branches.insert(name.to_string(), store);
        Ok(())
    }

    /// Create branch `to` as a deep copy of branch `from`
    pub fn fork(&self, from: &str, to: &str) -> StoreResult<()> {
        let mut branches = self.branches.write();
        if branches.contains_key(to) {
            return Err(StoreError::BranchExists(to.to_string()));
        }
        let copy = branches
            .get(from)
            .ok_or_else(|| StoreError::BranchNotFound(from.to_string()))?
            .snapshot();
        branches.insert(to.to_string(), copy);
        Ok(())
    }

    /// Deep copy of a branch as it is now
    pub fn get(&self, name: &str) -> Option<ColumnStore> {
        self.branches.read().get(name).map(ColumnStore::snapshot)
    }

    /// Run `f` on a branch under the read lock
    pub fn with_branch<R>(&self, name: &str, f: impl FnOnce(&ColumnStore) -> R) -> StoreResult<R> {
        let branches = self.branches.read();
        let store = branches
            .get(name)
            .ok_or_else(|| StoreError::BranchNotFound(name.to_string()))?;
        Ok(f(store))
    }

    /// Run `f` on a branch under the write lock
    pub fn with_branch_mut<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut ColumnStore) -> R,
    ) -> StoreResult<R> {
        let mut branches = self.branches.write();
        let store = branches
            .get_mut(name)
            .ok_or_else(|| StoreError::BranchNotFound(name.to_string()))?;
        Ok(f(store))
    }

    /// Apply events to one branch
    pub fn apply<'a, I>(&self, name: &str, events: I) -> StoreResult<()>
    where
        I: IntoIterator<Item = &'a Event>,
    {
        self.with_branch_mut(name, |store| store.apply(events))?
    }

    pub fn remove(&self, name: &str) -> Option<ColumnStore> {
        self.branches.write().shift_remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.branches.read().contains_key(name)
    }

    /// Branch names in creation order
    pub fn names(&self) -> Vec<String> {
        self.branches.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.branches.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.read().is_empty()
    }
}
