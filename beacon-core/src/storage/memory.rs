// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde_json::Value;

use super::{delete_from_tree, get_from_tree, update_tree, StorageIndex, Store};

/// Process-memory storage driver.
///
/// The reference implementation of [`Store`]: one JSON document per named
/// sub-store, nothing persisted across process restarts. Used by tests and
/// by hosts that opt out of persistence.
#[derive(Debug, Default)]
pub struct MemoryStore {
    root: Value,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self { root: Value::Null }
    }

    /// Seed the store with a pre-built document. Test helper.
    pub fn with_root(root: Value) -> Self {
        Self { root }
    }

    pub fn snapshot(&self) -> &Value {
        &self.root
    }
}

impl Store for MemoryStore {
    fn get(&self, index: StorageIndex) -> Option<Value> {
        if self.root.is_null() {
            return None;
        }
        if index.is_empty() {
            return Some(self.root.clone());
        }
        get_from_tree(&self.root, index)
    }

    fn update(
        &mut self,
        index: StorageIndex,
        transform: &dyn Fn(Option<&Value>) -> Value,
    ) -> anyhow::Result<()> {
        update_tree(&mut self.root, index, transform)
    }

    fn delete(&mut self, index: StorageIndex) -> anyhow::Result<()> {
        delete_from_tree(&mut self.root, index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_store_reads_as_undefined() {
        let store = MemoryStore::new();
        assert_eq!(store.get(&[]), None);
        assert_eq!(store.get(&["anything"]), None);
    }

    #[test]
    fn test_write_read_delete_cycle() {
        let mut store = MemoryStore::new();
        store
            .update(&["baseline", "boolean", "ui.first_open"], &|_| json!(true))
            .unwrap();
        assert_eq!(
            store.get(&["baseline", "boolean", "ui.first_open"]),
            Some(json!(true))
        );

        store.delete(&["baseline", "boolean"]).unwrap();
        assert_eq!(store.get(&["baseline", "boolean", "ui.first_open"]), None);
        assert_eq!(store.get(&["baseline"]), Some(json!({})));

        store.delete(&[]).unwrap();
        assert_eq!(store.get(&[]), None);
    }

    #[test]
    fn test_seeded_root() {
        let store = MemoryStore::with_root(json!({"k": {"v": 3}}));
        assert_eq!(store.get(&["k", "v"]), Some(json!(3)));
    }
}
