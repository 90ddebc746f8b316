// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Hierarchical key-path storage.
//!
//! Every database in this crate persists its state as a rooted JSON document
//! and addresses sub-values by an ordered key path. Concrete drivers only
//! have to move whole documents; all tree surgery lives here.

use serde_json::{Map, Value};

mod memory;

pub use memory::MemoryStore;

/// Ordered path into a stored JSON document.
pub type StorageIndex<'a> = &'a [&'a str];

/// Contract every storage driver satisfies.
///
/// A store owns one rooted JSON document. Intermediate values that are not
/// objects are never silently traversed: updating through them is an error
/// the caller logs and survives.
pub trait Store: Send {
    /// The sub-value at `index`, or `None` if any path segment is missing.
    fn get(&self, index: StorageIndex) -> Option<Value>;

    /// Replace the sub-value at `index` with `transform(current)`, creating
    /// intermediate objects as needed.
    fn update(
        &mut self,
        index: StorageIndex,
        transform: &dyn Fn(Option<&Value>) -> Value,
    ) -> anyhow::Result<()>;

    /// Remove the sub-value at `index`. Deleting the empty path erases the
    /// whole document. Deleting a missing path is a no-op.
    fn delete(&mut self, index: StorageIndex) -> anyhow::Result<()>;
}

pub(crate) fn get_from_tree(root: &Value, index: StorageIndex) -> Option<Value> {
    let mut current = root;
    for segment in index {
        current = current.as_object()?.get(*segment)?;
    }
    Some(current.clone())
}

pub(crate) fn update_tree(
    root: &mut Value,
    index: StorageIndex,
    transform: &dyn Fn(Option<&Value>) -> Value,
) -> anyhow::Result<()> {
    if index.is_empty() {
        let current = match root {
            Value::Null => None,
            ref other => Some(&*other),
        };
        *root = transform(current.map(|v| &**v));
        return Ok(());
    }

    if root.is_null() {
        *root = Value::Object(Map::new());
    }

    let parent = index[..index.len() - 1].iter().enumerate().try_fold(
        &mut *root,
        |current, (depth, segment)| {
            let map = current.as_object_mut().ok_or_else(|| {
                anyhow::anyhow!("cannot traverse non-object value at {:?}", &index[..depth])
            })?;
            Ok::<_, anyhow::Error>(
                map.entry(segment.to_string())
                    .or_insert_with(|| Value::Object(Map::new())),
            )
        },
    )?;

    let map = parent.as_object_mut().ok_or_else(|| {
        anyhow::anyhow!(
            "cannot traverse non-object value at {:?}",
            &index[..index.len() - 1]
        )
    })?;
    let leaf_key = index[index.len() - 1];
    let next = transform(map.get(leaf_key));
    map.insert(leaf_key.to_string(), next);
    Ok(())
}

pub(crate) fn delete_from_tree(root: &mut Value, index: StorageIndex) -> anyhow::Result<()> {
    if index.is_empty() {
        *root = Value::Null;
        return Ok(());
    }
    delete_at(root, index, 0)
}

fn delete_at(value: &mut Value, index: StorageIndex, depth: usize) -> anyhow::Result<()> {
    if value.is_null() {
        return Ok(());
    }
    let map = value.as_object_mut().ok_or_else(|| {
        anyhow::anyhow!("cannot traverse non-object value at {:?}", &index[..depth])
    })?;
    if depth == index.len() - 1 {
        map.remove(index[depth]);
        return Ok(());
    }
    match map.get_mut(index[depth]) {
        Some(child) => delete_at(child, index, depth + 1),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_missing_path() {
        let root = json!({"a": {"b": 1}});
        assert_eq!(get_from_tree(&root, &["a", "b"]), Some(json!(1)));
        assert_eq!(get_from_tree(&root, &["a", "c"]), None);
        assert_eq!(get_from_tree(&root, &["a", "b", "c"]), None);
    }

    #[test]
    fn test_update_creates_intermediate_objects() {
        let mut root = Value::Null;
        update_tree(&mut root, &["a", "b", "c"], &|_| json!(42)).unwrap();
        assert_eq!(root, json!({"a": {"b": {"c": 42}}}));
    }

    #[test]
    fn test_update_sees_current_value() {
        let mut root = json!({"counter": 1});
        update_tree(&mut root, &["counter"], &|v| {
            json!(v.and_then(Value::as_i64).unwrap_or(0) + 1)
        })
        .unwrap();
        assert_eq!(root, json!({"counter": 2}));
    }

    #[test]
    fn test_update_does_not_traverse_non_objects() {
        let mut root = json!({"a": 7});
        assert!(update_tree(&mut root, &["a", "b"], &|_| json!(1)).is_err());
        // The offending subtree is left alone.
        assert_eq!(root, json!({"a": 7}));
    }

    #[test]
    fn test_update_empty_path_replaces_root() {
        let mut root = json!({"old": true});
        update_tree(&mut root, &[], &|v| {
            assert!(v.is_some());
            json!({"new": true})
        })
        .unwrap();
        assert_eq!(root, json!({"new": true}));
    }

    #[test]
    fn test_delete() {
        let mut root = json!({"a": {"b": 1, "c": 2}});
        delete_from_tree(&mut root, &["a", "b"]).unwrap();
        assert_eq!(root, json!({"a": {"c": 2}}));

        // Missing paths are fine.
        delete_from_tree(&mut root, &["a", "zzz", "deep"]).unwrap();

        delete_from_tree(&mut root, &[]).unwrap();
        assert_eq!(root, Value::Null);
    }

    #[test]
    fn test_delete_through_non_object_is_an_error() {
        let mut root = json!({"a": 7});
        assert!(delete_from_tree(&mut root, &["a", "b", "c"]).is_err());
    }
}
