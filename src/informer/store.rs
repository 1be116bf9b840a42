//! In-memory snapshot of one cluster's resource collection
//!
//! Each per-cluster cache loop owns one [`ObjectStore`]. Readers get clones,
//! never references into the cache, so nothing outside the loop can mutate
//! the cached instances.

use std::collections::HashMap;
use std::sync::RwLock;

use kube::api::DynamicObject;

use crate::types::QualifiedName;

/// Key→object snapshot for one cluster
///
/// Keys are `namespace/name` for namespaced objects and bare `name` for
/// cluster-scoped ones (see [`ObjectStore::key_for`]).
#[derive(Default)]
pub struct ObjectStore {
    items: RwLock<HashMap<String, DynamicObject>>,
}

impl ObjectStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// The canonical cache key for an object
    pub fn key_for(obj: &DynamicObject) -> String {
        QualifiedName::from_obj(obj).to_string()
    }

    /// Insert or replace an object under its canonical key
    pub fn insert(&self, obj: DynamicObject) {
        let key = Self::key_for(&obj);
        self.items
            .write()
            .expect("object store lock poisoned")
            .insert(key, obj);
    }

    /// Remove the object stored under the given object's canonical key
    pub fn delete(&self, obj: &DynamicObject) {
        let key = Self::key_for(obj);
        self.items
            .write()
            .expect("object store lock poisoned")
            .remove(&key);
    }

    /// Replace the entire snapshot, as after a relist
    pub fn replace(&self, objs: Vec<DynamicObject>) {
        let mut items = self.items.write().expect("object store lock poisoned");
        items.clear();
        for obj in objs {
            let key = Self::key_for(&obj);
            items.insert(key, obj);
        }
    }

    /// Clone of the object stored under `key`, if any
    pub fn get_by_key(&self, key: &str) -> Option<DynamicObject> {
        self.items
            .read()
            .expect("object store lock poisoned")
            .get(key)
            .cloned()
    }

    /// Clones of every object in the snapshot; iteration order unspecified
    pub fn list(&self) -> Vec<DynamicObject> {
        self.items
            .read()
            .expect("object store lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Number of objects in the snapshot
    pub fn len(&self) -> usize {
        self.items.read().expect("object store lock poisoned").len()
    }

    /// Whether the snapshot is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
