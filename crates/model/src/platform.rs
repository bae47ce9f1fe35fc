use std::{
    collections::HashMap,
    sync::Arc,
};

use errors::ErrorMetadata;
use parking_lot::RwLock;

/// An in-process key/value store backing a `kv` resource. Created lazily on
/// first binding; lives for the process lifetime only. Per-key operations
/// are linearizable; no ordering is asserted across keys.
pub struct KvStore {
    map: RwLock<HashMap<String, String>>,
}

impl KvStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            map: RwLock::new(HashMap::new()),
        })
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.map.read().get(key).cloned()
    }

    pub fn put(&self, key: impl Into<String>, value: impl Into<String>) {
        self.map.write().insert(key.into(), value.into());
    }

    pub fn delete(&self, key: &str) -> bool {
        self.map.write().remove(key).is_some()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.map.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

/// KV surface of a platform handle, backed by the stores the function owns.
/// When more than one KV resource is bound, operations address the first
/// owned store by resource id order.
#[derive(Clone)]
pub struct KvApi {
    stores: Vec<(String, Arc<KvStore>)>,
}

impl KvApi {
    pub(crate) fn new(mut stores: Vec<(String, Arc<KvStore>)>) -> Option<Self> {
        if stores.is_empty() {
            return None;
        }
        stores.sort_by(|(a, _), (b, _)| a.cmp(b));
        Some(Self { stores })
    }

    fn default_store(&self) -> &KvStore {
        &self.stores[0].1
    }

    pub fn resource_ids(&self) -> Vec<&str> {
        self.stores.iter().map(|(id, _)| id.as_str()).collect()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.default_store().get(key)
    }

    pub fn put(&self, key: impl Into<String>, value: impl Into<String>) {
        self.default_store().put(key, value);
    }

    pub fn delete(&self, key: &str) -> bool {
        self.default_store().delete(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.default_store().keys()
    }
}

/// Placeholder SQL surface; every call rejects until a real backend lands.
#[derive(Clone, Default)]
pub struct SqlApi;

impl SqlApi {
    pub fn query(&self, _statement: &str) -> anyhow::Result<()> {
        Err(ErrorMetadata::execution_failed(
            "NotImplemented",
            "sql resources are not implemented",
        )
        .into())
    }
}

/// The bundle of per-function runtime resource bindings injected into an
/// invocation.
#[derive(Clone)]
pub struct Platform {
    pub kv: Option<KvApi>,
    pub sql: SqlApi,
}

impl Platform {
    pub fn empty() -> Self {
        Self {
            kv: None,
            sql: SqlApi,
        }
    }
}
