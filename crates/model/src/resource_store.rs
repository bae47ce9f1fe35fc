use std::{
    collections::{
        BTreeMap,
        BTreeSet,
        HashMap,
        HashSet,
    },
    path::PathBuf,
    sync::Arc,
};

use anyhow::Context;
use errors::ErrorMetadata;
use parking_lot::RwLock;
use serde::Deserialize;

use crate::{
    platform::{
        KvApi,
        KvStore,
        Platform,
        SqlApi,
    },
    types::{
        ResourceRecord,
        ResourceType,
    },
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateResourceRequest {
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    pub owners: Option<BTreeSet<String>>,
    pub config: Option<BTreeMap<String, String>>,
}

/// Persists [`ResourceRecord`]s under `{root}/resources/` and maintains the
/// in-memory ownership index (function id -> owned resource ids) plus the
/// lazily-created runtime KV stores.
pub struct ResourceStore {
    base: PathBuf,
    // function id -> resource ids owned by it. Rebuilt by directory scan
    // when empty (process restart).
    index: RwLock<HashMap<String, HashSet<String>>>,
    kv_stores: RwLock<HashMap<String, Arc<KvStore>>>,
}

impl ResourceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            base: root.into().join("resources"),
            index: RwLock::new(HashMap::new()),
            kv_stores: RwLock::new(HashMap::new()),
        }
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.base.join(format!("{id}.json"))
    }

    fn persist(&self, record: &ResourceRecord) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(record)?;
        common::fs::write_atomically(&self.path_for(&record.id), json.as_bytes())
    }

    fn index_owners(&self, record: &ResourceRecord) {
        let mut index = self.index.write();
        for owner in &record.owners {
            index
                .entry(owner.clone())
                .or_default()
                .insert(record.id.clone());
        }
    }

    pub fn create(&self, req: CreateResourceRequest) -> anyhow::Result<ResourceRecord> {
        let record = ResourceRecord {
            id: uuid::Uuid::now_v7().to_string(),
            resource_type: req.resource_type,
            owners: req.owners.unwrap_or_default(),
            config: req.config.unwrap_or_default(),
        };
        self.persist(&record)?;
        self.index_owners(&record);
        if record.resource_type == ResourceType::Kv {
            self.kv_store(&record.id);
        }
        tracing::info!("created {:?} resource {}", record.resource_type, record.id);
        Ok(record)
    }

    pub fn load(&self, id: &str) -> anyhow::Result<Option<ResourceRecord>> {
        let path = self.path_for(id);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).context(format!("failed to read {}", path.display())),
        };
        let record = serde_json::from_str(&text)
            .with_context(|| format!("corrupt resource document {}", path.display()))?;
        Ok(Some(record))
    }

    pub fn list(&self) -> anyhow::Result<Vec<ResourceRecord>> {
        let entries = match std::fs::read_dir(&self.base) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).context(format!("failed to scan {}", self.base.display())),
        };
        let mut records = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let text = std::fs::read_to_string(&path)?;
            match serde_json::from_str(&text) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!("skipping corrupt resource {}: {e}", path.display()),
            }
        }
        records.sort_by(|a: &ResourceRecord, b: &ResourceRecord| a.id.cmp(&b.id));
        Ok(records)
    }

    /// Extend a record's owner set with `function_id`. Owners can only grow
    /// through this API. The rewritten record is persisted before the index
    /// is updated, so a crash can only lose index entries that the next
    /// rebuild-by-scan restores.
    pub fn attach_owner(
        &self,
        resource_id: &str,
        function_id: &str,
    ) -> anyhow::Result<ResourceRecord> {
        let mut record = self.load(resource_id)?.ok_or_else(|| {
            ErrorMetadata::not_found(
                "ResourceNotFound",
                format!("no resource with id {resource_id}"),
            )
        })?;
        record.owners.insert(function_id.to_string());
        self.persist(&record)?;
        self.index_owners(&record);
        Ok(record)
    }

    /// Assemble the platform handle for a function: all resources it owns,
    /// grouped by type. Falls back to a directory scan when the index is
    /// empty (e.g. after a restart).
    pub fn platform_for_function(&self, function_id: &str) -> anyhow::Result<Platform> {
        self.rebuild_index_if_empty()?;
        let owned: Vec<String> = self
            .index
            .read()
            .get(function_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();

        let mut kv = Vec::new();
        for id in owned {
            let Some(record) = self.load(&id)? else {
                continue;
            };
            match record.resource_type {
                ResourceType::Kv => kv.push((record.id.clone(), self.kv_store(&record.id))),
                ResourceType::Sql => {},
            }
        }
        Ok(Platform {
            kv: KvApi::new(kv),
            sql: SqlApi,
        })
    }

    fn rebuild_index_if_empty(&self) -> anyhow::Result<()> {
        if !self.index.read().is_empty() {
            return Ok(());
        }
        let records = self.list()?;
        if records.is_empty() {
            return Ok(());
        }
        tracing::info!("rebuilding resource ownership index from {} records", records.len());
        for record in &records {
            self.index_owners(record);
        }
        Ok(())
    }

    /// Runtime handle for a KV resource, created on first use and shared for
    /// the process lifetime.
    fn kv_store(&self, resource_id: &str) -> Arc<KvStore> {
        if let Some(store) = self.kv_stores.read().get(resource_id) {
            return store.clone();
        }
        self.kv_stores
            .write()
            .entry(resource_id.to_string())
            .or_insert_with(KvStore::new)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use errors::ErrorMetadataAnyhowExt;

    use super::*;

    fn kv_request(owners: &[&str]) -> CreateResourceRequest {
        CreateResourceRequest {
            resource_type: ResourceType::Kv,
            owners: Some(owners.iter().map(|s| s.to_string()).collect()),
            config: None,
        }
    }

    #[test]
    fn create_attach_and_assemble_platform() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = ResourceStore::new(dir.path());

        let record = store.create(kv_request(&[]))?;
        assert!(record.owners.is_empty());

        let record = store.attach_owner(&record.id, "fn-1")?;
        assert!(record.owners.contains("fn-1"));

        let platform = store.platform_for_function("fn-1")?;
        let kv = platform.kv.expect("kv should be bound");
        kv.put("foo", "bar");
        assert_eq!(kv.get("foo").as_deref(), Some("bar"));

        // The runtime store is shared across handle assemblies.
        let platform = store.platform_for_function("fn-1")?;
        assert_eq!(platform.kv.unwrap().get("foo").as_deref(), Some("bar"));

        // A function owning nothing gets an empty platform.
        assert!(store.platform_for_function("fn-2")?.kv.is_none());
        Ok(())
    }

    #[test]
    fn attach_to_missing_resource_is_not_found() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = ResourceStore::new(dir.path());
        let err = store.attach_owner("missing", "fn-1").unwrap_err();
        assert_eq!(err.short_msg(), "ResourceNotFound");
        Ok(())
    }

    #[test]
    fn owners_only_grow() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = ResourceStore::new(dir.path());
        let record = store.create(kv_request(&["fn-1"]))?;
        let record = store.attach_owner(&record.id, "fn-2")?;
        assert!(record.owners.contains("fn-1"));
        assert!(record.owners.contains("fn-2"));
        // Re-attaching an existing owner is a no-op.
        let record = store.attach_owner(&record.id, "fn-1")?;
        assert_eq!(record.owners.len(), 2);
        Ok(())
    }

    #[test]
    fn index_rebuilds_by_scan_after_restart() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let first = ResourceStore::new(dir.path());
        let record = first.create(kv_request(&["fn-1"]))?;

        // A fresh store over the same directory simulates a restart: the
        // in-memory index starts empty and the handle assembly must scan.
        let restarted = ResourceStore::new(dir.path());
        let platform = restarted.platform_for_function("fn-1")?;
        let kv = platform.kv.expect("kv should be bound after rescan");
        assert_eq!(kv.resource_ids(), vec![record.id.as_str()]);
        // KV data does not survive the restart; only the records do.
        assert_eq!(kv.get("foo"), None);
        Ok(())
    }

    #[test]
    fn sql_resources_do_not_surface_kv() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = ResourceStore::new(dir.path());
        store.create(CreateResourceRequest {
            resource_type: ResourceType::Sql,
            owners: Some(["fn-1".to_string()].into()),
            config: None,
        })?;
        let platform = store.platform_for_function("fn-1")?;
        assert!(platform.kv.is_none());
        assert!(platform.sql.query("select 1").is_err());
        Ok(())
    }
}
