use std::{
    path::Path,
    sync::Arc,
};

use isolate::{
    EngineRegistry,
    Invoker,
};
use model::{
    AssetStore,
    ResourceStore,
};
use net_proxy::VirtualNetClient;

/// Shared state behind every endpoint: the persistent registries and the
/// invocation engine.
#[derive(Clone)]
pub struct LocalAppState {
    pub assets: Arc<AssetStore>,
    pub resources: Arc<ResourceStore>,
    pub invoker: Arc<Invoker>,
}

impl LocalAppState {
    pub fn new(
        store_root: &Path,
        registry: Arc<EngineRegistry>,
        net: Option<Arc<VirtualNetClient>>,
    ) -> Self {
        Self {
            assets: Arc::new(AssetStore::new(store_root)),
            resources: Arc::new(ResourceStore::new(store_root)),
            invoker: Arc::new(Invoker::new(registry, net)),
        }
    }
}
