//! The function/resource registry: persisted function assets, tolerant
//! upload manifests, resource records with an ownership index, and per-
//! function platform handle assembly.

mod asset_store;
mod platform;
mod resource_store;
mod types;

pub use asset_store::{
    parse_manifest,
    AssetStore,
};
pub use platform::{
    KvApi,
    KvStore,
    Platform,
    SqlApi,
};
pub use resource_store::{
    CreateResourceRequest,
    ResourceStore,
};
pub use types::{
    DependencySpec,
    FunctionAsset,
    LanguageId,
    ResourceRecord,
    ResourceType,
    UploadManifest,
    DEFAULT_FUNCTION_NAME,
};
