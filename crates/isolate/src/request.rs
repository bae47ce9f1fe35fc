use std::time::Duration;

use indexmap::IndexMap;
use model::{
    FunctionAsset,
    LanguageId,
    Platform,
};
use value::HostValue;

/// A file handed to an invocation, staged into a per-invocation temp
/// directory before the guest runs.
#[derive(Clone, Debug)]
pub struct FileInput {
    pub name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// A transient request to run guest source once.
pub struct InvocationRequest {
    pub language_id: LanguageId,
    pub source_code: String,
    pub function_name: String,
    /// Free-form event map passed to the entry point.
    pub event: HostValue,
    pub files: Vec<FileInput>,
    pub dependencies: IndexMap<String, String>,
    pub js_eval_as_module: bool,
    /// Absent or non-positive disables the timeout.
    pub timeout_millis: Option<i64>,
    pub enable_network: bool,
    pub platform: Option<Platform>,
}

impl InvocationRequest {
    /// Build the request for a stored asset with dispatcher defaults:
    /// network enabled, no files, platform attached by the caller.
    pub fn for_asset(asset: &FunctionAsset, event: HostValue) -> Self {
        Self {
            language_id: asset.language_id,
            source_code: asset.source_code.clone(),
            function_name: asset.function_name.clone(),
            event,
            files: Vec::new(),
            dependencies: asset.dependencies.clone(),
            js_eval_as_module: asset.js_eval_as_module,
            timeout_millis: None,
            enable_network: true,
            platform: None,
        }
    }

    pub fn effective_timeout(&self) -> Option<Duration> {
        match self.timeout_millis {
            Some(ms) if ms > 0 => Some(Duration::from_millis(ms as u64)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(timeout_millis: Option<i64>) -> InvocationRequest {
        InvocationRequest {
            language_id: LanguageId::Js,
            source_code: String::new(),
            function_name: "handler".to_string(),
            event: HostValue::empty_map(),
            files: Vec::new(),
            dependencies: IndexMap::new(),
            js_eval_as_module: false,
            timeout_millis,
            enable_network: false,
            platform: None,
        }
    }

    #[test]
    fn non_positive_timeouts_are_disabled() {
        assert_eq!(request(None).effective_timeout(), None);
        assert_eq!(request(Some(0)).effective_timeout(), None);
        assert_eq!(request(Some(-5)).effective_timeout(), None);
        assert_eq!(
            request(Some(250)).effective_timeout(),
            Some(Duration::from_millis(250)),
        );
    }
}
