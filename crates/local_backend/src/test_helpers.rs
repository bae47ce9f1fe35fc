use std::sync::Arc;

use axum::body::Body;
use http::{
    Request,
    StatusCode,
};
use http_body_util::BodyExt;
use isolate::{
    test_helpers::FakeEngine,
    EngineRegistry,
};
use model::LanguageId;
use tower::ServiceExt;

use crate::{
    router,
    LocalAppState,
};

/// A backend over a throwaway store directory with scripted evaluators.
pub struct TestBackend {
    pub router: axum::Router,
    pub js_engine: Arc<FakeEngine>,
    pub python_engine: Arc<FakeEngine>,
    pub state: LocalAppState,
    _dir: tempfile::TempDir,
}

pub fn setup_backend() -> anyhow::Result<TestBackend> {
    let dir = tempfile::tempdir()?;
    let js_engine = FakeEngine::new(LanguageId::Js);
    let python_engine = FakeEngine::new(LanguageId::Python);
    let mut registry = EngineRegistry::new();
    registry.register(js_engine.clone());
    registry.register(python_engine.clone());
    let state = LocalAppState::new(&dir.path().join(".faas"), Arc::new(registry), None);
    Ok(TestBackend {
        router: router(state.clone()),
        js_engine,
        python_engine,
        state,
        _dir: dir,
    })
}

impl TestBackend {
    /// Drive one request through the router and decode the JSON response
    /// (non-JSON bodies come back as a JSON string).
    pub async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<String>,
    ) -> anyhow::Result<(StatusCode, serde_json::Value)> {
        let request = Request::builder().method(method).uri(path).body(match body {
            Some(body) => Body::from(body),
            None => Body::empty(),
        })?;
        let response = self.router.clone().oneshot(request).await?;
        let status = response.status();
        let bytes = response.into_body().collect().await?.to_bytes();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                serde_json::Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        Ok((status, json))
    }
}
