use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use common::http::HttpResponseError;
use model::{
    parse_manifest,
    FunctionAsset,
    LanguageId,
};
use serde::Serialize;

use crate::LocalAppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    id: String,
    language_id: LanguageId,
    function_name: String,
    js_eval_as_module: bool,
    dependencies: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionSummary {
    id: String,
    language_id: LanguageId,
    function_name: String,
    js_eval_as_module: bool,
}

impl From<&FunctionAsset> for FunctionSummary {
    fn from(asset: &FunctionAsset) -> Self {
        Self {
            id: asset.id.clone(),
            language_id: asset.language_id,
            function_name: asset.function_name.clone(),
            js_eval_as_module: asset.js_eval_as_module,
        }
    }
}

/// `POST /functions`: parse the (JSONC-tolerant) manifest, resolve it into
/// an asset, persist, and return the created summary.
pub async fn upload_function(
    State(st): State<LocalAppState>,
    body: String,
) -> Result<impl IntoResponse, HttpResponseError> {
    let manifest = parse_manifest(&body)?;
    let cwd = std::env::current_dir().map_err(anyhow::Error::from)?;
    let asset = st.assets.resolve_manifest(&cwd, manifest)?;
    st.assets.save(&asset)?;
    tracing::info!("uploaded function {} ({})", asset.id, asset.language_id);
    let response = UploadResponse {
        id: asset.id.clone(),
        language_id: asset.language_id,
        function_name: asset.function_name.clone(),
        js_eval_as_module: asset.js_eval_as_module,
        dependencies: asset.dependencies.keys().cloned().collect(),
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// `GET /functions`: list stored assets as summaries.
pub async fn list_functions(
    State(st): State<LocalAppState>,
) -> Result<Json<Vec<FunctionSummary>>, HttpResponseError> {
    let assets = st.assets.list()?;
    Ok(Json(assets.iter().map(FunctionSummary::from).collect()))
}
