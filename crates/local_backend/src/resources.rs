use std::collections::BTreeSet;

use axum::{
    extract::{
        Path,
        State,
    },
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use common::http::HttpResponseError;
use errors::ErrorMetadata;
use model::{
    CreateResourceRequest,
    ResourceRecord,
    ResourceType,
};
use serde::{
    Deserialize,
    Serialize,
};

use crate::LocalAppState;

#[derive(Serialize)]
pub struct ResourceSummary {
    id: String,
    #[serde(rename = "type")]
    resource_type: ResourceType,
    owners: BTreeSet<String>,
}

impl From<ResourceRecord> for ResourceSummary {
    fn from(record: ResourceRecord) -> Self {
        Self {
            id: record.id,
            resource_type: record.resource_type,
            owners: record.owners,
        }
    }
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &str) -> anyhow::Result<T> {
    serde_json::from_str(body).map_err(|e| {
        ErrorMetadata::bad_request("InvalidJson", format!("invalid request body: {e}")).into()
    })
}

/// `POST /resources`: create a resource record from `{type, owners?, config?}`.
pub async fn create_resource(
    State(st): State<LocalAppState>,
    body: String,
) -> Result<impl IntoResponse, HttpResponseError> {
    let request: CreateResourceRequest = parse_body(&body)?;
    let record = st.resources.create(request)?;
    Ok((StatusCode::CREATED, Json(ResourceSummary::from(record))))
}

/// `GET /resources`: list resource records.
pub async fn list_resources(
    State(st): State<LocalAppState>,
) -> Result<Json<Vec<ResourceSummary>>, HttpResponseError> {
    let records = st.resources.list()?;
    Ok(Json(records.into_iter().map(ResourceSummary::from).collect()))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachOwnerRequest {
    function_id: String,
}

/// `POST /resources/{id}/owners`: extend the record's owner set.
pub async fn attach_owner(
    State(st): State<LocalAppState>,
    Path(id): Path<String>,
    body: String,
) -> Result<Json<ResourceSummary>, HttpResponseError> {
    let request: AttachOwnerRequest = parse_body(&body)?;
    let record = st.resources.attach_owner(&id, &request.function_id)?;
    Ok(Json(ResourceSummary::from(record)))
}
