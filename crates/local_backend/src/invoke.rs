use axum::{
    body::Bytes,
    extract::{
        Path,
        State,
    },
    Json,
};
use common::http::{
    ExtractRequestId,
    HttpResponseError,
};
use errors::ErrorMetadata;
use isolate::InvocationRequest;
use value::{
    host_to_json,
    json_to_host,
    HostValue,
};

use crate::LocalAppState;

/// `POST /invoke/{id}`: load the asset, parse the JSON body into the event
/// (an empty or unparseable body becomes an empty event), assemble the
/// function's platform handle, and run the invocation with the dispatcher
/// timeout. The marshalled result is returned as JSON.
pub async fn invoke_function(
    State(st): State<LocalAppState>,
    Path(id): Path<String>,
    ExtractRequestId(request_id): ExtractRequestId,
    body: Bytes,
) -> Result<Json<serde_json::Value>, HttpResponseError> {
    let asset = st.assets.load(&id)?.ok_or_else(|| {
        anyhow::Error::from(ErrorMetadata::not_found(
            "FunctionNotFound",
            format!("no function with id {id}"),
        ))
    })?;
    tracing::debug!("invoking {} for request {request_id}", asset.id);

    let event = parse_event(&body);
    let platform = st.resources.platform_for_function(&id)?;

    let mut request = InvocationRequest::for_asset(&asset, event);
    request.timeout_millis = Some(*common::knobs::HTTP_INVOKE_TIMEOUT_MS as i64);
    request.platform = Some(platform);

    let result = st.invoker.invoke(request).await?;
    Ok(Json(host_to_json(&result)))
}

fn parse_event(body: &[u8]) -> HostValue {
    if body.is_empty() {
        return HostValue::empty_map();
    }
    match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(json @ serde_json::Value::Object(_)) => json_to_host(&json),
        Ok(_) | Err(_) => HostValue::empty_map(),
    }
}
