use axum::{
    extract::Request,
    middleware::Next,
    response::Response,
    routing::{
        get,
        post,
    },
    Router,
};
use common::http::{
    HttpResponseError,
    RequestId,
};
use errors::ErrorMetadata;
use tracing::Instrument;

use crate::{
    functions::{
        list_functions,
        upload_function,
    },
    invoke::invoke_function,
    resources::{
        attach_owner,
        create_resource,
        list_resources,
    },
    LocalAppState,
};

pub fn router(st: LocalAppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/functions", post(upload_function).get(list_functions))
        .route("/invoke/{id}", post(invoke_function))
        .route("/invoke", post(missing_path_segment))
        .route("/invoke/", post(missing_path_segment))
        .route("/resources", post(create_resource).get(list_resources))
        .route("/resources/{id}/owners", post(attach_owner))
        .layer(axum::middleware::from_fn(request_id_middleware))
        .with_state(st)
}

async fn health() -> &'static str {
    "OK"
}

async fn missing_path_segment() -> HttpResponseError {
    anyhow::Error::from(ErrorMetadata::bad_request(
        "MissingPathSegment",
        "expected /invoke/{functionId}",
    ))
    .into()
}

/// Assign each request a synthetic id and run the handler inside a span
/// carrying it, so every log line of an invocation can be correlated.
async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = RequestId::new();
    request.extensions_mut().insert(request_id.clone());
    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path(),
    );
    async move {
        let response = next.run(request).await;
        tracing::info!(status = %response.status(), "request complete");
        response
    }
    .instrument(span)
    .await
}
