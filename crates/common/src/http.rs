use std::{
    borrow::Cow,
    convert::Infallible,
    fmt,
};

use axum::response::{
    IntoResponse,
    Response,
};
use errors::ErrorMetadataAnyhowExt;
use http::{
    request::Parts,
    StatusCode,
};
use serde::{
    Deserialize,
    Serialize,
};

/// A synthetic identifier assigned to each HTTP request and threaded through
/// log lines so a single invocation can be followed across components.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestId(String);

impl RequestId {
    pub fn new() -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self(id[..16].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Extractor yielding the request's [`RequestId`], minting one when no
/// middleware has stashed it in the request extensions yet.
pub struct ExtractRequestId(pub RequestId);

impl<S> axum::extract::FromRequestParts<S> for ExtractRequestId
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let request_id = parts
            .extensions
            .get::<RequestId>()
            .cloned()
            .unwrap_or_else(RequestId::new);
        Ok(Self(request_id))
    }
}

#[derive(Serialize, Deserialize)]
pub struct ResponseErrorMessage {
    pub code: Cow<'static, str>,
    pub error: Cow<'static, str>,
}

/// `HttpResponseError` converts `anyhow::Error` (and the `ErrorMetadata`
/// inside it if present) into the `http::Response` returned from the HTTP
/// layer. All HTTP handlers return `HttpResponseError`s; errors are logged
/// in the `IntoResponse` impl, the exit point of the HTTP layer.
#[derive(Debug)]
pub struct HttpResponseError {
    trace: anyhow::Error,
    status_code: StatusCode,
    error_code: Cow<'static, str>,
    msg: Cow<'static, str>,
}

impl IntoResponse for HttpResponseError {
    fn into_response(self) -> Response {
        // This is the only place handler failures are logged because it is
        // the exit point of the HTTP layer.
        if self.status_code.is_server_error() {
            tracing::error!("{} {}: {:#}", self.status_code, self.error_code, self.trace);
        } else {
            tracing::warn!("{} {}: {}", self.status_code, self.error_code, self.msg);
        }
        (
            self.status_code,
            axum::Json(ResponseErrorMessage {
                code: self.error_code,
                error: self.msg,
            }),
        )
            .into_response()
    }
}

impl From<anyhow::Error> for HttpResponseError {
    fn from(err: anyhow::Error) -> HttpResponseError {
        let status_code = err.http_status();
        let error_code = err.short_msg().to_string().into();
        let msg = err.msg().to_string().into();
        Self {
            trace: err,
            status_code,
            error_code,
            msg,
        }
    }
}

impl From<Infallible> for HttpResponseError {
    fn from(x: Infallible) -> Self {
        match x {}
    }
}

#[cfg(test)]
mod tests {
    use errors::ErrorMetadata;
    use http::StatusCode;

    use super::{
        HttpResponseError,
        RequestId,
    };

    #[test]
    fn request_ids_are_short_and_unique() {
        let a = RequestId::new();
        let b = RequestId::new();
        assert_eq!(a.as_str().len(), 16);
        assert_ne!(a, b);
    }

    #[test]
    fn tagged_error_maps_to_status() {
        let err: anyhow::Error =
            ErrorMetadata::bad_request("InvalidManifest", "manifest is missing languageId").into();
        let response: HttpResponseError = err.into();
        assert_eq!(response.status_code, StatusCode::BAD_REQUEST);
        assert_eq!(response.error_code, "InvalidManifest");
    }
}
