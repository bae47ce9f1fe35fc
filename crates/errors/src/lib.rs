use std::borrow::Cow;

use http::StatusCode;

/// ErrorMetadata object can be attached to an anyhow error chain via
/// `.context(e /*ErrorMetadata*/)`. It is a generic object used across the
/// codebase to tag errors with information that is used to classify them at
/// the HTTP boundary.
///
/// The msg is conveyed as the user facing error message if it makes it to
/// the client.
///
/// The short_msg is used as a tag - available for tests and for logging - to
/// have a message that is resilient to changes in copy. The dispatcher sends
/// it as a separate field in the error response body.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
#[error("{msg}")]
pub struct ErrorMetadata {
    /// The error code associated with this ErrorMetadata
    pub code: ErrorCode,
    /// short ScreamingCamelCase. Usable in tests for string matching.
    /// Eg InvalidManifest
    pub short_msg: Cow<'static, str>,
    /// human readable - developer facing. Should be longer and descriptive.
    /// Eg "The upload manifest is missing a languageId field"
    pub msg: Cow<'static, str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    BadRequest,
    NotFound,
    Overloaded,
    ExecutionFailed,
}

impl ErrorMetadata {
    /// Bad Request. Maps to 400 in HTTP.
    ///
    /// The short_msg should be a CapitalCamelCased tag describing the error.
    /// The msg should be a descriptive message targeted toward the developer.
    pub fn bad_request(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::BadRequest,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    /// Resource not found. Maps to 404 in HTTP.
    pub fn not_found(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::NotFound,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    /// The system is at capacity and rejected the work before running it.
    /// Maps to 503 in HTTP.
    pub fn overloaded(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::Overloaded,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    /// A failure surfaced while executing a guest function or enforcing a
    /// runtime policy on its behalf. Maps to 500 in HTTP.
    pub fn execution_failed(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::ExecutionFailed,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    /// The named guest entry point is missing or not executable.
    pub fn function_not_found(language_id: &str, function_name: &str) -> Self {
        Self::execution_failed(
            "FunctionNotFound",
            format!("No executable {language_id} function named '{function_name}'"),
        )
    }

    /// The invocation exceeded its configured timeout.
    pub fn invocation_timeout(timeout_millis: u64) -> Self {
        Self::execution_failed(
            "InvocationTimeout",
            format!("Invocation did not complete within {timeout_millis}ms"),
        )
    }

    /// A guest `require` named a dependency absent from the in-memory map.
    pub fn module_not_found(name: &str) -> Self {
        Self::execution_failed("ModuleNotFound", format!("Module not found: {name}"))
    }

    /// Outbound traffic was denied by the egress filter.
    pub fn egress_denied(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::execution_failed("EgressDenied", reason)
    }
}

impl ErrorCode {
    fn http_status_code(&self) -> StatusCode {
        match self {
            ErrorCode::BadRequest => StatusCode::BAD_REQUEST,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::ExecutionFailed => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Extension trait on `anyhow::Error` that recovers the `ErrorMetadata` tag
/// from anywhere in the chain. Untagged errors classify as internal server
/// errors with a generic message so internal details never leak to clients.
pub trait ErrorMetadataAnyhowExt {
    fn is_bad_request(&self) -> bool;
    fn http_status(&self) -> StatusCode;
    fn short_msg(&self) -> &str;
    fn msg(&self) -> &str;
}

pub const INTERNAL_SERVER_ERROR: &str = "InternalServerError";
pub const INTERNAL_SERVER_ERROR_MSG: &str = "Your request couldn't be completed. Try again later.";

impl ErrorMetadataAnyhowExt for anyhow::Error {
    fn is_bad_request(&self) -> bool {
        matches!(
            self.chain()
                .find_map(|e| e.downcast_ref::<ErrorMetadata>()),
            Some(ErrorMetadata {
                code: ErrorCode::BadRequest,
                ..
            })
        )
    }

    fn http_status(&self) -> StatusCode {
        if let Some(metadata) = self
            .chain()
            .find_map(|e| e.downcast_ref::<ErrorMetadata>())
        {
            return metadata.code.http_status_code();
        }
        StatusCode::INTERNAL_SERVER_ERROR
    }

    fn short_msg(&self) -> &str {
        if let Some(metadata) = self
            .chain()
            .find_map(|e| e.downcast_ref::<ErrorMetadata>())
        {
            return &metadata.short_msg;
        }
        INTERNAL_SERVER_ERROR
    }

    fn msg(&self) -> &str {
        if let Some(metadata) = self
            .chain()
            .find_map(|e| e.downcast_ref::<ErrorMetadata>())
        {
            return &metadata.msg;
        }
        INTERNAL_SERVER_ERROR_MSG
    }
}
