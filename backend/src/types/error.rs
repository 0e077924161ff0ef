//! Universal error handling for the API

use aide::OperationOutput;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use schemars::JsonSchema;
use serde::Serialize;

use crate::upload_flow::UploadFlowError;

/// API error response envelope
#[derive(Debug, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    /// Always `false`
    success: bool,
    /// Human-readable error message
    error: String,
    /// Machine-readable error code
    code: &'static str,
    /// Whether the client should retry the request
    allow_retry: bool,
}

/// Application error type that wraps the API error response
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    inner: ApiErrorResponse,
}

impl AppError {
    /// Create a new application error
    #[must_use]
    pub fn new(
        status: StatusCode,
        code: &'static str,
        msg: impl Into<String>,
        retry: bool,
    ) -> Self {
        Self {
            status,
            inner: ApiErrorResponse {
                success: false,
                error: msg.into(),
                code,
                allow_retry: retry,
            },
        }
    }

    /// Client error for a malformed or invalid request body
    #[must_use]
    pub fn bad_request(code: &'static str, msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, msg, false)
    }

    /// HTTP status of the error
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self.status.as_u16() {
            400..=499 => tracing::warn!(
                "Client error: {} - {}",
                self.inner.code,
                self.inner.error
            ),
            500..=599 => tracing::error!(
                "Server error: {} - {}",
                self.inner.code,
                self.inner.error
            ),
            _ => {}
        }

        (self.status, Json(self.inner)).into_response()
    }
}

/// Convert upload flow errors to application errors
impl From<UploadFlowError> for AppError {
    fn from(err: UploadFlowError) -> Self {
        use UploadFlowError::{
            AuthorizationFailed, NotFound, PersistenceFailed, StorageListingFailed, Validation,
            VerificationIndeterminate,
        };

        match &err {
            Validation(msg) => Self::bad_request("invalid_request", msg.clone()),
            NotFound(key) => {
                tracing::debug!("Upload not found in storage: {key}");
                Self::new(StatusCode::NOT_FOUND, "not_found", "not found", false)
            }
            VerificationIndeterminate { key, reason } => {
                tracing::error!("Could not verify upload {key}: {reason}");
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "verification_unavailable",
                    "upload could not be verified, please retry",
                    true,
                )
            }
            AuthorizationFailed(msg) => {
                tracing::error!("Upload authorization failed: {msg}");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "authorization_failed",
                    "Failed to generate pre-signed URL",
                    true,
                )
            }
            PersistenceFailed(msg) | StorageListingFailed(msg) => {
                tracing::error!("Upload storage error: {msg}");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "failed to get images",
                    true,
                )
            }
        }
    }
}

impl OperationOutput for AppError {
    type Inner = ApiErrorResponse;

    fn operation_response(
        ctx: &mut aide::generate::GenContext,
        operation: &mut aide::openapi::Operation,
    ) -> Option<aide::openapi::Response> {
        Json::<ApiErrorResponse>::operation_response(ctx, operation)
    }
}
