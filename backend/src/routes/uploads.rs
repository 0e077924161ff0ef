use std::sync::Arc;

use axum::{Extension, Json};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use validator::Validate;

use crate::{
    types::{AppError, ValidatedJson},
    upload_flow::{LedgerStatus, UploadCoordinator},
};

const UPLOADED_STATUS: &str = "file uploaded successfully";
const PENDING_STATUS: &str = "file uploaded successfully, record pending";

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct PrepareUploadRequest {
    /// File extension including the leading dot, e.g. `.jpeg`
    #[validate(length(
        min = 1,
        max = 16,
        message = "Invalid request format. Please provide {\"file_extension\": \"<extension>\"}"
    ))]
    pub file_extension: String,
    /// MIME type the client will upload with; defaults to the extension's type
    #[validate(length(min = 1, max = 255, message = "invalid content_type"))]
    pub content_type: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct PrepareUploadResponse {
    /// Presigned URL the client PUTs the object to
    pub presigned_url: String,
    /// Storage key to pass to `/upload-confirm` after the upload
    pub key: String,
    /// Content type the upload must be sent with
    pub content_type: String,
    /// ISO-8601 UTC timestamp when the presigned URL expires
    pub expires_at: String,
}

#[derive(Debug, Deserialize, Validate, JsonSchema)]
pub struct UploadConfirmRequest {
    /// Key returned by `/prepare-upload`
    #[validate(length(min = 1, max = 1024, message = "Invalid request"))]
    pub key: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct UploadConfirmResponse {
    pub success: bool,
    /// Public URL of the uploaded image
    pub url: String,
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct GetUploadedImagesResponse {
    pub success: bool,
    /// Public URLs of every confirmed upload
    pub images: Vec<String>,
}

/// Allocates an upload key and returns a presigned URL to write it
///
/// # Errors
///
/// - `400` if the extension is not supported or the body is malformed
/// - `500` if the presigned URL cannot be generated
#[instrument(skip(coordinator, payload))]
pub async fn prepare_upload(
    Extension(coordinator): Extension<Arc<UploadCoordinator>>,
    ValidatedJson(payload): ValidatedJson<PrepareUploadRequest>,
) -> Result<Json<PrepareUploadResponse>, AppError> {
    let authorization = coordinator
        .begin(&payload.file_extension, payload.content_type.as_deref())
        .await?;

    Ok(Json(PrepareUploadResponse {
        presigned_url: authorization.write_url,
        key: authorization.key.to_string(),
        content_type: authorization.content_type.to_string(),
        expires_at: authorization.expires_at.to_rfc3339(),
    }))
}

/// Confirms an upload once storage reports the object present
///
/// A ledger write failure after successful verification still answers `200`; the upload
/// is picked up by the next reconciliation sweep.
///
/// # Errors
///
/// - `400` if the key is not an upload key
/// - `404` if the object is not in storage
/// - `503` if storage could not be asked
#[instrument(skip(coordinator, payload))]
pub async fn upload_confirm(
    Extension(coordinator): Extension<Arc<UploadCoordinator>>,
    ValidatedJson(payload): ValidatedJson<UploadConfirmRequest>,
) -> Result<Json<UploadConfirmResponse>, AppError> {
    let confirmation = coordinator.confirm(&payload.key).await?;

    let status = match confirmation.ledger {
        LedgerStatus::Recorded(_) => UPLOADED_STATUS,
        LedgerStatus::Pending => PENDING_STATUS,
    };

    Ok(Json(UploadConfirmResponse {
        success: true,
        url: confirmation.public_url,
        status: status.to_string(),
    }))
}

/// Lists the public URLs of all confirmed uploads
///
/// # Errors
///
/// - `500` if the ledger cannot be read
#[instrument(skip(coordinator))]
pub async fn get_uploaded_images(
    Extension(coordinator): Extension<Arc<UploadCoordinator>>,
) -> Result<Json<GetUploadedImagesResponse>, AppError> {
    let images = coordinator.list_public_urls().await?;

    Ok(Json(GetUploadedImagesResponse {
        success: true,
        images,
    }))
}
