//! Error taxonomy of the upload flow

use thiserror::Error;

use crate::upload_key::KeyError;

/// Result type for upload flow operations
pub type UploadFlowResult<T> = Result<T, UploadFlowError>;

/// Errors surfaced by [`super::UploadCoordinator`]
#[derive(Error, Debug)]
pub enum UploadFlowError {
    /// Client-caused: unsupported extension, malformed key, bad content type
    #[error("invalid upload request: {0}")]
    Validation(String),

    /// Signing the write authorization failed; the client may retry
    #[error("failed to authorize upload: {0}")]
    AuthorizationFailed(String),

    /// The existence check could not be completed, so presence is unknown
    #[error("could not verify upload {key}: {reason}")]
    VerificationIndeterminate {
        /// Key being confirmed
        key: String,
        /// Last failure seen
        reason: String,
    },

    /// The existence check completed and the object is absent
    #[error("upload {0} not found in storage")]
    NotFound(String),

    /// The ledger could not be read or written
    #[error("upload ledger failure: {0}")]
    PersistenceFailed(String),

    /// Object storage could not be listed
    #[error("failed to list uploads in storage: {0}")]
    StorageListingFailed(String),
}

impl From<KeyError> for UploadFlowError {
    fn from(err: KeyError) -> Self {
        Self::Validation(err.to_string())
    }
}
