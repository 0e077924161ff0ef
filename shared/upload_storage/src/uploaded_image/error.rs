//! Error types for upload ledger operations

use aws_sdk_dynamodb::error::SdkError;
use aws_sdk_dynamodb::operation::{get_item::GetItemError, put_item::PutItemError, scan::ScanError};
use thiserror::Error;

/// Result type for upload ledger operations
pub type UploadLedgerResult<T> = Result<T, UploadLedgerError>;

/// Errors that can occur while reading or writing the upload ledger
#[derive(Error, Debug)]
pub enum UploadLedgerError {
    /// Failed to insert uploaded image into `DynamoDB`
    #[error("Failed to insert uploaded image into DynamoDB: {0:?}")]
    DynamoDbPutError(#[from] SdkError<PutItemError>),

    /// Failed to get uploaded image from `DynamoDB`
    #[error("Failed to get uploaded image from DynamoDB: {0:?}")]
    DynamoDbGetError(#[from] SdkError<GetItemError>),

    /// Failed to scan uploaded images from `DynamoDB`
    #[error("Failed to scan uploaded images from DynamoDB: {0:?}")]
    DynamoDbScanError(#[from] SdkError<ScanError>),

    /// The insert was rejected as a duplicate but the existing record could not be read back
    #[error("Uploaded image {0} reported as duplicate but not found")]
    MissingRecord(String),

    /// The ledger backend could not be reached
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    /// Serialization error for `serde_dynamo`
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_dynamo::Error> for UploadLedgerError {
    fn from(err: serde_dynamo::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}
