//! Uploaded image ledger backed by `DynamoDB`
//!
//! One item per confirmed upload, keyed by the object storage key. Using the storage key as
//! the hash key is what makes recording idempotent: a second insert for the same key fails
//! its condition and resolves to the record that is already there.

mod error;

use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_dynamodb::{error::SdkError, types::AttributeValue, Client as DynamoDbClient};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_dynamo::{from_items, to_item};
use strum::Display;
use tracing::{debug, info};

pub use error::{UploadLedgerError, UploadLedgerResult};

/// A confirmed upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    /// Surrogate ID (UUID v4), assigned by the ledger
    pub id: String,
    /// Primary key - object storage key of the uploaded image
    pub image_key: String,
    /// Timestamp at which the upload was confirmed and recorded
    pub created_at: i64,
}

/// `DynamoDB` attribute names for the uploaded images table
#[derive(Debug, Clone, Display)]
#[strum(serialize_all = "snake_case")]
pub enum UploadedImageAttribute {
    /// Surrogate ID
    Id,
    /// Object storage key (Primary Key)
    ImageKey,
    /// Creation timestamp
    CreatedAt,
}

/// Record of confirmed uploads
///
/// Callers must only record keys that were verified to exist in object storage.
#[async_trait]
pub trait UploadLedger: Send + Sync {
    /// Records `image_key`, returning the existing record if the key was already recorded
    ///
    /// # Errors
    ///
    /// Returns `UploadLedgerError` if the backing store cannot be written or read
    async fn record(&self, image_key: &str) -> UploadLedgerResult<UploadRecord>;

    /// Lists the keys of every recorded upload
    ///
    /// No ordering is guaranteed. Each call re-reads the current state.
    ///
    /// # Errors
    ///
    /// Returns `UploadLedgerError` if the backing store cannot be read
    async fn list_all(&self) -> UploadLedgerResult<Vec<String>>;
}

#[derive(Deserialize)]
struct ImageKeyProjection {
    image_key: String,
}

/// Ledger storage client for `DynamoDB` operations
pub struct UploadedImageStorage {
    dynamodb_client: Arc<DynamoDbClient>,
    table_name: String,
}

impl UploadedImageStorage {
    /// Creates a new uploaded image storage client
    ///
    /// # Arguments
    ///
    /// * `dynamodb_client` - Pre-configured `DynamoDB` client
    /// * `table_name` - `DynamoDB` table name for uploaded images
    #[must_use]
    pub const fn new(dynamodb_client: Arc<DynamoDbClient>, table_name: String) -> Self {
        Self {
            dynamodb_client,
            table_name,
        }
    }

    /// Gets the record for a single image key
    ///
    /// # Errors
    ///
    /// Returns `UploadLedgerError` if the `DynamoDB` get operation fails
    pub async fn get(&self, image_key: &str) -> UploadLedgerResult<Option<UploadRecord>> {
        let response = self
            .dynamodb_client
            .get_item()
            .table_name(&self.table_name)
            .key(
                UploadedImageAttribute::ImageKey.to_string(),
                AttributeValue::S(image_key.to_string()),
            )
            .consistent_read(true)
            .send()
            .await?;

        response
            .item()
            .map(|item| serde_dynamo::from_item(item.clone()).map_err(UploadLedgerError::from))
            .transpose()
    }
}

#[async_trait]
impl UploadLedger for UploadedImageStorage {
    async fn record(&self, image_key: &str) -> UploadLedgerResult<UploadRecord> {
        let record = UploadRecord {
            id: uuid::Uuid::new_v4().to_string(),
            image_key: image_key.to_string(),
            created_at: Utc::now().timestamp(),
        };

        let item = to_item(&record)?;

        let result = self
            .dynamodb_client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(item))
            .condition_expression("attribute_not_exists(#pk)")
            .expression_attribute_names("#pk", UploadedImageAttribute::ImageKey.to_string())
            .send()
            .await;

        match result {
            Ok(_) => {
                info!("Recorded uploaded image {image_key}");
                Ok(record)
            }
            Err(SdkError::ServiceError(ref svc))
                if svc.err().is_conditional_check_failed_exception() =>
            {
                debug!("Uploaded image {image_key} already recorded");
                self.get(image_key)
                    .await?
                    .ok_or_else(|| UploadLedgerError::MissingRecord(image_key.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn list_all(&self) -> UploadLedgerResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut exclusive_start_key = None;

        loop {
            let response = self
                .dynamodb_client
                .scan()
                .table_name(&self.table_name)
                .projection_expression("#image_key")
                .expression_attribute_names(
                    "#image_key",
                    UploadedImageAttribute::ImageKey.to_string(),
                )
                .set_exclusive_start_key(exclusive_start_key)
                .send()
                .await?;

            exclusive_start_key = response.last_evaluated_key.clone();
            let page = from_items::<_, ImageKeyProjection>(response.items.unwrap_or_default())?;
            keys.extend(page.into_iter().map(|p| p.image_key));

            if exclusive_start_key.is_none() {
                break;
            }
        }

        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_uploaded_image_item_uses_snake_case_attributes() {
        let record = UploadRecord {
            id: "4f1c1a0e-0000-4000-8000-000000000000".to_string(),
            image_key: "uploads/abc.jpeg".to_string(),
            created_at: 1_700_000_000,
        };

        let item: std::collections::HashMap<String, AttributeValue> = to_item(&record).unwrap();

        assert_eq!(
            item.get(&UploadedImageAttribute::ImageKey.to_string()),
            Some(&AttributeValue::S("uploads/abc.jpeg".to_string()))
        );
        assert_eq!(
            item.get(&UploadedImageAttribute::CreatedAt.to_string()),
            Some(&AttributeValue::N("1700000000".to_string()))
        );
        assert!(item.contains_key(&UploadedImageAttribute::Id.to_string()));
    }

    #[test]
    fn test_image_key_projection_ignores_other_attributes() {
        let record = UploadRecord {
            id: "id-1".to_string(),
            image_key: "uploads/one.jpeg".to_string(),
            created_at: 1,
        };
        let item: std::collections::HashMap<String, AttributeValue> = to_item(&record).unwrap();

        let projected: Vec<ImageKeyProjection> = from_items(vec![item]).unwrap();

        assert_eq!(projected.len(), 1);
        assert_eq!(projected[0].image_key, "uploads/one.jpeg");
    }
}
