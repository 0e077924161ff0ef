//! Object storage operations for direct uploads
//!
//! [`ObjectStore`] is the narrow surface the upload flow needs from a storage backend:
//! presigning a write, probing for an object and listing a prefix. [`MediaStorage`] is the
//! S3 implementation; [`UploadAuthorizer`] layers the upload rules on top of any store.

mod authorizer;
mod error;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::{
    error::SdkError, operation::head_object::HeadObjectError, presigning::PresigningConfig,
    Client as S3Client,
};
use tracing::{debug, error};

pub use authorizer::{AuthorizerError, UploadAuthorization, UploadAuthorizer, MAX_UPLOAD_TTL};
pub use error::{BucketError, BucketResult};

/// Storage backend able to authorize and verify direct uploads
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Signs a PUT for exactly `key` and `content_type`, valid for `ttl`
    ///
    /// # Errors
    ///
    /// Returns `BucketError` if the request cannot be signed
    async fn presign_put(&self, key: &str, content_type: &str, ttl: Duration)
        -> BucketResult<String>;

    /// Checks whether an object is present, without transferring its payload
    ///
    /// # Errors
    ///
    /// Returns `BucketError` only when the check could not be completed. A missing object
    /// is `Ok(false)`.
    async fn object_exists(&self, key: &str) -> BucketResult<bool>;

    /// Lists every object key under `prefix`
    ///
    /// # Errors
    ///
    /// Returns `BucketError` if a page cannot be fetched
    async fn list_keys(&self, prefix: &str) -> BucketResult<Vec<String>>;
}

/// S3 storage client for upload operations
pub struct MediaStorage {
    s3_client: Arc<S3Client>,
    bucket_name: String,
}

impl MediaStorage {
    /// Creates a new media storage client
    ///
    /// # Arguments
    ///
    /// * `s3_client` - Pre-configured S3 client
    /// * `bucket_name` - S3 bucket uploads are written to
    #[must_use]
    pub const fn new(s3_client: Arc<S3Client>, bucket_name: String) -> Self {
        Self {
            s3_client,
            bucket_name,
        }
    }
}

#[async_trait]
impl ObjectStore for MediaStorage {
    async fn presign_put(
        &self,
        key: &str,
        content_type: &str,
        ttl: Duration,
    ) -> BucketResult<String> {
        debug!("Generating presigned URL for object: {key} ({content_type}, {ttl:?})");

        let presigned_config = PresigningConfig::expires_in(ttl).map_err(|e| {
            BucketError::ConfigError(format!("Failed to create presigning config: {e}"))
        })?;

        let presigned_request = self
            .s3_client
            .put_object()
            .bucket(&self.bucket_name)
            .key(key)
            .content_type(content_type)
            .presigned(presigned_config)
            .await
            .map_err(|e| BucketError::S3Error(format!("Failed to generate presigned URL: {e}")))?;

        Ok(presigned_request.uri().to_string())
    }

    async fn object_exists(&self, key: &str) -> BucketResult<bool> {
        let result = self
            .s3_client
            .head_object()
            .bucket(&self.bucket_name)
            .key(key)
            .send()
            .await;

        match result {
            Ok(_) => {
                debug!("Object exists: {key}");
                Ok(true)
            }
            Err(SdkError::ServiceError(service_err))
                if matches!(service_err.err(), HeadObjectError::NotFound(_)) =>
            {
                debug!("Object does not exist: {key}");
                Ok(false)
            }
            Err(SdkError::ServiceError(service_err))
                if service_err.raw().status().as_u16() >= 500 =>
            {
                error!("Upstream error checking object existence for {key}");
                Err(BucketError::UpstreamError(format!("{service_err:?}")))
            }
            Err(e) => {
                error!("Failed to check object existence for {key}: {e}");
                Err(BucketError::from(e))
            }
        }
    }

    async fn list_keys(&self, prefix: &str) -> BucketResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation_token = None;

        loop {
            let response = self
                .s3_client
                .list_objects_v2()
                .bucket(&self.bucket_name)
                .prefix(prefix)
                .set_continuation_token(continuation_token)
                .send()
                .await?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|object| object.key().map(ToString::to_string)),
            );

            continuation_token = response.next_continuation_token().map(ToString::to_string);
            if continuation_token.is_none() {
                break;
            }
        }

        debug!("Listed {} objects under {prefix}", keys.len());
        Ok(keys)
    }
}
