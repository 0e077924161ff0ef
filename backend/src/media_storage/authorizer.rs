//! Write authorization and existence verification for direct uploads

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use super::{BucketError, BucketResult, ObjectStore};
use crate::upload_key::{StorageKey, UPLOAD_PREFIX};

/// Longest lifetime a write authorization may be issued with
pub const MAX_UPLOAD_TTL: Duration = Duration::from_secs(5 * 60);

/// Errors raised while authorizing or verifying an upload
#[derive(Error, Debug)]
pub enum AuthorizerError {
    /// Requested lifetime is zero or above the configured maximum
    #[error("authorization ttl {ttl:?} must be positive and at most {max:?}")]
    InvalidTtl {
        /// Requested lifetime
        ttl: Duration,
        /// Configured maximum
        max: Duration,
    },

    /// Content type differs from the one implied by the key's extension
    #[error("content type {actual:?} does not match {expected:?} implied by the key")]
    ContentTypeMismatch {
        /// Type implied by the key
        expected: &'static str,
        /// Type requested by the client
        actual: String,
    },

    /// The storage backend could not sign the write
    #[error("failed to authorize upload: {0}")]
    AuthorizationFailed(#[source] BucketError),

    /// The existence check could not be completed
    #[error("failed to verify upload: {0}")]
    VerificationFailed(#[source] BucketError),
}

/// Time-bounded permission to write one object
#[derive(Debug, Clone, Serialize)]
pub struct UploadAuthorization {
    /// Key the client may write
    pub key: StorageKey,
    /// Presigned PUT URL
    pub write_url: String,
    /// Content type the write must carry
    pub content_type: &'static str,
    /// Instant after which storage rejects the write
    pub expires_at: DateTime<Utc>,
}

/// Issues write authorizations and verifies uploads against object storage
///
/// Stateless apart from the shared store handle, so one instance serves every request.
pub struct UploadAuthorizer {
    store: Arc<dyn ObjectStore>,
    max_ttl: Duration,
}

impl UploadAuthorizer {
    /// Creates an authorizer capped at [`MAX_UPLOAD_TTL`]
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            max_ttl: MAX_UPLOAD_TTL,
        }
    }

    /// Overrides the maximum authorization lifetime
    #[must_use]
    pub const fn with_max_ttl(mut self, max_ttl: Duration) -> Self {
        self.max_ttl = max_ttl;
        self
    }

    /// Issues a write authorization for `key`
    ///
    /// The returned URL is signed for exactly this key, content type and expiry; storage
    /// enforces all three on the write.
    ///
    /// # Errors
    ///
    /// - `AuthorizerError::InvalidTtl` if `ttl` is zero or above the maximum
    /// - `AuthorizerError::ContentTypeMismatch` if `content_type` is not the key's type
    /// - `AuthorizerError::AuthorizationFailed` if signing fails
    pub async fn issue(
        &self,
        key: &StorageKey,
        content_type: &str,
        ttl: Duration,
    ) -> Result<UploadAuthorization, AuthorizerError> {
        if ttl.is_zero() || ttl > self.max_ttl {
            return Err(AuthorizerError::InvalidTtl {
                ttl,
                max: self.max_ttl,
            });
        }

        let expected = key.image_type().content_type();
        if content_type != expected {
            return Err(AuthorizerError::ContentTypeMismatch {
                expected,
                actual: content_type.to_string(),
            });
        }

        // Taken before signing so the reported expiry never trails the real one
        let expires_at = Utc::now() + ttl;

        let write_url = self
            .store
            .presign_put(key.as_str(), expected, ttl)
            .await
            .map_err(|e| {
                warn!("Failed to sign upload for {key}: {e}");
                AuthorizerError::AuthorizationFailed(e)
            })?;

        debug!("Issued upload authorization for {key}, expires at {expires_at}");

        Ok(UploadAuthorization {
            key: key.clone(),
            write_url,
            content_type: expected,
            expires_at,
        })
    }

    /// Checks whether the object for `key` is present in storage
    ///
    /// Metadata only, idempotent and side-effect free.
    ///
    /// # Errors
    ///
    /// Returns `AuthorizerError::VerificationFailed` if the check could not be completed.
    /// An absent object is `Ok(false)`.
    pub async fn verify_exists(&self, key: &StorageKey) -> Result<bool, AuthorizerError> {
        self.store
            .object_exists(key.as_str())
            .await
            .map_err(AuthorizerError::VerificationFailed)
    }

    /// Lists every well-formed upload key present in storage
    ///
    /// Objects under the upload prefix that do not parse as upload keys are skipped.
    ///
    /// # Errors
    ///
    /// Returns `BucketError` if the listing fails
    pub async fn list_uploaded_keys(&self) -> BucketResult<Vec<StorageKey>> {
        let keys = self.store.list_keys(UPLOAD_PREFIX).await?;

        Ok(keys
            .iter()
            .filter_map(|raw| match StorageKey::parse(raw) {
                Ok(key) => Some(key),
                Err(e) => {
                    debug!("Skipping foreign object in upload area: {e}");
                    None
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{InMemoryObjectStore, PutRejection};
    use crate::upload_key::KeyAllocator;

    fn authorizer(store: &Arc<InMemoryObjectStore>) -> UploadAuthorizer {
        UploadAuthorizer::new(store.clone())
    }

    fn jpeg_key() -> StorageKey {
        KeyAllocator.allocate(".jpeg").unwrap()
    }

    #[tokio::test]
    async fn test_issue_binds_key_type_and_expiry() {
        let store = Arc::new(InMemoryObjectStore::new());
        let key = jpeg_key();
        let before = Utc::now();

        let authorization = authorizer(&store)
            .issue(&key, "image/jpeg", MAX_UPLOAD_TTL)
            .await
            .unwrap();

        assert_eq!(authorization.key, key);
        assert_eq!(authorization.content_type, "image/jpeg");
        assert!(authorization.write_url.contains(key.as_str()));
        assert!(authorization.expires_at >= before + MAX_UPLOAD_TTL);
        assert!(authorization.expires_at <= Utc::now() + MAX_UPLOAD_TTL);
        assert_eq!(store.presign_calls(), 1);
    }

    #[tokio::test]
    async fn test_issue_rejects_invalid_ttl_without_signing() {
        let store = Arc::new(InMemoryObjectStore::new());
        let key = jpeg_key();

        for ttl in [Duration::ZERO, MAX_UPLOAD_TTL + Duration::from_secs(1)] {
            let result = authorizer(&store).issue(&key, "image/jpeg", ttl).await;
            assert!(matches!(result, Err(AuthorizerError::InvalidTtl { .. })));
        }

        assert_eq!(store.interactions(), 0);
    }

    #[tokio::test]
    async fn test_issue_respects_configured_max_ttl() {
        let store = Arc::new(InMemoryObjectStore::new());
        let authorizer = authorizer(&store).with_max_ttl(Duration::from_secs(60));

        let result = authorizer
            .issue(&jpeg_key(), "image/jpeg", Duration::from_secs(61))
            .await;

        assert!(matches!(result, Err(AuthorizerError::InvalidTtl { .. })));
    }

    #[tokio::test]
    async fn test_issue_rejects_content_type_mismatch() {
        let store = Arc::new(InMemoryObjectStore::new());

        let result = authorizer(&store)
            .issue(&jpeg_key(), "image/png", MAX_UPLOAD_TTL)
            .await;

        match result {
            Err(AuthorizerError::ContentTypeMismatch { expected, actual }) => {
                assert_eq!(expected, "image/jpeg");
                assert_eq!(actual, "image/png");
            }
            other => panic!("expected content type mismatch, got {other:?}"),
        }
        assert_eq!(store.interactions(), 0);
    }

    #[tokio::test]
    async fn test_issue_surfaces_signing_failure() {
        let store = Arc::new(InMemoryObjectStore::new());
        store.fail_presign(true);

        let result = authorizer(&store)
            .issue(&jpeg_key(), "image/jpeg", MAX_UPLOAD_TTL)
            .await;

        assert!(matches!(result, Err(AuthorizerError::AuthorizationFailed(_))));
    }

    #[tokio::test]
    async fn test_authorization_expiry_is_enforced_by_storage() {
        let store = Arc::new(InMemoryObjectStore::new());
        let key = jpeg_key();
        let ttl = Duration::from_secs(60);
        let epsilon = chrono::Duration::seconds(1);

        let authorization = authorizer(&store)
            .issue(&key, "image/jpeg", ttl)
            .await
            .unwrap();

        assert_eq!(
            store.put_with_url(
                &authorization.write_url,
                "image/jpeg",
                authorization.expires_at + epsilon,
            ),
            Err(PutRejection::Expired)
        );
        assert!(!authorizer(&store).verify_exists(&key).await.unwrap());

        assert_eq!(
            store.put_with_url(
                &authorization.write_url,
                "image/jpeg",
                authorization.expires_at - epsilon,
            ),
            Ok(())
        );
        assert!(authorizer(&store).verify_exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_authorization_content_type_is_enforced_by_storage() {
        let store = Arc::new(InMemoryObjectStore::new());
        let authorization = authorizer(&store)
            .issue(&jpeg_key(), "image/jpeg", MAX_UPLOAD_TTL)
            .await
            .unwrap();

        assert_eq!(
            store.put_with_url(&authorization.write_url, "text/html", Utc::now()),
            Err(PutRejection::ContentTypeMismatch)
        );
    }

    #[tokio::test]
    async fn test_verify_exists_distinguishes_absent_from_failure() {
        let store = Arc::new(InMemoryObjectStore::new());
        let key = jpeg_key();

        assert!(!authorizer(&store).verify_exists(&key).await.unwrap());

        store.fail_next_exists_checks(1);
        assert!(matches!(
            authorizer(&store).verify_exists(&key).await,
            Err(AuthorizerError::VerificationFailed(_))
        ));

        store.insert_object(key.as_str());
        assert!(authorizer(&store).verify_exists(&key).await.unwrap());
        assert!(authorizer(&store).verify_exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_uploaded_keys_skips_foreign_objects() {
        let store = Arc::new(InMemoryObjectStore::new());
        let key = jpeg_key();
        store.insert_object(key.as_str());
        store.insert_object("uploads/readme.txt");
        store.insert_object("avatars/abc.jpeg");

        let keys = authorizer(&store).list_uploaded_keys().await.unwrap();

        assert_eq!(keys, vec![key]);
    }
}
