//! Begin / confirm coordination of direct uploads
//!
//! `begin` allocates a key and hands the client a presigned write; nothing is persisted.
//! `confirm` asks storage whether the object landed and only then records it in the ledger.
//! The client's claim that it uploaded is never taken at face value.
//!
//! Storage backends with eventually consistent reads may briefly report a fresh object as
//! absent, so the existence check is retried under [`VerifyRetryPolicy`] before an upload is
//! declared missing.

mod error;

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, instrument, warn};
use upload_storage::uploaded_image::{UploadLedger, UploadRecord};

pub use error::{UploadFlowError, UploadFlowResult};

/// Confirmations verified in storage whose ledger write failed
pub const LEDGER_PENDING_METRIC: &str = "upload_ledger_pending";
/// Uploads recorded by a reconciliation sweep
pub const RECONCILE_RECORDED_METRIC: &str = "upload_reconcile_recorded";
/// Uploads a reconciliation sweep failed to record
pub const RECONCILE_FAILED_METRIC: &str = "upload_reconcile_failed";

use crate::media_storage::{AuthorizerError, UploadAuthorization, UploadAuthorizer, MAX_UPLOAD_TTL};
use crate::upload_key::{KeyAllocator, StorageKey};

/// Retry schedule for existence checks during confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyRetryPolicy {
    /// Total number of checks, first one included
    pub max_attempts: u32,
    /// Pause after the first failed check; doubles after each further one
    pub initial_backoff: Duration,
}

impl VerifyRetryPolicy {
    /// Pause to take after the given (1-based) failed attempt
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

impl Default for VerifyRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
        }
    }
}

/// Tunables of the upload flow
#[derive(Debug, Clone)]
pub struct UploadFlowConfig {
    /// Lifetime of issued write authorizations
    pub authorization_ttl: Duration,
    /// Deadline applied to every storage and ledger call
    pub backend_timeout: Duration,
    /// Existence check retries
    pub verify_retry: VerifyRetryPolicy,
    /// Public (CDN) base URL uploaded objects are served from
    pub public_base_url: String,
}

impl UploadFlowConfig {
    /// Defaults with the given public base URL
    #[must_use]
    pub fn new(public_base_url: impl Into<String>) -> Self {
        Self {
            authorization_ttl: MAX_UPLOAD_TTL,
            backend_timeout: Duration::from_secs(5),
            verify_retry: VerifyRetryPolicy::default(),
            public_base_url: public_base_url.into(),
        }
    }
}

/// Whether a verified upload made it into the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerStatus {
    /// Recorded, or already recorded by an earlier confirmation
    Recorded(UploadRecord),
    /// Present in storage but the ledger write failed; reconciliation will pick it up
    Pending,
}

/// Outcome of a successful confirmation
#[derive(Debug, Clone)]
pub struct Confirmation {
    /// Confirmed key
    pub key: StorageKey,
    /// Public URL of the object
    pub public_url: String,
    /// Ledger state of the upload
    pub ledger: LedgerStatus,
}

/// Counts from one reconciliation sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Upload objects found in storage
    pub scanned: usize,
    /// Objects that were missing from the ledger and are now recorded
    pub recorded: usize,
    /// Objects missing from the ledger that could not be recorded
    pub failed: usize,
}

/// Joins the public base URL and a storage key
#[must_use]
pub fn public_url(base_url: &str, key: &str) -> String {
    format!("{}/{key}", base_url.trim_end_matches('/'))
}

/// Coordinates key allocation, authorization, verification and recording
pub struct UploadCoordinator {
    allocator: KeyAllocator,
    authorizer: UploadAuthorizer,
    ledger: Arc<dyn UploadLedger>,
    config: UploadFlowConfig,
}

impl UploadCoordinator {
    /// Creates a coordinator over the given authorizer and ledger
    #[must_use]
    pub fn new(
        authorizer: UploadAuthorizer,
        ledger: Arc<dyn UploadLedger>,
        config: UploadFlowConfig,
    ) -> Self {
        Self {
            allocator: KeyAllocator,
            authorizer,
            ledger,
            config,
        }
    }

    /// Flow configuration
    #[must_use]
    pub const fn config(&self) -> &UploadFlowConfig {
        &self.config
    }

    /// Starts an upload: allocates a key and issues a write authorization for it
    ///
    /// `content_type` defaults to the type implied by `extension`. The extension is checked
    /// before anything else, so a rejected request never reaches storage.
    ///
    /// # Errors
    ///
    /// - `UploadFlowError::Validation` for an unsupported extension or mismatched type
    /// - `UploadFlowError::AuthorizationFailed` if signing fails or times out, or the
    ///   configured ttl is out of range
    #[instrument(skip(self))]
    pub async fn begin(
        &self,
        extension: &str,
        content_type: Option<&str>,
    ) -> UploadFlowResult<UploadAuthorization> {
        let key = self.allocator.allocate(extension)?;
        let content_type = content_type.unwrap_or_else(|| key.image_type().content_type());

        let authorization = self
            .within_deadline(self.authorizer.issue(
                &key,
                content_type,
                self.config.authorization_ttl,
            ))
            .await
            .map_err(UploadFlowError::AuthorizationFailed)?
            .map_err(|err| match err {
                AuthorizerError::ContentTypeMismatch { .. } => {
                    UploadFlowError::Validation(err.to_string())
                }
                // The ttl comes from server config, never from the client
                AuthorizerError::InvalidTtl { .. }
                | AuthorizerError::AuthorizationFailed(_)
                | AuthorizerError::VerificationFailed(_) => {
                    UploadFlowError::AuthorizationFailed(err.to_string())
                }
            })?;

        info!("Authorized upload of {key}");
        Ok(authorization)
    }

    /// Confirms an upload after verifying it against storage
    ///
    /// A ledger failure after successful verification does not fail the confirmation; it is
    /// logged and reported as [`LedgerStatus::Pending`].
    ///
    /// # Errors
    ///
    /// - `UploadFlowError::Validation` if `raw_key` is not an upload key
    /// - `UploadFlowError::NotFound` if storage reports the object absent on every attempt
    /// - `UploadFlowError::VerificationIndeterminate` if the last check could not complete
    #[instrument(skip(self))]
    pub async fn confirm(&self, raw_key: &str) -> UploadFlowResult<Confirmation> {
        let key = StorageKey::parse(raw_key)?;

        self.verify_with_retry(&key).await?;

        let ledger = match self
            .within_deadline(self.ledger.record(key.as_str()))
            .await
        {
            Ok(Ok(record)) => LedgerStatus::Recorded(record),
            Ok(Err(e)) => Self::ledger_pending(&key, &e.to_string()),
            Err(reason) => Self::ledger_pending(&key, &reason),
        };

        Ok(Confirmation {
            public_url: public_url(&self.config.public_base_url, key.as_str()),
            key,
            ledger,
        })
    }

    /// Lists the public URL of every recorded upload
    ///
    /// # Errors
    ///
    /// Returns `UploadFlowError::PersistenceFailed` if the ledger cannot be read
    pub async fn list_public_urls(&self) -> UploadFlowResult<Vec<String>> {
        let keys = self
            .within_deadline(self.ledger.list_all())
            .await
            .map_err(UploadFlowError::PersistenceFailed)?
            .map_err(|e| UploadFlowError::PersistenceFailed(e.to_string()))?;

        Ok(keys
            .iter()
            .map(|key| public_url(&self.config.public_base_url, key))
            .collect())
    }

    /// Records every upload present in storage but missing from the ledger
    ///
    /// Storage's own listing is the evidence of presence, so no separate existence check is
    /// made. Individual record failures are counted, not returned.
    ///
    /// # Errors
    ///
    /// - `UploadFlowError::StorageListingFailed` if storage cannot be listed
    /// - `UploadFlowError::PersistenceFailed` if the ledger cannot be read
    pub async fn reconcile(&self) -> UploadFlowResult<ReconcileReport> {
        let stored = self
            .within_deadline(self.authorizer.list_uploaded_keys())
            .await
            .map_err(UploadFlowError::StorageListingFailed)?
            .map_err(|e| UploadFlowError::StorageListingFailed(e.to_string()))?;

        let recorded: HashSet<String> = self
            .within_deadline(self.ledger.list_all())
            .await
            .map_err(UploadFlowError::PersistenceFailed)?
            .map_err(|e| UploadFlowError::PersistenceFailed(e.to_string()))?
            .into_iter()
            .collect();

        let mut report = ReconcileReport {
            scanned: stored.len(),
            ..ReconcileReport::default()
        };

        for key in stored.iter().filter(|k| !recorded.contains(k.as_str())) {
            match self.within_deadline(self.ledger.record(key.as_str())).await {
                Ok(Ok(_)) => {
                    info!("Reconciled unrecorded upload {key}");
                    report.recorded += 1;
                }
                Ok(Err(e)) => {
                    warn!("Failed to reconcile upload {key}: {e}");
                    report.failed += 1;
                }
                Err(reason) => {
                    warn!("Failed to reconcile upload {key}: {reason}");
                    report.failed += 1;
                }
            }
        }

        counter!(RECONCILE_RECORDED_METRIC).increment(report.recorded as u64);
        counter!(RECONCILE_FAILED_METRIC).increment(report.failed as u64);

        Ok(report)
    }

    fn ledger_pending(key: &StorageKey, reason: &str) -> LedgerStatus {
        error!("Upload {key} is in storage but could not be recorded: {reason}");
        counter!(LEDGER_PENDING_METRIC).increment(1);
        LedgerStatus::Pending
    }

    async fn verify_with_retry(&self, key: &StorageKey) -> UploadFlowResult<()> {
        let policy = self.config.verify_retry;
        let attempts = policy.max_attempts.max(1);
        let mut last_failure = None;

        for attempt in 1..=attempts {
            match self.within_deadline(self.authorizer.verify_exists(key)).await {
                Ok(Ok(true)) => {
                    debug!("Verified {key} on attempt {attempt}");
                    return Ok(());
                }
                Ok(Ok(false)) => {
                    debug!("{key} not found on attempt {attempt}/{attempts}");
                    last_failure = None;
                }
                Ok(Err(e)) => {
                    warn!("Existence check for {key} failed on attempt {attempt}/{attempts}: {e}");
                    last_failure = Some(e.to_string());
                }
                Err(reason) => {
                    warn!("Existence check for {key} failed on attempt {attempt}/{attempts}: {reason}");
                    last_failure = Some(reason);
                }
            }

            if attempt < attempts {
                sleep(policy.backoff(attempt)).await;
            }
        }

        Err(match last_failure {
            Some(reason) => UploadFlowError::VerificationIndeterminate {
                key: key.to_string(),
                reason,
            },
            None => UploadFlowError::NotFound(key.to_string()),
        })
    }

    /// Runs `fut` under the backend deadline; the error is a description of the timeout
    async fn within_deadline<F: Future>(&self, fut: F) -> Result<F::Output, String> {
        timeout(self.config.backend_timeout, fut)
            .await
            .map_err(|_| format!("timed out after {:?}", self.config.backend_timeout))
    }
}
