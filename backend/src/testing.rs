//! In-memory doubles for object storage and the upload ledger
//!
//! Both record how often they are called so tests can assert which backends a request
//! touched. The object store also simulates storage-side enforcement of presigned writes and
//! delayed read-after-write visibility. Either can be made to hang so deadlines fire.
//! [`CounterRecorder`] captures `metrics` counters emitted while it is installed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{
    Counter, CounterFn, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit,
};
use thiserror::Error;
use upload_storage::uploaded_image::{
    UploadLedger, UploadLedgerError, UploadLedgerResult, UploadRecord,
};

use crate::media_storage::{BucketError, BucketResult, ObjectStore};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Never resolves while `flag` is set
async fn hang_if(flag: &AtomicBool) {
    if flag.load(Ordering::SeqCst) {
        std::future::pending::<()>().await;
    }
}

/// Why the fake storage refused a presigned write
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PutRejection {
    /// URL was never issued by this store
    #[error("unknown presigned url")]
    UnknownUrl,
    /// Write attempted after the authorization expired
    #[error("presigned url expired")]
    Expired,
    /// Write carried a different content type than the one signed
    #[error("content type does not match signature")]
    ContentTypeMismatch,
}

#[derive(Debug, Clone)]
struct Grant {
    key: String,
    content_type: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    /// Existence probes that still report the object as absent
    hidden_for_probes: usize,
}

#[derive(Debug, Default)]
struct StoreState {
    grants: HashMap<String, Grant>,
    objects: HashMap<String, StoredObject>,
    next_grant: u64,
}

/// Object store kept in process memory
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    state: Mutex<StoreState>,
    visibility_delay: usize,
    fail_presign: AtomicBool,
    hang_presign: AtomicBool,
    hang_exists_checks: AtomicBool,
    failing_exists_checks: AtomicUsize,
    presign_calls: AtomicUsize,
    exists_calls: AtomicUsize,
    list_calls: AtomicUsize,
}

impl InMemoryObjectStore {
    /// Store where writes are visible immediately
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store where each new object stays invisible for the first `probes` existence checks
    #[must_use]
    pub fn with_visibility_delay(probes: usize) -> Self {
        Self {
            visibility_delay: probes,
            ..Self::default()
        }
    }

    /// Performs a client write through a presigned URL at instant `at`
    ///
    /// # Errors
    ///
    /// Returns `PutRejection` when the URL is unknown, expired, or signed for another
    /// content type
    pub fn put_with_url(
        &self,
        url: &str,
        content_type: &str,
        at: DateTime<Utc>,
    ) -> Result<(), PutRejection> {
        let mut state = lock(&self.state);
        let grant = state
            .grants
            .get(url)
            .cloned()
            .ok_or(PutRejection::UnknownUrl)?;

        if at > grant.expires_at {
            return Err(PutRejection::Expired);
        }
        if content_type != grant.content_type {
            return Err(PutRejection::ContentTypeMismatch);
        }

        state.objects.insert(
            grant.key,
            StoredObject {
                hidden_for_probes: self.visibility_delay,
            },
        );
        Ok(())
    }

    /// Places an object directly, bypassing authorization
    pub fn insert_object(&self, key: &str) {
        lock(&self.state).objects.insert(
            key.to_string(),
            StoredObject {
                hidden_for_probes: self.visibility_delay,
            },
        );
    }

    /// Makes subsequent presign calls fail
    pub fn fail_presign(&self, fail: bool) {
        self.fail_presign.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent presign calls never complete
    pub fn hang_presign(&self, hang: bool) {
        self.hang_presign.store(hang, Ordering::SeqCst);
    }

    /// Makes subsequent existence checks never complete
    pub fn hang_exists_checks(&self, hang: bool) {
        self.hang_exists_checks.store(hang, Ordering::SeqCst);
    }

    /// Makes the next `count` existence checks fail
    pub fn fail_next_exists_checks(&self, count: usize) {
        self.failing_exists_checks.store(count, Ordering::SeqCst);
    }

    /// Number of presign calls
    #[must_use]
    pub fn presign_calls(&self) -> usize {
        self.presign_calls.load(Ordering::SeqCst)
    }

    /// Number of existence checks
    #[must_use]
    pub fn exists_calls(&self) -> usize {
        self.exists_calls.load(Ordering::SeqCst)
    }

    /// Number of calls of any kind
    #[must_use]
    pub fn interactions(&self) -> usize {
        self.presign_calls() + self.exists_calls() + self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn presign_put(
        &self,
        key: &str,
        content_type: &str,
        ttl: Duration,
    ) -> BucketResult<String> {
        self.presign_calls.fetch_add(1, Ordering::SeqCst);
        hang_if(&self.hang_presign).await;

        if self.fail_presign.load(Ordering::SeqCst) {
            return Err(BucketError::AwsError("simulated signing failure".to_string()));
        }

        let expires_at = Utc::now() + ttl;
        let mut state = lock(&self.state);
        state.next_grant += 1;
        let url = format!(
            "memory://uploads-bucket/{key}?grant={}&expires={}",
            state.next_grant,
            expires_at.timestamp()
        );
        state.grants.insert(
            url.clone(),
            Grant {
                key: key.to_string(),
                content_type: content_type.to_string(),
                expires_at,
            },
        );

        Ok(url)
    }

    async fn object_exists(&self, key: &str) -> BucketResult<bool> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        hang_if(&self.hang_exists_checks).await;

        let failing = self
            .failing_exists_checks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(BucketError::UpstreamError(
                "simulated storage outage".to_string(),
            ));
        }

        let mut state = lock(&self.state);
        Ok(match state.objects.get_mut(key) {
            Some(object) if object.hidden_for_probes > 0 => {
                object.hidden_for_probes -= 1;
                false
            }
            Some(_) => true,
            None => false,
        })
    }

    async fn list_keys(&self, prefix: &str) -> BucketResult<Vec<String>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        let mut keys: Vec<String> = lock(&self.state)
            .objects
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// Upload ledger kept in process memory
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    records: Mutex<Vec<UploadRecord>>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    hang_writes: AtomicBool,
    hang_reads: AtomicBool,
    record_calls: AtomicUsize,
}

impl InMemoryLedger {
    /// Empty ledger
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent `record` calls fail
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent `list_all` calls fail
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent `record` calls never complete
    pub fn hang_writes(&self, hang: bool) {
        self.hang_writes.store(hang, Ordering::SeqCst);
    }

    /// Makes subsequent `list_all` calls never complete
    pub fn hang_reads(&self, hang: bool) {
        self.hang_reads.store(hang, Ordering::SeqCst);
    }

    /// Number of `record` calls, failed ones included
    #[must_use]
    pub fn record_calls(&self) -> usize {
        self.record_calls.load(Ordering::SeqCst)
    }

    /// Snapshot of every persisted record
    #[must_use]
    pub fn records(&self) -> Vec<UploadRecord> {
        lock(&self.records).clone()
    }
}

#[async_trait]
impl UploadLedger for InMemoryLedger {
    async fn record(&self, image_key: &str) -> UploadLedgerResult<UploadRecord> {
        self.record_calls.fetch_add(1, Ordering::SeqCst);
        hang_if(&self.hang_writes).await;

        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(UploadLedgerError::Unavailable(
                "simulated ledger outage".to_string(),
            ));
        }

        let mut records = lock(&self.records);
        if let Some(existing) = records.iter().find(|r| r.image_key == image_key) {
            return Ok(existing.clone());
        }

        let record = UploadRecord {
            id: uuid::Uuid::new_v4().to_string(),
            image_key: image_key.to_string(),
            created_at: Utc::now().timestamp(),
        };
        records.push(record.clone());
        Ok(record)
    }

    async fn list_all(&self) -> UploadLedgerResult<Vec<String>> {
        hang_if(&self.hang_reads).await;

        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(UploadLedgerError::Unavailable(
                "simulated ledger outage".to_string(),
            ));
        }

        Ok(lock(&self.records)
            .iter()
            .map(|r| r.image_key.clone())
            .collect())
    }
}

type CounterValues = Arc<Mutex<HashMap<String, u64>>>;

/// Recorder that keeps counter totals by name; gauges and histograms are dropped
///
/// Install it for the current thread with [`metrics::set_default_local_recorder`].
#[derive(Debug, Default, Clone)]
pub struct CounterRecorder {
    counters: CounterValues,
}

impl CounterRecorder {
    /// Empty recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total of the named counter, zero if never incremented
    #[must_use]
    pub fn counter(&self, name: &str) -> u64 {
        lock(&self.counters).get(name).copied().unwrap_or(0)
    }
}

struct CounterHandle {
    name: String,
    counters: CounterValues,
}

impl CounterFn for CounterHandle {
    fn increment(&self, value: u64) {
        *lock(&self.counters).entry(self.name.clone()).or_default() += value;
    }

    fn absolute(&self, value: u64) {
        lock(&self.counters).insert(self.name.clone(), value);
    }
}

impl Recorder for CounterRecorder {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {
    }

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        Counter::from_arc(Arc::new(CounterHandle {
            name: key.name().to_string(),
            counters: Arc::clone(&self.counters),
        }))
    }

    fn register_gauge(&self, _key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        Gauge::noop()
    }

    fn register_histogram(&self, _key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        Histogram::noop()
    }
}
