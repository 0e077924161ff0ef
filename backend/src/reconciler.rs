//! Periodic sweep that records uploads present in storage but missing from the ledger

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::upload_flow::UploadCoordinator;

/// Runs [`UploadCoordinator::reconcile`] on a fixed interval until cancelled
pub struct Reconciler {
    coordinator: Arc<UploadCoordinator>,
    period: Duration,
    shutdown_token: CancellationToken,
}

impl Reconciler {
    /// Creates a reconciler; the first sweep runs immediately on [`Self::run`]
    #[must_use]
    pub const fn new(
        coordinator: Arc<UploadCoordinator>,
        period: Duration,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self {
            coordinator,
            period,
            shutdown_token,
        }
    }

    /// Sweeps until the shutdown token is cancelled
    pub async fn run(self) {
        info!("Starting upload reconciler every {:?}", self.period);

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.shutdown_token.cancelled() => break,
                _ = ticker.tick() => match self.coordinator.reconcile().await {
                    Ok(report) if report.recorded > 0 || report.failed > 0 => info!(
                        "Reconciliation scanned {} uploads, recorded {}, failed {}",
                        report.scanned, report.recorded, report.failed
                    ),
                    Ok(_) => {}
                    Err(e) => error!("Reconciliation sweep failed: {e}"),
                },
            }
        }

        info!("Upload reconciler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media_storage::UploadAuthorizer;
    use crate::testing::{InMemoryLedger, InMemoryObjectStore};
    use crate::upload_flow::UploadFlowConfig;

    #[tokio::test]
    async fn test_reconciler_records_missing_uploads_until_cancelled() {
        let store = Arc::new(InMemoryObjectStore::new());
        let ledger = Arc::new(InMemoryLedger::new());
        store.insert_object("uploads/orphan.jpeg");

        let coordinator = Arc::new(UploadCoordinator::new(
            UploadAuthorizer::new(store.clone()),
            ledger.clone(),
            UploadFlowConfig::new("https://cdn.example.com"),
        ));
        let shutdown_token = CancellationToken::new();
        let handle = tokio::spawn(
            Reconciler::new(coordinator, Duration::from_millis(10), shutdown_token.clone()).run(),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_token.cancel();
        handle.await.unwrap();

        let records = ledger.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].image_key, "uploads/orphan.jpeg");
    }
}
