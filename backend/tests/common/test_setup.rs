use std::sync::Arc;

use axum::{body::Body, http::Request, response::Response, Extension, Router};
use tower::ServiceExt;
use upload_backend::{
    media_storage::UploadAuthorizer,
    routes,
    testing::{InMemoryLedger, InMemoryObjectStore},
    types::Environment,
    upload_flow::{UploadCoordinator, UploadFlowConfig},
};

use super::utils::fast_flow_config;

/// Setup test environment variables and logging
pub fn setup_test_env() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init()
        .ok();
}

/// Upload service wired to in-memory storage and ledger
pub struct TestSetup {
    pub router: Router,
    pub store: Arc<InMemoryObjectStore>,
    pub ledger: Arc<InMemoryLedger>,
    pub coordinator: Arc<UploadCoordinator>,
}

impl TestSetup {
    pub fn new() -> Self {
        Self::with_store(InMemoryObjectStore::new())
    }

    pub fn with_store(store: InMemoryObjectStore) -> Self {
        Self::with_config(store, fast_flow_config())
    }

    pub fn with_config(store: InMemoryObjectStore, config: UploadFlowConfig) -> Self {
        setup_test_env();

        let environment = Environment::Development {
            presign_expiry_override: None,
        };

        let store = Arc::new(store);
        let ledger = Arc::new(InMemoryLedger::new());
        let coordinator = Arc::new(UploadCoordinator::new(
            UploadAuthorizer::new(store.clone()),
            ledger.clone(),
            config,
        ));

        let router = routes::handler(&environment)
            .layer(Extension(environment))
            .layer(Extension(coordinator.clone()))
            .into();

        Self {
            router,
            store,
            ledger,
            coordinator,
        }
    }

    pub async fn send_post_request(
        &self,
        route: &str,
        payload: serde_json::Value,
    ) -> Result<Response, Box<dyn std::error::Error>> {
        self.send_raw_post_request(route, payload.to_string()).await
    }

    pub async fn send_raw_post_request(
        &self,
        route: &str,
        body: String,
    ) -> Result<Response, Box<dyn std::error::Error>> {
        let request = Request::builder()
            .uri(route)
            .method("POST")
            .header("Content-Type", "application/json")
            .body(Body::from(body))?;

        let response = self.router.clone().oneshot(request).await?;
        Ok(response)
    }

    pub async fn send_get_request(
        &self,
        route: &str,
    ) -> Result<Response, Box<dyn std::error::Error>> {
        let request = Request::builder()
            .uri(route)
            .method("GET")
            .body(Body::empty())?;

        let response = self.router.clone().oneshot(request).await?;
        Ok(response)
    }
}
