use std::time::Duration;

use axum::response::Response;
use http_body_util::BodyExt;
use upload_backend::upload_flow::{UploadFlowConfig, VerifyRetryPolicy};

pub const CDN_URL: &str = "https://cdn.example.com";

/// Parse response body to JSON
pub async fn parse_response_body(response: Response) -> serde_json::Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

/// Flow configuration with short retry pauses so tests stay fast
pub fn fast_flow_config() -> UploadFlowConfig {
    UploadFlowConfig {
        backend_timeout: Duration::from_millis(500),
        verify_retry: VerifyRetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
        },
        ..UploadFlowConfig::new(CDN_URL)
    }
}
