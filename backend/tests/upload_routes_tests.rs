mod common;

use axum::http::StatusCode;
use chrono::Utc;
use common::*;
use serde_json::json;

async fn prepare_upload(setup: &TestSetup) -> serde_json::Value {
    let response = setup
        .send_post_request("/prepare-upload", json!({ "file_extension": ".jpeg" }))
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::OK);
    parse_response_body(response).await
}

#[tokio::test]
async fn test_prepare_upload_success() {
    let setup = TestSetup::new();

    let body = prepare_upload(&setup).await;

    let key = body["key"].as_str().unwrap();
    assert!(key.starts_with("uploads/"));
    assert!(key.ends_with(".jpeg"));
    assert!(body["presigned_url"].as_str().unwrap().contains(key));
    assert_eq!(body["content_type"], "image/jpeg");
    assert!(body["expires_at"].is_string());
}

#[tokio::test]
async fn test_prepare_upload_unsupported_extension() {
    let setup = TestSetup::new();

    let response = setup
        .send_post_request("/prepare-upload", json!({ "file_extension": ".png" }))
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = parse_response_body(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "invalid_request");
    assert_eq!(body["allowRetry"], false);
    assert_eq!(setup.store.interactions(), 0);
}

#[tokio::test]
async fn test_prepare_upload_content_type_mismatch() {
    let setup = TestSetup::new();

    let response = setup
        .send_post_request(
            "/prepare-upload",
            json!({ "file_extension": ".jpeg", "content_type": "image/png" }),
        )
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(setup.store.interactions(), 0);
}

#[tokio::test]
async fn test_prepare_upload_malformed_body() {
    let setup = TestSetup::new();

    let cases = [
        "{\"file_ext\": \".jpeg\"}".to_string(),
        "not json".to_string(),
        json!({ "file_extension": "" }).to_string(),
    ];

    for body in cases {
        let response = setup
            .send_raw_post_request("/prepare-upload", body.clone())
            .await
            .expect("Failed to send request");

        assert_eq!(
            response.status(),
            StatusCode::BAD_REQUEST,
            "body {body:?} should be rejected"
        );
        let json = parse_response_body(response).await;
        assert_eq!(json["success"], false);
    }
}

#[tokio::test]
async fn test_prepare_upload_signing_failure() {
    let setup = TestSetup::new();
    setup.store.fail_presign(true);

    let response = setup
        .send_post_request("/prepare-upload", json!({ "file_extension": ".jpeg" }))
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = parse_response_body(response).await;
    assert_eq!(body["error"], "Failed to generate pre-signed URL");
    assert_eq!(body["allowRetry"], true);
}

#[tokio::test]
async fn test_upload_confirm_nonexistent_key() {
    let setup = TestSetup::new();

    let response = setup
        .send_post_request(
            "/upload-confirm",
            json!({ "key": "uploads/nonexistent.jpeg" }),
        )
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = parse_response_body(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "not found");
    assert!(setup.ledger.records().is_empty());
}

#[tokio::test]
async fn test_upload_confirm_after_upload() {
    let setup = TestSetup::new();

    let prepared = prepare_upload(&setup).await;
    let key = prepared["key"].as_str().unwrap();
    setup
        .store
        .put_with_url(
            prepared["presigned_url"].as_str().unwrap(),
            "image/jpeg",
            Utc::now(),
        )
        .unwrap();

    let response = setup
        .send_post_request("/upload-confirm", json!({ "key": key }))
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_response_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["url"], format!("{CDN_URL}/{key}"));
    assert_eq!(body["status"], "file uploaded successfully");

    let response = setup
        .send_get_request("/get-uploaded-images")
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_response_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["images"], json!([format!("{CDN_URL}/{key}")]));
}

#[tokio::test]
async fn test_upload_confirm_succeeds_when_ledger_is_down() {
    let setup = TestSetup::new();
    setup.store.insert_object("uploads/landed.jpeg");
    setup.ledger.fail_writes(true);

    let response = setup
        .send_post_request("/upload-confirm", json!({ "key": "uploads/landed.jpeg" }))
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_response_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["url"], format!("{CDN_URL}/uploads/landed.jpeg"));
    assert_ne!(body["status"], "file uploaded successfully");
}

#[tokio::test]
async fn test_upload_confirm_storage_outage() {
    let setup = TestSetup::new();
    setup.store.insert_object("uploads/landed.jpeg");
    setup.store.fail_next_exists_checks(10);

    let response = setup
        .send_post_request("/upload-confirm", json!({ "key": "uploads/landed.jpeg" }))
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = parse_response_body(response).await;
    assert_eq!(body["allowRetry"], true);
}

#[tokio::test]
async fn test_upload_confirm_invalid_key() {
    let setup = TestSetup::new();

    let response = setup
        .send_post_request("/upload-confirm", json!({ "key": "../secrets.jpeg" }))
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(setup.store.interactions(), 0);
}

#[tokio::test]
async fn test_get_uploaded_images_empty() {
    let setup = TestSetup::new();

    let response = setup
        .send_get_request("/get-uploaded-images")
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_response_body(response).await;
    assert_eq!(body, json!({ "success": true, "images": [] }));
}

#[tokio::test]
async fn test_get_uploaded_images_ledger_failure() {
    let setup = TestSetup::new();
    setup.ledger.fail_reads(true);

    let response = setup
        .send_get_request("/get-uploaded-images")
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = parse_response_body(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "failed to get images");
}

#[tokio::test]
async fn test_health() {
    let setup = TestSetup::new();

    let response = setup
        .send_get_request("/health")
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::OK);
    let body = parse_response_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["semver"], env!("CARGO_PKG_VERSION"));
}
