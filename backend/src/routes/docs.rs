use aide::{axum::ApiRouter, openapi::OpenApi, scalar::Scalar};
use axum::{response::IntoResponse, routing::get, Extension, Json};

/// Interactive docs and the raw `OpenAPI` document; only mounted where docs are shown
pub fn handler() -> ApiRouter {
    let scalar = Scalar::new("/openapi.json").with_title("Upload Service Docs");

    ApiRouter::new()
        .route("/docs", scalar.axum_route())
        .route("/openapi.json", get(openapi_schema))
}

#[allow(clippy::unused_async)]
async fn openapi_schema(Extension(openapi): Extension<OpenApi>) -> impl IntoResponse {
    Json(openapi).into_response()
}
