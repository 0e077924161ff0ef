mod docs;
mod health;
pub mod uploads;

use aide::axum::{
    routing::{get, post},
    ApiRouter,
};

use crate::types::Environment;

/// Creates the router with all handler routes
pub fn handler(environment: &Environment) -> ApiRouter {
    let router = ApiRouter::new()
        .api_route("/health", get(health::handler))
        .api_route("/prepare-upload", post(uploads::prepare_upload))
        .api_route("/upload-confirm", post(uploads::upload_confirm))
        .api_route("/get-uploaded-images", get(uploads::get_uploaded_images));

    if environment.show_api_docs() {
        router.merge(docs::handler())
    } else {
        router
    }
}
