use std::sync::Arc;

use aws_sdk_dynamodb::Client as DynamoDbClient;
use aws_sdk_s3::Client as S3Client;
use metrics_exporter_dogstatsd::DogStatsDBuilder;
use tracing_subscriber::{fmt, EnvFilter};

use upload_backend::{
    media_storage::{MediaStorage, UploadAuthorizer},
    server,
    types::Environment,
    upload_flow::UploadCoordinator,
};
use upload_storage::uploaded_image::UploadedImageStorage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let environment = Environment::from_env();

    let filter = EnvFilter::builder()
        .with_default_directive(environment.tracing_level().into())
        .from_env_lossy();

    // JSON logs for staging/production, human-readable for development
    match environment {
        Environment::Production | Environment::Staging => {
            fmt().json().with_env_filter(filter).init();
        }
        Environment::Development { .. } => {
            fmt().with_env_filter(filter).init();
        }
    }

    tracing::info!("Starting upload service in {environment:?} environment");

    // Ledger inconsistencies are alerted on through these counters
    if let Some(address) = environment.dogstatsd_address() {
        DogStatsDBuilder::default()
            .with_remote_address(&address)?
            .install()?;
        tracing::info!("✅ Initialized DogStatsD metrics at {address}");
    }

    let s3_client = Arc::new(S3Client::from_conf(environment.s3_client_config().await));
    let dynamodb_client = Arc::new(DynamoDbClient::new(&environment.aws_config().await));

    let media_storage = Arc::new(MediaStorage::new(s3_client, environment.s3_bucket()));
    let ledger = Arc::new(UploadedImageStorage::new(
        dynamodb_client,
        environment.uploaded_images_table_name(),
    ));

    let coordinator = Arc::new(UploadCoordinator::new(
        UploadAuthorizer::new(media_storage),
        ledger,
        environment.upload_flow_config(),
    ));

    server::start(environment, coordinator).await
}
