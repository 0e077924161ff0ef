//! Environment configuration for different deployment stages

use std::env;
use std::time::Duration;

use aws_config::{retry::RetryConfig, timeout::TimeoutConfig, BehaviorVersion};
use tracing::Level;

use crate::media_storage::MAX_UPLOAD_TTL;
use crate::upload_flow::{UploadFlowConfig, VerifyRetryPolicy};

const LOCALSTACK_ENDPOINT: &str = "http://localhost:4566";

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|val| val.trim().parse::<T>().ok())
}

/// Application environment configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    /// Production environment
    Production,
    /// Staging environment
    Staging,
    /// Development environment (uses `LocalStack`)
    Development {
        /// Optional override for presigned URL expiry in seconds
        presign_expiry_override: Option<u64>,
    },
}

impl Environment {
    /// Creates an Environment from the `APP_ENV` environment variable
    ///
    /// # Panics
    ///
    /// Panics if `APP_ENV` contains an invalid value, or `PRESIGNED_URL_EXPIRY_SECS` is zero
    #[must_use]
    pub fn from_env() -> Self {
        let env = env::var("APP_ENV")
            .unwrap_or_else(|_| "development".to_string())
            .trim()
            .to_lowercase();

        match env.as_str() {
            "production" => Self::Production,
            "staging" => Self::Staging,
            "development" => {
                let presign_expiry_override = env_parse("PRESIGNED_URL_EXPIRY_SECS");
                assert!(
                    presign_expiry_override != Some(0),
                    "PRESIGNED_URL_EXPIRY_SECS must be positive"
                );
                Self::Development {
                    presign_expiry_override,
                }
            }
            _ => panic!("Invalid environment: {env}"),
        }
    }

    /// Returns the S3 bucket name for the environment
    ///
    /// # Panics
    ///
    /// Panics if the `S3_BUCKET_NAME` environment variable is not set outside development
    #[must_use]
    pub fn s3_bucket(&self) -> String {
        match self {
            Self::Production | Self::Staging => {
                env::var("S3_BUCKET_NAME").expect("S3_BUCKET_NAME environment variable is not set")
            }
            Self::Development { .. } => {
                env::var("S3_BUCKET_NAME").unwrap_or_else(|_| "uploads-bucket".to_string())
            }
        }
    }

    /// Returns the public CDN base URL uploaded images are served from
    ///
    /// # Panics
    ///
    /// Panics if the `CDN_URL` environment variable is not set outside development
    #[must_use]
    pub fn cdn_url(&self) -> String {
        match self {
            Self::Production | Self::Staging => {
                env::var("CDN_URL").expect("CDN_URL environment variable is not set")
            }
            Self::Development { .. } => env::var("CDN_URL")
                .unwrap_or_else(|_| format!("{LOCALSTACK_ENDPOINT}/{}", self.s3_bucket())),
        }
    }

    /// Returns the `DynamoDB` table confirmed uploads are recorded in
    ///
    /// # Panics
    ///
    /// Panics if `UPLOADED_IMAGES_TABLE_NAME` is not set outside development
    #[must_use]
    pub fn uploaded_images_table_name(&self) -> String {
        match self {
            Self::Production | Self::Staging => env::var("UPLOADED_IMAGES_TABLE_NAME")
                .expect("UPLOADED_IMAGES_TABLE_NAME environment variable is not set"),
            Self::Development { .. } => env::var("UPLOADED_IMAGES_TABLE_NAME")
                .unwrap_or_else(|_| "uploaded-images".to_string()),
        }
    }

    /// Whether to show API docs
    #[must_use]
    pub const fn show_api_docs(&self) -> bool {
        matches!(self, Self::Development { .. } | Self::Staging)
    }

    /// Returns the endpoint URL to use for AWS services
    #[must_use]
    pub const fn override_aws_endpoint_url(&self) -> Option<&str> {
        match self {
            // Regular AWS endpoints for production and staging
            Self::Production | Self::Staging => None,
            Self::Development { .. } => Some(LOCALSTACK_ENDPOINT),
        }
    }

    /// AWS configuration with retry and timeout settings
    pub async fn aws_config(&self) -> aws_config::SdkConfig {
        let retry_config = RetryConfig::standard()
            .with_max_attempts(3)
            .with_initial_backoff(Duration::from_millis(50));

        let timeout_config = TimeoutConfig::builder()
            .operation_timeout(Duration::from_secs(30))
            .build();

        let mut config_builder = aws_config::load_defaults(BehaviorVersion::latest())
            .await
            .to_builder()
            .retry_config(retry_config)
            .timeout_config(timeout_config);

        if let Some(endpoint_url) = self.override_aws_endpoint_url() {
            config_builder = config_builder.endpoint_url(endpoint_url);
        }

        config_builder.build()
    }

    /// AWS S3 service configuration
    pub async fn s3_client_config(&self) -> aws_sdk_s3::Config {
        let aws_config = self.aws_config().await;
        let s3_config: aws_sdk_s3::Config = (&aws_config).into();
        let mut builder = s3_config.to_builder();

        // Override "force path style" to true for compatibility with LocalStack
        // https://github.com/awslabs/aws-sdk-rust/discussions/874
        if matches!(self, Self::Development { .. }) {
            builder.set_force_path_style(Some(true));
        }

        builder.build()
    }

    /// Presigned URL expiry time in seconds, capped at the authorizer's maximum
    ///
    /// A zero override is ignored in favour of the maximum.
    #[must_use]
    pub fn presigned_url_expiry_secs(&self) -> u64 {
        let default = MAX_UPLOAD_TTL.as_secs();
        match self {
            Self::Production | Self::Staging => default,
            Self::Development {
                presign_expiry_override,
            } => presign_expiry_override
                .filter(|secs| *secs > 0)
                .map_or(default, |secs| secs.min(default)),
        }
    }

    /// Deadline for each storage or ledger call (`BACKEND_TIMEOUT_MS`, default 5 s)
    #[must_use]
    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(env_parse("BACKEND_TIMEOUT_MS").unwrap_or(5_000))
    }

    /// Existence check retries during confirmation
    #[must_use]
    pub fn verify_retry_policy(&self) -> VerifyRetryPolicy {
        let default = VerifyRetryPolicy::default();
        VerifyRetryPolicy {
            max_attempts: env_parse("VERIFY_MAX_ATTEMPTS").unwrap_or(default.max_attempts),
            initial_backoff: env_parse("VERIFY_INITIAL_BACKOFF_MS")
                .map_or(default.initial_backoff, Duration::from_millis),
        }
    }

    /// Period of the reconciliation sweep; `None` disables it
    #[must_use]
    pub fn reconcile_interval(&self) -> Option<Duration> {
        env_parse::<u64>("RECONCILE_INTERVAL_SECS")
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Upload flow configuration assembled from the settings above
    #[must_use]
    pub fn upload_flow_config(&self) -> UploadFlowConfig {
        UploadFlowConfig {
            authorization_ttl: Duration::from_secs(self.presigned_url_expiry_secs()),
            backend_timeout: self.backend_timeout(),
            verify_retry: self.verify_retry_policy(),
            public_base_url: self.cdn_url(),
        }
    }

    /// DogStatsD agent address (`DD_AGENT_HOST`, `DD_DOGSTATSD_PORT` default 8125); `None`
    /// leaves metrics unexported
    #[must_use]
    pub fn dogstatsd_address(&self) -> Option<String> {
        let host = env::var("DD_AGENT_HOST").ok()?;
        let port = env_parse::<u16>("DD_DOGSTATSD_PORT").unwrap_or(8125);
        Some(format!("{}:{port}", host.trim()))
    }

    /// Default log level when `RUST_LOG` is not set
    #[must_use]
    pub fn tracing_level(&self) -> Level {
        env_parse("TRACING_LEVEL").unwrap_or(match self {
            Self::Production | Self::Staging => Level::INFO,
            Self::Development { .. } => Level::DEBUG,
        })
    }
}
