use std::sync::Arc;
use std::time::Duration;

use aide::openapi::OpenApi;
use axum::{http::StatusCode, Extension};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::reconciler::Reconciler;
use crate::routes;
use crate::{types::Environment, upload_flow::UploadCoordinator};

const DEFAULT_PORT: u16 = 8080;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Starts the server with the given environment and dependencies
///
/// Also runs the reconciliation sweep in the background when one is configured. Both stop
/// on Ctrl+C or SIGTERM.
///
/// # Errors
///
/// Returns an error if the server fails to start or bind to the port
pub async fn start(
    environment: Environment,
    coordinator: Arc<UploadCoordinator>,
) -> anyhow::Result<()> {
    let shutdown_token = CancellationToken::new();

    let reconciler = environment.reconcile_interval().map(|period| {
        tokio::spawn(
            Reconciler::new(coordinator.clone(), period, shutdown_token.clone()).run(),
        )
    });

    let mut openapi = OpenApi::default();

    let router = routes::handler(&environment)
        .finish_api(&mut openapi)
        .layer(Extension(openapi))
        .layer(Extension(environment))
        .layer(Extension(coordinator))
        .layer(TraceLayer::new_for_http())
        .layer(request_timeout_layer(REQUEST_TIMEOUT));

    let addr = std::net::SocketAddr::from((
        [0, 0, 0, 0],
        std::env::var("PORT").map_or(Ok(DEFAULT_PORT), |p| p.parse())?,
    ));

    let listener = TcpListener::bind(&addr).await?;
    info!("🔄 Upload service started on http://{addr}");

    let result = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal(shutdown_token.clone()))
        .await
        .map_err(anyhow::Error::from);

    shutdown_token.cancel();
    if let Some(handle) = reconciler {
        if let Err(e) = handle.await {
            error!("Reconciler task failed: {e}");
        }
    }

    result
}

/// Answers `408 Request Timeout` for requests still running after `timeout`
fn request_timeout_layer(timeout: Duration) -> TimeoutLayer {
    TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, timeout)
}

/// Resolves on Ctrl+C, SIGTERM or cancellation of `shutdown_token`, then cancels the token
/// so the reconciler stops with the server
async fn shutdown_signal(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        () = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
        () = shutdown_token.cancelled() => {}
    }

    shutdown_token.cancel();
}
