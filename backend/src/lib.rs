//! Direct-to-storage image upload service

#![deny(clippy::all, clippy::pedantic, clippy::nursery)]

/// Object storage access and upload authorization
pub mod media_storage;

/// Background reconciliation of storage and ledger
pub mod reconciler;

/// HTTP routes
pub mod routes;

/// HTTP server startup
pub mod server;

/// Shared types: environment, errors, extractors
pub mod types;

/// Begin / confirm orchestration
pub mod upload_flow;

/// Storage key allocation and parsing
pub mod upload_key;

/// In-memory collaborators for tests
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
