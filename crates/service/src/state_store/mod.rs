//! State store bootstrap.
//!
//! The orchestrator keeps its state in a document database. At startup a
//! client is created from the configured endpoint and key, and the database
//! is created if it does not exist yet. Failing to connect never stops the
//! server: the error is logged and the server runs without a state store.

pub mod cosmos;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use configs::StateStoreConfig;
use thiserror::Error;
use tracing::{debug, info};

pub use cosmos::CosmosClient;
pub use memory::MemoryDocumentDb;

#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("state store not configured")]
    NotConfigured,
    #[error("invalid state store key: {0}")]
    InvalidKey(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseStatus {
    Created,
    AlreadyExists,
}

#[async_trait]
pub trait DocumentDbClient: Send + Sync {
    fn endpoint(&self) -> &str;
    async fn create_database_if_not_exists(&self, id: &str) -> Result<DatabaseStatus, StateStoreError>;
    async fn database_exists(&self, id: &str) -> Result<bool, StateStoreError>;
}

pub type SharedDocumentDb = Arc<dyn DocumentDbClient>;

const MEMORY_SCHEME: &str = "memory://";

/// Build a client for the configured endpoint, verifying it is reachable.
pub async fn open_client(cfg: &StateStoreConfig) -> Result<SharedDocumentDb, StateStoreError> {
    if !cfg.is_configured() {
        return Err(StateStoreError::NotConfigured);
    }
    if cfg.endpoint.trim().to_lowercase().starts_with(MEMORY_SCHEME) {
        return Ok(Arc::new(MemoryDocumentDb::new(cfg.endpoint.trim())));
    }
    let client = CosmosClient::connect(cfg).await?;
    Ok(Arc::new(client))
}

/// Open the state store, logging and swallowing any failure.
pub async fn connect_to_db(cfg: &StateStoreConfig) -> Option<SharedDocumentDb> {
    debug!(endpoint = %cfg.endpoint, "connecting to state store");
    match open_client(cfg).await {
        Ok(client) => {
            debug!("state store connection established");
            Some(client)
        }
        Err(e) => {
            debug!(error = %e, "connection to state store could not be established");
            None
        }
    }
}

/// Ensure the database exists. Without a client this is a no-op.
pub async fn bootstrap_database(
    client: Option<&SharedDocumentDb>,
    database: &str,
) -> Result<Option<DatabaseStatus>, StateStoreError> {
    let Some(client) = client else {
        return Ok(None);
    };
    let status = client.create_database_if_not_exists(database).await?;
    info!(%database, ?status, endpoint = client.endpoint(), "state store database ready");
    Ok(Some(status))
}
