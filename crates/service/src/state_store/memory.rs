use async_trait::async_trait;
use dashmap::DashSet;

use super::{DatabaseStatus, DocumentDbClient, StateStoreError};

/// In-process document database used for local runs and tests.
pub struct MemoryDocumentDb {
    endpoint: String,
    databases: DashSet<String>,
}

impl MemoryDocumentDb {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self { endpoint: endpoint.into(), databases: DashSet::new() }
    }
}

#[async_trait]
impl DocumentDbClient for MemoryDocumentDb {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn create_database_if_not_exists(&self, id: &str) -> Result<DatabaseStatus, StateStoreError> {
        if self.databases.insert(id.to_string()) {
            Ok(DatabaseStatus::Created)
        } else {
            Ok(DatabaseStatus::AlreadyExists)
        }
    }

    async fn database_exists(&self, id: &str) -> Result<bool, StateStoreError> {
        Ok(self.databases.contains(id))
    }
}
