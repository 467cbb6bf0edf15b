use async_trait::async_trait;
use object_store::path::Path as ObjectPath;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::DEFAULT_STORE_TIMEOUT_SECS;
use crate::domain::DataRecord;
use crate::error::StoreError;
use crate::object_client::{with_timeout, StoreLocation};

/// Persists the typed rows of a datasource under its collection id.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Writes every record or none of them.
    async fn insert_records(
        &self,
        collection_id: &str,
        records: &[DataRecord],
    ) -> Result<(), StoreError>;

    /// Records in insertion order; empty when the collection does not exist.
    async fn fetch_records(&self, collection_id: &str) -> Result<Vec<DataRecord>, StoreError>;
}

/// Writes each collection as newline-delimited JSON in a single object, so a
/// failed upload never leaves a partial collection behind.
#[derive(Debug, Clone)]
pub struct ObjectDataStore {
    location: StoreLocation,
    timeout: Duration,
}

impl ObjectDataStore {
    pub fn new(location: StoreLocation) -> Self {
        Self {
            location,
            timeout: Duration::from_secs(DEFAULT_STORE_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn records_path(&self, collection_id: &str) -> ObjectPath {
        self.location
            .prefix
            .child("collections")
            .child(collection_id)
            .child("records.jsonl")
    }
}

#[async_trait]
impl DataStore for ObjectDataStore {
    async fn insert_records(
        &self,
        collection_id: &str,
        records: &[DataRecord],
    ) -> Result<(), StoreError> {
        let mut buffer = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buffer, record)?;
            buffer.push(b'\n');
        }

        let path = self.records_path(collection_id);
        info!(
            "Writing {} records ({} bytes) to {}",
            records.len(),
            buffer.len(),
            path
        );

        with_timeout(self.timeout, "insert records", async {
            self.location.store.put(&path, buffer.into()).await?;
            Ok(())
        })
        .await
    }

    async fn fetch_records(&self, collection_id: &str) -> Result<Vec<DataRecord>, StoreError> {
        let path = self.records_path(collection_id);
        let bytes = with_timeout(self.timeout, "fetch records", async {
            match self.location.store.get(&path).await {
                Ok(result) => Ok(Some(result.bytes().await?)),
                Err(object_store::Error::NotFound { .. }) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await?;

        let Some(bytes) = bytes else {
            debug!("Collection {} has no records", collection_id);
            return Ok(Vec::new());
        };

        bytes
            .split(|byte| *byte == b'\n')
            .filter(|line| !line.is_empty())
            .map(|line| serde_json::from_slice(line).map_err(StoreError::from))
            .collect()
    }
}
