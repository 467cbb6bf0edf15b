use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{DatasourceMetadata, NewDatasourceMetadata};
use crate::error::StoreError;

/// Generates the opaque identifier handed out for a new datasource.
pub fn new_datasource_id() -> String {
    format!("ds_{}", Uuid::new_v4().simple())
}

/// Records the name and inferred schema of every uploaded datasource.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Stores the metadata and returns the identifier the records are grouped
    /// under. Either succeeds fully or leaves nothing behind.
    async fn insert_metadata(&self, metadata: &NewDatasourceMetadata) -> Result<String, StoreError>;

    /// Removes the metadata. Unknown ids are not an error.
    async fn delete_metadata(&self, id: &str) -> Result<(), StoreError>;

    async fn get_metadata(&self, id: &str) -> Result<Option<DatasourceMetadata>, StoreError>;

    /// All datasources, newest first.
    async fn list_metadata(&self) -> Result<Vec<DatasourceMetadata>, StoreError>;
}
