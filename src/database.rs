use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use object_store::path::Path as ObjectPath;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::catalog::{new_datasource_id, MetadataStore};
use crate::config::DEFAULT_STORE_TIMEOUT_SECS;
use crate::domain::{DatasourceMetadata, NewDatasourceMetadata};
use crate::error::StoreError;
use crate::object_client::{with_timeout, StoreLocation};

/// Keeps one `metadata/<id>.json` document per datasource.
#[derive(Debug, Clone)]
pub struct ObjectMetadataStore {
    location: StoreLocation,
    timeout: Duration,
}

impl ObjectMetadataStore {
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

    fn metadata_dir(&self) -> ObjectPath {
        self.location.prefix.child("metadata")
    }

    fn metadata_path(&self, id: &str) -> ObjectPath {
        self.metadata_dir().child(format!("{}.json", id))
    }

    async fn discard(&self, path: &ObjectPath) {
        let removed = with_timeout(self.timeout, "discard metadata", async {
            match self.location.store.delete(path).await {
                Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
        .await;
        if let Err(e) = removed {
            warn!("Failed to discard partial metadata at {}: {}", path, e);
        }
    }

    async fn read_metadata(
        &self,
        path: &ObjectPath,
    ) -> Result<Option<DatasourceMetadata>, StoreError> {
        match self.location.store.get(path).await {
            Ok(result) => {
                let bytes = result.bytes().await?;
                Ok(Some(serde_json::from_slice(&bytes)?))
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl MetadataStore for ObjectMetadataStore {
    async fn insert_metadata(&self, metadata: &NewDatasourceMetadata) -> Result<String, StoreError> {
        let entry = DatasourceMetadata {
            id: new_datasource_id(),
            name: metadata.name.clone(),
            schema: metadata.schema.clone(),
            created_at: Utc::now(),
        };
        let payload = serde_json::to_vec(&entry)?;
        let path = self.metadata_path(&entry.id);

        info!("Adding datasource {} to catalog as {}", entry.name, entry.id);
        let written = with_timeout(self.timeout, "insert metadata", async {
            self.location.store.put(&path, payload.into()).await?;
            Ok(())
        })
        .await;

        // A put that timed out or failed may still have landed.
        if let Err(e) = written {
            self.discard(&path).await;
            return Err(e);
        }

        Ok(entry.id)
    }

    async fn delete_metadata(&self, id: &str) -> Result<(), StoreError> {
        let path = self.metadata_path(id);
        with_timeout(self.timeout, "delete metadata", async {
            match self.location.store.delete(&path).await {
                Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
        .await?;

        info!("Removed datasource {} from catalog", id);
        Ok(())
    }

    async fn get_metadata(&self, id: &str) -> Result<Option<DatasourceMetadata>, StoreError> {
        let path = self.metadata_path(id);
        with_timeout(self.timeout, "get metadata", self.read_metadata(&path)).await
    }

    async fn list_metadata(&self) -> Result<Vec<DatasourceMetadata>, StoreError> {
        let dir = self.metadata_dir();
        with_timeout(self.timeout, "list metadata", async {
            let objects: Vec<_> = self.location.store.list(Some(&dir)).try_collect().await?;

            let mut entries = Vec::with_capacity(objects.len());
            for object in objects {
                if object.location.extension() != Some("json") {
                    continue;
                }
                if let Some(entry) = self.read_metadata(&object.location).await? {
                    entries.push(entry);
                }
            }
            entries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));

            debug!("Loaded {} datasources from catalog", entries.len());
            Ok(entries)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ColumnType, InferredSchema};
    use futures::stream::BoxStream;
    use object_store::memory::InMemory;
    use object_store::{
        GetOptions, GetResult, ListResult, MultipartUpload, ObjectMeta, ObjectStore,
        PutMultipartOptions, PutOptions, PutPayload, PutResult,
    };
    use std::sync::Arc;

    fn new_metadata(name: &str) -> NewDatasourceMetadata {
        let schema: InferredSchema = [("hour", ColumnType::Number), ("label", ColumnType::String)]
            .into_iter()
            .collect();
        NewDatasourceMetadata {
            name: name.to_string(),
            schema,
        }
    }

    #[tokio::test]
    async fn insert_then_get() {
        let store = ObjectMetadataStore::new(StoreLocation::in_memory());

        let id = store.insert_metadata(&new_metadata("test.csv")).await.unwrap();
        let entry = store.get_metadata(&id).await.unwrap().unwrap();

        assert_eq!(entry.id, id);
        assert_eq!(entry.name, "test.csv");
        assert_eq!(entry.schema, new_metadata("test.csv").schema);
    }

    #[tokio::test]
    async fn each_insert_gets_a_new_id() {
        let store = ObjectMetadataStore::new(StoreLocation::in_memory());
        let first = store.insert_metadata(&new_metadata("a.csv")).await.unwrap();
        let second = store.insert_metadata(&new_metadata("a.csv")).await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = ObjectMetadataStore::new(StoreLocation::in_memory());
        let id = store.insert_metadata(&new_metadata("test.csv")).await.unwrap();

        store.delete_metadata(&id).await.unwrap();
        store.delete_metadata(&id).await.unwrap();
        store.delete_metadata("ds_never_existed").await.unwrap();

        assert!(store.get_metadata(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_is_idempotent_on_local_disk() {
        let dir = tempfile::tempdir().unwrap();
        let url = url::Url::from_directory_path(dir.path()).unwrap();
        let location = crate::object_client::build_object_store(url.as_str()).unwrap();
        let store = ObjectMetadataStore::new(location);

        let id = store.insert_metadata(&new_metadata("test.csv")).await.unwrap();
        store.delete_metadata(&id).await.unwrap();
        store.delete_metadata(&id).await.unwrap();
    }

    #[tokio::test]
    async fn list_returns_newest_first() {
        let store = ObjectMetadataStore::new(StoreLocation::in_memory());
        let older = store.insert_metadata(&new_metadata("old.csv")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let newer = store.insert_metadata(&new_metadata("new.csv")).await.unwrap();

        let ids: Vec<_> = store
            .list_metadata()
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.id)
            .collect();
        assert_eq!(ids, vec![newer, older]);
    }

    /// Commits every put, then never answers.
    #[derive(Debug, Default)]
    struct StalledAfterWrite {
        inner: InMemory,
    }

    impl std::fmt::Display for StalledAfterWrite {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "StalledAfterWrite")
        }
    }

    #[async_trait]
    impl ObjectStore for StalledAfterWrite {
        async fn put_opts(
            &self,
            location: &ObjectPath,
            payload: PutPayload,
            opts: PutOptions,
        ) -> object_store::Result<PutResult> {
            self.inner.put_opts(location, payload, opts).await?;
            std::future::pending().await
        }

        async fn put_multipart_opts(
            &self,
            location: &ObjectPath,
            opts: PutMultipartOptions,
        ) -> object_store::Result<Box<dyn MultipartUpload>> {
            self.inner.put_multipart_opts(location, opts).await
        }

        async fn get_opts(
            &self,
            location: &ObjectPath,
            options: GetOptions,
        ) -> object_store::Result<GetResult> {
            self.inner.get_opts(location, options).await
        }

        async fn delete(&self, location: &ObjectPath) -> object_store::Result<()> {
            self.inner.delete(location).await
        }

        fn list(
            &self,
            prefix: Option<&ObjectPath>,
        ) -> BoxStream<'static, object_store::Result<ObjectMeta>> {
            self.inner.list(prefix)
        }

        async fn list_with_delimiter(
            &self,
            prefix: Option<&ObjectPath>,
        ) -> object_store::Result<ListResult> {
            self.inner.list_with_delimiter(prefix).await
        }

        async fn copy(&self, from: &ObjectPath, to: &ObjectPath) -> object_store::Result<()> {
            self.inner.copy(from, to).await
        }

        async fn copy_if_not_exists(
            &self,
            from: &ObjectPath,
            to: &ObjectPath,
        ) -> object_store::Result<()> {
            self.inner.copy_if_not_exists(from, to).await
        }
    }

    #[tokio::test]
    async fn timed_out_insert_leaves_no_metadata() {
        let location = StoreLocation {
            store: Arc::new(StalledAfterWrite::default()),
            prefix: ObjectPath::default(),
        };
        let store = ObjectMetadataStore::new(location).with_timeout(Duration::from_millis(50));

        let err = store
            .insert_metadata(&new_metadata("slow.csv"))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Timeout { .. }));
        assert!(store.list_metadata().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_of_empty_catalog() {
        let store = ObjectMetadataStore::new(StoreLocation::in_memory());
        assert!(store.list_metadata().await.unwrap().is_empty());
    }
}
