use object_store::{
    aws::AmazonS3Builder, gcp::GoogleCloudStorageBuilder, local::LocalFileSystem,
    memory::InMemory, path::Path as ObjectPath, ObjectStore,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use url::Url;

use crate::error::{IngestError, StoreError};

/// An object store together with the key prefix everything is written under.
#[derive(Debug, Clone)]
pub struct StoreLocation {
    pub store: Arc<dyn ObjectStore>,
    pub prefix: ObjectPath,
}

impl StoreLocation {
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(InMemory::new()),
            prefix: ObjectPath::default(),
        }
    }
}

/// Resolves `memory://`, `file:///dir`, `s3://bucket/prefix` and
/// `gs://bucket/prefix` locations.
pub fn build_object_store(location: &str) -> Result<StoreLocation, IngestError> {
    let url = Url::parse(location).map_err(|e| {
        IngestError::config(format!("Invalid store URL '{}': {}", location, e))
    })?;
    let prefix = ObjectPath::from(url.path().trim_matches('/'));

    let store: Arc<dyn ObjectStore> = match url.scheme() {
        "memory" => {
            info!("Using in-memory object store");
            Arc::new(InMemory::new())
        }
        "file" => {
            let root = url.to_file_path().map_err(|_| {
                IngestError::config(format!("Invalid file store URL: {}", location))
            })?;
            std::fs::create_dir_all(&root)?;
            info!("Using local object store rooted at {}", root.display());
            let store = LocalFileSystem::new_with_prefix(&root).map_err(|e| {
                IngestError::config(format!(
                    "Failed to open local store at {}: {}",
                    root.display(),
                    e
                ))
            })?;
            return Ok(StoreLocation {
                store: Arc::new(store),
                prefix: ObjectPath::default(),
            });
        }
        "s3" => {
            let bucket = url
                .host_str()
                .ok_or_else(|| IngestError::config("Invalid S3 URL: missing bucket"))?;

            info!("Creating S3 client for bucket: {}", bucket);
            let store = AmazonS3Builder::from_env()
                .with_bucket_name(bucket)
                .build()
                .map_err(|e| IngestError::config(format!("Failed to create S3 client: {}", e)))?;
            Arc::new(store)
        }
        "gs" => {
            let bucket = url
                .host_str()
                .ok_or_else(|| IngestError::config("Invalid GCS URL: missing bucket"))?;

            info!("Creating GCS client for bucket: {}", bucket);
            let mut builder = GoogleCloudStorageBuilder::from_env().with_bucket_name(bucket);
            if let Ok(service_account_path) = std::env::var("GOOGLE_APPLICATION_CREDENTIALS") {
                builder = builder.with_service_account_path(service_account_path);
            }
            let store = builder.build().map_err(|e| {
                IngestError::config(format!(
                    "Failed to create GCS client for bucket '{}': {}",
                    bucket, e
                ))
            })?;
            Arc::new(store)
        }
        scheme => {
            return Err(IngestError::config(format!(
                "Unsupported storage scheme: {}",
                scheme
            )));
        }
    };

    Ok(StoreLocation { store, prefix })
}

/// Bounds a store call by `timeout`.
pub(crate) async fn with_timeout<T, F>(
    timeout: Duration,
    operation: &str,
    fut: F,
) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| StoreError::Timeout {
            operation: operation.to_string(),
        })?
}
