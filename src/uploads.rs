use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::UploadedArtifact;
use crate::error::IngestError;

/// Filesystem access needed for spooled uploads.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UploadFs: Send + Sync {
    async fn read(&self, path: &Path) -> std::io::Result<Vec<u8>>;

    fn exists(&self, path: &Path) -> bool;

    /// Removes a file, or a directory and everything below it.
    fn remove(&self, path: &Path) -> std::io::Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalUploadFs;

#[async_trait]
impl UploadFs for LocalUploadFs {
    async fn read(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(path).await
    }

    fn exists(&self, path: &Path) -> bool {
        path.symlink_metadata().is_ok()
    }

    fn remove(&self, path: &Path) -> std::io::Result<()> {
        if path.is_dir() {
            std::fs::remove_dir_all(path)
        } else {
            std::fs::remove_file(path)
        }
    }
}

/// Removes `path` if it is there. Failures are logged, never raised.
pub fn delete_uploaded_file(fs: &dyn UploadFs, path: &Path) {
    if !fs.exists(path) {
        debug!("Upload {} already gone", path.display());
        return;
    }

    match fs.remove(path) {
        Ok(()) => debug!("Deleted upload {}", path.display()),
        Err(e) => warn!("Failed to delete upload {}: {}", path.display(), e),
    }
}

/// Deletes the spooled upload when dropped, whichever way the ingestion ends.
pub struct TemporaryUpload {
    fs: Arc<dyn UploadFs>,
    path: PathBuf,
}

impl TemporaryUpload {
    pub fn new(fs: Arc<dyn UploadFs>, path: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TemporaryUpload {
    fn drop(&mut self) {
        // Removal finishes before the drop returns. On a multi-threaded runtime the
        // worker hands its other tasks off while the filesystem call blocks.
        let on_worker_pool = Handle::try_current()
            .map(|handle| handle.runtime_flavor() == RuntimeFlavor::MultiThread)
            .unwrap_or(false);
        if on_worker_pool {
            tokio::task::block_in_place(|| delete_uploaded_file(self.fs.as_ref(), &self.path));
        } else {
            delete_uploaded_file(self.fs.as_ref(), &self.path);
        }
    }
}

/// Copies `source` into `upload_dir` under a fresh name, the way an upload
/// handler spools a multipart body before handing it over.
pub async fn spool_upload(
    source: &Path,
    upload_dir: &Path,
    original_name: Option<String>,
    mime_type: Option<String>,
) -> Result<UploadedArtifact, IngestError> {
    let original_name = match original_name {
        Some(name) => name,
        None => source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                IngestError::invalid_input(format!("Not a file: {}", source.display()))
            })?,
    };
    let declared_mime_type = mime_type.unwrap_or_else(|| guess_mime_type(&original_name).to_string());

    tokio::fs::create_dir_all(upload_dir).await?;
    let temporary_path = upload_dir.join(Uuid::new_v4().simple().to_string());
    let size_in_bytes = tokio::fs::copy(source, &temporary_path).await?;

    info!(
        "Spooled {} ({} bytes) to {}",
        original_name,
        size_in_bytes,
        temporary_path.display()
    );

    Ok(UploadedArtifact {
        temporary_path,
        original_name,
        declared_mime_type,
        size_in_bytes,
    })
}

fn guess_mime_type(name: &str) -> &'static str {
    match Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("csv") => "text/csv",
        Some("tsv") => "text/tab-separated-values",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}
