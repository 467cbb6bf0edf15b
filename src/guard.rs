use tracing::warn;

use crate::config::{IngestConfig, DEFAULT_MAX_UPLOAD_BYTES};
use crate::domain::UploadedArtifact;
use crate::error::{IngestError, FILE_TOO_LARGE};

/// Size and content-type checks applied before anything is persisted.
#[derive(Debug, Clone)]
pub struct UploadGuard {
    max_upload_bytes: u64,
    allowed_mime_types: Vec<String>,
}

impl Default for UploadGuard {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_UPLOAD_BYTES)
    }
}

impl UploadGuard {
    pub fn new(max_upload_bytes: u64) -> Self {
        Self {
            max_upload_bytes,
            allowed_mime_types: Vec::new(),
        }
    }

    pub fn from_config(config: &IngestConfig) -> Self {
        Self::new(config.max_upload_bytes).with_allowed_mime_types(config.allowed_mime_types.clone())
    }

    pub fn with_allowed_mime_types(mut self, mime_types: Vec<String>) -> Self {
        self.allowed_mime_types = mime_types
            .into_iter()
            .map(|mime| mime.to_ascii_lowercase())
            .collect();
        self
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    pub fn validate(&self, artifact: &UploadedArtifact) -> Result<(), IngestError> {
        if artifact.size_in_bytes > self.max_upload_bytes {
            warn!(
                "Rejecting {}: {} bytes exceeds limit of {} bytes",
                artifact.original_name, artifact.size_in_bytes, self.max_upload_bytes
            );
            return Err(IngestError::invalid_input(FILE_TOO_LARGE));
        }

        if !self.allowed_mime_types.is_empty() {
            // Parameters such as "; charset=utf-8" do not affect the check.
            let essence = artifact
                .declared_mime_type
                .split(';')
                .next()
                .unwrap_or("")
                .trim()
                .to_ascii_lowercase();
            if !self.allowed_mime_types.contains(&essence) {
                warn!(
                    "Rejecting {}: unsupported content type {}",
                    artifact.original_name, artifact.declared_mime_type
                );
                return Err(IngestError::invalid_input(format!(
                    "Unsupported file type: {}",
                    artifact.declared_mime_type
                )));
            }
        }

        Ok(())
    }
}
