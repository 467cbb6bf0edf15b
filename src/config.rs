use std::path::PathBuf;
use std::time::Duration;

use crate::error::IngestError;

pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_STORE_URL: &str = "memory://";
pub const DEFAULT_STORE_TIMEOUT_SECS: u64 = 30;

/// Runtime settings for the ingestion pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestConfig {
    pub max_upload_bytes: u64,
    /// Empty means any declared MIME type is accepted.
    pub allowed_mime_types: Vec<String>,
    pub csv_delimiter: u8,
    pub metadata_store_url: String,
    pub data_store_url: String,
    pub store_timeout: Duration,
    pub upload_dir: PathBuf,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            allowed_mime_types: Vec::new(),
            csv_delimiter: b',',
            metadata_store_url: DEFAULT_STORE_URL.to_string(),
            data_store_url: DEFAULT_STORE_URL.to_string(),
            store_timeout: Duration::from_secs(DEFAULT_STORE_TIMEOUT_SECS),
            upload_dir: std::env::temp_dir().join("datasource-uploads"),
        }
    }
}

impl IngestConfig {
    pub fn from_env() -> Result<Self, IngestError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup, falling back to defaults
    /// for anything unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, IngestError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("INGEST_MAX_UPLOAD_BYTES") {
            config.max_upload_bytes = value.trim().parse().map_err(|e| {
                IngestError::config(format!("Invalid INGEST_MAX_UPLOAD_BYTES '{}': {}", value, e))
            })?;
        }

        if let Some(value) = lookup("INGEST_ALLOWED_MIME_TYPES") {
            config.allowed_mime_types = value
                .split(',')
                .map(|mime| mime.trim().to_ascii_lowercase())
                .filter(|mime| !mime.is_empty())
                .collect();
        }

        if let Some(value) = lookup("INGEST_CSV_DELIMITER") {
            config.csv_delimiter = parse_delimiter(&value)?;
        }

        if let Some(value) = lookup("INGEST_METADATA_STORE_URL") {
            config.metadata_store_url = value;
        }

        if let Some(value) = lookup("INGEST_DATA_STORE_URL") {
            config.data_store_url = value;
        }

        if let Some(value) = lookup("INGEST_STORE_TIMEOUT_SECS") {
            let secs: u64 = value.trim().parse().map_err(|e| {
                IngestError::config(format!(
                    "Invalid INGEST_STORE_TIMEOUT_SECS '{}': {}",
                    value, e
                ))
            })?;
            if secs == 0 {
                return Err(IngestError::config(
                    "INGEST_STORE_TIMEOUT_SECS must be greater than zero",
                ));
            }
            config.store_timeout = Duration::from_secs(secs);
        }

        if let Some(value) = lookup("INGEST_UPLOAD_DIR") {
            config.upload_dir = PathBuf::from(value);
        }

        Ok(config)
    }
}

fn parse_delimiter(value: &str) -> Result<u8, IngestError> {
    let delimiter = match value {
        "\\t" | "tab" => "\t",
        other => other,
    };
    match delimiter.as_bytes() {
        [byte] if byte.is_ascii() && *byte != b'"' && *byte != b'\n' && *byte != b'\r' => {
            Ok(*byte)
        }
        _ => Err(IngestError::config(format!(
            "INGEST_CSV_DELIMITER must be a single ASCII character, got '{}'",
            value
        ))),
    }
}
