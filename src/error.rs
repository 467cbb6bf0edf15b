use thiserror::Error;

pub const FILE_TOO_LARGE: &str = "File is too large";
pub const UPLOAD_FAILED: &str = "Error while uploading csv file data";

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("{message}")]
    InvalidInput { message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("IO error: {message}")]
    IoError { message: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl IngestError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        IngestError::InvalidInput {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        IngestError::ConfigError {
            message: message.into(),
        }
    }

    /// Reason carried by an `InvalidInput`, if that is what this is.
    pub fn reason(&self) -> Option<&str> {
        match self {
            IngestError::InvalidInput { message } => Some(message),
            _ => None,
        }
    }
}

impl From<std::io::Error> for IngestError {
    fn from(err: std::io::Error) -> Self {
        IngestError::IoError {
            message: err.to_string(),
        }
    }
}

/// Failures raised by metadata and data store adapters.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Datasource not found: {id}")]
    NotFound { id: String },

    #[error("Store operation timed out: {operation}")]
    Timeout { operation: String },

    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store backend error: {message}")]
    Backend { message: String },
}

impl StoreError {
    pub fn backend(message: impl Into<String>) -> Self {
        StoreError::Backend {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_input_displays_bare_reason() {
        let err = IngestError::invalid_input(FILE_TOO_LARGE);
        assert_eq!(err.to_string(), "File is too large");
        assert_eq!(err.reason(), Some(FILE_TOO_LARGE));
    }

    #[test]
    fn io_errors_are_not_invalid_input() {
        let err: IngestError = std::io::Error::new(std::io::ErrorKind::Other, "disk gone").into();
        assert!(err.reason().is_none());
        assert_eq!(err.to_string(), "IO error: disk gone");
    }
}
