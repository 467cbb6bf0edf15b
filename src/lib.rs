pub mod catalog;
pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod guard;
pub mod ingestion;
pub mod object_client;
pub mod parser;
pub mod storage;
pub mod uploads;

pub use config::IngestConfig;
pub use error::{IngestError, StoreError};
pub use ingestion::{IngestionPhase, IngestionService};
