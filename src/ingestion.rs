use futures::FutureExt;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::catalog::MetadataStore;
use crate::config::IngestConfig;
use crate::database::ObjectMetadataStore;
use crate::domain::{
    DataRecord, DatasourceMetadata, NewDatasourceMetadata, UploadOutcome, UploadedArtifact,
};
use crate::error::{IngestError, StoreError, UPLOAD_FAILED};
use crate::guard::UploadGuard;
use crate::object_client::build_object_store;
use crate::parser::{CsvParser, ParsedCsv};
use crate::storage::{DataStore, ObjectDataStore};
use crate::uploads::{delete_uploaded_file, LocalUploadFs, TemporaryUpload, UploadFs};

/// Where a single upload is in its lifecycle.
///
/// `MetadataInserted` is the only phase with something to compensate: from
/// there a failure goes through `RollingBack` before reaching `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestionPhase {
    Validating,
    Parsing,
    MetadataInserted,
    DataInserted,
    RollingBack,
    Failed,
}

impl IngestionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestionPhase::Validating => "validating",
            IngestionPhase::Parsing => "parsing",
            IngestionPhase::MetadataInserted => "metadata_inserted",
            IngestionPhase::DataInserted => "data_inserted",
            IngestionPhase::RollingBack => "rolling_back",
            IngestionPhase::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, IngestionPhase::DataInserted | IngestionPhase::Failed)
    }

    pub fn can_transition_to(&self, next: IngestionPhase) -> bool {
        use IngestionPhase::*;
        matches!(
            (self, next),
            (Validating, Parsing)
                | (Validating, Failed)
                | (Parsing, MetadataInserted)
                | (Parsing, Failed)
                | (MetadataInserted, DataInserted)
                | (MetadataInserted, RollingBack)
                | (RollingBack, Failed)
        )
    }
}

impl fmt::Display for IngestionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

struct UploadSaga<'a> {
    name: &'a str,
    history: Vec<IngestionPhase>,
}

impl<'a> UploadSaga<'a> {
    fn start(name: &'a str) -> Self {
        debug!("Upload {} entering {}", name, IngestionPhase::Validating);
        Self {
            name,
            history: vec![IngestionPhase::Validating],
        }
    }

    fn phase(&self) -> IngestionPhase {
        self.history[self.history.len() - 1]
    }

    fn advance(&mut self, next: IngestionPhase) {
        let current = self.phase();
        debug_assert!(
            current.can_transition_to(next),
            "illegal transition {} -> {}",
            current,
            next
        );
        debug!("Upload {} moving {} -> {}", self.name, current, next);
        self.history.push(next);
    }

    fn fail(&mut self, err: IngestError) -> IngestError {
        self.advance(IngestionPhase::Failed);
        err
    }
}

/// Runs uploads through validation, parsing and the two store writes, undoing
/// the metadata write when the data write fails.
pub struct IngestionService {
    guard: UploadGuard,
    parser: CsvParser,
    metadata: Arc<dyn MetadataStore>,
    data: Arc<dyn DataStore>,
    fs: Arc<dyn UploadFs>,
}

impl IngestionService {
    pub fn new(metadata: Arc<dyn MetadataStore>, data: Arc<dyn DataStore>) -> Self {
        Self {
            guard: UploadGuard::default(),
            parser: CsvParser::default(),
            metadata,
            data,
            fs: Arc::new(LocalUploadFs),
        }
    }

    pub fn from_config(config: &IngestConfig) -> Result<Self, IngestError> {
        info!("Initializing ingestion service");

        let metadata = ObjectMetadataStore::new(build_object_store(&config.metadata_store_url)?)
            .with_timeout(config.store_timeout);
        let data = ObjectDataStore::new(build_object_store(&config.data_store_url)?)
            .with_timeout(config.store_timeout);

        Ok(Self::new(Arc::new(metadata), Arc::new(data))
            .with_guard(UploadGuard::from_config(config))
            .with_parser(CsvParser::new(config.csv_delimiter)))
    }

    pub fn with_guard(mut self, guard: UploadGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn with_parser(mut self, parser: CsvParser) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_upload_fs(mut self, fs: Arc<dyn UploadFs>) -> Self {
        self.fs = fs;
        self
    }

    /// Ingests the artifact and deletes its temporary file afterwards, on every
    /// exit path.
    pub async fn ingest(&self, artifact: UploadedArtifact) -> Result<UploadOutcome, IngestError> {
        let _upload = TemporaryUpload::new(self.fs.clone(), &artifact.temporary_path);
        self.upload_csv(&artifact).await
    }

    pub async fn upload_csv(
        &self,
        artifact: &UploadedArtifact,
    ) -> Result<UploadOutcome, IngestError> {
        let mut saga = UploadSaga::start(&artifact.original_name);
        self.run(artifact, &mut saga).await
    }

    pub fn delete_uploaded_file(&self, path: &Path) {
        delete_uploaded_file(self.fs.as_ref(), path);
    }

    pub async fn datasources(&self) -> Result<Vec<DatasourceMetadata>, IngestError> {
        Ok(self.metadata.list_metadata().await?)
    }

    /// Column names of a datasource, in header order.
    pub async fn headers(&self, collection_id: &str) -> Result<Vec<String>, IngestError> {
        let metadata = self.require_metadata(collection_id).await?;
        Ok(metadata
            .schema
            .column_names()
            .map(str::to_string)
            .collect())
    }

    pub async fn records(&self, collection_id: &str) -> Result<Vec<DataRecord>, IngestError> {
        self.require_metadata(collection_id).await?;
        Ok(self.data.fetch_records(collection_id).await?)
    }

    async fn require_metadata(
        &self,
        collection_id: &str,
    ) -> Result<DatasourceMetadata, IngestError> {
        self.metadata
            .get_metadata(collection_id)
            .await?
            .ok_or_else(|| {
                IngestError::invalid_input(format!("Datasource not found: {}", collection_id))
            })
    }

    async fn run(
        &self,
        artifact: &UploadedArtifact,
        saga: &mut UploadSaga<'_>,
    ) -> Result<UploadOutcome, IngestError> {
        info!(
            "Uploading datasource {} ({} bytes)",
            artifact.original_name, artifact.size_in_bytes
        );

        if let Err(e) = self.guard.validate(artifact) {
            return Err(saga.fail(e));
        }
        saga.advance(IngestionPhase::Parsing);

        let ParsedCsv { schema, records } = match self.read_and_parse(artifact).await {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Failed to parse {}: {}", artifact.original_name, e);
                return Err(saga.fail(e));
            }
        };

        let new_metadata = NewDatasourceMetadata {
            name: artifact.original_name.clone(),
            schema,
        };
        let collection_id = match self.metadata.insert_metadata(&new_metadata).await {
            Ok(id) => id,
            Err(e) => {
                error!(
                    "Failed to insert metadata for {}: {}",
                    artifact.original_name, e
                );
                return Err(saga.fail(IngestError::invalid_input(UPLOAD_FAILED)));
            }
        };
        saga.advance(IngestionPhase::MetadataInserted);

        if let Err(e) = self.insert_records(&collection_id, &records).await {
            warn!(
                "Failed to insert {} records into {}: {}",
                records.len(),
                collection_id,
                e
            );
            saga.advance(IngestionPhase::RollingBack);
            self.roll_back(&collection_id).await;
            return Err(saga.fail(IngestError::invalid_input(UPLOAD_FAILED)));
        }
        saga.advance(IngestionPhase::DataInserted);

        info!(
            "Datasource {} uploaded as {} with {} records",
            artifact.original_name,
            collection_id,
            records.len()
        );
        Ok(UploadOutcome { collection_id })
    }

    async fn read_and_parse(&self, artifact: &UploadedArtifact) -> Result<ParsedCsv, IngestError> {
        let raw = self
            .fs
            .read(&artifact.temporary_path)
            .await
            .map_err(|e| {
                warn!(
                    "Failed to read upload {}: {}",
                    artifact.temporary_path.display(),
                    e
                );
                IngestError::invalid_input("Unable to read uploaded file")
            })?;
        self.parser.parse(&raw)
    }

    /// A panicking data store counts as a failed insert.
    async fn insert_records(
        &self,
        collection_id: &str,
        records: &[DataRecord],
    ) -> Result<(), StoreError> {
        AssertUnwindSafe(async { self.data.insert_records(collection_id, records).await })
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(StoreError::backend("data store panicked during insert")))
    }

    async fn roll_back(&self, collection_id: &str) {
        match self.metadata.delete_metadata(collection_id).await {
            Ok(()) => info!("Rolled back metadata for {}", collection_id),
            Err(e) => error!(
                "Rollback failed, metadata for {} is orphaned: {}",
                collection_id, e
            ),
        }
    }
}
