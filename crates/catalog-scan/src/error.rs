//! Error types for the scan engine.

use viewsync_catalog_core::{CatalogError, GatewayError};

/// Stable classification of a fatal scan error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    DataSourceNotFound,
    DataSourceIsScanning,
    MetadataCollectTaskFail,
    MalformedTaskDescriptor,
    MetadataCollectTaskTimeout,
    CatalogCreateFail,
    MetadataSourceFail,
    DatabaseError,
}

impl ErrorKind {
    /// Machine-readable code reported to callers
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::DataSourceNotFound => "DataSourceNotFound",
            ErrorKind::DataSourceIsScanning => "DataSourceIsScanning",
            ErrorKind::MetadataCollectTaskFail => "MetadataCollectTaskFail",
            ErrorKind::MalformedTaskDescriptor => "MalformedTaskDescriptor",
            ErrorKind::MetadataCollectTaskTimeout => "MetadataCollectTaskTimeout",
            ErrorKind::CatalogCreateFail => "CatalogCreateFail",
            ErrorKind::MetadataSourceFail => "MetadataSourceFail",
            ErrorKind::DatabaseError => "DatabaseError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Errors that abort a whole scan.
///
/// Per-table failures are not errors at this level; they are reported as
/// [`crate::ErrorView`] entries in the scan result.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("Datasource not found: {0}")]
    DatasourceNotFound(String),

    #[error("Datasource {0} is already being scanned")]
    DatasourceIsScanning(String),

    #[error("Metadata collection task {task_id} failed")]
    CollectTaskFailed { task_id: String },

    #[error("Malformed collection task descriptor: {0:?}")]
    MalformedTaskDescriptor(String),

    #[error("Metadata collection task {task_id} still running after {attempts} status checks")]
    CollectTaskTimeout { task_id: String, attempts: u32 },

    #[error("Failed to create federated catalog {catalog}: {source}")]
    CatalogCreate {
        catalog: String,
        #[source]
        source: GatewayError,
    },

    #[error("Metadata source error: {0}")]
    MetadataSource(#[source] GatewayError),

    #[error("Database error: {0}")]
    Database(#[from] CatalogError),
}

impl ScanError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScanError::DatasourceNotFound(_)
            | ScanError::Database(CatalogError::DatasourceNotFound(_)) => {
                ErrorKind::DataSourceNotFound
            }
            ScanError::DatasourceIsScanning(_) => ErrorKind::DataSourceIsScanning,
            ScanError::CollectTaskFailed { .. } => ErrorKind::MetadataCollectTaskFail,
            ScanError::MalformedTaskDescriptor(_) => ErrorKind::MalformedTaskDescriptor,
            ScanError::CollectTaskTimeout { .. } => ErrorKind::MetadataCollectTaskTimeout,
            ScanError::CatalogCreate { .. } => ErrorKind::CatalogCreateFail,
            ScanError::MetadataSource(_) => ErrorKind::MetadataSourceFail,
            ScanError::Database(_) => ErrorKind::DatabaseError,
        }
    }
}

/// Result type for scan operations
pub type Result<T> = std::result::Result<T, ScanError>;
