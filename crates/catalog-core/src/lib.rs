//! ViewSync Catalog Core
//!
//! Core types, collaborator interfaces, and SQLite schema for the ViewSync
//! logical-view catalog.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod collaborators;
pub mod validation;

pub use collaborators::{
    AuditRevoker, CodeAllocator, CollectionDescriptor, ColumnInfo, GatewayError, MetadataSource,
    SampleDataInvalidator, TableInfo, TaskStatus, ViewFederationGateway,
};

// ============================================================================
// Datasource
// ============================================================================

/// Scan lifecycle status of a datasource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasourceStatus {
    /// No reconciliation is running
    Available,
    /// A scan owns the datasource
    Scanning,
}

impl std::fmt::Display for DatasourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatasourceStatus::Available => write!(f, "available"),
            DatasourceStatus::Scanning => write!(f, "scanning"),
        }
    }
}

impl std::str::FromStr for DatasourceStatus {
    type Err = CatalogError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "available" => Ok(DatasourceStatus::Available),
            "scanning" => Ok(DatasourceStatus::Scanning),
            _ => Err(CatalogError::ValidationError(format!(
                "Unknown datasource status: {}",
                s
            ))),
        }
    }
}

/// An external database connection registered in the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datasource {
    /// Unique identifier
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Source type (e.g., "mysql", "postgresql", "oracle")
    pub source_type: String,
    /// Identifier of this datasource inside the metadata collection service
    pub external_id: String,
    /// Connector catalog in the federation engine that reads the source
    pub catalog_name: String,
    /// Source schema holding the scanned tables
    pub schema: String,
    /// Federated `catalog.schema` the logical views are created under.
    /// Empty until the federated catalog has been created.
    pub data_view_source: String,
    /// Scan lifecycle status
    pub status: DatasourceStatus,
    /// Collection task outstanding for the current scan, if any
    pub metadata_task_id: Option<String>,
    /// When the datasource was registered
    pub created_at: DateTime<Utc>,
    /// When the datasource row was last written
    pub updated_at: DateTime<Utc>,
}

impl Datasource {
    /// Create a new, available datasource with no federated catalog yet
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        source_type: impl Into<String>,
        external_id: impl Into<String>,
        catalog_name: impl Into<String>,
        schema: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            source_type: source_type.into(),
            external_id: external_id.into(),
            catalog_name: catalog_name.into(),
            schema: schema.into(),
            data_view_source: String::new(),
            status: DatasourceStatus::Available,
            metadata_task_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the federated catalog for this datasource still has to be created
    pub fn needs_view_catalog(&self) -> bool {
        self.data_view_source.trim().is_empty()
    }
}

// ============================================================================
// FormView (logical view)
// ============================================================================

/// Reconciliation status of a logical view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewStatus {
    /// Created by a scan, not rescanned yet
    New,
    /// The source structure changed since the last scan
    Modify,
    /// Rescanned with no detected change since the last New/Modify
    Uniformity,
    /// The source table disappeared
    Delete,
}

impl std::fmt::Display for ViewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViewStatus::New => write!(f, "new"),
            ViewStatus::Modify => write!(f, "modify"),
            ViewStatus::Uniformity => write!(f, "uniformity"),
            ViewStatus::Delete => write!(f, "delete"),
        }
    }
}

impl std::str::FromStr for ViewStatus {
    type Err = CatalogError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "new" => Ok(ViewStatus::New),
            "modify" => Ok(ViewStatus::Modify),
            "uniformity" => Ok(ViewStatus::Uniformity),
            "delete" => Ok(ViewStatus::Delete),
            _ => Err(CatalogError::ValidationError(format!(
                "Unknown view status: {}",
                s
            ))),
        }
    }
}

/// Editing state of a logical view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditStatus {
    /// Pending edits that have not been published
    Draft,
    /// The published definition is current
    Latest,
}

impl std::fmt::Display for EditStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EditStatus::Draft => write!(f, "draft"),
            EditStatus::Latest => write!(f, "latest"),
        }
    }
}

impl std::str::FromStr for EditStatus {
    type Err = CatalogError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "draft" => Ok(EditStatus::Draft),
            "latest" => Ok(EditStatus::Latest),
            _ => Err(CatalogError::ValidationError(format!(
                "Unknown edit status: {}",
                s
            ))),
        }
    }
}

/// Approval workflow state of a logical view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnlineStatus {
    /// Never published
    NotOnline,
    /// Waiting for the "go online" approval
    OnlineAuditing,
    /// Published
    Online,
    /// Waiting for the "go offline" approval
    OfflineAuditing,
    /// Withdrawn
    Offline,
}

impl OnlineStatus {
    /// The approval workflow pending on this view, if any
    pub fn pending_audit(&self) -> Option<AuditType> {
        match self {
            OnlineStatus::OnlineAuditing => Some(AuditType::Online),
            OnlineStatus::OfflineAuditing => Some(AuditType::Offline),
            _ => None,
        }
    }

    /// Status to fall back to once the pending approval has been revoked
    pub fn after_revoke(&self) -> OnlineStatus {
        match self {
            OnlineStatus::OnlineAuditing => OnlineStatus::NotOnline,
            OnlineStatus::OfflineAuditing => OnlineStatus::Online,
            other => *other,
        }
    }
}

impl std::fmt::Display for OnlineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OnlineStatus::NotOnline => write!(f, "not_online"),
            OnlineStatus::OnlineAuditing => write!(f, "online_auditing"),
            OnlineStatus::Online => write!(f, "online"),
            OnlineStatus::OfflineAuditing => write!(f, "offline_auditing"),
            OnlineStatus::Offline => write!(f, "offline"),
        }
    }
}

impl std::str::FromStr for OnlineStatus {
    type Err = CatalogError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "not_online" => Ok(OnlineStatus::NotOnline),
            "online_auditing" => Ok(OnlineStatus::OnlineAuditing),
            "online" => Ok(OnlineStatus::Online),
            "offline_auditing" => Ok(OnlineStatus::OfflineAuditing),
            "offline" => Ok(OnlineStatus::Offline),
            _ => Err(CatalogError::ValidationError(format!(
                "Unknown online status: {}",
                s
            ))),
        }
    }
}

/// Kind of approval workflow that can be revoked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditType {
    Online,
    Offline,
}

impl std::fmt::Display for AuditType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditType::Online => write!(f, "online"),
            AuditType::Offline => write!(f, "offline"),
        }
    }
}

/// A source table registered as a queryable logical view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormView {
    /// Unique identifier
    pub id: String,
    /// Owning datasource
    pub datasource_id: String,
    /// Physical table name, unique within the datasource
    pub technical_name: String,
    /// Display name
    pub business_name: String,
    /// Table name as reported by the source
    pub original_name: String,
    /// Cross-system catalog code (empty when the code service was unavailable)
    pub uniform_catalog_code: String,
    /// Reconciliation status
    pub status: ViewStatus,
    /// Editing state
    pub edit_status: EditStatus,
    /// Approval workflow state
    pub online_status: OnlineStatus,
    /// Table comment from the source
    pub comment: Option<String>,
    /// User-defined row filter appended to the generated SELECT with `WHERE`
    pub filter_rule: Option<String>,
    /// Advisory message set when the view is soft-deleted
    pub delete_message: Option<String>,
    /// When the view was first registered
    pub created_at: DateTime<Utc>,
    /// When the view row was last written
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// FormViewField
// ============================================================================

/// Reconciliation status of a view field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldStatus {
    New,
    Modify,
    Delete,
    /// The source type has no virtual type; excluded from the generated SELECT
    NotSupport,
}

impl std::fmt::Display for FieldStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldStatus::New => write!(f, "new"),
            FieldStatus::Modify => write!(f, "modify"),
            FieldStatus::Delete => write!(f, "delete"),
            FieldStatus::NotSupport => write!(f, "not_support"),
        }
    }
}

impl std::str::FromStr for FieldStatus {
    type Err = CatalogError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "new" => Ok(FieldStatus::New),
            "modify" => Ok(FieldStatus::Modify),
            "delete" => Ok(FieldStatus::Delete),
            "not_support" => Ok(FieldStatus::NotSupport),
            _ => Err(CatalogError::ValidationError(format!(
                "Unknown field status: {}",
                s
            ))),
        }
    }
}

/// A user-applied type override that survives rescans
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldReset {
    /// Virtual type the field had before the override
    pub before_data_type: String,
    /// Conversion rules used to render the cast (e.g. a date format)
    pub convert_rules: String,
    /// Length of the overridden type
    pub data_length: i32,
    /// Precision of the overridden type
    pub data_accuracy: i32,
}

/// One column of a logical view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormViewField {
    /// Unique identifier
    pub id: String,
    /// Owning logical view
    pub form_view_id: String,
    /// Physical column name, unique within the view
    pub technical_name: String,
    /// Display name
    pub business_name: String,
    /// Column name as reported by the source
    pub original_name: String,
    /// Column comment from the source
    pub comment: Option<String>,
    /// Whether the column is part of the primary key
    pub primary_key: bool,
    /// Working ("virtual") type used in the federated view
    pub data_type: String,
    /// Source type as reported by the metadata service
    pub original_data_type: String,
    /// Column length
    pub data_length: i32,
    /// Column precision
    pub data_accuracy: i32,
    /// Whether the column allows nulls
    pub is_nullable: bool,
    /// Reconciliation status
    pub status: FieldStatus,
    /// Ordinal position
    pub index: i32,
    /// Active manual type override, if any
    pub reset: Option<FieldReset>,
}

impl FormViewField {
    /// Whether a manual type override is active
    pub fn has_reset(&self) -> bool {
        self.reset
            .as_ref()
            .map(|r| !r.before_data_type.is_empty())
            .unwrap_or(false)
    }

    /// Whether the field takes part in the generated SELECT list
    pub fn is_selectable(&self) -> bool {
        !matches!(self.status, FieldStatus::Delete | FieldStatus::NotSupport)
            && !self.data_type.is_empty()
    }
}

// ============================================================================
// Scan records
// ============================================================================

/// Append-only record of a scan invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    /// Unique identifier
    pub id: String,
    /// Scanned datasource
    pub datasource_id: String,
    /// External task that requested the scan; empty when not tied to one
    pub scanner: String,
    /// When the scan finished
    pub scanned_at: DateTime<Utc>,
}

// ============================================================================
// Errors
// ============================================================================

/// Errors that can occur in catalog operations
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Datasource not found: {0}")]
    DatasourceNotFound(String),

    #[error("Form view not found: {0}")]
    FormViewNotFound(String),

    #[error("Conflict detected: {0}")]
    ConflictError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl From<serde_json::Error> for CatalogError {
    fn from(err: serde_json::Error) -> Self {
        CatalogError::SerializationError(err.to_string())
    }
}

/// Result type for catalog operations
pub type Result<T> = std::result::Result<T, CatalogError>;

/// Schema version written to `PRAGMA user_version` by [`init_catalog`]
pub const SCHEMA_VERSION: i32 = 1;

// ============================================================================
// Schema
// ============================================================================

/// Initialize the SQLite schema for the catalog
///
/// Creates all necessary tables if they don't exist:
/// - `catalog_meta`: Write counter bumped by every write transaction
/// - `datasources`: Registered external connections
/// - `form_views`: Logical views, unique by (datasource, technical name)
/// - `form_view_fields`: Column definitions including the reset triplet
/// - `scan_records`: Append-only audit of scan invocations
/// - `search_index_outbox`: Search-index events written in the same transaction as the view
pub fn init_sqlite_schema(conn: &rusqlite::Connection) -> Result<()> {
    let ddl = r#"
    CREATE TABLE IF NOT EXISTS catalog_meta (
      id INTEGER PRIMARY KEY CHECK (id = 1),
      version INTEGER NOT NULL DEFAULT 1,
      last_modified TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    );

    INSERT OR IGNORE INTO catalog_meta (id, version, last_modified)
    VALUES (1, 1, datetime('now'));

    CREATE TABLE IF NOT EXISTS datasources (
      id TEXT PRIMARY KEY,
      name TEXT NOT NULL,
      source_type TEXT NOT NULL,
      external_id TEXT NOT NULL,
      catalog_name TEXT NOT NULL,
      schema_name TEXT NOT NULL,
      data_view_source TEXT NOT NULL DEFAULT '',
      status TEXT NOT NULL DEFAULT 'available',
      metadata_task_id TEXT,
      created_at TEXT NOT NULL,
      updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS form_views (
      id TEXT PRIMARY KEY,
      datasource_id TEXT NOT NULL,
      technical_name TEXT NOT NULL,
      business_name TEXT NOT NULL,
      original_name TEXT NOT NULL,
      uniform_catalog_code TEXT NOT NULL DEFAULT '',
      status TEXT NOT NULL,
      edit_status TEXT NOT NULL,
      online_status TEXT NOT NULL DEFAULT 'not_online',
      comment TEXT,
      filter_rule TEXT,
      delete_message TEXT,
      created_at TEXT NOT NULL,
      updated_at TEXT NOT NULL,
      FOREIGN KEY (datasource_id) REFERENCES datasources(id) ON DELETE CASCADE,
      UNIQUE(datasource_id, technical_name)
    );

    CREATE INDEX IF NOT EXISTS idx_form_views_datasource ON form_views(datasource_id);
    CREATE INDEX IF NOT EXISTS idx_form_views_status ON form_views(status);

    CREATE TABLE IF NOT EXISTS form_view_fields (
      id TEXT PRIMARY KEY,
      form_view_id TEXT NOT NULL,
      technical_name TEXT NOT NULL,
      business_name TEXT NOT NULL,
      original_name TEXT NOT NULL,
      comment TEXT,
      primary_key INTEGER NOT NULL DEFAULT 0,
      data_type TEXT NOT NULL,
      original_data_type TEXT NOT NULL,
      data_length INTEGER NOT NULL DEFAULT 0,
      data_accuracy INTEGER NOT NULL DEFAULT 0,
      is_nullable INTEGER NOT NULL DEFAULT 1,
      status TEXT NOT NULL,
      field_index INTEGER NOT NULL,
      reset_before_data_type TEXT,
      reset_convert_rules TEXT,
      reset_data_length INTEGER,
      reset_data_accuracy INTEGER,
      FOREIGN KEY (form_view_id) REFERENCES form_views(id) ON DELETE CASCADE,
      UNIQUE(form_view_id, technical_name)
    );

    CREATE INDEX IF NOT EXISTS idx_fields_form_view ON form_view_fields(form_view_id);

    CREATE TABLE IF NOT EXISTS scan_records (
      id TEXT PRIMARY KEY,
      datasource_id TEXT NOT NULL,
      scanner TEXT NOT NULL DEFAULT '',
      scanned_at TEXT NOT NULL,
      FOREIGN KEY (datasource_id) REFERENCES datasources(id) ON DELETE CASCADE
    );

    CREATE INDEX IF NOT EXISTS idx_scan_records_datasource_time
      ON scan_records(datasource_id, scanned_at DESC);

    CREATE TABLE IF NOT EXISTS search_index_outbox (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      form_view_id TEXT NOT NULL,
      event_type TEXT NOT NULL,
      payload TEXT NOT NULL,
      created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
      published_at TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_outbox_form_view ON search_index_outbox(form_view_id);
    -- Pending events are read oldest first
    CREATE INDEX IF NOT EXISTS idx_outbox_pending ON search_index_outbox(published_at, id);
    "#;

    conn.execute_batch(ddl)?;
    Ok(())
}

/// Initialize the catalog schema and stamp its version.
///
/// Idempotent. Fails on a catalog written by a newer schema.
///
/// # Returns
///
/// The schema version of the catalog.
pub fn init_catalog(conn: &rusqlite::Connection) -> Result<i32> {
    let stored: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if stored > SCHEMA_VERSION {
        return Err(CatalogError::ValidationError(format!(
            "Catalog schema version {} is newer than supported version {}",
            stored, SCHEMA_VERSION
        )));
    }

    init_sqlite_schema(conn)?;
    if stored < SCHEMA_VERSION {
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    }
    Ok(SCHEMA_VERSION)
}

/// Get the current catalog write counter
pub fn get_catalog_version(conn: &rusqlite::Connection) -> Result<i64> {
    let version: i64 =
        conn.query_row("SELECT version FROM catalog_meta WHERE id = 1", [], |row| {
            row.get(0)
        })?;
    Ok(version)
}

/// Increment the catalog write counter (call inside every write transaction)
pub fn increment_catalog_version(conn: &rusqlite::Connection) -> Result<i64> {
    conn.execute(
        "UPDATE catalog_meta SET version = version + 1, last_modified = datetime('now') WHERE id = 1",
        [],
    )?;
    get_catalog_version(conn)
}
