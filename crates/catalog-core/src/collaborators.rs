//! Interfaces of the external services a scan talks to.
//!
//! The reconciliation engine only depends on these traits. HTTP adapters live in
//! `viewsync-catalog-client`, in-memory fakes in `viewsync-catalog-test-utils`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::AuditType;

/// A column as reported by the metadata collection service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    /// Name as originally spelled by the source, when it differs from `name`
    #[serde(default)]
    pub original_name: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    /// Source type (e.g. "varchar", "int4", "datetime")
    pub data_type: String,
    #[serde(default)]
    pub length: i32,
    #[serde(default)]
    pub precision: i32,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
}

fn default_nullable() -> bool {
    true
}

impl ColumnInfo {
    /// Name to record as `original_name` on the field
    pub fn source_name(&self) -> &str {
        self.original_name.as_deref().unwrap_or(&self.name)
    }
}

/// A table as reported by the metadata collection service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub columns: Vec<ColumnInfo>,
}

/// What the collection service answered when a collection was requested
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionDescriptor {
    /// Task identifier, when the service returned one in structured form
    #[serde(default)]
    pub task_id: Option<String>,
    /// Free-text message, which may embed the task identifier
    #[serde(default)]
    pub message: String,
}

/// State of a metadata collection task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Failed,
    Finished,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Finished => write!(f, "finished"),
        }
    }
}

/// Error reported by an external collaborator.
///
/// `code` is the service's machine-readable error code, `description` its
/// human-readable message and `cause` any underlying detail.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("{code}: {description}")]
pub struct GatewayError {
    pub code: String,
    pub description: String,
    #[serde(default)]
    pub cause: String,
}

/// Code returned by the code service when the requested rule does not exist
pub const RULE_NOT_FOUND_CODE: &str = "RuleNotFound";

impl GatewayError {
    pub fn new(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            description: description.into(),
            cause: String::new(),
        }
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = cause.into();
        self
    }

    /// Whether the code service rejected the request because the rule is missing
    pub fn is_rule_not_found(&self) -> bool {
        self.code.ends_with(RULE_NOT_FOUND_CODE)
    }
}

/// Result type for collaborator calls
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Metadata collection service: runs collection tasks and serves table pages
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Ask the service to collect fresh metadata for a datasource
    async fn start_collection(&self, external_id: &str) -> GatewayResult<CollectionDescriptor>;

    /// Current state of a collection task
    async fn get_task_status(&self, task_id: &str) -> GatewayResult<TaskStatus>;

    /// One page of tables with their columns
    async fn list_table_batch(
        &self,
        external_id: &str,
        limit: usize,
        offset: usize,
    ) -> GatewayResult<Vec<TableInfo>>;
}

/// Federation engine that hosts the logical views
#[async_trait]
pub trait ViewFederationGateway: Send + Sync {
    async fn create_view(&self, catalog: &str, view_name: &str, sql: &str) -> GatewayResult<()>;

    async fn modify_view(&self, catalog: &str, view_name: &str, sql: &str) -> GatewayResult<()>;

    async fn delete_view(&self, catalog: &str, view_name: &str) -> GatewayResult<()>;

    /// Create a federated catalog over a connector; returns the created catalog names
    async fn create_catalog(&self, name: &str, connector: &str) -> GatewayResult<Vec<String>>;

    async fn delete_catalog(&self, name: &str) -> GatewayResult<()>;
}

/// Code service that hands out uniform catalog codes
#[async_trait]
pub trait CodeAllocator: Send + Sync {
    async fn generate(&self, rule_id: &str, count: usize) -> GatewayResult<Vec<String>>;
}

/// Approval workflow service
#[async_trait]
pub trait AuditRevoker: Send + Sync {
    async fn revoke(&self, form_view_id: &str, audit_type: AuditType) -> GatewayResult<()>;
}

/// Cache of sampled rows per view, dropped when the column set changes
#[async_trait]
pub trait SampleDataInvalidator: Send + Sync {
    async fn invalidate(&self, form_view_id: &str);
}
