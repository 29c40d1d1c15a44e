//! Wire types for the collaborator service APIs.

use serde::{Deserialize, Serialize};
use viewsync_catalog_core::{AuditType, TableInfo, TaskStatus};

/// Structured error body returned by every collaborator service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// Machine-readable error code
    pub code: String,
    /// Human-readable message
    #[serde(default)]
    pub description: String,
    /// Underlying detail
    #[serde(default)]
    pub cause: String,
    /// Request ID for tracking
    #[serde(default)]
    pub request_id: Option<String>,
}

/// Response of `POST /api/v1/datasources/{id}/collect`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectResponse {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub message: String,
}

/// Response of `GET /api/v1/tasks/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    pub task_id: String,
    pub status: TaskStatus,
}

/// Response of `GET /api/v1/datasources/{id}/tables`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableBatchResponse {
    #[serde(default)]
    pub tables: Vec<TableInfo>,
    #[serde(default)]
    pub total: Option<usize>,
}

/// Body of `POST /api/v1/catalogs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCatalogRequest {
    pub name: String,
    pub connector: String,
}

/// Response of `POST /api/v1/catalogs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCatalogResponse {
    #[serde(default)]
    pub catalogs: Vec<String>,
}

/// Body of `POST /api/v1/views` and `PUT /api/v1/views`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewRequest {
    pub catalog: String,
    pub view_name: String,
    pub sql: String,
}

/// Body of `POST /api/v1/rules/{rule}/codes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateCodesRequest {
    pub count: usize,
}

/// Response of `POST /api/v1/rules/{rule}/codes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateCodesResponse {
    #[serde(default)]
    pub codes: Vec<String>,
}

/// Body of `PUT /api/v1/audits/revoke`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokeAuditRequest {
    pub form_view_id: String,
    pub audit_type: AuditType,
}
