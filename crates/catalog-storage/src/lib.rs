//! ViewSync Catalog Storage
//!
//! Storage abstraction for the ViewSync catalog of datasources, logical views
//! and their fields. The reconciliation engine only talks to [`CatalogStore`];
//! [`LocalSqliteStore`] keeps the catalog in a SQLite file.

use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use viewsync_catalog_core::{
    init_catalog, init_sqlite_schema, CatalogError, Datasource, FormView, FormViewField, Result,
    ScanRecord,
};

mod queries;

/// Boxed future returned by every [`CatalogStore`] operation.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Convenience alias for trait objects.
pub type DynCatalogStore = dyn CatalogStore;

/// Field mutations applied atomically together with their view.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldChangeSet {
    /// Fields seen for the first time
    pub created: Vec<FormViewField>,
    /// Existing fields whose definition, comment, index or reset changed
    pub updated: Vec<FormViewField>,
    /// Existing fields that disappeared from the source (status already `Delete`)
    pub deleted: Vec<FormViewField>,
}

impl FieldChangeSet {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Total number of field rows touched
    pub fn len(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len()
    }
}

/// A search-index event waiting in the outbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboxEvent {
    pub id: i64,
    pub form_view_id: String,
    /// `created`, `updated` or `deleted`
    pub event_type: String,
    /// JSON document of the view and its fields
    pub payload: String,
    pub created_at: String,
}

/// Row counts for `viewsync stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogStats {
    pub datasources: i64,
    pub form_views: i64,
    pub fields: i64,
    pub scan_records: i64,
    pub pending_outbox: i64,
    pub views_by_status: Vec<(String, i64)>,
    pub catalog_version: i64,
}

/// Persistence operations used by the scan engine and the CLI (async)
///
/// # Safety
///
/// **CRITICAL**: Never hold `rusqlite::Connection` across `.await` points!
/// Implementations run every SQLite operation inside
/// `tokio::task::spawn_blocking`.
///
/// # Manual Async Trait
///
/// This trait uses manual async implementation (`Pin<Box<dyn Future>>`)
/// instead of async-trait crate for explicit Send bounds.
pub trait CatalogStore: Send + Sync {
    /// Create the catalog file and its schema; returns the schema version.
    fn initialize(&self) -> StoreFuture<'_, i32>;

    /// Check if the catalog exists
    fn exists(&self) -> StoreFuture<'_, bool>;

    // ----- datasources -----

    fn get_datasource(&self, id: &str) -> StoreFuture<'_, Option<Datasource>>;

    fn list_datasources(&self) -> StoreFuture<'_, Vec<Datasource>>;

    /// Insert a datasource or update its connection attributes.
    ///
    /// Scan status and the outstanding task id are never overwritten by an upsert.
    fn upsert_datasource(&self, datasource: Datasource) -> StoreFuture<'_, ()>;

    /// Atomically move a datasource to `Scanning`.
    ///
    /// Returns `false` when another scan already holds it and
    /// `DatasourceNotFound` when it does not exist.
    fn try_begin_scan(&self, id: &str) -> StoreFuture<'_, bool>;

    /// Return a datasource to `Available` and clear its outstanding task id.
    fn finish_scan(&self, id: &str) -> StoreFuture<'_, ()>;

    fn set_metadata_task_id(&self, id: &str, task_id: Option<String>) -> StoreFuture<'_, ()>;

    fn set_data_view_source(&self, id: &str, data_view_source: &str) -> StoreFuture<'_, ()>;

    // ----- form views -----

    fn list_form_views(&self, datasource_id: &str) -> StoreFuture<'_, Vec<FormView>>;

    fn get_form_view(&self, id: &str) -> StoreFuture<'_, Option<FormView>>;

    fn list_fields(&self, form_view_id: &str) -> StoreFuture<'_, Vec<FormViewField>>;

    /// Fields of several views in one round trip, keyed by view id.
    fn list_fields_by_views(
        &self,
        form_view_ids: Vec<String>,
    ) -> StoreFuture<'_, HashMap<String, Vec<FormViewField>>>;

    /// Insert a view with its fields and a `created` outbox event in one transaction.
    fn create_form_view(
        &self,
        view: FormView,
        fields: Vec<FormViewField>,
    ) -> StoreFuture<'_, ()>;

    /// Lightweight update of the view row only.
    fn update_form_view(&self, view: FormView) -> StoreFuture<'_, ()>;

    /// Persist the scan-owned columns of a view row; user-edited columns stay as stored.
    fn update_scanned_view(&self, view: FormView) -> StoreFuture<'_, ()>;

    /// Update the scan-owned view columns and apply field changes plus an `updated` outbox event in one transaction.
    fn update_form_view_with_fields(
        &self,
        view: FormView,
        changes: FieldChangeSet,
    ) -> StoreFuture<'_, ()>;

    /// Persist soft-deleted views (scan-owned columns) in one transaction; returns the number written.
    fn mark_views_deleted(&self, views: Vec<FormView>) -> StoreFuture<'_, usize>;

    // ----- scan records / outbox -----

    fn append_scan_record(&self, record: ScanRecord) -> StoreFuture<'_, ()>;

    /// Most recent scan records first.
    fn list_scan_records(&self, datasource_id: &str, limit: usize)
        -> StoreFuture<'_, Vec<ScanRecord>>;

    fn list_pending_outbox(&self, limit: usize) -> StoreFuture<'_, Vec<OutboxEvent>>;

    fn mark_outbox_published(&self, ids: Vec<i64>) -> StoreFuture<'_, usize>;

    fn catalog_stats(&self) -> StoreFuture<'_, CatalogStats>;
}

/// Parsed representation of a catalog URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogLocation {
    Local(PathBuf),
}

impl fmt::Display for CatalogLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogLocation::Local(path) => write!(f, "file://{}", path.display()),
        }
    }
}

/// Parse a catalog URI into a structured location.
///
/// Accepts a raw path or a `file://` URI.
pub fn parse_catalog_uri(uri: &str) -> Result<CatalogLocation> {
    if let Some((scheme, _)) = uri.split_once("://") {
        if scheme != "file" {
            return Err(CatalogError::Other(format!(
                "Unsupported catalog scheme '{}://' (only file:// is supported)",
                scheme
            )));
        }
    }

    let path = uri
        .strip_prefix("file://")
        .map(|p| p.to_string())
        .unwrap_or_else(|| uri.to_string());

    if uri.starts_with("file://") {
        viewsync_catalog_core::validation::validate_file_uri_path(&path)?;
    }

    Ok(CatalogLocation::Local(PathBuf::from(path)))
}

/// Build a store from a catalog URI.
pub fn store_from_uri(uri: &str) -> Result<Arc<DynCatalogStore>> {
    match parse_catalog_uri(uri)? {
        CatalogLocation::Local(path) => Ok(Arc::new(LocalSqliteStore::new(path))),
    }
}

/// Default time SQLite waits on a locked database before failing
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Local filesystem SQLite store
///
/// Opens a fresh connection per operation so concurrent scan workers never
/// share a `Connection`; WAL mode plus a busy timeout let their writes queue
/// instead of failing.
#[derive(Clone, Debug)]
pub struct LocalSqliteStore {
    path: PathBuf,
    busy_timeout: Duration,
}

impl LocalSqliteStore {
    /// Create a new local SQLite store
    ///
    /// # Example
    /// ```no_run
    /// use viewsync_catalog_storage::LocalSqliteStore;
    ///
    /// let store = LocalSqliteStore::new("catalog.db");
    /// ```
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Get the path to the database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a configured connection. Blocking; call from `spawn_blocking`.
    pub fn open_connection(&self) -> Result<Connection> {
        open_connection(&self.path, self.busy_timeout)
    }

    fn blocking<T, F>(&self, f: F) -> StoreFuture<'static, T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let path = self.path.clone();
        let busy_timeout = self.busy_timeout;
        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                let mut conn = open_connection(&path, busy_timeout)?;
                f(&mut conn)
            })
            .await
            .map_err(|e| CatalogError::Other(format!("Task join error: {}", e)))?
        })
    }
}

fn open_connection(path: &Path, busy_timeout: Duration) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")?;
    init_sqlite_schema(&conn)?;
    Ok(conn)
}

impl CatalogStore for LocalSqliteStore {
    fn initialize(&self) -> StoreFuture<'_, i32> {
        let path = self.path.clone();
        let busy_timeout = self.busy_timeout;
        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                let conn = open_connection(&path, busy_timeout)?;
                let schema_version = init_catalog(&conn)?;
                tracing::info!(path = %path.display(), schema_version, "Catalog initialized");
                Ok(schema_version)
            })
            .await
            .map_err(|e| CatalogError::Other(format!("Task join error: {}", e)))?
        })
    }

    fn exists(&self) -> StoreFuture<'_, bool> {
        let path = self.path.clone();
        Box::pin(async move { Ok(path.exists()) })
    }

    fn get_datasource(&self, id: &str) -> StoreFuture<'_, Option<Datasource>> {
        let id = id.to_string();
        self.blocking(move |conn| queries::get_datasource(conn, &id))
    }

    fn list_datasources(&self) -> StoreFuture<'_, Vec<Datasource>> {
        self.blocking(|conn| queries::list_datasources(conn))
    }

    fn upsert_datasource(&self, datasource: Datasource) -> StoreFuture<'_, ()> {
        self.blocking(move |conn| queries::upsert_datasource(conn, &datasource))
    }

    fn try_begin_scan(&self, id: &str) -> StoreFuture<'_, bool> {
        let id = id.to_string();
        self.blocking(move |conn| queries::try_begin_scan(conn, &id))
    }

    fn finish_scan(&self, id: &str) -> StoreFuture<'_, ()> {
        let id = id.to_string();
        self.blocking(move |conn| queries::finish_scan(conn, &id))
    }

    fn set_metadata_task_id(&self, id: &str, task_id: Option<String>) -> StoreFuture<'_, ()> {
        let id = id.to_string();
        self.blocking(move |conn| queries::set_metadata_task_id(conn, &id, task_id.as_deref()))
    }

    fn set_data_view_source(&self, id: &str, data_view_source: &str) -> StoreFuture<'_, ()> {
        let id = id.to_string();
        let source = data_view_source.to_string();
        self.blocking(move |conn| queries::set_data_view_source(conn, &id, &source))
    }

    fn list_form_views(&self, datasource_id: &str) -> StoreFuture<'_, Vec<FormView>> {
        let datasource_id = datasource_id.to_string();
        self.blocking(move |conn| queries::list_form_views(conn, &datasource_id))
    }

    fn get_form_view(&self, id: &str) -> StoreFuture<'_, Option<FormView>> {
        let id = id.to_string();
        self.blocking(move |conn| queries::get_form_view(conn, &id))
    }

    fn list_fields(&self, form_view_id: &str) -> StoreFuture<'_, Vec<FormViewField>> {
        let form_view_id = form_view_id.to_string();
        self.blocking(move |conn| queries::list_fields(conn, &form_view_id))
    }

    fn list_fields_by_views(
        &self,
        form_view_ids: Vec<String>,
    ) -> StoreFuture<'_, HashMap<String, Vec<FormViewField>>> {
        self.blocking(move |conn| queries::list_fields_by_views(conn, &form_view_ids))
    }

    fn create_form_view(
        &self,
        view: FormView,
        fields: Vec<FormViewField>,
    ) -> StoreFuture<'_, ()> {
        self.blocking(move |conn| queries::create_form_view(conn, &view, &fields))
    }

    fn update_form_view(&self, view: FormView) -> StoreFuture<'_, ()> {
        self.blocking(move |conn| queries::update_form_view(conn, &view))
    }

    fn update_scanned_view(&self, view: FormView) -> StoreFuture<'_, ()> {
        self.blocking(move |conn| queries::update_scanned_view(conn, &view))
    }

    fn update_form_view_with_fields(
        &self,
        view: FormView,
        changes: FieldChangeSet,
    ) -> StoreFuture<'_, ()> {
        self.blocking(move |conn| queries::update_form_view_with_fields(conn, &view, &changes))
    }

    fn mark_views_deleted(&self, views: Vec<FormView>) -> StoreFuture<'_, usize> {
        self.blocking(move |conn| queries::mark_views_deleted(conn, &views))
    }

    fn append_scan_record(&self, record: ScanRecord) -> StoreFuture<'_, ()> {
        self.blocking(move |conn| queries::append_scan_record(conn, &record))
    }

    fn list_scan_records(
        &self,
        datasource_id: &str,
        limit: usize,
    ) -> StoreFuture<'_, Vec<ScanRecord>> {
        let datasource_id = datasource_id.to_string();
        self.blocking(move |conn| queries::list_scan_records(conn, &datasource_id, limit))
    }

    fn list_pending_outbox(&self, limit: usize) -> StoreFuture<'_, Vec<OutboxEvent>> {
        self.blocking(move |conn| queries::list_pending_outbox(conn, limit))
    }

    fn mark_outbox_published(&self, ids: Vec<i64>) -> StoreFuture<'_, usize> {
        self.blocking(move |conn| queries::mark_outbox_published(conn, &ids))
    }

    fn catalog_stats(&self) -> StoreFuture<'_, CatalogStats> {
        self.blocking(|conn| queries::catalog_stats(conn))
    }
}
