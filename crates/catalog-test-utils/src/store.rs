//! Temp-dir backed catalog store.

use std::sync::Arc;

use tempfile::TempDir;
use viewsync_catalog_storage::{CatalogStore, LocalSqliteStore};

use crate::fixtures::{datasource, TEST_DATASOURCE_ID};

/// An initialized SQLite catalog in a temporary directory.
///
/// The directory (and catalog) is removed when the value is dropped.
pub struct TestStore {
    _dir: TempDir,
    store: Arc<LocalSqliteStore>,
}

impl TestStore {
    /// Create a catalog with one datasource, [`TEST_DATASOURCE_ID`].
    pub async fn new() -> Self {
        let store = Self::empty().await;
        store
            .store
            .upsert_datasource(datasource(TEST_DATASOURCE_ID))
            .await
            .expect("seed datasource");
        store
    }

    /// Create an initialized catalog without datasources.
    pub async fn empty() -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let store = Arc::new(LocalSqliteStore::new(dir.path().join("catalog.db")));
        store.initialize().await.expect("initialize catalog");
        Self { _dir: dir, store }
    }

    /// Shared handle to the store.
    pub fn store(&self) -> Arc<LocalSqliteStore> {
        Arc::clone(&self.store)
    }

    /// Same handle, as a trait object.
    pub fn dyn_store(&self) -> Arc<dyn CatalogStore> {
        self.store.clone()
    }
}

impl std::ops::Deref for TestStore {
    type Target = LocalSqliteStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}
