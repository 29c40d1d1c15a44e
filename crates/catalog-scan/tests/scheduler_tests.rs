//! Periodic sync over every registered datasource.

use std::sync::Arc;
use std::time::Duration;

use viewsync_catalog_scan::{ErrorKind, ScanCollaborators, ScanConfig, Scanner, SyncScheduler};
use viewsync_catalog_storage::CatalogStore;
use viewsync_catalog_test_utils::*;

fn scanner(store: &TestStore, metadata: Arc<FakeMetadataSource>) -> Arc<Scanner> {
    let config = ScanConfig::builder()
        .collect_metadata(false)
        .build()
        .unwrap();
    Arc::new(Scanner::new(
        store.dyn_store(),
        ScanCollaborators {
            metadata,
            federation: Arc::new(RecordingGateway::new()),
            codes: Arc::new(FakeCodeAllocator::default()),
            audits: Arc::new(RecordingAuditRevoker::new()),
            samples: Arc::new(RecordingInvalidator::new()),
        },
        config,
    )
    .unwrap())
}

#[tokio::test]
async fn test_run_once_scans_every_datasource() {
    init_test_logging();
    let store = TestStore::new().await;
    store.upsert_datasource(datasource("ds-second")).await.unwrap();
    let metadata = Arc::new(FakeMetadataSource::new(tables(2)));

    let scheduler = SyncScheduler::new(scanner(&store, metadata), Duration::from_secs(3600));
    let results = scheduler.run_once().await;

    assert_eq!(results.len(), 2);
    for (id, result) in &results {
        let result = result.as_ref().unwrap();
        assert_eq!(&result.datasource_id, id);
        assert_eq!(result.created_count, 2);
    }
    assert_eq!(store.list_form_views("ds-second").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_run_once_skips_busy_datasource() {
    init_test_logging();
    let store = TestStore::new().await;
    store.upsert_datasource(datasource("ds-second")).await.unwrap();
    assert!(store.try_begin_scan(TEST_DATASOURCE_ID).await.unwrap());
    let metadata = Arc::new(FakeMetadataSource::new(tables(1)));

    let scheduler = SyncScheduler::new(scanner(&store, metadata), Duration::from_secs(3600));
    let results = scheduler.run_once().await;

    let busy = results
        .iter()
        .find(|(id, _)| id == TEST_DATASOURCE_ID)
        .unwrap();
    assert_eq!(
        busy.1.as_ref().unwrap_err().kind(),
        ErrorKind::DataSourceIsScanning
    );
    let other = results.iter().find(|(id, _)| id == "ds-second").unwrap();
    assert!(other.1.is_ok());
}

#[tokio::test]
async fn test_start_is_idempotent_and_shutdown_stops_loop() {
    init_test_logging();
    let store = TestStore::new().await;
    let metadata = Arc::new(FakeMetadataSource::new(tables(1)));

    let scheduler = SyncScheduler::new(
        scanner(&store, Arc::clone(&metadata)),
        Duration::from_millis(20),
    );
    assert!(!scheduler.is_started());
    assert!(scheduler.start().await);
    assert!(!scheduler.start().await);
    assert!(scheduler.is_started());

    // First tick fires immediately
    tokio::time::sleep(Duration::from_millis(100)).await;
    scheduler.shutdown().await;

    let pages = metadata.page_requests().len();
    assert!(pages >= 1);
    assert_eq!(store.list_form_views(TEST_DATASOURCE_ID).await.unwrap().len(), 1);

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(metadata.page_requests().len(), pages);
}
