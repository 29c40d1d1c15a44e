//! Shared test utilities for ViewSync tests.
//!
//! This crate provides:
//! - In-process fakes for every scan collaborator, recording each call
//! - [`TestStore`]: a temp-dir backed SQLite catalog with a seeded datasource
//! - Fixture functions for tables, columns and datasources
//!
//! # Example
//!
//! ```rust,ignore
//! use viewsync_catalog_test_utils::{table, column, TestStore, FakeMetadataSource};
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let store = TestStore::new().await;
//!     let source = FakeMetadataSource::new(vec![table("orders", vec![column("id", "bigint")])]);
//!     // ... run scan ...
//! }
//! ```

// Test utilities use expect/unwrap for cleaner test code
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

pub mod fakes;
pub mod fixtures;
pub mod store;

pub use fakes::*;
pub use fixtures::*;
pub use store::*;

/// Initialize test logging (safe to call from every test).
pub fn init_test_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("viewsync=debug")),
        )
        .with_test_writer()
        .try_init();
}
