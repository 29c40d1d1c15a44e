//! ViewSync Scan Reconciliation Engine
//!
//! Keeps the catalog of logical views consistent with freshly collected source
//! metadata and with the federation engine serving those views.
//!
//! A scan ([`Scanner::scan`]):
//! 1. takes a [`ScanLease`] on the datasource (`Scanning` until released)
//! 2. runs a metadata collection task and polls it with capped backoff
//! 3. creates the datasource's federated catalog on first use
//! 4. reads all table pages and partitions them across workers
//! 5. lets [`DiffEngine`] create or reconcile one view per table
//! 6. soft-deletes views whose table disappeared and appends a scan record
//!
//! Per-table failures end up in [`ScanResult::error_views`]; only catalog,
//! collection and catalog-creation failures abort a scan.
//!
//! # Example
//!
//! ```rust,ignore
//! use viewsync_catalog_scan::{ScanCollaborators, ScanConfig, Scanner};
//!
//! let scanner = Scanner::new(store, collaborators, ScanConfig::from_env()?)?;
//! let result = scanner.scan("ds-1").await?;
//! println!("{} created, {} updated", result.created_count, result.updated_count);
//! ```

pub mod collection;
pub mod config;
pub mod diff;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod partition;
pub mod report;
pub mod scheduler;
pub mod sql;
pub mod types;
pub mod working_set;

pub use collection::{parse_task_descriptor, resolve_task_id, PollPolicy, TASK_ID_LEN};
pub use config::{ScanConfig, ScanConfigBuilder};
pub use diff::{FieldChange, FieldDiff};
pub use engine::{DiffEngine, PartitionOutcome, ScanReceivers, ScanSinks};
pub use error::{ErrorKind, Result, ScanError};
pub use orchestrator::{ScanCollaborators, ScanLease, Scanner};
pub use partition::PartitionPlan;
pub use report::{
    ErrorView, OpStats, RevokedView, ScanResult, ScanTimings, INVALID_FILTER_RULE_CODE,
    NO_SUPPORTED_COLUMN_CODE,
};
pub use scheduler::SyncScheduler;
pub use working_set::{ComparisonFlag, ScanWorkingSet};
