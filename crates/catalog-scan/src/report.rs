//! What a scan reports back: per-table failures, revoked audits and totals.

use serde::Serialize;
use std::time::Duration;
use viewsync_catalog_core::{AuditType, GatewayError};

/// Error code of a table whose columns all lack a virtual type
pub const NO_SUPPORTED_COLUMN_CODE: &str = "NoSupportedColumn";

/// Error code of a view whose stored row filter cannot be rendered
pub const INVALID_FILTER_RULE_CODE: &str = "InvalidFilterRule";

/// A table the scan could not reconcile.
///
/// The rest of the batch is unaffected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorView {
    /// Set when the table already had a logical view
    pub form_view_id: Option<String>,
    pub technical_name: String,
    pub code: String,
    pub description: String,
    pub cause: String,
}

impl ErrorView {
    pub fn from_gateway(
        form_view_id: Option<String>,
        technical_name: impl Into<String>,
        err: &GatewayError,
    ) -> Self {
        Self {
            form_view_id,
            technical_name: technical_name.into(),
            code: err.code.clone(),
            description: err.description.clone(),
            cause: err.cause.clone(),
        }
    }

    pub fn no_supported_column(
        form_view_id: Option<String>,
        technical_name: impl Into<String>,
    ) -> Self {
        let technical_name = technical_name.into();
        Self {
            form_view_id,
            description: format!("table {} has no column with a supported type", technical_name),
            technical_name,
            code: NO_SUPPORTED_COLUMN_CODE.to_string(),
            cause: String::new(),
        }
    }

    pub fn invalid_filter_rule(
        form_view_id: String,
        technical_name: impl Into<String>,
        cause: impl std::fmt::Display,
    ) -> Self {
        Self {
            form_view_id: Some(form_view_id),
            technical_name: technical_name.into(),
            code: INVALID_FILTER_RULE_CODE.to_string(),
            description: "stored row filter rejected".to_string(),
            cause: cause.to_string(),
        }
    }
}

/// An approval workflow cancelled because the scan changed the view under review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevokedView {
    pub form_view_id: String,
    pub technical_name: String,
    pub audit_type: AuditType,
}

/// Count, total and maximum duration of one kind of view operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OpStats {
    pub count: u64,
    pub total: Duration,
    pub max: Duration,
}

impl OpStats {
    pub fn record(&mut self, elapsed: Duration) {
        self.count += 1;
        self.total += elapsed;
        self.max = self.max.max(elapsed);
    }

    pub fn merge(&mut self, other: &OpStats) {
        self.count += other.count;
        self.total += other.total;
        self.max = self.max.max(other.max);
    }

    pub fn mean(&self) -> Duration {
        match u32::try_from(self.count) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(count) => self.total / count,
        }
    }
}

/// Create/update latencies gathered across all partitions of a scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanTimings {
    pub create: OpStats,
    pub update: OpStats,
}

impl ScanTimings {
    pub fn merge(&mut self, other: &ScanTimings) {
        self.create.merge(&other.create);
        self.update.merge(&other.update);
    }
}

/// Outcome of one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanResult {
    pub datasource_id: String,
    /// Tables in the collected batch, after de-duplication
    pub scan_total: usize,
    pub created_count: usize,
    pub updated_count: usize,
    pub error_count: usize,
    pub error_views: Vec<ErrorView>,
    /// Approvals revoked by updates and by the delete sweep
    pub revoked_views: Vec<RevokedView>,
    /// Technical names of views soft-deleted by the sweep
    pub deleted_views: Vec<String>,
    /// Workers that panicked; their tables were not reconciled
    pub panicked_workers: usize,
    pub timings: ScanTimings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_stats_merge() {
        let mut a = OpStats::default();
        a.record(Duration::from_millis(10));
        a.record(Duration::from_millis(30));

        let mut b = OpStats::default();
        b.record(Duration::from_millis(50));

        a.merge(&b);
        assert_eq!(a.count, 3);
        assert_eq!(a.total, Duration::from_millis(90));
        assert_eq!(a.max, Duration::from_millis(50));
        assert_eq!(a.mean(), Duration::from_millis(30));
        assert_eq!(OpStats::default().mean(), Duration::ZERO);
    }

    #[test]
    fn test_error_view_from_gateway() {
        let err = GatewayError::new("Engine.BadSql", "syntax error").with_cause("line 1");
        let view = ErrorView::from_gateway(Some("v1".into()), "orders", &err);
        assert_eq!(view.code, "Engine.BadSql");
        assert_eq!(view.cause, "line 1");
        assert_eq!(view.form_view_id.as_deref(), Some("v1"));
    }

    #[test]
    fn test_no_supported_column() {
        let view = ErrorView::no_supported_column(None, "geo");
        assert_eq!(view.code, NO_SUPPORTED_COLUMN_CODE);
        assert!(view.description.contains("geo"));
    }
}
