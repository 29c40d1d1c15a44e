//! Scan engine configuration.

use std::time::Duration;
use viewsync_catalog_core::{CatalogError, Result};

/// Tuning knobs of a scan.
///
/// Partitioning is driven by `min_tables_per_worker` and `max_workers`; see
/// [`crate::partition::plan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    /// A worker is only spawned for at least this many tables
    pub min_tables_per_worker: usize,
    /// Upper bound on concurrent workers per scan
    pub max_workers: usize,
    /// Tables requested per metadata page
    pub page_size: usize,
    /// Status checks before a collection task is considered hung
    pub poll_max_attempts: u32,
    /// Delay before the second status check; doubles after each check
    pub poll_initial_delay: Duration,
    /// Cap on the delay between status checks
    pub poll_max_delay: Duration,
    /// Code-generation rule used for uniform catalog codes
    pub uniform_code_rule_id: String,
    /// Advisory message stored on views whose table disappeared
    pub delete_message: String,
    /// Trigger a metadata collection task before reading tables
    pub collect_metadata: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            min_tables_per_worker: 10,
            max_workers: 4,
            page_size: 1000,
            poll_max_attempts: 30,
            poll_initial_delay: Duration::from_secs(10),
            poll_max_delay: Duration::from_secs(300),
            uniform_code_rule_id: "form_view_uniform_code".to_string(),
            delete_message: "The source table no longer exists".to_string(),
            collect_metadata: true,
        }
    }
}

impl ScanConfig {
    pub const MIN_TABLES_PER_WORKER_ENV: &'static str = "VIEWSYNC_SCAN_MIN_TABLES_PER_WORKER";
    pub const MAX_WORKERS_ENV: &'static str = "VIEWSYNC_SCAN_MAX_WORKERS";
    pub const PAGE_SIZE_ENV: &'static str = "VIEWSYNC_SCAN_PAGE_SIZE";
    pub const POLL_MAX_ATTEMPTS_ENV: &'static str = "VIEWSYNC_POLL_MAX_ATTEMPTS";
    pub const POLL_INITIAL_DELAY_ENV: &'static str = "VIEWSYNC_POLL_INITIAL_DELAY_SECS";
    pub const POLL_MAX_DELAY_ENV: &'static str = "VIEWSYNC_POLL_MAX_DELAY_SECS";
    pub const CODE_RULE_ENV: &'static str = "VIEWSYNC_CODE_RULE_ID";
    pub const COLLECT_METADATA_ENV: &'static str = "VIEWSYNC_COLLECT_METADATA";

    pub fn builder() -> ScanConfigBuilder {
        ScanConfigBuilder::default()
    }

    /// Defaults overridden by any `VIEWSYNC_*` variable that is set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read overrides through an arbitrary lookup (used by `from_env`).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, raw: String) -> Result<T> {
            raw.trim().parse().map_err(|_| {
                CatalogError::ValidationError(format!("{} has an invalid value: {}", key, raw))
            })
        }

        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(v) = get(Self::MIN_TABLES_PER_WORKER_ENV) {
            config.min_tables_per_worker = parse(Self::MIN_TABLES_PER_WORKER_ENV, v)?;
        }
        if let Some(v) = get(Self::MAX_WORKERS_ENV) {
            config.max_workers = parse(Self::MAX_WORKERS_ENV, v)?;
        }
        if let Some(v) = get(Self::PAGE_SIZE_ENV) {
            config.page_size = parse(Self::PAGE_SIZE_ENV, v)?;
        }
        if let Some(v) = get(Self::POLL_MAX_ATTEMPTS_ENV) {
            config.poll_max_attempts = parse(Self::POLL_MAX_ATTEMPTS_ENV, v)?;
        }
        if let Some(v) = get(Self::POLL_INITIAL_DELAY_ENV) {
            config.poll_initial_delay = Duration::from_secs(parse(Self::POLL_INITIAL_DELAY_ENV, v)?);
        }
        if let Some(v) = get(Self::POLL_MAX_DELAY_ENV) {
            config.poll_max_delay = Duration::from_secs(parse(Self::POLL_MAX_DELAY_ENV, v)?);
        }
        if let Some(v) = get(Self::CODE_RULE_ENV) {
            config.uniform_code_rule_id = v.trim().to_string();
        }
        if let Some(v) = get(Self::COLLECT_METADATA_ENV) {
            config.collect_metadata = parse(Self::COLLECT_METADATA_ENV, v)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.min_tables_per_worker == 0 {
            return Err(CatalogError::ValidationError(
                "min_tables_per_worker must be at least 1".to_string(),
            ));
        }
        if self.max_workers == 0 {
            return Err(CatalogError::ValidationError(
                "max_workers must be at least 1".to_string(),
            ));
        }
        if self.page_size == 0 {
            return Err(CatalogError::ValidationError(
                "page_size must be at least 1".to_string(),
            ));
        }
        if self.poll_max_attempts == 0 {
            return Err(CatalogError::ValidationError(
                "poll_max_attempts must be at least 1".to_string(),
            ));
        }
        if self.poll_initial_delay > self.poll_max_delay {
            return Err(CatalogError::ValidationError(format!(
                "poll_initial_delay ({:?}) must be <= poll_max_delay ({:?})",
                self.poll_initial_delay, self.poll_max_delay
            )));
        }
        Ok(())
    }
}

/// Builder for [`ScanConfig`].
#[derive(Debug, Default)]
pub struct ScanConfigBuilder {
    config: ScanConfig,
}

impl ScanConfigBuilder {
    pub fn min_tables_per_worker(mut self, count: usize) -> Self {
        self.config.min_tables_per_worker = count;
        self
    }

    pub fn max_workers(mut self, count: usize) -> Self {
        self.config.max_workers = count;
        self
    }

    pub fn page_size(mut self, size: usize) -> Self {
        self.config.page_size = size;
        self
    }

    pub fn poll_max_attempts(mut self, attempts: u32) -> Self {
        self.config.poll_max_attempts = attempts;
        self
    }

    pub fn poll_initial_delay(mut self, delay: Duration) -> Self {
        self.config.poll_initial_delay = delay;
        self
    }

    pub fn poll_max_delay(mut self, delay: Duration) -> Self {
        self.config.poll_max_delay = delay;
        self
    }

    pub fn uniform_code_rule_id(mut self, rule_id: impl Into<String>) -> Self {
        self.config.uniform_code_rule_id = rule_id.into();
        self
    }

    pub fn delete_message(mut self, message: impl Into<String>) -> Self {
        self.config.delete_message = message.into();
        self
    }

    pub fn collect_metadata(mut self, enabled: bool) -> Self {
        self.config.collect_metadata = enabled;
        self
    }

    pub fn build(self) -> Result<ScanConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_is_valid() {
        let config = ScanConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.min_tables_per_worker, 10);
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.page_size, 1000);
    }

    #[test]
    fn test_builder_rejects_zero_workers() {
        assert!(ScanConfig::builder().max_workers(0).build().is_err());
        assert!(ScanConfig::builder().min_tables_per_worker(0).build().is_err());
        assert!(ScanConfig::builder().page_size(0).build().is_err());
    }

    #[test]
    fn test_builder_rejects_inverted_poll_delays() {
        let result = ScanConfig::builder()
            .poll_initial_delay(Duration::from_secs(60))
            .poll_max_delay(Duration::from_secs(1))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let vars: HashMap<&str, &str> = [
            (ScanConfig::MAX_WORKERS_ENV, "8"),
            (ScanConfig::POLL_INITIAL_DELAY_ENV, "1"),
            (ScanConfig::CODE_RULE_ENV, " rule-7 "),
            (ScanConfig::COLLECT_METADATA_ENV, "false"),
        ]
        .into_iter()
        .collect();

        let config =
            ScanConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(config.max_workers, 8);
        assert_eq!(config.poll_initial_delay, Duration::from_secs(1));
        assert_eq!(config.uniform_code_rule_id, "rule-7");
        assert!(!config.collect_metadata);
        assert_eq!(config.page_size, 1000);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = ScanConfig::from_lookup(|key| {
            (key == ScanConfig::PAGE_SIZE_ENV).then(|| "lots".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains(ScanConfig::PAGE_SIZE_ENV));
    }
}
