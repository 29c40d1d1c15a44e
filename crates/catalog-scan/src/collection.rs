//! Metadata collection tasks: task id resolution and bounded status polling.

use std::time::Duration;
use viewsync_catalog_core::{CollectionDescriptor, MetadataSource, TaskStatus};

use crate::config::ScanConfig;
use crate::error::{Result, ScanError};

/// Length of a collection task id
pub const TASK_ID_LEN: usize = 19;

const TASK_ID_LABELS: &[&str] = &["任务id", "task_id", "task id", "taskid"];

/// Extract the task id embedded in a free-text collection message.
///
/// Expects a label (`任务ID`, `task id`, ...) followed by `:` or `：` and a
/// 19-digit id, e.g. `"采集任务已创建，任务ID：1234567890123456789"`.
pub fn parse_task_descriptor(message: &str) -> Result<String> {
    let malformed = || ScanError::MalformedTaskDescriptor(message.to_string());
    let lower = message.to_lowercase();

    let after_label = TASK_ID_LABELS
        .iter()
        .find_map(|label| lower.find(label).map(|pos| &lower[pos + label.len()..]))
        .ok_or_else(malformed)?;

    let after_separator = after_label
        .trim_start()
        .strip_prefix(':')
        .or_else(|| after_label.trim_start().strip_prefix('：'))
        .ok_or_else(malformed)?
        .trim_start();

    let id: String = after_separator
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();

    if id.len() != TASK_ID_LEN {
        return Err(malformed());
    }
    Ok(id)
}

/// Task id of a collection: the typed field when present, else parsed from the message.
pub fn resolve_task_id(descriptor: &CollectionDescriptor) -> Result<String> {
    match descriptor.task_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ => parse_task_descriptor(&descriptor.message),
    }
}

/// Capped exponential backoff between status checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl PollPolicy {
    pub fn from_config(config: &ScanConfig) -> Self {
        Self {
            max_attempts: config.poll_max_attempts,
            initial_delay: config.poll_initial_delay,
            max_delay: config.poll_max_delay,
        }
    }

    /// Delay before status check number `attempt` (zero-based); none before the first.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Poll a collection task until it finishes, fails or runs out of attempts.
///
/// Errors from the status endpoint count as attempts and are retried.
pub async fn wait_for_task(
    source: &dyn MetadataSource,
    task_id: &str,
    policy: PollPolicy,
) -> Result<()> {
    for attempt in 0..policy.max_attempts {
        let delay = policy.delay_before(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match source.get_task_status(task_id).await {
            Ok(TaskStatus::Finished) => {
                tracing::info!(task_id = %task_id, attempts = attempt + 1, "Collection task finished");
                return Ok(());
            }
            Ok(TaskStatus::Failed) => {
                tracing::error!(task_id = %task_id, "Collection task failed");
                return Err(ScanError::CollectTaskFailed {
                    task_id: task_id.to_string(),
                });
            }
            Ok(TaskStatus::Running) => {
                tracing::debug!(task_id = %task_id, attempt = attempt + 1, "Collection task running");
            }
            Err(err) => {
                tracing::warn!(
                    task_id = %task_id,
                    attempt = attempt + 1,
                    error = %err,
                    "Failed to read collection task status"
                );
            }
        }
    }

    Err(ScanError::CollectTaskTimeout {
        task_id: task_id.to_string(),
        attempts: policy.max_attempts,
    })
}
