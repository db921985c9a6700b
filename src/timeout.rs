//! Time budgets for analysis runs.
//!
//! Analysis itself is synchronous and bounded by input size. Callers that
//! need a wall-clock budget run it through these helpers on a tokio runtime.

use crate::error::{DetectorError, Result};
use crate::report::Report;
use crate::Detector;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error};

/// Default budget for a single analysis, in milliseconds.
pub const DEFAULT_TIMEOUT_MILLIS: u64 = 30_000;

/// Timeout settings for one operation.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Maximum duration for the operation
    pub duration: Duration,
    /// Whether to log when the budget is exceeded
    pub log_warnings: bool,
    /// Operation name for logging
    pub operation_name: String,
}

impl TimeoutConfig {
    pub fn new(duration: Duration, operation: impl Into<String>) -> Self {
        Self {
            duration,
            log_warnings: true,
            operation_name: operation.into(),
        }
    }

    pub fn default_timeout(operation: impl Into<String>) -> Self {
        Self::new(Duration::from_millis(DEFAULT_TIMEOUT_MILLIS), operation)
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Run a future, failing with `DetectorError::Timeout` if it exceeds the budget.
pub async fn with_timeout<T, F>(config: TimeoutConfig, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    debug!(
        operation = %config.operation_name,
        budget_ms = millis(config.duration),
        "starting timed operation"
    );

    match timeout(config.duration, future).await {
        Ok(result) => result,
        Err(_) => {
            if config.log_warnings {
                error!(
                    operation = %config.operation_name,
                    budget_ms = millis(config.duration),
                    "operation timed out"
                );
            }
            Err(DetectorError::Timeout {
                millis: millis(config.duration),
            })
        }
    }
}

/// Analyze `bytes` on the blocking pool within `budget`.
///
/// On timeout the blocking task is detached and finishes in the background;
/// its result is discarded.
pub async fn analyze_with_timeout(
    detector: Arc<Detector>,
    bytes: Vec<u8>,
    budget: Duration,
) -> Result<Report> {
    let task = tokio::task::spawn_blocking(move || detector.analyze(&bytes));
    let config = TimeoutConfig::new(budget, "analyze");
    with_timeout(config, async move {
        task.await
            .map_err(|e| DetectorError::Internal(format!("analysis task failed: {}", e)))?
    })
    .await
}
