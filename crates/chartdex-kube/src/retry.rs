//! Retry-on-conflict for optimistic-concurrency writes

use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use crate::error::{KubeError, Result};

/// Bounded exponential backoff for `Conflict` errors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub max_attempts: usize,

    /// Delay before the second attempt; doubles after every conflict
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBuilder {
        let ceiling = self
            .initial_backoff
            .checked_mul(2u32.pow(self.max_attempts.min(16) as u32))
            .unwrap_or(Duration::MAX);
        ExponentialBuilder::default()
            .with_min_delay(self.initial_backoff)
            .with_max_delay(ceiling)
            .with_factor(2.0)
            .with_max_times(self.max_attempts.saturating_sub(1))
    }
}

/// Run `op` until it succeeds or the attempts run out, whatever it fails with
///
/// For idempotent steps that must not be dropped on a transient error.
pub async fn retry_transient<T, F, Fut>(policy: &RetryPolicy, what: &str, op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    op.retry(policy.backoff())
        .notify(|err: &KubeError, delay: Duration| {
            tracing::debug!(operation = what, ?delay, "retrying after error: {}", err);
        })
        .await
}

/// Run `op` until it succeeds, fails with a non-conflict error, or the
/// attempts run out (`RetriesExhausted`)
pub async fn retry_on_conflict<T, F, Fut>(policy: &RetryPolicy, what: &str, op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let result = op
        .retry(policy.backoff())
        .when(KubeError::is_conflict)
        .notify(|err: &KubeError, delay: Duration| {
            tracing::debug!(operation = what, ?delay, "retrying after conflict: {}", err);
        })
        .await;

    match result {
        Err(e) if e.is_conflict() => Err(KubeError::RetriesExhausted {
            attempts: policy.max_attempts.max(1),
            last: e.to_string(),
        }),
        other => other,
    }
}
