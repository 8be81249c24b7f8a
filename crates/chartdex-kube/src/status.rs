//! Reconciliation status projection
//!
//! Derives a three-valued status from the `Ready` condition written by the
//! system of record, overlaid with what this engine knows: whether the index
//! has been cached and whether the last fetch for the current version failed.

use serde::Serialize;
use std::fmt;

use crate::resources::{CONDITION_READY, CONDITION_RECONCILING, HelmRepository};
use crate::sequencer::LaneFailure;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusReason {
    Pending,
    Succeeded,
    Failed,
}

impl fmt::Display for StatusReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusReason::Pending => f.write_str("pending"),
            StatusReason::Succeeded => f.write_str("succeeded"),
            StatusReason::Failed => f.write_str("failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryStatus {
    pub reason: StatusReason,
    pub user_message: String,
}

impl RepositoryStatus {
    pub fn pending(message: impl Into<String>) -> Self {
        Self {
            reason: StatusReason::Pending,
            user_message: message.into(),
        }
    }

    pub fn succeeded(message: impl Into<String>) -> Self {
        Self {
            reason: StatusReason::Succeeded,
            user_message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            reason: StatusReason::Failed,
            user_message: message.into(),
        }
    }

    /// Pollers keep polling while this is false
    pub fn is_terminal(&self) -> bool {
        self.reason != StatusReason::Pending
    }
}

/// Status as reported by the system of record alone
pub fn reconciled(repo: &HelmRepository) -> RepositoryStatus {
    let generation = repo.metadata.generation.unwrap_or_default();

    if repo
        .condition(CONDITION_RECONCILING)
        .map(|c| c.is_true())
        .unwrap_or(false)
    {
        return RepositoryStatus::pending("reconciliation in progress");
    }

    let Some(ready) = repo.condition(CONDITION_READY) else {
        return RepositoryStatus::pending("waiting to be reconciled");
    };

    // The condition must describe the current spec, not an older one
    let observed = ready
        .observed_generation
        .or_else(|| repo.status.as_ref().and_then(|s| s.observed_generation))
        .unwrap_or_default();
    if observed < generation {
        return RepositoryStatus::pending("waiting for the latest changes to be reconciled");
    }

    if ready.is_true() {
        RepositoryStatus::succeeded(ready.message.clone())
    } else if ready.is_false() {
        RepositoryStatus::failed(format!("{}: {}", ready.reason, ready.message))
    } else {
        RepositoryStatus::pending(ready.message.clone())
    }
}

/// Full status for API responses
pub fn project(
    repo: &HelmRepository,
    cached: bool,
    failure: Option<&LaneFailure>,
) -> RepositoryStatus {
    let status = reconciled(repo);
    if status.reason != StatusReason::Succeeded {
        return status;
    }

    if let Some(failure) = failure.filter(|f| f.version_token == repo.version_token()) {
        return RepositoryStatus::failed(failure.message.clone());
    }
    if !cached {
        return RepositoryStatus::pending("index not yet cached");
    }
    status
}
