//! Chartdex Kube - cluster side of the chart repository index
//!
//! This crate provides:
//! - **Sequencer**: per-repository event lanes that keep the index cache in
//!   step with `HelmRepository` objects, with delete-cancels-fetch semantics
//! - **Watch adapter**: turns the kube watch stream into lane events
//! - **Credentials**: system-managed or user-managed repository secrets
//! - **Authorization**: every read and write checked against the caller
//! - **Status**: pending / succeeded / failed projection for pollers
//! - **Service**: list, detail, add, update and delete repositories, and
//!   browse the packages they serve
//!
//! Test doubles live in the `testing` module, behind the `testing` feature.
//!
//! ## Example
//!
//! ```rust,no_run
//! use chartdex_kube::{EngineConfig, KubeCluster, Sequencer, watch};
//! use chartdex_repo::{MemoryIndexStore, RemoteIndexFetcher};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> chartdex_kube::Result<()> {
//! let cluster = Arc::new(KubeCluster::new().await?);
//! let config = EngineConfig::load()?;
//! let sequencer = Sequencer::new(
//!     Arc::new(MemoryIndexStore::new()),
//!     Arc::new(RemoteIndexFetcher::new()),
//!     cluster.clone(),
//!     config.sequencer(),
//! );
//!
//! let shutdown = CancellationToken::new();
//! watch::run(kube::Api::all(cluster.client().clone()), &sequencer, &shutdown).await?;
//! # Ok(())
//! # }
//! ```

pub mod authz;
pub mod cluster;
pub mod config;
pub mod credentials;
pub mod error;
pub mod resources;
pub mod retry;
pub mod sequencer;
pub mod service;
pub mod status;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod watch;

pub use authz::{
    AccessReviewer, AccessRule, Authorizer, Caller, KubeAccessReviewer, ListScope, Resource,
    StaticAccessReviewer, Verb,
};
pub use cluster::{Cluster, KubeCluster, MockCluster, OperationCounts, RepositoryApi, SecretApi};
pub use config::EngineConfig;
pub use credentials::{CredentialInput, CredentialResolver, SecretMode};
pub use error::{ErrorCode, KubeError, Result};
pub use resources::{HelmRepository, HelmRepositorySpec, HelmRepositoryStatus};
pub use retry::{RetryPolicy, retry_on_conflict};
pub use sequencer::{LaneFailure, RepositoryEvent, Sequencer, SequencerConfig};
pub use service::{
    AuthDetail, PackageSummary, RepositoryDetail, RepositoryRequest, RepositoryService,
    RepositorySummary,
};
pub use status::{RepositoryStatus, StatusReason};
pub use watch::EventTranslator;
