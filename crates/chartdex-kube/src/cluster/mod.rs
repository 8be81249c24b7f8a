//! System of record access
//!
//! The engine never talks to `kube::Api` directly; it goes through these
//! traits so the same code runs against a real cluster (`KubeCluster`) or the
//! in-memory `MockCluster` used by tests and local runs.

mod live;
mod mock;

pub use live::KubeCluster;
pub use mock::{MockCluster, OperationCounts};

use async_trait::async_trait;
use chartdex_repo::RepositoryRef;
use k8s_openapi::api::core::v1::Secret;

use crate::error::Result;
use crate::resources::HelmRepository;

/// CRUD on `HelmRepository` objects
///
/// Implementations must be Send + Sync for use across async tasks.
#[async_trait]
pub trait RepositoryApi: Send + Sync {
    /// `None` when the object does not exist
    async fn get_repository(&self, key: &RepositoryRef) -> Result<Option<HelmRepository>>;

    /// All repositories in `namespace`, or cluster-wide when `None`
    async fn list_repositories(&self, namespace: Option<&str>) -> Result<Vec<HelmRepository>>;

    /// Fails with `RepositoryAlreadyExists` when the name is taken
    async fn create_repository(&self, repo: &HelmRepository) -> Result<HelmRepository>;

    /// Replace the object; fails with `Conflict` when its resourceVersion is stale
    async fn update_repository(&self, repo: &HelmRepository) -> Result<HelmRepository>;

    /// Returns whether the object existed. With `resource_version` set the
    /// delete only succeeds against that exact version.
    async fn delete_repository(
        &self,
        key: &RepositoryRef,
        resource_version: Option<&str>,
    ) -> Result<bool>;
}

/// CRUD on `Secret` objects holding repository credentials
#[async_trait]
pub trait SecretApi: Send + Sync {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;

    async fn create_secret(&self, secret: &Secret) -> Result<Secret>;

    async fn update_secret(&self, secret: &Secret) -> Result<Secret>;

    /// Returns whether the secret existed
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<bool>;
}

/// Both halves of the system of record
pub trait Cluster: RepositoryApi + SecretApi {}

impl<T: RepositoryApi + SecretApi> Cluster for T {}
