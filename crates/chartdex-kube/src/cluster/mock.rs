//! In-memory system of record for testing
//!
//! Behaves like the API server where the engine can observe it: resource
//! versions, generation bumps on spec changes, optimistic-concurrency
//! conflicts, and no garbage collection of owned secrets.

use async_trait::async_trait;
use chartdex_repo::RepositoryRef;
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use kube::core::ErrorResponse;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use super::{RepositoryApi, SecretApi};
use crate::error::{KubeError, Result};
use crate::resources::{
    Artifact, CONDITION_READY, Condition, HelmRepository, HelmRepositoryStatus, PLURAL,
};

/// In-memory cluster for testing
#[derive(Clone, Default)]
pub struct MockCluster {
    state: Arc<RwLock<MockState>>,
    /// Track operation counts for assertions
    operations: Arc<RwLock<OperationCounts>>,
}

#[derive(Default)]
struct MockState {
    repositories: BTreeMap<RepositoryRef, HelmRepository>,
    secrets: BTreeMap<(String, String), Secret>,
    last_version: u64,
    pending_conflicts: usize,
}

impl MockState {
    fn next_version(&mut self) -> String {
        self.last_version += 1;
        self.last_version.to_string()
    }
}

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone)]
pub struct OperationCounts {
    pub gets: usize,
    pub lists: usize,
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
    pub conflicts: usize,
    pub secret_gets: usize,
    pub secret_creates: usize,
    pub secret_updates: usize,
    pub secret_deletes: usize,
}

fn already_exists(kind: &str, name: &str) -> KubeError {
    KubeError::Api(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{} \"{}\" already exists", kind, name),
        reason: "AlreadyExists".to_string(),
        code: 409,
    }))
}

impl MockCluster {
    /// Create a new empty mock cluster
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with pre-populated repositories
    pub fn with_repositories(repositories: Vec<HelmRepository>) -> Self {
        let cluster = Self::new();
        {
            let mut state = cluster.state.write().unwrap();
            for mut repo in repositories {
                let version = state.next_version();
                repo.metadata.resource_version = Some(version.clone());
                repo.metadata.uid.get_or_insert_with(|| format!("uid-{}", version));
                repo.metadata.generation.get_or_insert(1);
                state.repositories.insert(repo.key(), repo);
            }
        }
        cluster
    }

    /// Make the next `count` repository updates fail with a conflict
    pub fn inject_conflicts(&self, count: usize) {
        self.state.write().unwrap().pending_conflicts = count;
    }

    /// Get operation counts for assertions
    pub fn operation_counts(&self) -> OperationCounts {
        self.operations.read().unwrap().clone()
    }

    /// Reset operation counts
    pub fn reset_counts(&self) {
        *self.operations.write().unwrap() = OperationCounts::default();
    }

    pub fn repository(&self, key: &RepositoryRef) -> Option<HelmRepository> {
        self.state.read().unwrap().repositories.get(key).cloned()
    }

    pub fn repository_count(&self) -> usize {
        self.state.read().unwrap().repositories.len()
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.state
            .read()
            .unwrap()
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn secret_count(&self) -> usize {
        self.state.read().unwrap().secrets.len()
    }

    /// Write the status subresource, as the source controller would
    pub fn set_status(
        &self,
        key: &RepositoryRef,
        status: HelmRepositoryStatus,
    ) -> Option<HelmRepository> {
        let mut state = self.state.write().unwrap();
        let version = state.next_version();
        let repo = state.repositories.get_mut(key)?;
        repo.status = Some(status);
        repo.metadata.resource_version = Some(version);
        Some(repo.clone())
    }

    /// Report a successful reconciliation of the current generation
    pub fn mark_ready(&self, key: &RepositoryRef, revision: &str) -> Option<HelmRepository> {
        let generation = self.repository(key)?.metadata.generation;
        let mut ready = Condition::new(
            CONDITION_READY,
            true,
            "Succeeded",
            &format!("stored artifact: revision '{}'", revision),
        );
        ready.observed_generation = generation;
        self.set_status(
            key,
            HelmRepositoryStatus {
                observed_generation: generation,
                conditions: vec![ready],
                artifact: Some(Artifact {
                    revision: revision.to_string(),
                    ..Default::default()
                }),
                url: None,
            },
        )
    }

    /// Report a failed reconciliation of the current generation
    pub fn mark_failed(
        &self,
        key: &RepositoryRef,
        reason: &str,
        message: &str,
    ) -> Option<HelmRepository> {
        let generation = self.repository(key)?.metadata.generation;
        let mut ready = Condition::new(CONDITION_READY, false, reason, message);
        ready.observed_generation = generation;
        self.set_status(
            key,
            HelmRepositoryStatus {
                observed_generation: generation,
                conditions: vec![ready],
                artifact: None,
                url: None,
            },
        )
    }
}

#[async_trait]
impl RepositoryApi for MockCluster {
    async fn get_repository(&self, key: &RepositoryRef) -> Result<Option<HelmRepository>> {
        self.operations.write().unwrap().gets += 1;
        Ok(self.repository(key))
    }

    async fn list_repositories(&self, namespace: Option<&str>) -> Result<Vec<HelmRepository>> {
        self.operations.write().unwrap().lists += 1;

        let state = self.state.read().unwrap();
        Ok(state
            .repositories
            .iter()
            .filter(|(key, _)| namespace.map(|ns| ns == key.namespace).unwrap_or(true))
            .map(|(_, repo)| repo.clone())
            .collect())
    }

    async fn create_repository(&self, repo: &HelmRepository) -> Result<HelmRepository> {
        self.operations.write().unwrap().creates += 1;

        let key = repo.key();
        let mut state = self.state.write().unwrap();
        if state.repositories.contains_key(&key) {
            return Err(KubeError::RepositoryAlreadyExists {
                name: key.name,
                namespace: key.namespace,
            });
        }

        let version = state.next_version();
        let mut created = repo.clone();
        created.metadata.uid = Some(format!("uid-{}", version));
        created.metadata.resource_version = Some(version);
        created.metadata.generation = Some(1);
        created.status = None;
        state.repositories.insert(key, created.clone());
        Ok(created)
    }

    async fn update_repository(&self, repo: &HelmRepository) -> Result<HelmRepository> {
        self.operations.write().unwrap().updates += 1;

        let key = repo.key();
        let mut state = self.state.write().unwrap();

        let conflict = || KubeError::Conflict {
            kind: PLURAL.to_string(),
            name: key.name.clone(),
        };

        if state.pending_conflicts > 0 {
            state.pending_conflicts -= 1;
            self.operations.write().unwrap().conflicts += 1;
            return Err(conflict());
        }

        let version = state.next_version();
        let Some(stored) = state.repositories.get_mut(&key) else {
            return Err(KubeError::RepositoryNotFound {
                name: key.name.clone(),
                namespace: key.namespace.clone(),
            });
        };

        if repo.metadata.resource_version.is_some()
            && repo.metadata.resource_version != stored.metadata.resource_version
        {
            self.operations.write().unwrap().conflicts += 1;
            return Err(conflict());
        }

        if stored.spec != repo.spec {
            stored.metadata.generation = Some(stored.metadata.generation.unwrap_or(0) + 1);
        }
        stored.spec = repo.spec.clone();
        stored.metadata.labels = repo.metadata.labels.clone();
        stored.metadata.annotations = repo.metadata.annotations.clone();
        stored.metadata.resource_version = Some(version);
        Ok(stored.clone())
    }

    async fn delete_repository(
        &self,
        key: &RepositoryRef,
        resource_version: Option<&str>,
    ) -> Result<bool> {
        self.operations.write().unwrap().deletes += 1;

        let mut state = self.state.write().unwrap();
        let Some(stored) = state.repositories.get(key) else {
            return Ok(false);
        };
        if let Some(rv) = resource_version {
            if stored.metadata.resource_version.as_deref() != Some(rv) {
                self.operations.write().unwrap().conflicts += 1;
                return Err(KubeError::Conflict {
                    kind: PLURAL.to_string(),
                    name: key.name.clone(),
                });
            }
        }
        state.repositories.remove(key);
        Ok(true)
    }
}

#[async_trait]
impl SecretApi for MockCluster {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        self.operations.write().unwrap().secret_gets += 1;
        Ok(self.secret(namespace, name))
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret> {
        self.operations.write().unwrap().secret_creates += 1;

        let id = (secret.namespace().unwrap_or_default(), secret.name_any());
        let mut state = self.state.write().unwrap();
        if state.secrets.contains_key(&id) {
            return Err(already_exists("secrets", &id.1));
        }

        let version = state.next_version();
        let mut created = secret.clone();
        created.metadata.uid = Some(format!("uid-{}", version));
        created.metadata.resource_version = Some(version);
        state.secrets.insert(id, created.clone());
        Ok(created)
    }

    async fn update_secret(&self, secret: &Secret) -> Result<Secret> {
        self.operations.write().unwrap().secret_updates += 1;

        let id = (secret.namespace().unwrap_or_default(), secret.name_any());
        let mut state = self.state.write().unwrap();
        let version = state.next_version();
        let Some(stored) = state.secrets.get_mut(&id) else {
            return Err(KubeError::SecretNotFound {
                name: id.1,
                namespace: id.0,
            });
        };

        let mut updated = secret.clone();
        updated.metadata.uid = stored.metadata.uid.clone();
        updated.metadata.resource_version = Some(version);
        *stored = updated.clone();
        Ok(updated)
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<bool> {
        self.operations.write().unwrap().secret_deletes += 1;

        let mut state = self.state.write().unwrap();
        Ok(state
            .secrets
            .remove(&(namespace.to_string(), name.to_string()))
            .is_some())
    }
}
