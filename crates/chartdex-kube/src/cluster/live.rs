//! System of record backed by the Kubernetes API server

use async_trait::async_trait;
use chartdex_repo::RepositoryRef;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, DeleteParams, ListParams, PostParams, Preconditions};
use kube::{Client, ResourceExt};

use super::{RepositoryApi, SecretApi};
use crate::error::{KubeError, Result};
use crate::resources::{HelmRepository, PLURAL};

/// `RepositoryApi` + `SecretApi` over a kube `Client`
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    /// Connect using the ambient kubeconfig or in-cluster config
    pub async fn new() -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self { client })
    }

    /// Create with an existing client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn repositories(&self, namespace: Option<&str>) -> Api<HelmRepository> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn api_code(e: &kube::Error) -> Option<(u16, &str)> {
    match e {
        kube::Error::Api(resp) => Some((resp.code, resp.reason.as_str())),
        _ => None,
    }
}

fn conflict(kind: &str, name: &str, e: kube::Error) -> KubeError {
    let stale = matches!(api_code(&e), Some((409, reason)) if reason != "AlreadyExists");
    if stale {
        KubeError::Conflict {
            kind: kind.to_string(),
            name: name.to_string(),
        }
    } else {
        KubeError::Api(e)
    }
}

#[async_trait]
impl RepositoryApi for KubeCluster {
    async fn get_repository(&self, key: &RepositoryRef) -> Result<Option<HelmRepository>> {
        Ok(self
            .repositories(Some(&key.namespace))
            .get_opt(&key.name)
            .await?)
    }

    async fn list_repositories(&self, namespace: Option<&str>) -> Result<Vec<HelmRepository>> {
        let list = self
            .repositories(namespace)
            .list(&ListParams::default())
            .await?;
        Ok(list.items)
    }

    async fn create_repository(&self, repo: &HelmRepository) -> Result<HelmRepository> {
        let key = repo.key();
        match self
            .repositories(Some(&key.namespace))
            .create(&PostParams::default(), repo)
            .await
        {
            Ok(created) => Ok(created),
            Err(e) if matches!(api_code(&e), Some((409, _))) => {
                Err(KubeError::RepositoryAlreadyExists {
                    name: key.name,
                    namespace: key.namespace,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update_repository(&self, repo: &HelmRepository) -> Result<HelmRepository> {
        let key = repo.key();
        match self
            .repositories(Some(&key.namespace))
            .replace(&key.name, &PostParams::default(), repo)
            .await
        {
            Ok(updated) => Ok(updated),
            Err(e) if matches!(api_code(&e), Some((404, _))) => Err(KubeError::RepositoryNotFound {
                name: key.name,
                namespace: key.namespace,
            }),
            Err(e) => Err(conflict(PLURAL, &key.name, e)),
        }
    }

    async fn delete_repository(
        &self,
        key: &RepositoryRef,
        resource_version: Option<&str>,
    ) -> Result<bool> {
        let mut params = DeleteParams::default();
        if let Some(rv) = resource_version {
            params.preconditions = Some(Preconditions {
                resource_version: Some(rv.to_string()),
                uid: None,
            });
        }

        match self
            .repositories(Some(&key.namespace))
            .delete(&key.name, &params)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if matches!(api_code(&e), Some((404, _))) => Ok(false),
            Err(e) => Err(conflict(PLURAL, &key.name, e)),
        }
    }
}

#[async_trait]
impl SecretApi for KubeCluster {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        Ok(self.secrets(namespace).get_opt(name).await?)
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret> {
        let namespace = secret.namespace().unwrap_or_default();
        Ok(self
            .secrets(&namespace)
            .create(&PostParams::default(), secret)
            .await?)
    }

    async fn update_secret(&self, secret: &Secret) -> Result<Secret> {
        let namespace = secret.namespace().unwrap_or_default();
        let name = secret.name_any();
        self.secrets(&namespace)
            .replace(&name, &PostParams::default(), secret)
            .await
            .map_err(|e| conflict("secrets", &name, e))
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<bool> {
        match self
            .secrets(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if matches!(api_code(&e), Some((404, _))) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
