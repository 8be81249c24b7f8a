//! Repository queries and mutations on behalf of a caller
//!
//! Every operation is authorized against the caller's rights first. Reads
//! combine the system of record with the index cache; writes go to the
//! system of record only and reach the cache through the watch loop.

use chartdex_repo::{AuthMaterial, IndexStore, RepositoryRef, VersionRecord};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use serde::Serialize;
use std::sync::Arc;

use crate::authz::{Authorizer, Caller, Resource, Verb};
use crate::cluster::{Cluster, RepositoryApi, SecretApi};
use crate::config::EngineConfig;
use crate::credentials::{
    CredentialInput, CredentialResolver, SecretMode, auth_from_secret, build_owned_secret,
    is_owned_by,
};
use crate::error::{KubeError, Result};
use crate::resources::{HelmRepository, HelmRepositorySpec, LocalObjectReference};
use crate::retry::{RetryPolicy, retry_on_conflict};
use crate::sequencer::Sequencer;
use crate::status::{self, RepositoryStatus};

/// Add or update request
#[derive(Debug, Clone)]
pub struct RepositoryRequest {
    pub key: RepositoryRef,
    pub url: String,
    /// `default` or `oci`; derived from the URL scheme when unset
    pub repo_type: Option<String>,
    /// Poll interval, keeps the current (or default) one when unset
    pub interval: Option<String>,
    pub pass_credentials: bool,
    pub credentials: CredentialInput,
}

impl RepositoryRequest {
    pub fn new(key: RepositoryRef, url: impl Into<String>) -> Self {
        Self {
            key,
            url: url.into(),
            repo_type: None,
            interval: None,
            pass_credentials: false,
            credentials: CredentialInput::None,
        }
    }

    pub fn with_credentials(mut self, credentials: CredentialInput) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_interval(mut self, interval: impl Into<String>) -> Self {
        self.interval = Some(interval.into());
        self
    }

    fn apply_to(&self, spec: &mut HelmRepositorySpec) {
        spec.url = self.url.clone();
        spec.repo_type = self
            .repo_type
            .clone()
            .or_else(|| self.url.starts_with("oci://").then(|| "oci".to_string()));
        if let Some(interval) = &self.interval {
            spec.interval = interval.clone();
        }
        spec.pass_credentials = self.pass_credentials;
    }

    fn validate(&self) -> Result<()> {
        if self.key.namespace.is_empty() || self.key.name.is_empty() {
            return Err(KubeError::InvalidArgument(
                "repository namespace and name are required".to_string(),
            ));
        }
        let mut spec = HelmRepositorySpec::for_url("");
        self.apply_to(&mut spec);
        spec.validate()
    }
}

/// List entry for a repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositorySummary {
    pub namespace: String,
    pub name: String,
    pub url: String,
    #[serde(rename = "type")]
    pub repo_type: String,
    pub has_credentials: bool,
    pub status: RepositoryStatus,
}

impl RepositorySummary {
    fn new(repo: &HelmRepository, status: RepositoryStatus) -> Self {
        Self {
            namespace: repo.namespace().unwrap_or_default(),
            name: repo.name_any(),
            url: repo.spec.url.clone(),
            repo_type: repo.spec.kind().as_str().to_string(),
            has_credentials: repo.spec.secret_ref.is_some(),
            status,
        }
    }
}

/// Credentials as shown to a caller; secret values are never returned
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AuthDetail {
    None,
    Basic {
        username: String,
    },
    #[serde(rename_all = "camelCase")]
    Tls {
        client_certificate: bool,
        custom_ca: bool,
    },
    /// The caller may not read secrets cluster-wide
    Redacted { secret: String },
    /// The referenced secret is missing or unusable
    Unresolved { secret: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryDetail {
    #[serde(flatten)]
    pub summary: RepositorySummary,
    pub interval: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    pub pass_credentials: bool,
    pub suspend: bool,
    pub auth: AuthDetail,
    /// Packages in the cached index, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexed_at: Option<DateTime<Utc>>,
}

/// One package across the visible repositories
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageSummary {
    pub repository: RepositoryRef,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    pub latest_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    pub deprecated: bool,
}

/// Caller-facing repository operations
pub struct RepositoryService {
    repositories: Arc<dyn RepositoryApi>,
    secrets: Arc<dyn SecretApi>,
    authorizer: Authorizer,
    store: Arc<dyn IndexStore>,
    sequencer: Option<Sequencer>,
    secret_mode: SecretMode,
    retry: RetryPolicy,
}

impl RepositoryService {
    pub fn new<C: Cluster + 'static>(
        cluster: Arc<C>,
        authorizer: Authorizer,
        store: Arc<dyn IndexStore>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            repositories: cluster.clone(),
            secrets: cluster,
            authorizer,
            store,
            sequencer: None,
            secret_mode: config.secret_mode,
            retry: config.retry.clone(),
        }
    }

    /// Overlay lane failures from a running sequencer onto reported status
    pub fn with_sequencer(mut self, sequencer: Sequencer) -> Self {
        self.sequencer = Some(sequencer);
        self
    }

    pub fn secret_mode(&self) -> SecretMode {
        self.secret_mode
    }

    /// Repositories in `namespace`, or everywhere the caller may list
    pub async fn get_repository_summaries(
        &self,
        caller: &Caller,
        namespace: Option<&str>,
    ) -> Result<Vec<RepositorySummary>> {
        let repos = self.visible_repositories(caller, namespace).await?;
        let mut summaries = Vec::with_capacity(repos.len());
        for repo in &repos {
            let status = self.status_of(repo).await?;
            summaries.push(RepositorySummary::new(repo, status));
        }
        Ok(summaries)
    }

    pub async fn get_repository_detail(
        &self,
        caller: &Caller,
        key: &RepositoryRef,
    ) -> Result<RepositoryDetail> {
        self.authorizer
            .check(caller, Some(&key.namespace), Resource::HelmRepositories, Verb::Get)
            .await?;
        let repo = self.get_existing(key).await?;

        let entry = self.store.get(key).await?;
        let status = self.status_of(&repo).await?;
        let auth = self.auth_detail(caller, &repo).await;

        Ok(RepositoryDetail {
            summary: RepositorySummary::new(&repo, status),
            interval: repo.spec.interval.clone(),
            timeout: repo.spec.timeout.clone(),
            pass_credentials: repo.spec.pass_credentials,
            suspend: repo.spec.suspend,
            auth,
            package_count: entry.as_ref().map(|e| e.payload.package_count()),
            indexed_at: entry.map(|e| e.fetched_at),
        })
    }

    /// Create a repository, and its owned secret for inline credentials
    pub async fn add_repository(
        &self,
        caller: &Caller,
        request: RepositoryRequest,
    ) -> Result<HelmRepository> {
        let key = request.key.clone();
        self.authorizer
            .check(caller, Some(&key.namespace), Resource::HelmRepositories, Verb::Create)
            .await?;
        self.authorize_credentials(caller, &key.namespace, &request.credentials, Verb::Create)
            .await?;
        self.check_credential_mode(&request.credentials)?;
        request.validate()?;

        let mut spec = HelmRepositorySpec::for_url(&request.url);
        request.apply_to(&mut spec);
        if let CredentialInput::SecretRef(name) = &request.credentials {
            self.require_secret(&key.namespace, name).await?;
            spec.secret_ref = Some(LocalObjectReference { name: name.clone() });
        }

        let created = self
            .repositories
            .create_repository(&HelmRepository::build(&key, spec))
            .await?;
        tracing::info!(repository = %key, url = %request.url, "repository added");

        if !request.credentials.is_inline() {
            return Ok(created);
        }

        // The secret needs the repository's uid for its owner reference
        let attached = async {
            let stored = self.store_owned_secret(&created, &request.credentials).await?;
            self.point_at_secret(&key, Some(stored.name)).await
        }
        .await;

        match attached {
            Ok(repo) => Ok(repo),
            Err(e) => {
                tracing::warn!(repository = %key, "storing credentials failed, removing repository: {}", e);
                if let Err(cleanup) = self.repositories.delete_repository(&key, None).await {
                    tracing::warn!(repository = %key, "failed to remove repository: {}", cleanup);
                }
                Err(e)
            }
        }
    }

    /// Update url, type, interval and credentials of an existing repository
    ///
    /// Nothing is written unless every check passes, and a referenced secret
    /// is verified before the repository is touched.
    pub async fn update_repository(
        &self,
        caller: &Caller,
        request: RepositoryRequest,
    ) -> Result<HelmRepository> {
        let key = request.key.clone();
        self.authorizer
            .check(caller, Some(&key.namespace), Resource::HelmRepositories, Verb::Update)
            .await?;
        self.authorize_credentials(caller, &key.namespace, &request.credentials, Verb::Update)
            .await?;
        self.check_credential_mode(&request.credentials)?;
        request.validate()?;

        if let CredentialInput::SecretRef(name) = &request.credentials {
            self.require_secret(&key.namespace, name).await?;
        }
        let existing = self.get_existing(&key).await?;

        // The secret is written first so the repository never points at a
        // missing one; a failed update puts the previous data back.
        let mut stored = None;
        let secret_name = match &request.credentials {
            CredentialInput::SecretRef(name) => Some(name.clone()),
            input if input.is_inline() => {
                let written = self.store_owned_secret(&existing, input).await?;
                let name = written.name.clone();
                stored = Some(written);
                Some(name)
            }
            _ => None,
        };

        let request = &request;
        let target = &key;
        let result = retry_on_conflict(&self.retry, "update repository", || {
            let secret_ref = secret_name
                .clone()
                .map(|name| LocalObjectReference { name });
            async move {
                let mut repo = self.get_existing(target).await?;
                request.apply_to(&mut repo.spec);
                repo.spec.secret_ref = secret_ref;
                self.repositories.update_repository(&repo).await
            }
        })
        .await;
        let updated = match result {
            Ok(updated) => updated,
            Err(e) => {
                if let Some(stored) = stored {
                    self.roll_back_owned_secret(&existing, stored).await;
                }
                return Err(e);
            }
        };
        tracing::info!(repository = %key, "repository updated");

        // Credentials dropped: the old owned secret has no user left
        if secret_name.is_none() && existing.spec.secret_ref.is_some() {
            CredentialResolver::new(self.secrets.clone())
                .delete_owned(&existing)
                .await?;
        }

        Ok(updated)
    }

    /// Delete a repository; its cache entry and owned secret follow through the watch
    pub async fn delete_repository(&self, caller: &Caller, key: &RepositoryRef) -> Result<()> {
        self.authorizer
            .check(caller, Some(&key.namespace), Resource::HelmRepositories, Verb::Delete)
            .await?;

        let deleted = retry_on_conflict(&self.retry, "delete repository", || async move {
            let repo = self.get_existing(key).await?;
            self.repositories
                .delete_repository(key, repo.metadata.resource_version.as_deref())
                .await
        })
        .await?;

        if !deleted {
            return Err(not_found(key));
        }
        tracing::info!(repository = %key, "repository deleted");
        Ok(())
    }

    /// Latest version of every package in the visible, cached indexes
    ///
    /// Repositories with credentials are skipped when the caller may not
    /// read secrets in their namespace.
    pub async fn get_available_package_summaries(
        &self,
        caller: &Caller,
        namespace: Option<&str>,
    ) -> Result<Vec<PackageSummary>> {
        let repos = self.visible_repositories(caller, namespace).await?;

        let mut packages = Vec::new();
        for repo in &repos {
            let key = repo.key();
            if !self.may_read_index(caller, repo).await {
                tracing::debug!(repository = %key, user = %caller.user, "skipping repository with unreadable credentials");
                continue;
            }
            let Some(entry) = self.store.get(&key).await? else {
                continue;
            };
            for package in &entry.payload.packages {
                let Some(latest) = package.latest() else {
                    continue;
                };
                packages.push(PackageSummary {
                    repository: key.clone(),
                    name: package.name.clone(),
                    description: package.description.clone(),
                    icon: package.icon.clone(),
                    latest_version: latest.version.clone(),
                    app_version: latest.app_version.clone(),
                    deprecated: latest.deprecated,
                });
            }
        }

        packages.sort_by(|a, b| {
            a.name
                .cmp(&b.name)
                .then_with(|| a.repository.cmp(&b.repository))
        });
        Ok(packages)
    }

    /// All versions of `package` in one repository, newest first
    pub async fn get_available_package_versions(
        &self,
        caller: &Caller,
        key: &RepositoryRef,
        package: &str,
    ) -> Result<Vec<VersionRecord>> {
        self.authorizer
            .check(caller, Some(&key.namespace), Resource::HelmRepositories, Verb::Get)
            .await?;
        let repo = self.get_existing(key).await?;
        if !self.may_read_index(caller, &repo).await {
            return Err(KubeError::PermissionDenied {
                verb: Verb::Get.to_string(),
                resource: Resource::Secrets.plural().to_string(),
                scope: format!("namespace '{}'", key.namespace),
            });
        }

        self.store
            .get(key)
            .await?
            .and_then(|entry| entry.payload.get(package).map(|p| p.versions.clone()))
            .ok_or_else(|| KubeError::PackageNotFound {
                name: package.to_string(),
                repository: key.to_string(),
            })
    }

    async fn visible_repositories(
        &self,
        caller: &Caller,
        namespace: Option<&str>,
    ) -> Result<Vec<HelmRepository>> {
        if let Some(ns) = namespace {
            self.authorizer
                .check(caller, Some(ns), Resource::HelmRepositories, Verb::List)
                .await?;
            return self.repositories.list_repositories(Some(ns)).await;
        }

        let all = self.repositories.list_repositories(None).await?;
        let namespaces: Vec<String> = all.iter().filter_map(|r| r.namespace()).collect();
        let scope = self
            .authorizer
            .list_scope(caller, None, Resource::HelmRepositories, namespaces)
            .await?;
        Ok(all
            .into_iter()
            .filter(|r| scope.includes(&r.namespace().unwrap_or_default()))
            .collect())
    }

    async fn status_of(&self, repo: &HelmRepository) -> Result<RepositoryStatus> {
        let key = repo.key();
        let cached = self.store.source_version(&key).await?.as_deref()
            == Some(repo.version_token().as_str());
        let failure = self.sequencer.as_ref().and_then(|s| s.failure(&key));
        Ok(status::project(repo, cached, failure.as_ref()))
    }

    async fn auth_detail(&self, caller: &Caller, repo: &HelmRepository) -> AuthDetail {
        let Some(name) = repo.spec.secret_name() else {
            return AuthDetail::None;
        };
        // Resolved auth is for cluster-wide secret readers only
        if !self.authorizer.can_read_secrets(caller, None).await {
            return AuthDetail::Redacted {
                secret: name.to_string(),
            };
        }

        let unresolved = |message: String| AuthDetail::Unresolved {
            secret: name.to_string(),
            message,
        };
        let namespace = repo.namespace().unwrap_or_default();
        let secret = match self.secrets.get_secret(&namespace, name).await {
            Ok(Some(secret)) => secret,
            Ok(None) => return unresolved("secret not found".to_string()),
            Err(e) => return unresolved(e.to_string()),
        };
        match auth_from_secret(&secret) {
            Ok(AuthMaterial::None) => AuthDetail::None,
            Ok(AuthMaterial::Basic { username, .. }) => AuthDetail::Basic { username },
            Ok(AuthMaterial::Tls {
                cert_pem, ca_pem, ..
            }) => AuthDetail::Tls {
                client_certificate: !cert_pem.is_empty(),
                custom_ca: ca_pem.is_some(),
            },
            Err(e) => unresolved(e.to_string()),
        }
    }

    async fn may_read_index(&self, caller: &Caller, repo: &HelmRepository) -> bool {
        if repo.spec.secret_ref.is_none() {
            return true;
        }
        let namespace = repo.namespace().unwrap_or_default();
        self.authorizer.can_read_secrets(caller, Some(&namespace)).await
    }

    async fn authorize_credentials(
        &self,
        caller: &Caller,
        namespace: &str,
        credentials: &CredentialInput,
        verb: Verb,
    ) -> Result<()> {
        match credentials {
            CredentialInput::None => Ok(()),
            CredentialInput::SecretRef(_) => {
                self.authorizer
                    .check(caller, Some(namespace), Resource::Secrets, Verb::Get)
                    .await
            }
            _ => {
                self.authorizer
                    .check(caller, Some(namespace), Resource::Secrets, verb)
                    .await
            }
        }
    }

    fn check_credential_mode(&self, credentials: &CredentialInput) -> Result<()> {
        match (self.secret_mode, credentials) {
            (SecretMode::UserManaged, input) if input.is_inline() => {
                Err(KubeError::InvalidArgument(
                    "inline credentials are not accepted with user-managed secrets, reference an existing secret instead".to_string(),
                ))
            }
            (SecretMode::SystemManaged, CredentialInput::SecretRef(name)) => {
                Err(KubeError::InvalidArgument(format!(
                    "cannot reference existing secret '{}' with system-managed secrets, pass the credentials inline",
                    name
                )))
            }
            _ => Ok(()),
        }
    }

    async fn require_secret(&self, namespace: &str, name: &str) -> Result<()> {
        match self.secrets.get_secret(namespace, name).await? {
            Some(_) => Ok(()),
            None => Err(KubeError::SecretNotFound {
                name: name.to_string(),
                namespace: namespace.to_string(),
            }),
        }
    }

    /// Create or refresh the repository's owned secret
    async fn store_owned_secret(
        &self,
        repo: &HelmRepository,
        credentials: &CredentialInput,
    ) -> Result<StoredSecret> {
        let desired = build_owned_secret(repo, credentials);
        let name = desired.name_any();
        let namespace = repo.namespace().unwrap_or_default();

        match self.secrets.get_secret(&namespace, &name).await? {
            Some(current) if is_owned_by(&current, repo) => {
                let mut secret = current.clone();
                secret.data = desired.data;
                self.secrets.update_secret(&secret).await?;
                return Ok(StoredSecret {
                    name,
                    previous: Some(current),
                });
            }
            Some(_) => {
                return Err(KubeError::InvalidArgument(format!(
                    "secret '{}' already exists and is not owned by repository '{}'",
                    name,
                    repo.key()
                )));
            }
            None => {
                self.secrets.create_secret(&desired).await?;
                tracing::debug!(secret = %name, namespace = %namespace, "created owned secret");
            }
        }
        Ok(StoredSecret {
            name,
            previous: None,
        })
    }

    /// Undo `store_owned_secret` after the repository update it belonged to failed
    async fn roll_back_owned_secret(&self, repo: &HelmRepository, stored: StoredSecret) {
        let namespace = repo.namespace().unwrap_or_default();
        let restored = match stored.previous {
            Some(previous) => match self.secrets.get_secret(&namespace, &stored.name).await {
                Ok(Some(mut current)) => {
                    current.data = previous.data;
                    self.secrets.update_secret(&current).await.map(|_| ())
                }
                Ok(None) => Ok(()),
                Err(e) => Err(e),
            },
            None => self.secrets.delete_secret(&namespace, &stored.name).await.map(|_| ()),
        };
        if let Err(e) = restored {
            tracing::warn!(
                repository = %repo.key(),
                secret = %stored.name,
                "failed to restore owned secret: {}",
                e
            );
        }
    }

    async fn point_at_secret(
        &self,
        key: &RepositoryRef,
        secret: Option<String>,
    ) -> Result<HelmRepository> {
        retry_on_conflict(&self.retry, "set repository secret", || {
            let secret_ref = secret.clone().map(|name| LocalObjectReference { name });
            async move {
                let mut repo = self.get_existing(key).await?;
                repo.spec.secret_ref = secret_ref;
                self.repositories.update_repository(&repo).await
            }
        })
        .await
    }

    async fn get_existing(&self, key: &RepositoryRef) -> Result<HelmRepository> {
        self.repositories
            .get_repository(key)
            .await?
            .ok_or_else(|| not_found(key))
    }
}

/// An owned secret write and what it replaced
struct StoredSecret {
    name: String,
    /// `None` when the secret was created
    previous: Option<Secret>,
}

fn not_found(key: &RepositoryRef) -> KubeError {
    KubeError::RepositoryNotFound {
        name: key.name.clone(),
        namespace: key.namespace.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::{AccessRule, StaticAccessReviewer};
    use crate::cluster::MockCluster;
    use crate::status::StatusReason;
    use crate::testing::sample_index;
    use chartdex_repo::{IndexCacheEntry, MemoryIndexStore};
    use std::time::Duration;

    const URL: &str = "https://charts.example.com/stable";

    struct Fixture {
        cluster: Arc<MockCluster>,
        store: Arc<MemoryIndexStore>,
        service: RepositoryService,
    }

    fn fixture(reviewer: StaticAccessReviewer, mode: SecretMode) -> Fixture {
        let cluster = Arc::new(MockCluster::new());
        let store = Arc::new(MemoryIndexStore::new());
        let config = EngineConfig {
            secret_mode: mode,
            retry: RetryPolicy {
                max_attempts: 5,
                initial_backoff: Duration::from_millis(1),
            },
            ..Default::default()
        };
        let service = RepositoryService::new(
            cluster.clone(),
            Authorizer::new(Arc::new(reviewer)),
            store.clone(),
            &config,
        );
        Fixture {
            cluster,
            store,
            service,
        }
    }

    fn admin() -> Caller {
        Caller::new("admin")
    }

    /// "dev" may read repositories in team-a only, and no secrets; "ops" may
    /// also read secrets in team-a
    fn team_a_reader() -> StaticAccessReviewer {
        StaticAccessReviewer::new()
            .allow(
                AccessRule::for_user("admin")
                    .verbs(&[Verb::Get, Verb::List, Verb::Create, Verb::Update, Verb::Delete])
                    .resources(&[Resource::HelmRepositories, Resource::Secrets]),
            )
            .allow(
                AccessRule::for_user("dev")
                    .verbs(&[Verb::Get, Verb::List])
                    .resources(&[Resource::HelmRepositories])
                    .in_namespaces(&["team-a"]),
            )
            .allow(
                AccessRule::for_user("ops")
                    .verbs(&[Verb::Get, Verb::List])
                    .resources(&[Resource::HelmRepositories, Resource::Secrets])
                    .in_namespaces(&["team-a"]),
            )
    }

    fn basic(user: &str) -> CredentialInput {
        CredentialInput::Basic {
            username: user.to_string(),
            password: "s3cret".to_string(),
        }
    }

    async fn add(f: &Fixture, ns: &str, name: &str) -> HelmRepository {
        f.service
            .add_repository(&admin(), RepositoryRequest::new(RepositoryRef::new(ns, name), URL))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_cluster_wide_list_is_filtered_by_rights() {
        let f = fixture(team_a_reader(), SecretMode::SystemManaged);
        add(&f, "team-a", "one").await;
        add(&f, "team-b", "two").await;

        let all = f.service.get_repository_summaries(&admin(), None).await.unwrap();
        assert_eq!(all.len(), 2);

        let visible = f
            .service
            .get_repository_summaries(&Caller::new("dev"), None)
            .await
            .unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].namespace, "team-a");

        let nobody = f
            .service
            .get_repository_summaries(&Caller::new("mallory"), None)
            .await
            .unwrap();
        assert!(nobody.is_empty());
    }

    #[tokio::test]
    async fn test_namespace_list_without_rights_is_denied() {
        let f = fixture(team_a_reader(), SecretMode::SystemManaged);
        let err = f
            .service
            .get_repository_summaries(&Caller::new("dev"), Some("team-b"))
            .await
            .unwrap_err();
        assert!(matches!(err, KubeError::PermissionDenied { .. }));
    }

    #[tokio::test]
    async fn test_detail_checks_rights_before_existence() {
        let f = fixture(team_a_reader(), SecretMode::SystemManaged);
        let missing = RepositoryRef::new("team-b", "ghost");

        let err = f
            .service
            .get_repository_detail(&Caller::new("dev"), &missing)
            .await
            .unwrap_err();
        assert!(matches!(err, KubeError::PermissionDenied { .. }));

        let err = f.service.get_repository_detail(&admin(), &missing).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_detail_redacts_auth_without_secret_rights() {
        let f = fixture(team_a_reader(), SecretMode::SystemManaged);
        let key = RepositoryRef::new("team-a", "private");
        f.service
            .add_repository(&admin(), RepositoryRequest::new(key.clone(), URL).with_credentials(basic("bob")))
            .await
            .unwrap();

        let full = f.service.get_repository_detail(&admin(), &key).await.unwrap();
        assert_eq!(
            full.auth,
            AuthDetail::Basic {
                username: "bob".to_string()
            }
        );
        assert!(full.summary.has_credentials);

        let degraded = f
            .service
            .get_repository_detail(&Caller::new("dev"), &key)
            .await
            .unwrap();
        assert_eq!(
            degraded.auth,
            AuthDetail::Redacted {
                secret: "helmrepo-private-auth".to_string()
            }
        );

        // Secret rights in team-a alone do not reveal resolved auth
        let ops = Caller::new("ops");
        assert!(f.service.authorizer.can_read_secrets(&ops, Some("team-a")).await);
        let scoped = f.service.get_repository_detail(&ops, &key).await.unwrap();
        assert_eq!(
            scoped.auth,
            AuthDetail::Redacted {
                secret: "helmrepo-private-auth".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_status_reflects_cache() {
        let f = fixture(StaticAccessReviewer::permissive(), SecretMode::SystemManaged);
        let repo = add(&f, "ns1", "bitnami").await;
        let key = repo.key();

        async fn status(f: &Fixture, key: &RepositoryRef) -> RepositoryDetail {
            f.service.get_repository_detail(&admin(), key).await.unwrap()
        }

        assert_eq!(status(&f, &key).await.summary.status.reason, StatusReason::Pending);

        let ready = f.cluster.mark_ready(&key, "sha256:abc").unwrap();
        assert_eq!(status(&f, &key).await.summary.status.reason, StatusReason::Pending);

        f.store
            .put(IndexCacheEntry::new(key.clone(), sample_index(&["nginx"]), ready.version_token()))
            .await
            .unwrap();
        let detail = status(&f, &key).await;
        assert_eq!(detail.summary.status.reason, StatusReason::Succeeded);
        assert_eq!(detail.package_count, Some(1));

        f.cluster.mark_failed(&key, "IndexationFailed", "failed to fetch index : 401 Unauthorized");
        let detail = status(&f, &key).await;
        assert_eq!(detail.summary.status.reason, StatusReason::Failed);
        assert!(detail.summary.status.user_message.contains("401 Unauthorized"));
    }

    #[tokio::test]
    async fn test_add_with_inline_credentials_creates_owned_secret() {
        let f = fixture(StaticAccessReviewer::permissive(), SecretMode::SystemManaged);
        let key = RepositoryRef::new("ns1", "private");
        let repo = f
            .service
            .add_repository(&admin(), RepositoryRequest::new(key.clone(), URL).with_credentials(basic("bob")))
            .await
            .unwrap();

        assert_eq!(repo.spec.secret_name(), Some("helmrepo-private-auth"));
        let secret = f.cluster.secret("ns1", "helmrepo-private-auth").unwrap();
        assert!(is_owned_by(&secret, &repo));
    }

    #[tokio::test]
    async fn test_add_rejects_credentials_for_wrong_mode() {
        let f = fixture(StaticAccessReviewer::permissive(), SecretMode::SystemManaged);
        let request = RepositoryRequest::new(RepositoryRef::new("ns1", "r"), URL)
            .with_credentials(CredentialInput::SecretRef("mine".into()));
        let err = f.service.add_repository(&admin(), request).await.unwrap_err();
        assert!(matches!(err, KubeError::InvalidArgument(_)));
        assert_eq!(f.cluster.operation_counts().creates, 0);

        let f = fixture(StaticAccessReviewer::permissive(), SecretMode::UserManaged);
        let request = RepositoryRequest::new(RepositoryRef::new("ns1", "r"), URL)
            .with_credentials(basic("bob"));
        let err = f.service.add_repository(&admin(), request).await.unwrap_err();
        assert!(matches!(err, KubeError::InvalidArgument(_)));
        assert_eq!(f.cluster.repository_count(), 0);
        assert_eq!(f.cluster.secret_count(), 0);
    }

    #[tokio::test]
    async fn test_add_rejects_invalid_url() {
        let f = fixture(StaticAccessReviewer::permissive(), SecretMode::SystemManaged);
        let request = RepositoryRequest::new(RepositoryRef::new("ns1", "r"), "ftp://nope");
        let err = f.service.add_repository(&admin(), request).await.unwrap_err();
        assert!(matches!(err, KubeError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_user_managed_update_with_missing_secret_writes_nothing() {
        let f = fixture(StaticAccessReviewer::permissive(), SecretMode::UserManaged);
        let repo = add(&f, "ns1", "r").await;
        f.cluster.reset_counts();

        let request = RepositoryRequest::new(repo.key(), "https://other.example.com/charts")
            .with_credentials(CredentialInput::SecretRef("absent".into()));
        let err = f.service.update_repository(&admin(), request).await.unwrap_err();

        assert!(matches!(err, KubeError::SecretNotFound { .. }));
        assert_eq!(f.cluster.operation_counts().updates, 0);
        assert_eq!(f.cluster.repository(&repo.key()).unwrap().spec.url, URL);
    }

    #[tokio::test]
    async fn test_user_managed_update_references_secret() {
        let f = fixture(StaticAccessReviewer::permissive(), SecretMode::UserManaged);
        let repo = add(&f, "ns1", "r").await;
        f.cluster
            .create_secret(&k8s_openapi::api::core::v1::Secret {
                metadata: kube::api::ObjectMeta {
                    name: Some("mine".into()),
                    namespace: Some("ns1".into()),
                    ..Default::default()
                },
                ..Default::default()
            })
            .await
            .unwrap();

        let request = RepositoryRequest::new(repo.key(), URL)
            .with_credentials(CredentialInput::SecretRef("mine".into()));
        let updated = f.service.update_repository(&admin(), request).await.unwrap();
        assert_eq!(updated.spec.secret_name(), Some("mine"));
    }

    #[tokio::test]
    async fn test_update_retries_conflicts() {
        let f = fixture(StaticAccessReviewer::permissive(), SecretMode::SystemManaged);
        let repo = add(&f, "ns1", "r").await;
        f.cluster.inject_conflicts(2);

        let request = RepositoryRequest::new(repo.key(), URL).with_interval("5m");
        let updated = f.service.update_repository(&admin(), request).await.unwrap();

        assert_eq!(updated.spec.interval, "5m");
        assert_eq!(updated.metadata.generation, Some(2));
        assert_eq!(f.cluster.operation_counts().conflicts, 2);
    }

    #[tokio::test]
    async fn test_failed_update_keeps_previous_credentials() {
        let f = fixture(StaticAccessReviewer::permissive(), SecretMode::SystemManaged);
        let key = RepositoryRef::new("ns1", "private");
        f.service
            .add_repository(&admin(), RepositoryRequest::new(key.clone(), URL).with_credentials(basic("bob")))
            .await
            .unwrap();
        let before = f.cluster.secret("ns1", "helmrepo-private-auth").unwrap();

        f.cluster.inject_conflicts(50);
        let request = RepositoryRequest::new(key.clone(), URL).with_credentials(basic("alice"));
        let err = f.service.update_repository(&admin(), request).await.unwrap_err();
        assert!(matches!(err, KubeError::RetriesExhausted { attempts: 5, .. }));

        let after = f.cluster.secret("ns1", "helmrepo-private-auth").unwrap();
        assert_eq!(after.data, before.data);
        let repo = f.cluster.repository(&key).unwrap();
        assert!(matches!(
            auth_from_secret(&after).unwrap(),
            AuthMaterial::Basic { username, .. } if username == "bob"
        ));
        assert_eq!(repo.spec.secret_name(), Some("helmrepo-private-auth"));
    }

    #[tokio::test]
    async fn test_failed_update_removes_new_owned_secret() {
        let f = fixture(StaticAccessReviewer::permissive(), SecretMode::SystemManaged);
        let repo = add(&f, "ns1", "r").await;

        f.cluster.inject_conflicts(50);
        let request = RepositoryRequest::new(repo.key(), URL).with_credentials(basic("bob"));
        f.service.update_repository(&admin(), request).await.unwrap_err();

        assert_eq!(f.cluster.secret_count(), 0);
        assert!(f.cluster.repository(&repo.key()).unwrap().spec.secret_ref.is_none());
    }

    #[tokio::test]
    async fn test_update_dropping_credentials_removes_owned_secret() {
        let f = fixture(StaticAccessReviewer::permissive(), SecretMode::SystemManaged);
        let key = RepositoryRef::new("ns1", "private");
        f.service
            .add_repository(&admin(), RepositoryRequest::new(key.clone(), URL).with_credentials(basic("bob")))
            .await
            .unwrap();

        let updated = f
            .service
            .update_repository(&admin(), RepositoryRequest::new(key, URL))
            .await
            .unwrap();
        assert!(updated.spec.secret_ref.is_none());
        assert_eq!(f.cluster.secret_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_repository() {
        let f = fixture(team_a_reader(), SecretMode::SystemManaged);
        let repo = add(&f, "team-a", "r").await;

        let err = f
            .service
            .delete_repository(&Caller::new("dev"), &repo.key())
            .await
            .unwrap_err();
        assert!(matches!(err, KubeError::PermissionDenied { .. }));

        f.service.delete_repository(&admin(), &repo.key()).await.unwrap();
        assert_eq!(f.cluster.repository_count(), 0);

        let err = f.service.delete_repository(&admin(), &repo.key()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_packages_of_credentialed_repositories_need_secret_rights() {
        let f = fixture(team_a_reader(), SecretMode::SystemManaged);
        let public = add(&f, "team-a", "public").await;
        let private = f
            .service
            .add_repository(
                &admin(),
                RepositoryRequest::new(RepositoryRef::new("team-a", "private"), URL)
                    .with_credentials(basic("bob")),
            )
            .await
            .unwrap();
        for (repo, packages) in [(&public, &["nginx"][..]), (&private, &["internal", "nginx"][..])] {
            f.store
                .put(IndexCacheEntry::new(repo.key(), sample_index(packages), repo.version_token()))
                .await
                .unwrap();
        }

        let all = f
            .service
            .get_available_package_summaries(&admin(), Some("team-a"))
            .await
            .unwrap();
        let names: Vec<_> = all.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["internal", "nginx", "nginx"]);

        let dev = Caller::new("dev");
        let visible = f
            .service
            .get_available_package_summaries(&dev, Some("team-a"))
            .await
            .unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].repository, public.key());

        let versions = f
            .service
            .get_available_package_versions(&dev, &public.key(), "nginx")
            .await
            .unwrap();
        assert_eq!(versions[0].version, "1.0.0");

        let err = f
            .service
            .get_available_package_versions(&dev, &private.key(), "internal")
            .await
            .unwrap_err();
        assert!(matches!(err, KubeError::PermissionDenied { .. }));

        let err = f
            .service
            .get_available_package_versions(&admin(), &public.key(), "missing")
            .await
            .unwrap_err();
        assert!(matches!(err, KubeError::PackageNotFound { .. }));
    }
}
