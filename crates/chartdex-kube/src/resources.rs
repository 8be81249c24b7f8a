//! The `HelmRepository` custom resource
//!
//! Mirrors the Flux source-controller object (`source.toolkit.fluxcd.io/v1beta2`).
//! Only the fields the indexer reads or writes are modelled; unknown fields
//! are dropped on deserialization.

use chartdex_repo::{FetchSource, RepositoryKind, RepositoryRef};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{KubeError, Result};

pub const API_GROUP: &str = "source.toolkit.fluxcd.io";
pub const API_VERSION: &str = "v1beta2";
pub const PLURAL: &str = "helmrepositories";

pub const CONDITION_READY: &str = "Ready";
pub const CONDITION_RECONCILING: &str = "Reconciling";

pub const DEFAULT_INTERVAL: &str = "10m";

#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "source.toolkit.fluxcd.io",
    version = "v1beta2",
    kind = "HelmRepository",
    plural = "helmrepositories",
    shortname = "helmrepo",
    namespaced,
    status = "HelmRepositoryStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct HelmRepositorySpec {
    /// Repository URL: `http(s)://` for index repositories, `oci://` for registries
    pub url: String,

    /// `default` or `oci`
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub repo_type: Option<String>,

    /// Secret holding basic-auth or TLS material
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<LocalObjectReference>,

    /// Poll interval, e.g. `10m`
    #[serde(default = "default_interval")]
    pub interval: String,

    /// Per-fetch timeout, e.g. `60s`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    /// Forward credentials to hosts other than the repository host
    #[serde(default)]
    pub pass_credentials: bool,

    #[serde(default)]
    pub suspend: bool,

    /// Cloud provider for registry login (`generic`, `aws`, `azure`, `gcp`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

fn default_interval() -> String {
    DEFAULT_INTERVAL.to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LocalObjectReference {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HelmRepositoryStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Last fetched index, as recorded by the controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    /// `True`, `False` or `Unknown`
    pub status: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

impl Condition {
    pub fn new(type_: &str, status: bool, reason: &str, message: &str) -> Self {
        Self {
            type_: type_.to_string(),
            status: if status { "True" } else { "False" }.to_string(),
            reason: reason.to_string(),
            message: message.to_string(),
            observed_generation: None,
            last_transition_time: Some(chrono::Utc::now().to_rfc3339()),
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == "True"
    }

    pub fn is_false(&self) -> bool {
        self.status == "False"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    #[serde(default)]
    pub revision: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<String>,
}

impl HelmRepositorySpec {
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            repo_type: None,
            secret_ref: None,
            interval: default_interval(),
            timeout: None,
            pass_credentials: false,
            suspend: false,
            provider: None,
        }
    }

    pub fn kind(&self) -> RepositoryKind {
        match self.repo_type.as_deref() {
            Some("oci") => RepositoryKind::Oci,
            _ => RepositoryKind::Default,
        }
    }

    pub fn secret_name(&self) -> Option<&str> {
        self.secret_ref.as_ref().map(|r| r.name.as_str())
    }

    /// Poll interval, `None` when unparsable
    pub fn poll_interval(&self) -> Option<Duration> {
        humantime_serde::re::humantime::parse_duration(&self.interval).ok()
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(KubeError::InvalidArgument("repository url is required".to_string()));
        }
        match self.repo_type.as_deref() {
            None | Some("default") | Some("oci") => {}
            Some(other) => {
                return Err(KubeError::InvalidArgument(format!(
                    "repository type '{}' is not supported",
                    other
                )));
            }
        }
        FetchSource::new(&self.url, self.kind())
            .validate()
            .map_err(|e| KubeError::InvalidArgument(e.to_string()))?;
        if self.poll_interval().is_none() {
            return Err(KubeError::InvalidArgument(format!(
                "invalid interval '{}'",
                self.interval
            )));
        }
        Ok(())
    }
}

impl HelmRepository {
    /// Build a namespaced object ready to be created
    pub fn build(key: &RepositoryRef, spec: HelmRepositorySpec) -> Self {
        let mut repo = HelmRepository::new(&key.name, spec);
        repo.metadata.namespace = Some(key.namespace.clone());
        repo
    }

    pub fn key(&self) -> RepositoryRef {
        RepositoryRef::new(self.namespace().unwrap_or_default(), self.name_any())
    }

    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.status
            .as_ref()
            .and_then(|s| s.conditions.iter().find(|c| c.type_ == type_))
    }

    /// Token identifying the content the cache should hold for this object
    ///
    /// Changes whenever the spec generation or the fetched artifact changes.
    pub fn version_token(&self) -> String {
        let generation = self.metadata.generation.unwrap_or_default();
        let artifact = self
            .status
            .as_ref()
            .and_then(|s| s.artifact.as_ref())
            .and_then(|a| a.digest.clone().or_else(|| Some(a.revision.clone())))
            .filter(|r| !r.is_empty());
        match artifact {
            Some(revision) => format!("{}@{}", generation, revision),
            None => generation.to_string(),
        }
    }

    /// Fetch parameters, with engine defaults for what the object leaves open
    pub fn fetch_source(&self, default_timeout: Duration, max_index_size: Option<u64>) -> FetchSource {
        let timeout = self
            .spec
            .timeout
            .as_deref()
            .and_then(|t| humantime_serde::re::humantime::parse_duration(t).ok())
            .unwrap_or(default_timeout);
        FetchSource::new(&self.spec.url, self.spec.kind())
            .with_timeout(timeout)
            .with_max_index_size(max_index_size)
            .with_pass_credentials(self.spec.pass_credentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PODINFO: &str = r#"
apiVersion: source.toolkit.fluxcd.io/v1beta2
kind: HelmRepository
metadata:
  name: podinfo
  namespace: default
  generation: 3
  resourceVersion: "1234"
spec:
  url: https://stefanprodan.github.io/podinfo
  interval: 1m
  secretRef:
    name: podinfo-auth
status:
  observedGeneration: 3
  conditions:
    - type: Ready
      status: "True"
      reason: Succeeded
      message: "stored artifact: revision 'sha256:abc'"
  artifact:
    revision: sha256:abc
    digest: sha256:def
"#;

    #[test]
    fn test_parse_flux_object() {
        let repo: HelmRepository = serde_yaml::from_str(PODINFO).unwrap();
        assert_eq!(repo.key(), RepositoryRef::new("default", "podinfo"));
        assert_eq!(repo.spec.kind(), RepositoryKind::Default);
        assert_eq!(repo.spec.secret_name(), Some("podinfo-auth"));
        assert_eq!(repo.spec.poll_interval(), Some(Duration::from_secs(60)));
        assert!(repo.condition(CONDITION_READY).unwrap().is_true());
        assert_eq!(repo.version_token(), "3@sha256:def");
    }

    #[test]
    fn test_version_token_falls_back_to_generation() {
        let mut repo = HelmRepository::build(
            &RepositoryRef::new("ns1", "bitnami-1"),
            HelmRepositorySpec::for_url("https://charts.bitnami.com/bitnami"),
        );
        repo.metadata.generation = Some(2);
        assert_eq!(repo.version_token(), "2");
    }

    #[test]
    fn test_fetch_source_uses_object_timeout() {
        let mut spec = HelmRepositorySpec::for_url("oci://ghcr.io/stefanprodan/charts");
        spec.repo_type = Some("oci".to_string());
        spec.timeout = Some("30s".to_string());
        spec.pass_credentials = true;
        let repo = HelmRepository::build(&RepositoryRef::new("ns", "podinfo-oci"), spec);

        let source = repo.fetch_source(Duration::from_secs(120), Some(1024));
        assert_eq!(source.kind, RepositoryKind::Oci);
        assert_eq!(source.timeout, Duration::from_secs(30));
        assert_eq!(source.max_index_size, Some(1024));
        assert!(source.pass_credentials);
    }

    #[test]
    fn test_validate() {
        assert!(HelmRepositorySpec::for_url("https://example.com/charts").validate().is_ok());
        assert!(HelmRepositorySpec::for_url("").validate().is_err());
        assert!(HelmRepositorySpec::for_url("ftp://example.com").validate().is_err());

        let mut spec = HelmRepositorySpec::for_url("https://example.com/charts");
        spec.repo_type = Some("git".to_string());
        assert!(matches!(spec.validate(), Err(KubeError::InvalidArgument(_))));

        let mut spec = HelmRepositorySpec::for_url("https://example.com/charts");
        spec.interval = "soon".to_string();
        assert!(spec.validate().is_err());
    }
}
