//! Credential resolution for repositories
//!
//! A repository's `secretRef` points at a Secret in its own namespace. Two
//! deployment-wide modes decide who owns that Secret:
//!
//! - **system-managed**: the engine creates the Secret from inline
//!   credentials, marks it as owned by the repository and deletes it with it
//! - **user-managed**: the Secret is only referenced; it must already exist

use chartdex_repo::AuthMaterial;
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cluster::SecretApi;
use crate::error::{KubeError, Result};
use crate::resources::HelmRepository;

/// Label set on every secret the engine creates
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "chartdex";

const USERNAME_KEY: &str = "username";
const PASSWORD_KEY: &str = "password";
const CERT_KEYS: [&str; 2] = ["certFile", "tls.crt"];
const KEY_KEYS: [&str; 2] = ["keyFile", "tls.key"];
const CA_KEYS: [&str; 2] = ["caFile", "ca.crt"];

/// Who owns the secrets referenced by repositories
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecretMode {
    #[default]
    SystemManaged,
    UserManaged,
}

impl std::fmt::Display for SecretMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecretMode::SystemManaged => f.write_str("system-managed"),
            SecretMode::UserManaged => f.write_str("user-managed"),
        }
    }
}

impl std::str::FromStr for SecretMode {
    type Err = KubeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "system-managed" => Ok(SecretMode::SystemManaged),
            "user-managed" => Ok(SecretMode::UserManaged),
            other => Err(KubeError::InvalidConfig(format!(
                "unknown secret mode '{}', expected system-managed or user-managed",
                other
            ))),
        }
    }
}

/// Credentials as supplied with an add/update request
#[derive(Clone, Default, PartialEq, Eq)]
pub enum CredentialInput {
    #[default]
    None,
    Basic {
        username: String,
        password: String,
    },
    Tls {
        cert_pem: String,
        key_pem: String,
        ca_pem: Option<String>,
    },
    /// Reference to an existing secret (user-managed mode only)
    SecretRef(String),
}

impl std::fmt::Debug for CredentialInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialInput::None => f.write_str("None"),
            CredentialInput::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .finish_non_exhaustive(),
            CredentialInput::Tls { ca_pem, .. } => f
                .debug_struct("Tls")
                .field("ca", &ca_pem.is_some())
                .finish_non_exhaustive(),
            CredentialInput::SecretRef(name) => f.debug_tuple("SecretRef").field(name).finish(),
        }
    }
}

impl CredentialInput {
    /// Inline material that would have to be stored in a secret
    pub fn is_inline(&self) -> bool {
        matches!(self, CredentialInput::Basic { .. } | CredentialInput::Tls { .. })
    }

    fn secret_data(&self) -> BTreeMap<String, ByteString> {
        let mut data = BTreeMap::new();
        let mut put = |k: &str, v: &str| {
            data.insert(k.to_string(), ByteString(v.as_bytes().to_vec()));
        };
        match self {
            CredentialInput::Basic { username, password } => {
                put(USERNAME_KEY, username);
                put(PASSWORD_KEY, password);
            }
            CredentialInput::Tls {
                cert_pem,
                key_pem,
                ca_pem,
            } => {
                put(CERT_KEYS[0], cert_pem);
                put(KEY_KEYS[0], key_pem);
                if let Some(ca) = ca_pem {
                    put(CA_KEYS[0], ca);
                }
            }
            CredentialInput::None | CredentialInput::SecretRef(_) => {}
        }
        data
    }
}

/// Name of the secret the engine creates for a repository
pub fn owned_secret_name(repository: &str) -> String {
    format!("helmrepo-{}-auth", repository)
}

/// Build the system-managed secret for inline credentials
///
/// The owner reference is attached separately once the repository exists
/// and has a uid, see [`owner_reference_for`].
pub fn build_owned_secret(repo: &HelmRepository, input: &CredentialInput) -> Secret {
    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());

    Secret {
        metadata: ObjectMeta {
            name: Some(owned_secret_name(&repo.name_any())),
            namespace: repo.namespace(),
            labels: Some(labels),
            owner_references: owner_reference_for(repo).map(|r| vec![r]),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(input.secret_data()),
        ..Default::default()
    }
}

/// Controller owner reference pointing at the repository, once it has a uid
pub fn owner_reference_for(repo: &HelmRepository) -> Option<OwnerReference> {
    repo.controller_owner_ref(&())
}

/// Whether `secret` is owned by `repo`
pub fn is_owned_by(secret: &Secret, repo: &HelmRepository) -> bool {
    let Some(uid) = repo.uid() else {
        return false;
    };
    secret
        .owner_references()
        .iter()
        .any(|r| r.uid == uid && r.kind == HelmRepository::kind(&()))
}

fn secret_value(data: &BTreeMap<String, ByteString>, keys: &[&str]) -> Option<Vec<u8>> {
    keys.iter()
        .find_map(|k| data.get(*k))
        .map(|v| v.0.clone())
        .filter(|v| !v.is_empty())
}

fn secret_text(secret: &Secret, data: &BTreeMap<String, ByteString>, key: &str) -> Result<Option<String>> {
    secret_value(data, &[key])
        .map(|v| {
            String::from_utf8(v).map_err(|_| {
                KubeError::InvalidArgument(format!(
                    "secret '{}' has a non UTF-8 '{}'",
                    secret.name_any(),
                    key
                ))
            })
        })
        .transpose()
}

/// Parse auth material out of a secret's data
pub fn auth_from_secret(secret: &Secret) -> Result<AuthMaterial> {
    let empty = BTreeMap::new();
    let data = secret.data.as_ref().unwrap_or(&empty);

    match (
        secret_text(secret, data, USERNAME_KEY)?,
        secret_text(secret, data, PASSWORD_KEY)?,
    ) {
        (Some(username), Some(password)) => return Ok(AuthMaterial::Basic { username, password }),
        (Some(_), None) | (None, Some(_)) => {
            return Err(KubeError::InvalidArgument(format!(
                "secret '{}' must contain both username and password",
                secret.name_any()
            )));
        }
        (None, None) => {}
    }

    let cert = secret_value(data, &CERT_KEYS);
    let key = secret_value(data, &KEY_KEYS);
    let ca = secret_value(data, &CA_KEYS);
    match (cert, key) {
        (Some(cert_pem), Some(key_pem)) => Ok(AuthMaterial::Tls {
            cert_pem,
            key_pem,
            ca_pem: ca,
        }),
        (None, None) if ca.is_some() => Ok(AuthMaterial::Tls {
            cert_pem: Vec::new(),
            key_pem: Vec::new(),
            ca_pem: ca,
        }),
        (None, None) => Err(KubeError::InvalidArgument(format!(
            "secret '{}' holds neither basic auth nor TLS data",
            secret.name_any()
        ))),
        _ => Err(KubeError::InvalidArgument(format!(
            "secret '{}' must contain both a certificate and a key",
            secret.name_any()
        ))),
    }
}

/// Looks up and parses repository credentials
#[derive(Clone)]
pub struct CredentialResolver {
    secrets: Arc<dyn SecretApi>,
}

impl CredentialResolver {
    pub fn new(secrets: Arc<dyn SecretApi>) -> Self {
        Self { secrets }
    }

    /// Resolve the auth material for a repository
    ///
    /// A missing secret is `SecretNotFound`; it is never created here. The
    /// referenced secret is read whoever owns it: ownership only decides
    /// what the engine may rewrite or delete.
    pub async fn resolve(&self, repo: &HelmRepository) -> Result<AuthMaterial> {
        let Some(name) = repo.spec.secret_name() else {
            return Ok(AuthMaterial::None);
        };
        let namespace = repo.namespace().unwrap_or_default();

        let secret = self
            .secrets
            .get_secret(&namespace, name)
            .await?
            .ok_or_else(|| KubeError::SecretNotFound {
                name: name.to_string(),
                namespace: namespace.clone(),
            })?;

        if !is_owned_by(&secret, repo) {
            tracing::debug!(secret = %name, namespace = %namespace, "using user-provided secret");
        }
        auth_from_secret(&secret)
    }

    /// Delete the system-managed secret of a removed repository
    ///
    /// Only a secret owned by `repo` is touched; a missing one is fine.
    pub async fn delete_owned(&self, repo: &HelmRepository) -> Result<bool> {
        let Some(name) = repo.spec.secret_name() else {
            return Ok(false);
        };
        let namespace = repo.namespace().unwrap_or_default();

        match self.secrets.get_secret(&namespace, name).await? {
            Some(secret) if is_owned_by(&secret, repo) => {
                let deleted = self.secrets.delete_secret(&namespace, name).await?;
                if deleted {
                    tracing::info!(secret = %name, namespace = %namespace, "deleted owned secret");
                }
                Ok(deleted)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockCluster;
    use crate::resources::{HelmRepositorySpec, LocalObjectReference};
    use chartdex_repo::RepositoryRef;

    fn repo_with_secret(secret: Option<&str>) -> HelmRepository {
        let mut spec = HelmRepositorySpec::for_url("https://example.com/charts");
        spec.secret_ref = secret.map(|name| LocalObjectReference {
            name: name.to_string(),
        });
        let mut repo = HelmRepository::build(&RepositoryRef::new("ns1", "podinfo"), spec);
        repo.metadata.uid = Some("uid-repo".to_string());
        repo
    }

    fn plain_secret(name: &str, pairs: &[(&str, &str)]) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("ns1".to_string()),
                ..Default::default()
            },
            data: Some(
                pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    #[test]
    fn test_auth_from_secret_formats() {
        let basic = plain_secret("s", &[("username", "foo"), ("password", "bar")]);
        assert_eq!(auth_from_secret(&basic).unwrap().kind(), "basic-auth");

        let tls = plain_secret("s", &[("tls.crt", "CERT"), ("tls.key", "KEY"), ("ca.crt", "CA")]);
        match auth_from_secret(&tls).unwrap() {
            AuthMaterial::Tls { ca_pem, .. } => assert_eq!(ca_pem, Some(b"CA".to_vec())),
            other => panic!("expected TLS, got {:?}", other),
        }

        let ca_only = plain_secret("s", &[("caFile", "CA")]);
        assert_eq!(auth_from_secret(&ca_only).unwrap().kind(), "tls");

        let half = plain_secret("s", &[("username", "foo")]);
        assert!(matches!(auth_from_secret(&half), Err(KubeError::InvalidArgument(_))));

        let empty = plain_secret("s", &[]);
        assert!(auth_from_secret(&empty).is_err());
    }

    #[test]
    fn test_build_owned_secret() {
        let repo = repo_with_secret(None);
        let secret = build_owned_secret(
            &repo,
            &CredentialInput::Basic {
                username: "foo".into(),
                password: "bar".into(),
            },
        );
        assert_eq!(secret.name_any(), "helmrepo-podinfo-auth");
        assert_eq!(secret.namespace().as_deref(), Some("ns1"));
        assert!(is_owned_by(&secret, &repo));
        assert_eq!(auth_from_secret(&secret).unwrap().kind(), "basic-auth");
    }

    #[test]
    fn test_credential_input_debug_redacts() {
        let input = CredentialInput::Basic {
            username: "foo".into(),
            password: "s3cret".into(),
        };
        assert!(!format!("{:?}", input).contains("s3cret"));
    }

    #[test]
    fn test_secret_mode_parse() {
        assert_eq!("user-managed".parse::<SecretMode>().unwrap(), SecretMode::UserManaged);
        assert_eq!(SecretMode::default(), SecretMode::SystemManaged);
        assert!("whatever".parse::<SecretMode>().is_err());
    }

    #[tokio::test]
    async fn test_resolve_without_secret_ref() {
        let resolver = CredentialResolver::new(Arc::new(MockCluster::new()));
        let auth = resolver
            .resolve(&repo_with_secret(None))
            .await
            .unwrap();
        assert!(auth.is_none());
    }

    #[tokio::test]
    async fn test_resolve_missing_secret_is_not_found() {
        let resolver = CredentialResolver::new(Arc::new(MockCluster::new()));
        let err = resolver
            .resolve(&repo_with_secret(Some("gone")))
            .await
            .unwrap_err();
        assert!(matches!(err, KubeError::SecretNotFound { .. }));
    }

    #[tokio::test]
    async fn test_user_secret_is_read_but_never_deleted() {
        let cluster = Arc::new(MockCluster::new());
        cluster
            .create_secret(&plain_secret("shared", &[("username", "a"), ("password", "b")]))
            .await
            .unwrap();
        let resolver = CredentialResolver::new(cluster.clone());
        let repo = repo_with_secret(Some("shared"));

        let auth = resolver.resolve(&repo).await.unwrap();
        assert_eq!(auth.kind(), "basic-auth");

        // not owned, so never deleted
        assert!(!resolver.delete_owned(&repo).await.unwrap());
        assert_eq!(cluster.secret_count(), 1);
    }

    #[tokio::test]
    async fn test_delete_owned_secret() {
        let cluster = Arc::new(MockCluster::new());
        let repo = repo_with_secret(Some("helmrepo-podinfo-auth"));
        let secret = build_owned_secret(
            &repo,
            &CredentialInput::Basic {
                username: "foo".into(),
                password: "bar".into(),
            },
        );
        cluster.create_secret(&secret).await.unwrap();

        let resolver = CredentialResolver::new(cluster.clone());
        assert_eq!(
            resolver
                .resolve(&repo)
                .await
                .unwrap()
                .kind(),
            "basic-auth"
        );
        assert!(resolver.delete_owned(&repo).await.unwrap());
        assert!(!resolver.delete_owned(&repo).await.unwrap());
        assert_eq!(cluster.secret_count(), 0);
    }
}
