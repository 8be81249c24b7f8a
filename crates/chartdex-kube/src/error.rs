//! Error types for chartdex-kube

use chartdex_repo::RepoError;
use thiserror::Error;

/// Result type for chartdex-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur while watching, indexing or serving repositories
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Fetching, parsing or caching an index failed
    #[error(transparent)]
    Repo(#[from] RepoError),

    /// Repository not found
    #[error("repository '{name}' not found in namespace '{namespace}'")]
    RepositoryNotFound { name: String, namespace: String },

    /// Repository already exists
    #[error("repository '{name}' already exists in namespace '{namespace}'")]
    RepositoryAlreadyExists { name: String, namespace: String },

    /// Package not present in a repository's cached index
    #[error("package '{name}' not found in repository '{repository}'")]
    PackageNotFound { name: String, repository: String },

    /// Referenced secret not found
    #[error("secret '{name}' not found in namespace '{namespace}'")]
    SecretNotFound { name: String, namespace: String },

    /// Caller lacks the required rights
    #[error("permission denied: cannot {verb} {resource} in {scope}")]
    PermissionDenied {
        verb: String,
        resource: String,
        scope: String,
    },

    /// Request is malformed or not allowed in the current mode
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Optimistic concurrency conflict on write
    #[error("operation cannot be fulfilled on {kind} '{name}': the object has been modified; please apply your changes to the latest version and try again")]
    Conflict { kind: String, name: String },

    /// Conflict retries ran out
    #[error("giving up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: usize, last: String },

    /// The engine is no longer accepting work
    #[error("engine is shutting down")]
    ShuttingDown,

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for KubeError {
    fn from(e: serde_yaml::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

/// Status code surfaced to the request routing layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NotFound,
    AlreadyExists,
    PermissionDenied,
    InvalidArgument,
    Aborted,
    Unauthenticated,
    Unavailable,
    Internal,
}

impl KubeError {
    /// Check if this is a not-found error, local or from the API server
    pub fn is_not_found(&self) -> bool {
        match self {
            KubeError::RepositoryNotFound { .. }
            | KubeError::SecretNotFound { .. }
            | KubeError::PackageNotFound { .. } => true,
            KubeError::Api(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }

    /// Check if this is a write conflict (409 on an update)
    pub fn is_conflict(&self) -> bool {
        match self {
            KubeError::Conflict { .. } => true,
            KubeError::Api(kube::Error::Api(resp)) => {
                resp.code == 409 && resp.reason != "AlreadyExists"
            }
            _ => false,
        }
    }

    pub fn code(&self) -> ErrorCode {
        if self.is_not_found() {
            return ErrorCode::NotFound;
        }
        match self {
            KubeError::RepositoryAlreadyExists { .. } => ErrorCode::AlreadyExists,
            KubeError::PermissionDenied { .. } => ErrorCode::PermissionDenied,
            KubeError::InvalidArgument(_) | KubeError::InvalidConfig(_) => {
                ErrorCode::InvalidArgument
            }
            KubeError::Conflict { .. } | KubeError::RetriesExhausted { .. } => ErrorCode::Aborted,
            KubeError::ShuttingDown => ErrorCode::Unavailable,
            KubeError::Api(kube::Error::Api(resp)) => match resp.code {
                401 => ErrorCode::Unauthenticated,
                403 => ErrorCode::PermissionDenied,
                409 if resp.reason == "AlreadyExists" => ErrorCode::AlreadyExists,
                409 => ErrorCode::Aborted,
                400 | 422 => ErrorCode::InvalidArgument,
                _ => ErrorCode::Internal,
            },
            KubeError::Repo(
                RepoError::InvalidReference { .. } | RepoError::InvalidRepositoryUrl { .. },
            ) => ErrorCode::InvalidArgument,
            KubeError::Repo(e) if e.is_auth() => ErrorCode::Unauthenticated,
            KubeError::Repo(e) if e.is_transient() => ErrorCode::Unavailable,
            _ => ErrorCode::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> KubeError {
        KubeError::Api(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: reason.to_string(),
            code,
        }))
    }

    #[test]
    fn test_classification() {
        assert!(api_error(404, "NotFound").is_not_found());
        assert!(api_error(409, "Conflict").is_conflict());
        assert!(!api_error(409, "AlreadyExists").is_conflict());
        assert!(
            KubeError::SecretNotFound {
                name: "s".into(),
                namespace: "ns".into()
            }
            .is_not_found()
        );
    }

    #[test]
    fn test_codes() {
        assert_eq!(
            KubeError::PermissionDenied {
                verb: "get".into(),
                resource: "helmrepositories".into(),
                scope: "namespace 'ns1'".into(),
            }
            .code(),
            ErrorCode::PermissionDenied
        );
        assert_eq!(api_error(409, "AlreadyExists").code(), ErrorCode::AlreadyExists);
        assert_eq!(
            KubeError::RetriesExhausted {
                attempts: 5,
                last: "conflict".into()
            }
            .code(),
            ErrorCode::Aborted
        );
        let auth = KubeError::Repo(RepoError::AuthFailed {
            url: "http://x/index.yaml".into(),
            status: "401 Unauthorized".into(),
        });
        assert_eq!(auth.code(), ErrorCode::Unauthenticated);
        assert!(auth.to_string().contains("401 Unauthorized"));
    }

    #[test]
    fn test_conflict_message() {
        let err = KubeError::Conflict {
            kind: "helmrepositories".into(),
            name: "bitnami".into(),
        };
        assert!(err.to_string().contains("the object has been modified"));
    }
}
