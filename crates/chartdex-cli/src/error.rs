//! CLI error types with exit code handling
//!
//! This module provides a unified error type for CLI operations that
//! maps errors to appropriate exit codes.

use chartdex_kube::{ErrorCode, KubeError};
use chartdex_repo::RepoError;
use miette::Diagnostic;
use thiserror::Error;

use crate::exit_codes;

/// CLI-specific error type that includes exit code information
#[derive(Error, Debug, Diagnostic, Clone)]
pub enum CliError {
    /// The request was rejected before anything was written
    #[error("Invalid argument: {message}")]
    #[diagnostic(code(chartdex::cli::invalid_argument))]
    InvalidArgument {
        message: String,
        #[help]
        help: Option<String>,
    },

    #[error("{message}")]
    #[diagnostic(code(chartdex::cli::not_found))]
    NotFound { message: String },

    #[error("{message}")]
    #[diagnostic(
        code(chartdex::cli::permission_denied),
        help("check the RBAC rights of the identity passed with --as")
    )]
    PermissionDenied { message: String },

    /// Concurrent writers kept winning
    #[error("{message}")]
    #[diagnostic(code(chartdex::cli::aborted), help("retry the command"))]
    Aborted { message: String },

    /// Cluster or remote unreachable
    #[error("{message}")]
    #[diagnostic(code(chartdex::cli::unavailable))]
    Unavailable { message: String },

    /// IO error (file not found, permissions, etc.)
    #[error("IO error: {message}")]
    #[diagnostic(code(chartdex::cli::io))]
    Io { message: String },

    /// Internal error (runtime, unexpected failure)
    #[error("Internal error: {message}")]
    #[diagnostic(code(chartdex::cli::internal))]
    Internal { message: String },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::InvalidArgument { .. } => exit_codes::INVALID_ARGUMENT,
            CliError::NotFound { .. } => exit_codes::NOT_FOUND,
            CliError::PermissionDenied { .. } => exit_codes::PERMISSION_DENIED,
            CliError::Aborted { .. } => exit_codes::ABORTED,
            CliError::Unavailable { .. } => exit_codes::UNAVAILABLE,
            CliError::Io { .. } => exit_codes::IO_ERROR,
            CliError::Internal { .. } => exit_codes::ERROR,
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create an input error (user provided invalid input)
    pub fn input(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
            help: None,
        }
    }

    /// Create an input error with help text
    pub fn input_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
            help: Some(help.into()),
        }
    }
}

impl From<KubeError> for CliError {
    fn from(err: KubeError) -> Self {
        let message = err.to_string();
        match err.code() {
            ErrorCode::NotFound => CliError::NotFound { message },
            ErrorCode::PermissionDenied | ErrorCode::Unauthenticated => {
                CliError::PermissionDenied { message }
            }
            ErrorCode::InvalidArgument => CliError::InvalidArgument {
                message,
                help: None,
            },
            ErrorCode::AlreadyExists => CliError::InvalidArgument {
                message,
                help: Some("use 'chartdex update' to change an existing repository".to_string()),
            },
            ErrorCode::Aborted => CliError::Aborted { message },
            ErrorCode::Unavailable => CliError::Unavailable { message },
            ErrorCode::Internal => CliError::Internal { message },
        }
    }
}

impl From<RepoError> for CliError {
    fn from(err: RepoError) -> Self {
        KubeError::from(err).into()
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        CliError::internal(err.to_string())
    }
}

impl From<serde_yaml::Error> for CliError {
    fn from(err: serde_yaml::Error) -> Self {
        CliError::internal(err.to_string())
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
