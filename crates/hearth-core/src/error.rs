//! Error types for hearth-core.

use hearth_config::error::ConfigError;
use miette::Diagnostic;
use thiserror::Error;

use crate::backend::BackendError;

/// Core error type for the backend session and repository lifecycle.
#[derive(Error, Diagnostic, Debug)]
pub enum HearthError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error("Could not connect to the package backend after {attempts} attempt(s): {reason}")]
    #[diagnostic(
        code(hearth::connect),
        help("Another package manager may be holding the backend lock. Close it and try again.")
    )]
    ConnectionExhausted { attempts: u32, reason: String },

    #[error("Failed to initialize the target system")]
    #[diagnostic(
        code(hearth::target),
        help("Check that the target root exists and its installed-package database is readable")
    )]
    TargetInitFailed(#[source] BackendError),

    #[error("Target system is not initialized")]
    #[diagnostic(
        code(hearth::target_not_initialized),
        help("This is an internal ordering error, please report it")
    )]
    TargetNotInitialized,

    #[error("Not connected to the package backend")]
    #[diagnostic(
        code(hearth::not_connected),
        help("This is an internal ordering error, please report it")
    )]
    NotConnected,

    #[error("Failed to enumerate repositories")]
    #[diagnostic(code(hearth::repo_discovery))]
    RepoDiscoveryFailed(#[source] BackendError),

    #[error("Failed to refresh repository '{alias}'")]
    #[diagnostic(
        code(hearth::repo_refresh),
        severity(warning),
        help("Cached metadata is used instead")
    )]
    RepoRefreshFailed {
        alias: String,
        #[source]
        source: BackendError,
    },

    #[error("Failed to load repository '{alias}'")]
    #[diagnostic(code(hearth::repo_load), severity(warning))]
    RepoLoadFailed {
        alias: String,
        #[source]
        source: BackendError,
    },

    #[error("Commit failed")]
    #[diagnostic(code(hearth::commit))]
    CommitFailed(#[source] BackendError),

    #[error("Session is read-only; no changes can be committed")]
    #[diagnostic(
        code(hearth::read_only),
        help("Run as root, use --fake-root for a simulated commit, or drop --read-only")
    )]
    ReadOnlyMode,

    #[error(transparent)]
    #[diagnostic(transparent)]
    Backend(#[from] BackendError),

    #[error("Error while {action}")]
    #[diagnostic(code(hearth::io), help("Check file permissions and disk space"))]
    IoError {
        action: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Thread lock poison error")]
    #[diagnostic(
        code(hearth::poison),
        help("This is an internal error, please report it")
    )]
    PoisonError,

    #[error("{0}")]
    #[diagnostic(code(hearth::error))]
    Custom(String),
}

impl<T> From<std::sync::PoisonError<T>> for HearthError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Self::PoisonError
    }
}

/// Trait for adding context to IO errors.
pub trait ErrorContext<T> {
    fn with_context<C>(self, context: C) -> std::result::Result<T, HearthError>
    where
        C: FnOnce() -> String;
}

impl<T> ErrorContext<T> for std::io::Result<T> {
    fn with_context<C>(self, context: C) -> std::result::Result<T, HearthError>
    where
        C: FnOnce() -> String,
    {
        self.map_err(|err| {
            HearthError::IoError {
                action: context(),
                source: err,
            }
        })
    }
}
