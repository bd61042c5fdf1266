//! Contract between hearth and a package-management backend.
//!
//! The backend owns dependency solving, package formats and the actual
//! transaction. hearth only drives it through [`Backend`] and
//! [`Connection`], and listens to its progress through [`CommitCallbacks`].

use std::path::Path;

use hearth_events::{ResolvableKind, ResolvableRef};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::commit::{CommitPlan, CommitReport};

#[derive(Error, Diagnostic, Debug)]
pub enum BackendError {
    #[error("Backend is busy: {0}")]
    #[diagnostic(
        code(hearth::backend::busy),
        help("Another process is using the package backend")
    )]
    Busy(String),

    #[error("{0}")]
    #[diagnostic(code(hearth::backend::failed))]
    Failed(String),

    #[error("Error while {action}")]
    #[diagnostic(code(hearth::backend::io))]
    Io {
        action: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}")]
    #[diagnostic(code(hearth::backend::parse), help("Check the file's TOML syntax"))]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Unsupported: {0}")]
    #[diagnostic(code(hearth::backend::unsupported))]
    Unsupported(String),
}

impl BackendError {
    pub fn io(action: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            action: action.into(),
            source,
        }
    }
}

/// Repository as the backend describes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoDescriptor {
    pub alias: String,
    pub name: String,
    pub urls: Vec<String>,
    pub enabled: bool,
    pub autorefresh: bool,
    pub priority: u32,
}

impl RepoDescriptor {
    pub fn event_ref(&self) -> hearth_events::RepoRef {
        hearth_events::RepoRef::new(&self.alias, &self.name)
    }
}

/// Raw resolvable record as the backend hands it over.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct BackendResolvable {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub arch: String,
    #[serde(default = "default_kind")]
    pub kind: String,
}

fn default_kind() -> String {
    "package".to_string()
}

impl BackendResolvable {
    pub fn new(name: &str, version: &str, arch: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            arch: arch.to_string(),
            kind: default_kind(),
        }
    }

    pub fn to_ref(&self) -> ResolvableRef {
        ResolvableRef::new(
            ResolvableKind::from_raw(&self.kind),
            &self.name,
            &self.version,
            &self.arch,
        )
    }

    /// Whether `self` names `other`. Empty version or arch on `self` match
    /// anything.
    pub fn matches(&self, other: &BackendResolvable) -> bool {
        self.name == other.name
            && (self.version.is_empty() || self.version == other.version)
            && (self.arch.is_empty() || self.arch == other.arch)
    }
}

/// What the backend should do after a callback returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Continue,
    Abort,
}

impl CallbackAction {
    pub fn is_abort(self) -> bool {
        self == Self::Abort
    }
}

/// Progress sink the backend calls synchronously while committing.
///
/// Percent values are passed through unchecked; implementations normalise
/// them. `Abort` from a `*_start` (or `download_cached`) means the item did
/// not begin and must be skipped. `Abort` from any other callback means the
/// current item should be finished and no further item begun.
pub trait CommitCallbacks {
    fn download_start(&mut self, item: &BackendResolvable) -> CallbackAction;
    fn download_progress(&mut self, item: &BackendResolvable, percent: i64) -> CallbackAction;
    fn download_end(&mut self, item: &BackendResolvable) -> CallbackAction;
    fn download_cached(&mut self, item: &BackendResolvable) -> CallbackAction;
    fn download_error(&mut self, item: &BackendResolvable, message: &str) -> CallbackAction;

    fn install_start(&mut self, item: &BackendResolvable) -> CallbackAction;
    fn install_progress(&mut self, item: &BackendResolvable, percent: i64) -> CallbackAction;
    fn install_end(&mut self, item: &BackendResolvable) -> CallbackAction;
    fn install_error(&mut self, item: &BackendResolvable, message: &str) -> CallbackAction;

    fn remove_start(&mut self, item: &BackendResolvable) -> CallbackAction;
    fn remove_progress(&mut self, item: &BackendResolvable, percent: i64) -> CallbackAction;
    fn remove_end(&mut self, item: &BackendResolvable) -> CallbackAction;
    fn remove_error(&mut self, item: &BackendResolvable, message: &str) -> CallbackAction;

    fn conflict_check_start(&mut self) -> CallbackAction;
    fn conflict_check_progress(&mut self, percent: i64) -> CallbackAction;
    fn conflict_check_result(&mut self, conflicts: &[String]) -> CallbackAction;
}

/// A live connection to the backend.
pub trait Connection: Send {
    fn set_locale(&mut self, locale: &str);

    /// Registers the target system and loads its installed resolvables.
    /// Returns how many were loaded.
    fn init_target(&mut self, root: &Path) -> Result<usize, BackendError>;

    fn enumerate_repos(&mut self) -> Result<Vec<RepoDescriptor>, BackendError>;

    fn refresh_repo(&mut self, repo: &RepoDescriptor) -> Result<(), BackendError>;

    /// Loads a repository's resolvables into the pool. Returns how many were
    /// loaded.
    fn load_resolvables(&mut self, repo: &RepoDescriptor) -> Result<usize, BackendError>;

    fn commit(
        &mut self,
        plan: &CommitPlan,
        callbacks: &mut dyn CommitCallbacks,
    ) -> Result<CommitReport, BackendError>;
}

pub trait Backend: Send + Sync {
    fn connect(&self) -> Result<Box<dyn Connection>, BackendError>;
}
