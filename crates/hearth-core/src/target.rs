use std::path::{Path, PathBuf};

use hearth_config::repository::SYSTEM_REPO_ALIAS;
use tracing::{debug, info};

use crate::{error::HearthError, session::SessionHandle, HearthResult};

/// Proof that the target system was registered with the backend.
///
/// Repository refresh takes a reference to it, so it cannot run before the
/// target is initialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetInfo {
    pub root: PathBuf,
    /// Number of installed resolvables loaded into the pool.
    pub installed: usize,
}

/// Registers the running system as the `@System` pseudo-repository.
pub struct TargetInitializer {
    root: PathBuf,
    info: Option<TargetInfo>,
}

impl TargetInitializer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            info: None,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn info(&self) -> Option<&TargetInfo> {
        self.info.as_ref()
    }

    /// Loads the installed resolvables. Runs against the backend only once;
    /// later calls return the first result.
    pub fn init(&mut self, handle: &SessionHandle) -> HearthResult<&TargetInfo> {
        if self.info.is_none() {
            debug!(root = %self.root.display(), "initializing target");
            let root = &self.root;
            let installed = handle
                .with(|conn| conn.init_target(root))?
                .map_err(HearthError::TargetInitFailed)?;

            info!(
                "Loaded {} installed resolvable(s) from {} as {}",
                installed,
                self.root.display(),
                SYSTEM_REPO_ALIAS
            );
            self.info = Some(TargetInfo {
                root: self.root.clone(),
                installed,
            });
        } else {
            debug!(root = %self.root.display(), "target already initialized");
        }

        self.info.as_ref().ok_or(HearthError::TargetNotInitialized)
    }
}
