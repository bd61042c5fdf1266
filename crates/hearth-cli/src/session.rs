use std::sync::Arc;

use hearth_config::config::get_config;
use hearth_core::{
    local::LocalBackend,
    session::{BackendSession, SessionOptions},
    HearthResult,
};
use tracing::debug;

use crate::progress::RepoProgress;

/// Connects to the local backend and runs the full attach sequence:
/// connection, target, then repositories.
pub fn open_session(dry_run: bool, download_only: bool) -> HearthResult<BackendSession> {
    let config = get_config();

    let options = SessionOptions {
        dry_run,
        download_only,
        ..SessionOptions::from_config(&config)?
    };
    debug!(privilege = %options.privilege, root = %options.target_root.display(), "opening session");

    let backend = LocalBackend::from_config(&config)?;
    let mut session =
        BackendSession::new(Arc::new(backend), options).with_repo_sink(RepoProgress::new());

    session.connect()?;
    session.init_target()?;
    session.attach_repos()?;

    Ok(session)
}
