use std::{thread, time::Duration};

use hearth_events::{Event, EventSinkHandle, RepoEvent};
use tracing::{debug, info, warn};

use crate::{
    backend::RepoDescriptor, error::HearthError, privilege::EffectivePrivilege,
    session::SessionHandle, target::TargetInfo, HearthResult,
};

/// Repositories discovered this session and the subset that failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoCatalogState {
    pub active: Vec<RepoDescriptor>,
    pub failed: Vec<RepoDescriptor>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RefreshOptions {
    pub skip: bool,
    /// Sleep before each refresh. Debugging aid.
    pub delay: Option<Duration>,
}

/// Discovers, refreshes and loads the backend's repositories.
///
/// Per-repository failures never abort a pass: the repository is recorded
/// in `failed` and the pass moves on.
pub struct RepositoryCatalog {
    handle: SessionHandle,
    sink: EventSinkHandle,
    privilege: EffectivePrivilege,
    options: RefreshOptions,
    state: RepoCatalogState,
}

impl RepositoryCatalog {
    pub fn new(
        handle: SessionHandle,
        sink: EventSinkHandle,
        privilege: EffectivePrivilege,
        options: RefreshOptions,
    ) -> Self {
        Self {
            handle,
            sink,
            privilege,
            options,
            state: RepoCatalogState::default(),
        }
    }

    fn emit(&self, event: RepoEvent) {
        self.sink.emit(&Event::Repo(event));
    }

    fn mark_failed(&mut self, repo: &RepoDescriptor) {
        if !self.is_failed(&repo.alias) {
            self.state.failed.push(repo.clone());
        }
    }

    /// Replaces `active` with the backend's enabled repositories.
    ///
    /// `failed` is left alone: a repository that failed earlier in the
    /// session stays failed even if it is no longer enabled.
    pub fn discover(&mut self) -> HearthResult<usize> {
        let repos = self
            .handle
            .with(|conn| conn.enumerate_repos())?
            .map_err(HearthError::RepoDiscoveryFailed)?;

        let active: Vec<RepoDescriptor> = repos.into_iter().filter(|repo| repo.enabled).collect();
        for repo in &active {
            debug!(alias = %repo.alias, priority = repo.priority, "found repository");
            self.emit(RepoEvent::Found {
                repo: repo.event_ref(),
            });
        }

        self.state.active = active;

        Ok(self.state.active.len())
    }

    /// Refreshes every active repository, if the session may.
    ///
    /// Without real root, or with refresh disabled, every repository gets a
    /// `RefreshSkipped` event and cached metadata is used.
    pub fn refresh(&mut self, target: &TargetInfo) -> HearthResult<()> {
        let skip_reason = if self.options.skip {
            Some("repository refresh disabled".to_string())
        } else if !self.privilege.can_refresh() {
            Some(format!("running as {}", self.privilege))
        } else {
            None
        };

        if let Some(reason) = skip_reason {
            info!("Skipping repository refresh: {}", reason);
            for repo in &self.state.active {
                self.emit(RepoEvent::RefreshSkipped {
                    repo: repo.event_ref(),
                    reason: reason.clone(),
                });
            }
            return Ok(());
        }

        debug!(
            root = %target.root.display(),
            installed = target.installed,
            "refreshing repositories"
        );

        let repos = self.state.active.clone();
        for repo in &repos {
            if let Some(delay) = self.options.delay {
                thread::sleep(delay);
            }

            self.emit(RepoEvent::RefreshStart {
                repo: repo.event_ref(),
            });

            match self.handle.with(|conn| conn.refresh_repo(repo))? {
                Ok(()) => {
                    self.emit(RepoEvent::RefreshDone {
                        repo: repo.event_ref(),
                    });
                }
                Err(err) => {
                    let reason = err.to_string();
                    let err = HearthError::RepoRefreshFailed {
                        alias: repo.alias.clone(),
                        source: err,
                    };
                    warn!("{}: {}", err, reason);
                    self.mark_failed(repo);
                    self.emit(RepoEvent::RefreshError {
                        repo: repo.event_ref(),
                        reason,
                    });
                }
            }
        }

        Ok(())
    }

    /// Loads resolvables from every active repository, including those whose
    /// refresh failed. Returns the total number loaded.
    pub fn load(&mut self) -> HearthResult<usize> {
        let mut total = 0;

        let repos = self.state.active.clone();
        for repo in &repos {
            match self.handle.with(|conn| conn.load_resolvables(repo))? {
                Ok(count) => {
                    debug!(alias = %repo.alias, count, "loaded repository");
                    total += count;
                }
                Err(err) => {
                    let reason = err.to_string();
                    let err = HearthError::RepoLoadFailed {
                        alias: repo.alias.clone(),
                        source: err,
                    };
                    warn!("{}: {}", err, reason);
                    self.mark_failed(repo);
                    self.emit(RepoEvent::LoadError {
                        repo: repo.event_ref(),
                        reason,
                    });
                }
            }
        }

        Ok(total)
    }

    pub fn active(&self) -> &[RepoDescriptor] {
        &self.state.active
    }

    pub fn failed(&self) -> &[RepoDescriptor] {
        &self.state.failed
    }

    pub fn have_failed_repos(&self) -> bool {
        !self.state.failed.is_empty()
    }

    pub fn is_failed(&self, alias: &str) -> bool {
        self.state.failed.iter().any(|repo| repo.alias == alias)
    }

    pub fn state(&self) -> RepoCatalogState {
        self.state.clone()
    }

    pub fn privilege(&self) -> EffectivePrivilege {
        self.privilege
    }

    /// Recovery advice for a catalog with failed repositories.
    pub fn failed_repos_advice(&self) -> String {
        let aliases: Vec<&str> = self
            .state
            .failed
            .iter()
            .map(|repo| repo.alias.as_str())
            .collect();

        format!(
            "Some repositories could not be refreshed or loaded: {}.\n\
             Packages from them may be outdated or missing. Force a full refresh of all \
             repositories and then run a distribution upgrade to get back to a consistent state.",
            aliases.join(", ")
        )
    }
}
