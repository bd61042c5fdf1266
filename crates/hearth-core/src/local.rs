//! Directory-backed reference backend.
//!
//! Repositories are `file://` directories holding a `repo.toml` with a
//! `[[resolvables]]` list. Refreshing copies that file into the metadata
//! cache, loading reads the cached copy. The installed set of the target
//! lives in `var/lib/hearth/installed.toml` below the target root, and
//! "downloaded" packages are marker files in the cache.

use std::{
    fs,
    path::{Path, PathBuf},
};

use hearth_config::{config::Config, repository::Repository};
use hearth_utils::{
    lock::FileLock,
    path::{file_name_component, join_under_root},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use url::Url;

use crate::{
    backend::{
        Backend, BackendError, BackendResolvable, CommitCallbacks, Connection, RepoDescriptor,
    },
    commit::{CommitPlan, CommitReport, PlanAction},
    HearthResult,
};

pub const REPO_FILE: &str = "repo.toml";
pub const INSTALLED_DB: &str = "/var/lib/hearth/installed.toml";
pub const LOCK_NAME: &str = "backend";

const PACKAGE_DIR: &str = "packages";
const PROGRESS_STEPS: [i64; 4] = [25, 50, 75, 100];

#[derive(Debug, Default, Deserialize, Serialize)]
struct ResolvableList {
    #[serde(default)]
    resolvables: Vec<BackendResolvable>,
}

fn read_list(path: &Path) -> Result<ResolvableList, BackendError> {
    let content = fs::read_to_string(path)
        .map_err(|err| BackendError::io(format!("reading {}", path.display()), err))?;
    toml::from_str(&content).map_err(|source| {
        BackendError::Parse {
            path: path.display().to_string(),
            source,
        }
    })
}

fn write_file(path: &Path, content: &str) -> Result<(), BackendError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| {
            BackendError::io(format!("creating directory {}", parent.display()), err)
        })?;
    }
    fs::write(path, content)
        .map_err(|err| BackendError::io(format!("writing {}", path.display()), err))
}

fn write_list(path: &Path, list: &ResolvableList) -> Result<(), BackendError> {
    let content = toml::to_string_pretty(list)
        .map_err(|err| BackendError::Failed(format!("serializing {}: {err}", path.display())))?;
    write_file(path, &content)
}

fn descriptor(repo: &Repository) -> RepoDescriptor {
    RepoDescriptor {
        alias: repo.alias.clone(),
        name: repo.display_name().to_string(),
        urls: repo.urls.clone(),
        enabled: repo.is_enabled(),
        autorefresh: repo.autorefresh(),
        priority: repo.priority(),
    }
}

/// Backend over plain directories; see the module docs for the layout.
pub struct LocalBackend {
    repos: Vec<RepoDescriptor>,
    cache_dir: PathBuf,
    lock_dir: PathBuf,
}

impl LocalBackend {
    pub fn new(repos: Vec<RepoDescriptor>, cache_dir: PathBuf, lock_dir: PathBuf) -> Self {
        Self {
            repos,
            cache_dir,
            lock_dir,
        }
    }

    pub fn from_config(config: &Config) -> HearthResult<Self> {
        Ok(Self::new(
            config.repositories.iter().map(descriptor).collect(),
            config.get_cache_path()?,
            config.get_lock_path()?,
        ))
    }
}

impl Backend for LocalBackend {
    fn connect(&self) -> Result<Box<dyn Connection>, BackendError> {
        let lock = FileLock::try_acquire(&self.lock_dir, LOCK_NAME)
            .map_err(|err| BackendError::Failed(err.to_string()))?
            .ok_or_else(|| {
                BackendError::Busy(format!(
                    "{} is held by another process",
                    FileLock::lock_path(&self.lock_dir, LOCK_NAME).display()
                ))
            })?;

        debug!(lock = %lock.path().display(), "acquired backend lock");
        Ok(Box::new(LocalConnection {
            _lock: lock,
            repos: self.repos.clone(),
            cache_dir: self.cache_dir.clone(),
            target: None,
            pool: Vec::new(),
        }))
    }
}

struct LocalTarget {
    db_path: PathBuf,
    installed: Vec<BackendResolvable>,
}

struct PoolEntry {
    alias: String,
    priority: u32,
    resolvables: Vec<BackendResolvable>,
}

struct LocalConnection {
    _lock: FileLock,
    repos: Vec<RepoDescriptor>,
    cache_dir: PathBuf,
    target: Option<LocalTarget>,
    pool: Vec<PoolEntry>,
}

impl LocalConnection {
    fn cached_repo_file(&self, alias: &str) -> PathBuf {
        self.cache_dir
            .join(file_name_component(alias))
            .join(REPO_FILE)
    }

    fn package_path(&self, item: &BackendResolvable) -> PathBuf {
        self.cache_dir
            .join(PACKAGE_DIR)
            .join(format!("{}.pkg", item.to_ref()))
    }

    /// Best match for `wanted` across loaded repositories; lower priority
    /// values win, ties go to the repository loaded first.
    fn find_available(&self, wanted: &BackendResolvable) -> Option<BackendResolvable> {
        self.pool
            .iter()
            .filter_map(|entry| {
                entry
                    .resolvables
                    .iter()
                    .find(|candidate| wanted.matches(candidate))
                    .map(|found| (entry.priority, found))
            })
            .min_by_key(|(priority, _)| *priority)
            .map(|(_, found)| found.clone())
    }

    fn fetch(&self, url: &Url, alias: &str) -> Result<String, BackendError> {
        if url.scheme() != "file" {
            return Err(BackendError::Unsupported(format!(
                "URL scheme '{}' of repository '{}'",
                url.scheme(),
                alias
            )));
        }

        let dir = url
            .to_file_path()
            .map_err(|_| BackendError::Failed(format!("'{url}' is not a local path")))?;
        let source = dir.join(REPO_FILE);
        read_list(&source)?;

        fs::read_to_string(&source)
            .map_err(|err| BackendError::io(format!("reading {}", source.display()), err))
    }

    /// Installs requested twice with different versions cannot coexist, and
    /// neither can a candidate whose arch differs from the installed
    /// resolvable of the same name. Sets `stop` if a callback asks to abort.
    fn check_conflicts(
        &self,
        plan: &CommitPlan,
        installed: &[BackendResolvable],
        callbacks: &mut dyn CommitCallbacks,
        stop: &mut bool,
    ) -> Vec<String> {
        let installs: Vec<&BackendResolvable> = plan
            .actions
            .iter()
            .filter(|action| action.action.needs_download())
            .map(|action| &action.resolvable)
            .collect();

        let mut conflicts = Vec::new();
        let total = installs.len().max(1) as i64;
        for (idx, item) in installs.iter().enumerate() {
            for other in &installs[idx + 1..] {
                if item.name == other.name && item != other {
                    conflicts.push(format!(
                        "{} conflicts with {}",
                        item.to_ref(),
                        other.to_ref()
                    ));
                }
            }
            if let Some(candidate) = self.find_available(item) {
                let clashing = installed.iter().filter(|present| {
                    present.name == candidate.name && present.arch != candidate.arch
                });
                for present in clashing {
                    conflicts.push(format!(
                        "{} conflicts with installed {}",
                        candidate.to_ref(),
                        present.to_ref()
                    ));
                }
            }

            *stop |= callbacks
                .conflict_check_progress((idx as i64 + 1) * 100 / total)
                .is_abort();
            if *stop {
                break;
            }
        }
        if installs.is_empty() {
            *stop |= callbacks.conflict_check_progress(100).is_abort();
        }

        conflicts
    }
}

impl Connection for LocalConnection {
    fn set_locale(&mut self, locale: &str) {
        // Messages of this backend are not translated.
        trace!(locale, "backend locale set");
    }

    fn init_target(&mut self, root: &Path) -> Result<usize, BackendError> {
        let db_path = join_under_root(root, INSTALLED_DB);
        let installed = if db_path.exists() {
            read_list(&db_path)?.resolvables
        } else {
            debug!(db = %db_path.display(), "no installed database; empty system");
            Vec::new()
        };

        let count = installed.len();
        self.target = Some(LocalTarget {
            db_path,
            installed,
        });
        Ok(count)
    }

    fn enumerate_repos(&mut self) -> Result<Vec<RepoDescriptor>, BackendError> {
        Ok(self.repos.clone())
    }

    fn refresh_repo(&mut self, repo: &RepoDescriptor) -> Result<(), BackendError> {
        let mut last_err = BackendError::Failed(format!("repository '{}' has no URL", repo.alias));

        for raw in &repo.urls {
            let url = match Url::parse(raw) {
                Ok(url) => url,
                Err(err) => {
                    last_err = BackendError::Failed(format!("invalid URL '{raw}': {err}"));
                    continue;
                }
            };

            match self.fetch(&url, &repo.alias) {
                Ok(content) => {
                    write_file(&self.cached_repo_file(&repo.alias), &content)?;
                    debug!(alias = %repo.alias, %url, "refreshed repository");
                    return Ok(());
                }
                Err(err) => {
                    trace!(alias = %repo.alias, %url, "mirror failed: {}", err);
                    last_err = err;
                }
            }
        }

        Err(last_err)
    }

    fn load_resolvables(&mut self, repo: &RepoDescriptor) -> Result<usize, BackendError> {
        let list = read_list(&self.cached_repo_file(&repo.alias))?;
        let count = list.resolvables.len();

        self.pool.retain(|entry| entry.alias != repo.alias);
        self.pool.push(PoolEntry {
            alias: repo.alias.clone(),
            priority: repo.priority,
            resolvables: list.resolvables,
        });

        Ok(count)
    }

    fn commit(
        &mut self,
        plan: &CommitPlan,
        callbacks: &mut dyn CommitCallbacks,
    ) -> Result<CommitReport, BackendError> {
        let target = self
            .target
            .as_ref()
            .ok_or_else(|| BackendError::Failed("target is not initialized".into()))?;
        let dry_run = plan.policy.dry_run;

        let mut begun = vec![false; plan.actions.len()];
        let mut no_errors = true;
        let report = |begun: &[bool], no_errors: bool| {
            CommitReport {
                attempted: begun.iter().filter(|b| **b).count(),
                no_errors,
            }
        };

        let mut stop = callbacks.conflict_check_start().is_abort();
        let conflicts = self.check_conflicts(plan, &target.installed, callbacks, &mut stop);
        stop |= callbacks.conflict_check_result(&conflicts).is_abort();
        if !conflicts.is_empty() {
            return Ok(report(&begun, false));
        }

        // Downloads
        let mut fetched: Vec<Option<BackendResolvable>> = vec![None; plan.actions.len()];
        for (idx, action) in plan.actions.iter().enumerate() {
            if stop {
                break;
            }
            if !action.action.needs_download() {
                continue;
            }

            let Some(found) = self.find_available(&action.resolvable) else {
                begun[idx] = true;
                no_errors = false;
                stop |= callbacks
                    .download_error(&action.resolvable, "not available in any loaded repository")
                    .is_abort();
                continue;
            };

            let package = self.package_path(&found);
            if package.exists() {
                if callbacks.download_cached(&found).is_abort() {
                    break;
                }
                begun[idx] = true;
                fetched[idx] = Some(found);
                continue;
            }

            if callbacks.download_start(&found).is_abort() {
                break;
            }
            begun[idx] = true;
            for percent in PROGRESS_STEPS {
                stop |= callbacks.download_progress(&found, percent).is_abort();
            }

            let written = if dry_run {
                Ok(())
            } else {
                toml::to_string(&found)
                    .map_err(|err| BackendError::Failed(err.to_string()))
                    .and_then(|content| write_file(&package, &content))
            };
            match written {
                Ok(()) => {
                    stop |= callbacks.download_end(&found).is_abort();
                    fetched[idx] = Some(found);
                }
                Err(err) => {
                    no_errors = false;
                    stop |= callbacks
                        .download_error(&found, &err.to_string())
                        .is_abort();
                }
            }
        }

        if plan.policy.download_only || stop {
            return Ok(report(&begun, no_errors));
        }

        // Install and remove
        let mut installed = target.installed.clone();
        for (idx, action) in plan.actions.iter().enumerate() {
            if stop {
                break;
            }

            match action.action {
                PlanAction::Install | PlanAction::Update => {
                    let Some(found) = fetched[idx].take() else {
                        continue;
                    };
                    if callbacks.install_start(&found).is_abort() {
                        break;
                    }
                    for percent in PROGRESS_STEPS {
                        stop |= callbacks.install_progress(&found, percent).is_abort();
                    }
                    installed.retain(|item| item.name != found.name);
                    installed.push(found.clone());
                    stop |= callbacks.install_end(&found).is_abort();
                }
                PlanAction::Remove => {
                    begun[idx] = true;
                    let Some(found) = installed
                        .iter()
                        .find(|item| action.resolvable.matches(item))
                        .cloned()
                    else {
                        no_errors = false;
                        stop |= callbacks
                            .remove_error(&action.resolvable, "not installed")
                            .is_abort();
                        continue;
                    };
                    if callbacks.remove_start(&found).is_abort() {
                        begun[idx] = false;
                        break;
                    }
                    for percent in PROGRESS_STEPS {
                        stop |= callbacks.remove_progress(&found, percent).is_abort();
                    }
                    installed.retain(|item| item != &found);
                    stop |= callbacks.remove_end(&found).is_abort();
                }
            }
        }

        if !dry_run {
            write_list(
                &target.db_path,
                &ResolvableList {
                    resolvables: installed.clone(),
                },
            )?;
            if let Some(target) = self.target.as_mut() {
                target.installed = installed;
            }
        }

        Ok(report(&begun, no_errors))
    }
}
