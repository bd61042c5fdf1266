use std::{
    collections::HashSet,
    path::Path,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    },
};

use crate::{
    backend::{Backend, BackendError, CommitCallbacks, Connection, RepoDescriptor},
    commit::{CommitPlan, CommitPolicy, CommitReport, PlanAction},
    session::SessionHandle,
};

pub fn repo(alias: &str) -> RepoDescriptor {
    RepoDescriptor {
        alias: alias.to_string(),
        name: alias.to_string(),
        urls: vec![format!("file:///srv/{alias}")],
        enabled: true,
        autorefresh: true,
        priority: 99,
    }
}

/// Ordered record of the calls a scripted connection received.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn count(&self, entry: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|e| *e == entry).count()
    }

    pub fn entries_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .cloned()
            .collect()
    }
}

type CommitScript = dyn Fn(&CommitPlan, &mut dyn CommitCallbacks) -> Result<CommitReport, BackendError>
    + Send
    + Sync;

#[derive(Default)]
struct Script {
    busy_for: u32,
    repos: Vec<RepoDescriptor>,
    installed: usize,
    failing_target: bool,
    failing_enumerate: bool,
    failing_refresh: HashSet<String>,
    failing_load: HashSet<String>,
    commit: Option<Arc<CommitScript>>,
}

/// In-memory backend whose behaviour is set up per test.
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    script: Arc<Mutex<Script>>,
    connect_calls: Arc<AtomicU32>,
    last_policy: Arc<Mutex<Option<CommitPolicy>>>,
    journal: Journal,
}

impl ScriptedBackend {
    pub const RESOLVABLES_PER_REPO: usize = 5;

    pub fn new() -> Self {
        Self::default()
    }

    fn configure(self, f: impl FnOnce(&mut Script)) -> Self {
        f(&mut self.script.lock().unwrap());
        self
    }

    /// The first `n` connect calls fail as busy.
    pub fn busy_for(self, n: u32) -> Self {
        self.configure(|s| s.busy_for = n)
    }

    pub fn with_repos(self, repos: Vec<RepoDescriptor>) -> Self {
        self.configure(|s| s.repos = repos)
    }

    pub fn with_installed(self, installed: usize) -> Self {
        self.configure(|s| s.installed = installed)
    }

    pub fn failing_target(self) -> Self {
        self.configure(|s| s.failing_target = true)
    }

    pub fn failing_enumerate(self) -> Self {
        self.configure(|s| s.failing_enumerate = true)
    }

    pub fn failing_refresh(self, alias: &str) -> Self {
        self.configure(|s| {
            s.failing_refresh.insert(alias.to_string());
        })
    }

    pub fn failing_load(self, alias: &str) -> Self {
        self.configure(|s| {
            s.failing_load.insert(alias.to_string());
        })
    }

    /// Lets refresh and load of `alias` succeed again.
    pub fn recovered(self, alias: &str) -> Self {
        self.configure(|s| {
            s.failing_refresh.remove(alias);
            s.failing_load.remove(alias);
        })
    }

    pub fn with_commit_script<F>(self, f: F) -> Self
    where
        F: Fn(&CommitPlan, &mut dyn CommitCallbacks) -> Result<CommitReport, BackendError>
            + Send
            + Sync
            + 'static,
    {
        self.configure(|s| s.commit = Some(Arc::new(f)))
    }

    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }

    pub fn connect_calls(&self) -> u32 {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn last_policy(&self) -> Option<CommitPolicy> {
        *self.last_policy.lock().unwrap()
    }

    /// Connects directly, bypassing any session.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle::new(self.connect().unwrap())
    }
}

impl Backend for ScriptedBackend {
    fn connect(&self) -> Result<Box<dyn Connection>, BackendError> {
        let call = self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if call < self.script.lock().unwrap().busy_for {
            return Err(BackendError::Busy("locked by pid 4242".into()));
        }
        self.journal.push("connect");
        Ok(Box::new(ScriptedConnection {
            backend: self.clone(),
        }))
    }
}

struct ScriptedConnection {
    backend: ScriptedBackend,
}

impl ScriptedConnection {
    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.backend.script.lock().unwrap()
    }

    fn log(&self, entry: String) {
        self.backend.journal.push(entry);
    }
}

impl Connection for ScriptedConnection {
    fn set_locale(&mut self, locale: &str) {
        self.log(format!("locale:{locale}"));
    }

    fn init_target(&mut self, _root: &Path) -> Result<usize, BackendError> {
        self.log("init_target".into());
        let script = self.script();
        if script.failing_target {
            return Err(BackendError::Failed("rpm database is corrupt".into()));
        }
        Ok(script.installed)
    }

    fn enumerate_repos(&mut self) -> Result<Vec<RepoDescriptor>, BackendError> {
        self.log("enumerate".into());
        let script = self.script();
        if script.failing_enumerate {
            return Err(BackendError::Failed("repo config unreadable".into()));
        }
        Ok(script.repos.clone())
    }

    fn refresh_repo(&mut self, repo: &RepoDescriptor) -> Result<(), BackendError> {
        self.log(format!("refresh:{}", repo.alias));
        if self.script().failing_refresh.contains(&repo.alias) {
            return Err(BackendError::Failed("mirror unreachable".into()));
        }
        Ok(())
    }

    fn load_resolvables(&mut self, repo: &RepoDescriptor) -> Result<usize, BackendError> {
        self.log(format!("load:{}", repo.alias));
        if self.script().failing_load.contains(&repo.alias) {
            return Err(BackendError::Failed("no cached metadata".into()));
        }
        Ok(ScriptedBackend::RESOLVABLES_PER_REPO)
    }

    fn commit(
        &mut self,
        plan: &CommitPlan,
        callbacks: &mut dyn CommitCallbacks,
    ) -> Result<CommitReport, BackendError> {
        self.log("commit".into());
        *self.backend.last_policy.lock().unwrap() = Some(plan.policy);

        let script = self.script().commit.clone();
        if let Some(script) = script {
            return script(plan, callbacks);
        }

        let mut attempted = 0;
        for action in &plan.actions {
            let item = &action.resolvable;
            let started = match action.action {
                PlanAction::Install | PlanAction::Update => callbacks.install_start(item),
                PlanAction::Remove => callbacks.remove_start(item),
            };
            if started.is_abort() {
                break;
            }
            attempted += 1;
            match action.action {
                PlanAction::Install | PlanAction::Update => {
                    callbacks.install_progress(item, 100);
                    callbacks.install_end(item);
                }
                PlanAction::Remove => {
                    callbacks.remove_progress(item, 100);
                    callbacks.remove_end(item);
                }
            }
        }

        Ok(CommitReport {
            attempted,
            no_errors: true,
        })
    }
}

impl Drop for ScriptedConnection {
    fn drop(&mut self) {
        self.log("disconnect".into());
    }
}
