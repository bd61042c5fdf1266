use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use hearth_config::config::{Config, DEFAULT_CONNECT_ATTEMPTS, DEFAULT_CONNECT_WAIT_SECS};
use hearth_events::{CommitEventRelay, EventSinkHandle};
use hearth_utils::system::locale_from_env;
use once_cell::sync::OnceCell;
use tracing::{debug, info, trace, warn};

use crate::{
    adapter::CommitCallbackAdapter,
    backend::{Backend, Connection},
    catalog::{RefreshOptions, RepositoryCatalog},
    commit::{CommitOutcome, CommitPlan},
    error::HearthError,
    privilege::EffectivePrivilege,
    target::{TargetInfo, TargetInitializer},
    HearthResult,
};

/// Shared handle to the one live backend connection.
#[derive(Clone)]
pub struct SessionHandle(Arc<Mutex<Box<dyn Connection>>>);

impl SessionHandle {
    pub fn new(conn: Box<dyn Connection>) -> Self {
        Self(Arc::new(Mutex::new(conn)))
    }

    /// Runs `f` with exclusive access to the connection.
    pub fn with<R>(&self, f: impl FnOnce(&mut dyn Connection) -> R) -> HearthResult<R> {
        let mut conn = self.0.lock()?;
        Ok(f(conn.as_mut()))
    }

    pub fn ptr_eq(&self, other: &SessionHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Everything a session needs to know about how it should behave.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub privilege: EffectivePrivilege,
    pub connect_attempts: u32,
    pub connect_wait: Duration,
    pub target_root: PathBuf,
    pub no_repo_refresh: bool,
    pub slow_repo_refresh: Option<Duration>,
    pub read_only: bool,
    pub dry_run: bool,
    pub download_only: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            privilege: EffectivePrivilege::None,
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            connect_wait: Duration::from_secs(DEFAULT_CONNECT_WAIT_SECS),
            target_root: PathBuf::from("/"),
            no_repo_refresh: false,
            slow_repo_refresh: None,
            read_only: false,
            dry_run: false,
            download_only: false,
        }
    }
}

impl SessionOptions {
    pub fn from_config(config: &Config) -> HearthResult<Self> {
        Ok(Self {
            privilege: EffectivePrivilege::detect(config.fake_root()),
            connect_attempts: config.connect_attempts(),
            connect_wait: config.connect_wait(),
            target_root: config.get_target_root()?,
            no_repo_refresh: config.no_repo_refresh(),
            slow_repo_refresh: config.slow_repo_refresh(),
            read_only: config.read_only(),
            dry_run: false,
            download_only: false,
        })
    }
}

/// Drives one backend session: connect, target, repositories, commits.
///
/// Teardown order is catalog, then target, then connection; the backend does
/// not allow dependent objects to outlive the connection.
pub struct BackendSession {
    backend: Arc<dyn Backend>,
    options: SessionOptions,
    relay: Arc<CommitEventRelay>,
    repo_sink: EventSinkHandle,
    locale: OnceCell<String>,
    handle: Option<SessionHandle>,
    target: Option<TargetInitializer>,
    catalog: Option<RepositoryCatalog>,
}

impl BackendSession {
    pub fn new(backend: Arc<dyn Backend>, options: SessionOptions) -> Self {
        let relay = CommitEventRelay::new();
        Self {
            backend,
            options,
            repo_sink: relay.clone(),
            relay,
            locale: OnceCell::new(),
            handle: None,
            target: None,
            catalog: None,
        }
    }

    /// Sends repository events to `sink` instead of through the relay.
    pub fn with_repo_sink(mut self, sink: EventSinkHandle) -> Self {
        self.repo_sink = sink;
        self
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn relay(&self) -> &Arc<CommitEventRelay> {
        &self.relay
    }

    pub fn privilege(&self) -> EffectivePrivilege {
        self.options.privilege
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_some()
    }

    pub fn catalog(&self) -> Option<&RepositoryCatalog> {
        self.catalog.as_ref()
    }

    pub fn target(&self) -> Option<&TargetInfo> {
        self.target.as_ref().and_then(TargetInitializer::info)
    }

    /// Backend locale, derived from the environment on first use.
    pub fn locale(&self) -> &str {
        self.locale.get_or_init(locale_from_env)
    }

    fn handle(&self) -> HearthResult<&SessionHandle> {
        self.handle.as_ref().ok_or(HearthError::NotConnected)
    }

    /// Connects to the backend, retrying with a fixed wait in between.
    ///
    /// Returns the existing handle if already connected.
    pub fn connect(&mut self) -> HearthResult<SessionHandle> {
        if let Some(handle) = &self.handle {
            trace!("already connected");
            return Ok(handle.clone());
        }

        let attempts = self.options.connect_attempts.max(1);
        let mut reason = String::new();

        for attempt in 1..=attempts {
            debug!(attempt, attempts, "connecting to package backend");
            match self.backend.connect() {
                Ok(mut conn) => {
                    conn.set_locale(self.locale());
                    let handle = SessionHandle::new(conn);
                    self.handle = Some(handle.clone());
                    info!("Connected to package backend");
                    return Ok(handle);
                }
                Err(err) => {
                    reason = err.to_string();
                    warn!("Connection attempt {}/{} failed: {}", attempt, attempts, reason);
                    if attempt < attempts {
                        thread::sleep(self.options.connect_wait);
                    }
                }
            }
        }

        Err(HearthError::ConnectionExhausted {
            attempts,
            reason,
        })
    }

    /// Registers the target system. Must run after `connect` and before
    /// `attach_repos`.
    pub fn init_target(&mut self) -> HearthResult<TargetInfo> {
        let handle = self.handle()?.clone();
        let target = self
            .target
            .get_or_insert_with(|| TargetInitializer::new(self.options.target_root.clone()));
        target.init(&handle).cloned()
    }

    /// Discovers, refreshes and loads all enabled repositories.
    ///
    /// Calling it again reruns the pass on the same catalog, so repositories
    /// that failed earlier in the session stay failed.
    pub fn attach_repos(&mut self) -> HearthResult<&RepositoryCatalog> {
        let handle = self.handle()?.clone();
        let target = self.target().cloned().ok_or(HearthError::TargetNotInitialized)?;

        let mut catalog = match self.catalog.take() {
            Some(catalog) => catalog,
            None => RepositoryCatalog::new(
                handle,
                self.repo_sink.clone(),
                self.options.privilege,
                RefreshOptions {
                    skip: self.options.no_repo_refresh,
                    delay: self.options.slow_repo_refresh,
                },
            ),
        };

        let pass = catalog
            .discover()
            .and_then(|_| catalog.refresh(&target))
            .and_then(|_| catalog.load());
        let catalog = self.catalog.insert(catalog);
        let loaded = pass?;
        info!(
            "Loaded {} resolvable(s) from {} repositor{}",
            loaded,
            catalog.active().len(),
            if catalog.active().len() == 1 { "y" } else { "ies" }
        );
        if catalog.have_failed_repos() {
            warn!("{}", catalog.failed_repos_advice());
        }

        Ok(catalog)
    }

    /// Commits `plan`, reporting progress through the relay.
    ///
    /// The abort flag is cleared first. A fake-root session always commits as
    /// a dry run. Items the backend leaves unfinished get an Error event. The
    /// outcome is `Aborted` only if an abort request left items unstarted.
    pub fn commit(&mut self, plan: &CommitPlan) -> HearthResult<CommitOutcome> {
        if self.options.read_only || !self.options.privilege.is_elevated() {
            return Err(HearthError::ReadOnlyMode);
        }
        let handle = self.handle()?.clone();
        if self.target().is_none() {
            return Err(HearthError::TargetNotInitialized);
        }

        self.relay.reset();

        let mut plan = plan.clone();
        plan.policy.dry_run |= self.options.dry_run || self.options.privilege == EffectivePrivilege::Faked;
        plan.policy.download_only |= self.options.download_only;

        debug!(
            actions = plan.actions.len(),
            dry_run = plan.policy.dry_run,
            download_only = plan.policy.download_only,
            "starting commit"
        );

        let mut adapter = CommitCallbackAdapter::new(self.relay.clone());
        let result = handle.with(|conn| conn.commit(&plan, &mut adapter));

        let reason = match &result {
            Ok(Ok(_)) => "backend stopped before finishing the item".to_string(),
            Ok(Err(err)) => err.to_string(),
            Err(err) => err.to_string(),
        };
        let unfinished = adapter.finish_open_streams(&reason);
        if unfinished > 0 {
            warn!("{} item(s) left unfinished: {}", unfinished, reason);
        }

        let report = result?.map_err(HearthError::CommitFailed)?;

        let stopped_early = adapter.skipped() > 0 || report.attempted < plan.actions.len();
        if self.relay.abort_requested() && stopped_early {
            info!("Commit aborted after {} item(s)", report.attempted);
            Ok(CommitOutcome::Aborted(report))
        } else {
            Ok(CommitOutcome::Completed(report))
        }
    }

    /// Releases the catalog, the target and finally the connection.
    pub fn shutdown(&mut self) {
        if self.catalog.take().is_some() {
            trace!("released repository catalog");
        }
        if self.target.take().is_some() {
            trace!("released target");
        }
        if self.handle.take().is_some() {
            debug!("disconnected from package backend");
        }
    }
}

impl Drop for BackendSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use hearth_events::{CollectorSink, CommitEvent, CommitEventKind, Event, EventSink};

    use super::*;
    use crate::{
        backend::{BackendError, BackendResolvable},
        commit::CommitReport,
        test_utils::{repo, ScriptedBackend},
    };

    fn options(privilege: EffectivePrivilege) -> SessionOptions {
        SessionOptions {
            privilege,
            connect_wait: Duration::ZERO,
            ..SessionOptions::default()
        }
    }

    fn session(backend: &ScriptedBackend, options: SessionOptions) -> BackendSession {
        BackendSession::new(Arc::new(backend.clone()), options)
    }

    fn ready(backend: &ScriptedBackend, privilege: EffectivePrivilege) -> BackendSession {
        let mut session = session(backend, options(privilege));
        session.connect().unwrap();
        session.init_target().unwrap();
        session.attach_repos().unwrap();
        session
    }

    #[test]
    fn test_connect_exhausts_after_n_attempts() {
        for attempts in 1..=4 {
            let backend = ScriptedBackend::new().busy_for(u32::MAX);
            let mut session = session(
                &backend,
                SessionOptions {
                    connect_attempts: attempts,
                    connect_wait: Duration::from_millis(10),
                    ..SessionOptions::default()
                },
            );

            let started = Instant::now();
            let result = session.connect();

            assert!(matches!(
                result,
                Err(HearthError::ConnectionExhausted { attempts: a, .. }) if a == attempts
            ));
            assert_eq!(backend.connect_calls(), attempts);
            assert!(started.elapsed() >= Duration::from_millis(10) * (attempts - 1));
            assert!(!session.is_connected());
        }
    }

    #[test]
    fn test_zero_attempts_still_tries_once() {
        let backend = ScriptedBackend::new().busy_for(u32::MAX);
        let mut session = session(
            &backend,
            SessionOptions {
                connect_attempts: 0,
                ..options(EffectivePrivilege::None)
            },
        );

        assert!(session.connect().is_err());
        assert_eq!(backend.connect_calls(), 1);
    }

    #[test]
    fn test_connect_succeeds_after_retry() {
        let backend = ScriptedBackend::new().busy_for(2);
        let mut session = session(&backend, options(EffectivePrivilege::None));

        session.connect().unwrap();
        assert_eq!(backend.connect_calls(), 3);
        assert!(session.is_connected());
    }

    #[test]
    fn test_connect_is_idempotent() {
        let backend = ScriptedBackend::new();
        let mut session = session(&backend, options(EffectivePrivilege::None));

        let first = session.connect().unwrap();
        let second = session.connect().unwrap();
        assert!(first.ptr_eq(&second));
        assert_eq!(backend.connect_calls(), 1);
    }

    #[test]
    fn test_locale_set_once_on_connect() {
        let backend = ScriptedBackend::new();
        let mut session = session(&backend, options(EffectivePrivilege::None));

        session.connect().unwrap();
        session.connect().unwrap();
        assert_eq!(backend.journal().entries_with_prefix("locale:").len(), 1);
    }

    #[test]
    fn test_lifecycle_ordering_enforced() {
        let backend = ScriptedBackend::new();
        let mut session = session(&backend, options(EffectivePrivilege::Real));

        assert!(matches!(session.init_target(), Err(HearthError::NotConnected)));
        session.connect().unwrap();
        assert!(matches!(
            session.attach_repos(),
            Err(HearthError::TargetNotInitialized)
        ));
        session.init_target().unwrap();
        assert!(session.attach_repos().is_ok());
    }

    #[test]
    fn test_target_init_runs_once() {
        let backend = ScriptedBackend::new();
        let mut session = session(&backend, options(EffectivePrivilege::None));
        session.connect().unwrap();

        session.init_target().unwrap();
        session.init_target().unwrap();
        assert_eq!(backend.journal().count("init_target"), 1);
    }

    #[test]
    fn test_repo_events_flow_through_relay() {
        let backend = ScriptedBackend::new().with_repos(vec![repo("oss")]);
        let mut session = session(&backend, options(EffectivePrivilege::Real));
        let sink = Arc::new(CollectorSink::default());
        session.relay().subscribe(sink.clone());

        session.connect().unwrap();
        session.init_target().unwrap();
        session.attach_repos().unwrap();

        assert_eq!(sink.repo_events().len(), 3);
    }

    #[test]
    fn test_failed_repos_survive_second_attach() {
        let backend = ScriptedBackend::new()
            .with_repos(vec![repo("a"), repo("b")])
            .failing_refresh("b");
        let mut session = ready(&backend, EffectivePrivilege::Real);
        assert!(session.catalog().unwrap().is_failed("b"));

        backend.clone().recovered("b");
        let catalog = session.attach_repos().unwrap();

        assert!(catalog.is_failed("b"));
        assert_eq!(catalog.failed().len(), 1);
        assert_eq!(backend.journal().entries_with_prefix("refresh:").len(), 4);
    }

    #[test]
    fn test_commit_refused_when_read_only() {
        let backend = ScriptedBackend::new();
        let mut session = ready(&backend, EffectivePrivilege::None);
        assert!(matches!(
            session.commit(&CommitPlan::new()),
            Err(HearthError::ReadOnlyMode)
        ));

        let mut session = BackendSession::new(
            Arc::new(backend.clone()),
            SessionOptions {
                read_only: true,
                ..options(EffectivePrivilege::Real)
            },
        );
        session.connect().unwrap();
        session.init_target().unwrap();
        assert!(matches!(
            session.commit(&CommitPlan::new()),
            Err(HearthError::ReadOnlyMode)
        ));
    }

    #[test]
    fn test_fake_root_commit_is_dry_run() {
        let backend = ScriptedBackend::new();
        let mut session = ready(&backend, EffectivePrivilege::Faked);

        session.commit(&CommitPlan::new()).unwrap();
        assert_eq!(backend.last_policy().map(|p| p.dry_run), Some(true));
    }

    #[test]
    fn test_abort_stops_new_items_and_reset_between_commits() {
        let backend = ScriptedBackend::new().with_commit_script(|plan, callbacks| {
            let mut attempted = 0;
            for action in &plan.actions {
                let item = &action.resolvable;
                if callbacks.install_start(item).is_abort() {
                    // Keep reporting to check nothing leaks past the adapter.
                    callbacks.install_progress(item, 50);
                    callbacks.install_end(item);
                    continue;
                }
                attempted += 1;
                callbacks.install_progress(item, 50);
                callbacks.install_end(item);
            }
            Ok(CommitReport {
                attempted,
                no_errors: true,
            })
        });
        let mut session = ready(&backend, EffectivePrivilege::Real);

        struct AbortOnFirstEnd(hearth_events::AbortHandle);
        impl EventSink for AbortOnFirstEnd {
            fn emit(&self, event: &Event) {
                if let Some(CommitEvent::InstallEnd { .. }) = event.as_commit() {
                    self.0.request_abort();
                }
            }
        }

        let collector = Arc::new(CollectorSink::default());
        session.relay().subscribe(collector.clone());
        let abort = session.relay().abort_handle();
        let aborter = session.relay().subscribe(Arc::new(AbortOnFirstEnd(abort)));

        let plan = CommitPlan::new()
            .install(BackendResolvable::new("a", "1", "x86_64"))
            .install(BackendResolvable::new("b", "1", "x86_64"));

        let outcome = session.commit(&plan).unwrap();
        assert!(outcome.is_aborted());
        assert_eq!(outcome.report().attempted, 1);

        let kinds: Vec<_> = collector.commit_events().iter().map(CommitEvent::kind).collect();
        assert_eq!(
            kinds,
            vec![
                CommitEventKind::InstallStart,
                CommitEventKind::InstallProgress,
                CommitEventKind::InstallEnd,
            ]
        );

        // Second transaction after reset reaches the same subscriber.
        session.relay().unsubscribe(aborter.id);
        collector.clear();
        let outcome = session.commit(&plan).unwrap();
        assert!(!outcome.is_aborted());
        assert_eq!(outcome.report().attempted, 2);
        assert_eq!(collector.commit_events().len(), 6);
    }

    fn commit_kinds(collector: &CollectorSink) -> Vec<CommitEventKind> {
        collector.commit_events().iter().map(CommitEvent::kind).collect()
    }

    #[test]
    fn test_item_left_open_by_halting_backend_gets_error() {
        let backend = ScriptedBackend::new().with_commit_script(|plan, callbacks| {
            let item = &plan.actions[0].resolvable;
            callbacks.install_start(item);
            callbacks.install_progress(item, 40);
            Ok(CommitReport {
                attempted: 1,
                no_errors: false,
            })
        });
        let mut session = ready(&backend, EffectivePrivilege::Real);
        let collector = Arc::new(CollectorSink::default());
        session.relay().subscribe(collector.clone());

        let plan = CommitPlan::new().install(BackendResolvable::new("vim", "9.1", "x86_64"));
        let outcome = session.commit(&plan).unwrap();

        assert!(!outcome.is_aborted());
        assert_eq!(
            commit_kinds(&collector),
            vec![
                CommitEventKind::InstallStart,
                CommitEventKind::InstallProgress,
                CommitEventKind::InstallError,
            ]
        );
    }

    #[test]
    fn test_item_left_open_by_failing_backend_gets_error() {
        let backend = ScriptedBackend::new().with_commit_script(|plan, callbacks| {
            callbacks.remove_start(&plan.actions[0].resolvable);
            Err(BackendError::Failed("transaction lock lost".into()))
        });
        let mut session = ready(&backend, EffectivePrivilege::Real);
        let collector = Arc::new(CollectorSink::default());
        session.relay().subscribe(collector.clone());

        let plan = CommitPlan::new().remove(BackendResolvable::new("nano", "", ""));
        let result = session.commit(&plan);

        assert!(matches!(result, Err(HearthError::CommitFailed(_))));
        let events = collector.commit_events();
        assert_eq!(
            commit_kinds(&collector),
            vec![CommitEventKind::RemoveStart, CommitEventKind::RemoveError]
        );
        assert_eq!(events[1].message(), Some("transaction lock lost"));
    }

    #[test]
    fn test_abort_after_last_item_completes() {
        let backend = ScriptedBackend::new();
        let mut session = ready(&backend, EffectivePrivilege::Real);

        struct AbortOnEnd(hearth_events::AbortHandle);
        impl EventSink for AbortOnEnd {
            fn emit(&self, event: &Event) {
                if let Some(CommitEvent::InstallEnd { .. }) = event.as_commit() {
                    self.0.request_abort();
                }
            }
        }
        session
            .relay()
            .subscribe(Arc::new(AbortOnEnd(session.relay().abort_handle())));

        let plan = CommitPlan::new().install(BackendResolvable::new("vim", "9.1", "x86_64"));
        let outcome = session.commit(&plan).unwrap();

        assert!(session.relay().abort_requested());
        assert!(!outcome.is_aborted());
        assert_eq!(outcome.report().attempted, 1);
    }

    #[test]
    fn test_shutdown_releases_in_order() {
        let backend = ScriptedBackend::new().with_repos(vec![repo("oss")]);
        let mut session = ready(&backend, EffectivePrivilege::Real);
        assert!(session.catalog().is_some());

        session.shutdown();

        assert!(session.catalog().is_none());
        assert!(session.target().is_none());
        assert!(!session.is_connected());
        // The connection is only dropped once the catalog released its handle.
        assert_eq!(backend.journal().count("disconnect"), 1);

        session.shutdown();
        assert_eq!(backend.journal().count("disconnect"), 1);
    }

    #[test]
    fn test_drop_disconnects() {
        let backend = ScriptedBackend::new();
        {
            let mut session = session(&backend, options(EffectivePrivilege::None));
            session.connect().unwrap();
        }
        assert_eq!(backend.journal().count("disconnect"), 1);
    }
}
