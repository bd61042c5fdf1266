use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, LazyLock, Mutex,
    },
    time::Duration,
};

use hearth_config::display::ProgressStyle as BarStyle;
use hearth_events::{
    CommitEvent, CommitEventKind, Event, EventSink, Operation, RepoEvent, ResolvableRef,
};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use nu_ansi_term::Color::{Cyan, Green, Yellow};
use tracing::{debug, error, info, warn};

use crate::utils::{display_settings, icon_or, Colored, Icons};

/// Shared MultiProgress instance for suspend/stop from other modules.
static MULTI: LazyLock<Arc<MultiProgress>> = LazyLock::new(|| Arc::new(MultiProgress::new()));

/// Pause progress display, run the closure, then resume.
pub fn suspend<F: FnOnce()>(f: F) {
    MULTI.suspend(f);
}

/// Stop and clear all progress bars.
pub fn stop() {
    MULTI.clear().ok();
}

fn bar_style(style: BarStyle) -> ProgressStyle {
    match style {
        BarStyle::Classic => {
            ProgressStyle::with_template("{prefix} [{bar:30}] {pos:>3}%")
                .unwrap()
                .progress_chars("=> ")
        }
        BarStyle::Modern => {
            ProgressStyle::with_template("{spinner:.cyan} {prefix}  {wide_bar:.cyan/dim}  {pos:>3}%")
                .unwrap()
                .progress_chars("━━─")
        }
        BarStyle::Minimal => ProgressStyle::with_template("{prefix} {pos:>3}%").unwrap(),
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.cyan} {msg}").unwrap()
}

fn create_spinner(message: String) -> ProgressBar {
    let pb = MULTI.add(ProgressBar::new_spinner());
    pb.set_style(spinner_style());
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn create_bar(operation: Operation, resolvable: &ResolvableRef) -> ProgressBar {
    let pb = MULTI.add(ProgressBar::new(100));
    pb.set_style(bar_style(display_settings().progress_style()));
    pb.set_prefix(format!("{:<8} {}", operation.to_string(), Colored(Cyan, resolvable)));
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn finished_verb(operation: Operation) -> &'static str {
    match operation {
        Operation::Download => "Downloaded",
        Operation::Install => "Installed",
        Operation::Remove => "Removed",
    }
}

type StreamKey = (ResolvableRef, Operation);

/// Renders commit events as one bar per resolvable and operation.
#[derive(Default)]
pub struct CommitProgress {
    bars: Mutex<HashMap<StreamKey, ProgressBar>>,
    conflict_check: Mutex<Option<ProgressBar>>,
    failures: AtomicUsize,
    conflicts: AtomicUsize,
}

impl CommitProgress {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of per-item errors seen so far.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn conflicts(&self) -> usize {
        self.conflicts.load(Ordering::SeqCst)
    }

    fn close(&self, key: &StreamKey) {
        if let Some(pb) = self.bars.lock().unwrap().remove(key) {
            pb.finish_and_clear();
        }
    }

    fn on_conflict_check(&self, event: &CommitEvent) {
        let mut spinner = self.conflict_check.lock().unwrap();
        match event {
            CommitEvent::ConflictCheckStart => {
                *spinner = Some(create_spinner("Checking for file conflicts".into()));
            }
            CommitEvent::ConflictCheckProgress {
                percent,
            } => {
                if let Some(pb) = spinner.as_ref() {
                    pb.set_message(format!("Checking for file conflicts {percent}"));
                }
            }
            CommitEvent::ConflictCheckResult {
                conflicts,
            } => {
                if let Some(pb) = spinner.take() {
                    pb.finish_and_clear();
                }
                if conflicts.is_empty() {
                    debug!("no file conflicts");
                }
                for conflict in conflicts {
                    warn!(
                        "{} File conflict: {}",
                        icon_or(Icons::WARNING, "!"),
                        Colored(Yellow, conflict)
                    );
                }
                self.conflicts.fetch_add(conflicts.len(), Ordering::SeqCst);
            }
            _ => {}
        }
    }

    fn on_commit_event(&self, event: &CommitEvent) {
        let (Some(operation), Some(resolvable)) = (event.operation(), event.resolvable()) else {
            self.on_conflict_check(event);
            return;
        };
        let key = (resolvable.clone(), operation);

        match event.kind() {
            kind if kind.is_start() => {
                let pb = create_bar(operation, resolvable);
                if let Some(old) = self.bars.lock().unwrap().insert(key, pb) {
                    old.finish_and_clear();
                }
            }
            CommitEventKind::DownloadProgress
            | CommitEventKind::InstallProgress
            | CommitEventKind::RemoveProgress => {
                if let (Some(pb), Some(percent)) =
                    (self.bars.lock().unwrap().get(&key), event.percent())
                {
                    pb.set_position(percent.value() as u64);
                }
            }
            CommitEventKind::DownloadCached => {
                self.close(&key);
                info!(
                    "{} {} (cached)",
                    Colored(Green, icon_or(Icons::SKIPPED, "-")),
                    resolvable
                );
            }
            CommitEventKind::DownloadEnd
            | CommitEventKind::InstallEnd
            | CommitEventKind::RemoveEnd => {
                self.close(&key);
                info!(
                    "{} {} {}",
                    Colored(Green, icon_or(Icons::CHECK, "OK")),
                    finished_verb(operation),
                    resolvable
                );
            }
            CommitEventKind::DownloadError
            | CommitEventKind::InstallError
            | CommitEventKind::RemoveError => {
                self.close(&key);
                self.failures.fetch_add(1, Ordering::SeqCst);
                error!(
                    "Failed to {} {}: {}",
                    operation,
                    resolvable,
                    event.message().unwrap_or_default()
                );
            }
            _ => {}
        }
    }
}

impl EventSink for CommitProgress {
    fn emit(&self, event: &Event) {
        if let Some(event) = event.as_commit() {
            self.on_commit_event(event);
        }
    }
}

impl Drop for CommitProgress {
    fn drop(&mut self) {
        for (_, pb) in self.bars.lock().unwrap().drain() {
            pb.finish_and_clear();
        }
    }
}

/// Shows a spinner while each repository is refreshed.
#[derive(Default)]
pub struct RepoProgress {
    spinners: Mutex<HashMap<String, ProgressBar>>,
}

impl RepoProgress {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn finish(&self, alias: &str) {
        if let Some(pb) = self.spinners.lock().unwrap().remove(alias) {
            pb.finish_and_clear();
        }
    }
}

impl EventSink for RepoProgress {
    fn emit(&self, event: &Event) {
        let Some(event) = event.as_repo() else {
            return;
        };
        let repo = event.repo();

        match event {
            RepoEvent::RefreshStart {
                ..
            } => {
                let pb = create_spinner(format!("Refreshing {}", Colored(Cyan, repo)));
                self.spinners.lock().unwrap().insert(repo.alias.clone(), pb);
            }
            RepoEvent::RefreshDone {
                ..
            } => {
                self.finish(&repo.alias);
                info!(
                    "{} Refreshed {}",
                    Colored(Green, icon_or(Icons::CHECK, "OK")),
                    Colored(Cyan, repo)
                );
            }
            RepoEvent::RefreshError {
                ..
            } => self.finish(&repo.alias),
            RepoEvent::Found {
                ..
            }
            | RepoEvent::RefreshSkipped {
                ..
            }
            | RepoEvent::LoadError {
                ..
            } => {}
        }
    }
}

impl Drop for RepoProgress {
    fn drop(&mut self) {
        for (_, pb) in self.spinners.lock().unwrap().drain() {
            pb.finish_and_clear();
        }
    }
}
