//! Turns raw backend callbacks into a well-formed event stream.
//!
//! Backends are not always tidy: they may report progress for an item they
//! never announced, repeat a start, send percentages outside `0..=100` or
//! going backwards, or keep talking about an item after finishing it. The
//! adapter normalises all of that so every subscriber sees, per resolvable
//! and operation, `Start`, any number of non-decreasing `Progress`, then one
//! `End` or `Error`.

use std::{collections::HashMap, sync::Arc};

use hearth_events::{CommitEvent, CommitEventRelay, Operation, Percent, ResolvableRef};
use tracing::{debug, trace};

use crate::backend::{BackendResolvable, CallbackAction, CommitCallbacks};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Started { last: Percent },
    Finished,
}

/// [`CommitCallbacks`] implementation feeding a [`CommitEventRelay`] for one
/// transaction.
pub struct CommitCallbackAdapter {
    relay: Arc<CommitEventRelay>,
    streams: HashMap<(ResolvableRef, Operation), Stream>,
    conflict_last: Percent,
    aborted: bool,
    skipped: usize,
}

impl CommitCallbackAdapter {
    pub fn new(relay: Arc<CommitEventRelay>) -> Self {
        Self {
            relay,
            streams: HashMap::new(),
            conflict_last: Percent::ZERO,
            aborted: false,
            skipped: 0,
        }
    }

    /// Whether the backend was told to abort at least once.
    pub fn aborted(&self) -> bool {
        self.aborted
    }

    /// Starts suppressed because of an abort request.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Streams that saw a Start but no End or Error yet.
    pub fn open_streams(&self) -> usize {
        self.streams
            .values()
            .filter(|stream| matches!(stream, Stream::Started { .. }))
            .count()
    }

    /// Closes every stream the backend left open with an Error carrying
    /// `reason`. Returns how many were closed.
    pub fn finish_open_streams(&mut self, reason: &str) -> usize {
        let open: Vec<_> = self
            .streams
            .iter()
            .filter(|(_, stream)| matches!(stream, Stream::Started { .. }))
            .map(|(key, _)| key.clone())
            .collect();

        for (resolvable, op) in &open {
            self.streams
                .insert((resolvable.clone(), *op), Stream::Finished);
            self.relay.dispatch_commit(CommitEvent::error(
                *op,
                resolvable.clone(),
                reason.to_string(),
            ));
        }
        open.len()
    }

    fn action(&mut self) -> CallbackAction {
        if self.relay.abort_requested() {
            if !self.aborted {
                debug!("signalling abort to backend");
            }
            self.aborted = true;
            CallbackAction::Abort
        } else {
            CallbackAction::Continue
        }
    }

    /// Makes sure a stream is open, synthesising its Start if needed.
    /// Returns `false` if events for it must be dropped.
    fn ensure_started(&mut self, op: Operation, resolvable: &ResolvableRef) -> bool {
        let key = (resolvable.clone(), op);
        match self.streams.get(&key) {
            Some(Stream::Started { .. }) => true,
            Some(Stream::Finished) => {
                trace!(%resolvable, %op, "dropping event for finished stream");
                false
            }
            None if self.relay.abort_requested() => {
                trace!(%resolvable, %op, "abort requested; not starting");
                false
            }
            None => {
                self.streams.insert(
                    key,
                    Stream::Started {
                        last: Percent::ZERO,
                    },
                );
                self.relay
                    .dispatch_commit(CommitEvent::start(op, resolvable.clone()));
                true
            }
        }
    }

    /// `Continue` means the item has begun; `Abort` means it must be skipped.
    fn start(&mut self, op: Operation, item: &BackendResolvable) -> CallbackAction {
        let resolvable = item.to_ref();
        if self.streams.contains_key(&(resolvable.clone(), op)) {
            trace!(%resolvable, %op, "dropping repeated start");
            return self.action();
        }
        if self.ensure_started(op, &resolvable) {
            CallbackAction::Continue
        } else {
            self.skipped += 1;
            self.action()
        }
    }

    fn progress(&mut self, op: Operation, item: &BackendResolvable, raw: i64) -> CallbackAction {
        let resolvable = item.to_ref();
        if self.ensure_started(op, &resolvable) {
            let key = (resolvable.clone(), op);
            if let Some(Stream::Started { last }) = self.streams.get_mut(&key) {
                let percent = Percent::clamped(raw).max(*last);
                *last = percent;
                self.relay
                    .dispatch_commit(CommitEvent::progress(op, resolvable, percent));
            }
        }
        self.action()
    }

    fn finish(
        &mut self,
        op: Operation,
        item: &BackendResolvable,
        error: Option<&str>,
    ) -> CallbackAction {
        let resolvable = item.to_ref();
        if self.ensure_started(op, &resolvable) {
            self.streams
                .insert((resolvable.clone(), op), Stream::Finished);
            let event = match error {
                Some(message) => CommitEvent::error(op, resolvable, message.to_string()),
                None => CommitEvent::end(op, resolvable),
            };
            self.relay.dispatch_commit(event);
        }
        self.action()
    }
}

impl CommitCallbacks for CommitCallbackAdapter {
    fn download_start(&mut self, item: &BackendResolvable) -> CallbackAction {
        self.start(Operation::Download, item)
    }

    fn download_progress(&mut self, item: &BackendResolvable, percent: i64) -> CallbackAction {
        self.progress(Operation::Download, item, percent)
    }

    fn download_end(&mut self, item: &BackendResolvable) -> CallbackAction {
        self.finish(Operation::Download, item, None)
    }

    fn download_cached(&mut self, item: &BackendResolvable) -> CallbackAction {
        let resolvable = item.to_ref();
        let key = (resolvable.clone(), Operation::Download);
        if self.streams.contains_key(&key) {
            trace!(%resolvable, "dropping cached notice for started download");
        } else if !self.relay.abort_requested() {
            self.streams.insert(key, Stream::Finished);
            self.relay
                .dispatch_commit(CommitEvent::DownloadCached { resolvable });
            return CallbackAction::Continue;
        } else {
            self.skipped += 1;
        }
        self.action()
    }

    fn download_error(&mut self, item: &BackendResolvable, message: &str) -> CallbackAction {
        self.finish(Operation::Download, item, Some(message))
    }

    fn install_start(&mut self, item: &BackendResolvable) -> CallbackAction {
        self.start(Operation::Install, item)
    }

    fn install_progress(&mut self, item: &BackendResolvable, percent: i64) -> CallbackAction {
        self.progress(Operation::Install, item, percent)
    }

    fn install_end(&mut self, item: &BackendResolvable) -> CallbackAction {
        self.finish(Operation::Install, item, None)
    }

    fn install_error(&mut self, item: &BackendResolvable, message: &str) -> CallbackAction {
        self.finish(Operation::Install, item, Some(message))
    }

    fn remove_start(&mut self, item: &BackendResolvable) -> CallbackAction {
        self.start(Operation::Remove, item)
    }

    fn remove_progress(&mut self, item: &BackendResolvable, percent: i64) -> CallbackAction {
        self.progress(Operation::Remove, item, percent)
    }

    fn remove_end(&mut self, item: &BackendResolvable) -> CallbackAction {
        self.finish(Operation::Remove, item, None)
    }

    fn remove_error(&mut self, item: &BackendResolvable, message: &str) -> CallbackAction {
        self.finish(Operation::Remove, item, Some(message))
    }

    fn conflict_check_start(&mut self) -> CallbackAction {
        self.conflict_last = Percent::ZERO;
        self.relay.dispatch_commit(CommitEvent::ConflictCheckStart);
        self.action()
    }

    fn conflict_check_progress(&mut self, percent: i64) -> CallbackAction {
        let percent = Percent::clamped(percent).max(self.conflict_last);
        self.conflict_last = percent;
        self.relay
            .dispatch_commit(CommitEvent::ConflictCheckProgress { percent });
        self.action()
    }

    fn conflict_check_result(&mut self, conflicts: &[String]) -> CallbackAction {
        self.relay.dispatch_commit(CommitEvent::ConflictCheckResult {
            conflicts: conflicts.to_vec(),
        });
        self.action()
    }
}

#[cfg(test)]
mod tests {
    use hearth_events::{CollectorSink, CommitEventKind};

    use super::*;

    fn setup() -> (CommitCallbackAdapter, Arc<CollectorSink>, Arc<CommitEventRelay>) {
        let relay = CommitEventRelay::new();
        let sink = Arc::new(CollectorSink::default());
        relay.subscribe(sink.clone());
        (CommitCallbackAdapter::new(relay.clone()), sink, relay)
    }

    fn item(name: &str) -> BackendResolvable {
        BackendResolvable::new(name, "1.0", "x86_64")
    }

    fn kinds(sink: &CollectorSink) -> Vec<CommitEventKind> {
        sink.commit_events().iter().map(CommitEvent::kind).collect()
    }

    fn percents(sink: &CollectorSink) -> Vec<u8> {
        sink.commit_events()
            .iter()
            .filter_map(CommitEvent::percent)
            .map(Percent::value)
            .collect()
    }

    #[test]
    fn test_well_formed_stream_passes_through() {
        let (mut adapter, sink, _) = setup();
        let vim = item("vim");

        adapter.install_start(&vim);
        adapter.install_progress(&vim, 30);
        adapter.install_progress(&vim, 70);
        adapter.install_end(&vim);

        assert_eq!(
            kinds(&sink),
            vec![
                CommitEventKind::InstallStart,
                CommitEventKind::InstallProgress,
                CommitEventKind::InstallProgress,
                CommitEventKind::InstallEnd,
            ]
        );
        assert_eq!(adapter.open_streams(), 0);
    }

    #[test]
    fn test_missing_start_is_synthesised() {
        let (mut adapter, sink, _) = setup();
        let vim = item("vim");

        adapter.download_progress(&vim, 10);
        adapter.download_end(&vim);

        assert_eq!(
            kinds(&sink),
            vec![
                CommitEventKind::DownloadStart,
                CommitEventKind::DownloadProgress,
                CommitEventKind::DownloadEnd,
            ]
        );
    }

    #[test]
    fn test_error_without_start() {
        let (mut adapter, sink, _) = setup();
        adapter.remove_error(&item("vim"), "not installed");

        assert_eq!(
            kinds(&sink),
            vec![CommitEventKind::RemoveStart, CommitEventKind::RemoveError]
        );
        assert_eq!(sink.commit_events()[1].message(), Some("not installed"));
    }

    #[test]
    fn test_duplicate_start_dropped() {
        let (mut adapter, sink, _) = setup();
        let vim = item("vim");

        adapter.install_start(&vim);
        adapter.install_start(&vim);
        adapter.install_end(&vim);
        adapter.install_start(&vim);

        assert_eq!(
            kinds(&sink),
            vec![CommitEventKind::InstallStart, CommitEventKind::InstallEnd]
        );
    }

    #[test]
    fn test_events_after_finish_dropped() {
        let (mut adapter, sink, _) = setup();
        let vim = item("vim");

        adapter.install_start(&vim);
        adapter.install_error(&vim, "broken");
        adapter.install_progress(&vim, 50);
        adapter.install_end(&vim);
        adapter.install_error(&vim, "again");

        assert_eq!(
            kinds(&sink),
            vec![CommitEventKind::InstallStart, CommitEventKind::InstallError]
        );
    }

    #[test]
    fn test_malformed_percent_normalised() {
        let (mut adapter, sink, _) = setup();
        let vim = item("vim");

        adapter.download_start(&vim);
        for raw in [-20, 40, 30, 250, 90] {
            adapter.download_progress(&vim, raw);
        }

        assert_eq!(percents(&sink), vec![0, 40, 40, 100, 100]);
    }

    #[test]
    fn test_conflict_check_percent_monotonic() {
        let (mut adapter, sink, _) = setup();

        adapter.conflict_check_start();
        adapter.conflict_check_progress(60);
        adapter.conflict_check_progress(20);
        adapter.conflict_check_result(&["/etc/motd".to_string()]);

        assert_eq!(percents(&sink), vec![60, 60]);
        assert_eq!(
            sink.commit_events().last().and_then(CommitEvent::conflicts).map(<[String]>::len),
            Some(1)
        );
    }

    #[test]
    fn test_operations_tracked_separately() {
        let (mut adapter, sink, _) = setup();
        let vim = item("vim");
        let emacs = item("emacs");

        adapter.download_start(&vim);
        adapter.download_end(&vim);
        adapter.install_start(&vim);
        adapter.download_start(&emacs);
        adapter.install_end(&vim);
        adapter.download_end(&emacs);

        assert_eq!(sink.len(), 6);
    }

    #[test]
    fn test_cached_download() {
        let (mut adapter, sink, _) = setup();
        let vim = item("vim");
        let emacs = item("emacs");

        adapter.download_cached(&vim);
        adapter.download_start(&vim);
        adapter.download_start(&emacs);
        adapter.download_cached(&emacs);

        assert_eq!(
            kinds(&sink),
            vec![CommitEventKind::DownloadCached, CommitEventKind::DownloadStart]
        );
    }

    #[test]
    fn test_abort_suppresses_new_starts() {
        let (mut adapter, sink, relay) = setup();
        let a = item("a");
        let b = item("b");

        assert_eq!(adapter.install_start(&a), CallbackAction::Continue);
        relay.request_abort();

        assert_eq!(adapter.install_progress(&a, 80), CallbackAction::Abort);
        assert_eq!(adapter.install_end(&a), CallbackAction::Abort);
        assert_eq!(adapter.install_start(&b), CallbackAction::Abort);
        adapter.install_progress(&b, 10);
        adapter.download_cached(&b);

        assert!(adapter.aborted());
        assert!(adapter.skipped() > 0);
        assert_eq!(
            kinds(&sink),
            vec![
                CommitEventKind::InstallStart,
                CommitEventKind::InstallProgress,
                CommitEventKind::InstallEnd,
            ]
        );
    }

    #[test]
    fn test_abort_after_last_item_skips_nothing() {
        let (mut adapter, _, relay) = setup();
        let a = item("a");

        adapter.install_start(&a);
        relay.request_abort();
        adapter.install_end(&a);

        assert!(adapter.aborted());
        assert_eq!(adapter.skipped(), 0);
    }

    #[test]
    fn test_open_streams_are_closed_with_error() {
        let (mut adapter, sink, _) = setup();
        let vim = item("vim");
        let zsh = item("zsh");

        adapter.install_start(&vim);
        adapter.install_progress(&vim, 40);
        adapter.download_start(&zsh);
        adapter.download_end(&zsh);

        assert_eq!(adapter.finish_open_streams("backend stopped"), 1);
        assert_eq!(adapter.open_streams(), 0);

        let last = sink.commit_events().pop().unwrap();
        assert_eq!(last.kind(), CommitEventKind::InstallError);
        assert_eq!(last.message(), Some("backend stopped"));

        // Closed streams stay closed.
        adapter.install_end(&vim);
        assert_eq!(adapter.finish_open_streams("again"), 0);
        assert_eq!(sink.len(), 5);
    }

    #[test]
    fn test_unknown_kind_passes_as_unknown() {
        let (mut adapter, sink, _) = setup();
        let mut odd = item("odd");
        odd.kind = "mystery".into();

        adapter.install_start(&odd);

        let events = sink.commit_events();
        assert_eq!(
            events[0].resolvable().map(|r| r.kind),
            Some(hearth_events::ResolvableKind::Unknown)
        );
    }
}
