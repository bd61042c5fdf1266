use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, RwLock,
};

use tracing::{debug, trace};

use crate::{CommitEvent, Event, EventSink, EventSinkHandle};

/// Identifies one registration on a [`CommitEventRelay`].
pub type SubscriberId = u64;

/// Reverse channel handed to subscribers. It can only raise the abort flag;
/// clearing it is reserved for the relay.
#[derive(Clone, Debug)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn request_abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn abort_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Returned from [`CommitEventRelay::subscribe`].
#[derive(Clone, Debug)]
pub struct Subscription {
    pub id: SubscriberId,
    pub abort: AbortHandle,
}

/// Fans backend progress out to every attached observer.
///
/// Delivery is synchronous and in call order: `dispatch` returns only after
/// every observer has handled the event. There is no queue.
pub struct CommitEventRelay {
    subscribers: RwLock<Vec<(SubscriberId, EventSinkHandle)>>,
    next_id: AtomicU64,
    abort: Arc<AtomicBool>,
}

impl CommitEventRelay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            abort: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn subscribe(&self, observer: EventSinkHandle) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, observer));
        debug!(subscriber = id, "observer attached to commit relay");

        Subscription {
            id,
            abort: self.abort_handle(),
        }
    }

    /// Detaches a subscriber. Returns `false` if `id` was not registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner());
        let before = subscribers.len();
        subscribers.retain(|(sub_id, _)| *sub_id != id);
        let removed = subscribers.len() != before;
        if removed {
            debug!(subscriber = id, "observer detached from commit relay");
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Delivers `event` to every current observer.
    ///
    /// The observer list is snapshotted first, so handlers may subscribe or
    /// unsubscribe; the change applies from the next event on.
    pub fn dispatch(&self, event: &Event) {
        let snapshot: Vec<EventSinkHandle> = self
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, sink)| Arc::clone(sink))
            .collect();

        trace!(observers = snapshot.len(), ?event, "dispatching");
        for sink in snapshot {
            sink.emit(event);
        }
    }

    pub fn dispatch_commit(&self, event: CommitEvent) {
        self.dispatch(&Event::Commit(event));
    }

    pub fn request_abort(&self) {
        if !self.abort.swap(true, Ordering::SeqCst) {
            debug!("commit abort requested");
        }
    }

    pub fn abort_requested(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            flag: Arc::clone(&self.abort),
        }
    }

    /// Clears the abort flag for a new transaction. Subscriptions stay.
    pub fn reset(&self) {
        self.abort.store(false, Ordering::SeqCst);
    }
}

impl EventSink for CommitEventRelay {
    fn emit(&self, event: &Event) {
        self.dispatch(event);
    }
}
