use std::sync::{
    mpsc::{self, Receiver, Sender},
    Mutex,
};

use crate::Event;

/// Consumer of hearth events.
///
/// `emit` is called synchronously on the thread driving the backend; a slow
/// implementation slows the backend down with it.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &Event);
}

/// Forwards events into an mpsc channel so another thread can render them.
pub struct ChannelSink {
    sender: Sender<Event>,
}

impl ChannelSink {
    pub fn new() -> (Self, Receiver<Event>) {
        let (sender, receiver) = mpsc::channel();
        (
            Self {
                sender,
            },
            receiver,
        )
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &Event) {
        let _ = self.sender.send(event.clone());
    }
}

/// Drops everything.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &Event) {}
}

/// Keeps every event for later inspection.
#[derive(Default)]
pub struct CollectorSink {
    events: Mutex<Vec<Event>>,
}

impl CollectorSink {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn commit_events(&self) -> Vec<crate::CommitEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(Event::as_commit)
            .cloned()
            .collect()
    }

    pub fn repo_events(&self) -> Vec<crate::RepoEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(Event::as_repo)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl EventSink for CollectorSink {
    fn emit(&self, event: &Event) {
        self.events.lock().unwrap().push(event.clone());
    }
}
