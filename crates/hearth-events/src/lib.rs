mod event;
mod relay;
mod sink;

use std::sync::Arc;

pub use event::*;
pub use relay::*;
pub use sink::*;

/// Shared handle to an event sink.
pub type EventSinkHandle = Arc<dyn EventSink>;
