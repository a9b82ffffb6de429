pub mod base;
pub mod bus;
pub mod sse;

pub use base::{DeleteEvent, EventFlags, EventKind};
pub use bus::{DeleteEventBus, EventHandler, RemoteSink, SubscriberFilter};
pub use sse::SseStream;
