//! Event sinks for run observability.
//!
//! The phase runner and coordinator publish advisory lifecycle events
//! (`run.*`, `phase.*`, `unit.*`). Events are not part of the correctness
//! contract; the progress store and decision log are.

mod event;
mod sink;

pub use event::WorkflowEvent;
pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
