//! Destinations for lifecycle events.

use parking_lot::Mutex;
use tracing::{debug, info, Level};

use super::WorkflowEvent;

/// Receives lifecycle events from the runner and coordinator.
///
/// Publishing happens inline on the executing task and must not fail or
/// block for long; a sink that forwards elsewhere should queue and drop.
pub trait EventSink: Send + Sync {
    /// Handles one event.
    fn publish(&self, event: &WorkflowEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn publish(&self, _event: &WorkflowEvent) {}
}

/// Writes each event as a tracing line.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Logs at `level`; anything other than `DEBUG` logs at `INFO`.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Logs at `DEBUG`.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

impl EventSink for LoggingEventSink {
    fn publish(&self, event: &WorkflowEvent) {
        let payload = serde_json::to_string(event).unwrap_or_default();
        if self.level == Level::DEBUG {
            debug!(event = event.name(), run_id = %event.run_id(), %payload, "workflow event");
        } else {
            info!(event = event.name(), run_id = %event.run_id(), %payload, "workflow event");
        }
    }
}

/// Keeps every event in memory, in publication order.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: Mutex<Vec<WorkflowEvent>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event received so far.
    #[must_use]
    pub fn events(&self) -> Vec<WorkflowEvent> {
        self.events.lock().clone()
    }

    /// Events whose dotted name starts with `prefix` (`"unit."`, `"run.finished"`).
    #[must_use]
    pub fn named(&self, prefix: &str) -> Vec<WorkflowEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.name().starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Completion reported by each `unit.finished` event.
    #[must_use]
    pub fn completions(&self) -> Vec<f64> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                WorkflowEvent::UnitFinished { completion, .. } => Some(*completion),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for CollectingEventSink {
    fn publish(&self, event: &WorkflowEvent) {
        self.events.lock().push(event.clone());
    }
}
