//! # Event Surface
//!
//! Diagnostics emitted by the engine and by running transforms.
//!
//! The engine never logs directly: it hands `Event`s to an `EventSink`.
//! `TracingSink` forwards them to `tracing`, `CollectingSink` buffers them
//! for callers that want a structured list.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Severity of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// A single diagnostic notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub level: EventLevel,
    /// Emitting transform title, if the event came from a job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub message: String,
}

impl Event {
    #[must_use]
    pub fn new(level: EventLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            source: None,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn debug(message: impl Into<String>) -> Self {
        Self::new(EventLevel::Debug, message)
    }

    #[must_use]
    pub fn info(message: impl Into<String>) -> Self {
        Self::new(EventLevel::Info, message)
    }

    #[must_use]
    pub fn warn(message: impl Into<String>) -> Self {
        Self::new(EventLevel::Warn, message)
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(EventLevel::Error, message)
    }

    /// Attach the emitting transform.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Receiver of engine events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &Event);
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &Event) {
        let source = event.source.as_deref().unwrap_or("engine");
        match event.level {
            EventLevel::Debug => tracing::debug!(source, "{}", event.message),
            EventLevel::Info => tracing::info!(source, "{}", event.message),
            EventLevel::Warn => tracing::warn!(source, "{}", event.message),
            EventLevel::Error => tracing::error!(source, "{}", event.message),
        }
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &Event) {}
}

/// Buffers events in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<Event>>,
}

impl CollectingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the buffered events.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Drain the buffered events.
    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Count buffered events of one level.
    #[must_use]
    pub fn count(&self, level: EventLevel) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|event| event.level == level)
            .count()
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: &Event) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collecting_sink_buffers_and_drains() {
        let sink = CollectingSink::new();
        sink.emit(&Event::info("one"));
        sink.emit(&Event::warn("two").with_source("Job"));

        assert_eq!(sink.count(EventLevel::Warn), 1);
        let drained = sink.take();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[1].source.as_deref(), Some("Job"));
        assert!(sink.events().is_empty());
    }

    #[test]
    fn event_serializes_lowercase_level() {
        let value = serde_json::to_value(Event::error("boom")).expect("serialize");
        assert_eq!(value["level"], "error");
        assert!(value.get("source").is_none());
    }
}
