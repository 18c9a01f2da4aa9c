//! Event capture.

use std::sync::{Arc, Mutex, PoisonError};

use eppwire_core::{ConnectionEvent, EventSink};
use tracing::Level;

/// Owned summary of one [`ConnectionEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    /// Event name, see [`ConnectionEvent::name`]
    pub name: &'static str,
    /// Event level
    pub level: Level,
    /// Payload for frame events
    pub payload: Option<Vec<u8>>,
    /// Bytes moved by a read or write attempt
    pub transferred: Option<usize>,
    /// Attempt index for read or write attempts
    pub attempt: Option<u32>,
}

/// Sink that keeps every event. Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl RecordingSink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded events.
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Names of recorded events, in order.
    pub fn names(&self) -> Vec<&'static str> {
        self.events().into_iter().map(|e| e.name).collect()
    }

    /// Number of events named `name`.
    pub fn count(&self, name: &str) -> usize {
        self.events().iter().filter(|e| e.name == name).count()
    }
}

impl EventSink for RecordingSink {
    fn record(&self, event: &ConnectionEvent<'_>) {
        let (payload, transferred, attempt) = match *event {
            ConnectionEvent::FrameReceived { body, .. } => (Some(body.to_vec()), None, None),
            ConnectionEvent::FrameSending { payload } => (Some(payload.to_vec()), None, None),
            ConnectionEvent::ReadAttempt { received, attempt, .. } => {
                (None, Some(received), Some(attempt))
            },
            ConnectionEvent::WriteAttempt { written, attempt, .. } => {
                (None, Some(written), Some(attempt))
            },
            _ => (None, None, None),
        };

        let recorded = RecordedEvent {
            name: event.name(),
            level: event.level(),
            payload,
            transferred,
            attempt,
        };
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(recorded);
    }
}
