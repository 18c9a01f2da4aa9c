//! Structured connection events.
//!
//! The connection reports what it does through an [`EventSink`] instead of
//! logging directly. [`TracingSink`] is the default and forwards to `tracing`;
//! tests install a recording sink to assert on the sequence.

use std::time::Duration;

use tracing::Level;

use crate::{config::Endpoint, error::FramePart};

/// Something observable happened on a connection.
#[derive(Debug, Clone, Copy)]
pub enum ConnectionEvent<'a> {
    /// Stream established, greeting not yet read
    Connected {
        /// Dialed endpoint
        endpoint: &'a Endpoint,
        /// Connect duration
        elapsed: Duration,
    },

    /// Greeting passed validation; connection is open
    GreetingAccepted {
        /// Greeting body length
        len: usize,
    },

    /// One read attempt inside the retry loop
    ReadAttempt {
        /// Frame part being read
        part: FramePart,
        /// 1-based attempt index
        attempt: u32,
        /// Bytes requested by this attempt
        requested: usize,
        /// Bytes this attempt returned
        received: usize,
        /// Time since the frame read began
        elapsed: Duration,
    },

    /// Complete frame body read
    FrameReceived {
        /// Frame body
        body: &'a [u8],
        /// Time spent reading the frame
        elapsed: Duration,
    },

    /// Payload about to be framed and written
    FrameSending {
        /// Frame body
        payload: &'a [u8],
    },

    /// One write attempt inside the retry loop
    WriteAttempt {
        /// 1-based attempt index
        attempt: u32,
        /// Bytes offered to the stream
        requested: usize,
        /// Bytes the stream accepted
        written: usize,
        /// Time since the frame write began
        elapsed: Duration,
    },

    /// Stream dropped after a fault
    StreamDiscarded {
        /// Why the stream was dropped
        reason: &'a str,
    },

    /// Connection closed by the caller
    Closed {
        /// Endpoint the stream was connected to
        endpoint: &'a Endpoint,
    },
}

impl ConnectionEvent<'_> {
    /// Severity of the event.
    pub fn level(&self) -> Level {
        match self {
            Self::Connected { .. }
            | Self::GreetingAccepted { .. }
            | Self::FrameReceived { .. }
            | Self::FrameSending { .. }
            | Self::Closed { .. } => Level::INFO,
            Self::ReadAttempt { .. } | Self::WriteAttempt { .. } | Self::StreamDiscarded { .. } => {
                Level::DEBUG
            },
        }
    }

    /// Short stable name, for matching in tests and filters.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::GreetingAccepted { .. } => "greeting_accepted",
            Self::ReadAttempt { .. } => "read_attempt",
            Self::FrameReceived { .. } => "frame_received",
            Self::FrameSending { .. } => "frame_sending",
            Self::WriteAttempt { .. } => "write_attempt",
            Self::StreamDiscarded { .. } => "stream_discarded",
            Self::Closed { .. } => "closed",
        }
    }
}

/// Receives connection events.
pub trait EventSink {
    /// Record one event. Must not block.
    fn record(&self, event: &ConnectionEvent<'_>);
}

/// Forwards events to `tracing` under the `eppwire` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: &ConnectionEvent<'_>) {
        match *event {
            ConnectionEvent::Connected { endpoint, elapsed } => {
                tracing::info!(
                    target: "eppwire",
                    endpoint = %endpoint,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "connected"
                );
            },
            ConnectionEvent::GreetingAccepted { len } => {
                tracing::info!(target: "eppwire", len, "greeting accepted");
            },
            ConnectionEvent::ReadAttempt { part, attempt, requested, received, elapsed } => {
                tracing::debug!(
                    target: "eppwire",
                    part = %part,
                    attempt,
                    requested,
                    received,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "read attempt"
                );
            },
            ConnectionEvent::FrameReceived { body, elapsed } => {
                tracing::info!(
                    target: "eppwire",
                    len = body.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    body = %String::from_utf8_lossy(body),
                    "frame received"
                );
            },
            ConnectionEvent::FrameSending { payload } => {
                tracing::info!(
                    target: "eppwire",
                    len = payload.len(),
                    payload = %String::from_utf8_lossy(payload),
                    "frame sending"
                );
            },
            ConnectionEvent::WriteAttempt { attempt, requested, written, elapsed } => {
                tracing::debug!(
                    target: "eppwire",
                    attempt,
                    requested,
                    written,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "write attempt"
                );
            },
            ConnectionEvent::StreamDiscarded { reason } => {
                tracing::debug!(target: "eppwire", reason, "stream discarded");
            },
            ConnectionEvent::Closed { endpoint } => {
                tracing::info!(target: "eppwire", endpoint = %endpoint, "closed");
            },
        }
    }
}
