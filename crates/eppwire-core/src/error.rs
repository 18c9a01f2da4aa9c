//! Connection error types.

use std::{fmt, io, time::Duration};

use eppwire_proto::ProtocolError;
use thiserror::Error;

/// Which part of a frame a read was working on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePart {
    /// The 4-byte length prefix
    Header,
    /// The body announced by the header
    Body,
}

impl fmt::Display for FramePart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Header => f.write_str("header"),
            Self::Body => f.write_str("body"),
        }
    }
}

/// Transfer direction of a length mismatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Bytes received from the server
    Read,
    /// Bytes sent to the server
    Write,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("read"),
            Self::Write => f.write_str("write"),
        }
    }
}

/// Errors returned by [`crate::Connection`] operations.
///
/// Raw I/O errors from the stream are always wrapped in one of these
/// variants, never returned bare.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Configuration rejected before any I/O
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Transport could not establish the stream (DNS, refused, TLS handshake)
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        /// Endpoint that was dialed
        endpoint: String,
        /// Underlying transport error
        #[source]
        source: io::Error,
    },

    /// First frame after connecting failed greeting validation
    #[error("server greeting rejected ({len} bytes)")]
    GreetingRejected {
        /// Greeting body length
        len: usize,
    },

    /// Operation requires an open connection
    #[error("connection is not open")]
    NotOpen,

    /// `open()` called while a live stream is held
    #[error("connection is already open")]
    AlreadyOpen,

    /// Deadline passed before the frame part was complete
    #[error("timed out after {elapsed:?} reading frame {part}: {received} of {expected} bytes")]
    Timeout {
        /// Frame part being read
        part: FramePart,
        /// Bytes required
        expected: usize,
        /// Bytes obtained before the deadline
        received: usize,
        /// Time spent in the frame read
        elapsed: Duration,
    },

    /// Peer closed the stream mid-frame
    #[error("peer closed the stream while reading frame {part}: {received} of {expected} bytes")]
    PeerClosed {
        /// Frame part being read
        part: FramePart,
        /// Bytes required
        expected: usize,
        /// Bytes obtained before end-of-stream
        received: usize,
    },

    /// Bytes transferred differ from the framed length
    #[error("{direction} length mismatch: expected {expected} bytes, transferred {actual}")]
    LengthMismatch {
        /// Transfer direction
        direction: Direction,
        /// Declared (read) or computed (write) length
        expected: usize,
        /// Bytes actually transferred
        actual: usize,
    },

    /// Malformed or oversized frame header
    #[error("framing error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Stream fault during a read or write attempt
    #[error("{operation} failed: {source}")]
    Io {
        /// Stream operation that failed
        operation: &'static str,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Releasing the stream failed; the connection is closed regardless
    #[error("failed to close stream: {0}")]
    Close(#[source] io::Error),
}

impl ConnectionError {
    pub(crate) fn io(operation: &'static str, source: io::Error) -> Self {
        Self::Io { operation, source }
    }
}
