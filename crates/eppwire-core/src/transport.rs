//! Transport abstraction for a single EPP byte stream.
//!
//! The connection core is written against these two traits so the same
//! framing and retry code runs over real sockets (`socket` module, feature
//! `transport`) and over scripted streams in tests.
//!
//! # Stream contract
//!
//! - `read_some` returns however many bytes are available, up to `buf.len()`.
//!   `Ok(0)` means "nothing this attempt", not end-of-stream. End-of-stream is
//!   reported through [`Stream::is_at_eof`].
//! - `write_some` may accept fewer bytes than offered. `Ok(0)` means the
//!   stream could not take anything this attempt.
//! - Any `Err` is a fault that invalidates the stream.

use std::{io, time::Duration};

use crate::config::{Endpoint, TransportOptions};

/// Factory for connected streams.
pub trait Transport {
    /// Stream produced by this transport.
    type Stream: Stream;

    /// Establish a stream to `endpoint`.
    ///
    /// Must not block longer than roughly `timeout`. TLS handshakes, when the
    /// endpoint asks for TLS, complete before this returns.
    fn connect(
        &self,
        endpoint: &Endpoint,
        options: &TransportOptions,
        timeout: Duration,
    ) -> io::Result<Self::Stream>;
}

/// Connected bidirectional byte stream.
pub trait Stream {
    /// Read up to `buf.len()` bytes.
    fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write a prefix of `buf`, returning how many bytes were accepted.
    fn write_some(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Push buffered bytes to the peer.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Bound how long a single `read_some` may block.
    ///
    /// Streams that cannot block ignore this.
    fn set_read_timeout(&mut self, _timeout: Option<Duration>) -> io::Result<()> {
        Ok(())
    }

    /// `true` once the peer has closed its side.
    fn is_at_eof(&self) -> bool;

    /// Release the stream.
    fn close(&mut self) -> io::Result<()>;
}
