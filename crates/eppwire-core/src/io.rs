//! Bounded partial-I/O retry loops.
//!
//! TCP and TLS streams routinely hand back fewer bytes than asked for. These
//! loops keep asking for the residual until the full frame part has moved or
//! a wall-clock deadline passes. Between attempts they back off linearly
//! (`attempt * 100ms`), clamped to the time left, so a socket that is still
//! filling is not busy-polled.
//!
//! The loops are deadline-bound, not attempt-bound: a zero-byte attempt is not
//! an error, it only burns time.

use std::time::{Duration, Instant};

use eppwire_proto::{FrameHeader, encode_frame};

use crate::{
    env::Environment,
    error::{ConnectionError, Direction, FramePart},
    event::{ConnectionEvent, EventSink},
    transport::Stream,
};

/// Backoff added per attempt.
pub const BACKOFF_STEP: Duration = Duration::from_millis(100);

/// Wall-clock bound latched when a transfer starts.
///
/// Stored as start plus budget rather than an expiry instant, so any
/// `Duration` is accepted without overflowing `Instant`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    /// Deadline `timeout` after `now`.
    pub fn after(now: Instant, timeout: Duration) -> Self {
        Self { started: now, budget: timeout }
    }

    /// Time left at `now`, or `None` once the deadline has passed.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.budget.checked_sub(self.elapsed(now)).filter(|left| !left.is_zero())
    }

    /// Time since the transfer started.
    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started)
    }
}

/// Fill `buf` completely from `stream`.
///
/// # Errors
///
/// - `Timeout` if the deadline passes first
/// - `PeerClosed` if the stream reports end-of-stream first
/// - `Io` on any stream fault
pub fn read_exactly<S, E, K>(
    stream: &mut S,
    buf: &mut [u8],
    part: FramePart,
    deadline: &Deadline,
    env: &E,
    sink: &K,
) -> Result<(), ConnectionError>
where
    S: Stream + ?Sized,
    E: Environment + ?Sized,
    K: EventSink + ?Sized,
{
    let expected = buf.len();
    let mut filled = 0;
    let mut attempt = 0u32;

    while filled < expected {
        if stream.is_at_eof() {
            return Err(ConnectionError::PeerClosed { part, expected, received: filled });
        }

        let now = env.now();
        let Some(remaining) = deadline.remaining(now) else {
            return Err(ConnectionError::Timeout {
                part,
                expected,
                received: filled,
                elapsed: deadline.elapsed(now),
            });
        };

        stream
            .set_read_timeout(Some(remaining))
            .map_err(|e| ConnectionError::io("set read timeout", e))?;

        let requested = expected - filled;
        let received = stream
            .read_some(&mut buf[filled..])
            .map_err(|e| ConnectionError::io("read", e))?
            .min(requested);
        filled += received;
        attempt += 1;

        sink.record(&ConnectionEvent::ReadAttempt {
            part,
            attempt,
            requested,
            received,
            elapsed: deadline.elapsed(env.now()),
        });

        if filled < expected {
            back_off(attempt, deadline, env);
        }
    }

    Ok(())
}

/// Push all of `bytes` into `stream`, returning how many were accepted.
///
/// Returns early with a short count when the deadline passes; the caller
/// decides whether that is fatal.
///
/// # Errors
///
/// `Io` on any stream fault.
pub fn write_exactly<S, E, K>(
    stream: &mut S,
    bytes: &[u8],
    deadline: &Deadline,
    env: &E,
    sink: &K,
) -> Result<usize, ConnectionError>
where
    S: Stream + ?Sized,
    E: Environment + ?Sized,
    K: EventSink + ?Sized,
{
    let mut written = 0;
    let mut attempt = 0u32;

    while written < bytes.len() {
        if deadline.remaining(env.now()).is_none() {
            break;
        }

        let requested = bytes.len() - written;
        let accepted = stream
            .write_some(&bytes[written..])
            .map_err(|e| ConnectionError::io("write", e))?
            .min(requested);
        written += accepted;
        attempt += 1;

        sink.record(&ConnectionEvent::WriteAttempt {
            attempt,
            requested,
            written: accepted,
            elapsed: deadline.elapsed(env.now()),
        });

        if written < bytes.len() {
            back_off(attempt, deadline, env);
        }
    }

    stream.flush().map_err(|e| ConnectionError::io("flush", e))?;
    Ok(written)
}

/// Read one frame and return its body.
///
/// One deadline covers header and body. A body that stops short of the
/// declared length is reported as a read `LengthMismatch`.
pub fn read_frame<S, E, K>(
    stream: &mut S,
    max_frame_len: u32,
    timeout: Duration,
    env: &E,
    sink: &K,
) -> Result<Vec<u8>, ConnectionError>
where
    S: Stream + ?Sized,
    E: Environment + ?Sized,
    K: EventSink + ?Sized,
{
    let deadline = Deadline::after(env.now(), timeout);

    let mut raw = [0u8; FrameHeader::SIZE];
    read_exactly(stream, &mut raw, FramePart::Header, &deadline, env, sink)?;

    let header = FrameHeader::from_bytes(&raw)?;
    header.check_limit(max_frame_len)?;

    let len = header.body_len();
    let mut body = vec![0u8; len];
    if len > 0 {
        read_exactly(stream, &mut body, FramePart::Body, &deadline, env, sink).map_err(|err| {
            match err {
                ConnectionError::Timeout { expected, received, .. } => {
                    ConnectionError::LengthMismatch {
                        direction: Direction::Read,
                        expected,
                        actual: received,
                    }
                },
                other => other,
            }
        })?;
    }

    sink.record(&ConnectionEvent::FrameReceived {
        body: &body,
        elapsed: deadline.elapsed(env.now()),
    });

    Ok(body)
}

/// Frame `payload` and write it.
pub fn write_frame<S, E, K>(
    stream: &mut S,
    payload: &[u8],
    timeout: Duration,
    env: &E,
    sink: &K,
) -> Result<(), ConnectionError>
where
    S: Stream + ?Sized,
    E: Environment + ?Sized,
    K: EventSink + ?Sized,
{
    let mut command = Vec::new();
    encode_frame(payload, &mut command)?;

    sink.record(&ConnectionEvent::FrameSending { payload });

    let deadline = Deadline::after(env.now(), timeout);
    let written = write_exactly(stream, &command, &deadline, env, sink)?;
    if written != command.len() {
        return Err(ConnectionError::LengthMismatch {
            direction: Direction::Write,
            expected: command.len(),
            actual: written,
        });
    }

    Ok(())
}

fn back_off<E: Environment + ?Sized>(attempt: u32, deadline: &Deadline, env: &E) {
    if let Some(remaining) = deadline.remaining(env.now()) {
        env.sleep(BACKOFF_STEP.saturating_mul(attempt).min(remaining));
    }
}
