//! Scripted transport and streams.
//!
//! A [`StreamScript`] lists what successive `read_some` calls return. Data
//! steps are split across calls when the caller asks for fewer bytes, and a
//! drained script behaves like a peer that never sends again.

use std::{
    collections::VecDeque,
    io,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use eppwire_core::{Endpoint, Stream, Transport, TransportOptions};
use eppwire_proto::{DEFAULT_MAX_FRAME_LEN, decode_frame};

use crate::clock::VirtualEnv;

/// What one read attempt does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadStep {
    /// Return these bytes, over several attempts if the buffer is smaller
    Data(Vec<u8>),
    /// Return zero bytes immediately
    Stall,
    /// Block for the given virtual time, then return zero bytes
    StallFor(Duration),
    /// Peer closes its side
    Eof,
    /// Fail the attempt
    Fail(io::ErrorKind),
}

/// Behavior of one scripted stream.
#[derive(Debug, Clone, Default)]
pub struct StreamScript {
    reads: VecDeque<ReadStep>,
    write_limit: Option<usize>,
    write_error: Option<io::ErrorKind>,
    close_error: Option<io::ErrorKind>,
}

impl StreamScript {
    /// Script whose reads stall forever and whose writes succeed in full.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `bytes` as a single chunk.
    #[must_use]
    pub fn deliver(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.reads.push_back(ReadStep::Data(bytes.into()));
        self
    }

    /// Deliver `body` framed, as a single chunk.
    #[must_use]
    pub fn deliver_frame(self, body: &[u8]) -> Self {
        self.deliver(crate::frame(body))
    }

    /// Deliver `bytes` one byte per read attempt.
    #[must_use]
    pub fn deliver_bytewise(mut self, bytes: &[u8]) -> Self {
        self.reads.extend(bytes.iter().map(|b| ReadStep::Data(vec![*b])));
        self
    }

    /// One empty read attempt.
    #[must_use]
    pub fn stall(mut self) -> Self {
        self.reads.push_back(ReadStep::Stall);
        self
    }

    /// One read attempt that blocks for `duration` of virtual time.
    #[must_use]
    pub fn stall_for(mut self, duration: Duration) -> Self {
        self.reads.push_back(ReadStep::StallFor(duration));
        self
    }

    /// Peer closes after the preceding steps.
    #[must_use]
    pub fn eof(mut self) -> Self {
        self.reads.push_back(ReadStep::Eof);
        self
    }

    /// Read attempt fails with `kind`.
    #[must_use]
    pub fn fail_read(mut self, kind: io::ErrorKind) -> Self {
        self.reads.push_back(ReadStep::Fail(kind));
        self
    }

    /// Accept at most `limit` bytes per write attempt.
    #[must_use]
    pub fn max_write(mut self, limit: usize) -> Self {
        self.write_limit = Some(limit);
        self
    }

    /// Every write attempt fails with `kind`.
    #[must_use]
    pub fn fail_write(mut self, kind: io::ErrorKind) -> Self {
        self.write_error = Some(kind);
        self
    }

    /// `close()` fails with `kind`.
    #[must_use]
    pub fn fail_close(mut self, kind: io::ErrorKind) -> Self {
        self.close_error = Some(kind);
        self
    }
}

#[derive(Debug, Default)]
struct StreamState {
    script: StreamScript,
    written: Vec<u8>,
    eof: bool,
    closed: bool,
    read_attempts: usize,
    read_timeouts: Vec<Option<Duration>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Inspection handle for a stream handed out by [`ScriptedTransport`].
#[derive(Debug, Clone)]
pub struct StreamHandle {
    state: Arc<Mutex<StreamState>>,
}

impl StreamHandle {
    /// Raw bytes written so far.
    pub fn written(&self) -> Vec<u8> {
        lock(&self.state).written.clone()
    }

    /// Written bytes decoded as frames; a trailing partial frame is ignored.
    pub fn written_frames(&self) -> Vec<Vec<u8>> {
        let written = self.written();
        let mut frames = Vec::new();
        let mut rest = written.as_slice();

        while let Ok(Some((body, consumed))) = decode_frame(rest, DEFAULT_MAX_FRAME_LEN) {
            frames.push(body.to_vec());
            rest = &rest[consumed..];
        }
        frames
    }

    /// Mark the peer as gone without a read observing it.
    pub fn hang_up(&self) {
        lock(&self.state).eof = true;
    }

    /// `true` once `close()` was called on the stream.
    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// Number of `read_some` calls made.
    pub fn read_attempts(&self) -> usize {
        lock(&self.state).read_attempts
    }

    /// Read timeouts set on the stream, in order.
    pub fn read_timeouts(&self) -> Vec<Option<Duration>> {
        lock(&self.state).read_timeouts.clone()
    }
}

/// Stream replaying a [`StreamScript`].
#[derive(Debug)]
pub struct ScriptedStream {
    state: Arc<Mutex<StreamState>>,
    env: VirtualEnv,
}

impl Stream for ScriptedStream {
    fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = lock(&self.state);
        state.read_attempts += 1;

        match state.script.reads.pop_front() {
            Some(ReadStep::Data(mut chunk)) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    state.script.reads.push_front(ReadStep::Data(chunk.split_off(n)));
                }
                Ok(n)
            },
            Some(ReadStep::StallFor(duration)) => {
                self.env.advance(duration);
                Ok(0)
            },
            Some(ReadStep::Eof) => {
                state.eof = true;
                Ok(0)
            },
            Some(ReadStep::Fail(kind)) => Err(io::Error::from(kind)),
            Some(ReadStep::Stall) | None => Ok(0),
        }
    }

    fn write_some(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = lock(&self.state);
        if let Some(kind) = state.script.write_error {
            return Err(io::Error::from(kind));
        }

        let n = state.script.write_limit.map_or(buf.len(), |limit| limit.min(buf.len()));
        state.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        lock(&self.state).read_timeouts.push(timeout);
        Ok(())
    }

    fn is_at_eof(&self) -> bool {
        lock(&self.state).eof
    }

    fn close(&mut self) -> io::Result<()> {
        let mut state = lock(&self.state);
        state.closed = true;
        match state.script.close_error {
            Some(kind) => Err(io::Error::from(kind)),
            None => Ok(()),
        }
    }
}

/// One recorded `connect` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectCall {
    /// Endpoint dialed
    pub endpoint: Endpoint,
    /// Options passed through
    pub options: TransportOptions,
    /// Connect timeout requested
    pub timeout: Duration,
}

#[derive(Debug, Default)]
struct TransportState {
    queue: VecDeque<Result<Arc<Mutex<StreamState>>, io::ErrorKind>>,
    calls: Vec<ConnectCall>,
}

/// Transport handing out scripted streams in the order they were queued.
///
/// Connecting with an empty queue fails with `ConnectionRefused`.
#[derive(Debug, Clone)]
pub struct ScriptedTransport {
    env: VirtualEnv,
    state: Arc<Mutex<TransportState>>,
}

impl ScriptedTransport {
    /// Transport whose stalls advance `env`.
    pub fn new(env: VirtualEnv) -> Self {
        Self { env, state: Arc::new(Mutex::new(TransportState::default())) }
    }

    /// Queue a stream for the next successful connect.
    pub fn push_stream(&self, script: StreamScript) -> StreamHandle {
        let state = Arc::new(Mutex::new(StreamState { script, ..StreamState::default() }));
        lock(&self.state).queue.push_back(Ok(Arc::clone(&state)));
        StreamHandle { state }
    }

    /// Queue a connect failure.
    pub fn push_refusal(&self, kind: io::ErrorKind) {
        lock(&self.state).queue.push_back(Err(kind));
    }

    /// Every connect call made so far.
    pub fn calls(&self) -> Vec<ConnectCall> {
        lock(&self.state).calls.clone()
    }
}

impl Transport for ScriptedTransport {
    type Stream = ScriptedStream;

    fn connect(
        &self,
        endpoint: &Endpoint,
        options: &TransportOptions,
        timeout: Duration,
    ) -> io::Result<ScriptedStream> {
        let mut state = lock(&self.state);
        state.calls.push(ConnectCall {
            endpoint: endpoint.clone(),
            options: options.clone(),
            timeout,
        });

        match state.queue.pop_front() {
            Some(Ok(stream)) => Ok(ScriptedStream { state: stream, env: self.env.clone() }),
            Some(Err(kind)) => Err(io::Error::from(kind)),
            None => Err(io::Error::from(io::ErrorKind::ConnectionRefused)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_steps_split_across_small_reads() {
        let env = VirtualEnv::new();
        let transport = ScriptedTransport::new(env);
        transport.push_stream(StreamScript::new().deliver(b"abcdef".to_vec()).eof());

        let endpoint: Endpoint = "tcp://127.0.0.1:700".parse().unwrap();
        let mut stream = transport
            .connect(&endpoint, &TransportOptions::default(), Duration::from_secs(1))
            .unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(stream.read_some(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(stream.read_some(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
        assert!(!stream.is_at_eof());
        assert_eq!(stream.read_some(&mut buf).unwrap(), 0);
        assert!(stream.is_at_eof());
    }

    #[test]
    fn empty_queue_refuses() {
        let transport = ScriptedTransport::new(VirtualEnv::new());
        let endpoint: Endpoint = "tcp://127.0.0.1:700".parse().unwrap();

        let err = transport
            .connect(&endpoint, &TransportOptions::default(), Duration::from_secs(1))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
        assert_eq!(transport.calls().len(), 1);
    }

    #[test]
    fn stall_for_advances_shared_clock() {
        let env = VirtualEnv::new();
        let transport = ScriptedTransport::new(env.clone());
        transport.push_stream(StreamScript::new().stall_for(Duration::from_secs(2)));

        let endpoint: Endpoint = "tcp://127.0.0.1:700".parse().unwrap();
        let mut stream = transport
            .connect(&endpoint, &TransportOptions::default(), Duration::from_secs(1))
            .unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(stream.read_some(&mut buf).unwrap(), 0);
        assert_eq!(env.elapsed(), Duration::from_secs(2));
    }
}
