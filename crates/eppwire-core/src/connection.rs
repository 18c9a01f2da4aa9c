//! EPP connection lifecycle.
//!
//! # State Machine
//!
//! ```text
//!            open() + valid greeting
//! ┌────────┐ ─────────────────────> ┌──────┐
//! │ Closed │                        │ Open │
//! └────────┘ <───────────────────── └──────┘
//!             close(), peer EOF,
//!             any read/write fault
//! ```
//!
//! The state is not stored separately: the connection is open exactly when it
//! holds a stream that has not seen end-of-stream. Every failure path drops
//! the stream, so [`Connection::is_opened`] always reflects reality.
//!
//! All operations take `&mut self`. One caller owns the connection; sharing
//! it across threads needs external locking, which also rules out closing it
//! underneath an in-flight read.

use crate::{
    config::{ConnectionConfig, Endpoint},
    env::{Environment, SystemEnv},
    error::ConnectionError,
    event::{ConnectionEvent, EventSink, TracingSink},
    greeting::GreetingValidator,
    io::{read_frame, write_frame},
    transport::{Stream, Transport},
};

/// Framed connection to one EPP server.
pub struct Connection<T, G, E = SystemEnv, K = TracingSink>
where
    T: Transport,
{
    config: ConnectionConfig,
    endpoint: Endpoint,
    transport: T,
    validator: G,
    env: E,
    sink: K,
    stream: Option<T::Stream>,
    greeting: Option<Vec<u8>>,
}

impl<T, G> Connection<T, G>
where
    T: Transport,
    G: GreetingValidator,
{
    /// Create a closed connection using the system clock and `tracing`.
    ///
    /// # Errors
    ///
    /// `Configuration` if `config` does not validate. No I/O happens here.
    pub fn new(
        config: ConnectionConfig,
        transport: T,
        validator: G,
    ) -> Result<Self, ConnectionError> {
        let endpoint = config.validate()?;

        Ok(Self {
            config,
            endpoint,
            transport,
            validator,
            env: SystemEnv,
            sink: TracingSink,
            stream: None,
            greeting: None,
        })
    }
}

impl<T, G, E, K> Connection<T, G, E, K>
where
    T: Transport,
    G: GreetingValidator,
    E: Environment,
    K: EventSink,
{
    /// Replace the clock used by the retry loops.
    pub fn with_env<E2: Environment>(self, env: E2) -> Connection<T, G, E2, K> {
        Connection {
            config: self.config,
            endpoint: self.endpoint,
            transport: self.transport,
            validator: self.validator,
            env,
            sink: self.sink,
            stream: self.stream,
            greeting: self.greeting,
        }
    }

    /// Replace the event sink.
    pub fn with_sink<K2: EventSink>(self, sink: K2) -> Connection<T, G, E, K2> {
        Connection {
            config: self.config,
            endpoint: self.endpoint,
            transport: self.transport,
            validator: self.validator,
            env: self.env,
            sink,
            stream: self.stream,
            greeting: self.greeting,
        }
    }

    /// Configuration this connection was built from.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Parsed server endpoint.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Body of the greeting accepted by the last successful `open()`.
    pub fn greeting(&self) -> Option<&[u8]> {
        self.greeting.as_deref()
    }

    /// `true` while a stream is held and the peer has not closed it.
    ///
    /// Evaluated on every call.
    pub fn is_opened(&self) -> bool {
        self.stream.as_ref().is_some_and(|stream| !stream.is_at_eof())
    }

    /// Connect, read the server greeting and validate it.
    ///
    /// On any failure the partially established stream is dropped and the
    /// connection stays closed.
    ///
    /// # Errors
    ///
    /// - `AlreadyOpen` if a live stream is held (it is left untouched)
    /// - `Connect` if the transport cannot establish the stream
    /// - any `read()` error while fetching the greeting
    /// - `GreetingRejected` if the validator refuses the first frame
    pub fn open(&mut self) -> Result<(), ConnectionError> {
        if self.stream.is_some() {
            if self.is_opened() {
                return Err(ConnectionError::AlreadyOpen);
            }
            self.discard("peer closed before reopen");
        }

        let timeout = self.config.timeout();
        let started = self.env.now();

        let mut stream = self
            .transport
            .connect(&self.endpoint, &self.config.transport, timeout)
            .map_err(|source| ConnectionError::Connect {
                endpoint: self.endpoint.to_string(),
                source,
            })?;

        if let Err(source) = stream.set_read_timeout(Some(timeout)) {
            let _ = stream.close();
            return Err(ConnectionError::Connect { endpoint: self.endpoint.to_string(), source });
        }

        self.sink.record(&ConnectionEvent::Connected {
            endpoint: &self.endpoint,
            elapsed: self.env.now().saturating_duration_since(started),
        });
        self.stream = Some(stream);

        let greeting = self.read()?;
        if !self.validator.is_valid(&greeting) {
            self.discard("greeting rejected");
            return Err(ConnectionError::GreetingRejected { len: greeting.len() });
        }

        self.sink.record(&ConnectionEvent::GreetingAccepted { len: greeting.len() });
        self.greeting = Some(greeting);
        Ok(())
    }

    /// Release the stream.
    ///
    /// A no-op when closed. The connection ends up closed even if releasing
    /// the stream fails.
    ///
    /// # Errors
    ///
    /// `Close` if the stream reported an error while shutting down.
    pub fn close(&mut self) -> Result<(), ConnectionError> {
        self.greeting = None;

        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };

        if stream.is_at_eof() {
            // Peer already gone; nothing useful to report
            let _ = stream.close();
            self.sink.record(&ConnectionEvent::StreamDiscarded { reason: "peer closed" });
            return Ok(());
        }

        let result = stream.close();
        self.sink.record(&ConnectionEvent::Closed { endpoint: &self.endpoint });
        result.map_err(ConnectionError::Close)
    }

    /// Read one frame and return its body.
    ///
    /// # Errors
    ///
    /// - `NotOpen` if the connection is closed; nothing is read or written,
    ///   and a stream the peer already closed is released
    /// - `Timeout`, `PeerClosed`, `LengthMismatch`, `Protocol` or `Io` if the
    ///   frame could not be read; the stream is dropped
    pub fn read(&mut self) -> Result<Vec<u8>, ConnectionError> {
        self.drop_if_peer_closed();
        let Some(stream) = self.stream.as_mut() else {
            return Err(ConnectionError::NotOpen);
        };

        let result = read_frame(
            stream,
            self.config.max_frame_len,
            self.config.timeout(),
            &self.env,
            &self.sink,
        );

        if let Err(err) = &result {
            self.discard(&err.to_string());
        }
        result
    }

    /// Frame `payload` and write it.
    ///
    /// # Errors
    ///
    /// - `NotOpen` if the connection is closed; nothing is read or written,
    ///   and a stream the peer already closed is released
    /// - `Protocol` if the payload is too large to frame
    /// - `LengthMismatch` or `Io` if the write did not complete; the stream is
    ///   dropped
    pub fn write(&mut self, payload: &[u8]) -> Result<(), ConnectionError> {
        self.drop_if_peer_closed();
        let Some(stream) = self.stream.as_mut() else {
            return Err(ConnectionError::NotOpen);
        };

        let result = write_frame(stream, payload, self.config.timeout(), &self.env, &self.sink);

        if let Err(err) = &result {
            self.discard(&err.to_string());
        }
        result
    }

    /// Write a request frame and read the response frame.
    pub fn exchange(&mut self, payload: &[u8]) -> Result<Vec<u8>, ConnectionError> {
        self.write(payload)?;
        self.read()
    }

    fn drop_if_peer_closed(&mut self) {
        if self.stream.as_ref().is_some_and(|stream| stream.is_at_eof()) {
            self.discard("peer closed");
        }
    }

    fn discard(&mut self, reason: &str) {
        self.greeting = None;
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close();
            self.sink.record(&ConnectionEvent::StreamDiscarded { reason });
        }
    }
}
