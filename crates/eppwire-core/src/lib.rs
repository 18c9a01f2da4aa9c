//! EPP transport client core.
//!
//! A [`Connection`] owns one byte stream to an EPP server and speaks the
//! RFC 5734 framing over it: open the stream, validate the server greeting,
//! then exchange length-prefixed frames.
//!
//! # Architecture
//!
//! Every external effect sits behind a trait supplied by the caller:
//!
//! - [`Transport`] / [`Stream`]: how bytes move (real sockets with the
//!   `transport` feature, scripted streams in tests)
//! - [`Environment`]: clock and sleep used by the retry loops
//! - [`EventSink`]: where structured connection events go
//! - [`GreetingValidator`]: whether the first frame is an acceptable greeting
//!
//! The connection itself only decides state transitions and framing. This
//! keeps timeout and partial-I/O behavior testable with virtual time.
//!
//! # Components
//!
//! - [`connection`]: lifecycle (open, close, read, write)
//! - [`io`]: bounded partial-I/O retry loops
//! - [`config`]: connection configuration and endpoint parsing
//! - [`error`]: connection error taxonomy
//! - [`event`]: connection events and sinks
//! - [`mod@env`]: time abstraction
//! - [`greeting`]: greeting predicate
//! - [`transport`]: transport and stream abstraction
//! - `socket`: TCP/TLS transport (feature `transport`)

pub mod config;
pub mod connection;
pub mod env;
pub mod error;
pub mod event;
pub mod greeting;
pub mod io;
#[cfg(feature = "transport")]
pub mod socket;
pub mod transport;

pub use config::{
    ConnectionConfig, Endpoint, MAX_TIMEOUT_SECONDS, Scheme, TlsOptions, TransportOptions,
};
pub use connection::Connection;
pub use env::{Environment, SystemEnv};
pub use error::{ConnectionError, Direction, FramePart};
pub use event::{ConnectionEvent, EventSink, TracingSink};
pub use greeting::{GreetingValidator, RequireGreetingElement};
#[cfg(feature = "transport")]
pub use socket::{SocketStream, SocketTransport};
pub use transport::{Stream, Transport};
