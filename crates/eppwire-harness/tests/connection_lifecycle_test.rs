//! Connection lifecycle tests over the scripted transport.
//!
//! Covers open/close transitions, greeting gating, precondition checks,
//! framing of reads and writes, and how each failure leaves the connection.

use std::{io, time::Duration};

use eppwire_core::{
    Connection, ConnectionConfig, ConnectionError, Direction, FramePart, GreetingValidator,
    MAX_TIMEOUT_SECONDS, TransportOptions,
};
use eppwire_harness::{RecordingSink, ScriptedTransport, StreamScript, VirtualEnv, frame};
use eppwire_proto::ProtocolError;
use tracing::Level;

const URI: &str = "tls://epp.example.test:700";

struct Fixture {
    env: VirtualEnv,
    transport: ScriptedTransport,
    sink: RecordingSink,
}

impl Fixture {
    fn new() -> Self {
        let env = VirtualEnv::new();
        Self { transport: ScriptedTransport::new(env.clone()), env, sink: RecordingSink::new() }
    }

    fn connection<G: GreetingValidator>(
        &self,
        timeout_seconds: u64,
        validator: G,
    ) -> Connection<ScriptedTransport, G, VirtualEnv, RecordingSink> {
        self.connection_with(ConnectionConfig::new(URI, timeout_seconds), validator)
    }

    fn connection_with<G: GreetingValidator>(
        &self,
        config: ConnectionConfig,
        validator: G,
    ) -> Connection<ScriptedTransport, G, VirtualEnv, RecordingSink> {
        Connection::new(config, self.transport.clone(), validator)
            .unwrap()
            .with_env(self.env.clone())
            .with_sink(self.sink.clone())
    }
}

fn contains_greeting(body: &[u8]) -> bool {
    body.windows(b"greeting".len()).any(|w| w == b"greeting")
}

fn reject_all(_: &[u8]) -> bool {
    false
}

fn greeted() -> StreamScript {
    StreamScript::new().deliver_frame(b"<greeting/>")
}

#[test]
fn open_succeeds_with_valid_greeting() {
    let fx = Fixture::new();
    let wire = b"\x00\x00\x00\x0f<greeting/>".to_vec();
    let handle = fx.transport.push_stream(StreamScript::new().deliver(wire));
    let mut conn = fx.connection(30, contains_greeting);

    conn.open().unwrap();

    assert!(conn.is_opened());
    assert_eq!(conn.greeting(), Some(&b"<greeting/>"[..]));

    let calls = fx.transport.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].endpoint.to_string(), URI);
    assert_eq!(calls[0].timeout, Duration::from_secs(30));
    assert_eq!(handle.read_timeouts()[0], Some(Duration::from_secs(30)));

    let names = fx.sink.names();
    assert_eq!(names.first(), Some(&"connected"));
    assert_eq!(names.last(), Some(&"greeting_accepted"));
    assert_eq!(fx.sink.count("frame_received"), 1);
}

#[test]
fn open_fails_when_greeting_rejected() {
    let fx = Fixture::new();
    let handle = fx.transport.push_stream(greeted());
    let mut conn = fx.connection(30, reject_all);

    let err = conn.open().unwrap_err();

    assert!(matches!(err, ConnectionError::GreetingRejected { len: 11 }));
    assert!(!conn.is_opened());
    assert!(conn.greeting().is_none());
    assert!(handle.is_closed());
    assert_eq!(fx.sink.count("stream_discarded"), 1);
}

#[test]
fn write_frames_payload() {
    let fx = Fixture::new();
    let handle = fx.transport.push_stream(greeted());
    let mut conn = fx.connection(30, contains_greeting);
    conn.open().unwrap();

    conn.write(b"<hello/>").unwrap();

    assert_eq!(handle.written(), b"\x00\x00\x00\x0c<hello/>");
    let sending = fx.sink.events().into_iter().find(|e| e.name == "frame_sending").unwrap();
    assert_eq!(sending.level, Level::INFO);
    assert_eq!(sending.payload.as_deref(), Some(&b"<hello/>"[..]));
}

#[test]
fn read_reassembles_bytewise_header() {
    let fx = Fixture::new();
    let body = b"<epp><response/></epp>";
    let wire = frame(body);
    fx.transport.push_stream(greeted().deliver_bytewise(&wire[..4]).deliver(wire[4..].to_vec()));
    let mut conn = fx.connection(30, contains_greeting);
    conn.open().unwrap();

    let read = conn.read().unwrap();

    assert_eq!(read, body);
    assert!(conn.is_opened());
    // One attempt per header byte, each followed by a growing backoff
    assert_eq!(
        fx.env.sleeps(),
        vec![Duration::from_millis(100), Duration::from_millis(200), Duration::from_millis(300)]
    );
}

#[test]
fn read_reports_stalled_body() {
    let fx = Fixture::new();
    let mut partial = frame(&[b'x'; 20]);
    partial.truncate(4 + 10);
    let handle = fx.transport.push_stream(greeted().deliver(partial));
    let mut conn = fx.connection(1, contains_greeting);
    conn.open().unwrap();

    let err = conn.read().unwrap_err();

    assert!(matches!(
        err,
        ConnectionError::LengthMismatch { direction: Direction::Read, expected: 20, actual: 10 }
    ));
    assert!(!conn.is_opened());
    assert!(handle.is_closed());
    assert_eq!(fx.env.elapsed(), Duration::from_secs(1));
}

#[test]
fn header_stall_is_timeout() {
    let fx = Fixture::new();
    fx.transport.push_stream(greeted().deliver(vec![0, 0]));
    let mut conn = fx.connection(2, contains_greeting);
    conn.open().unwrap();

    let err = conn.read().unwrap_err();

    match err {
        ConnectionError::Timeout { part, expected, received, elapsed } => {
            assert_eq!(part, FramePart::Header);
            assert_eq!(expected, 4);
            assert_eq!(received, 2);
            assert_eq!(elapsed, Duration::from_secs(2));
        },
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(!conn.is_opened());
}

#[test]
fn blocking_stall_counts_against_deadline() {
    let fx = Fixture::new();
    fx.transport.push_stream(greeted().stall_for(Duration::from_secs(5)));
    let mut conn = fx.connection(3, contains_greeting);
    conn.open().unwrap();

    let err = conn.read().unwrap_err();

    assert!(matches!(err, ConnectionError::Timeout { received: 0, .. }));
    assert!(fx.env.sleeps().is_empty());
}

#[test]
fn read_narrows_timeout_to_remaining_time() {
    let fx = Fixture::new();
    let wire = frame(b"<response/>");
    let handle = fx.transport.push_stream(greeted().stall().deliver(wire));
    let mut conn = fx.connection(10, contains_greeting);
    conn.open().unwrap();
    let before = handle.read_timeouts().len();

    conn.read().unwrap();

    let timeouts = &handle.read_timeouts()[before..];
    assert_eq!(timeouts[0], Some(Duration::from_secs(10)));
    assert_eq!(timeouts[1], Some(Duration::from_millis(9_900)));
}

#[test]
fn closed_connection_rejects_io_without_touching_stream() {
    let fx = Fixture::new();
    let mut conn = fx.connection(30, contains_greeting);

    assert!(matches!(conn.read(), Err(ConnectionError::NotOpen)));
    assert!(matches!(conn.write(b"<hello/>"), Err(ConnectionError::NotOpen)));
    assert!(fx.transport.calls().is_empty());

    let handle = fx.transport.push_stream(greeted());
    conn.open().unwrap();
    conn.close().unwrap();
    let attempts = handle.read_attempts();

    assert!(matches!(conn.read(), Err(ConnectionError::NotOpen)));
    assert!(matches!(conn.write(b"<hello/>"), Err(ConnectionError::NotOpen)));
    assert_eq!(handle.read_attempts(), attempts);
    assert!(handle.written().is_empty());
}

#[test]
fn close_is_idempotent() {
    let fx = Fixture::new();
    let handle = fx.transport.push_stream(greeted());
    let mut conn = fx.connection(30, contains_greeting);
    conn.open().unwrap();

    conn.close().unwrap();
    assert!(!conn.is_opened());
    assert!(conn.greeting().is_none());
    assert!(handle.is_closed());

    conn.close().unwrap();
    assert_eq!(fx.sink.count("closed"), 1);
}

#[test]
fn close_failure_still_closes() {
    let fx = Fixture::new();
    fx.transport.push_stream(greeted().fail_close(io::ErrorKind::BrokenPipe));
    let mut conn = fx.connection(30, contains_greeting);
    conn.open().unwrap();

    let err = conn.close().unwrap_err();

    assert!(matches!(err, ConnectionError::Close(ref e) if e.kind() == io::ErrorKind::BrokenPipe));
    assert!(!conn.is_opened());
    assert!(conn.close().is_ok());
}

#[test]
fn open_twice_leaves_stream_alone() {
    let fx = Fixture::new();
    let handle = fx.transport.push_stream(greeted());
    let mut conn = fx.connection(30, contains_greeting);
    conn.open().unwrap();

    assert!(matches!(conn.open(), Err(ConnectionError::AlreadyOpen)));

    assert!(conn.is_opened());
    assert!(!handle.is_closed());
    assert_eq!(fx.transport.calls().len(), 1);
}

#[test]
fn reopen_after_close_uses_new_stream() {
    let fx = Fixture::new();
    let first = fx.transport.push_stream(greeted());
    let second =
        fx.transport.push_stream(StreamScript::new().deliver_frame(b"<greeting>2</greeting>"));
    let mut conn = fx.connection(30, contains_greeting);

    conn.open().unwrap();
    conn.close().unwrap();
    conn.open().unwrap();

    assert!(first.is_closed());
    assert!(!second.is_closed());
    assert_eq!(conn.greeting(), Some(&b"<greeting>2</greeting>"[..]));
}

#[test]
fn peer_close_is_observed() {
    let fx = Fixture::new();
    fx.transport.push_stream(greeted().eof());
    fx.transport.push_stream(greeted());
    let mut conn = fx.connection(30, contains_greeting);
    conn.open().unwrap();

    let err = conn.read().unwrap_err();

    assert!(matches!(
        err,
        ConnectionError::PeerClosed { part: FramePart::Header, expected: 4, received: 0 }
    ));
    assert!(!conn.is_opened());

    conn.open().unwrap();
    assert!(conn.is_opened());
}

#[test]
fn refused_connect_is_connect_error() {
    let fx = Fixture::new();
    fx.transport.push_refusal(io::ErrorKind::ConnectionRefused);
    let mut conn = fx.connection(30, contains_greeting);

    let err = conn.open().unwrap_err();

    assert!(matches!(err, ConnectionError::Connect { .. }));
    assert!(!conn.is_opened());
}

#[test]
fn missing_greeting_fails_open() {
    let fx = Fixture::new();
    let handle = fx.transport.push_stream(StreamScript::new());
    let mut conn = fx.connection(2, contains_greeting);

    let err = conn.open().unwrap_err();

    assert!(matches!(err, ConnectionError::Timeout { part: FramePart::Header, .. }));
    assert!(!conn.is_opened());
    assert!(handle.is_closed());
}

#[test]
fn undersized_header_is_protocol_error() {
    let fx = Fixture::new();
    fx.transport.push_stream(greeted().deliver(vec![0, 0, 0, 2]));
    let mut conn = fx.connection(30, contains_greeting);
    conn.open().unwrap();

    let err = conn.read().unwrap_err();

    assert!(matches!(
        err,
        ConnectionError::Protocol(ProtocolError::LengthTooShort { declared: 2 })
    ));
    assert!(!conn.is_opened());
}

#[test]
fn oversized_frame_rejected() {
    let fx = Fixture::new();
    fx.transport.push_stream(greeted().deliver(vec![0, 0, 0x03, 0xe8]));
    let mut config = ConnectionConfig::new(URI, 30);
    config.max_frame_len = 256;
    let mut conn = fx.connection_with(config, contains_greeting);
    conn.open().unwrap();

    let err = conn.read().unwrap_err();

    assert!(matches!(
        err,
        ConnectionError::Protocol(ProtocolError::FrameTooLarge { declared: 1000, max: 256 })
    ));
}

#[test]
fn read_fault_is_io_error() {
    let fx = Fixture::new();
    fx.transport.push_stream(greeted().fail_read(io::ErrorKind::ConnectionReset));
    let mut conn = fx.connection(30, contains_greeting);
    conn.open().unwrap();

    let err = conn.read().unwrap_err();

    assert!(matches!(err, ConnectionError::Io { operation: "read", .. }));
    assert!(!conn.is_opened());
}

#[test]
fn write_fault_is_io_error() {
    let fx = Fixture::new();
    let handle = fx.transport.push_stream(greeted().fail_write(io::ErrorKind::BrokenPipe));
    let mut conn = fx.connection(30, contains_greeting);
    conn.open().unwrap();

    let err = conn.write(b"<hello/>").unwrap_err();

    assert!(matches!(err, ConnectionError::Io { operation: "write", .. }));
    assert!(!conn.is_opened());
    assert!(handle.is_closed());
}

#[test]
fn short_writes_are_completed() {
    let fx = Fixture::new();
    let handle = fx.transport.push_stream(greeted().max_write(5));
    let mut conn = fx.connection(30, contains_greeting);
    conn.open().unwrap();

    conn.write(b"<hello/>").unwrap();

    assert_eq!(handle.written_frames(), vec![b"<hello/>".to_vec()]);
    assert_eq!(fx.sink.count("write_attempt"), 3);
}

#[test]
fn stuck_writer_is_length_mismatch() {
    let fx = Fixture::new();
    fx.transport.push_stream(greeted().max_write(0));
    let mut conn = fx.connection(1, contains_greeting);
    conn.open().unwrap();

    let err = conn.write(b"<hello/>").unwrap_err();

    assert!(matches!(
        err,
        ConnectionError::LengthMismatch { direction: Direction::Write, expected: 12, actual: 0 }
    ));
    assert!(!conn.is_opened());
}

#[test]
fn exchange_pairs_request_and_response() {
    let fx = Fixture::new();
    let handle = fx.transport.push_stream(greeted().deliver_frame(b"<response/>"));
    let mut conn = fx.connection(30, contains_greeting);
    conn.open().unwrap();

    let response = conn.exchange(b"<command/>").unwrap();

    assert_eq!(response, b"<response/>");
    assert_eq!(handle.written_frames(), vec![b"<command/>".to_vec()]);
}

#[test]
fn empty_body_frame_reads_empty() {
    let fx = Fixture::new();
    fx.transport.push_stream(greeted().deliver(vec![0, 0, 0, 4]));
    let mut conn = fx.connection(30, contains_greeting);
    conn.open().unwrap();

    assert!(conn.read().unwrap().is_empty());
    assert!(conn.is_opened());
}

#[test]
fn transport_options_pass_through() {
    let fx = Fixture::new();
    fx.transport.push_stream(greeted());
    let mut options = TransportOptions::default();
    options.tls.server_name = Some("registry.example.test".to_string());
    options.tls.verify_peer = false;
    let config = ConnectionConfig::new(URI, 30).with_transport(options.clone());
    let mut conn = fx.connection_with(config, contains_greeting);

    conn.open().unwrap();

    assert_eq!(fx.transport.calls()[0].options, options);
}

#[test]
fn attempt_events_are_debug_and_frames_info() {
    let fx = Fixture::new();
    fx.transport.push_stream(greeted());
    let mut conn = fx.connection(30, contains_greeting);
    conn.open().unwrap();

    for event in fx.sink.events() {
        match event.name {
            "read_attempt" | "write_attempt" | "stream_discarded" => {
                assert_eq!(event.level, Level::DEBUG);
            },
            _ => assert_eq!(event.level, Level::INFO),
        }
    }

    let received = fx.sink.events().into_iter().find(|e| e.name == "frame_received").unwrap();
    assert_eq!(received.payload.as_deref(), Some(&b"<greeting/>"[..]));
}

#[test]
fn unbounded_timeout_rejected_at_construction() {
    let fx = Fixture::new();

    let result = Connection::new(
        ConnectionConfig::new(URI, u64::MAX),
        fx.transport.clone(),
        contains_greeting,
    );

    assert!(matches!(result, Err(ConnectionError::Configuration(_))));
    assert!(fx.transport.calls().is_empty());
}

#[test]
fn longest_timeout_opens_and_reads() {
    let fx = Fixture::new();
    fx.transport.push_stream(greeted().stall().deliver_frame(b"<response/>"));
    let mut conn = fx.connection(MAX_TIMEOUT_SECONDS, contains_greeting);

    conn.open().unwrap();

    assert_eq!(conn.read().unwrap(), b"<response/>");
    assert_eq!(fx.transport.calls()[0].timeout, Duration::from_secs(MAX_TIMEOUT_SECONDS));
}

#[test]
fn peer_hang_up_releases_stream_on_next_call() {
    let fx = Fixture::new();
    let handle = fx.transport.push_stream(greeted());
    let mut conn = fx.connection(30, contains_greeting);
    conn.open().unwrap();

    handle.hang_up();
    assert!(!conn.is_opened());
    assert!(!handle.is_closed());
    let attempts = handle.read_attempts();

    assert!(matches!(conn.read(), Err(ConnectionError::NotOpen)));
    assert!(handle.is_closed());
    assert_eq!(handle.read_attempts(), attempts);
    assert_eq!(fx.sink.count("stream_discarded"), 1);
    assert!(conn.greeting().is_none());

    assert!(matches!(conn.write(b"<hello/>"), Err(ConnectionError::NotOpen)));
    assert!(handle.written().is_empty());
    assert_eq!(fx.sink.count("stream_discarded"), 1);
}
