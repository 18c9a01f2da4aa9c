//! Arbitrary bytes, split at arbitrary points, read through a connection.
//!
//! The first byte picks the chunk size. Whatever the split, a successful read
//! must return exactly the body the decoder sees in the same bytes.

#![no_main]

use eppwire_core::{Connection, ConnectionConfig};
use eppwire_harness::{RecordingSink, ScriptedTransport, StreamScript, VirtualEnv};
use eppwire_proto::decode_frame;
use libfuzzer_sys::fuzz_target;

const MAX_FRAME_LEN: u32 = 64 * 1024;

// Keeps worst-case backoff for one-byte chunks well inside the deadline
const MAX_WIRE_LEN: usize = 256;

fuzz_target!(|data: &[u8]| {
    let Some((&chunk, wire)) = data.split_first() else {
        return;
    };
    let chunk = usize::from(chunk).max(1);
    let wire = &wire[..wire.len().min(MAX_WIRE_LEN)];

    let env = VirtualEnv::new();
    let transport = ScriptedTransport::new(env.clone());
    let mut script = StreamScript::new().deliver_frame(b"<greeting/>");
    for piece in wire.chunks(chunk) {
        script = script.deliver(piece.to_vec()).stall();
    }
    transport.push_stream(script);

    let mut config = ConnectionConfig::new("tcp://127.0.0.1:700", 86_400);
    config.max_frame_len = MAX_FRAME_LEN;
    let mut conn = Connection::new(config, transport, |_: &[u8]| true)
        .unwrap()
        .with_env(env)
        .with_sink(RecordingSink::new());
    conn.open().unwrap();

    let expected = decode_frame(wire, MAX_FRAME_LEN);
    match conn.read() {
        Ok(body) => {
            let (decoded, _) = expected.unwrap().unwrap();
            assert_eq!(body.as_slice(), decoded);
            assert!(conn.is_opened());
        },
        Err(_) => {
            assert!(!matches!(expected, Ok(Some(_))));
            assert!(!conn.is_opened());
        },
    }
});
