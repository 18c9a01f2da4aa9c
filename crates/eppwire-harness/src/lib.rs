//! Test harness for eppwire connections.
//!
//! Deterministic stand-ins for every collaborator of
//! [`eppwire_core::Connection`], plus small loopback servers for tests that
//! need real sockets.
//!
//! - [`VirtualEnv`]: clock that advances only when slept on
//! - [`ScriptedTransport`] / [`StreamScript`]: streams that replay a script
//!   of chunked reads, stalls, faults and short writes
//! - [`RecordingSink`]: captures connection events
//! - [`LoopbackServer`]: one-shot EPP server over TCP or TLS

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod clock;
pub mod recording;
pub mod scripted;
pub mod server;

pub use clock::VirtualEnv;
pub use recording::{RecordedEvent, RecordingSink};
pub use scripted::{
    ConnectCall, ReadStep, ScriptedStream, ScriptedTransport, StreamHandle, StreamScript,
};
pub use server::{LoopbackServer, TestIdentity};

/// Encode `body` as one RFC 5734 frame.
pub fn frame(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + eppwire_proto::FrameHeader::SIZE);
    // Test bodies are far below the 4 GiB limit
    if eppwire_proto::encode_frame(body, &mut out).is_err() {
        out.clear();
    }
    out
}
