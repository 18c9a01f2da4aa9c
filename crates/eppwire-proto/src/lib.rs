//! Wire format for EPP over TCP (RFC 5734).
//!
//! Every EPP message on a stream is one frame: a 4-byte big-endian total
//! length followed by the XML body. The total length counts the header
//! itself, so an empty body is announced as `4`.
//!
//! ```text
//! +----------------------------+------------------+
//! | total length (4 bytes, BE) | body (N bytes)   |
//! +----------------------------+------------------+
//! total length = N + 4
//! ```
//!
//! The body is opaque at this layer. This crate does no I/O; the partial
//! read/write handling lives in `eppwire-core`.
//!
//! # Security
//!
//! The declared length comes from the peer, so readers are expected to call
//! [`FrameHeader::check_limit`] before allocating a body buffer. The default
//! limit is [`DEFAULT_MAX_FRAME_LEN`].
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod errors;
pub mod frame;
pub mod header;

pub use errors::{ProtocolError, Result};
pub use frame::{decode_frame, encode_frame};
pub use header::{DEFAULT_MAX_FRAME_LEN, FrameHeader};
