//! Framing errors.

use thiserror::Error;

/// Result alias for framing operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while encoding or decoding a frame header.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Fewer than 4 header bytes were available.
    #[error("truncated frame header: got {got} of 4 bytes")]
    Truncated {
        /// Bytes actually present
        got: usize,
    },

    /// Declared total length is smaller than the header itself.
    #[error("declared frame length {declared} is shorter than the 4-byte header")]
    LengthTooShort {
        /// Total length read from the wire
        declared: u32,
    },

    /// Declared total length exceeds the configured maximum.
    #[error("declared frame length {declared} exceeds limit of {max} bytes")]
    FrameTooLarge {
        /// Total length read from the wire
        declared: u32,
        /// Configured maximum total length
        max: u32,
    },

    /// Payload cannot be described by a 32-bit total length.
    #[error("payload of {len} bytes does not fit in a 32-bit frame length")]
    PayloadTooLarge {
        /// Payload length in bytes
        len: usize,
    },
}
