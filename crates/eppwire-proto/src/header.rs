//! The 4-byte RFC 5734 length prefix.

use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned, byteorder::big_endian::U32,
};

use crate::errors::{ProtocolError, Result};

/// Default upper bound on a declared total frame length (16 MiB).
pub const DEFAULT_MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// Frame header: the total frame length, header included, big-endian.
///
/// Constructed either from a body length ([`FrameHeader::for_body`]) or from
/// wire bytes ([`FrameHeader::from_bytes`]); both paths guarantee
/// `total_len() >= 4`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
#[repr(C)]
pub struct FrameHeader {
    total_len: U32,
}

impl FrameHeader {
    /// Encoded size of the header in bytes.
    pub const SIZE: usize = 4;

    /// Header announcing a body of `body_len` bytes.
    ///
    /// # Errors
    ///
    /// `PayloadTooLarge` if `body_len + 4` overflows `u32`.
    pub fn for_body(body_len: usize) -> Result<Self> {
        let total = u32::try_from(body_len)
            .ok()
            .and_then(|len| len.checked_add(Self::SIZE as u32))
            .ok_or(ProtocolError::PayloadTooLarge { len: body_len })?;

        Ok(Self { total_len: U32::new(total) })
    }

    /// Parse a header from the first 4 bytes of `bytes`.
    ///
    /// # Errors
    ///
    /// - `Truncated` if fewer than 4 bytes are given
    /// - `LengthTooShort` if the declared total is below 4
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (header, _rest) = Self::read_from_prefix(bytes)
            .map_err(|_| ProtocolError::Truncated { got: bytes.len() })?;

        let declared = header.total_len.get();
        if declared < Self::SIZE as u32 {
            return Err(ProtocolError::LengthTooShort { declared });
        }

        Ok(header)
    }

    /// Declared total length, header included.
    pub fn total_len(&self) -> u32 {
        self.total_len.get()
    }

    /// Body length: total length minus the header.
    pub fn body_len(&self) -> usize {
        self.total_len.get().saturating_sub(Self::SIZE as u32) as usize
    }

    /// Wire representation.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out.copy_from_slice(self.as_bytes());
        out
    }

    /// Reject headers whose declared total exceeds `max`.
    pub fn check_limit(&self, max: u32) -> Result<()> {
        let declared = self.total_len();
        if declared > max {
            return Err(ProtocolError::FrameTooLarge { declared, max });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn header_counts_itself() {
        let header = FrameHeader::for_body(8).unwrap();
        assert_eq!(header.to_bytes(), hex!("0000000c"));
        assert_eq!(header.total_len(), 12);
        assert_eq!(header.body_len(), 8);
    }

    #[test]
    fn empty_body_is_four() {
        let header = FrameHeader::for_body(0).unwrap();
        assert_eq!(header.to_bytes(), hex!("00000004"));
        assert_eq!(FrameHeader::from_bytes(&header.to_bytes()).unwrap().body_len(), 0);
    }

    #[test]
    fn declared_length_below_header_rejected() {
        for raw in [hex!("00000000"), hex!("00000003")] {
            let result = FrameHeader::from_bytes(&raw);
            assert!(matches!(result, Err(ProtocolError::LengthTooShort { .. })), "{raw:?}");
        }
    }

    #[test]
    fn truncated_header_rejected() {
        let result = FrameHeader::from_bytes(&hex!("0000"));
        assert_eq!(result, Err(ProtocolError::Truncated { got: 2 }));
    }

    #[test]
    fn big_endian_decoding() {
        let header = FrameHeader::from_bytes(&hex!("01020304")).unwrap();
        assert_eq!(header.total_len(), 0x0102_0304);
        assert_eq!(header.body_len(), 0x0102_0300);
    }

    #[test]
    fn limit_enforced() {
        let header = FrameHeader::from_bytes(&hex!("00000400")).unwrap();
        assert!(header.check_limit(1024).is_ok());
        assert_eq!(
            header.check_limit(1023),
            Err(ProtocolError::FrameTooLarge { declared: 1024, max: 1023 })
        );
    }

    #[test]
    fn oversized_payload_rejected() {
        let len = (u32::MAX - 3) as usize;
        assert_eq!(FrameHeader::for_body(len), Err(ProtocolError::PayloadTooLarge { len }));
        assert!(FrameHeader::for_body((u32::MAX - 4) as usize).is_ok());
    }

    proptest! {
        #[test]
        fn body_length_survives_encoding(len in 0usize..=(u32::MAX - 4) as usize) {
            let header = FrameHeader::for_body(len).unwrap();
            let decoded = FrameHeader::from_bytes(&header.to_bytes()).unwrap();
            prop_assert_eq!(decoded.body_len(), len);
        }
    }
}
