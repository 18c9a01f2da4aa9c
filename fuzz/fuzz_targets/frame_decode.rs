//! Arbitrary bytes through the frame decoder.
//!
//! Decoding must never panic, and anything it accepts must agree with the
//! header it was decoded from.

#![no_main]

use eppwire_proto::{DEFAULT_MAX_FRAME_LEN, FrameHeader, decode_frame};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(Some((body, consumed))) = decode_frame(data, DEFAULT_MAX_FRAME_LEN) else {
        return;
    };

    let header = FrameHeader::from_bytes(data).unwrap();
    assert_eq!(header.body_len(), body.len());
    assert_eq!(consumed, FrameHeader::SIZE + body.len());
    assert_eq!(header.total_len() as usize, consumed);

    let mut encoded = Vec::new();
    eppwire_proto::encode_frame(body, &mut encoded).unwrap();
    assert_eq!(encoded.as_slice(), &data[..consumed]);
});
