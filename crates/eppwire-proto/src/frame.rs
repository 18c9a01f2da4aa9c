//! Whole-frame helpers over in-memory buffers.
//!
//! Stream-based reading goes through the retry loop in `eppwire-core`; these
//! helpers serve buffers that already hold the bytes (test servers, fuzzing,
//! captured writes).

use crate::{errors::Result, header::FrameHeader};

/// Append `header || payload` to `out`.
pub fn encode_frame(payload: &[u8], out: &mut Vec<u8>) -> Result<()> {
    let header = FrameHeader::for_body(payload.len())?;
    out.reserve(FrameHeader::SIZE + payload.len());
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(payload);
    Ok(())
}

/// Decode one frame from the front of `buf`.
///
/// Returns `Ok(None)` while `buf` holds less than a complete frame, otherwise
/// the body and the number of bytes consumed.
pub fn decode_frame(buf: &[u8], max_frame_len: u32) -> Result<Option<(&[u8], usize)>> {
    if buf.len() < FrameHeader::SIZE {
        return Ok(None);
    }

    let header = FrameHeader::from_bytes(buf)?;
    header.check_limit(max_frame_len)?;

    let consumed = header.total_len() as usize;
    match buf.get(FrameHeader::SIZE..consumed) {
        Some(body) => Ok(Some((body, consumed))),
        None => Ok(None),
    }
}
