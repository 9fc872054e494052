//! Outer frame codec.
//!
//! Every GBXRemote message is framed as a little-endian `u32` length prefix
//! followed by the payload. Requests written by the client carry a 4-byte
//! request handle between the prefix and the XML body, and the client's
//! length prefix covers the handle: `[body_len + 4][handle][body]`. Servers
//! frame their side differently (the prefix excludes the handle); that side
//! lives in [`crate::FrameDecoder`].

use crate::error::ClientError;

/// Handles with the high bit set identify responses to client-initiated
/// calls; handles with the high bit clear identify server-initiated calls.
pub const RESPONSE_HANDLE_BIT: u32 = 0x8000_0000;

/// Hard cap on one outbound request, inclusive of the 8-byte framing.
pub const MAX_REQUEST_SIZE: usize = 4 * 1024 * 1024;

/// Check the size cap before any handle is minted or byte written.
pub fn check_request_size(body_len: usize) -> Result<(), ClientError> {
    let len = body_len + 8;
    if len > MAX_REQUEST_SIZE {
        return Err(ClientError::RequestTooLarge { len });
    }
    Ok(())
}

/// Frame an outbound request: `[body_len + 4][handle][body]`.
pub fn encode_request(handle: u32, body: &[u8]) -> Result<Vec<u8>, ClientError> {
    check_request_size(body.len())?;
    let mut frame = Vec::with_capacity(body.len() + 8);
    frame.extend_from_slice(&((body.len() as u32) + 4).to_le_bytes());
    frame.extend_from_slice(&handle.to_le_bytes());
    frame.extend_from_slice(body);
    Ok(frame)
}

/// Inverse of [`encode_request`] over a complete buffer.
///
/// Returns `None` when the buffer does not hold a whole frame. Trailing
/// bytes after the first frame are ignored.
pub fn decode_request(buf: &[u8]) -> Option<(u32, &[u8])> {
    if buf.len() < 8 {
        return None;
    }
    let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len < 4 || buf.len() < 4 + len {
        return None;
    }
    let handle = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    Some((handle, &buf[8..4 + len]))
}
