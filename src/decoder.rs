//! Receive state machine.
//!
//! TCP hands the reader arbitrary chunks; frames split and coalesce freely.
//! [`FrameDecoder`] buffers the chunks and yields complete messages, one per
//! [`FrameDecoder::next`] call, so the reader drains it with a plain
//! `while let` loop instead of recursing on leftover bytes.
//!
//! The length prefix means two different things over the life of a
//! connection. The handshake banner is framed as `[len][banner]`, nothing
//! else. Every frame after it is `[len][handle][body]` where `len` counts
//! only the body, so the decoder must wait for `len + 4` bytes. The decoder
//! tracks which regime applies itself: the banner is only ever the first
//! message on the wire.

use bytes::{Buf, BytesMut};

use crate::frame::RESPONSE_HANDLE_BIT;

/// One complete message off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// The handshake payload. Yielded at most once, before anything else.
    Banner(Vec<u8>),
    /// A response to a client-initiated call (handle high bit set).
    Reply { handle: u32, body: Vec<u8> },
    /// A server-initiated call (handle high bit clear).
    Call { handle: u32, body: Vec<u8> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Handshake,
    Framed,
}

/// Incremental decoder over the session's receive buffer.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    /// Length of the next frame once its prefix has been consumed.
    expected: Option<usize>,
    stage: Stage,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
            expected: None,
            stage: Stage::Handshake,
        }
    }

    /// Append a chunk read from the socket.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Yield the next complete message, or `None` until more bytes arrive.
    pub fn next(&mut self) -> Option<Decoded> {
        loop {
            match self.expected {
                None => {
                    if self.buf.len() < 4 {
                        return None;
                    }
                    let len =
                        u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]])
                            as usize;
                    self.buf.advance(4);
                    self.expected = Some(match self.stage {
                        Stage::Handshake => len,
                        // The server's length excludes the handle.
                        Stage::Framed => len + 4,
                    });
                }
                Some(need) => {
                    if self.buf.len() < need {
                        return None;
                    }
                    let frame = self.buf.split_to(need);
                    self.expected = None;
                    match self.stage {
                        Stage::Handshake => {
                            self.stage = Stage::Framed;
                            return Some(Decoded::Banner(frame.to_vec()));
                        }
                        Stage::Framed => {
                            let handle =
                                u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);
                            let body = frame[4..].to_vec();
                            return Some(if handle & RESPONSE_HANDLE_BIT != 0 {
                                Decoded::Reply { handle, body }
                            } else {
                                Decoded::Call { handle, body }
                            });
                        }
                    }
                }
            }
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
