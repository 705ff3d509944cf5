//! The wire-level frame format of the Squad RCON variant. The constants and the
//! codec are used consistently across the connection layer and the tests.
//!
//! One frame on the wire, little-endian:
//!
//! ```text
//! offset 0   4 bytes   size: number of bytes that follow this field
//! offset 4   1 byte    low id byte
//! offset 5   1 byte    high id byte (0 in practice, sign-carrying for -1)
//! offset 6   2 bytes   count (the command sequence)
//! offset 8   4 bytes   type
//! offset 12  size-10   body (UTF-8)
//! end        2 bytes   two zero bytes
//! ```
//!
//! The smallest legal frame carries an empty body: size = 10, 14 bytes total.
//! Some server builds additionally emit a 21-byte stub that claims size 10 but
//! carries a recognizable zero pattern where the trailer should be; see
//! [`broken_stub_len`].

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// A command response. Frames with the MID id carry payload, the END id closes
/// the response.
pub const RESPONSE_VALUE: u32 = 0;
/// Unsolicited chat traffic. Vendor extension, never answers a command.
pub const CHAT_VALUE: u32 = 1;
/// A command request (client to server).
pub const EXEC_COMMAND: u32 = 2;
/// The answer to an AUTH frame. Shares the numeric value of [`EXEC_COMMAND`],
/// direction disambiguates.
pub const AUTH_RESPONSE: u32 = 2;
/// The authentication request carrying the password.
pub const AUTH: u32 = 3;

/// Id marking a frame as an intermediate part of a response.
pub const MID: i16 = 1;
/// Id marking the final frame of a response (and all client frames).
pub const END: i16 = 2;
/// Id the server answers an AUTH frame with when the password was wrong.
pub const AUTH_FAILED: i16 = -1;

/// The server never sends bodies above this; we never encode them either.
pub const MAX_BODY_LEN: usize = 4096;

/// Frame bytes that are not body: id (2) + count (2) + type (4) + trailer (2).
const FRAME_OVERHEAD: usize = 10;
/// The size prefix itself.
const SIZE_FIELD_LEN: usize = 4;
/// Total length of the smallest legal frame (empty body).
pub const MIN_FRAME_LEN: usize = SIZE_FIELD_LEN + FRAME_OVERHEAD;
/// Total length of the broken stub some server builds emit.
pub const BROKEN_STUB_LEN: usize = 21;

/// One decoded (or to-be-encoded) frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// MID / END / AUTH_FAILED. Low byte at offset 4, high byte at offset 5.
    pub id: i16,
    /// The sequence this frame belongs to.
    pub count: u16,
    /// One of the type constants above.
    pub kind: u32,
    /// The raw body without the zero trailer.
    pub body: Bytes,
}

impl Frame {
    /// The body interpreted as UTF-8, lossy. Server output is plain ASCII in
    /// practice but nothing guarantees it.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Reasons a byte sequence at the stream head cannot be a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The size field claims fewer bytes than the fixed frame overhead.
    #[error("frame size {0} below minimum of 10")]
    SizeTooSmall(u32),
    /// The size field implies a body beyond [`MAX_BODY_LEN`].
    #[error("frame body of {0} bytes exceeds the 4096 byte cap")]
    SizeExceeded(u32),
    /// The two trailing bytes were not zero.
    #[error("frame trailer bytes are not zero")]
    BadTrailer,
}

/// The outcome of one decode attempt against the head of a read buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// Not enough bytes buffered yet; at least `need` more are required.
    Incomplete { need: usize },
    /// A complete frame. The caller consumes `consumed` bytes on success.
    Frame { frame: Frame, consumed: usize },
    /// The head of the buffer is not a legal frame.
    Malformed(DecodeError),
}

/// Attempts to decode one frame from the head of `buf` without consuming it.
///
/// The buffer is never mutated; on [`Decoded::Frame`] the caller advances the
/// buffer by `consumed` bytes itself, which keeps frame boundary ownership in
/// the connection layer.
pub fn decode(buf: &[u8]) -> Decoded {
    if buf.len() < SIZE_FIELD_LEN {
        return Decoded::Incomplete {
            need: SIZE_FIELD_LEN - buf.len(),
        };
    }
    let size = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if (size as usize) < FRAME_OVERHEAD {
        return Decoded::Malformed(DecodeError::SizeTooSmall(size));
    }
    let body_len = size as usize - FRAME_OVERHEAD;
    if body_len > MAX_BODY_LEN {
        return Decoded::Malformed(DecodeError::SizeExceeded(size));
    }
    let total = SIZE_FIELD_LEN + size as usize;
    if buf.len() < total {
        return Decoded::Incomplete {
            need: total - buf.len(),
        };
    }
    if buf[total - 2] != 0 || buf[total - 1] != 0 {
        return Decoded::Malformed(DecodeError::BadTrailer);
    }
    let id = i16::from_le_bytes([buf[4], buf[5]]);
    let count = u16::from_le_bytes([buf[6], buf[7]]);
    let kind = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
    let body = Bytes::copy_from_slice(&buf[12..12 + body_len]);
    Decoded::Frame {
        frame: Frame {
            id,
            count,
            kind,
            body,
        },
        consumed: total,
    }
}

/// Recognizes the broken 21-byte stub some server builds reply with.
///
/// The stub claims size 10 but continues with `00 00 00 01 00 00 00` where a
/// legal empty frame would have ended. A well-formed empty frame followed by
/// another frame can never match: every legal follow-up frame carries a
/// non-zero low id byte at the position the pattern requires to be zero.
///
/// Returns the number of bytes to skip when the stub sits at the buffer head.
pub fn broken_stub_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < BROKEN_STUB_LEN {
        return None;
    }
    let size = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if size != FRAME_OVERHEAD as u32 {
        return None;
    }
    const PATTERN: [u8; 7] = [0, 0, 0, 1, 0, 0, 0];
    if buf[12..19] == PATTERN {
        Some(BROKEN_STUB_LEN)
    } else {
        None
    }
}

/// Encodes a single frame.
pub fn encode(kind: u32, id: i16, count: u16, body: &[u8]) -> Result<Bytes, EncodeError> {
    if body.len() > MAX_BODY_LEN {
        return Err(EncodeError::BodyTooLarge(body.len()));
    }
    let size = (FRAME_OVERHEAD + body.len()) as u32;
    let mut msg = BytesMut::with_capacity(SIZE_FIELD_LEN + size as usize);
    msg.put_u32_le(size);
    msg.put_i16_le(id);
    msg.put_u16_le(count);
    msg.put_u32_le(kind);
    msg.put_slice(body);
    msg.put_u8(0);
    msg.put_u8(0);
    Ok(msg.freeze())
}

/// Encodes a command as the two back-to-back frames the server expects:
/// the command text with the MID id, then an empty END frame that makes the
/// server terminate its (possibly multi-frame) response.
pub fn encode_command(seq: u16, command: &str) -> Result<Bytes, EncodeError> {
    let first = encode(EXEC_COMMAND, MID, seq, command.as_bytes())?;
    let second = encode(EXEC_COMMAND, END, seq, b"")?;
    let mut msg = BytesMut::with_capacity(first.len() + second.len());
    msg.put_slice(&first);
    msg.put_slice(&second);
    Ok(msg.freeze())
}

/// Encodes the single authentication frame.
pub fn encode_auth(seq: u16, password: &str) -> Result<Bytes, EncodeError> {
    encode(AUTH, END, seq, password.as_bytes())
}

/// The only way encoding can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// The body exceeds [`MAX_BODY_LEN`].
    #[error("frame body of {0} bytes exceeds the 4096 byte cap")]
    BodyTooLarge(usize),
}
