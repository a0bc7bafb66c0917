//! Wire format encoding and decoding.
//!
//! Implements the 5-byte header format:
//! ```text
//! ┌──────────┬──────────┬─────────────────┐
//! │ Type     │ Length   │ Payload         │
//! │ 1 byte   │ 4 bytes  │ Length bytes    │
//! │          │ uint32 BE│                 │
//! └──────────┴──────────┴─────────────────┘
//! ```
//!
//! Only the low byte of a logical message type travels on the wire. The
//! reserved [`MessageType::Ping`] (900) and [`MessageType::Pong`] (901) are
//! therefore seen by peers as 132 and 133.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ChatwireError, Result};

/// Header size in bytes (fixed, exactly 5).
pub const HEADER_SIZE: usize = 5;

/// Default maximum payload size accepted by a parser (16 MiB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Largest payload the length field can describe.
pub const ABSOLUTE_MAX_PAYLOAD_SIZE: u32 = u32::MAX;

/// Reserved logical message types.
///
/// Values above 255 are truncated to their low byte on the wire; compare
/// against [`MessageType::wire_code`], never against the logical value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageType {
    ChatText = 1,

    FileInfo = 10,
    FileChunk = 11,
    FileEnd = 12,
    FileRequest = 13,

    UserLoginRequest = 100,
    UserLoginResponse = 101,

    UserJoinNotice = 200,
    UserLeaveNotice = 201,
    ServerNotice = 202,

    ErrorResponse = 500,

    Ping = 900,
    Pong = 901,
}

impl MessageType {
    const ALL: [MessageType; 13] = [
        MessageType::ChatText,
        MessageType::FileInfo,
        MessageType::FileChunk,
        MessageType::FileEnd,
        MessageType::FileRequest,
        MessageType::UserLoginRequest,
        MessageType::UserLoginResponse,
        MessageType::UserJoinNotice,
        MessageType::UserLeaveNotice,
        MessageType::ServerNotice,
        MessageType::ErrorResponse,
        MessageType::Ping,
        MessageType::Pong,
    ];

    /// Logical (possibly > 255) value.
    #[inline]
    pub fn logical(self) -> u16 {
        self as u16
    }

    /// The byte that actually appears on the wire.
    #[inline]
    pub fn wire_code(self) -> u8 {
        wire_code(self.logical())
    }

    /// Map a wire byte back to a reserved type.
    ///
    /// The reserved codes stay distinct after truncation, so e.g. 132 always
    /// resolves to `Ping` and 244 to `ErrorResponse`.
    pub fn from_wire(code: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.wire_code() == code)
    }
}

impl From<MessageType> for u16 {
    fn from(t: MessageType) -> Self {
        t.logical()
    }
}

/// Truncate a logical type to its wire byte.
#[inline]
pub fn wire_code(logical: u16) -> u8 {
    (logical & 0xFF) as u8
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Wire message type.
    pub msg_type: u8,
    /// Payload length in bytes.
    pub payload_length: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(msg_type: u8, payload_length: u32) -> Self {
        Self {
            msg_type,
            payload_length,
        }
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use chatwire::protocol::Header;
    ///
    /// let bytes = Header::new(1, 256).encode();
    /// assert_eq!(bytes, [1, 0, 0, 1, 0]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = self.msg_type;
        buf[1..5].copy_from_slice(&self.payload_length.to_be_bytes());
        buf
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        let header: &[u8; HEADER_SIZE] = buf.get(..HEADER_SIZE)?.try_into().ok()?;
        Some(Self::from_array(header))
    }

    /// Decode a complete header.
    pub fn from_array(buf: &[u8; HEADER_SIZE]) -> Self {
        Self {
            msg_type: buf[0],
            payload_length: u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]),
        }
    }

    /// Total frame size described by this header.
    #[inline]
    pub fn frame_size(&self) -> usize {
        HEADER_SIZE + self.payload_length as usize
    }
}

fn payload_length(payload: &[u8]) -> Result<u32> {
    u32::try_from(payload.len()).map_err(|_| ChatwireError::PayloadTooLarge {
        len: payload.len(),
        max: ABSOLUTE_MAX_PAYLOAD_SIZE,
    })
}

/// Encode a frame into `out`, returning the number of bytes written.
///
/// The type is truncated to its low byte. If `out` is shorter than
/// `HEADER_SIZE + payload.len()` nothing is written and
/// [`ChatwireError::BufferTooSmall`] is returned.
///
/// # Example
///
/// ```
/// use chatwire::protocol::{encode_frame_into, MessageType};
///
/// let mut buf = [0u8; 16];
/// let n = encode_frame_into(MessageType::ChatText, b"hi", &mut buf).unwrap();
/// assert_eq!(&buf[..n], &[1, 0, 0, 0, 2, b'h', b'i']);
/// ```
pub fn encode_frame_into(
    msg_type: impl Into<u16>,
    payload: &[u8],
    out: &mut [u8],
) -> Result<usize> {
    let length = payload_length(payload)?;
    let frame_size = HEADER_SIZE + payload.len();

    if out.len() < frame_size {
        return Err(ChatwireError::BufferTooSmall {
            needed: frame_size,
            available: out.len(),
        });
    }

    let header = Header::new(wire_code(msg_type.into()), length);
    out[..HEADER_SIZE].copy_from_slice(&header.encode());
    out[HEADER_SIZE..frame_size].copy_from_slice(payload);
    Ok(frame_size)
}

/// Encode a frame into a freshly allocated buffer sized exactly to the frame.
pub fn encode_frame(msg_type: impl Into<u16>, payload: &[u8]) -> Result<Bytes> {
    let length = payload_length(payload)?;
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_u8(wire_code(msg_type.into()));
    buf.put_u32(length);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_decode_roundtrip() {
        let original = Header::new(7, 100);
        let decoded = Header::decode(&original.encode()).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_header_big_endian_byte_order() {
        let bytes = Header::new(0xAB, 0x01020304).encode();
        assert_eq!(bytes, [0xAB, 0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_decode_too_short_buffer() {
        assert!(Header::decode(&[0u8; 4]).is_none());
    }

    #[test]
    fn test_encode_into_exact_buffer() {
        let mut buf = [0u8; HEADER_SIZE + 3];
        let n = encode_frame_into(3u8, b"abc", &mut buf).unwrap();
        assert_eq!(n, 8);
        assert_eq!(buf, [3, 0, 0, 0, 3, b'a', b'b', b'c']);
    }

    #[test]
    fn test_encode_into_too_small_writes_nothing() {
        let mut buf = [0xEEu8; HEADER_SIZE + 2];
        let result = encode_frame_into(1u8, b"abc", &mut buf);

        assert!(matches!(
            result,
            Err(ChatwireError::BufferTooSmall {
                needed: 8,
                available: 7
            })
        ));
        assert!(buf.iter().all(|&b| b == 0xEE));
    }

    #[test]
    fn test_encode_empty_payload() {
        let frame = encode_frame(MessageType::FileEnd, &[]).unwrap();
        assert_eq!(&frame[..], &[12, 0, 0, 0, 0]);
    }

    #[test]
    fn test_logical_type_truncated() {
        let frame = encode_frame(MessageType::Pong, b"").unwrap();
        assert_eq!(frame[0], 133);
        assert_eq!(MessageType::Ping.wire_code(), 132);
        assert_eq!(wire_code(0x1FF), 0xFF);
    }

    #[test]
    fn test_from_wire() {
        assert_eq!(MessageType::from_wire(1), Some(MessageType::ChatText));
        assert_eq!(MessageType::from_wire(132), Some(MessageType::Ping));
        assert_eq!(MessageType::from_wire(244), Some(MessageType::ErrorResponse));
        assert_eq!(MessageType::from_wire(99), None);
    }

    #[test]
    fn test_wire_codes_are_distinct() {
        let mut codes: Vec<u8> = MessageType::ALL.iter().map(|t| t.wire_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), MessageType::ALL.len());
    }
}
