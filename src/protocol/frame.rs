//! Frame struct with typed accessors.
//!
//! Represents one complete decoded frame: wire type byte plus payload.
//! Uses `bytes::Bytes` so payloads can be handed to handlers and re-sent
//! without copying.
//!
//! # Example
//!
//! ```
//! use chatwire::protocol::{Frame, MessageType};
//! use bytes::Bytes;
//!
//! let frame = Frame::new(MessageType::ChatText.wire_code(), Bytes::from_static(b"hello"));
//!
//! assert!(frame.is(MessageType::ChatText));
//! assert_eq!(frame.payload(), b"hello");
//! ```

use bytes::Bytes;

use super::wire_format::{encode_frame, MessageType};
use crate::error::Result;

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Wire message type (low byte of the logical type).
    pub msg_type: u8,
    /// Payload bytes.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(msg_type: u8, payload: Bytes) -> Self {
        Self { msg_type, payload }
    }

    /// Create a frame from raw bytes (copies data).
    pub fn from_parts(msg_type: u8, payload: &[u8]) -> Self {
        Self {
            msg_type,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get the payload length.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Reserved type this frame carries, if any.
    #[inline]
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_wire(self.msg_type)
    }

    /// Check the wire byte against a reserved type.
    #[inline]
    pub fn is(&self, msg_type: MessageType) -> bool {
        self.msg_type == msg_type.wire_code()
    }

    /// Payload as UTF-8 text, if valid.
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// Encode back to wire bytes.
    pub fn encode(&self) -> Result<Bytes> {
        encode_frame(self.msg_type, &self.payload)
    }

    /// Short printable form of the payload for log lines.
    ///
    /// Chat text shows up to 255 bytes, lossily decoded. Anything else shows
    /// the first 32 bytes as hex.
    pub fn preview(&self) -> String {
        if self.is(MessageType::ChatText) {
            let end = self.payload.len().min(TEXT_PREVIEW_LEN);
            return String::from_utf8_lossy(&self.payload[..end]).into_owned();
        }

        let end = self.payload.len().min(HEX_PREVIEW_LEN);
        let mut out = String::with_capacity(end * 3);
        for (i, byte) in self.payload[..end].iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            out.push_str(&format!("{:02x}", byte));
        }
        if self.payload.len() > end {
            out.push_str(" ..");
        }
        out
    }
}

const TEXT_PREVIEW_LEN: usize = 255;
const HEX_PREVIEW_LEN: usize = 32;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::HEADER_SIZE;

    #[test]
    fn test_frame_accessors() {
        let frame = Frame::from_parts(1, b"hi there");
        assert_eq!(frame.payload_len(), 8);
        assert_eq!(frame.text(), Some("hi there"));
        assert_eq!(frame.message_type(), Some(MessageType::ChatText));
    }

    #[test]
    fn test_frame_is_compares_wire_byte() {
        let frame = Frame::new(132, Bytes::new());
        assert!(frame.is(MessageType::Ping));
        assert!(!frame.is(MessageType::Pong));
    }

    #[test]
    fn test_unknown_type() {
        let frame = Frame::new(77, Bytes::new());
        assert_eq!(frame.message_type(), None);
    }

    #[test]
    fn test_frame_encode() {
        let frame = Frame::from_parts(5, b"xyz");
        let bytes = frame.encode().unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + 3);
        assert_eq!(&bytes[HEADER_SIZE..], b"xyz");
    }

    #[test]
    fn test_preview_text_is_capped() {
        let long = "a".repeat(300);
        let frame = Frame::from_parts(1, long.as_bytes());
        assert_eq!(frame.preview().len(), 255);
    }

    #[test]
    fn test_preview_binary_as_hex() {
        let frame = Frame::from_parts(11, &[0x00, 0xAB, 0x10]);
        assert_eq!(frame.preview(), "00 ab 10");

        let frame = Frame::from_parts(11, &[0u8; 40]);
        assert!(frame.preview().ends_with(" .."));
    }

    #[test]
    fn test_invalid_utf8_text() {
        let frame = Frame::from_parts(1, &[0xFF, 0xFE]);
        assert!(frame.text().is_none());
    }
}
