//! Protocol module - wire format, framing, and frame reassembly.
//!
//! This module implements the binary framing used on every connection:
//! - 5-byte header encoding/decoding (type byte + big-endian length)
//! - Incremental stream parser for fragmented reads
//! - Frame struct with typed accessors

mod frame;
mod parser;
mod wire_format;

pub use frame::Frame;
pub use parser::{Phase, StreamParser};
pub use wire_format::{
    encode_frame, encode_frame_into, wire_code, Header, MessageType, ABSOLUTE_MAX_PAYLOAD_SIZE,
    DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE,
};
