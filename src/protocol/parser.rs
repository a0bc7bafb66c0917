//! Incremental stream parser for reassembling frames from fragmented reads.
//!
//! Implements a two-phase state machine:
//! - `WantHeader`: accumulating the 5 header bytes
//! - `WantPayload`: header decoded, accumulating exactly `length` payload bytes
//!
//! A single [`StreamParser::feed`] call may complete zero, one or many frames,
//! and a frame may span any number of calls. There is no terminal state; a
//! parser lives as long as its connection.
//!
//! # Example
//!
//! ```
//! use chatwire::protocol::{encode_frame, StreamParser};
//!
//! let bytes = encode_frame(1u8, b"hello").unwrap();
//! let mut parser = StreamParser::new();
//!
//! // Data arrives in chunks from the socket
//! assert!(parser.push(&bytes[..3]).unwrap().is_empty());
//! let frames = parser.push(&bytes[3..]).unwrap();
//!
//! assert_eq!(frames.len(), 1);
//! assert_eq!(frames[0].payload(), b"hello");
//! ```

use bytes::Bytes;

use super::wire_format::{Header, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE};
use super::Frame;
use crate::error::{ChatwireError, Result};

/// Parser phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the remaining header bytes.
    WantHeader,
    /// Header decoded, waiting for payload bytes.
    WantPayload,
}

/// Per-connection frame reassembly state.
///
/// The payload buffer is allocated exactly once per frame, sized to the
/// declared length, and handed to the emitted [`Frame`] without copying.
#[derive(Debug)]
pub struct StreamParser {
    phase: Phase,
    header: [u8; HEADER_SIZE],
    header_received: usize,
    pending_type: u8,
    pending_len: u32,
    payload: Vec<u8>,
    max_payload_size: u32,
}

impl StreamParser {
    /// Create a parser with the default payload cap.
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Create a parser that rejects headers declaring more than `max_payload_size` bytes.
    pub fn with_max_payload(max_payload_size: u32) -> Self {
        Self {
            phase: Phase::WantHeader,
            header: [0u8; HEADER_SIZE],
            header_received: 0,
            pending_type: 0,
            pending_len: 0,
            payload: Vec::new(),
            max_payload_size,
        }
    }

    /// Feed raw bytes, invoking `on_frame` for every frame completed.
    ///
    /// Returns the number of frames emitted.
    ///
    /// # Errors
    ///
    /// Fails if a header declares a payload above the configured maximum, or
    /// if the payload buffer cannot be allocated. Frames completed earlier in
    /// the same call have already been emitted. The stream is desynchronized
    /// afterwards; the caller should drop the connection.
    pub fn feed<F>(&mut self, data: &[u8], mut on_frame: F) -> Result<usize>
    where
        F: FnMut(Frame),
    {
        let mut consumed = 0;
        let mut emitted = 0;

        while consumed < data.len() {
            let input = &data[consumed..];

            match self.phase {
                Phase::WantHeader => {
                    let needed = HEADER_SIZE - self.header_received;
                    let take = needed.min(input.len());

                    self.header[self.header_received..self.header_received + take]
                        .copy_from_slice(&input[..take]);
                    self.header_received += take;
                    consumed += take;

                    if self.header_received < HEADER_SIZE {
                        continue;
                    }

                    let header = Header::from_array(&self.header);
                    self.begin_frame(header)?;

                    if header.payload_length == 0 {
                        on_frame(Frame::new(header.msg_type, Bytes::new()));
                        emitted += 1;
                        self.reset();
                    }
                }

                Phase::WantPayload => {
                    let needed = self.pending_len as usize - self.payload.len();
                    let take = needed.min(input.len());

                    self.payload.extend_from_slice(&input[..take]);
                    consumed += take;

                    if self.payload.len() == self.pending_len as usize {
                        let payload = Bytes::from(std::mem::take(&mut self.payload));
                        on_frame(Frame::new(self.pending_type, payload));
                        emitted += 1;
                        self.reset();
                    }
                }
            }
        }

        Ok(emitted)
    }

    /// Feed raw bytes and collect every completed frame.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        let mut frames = Vec::new();
        self.feed(data, |frame| frames.push(frame))?;
        Ok(frames)
    }

    /// Validate a decoded header and size the payload buffer for it.
    fn begin_frame(&mut self, header: Header) -> Result<()> {
        if header.payload_length > self.max_payload_size {
            return Err(ChatwireError::PayloadTooLarge {
                len: header.payload_length as usize,
                max: self.max_payload_size,
            });
        }

        self.pending_type = header.msg_type;
        self.pending_len = header.payload_length;

        if header.payload_length > 0 {
            let mut payload = Vec::new();
            payload
                .try_reserve_exact(header.payload_length as usize)
                .map_err(|e| {
                    ChatwireError::Protocol(format!(
                        "cannot allocate {} byte payload: {}",
                        header.payload_length, e
                    ))
                })?;
            self.payload = payload;
            self.phase = Phase::WantPayload;
        }

        Ok(())
    }

    fn reset(&mut self) {
        self.phase = Phase::WantHeader;
        self.header_received = 0;
        self.pending_type = 0;
        self.pending_len = 0;
        self.payload = Vec::new();
    }

    /// Discard any partial frame.
    pub fn clear(&mut self) {
        self.reset();
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Bytes of the in-progress frame buffered so far.
    pub fn buffered(&self) -> usize {
        match self.phase {
            Phase::WantHeader => self.header_received,
            Phase::WantPayload => HEADER_SIZE + self.payload.len(),
        }
    }

    /// Configured payload cap.
    pub fn max_payload_size(&self) -> u32 {
        self.max_payload_size
    }
}

impl Default for StreamParser {
    fn default() -> Self {
        Self::new()
    }
}
