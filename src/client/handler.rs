//! Client-side event handler trait and callback context.

use std::collections::VecDeque;
use std::net::SocketAddr;

use bytes::Bytes;

use crate::error::{ChatwireError, Result};
use crate::protocol::{encode_frame, Frame, MessageType};

/// Callbacks invoked by the session loop.
///
/// Every method has a default that logs the event. Callbacks run on the
/// thread that called [`Client::run`](super::Client::run).
pub trait ClientHandler {
    /// The session loop started.
    fn on_connect(&mut self, ctx: &mut ClientContext<'_>, server: SocketAddr) {
        let _ = ctx;
        tracing::info!(%server, "connected to server");
    }

    /// A complete frame arrived.
    fn on_message(&mut self, ctx: &mut ClientContext<'_>, frame: Frame) {
        let _ = ctx;
        tracing::info!(
            msg_type = frame.msg_type,
            len = frame.payload_len(),
            preview = %frame.preview(),
            "message received"
        );
    }

    /// The connection is gone. Called once, after any `on_error` for the
    /// failure that ended it.
    fn on_disconnect(&mut self, server: SocketAddr) {
        tracing::info!(%server, "disconnected from server");
    }

    /// A read, decode or write failed.
    fn on_error(&mut self, error: &ChatwireError) {
        tracing::warn!(code = error.code(), "client error: {}", error);
    }
}

/// Handler that keeps every default.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingClientHandler;

impl ClientHandler for LoggingClientHandler {}

/// Outbound side of a client callback. Frames are written after the
/// callback returns, in the order queued.
pub struct ClientContext<'a> {
    outbox: &'a mut VecDeque<Bytes>,
}

impl<'a> ClientContext<'a> {
    pub(crate) fn new(outbox: &'a mut VecDeque<Bytes>) -> Self {
        Self { outbox }
    }

    /// Queue one frame. Encoding errors are returned immediately.
    pub fn send(&mut self, msg_type: impl Into<u16>, payload: &[u8]) -> Result<()> {
        let frame = encode_frame(msg_type, payload)?;
        self.outbox.push_back(frame);
        Ok(())
    }

    /// Queue a chat text frame.
    pub fn send_text(&mut self, text: &str) -> Result<()> {
        self.send(MessageType::ChatText, text.as_bytes())
    }

    /// Queue a heartbeat ping.
    pub fn ping(&mut self) -> Result<()> {
        self.send(MessageType::Ping, &[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::HEADER_SIZE;

    #[test]
    fn test_context_encodes_frames() {
        let mut outbox = VecDeque::new();
        {
            let mut ctx = ClientContext::new(&mut outbox);
            ctx.send_text("hey").unwrap();
            ctx.ping().unwrap();
        }

        assert_eq!(outbox.len(), 2);
        assert_eq!(&outbox[0][..], &[1, 0, 0, 0, 3, b'h', b'e', b'y']);
        assert_eq!(outbox[1].len(), HEADER_SIZE);
        assert_eq!(outbox[1][0], 132);
    }
}
