//! Server-side event handler trait and callback context.

use std::collections::VecDeque;
use std::net::SocketAddr;

use bytes::Bytes;

use crate::command::{Command, ConnectionId};
use crate::error::ChatwireError;
use crate::protocol::Frame;

/// Identity of a connected peer, passed to every handler callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Connection id, valid until the disconnect callback returns.
    pub id: ConnectionId,
    /// Remote address.
    pub peer: SocketAddr,
}

impl ConnectionInfo {
    /// Remote IP as a string.
    pub fn peer_ip(&self) -> String {
        self.peer.ip().to_string()
    }
}

/// Callbacks invoked on the multiplexer thread.
///
/// Every method has a default that logs the event and drops it. Callbacks
/// run synchronously inside the loop, one at a time and in wire order per
/// connection; a slow callback stalls every connection. To write frames,
/// queue them on the [`ServerContext`]; they are written as soon as the
/// callback returns.
pub trait ServerHandler: Send + 'static {
    /// A connection was accepted and stored.
    fn on_connect(&mut self, ctx: &mut ServerContext<'_>, conn: &ConnectionInfo) {
        let _ = ctx;
        tracing::info!(id = %conn.id, peer = %conn.peer, "client connected");
    }

    /// A complete frame arrived. Heartbeat pings never reach this method.
    fn on_message(&mut self, ctx: &mut ServerContext<'_>, conn: &ConnectionInfo, frame: Frame) {
        let _ = ctx;
        tracing::debug!(
            id = %conn.id,
            msg_type = frame.msg_type,
            len = frame.payload_len(),
            preview = %frame.preview(),
            "unhandled message dropped"
        );
    }

    /// A connection closed. Its slot is already free.
    fn on_disconnect(&mut self, ctx: &mut ServerContext<'_>, conn: &ConnectionInfo) {
        let _ = ctx;
        tracing::info!(id = %conn.id, peer = %conn.peer, "client disconnected");
    }

    /// A transient error. `conn` is the affected connection, if any.
    fn on_error(&mut self, conn: Option<&ConnectionInfo>, error: &ChatwireError) {
        match conn {
            Some(conn) => tracing::warn!(
                id = %conn.id,
                peer = %conn.peer,
                code = error.code(),
                "error with client: {}",
                error
            ),
            None => tracing::warn!(code = error.code(), "server error: {}", error),
        }
    }
}

/// Handler that keeps every default: log and drop.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl ServerHandler for LoggingHandler {}

/// Outbound side of a server callback.
pub struct ServerContext<'a> {
    outbox: &'a mut VecDeque<Command>,
    connection_count: usize,
}

impl<'a> ServerContext<'a> {
    pub(crate) fn new(outbox: &'a mut VecDeque<Command>, connection_count: usize) -> Self {
        Self {
            outbox,
            connection_count,
        }
    }

    /// Queue a frame for one connection.
    pub fn send_to(
        &mut self,
        target: ConnectionId,
        msg_type: impl Into<u16>,
        payload: impl Into<Bytes>,
    ) {
        self.outbox.push_back(Command::send(target, msg_type, payload));
    }

    /// Queue a frame for every connection except `exclude`.
    pub fn broadcast(
        &mut self,
        msg_type: impl Into<u16>,
        payload: impl Into<Bytes>,
        exclude: Option<ConnectionId>,
    ) {
        self.outbox
            .push_back(Command::broadcast(msg_type, payload, exclude));
    }

    /// Queue an arbitrary command.
    pub fn submit(&mut self, command: Command) {
        self.outbox.push_back(command);
    }

    /// Live connections when the callback started.
    pub fn connection_count(&self) -> usize {
        self.connection_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageType;

    #[test]
    fn test_context_queues_in_order() {
        let mut outbox = VecDeque::new();
        let target = ConnectionId::new(1, 0);
        {
            let mut ctx = ServerContext::new(&mut outbox, 3);
            assert_eq!(ctx.connection_count(), 3);
            ctx.send_to(target, MessageType::ChatText, Bytes::from_static(b"one"));
            ctx.broadcast(MessageType::ServerNotice, Bytes::from_static(b"two"), Some(target));
        }

        assert_eq!(outbox.len(), 2);
        assert!(matches!(outbox[0], Command::Send { target: t, .. } if t == target));
        assert!(matches!(outbox[1], Command::Broadcast { exclude: Some(_), .. }));
    }

    #[test]
    fn test_peer_ip() {
        let info = ConnectionInfo {
            id: ConnectionId::new(0, 0),
            peer: "127.0.0.1:5000".parse().unwrap(),
        };
        assert_eq!(info.peer_ip(), "127.0.0.1");
    }
}
