//! Work items submitted to the server multiplexer.

use std::fmt;

use bytes::Bytes;

use crate::error::Result;
use crate::protocol::encode_frame;

/// Identifies one live connection on a server.
///
/// Combines the slot index with a generation counter, so an id held after
/// its connection closed never addresses a newer connection in the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId {
    index: u32,
    generation: u32,
}

impl ConnectionId {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index in the connection table.
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Generation of the slot when this connection was stored.
    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.index, self.generation)
    }
}

/// A request for the multiplexer thread to write frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Send one frame to one connection.
    Send {
        target: ConnectionId,
        msg_type: u16,
        payload: Bytes,
    },
    /// Send one frame to every connection except `exclude`.
    Broadcast {
        msg_type: u16,
        payload: Bytes,
        exclude: Option<ConnectionId>,
    },
}

impl Command {
    /// Build a send command.
    pub fn send(target: ConnectionId, msg_type: impl Into<u16>, payload: impl Into<Bytes>) -> Self {
        Command::Send {
            target,
            msg_type: msg_type.into(),
            payload: payload.into(),
        }
    }

    /// Build a broadcast command.
    pub fn broadcast(
        msg_type: impl Into<u16>,
        payload: impl Into<Bytes>,
        exclude: Option<ConnectionId>,
    ) -> Self {
        Command::Broadcast {
            msg_type: msg_type.into(),
            payload: payload.into(),
            exclude,
        }
    }

    /// Logical message type carried by this command.
    pub fn msg_type(&self) -> u16 {
        match self {
            Command::Send { msg_type, .. } | Command::Broadcast { msg_type, .. } => *msg_type,
        }
    }

    /// Encode the frame this command writes.
    pub fn encode(&self) -> Result<Bytes> {
        match self {
            Command::Send {
                msg_type, payload, ..
            }
            | Command::Broadcast {
                msg_type, payload, ..
            } => encode_frame(*msg_type, payload),
        }
    }
}
