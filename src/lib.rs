//! # chatwire
//!
//! Length-prefixed chat transport over TCP.
//!
//! Every message on the wire is one frame: a 5-byte header (type byte plus
//! big-endian payload length) followed by the payload.
//!
//! ## Architecture
//!
//! - **Codec** ([`protocol`]): frame encoding and an incremental parser that
//!   reassembles frames from arbitrarily fragmented reads
//! - **Server** ([`Server`]): one multiplexer thread serving a bounded table
//!   of connections, fed by a thread-safe [`CommandQueue`]
//! - **Client** ([`Client`]): one session loop per connection
//!
//! Both loops stop promptly when signalled from another thread.
//!
//! ## Example
//!
//! ```no_run
//! use chatwire::protocol::Frame;
//! use chatwire::{ConnectionInfo, Server, ServerContext, ServerHandler};
//!
//! struct Relay;
//!
//! impl ServerHandler for Relay {
//!     fn on_message(&mut self, ctx: &mut ServerContext<'_>, conn: &ConnectionInfo, frame: Frame) {
//!         ctx.broadcast(frame.msg_type, frame.payload, Some(conn.id));
//!     }
//! }
//!
//! fn main() -> chatwire::Result<()> {
//!     let mut server = Server::new(9000, 32, Relay)?;
//!     server.start()?;
//!     std::thread::park();
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod protocol;
pub mod transfer;

mod client;
mod command;
mod queue;
mod server;
mod writer;

pub use client::{
    Client, ClientConfig, ClientContext, ClientHandle, ClientHandler, LoggingClientHandler,
    SessionEnd,
};
pub use command::{Command, ConnectionId};
pub use error::{ChatwireError, Result};
pub use queue::CommandQueue;
pub use server::{
    ConnectionInfo, LoggingHandler, Server, ServerBuilder, ServerConfig, ServerContext,
    ServerHandle, ServerHandler, ServerState, DEFAULT_MAX_CONNECTIONS, DEFAULT_READ_BUFFER_SIZE,
    SERVER_FULL_MESSAGE,
};
pub use transfer::{FileAssembler, FileInfo, ReceivedFile, FILE_CHUNK_SIZE};
pub use writer::write_frame;
