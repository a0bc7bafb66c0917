//! Chat relay server.
//!
//! This example demonstrates:
//! - Implementing `ServerHandler` with a relay policy
//! - Answering a client directly and broadcasting to everyone else
//! - Receiving files with `FileAssembler`
//! - Stopping the server from another thread via `ServerHandle`
//!
//! # Running
//!
//! ```text
//! RUST_LOG=debug cargo run --example echo_server -- 9000
//! ```
//!
//! Type `quit` on stdin to stop.

use std::io::BufRead;

use chatwire::protocol::{Frame, MessageType};
use chatwire::{ConnectionInfo, FileAssembler, ServerBuilder, ServerContext, ServerHandler};
use tracing::{info, warn};

/// Echoes chat text to its sender and relays it to every other client.
struct Relay {
    files: FileAssembler,
}

impl ServerHandler for Relay {
    fn on_connect(&mut self, ctx: &mut ServerContext<'_>, conn: &ConnectionInfo) {
        info!(id = %conn.id, peer = %conn.peer, online = ctx.connection_count(), "joined");
        let notice = format!("{} joined", conn.peer_ip());
        ctx.broadcast(MessageType::UserJoinNotice, notice.into_bytes(), Some(conn.id));
    }

    fn on_message(&mut self, ctx: &mut ServerContext<'_>, conn: &ConnectionInfo, frame: Frame) {
        match frame.message_type() {
            Some(MessageType::ChatText) => {
                ctx.send_to(conn.id, MessageType::ChatText, frame.payload.clone());
                ctx.broadcast(MessageType::ChatText, frame.payload, Some(conn.id));
            }
            Some(MessageType::FileInfo | MessageType::FileChunk | MessageType::FileEnd) => {
                match self.files.accept(&frame) {
                    Ok(Some(file)) => {
                        info!(file = %file.info.filename, bytes = file.data.len(), "file received")
                    }
                    Ok(None) => {}
                    Err(e) => warn!(id = %conn.id, error = %e, "file transfer failed"),
                }
            }
            _ => info!(id = %conn.id, msg_type = frame.msg_type, "ignored"),
        }
    }

    fn on_disconnect(&mut self, ctx: &mut ServerContext<'_>, conn: &ConnectionInfo) {
        info!(id = %conn.id, "left");
        let notice = format!("{} left", conn.peer_ip());
        ctx.broadcast(MessageType::UserLeaveNotice, notice.into_bytes(), None);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("chatwire=info".parse()?),
        )
        .init();

    let port = match std::env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => 9000,
    };

    let mut server = ServerBuilder::new(port).max_connections(32).bind(Relay {
        files: FileAssembler::new(),
    })?;
    server.start()?;
    info!(addr = %server.local_addr(), "type 'quit' to stop");

    let handle = server.handle();
    for line in std::io::stdin().lock().lines() {
        let line = line?;
        if line.trim() == "quit" {
            break;
        }
        handle.broadcast(MessageType::ServerNotice, line.into_bytes(), None)?;
    }

    server.shutdown();
    Ok(())
}
