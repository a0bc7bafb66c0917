//! The server event loop.
//!
//! One task owns the listener, the connection table and the handler. Reader
//! tasks on the same current-thread runtime forward raw chunks over a
//! channel; all parsing, callbacks and writes happen here, so every callback
//! runs on the multiplexer thread in wire order per connection.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::handler::{ConnectionInfo, ServerContext, ServerHandler};
use super::slots::Slots;
use super::{ServerConfig, ServerState, Shared};
use crate::command::{Command, ConnectionId};
use crate::error::ChatwireError;
use crate::protocol::{encode_frame, Frame, MessageType, StreamParser};
use crate::writer::write_frame;

/// Text of the error frame sent to a peer when the table is full.
pub const SERVER_FULL_MESSAGE: &str = "server is already filled up. please try again later.";

const READ_EVENT_CAPACITY: usize = 64;

enum ReadEvent {
    Data(ConnectionId, Bytes),
    Closed(ConnectionId),
    Failed(ConnectionId, io::Error),
}

struct Connection {
    info: ConnectionInfo,
    writer: OwnedWriteHalf,
    parser: StreamParser,
    reader: JoinHandle<()>,
}

pub(crate) struct Multiplexer<H> {
    listener: TcpListener,
    connections: Slots<Connection>,
    handler: H,
    shared: Arc<Shared>,
    events_tx: mpsc::Sender<ReadEvent>,
    events: mpsc::Receiver<ReadEvent>,
    /// Commands queued by handler callbacks, run before the loop waits again.
    pending: VecDeque<Command>,
    max_payload_size: u32,
    read_buffer_size: usize,
}

impl<H: ServerHandler> Multiplexer<H> {
    pub(crate) fn new(
        listener: TcpListener,
        config: &ServerConfig,
        handler: H,
        shared: Arc<Shared>,
    ) -> Self {
        let (events_tx, events) = mpsc::channel(READ_EVENT_CAPACITY);
        Self {
            listener,
            connections: Slots::with_capacity(config.max_connections),
            handler,
            shared,
            events_tx,
            events,
            pending: VecDeque::new(),
            max_payload_size: config.max_payload_size,
            read_buffer_size: config.read_buffer_size,
        }
    }

    /// Run until a stop is signalled. Leaves the state at `Stopped`.
    pub(crate) async fn run(&mut self) {
        let addr = self.listener.local_addr().ok();
        info!(?addr, capacity = self.connections.capacity(), "multiplexer running");

        loop {
            tokio::select! {
                biased;

                _ = self.shared.stop.notified() => {
                    debug!("stop signal received");
                    break;
                }

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.add_connection(stream, peer).await,
                    Err(e) => self.report(None, ChatwireError::Io(e)),
                },

                Some(event) = self.events.recv() => self.handle_read(event).await,

                _ = self.shared.wake.notified() => self.drain_commands().await,
            }

            self.run_pending().await;
        }

        self.close_all();
        // let the aborted readers drop their socket halves before block_on returns
        tokio::task::yield_now().await;
        self.shared.state.set(ServerState::Stopped);
        info!(?addr, "multiplexer stopped");
    }

    fn report(&mut self, conn: Option<&ConnectionInfo>, error: ChatwireError) {
        self.handler.on_error(conn, &error);
    }

    async fn add_connection(&mut self, stream: TcpStream, peer: SocketAddr) {
        if self.connections.is_full() {
            warn!(%peer, max = self.connections.capacity(), "connection table full, rejecting");
            reject(stream).await;
            return;
        }

        let (reader, writer) = stream.into_split();
        let events = self.events_tx.clone();
        let buffer_size = self.read_buffer_size;
        let max_payload = self.max_payload_size;

        let inserted = self.connections.insert_with(move |id| Connection {
            info: ConnectionInfo { id, peer },
            writer,
            parser: StreamParser::with_max_payload(max_payload),
            reader: tokio::spawn(read_loop(id, reader, events, buffer_size)),
        });

        // is_full was checked above
        let Some(id) = inserted else { return };
        debug!(%id, %peer, live = self.connections.len(), "connection stored");

        let info = ConnectionInfo { id, peer };
        let ServerContextParts { handler, mut ctx } = self.split_context();
        handler.on_connect(&mut ctx, &info);
    }

    /// Borrow the handler alongside a context over the pending queue.
    fn split_context(&mut self) -> ServerContextParts<'_, H> {
        ServerContextParts {
            handler: &mut self.handler,
            ctx: ServerContext::new(&mut self.pending, self.connections.len()),
        }
    }

    async fn handle_read(&mut self, event: ReadEvent) {
        match event {
            ReadEvent::Data(id, chunk) => self.handle_chunk(id, chunk).await,
            ReadEvent::Closed(id) => {
                if self.connections.contains(id) {
                    debug!(%id, "peer closed connection");
                    self.close_connection(id);
                }
            }
            ReadEvent::Failed(id, error) => {
                if let Some(info) = self.connections.get(id).map(|c| c.info.clone()) {
                    self.report(Some(&info), ChatwireError::Io(error));
                    self.close_connection(id);
                }
            }
        }
    }

    async fn handle_chunk(&mut self, id: ConnectionId, chunk: Bytes) {
        let Some(conn) = self.connections.get_mut(id) else {
            trace!(%id, len = chunk.len(), "chunk for closed connection ignored");
            return;
        };

        let mut frames = Vec::new();
        let parsed = conn.parser.feed(&chunk, |frame| frames.push(frame));
        let info = conn.info.clone();

        for frame in frames {
            if self.shared.state.get() != ServerState::Running || !self.connections.contains(id) {
                break;
            }
            self.deliver(&info, frame).await;
        }

        if let Err(error) = parsed {
            if self.connections.contains(id) {
                self.report(Some(&info), error);
                self.close_connection(id);
            }
        }
    }

    async fn deliver(&mut self, info: &ConnectionInfo, frame: Frame) {
        if frame.is(MessageType::Ping) {
            trace!(id = %info.id, "ping");
            match encode_frame(MessageType::Pong, &[]) {
                Ok(pong) => self.write_to(info.id, &pong).await,
                Err(e) => self.report(Some(info), e),
            }
            return;
        }

        let ServerContextParts { handler, mut ctx } = self.split_context();
        handler.on_message(&mut ctx, info, frame);
        self.run_pending().await;
    }

    async fn drain_commands(&mut self) {
        while let Some(command) = self.shared.commands.pop() {
            self.execute(command).await;
            self.run_pending().await;
        }
    }

    async fn run_pending(&mut self) {
        while let Some(command) = self.pending.pop_front() {
            self.execute(command).await;
        }
    }

    async fn execute(&mut self, command: Command) {
        let frame = match command.encode() {
            Ok(frame) => frame,
            Err(e) => {
                self.report(None, e);
                return;
            }
        };

        match command {
            Command::Send { target, .. } => {
                if self.connections.contains(target) {
                    self.write_to(target, &frame).await;
                } else {
                    self.report(None, ChatwireError::UnknownConnection(target));
                }
            }
            Command::Broadcast { exclude, .. } => {
                for id in self.connections.ids() {
                    if Some(id) == exclude || !self.connections.contains(id) {
                        continue;
                    }
                    self.write_to(id, &frame).await;
                }
            }
        }
    }

    /// Write one encoded frame. A failed write closes the connection.
    async fn write_to(&mut self, id: ConnectionId, frame: &[u8]) {
        let Some(conn) = self.connections.get_mut(id) else {
            return;
        };

        if let Err(error) = write_frame(&mut conn.writer, frame).await {
            let info = conn.info.clone();
            self.report(Some(&info), error);
            self.close_connection(id);
        }
    }

    /// Free the slot, stop the reader and tell the handler.
    fn close_connection(&mut self, id: ConnectionId) {
        let Some(conn) = self.connections.remove(id) else {
            return;
        };
        conn.reader.abort();
        let Connection { info, writer, .. } = conn;
        drop(writer);

        debug!(id = %info.id, live = self.connections.len(), "connection closed");
        let ServerContextParts { handler, mut ctx } = self.split_context();
        handler.on_disconnect(&mut ctx, &info);
    }

    fn close_all(&mut self) {
        for id in self.connections.ids() {
            self.close_connection(id);
        }

        let dropped = self.pending.len();
        self.pending.clear();
        if dropped > 0 {
            debug!(dropped, "discarded commands queued during close");
        }
        while self.events.try_recv().is_ok() {}
    }
}

struct ServerContextParts<'a, H> {
    handler: &'a mut H,
    ctx: ServerContext<'a>,
}

async fn read_loop(
    id: ConnectionId,
    mut reader: OwnedReadHalf,
    events: mpsc::Sender<ReadEvent>,
    buffer_size: usize,
) {
    let mut buf = vec![0u8; buffer_size];
    loop {
        let event = match reader.read(&mut buf).await {
            Ok(0) => ReadEvent::Closed(id),
            Ok(n) => ReadEvent::Data(id, Bytes::copy_from_slice(&buf[..n])),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => ReadEvent::Failed(id, e),
        };

        let last = !matches!(event, ReadEvent::Data(..));
        if events.send(event).await.is_err() || last {
            return;
        }
    }
}

/// Tell an over-capacity peer why it is being dropped, then close it.
async fn reject(mut stream: TcpStream) {
    let frame = match encode_frame(MessageType::ErrorResponse, SERVER_FULL_MESSAGE.as_bytes()) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "failed to encode rejection");
            return;
        }
    };
    if let Err(e) = write_frame(&mut stream, &frame).await {
        debug!(error = %e, "failed to send rejection");
    }
}
