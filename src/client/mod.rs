//! TCP client session.
//!
//! A [`Client`] owns one connection and a private current-thread runtime.
//! [`Client::run`] drives the session loop on the calling thread until the
//! peer closes, the connection fails or [`ClientHandle::shutdown`] is called.
//! Handles are `Send + Clone`, so another thread can queue frames and stop
//! the loop while it runs.
//!
//! # Example
//!
//! ```no_run
//! use std::thread;
//! use chatwire::{Client, LoggingClientHandler};
//!
//! # fn main() -> chatwire::Result<()> {
//! let mut client = Client::connect("127.0.0.1", 9000, LoggingClientHandler)?;
//! let handle = client.handle();
//!
//! let session = thread::spawn(move || client.run());
//! handle.send_text("hello")?;
//! handle.shutdown();
//! let _end = session.join();
//! # Ok(())
//! # }
//! ```

mod handler;
mod session;

pub use handler::{ClientContext, ClientHandler, LoggingClientHandler};

use std::fs::File;
use std::io::{self, Read};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::runtime::Runtime;
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::error::{ChatwireError, Result};
use crate::protocol::{encode_frame, MessageType, StreamParser, DEFAULT_MAX_PAYLOAD_SIZE};
use crate::queue::CommandQueue;
use crate::server::DEFAULT_READ_BUFFER_SIZE;
use crate::transfer::{FileInfo, FILE_CHUNK_SIZE};

use session::Session;

/// How a session loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// A stop was requested. The connection is still open and `run` may be
    /// called again.
    Shutdown,
    /// The server closed the connection.
    PeerClosed,
    /// A read, write or decode error ended the connection.
    Failed,
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server IP literal. Host names are not resolved.
    pub ip: String,
    /// Server port.
    pub port: u16,
    /// Largest accepted inbound payload.
    pub max_payload_size: u32,
    /// Size of each socket read.
    pub read_buffer_size: usize,
}

impl ClientConfig {
    /// Defaults for `ip:port`.
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }

    /// Parse the target address.
    pub fn server_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .ip
            .parse()
            .map_err(|_| ChatwireError::InvalidAddress(self.ip.clone()))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

/// A frame queued from a [`ClientHandle`].
pub(crate) struct Outbound {
    frame: Bytes,
    done: Option<SyncSender<Result<()>>>,
}

impl Outbound {
    pub(crate) fn complete(self, result: Result<()>) {
        if let Some(done) = self.done {
            // the waiter may have given up
            let _ = done.send(result);
        }
    }
}

/// State shared between a client, its handles and the session loop.
pub(crate) struct ClientShared {
    pub(crate) outbound: CommandQueue<Outbound>,
    pub(crate) wake: Notify,
    pub(crate) stop: Notify,
    /// Set between a stop request and the loop acknowledging it.
    pub(crate) stopping: AtomicBool,
    /// Set once the connection is unusable.
    pub(crate) closed: AtomicBool,
    /// Set while the loop is stopped with the connection still open.
    pub(crate) parked: AtomicBool,
}

impl ClientShared {
    fn new() -> Self {
        Self {
            outbound: CommandQueue::new(),
            wake: Notify::new(),
            stop: Notify::new(),
            stopping: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            parked: AtomicBool::new(false),
        }
    }

    pub(crate) fn fail_pending(&self) -> usize {
        self.outbound
            .drain_with(|item| item.complete(Err(ChatwireError::ConnectionClosed)))
    }

    /// Fail blocking sends that a stopped loop will not write. Plain queued
    /// frames stay for the next `run`.
    pub(crate) fn fail_waiters(&self) -> usize {
        let waiters = self.outbound.take_where(|item| item.done.is_some());
        let count = waiters.len();
        for item in waiters {
            item.complete(Err(ChatwireError::SessionStopped));
        }
        count
    }
}

/// A connected client session.
///
/// Owns a private runtime: create, run and drop it from synchronous code.
pub struct Client<H: ClientHandler> {
    server_addr: SocketAddr,
    local_addr: SocketAddr,
    runtime: Runtime,
    session: Session<H>,
    shared: Arc<ClientShared>,
}

impl<H: ClientHandler> Client<H> {
    /// Connect to `ip:port`. `ip` must be an IPv4 or IPv6 literal.
    pub fn connect(ip: &str, port: u16, handler: H) -> Result<Self> {
        Self::connect_with(ClientConfig::new(ip, port), handler)
    }

    /// Connect with an explicit configuration.
    pub fn connect_with(config: ClientConfig, handler: H) -> Result<Self> {
        let server_addr = config.server_addr()?;
        if config.read_buffer_size == 0 {
            return Err(ChatwireError::InvalidConfig(
                "read_buffer_size must be positive".into(),
            ));
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .build()?;
        let stream = runtime.block_on(TcpStream::connect(server_addr))?;
        let local_addr = stream.local_addr()?;
        let (reader, writer) = stream.into_split();

        let shared = Arc::new(ClientShared::new());
        let session = Session::new(
            server_addr,
            reader,
            writer,
            StreamParser::with_max_payload(config.max_payload_size),
            config.read_buffer_size,
            handler,
            shared.clone(),
        );

        info!(%server_addr, %local_addr, "client connected");
        Ok(Self {
            server_addr,
            local_addr,
            runtime,
            session,
            shared,
        })
    }

    /// Address of the server.
    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    /// Local address of the connection.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// A cloneable handle for sending and stopping from other threads.
    pub fn handle(&self) -> ClientHandle {
        ClientHandle {
            shared: self.shared.clone(),
        }
    }

    /// Drive the session on this thread until it ends.
    pub fn run(&mut self) -> SessionEnd {
        self.runtime.block_on(self.session.run())
    }
}

impl<H: ClientHandler> Drop for Client<H> {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        let failed = self.shared.fail_pending();
        debug!(server = %self.server_addr, failed, "client released");
    }
}

/// Cloneable, thread-safe handle to a [`Client`].
#[derive(Clone)]
pub struct ClientHandle {
    shared: Arc<ClientShared>,
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle").finish_non_exhaustive()
    }
}

impl ClientHandle {
    /// Queue one frame. Returns once queued, before it is written.
    pub fn send_payload(&self, msg_type: impl Into<u16>, payload: &[u8]) -> Result<()> {
        let frame = encode_frame(msg_type, payload)?;
        self.enqueue(Outbound { frame, done: None })
    }

    /// Send one frame and block until the session loop has written it.
    ///
    /// Fails with [`ChatwireError::SessionStopped`] once `run` has returned
    /// [`SessionEnd::Shutdown`], until `run` is called again. Before the first
    /// `run` the frame waits for the loop, so `run` must be driven from
    /// another thread. Must not be called from a handler callback: the loop
    /// would wait on itself.
    pub fn send_payload_wait(&self, msg_type: impl Into<u16>, payload: &[u8]) -> Result<()> {
        let frame = encode_frame(msg_type, payload)?;
        let (done, written) = sync_channel(1);
        self.enqueue(Outbound {
            frame,
            done: Some(done),
        })?;
        written.recv().unwrap_or(Err(ChatwireError::ConnectionClosed))
    }

    /// Queue a chat text frame.
    pub fn send_text(&self, text: &str) -> Result<()> {
        self.send_payload(MessageType::ChatText, text.as_bytes())
    }

    /// Queue a heartbeat ping.
    pub fn ping(&self) -> Result<()> {
        self.send_payload(MessageType::Ping, &[])
    }

    /// Stream a file: a `FileInfo` header, `FileChunk` frames of at most
    /// [`FILE_CHUNK_SIZE`] bytes, then an empty `FileEnd`.
    ///
    /// Each frame is written before the next chunk is read. Returns the
    /// number of content bytes sent.
    pub fn send_file(&self, path: impl AsRef<Path>) -> Result<u64> {
        let path = path.as_ref();
        let mut file = File::open(path)?;
        let info = FileInfo::for_path(path, file.metadata()?.len());

        self.send_payload_wait(MessageType::FileInfo, &info.to_payload()?)?;

        let mut chunk = vec![0u8; FILE_CHUNK_SIZE];
        let mut sent = 0u64;
        loop {
            let n = match file.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            self.send_payload_wait(MessageType::FileChunk, &chunk[..n])?;
            sent += n as u64;
        }

        self.send_payload_wait(MessageType::FileEnd, &[])?;
        debug!(file = %info.filename, sent, "file sent");
        Ok(sent)
    }

    /// Ask the session loop to return. Does not wait.
    pub fn shutdown(&self) {
        self.shared.stopping.store(true, Ordering::Release);
        self.shared.stop.notify_one();
    }

    /// Whether the connection has ended.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    fn enqueue(&self, item: Outbound) -> Result<()> {
        let waits = item.done.is_some();
        self.check_open(waits)?;
        self.shared.outbound.push(item);
        self.shared.wake.notify_one();

        // the session may have ended or stopped between the check and the push
        if let Err(e) = self.check_open(waits) {
            if matches!(e, ChatwireError::ConnectionClosed) {
                self.shared.fail_pending();
            } else {
                self.shared.fail_waiters();
            }
            return Err(e);
        }
        Ok(())
    }

    fn check_open(&self, waits: bool) -> Result<()> {
        if self.is_closed() {
            return Err(ChatwireError::ConnectionClosed);
        }
        if waits && self.shared.parked.load(Ordering::Acquire) {
            return Err(ChatwireError::SessionStopped);
        }
        Ok(())
    }
}
