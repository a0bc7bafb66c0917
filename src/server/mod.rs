//! Multi-client TCP server.
//!
//! The [`ServerBuilder`] configures the listener; the [`Server`] owns it and
//! the multiplexer thread. Lifecycle:
//! 1. Bind and listen (`ServerBuilder::bind` / [`Server::with_config`])
//! 2. [`Server::start`] spawns the multiplexer thread
//! 3. Connections, frames and queued commands are served until stopped
//! 4. [`Server::shutdown`] signals the loop and joins the thread
//!
//! A stopped server can be started again. Dropping the server shuts it down
//! and releases the listener.
//!
//! # Example
//!
//! ```no_run
//! use chatwire::protocol::Frame;
//! use chatwire::{ConnectionInfo, ServerBuilder, ServerContext, ServerHandler};
//!
//! struct Echo;
//!
//! impl ServerHandler for Echo {
//!     fn on_message(&mut self, ctx: &mut ServerContext<'_>, conn: &ConnectionInfo, frame: Frame) {
//!         ctx.send_to(conn.id, frame.msg_type, frame.payload);
//!     }
//! }
//!
//! # fn main() -> chatwire::Result<()> {
//! let mut server = ServerBuilder::new(9000).max_connections(16).bind(Echo)?;
//! server.start()?;
//! // ...
//! server.shutdown();
//! # Ok(())
//! # }
//! ```

mod handler;
mod multiplexer;
mod slots;

pub use handler::{ConnectionInfo, LoggingHandler, ServerContext, ServerHandler};
pub use multiplexer::SERVER_FULL_MESSAGE;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;

use bytes::Bytes;
use tokio::net::{TcpListener, TcpSocket};
use tokio::runtime::Runtime;
use tokio::sync::Notify;
use tracing::{debug, error, info};

use crate::command::{Command, ConnectionId};
use crate::error::{ChatwireError, Result};
use crate::protocol::{ABSOLUTE_MAX_PAYLOAD_SIZE, DEFAULT_MAX_PAYLOAD_SIZE};
use crate::queue::CommandQueue;

use multiplexer::Multiplexer;

/// Default connection table capacity.
pub const DEFAULT_MAX_CONNECTIONS: usize = 64;

/// Default size of each per-connection read.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4096;

/// Lifecycle state of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerState {
    /// Not serving. `start` is allowed.
    Stopped = 0,
    /// The multiplexer thread is serving.
    Running = 1,
    /// A stop was requested; the loop exits before its next wait.
    ShuttingDown = 2,
}

impl ServerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ServerState::Running,
            2 => ServerState::ShuttingDown,
            _ => ServerState::Stopped,
        }
    }
}

/// Atomic cell holding a [`ServerState`], shared across threads.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    fn new(state: ServerState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn get(&self) -> ServerState {
        ServerState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: ServerState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Move `from` -> `to`. Returns false if the state was not `from`.
    pub(crate) fn transition(&self, from: ServerState, to: ServerState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// State shared between the server, its handles and the multiplexer.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) state: StateCell,
    pub(crate) commands: CommandQueue<Command>,
    /// Signalled after each command push.
    pub(crate) wake: Notify,
    /// Signalled once per stop request.
    pub(crate) stop: Notify,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: StateCell::new(ServerState::Stopped),
            commands: CommandQueue::new(),
            wake: Notify::new(),
            stop: Notify::new(),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Local address to bind. Default: all IPv4 interfaces.
    pub bind_addr: IpAddr,
    /// TCP port. 0 picks an ephemeral port; see [`Server::local_addr`].
    pub port: u16,
    /// Connection table capacity and listen backlog.
    pub max_connections: usize,
    /// Largest accepted inbound payload.
    pub max_payload_size: u32,
    /// Size of each socket read.
    pub read_buffer_size: usize,
}

impl ServerConfig {
    /// Defaults for the given port.
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(ChatwireError::InvalidConfig(
                "max_connections must be positive".into(),
            ));
        }
        if u32::try_from(self.max_connections).is_err() {
            return Err(ChatwireError::InvalidConfig(format!(
                "max_connections {} is too large",
                self.max_connections
            )));
        }
        if self.read_buffer_size == 0 {
            return Err(ChatwireError::InvalidConfig(
                "read_buffer_size must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

/// Builder for configuring and binding a [`Server`].
#[derive(Debug, Clone)]
pub struct ServerBuilder {
    config: ServerConfig,
}

impl ServerBuilder {
    /// Start from defaults on `port`.
    pub fn new(port: u16) -> Self {
        Self {
            config: ServerConfig::new(port),
        }
    }

    /// Local address to bind.
    pub fn bind_addr(mut self, addr: IpAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    /// Maximum simultaneous connections.
    ///
    /// The next connection past this limit receives an `ErrorResponse` frame
    /// and is closed.
    /// Default: 64
    pub fn max_connections(mut self, limit: usize) -> Self {
        self.config.max_connections = limit;
        self
    }

    /// Maximum inbound payload size. A peer that declares more is dropped.
    /// Default: 16 MiB
    pub fn max_payload_size(mut self, limit: u32) -> Self {
        self.config.max_payload_size = limit;
        self
    }

    /// Size of each socket read.
    /// Default: 4096
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size;
        self
    }

    /// Bind and listen. The server is returned stopped.
    pub fn bind<H: ServerHandler>(self, handler: H) -> Result<Server<H>> {
        Server::with_config(self.config, handler)
    }
}

/// Everything the multiplexer thread needs; returned when it exits.
struct Core<H> {
    mux: Multiplexer<H>,
    runtime: Runtime,
}

impl<H: ServerHandler> Core<H> {
    fn run(self) -> Self {
        let Core { mut mux, runtime } = self;
        runtime.block_on(mux.run());
        Core { mux, runtime }
    }
}

/// A listening server and its multiplexer thread.
///
/// The server owns a private runtime, so it must be created and dropped
/// from synchronous code, not from inside another async runtime.
pub struct Server<H: ServerHandler> {
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    core: Option<Core<H>>,
    thread: Option<thread::JoinHandle<Core<H>>>,
}

impl<H: ServerHandler> Server<H> {
    /// Bind `port` on all interfaces with `max_connections` slots.
    pub fn new(port: u16, max_connections: usize, handler: H) -> Result<Self> {
        ServerBuilder::new(port)
            .max_connections(max_connections)
            .bind(handler)
    }

    /// Bind and listen with an explicit configuration.
    ///
    /// Any failure releases whatever was acquired; no partial server exists.
    pub fn with_config(config: ServerConfig, handler: H) -> Result<Self> {
        config.validate()?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .build()?;

        let listener = {
            let _guard = runtime.enter();
            listen(&config)?
        };
        let local_addr = listener.local_addr()?;

        let shared = Arc::new(Shared::new());
        let mux = Multiplexer::new(listener, &config, handler, shared.clone());

        info!(
            %local_addr,
            max_connections = config.max_connections,
            "server listening"
        );

        Ok(Self {
            local_addr,
            shared,
            core: Some(Core { mux, runtime }),
            thread: None,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServerState {
        self.shared.state.get()
    }

    /// A cloneable handle for submitting work from other threads.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shared: self.shared.clone(),
        }
    }

    /// Spawn the multiplexer thread.
    ///
    /// Fails with [`ChatwireError::NotStopped`] unless the server is stopped.
    pub fn start(&mut self) -> Result<()> {
        let state = self.shared.state.get();
        if state != ServerState::Stopped {
            return Err(ChatwireError::NotStopped(state));
        }

        self.reclaim();
        let core = self.core.take().ok_or(ChatwireError::ServerUnavailable)?;

        if !self
            .shared
            .state
            .transition(ServerState::Stopped, ServerState::Running)
        {
            let state = self.shared.state.get();
            self.core = Some(core);
            return Err(ChatwireError::NotStopped(state));
        }

        let name = format!("chatwire-mux-{}", self.local_addr.port());
        match thread::Builder::new().name(name).spawn(move || core.run()) {
            Ok(thread) => {
                self.thread = Some(thread);
                info!(addr = %self.local_addr, "server started");
                Ok(())
            }
            Err(e) => {
                // the core moved into the failed spawn and is gone
                self.shared.state.set(ServerState::Stopped);
                error!(error = %e, "failed to spawn multiplexer thread");
                Err(ChatwireError::Io(e))
            }
        }
    }

    /// Stop serving and wait for the multiplexer thread to exit.
    ///
    /// Every open connection is closed with a disconnect callback. Calling
    /// this on a server that is not running does nothing.
    pub fn shutdown(&mut self) {
        if self
            .shared
            .state
            .transition(ServerState::Running, ServerState::ShuttingDown)
        {
            info!(addr = %self.local_addr, "server shutting down");
            self.shared.stop.notify_one();
        }
        self.reclaim();
    }

    /// Join an exited (or exiting) multiplexer thread and take the core back.
    fn reclaim(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        if self.shared.state.get() == ServerState::Running {
            // still serving; joining now would block forever
            self.thread = Some(thread);
            return;
        }

        match thread.join() {
            Ok(core) => self.core = Some(core),
            Err(_) => {
                error!("multiplexer thread panicked; server is unavailable");
                self.shared.state.set(ServerState::Stopped);
            }
        }
    }
}

impl<H: ServerHandler> Drop for Server<H> {
    fn drop(&mut self) {
        self.shutdown();

        let discarded = self.shared.commands.drain_with(drop);
        if discarded > 0 {
            debug!(discarded, "dropped queued commands on server release");
        }
        debug!(addr = %self.local_addr, "server released");
    }
}

fn listen(config: &ServerConfig) -> Result<TcpListener> {
    let addr = SocketAddr::new(config.bind_addr, config.port);
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;

    // validate() bounds max_connections to u32
    let backlog = u32::try_from(config.max_connections).unwrap_or(u32::MAX);
    Ok(socket.listen(backlog)?)
}

/// Cloneable, thread-safe handle to a [`Server`].
///
/// Submissions are queued and executed on the multiplexer thread in FIFO
/// order. Commands submitted while the server is stopped run after the next
/// [`Server::start`].
#[derive(Debug, Clone)]
pub struct ServerHandle {
    shared: Arc<Shared>,
}

impl ServerHandle {
    /// Queue a frame for one connection.
    pub fn send_to(
        &self,
        target: ConnectionId,
        msg_type: impl Into<u16>,
        payload: impl Into<Bytes>,
    ) -> Result<()> {
        self.submit(Command::send(target, msg_type, payload))
    }

    /// Queue a frame for every connection except `exclude`.
    pub fn broadcast(
        &self,
        msg_type: impl Into<u16>,
        payload: impl Into<Bytes>,
        exclude: Option<ConnectionId>,
    ) -> Result<()> {
        self.submit(Command::broadcast(msg_type, payload, exclude))
    }

    /// Queue a command and wake the multiplexer.
    pub fn submit(&self, command: Command) -> Result<()> {
        let len = match &command {
            Command::Send { payload, .. } | Command::Broadcast { payload, .. } => payload.len(),
        };
        if len > ABSOLUTE_MAX_PAYLOAD_SIZE as usize {
            return Err(ChatwireError::PayloadTooLarge {
                len,
                max: ABSOLUTE_MAX_PAYLOAD_SIZE,
            });
        }

        self.shared.commands.push(command);
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Commands waiting for the multiplexer.
    pub fn pending_commands(&self) -> usize {
        self.shared.commands.len()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServerState {
        self.shared.state.get()
    }

    /// Ask a running server to stop. Does not wait.
    pub fn shutdown(&self) {
        if self
            .shared
            .state
            .transition(ServerState::Running, ServerState::ShuttingDown)
        {
            self.shared.stop.notify_one();
        }
    }
}
