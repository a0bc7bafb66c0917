//! The client session loop.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, info, trace};

use super::handler::{ClientContext, ClientHandler};
use super::{ClientShared, SessionEnd};
use crate::error::ChatwireError;
use crate::protocol::StreamParser;
use crate::writer::write_frame;

pub(crate) struct Session<H> {
    server: SocketAddr,
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    parser: StreamParser,
    buf: Vec<u8>,
    handler: H,
    shared: Arc<ClientShared>,
    /// Frames queued by handler callbacks.
    outbox: VecDeque<Bytes>,
    connected: bool,
    ended: Option<SessionEnd>,
}

impl<H: ClientHandler> Session<H> {
    pub(crate) fn new(
        server: SocketAddr,
        reader: OwnedReadHalf,
        writer: OwnedWriteHalf,
        parser: StreamParser,
        read_buffer_size: usize,
        handler: H,
        shared: Arc<ClientShared>,
    ) -> Self {
        Self {
            server,
            reader,
            writer,
            parser,
            buf: vec![0u8; read_buffer_size],
            handler,
            shared,
            outbox: VecDeque::new(),
            connected: false,
            ended: None,
        }
    }

    /// Serve the connection until it ends or a stop is signalled.
    ///
    /// After the peer closes or the connection fails, later calls return the
    /// same outcome immediately.
    pub(crate) async fn run(&mut self) -> SessionEnd {
        if let Some(end) = self.ended {
            return end;
        }

        self.shared.parked.store(false, Ordering::Release);

        if !self.connected {
            self.connected = true;
            let mut ctx = ClientContext::new(&mut self.outbox);
            self.handler.on_connect(&mut ctx, self.server);
            if let Some(end) = self.flush_outbox().await {
                return self.finish(end);
            }
        }

        loop {
            let end = tokio::select! {
                biased;

                _ = self.shared.stop.notified() => Some(SessionEnd::Shutdown),

                read = self.reader.read(&mut self.buf) => self.on_read(read).await,

                _ = self.shared.wake.notified() => self.drain_outbound().await,
            };

            match end {
                Some(SessionEnd::Shutdown) => return self.park(),
                Some(end) => return self.finish(end),
                None => {}
            }
        }
    }

    async fn on_read(&mut self, read: io::Result<usize>) -> Option<SessionEnd> {
        match read {
            Ok(0) => {
                info!(server = %self.server, "connection closed by server");
                Some(SessionEnd::PeerClosed)
            }
            Ok(n) => self.handle_chunk(n).await,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => None,
            Err(e) => {
                self.handler.on_error(&ChatwireError::Io(e));
                Some(SessionEnd::Failed)
            }
        }
    }

    async fn handle_chunk(&mut self, n: usize) -> Option<SessionEnd> {
        trace!(len = n, "received chunk");
        let mut frames = Vec::new();
        let parsed = self.parser.feed(&self.buf[..n], |frame| frames.push(frame));

        for frame in frames {
            if self.shared.stopping.load(Ordering::Acquire) {
                break;
            }
            let mut ctx = ClientContext::new(&mut self.outbox);
            self.handler.on_message(&mut ctx, frame);
            if let Some(end) = self.flush_outbox().await {
                return Some(end);
            }
        }

        match parsed {
            Ok(_) => None,
            Err(e) => {
                self.handler.on_error(&e);
                Some(SessionEnd::Failed)
            }
        }
    }

    /// Write frames queued by callbacks. A failed write ends the connection.
    async fn flush_outbox(&mut self) -> Option<SessionEnd> {
        while let Some(frame) = self.outbox.pop_front() {
            if let Err(e) = write_frame(&mut self.writer, &frame).await {
                self.handler.on_error(&e);
                let dropped = self.outbox.len();
                self.outbox.clear();
                debug!(dropped, "dropped queued frames after write failure");
                return Some(SessionEnd::Failed);
            }
        }
        None
    }

    /// Write frames queued from handles. A failed write ends the connection;
    /// `finish` fails whatever is still queued.
    async fn drain_outbound(&mut self) -> Option<SessionEnd> {
        while let Some(item) = self.shared.outbound.pop() {
            match write_frame(&mut self.writer, &item.frame).await {
                Ok(()) => item.complete(Ok(())),
                Err(e) => {
                    self.handler.on_error(&e);
                    item.complete(Err(e));
                    return Some(SessionEnd::Failed);
                }
            }
        }
        None
    }

    /// Stop serving but keep the connection for a later `run`.
    fn park(&mut self) -> SessionEnd {
        self.shared.parked.store(true, Ordering::Release);
        self.shared.stopping.store(false, Ordering::Release);
        let failed = self.shared.fail_waiters();
        info!(server = %self.server, failed, "session stopped");
        SessionEnd::Shutdown
    }

    /// Mark the connection dead and fail every waiting send.
    fn finish(&mut self, end: SessionEnd) -> SessionEnd {
        self.ended = Some(end);
        self.shared.closed.store(true, Ordering::Release);
        let failed = self.shared.fail_pending();
        if failed > 0 {
            debug!(failed, "failed queued sends after session end");
        }
        self.handler.on_disconnect(self.server);
        end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::sync_channel;

    use tokio::io::AsyncWriteExt;
    use tokio::net::{TcpListener, TcpStream};

    use crate::client::Outbound;
    use crate::protocol::encode_frame;

    #[derive(Default)]
    struct Counts {
        errors: usize,
        disconnects: usize,
    }

    impl ClientHandler for Counts {
        fn on_error(&mut self, _error: &ChatwireError) {
            self.errors += 1;
        }

        fn on_disconnect(&mut self, _server: SocketAddr) {
            self.disconnects += 1;
        }
    }

    #[tokio::test]
    async fn test_write_failure_ends_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = listener.local_addr().unwrap();
        let stream = TcpStream::connect(server).await.unwrap();
        // keep the peer open and silent
        let (_peer, _) = listener.accept().await.unwrap();

        let (reader, mut writer) = stream.into_split();
        writer.shutdown().await.unwrap();

        let shared = Arc::new(ClientShared::new());
        let mut session = Session::new(
            server,
            reader,
            writer,
            StreamParser::new(),
            1024,
            Counts::default(),
            shared.clone(),
        );

        let (first_done, first) = sync_channel(1);
        let (second_done, second) = sync_channel(1);
        for done in [first_done, second_done] {
            shared.outbound.push(Outbound {
                frame: encode_frame(1u8, b"x").unwrap(),
                done: Some(done),
            });
        }
        shared.wake.notify_one();

        assert_eq!(session.run().await, SessionEnd::Failed);
        assert!(matches!(first.recv(), Ok(Err(ChatwireError::Io(_)))));
        assert!(matches!(second.recv(), Ok(Err(ChatwireError::ConnectionClosed))));
        assert!(shared.closed.load(Ordering::Acquire));
        assert_eq!(session.handler.errors, 1);
        assert_eq!(session.handler.disconnects, 1);
    }

    #[tokio::test]
    async fn test_shutdown_parks_and_fails_waiters() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = listener.local_addr().unwrap();
        let stream = TcpStream::connect(server).await.unwrap();
        let (_peer, _) = listener.accept().await.unwrap();
        let (reader, writer) = stream.into_split();

        let shared = Arc::new(ClientShared::new());
        let mut session = Session::new(
            server,
            reader,
            writer,
            StreamParser::new(),
            1024,
            Counts::default(),
            shared.clone(),
        );

        shared.stopping.store(true, Ordering::Release);
        shared.stop.notify_one();
        let (done, written) = sync_channel(1);
        shared.outbound.push(Outbound {
            frame: encode_frame(1u8, b"x").unwrap(),
            done: Some(done),
        });

        assert_eq!(session.run().await, SessionEnd::Shutdown);
        assert!(shared.parked.load(Ordering::Acquire));
        assert!(!shared.closed.load(Ordering::Acquire));
        assert!(matches!(written.recv(), Ok(Err(ChatwireError::SessionStopped))));
        assert_eq!(session.handler.disconnects, 0);
    }
}
