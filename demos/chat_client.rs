//! Interactive chat client.
//!
//! This example demonstrates:
//! - Implementing `ClientHandler`
//! - Running the session loop on its own thread
//! - Sending from stdin through a `ClientHandle`
//!
//! # Running
//!
//! ```text
//! cargo run --example chat_client -- 127.0.0.1 9000
//! ```
//!
//! Each stdin line is sent as chat text; `/ping` sends a heartbeat and
//! `/quit` ends the session.

use std::io::BufRead;
use std::net::SocketAddr;
use std::thread;

use chatwire::protocol::{Frame, MessageType};
use chatwire::{Client, ClientContext, ClientHandler, SessionEnd};
use tracing::info;

struct Printer;

impl ClientHandler for Printer {
    fn on_message(&mut self, _ctx: &mut ClientContext<'_>, frame: Frame) {
        match frame.message_type() {
            Some(MessageType::Pong) => info!("pong"),
            Some(MessageType::ErrorResponse) => {
                info!("server error: {}", frame.text().unwrap_or("<binary>"))
            }
            _ => println!("[{}] {}", frame.msg_type, frame.preview()),
        }
    }

    fn on_disconnect(&mut self, server: SocketAddr) {
        println!("disconnected from {}", server);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("chatwire=info".parse()?),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let ip = args.next().unwrap_or_else(|| "127.0.0.1".to_string());
    let port = match args.next() {
        Some(arg) => arg.parse()?,
        None => 9000,
    };

    let mut client = Client::connect(&ip, port, Printer)?;
    let handle = client.handle();
    let session = thread::spawn(move || client.run());

    for line in std::io::stdin().lock().lines() {
        let line = line?;
        if handle.is_closed() {
            break;
        }
        match line.trim() {
            "/quit" => break,
            "/ping" => handle.ping()?,
            "" => {}
            text => handle.send_text(text)?,
        }
    }

    handle.shutdown();
    match session.join() {
        Ok(SessionEnd::Shutdown) => info!("session stopped"),
        Ok(end) => info!(?end, "session ended"),
        Err(_) => return Err("session thread panicked".into()),
    }
    Ok(())
}
