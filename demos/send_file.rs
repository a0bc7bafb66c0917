//! Send one file to a chat server and exit.
//!
//! # Running
//!
//! ```text
//! cargo run --example send_file -- 127.0.0.1 9000 ./notes.txt
//! ```

use std::thread;

use chatwire::{Client, LoggingClientHandler};
use tracing::info;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("chatwire=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 4 {
        return Err(format!("usage: {} <ip> <port> <path>", args[0]).into());
    }
    let port: u16 = args[2].parse()?;

    let mut client = Client::connect(&args[1], port, LoggingClientHandler)?;
    let handle = client.handle();
    let session = thread::spawn(move || client.run());

    let sent = handle.send_file(&args[3])?;
    info!(path = %args[3], sent, "file sent");

    handle.shutdown();
    let _ = session.join();
    Ok(())
}
