//! Broadcast hub: every connected peer sees what every other peer sends.
//!
//! Binds a [`TcpServerPort`], prints everything received from any peer to
//! stdout, and fans each stdin line out to all connected peers. Try it with
//! a few `nc 127.0.0.1 4353` sessions side by side.

use anyhow::{Context, Result};
use crossbeam::channel::{self, Sender};
use portmux::{InputListener, Port, TcpServerPort};
use std::io::{BufRead, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:4353";

/// Hands inbound chunks off to the printer thread, so the reader threads
/// behind the port never wait on stdout.
struct ChannelListener {
    tx: Sender<Vec<u8>>,
}

impl InputListener for ChannelListener {
    fn data_received(&self, data: &[u8]) {
        let _ = self.tx.send(data.to_vec());
    }
}

fn main() {
    tracing_subscriber::fmt::init();

    if let Err(e) = run() {
        error!("Hub error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let addr: SocketAddr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
        .parse()
        .context("Invalid bind address")?;

    let server = TcpServerPort::open(addr).context("Failed to open server port")?;
    info!("Broadcast hub listening on {}", server.local_addr());

    let (tx, rx) = channel::unbounded::<Vec<u8>>();
    server.set_listener(Arc::new(ChannelListener { tx }));

    // Printer thread: everything any peer sends shows up on stdout.
    std::thread::spawn(move || {
        let mut stdout = std::io::stdout();
        for chunk in rx {
            let _ = stdout.write_all(&chunk);
            let _ = stdout.flush();
        }
    });

    // Fan every stdin line out to the connected peers.
    for line in std::io::stdin().lock().lines() {
        let mut line = line.context("Failed to read stdin")?;
        line.push('\n');
        match server.write(line.as_bytes()) {
            Ok(sent) if sent < line.len() => {
                warn!("Only {} of {} bytes went out", sent, line.len());
            }
            Ok(_) => {}
            Err(_) => {
                info!("No peer connected, dropped {} bytes", line.len());
            }
        }
    }

    server.close();
    Ok(())
}
