//! Port over a single TCP connection.
//!
//! A [`StreamPort`] owns one established stream plus a reader thread that
//! pushes everything the peer sends into the registered [`InputListener`].
//! Writes are blocking by default; flipping
//! [`StreamPort::set_nonblocking_writes`] turns them into fire-and-forget
//! sends that drop bytes instead of stalling when the peer reads too slowly.

use socket2::SockRef;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use tracing::{debug, warn};

use super::traits::{DEFAULT_BAUD_RATE, InputListener, Port};

/// Matches the kernel-side socket buffers closely enough that a full buffer
/// is drained in one read.
const READ_BUFFER_SIZE: usize = 4096;

/// State shared between the port handle and its reader thread.
struct StreamShared {
    valid: AtomicBool,
    listener: Mutex<Option<Arc<dyn InputListener>>>,
}

pub struct StreamPort {
    stream: TcpStream,
    peer: SocketAddr,
    nonblocking_writes: AtomicBool,
    baud: AtomicU32,
    shared: Arc<StreamShared>,
}

impl StreamPort {
    /// Wraps an established connection and starts its reader thread.
    pub fn open(stream: TcpStream) -> io::Result<Self> {
        let peer = stream.peer_addr()?;
        let shared = Arc::new(StreamShared {
            valid: AtomicBool::new(true),
            listener: Mutex::new(None),
        });

        let reader = stream.try_clone()?;
        let reader_shared = shared.clone();
        thread::Builder::new()
            .name("port-reader".to_string())
            .spawn(move || read_loop(reader, peer, reader_shared))?;

        Ok(Self {
            stream,
            peer,
            nonblocking_writes: AtomicBool::new(false),
            baud: AtomicU32::new(DEFAULT_BAUD_RATE),
            shared,
        })
    }

    /// Connects to a remote endpoint and wraps the resulting stream.
    pub fn connect(addr: impl ToSocketAddrs) -> io::Result<Self> {
        Self::open(TcpStream::connect(addr)?)
    }

    /// Makes writes lossy: a send that would block drops the bytes instead.
    ///
    /// Lossiness is per send call; the socket itself stays blocking so the
    /// reader thread can keep parking in `read`.
    pub fn set_nonblocking_writes(&self, nonblocking: bool) {
        self.nonblocking_writes.store(nonblocking, Ordering::Relaxed);
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

fn read_loop(mut stream: TcpStream, peer: SocketAddr, shared: Arc<StreamShared>) {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => {
                debug!("Connection from {} closed by peer", peer);
                break;
            }
            Ok(n) => {
                let listener = shared.listener.lock().unwrap().clone();
                if let Some(listener) = listener {
                    listener.data_received(&buf[..n]);
                }
            }
            Err(e) => {
                debug!("Read from {} failed, stopping reader: {}", peer, e);
                break;
            }
        }
    }
    shared.valid.store(false, Ordering::Relaxed);
}

impl Port for StreamPort {
    fn write(&self, data: &[u8]) -> io::Result<usize> {
        if !self.shared.valid.load(Ordering::Relaxed) {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port is closed"));
        }

        let result = if self.nonblocking_writes.load(Ordering::Relaxed) {
            SockRef::from(&self.stream).send_with_flags(data, libc::MSG_DONTWAIT)
        } else {
            (&self.stream).write(data)
        };

        match result {
            Ok(written) => Ok(written),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                warn!("Send to {} would block, dropping {} bytes", self.peer, data.len());
                Ok(0)
            }
            Err(e) => {
                self.shared.valid.store(false, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    fn is_valid(&self) -> bool {
        self.shared.valid.load(Ordering::Relaxed)
    }

    /// Shuts the socket down, which also unblocks the reader thread.
    fn close(&self) {
        self.shared.valid.store(false, Ordering::Relaxed);
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            debug!("Shutdown of connection to {} failed: {}", self.peer, e);
        }
    }

    /// Writes go straight to the socket, so there is nothing local to flush.
    fn drain(&self) -> bool {
        true
    }

    fn baud_rate(&self) -> u32 {
        self.baud.load(Ordering::Relaxed)
    }

    /// TCP has no line rate; the value is kept only so callers can read back
    /// what they configured.
    fn set_baud_rate(&self, baud: u32) -> bool {
        self.baud.store(baud, Ordering::Relaxed);
        true
    }

    fn set_listener(&self, listener: Arc<dyn InputListener>) {
        *self.shared.listener.lock().unwrap() = Some(listener);
    }

    fn clear_listener(&self) {
        *self.shared.listener.lock().unwrap() = None;
    }
}

impl Drop for StreamPort {
    fn drop(&mut self) {
        self.close();
    }
}
