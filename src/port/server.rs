//! Listening port that aggregates every accepted connection.
//!
//! A [`TcpServerPort`] binds one listening socket and runs a dedicated accept
//! thread for its whole life. Each accepted connection is wrapped into a
//! [`StreamPort`] and attached to an internal [`MultiPort`], so writing to
//! the server broadcasts to every connected peer and input from any peer
//! lands on the one registered listener. The accept thread has no stop flag:
//! it runs until the listening socket itself dies, either because [`close`]
//! shut it down or because accepting failed.
//!
//! [`close`]: Port::close

use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::io;
use std::net::{Shutdown, SocketAddr, TcpListener};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use tracing::{debug, error, info};

use super::multi::MultiPort;
use super::stream::StreamPort;
use super::traits::{InputListener, Port};

const ACCEPT_BACKLOG: i32 = 128;

pub struct TcpServerPort {
    /// `None` once closed; the accept thread keeps its own handle to the
    /// listener, so dropping this does not close the file descriptor.
    socket: Mutex<Option<Arc<TcpListener>>>,
    local_addr: SocketAddr,
    multi: MultiPort,
}

impl TcpServerPort {
    /// Binds `addr` and starts accepting immediately.
    ///
    /// Bind to port 0 to let the OS pick; [`TcpServerPort::local_addr`]
    /// reports the actual one.
    pub fn open(addr: SocketAddr) -> io::Result<Arc<Self>> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(ACCEPT_BACKLOG)?;

        let listener: TcpListener = socket.into();
        let local_addr = listener.local_addr()?;
        let listener = Arc::new(listener);

        let server = Arc::new(Self {
            socket: Mutex::new(Some(listener.clone())),
            local_addr,
            multi: MultiPort::new(),
        });

        let weak = Arc::downgrade(&server);
        thread::Builder::new()
            .name("port-accept".to_string())
            .spawn(move || accept_loop(listener, weak))?;

        info!("Listening on {}", local_addr);
        Ok(server)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of peers currently attached.
    pub fn connection_count(&self) -> usize {
        self.multi.port_count()
    }

    /// Attaches an extra port alongside the accepted ones, for example an
    /// outbound connection this process initiated itself.
    pub fn add(&self, port: Box<dyn Port>) {
        self.multi.add(port);
    }
}

fn accept_one(listener: &TcpListener) -> io::Result<StreamPort> {
    let (stream, _) = listener.accept()?;
    let port = StreamPort::open(stream)?;
    // Writes must not stall the whole aggregate when one peer reads too
    // slowly; dropping bytes for that peer is the lesser evil.
    port.set_nonblocking_writes(true);
    Ok(port)
}

fn accept_loop(listener: Arc<TcpListener>, server: Weak<TcpServerPort>) {
    loop {
        match accept_one(&listener) {
            Ok(port) => {
                let Some(server) = server.upgrade() else {
                    break;
                };
                let peer = port.peer_addr();
                server.multi.add(Box::new(port));
                info!(
                    "Accepted connection from {}, {} attached",
                    peer,
                    server.multi.port_count()
                );
            }
            Err(e) => {
                // Also reached on a deliberate close(), which shuts the
                // listening socket down to get us out of accept.
                error!("Listening socket failed: {}", e);
                if let Some(server) = server.upgrade() {
                    server.close();
                }
                break;
            }
        }
    }
    debug!("Accept thread exiting");
}

impl Port for TcpServerPort {
    fn write(&self, data: &[u8]) -> io::Result<usize> {
        self.multi.write(data)
    }

    /// Valid while the listening socket is open. Zero attached peers is an
    /// idle server, not a dead one.
    fn is_valid(&self) -> bool {
        self.socket.lock().unwrap().is_some()
    }

    /// Shuts the listening socket down first, which unblocks the accept
    /// thread, then closes every attached port.
    fn close(&self) {
        let socket = self.socket.lock().unwrap().take();
        if let Some(listener) = socket {
            if let Err(e) = SockRef::from(&*listener).shutdown(Shutdown::Both) {
                debug!("Shutdown of listening socket failed: {}", e);
            }
        }
        self.multi.close();
    }

    fn drain(&self) -> bool {
        self.multi.drain()
    }

    fn baud_rate(&self) -> u32 {
        self.multi.baud_rate()
    }

    fn set_baud_rate(&self, baud: u32) -> bool {
        self.multi.set_baud_rate(baud)
    }

    fn set_listener(&self, listener: Arc<dyn InputListener>) {
        self.multi.set_listener(listener);
    }

    fn clear_listener(&self) {
        self.multi.clear_listener();
    }
}

impl InputListener for TcpServerPort {
    fn data_received(&self, data: &[u8]) {
        self.multi.data_received(data);
    }
}

impl Drop for TcpServerPort {
    fn drop(&mut self) {
        self.close();
    }
}
