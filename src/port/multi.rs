//! Aggregate port fanning out over any number of child ports.
//!
//! [`MultiPort`] owns an unordered set of child ports and behaves as one
//! [`Port`]: writes go to every live child, input from any child is funneled
//! to the single registered listener. Children that lose their transport are
//! detected lazily and dropped the next time the set is touched, so an
//! aggregate over network connections shrinks and grows as peers come and go
//! without the owner ever managing individual connections.

use std::io;
use std::sync::{Arc, Mutex};

use tracing::info;

use super::traits::{DEFAULT_BAUD_RATE, InputListener, Port};

/// Funnel for inbound bytes, shared between the aggregate and its children.
///
/// Every child gets a handle to this as its listener, so child input keeps
/// flowing to the right place even while children are added and removed. The
/// upstream slot is the one listener registered on the aggregate itself.
struct InboundRelay {
    upstream: Mutex<Option<Arc<dyn InputListener>>>,
}

impl InputListener for InboundRelay {
    fn data_received(&self, data: &[u8]) {
        // Clone the handle out so the listener runs without the lock held.
        let listener = self.upstream.lock().unwrap().clone();
        if let Some(listener) = listener {
            listener.data_received(data);
        }
    }
}

pub struct MultiPort {
    ports: Mutex<Vec<Box<dyn Port>>>,
    relay: Arc<InboundRelay>,
}

impl MultiPort {
    pub fn new() -> Self {
        Self {
            ports: Mutex::new(Vec::new()),
            relay: Arc::new(InboundRelay {
                upstream: Mutex::new(None),
            }),
        }
    }

    /// Attaches a child port and routes its input into the aggregate.
    ///
    /// Dead children are swept out first, so a burst of reconnects cannot
    /// pile up closed ports behind the new one.
    pub fn add(&self, port: Box<dyn Port>) {
        let mut ports = self.ports.lock().unwrap();
        sweep(&mut ports);
        port.set_listener(self.relay.clone());
        ports.push(port);
    }

    /// Number of currently attached children, including any not yet swept.
    pub fn port_count(&self) -> usize {
        self.ports.lock().unwrap().len()
    }
}

impl Default for MultiPort {
    fn default() -> Self {
        Self::new()
    }
}

/// Closes and discards every child whose transport has gone away.
///
/// Rebuilds the list instead of removing in place; the live set is usually
/// the whole set.
fn sweep(ports: &mut Vec<Box<dyn Port>>) {
    let mut live = Vec::with_capacity(ports.len());
    for port in ports.drain(..) {
        if port.is_valid() {
            live.push(port);
        } else {
            info!("Port disconnected, dropping it");
            port.close();
        }
    }
    *ports = live;
}

impl Port for MultiPort {
    /// Fans `data` out to every child and reports the best result.
    ///
    /// A child whose write fails while its transport is already dead gets
    /// closed and dropped on the spot; one that fails transiently stays. If
    /// no child accepted anything the aggregate as a whole failed, which
    /// surfaces as [`io::ErrorKind::NotConnected`].
    fn write(&self, data: &[u8]) -> io::Result<usize> {
        let mut ports = self.ports.lock().unwrap();
        let mut best: Option<usize> = None;
        let mut kept = Vec::with_capacity(ports.len());
        for port in ports.drain(..) {
            match port.write(data) {
                Ok(written) => {
                    best = Some(best.map_or(written, |b| b.max(written)));
                    kept.push(port);
                }
                Err(_) if !port.is_valid() => {
                    info!("Write failed on dead port, dropping it");
                    port.close();
                }
                Err(_) => kept.push(port),
            }
        }
        *ports = kept;
        best.ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "no live port accepted the write")
        })
    }

    /// The aggregate is valid while it has at least one live child.
    ///
    /// Checking sweeps, so a `false` here means the set really is empty, not
    /// merely full of corpses.
    fn is_valid(&self) -> bool {
        let mut ports = self.ports.lock().unwrap();
        sweep(&mut ports);
        !ports.is_empty()
    }

    fn close(&self) {
        let mut ports = self.ports.lock().unwrap();
        for port in ports.drain(..) {
            port.close();
        }
    }

    /// Nothing is buffered at the aggregate level.
    fn drain(&self) -> bool {
        true
    }

    /// Children may sit on wildly different transports, so no single rate is
    /// meaningful; report the nominal one.
    fn baud_rate(&self) -> u32 {
        DEFAULT_BAUD_RATE
    }

    fn set_baud_rate(&self, _baud: u32) -> bool {
        true
    }

    fn set_listener(&self, listener: Arc<dyn InputListener>) {
        *self.relay.upstream.lock().unwrap() = Some(listener);
    }

    fn clear_listener(&self) {
        *self.relay.upstream.lock().unwrap() = None;
    }
}

impl InputListener for MultiPort {
    fn data_received(&self, data: &[u8]) {
        self.relay.data_received(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Scripted port: validity and write outcome are flipped from the test
    /// through the shared handle, even after the box moved into the aggregate.
    struct FakeShared {
        valid: AtomicBool,
        /// `Some(n)` means writes succeed reporting `n` bytes, `None` means
        /// they fail.
        write_result: Mutex<Option<usize>>,
        written: Mutex<Vec<Vec<u8>>>,
        close_calls: AtomicUsize,
        listener: Mutex<Option<Arc<dyn InputListener>>>,
    }

    struct FakePort {
        shared: Arc<FakeShared>,
    }

    impl FakePort {
        fn new(write_result: Option<usize>) -> (Box<dyn Port>, Arc<FakeShared>) {
            let shared = Arc::new(FakeShared {
                valid: AtomicBool::new(true),
                write_result: Mutex::new(write_result),
                written: Mutex::new(Vec::new()),
                close_calls: AtomicUsize::new(0),
                listener: Mutex::new(None),
            });
            let port = Box::new(FakePort {
                shared: shared.clone(),
            });
            (port, shared)
        }
    }

    impl Port for FakePort {
        fn write(&self, data: &[u8]) -> io::Result<usize> {
            match *self.shared.write_result.lock().unwrap() {
                Some(n) => {
                    self.shared.written.lock().unwrap().push(data.to_vec());
                    Ok(n)
                }
                None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "scripted failure")),
            }
        }

        fn is_valid(&self) -> bool {
            self.shared.valid.load(Ordering::Relaxed)
        }

        fn close(&self) {
            self.shared.close_calls.fetch_add(1, Ordering::Relaxed);
            self.shared.valid.store(false, Ordering::Relaxed);
        }

        fn drain(&self) -> bool {
            true
        }

        fn baud_rate(&self) -> u32 {
            DEFAULT_BAUD_RATE
        }

        fn set_baud_rate(&self, _baud: u32) -> bool {
            true
        }

        fn set_listener(&self, listener: Arc<dyn InputListener>) {
            *self.shared.listener.lock().unwrap() = Some(listener);
        }

        fn clear_listener(&self) {
            *self.shared.listener.lock().unwrap() = None;
        }
    }

    #[derive(Default)]
    struct RecordingListener {
        chunks: Mutex<Vec<Vec<u8>>>,
    }

    impl InputListener for RecordingListener {
        fn data_received(&self, data: &[u8]) {
            self.chunks.lock().unwrap().push(data.to_vec());
        }
    }

    #[test]
    fn test_empty_multiport_is_invalid() {
        let multi = MultiPort::new();
        assert!(!multi.is_valid());
        assert_eq!(multi.port_count(), 0);
    }

    #[test]
    fn test_write_on_empty_is_not_connected() {
        let multi = MultiPort::new();
        let err = multi.write(b"hello").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[test]
    fn test_add_registers_relay_as_listener() {
        let multi = MultiPort::new();
        let (port, shared) = FakePort::new(Some(1));
        multi.add(port);
        assert_eq!(multi.port_count(), 1);
        assert!(multi.is_valid());
        assert!(shared.listener.lock().unwrap().is_some());
    }

    #[test]
    fn test_add_sweeps_dead_ports_first() {
        let multi = MultiPort::new();
        let (a, a_shared) = FakePort::new(Some(1));
        multi.add(a);
        a_shared.valid.store(false, Ordering::Relaxed);

        let (b, _) = FakePort::new(Some(1));
        multi.add(b);

        assert_eq!(multi.port_count(), 1);
        assert_eq!(a_shared.close_calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_validity_check_prunes_dead_ports() {
        let multi = MultiPort::new();
        let (a, a_shared) = FakePort::new(Some(1));
        let (b, b_shared) = FakePort::new(Some(1));
        multi.add(a);
        multi.add(b);

        a_shared.valid.store(false, Ordering::Relaxed);
        assert!(multi.is_valid());
        assert_eq!(multi.port_count(), 1);
        assert_eq!(a_shared.close_calls.load(Ordering::Relaxed), 1);

        b_shared.valid.store(false, Ordering::Relaxed);
        assert!(!multi.is_valid());
        assert_eq!(multi.port_count(), 0);
        assert_eq!(b_shared.close_calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_write_fans_out_and_returns_best_result() {
        let multi = MultiPort::new();
        let (a, a_shared) = FakePort::new(Some(3));
        let (b, b_shared) = FakePort::new(Some(7));
        let (c, c_shared) = FakePort::new(Some(5));
        multi.add(a);
        multi.add(b);
        multi.add(c);

        let written = multi.write(b"0123456789").unwrap();
        assert_eq!(written, 7);
        for shared in [&a_shared, &b_shared, &c_shared] {
            assert_eq!(*shared.written.lock().unwrap(), vec![b"0123456789".to_vec()]);
        }
    }

    #[test]
    fn test_write_drops_failed_dead_port() {
        let multi = MultiPort::new();
        let (a, a_shared) = FakePort::new(Some(4));
        let (b, b_shared) = FakePort::new(Some(4));
        multi.add(a);
        multi.add(b);

        *a_shared.write_result.lock().unwrap() = None;
        a_shared.valid.store(false, Ordering::Relaxed);

        let written = multi.write(b"data").unwrap();
        assert_eq!(written, 4);
        assert_eq!(multi.port_count(), 1);
        assert_eq!(a_shared.close_calls.load(Ordering::Relaxed), 1);
        assert_eq!(b_shared.close_calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_write_keeps_failed_but_valid_port() {
        let multi = MultiPort::new();
        let (a, a_shared) = FakePort::new(None);
        let (b, _) = FakePort::new(Some(2));
        multi.add(a);
        multi.add(b);

        let written = multi.write(b"xy").unwrap();
        assert_eq!(written, 2);
        assert_eq!(multi.port_count(), 2);
        assert_eq!(a_shared.close_calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_write_fails_when_every_child_fails() {
        let multi = MultiPort::new();
        let (a, _a_shared) = FakePort::new(None);
        multi.add(a);

        let err = multi.write(b"xy").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
        // Still valid, so the failure was transient from the caller's view.
        assert_eq!(multi.port_count(), 1);
    }

    #[test]
    fn test_close_closes_each_child_once() {
        let multi = MultiPort::new();
        let (a, a_shared) = FakePort::new(Some(1));
        let (b, b_shared) = FakePort::new(Some(1));
        multi.add(a);
        multi.add(b);

        multi.close();
        assert_eq!(multi.port_count(), 0);
        assert_eq!(a_shared.close_calls.load(Ordering::Relaxed), 1);
        assert_eq!(b_shared.close_calls.load(Ordering::Relaxed), 1);

        // Closing again finds no children and must not double-close.
        multi.close();
        assert_eq!(a_shared.close_calls.load(Ordering::Relaxed), 1);
        assert_eq!(b_shared.close_calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_data_received_forwards_to_listener() {
        let multi = MultiPort::new();
        let listener = Arc::new(RecordingListener::default());
        multi.set_listener(listener.clone());

        multi.data_received(&[0xAA, 0xBB]);
        assert_eq!(*listener.chunks.lock().unwrap(), vec![vec![0xAA, 0xBB]]);
    }

    #[test]
    fn test_data_received_without_listener_is_discarded() {
        let multi = MultiPort::new();
        multi.data_received(&[1, 2, 3]);

        // Late registration does not replay earlier input.
        let listener = Arc::new(RecordingListener::default());
        multi.set_listener(listener.clone());
        assert!(listener.chunks.lock().unwrap().is_empty());
    }

    #[test]
    fn test_child_input_flows_through_relay() {
        let multi = MultiPort::new();
        let upstream = Arc::new(RecordingListener::default());
        multi.set_listener(upstream.clone());

        let (port, shared) = FakePort::new(Some(1));
        multi.add(port);

        // Speak as the child: push bytes into whatever listener it was given.
        let relay = shared.listener.lock().unwrap().clone().unwrap();
        relay.data_received(&[1, 2, 3]);
        assert_eq!(*upstream.chunks.lock().unwrap(), vec![vec![1, 2, 3]]);
    }

    #[test]
    fn test_replacing_listener_redirects_input() {
        let multi = MultiPort::new();
        let first = Arc::new(RecordingListener::default());
        let second = Arc::new(RecordingListener::default());

        multi.set_listener(first.clone());
        multi.set_listener(second.clone());
        multi.data_received(&[9]);

        assert!(first.chunks.lock().unwrap().is_empty());
        assert_eq!(*second.chunks.lock().unwrap(), vec![vec![9]]);

        multi.clear_listener();
        multi.data_received(&[8]);
        assert_eq!(second.chunks.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_nominal_baud_and_drain() {
        let multi = MultiPort::new();
        assert_eq!(multi.baud_rate(), DEFAULT_BAUD_RATE);
        assert!(multi.set_baud_rate(9600));
        assert_eq!(multi.baud_rate(), DEFAULT_BAUD_RATE);
        assert!(multi.drain());
    }
}
