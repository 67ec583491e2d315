//! Object-safe port capability traits.
//!
//! A port is a byte-oriented communication endpoint. Everything that moves
//! bytes in this crate hides behind [`Port`], so callers can hold a
//! `Box<dyn Port>` and not care whether it is a single TCP connection, a
//! listening server, or an aggregate of many connections.
//!
//! # Traits
//!
//! - [`Port`] - Can accept outbound bytes and report its liveness
//! - [`InputListener`] - Can receive inbound bytes pushed by a port

use std::io;
use std::sync::Arc;

/// Line rate reported by ports whose transport has no configurable rate.
///
/// Network and aggregate ports still answer [`Port::baud_rate`] so that
/// callers sizing buffers or timeouts for serial devices keep working; this
/// nominal value stands in for the real thing.
pub const DEFAULT_BAUD_RATE: u32 = 19200;

/// Passive receiver for inbound bytes.
///
/// A port pushes every chunk it reads to its registered listener, from
/// whatever thread the port reads on. Implementations must not block for
/// long and must not assume `data` survives the call; copy it out if needed.
pub trait InputListener: Send + Sync {
    fn data_received(&self, data: &[u8]);
}

/// Byte-oriented communication endpoint.
///
/// All methods take `&self`: a port is shared freely between threads and
/// synchronizes internally. Writes from one thread run concurrently with
/// reads delivered on the port's own reader thread.
pub trait Port: Send + Sync {
    /// Attempts to send `data`, returning how many bytes were accepted.
    ///
    /// `Ok(n)` with `n < data.len()` is a partial (or, for lossy transports,
    /// dropped) write, not an error. `Err` means the attempt failed outright;
    /// check [`Port::is_valid`] afterwards to tell a dead transport from a
    /// transient failure.
    fn write(&self, data: &[u8]) -> io::Result<usize>;

    /// Whether the underlying transport is still usable.
    ///
    /// Once this returns `false` it never returns `true` again.
    fn is_valid(&self) -> bool;

    /// Releases the transport and stops delivering input.
    ///
    /// Safe to call any number of times; calls after the first are no-ops.
    fn close(&self);

    /// Blocks until locally buffered output has been handed to the transport.
    ///
    /// Returns `false` if the port cannot tell.
    fn drain(&self) -> bool;

    /// The configured line rate, or [`DEFAULT_BAUD_RATE`] where none exists.
    fn baud_rate(&self) -> u32;

    /// Requests a new line rate. Ports without one accept and ignore it,
    /// returning `true`.
    fn set_baud_rate(&self, baud: u32) -> bool;

    /// Registers the receiver for inbound bytes, replacing any previous one.
    ///
    /// The port never closes or otherwise manages the listener's lifetime;
    /// replacing it only drops the port's reference.
    fn set_listener(&self, listener: Arc<dyn InputListener>);

    /// Removes the registered receiver. Subsequent input is discarded.
    fn clear_listener(&self);
}

impl InputListener for Arc<dyn InputListener> {
    fn data_received(&self, data: &[u8]) {
        (**self).data_received(data)
    }
}
