//! Byte-oriented ports over zero, one or many transport connections.
//!
//! The [`port::Port`] trait is the single surface a host application talks
//! to: write bytes, watch validity, register a listener for input. Behind it
//! sit a plain TCP connection ([`port::StreamPort`]), an aggregate of many
//! connections ([`port::MultiPort`]), and a listening server that aggregates
//! whatever connects to it ([`port::TcpServerPort`]). The binary in this
//! crate wires a server port up as a small broadcast hub.

pub mod port;

pub use port::{DEFAULT_BAUD_RATE, InputListener, MultiPort, Port, StreamPort, TcpServerPort};
