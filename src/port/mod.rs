//! Logical communication ports.
//!
//! - [`Port`] / [`InputListener`] - The capability traits everything else
//!   implements or consumes
//! - [`StreamPort`] - One TCP connection with a background reader
//! - [`MultiPort`] - Aggregate that fans writes out over many child ports
//! - [`TcpServerPort`] - Listening socket whose accepted connections feed a
//!   [`MultiPort`]

pub mod multi;
pub mod server;
pub mod stream;
pub mod traits;

pub use multi::MultiPort;
pub use server::TcpServerPort;
pub use stream::StreamPort;
pub use traits::{DEFAULT_BAUD_RATE, InputListener, Port};
