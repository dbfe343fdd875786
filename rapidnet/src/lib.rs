//! A TCP connection engine for length-prefixed binary protocols.
//!
//! [`TcpServer`] accepts connections up to a configured limit, and [`TcpClient`]
//! dials a single outbound connection. Either way each socket is wrapped in a
//! [`Connection`], which runs one receive task and one send task over a
//! pluggable [`PacketHandler`]. Decoded frames are delivered on the
//! connection's own bounded channel, while lifecycle changes and I/O faults for
//! every connection are funnelled into a single stream of [`ConnectionEvent`]s.

pub mod id;
pub use id::*;

pub mod error;
pub use error::*;

pub mod config;
pub use config::*;

pub mod codec;
pub use codec::*;

mod event;
pub use event::*;

mod connection;
pub use connection::*;

mod registry;
pub use registry::*;

mod server;
pub use server::*;

mod client;
pub use client::*;

mod internal {
    pub mod connection_task;
    pub use connection_task::*;
    pub mod socket;
    pub use socket::*;
}
