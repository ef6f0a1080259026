//! RODYO Network - point-to-point channels between mesh nodes
//!
//! The mesh core only needs open/send/close primitives and a stream of
//! channel events. This crate defines that contract ([`Transport`],
//! [`ChannelEvent`]) and two implementations:
//! - [`MemoryNetwork`]: an in-process hub for tests and simulations
//! - [`tcp`]: newline-delimited JSON over TCP with a hello handshake

pub mod channel;
pub mod error;
pub mod memory;
pub mod tcp;

pub use channel::{ChannelEvent, Direction, Transport};
pub use error::NetworkError;
pub use memory::{MemoryNetwork, MemoryTransport};
pub use tcp::{TcpHandle, TcpHost, TcpTransportConfig};
