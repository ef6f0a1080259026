//! RODYO Node - one participant of the overlay tree
//!
//! [`MeshCore`] holds the protocol logic as a plain state machine: every
//! channel event, timer and operator command goes in, a list of
//! [`Effect`]s comes out. [`MeshNode`] is the tokio runtime around it that
//! owns the transport, the timers and the shared state the operator
//! JSON-RPC server reads from.

pub mod config;
pub mod effects;
pub mod error;
pub mod log;
pub mod mesh;
pub mod node;
pub mod reconcile;
pub mod relay;
pub mod rpc_server;
pub mod station_store;

pub use config::{ConfigError, NodeConfig};
pub use effects::{Effect, Notice, Timer};
pub use error::MeshError;
pub use log::{LogCategory, LogEntry};
pub use mesh::{MeshCore, MeshPolicy};
pub use node::{MeshNode, NodeHandle, NodeState, NodeStatus};
pub use station_store::{FileStationStore, MemoryStationStore, StationStore};
