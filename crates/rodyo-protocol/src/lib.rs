//! RODYO Protocol - Core types and message definitions
//!
//! Defines the identities, the closed set of mesh wire records exchanged
//! between parent and child channels, the replicated station configuration,
//! and the JSON-RPC envelope used by the operator API.

pub mod constants;
pub mod error;
pub mod identity;
pub mod messages;
pub mod rpc;
pub mod types;

pub use constants::*;
pub use error::*;
pub use identity::*;
pub use messages::*;
pub use rpc::*;
pub use types::*;
