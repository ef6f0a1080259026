use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Opaque, globally unique identity of a mesh node.
///
/// Handed out by the transport when a node first becomes reachable and
/// never changed afterwards. The TCP transport uses the advertised
/// `host:port`; the in-memory transport uses whatever name it was given.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Validating constructor for identities arriving from the outside
    /// (CLI flags, RPC params, transport hellos).
    pub fn parse(id: &str) -> Result<Self, ProtocolError> {
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(ProtocolError::InvalidIdentity("empty node id".into()));
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(ProtocolError::InvalidIdentity(format!(
                "node id '{trimmed}' contains whitespace"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First `n` characters, used in operator-facing labels.
    pub fn prefix(&self, n: usize) -> &str {
        match self.0.char_indices().nth(n) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Handle for one end of one point-to-point channel.
///
/// Allocated by the transport; unique for the lifetime of a process and
/// never reused, so a stale id can always be told apart from a live one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch#{}", self.0)
    }
}
