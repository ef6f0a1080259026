use serde::{Deserialize, Serialize};

use crate::identity::NodeId;
use crate::types::StationConfig;
use crate::ProtocolError;

/// Every record a node may send over a mesh channel.
///
/// The set is closed: records with any other `type` tag are rejected by
/// [`MeshMessage::decode`] and dropped at the transport boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MeshMessage {
    /// Admission decision: reconnect to `target_id` instead. Point-to-point.
    #[serde(rename = "MESH_REDIRECT")]
    Redirect {
        #[serde(rename = "targetId")]
        target_id: NodeId,
    },

    /// A participant's current direct children, travelling toward the root.
    #[serde(rename = "MESH_REPORT")]
    MeshReport {
        #[serde(rename = "peerId")]
        peer_id: NodeId,
        children: Vec<NodeId>,
    },

    /// Replicated station configuration. Flooded, idempotent at receivers.
    #[serde(rename = "STATION_UPDATE")]
    StationUpdate { config: StationConfig },

    /// Instructs a direct child to disconnect. Point-to-point.
    #[serde(rename = "MOD_KICK")]
    Kick,

    /// Chat line, relayed verbatim.
    #[serde(rename = "chat")]
    Chat {
        user: String,
        #[serde(rename = "msg")]
        text: String,
    },
}

impl MeshMessage {
    /// Wire tag, for logs and traces.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Redirect { .. } => "MESH_REDIRECT",
            Self::MeshReport { .. } => "MESH_REPORT",
            Self::StationUpdate { .. } => "STATION_UPDATE",
            Self::Kick => "MOD_KICK",
            Self::Chat { .. } => "chat",
        }
    }

    /// Whether this record travels by flood-on-tree rather than point-to-point.
    pub fn is_flooded(&self) -> bool {
        matches!(self, Self::Chat { .. } | Self::StationUpdate { .. })
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode one wire record. Unknown tags and malformed payloads are
    /// reported as [`ProtocolError::Malformed`].
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

/// First record on every transport connection, in both directions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub protocol: String,
    pub node_id: NodeId,
}

impl Hello {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            protocol: crate::PROTOCOL_VERSION.to_string(),
            node_id,
        }
    }

    pub fn is_compatible(&self) -> bool {
        self.protocol == crate::PROTOCOL_VERSION
    }
}
