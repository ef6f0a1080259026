use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_STATION_GENRE, DEFAULT_STATION_NAME, DEFAULT_STATION_THEME, DEFAULT_STUN_SERVERS,
};
use crate::identity::NodeId;

/// Role of a node in the overlay tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    /// The broadcaster; owns the topology directory and the station config.
    Root,
    /// Any other node: one parent, up to `MAX_CHILDREN` children.
    Participant,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Root => "root",
            Self::Participant => "participant",
        };
        write!(f, "{s}")
    }
}

/// Network parameters replicated with the station config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkParams {
    #[serde(default = "default_stun_servers")]
    pub stun_servers: Vec<String>,
}

impl Default for NetworkParams {
    fn default() -> Self {
        Self {
            stun_servers: default_stun_servers(),
        }
    }
}

fn default_stun_servers() -> Vec<String> {
    DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect()
}

/// Station configuration owned by the root and replicated to every node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationConfig {
    #[serde(default)]
    pub handle: String,
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_genre")]
    pub genre: String,
    #[serde(default = "default_theme")]
    pub theme: String,
    #[serde(default)]
    pub network: NetworkParams,
}

fn default_name() -> String {
    DEFAULT_STATION_NAME.to_string()
}

fn default_genre() -> String {
    DEFAULT_STATION_GENRE.to_string()
}

fn default_theme() -> String {
    DEFAULT_STATION_THEME.to_string()
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            handle: String::new(),
            name: default_name(),
            genre: default_genre(),
            theme: default_theme(),
            network: NetworkParams::default(),
        }
    }
}

impl StationConfig {
    /// Canonical form of an operator-edited config.
    ///
    /// The handle is lower-cased with whitespace runs collapsed to `-`;
    /// blank name, genre and theme fall back to the station defaults.
    pub fn normalized(mut self) -> Self {
        self.handle = normalize_handle(&self.handle);
        if self.name.trim().is_empty() {
            self.name = default_name();
        }
        if self.genre.trim().is_empty() {
            self.genre = default_genre();
        }
        if self.theme.trim().is_empty() {
            self.theme = default_theme();
        }
        self
    }

    /// Title shown by front-ends, e.g. `RODYO STATION // RODYO`.
    pub fn title(&self) -> String {
        format!("{} // RODYO", self.name)
    }
}

/// Lower-case, trim, and replace every whitespace run with a single `-`.
pub fn normalize_handle(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

/// A listener as shown in the root's operator peer list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerView {
    pub node_id: NodeId,
    /// True when the node is a direct child of the root (and thus kickable).
    pub direct: bool,
    pub parent_id: Option<NodeId>,
    pub child_count: usize,
}

/// Snapshot of a node's position in the mesh, for operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshSummary {
    pub node_id: NodeId,
    pub role: NodeRole,
    pub parent_id: Option<NodeId>,
    /// Node currently being dialled as the next parent, if any.
    pub pending_parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub direct_child_count: usize,
    /// Known listeners below the root (`|directory| - 1`); root only.
    pub total_listeners: Option<usize>,
    pub kicked: bool,
}
