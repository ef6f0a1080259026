//! Node configuration, loaded from TOML.
//!
//! Every section and field has a default, so an empty or missing file is
//! a valid configuration. CLI flags are applied on top by the binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rodyo_protocol::{
    NodeRole, DEFAULT_LISTEN_ADDR, DEFAULT_RPC_BIND_ADDR, KICK_GRACE_MS, MAX_CHILDREN,
    REDIRECT_GRACE_MS, REJOIN_DELAY_MS, STATION_PUSH_DELAY_MS,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::MeshPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid station file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No configuration directory available on this platform")]
    NoConfigDir,

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Role and identity settings.
    pub node: NodeSection,
    /// Mesh transport settings.
    pub network: NetworkSection,
    /// Tree maintenance timings.
    pub mesh: MeshSection,
    /// Operator JSON-RPC server.
    pub rpc: RpcSection,
    pub logging: LoggingSection,
    /// Where the root keeps its station config. Defaults next to the
    /// config file.
    pub station_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// `root` for the broadcaster, `participant` for listeners.
    pub role: NodeRole,
    /// Node to dial on startup (participants).
    pub entry_point: Option<String>,
    /// Overrides the default chat name.
    pub display_name: Option<String>,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            role: NodeRole::Participant,
            entry_point: None,
            display_name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSection {
    /// TCP listener address for mesh connections.
    pub listen_addr: String,
    /// `host:port` peers should dial; becomes this node's id.
    pub advertise_addr: Option<String>,
    /// Time allowed for dialling and the hello exchange.
    pub handshake_timeout_secs: u64,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            advertise_addr: None,
            handshake_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshSection {
    /// Fanout limit, at most `MAX_CHILDREN`.
    pub max_children: usize,
    /// How long a redirected arrival stays connected to the root.
    pub redirect_grace_ms: u64,
    /// How long a kicked child stays connected after the kick.
    pub kick_grace_ms: u64,
    /// Delay before pushing the station config to a new child.
    pub station_push_delay_ms: u64,
    pub rejoin_on_parent_loss: bool,
    /// Base delay before rejoining; jittered at runtime.
    pub rejoin_delay_ms: u64,
}

impl Default for MeshSection {
    fn default() -> Self {
        Self {
            max_children: MAX_CHILDREN,
            redirect_grace_ms: REDIRECT_GRACE_MS,
            kick_grace_ms: KICK_GRACE_MS,
            station_push_delay_ms: STATION_PUSH_DELAY_MS,
            rejoin_on_parent_loss: true,
            rejoin_delay_ms: REJOIN_DELAY_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcSection {
    pub enabled: bool,
    /// TCP listener address.
    pub bind_addr: String,
    /// Maximum concurrent operator connections.
    pub max_connections: usize,
}

impl Default for RpcSection {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_addr: DEFAULT_RPC_BIND_ADDR.to_string(),
            max_connections: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// `tracing` filter directive; `RUST_LOG` takes precedence.
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl NodeConfig {
    /// `<config dir>/rodyo/config.toml`.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        Ok(dirs::config_dir()
            .ok_or(ConfigError::NoConfigDir)?
            .join("rodyo")
            .join("config.toml"))
    }

    /// Load from `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.role == NodeRole::Root && self.node.entry_point.is_some() {
            return Err(ConfigError::Invalid(
                "a root node cannot have an entry_point".into(),
            ));
        }
        if !(1..=MAX_CHILDREN).contains(&self.mesh.max_children) {
            return Err(ConfigError::Invalid(format!(
                "mesh.max_children must be between 1 and {MAX_CHILDREN}"
            )));
        }
        if self.rpc.max_connections == 0 {
            return Err(ConfigError::Invalid("rpc.max_connections must be at least 1".into()));
        }
        Ok(())
    }

    /// Station file location: `station_path`, or `station.json` beside the
    /// default config file.
    pub fn station_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.station_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::default_path()?.with_file_name("station.json")),
        }
    }

    pub fn policy(&self) -> MeshPolicy {
        MeshPolicy {
            max_children: self.mesh.max_children,
            redirect_grace: Duration::from_millis(self.mesh.redirect_grace_ms),
            kick_grace: Duration::from_millis(self.mesh.kick_grace_ms),
            station_push_delay: Duration::from_millis(self.mesh.station_push_delay_ms),
            rejoin_on_parent_loss: self.mesh.rejoin_on_parent_loss,
            rejoin_delay: Duration::from_millis(self.mesh.rejoin_delay_ms),
        }
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.network.handshake_timeout_secs)
    }
}
