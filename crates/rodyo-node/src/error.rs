use rodyo_hierarchy::HierarchyError;
use rodyo_protocol::NodeId;
use thiserror::Error;

use crate::ConfigError;

/// Errors surfaced to operators by mesh commands.
#[derive(Debug, Error)]
pub enum MeshError {
    #[error("Only the root can do that")]
    NotRoot,

    #[error("The root does not join another node")]
    RootCannotJoin,

    #[error("Already attached or joining via {0}")]
    AlreadyJoined(NodeId),

    #[error("{0} is not a direct child of this node")]
    UnknownChild(NodeId),

    #[error("Hierarchy error: {0}")]
    Hierarchy(#[from] HierarchyError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Mesh node has stopped")]
    NodeStopped,
}
