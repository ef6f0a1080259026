use rodyo_protocol::{ChannelId, NodeId};
use thiserror::Error;

/// Errors from hierarchy state transitions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HierarchyError {
    #[error("Capacity exceeded: {0} already holds the maximum number of children")]
    CapacityExceeded(NodeId),

    #[error("The root node cannot have a parent")]
    RootHasNoParent,

    #[error("Channel {0} is already registered")]
    DuplicateChannel(ChannelId),

    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("Attaching {child} under {parent} would create a cycle")]
    Cycle { parent: NodeId, child: NodeId },

    #[error("Topology invariant violated: {0}")]
    Invariant(String),
}
