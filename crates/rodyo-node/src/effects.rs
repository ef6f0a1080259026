//! Outputs of the mesh state machine.

use std::time::Duration;

use rodyo_protocol::{ChannelId, MeshMessage, NodeId, StationConfig};

/// Deferred work the core asks the runtime to schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timer {
    /// Close a redirected arrival once it had time to read the redirect.
    CloseAfterRedirect(ChannelId),
    /// Close a kicked child once the kick notice had time to arrive.
    CloseAfterKick(ChannelId),
    /// Push the current station config to a freshly accepted child.
    PushStation(ChannelId),
    /// Re-dial the entry point after losing the parent.
    Rejoin,
}

impl Timer {
    /// Channel the timer is bound to; cancelled when that channel closes.
    pub fn channel(&self) -> Option<ChannelId> {
        match self {
            Self::CloseAfterRedirect(ch) | Self::CloseAfterKick(ch) | Self::PushStation(ch) => {
                Some(*ch)
            }
            Self::Rejoin => None,
        }
    }
}

/// Something that happened which an operator may want to see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    ChildJoined { peer: NodeId },
    ChildLeft { peer: NodeId },
    /// Root only: an arrival was sent elsewhere.
    Placed { peer: NodeId, target: NodeId },
    ParentConnected { peer: NodeId },
    /// This node was told to reconnect under `target`.
    Redirected { target: NodeId },
    Disconnected { reason: String },
    Kicked,
    ChatReceived { user: String, text: String },
    StationApplied(StationConfig),
    TopologyChanged { total_listeners: usize },
    /// An inbound connection was refused because this node is full.
    CapacityExceeded { peer: NodeId },
    /// Root only: no capacity anywhere in the tree.
    RootFull { peer: NodeId },
}

/// Instruction for the runtime, executed in order after a handler returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Send {
        channel: ChannelId,
        message: MeshMessage,
    },
    Close(ChannelId),
    Dial(NodeId),
    Schedule {
        delay: Duration,
        timer: Timer,
    },
    CancelTimers(ChannelId),
    Notify(Notice),
}
