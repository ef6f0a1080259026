//! Flood-on-tree forwarding.
//!
//! A flooded record goes out on every tree edge except the one it arrived
//! on. The overlay is a tree, so each node sees each record exactly once
//! without any duplicate suppression.

use rodyo_hierarchy::NodeRoleState;
use rodyo_protocol::{ChannelId, MeshMessage};

use crate::Effect;

/// Sends of `message` to the parent and every child, skipping `exclude`.
/// Point-to-point records are never flooded.
pub fn flood(state: &NodeRoleState, message: &MeshMessage, exclude: Option<ChannelId>) -> Vec<Effect> {
    if !message.is_flooded() {
        tracing::warn!(kind = message.kind(), "Refusing to flood a point-to-point record");
        return Vec::new();
    }
    state
        .relay_targets(exclude)
        .into_iter()
        .map(|channel| Effect::Send {
            channel,
            message: message.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rodyo_hierarchy::Link;
    use rodyo_protocol::{NodeId, NodeRole};

    fn relay_node() -> NodeRoleState {
        let mut state = NodeRoleState::new(NodeId::new("p"), NodeRole::Participant, 2);
        state.set_parent(Link::new(ChannelId(1), NodeId::new("up"))).unwrap();
        state.accept_child(Link::new(ChannelId(2), NodeId::new("a"))).unwrap();
        state.accept_child(Link::new(ChannelId(3), NodeId::new("b"))).unwrap();
        state
    }

    fn chat() -> MeshMessage {
        MeshMessage::Chat {
            user: "u".into(),
            text: "hi".into(),
        }
    }

    #[test]
    fn test_never_echoes_to_source() {
        let effects = flood(&relay_node(), &chat(), Some(ChannelId(3)));
        let channels: Vec<ChannelId> = effects
            .iter()
            .filter_map(|e| match e {
                Effect::Send { channel, .. } => Some(*channel),
                _ => None,
            })
            .collect();
        assert_eq!(channels, vec![ChannelId(1), ChannelId(2)]);
    }

    #[test]
    fn test_point_to_point_records_not_flooded() {
        assert!(flood(&relay_node(), &MeshMessage::Kick, None).is_empty());
        let redirect = MeshMessage::Redirect {
            target_id: NodeId::new("a"),
        };
        assert!(flood(&relay_node(), &redirect, None).is_empty());
        assert_eq!(flood(&relay_node(), &chat(), None).len(), 3);
    }

    #[test]
    fn test_isolated_node_sends_nothing() {
        let state = NodeRoleState::new(NodeId::new("solo"), NodeRole::Participant, 2);
        assert!(flood(&state, &chat(), None).is_empty());
    }
}
