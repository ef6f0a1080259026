//! Child-list reports travelling toward the root.

use rodyo_hierarchy::NodeRoleState;
use rodyo_protocol::MeshMessage;

use crate::Effect;

/// `MESH_REPORT` describing this node's current direct children.
pub fn build_report(state: &NodeRoleState) -> MeshMessage {
    MeshMessage::MeshReport {
        peer_id: state.local_id().clone(),
        children: state.child_ids(),
    }
}

/// Report the child list to the parent. Nothing to do on the root or while
/// detached; the next parent gets a report when it is established.
pub fn report_to_parent(state: &NodeRoleState) -> Option<Effect> {
    if state.is_root() {
        return None;
    }
    state.parent().map(|parent| Effect::Send {
        channel: parent.channel,
        message: build_report(state),
    })
}
