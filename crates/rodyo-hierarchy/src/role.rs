use rodyo_protocol::{ChannelId, NodeId, NodeRole};

use crate::HierarchyError;

/// One live edge of the tree as seen from this node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub channel: ChannelId,
    pub peer: NodeId,
}

impl Link {
    pub fn new(channel: ChannelId, peer: NodeId) -> Self {
        Self { channel, peer }
    }
}

/// How a channel relates to this node right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelRole {
    Parent(NodeId),
    Child(NodeId),
    /// Not (or no longer) a tree edge: superseded, refused, or never accepted.
    Unknown,
}

/// Local tree position of a single node: at most one parent and a bounded,
/// ordered set of children.
#[derive(Debug, Clone)]
pub struct NodeRoleState {
    local_id: NodeId,
    role: NodeRole,
    max_children: usize,
    parent: Option<Link>,
    /// Peer being dialled to become the next parent (join or redirect).
    pending_parent: Option<NodeId>,
    children: Vec<Link>,
}

impl NodeRoleState {
    pub fn new(local_id: NodeId, role: NodeRole, max_children: usize) -> Self {
        Self {
            local_id,
            role,
            max_children,
            parent: None,
            pending_parent: None,
            children: Vec::new(),
        }
    }

    pub fn local_id(&self) -> &NodeId {
        &self.local_id
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn is_root(&self) -> bool {
        self.role == NodeRole::Root
    }

    pub fn parent(&self) -> Option<&Link> {
        self.parent.as_ref()
    }

    pub fn pending_parent(&self) -> Option<&NodeId> {
        self.pending_parent.as_ref()
    }

    pub fn children(&self) -> &[Link] {
        &self.children
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub fn child_ids(&self) -> Vec<NodeId> {
        self.children.iter().map(|l| l.peer.clone()).collect()
    }

    pub fn has_capacity(&self) -> bool {
        self.children.len() < self.max_children
    }

    pub fn child_by_peer(&self, peer: &NodeId) -> Option<&Link> {
        self.children.iter().find(|l| l.peer == *peer)
    }

    pub fn is_child(&self, channel: ChannelId) -> bool {
        self.children.iter().any(|l| l.channel == channel)
    }

    pub fn is_parent(&self, channel: ChannelId) -> bool {
        self.parent.as_ref().is_some_and(|l| l.channel == channel)
    }

    pub fn classify(&self, channel: ChannelId) -> ChannelRole {
        if let Some(parent) = self.parent.as_ref().filter(|l| l.channel == channel) {
            return ChannelRole::Parent(parent.peer.clone());
        }
        match self.children.iter().find(|l| l.channel == channel) {
            Some(child) => ChannelRole::Child(child.peer.clone()),
            None => ChannelRole::Unknown,
        }
    }

    /// Add a child edge, refusing once the fanout limit is reached.
    ///
    /// A peer that is already a child keeps its slot: the new channel
    /// replaces the old one, which is returned and from then on classifies
    /// as [`ChannelRole::Unknown`].
    pub fn accept_child(&mut self, link: Link) -> Result<Option<Link>, HierarchyError> {
        if self.is_child(link.channel) || self.is_parent(link.channel) {
            return Err(HierarchyError::DuplicateChannel(link.channel));
        }
        if let Some(slot) = self.children.iter_mut().find(|l| l.peer == link.peer) {
            return Ok(Some(std::mem::replace(slot, link)));
        }
        if !self.has_capacity() {
            return Err(HierarchyError::CapacityExceeded(self.local_id.clone()));
        }
        self.children.push(link);
        Ok(None)
    }

    pub fn remove_child(&mut self, channel: ChannelId) -> Option<Link> {
        let idx = self.children.iter().position(|l| l.channel == channel)?;
        Some(self.children.remove(idx))
    }

    /// Start dialling `peer` as the next parent.
    pub fn expect_parent(&mut self, peer: NodeId) -> Result<(), HierarchyError> {
        if self.is_root() {
            return Err(HierarchyError::RootHasNoParent);
        }
        self.pending_parent = Some(peer);
        Ok(())
    }

    pub fn clear_pending_parent(&mut self) -> Option<NodeId> {
        self.pending_parent.take()
    }

    /// Install the parent edge once the pending dial opened.
    pub fn set_parent(&mut self, link: Link) -> Result<(), HierarchyError> {
        if self.is_root() {
            return Err(HierarchyError::RootHasNoParent);
        }
        if self.is_child(link.channel) {
            return Err(HierarchyError::DuplicateChannel(link.channel));
        }
        self.pending_parent = None;
        self.parent = Some(link);
        Ok(())
    }

    /// Drop the parent edge. Returns the superseded link, after which the
    /// old channel classifies as [`ChannelRole::Unknown`].
    pub fn take_parent(&mut self) -> Option<Link> {
        self.parent.take()
    }

    /// Every open tree edge except `exclude`: parent first, then children
    /// in acceptance order.
    pub fn relay_targets(&self, exclude: Option<ChannelId>) -> Vec<ChannelId> {
        self.parent
            .iter()
            .chain(self.children.iter())
            .map(|l| l.channel)
            .filter(|c| Some(*c) != exclude)
            .collect()
    }
}
