//! The mesh protocol as a state machine.
//!
//! [`MeshCore`] owns everything one node knows: its tree position, the
//! root's topology directory, the station config and the channels awaiting
//! a scheduled close. Handlers never touch a socket or a clock; they return
//! [`Effect`]s for the runtime to execute, which keeps every protocol
//! decision deterministic and testable without a network.

use std::collections::HashSet;
use std::time::Duration;

use rodyo_hierarchy::{decide_placement, ChannelRole, Link, NodeRoleState, Placement, TopologyDirectory};
use rodyo_network::{ChannelEvent, Direction};
use rodyo_protocol::{
    ChannelId, MeshMessage, MeshSummary, NodeId, NodeRole, PeerView, StationConfig,
    KICK_GRACE_MS, MAX_CHILDREN, REDIRECT_GRACE_MS, REJOIN_DELAY_MS, STATION_PUSH_DELAY_MS,
};

use crate::reconcile::report_to_parent;
use crate::relay::flood;
use crate::{Effect, MeshError, Notice, Timer};

/// Tunables for one node.
#[derive(Debug, Clone)]
pub struct MeshPolicy {
    /// Fanout limit for this node.
    pub max_children: usize,
    /// Delay before a redirected arrival's channel is closed.
    pub redirect_grace: Duration,
    /// Delay before a kicked child's channel is closed.
    pub kick_grace: Duration,
    /// Delay before a new child gets the station config.
    pub station_push_delay: Duration,
    /// Re-dial the entry point after losing the parent (never after a kick).
    pub rejoin_on_parent_loss: bool,
    pub rejoin_delay: Duration,
}

impl Default for MeshPolicy {
    fn default() -> Self {
        Self {
            max_children: MAX_CHILDREN,
            redirect_grace: Duration::from_millis(REDIRECT_GRACE_MS),
            kick_grace: Duration::from_millis(KICK_GRACE_MS),
            station_push_delay: Duration::from_millis(STATION_PUSH_DELAY_MS),
            rejoin_on_parent_loss: true,
            rejoin_delay: Duration::from_millis(REJOIN_DELAY_MS),
        }
    }
}

pub struct MeshCore {
    role_state: NodeRoleState,
    /// Root only.
    directory: Option<TopologyDirectory>,
    station: StationConfig,
    /// False on a participant until the first config arrives.
    station_known: bool,
    /// Redirected arrivals waiting for their grace close.
    admitting: HashSet<ChannelId>,
    entry_point: Option<NodeId>,
    kicked: bool,
    display_name: Option<String>,
    policy: MeshPolicy,
}

impl MeshCore {
    pub fn new(local_id: NodeId, role: NodeRole, policy: MeshPolicy) -> Self {
        let directory = match role {
            NodeRole::Root => Some(TopologyDirectory::new(local_id.clone())),
            NodeRole::Participant => None,
        };
        Self {
            role_state: NodeRoleState::new(local_id, role, policy.max_children),
            directory,
            station: StationConfig::default(),
            station_known: role == NodeRole::Root,
            admitting: HashSet::new(),
            entry_point: None,
            kicked: false,
            display_name: None,
            policy,
        }
    }

    /// Initial station config, typically loaded from the station store.
    pub fn with_station(mut self, config: StationConfig) -> Self {
        self.station = config.normalized();
        self.station_known = true;
        self
    }

    /// Name used as the `user` of chat lines sent from this node.
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !name.trim().is_empty() {
            self.display_name = Some(name.trim().to_string());
        }
        self
    }

    pub fn local_id(&self) -> &NodeId {
        self.role_state.local_id()
    }

    pub fn role(&self) -> NodeRole {
        self.role_state.role()
    }

    pub fn is_root(&self) -> bool {
        self.role_state.is_root()
    }

    pub fn role_state(&self) -> &NodeRoleState {
        &self.role_state
    }

    pub fn directory(&self) -> Option<&TopologyDirectory> {
        self.directory.as_ref()
    }

    pub fn station(&self) -> &StationConfig {
        &self.station
    }

    pub fn station_known(&self) -> bool {
        self.station_known
    }

    pub fn is_kicked(&self) -> bool {
        self.kicked
    }

    pub fn entry_point(&self) -> Option<&NodeId> {
        self.entry_point.as_ref()
    }

    pub fn policy(&self) -> &MeshPolicy {
        &self.policy
    }

    pub fn total_listeners(&self) -> Option<usize> {
        self.directory.as_ref().map(TopologyDirectory::listener_count)
    }

    pub fn summary(&self) -> MeshSummary {
        MeshSummary {
            node_id: self.local_id().clone(),
            role: self.role(),
            parent_id: self.role_state.parent().map(|l| l.peer.clone()),
            pending_parent: self.role_state.pending_parent().cloned(),
            children: self.role_state.child_ids(),
            direct_child_count: self.role_state.child_count(),
            total_listeners: self.total_listeners(),
            kicked: self.kicked,
        }
    }

    /// Known listeners for the operator list. Empty on participants.
    pub fn peer_views(&self) -> Vec<PeerView> {
        self.directory
            .as_ref()
            .map(TopologyDirectory::peer_views)
            .unwrap_or_default()
    }

    /// `user` field for chat lines from this node.
    pub fn chat_user(&self) -> String {
        if let Some(name) = &self.display_name {
            return name.clone();
        }
        match self.role() {
            NodeRole::Root => "Broadcaster".to_string(),
            NodeRole::Participant => format!("Listener-{}", self.local_id().prefix(4)),
        }
    }

    // ─── Operator commands ───────────────────────────────────────────────

    /// Dial `entry_point` and adopt it as parent once the channel opens.
    pub fn join(&mut self, entry_point: NodeId) -> Result<Vec<Effect>, MeshError> {
        if self.is_root() {
            return Err(MeshError::RootCannotJoin);
        }
        if let Some(current) = self
            .role_state
            .parent()
            .map(|l| l.peer.clone())
            .or_else(|| self.role_state.pending_parent().cloned())
        {
            return Err(MeshError::AlreadyJoined(current));
        }
        self.kicked = false;
        self.entry_point = Some(entry_point.clone());
        self.role_state.expect_parent(entry_point.clone())?;
        tracing::info!(entry = %entry_point, "Joining mesh");
        Ok(vec![Effect::Dial(entry_point)])
    }

    pub fn send_chat(&mut self, text: &str) -> Vec<Effect> {
        let message = MeshMessage::Chat {
            user: self.chat_user(),
            text: text.to_string(),
        };
        flood(&self.role_state, &message, None)
    }

    /// Replace the station config and flood it down the tree. Root only.
    pub fn update_station(&mut self, config: StationConfig) -> Result<Vec<Effect>, MeshError> {
        if !self.is_root() {
            return Err(MeshError::NotRoot);
        }
        self.station = config.normalized();
        self.station_known = true;
        tracing::info!(station = %self.station.title(), "Station config updated");

        let message = MeshMessage::StationUpdate {
            config: self.station.clone(),
        };
        let mut effects = flood(&self.role_state, &message, None);
        effects.push(Effect::Notify(Notice::StationApplied(self.station.clone())));
        Ok(effects)
    }

    /// Tell a direct child to leave and close its channel after the grace.
    pub fn kick(&mut self, node: &NodeId) -> Result<Vec<Effect>, MeshError> {
        let channel = self
            .role_state
            .child_by_peer(node)
            .map(|l| l.channel)
            .ok_or_else(|| MeshError::UnknownChild(node.clone()))?;
        tracing::info!(peer = %node, "Kicking child");
        Ok(vec![
            Effect::Send {
                channel,
                message: MeshMessage::Kick,
            },
            Effect::Schedule {
                delay: self.policy.kick_grace,
                timer: Timer::CloseAfterKick(channel),
            },
        ])
    }

    // ─── Channel events ──────────────────────────────────────────────────

    pub fn handle_event(&mut self, event: ChannelEvent) -> Vec<Effect> {
        match event {
            ChannelEvent::Opened {
                channel,
                peer,
                direction: Direction::Inbound,
            } => self.on_inbound(channel, peer),
            ChannelEvent::Opened {
                channel,
                peer,
                direction: Direction::Outbound,
            } => self.on_outbound(channel, peer),
            ChannelEvent::Message { channel, message } => self.on_message(channel, message),
            ChannelEvent::Closed { channel } => self.on_closed(channel),
            ChannelEvent::DialFailed { peer, reason } => self.on_dial_failed(peer, reason),
        }
    }

    fn on_inbound(&mut self, channel: ChannelId, peer: NodeId) -> Vec<Effect> {
        if self.is_root() {
            self.admit(channel, peer)
        } else {
            self.accept_child(channel, peer)
        }
    }

    /// Root admission: accept, redirect to the first node with room, or refuse.
    fn admit(&mut self, channel: ChannelId, peer: NodeId) -> Vec<Effect> {
        if self.role_state.child_by_peer(&peer).is_some() {
            return self.accept_child(channel, peer);
        }
        let Some(directory) = self.directory.as_ref() else {
            return vec![Effect::Close(channel)];
        };
        let placement = decide_placement(
            directory,
            self.policy.max_children,
            self.role_state.child_count(),
            &peer,
        );
        match placement {
            Placement::Accept => self.accept_child(channel, peer),
            Placement::Redirect(target) => {
                tracing::debug!(peer = %peer, target = %target, "Redirecting arrival");
                self.admitting.insert(channel);
                vec![
                    Effect::Send {
                        channel,
                        message: MeshMessage::Redirect {
                            target_id: target.clone(),
                        },
                    },
                    Effect::Schedule {
                        delay: self.policy.redirect_grace,
                        timer: Timer::CloseAfterRedirect(channel),
                    },
                    Effect::Notify(Notice::Placed { peer, target }),
                ]
            }
            Placement::RootFull => {
                tracing::warn!(peer = %peer, "No capacity anywhere in the mesh, refusing");
                vec![Effect::Close(channel), Effect::Notify(Notice::RootFull { peer })]
            }
        }
    }

    fn accept_child(&mut self, channel: ChannelId, peer: NodeId) -> Vec<Effect> {
        let superseded = match self.role_state.accept_child(Link::new(channel, peer.clone())) {
            Ok(superseded) => superseded,
            Err(e) => {
                tracing::warn!(peer = %peer, error = %e, "Refusing child");
                return vec![
                    Effect::Close(channel),
                    Effect::Notify(Notice::CapacityExceeded { peer }),
                ];
            }
        };
        tracing::info!(peer = %peer, %channel, "Child connected");

        let mut effects = Vec::new();
        if let Some(old) = superseded {
            // Its close arrives later on an untracked channel and is ignored.
            tracing::debug!(peer = %peer, channel = %old.channel, "Child reconnected, dropping old channel");
            effects.push(Effect::CancelTimers(old.channel));
            effects.push(Effect::Close(old.channel));
        }
        effects.push(Effect::Notify(Notice::ChildJoined { peer: peer.clone() }));
        if self.station_known {
            effects.push(Effect::Schedule {
                delay: self.policy.station_push_delay,
                timer: Timer::PushStation(channel),
            });
        }

        let local_id = self.local_id().clone();
        if let Some(directory) = self.directory.as_mut() {
            // A reconnecting node starts over with no children.
            directory.detach_subtree(&peer);
            if let Err(e) = directory.attach(&local_id, &peer) {
                tracing::warn!(peer = %peer, error = %e, "Failed to record child in directory");
            }
            effects.push(Effect::Notify(Notice::TopologyChanged {
                total_listeners: directory.listener_count(),
            }));
        } else {
            effects.extend(report_to_parent(&self.role_state));
        }
        effects
    }

    fn on_outbound(&mut self, channel: ChannelId, peer: NodeId) -> Vec<Effect> {
        if self.role_state.pending_parent() != Some(&peer) {
            tracing::debug!(peer = %peer, %channel, "Unexpected outbound channel, closing");
            return vec![Effect::Close(channel)];
        }
        if let Err(e) = self.role_state.set_parent(Link::new(channel, peer.clone())) {
            tracing::warn!(peer = %peer, error = %e, "Cannot adopt parent");
            return vec![Effect::Close(channel)];
        }
        tracing::info!(peer = %peer, %channel, "Connected to parent");

        let mut effects = vec![Effect::Notify(Notice::ParentConnected { peer })];
        if self.role_state.child_count() > 0 {
            effects.extend(report_to_parent(&self.role_state));
        }
        effects
    }

    fn on_message(&mut self, channel: ChannelId, message: MeshMessage) -> Vec<Effect> {
        let role = self.role_state.classify(channel);
        tracing::trace!(%channel, kind = message.kind(), "Mesh record received");
        match message {
            MeshMessage::Chat { user, text } => {
                if role == ChannelRole::Unknown {
                    return Vec::new();
                }
                let relayed = MeshMessage::Chat {
                    user: user.clone(),
                    text: text.clone(),
                };
                let mut effects = vec![Effect::Notify(Notice::ChatReceived { user, text })];
                effects.extend(flood(&self.role_state, &relayed, Some(channel)));
                effects
            }
            MeshMessage::StationUpdate { config } => {
                if !matches!(role, ChannelRole::Parent(_)) {
                    tracing::debug!(%channel, "Ignoring station update from non-parent");
                    return Vec::new();
                }
                self.apply_station(channel, config)
            }
            MeshMessage::Redirect { target_id } => self.on_redirect(channel, role, target_id),
            MeshMessage::MeshReport { peer_id, children } => {
                self.on_report(channel, role, peer_id, children)
            }
            MeshMessage::Kick => {
                if !matches!(role, ChannelRole::Parent(_)) {
                    return Vec::new();
                }
                tracing::warn!("Removed from the station by the broadcaster");
                self.kicked = true;
                vec![Effect::Notify(Notice::Kicked)]
            }
        }
    }

    fn apply_station(&mut self, channel: ChannelId, config: StationConfig) -> Vec<Effect> {
        let mut effects = Vec::new();
        if !self.station_known || self.station != config {
            self.station = config.clone();
            self.station_known = true;
            tracing::info!(station = %config.title(), "Station config applied");
            effects.push(Effect::Notify(Notice::StationApplied(config.clone())));
        }
        let message = MeshMessage::StationUpdate { config };
        effects.extend(flood(&self.role_state, &message, Some(channel)));
        effects
    }

    fn on_redirect(&mut self, channel: ChannelId, role: ChannelRole, target: NodeId) -> Vec<Effect> {
        if !matches!(role, ChannelRole::Parent(_)) {
            return Vec::new();
        }
        if self.role_state.pending_parent().is_some() {
            tracing::debug!(target = %target, "Redirect already in progress, ignoring");
            return Vec::new();
        }
        if target == *self.local_id() {
            tracing::warn!("Redirected to self, ignoring");
            return Vec::new();
        }

        tracing::info!(target = %target, "Redirected by admission");
        self.role_state.take_parent();
        if let Err(e) = self.role_state.expect_parent(target.clone()) {
            tracing::warn!(error = %e, "Cannot follow redirect");
            return Vec::new();
        }
        vec![
            Effect::Close(channel),
            Effect::Dial(target.clone()),
            Effect::Notify(Notice::Redirected { target }),
        ]
    }

    fn on_report(
        &mut self,
        channel: ChannelId,
        role: ChannelRole,
        peer_id: NodeId,
        children: Vec<NodeId>,
    ) -> Vec<Effect> {
        if !matches!(role, ChannelRole::Child(_)) {
            tracing::debug!(%channel, peer = %peer_id, "Dropping report from non-child");
            return Vec::new();
        }

        if let Some(directory) = self.directory.as_mut() {
            let outcome = directory.apply_report(&peer_id, &children);
            if outcome.changed_membership() {
                tracing::debug!(
                    peer = %peer_id,
                    added = outcome.added.len(),
                    pruned = outcome.pruned.len(),
                    "Topology updated"
                );
            }
            return vec![Effect::Notify(Notice::TopologyChanged {
                total_listeners: directory.listener_count(),
            })];
        }

        match self.role_state.parent() {
            Some(parent) => vec![Effect::Send {
                channel: parent.channel,
                message: MeshMessage::MeshReport { peer_id, children },
            }],
            None => Vec::new(),
        }
    }

    fn on_closed(&mut self, channel: ChannelId) -> Vec<Effect> {
        let mut effects = vec![Effect::CancelTimers(channel)];
        if self.admitting.remove(&channel) {
            return effects;
        }

        match self.role_state.classify(channel) {
            ChannelRole::Child(peer) => {
                self.role_state.remove_child(channel);
                tracing::info!(peer = %peer, %channel, "Child disconnected");
                effects.push(Effect::Notify(Notice::ChildLeft { peer: peer.clone() }));

                let local_id = self.local_id().clone();
                if let Some(directory) = self.directory.as_mut() {
                    if directory.parent_of(&peer) == Some(&local_id) {
                        directory.detach_subtree(&peer);
                    }
                    effects.push(Effect::Notify(Notice::TopologyChanged {
                        total_listeners: directory.listener_count(),
                    }));
                } else {
                    effects.extend(report_to_parent(&self.role_state));
                }
            }
            ChannelRole::Parent(peer) => {
                self.role_state.take_parent();
                tracing::warn!(peer = %peer, "Disconnected from relay node");
                effects.push(Effect::Notify(Notice::Disconnected {
                    reason: format!("parent {peer} closed the channel"),
                }));
                effects.extend(self.schedule_rejoin());
            }
            ChannelRole::Unknown => {
                tracing::trace!(%channel, "Ignoring close of untracked channel");
            }
        }
        effects
    }

    fn on_dial_failed(&mut self, peer: NodeId, reason: String) -> Vec<Effect> {
        if self.role_state.pending_parent() != Some(&peer) {
            return Vec::new();
        }
        self.role_state.clear_pending_parent();
        tracing::warn!(peer = %peer, reason = %reason, "Failed to reach parent");
        let mut effects = vec![Effect::Notify(Notice::Disconnected {
            reason: format!("could not reach {peer}: {reason}"),
        })];
        effects.extend(self.schedule_rejoin());
        effects
    }

    fn schedule_rejoin(&self) -> Option<Effect> {
        if !self.policy.rejoin_on_parent_loss || self.kicked || self.entry_point.is_none() {
            return None;
        }
        Some(Effect::Schedule {
            delay: self.policy.rejoin_delay,
            timer: Timer::Rejoin,
        })
    }

    // ─── Timers ──────────────────────────────────────────────────────────

    pub fn on_timer(&mut self, timer: Timer) -> Vec<Effect> {
        match timer {
            Timer::CloseAfterRedirect(channel) => {
                if self.admitting.contains(&channel) {
                    vec![Effect::Close(channel)]
                } else {
                    Vec::new()
                }
            }
            Timer::CloseAfterKick(channel) => {
                if self.role_state.is_child(channel) {
                    vec![Effect::Close(channel)]
                } else {
                    Vec::new()
                }
            }
            Timer::PushStation(channel) => {
                if self.role_state.is_child(channel) && self.station_known {
                    vec![Effect::Send {
                        channel,
                        message: MeshMessage::StationUpdate {
                            config: self.station.clone(),
                        },
                    }]
                } else {
                    Vec::new()
                }
            }
            Timer::Rejoin => {
                if self.kicked
                    || self.role_state.parent().is_some()
                    || self.role_state.pending_parent().is_some()
                {
                    return Vec::new();
                }
                let Some(entry) = self.entry_point.clone() else {
                    return Vec::new();
                };
                if self.role_state.expect_parent(entry.clone()).is_err() {
                    return Vec::new();
                }
                tracing::info!(entry = %entry, "Rejoining mesh");
                vec![Effect::Dial(entry)]
            }
        }
    }
}
