//! Deterministic multi-node harness.
//!
//! Routes the effects of several `MeshCore`s through an in-test network
//! with a single FIFO event queue. Timers never fire on their own; tests
//! call `fire_timers` (or `settle`) to let grace periods elapse.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};

use rodyo_network::{ChannelEvent, Direction};
use rodyo_node::{Effect, MeshCore, MeshPolicy, Notice, Timer};
use rodyo_protocol::{ChannelId, MeshMessage, NodeId, NodeRole};

pub fn id(s: &str) -> NodeId {
    NodeId::new(s)
}

/// Policy used by the harness: no automatic rejoin unless a test asks.
pub fn quiet_policy() -> MeshPolicy {
    MeshPolicy {
        rejoin_on_parent_loss: false,
        ..MeshPolicy::default()
    }
}

pub struct Sim {
    nodes: BTreeMap<NodeId, MeshCore>,
    /// Channel end -> (remote node, remote end).
    links: HashMap<(NodeId, ChannelId), (NodeId, ChannelId)>,
    queue: VecDeque<(NodeId, ChannelEvent)>,
    timers: Vec<(NodeId, Timer)>,
    next_channel: u64,
    pub notices: Vec<(NodeId, Notice)>,
    /// Every record delivered, as (receiver, message).
    pub delivered: Vec<(NodeId, MeshMessage)>,
}

impl Sim {
    pub fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
            links: HashMap::new(),
            queue: VecDeque::new(),
            timers: Vec::new(),
            next_channel: 0,
            notices: Vec::new(),
            delivered: Vec::new(),
        }
    }

    pub fn add_root(&mut self, name: &str) {
        self.add(MeshCore::new(id(name), NodeRole::Root, quiet_policy()));
    }

    pub fn add_participant(&mut self, name: &str) {
        self.add(MeshCore::new(id(name), NodeRole::Participant, quiet_policy()));
    }

    pub fn add(&mut self, core: MeshCore) {
        self.nodes.insert(core.local_id().clone(), core);
    }

    pub fn core(&self, name: &str) -> &MeshCore {
        &self.nodes[&id(name)]
    }

    /// Join `name` via `entry` and run the network until quiet.
    pub fn join(&mut self, name: &str, entry: &str) {
        let node = id(name);
        let effects = self
            .nodes
            .get_mut(&node)
            .map(|core| core.join(id(entry)))
            .unwrap_or_else(|| panic!("unknown node {name}"))
            .expect("join accepted");
        self.apply(&node, effects);
        self.settle();
    }

    /// Open a channel from `from` straight to `to`, bypassing admission.
    pub fn connect_direct(&mut self, from: &str, to: &str) {
        self.apply(&id(from), vec![Effect::Dial(id(to))]);
        self.run();
    }

    pub fn command(&mut self, name: &str, f: impl FnOnce(&mut MeshCore) -> Vec<Effect>) {
        let node = id(name);
        let effects = match self.nodes.get_mut(&node) {
            Some(core) => f(core),
            None => panic!("unknown node {name}"),
        };
        self.apply(&node, effects);
        self.run();
    }

    /// Abruptly remove a node. Its peers see their channels close.
    pub fn crash(&mut self, name: &str) {
        let node = id(name);
        self.nodes.remove(&node);
        self.timers.retain(|(owner, _)| *owner != node);
        let owned: Vec<(NodeId, ChannelId)> = self
            .links
            .keys()
            .filter(|(owner, _)| *owner == node)
            .cloned()
            .collect();
        for end in owned {
            if let Some(remote) = self.links.remove(&end) {
                self.links.remove(&remote);
                self.queue
                    .push_back((remote.0, ChannelEvent::Closed { channel: remote.1 }));
            }
        }
        self.run();
    }

    /// Deliver queued events until the queue is empty.
    pub fn run(&mut self) {
        let mut steps = 0;
        while let Some((node, event)) = self.queue.pop_front() {
            steps += 1;
            assert!(steps < 100_000, "event storm");
            if let ChannelEvent::Message { message, .. } = &event {
                self.delivered.push((node.clone(), message.clone()));
            }
            let Some(core) = self.nodes.get_mut(&node) else {
                continue;
            };
            let effects = core.handle_event(event);
            self.apply(&node, effects);
        }
    }

    /// Fire every timer scheduled so far, then run.
    pub fn fire_timers(&mut self) {
        let due = std::mem::take(&mut self.timers);
        for (node, timer) in due {
            let Some(core) = self.nodes.get_mut(&node) else {
                continue;
            };
            let effects = core.on_timer(timer);
            self.apply(&node, effects);
        }
        self.run();
    }

    /// Run and fire timers until nothing is left to do.
    pub fn settle(&mut self) {
        self.run();
        for _ in 0..50 {
            if self.timers.is_empty() {
                return;
            }
            self.fire_timers();
        }
        panic!("simulation did not settle");
    }

    pub fn pending_timers(&self, name: &str) -> Vec<Timer> {
        self.timers
            .iter()
            .filter(|(n, _)| *n == id(name))
            .map(|(_, t)| *t)
            .collect()
    }

    pub fn notices_for(&self, name: &str) -> Vec<&Notice> {
        self.notices
            .iter()
            .filter(|(n, _)| *n == id(name))
            .map(|(_, notice)| notice)
            .collect()
    }

    pub fn chats_received(&self, name: &str) -> Vec<String> {
        self.notices_for(name)
            .into_iter()
            .filter_map(|n| match n {
                Notice::ChatReceived { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear_notices(&mut self) {
        self.notices.clear();
        self.delivered.clear();
    }

    pub fn node_names(&self) -> Vec<NodeId> {
        self.nodes.keys().cloned().collect()
    }

    pub fn open_links(&self) -> usize {
        self.links.len() / 2
    }

    fn allocate(&mut self) -> ChannelId {
        self.next_channel += 1;
        ChannelId(self.next_channel)
    }

    fn apply(&mut self, node: &NodeId, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Send { channel, message } => {
                    if let Some((remote, remote_channel)) = self.links.get(&(node.clone(), channel)) {
                        self.queue.push_back((
                            remote.clone(),
                            ChannelEvent::Message {
                                channel: *remote_channel,
                                message,
                            },
                        ));
                    }
                }
                Effect::Close(channel) => {
                    if let Some(remote) = self.links.remove(&(node.clone(), channel)) {
                        self.links.remove(&remote);
                        self.queue
                            .push_back((node.clone(), ChannelEvent::Closed { channel }));
                        self.queue
                            .push_back((remote.0, ChannelEvent::Closed { channel: remote.1 }));
                    }
                }
                Effect::Dial(peer) => {
                    if !self.nodes.contains_key(&peer) || peer == *node {
                        self.queue.push_back((
                            node.clone(),
                            ChannelEvent::DialFailed {
                                peer,
                                reason: "no such node".into(),
                            },
                        ));
                        continue;
                    }
                    let outbound = self.allocate();
                    let inbound = self.allocate();
                    self.links
                        .insert((node.clone(), outbound), (peer.clone(), inbound));
                    self.links
                        .insert((peer.clone(), inbound), (node.clone(), outbound));
                    self.queue.push_back((
                        peer.clone(),
                        ChannelEvent::Opened {
                            channel: inbound,
                            peer: node.clone(),
                            direction: Direction::Inbound,
                        },
                    ));
                    self.queue.push_back((
                        node.clone(),
                        ChannelEvent::Opened {
                            channel: outbound,
                            peer,
                            direction: Direction::Outbound,
                        },
                    ));
                }
                Effect::Schedule { timer, .. } => self.timers.push((node.clone(), timer)),
                Effect::CancelTimers(channel) => self
                    .timers
                    .retain(|(n, t)| !(n == node && t.channel() == Some(channel))),
                Effect::Notify(notice) => self.notices.push((node.clone(), notice)),
            }
        }
    }
}
