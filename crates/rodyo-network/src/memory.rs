//! In-process transport.
//!
//! A [`MemoryNetwork`] is a hub that any number of nodes register with.
//! Dialling allocates a pair of channel ends, one per node, and records are
//! passed through the wire codec so they are decoded exactly as they would
//! be off a socket.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rodyo_protocol::{ChannelId, MeshMessage, NodeId};
use tokio::sync::mpsc;

use crate::channel::{ChannelEvent, Direction, Transport};
use crate::NetworkError;

struct ChannelEnd {
    owner: NodeId,
    peer_channel: ChannelId,
}

#[derive(Default)]
struct Hub {
    nodes: HashMap<NodeId, mpsc::UnboundedSender<ChannelEvent>>,
    ends: HashMap<ChannelId, ChannelEnd>,
    next_channel: u64,
}

impl Hub {
    fn allocate(&mut self) -> ChannelId {
        self.next_channel += 1;
        ChannelId(self.next_channel)
    }

    fn deliver(&self, node: &NodeId, event: ChannelEvent) {
        if let Some(tx) = self.nodes.get(node) {
            // A dropped receiver means the node shut down; nothing to do.
            let _ = tx.send(event);
        }
    }

    /// Remove both ends of the channel `channel` belongs to. Returns the
    /// owners of the two ends, in that order.
    fn unlink(&mut self, channel: ChannelId) -> Option<((NodeId, ChannelId), (NodeId, ChannelId))> {
        let local = self.ends.remove(&channel)?;
        let remote = self.ends.remove(&local.peer_channel)?;
        Some((
            (local.owner, channel),
            (remote.owner, local.peer_channel),
        ))
    }
}

/// Shared hub connecting in-memory transports.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    hub: Arc<Mutex<Hub>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Hub> {
        self.hub.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach a node to the hub under `id`.
    pub fn register(
        &self,
        id: NodeId,
    ) -> Result<(MemoryTransport, mpsc::UnboundedReceiver<ChannelEvent>), NetworkError> {
        let mut hub = self.lock();
        if hub.nodes.contains_key(&id) {
            return Err(NetworkError::DuplicateNode(id));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        hub.nodes.insert(id.clone(), tx);
        tracing::debug!(node = %id, "Registered with memory network");
        Ok((
            MemoryTransport {
                local_id: id,
                network: self.clone(),
            },
            rx,
        ))
    }

    /// Abruptly remove a node, as if its process died. Every peer of the
    /// node sees its channel end close; the node itself gets no events.
    pub fn disconnect(&self, id: &NodeId) {
        let mut hub = self.lock();
        hub.nodes.remove(id);
        let owned: Vec<ChannelId> = hub
            .ends
            .iter()
            .filter(|(_, end)| end.owner == *id)
            .map(|(ch, _)| *ch)
            .collect();
        for channel in owned {
            if let Some((_, (remote, remote_channel))) = hub.unlink(channel) {
                hub.deliver(
                    &remote,
                    ChannelEvent::Closed {
                        channel: remote_channel,
                    },
                );
            }
        }
        tracing::debug!(node = %id, "Disconnected from memory network");
    }

    pub fn is_registered(&self, id: &NodeId) -> bool {
        self.lock().nodes.contains_key(id)
    }

    /// Open channels, counting each pair once.
    pub fn open_channels(&self) -> usize {
        self.lock().ends.len() / 2
    }
}

/// One node's handle onto a [`MemoryNetwork`].
#[derive(Clone)]
pub struct MemoryTransport {
    local_id: NodeId,
    network: MemoryNetwork,
}

impl Transport for MemoryTransport {
    fn local_id(&self) -> &NodeId {
        &self.local_id
    }

    fn dial(&self, peer: &NodeId) {
        let mut hub = self.network.lock();
        if *peer == self.local_id || !hub.nodes.contains_key(peer) {
            let reason = if *peer == self.local_id {
                "cannot dial self"
            } else {
                "no such node"
            };
            hub.deliver(
                &self.local_id,
                ChannelEvent::DialFailed {
                    peer: peer.clone(),
                    reason: reason.to_string(),
                },
            );
            return;
        }

        let outbound = hub.allocate();
        let inbound = hub.allocate();
        hub.ends.insert(
            outbound,
            ChannelEnd {
                owner: self.local_id.clone(),
                peer_channel: inbound,
            },
        );
        hub.ends.insert(
            inbound,
            ChannelEnd {
                owner: peer.clone(),
                peer_channel: outbound,
            },
        );

        hub.deliver(
            peer,
            ChannelEvent::Opened {
                channel: inbound,
                peer: self.local_id.clone(),
                direction: Direction::Inbound,
            },
        );
        hub.deliver(
            &self.local_id,
            ChannelEvent::Opened {
                channel: outbound,
                peer: peer.clone(),
                direction: Direction::Outbound,
            },
        );
    }

    fn send(&self, channel: ChannelId, message: &MeshMessage) -> bool {
        let hub = self.network.lock();
        let Some(end) = hub.ends.get(&channel).filter(|e| e.owner == self.local_id) else {
            return false;
        };
        let Some(remote) = hub.ends.get(&end.peer_channel) else {
            return false;
        };

        let decoded = match message.encode().and_then(|bytes| MeshMessage::decode(&bytes)) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(%channel, error = %e, "Dropping unencodable record");
                return false;
            }
        };
        hub.deliver(
            &remote.owner,
            ChannelEvent::Message {
                channel: end.peer_channel,
                message: decoded,
            },
        );
        true
    }

    fn close(&self, channel: ChannelId) {
        let mut hub = self.network.lock();
        let owned = hub
            .ends
            .get(&channel)
            .is_some_and(|e| e.owner == self.local_id);
        if !owned {
            return;
        }
        if let Some(((local, local_channel), (remote, remote_channel))) = hub.unlink(channel) {
            hub.deliver(
                &local,
                ChannelEvent::Closed {
                    channel: local_channel,
                },
            );
            hub.deliver(
                &remote,
                ChannelEvent::Closed {
                    channel: remote_channel,
                },
            );
        }
    }

    fn is_open(&self, channel: ChannelId) -> bool {
        self.network
            .lock()
            .ends
            .get(&channel)
            .is_some_and(|e| e.owner == self.local_id)
    }
}
