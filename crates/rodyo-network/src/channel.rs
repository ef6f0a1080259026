use rodyo_protocol::{ChannelId, MeshMessage, NodeId};

/// Which side opened a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The remote node dialled us.
    Inbound,
    /// We dialled the remote node.
    Outbound,
}

/// Events a transport delivers to the node that owns it.
///
/// For every channel the transport emits exactly one `Opened` before any
/// `Message`, and exactly one `Closed` after the last `Message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Opened {
        channel: ChannelId,
        peer: NodeId,
        direction: Direction,
    },
    /// A decoded record. Malformed records never get this far.
    Message {
        channel: ChannelId,
        message: MeshMessage,
    },
    Closed {
        channel: ChannelId,
    },
    /// An outbound dial to `peer` could not be established.
    DialFailed {
        peer: NodeId,
        reason: String,
    },
}

/// Open/send/close primitives the mesh core needs from a transport.
///
/// All operations are fire-and-forget: results surface later as
/// [`ChannelEvent`]s on the node's event stream.
pub trait Transport: Send + Sync + 'static {
    /// Identity the transport handed out for this node.
    fn local_id(&self) -> &NodeId;

    /// Start opening a channel to `peer`.
    fn dial(&self, peer: &NodeId);

    /// Queue `message` on `channel`. Returns false if the channel is not open.
    fn send(&self, channel: ChannelId, message: &MeshMessage) -> bool;

    /// Close `channel`. Safe to call at any time, including repeatedly.
    fn close(&self, channel: ChannelId);

    fn is_open(&self, channel: ChannelId) -> bool;
}
