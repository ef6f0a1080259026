//! TCP transport.
//!
//! Each connection starts with one [`Hello`] line in each direction, after
//! which both sides exchange newline-delimited JSON [`MeshMessage`]s. A
//! node's identity is the `host:port` it advertises, so a dialled address
//! is also the id of the node behind it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rodyo_protocol::{ChannelId, Hello, MeshMessage, NodeId};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};

use crate::channel::{ChannelEvent, Direction, Transport};
use crate::NetworkError;

/// Configuration for the TCP transport.
#[derive(Debug, Clone)]
pub struct TcpTransportConfig {
    /// Address to accept connections on.
    pub listen_addr: String,
    /// `host:port` other nodes can reach this one at. Defaults to the bound
    /// address, which is only useful when it is not a wildcard.
    pub advertise_addr: Option<String>,
    /// Time allowed for dialling and for the hello exchange.
    pub handshake_timeout: Duration,
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        Self {
            listen_addr: rodyo_protocol::DEFAULT_LISTEN_ADDR.to_string(),
            advertise_addr: None,
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

enum Outbound {
    Frame(Vec<u8>),
    Close,
}

struct Connection {
    tx: mpsc::UnboundedSender<Outbound>,
    closing: bool,
}

struct Shared {
    local_id: NodeId,
    events: mpsc::UnboundedSender<ChannelEvent>,
    connections: Mutex<HashMap<ChannelId, Connection>>,
    next_channel: AtomicU64,
    handshake_timeout: Duration,
}

impl Shared {
    fn connections(&self) -> MutexGuard<'_, HashMap<ChannelId, Connection>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ChannelEvent) {
        let _ = self.events.send(event);
    }
}

/// Accept loop. Consumed by [`TcpHost::run`].
pub struct TcpHost {
    listener: TcpListener,
    shared: Arc<Shared>,
}

/// Cloneable handle implementing [`Transport`] over the host's connections.
#[derive(Clone)]
pub struct TcpHandle {
    shared: Arc<Shared>,
}

impl TcpHost {
    /// Bind the listener. Returns the host (run it), the transport handle and
    /// the event stream.
    pub async fn bind(
        config: TcpTransportConfig,
    ) -> Result<(Self, TcpHandle, mpsc::UnboundedReceiver<ChannelEvent>), NetworkError> {
        let listener = TcpListener::bind(&config.listen_addr).await?;
        let bound = listener.local_addr()?;
        let advertised = match config.advertise_addr {
            Some(addr) => addr,
            None => {
                if bound.ip().is_unspecified() {
                    tracing::warn!(
                        addr = %bound,
                        "Listening on a wildcard address without an advertise address; peers cannot dial this id"
                    );
                }
                bound.to_string()
            }
        };
        let local_id = NodeId::parse(&advertised)?;

        let (events, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            local_id,
            events,
            connections: Mutex::new(HashMap::new()),
            next_channel: AtomicU64::new(0),
            handshake_timeout: config.handshake_timeout,
        });
        tracing::info!(addr = %bound, node = %shared.local_id, "Mesh transport listening");

        Ok((
            Self {
                listener,
                shared: Arc::clone(&shared),
            },
            TcpHandle { shared },
            rx,
        ))
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr, NetworkError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the listener fails.
    pub async fn run(self) -> Result<(), NetworkError> {
        loop {
            let (stream, addr) = self.listener.accept().await?;
            tracing::debug!(remote = %addr, "Inbound mesh connection");
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move {
                if let Err(e) = run_connection(shared, stream, Direction::Inbound, None).await {
                    tracing::debug!(remote = %addr, error = %e, "Inbound connection ended with error");
                }
            });
        }
    }
}

impl Transport for TcpHandle {
    fn local_id(&self) -> &NodeId {
        &self.shared.local_id
    }

    fn dial(&self, peer: &NodeId) {
        let shared = Arc::clone(&self.shared);
        let peer = peer.clone();
        tokio::spawn(async move {
            let connect = tokio::time::timeout(
                shared.handshake_timeout,
                TcpStream::connect(peer.as_str()),
            )
            .await;
            let stream = match connect {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    shared.emit(ChannelEvent::DialFailed {
                        peer,
                        reason: e.to_string(),
                    });
                    return;
                }
                Err(_) => {
                    shared.emit(ChannelEvent::DialFailed {
                        peer,
                        reason: "connect timed out".into(),
                    });
                    return;
                }
            };
            if let Err(e) =
                run_connection(Arc::clone(&shared), stream, Direction::Outbound, Some(peer)).await
            {
                tracing::debug!(error = %e, "Outbound connection ended with error");
            }
        });
    }

    fn send(&self, channel: ChannelId, message: &MeshMessage) -> bool {
        let frame = match message.encode() {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(%channel, error = %e, "Failed to encode mesh record");
                return false;
            }
        };
        let connections = self.shared.connections();
        match connections.get(&channel) {
            Some(conn) if !conn.closing => conn.tx.send(Outbound::Frame(frame)).is_ok(),
            _ => false,
        }
    }

    fn close(&self, channel: ChannelId) {
        let mut connections = self.shared.connections();
        if let Some(conn) = connections.get_mut(&channel) {
            if !conn.closing {
                conn.closing = true;
                let _ = conn.tx.send(Outbound::Close);
            }
        }
    }

    fn is_open(&self, channel: ChannelId) -> bool {
        self.shared
            .connections()
            .get(&channel)
            .is_some_and(|c| !c.closing)
    }
}

/// Drive one connection from hello to close.
///
/// Emits `Opened` after a successful hello, `Message` per decoded line, and
/// a single `Closed` once the read side ends.
async fn run_connection(
    shared: Arc<Shared>,
    stream: TcpStream,
    direction: Direction,
    dialled: Option<NodeId>,
) -> Result<(), NetworkError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    let handshake = async {
        let mut hello = serde_json::to_vec(&Hello::new(shared.local_id.clone()))
            .map_err(|e| NetworkError::Handshake(e.to_string()))?;
        hello.push(b'\n');
        writer.write_all(&hello).await?;
        writer.flush().await?;

        let line = lines
            .next_line()
            .await?
            .ok_or_else(|| NetworkError::Handshake("connection closed before hello".into()))?;
        let remote: Hello = serde_json::from_str(&line)
            .map_err(|e| NetworkError::Handshake(format!("invalid hello: {e}")))?;
        if !remote.is_compatible() {
            return Err(NetworkError::Handshake(format!(
                "incompatible protocol '{}'",
                remote.protocol
            )));
        }
        Ok::<_, NetworkError>(remote)
    };

    let remote = match tokio::time::timeout(shared.handshake_timeout, handshake).await {
        Ok(Ok(hello)) => hello,
        Ok(Err(e)) => {
            if let Some(peer) = dialled {
                shared.emit(ChannelEvent::DialFailed {
                    peer,
                    reason: e.to_string(),
                });
            }
            return Err(e);
        }
        Err(_) => {
            let e = NetworkError::Handshake("hello timed out".into());
            if let Some(peer) = dialled {
                shared.emit(ChannelEvent::DialFailed {
                    peer,
                    reason: e.to_string(),
                });
            }
            return Err(e);
        }
    };

    // Outbound channels keep the dialled id so the caller can match it
    // against the peer it asked for.
    let peer = match dialled {
        Some(dialled) => {
            if dialled != remote.node_id {
                tracing::debug!(
                    dialled = %dialled,
                    announced = %remote.node_id,
                    "Peer announced a different id than the address dialled"
                );
            }
            dialled
        }
        None => remote.node_id,
    };

    let channel = ChannelId(shared.next_channel.fetch_add(1, Ordering::Relaxed) + 1);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    shared
        .connections()
        .insert(channel, Connection { tx, closing: false });
    shared.emit(ChannelEvent::Opened {
        channel,
        peer: peer.clone(),
        direction,
    });
    tracing::debug!(%channel, peer = %peer, ?direction, "Mesh channel open");

    let writer_task = tokio::spawn(async move {
        while let Some(out) = rx.recv().await {
            match out {
                Outbound::Frame(mut frame) => {
                    frame.push(b'\n');
                    if writer.write_all(&frame).await.is_err() || writer.flush().await.is_err() {
                        break;
                    }
                }
                Outbound::Close => break,
            }
        }
        let _ = writer.shutdown().await;
        let _ = stop_tx.send(());
    });

    let mut result = Ok(());
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match MeshMessage::decode(line.as_bytes()) {
                        Ok(message) => shared.emit(ChannelEvent::Message { channel, message }),
                        Err(e) => {
                            tracing::debug!(%channel, error = %e, "Dropping malformed record");
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    result = Err(e.into());
                    break;
                }
            },
            _ = &mut stop_rx => break,
        }
    }

    if shared.connections().remove(&channel).is_some() {
        shared.emit(ChannelEvent::Closed { channel });
        tracing::debug!(%channel, peer = %peer, "Mesh channel closed");
    }
    writer_task.abort();
    result
}
