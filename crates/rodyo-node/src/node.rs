//! Tokio runtime around [`MeshCore`].
//!
//! One task owns the transport event stream, the operator command queue and
//! the timer queue, and feeds them to the core one at a time under the state
//! write lock. Effects are executed after the lock is released, except for
//! notices which are written to the operator log.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rodyo_network::{ChannelEvent, Transport};
use rodyo_protocol::{ChannelId, MeshSummary, NodeId, PeerView, StationConfig};
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;

use crate::{Effect, LogCategory, LogEntry, MeshCore, MeshError, Notice, StationStore, Timer};

const EVENT_LOG_CAPACITY: usize = 1000;
const COMMAND_QUEUE_DEPTH: usize = 64;

/// Lifecycle of the node task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Initializing,
    Running,
    ShuttingDown,
}

/// Shared state read by the RPC server and mutated by the node task.
pub struct NodeState {
    /// Protocol state of this node.
    pub core: MeshCore,
    /// Current node status.
    pub status: NodeStatus,
    /// Operator-facing event log, oldest first.
    pub event_log: Vec<LogEntry>,
    /// Timestamp when the node task was created.
    pub start_time: chrono::DateTime<chrono::Utc>,
}

impl NodeState {
    pub fn new(core: MeshCore) -> Self {
        Self {
            core,
            status: NodeStatus::Initializing,
            event_log: Vec::new(),
            start_time: chrono::Utc::now(),
        }
    }

    /// Push a log entry, capping the log at 1000 entries.
    pub fn push_log(&mut self, category: LogCategory, message: String) {
        if self.event_log.len() >= EVENT_LOG_CAPACITY {
            self.event_log.remove(0);
        }
        self.event_log.push(LogEntry {
            timestamp: chrono::Utc::now(),
            category,
            message,
        });
    }

    /// Record a core notice in the operator log.
    pub fn push_notice(&mut self, notice: &Notice) {
        let (category, message) = match notice {
            Notice::ChildJoined { peer } => (
                LogCategory::Peer,
                format!("New listener connected: {}", peer.prefix(4)),
            ),
            Notice::ChildLeft { peer } => (
                LogCategory::Peer,
                format!("Listener disconnected: {}", peer.prefix(4)),
            ),
            Notice::Placed { peer, target } => (
                LogCategory::Topology,
                format!("Placed {} under {}", peer.prefix(4), target.prefix(4)),
            ),
            Notice::ParentConnected { peer } => {
                (LogCategory::Peer, format!("Connected to relay node {peer}"))
            }
            Notice::Redirected { target } => (
                LogCategory::Topology,
                format!("Redirecting to node: {}", target.prefix(4)),
            ),
            Notice::Disconnected { reason } => (
                LogCategory::Error,
                format!("Disconnected from relay node ({reason})"),
            ),
            Notice::Kicked => (
                LogCategory::Moderation,
                "You have been removed from the station by the broadcaster.".to_string(),
            ),
            Notice::ChatReceived { user, text } => (LogCategory::Chat, format!("{user}: {text}")),
            Notice::StationApplied(config) => (
                LogCategory::Station,
                format!("Station config applied: {}", config.title()),
            ),
            Notice::TopologyChanged { total_listeners } => (
                LogCategory::Topology,
                format!("Total listeners: {total_listeners}"),
            ),
            Notice::CapacityExceeded { peer } => (
                LogCategory::Error,
                format!("Refused {}: no free slot", peer.prefix(4)),
            ),
            Notice::RootFull { peer } => (
                LogCategory::Error,
                format!("Refused {}: mesh is full", peer.prefix(4)),
            ),
        };
        self.push_log(category, message);
    }
}

enum Command {
    Join {
        entry_point: NodeId,
        reply: oneshot::Sender<Result<(), MeshError>>,
    },
    SendChat {
        text: String,
        reply: oneshot::Sender<Result<(), MeshError>>,
    },
    UpdateStation {
        config: StationConfig,
        reply: oneshot::Sender<Result<StationConfig, MeshError>>,
    },
    Kick {
        node: NodeId,
        reply: oneshot::Sender<Result<(), MeshError>>,
    },
    Shutdown,
}

/// Cloneable handle for operators: commands go through the node task,
/// queries read the shared state directly.
#[derive(Clone)]
pub struct NodeHandle {
    commands: mpsc::Sender<Command>,
    state: Arc<RwLock<NodeState>>,
}

impl NodeHandle {
    pub fn state(&self) -> Arc<RwLock<NodeState>> {
        Arc::clone(&self.state)
    }

    async fn request<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<R, MeshError>>) -> Command,
    ) -> Result<R, MeshError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| MeshError::NodeStopped)?;
        rx.await.map_err(|_| MeshError::NodeStopped)?
    }

    pub async fn join(&self, entry_point: NodeId) -> Result<(), MeshError> {
        self.request(|reply| Command::Join { entry_point, reply }).await
    }

    pub async fn send_chat(&self, text: impl Into<String>) -> Result<(), MeshError> {
        let text = text.into();
        self.request(|reply| Command::SendChat { text, reply }).await
    }

    /// Returns the config as stored after normalisation.
    pub async fn update_station(&self, config: StationConfig) -> Result<StationConfig, MeshError> {
        self.request(|reply| Command::UpdateStation { config, reply })
            .await
    }

    pub async fn kick(&self, node: NodeId) -> Result<(), MeshError> {
        self.request(|reply| Command::Kick { node, reply }).await
    }

    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }

    pub async fn summary(&self) -> MeshSummary {
        self.state.read().await.core.summary()
    }

    pub async fn peer_views(&self) -> Vec<PeerView> {
        self.state.read().await.core.peer_views()
    }
}

/// The node task.
pub struct MeshNode<T: Transport> {
    transport: T,
    /// Channel events from the transport.
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    state: Arc<RwLock<NodeState>>,
    command_tx: mpsc::Sender<Command>,
    command_rx: mpsc::Receiver<Command>,
    timer_tx: mpsc::UnboundedSender<Timer>,
    timer_rx: mpsc::UnboundedReceiver<Timer>,
    /// Pending timers bound to a channel, aborted when it closes.
    channel_timers: HashMap<ChannelId, Vec<JoinHandle<()>>>,
    /// At most one rejoin is ever pending.
    rejoin_timer: Option<JoinHandle<()>>,
    /// Where station updates are saved before they are applied.
    station_store: Option<Box<dyn StationStore>>,
}

impl<T: Transport> MeshNode<T> {
    pub fn new(transport: T, events: mpsc::UnboundedReceiver<ChannelEvent>, core: MeshCore) -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        Self {
            transport,
            events,
            state: Arc::new(RwLock::new(NodeState::new(core))),
            command_tx,
            command_rx,
            timer_tx,
            timer_rx,
            channel_timers: HashMap::new(),
            rejoin_timer: None,
            station_store: None,
        }
    }

    /// Persist station updates made on this node.
    pub fn with_station_store(mut self, store: Box<dyn StationStore>) -> Self {
        self.station_store = Some(store);
        self
    }

    pub fn handle(&self) -> NodeHandle {
        NodeHandle {
            commands: self.command_tx.clone(),
            state: Arc::clone(&self.state),
        }
    }

    pub fn state(&self) -> Arc<RwLock<NodeState>> {
        Arc::clone(&self.state)
    }

    /// Process events until a shutdown command arrives or the transport
    /// event stream ends.
    pub async fn run(mut self) -> Result<(), anyhow::Error> {
        {
            let mut state = self.state.write().await;
            state.status = NodeStatus::Running;
            let message = format!(
                "Node {} started as {}",
                state.core.local_id(),
                state.core.role()
            );
            state.push_log(LogCategory::System, message);
        }
        tracing::info!(node = %self.transport.local_id(), "Mesh node is running");

        loop {
            tokio::select! {
                event = self.events.recv() => {
                    let Some(event) = event else {
                        tracing::warn!("Transport event stream ended");
                        break;
                    };
                    let effects = self.state.write().await.core.handle_event(event);
                    self.execute(effects).await;
                }
                Some(timer) = self.timer_rx.recv() => {
                    let effects = self.state.write().await.core.on_timer(timer);
                    self.execute(effects).await;
                }
                Some(command) = self.command_rx.recv() => {
                    if matches!(command, Command::Shutdown) {
                        break;
                    }
                    self.handle_command(command).await;
                }
            }
        }

        self.state.write().await.status = NodeStatus::ShuttingDown;
        for (_, handles) in self.channel_timers.drain() {
            handles.iter().for_each(JoinHandle::abort);
        }
        if let Some(handle) = self.rejoin_timer.take() {
            handle.abort();
        }
        tracing::info!("Mesh node stopped");
        Ok(())
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Join { entry_point, reply } => {
                let result = self.state.write().await.core.join(entry_point);
                let _ = reply.send(self.finish(result).await);
            }
            Command::SendChat { text, reply } => {
                let effects = {
                    let mut state = self.state.write().await;
                    let user = state.core.chat_user();
                    state.push_log(LogCategory::Chat, format!("{user}: {text}"));
                    state.core.send_chat(&text)
                };
                self.execute(effects).await;
                let _ = reply.send(Ok(()));
            }
            Command::UpdateStation { config, reply } => {
                let result = self.update_station(config).await;
                let _ = reply.send(result);
            }
            Command::Kick { node, reply } => {
                let result = self.state.write().await.core.kick(&node);
                if result.is_ok() {
                    self.state
                        .write()
                        .await
                        .push_log(LogCategory::Moderation, format!("Kicked listener: {node}"));
                }
                let _ = reply.send(self.finish(result).await);
            }
            Command::Shutdown => {}
        }
    }

    async fn finish(&mut self, result: Result<Vec<Effect>, MeshError>) -> Result<(), MeshError> {
        let effects = result?;
        self.execute(effects).await;
        Ok(())
    }

    /// Saves the config before applying it, so a failed save changes nothing
    /// in the mesh.
    async fn update_station(&mut self, config: StationConfig) -> Result<StationConfig, MeshError> {
        if !self.state.read().await.core.is_root() {
            return Err(MeshError::NotRoot);
        }
        let config = config.normalized();
        if let Some(store) = &self.station_store {
            if let Err(e) = store.save(&config) {
                tracing::error!(error = %e, "Failed to save station config");
                return Err(e.into());
            }
        }
        let effects = self.state.write().await.core.update_station(config.clone())?;
        self.execute(effects).await;
        Ok(config)
    }

    async fn execute(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Send { channel, message } => {
                    if !self.transport.send(channel, &message) {
                        tracing::debug!(%channel, kind = message.kind(), "Send on closed channel dropped");
                    }
                }
                Effect::Close(channel) => self.transport.close(channel),
                Effect::Dial(peer) => self.transport.dial(&peer),
                Effect::Schedule { delay, timer } => self.schedule(delay, timer),
                Effect::CancelTimers(channel) => {
                    if let Some(handles) = self.channel_timers.remove(&channel) {
                        handles.iter().for_each(JoinHandle::abort);
                    }
                }
                Effect::Notify(notice) => {
                    self.state.write().await.push_notice(&notice);
                }
            }
        }
    }

    fn schedule(&mut self, delay: Duration, timer: Timer) {
        let delay = match timer {
            Timer::Rejoin => with_jitter(delay),
            _ => delay,
        };
        let tx = self.timer_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(timer);
        });

        match timer.channel() {
            Some(channel) => {
                let handles = self.channel_timers.entry(channel).or_default();
                handles.retain(|h| !h.is_finished());
                handles.push(handle);
            }
            None => {
                if let Some(previous) = self.rejoin_timer.replace(handle) {
                    previous.abort();
                }
            }
        }
    }
}

/// Adds up to half of `delay` at random.
fn with_jitter(delay: Duration) -> Duration {
    let spread = delay.as_millis() as u64 / 2;
    if spread == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rodyo_protocol::NodeRole;

    #[test]
    fn test_event_log_capped() {
        let core = MeshCore::new(NodeId::new("n"), NodeRole::Root, Default::default());
        let mut state = NodeState::new(core);
        for i in 0..(EVENT_LOG_CAPACITY + 10) {
            state.push_log(LogCategory::System, format!("entry {i}"));
        }
        assert_eq!(state.event_log.len(), EVENT_LOG_CAPACITY);
        assert_eq!(state.event_log[0].message, "entry 10");
    }

    #[test]
    fn test_jitter_bounds() {
        let base = Duration::from_millis(2_000);
        for _ in 0..50 {
            let d = with_jitter(base);
            assert!(d >= base && d <= base + Duration::from_millis(1_000));
        }
        assert_eq!(with_jitter(Duration::ZERO), Duration::ZERO);
    }
}
