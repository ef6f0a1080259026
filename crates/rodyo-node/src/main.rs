//! `rodyo` - run a mesh node over TCP.
//!
//! ```text
//! rodyo --root --listen 0.0.0.0:9470 --advertise 203.0.113.5:9470
//! rodyo --join 203.0.113.5:9470 --listen 0.0.0.0:9480 --advertise 198.51.100.7:9480
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use rodyo_network::{TcpHost, TcpTransportConfig, Transport};
use rodyo_node::rpc_server::RpcServer;
use rodyo_node::{FileStationStore, MeshCore, MeshNode, NodeConfig, StationStore};
use rodyo_protocol::{NodeId, NodeRole};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "rodyo", version, about = "Overlay-tree mesh node for RODYO stations")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run as the root (the broadcaster).
    #[arg(long, conflicts_with = "join")]
    root: bool,

    /// Join the mesh through this node (`host:port`).
    #[arg(long, value_name = "ENTRY")]
    join: Option<String>,

    /// Address to accept mesh connections on.
    #[arg(long)]
    listen: Option<String>,

    /// `host:port` other nodes dial to reach this one.
    #[arg(long)]
    advertise: Option<String>,

    /// Bind address of the operator JSON-RPC server.
    #[arg(long)]
    rpc_bind: Option<String>,

    /// Disable the operator JSON-RPC server.
    #[arg(long)]
    no_rpc: bool,

    /// Log filter, e.g. `debug` or `rodyo_node=trace`.
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn apply(&self, config: &mut NodeConfig) {
        if self.root {
            config.node.role = NodeRole::Root;
            config.node.entry_point = None;
        }
        if let Some(entry) = &self.join {
            config.node.role = NodeRole::Participant;
            config.node.entry_point = Some(entry.clone());
        }
        if let Some(listen) = &self.listen {
            config.network.listen_addr = listen.clone();
        }
        if let Some(advertise) = &self.advertise {
            config.network.advertise_addr = Some(advertise.clone());
        }
        if let Some(bind) = &self.rpc_bind {
            config.rpc.bind_addr = bind.clone();
        }
        if self.no_rpc {
            config.rpc.enabled = false;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => NodeConfig::default_path()?,
    };
    let mut config = NodeConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    cli.apply(&mut config);
    config.validate()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let (host, transport, events) = TcpHost::bind(TcpTransportConfig {
        listen_addr: config.network.listen_addr.clone(),
        advertise_addr: config.network.advertise_addr.clone(),
        handshake_timeout: config.handshake_timeout(),
    })
    .await?;
    let local_id = transport.local_id().clone();

    let mut core = MeshCore::new(local_id, config.node.role, config.policy());
    if let Some(name) = &config.node.display_name {
        core = core.with_display_name(name.clone());
    }

    let node = match config.node.role {
        NodeRole::Root => {
            let store = FileStationStore::new(config.station_path()?);
            let station = store
                .load()
                .with_context(|| format!("loading {}", store.path().display()))?;
            tracing::info!(station = %station.title(), "Loaded station config");
            MeshNode::new(transport, events, core.with_station(station))
                .with_station_store(Box::new(store))
        }
        NodeRole::Participant => MeshNode::new(transport, events, core),
    };
    let handle = node.handle();

    tokio::spawn(async move {
        if let Err(e) = host.run().await {
            tracing::error!(error = %e, "Mesh transport error");
        }
    });

    if config.rpc.enabled {
        let server = RpcServer::new(
            config.rpc.bind_addr.clone(),
            handle.clone(),
            config.rpc.max_connections,
        );
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                tracing::error!(error = %e, "RPC server error");
            }
        });
    }

    let node_task = tokio::spawn(node.run());

    if let Some(entry) = &config.node.entry_point {
        let entry = NodeId::parse(entry)?;
        handle.join(entry).await?;
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    handle.shutdown().await;
    node_task.await??;
    Ok(())
}
