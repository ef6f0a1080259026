//! JSON-RPC 2.0 server over TCP for station operators.
//!
//! Provides the following methods:
//! - `mesh.get_status()` - Role, position in the tree and station config
//! - `mesh.get_topology()` - The root's directory and listener list
//! - `mesh.get_log()` - Recent operator log entries
//! - `mesh.kick()` - Remove a direct child
//! - `mesh.send_chat()` - Flood a chat line
//! - `mesh.update_station()` - Replace and propagate the station config (root)
//! - `mesh.join()` - Dial an entry point (participant)
//!
//! The server listens on localhost TCP and speaks JSON-RPC 2.0.
//! Each line received is a JSON-RPC request; each line sent is a response.

use std::sync::Arc;

use rodyo_protocol::rpc::{INVALID_PARAMS, METHOD_NOT_FOUND, OPERATION_FAILED, PARSE_ERROR};
use rodyo_protocol::{NodeId, RpcRequest, RpcResponse, StationConfig};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use crate::NodeHandle;

const DEFAULT_LOG_LIMIT: usize = 100;

/// The JSON-RPC 2.0 server.
pub struct RpcServer {
    /// TCP listener address.
    bind_addr: String,
    /// Handle to the running node.
    handle: NodeHandle,
    /// Maximum concurrent client connections.
    max_connections: usize,
}

impl RpcServer {
    pub fn new(bind_addr: String, handle: NodeHandle, max_connections: usize) -> Self {
        Self {
            bind_addr,
            handle,
            max_connections,
        }
    }

    /// Start the RPC server, listening for connections.
    pub async fn run(self) -> Result<(), anyhow::Error> {
        let listener = TcpListener::bind(&self.bind_addr).await?;
        tracing::info!(addr = %self.bind_addr, "JSON-RPC server listening");

        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.max_connections));

        loop {
            let (stream, peer_addr) = listener.accept().await?;
            tracing::debug!(peer = %peer_addr, "RPC client connected");

            let handle = self.handle.clone();
            let permit = semaphore.clone().acquire_owned().await?;

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, handle).await {
                    tracing::warn!(peer = %peer_addr, error = %e, "RPC connection error");
                }
                drop(permit);
            });
        }
    }
}

/// Reads newline-delimited JSON-RPC requests and sends back responses.
async fn handle_connection(
    stream: tokio::net::TcpStream,
    handle: NodeHandle,
) -> Result<(), anyhow::Error> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = process_request(&line, &handle).await;
        let response_json = serde_json::to_string(&response)?;
        writer.write_all(response_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }

    Ok(())
}

/// Process a single JSON-RPC request and return a response.
pub async fn process_request(request_str: &str, handle: &NodeHandle) -> RpcResponse {
    let request: RpcRequest = match serde_json::from_str(request_str) {
        Ok(r) => r,
        Err(e) => {
            return RpcResponse::error(None, PARSE_ERROR, format!("Invalid JSON: {}", e));
        }
    };

    let id = request.id.clone();
    match request.method.as_str() {
        "mesh.get_status" => handle_get_status(id, handle).await,
        "mesh.get_topology" => handle_get_topology(id, handle).await,
        "mesh.get_log" => handle_get_log(id, &request.params, handle).await,
        "mesh.kick" => handle_kick(id, &request.params, handle).await,
        "mesh.send_chat" => handle_send_chat(id, &request.params, handle).await,
        "mesh.update_station" => handle_update_station(id, &request.params, handle).await,
        "mesh.join" => handle_join(id, &request.params, handle).await,
        _ => RpcResponse::error(
            id,
            METHOD_NOT_FOUND,
            format!("Unknown method: {}", request.method),
        ),
    }
}

fn node_id_param(params: &serde_json::Value, key: &str) -> Result<NodeId, String> {
    let raw = params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("Missing '{key}' parameter"))?;
    NodeId::parse(raw).map_err(|e| e.to_string())
}

/// Handle `mesh.get_status`.
async fn handle_get_status(id: Option<serde_json::Value>, handle: &NodeHandle) -> RpcResponse {
    let state = handle.state();
    let state = state.read().await;
    let uptime = chrono::Utc::now() - state.start_time;

    RpcResponse::success(
        id,
        serde_json::json!({
            "status": state.status,
            "summary": state.core.summary(),
            "station": state.core.station(),
            "station_known": state.core.station_known(),
            "uptime_secs": uptime.num_seconds(),
        }),
    )
}

/// Handle `mesh.get_topology` - the full directory on the root, the local
/// neighbourhood elsewhere.
async fn handle_get_topology(id: Option<serde_json::Value>, handle: &NodeHandle) -> RpcResponse {
    let state = handle.state();
    let state = state.read().await;
    let core = &state.core;

    let entries: serde_json::Map<String, serde_json::Value> = core
        .directory()
        .map(|dir| {
            dir.iter()
                .map(|(node, entry)| {
                    (
                        node.to_string(),
                        serde_json::to_value(entry).unwrap_or(serde_json::Value::Null),
                    )
                })
                .collect()
        })
        .unwrap_or_default();

    RpcResponse::success(
        id,
        serde_json::json!({
            "node_id": core.local_id(),
            "role": core.role(),
            "total_listeners": core.total_listeners(),
            "peers": core.peer_views(),
            "entries": entries,
        }),
    )
}

/// Handle `mesh.get_log` - the last `limit` entries (default 100).
async fn handle_get_log(
    id: Option<serde_json::Value>,
    params: &serde_json::Value,
    handle: &NodeHandle,
) -> RpcResponse {
    let limit = params
        .get("limit")
        .and_then(|v| v.as_u64())
        .map(|l| l as usize)
        .unwrap_or(DEFAULT_LOG_LIMIT);

    let state = handle.state();
    let state = state.read().await;
    let skip = state.event_log.len().saturating_sub(limit);
    let entries: Vec<_> = state.event_log.iter().skip(skip).collect();

    RpcResponse::success(id, serde_json::json!({ "entries": entries }))
}

/// Handle `mesh.kick`.
async fn handle_kick(
    id: Option<serde_json::Value>,
    params: &serde_json::Value,
    handle: &NodeHandle,
) -> RpcResponse {
    let node = match node_id_param(params, "node_id") {
        Ok(n) => n,
        Err(msg) => return RpcResponse::error(id, INVALID_PARAMS, msg),
    };
    match handle.kick(node.clone()).await {
        Ok(()) => RpcResponse::success(id, serde_json::json!({ "kicked": node })),
        Err(e) => RpcResponse::error(id, OPERATION_FAILED, e.to_string()),
    }
}

/// Handle `mesh.send_chat`.
async fn handle_send_chat(
    id: Option<serde_json::Value>,
    params: &serde_json::Value,
    handle: &NodeHandle,
) -> RpcResponse {
    let text = match params.get("text").and_then(|v| v.as_str()) {
        Some(t) if !t.trim().is_empty() => t.to_string(),
        _ => {
            return RpcResponse::error(id, INVALID_PARAMS, "Missing 'text' parameter".into());
        }
    };
    match handle.send_chat(text).await {
        Ok(()) => RpcResponse::success(id, serde_json::json!({ "sent": true })),
        Err(e) => RpcResponse::error(id, OPERATION_FAILED, e.to_string()),
    }
}

/// Handle `mesh.update_station`. Missing fields take their defaults.
async fn handle_update_station(
    id: Option<serde_json::Value>,
    params: &serde_json::Value,
    handle: &NodeHandle,
) -> RpcResponse {
    let Some(raw) = params.get("config") else {
        return RpcResponse::error(id, INVALID_PARAMS, "Missing 'config' parameter".into());
    };
    let config: StationConfig = match serde_json::from_value(raw.clone()) {
        Ok(c) => c,
        Err(e) => {
            return RpcResponse::error(id, INVALID_PARAMS, format!("Invalid config: {}", e));
        }
    };
    match handle.update_station(config).await {
        Ok(stored) => RpcResponse::success(id, serde_json::json!({ "config": stored })),
        Err(e) => RpcResponse::error(id, OPERATION_FAILED, e.to_string()),
    }
}

/// Handle `mesh.join`.
async fn handle_join(
    id: Option<serde_json::Value>,
    params: &serde_json::Value,
    handle: &NodeHandle,
) -> RpcResponse {
    let entry = match node_id_param(params, "entry_point") {
        Ok(n) => n,
        Err(msg) => return RpcResponse::error(id, INVALID_PARAMS, msg),
    };
    match handle.join(entry.clone()).await {
        Ok(()) => RpcResponse::success(id, serde_json::json!({ "joining": entry })),
        Err(e) => RpcResponse::error(id, OPERATION_FAILED, e.to_string()),
    }
}
