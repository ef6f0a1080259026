//! Full nodes on the in-memory transport, driven through their handles.

use std::future::Future;
use std::time::Duration;

use rodyo_network::MemoryNetwork;
use rodyo_node::rpc_server::process_request;
use rodyo_node::{
    ConfigError, FileStationStore, LogCategory, MeshCore, MeshError, MeshNode, MeshPolicy,
    NodeHandle, StationStore,
};
use rodyo_protocol::{NodeId, NodeRole, StationConfig};

fn fast_policy() -> MeshPolicy {
    MeshPolicy {
        redirect_grace: Duration::from_millis(20),
        kick_grace: Duration::from_millis(20),
        station_push_delay: Duration::from_millis(5),
        rejoin_on_parent_loss: false,
        ..MeshPolicy::default()
    }
}

fn spawn_node(net: &MemoryNetwork, name: &str, role: NodeRole) -> NodeHandle {
    let (transport, events) = net.register(NodeId::new(name)).unwrap();
    let core = MeshCore::new(NodeId::new(name), role, fast_policy());
    let node = MeshNode::new(transport, events, core);
    let handle = node.handle();
    tokio::spawn(node.run());
    handle
}

/// Poll `check` until it holds or five seconds pass.
async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn listeners(handle: &NodeHandle) -> Option<usize> {
    handle.summary().await.total_listeners
}

async fn build_mesh(net: &MemoryNetwork, names: &[&str]) -> (NodeHandle, Vec<NodeHandle>) {
    let root = spawn_node(net, "root", NodeRole::Root);
    let mut participants = Vec::new();
    for (i, name) in names.iter().enumerate() {
        let handle = spawn_node(net, name, NodeRole::Participant);
        handle.join(NodeId::new("root")).await.unwrap();
        let expected = i + 1;
        let root_ref = &root;
        eventually("listener count", move || async move {
            listeners(root_ref).await == Some(expected)
        })
        .await;
        participants.push(handle);
    }
    (root, participants)
}

// ─── Mesh over the memory transport ──────────────────────────────────────────

#[tokio::test]
async fn test_mesh_forms_and_relays_chat() {
    let net = MemoryNetwork::new();
    let (root, nodes) = build_mesh(&net, &["a", "b", "c", "d"]).await;

    let c = nodes[2].summary().await;
    assert_eq!(c.parent_id, Some(NodeId::new("a")));
    assert_eq!(root.peer_views().await.len(), 4);

    nodes[3].send_chat("hello root").await.unwrap();
    let state = root.state();
    eventually("chat at root", || {
        let state = state.clone();
        async move {
            state
                .read()
                .await
                .event_log
                .iter()
                .any(|e| e.category == LogCategory::Chat && e.message.ends_with("hello root"))
        }
    })
    .await;

    // Redirect channels have been closed after their grace period.
    let net_ref = &net;
    eventually("only tree edges open", move || async move { net_ref.open_channels() == 4 }).await;
}

#[tokio::test]
async fn test_kick_over_runtime() {
    let net = MemoryNetwork::new();
    let (root, nodes) = build_mesh(&net, &["a", "b", "c"]).await;

    root.kick(NodeId::new("a")).await.unwrap();
    let (a, root_ref) = (&nodes[0], &root);
    eventually("a kicked", move || async move { a.summary().await.kicked }).await;
    eventually("a and c dropped", move || async move {
        listeners(root_ref).await == Some(1)
    })
    .await;
    assert!(root.kick(NodeId::new("a")).await.is_err());
}

#[tokio::test]
async fn test_listener_crash_reconciled() {
    let net = MemoryNetwork::new();
    let (root, _nodes) = build_mesh(&net, &["a", "b", "c"]).await;

    net.disconnect(&NodeId::new("c"));
    let root_ref = &root;
    eventually("c pruned", move || async move {
        listeners(root_ref).await == Some(2)
    })
    .await;
}

#[tokio::test]
async fn test_station_update_persisted_and_propagated() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("station.json");

    let net = MemoryNetwork::new();
    let (transport, events) = net.register(NodeId::new("root")).unwrap();
    let core = MeshCore::new(NodeId::new("root"), NodeRole::Root, fast_policy());
    let node = MeshNode::new(transport, events, core)
        .with_station_store(Box::new(FileStationStore::new(&path)));
    let root = node.handle();
    tokio::spawn(node.run());

    let a = spawn_node(&net, "a", NodeRole::Participant);
    a.join(NodeId::new("root")).await.unwrap();
    let root_ref = &root;
    eventually("a attached", move || async move {
        listeners(root_ref).await == Some(1)
    })
    .await;

    let stored = root
        .update_station(StationConfig {
            handle: "Deep Cuts".into(),
            ..StationConfig::default()
        })
        .await
        .unwrap();
    assert_eq!(stored.handle, "deep-cuts");

    let saved = FileStationStore::new(&path).load().unwrap();
    assert_eq!(saved, stored);

    let a_state = a.state();
    eventually("a applied station", || {
        let a_state = a_state.clone();
        async move { a_state.read().await.core.station().handle == "deep-cuts" }
    })
    .await;

    assert!(a.update_station(StationConfig::default()).await.is_err());
}

/// Store that refuses every save.
struct ReadOnlyStore;

impl StationStore for ReadOnlyStore {
    fn load(&self) -> Result<StationConfig, ConfigError> {
        Ok(StationConfig::default())
    }

    fn save(&self, _config: &StationConfig) -> Result<(), ConfigError> {
        Err(ConfigError::Invalid("disk full".into()))
    }
}

#[tokio::test]
async fn test_failed_station_save_changes_nothing() {
    let net = MemoryNetwork::new();
    let (transport, events) = net.register(NodeId::new("root")).unwrap();
    let core = MeshCore::new(NodeId::new("root"), NodeRole::Root, fast_policy());
    let node = MeshNode::new(transport, events, core).with_station_store(Box::new(ReadOnlyStore));
    let root = node.handle();
    tokio::spawn(node.run());

    let a = spawn_node(&net, "a", NodeRole::Participant);
    a.join(NodeId::new("root")).await.unwrap();
    let a_state = a.state();
    eventually("a received station", || {
        let a_state = a_state.clone();
        async move { a_state.read().await.core.station_known() }
    })
    .await;

    let result = root
        .update_station(StationConfig {
            name: "NEVER AIRED".into(),
            ..StationConfig::default()
        })
        .await;
    assert!(matches!(result, Err(MeshError::Config(_))));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(root.state().read().await.core.station(), &StationConfig::default());
    assert_eq!(a.state().read().await.core.station(), &StationConfig::default());
}

// ─── Operator RPC ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_rpc_status_and_errors() {
    let net = MemoryNetwork::new();
    let root = spawn_node(&net, "root", NodeRole::Root);

    let status = process_request(
        r#"{"jsonrpc":"2.0","id":1,"method":"mesh.get_status","params":{}}"#,
        &root,
    )
    .await;
    let result = status.result.expect("status result");
    assert_eq!(result["summary"]["role"], "root");
    assert_eq!(result["summary"]["total_listeners"], 0);

    let unknown = process_request(r#"{"jsonrpc":"2.0","id":2,"method":"mesh.nope"}"#, &root).await;
    assert_eq!(unknown.error.unwrap().code, -32601);

    let garbage = process_request("{not json", &root).await;
    assert_eq!(garbage.error.unwrap().code, -32700);

    let missing = process_request(
        r#"{"jsonrpc":"2.0","id":3,"method":"mesh.kick","params":{}}"#,
        &root,
    )
    .await;
    assert_eq!(missing.error.unwrap().code, -32602);

    let not_child = process_request(
        r#"{"jsonrpc":"2.0","id":4,"method":"mesh.kick","params":{"node_id":"ghost"}}"#,
        &root,
    )
    .await;
    assert_eq!(not_child.error.unwrap().code, -32000);

    let root_join = process_request(
        r#"{"jsonrpc":"2.0","id":5,"method":"mesh.join","params":{"entry_point":"x"}}"#,
        &root,
    )
    .await;
    assert_eq!(root_join.error.unwrap().code, -32000);
}

#[tokio::test]
async fn test_rpc_update_station_and_topology() {
    let net = MemoryNetwork::new();
    let (root, _nodes) = build_mesh(&net, &["a", "b", "c"]).await;

    let updated = process_request(
        r#"{"jsonrpc":"2.0","id":1,"method":"mesh.update_station","params":{"config":{"name":"KXRO"}}}"#,
        &root,
    )
    .await;
    let result = updated.result.expect("update result");
    assert_eq!(result["config"]["name"], "KXRO");

    let topology = process_request(
        r#"{"jsonrpc":"2.0","id":2,"method":"mesh.get_topology"}"#,
        &root,
    )
    .await
    .result
    .expect("topology result");
    assert_eq!(topology["total_listeners"], 3);
    assert_eq!(topology["peers"][0]["direct"], true);
    assert_eq!(topology["entries"]["a"]["children"][0], "c");

    let log = process_request(
        r#"{"jsonrpc":"2.0","id":3,"method":"mesh.get_log","params":{"limit":2}}"#,
        &root,
    )
    .await
    .result
    .expect("log result");
    assert_eq!(log["entries"].as_array().map(Vec::len), Some(2));
}
