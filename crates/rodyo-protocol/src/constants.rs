/// Maximum number of child channels any node may hold.
pub const MAX_CHILDREN: usize = 2;

/// Delay before a redirected connection is closed, so the redirect can flush.
pub const REDIRECT_GRACE_MS: u64 = 1_000;

/// Delay before a kicked child's channel is closed.
pub const KICK_GRACE_MS: u64 = 500;

/// Delay before a freshly accepted child receives the station configuration.
pub const STATION_PUSH_DELAY_MS: u64 = 500;

/// Base delay before a node that lost its parent dials its entry point again.
pub const REJOIN_DELAY_MS: u64 = 2_000;

/// Protocol identifier exchanged in transport hellos.
pub const PROTOCOL_VERSION: &str = "rodyo/1";

/// JSON-RPC version string.
pub const JSONRPC_VERSION: &str = "2.0";

pub const DEFAULT_STATION_NAME: &str = "RODYO STATION";
pub const DEFAULT_STATION_GENRE: &str = "P2P MESH BROADCASTING // ANALOG SOUL";
pub const DEFAULT_STATION_THEME: &str = "matrix-green";

pub const DEFAULT_STUN_SERVERS: [&str; 3] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
    "stun:stun2.l.google.com:19302",
];

/// Default TCP address the mesh transport listens on.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:9470";

/// Default bind address for the operator JSON-RPC server.
pub const DEFAULT_RPC_BIND_ADDR: &str = "127.0.0.1:9471";
