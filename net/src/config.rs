//! Configuration for the peer networking layer.

use {
    crate::message::NodeKind,
    std::{net::SocketAddr, path::PathBuf, time::Duration},
};

/// Configuration for the gossip overlay.
///
/// Controls connection limits, dialing behavior, and the identity this
/// node presents during the version handshake.
#[derive(Debug, Clone)]
pub struct NetConfig {
    /// Addresses to bind listeners on.
    pub listen_addrs: Vec<SocketAddr>,
    /// The canonical port of the network; non-default ports are dialed
    /// reluctantly.
    pub default_port: u16,

    /// Maximum number of peers across all three peer maps.
    pub max_peers: usize,
    /// Maximum number of outbound (transient + persistent) peers.
    pub max_outbound: usize,
    /// How long a banned host stays banned.
    pub ban_duration: Duration,
    /// Delay before retrying a failed persistent dial and before the
    /// replenishment wakeup re-arms.
    pub retry_interval: Duration,

    /// Peers to connect to exclusively; suppresses the dialer.
    pub connect_peers: Vec<String>,
    /// Peers to connect to persistently in addition to discovered ones.
    pub add_peers: Vec<String>,
    /// Directory the address book persists its state under.
    pub data_dir: PathBuf,
    /// Simulation network: never dial discovered addresses.
    pub simnet: bool,
    /// Skip DNS seeding of the address book.
    pub disable_dns_seed: bool,
    /// Attempt UPnP port mapping (address-source concern; logged only).
    pub upnp: bool,
    /// Externally reachable addresses to advertise instead of discovery.
    pub external_ips: Vec<String>,

    /// This node's stable identity string.
    pub node_id: String,
    /// Whether this node participates in leader rotation.
    pub node_mode: NodeKind,
    /// Hex-encoded ed25519 signing key for role-change messages.
    pub server_priv_key: String,
    /// Boot as the network's initial leader.
    pub init_leader: bool,

    /// User agent advertised in the version handshake.
    pub user_agent: String,
    /// Protocol version advertised in the version handshake.
    pub protocol_version: u32,
    /// Service bits advertised in the version handshake.
    pub services: u64,

    /// Maximum size of a single serialized message in bytes.
    pub max_message_size: usize,
    /// Buffer size for the relay/broadcast channels (sized to MaxPeers).
    pub channel_buffer_size: usize,

    /// Delay before the first rebroadcast pass.
    pub rebroadcast_initial_delay: Duration,
    /// Upper bound, in seconds, of the randomized rebroadcast interval.
    pub rebroadcast_max_interval_secs: u16,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            listen_addrs: vec!["0.0.0.0:8108".parse().expect("valid default listen addr")],
            default_port: 8108,
            max_peers: 125,
            max_outbound: 8,
            ban_duration: Duration::from_secs(24 * 60 * 60),
            retry_interval: Duration::from_secs(10),
            connect_peers: Vec::new(),
            add_peers: Vec::new(),
            data_dir: PathBuf::from("./data"),
            simnet: false,
            disable_dns_seed: false,
            upnp: false,
            external_ips: Vec::new(),
            node_id: String::new(),
            node_mode: NodeKind::Federate,
            server_priv_key: String::new(),
            init_leader: false,
            user_agent: concat!("/fedchain:", env!("CARGO_PKG_VERSION"), "/").to_string(),
            protocol_version: 1,
            services: 1,
            max_message_size: 1_048_576, // 1 MB
            channel_buffer_size: 125,
            rebroadcast_initial_delay: Duration::from_secs(5 * 60),
            rebroadcast_max_interval_secs: 1800,
        }
    }
}

impl NetConfig {
    /// A config suitable for local tests: loopback, tiny limits, fast
    /// timers.
    pub fn dev_default() -> Self {
        Self {
            listen_addrs: vec!["127.0.0.1:0".parse().expect("valid dev listen addr")],
            default_port: 0,
            max_peers: 10,
            max_outbound: 4,
            ban_duration: Duration::from_secs(5),
            retry_interval: Duration::from_millis(50),
            simnet: true,
            data_dir: std::env::temp_dir(),
            node_id: "dev-node".to_string(),
            max_message_size: 65_536,
            channel_buffer_size: 16,
            rebroadcast_initial_delay: Duration::from_millis(20),
            rebroadcast_max_interval_secs: 1,
            ..Self::default()
        }
    }
}
