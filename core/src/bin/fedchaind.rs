//! The fedchain daemon: a federate block-producing node with its peer
//! overlay and RESTful admin surface.

use {
    clap::{Parser, ValueEnum},
    fedchain_core::{Node, NodeConfig},
    fedchain_net::NodeKind,
    log::{error, info},
    std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration},
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum NodeModeArg {
    /// Participate in leader rotation.
    Federate,
    /// Observe only.
    Client,
}

impl From<NodeModeArg> for NodeKind {
    fn from(mode: NodeModeArg) -> Self {
        match mode {
            NodeModeArg::Federate => NodeKind::Federate,
            NodeModeArg::Client => NodeKind::Client,
        }
    }
}

/// Federate block-producing node.
#[derive(Parser, Debug)]
#[command(name = "fedchaind", version, about)]
struct Cli {
    /// Port for the RESTful admin surface.
    #[arg(short = 'p', long, default_value_t = 8083)]
    port: u16,

    /// Addresses to listen on for peer connections.
    #[arg(long = "listen", default_value = "0.0.0.0:8108")]
    listen_addrs: Vec<SocketAddr>,

    /// Maximum number of peers.
    #[arg(long, default_value_t = 125)]
    max_peers: usize,

    /// Connect only to these peers (suppresses discovery).
    #[arg(long = "connect")]
    connect_peers: Vec<String>,

    /// Add persistent peers on top of discovered ones.
    #[arg(long = "add-peer")]
    add_peers: Vec<String>,

    /// Directory for persisted state (address book).
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    /// Simulation network: never dial discovered addresses.
    #[arg(long)]
    simnet: bool,

    /// Skip DNS seeding of the address book.
    #[arg(long)]
    disable_dns_seed: bool,

    /// Attempt UPnP port mapping.
    #[arg(long)]
    upnp: bool,

    /// Externally reachable addresses to advertise.
    #[arg(long = "external-ip")]
    external_ips: Vec<String>,

    /// Stable identity of this node (generated if omitted).
    #[arg(long, default_value = "")]
    node_id: String,

    /// Whether this node joins the federate roster.
    #[arg(long, value_enum, default_value_t = NodeModeArg::Federate)]
    node_mode: NodeModeArg,

    /// Hex-encoded ed25519 signing key for role-change messages.
    #[arg(long, default_value = "")]
    server_priv_key: String,

    /// Boot as the network's initial leader.
    #[arg(long)]
    init_leader: bool,

    /// Seconds between sealed directory blocks while leader.
    #[arg(long, default_value_t = 10)]
    block_interval_secs: u64,
}

impl Cli {
    fn into_config(self) -> NodeConfig {
        let mut config = NodeConfig::default();
        config.admin_addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        config.block_interval = Duration::from_secs(self.block_interval_secs.max(1));
        config.net.listen_addrs = self.listen_addrs;
        config.net.max_peers = self.max_peers;
        config.net.connect_peers = self.connect_peers;
        config.net.add_peers = self.add_peers;
        config.net.data_dir = self.data_dir;
        config.net.simnet = self.simnet;
        config.net.disable_dns_seed = self.disable_dns_seed;
        config.net.upnp = self.upnp;
        config.net.external_ips = self.external_ips;
        config.net.node_id = self.node_id;
        config.net.node_mode = self.node_mode.into();
        config.net.server_priv_key = self.server_priv_key;
        config.net.init_leader = self.init_leader;
        config
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if cli.upnp {
        info!("upnp requested; port mapping is delegated to the environment");
    }
    if !cli.disable_dns_seed {
        info!("dns seeding not configured for this network; relying on configured peers");
    }

    let node = match Node::new(cli.into_config()) {
        Ok(node) => Arc::new(node),
        Err(err) => {
            error!("could not build node: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = node.start().await {
        error!("could not start node: {err}");
        std::process::exit(1);
    }
    info!("node {} running", node.node_id());

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("signal handler failed: {err}");
    }
    node.stop().await;
    node.wait_for_shutdown().await;
    info!("goodbye");
}
