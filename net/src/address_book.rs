//! Candidate outbound addresses.
//!
//! The address book records where outbound connections might be made,
//! when each address was last attempted, and which network group an
//! address belongs to; the dialer uses group keys to avoid clumping all
//! outbound slots onto one network segment. State persists as JSON under
//! the configured data directory, best effort.

use {
    log::{debug, warn},
    rand::seq::IteratorRandom,
    std::{
        collections::HashMap,
        net::{IpAddr, SocketAddr},
        path::{Path, PathBuf},
        time::Instant,
    },
};

const PEERS_FILE: &str = "peers.json";

/// One known address and its dialing history.
#[derive(Debug, Clone)]
pub struct KnownAddress {
    pub addr: SocketAddr,
    /// When we last tried dialing it, if ever.
    pub last_attempt: Option<Instant>,
}

/// Supplier of outbound connection candidates.
#[derive(Debug, Default)]
pub struct AddressBook {
    entries: HashMap<SocketAddr, KnownAddress>,
    data_dir: Option<PathBuf>,
}

impl AddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the book backed by `data_dir`, loading any persisted
    /// addresses.
    pub fn open(data_dir: &Path) -> Self {
        let mut book = Self { entries: HashMap::new(), data_dir: Some(data_dir.to_path_buf()) };
        let path = data_dir.join(PEERS_FILE);
        match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Vec<SocketAddr>>(&raw) {
                Ok(addrs) => {
                    debug!("loaded {} addresses from {}", addrs.len(), path.display());
                    book.add_addresses(&addrs);
                }
                Err(err) => warn!("ignoring unreadable address file {}: {err}", path.display()),
            },
            Err(_) => debug!("no persisted addresses at {}", path.display()),
        }
        book
    }

    /// Persist the known addresses, best effort.
    pub fn save(&self) {
        let Some(dir) = &self.data_dir else { return };
        let path = dir.join(PEERS_FILE);
        let addrs: Vec<SocketAddr> = self.entries.keys().copied().collect();
        match serde_json::to_string(&addrs) {
            Ok(raw) => {
                if let Err(err) = std::fs::write(&path, raw) {
                    warn!("could not persist addresses to {}: {err}", path.display());
                }
            }
            Err(err) => warn!("could not serialize address book: {err}"),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record addresses; existing entries keep their attempt history.
    pub fn add_addresses(&mut self, addrs: &[SocketAddr]) {
        for addr in addrs {
            self.entries
                .entry(*addr)
                .or_insert(KnownAddress { addr: *addr, last_attempt: None });
        }
    }

    /// A random candidate, or `None` if the book is empty.
    pub fn get_address(&self) -> Option<KnownAddress> {
        self.entries.values().choose(&mut rand::thread_rng()).cloned()
    }

    /// Note that we just tried dialing `addr`.
    pub fn mark_attempt(&mut self, addr: &SocketAddr) {
        if let Some(entry) = self.entries.get_mut(addr) {
            entry.last_attempt = Some(Instant::now());
        }
    }
}

/// The network group an address belongs to: /16 for IPv4, the leading
/// 32 bits for IPv6. Outbound slots are spread across groups.
pub fn group_key(ip: &IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            format!("v4:{}.{}", octets[0], octets[1])
        }
        IpAddr::V6(v6) => {
            let segments = v6.segments();
            format!("v6:{:x}:{:x}", segments[0], segments[1])
        }
    }
}
