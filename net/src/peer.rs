//! One peer: identity, stats, and the per-connection send/receive tasks.
//!
//! A peer's lifecycle: the listener (inbound) or the dialer (outbound)
//! completes the version handshake, builds a [`Peer`], spawns its two
//! tasks, and offers it to the peer manager over `new_peers`. When either
//! task sees the link die, the receive task reports the peer to
//! `done_peers` and the manager removes it everywhere.
//!
//! Stats are mutated concurrently by the connection tasks and read by the
//! query path, so they live behind the peer's own lock. The peer-set and
//! roster are never touched from here.

use {
    crate::{
        config::NetConfig,
        error::{NetError, Result},
        message::{InvType, InvVect, NodeKind, VersionInfo, WireMessage},
        peer_manager::PeerManagerHandle,
    },
    fedchain_consensus::PeerId,
    log::{debug, trace, warn},
    parking_lot::Mutex,
    std::{
        collections::HashSet,
        net::SocketAddr,
        sync::{
            atomic::{AtomicBool, AtomicU64, Ordering},
            Arc,
        },
    },
    tokio::{
        io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
        net::{TcpListener, TcpStream},
        sync::mpsc,
    },
};

/// Unix seconds now.
pub(crate) fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Commands consumed by a peer's send task.
#[derive(Debug)]
pub enum PeerCommand {
    /// Frame and send a message.
    Message(WireMessage),
    /// Terminate the send task.
    Shutdown,
}

/// A message received from a peer that the networking layer does not
/// consume itself (leader protocol, opaque payloads).
#[derive(Debug)]
pub struct InboundMessage {
    pub peer: PeerId,
    pub node_id: String,
    pub message: WireMessage,
}

/// Whole-process byte counters, updated under a dedicated lock.
#[derive(Debug, Default)]
pub struct ByteTotals {
    inner: Mutex<(u64, u64)>,
}

impl ByteTotals {
    pub fn add_sent(&self, n: u64) {
        self.inner.lock().0 += n;
    }

    pub fn add_received(&self, n: u64) {
        self.inner.lock().1 += n;
    }

    /// `(bytes_sent, bytes_received)` across all peers since start.
    pub fn totals(&self) -> (u64, u64) {
        *self.inner.lock()
    }
}

/// Connection statistics and protocol data, guarded by the peer's lock.
#[derive(Debug, Clone)]
pub struct PeerStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub last_send: i64,
    pub last_recv: i64,
    pub time_connected: i64,
    pub services: u64,
    pub protocol_version: u32,
    pub user_agent: String,
    pub starting_height: u32,
    /// Latest height we believe the peer has.
    pub last_block: u32,
    /// Hash of the most recent block the peer announced, until the block
    /// manager confirms its height.
    pub last_announced_block: Option<[u8; 32]>,
}

/// One connected (or connecting) peer.
#[derive(Debug)]
pub struct Peer {
    pub id: PeerId,
    pub node_id: String,
    pub addr: SocketAddr,
    pub kind: NodeKind,
    pub pub_key: [u8; 32],
    pub inbound: bool,
    pub persistent: bool,
    pub retry_count: u32,
    /// Unix seconds the remote process started (tenure metric).
    pub start_time: i64,
    disable_relay_tx: bool,
    connected: AtomicBool,
    stats: Mutex<PeerStats>,
    known_inventory: Mutex<HashSet<InvVect>>,
    outgoing: mpsc::Sender<PeerCommand>,
}

impl Peer {
    /// Build a peer record from a completed handshake. `outgoing` feeds
    /// the send task.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: PeerId,
        remote: &VersionInfo,
        addr: SocketAddr,
        inbound: bool,
        persistent: bool,
        retry_count: u32,
        outgoing: mpsc::Sender<PeerCommand>,
    ) -> Self {
        Self {
            id,
            node_id: remote.node_id.clone(),
            addr,
            kind: remote.node_kind,
            pub_key: remote.pub_key,
            inbound,
            persistent,
            retry_count,
            start_time: remote.start_time,
            disable_relay_tx: remote.disable_relay_tx,
            connected: AtomicBool::new(false),
            stats: Mutex::new(PeerStats {
                bytes_sent: 0,
                bytes_received: 0,
                last_send: 0,
                last_recv: 0,
                time_connected: unix_now(),
                services: remote.services,
                protocol_version: remote.protocol_version,
                user_agent: remote.user_agent.clone(),
                starting_height: remote.starting_height,
                last_block: remote.starting_height,
                last_announced_block: None,
            }),
            known_inventory: Mutex::new(HashSet::new()),
            outgoing,
        }
    }

    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    pub fn relay_tx_disabled(&self) -> bool {
        self.disable_relay_tx
    }

    /// Queue a message for the send task. Dropped (with a trace line)
    /// when the queue is full or the send task is gone.
    pub fn queue_message(&self, message: WireMessage) {
        if let Err(err) = self.outgoing.try_send(PeerCommand::Message(message)) {
            trace!("peer {} dropped outbound message: {err}", self.id);
        }
    }

    /// Queue an inventory announcement unless the peer is already known
    /// to hold it.
    pub fn queue_inventory(&self, inv: InvVect) {
        {
            let mut known = self.known_inventory.lock();
            if !known.insert(inv) {
                return;
            }
        }
        self.queue_message(WireMessage::Inv(vec![inv]));
    }

    /// Signal both tasks to wind down and mark the peer disconnected.
    pub fn shutdown(&self) {
        self.set_connected(false);
        let _ = self.outgoing.try_send(PeerCommand::Shutdown);
    }

    /// Alias for [`Peer::shutdown`]; the manager drops the record
    /// separately.
    pub fn disconnect(&self) {
        self.shutdown();
    }

    /// Read the stats snapshot under the peer lock.
    pub fn stats(&self) -> PeerStats {
        self.stats.lock().clone()
    }

    pub(crate) fn note_sent(&self, n: u64) {
        let mut stats = self.stats.lock();
        stats.bytes_sent += n;
        stats.last_send = unix_now();
    }

    pub(crate) fn note_received(&self, n: u64) {
        let mut stats = self.stats.lock();
        stats.bytes_received += n;
        stats.last_recv = unix_now();
    }

    pub(crate) fn set_last_block(&self, height: u32) {
        self.stats.lock().last_block = height;
    }

    pub(crate) fn set_announced_block(&self, hash: [u8; 32]) {
        self.stats.lock().last_announced_block = Some(hash);
    }

    /// If the peer's pending announcement matches `sha`, record `height`
    /// and clear the announcement. Returns whether it matched.
    pub(crate) fn resolve_announcement(&self, sha: &[u8; 32], height: u32) -> bool {
        let mut stats = self.stats.lock();
        if stats.last_announced_block.as_ref() == Some(sha) {
            stats.last_block = height;
            stats.last_announced_block = None;
            true
        } else {
            false
        }
    }
}

/// Everything a connection task needs; shared by the listener, the
/// dialer, and every peer's tasks.
pub struct PeerContext {
    pub config: NetConfig,
    pub handle: PeerManagerHandle,
    /// Messages the networking layer does not consume (leader protocol,
    /// opaque payloads) go here.
    pub inbound_tx: mpsc::Sender<InboundMessage>,
    pub byte_totals: Arc<ByteTotals>,
    my_version: VersionInfo,
    next_peer_id: AtomicU64,
}

impl PeerContext {
    pub fn new(
        config: NetConfig,
        handle: PeerManagerHandle,
        inbound_tx: mpsc::Sender<InboundMessage>,
        byte_totals: Arc<ByteTotals>,
        my_version: VersionInfo,
    ) -> Self {
        Self {
            config,
            handle,
            inbound_tx,
            byte_totals,
            my_version,
            next_peer_id: AtomicU64::new(1),
        }
    }

    pub fn my_version(&self) -> VersionInfo {
        self.my_version.clone()
    }

    fn next_id(&self) -> PeerId {
        self.next_peer_id.fetch_add(1, Ordering::Relaxed)
    }
}

// ── Framed I/O ──────────────────────────────────────────────────────────────

pub(crate) async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &WireMessage,
    max_size: usize,
) -> Result<u64> {
    let frame = message.serialize_framed(max_size)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(frame.len() as u64)
}

/// Read one frame. `Ok(None)` means the peer closed the link cleanly.
pub(crate) async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_size: usize,
) -> Result<Option<(WireMessage, u64)>> {
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }
    let len = WireMessage::read_frame_len(&header);
    if len > max_size {
        return Err(NetError::MessageTooLarge { size: len, max: max_size });
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    let message = WireMessage::deserialize(&payload)?;
    Ok(Some((message, (len + 4) as u64)))
}

// ── Handshake and connection tasks ──────────────────────────────────────────

/// Exchange version messages. The initiating side sends first.
async fn handshake(
    stream: &mut TcpStream,
    ctx: &PeerContext,
    initiate: bool,
) -> Result<VersionInfo> {
    let max = ctx.config.max_message_size;
    if initiate {
        write_frame(stream, &WireMessage::Version(ctx.my_version()), max).await?;
    }
    let remote = match read_frame(stream, max).await? {
        Some((WireMessage::Version(info), _)) => info,
        Some((other, _)) => {
            return Err(NetError::InvalidMessage(format!(
                "expected version, got {}",
                other.kind()
            )))
        }
        None => return Err(NetError::ChannelClosed),
    };
    if !initiate {
        write_frame(stream, &WireMessage::Version(ctx.my_version()), max).await?;
    }
    Ok(remote)
}

/// Spawn the send and receive tasks for an established peer.
pub(crate) fn start_peer_tasks(
    peer: Arc<Peer>,
    stream: TcpStream,
    mut commands: mpsc::Receiver<PeerCommand>,
    ctx: Arc<PeerContext>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let max = ctx.config.max_message_size;

    // Send task: drains the command queue onto the socket.
    {
        let peer = peer.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            while let Some(command) = commands.recv().await {
                match command {
                    PeerCommand::Shutdown => break,
                    PeerCommand::Message(message) => {
                        match write_frame(&mut write_half, &message, max).await {
                            Ok(n) => {
                                peer.note_sent(n);
                                ctx.byte_totals.add_sent(n);
                            }
                            Err(err) => {
                                debug!("peer {} write failed: {err}", peer.id);
                                break;
                            }
                        }
                    }
                }
            }
            peer.set_connected(false);
        });
    }

    // Receive task: reads frames, keeps stats, dispatches, and reports
    // the peer done when the link dies.
    tokio::spawn(async move {
        loop {
            match read_frame(&mut read_half, max).await {
                Ok(Some((message, n))) => {
                    peer.note_received(n);
                    ctx.byte_totals.add_received(n);
                    trace!("peer {} received {}", peer.id, message.kind());
                    match message {
                        WireMessage::Heartbeat { latest_height, .. } => {
                            peer.set_last_block(latest_height);
                        }
                        WireMessage::BlockAnnounce { hash, .. } => {
                            peer.set_announced_block(hash);
                        }
                        WireMessage::Inv(invs) => {
                            let mut announced = None;
                            {
                                let mut known = peer.known_inventory.lock();
                                for inv in &invs {
                                    known.insert(*inv);
                                    if inv.inv_type == InvType::Block {
                                        announced = Some(inv.hash);
                                    }
                                }
                            }
                            if let Some(hash) = announced {
                                peer.set_announced_block(hash);
                            }
                        }
                        WireMessage::Version(_) => {
                            debug!("peer {} re-sent version mid-stream", peer.id);
                        }
                        other => {
                            let inbound = InboundMessage {
                                peer: peer.id,
                                node_id: peer.node_id.clone(),
                                message: other,
                            };
                            if ctx.inbound_tx.send(inbound).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    // Parse errors cost the peer its connection, not a ban.
                    warn!("peer {} read failed: {err}", peer.id);
                    break;
                }
            }
        }
        peer.set_connected(false);
        ctx.handle.peer_done(peer.id).await;
    });
}

/// Dial `addr`, handshake, and offer the resulting peer to the manager.
/// Dial or handshake failures are reported so the manager can retry
/// persistent peers.
pub fn connect_outbound(ctx: Arc<PeerContext>, addr: String, persistent: bool, retry_count: u32) {
    tokio::spawn(async move {
        match TcpStream::connect(&addr).await {
            Ok(mut stream) => match handshake(&mut stream, &ctx, true).await {
                Ok(remote) => {
                    let resolved = stream.peer_addr().ok();
                    let Some(resolved) = resolved else {
                        ctx.handle.dial_failed(addr, persistent, retry_count).await;
                        return;
                    };
                    let (tx, rx) = mpsc::channel(ctx.config.channel_buffer_size);
                    let peer = Arc::new(Peer::new(
                        ctx.next_id(),
                        &remote,
                        resolved,
                        false,
                        persistent,
                        retry_count,
                        tx,
                    ));
                    peer.set_connected(true);
                    start_peer_tasks(peer.clone(), stream, rx, ctx.clone());
                    ctx.handle.new_peer(peer).await;
                }
                Err(err) => {
                    debug!("handshake with {addr} failed: {err}");
                    ctx.handle.dial_failed(addr, persistent, retry_count).await;
                }
            },
            Err(err) => {
                debug!("dial {addr} failed: {err}");
                ctx.handle.dial_failed(addr, persistent, retry_count).await;
            }
        }
    });
}

/// Accept inbound connections until the manager shuts down.
pub async fn serve_inbound(listener: TcpListener, ctx: Arc<PeerContext>) {
    loop {
        if ctx.handle.is_shutdown() {
            return;
        }
        match listener.accept().await {
            Ok((mut stream, addr)) => {
                debug!("accepted connection from {addr}");
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    match handshake(&mut stream, &ctx, false).await {
                        Ok(remote) => {
                            let (tx, rx) = mpsc::channel(ctx.config.channel_buffer_size);
                            let peer = Arc::new(Peer::new(
                                ctx.next_id(),
                                &remote,
                                addr,
                                true,
                                false,
                                0,
                                tx,
                            ));
                            peer.set_connected(true);
                            start_peer_tasks(peer.clone(), stream, rx, ctx.clone());
                            ctx.handle.new_peer(peer).await;
                        }
                        Err(err) => debug!("inbound handshake from {addr} failed: {err}"),
                    }
                });
            }
            Err(err) => {
                if !ctx.handle.is_shutdown() {
                    warn!("accept error: {err}");
                }
            }
        }
    }
}
