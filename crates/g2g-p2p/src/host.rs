//! The P2P host: runs a libp2p swarm, dispatches inbound streams to handlers
//! and opens outbound streams.
//!
//! Connections are TCP secured with Noise and multiplexed with yamux. Every
//! stream is opened under [`STREAM_PROTOCOL`]; the g2g protocol id is then
//! negotiated in-band so handlers can match on prefixes.

use crate::negotiation::{answer, propose, read_proposal};
use crate::{Keypair, P2pError, PeerId, PeerLocator, PeerStore, Result, HANDSHAKE_TIMEOUT};
use async_trait::async_trait;
use futures::StreamExt;
use libp2p::core::transport::ListenerId;
use libp2p::multiaddr::Protocol;
use libp2p::swarm::dial_opts::{DialOpts, PeerCondition};
use libp2p::swarm::{ConnectionId, SwarmEvent};
use libp2p::{noise, tcp, yamux, Multiaddr, StreamProtocol, Swarm, SwarmBuilder};
use libp2p_stream::{Control, IncomingStreams, OpenStreamError};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::sync::{mpsc, oneshot};
use tokio_util::compat::{Compat, FuturesAsyncReadCompatExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

/// The libp2p protocol every g2g stream is opened under.
pub const STREAM_PROTOCOL: StreamProtocol = StreamProtocol::new("/g2g/stream/1.0.0");

/// How long a connection without open streams is kept.
const IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(60);

/// An authenticated, encrypted, bidirectional byte stream to a peer, opened
/// under one protocol id.
pub struct PeerStream {
    inner: Compat<libp2p::Stream>,
    remote_peer: PeerId,
    remote_addr: Option<Multiaddr>,
    protocol: String,
}

impl PeerStream {
    /// Returns the authenticated remote peer.
    pub fn remote_peer(&self) -> &PeerId {
        &self.remote_peer
    }

    /// Returns the remote transport address, if the connection is still known.
    pub fn remote_addr(&self) -> Option<&Multiaddr> {
        self.remote_addr.as_ref()
    }

    /// Returns the protocol id the stream was opened with.
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Closes the write side and waits for it to be flushed.
    pub async fn close(mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

impl std::fmt::Debug for PeerStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerStream")
            .field("remote_peer", &self.remote_peer)
            .field("remote_addr", &self.remote_addr)
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}

impl AsyncRead for PeerStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for PeerStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Handles inbound streams for a protocol prefix.
#[async_trait]
pub trait StreamHandler: Send + Sync + 'static {
    /// Takes ownership of an inbound stream.
    async fn handle(&self, stream: PeerStream);
}

/// Opens outbound streams to peers.
#[async_trait]
pub trait StreamOpener: Send + Sync {
    /// The stream type returned.
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Opens a stream to `peer` under `protocol`.
    async fn open_stream(&self, peer: &PeerId, protocol: &str) -> Result<Self::Stream>;
}

type Handlers = Vec<(String, Arc<dyn StreamHandler>)>;

/// Requests from the host to the task that owns the swarm.
enum Command {
    Listen {
        addr: Multiaddr,
        reply: oneshot::Sender<Result<Multiaddr>>,
    },
    Dial {
        peer: PeerId,
        addrs: Vec<Multiaddr>,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// State the swarm task publishes to the host.
#[derive(Default)]
struct Shared {
    listen_addrs: RwLock<Vec<Multiaddr>>,
    connections: RwLock<HashMap<PeerId, Multiaddr>>,
}

/// A node on the g2g network.
pub struct Host {
    keypair: Keypair,
    peer_store: PeerStore,
    handlers: RwLock<Handlers>,
    external_addrs: RwLock<Vec<Multiaddr>>,
    control: Control,
    incoming: Mutex<Option<IncomingStreams>>,
    commands: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
}

impl Host {
    /// Creates a host with the given identity and an empty peer store, and
    /// starts its swarm on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot be built.
    pub fn new(keypair: Keypair) -> Result<Self> {
        let swarm = SwarmBuilder::with_existing_identity(keypair.to_identity())
            .with_tokio()
            .with_tcp(
                tcp::Config::default().nodelay(true),
                noise::Config::new,
                yamux::Config::default,
            )
            .map_err(transport_error)?
            .with_dns()
            .map_err(transport_error)?
            .with_behaviour(|_| libp2p_stream::Behaviour::new())
            .map_err(transport_error)?
            .with_swarm_config(|c| c.with_idle_connection_timeout(IDLE_CONNECTION_TIMEOUT))
            .build();

        let mut control = swarm.behaviour().new_control();
        let incoming = control
            .accept(STREAM_PROTOCOL)
            .map_err(transport_error)?;

        let shared = Arc::new(Shared::default());
        let (commands, rx) = mpsc::unbounded_channel();
        let span = tracing::info_span!("swarm", peer = %keypair.peer_id().short_id());
        tokio::spawn(drive(swarm, rx, Arc::clone(&shared)).instrument(span));

        Ok(Self {
            keypair,
            peer_store: PeerStore::new(),
            handlers: RwLock::new(Vec::new()),
            external_addrs: RwLock::new(Vec::new()),
            control,
            incoming: Mutex::new(Some(incoming)),
            commands,
            shared,
        })
    }

    /// Returns this host's peer id.
    pub fn peer_id(&self) -> PeerId {
        self.keypair.peer_id()
    }

    /// Returns the peer store.
    pub fn peer_store(&self) -> &PeerStore {
        &self.peer_store
    }

    /// Registers `handler` for every protocol id equal to `prefix` or
    /// starting with `prefix/`. When several prefixes match, the longest wins.
    pub fn set_stream_handler_match(&self, prefix: impl Into<String>, handler: Arc<dyn StreamHandler>) {
        let prefix = prefix.into();
        let mut handlers = self.handlers.write();
        handlers.retain(|(p, _)| *p != prefix);
        debug!(prefix = %prefix, "Registered stream handler");
        handlers.push((prefix, handler));
    }

    fn handler_for(&self, protocol: &str) -> Option<Arc<dyn StreamHandler>> {
        self.handlers
            .read()
            .iter()
            .filter(|(prefix, _)| protocol_matches(prefix, protocol))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, handler)| Arc::clone(handler))
    }

    /// Starts listening on a TCP address and returns the first address the
    /// listener reports.
    pub async fn listen(&self, addr: SocketAddr) -> Result<Multiaddr> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Listen {
            addr: crate::tcp_multiaddr(addr),
            reply,
        })?;
        let local = rx.await.map_err(|_| swarm_stopped())??;
        info!(addr = %local, "Listening");
        Ok(local)
    }

    /// Returns the addresses the swarm is listening on.
    pub fn listen_addrs(&self) -> Vec<Multiaddr> {
        self.shared.listen_addrs.read().clone()
    }

    /// Adds an address other peers can reach this host at.
    pub fn add_external_addr(&self, addr: Multiaddr) {
        let mut external = self.external_addrs.write();
        if !external.contains(&addr) {
            external.push(addr);
        }
    }

    /// Addresses worth telling other peers about. Wildcard addresses are
    /// left out.
    pub fn advertised_addrs(&self) -> Vec<Multiaddr> {
        let mut addrs: Vec<Multiaddr> = self
            .listen_addrs()
            .into_iter()
            .filter(|addr| !is_unspecified(addr))
            .collect();
        for addr in self.external_addrs.read().iter() {
            if !addrs.contains(addr) {
                addrs.push(addr.clone());
            }
        }
        addrs
    }

    /// Full locators for this host, one per advertised address.
    pub fn locators(&self) -> Vec<PeerLocator> {
        let peer = self.peer_id();
        self.advertised_addrs()
            .into_iter()
            .filter_map(|addr| PeerLocator::parse(&format!("{addr}/p2p/{peer}")).ok())
            .collect()
    }

    /// Accepts inbound streams until `shutdown` is cancelled. Each stream is
    /// negotiated and handled on its own task.
    ///
    /// # Errors
    ///
    /// Returns an error if the host is already serving.
    pub async fn serve(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        let mut incoming = self
            .incoming
            .lock()
            .take()
            .ok_or_else(|| P2pError::Transport("host is already serving".into()))?;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Stream listener shutting down");
                    return Ok(());
                }
                next = incoming.next() => match next {
                    Some((peer, stream)) => {
                        let peer = PeerId::from(peer);
                        let host = Arc::clone(&self);
                        let span = tracing::info_span!("stream", peer = %peer.short_id());
                        tokio::spawn(host.accept(peer, stream).instrument(span));
                    }
                    None => {
                        debug!("Swarm stopped");
                        return Ok(());
                    }
                },
            }
        }
    }

    async fn accept(self: Arc<Self>, remote_peer: PeerId, stream: libp2p::Stream) {
        let mut stream = stream.compat();
        let setup = async {
            let protocol = read_proposal(&mut stream).await?;
            let handler = self.handler_for(&protocol);
            answer(&mut stream, handler.is_some()).await?;
            Ok::<_, P2pError>((protocol, handler))
        };

        let (protocol, handler) = match tokio::time::timeout(HANDSHAKE_TIMEOUT, setup).await {
            Ok(Ok(setup)) => setup,
            Ok(Err(e)) => {
                debug!(error = %e, "Stream setup failed");
                return;
            }
            Err(_) => {
                debug!("Stream setup timed out");
                return;
            }
        };

        let Some(handler) = handler else {
            debug!(protocol = %protocol, "No handler for protocol");
            return;
        };

        debug!(protocol = %protocol, "Inbound stream");
        let remote_addr = self.shared.connections.read().get(&remote_peer).cloned();
        handler
            .handle(PeerStream {
                inner: stream,
                remote_peer,
                remote_addr,
                protocol,
            })
            .await;
    }

    /// Opens a stream to `peer` under `protocol`, connecting first through
    /// the addresses in the peer store.
    pub async fn new_stream(&self, peer: &PeerId, protocol: &str) -> Result<PeerStream> {
        let addrs = self.peer_store.addrs(peer);
        let connected = self.shared.connections.read().contains_key(peer);
        if addrs.is_empty() && !connected {
            return Err(P2pError::PeerNotFound(peer.to_string()));
        }

        let setup = async {
            self.connect(peer, addrs).await?;
            let stream = self
                .control
                .clone()
                .open_stream(*peer.as_libp2p(), STREAM_PROTOCOL)
                .await
                .map_err(|e| match e {
                    OpenStreamError::UnsupportedProtocol(p) => {
                        P2pError::ProtocolNotSupported(p.to_string())
                    }
                    other => P2pError::Connection(other.to_string()),
                })?;

            let mut stream = stream.compat();
            propose(&mut stream, protocol).await?;
            let remote_addr = self.shared.connections.read().get(peer).cloned();
            Ok::<_, P2pError>(PeerStream {
                inner: stream,
                remote_peer: *peer,
                remote_addr,
                protocol: protocol.to_string(),
            })
        };

        tokio::time::timeout(HANDSHAKE_TIMEOUT, setup)
            .await
            .map_err(|_| P2pError::Connection(format!("timed out reaching {}", peer.short_id())))?
    }

    async fn connect(&self, peer: &PeerId, addrs: Vec<Multiaddr>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Dial {
            peer: *peer,
            addrs,
            reply,
        })?;
        let dialed = rx.await.map_err(|_| swarm_stopped())?;
        if let Err(e) = &dialed {
            debug!(peer = %peer.short_id(), error = %e, "Dial failed");
        }
        dialed
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| swarm_stopped())
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("peer_id", &self.peer_id())
            .field("listen_addrs", &self.listen_addrs())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StreamOpener for Host {
    type Stream = PeerStream;

    async fn open_stream(&self, peer: &PeerId, protocol: &str) -> Result<PeerStream> {
        self.new_stream(peer, protocol).await
    }
}

#[async_trait]
impl<T: StreamOpener + ?Sized> StreamOpener for Arc<T> {
    type Stream = T::Stream;

    async fn open_stream(&self, peer: &PeerId, protocol: &str) -> Result<T::Stream> {
        (**self).open_stream(peer, protocol).await
    }
}

/// Owns the swarm: runs host commands and publishes connection state until
/// the host goes away.
async fn drive(
    mut swarm: Swarm<libp2p_stream::Behaviour>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    shared: Arc<Shared>,
) {
    let mut pending_listens: HashMap<ListenerId, oneshot::Sender<Result<Multiaddr>>> =
        HashMap::new();
    let mut pending_dials: HashMap<ConnectionId, oneshot::Sender<Result<()>>> = HashMap::new();

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Listen { addr, reply }) => match swarm.listen_on(addr) {
                    Ok(id) => {
                        pending_listens.insert(id, reply);
                    }
                    Err(e) => {
                        let _ = reply.send(Err(P2pError::Transport(e.to_string())));
                    }
                },
                Some(Command::Dial { peer, reply, .. }) if swarm.is_connected(peer.as_libp2p()) => {
                    let _ = reply.send(Ok(()));
                }
                Some(Command::Dial { peer, addrs, reply }) => {
                    let opts = DialOpts::peer_id(peer.into())
                        .addresses(addrs)
                        .condition(PeerCondition::Always)
                        .build();
                    let id = opts.connection_id();
                    match swarm.dial(opts) {
                        Ok(()) => {
                            pending_dials.insert(id, reply);
                        }
                        Err(e) => {
                            let _ = reply.send(Err(P2pError::Connection(e.to_string())));
                        }
                    }
                }
                None => {
                    debug!("Host dropped, stopping swarm");
                    return;
                }
            },
            event = swarm.select_next_some() => match event {
                SwarmEvent::NewListenAddr { listener_id, address } => {
                    debug!(addr = %address, "New listen address");
                    shared.listen_addrs.write().push(address.clone());
                    if let Some(reply) = pending_listens.remove(&listener_id) {
                        let _ = reply.send(Ok(address));
                    }
                }
                SwarmEvent::ExpiredListenAddr { address, .. } => {
                    shared.listen_addrs.write().retain(|a| *a != address);
                }
                SwarmEvent::ListenerClosed { listener_id, reason, .. } => {
                    let why = reason.err().map_or_else(|| "closed".to_string(), |e| e.to_string());
                    warn!(reason = %why, "Listener closed");
                    if let Some(reply) = pending_listens.remove(&listener_id) {
                        let _ = reply.send(Err(P2pError::Transport(why)));
                    }
                }
                SwarmEvent::ConnectionEstablished { peer_id, connection_id, endpoint, .. } => {
                    let remote = endpoint.get_remote_address().clone();
                    debug!(peer = %PeerId::from(peer_id).short_id(), addr = %remote, "Connected");
                    shared.connections.write().insert(peer_id.into(), remote);
                    if let Some(reply) = pending_dials.remove(&connection_id) {
                        let _ = reply.send(Ok(()));
                    }
                }
                SwarmEvent::ConnectionClosed { peer_id, num_established: 0, .. } => {
                    debug!(peer = %PeerId::from(peer_id).short_id(), "Disconnected");
                    shared.connections.write().remove(&PeerId::from(peer_id));
                }
                SwarmEvent::OutgoingConnectionError { connection_id, error, .. } => {
                    if let Some(reply) = pending_dials.remove(&connection_id) {
                        let _ = reply.send(Err(P2pError::Connection(error.to_string())));
                    }
                }
                SwarmEvent::IncomingConnectionError { send_back_addr, error, .. } => {
                    debug!(addr = %send_back_addr, error = %error, "Inbound connection failed");
                }
                _ => {}
            },
        }
    }
}

fn protocol_matches(prefix: &str, protocol: &str) -> bool {
    match protocol.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || prefix.ends_with('/'),
        None => false,
    }
}

fn is_unspecified(addr: &Multiaddr) -> bool {
    match addr.iter().next() {
        Some(Protocol::Ip4(ip)) => ip.is_unspecified(),
        Some(Protocol::Ip6(ip)) => ip.is_unspecified(),
        _ => false,
    }
}

fn transport_error(e: impl std::fmt::Display) -> P2pError {
    P2pError::Transport(e.to_string())
}

fn swarm_stopped() -> P2pError {
    P2pError::Transport("swarm task stopped".into())
}
