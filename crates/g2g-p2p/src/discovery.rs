//! Peer discovery through bootstrap peers.
//!
//! Bootstrap peers keep an address book of everyone who announced to them and
//! answer lookups from it. Both exchanges are pkt-line streams:
//!
//! ```text
//! /g2g/find-peer/1.0.0   ->  find <peer-id>            <-  addr <multiaddr>* 0000
//! /g2g/announce/1.0.0    ->  addr <multiaddr>* 0000    <-  0000
//! ```
//!
//! Both sides accept at most [`MAX_ADDRS_PER_PEER`] addresses per exchange.

use crate::{
    Host, P2pError, PeerId, PeerLocator, PeerStream, Result, StreamHandler,
    DEFAULT_DISCOVERY_TIMEOUT, HANDSHAKE_TIMEOUT, MAX_ADDRS_PER_PEER,
};
use async_trait::async_trait;
use g2g_git::{PktLineScanner, PktLineWriter};
use libp2p::multiaddr::Protocol;
use libp2p::Multiaddr;
use std::net::IpAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::AsyncRead;
use tracing::{debug, info, warn};

/// Protocol id for address lookups.
pub const FIND_PEER_PROTOCOL: &str = "/g2g/find-peer/1.0.0";

/// Protocol id for announcing one's own addresses.
pub const ANNOUNCE_PROTOCOL: &str = "/g2g/announce/1.0.0";

/// Finds the addresses of a peer that is not in the local peer store.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Looks up `peer`, recording any addresses found in the peer store.
    async fn find_peer(&self, peer: &PeerId) -> Result<Vec<Multiaddr>>;
}

/// Discovery that asks a fixed set of bootstrap peers.
#[derive(Debug)]
pub struct BootstrapDiscovery {
    host: Arc<Host>,
    bootstrap: Vec<PeerLocator>,
    timeout: Duration,
}

impl BootstrapDiscovery {
    /// Creates a discovery client using `host` to reach `bootstrap`.
    pub fn new(host: Arc<Host>, bootstrap: Vec<PeerLocator>) -> Self {
        Self {
            host,
            bootstrap,
            timeout: DEFAULT_DISCOVERY_TIMEOUT,
        }
    }

    /// Sets how long a lookup may take.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the bootstrap peers.
    pub fn bootstrap(&self) -> &[PeerLocator] {
        &self.bootstrap
    }

    /// Records the bootstrap peers' addresses in the peer store.
    pub fn seed(&self) {
        for locator in &self.bootstrap {
            self.host.peer_store().add_locator(locator);
        }
    }

    /// Tells every bootstrap peer where this host can be reached, returning
    /// how many accepted.
    pub async fn announce(&self) -> usize {
        self.seed();
        let addrs = self.host.advertised_addrs();

        let mut accepted = 0;
        for locator in &self.bootstrap {
            let peer = locator.peer_id();
            match tokio::time::timeout(self.timeout, self.announce_to(peer, &addrs)).await {
                Ok(Ok(())) => {
                    debug!(bootstrap = %peer.short_id(), "Announced addresses");
                    accepted += 1;
                }
                Ok(Err(e)) => warn!(bootstrap = %peer.short_id(), error = %e, "Announce failed"),
                Err(_) => warn!(bootstrap = %peer.short_id(), "Announce timed out"),
            }
        }
        accepted
    }

    async fn announce_to(&self, bootstrap: &PeerId, addrs: &[Multiaddr]) -> Result<()> {
        let mut stream = self.host.new_stream(bootstrap, ANNOUNCE_PROTOCOL).await?;
        write_addr_lines(&mut stream, addrs).await?;

        match PktLineScanner::new(&mut stream).read().await? {
            Some(frame) if frame.is_flush() => Ok(()),
            _ => Err(P2pError::Connection("announce was not acknowledged".into())),
        }
    }

    async fn query(&self, bootstrap: &PeerId, target: &PeerId) -> Result<Vec<Multiaddr>> {
        let mut stream = self.host.new_stream(bootstrap, FIND_PEER_PROTOCOL).await?;

        let mut writer = PktLineWriter::new(&mut stream);
        writer.write_line(&format!("find {target}")).await?;
        writer.flush().await?;

        read_addr_lines(&mut stream).await
    }

    async fn lookup(&self, target: &PeerId) -> Result<Vec<Multiaddr>> {
        self.seed();

        for locator in &self.bootstrap {
            let bootstrap = locator.peer_id();
            if bootstrap == target {
                return Ok(self.host.peer_store().addrs(target));
            }
            match self.query(bootstrap, target).await {
                Ok(addrs) if !addrs.is_empty() => {
                    info!(peer = %target.short_id(), via = %bootstrap.short_id(), "Found peer");
                    self.host.peer_store().add_addrs(*target, addrs.iter().cloned());
                    return Ok(addrs);
                }
                Ok(_) => debug!(peer = %target.short_id(), via = %bootstrap.short_id(), "Peer unknown to bootstrap"),
                Err(e) => warn!(via = %bootstrap.short_id(), error = %e, "Lookup failed"),
            }
        }

        Err(P2pError::Resolution {
            peer: target.to_string(),
            reason: "no bootstrap peer knows it".into(),
        })
    }
}

#[async_trait]
impl Discovery for BootstrapDiscovery {
    async fn find_peer(&self, peer: &PeerId) -> Result<Vec<Multiaddr>> {
        let known = self.host.peer_store().addrs(peer);
        if !known.is_empty() {
            return Ok(known);
        }
        if self.bootstrap.is_empty() {
            return Err(P2pError::Resolution {
                peer: peer.to_string(),
                reason: "no bootstrap peers configured".into(),
            });
        }

        tokio::time::timeout(self.timeout, self.lookup(peer))
            .await
            .map_err(|_| P2pError::Resolution {
                peer: peer.to_string(),
                reason: format!("timed out after {:?}", self.timeout),
            })?
    }
}

/// Answers `find` requests from the host's peer store.
struct FindPeerHandler {
    host: Weak<Host>,
    timeout: Duration,
}

#[async_trait]
impl StreamHandler for FindPeerHandler {
    async fn handle(&self, mut stream: PeerStream) {
        let peer = *stream.remote_peer();
        match tokio::time::timeout(self.timeout, self.answer(&mut stream)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(peer = %peer.short_id(), error = %e, "find-peer request failed"),
            Err(_) => debug!(peer = %peer.short_id(), "find-peer request timed out"),
        }
    }
}

impl FindPeerHandler {
    async fn answer(&self, stream: &mut PeerStream) -> Result<()> {
        let host = upgrade(&self.host)?;
        let request = PktLineScanner::new(&mut *stream)
            .read()
            .await?
            .ok_or_else(|| P2pError::Connection("empty find-peer request".into()))?;
        let target: PeerId = request
            .as_str()
            .and_then(|line| line.strip_prefix("find "))
            .ok_or_else(|| P2pError::Connection(format!("bad find-peer request: {:?}", request.text())))?
            .parse()?;

        let addrs = if target == host.peer_id() {
            host.advertised_addrs()
        } else {
            host.peer_store().addrs(&target)
        };
        debug!(peer = %target.short_id(), found = addrs.len(), "Answering lookup");

        write_addr_lines(stream, &addrs).await
    }
}

/// Records the addresses a peer announces, under its authenticated id.
struct AnnounceHandler {
    host: Weak<Host>,
    timeout: Duration,
}

#[async_trait]
impl StreamHandler for AnnounceHandler {
    async fn handle(&self, mut stream: PeerStream) {
        let peer = *stream.remote_peer();
        match tokio::time::timeout(self.timeout, self.record(&mut stream)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(peer = %peer.short_id(), error = %e, "announce failed"),
            Err(_) => debug!(peer = %peer.short_id(), "announce timed out"),
        }
    }
}

impl AnnounceHandler {
    async fn record(&self, stream: &mut PeerStream) -> Result<()> {
        let host = upgrade(&self.host)?;
        let announced = read_addr_lines(&mut *stream).await?;
        let observed = stream.remote_addr().and_then(ip_of);
        let addrs: Vec<Multiaddr> = announced
            .into_iter()
            .map(|addr| reachable_addr(addr, observed))
            .collect();

        info!(peer = %stream.remote_peer().short_id(), addrs = ?addrs, "Peer announced");
        host.peer_store().set_addrs(*stream.remote_peer(), addrs);

        let mut writer = PktLineWriter::new(stream);
        writer.flush_pkt().await?;
        writer.flush().await?;
        Ok(())
    }
}

/// Registers the find-peer and announce handlers, making `host` usable as a
/// bootstrap peer.
pub fn register_discovery_handlers(host: &Arc<Host>) {
    register_with_timeout(host, HANDSHAKE_TIMEOUT);
}

fn register_with_timeout(host: &Arc<Host>, timeout: Duration) {
    host.set_stream_handler_match(
        FIND_PEER_PROTOCOL,
        Arc::new(FindPeerHandler {
            host: Arc::downgrade(host),
            timeout,
        }),
    );
    host.set_stream_handler_match(
        ANNOUNCE_PROTOCOL,
        Arc::new(AnnounceHandler {
            host: Arc::downgrade(host),
            timeout,
        }),
    );
}

fn upgrade(host: &Weak<Host>) -> Result<Arc<Host>> {
    host.upgrade()
        .ok_or_else(|| P2pError::Connection("host is shutting down".into()))
}

async fn write_addr_lines(stream: &mut PeerStream, addrs: &[Multiaddr]) -> Result<()> {
    let mut writer = PktLineWriter::new(stream);
    for addr in addrs.iter().take(MAX_ADDRS_PER_PEER) {
        writer.write_line(&format!("addr {addr}")).await?;
    }
    writer.flush_pkt().await?;
    writer.flush().await?;
    Ok(())
}

/// Reads `addr` lines up to a flush-pkt, refusing lists longer than
/// [`MAX_ADDRS_PER_PEER`].
async fn read_addr_lines<R>(stream: &mut R) -> Result<Vec<Multiaddr>>
where
    R: AsyncRead + Unpin,
{
    let mut scanner = PktLineScanner::new(stream);
    let mut addrs = Vec::new();
    for _ in 0..=MAX_ADDRS_PER_PEER {
        let frame = scanner
            .read()
            .await?
            .ok_or_else(|| P2pError::Connection("address list ended without a flush".into()))?;
        if frame.is_flush() {
            return Ok(addrs);
        }
        if let Some(addr) = frame.as_str().and_then(parse_addr_line) {
            addrs.push(addr);
        }
    }
    Err(P2pError::Connection(format!(
        "more than {MAX_ADDRS_PER_PEER} addresses"
    )))
}

fn parse_addr_line(line: &str) -> Option<Multiaddr> {
    line.strip_prefix("addr ")?.parse().ok()
}

fn ip_of(addr: &Multiaddr) -> Option<IpAddr> {
    match addr.iter().next()? {
        Protocol::Ip4(ip) => Some(ip.into()),
        Protocol::Ip6(ip) => Some(ip.into()),
        _ => None,
    }
}

/// A peer behind a wildcard or loopback listener is reachable at the address
/// its connection came from.
fn reachable_addr(announced: Multiaddr, observed: Option<IpAddr>) -> Multiaddr {
    let local = ip_of(&announced).is_some_and(|ip| ip.is_loopback() || ip.is_unspecified());
    match observed {
        Some(ip) if local && !ip.is_loopback() && !ip.is_unspecified() => announced
            .iter()
            .enumerate()
            .map(|(i, p)| if i == 0 { Protocol::from(ip) } else { p })
            .collect(),
        _ => announced,
    }
}
