//! Peer identities and the address book.

use crate::{P2pError, PeerLocator, Result};
use libp2p::Multiaddr;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::sync::Arc;

/// Peers the address book remembers before evicting the least recently used.
pub const DEFAULT_PEER_CAPACITY: usize = 1024;

/// Addresses kept per peer; extra ones are dropped.
pub const MAX_ADDRS_PER_PEER: usize = 16;

/// A peer identifier derived from the peer's Ed25519 public key.
///
/// Its text form is the base58 multihash used across libp2p
/// (`12D3KooW...`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(libp2p::PeerId);

impl PeerId {
    /// Returns the libp2p peer id.
    #[must_use]
    pub const fn as_libp2p(&self) -> &libp2p::PeerId {
        &self.0
    }

    /// Returns a short representation for logs.
    #[must_use]
    pub fn short_id(&self) -> String {
        let text = self.0.to_base58();
        let start = text.len().saturating_sub(8);
        text[start..].to_string()
    }
}

impl From<libp2p::PeerId> for PeerId {
    fn from(id: libp2p::PeerId) -> Self {
        Self(id)
    }
}

impl From<PeerId> for libp2p::PeerId {
    fn from(id: PeerId) -> Self {
        id.0
    }
}

impl FromStr for PeerId {
    type Err = P2pError;

    fn from_str(s: &str) -> Result<Self> {
        libp2p::PeerId::from_str(s)
            .map(Self)
            .map_err(|e| P2pError::InvalidPeerId(format!("{s}: {e}")))
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

/// Known addresses of peers, bounded in both peers and addresses per peer.
///
/// Cheap to clone; clones share the same table.
#[derive(Clone)]
pub struct PeerStore {
    addrs: Arc<Mutex<LruCache<PeerId, Vec<Multiaddr>>>>,
}

impl PeerStore {
    /// Creates an empty store holding up to [`DEFAULT_PEER_CAPACITY`] peers.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_PEER_CAPACITY)
    }

    /// Creates an empty store holding up to `capacity` peers.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            addrs: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    /// Records addresses for a peer, ignoring ones already known.
    pub fn add_addrs(&self, peer: PeerId, addrs: impl IntoIterator<Item = Multiaddr>) {
        let mut table = self.addrs.lock();
        let known = table.get_or_insert_mut(peer, Vec::new);
        for addr in addrs {
            if known.len() >= MAX_ADDRS_PER_PEER {
                break;
            }
            if !known.contains(&addr) {
                known.push(addr);
            }
        }
    }

    /// Replaces the addresses recorded for a peer.
    pub fn set_addrs(&self, peer: PeerId, addrs: impl IntoIterator<Item = Multiaddr>) {
        self.addrs.lock().pop(&peer);
        self.add_addrs(peer, addrs);
    }

    /// Records a locator's address under its peer id.
    pub fn add_locator(&self, locator: &PeerLocator) {
        self.add_addrs(*locator.peer_id(), [locator.addr().clone()]);
    }

    /// Returns the known addresses of a peer.
    #[must_use]
    pub fn addrs(&self, peer: &PeerId) -> Vec<Multiaddr> {
        self.addrs.lock().get(peer).cloned().unwrap_or_default()
    }

    /// Returns true if at least one address is known for the peer.
    #[must_use]
    pub fn contains(&self, peer: &PeerId) -> bool {
        self.addrs.lock().peek(peer).is_some_and(|a| !a.is_empty())
    }

    /// Forgets a peer.
    pub fn remove(&self, peer: &PeerId) {
        self.addrs.lock().pop(peer);
    }

    /// Returns the number of peers with known addresses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.addrs.lock().len()
    }

    /// Returns true if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.addrs.lock().is_empty()
    }
}

impl Default for PeerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PeerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.addrs.lock();
        f.debug_struct("PeerStore")
            .field("peers", &table.len())
            .field("capacity", &table.cap())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Keypair;
    use pretty_assertions::assert_eq;

    fn tcp(port: u16) -> Multiaddr {
        format!("/ip4/127.0.0.1/tcp/{port}").parse().unwrap()
    }

    #[test]
    fn peer_id_text_roundtrip() {
        let id = Keypair::generate().peer_id();
        let text = id.to_string();
        assert!(text.starts_with("12D3KooW"), "{text}");
        assert_eq!(text.parse::<PeerId>().unwrap(), id);
        assert!(text.ends_with(&id.short_id()));
        assert_eq!(id.short_id().len(), 8);
    }

    #[test]
    fn peer_id_rejects_garbage() {
        assert!("".parse::<PeerId>().is_err());
        assert!("zz".parse::<PeerId>().is_err());
        assert!("abcd".parse::<PeerId>().is_err());
        assert!("0OIl".parse::<PeerId>().is_err());
    }

    #[test]
    fn peer_store_dedupes() {
        let store = PeerStore::new();
        let peer = Keypair::generate().peer_id();
        let a = tcp(4001);
        let b: Multiaddr = "/ip4/10.0.0.1/tcp/4001".parse().unwrap();

        store.add_addrs(peer, [a.clone(), b.clone()]);
        store.add_addrs(peer, [a.clone()]);
        assert_eq!(store.addrs(&peer), vec![a, b]);
        assert!(store.contains(&peer));
        assert_eq!(store.len(), 1);

        store.remove(&peer);
        assert!(!store.contains(&peer));
        assert!(store.is_empty());
    }

    #[test]
    fn peer_store_clones_share_state() {
        let store = PeerStore::new();
        let clone = store.clone();
        let peer = Keypair::generate().peer_id();
        clone.add_addrs(peer, [tcp(1)]);
        assert!(store.contains(&peer));
    }

    #[test]
    fn peer_store_caps_addresses_per_peer() {
        let store = PeerStore::new();
        let peer = Keypair::generate().peer_id();

        store.add_addrs(peer, (0..1000).map(tcp));
        store.add_addrs(peer, (1000..2000).map(tcp));

        let addrs = store.addrs(&peer);
        assert_eq!(addrs.len(), MAX_ADDRS_PER_PEER);
        assert_eq!(addrs[0], tcp(0));
    }

    #[test]
    fn peer_store_evicts_least_recently_used() {
        let store = PeerStore::with_capacity(2);
        let a = Keypair::generate().peer_id();
        let b = Keypair::generate().peer_id();
        let c = Keypair::generate().peer_id();

        store.add_addrs(a, [tcp(1)]);
        store.add_addrs(b, [tcp(2)]);
        // Touch `a` so `b` becomes the eviction candidate.
        assert_eq!(store.addrs(&a), vec![tcp(1)]);
        store.add_addrs(c, [tcp(3)]);

        assert_eq!(store.len(), 2);
        assert!(store.contains(&a));
        assert!(!store.contains(&b));
        assert!(store.contains(&c));
    }

    #[test]
    fn peer_store_set_replaces() {
        let store = PeerStore::new();
        let peer = Keypair::generate().peer_id();
        store.add_addrs(peer, [tcp(1), tcp(2)]);
        store.set_addrs(peer, [tcp(3)]);
        assert_eq!(store.addrs(&peer), vec![tcp(3)]);
    }
}
