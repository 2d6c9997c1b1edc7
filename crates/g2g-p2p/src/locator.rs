//! Dialable peer locators.
//!
//! A locator names a transport endpoint and the peer expected there:
//!
//! ```text
//! /ip4/127.0.0.1/tcp/4001/p2p/<peer-id>
//! /ip6/::1/tcp/4001/p2p/<peer-id>
//! /dns/node.example.org/tcp/4001/p2p/<peer-id>
//! ```

use crate::{P2pError, PeerId, Result};
use libp2p::multiaddr::Protocol;
use libp2p::Multiaddr;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

/// Builds the `/ip4|ip6/<ip>/tcp/<port>` multiaddr of a socket address.
#[must_use]
pub fn tcp_multiaddr(addr: SocketAddr) -> Multiaddr {
    Multiaddr::empty()
        .with(Protocol::from(addr.ip()))
        .with(Protocol::Tcp(addr.port()))
}

/// A transport address plus the identity of the peer listening there.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerLocator {
    addr: Multiaddr,
    peer: PeerId,
}

impl PeerLocator {
    /// Creates a locator for a peer at a socket address.
    #[must_use]
    pub fn new(addr: SocketAddr, peer: PeerId) -> Self {
        Self {
            addr: tcp_multiaddr(addr),
            peer,
        }
    }

    /// Parses a `/`-separated locator.
    ///
    /// # Errors
    ///
    /// Returns [`P2pError::InvalidLocator`] if the string is not a multiaddr
    /// of the form `/<ip4|ip6|dns|dns4|dns6>/<host>/tcp/<port>/p2p/<peer-id>`.
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = |why: &str| P2pError::InvalidLocator(format!("{s}: {why}"));

        let mut addr: Multiaddr = s.parse().map_err(|e| invalid(&format!("{e}")))?;
        let Some(Protocol::P2p(peer)) = addr.pop() else {
            return Err(invalid("missing trailing /p2p/<peer-id>"));
        };

        let mut protocols = addr.iter();
        match protocols.next() {
            Some(Protocol::Ip4(_) | Protocol::Ip6(_)) => {}
            Some(Protocol::Dns(host) | Protocol::Dns4(host) | Protocol::Dns6(host))
                if !host.is_empty() => {}
            _ => return Err(invalid("unsupported address protocol")),
        }
        let (Some(Protocol::Tcp(_)), None) = (protocols.next(), protocols.next()) else {
            return Err(invalid("expected /tcp/<port> after the host"));
        };

        Ok(Self {
            addr,
            peer: peer.into(),
        })
    }

    /// Returns the peer expected at this locator.
    #[must_use]
    pub fn peer_id(&self) -> &PeerId {
        &self.peer
    }

    /// Returns the transport address, without the `/p2p` suffix.
    #[must_use]
    pub fn addr(&self) -> &Multiaddr {
        &self.addr
    }
}

impl FromStr for PeerLocator {
    type Err = P2pError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for PeerLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/p2p/{}", self.addr, self.peer)
    }
}
