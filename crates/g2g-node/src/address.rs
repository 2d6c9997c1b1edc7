//! `g2g://` repository addresses.
//!
//! ```text
//! g2g://<peer-id>/<name>.git
//! g2g:///ip4/<addr>/tcp/<port>/p2p/<peer-id>/<name>.git
//! ```
//!
//! The first form names a peer by identity only and needs discovery; the
//! second carries a dialable locator.

use crate::{NodeError, Result};
use g2g_git::{GitService, ProtocolId, RepositoryId};
use g2g_p2p::{Discovery, PeerId, PeerLocator, PeerStore};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// URI scheme handled by the remote helper.
pub const SCHEME: &str = "g2g";

static ADDRESS_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^g2g://(?P<peer>(?:/[^/]+)+|[1-9A-HJ-NP-Za-km-z]+)/(?P<repo>[A-Za-z0-9_-]+\.git)$")
        .expect("Invalid regex")
});

/// How the peer serving a repository is named.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerReference {
    /// A locator that can be dialed directly.
    Dialable(PeerLocator),
    /// A bare identity that must be discovered.
    Identity(PeerId),
}

impl PeerReference {
    /// Returns the peer identity.
    pub fn peer_id(&self) -> &PeerId {
        match self {
            Self::Dialable(locator) => locator.peer_id(),
            Self::Identity(peer) => peer,
        }
    }
}

/// A parsed `g2g://` address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryAddress {
    /// The serving peer.
    pub peer: PeerReference,
    /// The repository on that peer.
    pub repository: RepositoryId,
}

impl RepositoryAddress {
    /// Parses an address. No network activity happens here.
    pub fn parse(s: &str) -> Result<Self> {
        let caps = ADDRESS_REGEX.captures(s).ok_or_else(|| {
            NodeError::AddressFormat(format!(
                "{s:?} is not of the form {SCHEME}://<peer>/<name>.git"
            ))
        })?;

        let peer = &caps["peer"];
        let peer = if peer.starts_with('/') {
            PeerReference::Dialable(
                PeerLocator::parse(peer)
                    .map_err(|e| NodeError::AddressFormat(format!("{s:?}: {e}")))?,
            )
        } else {
            PeerReference::Identity(
                peer.parse()
                    .map_err(|e| NodeError::AddressFormat(format!("{s:?}: {e}")))?,
            )
        };

        Ok(Self {
            peer,
            repository: RepositoryId::parse(&caps["repo"])?,
        })
    }

    /// Returns the serving peer's identity.
    pub fn peer_id(&self) -> &PeerId {
        self.peer.peer_id()
    }

    /// Returns the stream protocol id for `service` on this repository.
    pub fn protocol_id(&self, service: GitService) -> ProtocolId {
        ProtocolId::new(service, self.repository.clone())
    }

    /// Makes the peer dialable: a locator seeds `store` directly, a bare
    /// identity goes through `discovery`, bounded by `timeout`.
    pub async fn resolve(
        &self,
        store: &PeerStore,
        discovery: Option<&dyn Discovery>,
        timeout: Duration,
    ) -> Result<PeerId> {
        let resolution = |reason: String| NodeError::Resolution(format!("{}: {reason}", self));

        match &self.peer {
            PeerReference::Dialable(locator) => {
                store.add_locator(locator);
                debug!(peer = %locator.peer_id().short_id(), "Seeded peer store from locator");
            }
            PeerReference::Identity(peer) if store.contains(peer) => {}
            PeerReference::Identity(peer) => {
                let discovery = discovery
                    .ok_or_else(|| resolution("no discovery configured for a bare peer id".into()))?;
                let addrs = tokio::time::timeout(timeout, discovery.find_peer(peer))
                    .await
                    .map_err(|_| resolution(format!("lookup timed out after {timeout:?}")))?
                    .map_err(|e| resolution(e.to_string()))?;
                store.add_addrs(*peer, addrs);
            }
        }

        Ok(*self.peer_id())
    }
}

impl FromStr for RepositoryAddress {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for RepositoryAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.peer {
            PeerReference::Dialable(locator) => write!(f, "{SCHEME}://{locator}/{}", self.repository),
            PeerReference::Identity(peer) => write!(f, "{SCHEME}://{peer}/{}", self.repository),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use g2g_p2p::{Keypair, P2pError};
    use pretty_assertions::assert_eq;
    use g2g_p2p::Multiaddr;
    use proptest::prelude::*;

    fn peer() -> PeerId {
        Keypair::generate().peer_id()
    }

    #[test]
    fn test_parse_identity_address() {
        let id = peer();
        let address = RepositoryAddress::parse(&format!("g2g://{id}/repo.git")).unwrap();
        assert_eq!(address.peer, PeerReference::Identity(id));
        assert_eq!(address.repository.as_str(), "repo.git");
        assert_eq!(address.to_string(), format!("g2g://{id}/repo.git"));
    }

    #[test]
    fn test_parse_locator_address() {
        let id = peer();
        let s = format!("g2g:///ip4/127.0.0.1/tcp/4001/p2p/{id}/my_repo-1.git");
        let address = RepositoryAddress::parse(&s).unwrap();
        assert_eq!(address.peer_id(), &id);
        assert!(matches!(address.peer, PeerReference::Dialable(_)));
        assert_eq!(address.repository.as_str(), "my_repo-1.git");
        assert_eq!(address.to_string(), s);
        assert_eq!(
            address.protocol_id(GitService::UploadPack).to_string(),
            "/g2g/upload-pack/1.0.0/my_repo-1.git"
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        let id = peer();
        for s in [
            format!("g2g://{id}/repo"),
            format!("git://{id}/repo.git"),
            format!("{id}/repo.git"),
            format!("g2g://{id}/"),
            format!("g2g://{id}/a/repo.git"),
            format!("g2g://{id}/../repo.git"),
            format!("g2g://{}/repo.git", id.to_string().to_uppercase()),
            format!("g2g:///ip4/127.0.0.1/tcp/4001/{id}/repo.git"),
            format!("g2g:///ip4/127.0.0.1/tcp/4001/p2p/{id}/repo.git/"),
            "g2g://0OIl/repo.git".to_string(),
            "g2g://abc/repo.git".to_string(),
        ] {
            let err = RepositoryAddress::parse(&s).unwrap_err();
            assert!(matches!(err, NodeError::AddressFormat(_)), "{s:?}: {err:?}");
        }
    }

    struct StaticDiscovery(Option<Vec<Multiaddr>>);

    #[async_trait]
    impl Discovery for StaticDiscovery {
        async fn find_peer(&self, peer: &PeerId) -> g2g_p2p::Result<Vec<Multiaddr>> {
            self.0.clone().ok_or_else(|| P2pError::Resolution {
                peer: peer.to_string(),
                reason: "unknown".into(),
            })
        }
    }

    struct StalledDiscovery;

    #[async_trait]
    impl Discovery for StalledDiscovery {
        async fn find_peer(&self, _peer: &PeerId) -> g2g_p2p::Result<Vec<Multiaddr>> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_resolve_locator_seeds_store() {
        let id = peer();
        let address =
            RepositoryAddress::parse(&format!("g2g:///ip4/10.0.0.1/tcp/9/p2p/{id}/r.git")).unwrap();
        let store = PeerStore::new();

        let resolved = address.resolve(&store, None, Duration::from_secs(1)).await.unwrap();
        assert_eq!(resolved, id);
        assert_eq!(
            store.addrs(&id),
            vec!["/ip4/10.0.0.1/tcp/9".parse::<Multiaddr>().unwrap()]
        );
    }

    #[tokio::test]
    async fn test_resolve_identity_uses_discovery() {
        let id = peer();
        let address = RepositoryAddress::parse(&format!("g2g://{id}/r.git")).unwrap();
        let store = PeerStore::new();
        let found: Multiaddr = "/ip4/192.0.2.1/tcp/4001".parse().unwrap();
        let discovery = StaticDiscovery(Some(vec![found.clone()]));

        address
            .resolve(&store, Some(&discovery), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(store.addrs(&id), vec![found]);
    }

    #[tokio::test]
    async fn test_resolve_identity_failures() {
        let id = peer();
        let address = RepositoryAddress::parse(&format!("g2g://{id}/r.git")).unwrap();
        let store = PeerStore::new();

        let err = address
            .resolve(&store, None, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Resolution(_)));

        let err = address
            .resolve(&store, Some(&StaticDiscovery(None)), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Resolution(_)));

        let err = address
            .resolve(&store, Some(&StalledDiscovery), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Resolution(_)));
    }

    proptest! {
        #[test]
        fn prop_identity_addresses_parse(
            secret in any::<[u8; 32]>(),
            name in "[A-Za-z0-9_-]{1,24}",
        ) {
            let id = Keypair::from_secret_bytes(&secret).unwrap().peer_id();
            let s = format!("g2g://{id}/{name}.git");
            let address = RepositoryAddress::parse(&s).unwrap();
            prop_assert_eq!(address.peer_id(), &id);
            prop_assert_eq!(address.repository.as_str(), format!("{name}.git"));
        }

        #[test]
        fn prop_addresses_without_suffix_fail(
            secret in any::<[u8; 32]>(),
            name in "[A-Za-z0-9_-]{1,24}",
        ) {
            let id = Keypair::from_secret_bytes(&secret).unwrap().peer_id();
            let without_suffix = format!("g2g://{id}/{name}");
            let other_scheme = format!("https://{id}/{name}.git");
            prop_assert!(RepositoryAddress::parse(&without_suffix).is_err());
            prop_assert!(RepositoryAddress::parse(&other_scheme).is_err());
        }

        #[test]
        fn prop_parse_never_panics(s in "\\PC*") {
            let _ = RepositoryAddress::parse(&s);
        }
    }
}
