//! # g2g P2P
//!
//! Peer-to-peer host used by g2g to carry git services between nodes.
//!
//! The crate exposes the small capability set the git bridge depends on:
//!
//! - a host identity ([`Keypair`], [`PeerId`]) and its listen addresses,
//! - stream handlers registered by protocol prefix ([`StreamHandler`]),
//! - outbound streams to a peer under a protocol id ([`StreamOpener`]),
//! - a [`PeerStore`] seeded with known addresses,
//! - optional [`Discovery`] of a peer's addresses through bootstrap peers.
//!
//! Streams run over libp2p: TCP connections secured with Noise, which
//! authenticates both ends by their Ed25519 keys and encrypts everything
//! after, and multiplexed with yamux. Each stream starts with a one-line
//! protocol negotiation, after which it is handed over untouched.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod discovery;
mod error;
mod host;
mod identity;
mod locator;
mod negotiation;
mod peer;

pub use discovery::{BootstrapDiscovery, Discovery, ANNOUNCE_PROTOCOL, FIND_PEER_PROTOCOL};
pub use error::{P2pError, Result};
pub use host::{Host, PeerStream, StreamHandler, StreamOpener, STREAM_PROTOCOL};
pub use identity::Keypair;
pub use libp2p::Multiaddr;
pub use locator::{tcp_multiaddr, PeerLocator};
pub use peer::{PeerId, PeerStore, DEFAULT_PEER_CAPACITY, MAX_ADDRS_PER_PEER};

use std::time::Duration;

/// Default time allowed for a peer lookup.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Time allowed for connecting, protocol negotiation and short discovery
/// exchanges.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
