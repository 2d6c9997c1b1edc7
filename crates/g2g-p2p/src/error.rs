//! P2P error types.

use thiserror::Error;

/// Errors that can occur during P2P operations.
#[derive(Debug, Error)]
pub enum P2pError {
    /// A peer identity string is malformed.
    #[error("invalid peer id: {0}")]
    InvalidPeerId(String),

    /// A peer locator string is malformed.
    #[error("invalid peer locator: {0}")]
    InvalidLocator(String),

    /// Key material is malformed.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Protocol negotiation on a fresh stream failed.
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    /// The libp2p transport could not be set up.
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote peer has no handler for the requested protocol.
    #[error("protocol not supported by peer: {0}")]
    ProtocolNotSupported(String),

    /// No addresses are known for the peer.
    #[error("peer not found: {0}")]
    PeerNotFound(String),

    /// Connection failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// A peer lookup failed or timed out.
    #[error("could not resolve peer {peer}: {reason}")]
    Resolution {
        /// The peer being looked up.
        peer: String,
        /// Why the lookup failed.
        reason: String,
    },

    /// Malformed framing on the wire.
    #[error("wire error: {0}")]
    Git(#[from] g2g_git::GitError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized Result type for P2P operations.
pub type Result<T> = std::result::Result<T, P2pError>;
