//! Node error types.

use g2g_git::{FramingError, GitError};
use g2g_p2p::P2pError;
use thiserror::Error;

/// Errors raised by the server dispatcher and the remote helper.
#[derive(Debug, Error)]
pub enum NodeError {
    /// A `g2g://` address does not follow the grammar.
    #[error("invalid address: {0}")]
    AddressFormat(String),

    /// The peer behind an address could not be located.
    #[error("resolution failed: {0}")]
    Resolution(String),

    /// The git subprocess could not be started or failed.
    #[error("git process error: {0}")]
    Process(String),

    /// The network stream could not be opened or broke.
    #[error("stream error: {0}")]
    Stream(String),

    /// The other side sent something the protocol does not allow.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Malformed pkt-line.
    #[error(transparent)]
    Framing(#[from] FramingError),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Local I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<GitError> for NodeError {
    fn from(e: GitError) -> Self {
        match e {
            GitError::Framing(e) => Self::Framing(e),
            GitError::InvalidRepository(_) => Self::AddressFormat(e.to_string()),
            GitError::InvalidProtocol(_) => Self::ProtocolViolation(e.to_string()),
            GitError::Io(e) => Self::Io(e),
        }
    }
}

impl From<P2pError> for NodeError {
    fn from(e: P2pError) -> Self {
        match e {
            P2pError::InvalidPeerId(_) | P2pError::InvalidLocator(_) => {
                Self::AddressFormat(e.to_string())
            }
            P2pError::Resolution { .. } | P2pError::PeerNotFound(_) => {
                Self::Resolution(e.to_string())
            }
            P2pError::InvalidKey(_) => Self::Config(e.to_string()),
            P2pError::Git(e) => e.into(),
            P2pError::Negotiation(_)
            | P2pError::Transport(_)
            | P2pError::ProtocolNotSupported(_)
            | P2pError::Connection(_)
            | P2pError::Io(_) => Self::Stream(e.to_string()),
        }
    }
}

impl From<config::ConfigError> for NodeError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

/// A specialized Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
