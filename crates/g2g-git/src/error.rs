//! Git protocol error types.

use thiserror::Error;

/// A malformed pkt-line on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    /// The input ended in the middle of a length header.
    #[error("truncated pkt-line header: got {0} of 4 bytes")]
    TruncatedHeader(usize),

    /// The length header is not four hexadecimal digits.
    #[error("pkt-line header is not hexadecimal: {0:?}")]
    InvalidHeader(String),

    /// The declared length is below 4 or above the maximum line size.
    #[error("pkt-line length {0} out of range")]
    InvalidLength(usize),

    /// The input ended before the declared payload was read.
    #[error("truncated pkt-line payload: expected {expected} bytes, got {actual}")]
    TruncatedPayload {
        /// Declared payload size.
        expected: usize,
        /// Bytes actually available.
        actual: usize,
    },

    /// An outgoing payload does not fit in a single pkt-line.
    #[error("pkt-line payload of {0} bytes exceeds the maximum")]
    PayloadTooLarge(usize),
}

/// Errors that can occur during git protocol operations.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    /// Invalid pkt-line framing.
    #[error("invalid pkt-line: {0}")]
    Framing(#[from] FramingError),

    /// Repository identifier is not a valid `<name>.git` directory name.
    #[error("invalid repository id: {0:?}")]
    InvalidRepository(String),

    /// Stream protocol identifier does not name a known git service.
    #[error("invalid protocol id: {0:?}")]
    InvalidProtocol(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GitError {
    /// Returns the framing error, if this is one.
    pub fn as_framing(&self) -> Option<&FramingError> {
        match self {
            Self::Framing(e) => Some(e),
            _ => None,
        }
    }
}
