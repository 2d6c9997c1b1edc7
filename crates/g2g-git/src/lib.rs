//! Git wire protocol pieces for g2g.
//!
//! This crate holds everything g2g needs to know about git's smart protocol
//! without ever parsing pack data: the pkt-line framing, the identifiers of
//! the two git services as they appear on the peer-to-peer network, and the
//! frame relays used by both the server and the remote helper.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod pktline;
pub mod relay;
mod service;

pub use error::{FramingError, GitError};
pub use pktline::{
    decode_header, Frame, PktLineScanner, PktLineWriter, HEADER_LEN, MAX_PAYLOAD_LEN, MAX_PKT_LEN,
};
pub use service::{
    GitService, ProtocolId, RepositoryId, RECEIVE_PACK_PROTOCOL, UPLOAD_PACK_PROTOCOL,
};

/// Result type for git protocol operations.
pub type Result<T> = std::result::Result<T, GitError>;
