//! # g2g Node
//!
//! Serves git repositories over the g2g peer-to-peer network and fetches
//! from them, by relaying git's smart protocol between a local git process
//! and a peer stream.
//!
//! ## Architecture
//!
//! ```text
//!  git (client)                                           git (server)
//!      │ stdin/stdout                                  stdin/stdout │
//!  ┌───▼──────────────────┐    peer stream    ┌─────────────────────▼──┐
//!  │ RemoteHelperSession  │◄─────────────────►│ ServerDispatcher       │
//!  │  (git-remote-g2g)    │  /g2g/<svc>/<repo>│  └ ServiceProxySession │
//!  └──────────────────────┘                   │      (git-g2g)         │
//!                                             └────────────────────────┘
//! ```
//!
//! ## Binaries
//!
//! - `git-g2g` serves every bare repository under `<app-dir>/repos`.
//! - `git-remote-g2g` is invoked by git for `g2g://` remotes.
//!
//! ## Modules
//!
//! - [`address`] - `g2g://` address parsing and peer resolution
//! - [`config`] - Node configuration management
//! - [`helper`] - Client-side transport helper
//! - [`observability`] - Structured logging
//! - [`server`] - Inbound stream dispatch
//! - [`session`] - Server-side git process proxy

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod address;
pub mod config;
mod error;
pub mod helper;
mod layout;
pub mod observability;
pub mod server;
pub mod session;

pub use address::{PeerReference, RepositoryAddress};
pub use config::NodeConfig;
pub use error::{NodeError, Result};
pub use helper::{HelperOutcome, RemoteHelperSession};
pub use layout::{AppDir, HOME_ENV};
pub use server::ServerDispatcher;
pub use session::ServiceProxySession;
