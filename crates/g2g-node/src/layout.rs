//! On-disk layout of a node.
//!
//! ```text
//! <app-dir>/            $G2G_HOME, or ~/.g2g
//!   identity.key        hex-encoded ed25519 secret key (server only)
//!   config.yaml         optional settings
//!   repos/              bare repositories served by name, e.g. repos/r.git
//! ```

use crate::{NodeError, Result};
use g2g_p2p::Keypair;
use std::path::{Path, PathBuf};

/// Environment variable overriding the application directory.
pub const HOME_ENV: &str = "G2G_HOME";

/// The application directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppDir {
    root: PathBuf,
}

impl AppDir {
    /// Uses `root` as the application directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Locates the application directory from the environment.
    pub fn locate() -> Result<Self> {
        match std::env::var_os(HOME_ENV) {
            Some(root) if !root.is_empty() => Ok(Self::new(root)),
            _ => dirs::home_dir()
                .map(|home| Self::new(home.join(".g2g")))
                .ok_or_else(|| {
                    NodeError::Config(format!("cannot find a home directory; set {HOME_ENV}"))
                }),
        }
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the served repositories.
    pub fn repos_dir(&self) -> PathBuf {
        self.root.join("repos")
    }

    /// The node's persistent key.
    pub fn key_file(&self) -> PathBuf {
        self.root.join("identity.key")
    }

    /// The optional configuration file.
    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.yaml")
    }

    /// Creates the directory and the repository root if absent.
    pub fn ensure(&self) -> Result<()> {
        std::fs::create_dir_all(self.repos_dir()).map_err(|e| {
            NodeError::Config(format!("cannot create {}: {e}", self.repos_dir().display()))
        })?;
        Ok(())
    }

    /// Loads the node key, generating it on first use.
    pub fn load_keypair(&self) -> Result<Keypair> {
        Ok(Keypair::load_or_generate(&self.key_file())?)
    }
}
