//! Node configuration.
//!
//! Settings are layered: built-in defaults, then `<app-dir>/config.yaml` if
//! present, then `G2G_*` environment variables named after the keys
//! (`G2G_GIT_BINARY`, `G2G_DISCOVERY_TIMEOUT_SECS`; `,` separates list
//! items). Command-line flags are applied on top by the
//! binaries.

use crate::observability::LogFormat;
use crate::{AppDir, NodeError, Result};
use g2g_p2p::{PeerLocator, DEFAULT_DISCOVERY_TIMEOUT};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "G2G";

/// Configuration shared by the server and the remote helper.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Address the server listens on.
    pub listen_addr: SocketAddr,
    /// Extra addresses the server advertises, e.g. a port-forwarded public one.
    pub external_addrs: Vec<SocketAddr>,
    /// Bootstrap peer locators used for discovery.
    pub bootstrap: Vec<String>,
    /// Time allowed for looking up a peer, in seconds.
    pub discovery_timeout_secs: u64,
    /// The git executable spawned for each session.
    pub git_binary: String,
    /// Log level; each binary has its own default.
    pub log_level: Option<String>,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            external_addrs: Vec::new(),
            bootstrap: Vec::new(),
            discovery_timeout_secs: DEFAULT_DISCOVERY_TIMEOUT.as_secs(),
            git_binary: "git".to_string(),
            log_level: None,
            log_format: LogFormat::Pretty,
        }
    }
}

impl NodeConfig {
    /// Loads the configuration for `app_dir`.
    pub fn load(app_dir: &AppDir) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(app_dir.config_file()).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("bootstrap")
                    .with_list_parse_key("external_addrs")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values the type system cannot.
    pub fn validate(&self) -> Result<()> {
        if self.discovery_timeout_secs == 0 {
            return Err(NodeError::Config(
                "discovery_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.git_binary.trim().is_empty() {
            return Err(NodeError::Config("git_binary must not be empty".into()));
        }
        self.bootstrap_locators()?;
        Ok(())
    }

    /// Parses the bootstrap locators.
    pub fn bootstrap_locators(&self) -> Result<Vec<PeerLocator>> {
        self.bootstrap
            .iter()
            .map(|s| {
                PeerLocator::parse(s)
                    .map_err(|e| NodeError::Config(format!("bootstrap entry {s:?}: {e}")))
            })
            .collect()
    }

    /// Returns the discovery timeout.
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }

    /// Returns the configured log level, or `default`.
    pub fn log_level_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.log_level.as_deref().unwrap_or(default)
    }
}
