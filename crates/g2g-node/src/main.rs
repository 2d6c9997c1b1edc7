//! git-g2g - serve git repositories over the g2g network.
//!
//! Every bare repository under `<app-dir>/repos` is reachable as
//! `g2g://<locator>/<name>.git` at the locators printed on startup.

use anyhow::Context;
use clap::Parser;
use g2g_node::observability::{init_logging, LogFormat};
use g2g_node::{AppDir, NodeConfig, ServerDispatcher};
use g2g_p2p::discovery::register_discovery_handlers;
use g2g_p2p::{tcp_multiaddr, BootstrapDiscovery, Host};
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Serve git repositories over the g2g peer-to-peer network
#[derive(Parser, Debug)]
#[command(name = "git-g2g")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Application directory (defaults to $G2G_HOME or ~/.g2g)
    #[arg(long)]
    home: Option<PathBuf>,

    /// Listen address
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Extra address to advertise (repeatable)
    #[arg(long = "external-addr")]
    external_addrs: Vec<SocketAddr>,

    /// Bootstrap peer locator to announce to (repeatable)
    #[arg(long)]
    bootstrap: Vec<String>,

    /// Executable used to run git services
    #[arg(long)]
    git_binary: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
}

impl Args {
    fn apply(self, config: &mut NodeConfig) {
        if let Some(listen) = self.listen {
            config.listen_addr = listen;
        }
        config.external_addrs.extend(self.external_addrs);
        config.bootstrap.extend(self.bootstrap);
        if let Some(git_binary) = self.git_binary {
            config.git_binary = git_binary;
        }
        if let Some(level) = self.log_level {
            config.log_level = Some(level);
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = Args::parse();

    let app_dir = match args.home.take() {
        Some(home) => AppDir::new(home),
        None => AppDir::locate()?,
    };
    app_dir.ensure()?;

    let mut config = NodeConfig::load(&app_dir)
        .with_context(|| format!("loading configuration from {}", app_dir.root().display()))?;
    args.apply(&mut config);
    config.validate()?;

    init_logging(config.log_level_or("info"), config.log_format);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting git-g2g");

    let keypair = app_dir.load_keypair().context("loading node identity")?;
    let host = Arc::new(Host::new(keypair).context("starting p2p host")?);
    for addr in &config.external_addrs {
        host.add_external_addr(tcp_multiaddr(*addr));
    }

    register_discovery_handlers(&host);
    Arc::new(ServerDispatcher::new(app_dir.repos_dir(), config.git_binary.clone())).register(&host);

    host.listen(config.listen_addr)
        .await
        .with_context(|| format!("listening on {}", config.listen_addr))?;

    tracing::info!(
        peer_id = %host.peer_id(),
        repos = %app_dir.repos_dir().display(),
        "Node configuration"
    );
    {
        let mut stdout = std::io::stdout().lock();
        for locator in host.locators() {
            writeln!(stdout, "Serving on g2g://{locator}")?;
        }
        stdout.flush()?;
    }

    let bootstrap = config.bootstrap_locators()?;
    if !bootstrap.is_empty() {
        let discovery =
            BootstrapDiscovery::new(Arc::clone(&host), bootstrap).with_timeout(config.discovery_timeout());
        tokio::spawn(async move {
            let accepted = discovery.announce().await;
            tracing::info!(accepted, total = discovery.bootstrap().len(), "Announced to bootstrap peers");
        });
    }

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            tracing::info!("Shutting down");
            shutdown.cancel();
        }
    });

    host.serve(shutdown).await?;
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
