//! git-remote-g2g - git remote helper for `g2g://` URLs.
//!
//! git runs `git-remote-g2g <remote-name> <url>` and talks to it over
//! stdin/stdout. Diagnostics go to stderr.

use clap::Parser;
use g2g_node::observability::init_logging;
use g2g_node::{AppDir, HelperOutcome, NodeConfig, RemoteHelperSession, RepositoryAddress};
use g2g_p2p::{BootstrapDiscovery, Discovery, Host, Keypair};
use std::sync::Arc;
use tokio::io::BufReader;

/// Git remote helper for g2g:// URLs
#[derive(Parser, Debug)]
#[command(name = "git-remote-g2g")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Name of the remote, or the URL itself for anonymous remotes
    remote: String,

    /// The g2g:// URL
    url: Option<String>,
}

async fn run(args: Args) -> g2g_node::Result<HelperOutcome> {
    let url = args.url.as_deref().unwrap_or(&args.remote);
    let address = RepositoryAddress::parse(url)?;

    let app_dir = AppDir::locate()?;
    let config = NodeConfig::load(&app_dir)?;
    init_logging(config.log_level_or("warn"), config.log_format);
    tracing::debug!(remote = %args.remote, address = %address, "Starting git-remote-g2g");

    // Every invocation gets a fresh identity; only the server needs a stable one.
    let host = Arc::new(Host::new(Keypair::generate())?);
    let discovery = BootstrapDiscovery::new(Arc::clone(&host), config.bootstrap_locators()?)
        .with_timeout(config.discovery_timeout());
    let peer = address
        .resolve(
            host.peer_store(),
            Some(&discovery as &dyn Discovery),
            config.discovery_timeout(),
        )
        .await?;

    let session = RemoteHelperSession::new(host, peer, address.repository.clone());
    let mut stdout = tokio::io::stdout();
    session.run(BufReader::new(tokio::io::stdin()), &mut stdout).await
}

#[tokio::main]
async fn main() {
    match run(Args::parse()).await {
        // git spawns a fresh helper per operation; nothing is left to do.
        Ok(HelperOutcome::Connected(_)) => std::process::exit(0),
        Ok(HelperOutcome::InputClosed) => {}
        Err(e) => {
            tracing::error!(error = %e, "git-remote-g2g failed");
            eprintln!("git-remote-g2g: {e}");
            std::process::exit(1);
        }
    }
}
