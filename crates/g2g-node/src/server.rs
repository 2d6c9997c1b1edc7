//! Dispatches inbound git streams to proxy sessions.

use crate::{NodeError, Result, ServiceProxySession};
use async_trait::async_trait;
use g2g_git::{GitService, ProtocolId};
use g2g_p2p::{Host, PeerStream, StreamHandler};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn, Instrument};

/// Serves every repository under a root directory.
#[derive(Debug, Clone)]
pub struct ServerDispatcher {
    repo_root: PathBuf,
    git_binary: String,
}

impl ServerDispatcher {
    /// Creates a dispatcher serving `repo_root` with `git_binary`.
    pub fn new(repo_root: impl Into<PathBuf>, git_binary: impl Into<String>) -> Self {
        Self {
            repo_root: repo_root.into(),
            git_binary: git_binary.into(),
        }
    }

    /// Returns the repository root.
    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Registers the dispatcher for both git services on `host`.
    pub fn register(self: Arc<Self>, host: &Host) {
        for service in GitService::ALL {
            host.set_stream_handler_match(service.protocol_prefix(), self.clone());
        }
    }

    /// Runs one session for `protocol` over `stream`.
    pub async fn dispatch<S>(&self, protocol: &str, mut stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let id = match ProtocolId::parse(protocol) {
            Ok(id) => id,
            Err(e) => {
                let _ = stream.shutdown().await;
                return Err(e.into());
            }
        };

        let repo_dir = self.repo_root.join(&id.repository);
        if !repo_dir.is_dir() {
            let _ = stream.shutdown().await;
            return Err(NodeError::Process(format!(
                "no repository {} under {}",
                id.repository,
                self.repo_root.display()
            )));
        }

        info!(service = %id.service, repo = %id.repository, "Starting session");
        ServiceProxySession::new(id.service, id.repository, &self.repo_root, &self.git_binary)
            .run(stream)
            .await
    }
}

#[async_trait]
impl StreamHandler for ServerDispatcher {
    async fn handle(&self, stream: PeerStream) {
        let protocol = stream.protocol().to_string();
        let span = tracing::info_span!(
            "session",
            peer = %stream.remote_peer().short_id(),
            protocol = %protocol
        );

        async {
            match self.dispatch(&protocol, stream).await {
                Ok(()) => info!("Session finished"),
                Err(e) => warn!(error = %e, "Session failed"),
            }
        }
        .instrument(span)
        .await;
    }
}
