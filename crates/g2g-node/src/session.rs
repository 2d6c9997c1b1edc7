//! Server-side proxy between a network stream and a git service process.

use crate::{NodeError, Result};
use g2g_git::relay::{copy_raw, relay_all, relay_until_done, relay_until_flush};
use g2g_git::{GitService, PktLineScanner, RepositoryId};
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tracing::{debug, info, warn, Instrument};

/// One git service invocation relayed over one stream.
///
/// The subprocess's stdout is copied to the stream frame by frame until it
/// ends. The stream is copied to the subprocess's stdin with a
/// service-specific end: after the `done` line for upload-pack, and after the
/// command-ending flush plus the raw pack for receive-pack.
#[derive(Debug)]
pub struct ServiceProxySession {
    service: GitService,
    repository: RepositoryId,
    command: Command,
}

impl ServiceProxySession {
    /// Prepares `git <service> <repository>` run from `repo_root`.
    pub fn new(
        service: GitService,
        repository: RepositoryId,
        repo_root: &Path,
        git_binary: &str,
    ) -> Self {
        let mut command = Command::new(git_binary);
        command
            .arg(service.subcommand())
            .arg(repository.as_str())
            .current_dir(repo_root);
        Self::with_command(service, repository, command)
    }

    /// Uses a custom command in place of git.
    pub fn with_command(service: GitService, repository: RepositoryId, command: Command) -> Self {
        Self {
            service,
            repository,
            command,
        }
    }

    /// Runs the session to completion. The stream is shut down on every path.
    pub async fn run<S>(mut self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (remote_read, mut remote_write) = tokio::io::split(stream);

        self.command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = match self.command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let _ = remote_write.shutdown().await;
                return Err(NodeError::Process(format!(
                    "failed to start {}: {e}",
                    self.service
                )));
            }
        };
        debug!(pid = child.id(), "Spawned git {}", self.service.subcommand());

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.start_kill();
            let _ = remote_write.shutdown().await;
            return Err(NodeError::Process("subprocess pipes unavailable".into()));
        };

        let request = tokio::spawn(relay_request(self.service, remote_read, stdin).in_current_span());

        let mut scanner = PktLineScanner::new(stdout);
        let response = relay_all(&mut scanner, &mut remote_write).await;
        if let Err(e) = &response {
            // Nobody will drain the pipe any more.
            warn!(error = %e, "Relaying git output failed; stopping git");
            let _ = child.start_kill();
        }

        let status = child.wait().await;
        request.abort();
        let _ = remote_write.shutdown().await;

        let relayed = response.map_err(|e| NodeError::Stream(format!("relaying git output: {e}")))?;
        let status = status.map_err(|e| NodeError::Process(format!("waiting for git: {e}")))?;
        if !status.success() {
            return Err(NodeError::Process(format!(
                "git {} {} exited with {status}",
                self.service.subcommand(),
                self.repository
            )));
        }

        info!(frames = relayed.frames, bytes = relayed.bytes, "git exited cleanly");
        Ok(())
    }
}

/// Copies the remote's request into git's stdin, then closes stdin.
async fn relay_request<R>(service: GitService, remote: R, mut stdin: ChildStdin)
where
    R: AsyncRead + Unpin,
{
    let mut scanner = PktLineScanner::new(remote);

    let result = match service {
        GitService::UploadPack => relay_until_done(&mut scanner, &mut stdin).await.map(|r| r.bytes),
        GitService::ReceivePack => match relay_until_flush(&mut scanner, &mut stdin).await {
            Ok(commands) if commands.stopped => {
                let mut remote = scanner.into_inner();
                copy_raw(&mut remote, &mut stdin)
                    .await
                    .map(|pack| commands.bytes + pack)
            }
            other => other.map(|r| r.bytes),
        },
    };

    match result {
        Ok(bytes) => debug!(bytes, "Request relayed"),
        // git stops reading once it has what it needs; a broken pipe here is routine.
        Err(e) => debug!(error = %e, "Request relay ended early"),
    }
    drop(stdin);
}
