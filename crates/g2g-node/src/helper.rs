//! Client side of the bridge: a git remote helper speaking the `connect`
//! transport-helper protocol.
//!
//! git drives the helper over stdin/stdout:
//!
//! ```text
//! git:    capabilities
//! helper: connect
//! helper: <blank line>
//! git:    connect git-upload-pack
//! helper: <blank line>
//! ...     pkt-line session relayed to the remote peer
//! ```

use crate::{NodeError, Result};
use g2g_git::relay::{copy_raw, relay_until, relay_until_flush, Relayed};
use g2g_git::{GitService, PktLineScanner, ProtocolId, RepositoryId};
use g2g_p2p::{PeerId, StreamOpener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

/// How a helper session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperOutcome {
    /// git closed the command stream without connecting.
    InputClosed,
    /// A service was connected and relayed to completion.
    Connected(GitService),
}

/// The remote helper state machine for one repository on one peer.
#[derive(Debug)]
pub struct RemoteHelperSession<O> {
    opener: O,
    peer: PeerId,
    repository: RepositoryId,
}

impl<O: StreamOpener> RemoteHelperSession<O> {
    /// Creates a session that opens streams through `opener`.
    pub fn new(opener: O, peer: PeerId, repository: RepositoryId) -> Self {
        Self {
            opener,
            peer,
            repository,
        }
    }

    /// Reads commands from `input` until git disconnects or a service is
    /// connected and relayed.
    ///
    /// `input` is handed to the relay after `connect`, with anything it has
    /// already buffered.
    pub async fn run<I, W>(&self, mut input: I, output: &mut W) -> Result<HelperOutcome>
    where
        I: AsyncBufRead + Send + Unpin + 'static,
        W: AsyncWrite + Unpin,
    {
        let mut line = String::new();
        loop {
            line.clear();
            if input.read_line(&mut line).await? == 0 {
                return Ok(HelperOutcome::InputClosed);
            }

            let command = line.trim_end_matches(['\n', '\r']);
            debug!(command, "Helper command");

            match command.split_once(' ') {
                None if command == "capabilities" => {
                    output.write_all(b"connect\n\n").await?;
                    output.flush().await?;
                }
                // A blank line is git's end-of-commands marker.
                None if command.is_empty() => return Ok(HelperOutcome::InputClosed),
                Some(("connect", name)) => {
                    let service = GitService::from_command_name(name).ok_or_else(|| {
                        NodeError::ProtocolViolation(format!("unsupported service {name:?}"))
                    })?;
                    self.connect(service, input, output).await?;
                    return Ok(HelperOutcome::Connected(service));
                }
                _ => {
                    return Err(NodeError::ProtocolViolation(format!(
                        "unknown command {command:?}"
                    )))
                }
            }
        }
    }

    async fn connect<I, W>(&self, service: GitService, input: I, output: &mut W) -> Result<()>
    where
        I: AsyncBufRead + Send + Unpin + 'static,
        W: AsyncWrite + Unpin,
    {
        let protocol = ProtocolId::new(service, self.repository.clone()).to_string();
        let stream = self.opener.open_stream(&self.peer, &protocol).await?;
        info!(peer = %self.peer.short_id(), protocol = %protocol, "Connected");

        output.write_all(b"\n").await?;
        output.flush().await?;

        match service {
            GitService::UploadPack => relay_upload_pack(input, stream, output).await,
            GitService::ReceivePack => relay_receive_pack(input, stream, output).await,
        }
    }
}

/// Fetch: requests go out until `done`; the response ends at the first flush
/// past the advertisement that arrives after `done` went out.
async fn relay_upload_pack<I, S, W>(input: I, stream: S, output: &mut W) -> Result<()>
where
    I: AsyncRead + Send + Unpin + 'static,
    S: AsyncRead + AsyncWrite + Send + 'static,
    W: AsyncWrite + Unpin,
{
    let (remote_read, mut remote_write) = tokio::io::split(stream);
    let done_sent = Arc::new(AtomicBool::new(false));

    let request = tokio::spawn({
        let done_sent = Arc::clone(&done_sent);
        async move {
            let mut scanner = PktLineScanner::new(input);
            let relayed = relay_until(&mut scanner, &mut remote_write, |frame| {
                let done = frame.is_done();
                if done {
                    done_sent.store(true, Ordering::SeqCst);
                }
                done
            })
            .await?;
            if !relayed.stopped {
                remote_write.shutdown().await?;
            }
            Ok::<_, NodeError>(relayed)
        }
    });

    let mut flushes = 0;
    let mut scanner = PktLineScanner::new(remote_read);
    let response = relay_until(&mut scanner, output, |frame| {
        if !frame.is_flush() {
            return false;
        }
        flushes += 1;
        flushes > 1 && done_sent.load(Ordering::SeqCst)
    })
    .await;

    finish(request, response).await
}

/// Push: commands go out up to their flush, then the pack as raw bytes; the
/// response ends at the flush after the advertisement's flush, which closes
/// the status report.
async fn relay_receive_pack<I, S, W>(input: I, stream: S, output: &mut W) -> Result<()>
where
    I: AsyncRead + Send + Unpin + 'static,
    S: AsyncRead + AsyncWrite + Send + 'static,
    W: AsyncWrite + Unpin,
{
    let (remote_read, mut remote_write) = tokio::io::split(stream);

    let request = tokio::spawn(async move {
        let mut scanner = PktLineScanner::new(input);
        let mut relayed = relay_until_flush(&mut scanner, &mut remote_write).await?;
        if relayed.stopped {
            let mut input = scanner.into_inner();
            relayed.bytes += copy_raw(&mut input, &mut remote_write).await?;
        }
        remote_write.shutdown().await?;
        Ok::<_, NodeError>(relayed)
    });

    let mut flushes = 0;
    let mut scanner = PktLineScanner::new(remote_read);
    let response = relay_until(&mut scanner, output, |frame| {
        if !frame.is_flush() {
            return false;
        }
        flushes += 1;
        flushes == 2
    })
    .await;

    finish(request, response).await
}

async fn finish(
    request: tokio::task::JoinHandle<Result<Relayed>>,
    response: g2g_git::Result<Relayed>,
) -> Result<()> {
    let response = match response {
        Ok(response) => response,
        Err(e) => {
            request.abort();
            return Err(e.into());
        }
    };
    debug!(frames = response.frames, bytes = response.bytes, "Response relayed");

    if request.is_finished() {
        match request.await {
            Ok(Ok(relayed)) => debug!(bytes = relayed.bytes, "Request relayed"),
            Ok(Err(e)) => debug!(error = %e, "Request relay ended early"),
            Err(e) => debug!(error = %e, "Request relay task failed"),
        }
    } else {
        // The response is complete; git has nothing left to say to the peer.
        request.abort();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use g2g_git::Frame;
    use g2g_p2p::{Keypair, P2pError};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;
    use tokio::io::{duplex, AsyncReadExt, BufReader, DuplexStream};

    /// Hands out one end of a pipe and records what was asked for.
    struct PipeOpener {
        stream: Mutex<Option<DuplexStream>>,
        opened: Mutex<Vec<(PeerId, String)>>,
    }

    impl PipeOpener {
        fn new(stream: DuplexStream) -> Self {
            Self {
                stream: Mutex::new(Some(stream)),
                opened: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl StreamOpener for PipeOpener {
        type Stream = DuplexStream;

        async fn open_stream(&self, peer: &PeerId, protocol: &str) -> g2g_p2p::Result<DuplexStream> {
            self.opened.lock().push((*peer, protocol.to_string()));
            self.stream
                .lock()
                .take()
                .ok_or_else(|| P2pError::Connection("already opened".into()))
        }
    }

    fn session(opener: PipeOpener) -> RemoteHelperSession<PipeOpener> {
        RemoteHelperSession::new(
            opener,
            Keypair::generate().peer_id(),
            RepositoryId::parse("r.git").unwrap(),
        )
    }

    fn input(bytes: &[u8]) -> BufReader<Cursor<Vec<u8>>> {
        BufReader::new(Cursor::new(bytes.to_vec()))
    }

    fn wire(frames: &[Frame]) -> Vec<u8> {
        frames.iter().flat_map(|f| f.as_bytes().to_vec()).collect()
    }

    async fn read_frames_until<F: Fn(&Frame) -> bool>(
        scanner: &mut PktLineScanner<&mut DuplexStream>,
        stop: F,
    ) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = scanner.read().await.unwrap() {
            let last = stop(&frame);
            frames.push(frame);
            if last {
                break;
            }
        }
        frames
    }

    #[tokio::test]
    async fn test_capabilities_then_eof() {
        let (_remote, local) = duplex(1024);
        let helper = session(PipeOpener::new(local));
        let mut out = Vec::new();

        let outcome = helper.run(input(b"capabilities\n"), &mut out).await.unwrap();
        assert_eq!(outcome, HelperOutcome::InputClosed);
        assert_eq!(out, b"connect\n\n");
        assert!(helper.opener.opened.lock().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_command_is_a_violation() {
        let (_remote, local) = duplex(1024);
        let helper = session(PipeOpener::new(local));
        let mut out = Vec::new();

        let err = helper.run(input(b"list\n"), &mut out).await.unwrap_err();
        assert!(matches!(err, NodeError::ProtocolViolation(_)));

        let err = helper
            .run(input(b"connect git-archive\n"), &mut out)
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::ProtocolViolation(_)));
    }

    #[tokio::test]
    async fn test_open_failure_is_a_stream_error() {
        let (_remote, local) = duplex(1024);
        let opener = PipeOpener::new(local);
        opener.stream.lock().take();
        let helper = session(opener);
        let mut out = Vec::new();

        let err = helper
            .run(input(b"connect git-upload-pack\n"), &mut out)
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Stream(_)));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_upload_pack_session() {
        let (mut remote, local) = duplex(64 * 1024);
        let helper = session(PipeOpener::new(local));

        let advertisement = wire(&[
            Frame::line("1111111111111111111111111111111111111111 HEAD\0side-band-64k").unwrap(),
            Frame::flush(),
        ]);
        let request = wire(&[
            Frame::line("want 1111111111111111111111111111111111111111").unwrap(),
            Frame::flush(),
            Frame::line("done").unwrap(),
        ]);
        let response = wire(&[
            Frame::line("NAK").unwrap(),
            Frame::data(b"\x01PACK...").unwrap(),
            Frame::flush(),
        ]);

        let peer = tokio::spawn({
            let advertisement = advertisement.clone();
            let response = response.clone();
            async move {
                remote.write_all(&advertisement).await.unwrap();
                let received = read_frames_until(&mut PktLineScanner::new(&mut remote), Frame::is_done).await;
                remote.write_all(&response).await.unwrap();
                let _ = remote.write_all(b"0009extra").await;
                // Whatever else arrives before the helper hangs up.
                let mut rest = Vec::new();
                let _ = remote.read_to_end(&mut rest).await;
                (received, rest)
            }
        });

        let mut commands = b"capabilities\nconnect git-upload-pack\n".to_vec();
        commands.extend_from_slice(&request);
        // git never writes past `done`; anything that follows stays local.
        commands.extend_from_slice(&wire(&[
            Frame::line("want 2222222222222222222222222222222222222222").unwrap(),
            Frame::flush(),
        ]));
        let mut out = Vec::new();
        let outcome = helper.run(input(&commands), &mut out).await.unwrap();
        assert_eq!(outcome, HelperOutcome::Connected(GitService::UploadPack));

        let (received, rest) = peer.await.unwrap();
        assert_eq!(wire(&received), request);
        assert!(rest.is_empty(), "forwarded past done: {rest:?}");

        let mut expected = b"connect\n\n\n".to_vec();
        expected.extend_from_slice(&advertisement);
        expected.extend_from_slice(&response);
        assert_eq!(out, expected);

        let opened = helper.opener.opened.lock().clone();
        assert_eq!(opened.len(), 1);
        assert_eq!(opened[0].1, "/g2g/upload-pack/1.0.0/r.git");
    }

    #[tokio::test]
    async fn test_upload_pack_up_to_date() {
        let (mut remote, local) = duplex(64 * 1024);
        let helper = session(PipeOpener::new(local));
        let advertisement = wire(&[Frame::line("1111111111111111111111111111111111111111 HEAD").unwrap(), Frame::flush()]);

        let peer = tokio::spawn({
            let advertisement = advertisement.clone();
            async move {
                remote.write_all(&advertisement).await.unwrap();
                // git sends a lone flush when it wants nothing, then the peer hangs up.
                let mut rest = Vec::new();
                remote.read_to_end(&mut rest).await.unwrap();
                rest
            }
        });

        let mut out = Vec::new();
        let mut commands = b"connect git-upload-pack\n".to_vec();
        commands.extend_from_slice(b"0000");
        helper.run(input(&commands), &mut out).await.unwrap();

        assert_eq!(peer.await.unwrap(), b"0000");
        let mut expected = b"\n".to_vec();
        expected.extend_from_slice(&advertisement);
        assert_eq!(out, expected);
    }

    #[tokio::test]
    async fn test_receive_pack_session() {
        let (mut remote, local) = duplex(1024);
        let helper = session(PipeOpener::new(local));

        let advertisement = wire(&[
            Frame::line("0000000000000000000000000000000000000000 capabilities^{}\0report-status").unwrap(),
            Frame::flush(),
        ]);
        let commands = wire(&[
            Frame::line("0000000000000000000000000000000000000000 1111111111111111111111111111111111111111 refs/heads/main").unwrap(),
            Frame::flush(),
        ]);
        let pack: Vec<u8> = (0..5000u32).map(|i| (i * 7 % 256) as u8).collect();
        let report = wire(&[
            Frame::line("unpack ok").unwrap(),
            Frame::line("ok refs/heads/main").unwrap(),
            Frame::flush(),
        ]);

        let peer = tokio::spawn({
            let advertisement = advertisement.clone();
            let report = report.clone();
            async move {
                remote.write_all(&advertisement).await.unwrap();
                let mut received = Vec::new();
                remote.read_to_end(&mut received).await.unwrap();
                remote.write_all(&report).await.unwrap();
                remote.write_all(b"0009extra").await.unwrap();
                (received, remote)
            }
        });

        let mut stdin = b"capabilities\nconnect git-receive-pack\n".to_vec();
        stdin.extend_from_slice(&commands);
        stdin.extend_from_slice(&pack);
        let mut out = Vec::new();
        let outcome = helper.run(input(&stdin), &mut out).await.unwrap();
        assert_eq!(outcome, HelperOutcome::Connected(GitService::ReceivePack));

        let (received, _remote) = peer.await.unwrap();
        let mut sent = commands.clone();
        sent.extend_from_slice(&pack);
        assert_eq!(received, sent);

        let mut expected = b"connect\n\n\n".to_vec();
        expected.extend_from_slice(&advertisement);
        expected.extend_from_slice(&report);
        assert_eq!(out, expected);
    }
}
