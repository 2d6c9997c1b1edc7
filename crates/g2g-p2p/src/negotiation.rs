//! Protocol negotiation on a fresh stream.
//!
//! Connections are already authenticated and encrypted by the transport, so
//! setup is a single exchange of pkt-lines:
//!
//! ```text
//! dialer:    <protocol id>
//! listener:  ok | na
//! ```
//!
//! Each step is read through a fresh scanner; the scanner never reads past
//! the frame it returns, so nothing is lost once the stream is handed on.

use crate::{P2pError, Result};
use g2g_git::{PktLineScanner, PktLineWriter};
use tokio::io::{AsyncRead, AsyncWrite};

const ACCEPT: &str = "ok";
const REJECT: &str = "na";

/// Asks the listener to open `protocol`.
pub(crate) async fn propose<S>(stream: &mut S, protocol: &str) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    send(stream, protocol).await?;
    match receive(stream).await?.as_str() {
        ACCEPT => Ok(()),
        REJECT => Err(P2pError::ProtocolNotSupported(protocol.to_string())),
        other => Err(P2pError::Negotiation(format!(
            "unexpected negotiation reply: {other:?}"
        ))),
    }
}

/// Reads the protocol the dialer asks for.
pub(crate) async fn read_proposal<S>(stream: &mut S) -> Result<String>
where
    S: AsyncRead + Unpin,
{
    receive(stream).await
}

/// Answers a proposal.
pub(crate) async fn answer<S>(stream: &mut S, accepted: bool) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    send(stream, if accepted { ACCEPT } else { REJECT }).await
}

async fn send<S>(stream: &mut S, line: &str) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let mut writer = PktLineWriter::new(stream);
    writer.write_line(line).await?;
    writer.flush().await?;
    Ok(())
}

async fn receive<S>(stream: &mut S) -> Result<String>
where
    S: AsyncRead + Unpin,
{
    let frame = PktLineScanner::new(stream)
        .read()
        .await?
        .ok_or_else(|| P2pError::Negotiation("connection closed during setup".into()))?;
    if frame.is_flush() {
        return Err(P2pError::Negotiation("unexpected flush during setup".into()));
    }
    frame
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| P2pError::Negotiation("setup message is not utf-8".into()))
}
