//! Frame relays shared by the server and the remote helper.
//!
//! A relay copies frames from a scanner to a writer without touching them and
//! stops on a caller-supplied condition. The condition is evaluated on each
//! frame *before* it is written, so state that changes once the peer reacts to
//! the frame cannot leak into the decision.

use crate::{Frame, PktLineScanner, Result};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Summary of a finished relay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Relayed {
    /// Frames written.
    pub frames: usize,
    /// Bytes written, headers included.
    pub bytes: u64,
    /// True if the stop condition matched; false if the input ended first.
    pub stopped: bool,
}

/// Copies frames until `stop` returns true for a frame (which is still
/// written) or the input ends. The writer is flushed after every frame.
pub async fn relay_until<R, W, F>(
    scanner: &mut PktLineScanner<R>,
    writer: &mut W,
    mut stop: F,
) -> Result<Relayed>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    F: FnMut(&Frame) -> bool,
{
    let mut relayed = Relayed::default();

    while let Some(frame) = scanner.read().await? {
        let last = stop(&frame);
        trace!(frame = %frame.text().trim_end(), flush = frame.is_flush(), "relay frame");

        writer.write_all(frame.as_bytes()).await?;
        writer.flush().await?;
        relayed.frames += 1;
        relayed.bytes += frame.as_bytes().len() as u64;

        if last {
            relayed.stopped = true;
            break;
        }
    }

    Ok(relayed)
}

/// Copies every frame until the input ends.
pub async fn relay_all<R, W>(scanner: &mut PktLineScanner<R>, writer: &mut W) -> Result<Relayed>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    relay_until(scanner, writer, |_| false).await
}

/// Copies frames up to and including the `done` line.
pub async fn relay_until_done<R, W>(
    scanner: &mut PktLineScanner<R>,
    writer: &mut W,
) -> Result<Relayed>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    relay_until(scanner, writer, Frame::is_done).await
}

/// Copies frames up to and including the next flush frame.
pub async fn relay_until_flush<R, W>(
    scanner: &mut PktLineScanner<R>,
    writer: &mut W,
) -> Result<Relayed>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    relay_until(scanner, writer, Frame::is_flush).await
}

/// Copies raw bytes until the input ends, flushing after each chunk.
///
/// Used for pack data, which is not pkt-line framed.
pub async fn copy_raw<R, W>(reader: &mut R, writer: &mut W) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let copied = tokio::io::copy(reader, writer).await?;
    writer.flush().await?;
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn wire(frames: &[Frame]) -> Vec<u8> {
        frames.iter().flat_map(|f| f.as_bytes().to_vec()).collect()
    }

    #[tokio::test]
    async fn test_relay_until_done_stops_after_done() {
        let input = wire(&[
            Frame::line("want 1111").unwrap(),
            Frame::flush(),
            Frame::line("have 2222").unwrap(),
            Frame::line("done").unwrap(),
            Frame::line("want 3333").unwrap(),
        ]);
        let mut scanner = PktLineScanner::new(&input[..]);
        let mut out = Vec::new();

        let relayed = relay_until_done(&mut scanner, &mut out).await.unwrap();
        assert!(relayed.stopped);
        assert_eq!(relayed.frames, 4);
        assert_eq!(out, input[..out.len()].to_vec());
        assert!(out.ends_with(b"0009done\n"));
    }

    #[tokio::test]
    async fn test_relay_until_flush_reports_eof() {
        let input = wire(&[Frame::line("a").unwrap(), Frame::line("b").unwrap()]);
        let mut scanner = PktLineScanner::new(&input[..]);
        let mut out = Vec::new();

        let relayed = relay_until_flush(&mut scanner, &mut out).await.unwrap();
        assert!(!relayed.stopped);
        assert_eq!(relayed.frames, 2);
        assert_eq!(relayed.bytes, input.len() as u64);
        assert_eq!(out, input);
    }

    #[tokio::test]
    async fn test_relay_all_copies_verbatim() {
        let input = b"000Ahello\n00000006\x01P0000".to_vec();
        let mut scanner = PktLineScanner::new(&input[..]);
        let mut out = Vec::new();

        relay_all(&mut scanner, &mut out).await.unwrap();
        assert_eq!(out, input);
    }

    #[tokio::test]
    async fn test_relay_propagates_framing_error() {
        let input = b"000ahello\nzzzz".to_vec();
        let mut scanner = PktLineScanner::new(&input[..]);
        let mut out = Vec::new();

        let err = relay_all(&mut scanner, &mut out).await.unwrap_err();
        assert!(err.as_framing().is_some());
        assert_eq!(out, b"000ahello\n");
    }

    #[tokio::test]
    async fn test_stop_condition_sees_frame_before_write() {
        let input = wire(&[Frame::flush(), Frame::flush()]);
        let mut scanner = PktLineScanner::new(&input[..]);
        let mut out = Vec::new();
        let mut seen = 0;

        let relayed = relay_until(&mut scanner, &mut out, |f| {
            seen += 1;
            f.is_flush() && seen == 2
        })
        .await
        .unwrap();
        assert!(relayed.stopped);
        assert_eq!(relayed.frames, 2);
    }

    #[tokio::test]
    async fn test_copy_raw_after_frames() {
        let mut input = wire(&[Frame::line("old new ref").unwrap(), Frame::flush()]);
        input.extend_from_slice(b"PACK\x00\x00\x00\x02binary");
        let mut scanner = PktLineScanner::new(&input[..]);
        let mut out = Vec::new();

        relay_until_flush(&mut scanner, &mut out).await.unwrap();
        let mut rest = scanner.into_inner();
        let copied = copy_raw(&mut rest, &mut out).await.unwrap();
        assert_eq!(copied, 14);
        assert_eq!(out, input);
    }
}
