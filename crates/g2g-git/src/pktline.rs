//! Git pkt-line format implementation.
//!
//! The pkt-line format is used for all git protocol communication.
//! Each line is prefixed with a 4-character hex length, or "0000" for flush.
//!
//! Frames keep their raw bytes (header included) so that a relay can write
//! back exactly what it read.

use crate::{FramingError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::borrow::Cow;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the hexadecimal length header.
pub const HEADER_LEN: usize = 4;

/// Largest pkt-line git will send, header included.
pub const MAX_PKT_LEN: usize = 65520;

/// Largest payload a data frame may carry.
pub const MAX_PAYLOAD_LEN: usize = MAX_PKT_LEN - HEADER_LEN;

const FLUSH: &[u8; HEADER_LEN] = b"0000";

/// A single pkt-line frame, stored as it appeared on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    raw: Bytes,
}

impl Frame {
    /// Creates a data frame carrying `payload`.
    pub fn data(payload: impl AsRef<[u8]>) -> std::result::Result<Self, FramingError> {
        let payload = payload.as_ref();
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(FramingError::PayloadTooLarge(payload.len()));
        }

        let mut raw = BytesMut::with_capacity(HEADER_LEN + payload.len());
        raw.put_slice(format!("{:04x}", payload.len() + HEADER_LEN).as_bytes());
        raw.put_slice(payload);
        Ok(Self { raw: raw.freeze() })
    }

    /// Creates a data frame from a text line, appending the newline if missing.
    pub fn line(s: &str) -> std::result::Result<Self, FramingError> {
        if s.ends_with('\n') {
            Self::data(s)
        } else {
            Self::data(format!("{s}\n"))
        }
    }

    /// Creates a flush frame (0000).
    pub fn flush() -> Self {
        Self {
            raw: Bytes::from_static(FLUSH),
        }
    }

    /// Returns true if this is a flush frame.
    pub fn is_flush(&self) -> bool {
        self.raw.as_ref() == FLUSH
    }

    /// Returns the frame exactly as it appears on the wire.
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Consumes the frame and returns its wire bytes.
    pub fn into_bytes(self) -> Bytes {
        self.raw
    }

    /// Returns the payload without the length header.
    pub fn payload(&self) -> &[u8] {
        &self.raw[HEADER_LEN..]
    }

    /// Returns the payload as text, replacing invalid UTF-8.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.payload())
    }

    /// Returns the payload as a string, trimming any trailing newline.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(self.payload())
            .ok()
            .map(|s| s.trim_end_matches('\n'))
    }

    /// Returns true if this is the `done` line that ends fetch negotiation.
    pub fn is_done(&self) -> bool {
        !self.is_flush() && self.as_str() == Some("done")
    }
}

/// Decodes a length header, returning the total frame length (0 for flush).
pub fn decode_header(header: &[u8; HEADER_LEN]) -> std::result::Result<usize, FramingError> {
    if !header.iter().all(u8::is_ascii_hexdigit) {
        return Err(FramingError::InvalidHeader(
            String::from_utf8_lossy(header).into_owned(),
        ));
    }

    let mut len = 0usize;
    for digit in header {
        // Validated above.
        let value = char::from(*digit).to_digit(16).unwrap_or_default();
        len = len * 16 + value as usize;
    }

    match len {
        0 => Ok(0),
        1..=3 => Err(FramingError::InvalidLength(len)),
        _ if len > MAX_PKT_LEN => Err(FramingError::InvalidLength(len)),
        _ => Ok(len),
    }
}

/// Reads pkt-line frames from a byte source.
///
/// The scanner has no read-ahead buffer: after a frame is returned the source
/// is positioned right after it, so [`PktLineScanner::into_inner`] can hand the
/// rest of the stream to a raw copy. Once a read fails the scanner is halted
/// and yields no further frames.
#[derive(Debug)]
pub struct PktLineScanner<R> {
    reader: R,
    halted: bool,
}

impl<R: AsyncRead + Unpin> PktLineScanner<R> {
    /// Creates a new pkt-line scanner.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            halted: false,
        }
    }

    /// Reads the next frame, or `None` at the end of input.
    pub async fn read(&mut self) -> Result<Option<Frame>> {
        if self.halted {
            return Ok(None);
        }

        match self.read_frame().await {
            Ok(Some(frame)) => Ok(Some(frame)),
            Ok(None) => {
                self.halted = true;
                Ok(None)
            }
            Err(e) => {
                self.halted = true;
                Err(e)
            }
        }
    }

    /// Reads data frames until a flush frame or the end of input.
    pub async fn read_until_flush(&mut self) -> Result<Vec<Frame>> {
        let mut frames = Vec::new();
        while let Some(frame) = self.read().await? {
            if frame.is_flush() {
                break;
            }
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Returns true once the scanner has hit the end of input or an error.
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Returns a mutable reference to the inner reader.
    pub fn inner_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    /// Consumes the scanner and returns the inner reader.
    pub fn into_inner(self) -> R {
        self.reader
    }

    async fn read_frame(&mut self) -> Result<Option<Frame>> {
        let mut header = [0u8; HEADER_LEN];
        let filled = self.fill(&mut header).await?;
        match filled {
            0 => return Ok(None),
            HEADER_LEN => {}
            n => return Err(FramingError::TruncatedHeader(n).into()),
        }

        let len = decode_header(&header)?;
        if len == 0 {
            return Ok(Some(Frame::flush()));
        }

        let mut raw = BytesMut::zeroed(len);
        raw[..HEADER_LEN].copy_from_slice(&header);
        let filled = self.fill(&mut raw[HEADER_LEN..]).await?;
        if filled < len - HEADER_LEN {
            return Err(FramingError::TruncatedPayload {
                expected: len - HEADER_LEN,
                actual: filled,
            }
            .into());
        }

        Ok(Some(Frame { raw: raw.freeze() }))
    }

    /// Reads until `buf` is full or the input ends, returning the bytes read.
    async fn fill(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }
}

/// Writer for pkt-line format.
#[derive(Debug)]
pub struct PktLineWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> PktLineWriter<W> {
    /// Creates a new pkt-line writer.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes a frame.
    pub async fn write(&mut self, frame: &Frame) -> Result<()> {
        self.writer.write_all(frame.as_bytes()).await?;
        Ok(())
    }

    /// Writes a data line.
    pub async fn write_data(&mut self, data: &[u8]) -> Result<()> {
        self.write(&Frame::data(data)?).await
    }

    /// Writes a string line (with newline).
    pub async fn write_line(&mut self, s: &str) -> Result<()> {
        self.write(&Frame::line(s)?).await
    }

    /// Writes a flush frame.
    pub async fn flush_pkt(&mut self) -> Result<()> {
        self.write(&Frame::flush()).await
    }

    /// Flushes the underlying writer.
    pub async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await?;
        Ok(())
    }

    /// Returns a mutable reference to the inner writer.
    pub fn inner_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Returns the inner writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}
