//! Length-prefixed frame codec for the simulation link.
//!
//! Every message on the wire, in either direction, is
//!
//! ```text
//! [len:u32-BE][payload: len bytes]
//! ```
//!
//! The payload is opaque here. The simulation happens to send UTF-8 JSON and
//! accept plain-text commands, but decoding those is the consumer's job; this
//! crate only guarantees "here is a complete, correctly framed payload".
//!
//! Readers accumulate partial reads. A stream that ends before a frame is
//! complete yields [`FrameError::ShortRead`] rather than a truncated payload,
//! and a stream that ends cleanly between frames yields
//! [`FrameError::PeerClosed`].

use std::io::{ErrorKind, Read};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the length prefix in bytes.
pub const HEADER_LEN: usize = 4;

/// Payload bytes requested from the transport per read call.
const READ_CHUNK: usize = 8 * 1024;

/// Error returned by the encode and decode functions.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload length does not fit in the 32-bit prefix.
    #[error("payload of {0} bytes does not fit a 32-bit length prefix")]
    TooLarge(usize),
    /// The stream ended part-way through a header or payload.
    #[error("short read: expected {expected} bytes, received {received}")]
    ShortRead { expected: usize, received: usize },
    /// The stream ended cleanly on a frame boundary.
    #[error("peer closed the connection")]
    PeerClosed,
    /// The header announced more bytes than the reader accepts.
    #[error("frame length {len} exceeds limit of {max} bytes")]
    LengthLimit { len: u32, max: u32 },
    /// Any other transport failure.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

/// Prepend the big-endian length header to `payload`.
///
/// # Errors
///
/// Returns [`FrameError::TooLarge`] when `payload` is longer than `u32::MAX`.
pub fn encode(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let len = u32::try_from(payload.len()).map_err(|_| FrameError::TooLarge(payload.len()))?;

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&encode_header(len));
    out.extend_from_slice(payload);
    Ok(out)
}

/// Length header bytes for a payload of `len` bytes.
#[must_use]
pub fn encode_header(len: u32) -> [u8; HEADER_LEN] {
    len.to_be_bytes()
}

/// Interpret a header as a big-endian payload length.
#[must_use]
pub fn decode_header(header: [u8; HEADER_LEN]) -> u32 {
    u32::from_be_bytes(header)
}

/// Read exactly `length` payload bytes from a blocking reader.
///
/// # Errors
///
/// Returns [`FrameError::ShortRead`] if the reader hits end-of-stream first,
/// or [`FrameError::Io`] for any other read failure.
pub fn decode_payload<R: Read>(length: u32, mut reader: R) -> Result<Vec<u8>, FrameError> {
    let len = length as usize;
    let mut payload = Vec::with_capacity(len.min(READ_CHUNK));
    let mut chunk = [0u8; READ_CHUNK];

    while payload.len() < len {
        let want = (len - payload.len()).min(READ_CHUNK);
        let n = match reader.read(&mut chunk[..want]) {
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        if n == 0 {
            return Err(FrameError::ShortRead { expected: len, received: payload.len() });
        }
        payload.extend_from_slice(&chunk[..n]);
    }

    Ok(payload)
}

/// Read the 4-byte length header from an async reader.
///
/// # Errors
///
/// [`FrameError::PeerClosed`] if the stream ends before the first header
/// byte, [`FrameError::ShortRead`] if it ends after some but not all of them.
pub async fn read_header<R>(reader: &mut R) -> Result<u32, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;

    while filled < HEADER_LEN {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            return Err(if filled == 0 {
                FrameError::PeerClosed
            } else {
                FrameError::ShortRead { expected: HEADER_LEN, received: filled }
            });
        }
        filled += n;
    }

    Ok(decode_header(header))
}

/// Read exactly `length` payload bytes from an async reader.
///
/// # Errors
///
/// Returns [`FrameError::ShortRead`] if the stream ends first.
pub async fn read_payload<R>(reader: &mut R, length: u32) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let len = length as usize;
    let mut payload = Vec::with_capacity(len.min(READ_CHUNK));
    let mut chunk = [0u8; READ_CHUNK];

    while payload.len() < len {
        let want = (len - payload.len()).min(READ_CHUNK);
        let n = reader.read(&mut chunk[..want]).await?;
        if n == 0 {
            return Err(FrameError::ShortRead { expected: len, received: payload.len() });
        }
        payload.extend_from_slice(&chunk[..n]);
    }

    Ok(payload)
}

/// Read one whole frame and return its payload.
///
/// When `max_len` is set, a header announcing a larger payload is rejected
/// before anything is allocated for it.
///
/// # Errors
///
/// Any error from [`read_header`] or [`read_payload`], plus
/// [`FrameError::LengthLimit`].
pub async fn read_frame<R>(reader: &mut R, max_len: Option<u32>) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let len = read_header(reader).await?;
    if let Some(max) = max_len {
        if len > max {
            return Err(FrameError::LengthLimit { len, max });
        }
    }
    read_payload(reader, len).await
}

/// Frame `payload` and write it in full.
///
/// `write_all` retries partial writes until the whole frame is out.
///
/// # Errors
///
/// [`FrameError::TooLarge`] for oversized payloads, [`FrameError::Io`] if the
/// transport fails part-way.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode(payload)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
