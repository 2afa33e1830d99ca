//! Frame Transport: owns the TCP socket, turns its raw byte
//! stream into a sequence of top-level JSON-RPC envelopes with no framing
//! bytes on the wire.
//!
//! The read side uses the same trial-parse strategy as the
//! `mgeisler-tokio-jsonrpc` codec: keep appending bytes to a growing buffer
//! and attempt to deserialize one [`Envelope`] from its head. `serde_json`
//! tells us, via [`serde_json::Error::is_eof`], whether a failed parse is
//! because the buffer is merely incomplete (keep reading) or genuinely
//! malformed, in which case we fail the connection rather than silently
//! skipping bytes, so a non-EOF parse error here is terminal.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{trace, warn};

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::message::Envelope;

/// Default size of the read-ahead chunk pulled from the socket per `read`
/// syscall; the growing buffer itself has no upper bound.
const READ_CHUNK: usize = 8 * 1024;

/// Owns the read half of the connection and the partially-filled buffer of
/// bytes that haven't yet formed a complete [`Envelope`].
pub struct FrameReader {
    socket: OwnedReadHalf,
    buf: Vec<u8>,
}

/// Owns the write half of the connection. All outbound envelopes must pass
/// through a single `FrameWriter` so writes never interleave on the wire.
pub struct FrameWriter {
    socket: OwnedWriteHalf,
}

/// Opens a TCP connection to `host:port` and splits it into independent
/// read/write halves: opposite halves of one full-duplex stream.
pub async fn connect(host: &str, port: u16) -> Result<(FrameReader, FrameWriter)> {
    connect_with_capacity(host, port, READ_CHUNK).await
}

/// Like [`connect`], but with an initial capacity hint for the read
/// buffer, for callers that know their typical message size up front.
pub async fn connect_with_capacity(
    host: &str,
    port: u16,
    initial_capacity: usize,
) -> Result<(FrameReader, FrameWriter)> {
    let stream = TcpStream::connect((host, port))
        .await
        .map_err(|e| Error::disconnected(format!("connect to {host}:{port} failed: {e}")))?;
    stream.set_nodelay(true).ok();
    let (read_half, write_half) = stream.into_split();
    Ok((
        FrameReader { socket: read_half, buf: Vec::with_capacity(initial_capacity) },
        FrameWriter { socket: write_half },
    ))
}

impl FrameReader {
    /// Wraps an already-split read half directly, for callers (tests, or
    /// alternate connection setups) that don't go through [`connect`].
    pub fn from_parts(socket: OwnedReadHalf) -> Self {
        FrameReader { socket, buf: Vec::with_capacity(READ_CHUNK) }
    }

    /// Pulls bytes until exactly one top-level JSON value is parseable, then
    /// returns it, retaining any trailing bytes for the next call. Returns
    /// `Ok(None)` on a clean EOF with no partial message pending.
    pub async fn read_next_message(&mut self) -> Result<Option<Envelope>> {
        loop {
            if let Some((envelope, consumed)) = try_parse_one(&self.buf)? {
                self.buf.drain(..consumed);
                return Ok(Some(envelope));
            }

            let mut chunk = [0u8; READ_CHUNK];
            let n = self
                .socket
                .read(&mut chunk)
                .await
                .map_err(|e| Error::disconnected(format!("read failed: {e}")))?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(Error::disconnected(
                    "connection closed with a partial message pending",
                ));
            }
            self.buf.extend_from_slice(&chunk[..n]);
            trace!(bytes = n, buffered = self.buf.len(), "read from socket");
        }
    }
}

impl FrameWriter {
    /// Wraps an already-split write half directly, for callers (tests, or
    /// alternate connection setups) that don't go through [`connect`].
    pub fn from_parts(socket: OwnedWriteHalf) -> Self {
        FrameWriter { socket }
    }

    /// Serializes and writes one envelope. Meant to be owned by a single
    /// writer task/lock so writes never interleave.
    pub async fn write_message(&mut self, envelope: &Envelope) -> Result<()> {
        let mut payload = serde_json::to_vec(envelope)
            .map_err(|e| Error::InternalError(format!("failed to serialize envelope: {e}")))?;
        // No delimiter is required by the wire protocol (concatenated
        // top-level values), but a trailing newline makes captured traffic
        // human-readable without changing what `try_parse_one` accepts.
        payload.push(b'\n');
        self.socket
            .write_all(&payload)
            .await
            .map_err(|e| Error::disconnected(format!("write failed: {e}")))?;
        Ok(())
    }

    /// Idempotently shuts down the write half; subsequent writes fail.
    pub async fn close(&mut self) {
        if let Err(e) = self.socket.shutdown().await {
            warn!(error = %e, "error shutting down transport write half");
        }
    }
}

/// Attempts to deserialize exactly one [`Envelope`] from the head of `buf`.
/// Returns `Ok(None)` when the buffer doesn't yet hold a complete value.
/// Returns `Err` for a syntactically invalid prefix — terminal for the
/// connection rather than something we try to resync past.
fn try_parse_one(buf: &[u8]) -> Result<Option<(Envelope, usize)>> {
    let trimmed_offset = buf.iter().take_while(|b| b.is_ascii_whitespace()).count();
    if trimmed_offset == buf.len() {
        return Ok(None);
    }
    let slice = &buf[trimmed_offset..];
    let mut de = serde_json::Deserializer::from_slice(slice);
    match Envelope::deserialize(&mut de) {
        Ok(envelope) => Ok(Some((envelope, trimmed_offset + de.byte_offset()))),
        Err(e) if e.is_eof() => Ok(None),
        Err(e) => Err(Error::ParseError(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Envelope;

    #[test]
    fn parses_one_value_and_reports_consumed_length() {
        let msg = Envelope::notification("noop", None);
        let mut bytes = serde_json::to_vec(&msg).unwrap();
        let consumed_len = bytes.len();
        bytes.extend_from_slice(b"\n{\"jsonrpc\":\"2.0\",\"method\":\"second\"}");

        let (parsed, consumed) = try_parse_one(&bytes).unwrap().unwrap();
        assert_eq!(parsed, msg);
        assert_eq!(consumed, consumed_len);
    }

    #[test]
    fn incomplete_buffer_yields_none() {
        let partial = br#"{"jsonrpc": "2.0", "method":""#;
        assert!(try_parse_one(partial).unwrap().is_none());
    }

    #[test]
    fn malformed_prefix_is_an_error() {
        let garbage = b"{]";
        assert!(try_parse_one(garbage).is_err());
    }

    #[test]
    fn tolerates_leading_whitespace_between_values() {
        let msg = Envelope::notification("noop", None);
        let mut bytes = b"\n  \n".to_vec();
        bytes.extend_from_slice(&serde_json::to_vec(&msg).unwrap());
        let (parsed, _) = try_parse_one(&bytes).unwrap().unwrap();
        assert_eq!(parsed, msg);
    }
}
