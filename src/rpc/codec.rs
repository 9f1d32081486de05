//! NDJSON framing for the host-facing stdio stream.
//!
//! Splits the byte stream on `\n` into UTF-8 frames, holding at most one
//! partial line in the buffer. The per-line cap bounds memory against an
//! unterminated or runaway frame; a legitimate JSON-RPC message fits far
//! under it. Unlike a hard framing error, an oversized line here is
//! *recoverable*: the codec reports it once, discards bytes up to the next
//! `\n`, and resumes — which is what the transport reader needs to keep a
//! long-lived host connection alive past one bad frame.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{AppError, Result};

/// Default per-line cap: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// NDJSON line codec with a bounded buffer and oversize resync.
///
/// # Decoder
///
/// Yields one `String` per `\n`-terminated line, tolerating a trailing
/// `\r`. A line longer than the cap produces [`AppError::Protocol`]
/// (`"line too long…"`) exactly once; the offending bytes are dropped and
/// decoding resynchronises at the next `\n`. Invalid UTF-8 is likewise a
/// recoverable [`AppError::Protocol`]. Bytes after the last `\n` stay
/// buffered for the next read; at EOF an unterminated tail is flushed as a
/// final frame.
///
/// # Encoder
///
/// Appends `frame\n`. The cap is a decoder-side defence and is not
/// enforced on the outbound path.
#[derive(Debug)]
pub struct JsonRpcCodec {
    max_line_bytes: usize,
    /// Prefix of the buffered partial line already searched for `\n`.
    scanned: usize,
    /// Dropping bytes until the next `\n` after an oversized line.
    discarding: bool,
}

impl JsonRpcCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_line_bytes(MAX_LINE_BYTES)
    }

    /// Create a codec with a custom per-line cap.
    #[must_use]
    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            max_line_bytes,
            scanned: 0,
            discarding: false,
        }
    }

    /// The configured per-line cap.
    #[must_use]
    pub fn max_line_bytes(&self) -> usize {
        self.max_line_bytes
    }

    fn oversize_error(&self) -> AppError {
        AppError::Protocol(format!(
            "line too long: exceeded {} bytes, frame discarded",
            self.max_line_bytes
        ))
    }
}

impl Default for JsonRpcCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for JsonRpcCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        loop {
            // Resume the search where the previous call left off; a partial
            // line is never rescanned from the start.
            let newline = src[self.scanned..]
                .iter()
                .position(|&b| b == b'\n')
                .map(|pos| pos + self.scanned);

            if self.discarding {
                match newline {
                    Some(pos) => {
                        src.advance(pos + 1);
                        self.scanned = 0;
                        self.discarding = false;
                        continue;
                    }
                    None => {
                        src.clear();
                        self.scanned = 0;
                        return Ok(None);
                    }
                }
            }

            return match newline {
                Some(pos) if pos > self.max_line_bytes => {
                    src.advance(pos + 1);
                    self.scanned = 0;
                    Err(self.oversize_error())
                }
                Some(pos) => {
                    let mut line = src.split_to(pos + 1);
                    line.truncate(pos);
                    if line.last() == Some(&b'\r') {
                        line.truncate(pos - 1);
                    }
                    self.scanned = 0;
                    utf8_frame(&line).map(Some)
                }
                None if src.len() > self.max_line_bytes => {
                    // The partial line already blew the cap; drop it and
                    // swallow everything up to the next newline.
                    src.clear();
                    self.scanned = 0;
                    self.discarding = true;
                    Err(self.oversize_error())
                }
                None => {
                    self.scanned = src.len();
                    Ok(None)
                }
            };
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if self.discarding || src.is_empty() {
            src.clear();
            self.scanned = 0;
            self.discarding = false;
            return Ok(None);
        }

        // Unterminated tail at EOF becomes the final frame.
        let mut line = src.split_to(src.len());
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        self.scanned = 0;
        utf8_frame(&line).map(Some)
    }
}

impl Encoder<String> for JsonRpcCodec {
    type Error = AppError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        dst.reserve(item.len() + 1);
        dst.extend_from_slice(item.as_bytes());
        dst.extend_from_slice(b"\n");
        Ok(())
    }
}

fn utf8_frame(bytes: &[u8]) -> Result<String> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|err| AppError::Protocol(format!("frame is not valid UTF-8: {err}")))
}
