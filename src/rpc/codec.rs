//! Newline-delimited framing for the tool server's stdio.
//!
//! Inbound lines are split on `\n` at the byte level and decoded lossily, so
//! a stray non-UTF-8 diagnostic becomes an unparseable line instead of a
//! stream error. Lines longer than the limit are dropped whole and reading
//! resumes after their terminator. The decoder never fails, which keeps a
//! `FramedRead` over it alive until EOF.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::{AppError, Result};

/// Maximum inbound line length: 16 MiB.
///
/// Tool results (log dumps, VM listings) arrive as a single JSON line, so the
/// limit is generous.
pub const MAX_LINE_BYTES: usize = 16 * 1_048_576;

/// Line codec for the tool server's stdin and stdout.
#[derive(Debug)]
pub struct LineCodec {
    max_length: usize,
    /// Bytes of `src` already scanned without finding `\n`.
    scanned: usize,
    /// Inside an overlong line; drop bytes until the next `\n`.
    discarding: bool,
    dropped_lines: usize,
}

impl LineCodec {
    /// Codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Codec with a custom inbound line limit.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            scanned: 0,
            discarding: false,
            dropped_lines: 0,
        }
    }

    /// Number of overlong lines dropped so far.
    #[must_use]
    pub fn dropped_lines(&self) -> usize {
        self.dropped_lines
    }

    fn finish_discard(&mut self) {
        self.discarding = false;
        self.dropped_lines += 1;
        warn!(
            limit = self.max_length,
            "dropped stdout line longer than the inbound limit"
        );
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn text(mut raw: &[u8]) -> String {
    if let [rest @ .., b'\r'] = raw {
        raw = rest;
    }
    String::from_utf8_lossy(raw).into_owned()
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = AppError;

    /// Next `\n`-terminated line without its terminator (or a trailing
    /// `\r`). Invalid UTF-8 is replaced with U+FFFD.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        loop {
            if self.discarding {
                match src.iter().position(|b| *b == b'\n') {
                    Some(end) => {
                        src.advance(end + 1);
                        self.finish_discard();
                    }
                    None => {
                        src.clear();
                        return Ok(None);
                    }
                }
            }

            let limit = src.len().min(self.max_length.saturating_add(1));
            let found = src[self.scanned..limit]
                .iter()
                .position(|b| *b == b'\n')
                .map(|offset| self.scanned + offset);

            match found {
                Some(end) => {
                    let line = src.split_to(end + 1);
                    self.scanned = 0;
                    return Ok(Some(text(&line[..end])));
                }
                None if src.len() > self.max_length => {
                    self.scanned = 0;
                    self.discarding = true;
                }
                None => {
                    self.scanned = src.len();
                    return Ok(None);
                }
            }
        }
    }

    /// Same as [`Decoder::decode`], then the final unterminated line.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        self.scanned = 0;
        if self.discarding {
            src.clear();
            self.finish_discard();
            return Ok(None);
        }
        if src.is_empty() {
            return Ok(None);
        }
        let rest = src.split();
        Ok(Some(text(&rest)))
    }
}

impl Encoder<String> for LineCodec {
    type Error = AppError;

    /// Write `item` followed by `\n`.
    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        dst.reserve(item.len() + 1);
        dst.put_slice(item.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}
