//! Newline framing for the inbound byte stream.

use std::io;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Read size for [`LineStream`].
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Splits arbitrarily chunked bytes into `\n`-terminated lines.
///
/// Bytes after the last newline stay buffered until a later chunk terminates
/// them. There is no line-length limit. Lines are decoded as UTF-8 with
/// replacement characters for invalid sequences.
///
/// # Examples
///
/// ```
/// use procweb::protocol::LineReader;
///
/// let mut reader = LineReader::new();
/// reader.push(b"[\"start-");
/// assert_eq!(reader.next_line(), None);
/// reader.push(b"body\"]\n[\"end");
/// assert_eq!(reader.next_line().as_deref(), Some(r#"["start-body"]"#));
/// assert_eq!(reader.next_line(), None);
/// ```
#[derive(Debug, Default)]
pub struct LineReader {
    buf: BytesMut,
    // Prefix of `buf` already known to contain no newline.
    scanned: usize,
}

impl LineReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk of raw input.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pops the next complete line, without its `\n`.
    pub fn next_line(&mut self) -> Option<String> {
        match self.buf[self.scanned..].iter().position(|&b| b == b'\n') {
            Some(pos) => {
                let line = self.buf.split_to(self.scanned + pos + 1);
                self.scanned = 0;
                Some(String::from_utf8_lossy(&line[..line.len() - 1]).into_owned())
            }
            None => {
                self.scanned = self.buf.len();
                None
            }
        }
    }

    /// Number of bytes waiting for a terminating newline.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Reads lines from an async byte source.
#[derive(Debug)]
pub struct LineStream<R> {
    reader: R,
    lines: LineReader,
    eof: bool,
}

impl<R: AsyncRead + Unpin> LineStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            lines: LineReader::new(),
            eof: false,
        }
    }

    /// Waits for the next complete line.
    ///
    /// Returns `Ok(None)` at end of input. An unterminated final line is
    /// dropped, never emitted.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            if let Some(line) = self.lines.next_line() {
                return Ok(Some(line));
            }
            if self.eof {
                return Ok(None);
            }
            let mut chunk = BytesMut::with_capacity(READ_CHUNK_SIZE);
            if self.reader.read_buf(&mut chunk).await? == 0 {
                self.eof = true;
                if self.lines.pending() > 0 {
                    tracing::debug!(
                        bytes = self.lines.pending(),
                        "input ended inside an unterminated line"
                    );
                }
                continue;
            }
            self.lines.push(&chunk);
        }
    }
}
