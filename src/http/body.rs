//! Pull-based streamed bodies.
//!
//! A [`Body`] yields [`Bytes`] chunks one at a time through
//! [`Body::next_chunk`]. Request bodies are fed by the command stream through a
//! [`BodySender`]; static files are read from disk in bounded chunks so a large
//! file is never held in memory at once.

use std::io;

use bytes::{Bytes, BytesMut};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tokio::sync::mpsc;

/// Upper bound on a single chunk read from a file.
const FILE_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug)]
enum Kind {
    Empty,
    Full(Option<Bytes>),
    Channel(mpsc::UnboundedReceiver<io::Result<Bytes>>),
    File { file: File, remaining: u64 },
}

/// A streamed HTTP body.
///
/// # Examples
///
/// ```
/// use procweb::http::Body;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> std::io::Result<()> {
/// let (tx, body) = Body::channel();
/// tx.send("hello ");
/// tx.send("world");
/// drop(tx);
///
/// assert_eq!(body.collect().await?, "hello world");
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Body {
    kind: Kind,
}

impl Body {
    /// A body with no chunks.
    pub fn empty() -> Self {
        Self { kind: Kind::Empty }
    }

    /// A body made of a single in-memory chunk.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self {
            kind: Kind::Full(Some(bytes.into())),
        }
    }

    /// Creates a body fed by the returned sender.
    ///
    /// The body ends once every sender is dropped, or yields an error after
    /// [`BodySender::abort`].
    pub fn channel() -> (BodySender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            BodySender { tx },
            Self {
                kind: Kind::Channel(rx),
            },
        )
    }

    /// Streams `len` bytes of `file` starting at `offset`.
    pub async fn file_window(mut file: File, offset: u64, len: u64) -> io::Result<Self> {
        if offset > 0 {
            file.seek(SeekFrom::Start(offset)).await?;
        }
        Ok(Self {
            kind: Kind::File {
                file,
                remaining: len,
            },
        })
    }

    /// Returns `true` if the body is known to produce no bytes.
    pub fn is_empty(&self) -> bool {
        match &self.kind {
            Kind::Empty => true,
            Kind::Full(chunk) => chunk.as_ref().is_none_or(Bytes::is_empty),
            Kind::Channel(_) => false,
            Kind::File { remaining, .. } => *remaining == 0,
        }
    }

    /// Pulls the next chunk, or `None` once the body is exhausted.
    pub async fn next_chunk(&mut self) -> Option<io::Result<Bytes>> {
        match &mut self.kind {
            Kind::Empty => None,
            Kind::Full(chunk) => chunk.take().map(Ok),
            Kind::Channel(rx) => rx.recv().await,
            Kind::File { file, remaining } => {
                if *remaining == 0 {
                    return None;
                }
                let want = (*remaining).min(FILE_CHUNK_SIZE as u64) as usize;
                let mut buf = BytesMut::zeroed(want);
                match file.read(&mut buf[..]).await {
                    Ok(0) => {
                        *remaining = 0;
                        Some(Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "file ended before the announced length",
                        )))
                    }
                    Ok(read) => {
                        buf.truncate(read);
                        *remaining -= read as u64;
                        Some(Ok(buf.freeze()))
                    }
                    Err(e) => {
                        *remaining = 0;
                        Some(Err(e))
                    }
                }
            }
        }
    }

    /// Reads the whole body into memory.
    pub async fn collect(mut self) -> io::Result<Bytes> {
        let mut out = BytesMut::new();
        while let Some(chunk) = self.next_chunk().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out.freeze())
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Self::from_bytes(s)
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Self::from_bytes(Bytes::from_static(s.as_bytes()))
    }
}

impl From<Vec<u8>> for Body {
    fn from(v: Vec<u8>) -> Self {
        Self::from_bytes(v)
    }
}

/// Write half of a [`Body::channel`].
#[derive(Debug, Clone)]
pub struct BodySender {
    tx: mpsc::UnboundedSender<io::Result<Bytes>>,
}

impl BodySender {
    /// Appends a chunk. Returns `false` if the body was dropped by its reader.
    pub fn send(&self, chunk: impl Into<Bytes>) -> bool {
        self.tx.send(Ok(chunk.into())).is_ok()
    }

    /// Terminates the body with an error the reader observes as its last item.
    pub fn abort(self, reason: &str) {
        let _ = self.tx.send(Err(io::Error::new(
            io::ErrorKind::ConnectionAborted,
            reason.to_owned(),
        )));
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[tokio::test]
    async fn full_body_yields_once() {
        let mut body = Body::from("abc");
        assert_eq!(body.next_chunk().await.unwrap().unwrap(), "abc");
        assert!(body.next_chunk().await.is_none());
    }

    #[tokio::test]
    async fn aborted_channel_ends_with_error() {
        let (tx, mut body) = Body::channel();
        tx.send("partial");
        tx.abort("client went away");

        assert_eq!(body.next_chunk().await.unwrap().unwrap(), "partial");
        let err = body.next_chunk().await.unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
        assert!(body.next_chunk().await.is_none());
    }

    #[tokio::test]
    async fn file_window_reads_only_the_window() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"0123456789").unwrap();

        let file = File::open(tmp.path()).await.unwrap();
        let body = Body::file_window(file, 3, 4).await.unwrap();
        assert_eq!(body.collect().await.unwrap(), "3456");
    }

    #[tokio::test]
    async fn file_window_reports_truncated_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"abc").unwrap();

        let file = File::open(tmp.path()).await.unwrap();
        let body = Body::file_window(file, 0, 10).await.unwrap();
        let err = body.collect().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn emptiness() {
        assert!(Body::empty().is_empty());
        assert!(Body::from("").is_empty());
        assert!(!Body::from("x").is_empty());
    }
}
