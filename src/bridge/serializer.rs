//! Writes a [`Response`] back to the host as outbound commands.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::http::{Response, StatusCode};
use crate::protocol::Command;

/// Errors produced while writing a response.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("failed to write to the host: {0}")]
    Output(#[source] io::Error),

    #[error("response body failed mid-stream: {0}")]
    Body(#[source] io::Error),
}

/// What was written, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Written {
    pub status: StatusCode,
    pub chunks: usize,
    pub bytes: u64,
}

/// Emits `status`, `header`*, `start-body`, `data`*, `end-body` on an async
/// writer.
///
/// Every `data` command is flushed before the next body chunk is pulled, so a
/// slow host throttles how fast the body is read.
#[derive(Debug)]
pub struct ResponseWriter<W> {
    out: W,
}

impl<W: AsyncWrite + Unpin> ResponseWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Writes one command line without flushing.
    async fn write(&mut self, command: &Command) -> io::Result<()> {
        let mut line = command.encode();
        line.push('\n');
        self.out.write_all(line.as_bytes()).await
    }

    /// Writes one command line and flushes it.
    pub async fn send(&mut self, command: &Command) -> io::Result<()> {
        self.write(command).await?;
        self.out.flush().await
    }

    /// Serializes `response`. With `suppress_body` (HEAD requests) the body is
    /// never pulled and `end-body` follows `start-body` directly.
    ///
    /// If the body fails mid-stream, the error is returned without writing
    /// `end-body`, leaving the exchange visibly incomplete for the host.
    pub async fn write_response(
        &mut self,
        response: Response,
        suppress_body: bool,
    ) -> Result<Written, WriteError> {
        let (status, text, headers, body) = response.into_parts();
        let mut written = Written {
            status,
            chunks: 0,
            bytes: 0,
        };

        self.write(&Command::Status {
            code: status.as_u16(),
            text,
        })
        .await
        .map_err(WriteError::Output)?;
        for (name, value) in headers {
            self.write(&Command::Header { name, value })
                .await
                .map_err(WriteError::Output)?;
        }
        self.send(&Command::StartBody)
            .await
            .map_err(WriteError::Output)?;

        if let Some(mut body) = body.filter(|_| !suppress_body) {
            while let Some(chunk) = body.next_chunk().await {
                let chunk = chunk.map_err(WriteError::Body)?;
                if chunk.is_empty() {
                    continue;
                }
                written.chunks += 1;
                written.bytes += chunk.len() as u64;
                self.send(&Command::Data(chunk))
                    .await
                    .map_err(WriteError::Output)?;
            }
        }

        self.send(&Command::EndBody)
            .await
            .map_err(WriteError::Output)?;
        Ok(written)
    }
}
