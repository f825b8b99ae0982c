//! stdio transport for MCP server.
//!
//! - Messages are UTF-8 encoded JSON-RPC
//! - Messages are delimited by newlines
//! - Messages must not contain embedded newlines
//! - stdin: receives messages from client
//! - stdout: sends messages to client
//! - stderr: may be used for logging (not MCP messages)
//!
//! # Concurrency
//!
//! The read loop never waits for a handler. Each frame is handled on its own
//! task, so a slow tool call does not hold up the next frame and replies may
//! be written in a different order than the requests arrived. A single
//! writer task owns the output stream; replies and notifications both reach
//! it through the session's outbound channel.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::Transport;
use crate::error::TransportError;
use crate::mcp::router::Router;
use crate::mcp::session::TransportKind;

/// Newline-delimited JSON-RPC over a byte stream pair.
///
/// [`StdioTransport::stdio`] serves stdin/stdout; tests pass in-memory pipes.
pub struct StdioTransport<R, W> {
    reader: BufReader<R>,
    writer: W,
}

impl StdioTransport<tokio::io::Stdin, tokio::io::Stdout> {
    /// Creates a transport over the process's stdin and stdout.
    #[must_use]
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

impl<R, W> StdioTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Creates a transport over an arbitrary reader and writer.
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    /// Serves the single implicit session until EOF or `shutdown`.
    ///
    /// On EOF, frames already received are allowed to finish and their
    /// replies are written before returning. On shutdown, in-flight frames
    /// are abandoned.
    ///
    /// # Errors
    ///
    /// Returns an error if reading or writing fails.
    pub async fn run(
        mut self,
        router: Arc<Router>,
        mut shutdown: BoxFuture<'static, ()>,
    ) -> Result<(), TransportError> {
        let sessions = Arc::clone(router.sessions());
        let (session, outbound) = sessions.open(TransportKind::Stream);
        let writer = tokio::spawn(write_frames(self.writer, outbound));
        let mut tasks = JoinSet::new();

        let read_result = loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("Shutdown requested, abandoning {} in-flight request(s)", tasks.len());
                    tasks.shutdown().await;
                    break Ok(());
                }

                line = read_line(&mut self.reader) => {
                    let line = match line {
                        Ok(Some(line)) => line,
                        Ok(None) => {
                            debug!("stdin closed, draining {} in-flight request(s)", tasks.len());
                            while tasks.join_next().await.is_some() {}
                            break Ok(());
                        }
                        Err(e) => {
                            tasks.shutdown().await;
                            break Err(TransportError::Io(e));
                        }
                    };

                    if line.trim().is_empty() {
                        continue;
                    }

                    let router = Arc::clone(&router);
                    let session = session.clone();
                    tasks.spawn(async move {
                        if let Some(reply) = router.handle_frame(&session, &line).await {
                            if let Err(e) = router.sessions().send(&session, reply) {
                                warn!(error = %e, "Dropping reply");
                            }
                        }
                    });

                    // Reap finished tasks so the set does not grow unbounded.
                    while tasks.try_join_next().is_some() {}
                }
            }
        };

        // Dropping the session closes the outbound channel, which ends the writer.
        sessions.close(&session);
        let write_result = match writer.await {
            Ok(result) => result.map_err(TransportError::Io),
            Err(e) => Err(TransportError::Io(io::Error::other(e))),
        };

        read_result.and(write_result)
    }
}

#[async_trait]
impl<R, W> Transport for StdioTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn kind(&self) -> TransportKind {
        TransportKind::Stream
    }

    async fn serve(
        self: Box<Self>,
        router: Arc<Router>,
        shutdown: BoxFuture<'static, ()>,
    ) -> Result<(), TransportError> {
        (*self).run(router, shutdown).await
    }
}

/// Reads the next message line.
///
/// Returns `None` on EOF. The trailing `\n` or `\r\n` is removed.
async fn read_line<R: AsyncRead + Unpin>(reader: &mut BufReader<R>) -> io::Result<Option<String>> {
    let mut line = String::new();
    let bytes_read = reader.read_line(&mut line).await?;

    if bytes_read == 0 {
        return Ok(None);
    }

    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }

    Ok(Some(line))
}

/// Writes frames from `outbound` until every sender is gone.
async fn write_frames<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<String>,
) -> io::Result<()> {
    while let Some(frame) = outbound.recv().await {
        // MCP: messages must not contain embedded newlines
        debug_assert!(
            !frame.contains('\n'),
            "JSON message must not contain embedded newlines"
        );

        writer.write_all(frame.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_line_strips_crlf() {
        let mut reader = BufReader::new(&b"first\r\nsecond\nthird"[..]);
        assert_eq!(read_line(&mut reader).await.unwrap().as_deref(), Some("first"));
        assert_eq!(read_line(&mut reader).await.unwrap().as_deref(), Some("second"));
        assert_eq!(read_line(&mut reader).await.unwrap().as_deref(), Some("third"));
        assert_eq!(read_line(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn writer_terminates_each_frame() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(r#"{"a":1}"#.to_string()).unwrap();
        tx.send(r#"{"b":2}"#.to_string()).unwrap();
        drop(tx);

        let mut out = Vec::new();
        write_frames(&mut out, rx).await.unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "{\"a\":1}\n{\"b\":2}\n");
    }
}
