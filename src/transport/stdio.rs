//! Newline-delimited stdio transport
//!
//! One JSON-RPC message per line in, one response per line out. The whole
//! stream is a single session.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

use super::supervisor::RequestSupervisor;
use crate::error::Result;
use crate::mcp::{McpHandler, McpResponse};
use crate::session::SessionManager;

/// MCP server bound to a pair of byte streams
pub struct StdioServer {
    sessions: Arc<SessionManager>,
    supervisor: Arc<RequestSupervisor>,
    shutdown: CancellationToken,
}

impl StdioServer {
    pub fn new(sessions: Arc<SessionManager>, supervisor: Arc<RequestSupervisor>) -> Self {
        Self {
            sessions,
            supervisor,
            shutdown: CancellationToken::new(),
        }
    }

    /// Stop reading when `token` is cancelled
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Run the server, reading from stdin and writing to stdout
    pub async fn run(&self) -> Result<()> {
        let reader = BufReader::new(tokio::io::stdin());
        let writer = tokio::io::stdout();
        self.run_with(reader, writer).await
    }

    /// Serve until EOF, a read error or shutdown
    pub async fn run_with<R, W>(&self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let session = self.sessions.get_or_create(None)?;
        tracing::info!(session = %session.id, "MCP stdio session opened");

        let mut lines = reader.lines();
        loop {
            let line = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                line = lines.next_line() => line,
            };

            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => break, // EOF
                Err(e) => {
                    tracing::error!("Error reading stdin: {}", e);
                    break;
                }
            };

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let dispatcher = session.dispatcher.clone();
            let raw = trimmed.to_string();
            let response = self
                .supervisor
                .run("stdio", async move { dispatcher.handle_message(&raw).await })
                .await
                .unwrap_or_else(|e| McpResponse::from_error(None, e));

            let mut response_json = serde_json::to_string(&response)?;
            response_json.push('\n');
            writer.write_all(response_json.as_bytes()).await?;
            writer.flush().await?;
        }

        self.sessions.remove(&session.id);
        tracing::info!(session = %session.id, "MCP stdio session closed");
        Ok(())
    }
}
