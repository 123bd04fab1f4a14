// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

use async_trait::async_trait;
use dispatch_core::{InboundMessage, OutboundMessage, Transport};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const STDIO_THREAD: &str = "stdio";

/// Newline-delimited stdin/stdout transport for interactive local use.
/// Blank lines are ignored; EOF on stdin ends the transport cleanly.
pub struct StdioTransport {
    id: String,
    sender_id: String,
}

impl StdioTransport {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), sender_id: "local".to_string() }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    fn id(&self) -> &str {
        &self.id
    }

    async fn start(&self, cancel: CancellationToken, inbound: mpsc::Sender<InboundMessage>) -> anyhow::Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                line = lines.next_line() => {
                    let Some(text) = line? else { return Ok(()) };
                    if text.trim().is_empty() {
                        continue;
                    }
                    let msg = InboundMessage {
                        transport_id: self.id.clone(),
                        sender_id: self.sender_id.clone(),
                        text,
                        thread_id: STDIO_THREAD.to_string(),
                        meta: HashMap::new(),
                    };
                    if inbound.send(msg).await.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn send(&self, _cancel: CancellationToken, msg: OutboundMessage) -> anyhow::Result<()> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(msg.text.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_stable() {
        let t = StdioTransport::new("stdio-1");
        assert_eq!(t.id(), "stdio-1");
    }

    #[tokio::test]
    async fn send_writes_without_erroring() {
        let t = StdioTransport::new("stdio-1");
        let result = t
            .send(
                CancellationToken::new(),
                OutboundMessage {
                    transport_id: "stdio-1".into(),
                    recipient: "local".into(),
                    text: "hello".into(),
                    thread_id: STDIO_THREAD.into(),
                    meta: HashMap::new(),
                },
            )
            .await;
        assert!(result.is_ok());
    }
}
