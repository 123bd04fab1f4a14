// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use dispatch_core::{InboundMessage, OutboundMessage, Transport};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// In-process transport for tests and scenarios: one channel feeds inbound
/// messages in, another collects whatever was sent out.
///
/// [`MockTransport::new`] returns the transport plus the two handles a test
/// drives directly, mirroring the original two-channel `mock.Transport`.
pub struct MockTransport {
    id: String,
    test_inbound_rx: Mutex<Option<mpsc::Receiver<InboundMessage>>>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
}

impl MockTransport {
    pub fn new(id: impl Into<String>) -> (Self, mpsc::Sender<InboundMessage>, mpsc::Receiver<OutboundMessage>) {
        let id = id.into();
        let id = if id.is_empty() { "mock".to_string() } else { id };
        let (test_tx, test_rx) = mpsc::channel(64);
        let (out_tx, out_rx) = mpsc::channel(64);
        (
            Self { id, test_inbound_rx: Mutex::new(Some(test_rx)), outbound_tx: out_tx },
            test_tx,
            out_rx,
        )
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn id(&self) -> &str {
        &self.id
    }

    async fn start(&self, cancel: CancellationToken, inbound: mpsc::Sender<InboundMessage>) -> anyhow::Result<()> {
        let mut rx = self
            .test_inbound_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow::anyhow!("mock transport {} already started", self.id))?;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                msg = rx.recv() => match msg {
                    Some(msg) => {
                        if inbound.send(msg).await.is_err() {
                            return Ok(());
                        }
                    }
                    None => return Ok(()),
                },
            }
        }
    }

    async fn send(&self, cancel: CancellationToken, msg: OutboundMessage) -> anyhow::Result<()> {
        tokio::select! {
            _ = cancel.cancelled() => Err(anyhow::anyhow!("canceled")),
            result = self.outbound_tx.send(msg) => result.map_err(|e| anyhow::anyhow!("mock outbound channel closed: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn msg(text: &str) -> InboundMessage {
        InboundMessage {
            transport_id: "mock".into(),
            sender_id: "alice".into(),
            text: text.into(),
            thread_id: "t1".into(),
            meta: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn defaults_id_when_empty() {
        let (t, _, _) = MockTransport::new("");
        assert_eq!(t.id(), "mock");
    }

    #[tokio::test]
    async fn forwards_inbound_to_core_channel() {
        let (t, test_tx, _out_rx) = MockTransport::new("mock");
        let (core_tx, mut core_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();
        let handle = tokio::spawn(async move { t.start(cancel2, core_tx).await });

        test_tx.send(msg("hello")).await.unwrap();
        let received = core_rx.recv().await.unwrap();
        assert_eq!(received.text, "hello");

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn send_appears_on_outbound_channel() {
        let (t, _test_tx, mut out_rx) = MockTransport::new("mock");
        let cancel = CancellationToken::new();
        t.send(
            cancel,
            OutboundMessage {
                transport_id: "mock".into(),
                recipient: "alice".into(),
                text: "hi back".into(),
                thread_id: "t1".into(),
                meta: HashMap::new(),
            },
        )
        .await
        .unwrap();
        let out = out_rx.recv().await.unwrap();
        assert_eq!(out.text, "hi back");
    }

    #[tokio::test]
    async fn start_stops_on_cancel() {
        let (t, _test_tx, _out_rx) = MockTransport::new("mock");
        let (core_tx, _core_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = t.start(cancel, core_tx).await;
        assert!(result.is_ok());
    }
}
