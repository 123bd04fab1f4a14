// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::types::{AgentRequest, AgentResponse, AuditEntry, InboundMessage, OutboundMessage, SessionState};

/// Carries messages between an external system and the dispatcher.
///
/// One process may run several transports concurrently; each must report a
/// stable, non-empty [`Transport::id`] unique across the process.
#[async_trait]
pub trait Transport: Send + Sync {
    /// A stable identifier, unique across transports in the process.
    fn id(&self) -> &str;

    /// Runs until `cancel` fires or a fatal error occurs, publishing
    /// [`InboundMessage`] values on `inbound`. Every published message's
    /// `transport_id` must equal [`Transport::id`]; messages from the same
    /// `sender_id` must not be reordered.
    async fn start(
        &self,
        cancel: CancellationToken,
        inbound: mpsc::Sender<InboundMessage>,
    ) -> anyhow::Result<()>;

    /// Delivers an outbound message. May fail transiently (the core retries)
    /// or fatally. The core may call this more than once for the same
    /// message during retry; at-least-once delivery is acceptable.
    async fn send(&self, cancel: CancellationToken, msg: OutboundMessage) -> anyhow::Result<()>;
}

/// Turns a prompt into a reply plus optional action calls.
///
/// Pure with respect to the core: the only effect the core observes is the
/// returned [`AgentResponse`]. May fail transiently; the core retries up to
/// three attempts.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn generate(
        &self,
        cancel: CancellationToken,
        req: AgentRequest,
    ) -> anyhow::Result<AgentResponse>;
}

/// A named capability an agent may request (shell, file read/write, ...).
///
/// The core does not inspect `args` or the returned result; both are opaque
/// byte payloads passed through unchanged.
#[async_trait]
pub trait Action: Send + Sync {
    /// Stable string used as the registry key.
    fn name(&self) -> &str;

    /// Capability tokens advertised to the agent.
    fn capabilities(&self) -> Vec<String>;

    /// Short single-line usage hint. Empty means no help entry.
    fn help(&self) -> &str {
        ""
    }

    async fn invoke(&self, cancel: CancellationToken, args: Value) -> anyhow::Result<Value>;
}

/// Durable key-value state backing sessions, cursors, dedup, and audit.
///
/// Every operation is a single transaction; concurrent readers and writers
/// are safe. See spec §4.1 for exact semantics of each operation.
#[async_trait]
pub trait Store: Send + Sync {
    async fn save_active(&self, sender: &str, session_id: &str) -> anyhow::Result<()>;
    async fn clear_active(&self, sender: &str) -> anyhow::Result<()>;
    async fn active(&self, sender: &str) -> anyhow::Result<Option<SessionState>>;

    async fn last_cursor(&self, sender: &str) -> anyhow::Result<chrono::DateTime<chrono::Utc>>;
    async fn save_cursor(
        &self,
        sender: &str,
        ts: chrono::DateTime<chrono::Utc>,
    ) -> anyhow::Result<()>;

    /// Test-and-set: returns prior membership; `event_id` is a member after
    /// the call returns. Fails with an invalid-input error if `event_id` is
    /// empty.
    async fn already_processed(&self, event_id: &str) -> anyhow::Result<bool>;

    /// Returns true iff `(lower(sender), sha256(trim(text)))` was seen within
    /// `window`; unconditionally refreshes the entry's timestamp.
    /// `window <= 0` defaults to 30 seconds.
    async fn recent_message_seen(
        &self,
        sender: &str,
        text: &str,
        window: chrono::Duration,
    ) -> anyhow::Result<bool>;

    async fn append_audit(&self, entry: AuditEntry) -> anyhow::Result<()>;
    async fn audit(&self, limit: usize) -> anyhow::Result<Vec<AuditEntry>>;

    async fn append_history(&self, thread_id: &str, blob: &str, cap: usize) -> anyhow::Result<()>;
    async fn history(&self, thread_id: &str, limit: usize) -> anyhow::Result<Vec<String>>;
}

/// Receives a copy of every audit entry the dispatcher records, independent
/// of whether a [`Store`] is wired (spec §6 `audit_sink`). Implementations
/// should not block; this is a notification hook, not a durability boundary.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &crate::types::AuditEntry);
}

/// Maps an action's name to a registered [`Action`].
pub trait ActionLookup: Send + Sync {
    fn get(&self, name: &str) -> Option<std::sync::Arc<dyn Action>>;
    fn specs(&self) -> Vec<crate::types::ActionSpec>;
    fn help_lines(&self) -> Vec<String>;
    fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}
