// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::command::{self, CommandName};
use crate::contracts::{Action, ActionLookup, Agent, AuditSink, Store, Transport};
use crate::error::DispatcherError;
use crate::retry::retry;
use crate::sender_lock::SenderLocks;
use crate::types::{AgentRequest, AuditEntry, AuditOutcome, InboundMessage, OutboundMessage};

/// Constructor options for [`Dispatcher`] (spec §6).
pub struct DispatcherOptions {
    pub req_timeout: Duration,
    pub action_timeout: Duration,
    pub allowed_actions: HashSet<String>,
    pub allowed_senders: HashSet<String>,
    pub audit_sink: Option<Arc<dyn AuditSink>>,
    pub store: Option<Arc<dyn Store>>,
    pub session_timeout: Duration,
    pub initial_prompt: String,
    pub max_reply_chars: usize,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self {
            req_timeout: Duration::from_secs(15 * 60),
            action_timeout: Duration::from_secs(2 * 60),
            allowed_actions: HashSet::new(),
            allowed_senders: HashSet::new(),
            audit_sink: None,
            store: None,
            session_timeout: Duration::ZERO,
            initial_prompt: String::new(),
            max_reply_chars: 0,
        }
    }
}

impl DispatcherOptions {
    /// Lowercases every entry, matching the sender lookup's own normalization.
    pub fn with_allowed_senders(mut self, senders: impl IntoIterator<Item = String>) -> Self {
        self.allowed_senders = senders.into_iter().map(|s| s.to_lowercase()).collect();
        self
    }

    pub fn with_allowed_actions(mut self, actions: impl IntoIterator<Item = String>) -> Self {
        self.allowed_actions = actions.into_iter().collect();
        self
    }
}

/// Routes inbound transport messages through an agent and its actions, and
/// sends the reply back out. See spec §4.6 for the full lifecycle and
/// per-message pipeline this implements.
pub struct Dispatcher {
    transports: Vec<Arc<dyn Transport>>,
    transport_map: HashMap<String, Arc<dyn Transport>>,
    agent: Arc<dyn Agent>,
    actions: Arc<dyn ActionLookup>,
    options: DispatcherOptions,
    sender_locks: SenderLocks,
}

impl Dispatcher {
    pub fn new(
        transports: Vec<Arc<dyn Transport>>,
        agent: Arc<dyn Agent>,
        actions: Arc<dyn ActionLookup>,
        options: DispatcherOptions,
    ) -> Arc<Self> {
        let mut transport_map = HashMap::new();
        for t in &transports {
            let id = t.id().to_string();
            if transport_map.insert(id.clone(), t.clone()).is_some() {
                tracing::warn!(transport = %id, "duplicate transport id, last registration wins");
            }
        }
        Arc::new(Self {
            transports,
            transport_map,
            agent,
            actions,
            options,
            sender_locks: SenderLocks::new(),
        })
    }

    /// Runs every transport concurrently and feeds their inbound messages
    /// through [`Dispatcher::handle_message`] until `cancel` fires or a
    /// transport exits with a fatal error.
    pub async fn start(self: Arc<Self>, cancel: CancellationToken) -> anyhow::Result<()> {
        let (tx, mut rx) = mpsc::channel(128);

        let mut transport_tasks = Vec::with_capacity(self.transports.len());
        for t in &self.transports {
            let t = t.clone();
            let cancel = cancel.clone();
            let tx = tx.clone();
            transport_tasks.push(tokio::spawn(async move {
                let id = t.id().to_string();
                match t.start(cancel.clone(), tx).await {
                    Ok(()) => Ok(()),
                    Err(e) if cancel.is_cancelled() => {
                        tracing::debug!(transport = %id, error = %e, "transport exited on cancellation");
                        Ok(())
                    }
                    Err(e) => Err(DispatcherError::FatalTransport(id, e.to_string())),
                }
            }));
        }

        {
            let closer_tx = tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                cancel.cancelled().await;
                drop(closer_tx);
            });
        }
        drop(tx);

        while let Some(msg) = rx.recv().await {
            self.handle_message(cancel.clone(), msg).await;
        }

        let mut first_err = None;
        for handle in transport_tasks {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => first_err.get_or_insert(e.into()),
                Err(join_err) => first_err
                    .get_or_insert(DispatcherError::FatalTransport("unknown".into(), join_err.to_string()).into()),
            };
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// The per-message pipeline of spec §4.6: allowlist, dedup/replay,
    /// command routing, agent + action fan-out, reply, send.
    async fn handle_message(self: &Arc<Self>, cancel: CancellationToken, msg: InboundMessage) {
        let sender_lower = msg.sender_id.to_lowercase();
        let span = tracing::info_span!(
            "handle_message",
            transport = %msg.transport_id,
            sender = %sender_lower,
            thread = %msg.thread_id,
        );
        let _enter = span.enter();

        if !self.options.allowed_senders.is_empty()
            && !self.options.allowed_senders.contains(&sender_lower)
        {
            tracing::warn!("sender not in allowlist, dropping");
            return;
        }

        // Per-sender serialization covers the rest of this call (spec §4.7):
        // command branches and the agent/action/send path both touch session
        // state for this sender, so both are held under the same lock.
        let mutex = self.sender_locks.get_or_create(&sender_lower).await;
        let _guard = mutex.lock().await;

        if let Some(store) = &self.options.store {
            if let Some(event_id) = msg.meta.get("event_id").and_then(|v| v.as_str()) {
                match store.already_processed(event_id).await {
                    Ok(true) => {
                        tracing::debug!(event_id, "duplicate event, dropping");
                        return;
                    }
                    Ok(false) => {}
                    Err(e) => tracing::warn!(error = %e, "already_processed check failed"),
                }
            }

            match store
                .recent_message_seen(&sender_lower, &msg.text, chrono::Duration::seconds(30))
                .await
            {
                Ok(true) => {
                    tracing::debug!("replay window hit, dropping");
                    return;
                }
                Ok(false) => {}
                Err(e) => tracing::warn!(error = %e, "recent_message_seen check failed"),
            }

            let event_ts = event_timestamp(&msg);
            if let Err(e) = store.save_cursor(&sender_lower, event_ts).await {
                tracing::warn!(error = %e, "save_cursor failed");
            }
        }

        let shell_registered = self.actions.has("shell");
        let cmd = command::parse(&msg.text, shell_registered);

        match cmd.name {
            CommandName::Help => {
                self.send_reply(cancel, &msg, self.help_text()).await;
            }
            CommandName::Status => {
                let text = self.status_text(&sender_lower).await;
                self.send_reply(cancel, &msg, text).await;
            }
            CommandName::Use => {
                let text = self.use_command(&sender_lower, &cmd.args).await;
                self.send_reply(cancel, &msg, text).await;
            }
            CommandName::Shell => {
                let text = self.shell_command(cancel.clone(), &cmd.args).await;
                self.send_reply(cancel, &msg, text).await;
            }
            CommandName::New if cmd.args.trim().is_empty() => {
                if let Some(store) = &self.options.store {
                    if let Err(e) = store.clear_active(&sender_lower).await {
                        tracing::warn!(error = %e, "clear_active failed");
                    }
                }
                let text = "Starting a new session. Send a message to begin.".to_string();
                self.send_reply(cancel, &msg, text).await;
            }
            CommandName::New => {
                if let Some(store) = &self.options.store {
                    if let Err(e) = store.clear_active(&sender_lower).await {
                        tracing::warn!(error = %e, "clear_active failed");
                    }
                }
                self.run_pipeline(cancel, &msg, &sender_lower, &cmd.args).await;
            }
            CommandName::Run => {
                self.run_pipeline(cancel, &msg, &sender_lower, &cmd.args).await;
            }
        }
    }

    /// Steps 3-8 of spec §4.6: session resolution, prompt assembly, agent
    /// invocation, action fan-out, reply assembly and truncation, send.
    async fn run_pipeline(
        self: &Arc<Self>,
        cancel: CancellationToken,
        msg: &InboundMessage,
        sender_lower: &str,
        prompt_base: &str,
    ) {
        let mut session_id = String::new();
        if let Some(store) = &self.options.store {
            match store.active(sender_lower).await {
                Ok(Some(state)) => {
                    let expired = self.options.session_timeout > Duration::ZERO
                        && chrono::Utc::now() - state.updated_at
                            > chrono::Duration::from_std(self.options.session_timeout)
                                .unwrap_or_else(|_| chrono::Duration::zero());
                    if expired {
                        if let Err(e) = store.clear_active(sender_lower).await {
                            tracing::warn!(error = %e, "clear_active on expiry failed");
                        }
                    } else {
                        session_id = state.session_id;
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "active lookup failed"),
            }
        }

        let mut prompt = prompt_base.to_string();
        if session_id.is_empty() && !self.options.initial_prompt.trim().is_empty() {
            prompt = format!("{}\n\n{}", self.options.initial_prompt, prompt);
        }
        if prompt.trim().is_empty() {
            let text = "No prompt detected. Send text or /help for commands.".to_string();
            self.send_reply(cancel, msg, text).await;
            return;
        }

        let req = AgentRequest {
            prompt,
            history: Vec::new(),
            actions: self.actions.specs(),
            sender_meta: msg.meta.clone(),
        };

        let agent = self.agent.clone();
        let req_timeout = self.options.req_timeout;
        let agent_cancel = cancel.clone();
        let outcome = tokio::time::timeout(
            req_timeout,
            retry(&agent_cancel, 3, move || {
                let agent = agent.clone();
                let req = req.clone();
                let agent_cancel = agent_cancel.clone();
                async move { agent.generate(agent_cancel, req).await }
            }),
        )
        .await;

        let response = match outcome {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "agent generate failed after retries");
                return;
            }
            Err(_) => {
                tracing::error!("agent generate timed out");
                return;
            }
        };

        if !response.session_id.is_empty() {
            if let Some(store) = &self.options.store {
                if let Err(e) = store.save_active(sender_lower, &response.session_id).await {
                    tracing::warn!(error = %e, "save_active failed");
                }
            }
        }

        let mut fragments = Vec::new();
        for call in &response.action_calls {
            if !self.options.allowed_actions.is_empty()
                && !self.options.allowed_actions.contains(&call.name)
            {
                tracing::warn!(action = %call.name, "action not in allowlist, denied");
                self.audit(call.name.clone(), sender_lower.to_string(), AuditOutcome::Denied, 0)
                    .await;
                continue;
            }
            let Some(action) = self.actions.get(&call.name) else {
                tracing::warn!(action = %call.name, "unknown action requested");
                continue;
            };
            let rendered = self
                .invoke_action(cancel.clone(), action, call.name.clone(), call.args.clone(), sender_lower)
                .await;
            if let Some(text) = rendered {
                fragments.push(format!("[{}]\n{}", call.name, text));
            }
        }

        let mut final_text = response.reply;
        for frag in &fragments {
            final_text.push_str("\n\n");
            final_text.push_str(frag);
        }
        let final_text = truncate_scalar(&final_text, self.options.max_reply_chars);

        self.send_reply(cancel, msg, final_text).await;
    }

    async fn invoke_action(
        &self,
        cancel: CancellationToken,
        action: Arc<dyn Action>,
        name: String,
        args: serde_json::Value,
        sender_lower: &str,
    ) -> Option<String> {
        let start = std::time::Instant::now();
        let result = tokio::time::timeout(self.options.action_timeout, action.invoke(cancel, args)).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;
        match result {
            Ok(Ok(value)) => {
                self.audit(name, sender_lower.to_string(), AuditOutcome::Ok, elapsed_ms).await;
                Some(value_to_text(&value))
            }
            Ok(Err(e)) => {
                tracing::error!(action = %name, error = %e, "action invoke failed");
                self.audit(name, sender_lower.to_string(), AuditOutcome::Error, elapsed_ms).await;
                None
            }
            Err(_) => {
                tracing::error!(action = %name, "action invoke timed out");
                self.audit(name, sender_lower.to_string(), AuditOutcome::Error, elapsed_ms).await;
                None
            }
        }
    }

    async fn send_reply(&self, cancel: CancellationToken, msg: &InboundMessage, text: String) {
        let Some(transport) = self.transport_map.get(&msg.transport_id).cloned() else {
            tracing::error!(transport = %msg.transport_id, "no transport registered for outbound send");
            return;
        };
        let out = OutboundMessage {
            transport_id: msg.transport_id.clone(),
            recipient: msg.sender_id.clone(),
            text,
            thread_id: msg.thread_id.clone(),
            meta: HashMap::new(),
        };
        let result = retry(&cancel, 3, move || {
            let transport = transport.clone();
            let out = out.clone();
            let cancel = cancel.clone();
            async move { transport.send(cancel, out).await }
        })
        .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "send failed after retries");
        }
    }

    async fn audit(&self, action_name: String, sender_id: String, outcome: AuditOutcome, duration_ms: u64) {
        let entry = AuditEntry { action_name, sender_id, outcome, duration_ms };
        if let Some(sink) = &self.options.audit_sink {
            sink.record(&entry);
        }
        if let Some(store) = &self.options.store {
            if let Err(e) = store.append_audit(entry).await {
                tracing::warn!(error = %e, "append_audit failed");
            }
        }
    }

    fn help_text(&self) -> String {
        let mut lines = vec!["Commands: /new, /use <id>, /status, /help".to_string()];
        for line in self.actions.help_lines() {
            if !line.is_empty() {
                lines.push(line);
            }
        }
        lines.join("\n")
    }

    async fn status_text(&self, sender: &str) -> String {
        if let Some(store) = &self.options.store {
            match store.active(sender).await {
                Ok(Some(state)) => {
                    return format!(
                        "Active session: {} (updated {})",
                        state.session_id,
                        state.updated_at.to_rfc3339()
                    );
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "active lookup failed"),
            }
        }
        "No active session. Send a prompt to start one or /new to reset.".to_string()
    }

    async fn use_command(&self, sender: &str, id: &str) -> String {
        let id = id.trim();
        if id.is_empty() {
            return "Usage: /use <session-id>".to_string();
        }
        if let Some(store) = &self.options.store {
            if let Err(e) = store.save_active(sender, id).await {
                tracing::warn!(error = %e, "save_active failed");
                return format!("Failed to switch session: {e}");
            }
        }
        format!("Switched to session {id}")
    }

    async fn shell_command(&self, cancel: CancellationToken, args: &str) -> String {
        let Some(action) = self.actions.get("shell") else {
            return "shell action is not registered".to_string();
        };
        let payload = serde_json::json!({ "command": args });
        match tokio::time::timeout(self.options.action_timeout, action.invoke(cancel, payload)).await {
            Ok(Ok(value)) => value_to_text(&value),
            Ok(Err(e)) => format!("shell error: {e}"),
            Err(_) => "shell error: timed out".to_string(),
        }
    }
}

fn value_to_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Reads `event_ts` from inbound metadata (RFC3339 string or unix seconds),
/// falling back to now when absent or unparsable.
fn event_timestamp(msg: &InboundMessage) -> chrono::DateTime<chrono::Utc> {
    if let Some(raw) = msg.meta.get("event_ts") {
        if let Some(s) = raw.as_str() {
            if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
                return dt.with_timezone(&chrono::Utc);
            }
        }
        if let Some(secs) = raw.as_i64() {
            if let Some(dt) = chrono::DateTime::from_timestamp(secs, 0) {
                return dt;
            }
        }
    }
    chrono::Utc::now()
}

/// Truncates to `max_chars` Unicode scalar values (not bytes), appending a
/// marker. `max_chars == 0` means no limit (spec §6/§9).
fn truncate_scalar(text: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return text.to_string();
    }
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...\n(truncated)");
    out
}
