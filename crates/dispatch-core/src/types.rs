// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A message entering the dispatcher from a transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub transport_id: String,
    pub sender_id: String,
    pub text: String,
    pub thread_id: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub meta: HashMap<String, Value>,
}

/// A message leaving the dispatcher to a transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub transport_id: String,
    pub recipient: String,
    pub text: String,
    pub thread_id: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub meta: HashMap<String, Value>,
}

/// One exchange in an agent's conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageTurn {
    pub role: String,
    pub text: String,
}

/// Advertises an available action to the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSpec {
    pub name: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub description: String,
}

/// Prompt and context supplied to an [`crate::Agent`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRequest {
    pub prompt: String,
    #[serde(default)]
    pub history: Vec<MessageTurn>,
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
    #[serde(default)]
    pub sender_meta: HashMap<String, Value>,
}

/// An agent-requested invocation of an action. `args` is an opaque blob the
/// core never inspects beyond passing it through to the matching [`crate::Action`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionCall {
    pub name: String,
    pub args: Value,
}

/// Produced by an [`crate::Agent`] in response to an [`AgentRequest`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentResponse {
    pub reply: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub action_calls: Vec<ActionCall>,
}

/// The outcome of one audited action invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditOutcome {
    Ok,
    Error,
    Denied,
}

/// A single audit-log record (see spec §3 AuditEntry).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action_name: String,
    pub sender_id: String,
    pub outcome: AuditOutcome,
    pub duration_ms: u64,
}

/// The current session for a sender, as persisted by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}
