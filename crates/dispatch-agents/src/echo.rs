// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use dispatch_core::{Agent, AgentRequest, AgentResponse};
use tokio_util::sync::CancellationToken;

/// Echoes the prompt back as the reply. Never fails, never calls an action.
///
/// `sticky_session`, when set, is returned as every response's `session_id`
/// instead of the empty string the reference agent uses — useful for test
/// scenarios that exercise `/status` and `/use` against a stable session id
/// without a real agent backing it.
pub struct EchoAgent {
    sticky_session: Option<String>,
}

impl EchoAgent {
    pub fn new() -> Self {
        Self { sticky_session: None }
    }

    pub fn with_sticky_session(session_id: impl Into<String>) -> Self {
        Self { sticky_session: Some(session_id.into()) }
    }
}

impl Default for EchoAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for EchoAgent {
    async fn generate(
        &self,
        _cancel: CancellationToken,
        req: AgentRequest,
    ) -> anyhow::Result<AgentResponse> {
        Ok(AgentResponse {
            reply: req.prompt,
            session_id: self.sticky_session.clone().unwrap_or_default(),
            action_calls: Vec::new(),
        })
    }
}
