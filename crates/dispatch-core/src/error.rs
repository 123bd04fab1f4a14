// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

/// Error taxonomy named by the dispatcher core (spec §7). Collaborator
/// crates (store, actions, transports) define their own error enums and
/// convert into this one at the boundary the core actually touches.
#[derive(Debug, Error)]
pub enum DispatcherError {
    #[error("transport send failed: {0}")]
    TransientTransport(String),

    #[error("transport {0} exited with a fatal error: {1}")]
    FatalTransport(String, String),

    #[error("agent generate failed: {0}")]
    TransientAgent(String),

    #[error("action {0} failed: {1}")]
    ActionError(String, String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("canceled")]
    Cancellation,
}
