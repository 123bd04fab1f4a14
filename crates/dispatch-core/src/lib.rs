// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod command;
mod contracts;
mod dispatcher;
mod error;
mod retry;
mod sender_lock;
mod types;

pub use command::{parse as parse_command, Command, CommandName};
pub use contracts::{Action, ActionLookup, Agent, AuditSink, Store, Transport};
pub use dispatcher::{Dispatcher, DispatcherOptions};
pub use error::DispatcherError;
pub use retry::retry;
pub use sender_lock::SenderLocks;
pub use types::{
    ActionCall, ActionSpec, AgentRequest, AgentResponse, AuditEntry, AuditOutcome, InboundMessage,
    MessageTurn, OutboundMessage, SessionState,
};
