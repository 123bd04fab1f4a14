// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

fn default_req_timeout_secs() -> u64 {
    15 * 60
}

fn default_action_timeout_secs() -> u64 {
    2 * 60
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_bytes() -> usize {
    20_000
}

fn default_read_limit() -> usize {
    200
}

fn default_shell_timeout_secs() -> u64 {
    30
}

fn default_shell_max_output() -> usize {
    8000
}

/// Top-level configuration, assembled by deep-merging every discovered YAML
/// layer (spec §10.1).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub dispatcher: DispatcherSection,
    #[serde(default)]
    pub transports: Vec<TransportSpec>,
    #[serde(default)]
    pub actions: ActionsSection,
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSection {
    /// Path to the SQLite database file. Empty disables persistence: the
    /// dispatcher runs with no [`dispatch_core::Store`] wired.
    #[serde(default)]
    pub path: String,
    /// Cap on the audit ring; oldest entries are evicted past this count.
    #[serde(default = "default_audit_cap")]
    pub audit_cap: usize,
}

fn default_audit_cap() -> usize {
    1000
}

impl Default for StoreSection {
    fn default() -> Self {
        Self { path: String::new(), audit_cap: default_audit_cap() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherSection {
    #[serde(default = "default_req_timeout_secs")]
    pub req_timeout_secs: u64,
    #[serde(default = "default_action_timeout_secs")]
    pub action_timeout_secs: u64,
    #[serde(default)]
    pub allowed_senders: Vec<String>,
    #[serde(default)]
    pub allowed_actions: Vec<String>,
    /// 0 means sessions never expire.
    #[serde(default)]
    pub session_timeout_mins: u64,
    #[serde(default)]
    pub initial_prompt: String,
    /// 0 means replies are never truncated.
    #[serde(default)]
    pub max_reply_chars: usize,
}

impl Default for DispatcherSection {
    fn default() -> Self {
        Self {
            req_timeout_secs: default_req_timeout_secs(),
            action_timeout_secs: default_action_timeout_secs(),
            allowed_senders: Vec::new(),
            allowed_actions: Vec::new(),
            session_timeout_mins: 0,
            initial_prompt: String::new(),
            max_reply_chars: 0,
        }
    }
}

/// One configured transport instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportSpec {
    /// "mock" or "stdio".
    pub kind: String,
    #[serde(default)]
    pub id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionsSection {
    #[serde(default)]
    pub shell: Option<ShellSection>,
    #[serde(default)]
    pub read_file: Option<ReadFileSection>,
    #[serde(default)]
    pub write_file: Option<WriteFileSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellSection {
    /// Empty allows every command.
    #[serde(default)]
    pub allowed: Vec<String>,
    #[serde(default)]
    pub workdir: Option<String>,
    #[serde(default = "default_shell_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_shell_max_output")]
    pub max_output: usize,
}

impl Default for ShellSection {
    fn default() -> Self {
        Self {
            allowed: Vec::new(),
            workdir: None,
            timeout_secs: default_shell_timeout_secs(),
            max_output: default_shell_max_output(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadFileSection {
    /// Empty allows reading anywhere the process can see.
    #[serde(default)]
    pub roots: Vec<String>,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
    #[serde(default = "default_read_limit")]
    pub default_limit: usize,
}

impl Default for ReadFileSection {
    fn default() -> Self {
        Self { roots: Vec::new(), max_bytes: default_max_bytes(), default_limit: default_read_limit() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteFileSection {
    #[serde(default)]
    pub roots: Vec<String>,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
    #[serde(default)]
    pub allow_write: bool,
}

impl Default for WriteFileSection {
    fn default() -> Self {
        Self { roots: Vec::new(), max_bytes: default_max_bytes(), allow_write: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    /// Only "echo" ships as a reference implementation.
    #[serde(default = "default_agent_kind")]
    pub kind: String,
    #[serde(default)]
    pub sticky_session: Option<String>,
}

fn default_agent_kind() -> String {
    "echo".to_string()
}

impl Default for AgentSection {
    fn default() -> Self {
        Self { kind: default_agent_kind(), sticky_session: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}
