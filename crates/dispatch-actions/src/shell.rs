// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use dispatch_core::{Action, DispatcherError};
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Deserialize)]
struct ShellPayload {
    command: String,
}

/// Runs a shell command via `bash -lc`. Empty `allowed` means every command
/// is permitted; otherwise `command` must start with one of the configured
/// prefixes (spec §4.4a / `shell.go`'s `Allowed` list).
pub struct ShellAction {
    allowed: Vec<String>,
    workdir: Option<PathBuf>,
    timeout: Duration,
    max_output: usize,
}

impl ShellAction {
    pub fn new(allowed: Vec<String>, workdir: Option<PathBuf>, timeout: Duration, max_output: usize) -> Self {
        Self { allowed, workdir, timeout, max_output }
    }

    fn command_allowed(&self, cmd: &str) -> bool {
        self.allowed.is_empty() || self.allowed.iter().any(|prefix| cmd.starts_with(prefix.as_str()))
    }
}

impl Default for ShellAction {
    fn default() -> Self {
        Self::new(Vec::new(), None, Duration::from_secs(30), 8000)
    }
}

#[async_trait]
impl Action for ShellAction {
    fn name(&self) -> &str {
        "shell"
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["shell".to_string()]
    }

    fn help(&self) -> &str {
        "run a shell command: {\"command\": \"<cmd>\"}"
    }

    async fn invoke(&self, cancel: CancellationToken, args: Value) -> anyhow::Result<Value> {
        let payload: ShellPayload = serde_json::from_value(args)
            .map_err(|e| DispatcherError::InvalidInput(format!("shell payload: {e}")))?;
        let cmd = payload.command.trim();
        if cmd.is_empty() {
            return Err(DispatcherError::InvalidInput("command must not be empty".into()).into());
        }
        if !self.command_allowed(cmd) {
            return Err(DispatcherError::ActionError(
                "shell".into(),
                format!("command not in allowlist: {cmd}"),
            )
            .into());
        }

        let mut command = tokio::process::Command::new("bash");
        command.arg("-lc").arg(cmd);
        if let Some(dir) = &self.workdir {
            command.current_dir(dir);
        }
        command.kill_on_drop(true);

        let output = tokio::select! {
            _ = cancel.cancelled() => return Err(DispatcherError::Cancellation.into()),
            result = tokio::time::timeout(self.timeout, command.output()) => match result {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => return Err(DispatcherError::ActionError("shell".into(), e.to_string()).into()),
                Err(_) => return Err(DispatcherError::ActionError("shell".into(), "timed out".into()).into()),
            },
        };

        let code = output.status.code().unwrap_or(-1);
        let combined = combine_output(&output.stdout, &output.stderr);
        let truncated = head_tail_truncate(&combined, self.max_output);

        if code >= 2 {
            return Err(DispatcherError::ActionError("shell".into(), format!("exit={code}\n{truncated}")).into());
        }
        let rendered = if code == 1 {
            format!("(exit 1)\n{truncated}")
        } else {
            truncated
        };
        Ok(Value::String(rendered))
    }
}

fn combine_output(stdout: &[u8], stderr: &[u8]) -> String {
    let out = String::from_utf8_lossy(stdout);
    let err = String::from_utf8_lossy(stderr);
    if err.trim().is_empty() {
        out.into_owned()
    } else if out.trim().is_empty() {
        err.into_owned()
    } else {
        format!("{out}\n{err}")
    }
}

/// Keeps the first and last `max/2` characters with a marker in between,
/// avoiding a mid-codepoint split.
fn head_tail_truncate(text: &str, max: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max || max == 0 {
        return text.to_string();
    }
    let half = max / 2;
    let head: String = chars[..half].iter().collect();
    let tail: String = chars[chars.len() - half..].iter().collect();
    format!("{head}\n...[truncated]...\n{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_simple_command() {
        let action = ShellAction::default();
        let result = action
            .invoke(CancellationToken::new(), serde_json::json!({"command": "echo hi"}))
            .await
            .unwrap();
        assert_eq!(result, Value::String("hi\n".to_string()));
    }

    #[tokio::test]
    async fn exit_one_is_annotated_not_errored() {
        let action = ShellAction::default();
        let result = action
            .invoke(CancellationToken::new(), serde_json::json!({"command": "grep nomatch /dev/null"}))
            .await
            .unwrap();
        assert!(matches!(result, Value::String(s) if s.starts_with("(exit 1)")));
    }

    #[tokio::test]
    async fn exit_two_plus_is_an_error() {
        let action = ShellAction::default();
        let result = action
            .invoke(CancellationToken::new(), serde_json::json!({"command": "exit 7"}))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn empty_command_is_invalid_input() {
        let action = ShellAction::default();
        let result = action
            .invoke(CancellationToken::new(), serde_json::json!({"command": "  "}))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn disallowed_prefix_is_denied() {
        let action = ShellAction::new(vec!["echo".to_string()], None, Duration::from_secs(5), 8000);
        let result = action
            .invoke(CancellationToken::new(), serde_json::json!({"command": "rm -rf /"}))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn allowed_prefix_passes() {
        let action = ShellAction::new(vec!["echo".to_string()], None, Duration::from_secs(5), 8000);
        let result = action
            .invoke(CancellationToken::new(), serde_json::json!({"command": "echo ok"}))
            .await;
        assert!(result.is_ok());
    }

    #[test]
    fn truncate_keeps_head_and_tail() {
        let long = "a".repeat(100);
        let truncated = head_tail_truncate(&long, 10);
        assert!(truncated.contains("...[truncated]..."));
        assert!(truncated.starts_with("aaaaa"));
    }
}
