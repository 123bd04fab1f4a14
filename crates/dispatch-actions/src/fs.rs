// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dispatch_core::{Action, DispatcherError};
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Canonicalizes `requested` (or its parent, when it need not yet exist) and
/// checks it falls under one of `roots`. Empty `roots` allows any path.
/// Canonicalizing — rather than a lexical prefix check — is what actually
/// defeats a `../` escape (`fs.go`'s `safePath`).
fn resolve_within(roots: &[PathBuf], requested: &Path, must_exist: bool) -> anyhow::Result<PathBuf> {
    if roots.is_empty() {
        return Ok(requested.to_path_buf());
    }
    let canon_roots: Vec<PathBuf> = roots.iter().filter_map(|r| std::fs::canonicalize(r).ok()).collect();
    let within = |candidate: &Path| canon_roots.iter().any(|r| candidate.starts_with(r));

    if must_exist {
        let canon = std::fs::canonicalize(requested)
            .map_err(|e| DispatcherError::ActionError("fs".into(), format!("cannot resolve path: {e}")))?;
        if !within(&canon) {
            return Err(DispatcherError::ActionError("fs".into(), "path escapes configured roots".into()).into());
        }
        Ok(canon)
    } else {
        let parent = requested.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
        let canon_parent = std::fs::canonicalize(parent)
            .map_err(|e| DispatcherError::ActionError("fs".into(), format!("cannot resolve parent dir: {e}")))?;
        if !within(&canon_parent) {
            return Err(DispatcherError::ActionError("fs".into(), "path escapes configured roots".into()).into());
        }
        let filename = requested
            .file_name()
            .ok_or_else(|| DispatcherError::InvalidInput("path must name a file".into()))?;
        Ok(canon_parent.join(filename))
    }
}

fn is_binary(data: &[u8]) -> bool {
    data.contains(&0)
}

#[derive(Debug, Deserialize)]
struct ReadPayload {
    path: String,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

/// Reads a text file with line-numbered, paginated output. Rejects binary
/// files and anything over `max_bytes`.
pub struct ReadFileAction {
    roots: Vec<PathBuf>,
    max_bytes: usize,
    default_limit: usize,
}

impl ReadFileAction {
    pub fn new(roots: Vec<PathBuf>, max_bytes: usize, default_limit: usize) -> Self {
        Self { roots, max_bytes, default_limit }
    }
}

impl Default for ReadFileAction {
    fn default() -> Self {
        Self::new(Vec::new(), 20_000, 200)
    }
}

#[async_trait]
impl Action for ReadFileAction {
    fn name(&self) -> &str {
        "read_file"
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["fs_read".to_string()]
    }

    fn help(&self) -> &str {
        "read a text file: {\"path\", \"offset\", \"limit\"}"
    }

    async fn invoke(&self, _cancel: CancellationToken, args: Value) -> anyhow::Result<Value> {
        let payload: ReadPayload = serde_json::from_value(args)
            .map_err(|e| DispatcherError::InvalidInput(format!("read_file payload: {e}")))?;
        let requested = PathBuf::from(&payload.path);
        let resolved = resolve_within(&self.roots, &requested, true)?;

        let data = tokio::fs::read(&resolved)
            .await
            .map_err(|e| DispatcherError::ActionError("read_file".into(), e.to_string()))?;
        if data.len() > self.max_bytes {
            return Err(DispatcherError::ActionError("read_file".into(), "file too large".into()).into());
        }
        if is_binary(&data) {
            return Err(DispatcherError::ActionError("read_file".into(), "binary file not supported".into()).into());
        }

        let text = String::from_utf8_lossy(&data);
        let lines: Vec<&str> = text.lines().collect();
        let offset = payload.offset.unwrap_or(0);
        let limit = payload.limit.unwrap_or(self.default_limit);

        let rendered: String = lines
            .iter()
            .skip(offset)
            .take(limit)
            .enumerate()
            .map(|(i, line)| format!("{:>6} | {}", offset + i + 1, line))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(Value::String(rendered))
    }
}

#[derive(Debug, Deserialize)]
struct WritePayload {
    path: String,
    content: String,
}

/// Writes a text file. Disabled unless `allow_write` is set at construction
/// (spec §4.4a; `fs.go`'s `AllowWrite` flag).
pub struct WriteFileAction {
    roots: Vec<PathBuf>,
    max_bytes: usize,
    allow_write: bool,
}

impl WriteFileAction {
    pub fn new(roots: Vec<PathBuf>, max_bytes: usize, allow_write: bool) -> Self {
        Self { roots, max_bytes, allow_write }
    }
}

impl Default for WriteFileAction {
    fn default() -> Self {
        Self::new(Vec::new(), 20_000, false)
    }
}

#[async_trait]
impl Action for WriteFileAction {
    fn name(&self) -> &str {
        "write_file"
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["fs_write".to_string()]
    }

    fn help(&self) -> &str {
        "write a text file: {\"path\", \"content\"}"
    }

    async fn invoke(&self, _cancel: CancellationToken, args: Value) -> anyhow::Result<Value> {
        if !self.allow_write {
            return Err(DispatcherError::ActionError("write_file".into(), "writing is disabled".into()).into());
        }
        let payload: WritePayload = serde_json::from_value(args)
            .map_err(|e| DispatcherError::InvalidInput(format!("write_file payload: {e}")))?;
        if payload.content.len() > self.max_bytes {
            return Err(DispatcherError::ActionError("write_file".into(), "content too large".into()).into());
        }
        let requested = PathBuf::from(&payload.path);
        let resolved = resolve_within(&self.roots, &requested, false)?;
        tokio::fs::write(&resolved, payload.content.as_bytes())
            .await
            .map_err(|e| DispatcherError::ActionError("write_file".into(), e.to_string()))?;
        Ok(Value::String("ok".to_string()))
    }
}
