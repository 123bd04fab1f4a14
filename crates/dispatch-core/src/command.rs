// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
/// A parsed user instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandName {
    Run,
    New,
    Use,
    Status,
    Help,
    Shell,
}

/// The result of [`Command::parse`]. `raw` always holds the original input,
/// whatever branch matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: CommandName,
    pub args: String,
    pub raw: String,
}

/// Parses `msg` into a [`Command`]. Recognized prefixes are case-insensitive
/// with an optional leading `/`; everything else falls through to `Run` with
/// the entire trimmed text as `args`.
///
/// `shell_registered` gates the `shell` prefix: it is only recognized as a
/// command when a `shell` action is registered, otherwise `shell echo hi`
/// falls through to `Run` like any other text (spec §4.5).
pub fn parse(msg: &str, shell_registered: bool) -> Command {
    let trimmed = msg.trim();
    let lower = trimmed.to_lowercase();

    let strip = |prefix_with_slash: &str, prefix_bare: &str| -> Option<String> {
        if lower.starts_with(prefix_with_slash) {
            Some(trimmed[prefix_with_slash.len()..].trim().to_string())
        } else if lower.starts_with(prefix_bare) {
            Some(trimmed[prefix_bare.len()..].trim().to_string())
        } else {
            None
        }
    };

    if shell_registered {
        if let Some(args) = strip("/shell", "shell") {
            return Command {
                name: CommandName::Shell,
                args,
                raw: msg.to_string(),
            };
        }
    }
    if let Some(args) = strip("/new", "new") {
        return Command {
            name: CommandName::New,
            args,
            raw: msg.to_string(),
        };
    }
    if let Some(args) = strip("/reset", "reset") {
        return Command {
            name: CommandName::New,
            args,
            raw: msg.to_string(),
        };
    }
    if let Some(args) = strip("/use", "use") {
        return Command {
            name: CommandName::Use,
            args,
            raw: msg.to_string(),
        };
    }
    if lower.starts_with("/status") || lower.starts_with("status") {
        return Command {
            name: CommandName::Status,
            args: String::new(),
            raw: msg.to_string(),
        };
    }
    if lower.starts_with("/help") || lower.starts_with("help") {
        return Command {
            name: CommandName::Help,
            args: String::new(),
            raw: msg.to_string(),
        };
    }

    Command {
        name: CommandName::Run,
        args: trimmed.to_string(),
        raw: msg.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_with_slash_and_args() {
        let c = parse("/new hello world", false);
        assert_eq!(c.name, CommandName::New);
        assert_eq!(c.args, "hello world");
    }

    #[test]
    fn new_bare_no_args() {
        let c = parse("new", false);
        assert_eq!(c.name, CommandName::New);
        assert_eq!(c.args, "");
    }

    #[test]
    fn reset_maps_to_new() {
        let c = parse("/reset", false);
        assert_eq!(c.name, CommandName::New);
    }

    #[test]
    fn use_requires_id() {
        let c = parse("use abc123", false);
        assert_eq!(c.name, CommandName::Use);
        assert_eq!(c.args, "abc123");
    }

    #[test]
    fn status_case_insensitive() {
        let c = parse("STATUS", false);
        assert_eq!(c.name, CommandName::Status);
    }

    #[test]
    fn help_with_slash() {
        let c = parse("/HELP", false);
        assert_eq!(c.name, CommandName::Help);
    }

    #[test]
    fn anything_else_is_run() {
        let c = parse("  what's the weather  ", false);
        assert_eq!(c.name, CommandName::Run);
        assert_eq!(c.args, "what's the weather");
    }

    #[test]
    fn shell_not_recognized_unless_registered() {
        let c = parse("/shell echo hi", false);
        assert_eq!(c.name, CommandName::Run);
        assert_eq!(c.args, "/shell echo hi");
    }

    #[test]
    fn shell_recognized_when_registered() {
        let c = parse("/shell echo hi", true);
        assert_eq!(c.name, CommandName::Shell);
        assert_eq!(c.args, "echo hi");
    }

    #[test]
    fn shell_bare_prefix_when_registered() {
        let c = parse("shell ls -la", true);
        assert_eq!(c.name, CommandName::Shell);
        assert_eq!(c.args, "ls -la");
    }

    #[test]
    fn raw_preserves_original() {
        let c = parse("  /New foo  ", false);
        assert_eq!(c.raw, "  /New foo  ");
    }
}
