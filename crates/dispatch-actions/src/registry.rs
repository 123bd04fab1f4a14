// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use dispatch_core::{Action, ActionLookup, ActionSpec};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("action {0} already registered")]
    Duplicate(String),
}

/// Frozen-after-construction map of action name to implementation.
///
/// Unlike a tool registry that silently overwrites on re-registration, a
/// duplicate name here is an initialization error (spec §4.4) — two actions
/// racing for the same name is treated as a wiring mistake, not a feature.
#[derive(Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, action: Arc<dyn Action>) -> Result<(), RegistryError> {
        let name = action.name().to_string();
        if self.actions.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        self.actions.insert(name, action);
        Ok(())
    }
}

impl ActionLookup for ActionRegistry {
    fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(name).cloned()
    }

    fn specs(&self) -> Vec<ActionSpec> {
        self.actions
            .values()
            .map(|a| ActionSpec {
                name: a.name().to_string(),
                capabilities: a.capabilities(),
                description: a.help().to_string(),
            })
            .collect()
    }

    fn help_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .actions
            .values()
            .filter_map(|a| {
                let help = a.help();
                if help.is_empty() {
                    None
                } else {
                    Some(format!("/{}: {}", a.name(), help))
                }
            })
            .collect();
        lines.sort();
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;
    use tokio_util::sync::CancellationToken;

    struct Stub(&'static str);

    #[async_trait]
    impl Action for Stub {
        fn name(&self) -> &str {
            self.0
        }
        fn capabilities(&self) -> Vec<String> {
            vec![]
        }
        async fn invoke(&self, _cancel: CancellationToken, _args: Value) -> anyhow::Result<Value> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut reg = ActionRegistry::new();
        reg.register(Arc::new(Stub("shell"))).unwrap();
        assert!(reg.has("shell"));
        assert!(!reg.has("read_file"));
    }

    #[test]
    fn duplicate_registration_is_an_error() {
        let mut reg = ActionRegistry::new();
        reg.register(Arc::new(Stub("shell"))).unwrap();
        let err = reg.register(Arc::new(Stub("shell"))).unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate(name) if name == "shell"));
    }

    #[test]
    fn specs_reflect_registered_actions() {
        let mut reg = ActionRegistry::new();
        reg.register(Arc::new(Stub("shell"))).unwrap();
        reg.register(Arc::new(Stub("read_file"))).unwrap();
        let names: Vec<_> = reg.specs().into_iter().map(|s| s.name).collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"shell".to_string()));
    }
}
