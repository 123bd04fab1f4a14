// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::Config;

/// Ordered list of config file locations searched from lowest to highest
/// priority. Later files override earlier ones (spec §10.1).
fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    paths.push(PathBuf::from("/etc/dispatchd/config.yaml"));
    paths.push(PathBuf::from("/etc/dispatchd/config.yml"));

    if let Some(cfg) = dirs::config_dir() {
        paths.push(cfg.join("dispatchd/config.yaml"));
        paths.push(cfg.join("dispatchd/config.yml"));
    }

    paths.push(PathBuf::from(".dispatchd.yaml"));
    paths.push(PathBuf::from(".dispatchd.yml"));
    paths.push(PathBuf::from("dispatchd.yaml"));
    paths.push(PathBuf::from("dispatchd.yml"));

    paths
}

/// Loads configuration by deep-merging every discovered YAML layer, then an
/// explicit `--config` path if given (highest priority).
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());

    for path in config_search_paths() {
        if path.is_file() {
            tracing::debug!(path = %path.display(), "loading config layer");
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let layer: serde_yaml::Value =
                serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
            merge_yaml(&mut merged, layer);
        }
    }

    if let Some(p) = extra {
        tracing::debug!(path = %p.display(), "loading explicit config");
        let text = std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
        let layer: serde_yaml::Value =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", p.display()))?;
        merge_yaml(&mut merged, layer);
    }

    let config: Config = if matches!(merged, serde_yaml::Value::Mapping(ref m) if m.is_empty()) {
        Config::default()
    } else {
        serde_yaml::from_value(merged).context("deserializing merged config")?
    };
    Ok(config)
}

/// Deep-merges `src` into `dst`; `src` wins on scalar conflicts.
fn merge_yaml(dst: &mut serde_yaml::Value, src: serde_yaml::Value) {
    match (dst, src) {
        (serde_yaml::Value::Mapping(d), serde_yaml::Value::Mapping(s)) => {
            for (k, v) in s {
                let entry = d.entry(k).or_insert(serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
                merge_yaml(entry, v);
            }
        }
        (dst, src) => *dst = src,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn val(s: &str) -> serde_yaml::Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn merge_scalar_src_wins() {
        let mut dst = val("x: 1");
        let src = val("x: 2");
        merge_yaml(&mut dst, src);
        assert_eq!(dst["x"].as_i64(), Some(2));
    }

    #[test]
    fn merge_nested_tables() {
        let mut dst = val("dispatcher:\n  max_reply_chars: 100\n  initial_prompt: hi");
        let src = val("dispatcher:\n  max_reply_chars: 200");
        merge_yaml(&mut dst, src);
        assert_eq!(dst["dispatcher"]["max_reply_chars"].as_i64(), Some(200));
        assert_eq!(dst["dispatcher"]["initial_prompt"].as_str(), Some("hi"));
    }

    #[test]
    fn load_returns_error_when_explicit_path_missing() {
        let result = load(Some(Path::new("/tmp/dispatchd_nonexistent_config_xyz.yaml")));
        assert!(result.is_err());
    }

    #[test]
    fn load_with_no_extra_path_returns_defaults() {
        let cfg = load(None).unwrap();
        assert_eq!(cfg.agent.kind, "echo");
        assert_eq!(cfg.dispatcher.req_timeout_secs, 15 * 60);
    }

    #[test]
    fn load_explicit_file_overrides_defaults() {
        use std::io::Write;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "dispatcher:\n  max_reply_chars: 500\nlogging:\n  level: debug").unwrap();
        let cfg = load(Some(f.path())).unwrap();
        assert_eq!(cfg.dispatcher.max_reply_chars, 500);
        assert_eq!(cfg.logging.level, "debug");
    }
}
