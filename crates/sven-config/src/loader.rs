// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::Config;

/// Ordered list of config file locations searched from lowest to highest priority.
/// Later files override earlier ones.
fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // 1. System-wide default
    paths.push(PathBuf::from("/etc/sven/config.yaml"));
    paths.push(PathBuf::from("/etc/sven/config.yml"));

    // 2. XDG / home
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config/sven/config.yaml"));
        paths.push(home.join(".config/sven/config.yml"));
    }
    if let Some(cfg) = dirs::config_dir() {
        paths.push(cfg.join("sven/config.yaml"));
        paths.push(cfg.join("sven/config.yml"));
    }

    // 3. Workspace-local
    paths.push(PathBuf::from(".sven/config.yaml"));
    paths.push(PathBuf::from(".sven/config.yml"));
    paths.push(PathBuf::from(".sven.yaml"));
    paths.push(PathBuf::from(".sven.yml"));
    paths.push(PathBuf::from("sven.yaml"));
    paths.push(PathBuf::from("sven.yml"));

    // 4. The canonical per-user config file. Takes priority over everything
    // above since it's the one location a user actually edits by hand.
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".sven/config.yaml"));
        paths.push(home.join(".sven/config.yml"));
    }

    paths
}

/// Load configuration by merging all discovered YAML files.
/// The `extra` argument may provide an explicit path (e.g. `--config` CLI flag).
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());

    for path in config_search_paths() {
        if path.is_file() {
            debug!(path = %path.display(), "loading config layer");
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let layer: serde_yaml::Value = serde_yaml::from_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?;
            merge_yaml(&mut merged, layer);
        }
    }

    if let Some(p) = extra {
        debug!(path = %p.display(), "loading explicit config");
        let text =
            std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
        let layer: serde_yaml::Value =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", p.display()))?;
        merge_yaml(&mut merged, layer);
    }

    // Deserialize the merged YAML value into Config, falling back to defaults
    // when the merged value is empty (no config files found).
    let mut config: Config = if matches!(merged, serde_yaml::Value::Mapping(ref m) if m.is_empty())
    {
        Config::default()
    } else {
        serde_yaml::from_value(merged).unwrap_or_default()
    };

    apply_env_overrides(&mut config);
    Ok(config)
}

/// Overlay `SVEN_*` environment variables onto an already-loaded config.
///
/// Runs after every YAML layer has been merged, so the environment always
/// wins over file-based config — matching how `--config` and CLI flags are
/// layered elsewhere. Every variable is optional and every parse failure is
/// non-fatal: a malformed value is logged and the existing (file or default)
/// value is kept rather than aborting startup.
fn apply_env_overrides(config: &mut Config) {
    if let Some(v) = env_str("SVEN_API_KEY") {
        config.model.api_key = Some(v);
    }
    if let Some(v) = env_str("SVEN_MODEL") {
        config.model.name = v;
    }
    if let Some(v) = env_str("SVEN_API_BASE") {
        config.model.base_url = Some(v);
    }
    if let Some(v) = env_parsed::<f32>("SVEN_TEMPERATURE") {
        config.model.temperature = Some(v);
    }
    if let Some(v) = env_parsed::<u32>("SVEN_MAX_TOKENS") {
        config.model.max_tokens = Some(v);
    }
    if let Some(v) = env_parsed::<u32>("SVEN_CONTEXT_WINDOW") {
        config.model.context_window = Some(v);
    }
    if let Some(v) = env_bool("SVEN_ENABLE_THINK") {
        config.model.enable_think = v;
    }
    // Comma-separated allowlist of MCP server names to keep enabled; any
    // server in config.mcp.servers not named here is dropped. Unset leaves
    // the file-configured set untouched.
    if let Some(v) = env_str("SVEN_MCP_SERVERS") {
        let allowed: std::collections::HashSet<&str> =
            v.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
        config.mcp.servers.retain(|name, _| allowed.contains(name.as_str()));
    }
}

/// Read an env var, treating an empty string the same as unset.
fn env_str(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Read and parse an env var; logs and falls back to `None` (keeping the
/// existing config value) if the variable is set but unparsable.
fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env_str(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            debug!(key, value = %raw, "ignoring unparsable environment override");
            None
        }
    }
}

/// Read a boolean env var. Accepts the usual truthy/falsy spellings
/// case-insensitively; anything else is logged and ignored.
fn env_bool(key: &str) -> Option<bool> {
    let raw = env_str(key)?;
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            debug!(key, value = %raw, "ignoring unparsable boolean environment override");
            None
        }
    }
}

/// Deep-merge `src` into `dst`; src wins on scalar conflicts.
fn merge_yaml(dst: &mut serde_yaml::Value, src: serde_yaml::Value) {
    match (dst, src) {
        (serde_yaml::Value::Mapping(d), serde_yaml::Value::Mapping(s)) => {
            for (k, v) in s {
                let entry = d
                    .entry(k)
                    .or_insert(serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
                merge_yaml(entry, v);
            }
        }
        (dst, src) => *dst = src,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
