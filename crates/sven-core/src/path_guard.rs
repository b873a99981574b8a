// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Central policy: which filesystem paths a tool may write to (§4.4).
//!
//! Consulted before any filesystem write, edit, or shell command that may
//! mutate the filesystem. Initialized with config-declared allowed-write
//! paths, CLI-declared additional paths (`-P`, repeatable), the session's
//! working directory, and `wild_mode` (from `--wild`, or implied by SOLO
//! mode per §4.4's SOLO-mode policy note).

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::Utc;
use sven_config::PathSafetyConfig;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("path safety: '{path}' is outside all allowed write locations")]
pub struct PathSafetyError {
    pub path: PathBuf,
}

/// Stateful per-session resolver. Allowed prefixes are canonicalized once at
/// construction so later lookups are cheap string-prefix comparisons against
/// an already-resolved absolute path.
#[derive(Debug, Clone)]
pub struct PathGuard {
    allowed_prefixes: Vec<PathBuf>,
    wild_mode: bool,
    audit_log_file: PathBuf,
    audit_denied: bool,
}

impl PathGuard {
    /// `config_paths` — config-declared allowed-write paths (`~` expanded).
    /// `cli_paths` — `-P/--allow-path` values, repeatable.
    /// `workdir` — the session's working directory, always allowed.
    /// `wild_mode` — see §4.4; when true the guard short-circuits to allow.
    pub fn new(
        config: &PathSafetyConfig,
        cli_paths: &[impl AsRef<Path>],
        workdir: impl AsRef<Path>,
        wild_mode: bool,
    ) -> Self {
        let mut allowed_prefixes = Vec::new();
        for p in &config.allowed_write_paths {
            if let Some(expanded) = expand_and_canonicalize(p) {
                allowed_prefixes.push(expanded);
            }
        }
        for p in cli_paths {
            if let Some(expanded) = expand_and_canonicalize(p.as_ref().to_string_lossy().as_ref())
            {
                allowed_prefixes.push(expanded);
            }
        }
        if let Some(wd) = expand_and_canonicalize(workdir.as_ref().to_string_lossy().as_ref()) {
            allowed_prefixes.push(wd);
        }
        let audit_log_file = expand_and_canonicalize(&config.audit_log_file)
            .unwrap_or_else(|| PathBuf::from(shellexpand_tilde(&config.audit_log_file)));
        Self { allowed_prefixes, wild_mode, audit_log_file, audit_denied: config.audit_denied }
    }

    /// SOLO mode implies wild mode unless the user explicitly passed an
    /// opposing flag (§4.4 SOLO-mode policy). The caller is responsible for
    /// emitting the one stderr warning this implies — the guard itself is
    /// agnostic to *why* `wild_mode` ended up true.
    pub fn is_wild(&self) -> bool {
        self.wild_mode
    }

    /// Resolve `target` to absolute canonical form and check containment.
    /// Denials are audited to `audit_log_file` when `audit_denied` is set.
    pub fn check(&self, target: impl AsRef<Path>) -> Result<(), PathSafetyError> {
        if self.wild_mode {
            return Ok(());
        }
        let target = target.as_ref();
        let resolved = canonicalize_best_effort(target);
        let allowed = self
            .allowed_prefixes
            .iter()
            .any(|prefix| resolved.starts_with(prefix));
        if allowed {
            return Ok(());
        }
        if self.audit_denied {
            self.append_audit(&resolved);
        }
        Err(PathSafetyError { path: resolved })
    }

    fn append_audit(&self, path: &Path) {
        if let Some(parent) = self.audit_log_file.parent() {
            let _ = fs::create_dir_all(parent);
        }
        if let Ok(mut f) = fs::OpenOptions::new().create(true).append(true).open(&self.audit_log_file) {
            let _ = writeln!(f, "{} DENY {}", Utc::now().to_rfc3339(), path.display());
        }
    }
}

fn shellexpand_tilde(path: &str) -> String {
    shellexpand::tilde(path).into_owned()
}

fn expand_and_canonicalize(path: &str) -> Option<PathBuf> {
    let expanded = shellexpand_tilde(path);
    let p = PathBuf::from(expanded);
    Some(canonicalize_best_effort(&p))
}

/// Canonicalize when the path exists; otherwise normalize lexically (a
/// write target often does not exist yet — `fs::canonicalize` would fail).
fn canonicalize_best_effort(path: &Path) -> PathBuf {
    if let Ok(c) = fs::canonicalize(path) {
        return c;
    }
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().unwrap_or_default().join(path)
    };
    normalize_lexically(&absolute)
}

fn normalize_lexically(path: &Path) -> PathBuf {
    use std::path::Component;
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}
