// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! SOLO / COOP / REPL feature-flag bundles consumed by the agent loop
//! (§4.9 "Mode bindings"). The loop reads these flags once at the start of
//! a run and does not change behavior mid-run.

use serde::{Deserialize, Serialize};

/// The three top-level execution modes a run may be started in (§6 CLI
/// surface: `--solo` / `--coop` / `--repl`, mutually exclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Unattended single-shot run. Implies wild mode unless the user passed
    /// an opposing flag (§4.4 SOLO-mode policy); disables the question tool
    /// (there is no one to answer it) and keyboard shortcuts.
    Solo,
    /// Interactive terminal session with a human collaborator: keyboard
    /// shortcuts, the question tool, and UI state are all enabled.
    Coop,
    /// Interactive read-eval-print loop: like `Coop` but the process does
    /// not exit after the first task completes (`exit_after_task = false`).
    Repl,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        Self::Solo
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Solo => write!(f, "solo"),
            Self::Coop => write!(f, "coop"),
            Self::Repl => write!(f, "repl"),
        }
    }
}

/// The flag bundle the agent loop reads at the start of a run (§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeConfig {
    pub mode: ExecutionMode,
    pub enable_keyboard_shortcuts: bool,
    pub enable_question_tool: bool,
    pub enable_ui_state: bool,
    /// REPL: false (keeps looping); SOLO/COOP: true (exits after one task).
    pub exit_after_task: bool,
    /// SOLO implies wild mode unless the user explicitly set `--wild`/`-W`
    /// or an opposing path-safety flag (the caller resolves that and passes
    /// the final decision in here; this struct only records the outcome).
    pub wild_mode: bool,
}

impl ModeConfig {
    /// Derive the flag bundle for `mode`. `wild_override` is `Some(v)` when
    /// the user explicitly passed `--wild`/an opposing flag on the CLI;
    /// `None` lets SOLO's implicit-wild-mode default apply (§4.4).
    pub fn from_mode(mode: ExecutionMode, wild_override: Option<bool>) -> Self {
        let wild_mode = wild_override.unwrap_or(matches!(mode, ExecutionMode::Solo));
        match mode {
            ExecutionMode::Solo => Self {
                mode,
                enable_keyboard_shortcuts: false,
                enable_question_tool: false,
                enable_ui_state: false,
                exit_after_task: true,
                wild_mode,
            },
            ExecutionMode::Coop => Self {
                mode,
                enable_keyboard_shortcuts: true,
                enable_question_tool: true,
                enable_ui_state: true,
                exit_after_task: true,
                wild_mode,
            },
            ExecutionMode::Repl => Self {
                mode,
                enable_keyboard_shortcuts: true,
                enable_question_tool: true,
                enable_ui_state: true,
                exit_after_task: false,
                wild_mode,
            },
        }
    }

    /// True iff SOLO mode is implying wild mode without an explicit
    /// `--wild` flag — the caller should emit the one stderr warning this
    /// implies (§4.4 SOLO-mode policy: "the only place the execution mode
    /// influences path safety").
    pub fn is_implicit_wild(&self, wild_override: Option<bool>) -> bool {
        self.mode == ExecutionMode::Solo && wild_override.is_none() && self.wild_mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solo_disables_question_tool_and_shortcuts() {
        let cfg = ModeConfig::from_mode(ExecutionMode::Solo, None);
        assert!(!cfg.enable_question_tool);
        assert!(!cfg.enable_keyboard_shortcuts);
        assert!(cfg.exit_after_task);
    }

    #[test]
    fn solo_implies_wild_mode_by_default() {
        let cfg = ModeConfig::from_mode(ExecutionMode::Solo, None);
        assert!(cfg.wild_mode);
        assert!(cfg.is_implicit_wild(None));
    }

    #[test]
    fn solo_respects_explicit_wild_override() {
        let cfg = ModeConfig::from_mode(ExecutionMode::Solo, Some(false));
        assert!(!cfg.wild_mode);
        assert!(!cfg.is_implicit_wild(Some(false)));
    }

    #[test]
    fn coop_enables_question_tool_and_shortcuts() {
        let cfg = ModeConfig::from_mode(ExecutionMode::Coop, None);
        assert!(cfg.enable_question_tool);
        assert!(cfg.enable_keyboard_shortcuts);
        assert!(!cfg.wild_mode);
        assert!(cfg.exit_after_task);
    }

    #[test]
    fn repl_does_not_exit_after_task() {
        let cfg = ModeConfig::from_mode(ExecutionMode::Repl, None);
        assert!(!cfg.exit_after_task);
        assert!(cfg.enable_ui_state);
    }

    #[test]
    fn only_solo_can_imply_wild_mode() {
        let coop = ModeConfig::from_mode(ExecutionMode::Coop, None);
        assert!(!coop.is_implicit_wild(None));
        let repl = ModeConfig::from_mode(ExecutionMode::Repl, None);
        assert!(!repl.is_implicit_wild(None));
    }

    #[test]
    fn display_matches_cli_flag_names() {
        assert_eq!(ExecutionMode::Solo.to_string(), "solo");
        assert_eq!(ExecutionMode::Coop.to_string(), "coop");
        assert_eq!(ExecutionMode::Repl.to_string(), "repl");
    }
}
