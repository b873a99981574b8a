// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! [`AgentBuilder`] — single entry point for constructing a fully wired Agent.
//!
//! Callers pass a [`Config`], an optional [`RuntimeContext`], the desired
//! mode and model, and a [`ToolSetProfile`].  The builder handles registry
//! construction and [`AgentRuntimeContext`] population internally.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use sven_config::{AgentMode, Config};
use sven_core::{Agent, AgentRuntimeContext, Dispatcher, PathGuard};
use sven_model::ModelProvider;
use sven_tools::{events::ToolEvent, ToolPolicy};

use crate::context::{RuntimeContext, ToolSetProfile};
use crate::registry::build_tool_registry;

/// Constructs a fully wired [`Agent`] from configuration and runtime context.
///
/// # Example
/// ```rust,ignore
/// let agent = AgentBuilder::new(config)
///     .with_runtime_context(RuntimeContext::auto_detect())
///     .build(mode, model, ToolSetProfile::Full { ... });
/// ```
pub struct AgentBuilder {
    config: Arc<Config>,
    runtime_ctx: RuntimeContext,
    wild_mode: bool,
    cli_allow_paths: Vec<PathBuf>,
}

impl AgentBuilder {
    /// Create a builder with the given configuration.
    /// Runtime context defaults to empty (no project/git/CI detection).
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            runtime_ctx: RuntimeContext::empty(),
            wild_mode: false,
            cli_allow_paths: Vec::new(),
        }
    }

    /// Set the runtime context (project root, git, CI environment).
    pub fn with_runtime_context(mut self, ctx: RuntimeContext) -> Self {
        self.runtime_ctx = ctx;
        self
    }

    /// Configure the Path Guard's `wild_mode` (`--wild`/`-W`, or SOLO's
    /// implicit default) and any extra `--allow-path` prefixes from the CLI.
    pub fn with_path_safety(mut self, wild_mode: bool, cli_allow_paths: Vec<PathBuf>) -> Self {
        self.wild_mode = wild_mode;
        self.cli_allow_paths = cli_allow_paths;
        self
    }

    /// Build the [`Agent`] with the given mode, model, and tool-set profile.
    ///
    /// This method owns the creation of the shared mode lock and tool-event
    /// channel so that `SwitchModeTool` / `TodoWriteTool` and the agent loop
    /// operate on **the same** instances:
    ///
    /// 1. Creates `mode_lock` (same Arc for both the registry and the Agent).
    /// 2. Creates `(tool_event_tx, tool_event_rx)` (tx → tools, rx → Agent).
    /// 3. Converts [`RuntimeContext`] → [`AgentRuntimeContext`].
    /// 4. Builds a [`ToolRegistry`] via `build_tool_registry`.
    /// 5. Constructs `Agent::new(...)`.
    pub fn build(
        self,
        mode: AgentMode,
        model: Arc<dyn ModelProvider>,
        profile: ToolSetProfile,
    ) -> Agent {
        // Shared mode lock: SwitchModeTool holds a clone; the agent owns it.
        let mode_lock = Arc::new(Mutex::new(mode));
        // Shared event channel: tools send, agent drains.
        let (tool_event_tx, tool_event_rx) = mpsc::channel::<ToolEvent>(64);

        // Path Guard's workdir is always an implicit allowed prefix (§4.4);
        // resolved before `runtime_ctx.project_root` is moved below.
        let workdir = self
            .runtime_ctx
            .project_root
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());

        // Convert RuntimeContext → AgentRuntimeContext (the sven-core type).
        let runtime = AgentRuntimeContext {
            project_root: self.runtime_ctx.project_root,
            git_context_note: self.runtime_ctx.git_context
                .and_then(|g| g.to_prompt_section()),
            ci_context_note: self.runtime_ctx.ci_context
                .and_then(|c| c.to_prompt_section()),
            project_context_file: self.runtime_ctx.project_context_file,
            append_system_prompt: self.runtime_ctx.append_system_prompt,
            system_prompt_override: self.runtime_ctx.system_prompt_override,
        };

        // Pass runtime.clone() as sub_agent_runtime so TaskTool sub-agents
        // inherit the parent's project root, AGENTS.md, CI/git context.
        let (registry, batch_dispatch_slot) = build_tool_registry(
            &self.config,
            model.clone(),
            profile,
            mode_lock.clone(),
            tool_event_tx,
            runtime.clone(),
        );

        // Resolve context window: explicit config/env override, then the
        // static catalog, then a conservative fallback.
        let context_window = self
            .config
            .model
            .context_window
            .or_else(|| model.catalog_context_window())
            .unwrap_or(128_000) as usize;

        let registry = Arc::new(registry);

        // Gate every live tool call behind path safety and shell-approval
        // policy (§4.4, §4.6) — without this every call would bypass the
        // registry's gates entirely.
        let policy = ToolPolicy::from_config(&self.config.tools);
        let path_guard = PathGuard::new(
            &self.config.path_safety,
            &self.cli_allow_paths,
            &workdir,
            self.wild_mode,
        );
        let dispatcher = Arc::new(Dispatcher::new(registry.clone(), policy, Some(path_guard)));

        // `batch`'s sub-calls route through this same dispatcher (§4.6),
        // so its sub-calls face the same path-safety and shell-approval
        // gates the outer `batch` call itself went through.
        if let Some(slot) = &batch_dispatch_slot {
            slot.bind(dispatcher.clone());
        }

        Agent::new(
            model,
            registry,
            Arc::new(self.config.agent.clone()),
            runtime,
            mode_lock,
            tool_event_rx,
            context_window,
        )
        .with_dispatcher(dispatcher)
    }
}
