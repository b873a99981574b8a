// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Gates every tool call behind path safety, shell-command policy, and
//! file-modification race detection before delegating to the registry
//! (§4.4, §4.5).
//!
//! `sven-core` depends on `sven-tools`, not the other way around, so this
//! wrapper — not the individual builtin tools — is where the gates live.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use sven_tools::{ApprovalPolicy, ToolCall, ToolExecutor, ToolOutput, ToolPolicy, ToolRegistry};

use crate::file_time_tracker::FileTimeTracker;
use crate::path_guard::PathGuard;

/// Tools whose `path` argument must exist unmodified since it was last
/// observed by a read-class tool in this session.
const WRITE_CLASS_TOOLS: &[&str] = &["write", "edit_file", "delete_file"];
/// Tools whose `path` argument becomes the new baseline after a successful
/// call — both read-class tools and, once they succeed, write-class ones.
const PATH_ARG_TOOLS: &[&str] =
    &["read_file", "read_image", "write", "edit_file", "delete_file"];
/// Tools whose `command`/`cmd` argument is matched against `ToolPolicy`.
const SHELL_CLASS_TOOLS: &[&str] = &["shell", "run_terminal_command"];

/// Wraps a [`ToolRegistry`] with the path-safety, shell-approval, and
/// file-race gates every live tool call must pass through.
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    policy: ToolPolicy,
    path_guard: Option<PathGuard>,
    file_tracker: FileTimeTracker,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>, policy: ToolPolicy, path_guard: Option<PathGuard>) -> Self {
        Self { registry, policy, path_guard, file_tracker: FileTimeTracker::new() }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Run the gates for `call`, then dispatch to the registry if they pass.
    pub async fn execute(&self, call: &ToolCall) -> ToolOutput {
        if let Some(denial) = self.gate(call) {
            return ToolOutput::err(&call.id, denial);
        }

        let output = self.registry.execute(call).await;

        if !output.is_error {
            if let Some(path) = path_arg(call) {
                if PATH_ARG_TOOLS.contains(&call.name.as_str()) {
                    self.file_tracker.record(Path::new(&path));
                }
                if call.name == "delete_file" {
                    self.file_tracker.forget(Path::new(&path));
                }
            }
        }

        output
    }

    /// Returns `Some(reason)` if the call must be rejected before running.
    ///
    /// Path safety is checked before the approval gate: a write outside the
    /// allowed paths must surface as a path-safety rejection (and hit the
    /// audit log) even for a tool whose approval policy would otherwise
    /// also reject it.
    fn gate(&self, call: &ToolCall) -> Option<String> {
        if let Some(path) = path_arg(call) {
            if WRITE_CLASS_TOOLS.contains(&call.name.as_str()) {
                if let Some(guard) = &self.path_guard {
                    if let Err(e) = guard.check(&path) {
                        return Some(e.to_string());
                    }
                }
                if let Err(e) = self.file_tracker.check(Path::new(&path)) {
                    return Some(e.to_string());
                }
            }
        }

        if SHELL_CLASS_TOOLS.contains(&call.name.as_str()) {
            let command = call
                .args
                .get("command")
                .or_else(|| call.args.get("cmd"))
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            match self.policy.decide(command) {
                ApprovalPolicy::Deny => {
                    return Some(format!("command denied by policy: {command}"));
                }
                ApprovalPolicy::Ask => {
                    return Some(format!(
                        "command requires user confirmation: {command}"
                    ));
                }
                ApprovalPolicy::Auto => {}
            }
        } else if let Some(tool) = self.registry.get(&call.name) {
            if tool.default_policy() == ApprovalPolicy::Ask {
                return Some(format!(
                    "tool '{}' requires user confirmation",
                    call.name
                ));
            }
        }

        None
    }
}

/// Lets `batch` (in `sven-tools`, which cannot depend on `sven-core`) route
/// its sub-calls through the same gated dispatcher the outer call used —
/// see `sven_tools::LateBoundExecutor`.
#[async_trait]
impl ToolExecutor for Dispatcher {
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        Dispatcher::execute(self, call).await
    }
}

fn path_arg(call: &ToolCall) -> Option<String> {
    call.args.get("path").and_then(|v| v.as_str()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use sven_config::{PathSafetyConfig, ToolsConfig};
    use tempfile::tempdir;

    struct PassthroughWrite;

    #[async_trait]
    impl sven_tools::Tool for PassthroughWrite {
        fn name(&self) -> &str {
            "write"
        }
        fn description(&self) -> &str {
            "test write"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        fn default_policy(&self) -> ApprovalPolicy {
            // Auto here so the path-guard/race-detection tests below exercise
            // only the gate they're named for; approval-gate behavior has its
            // own dedicated test (`non_shell_ask_policy_tool_is_rejected`).
            ApprovalPolicy::Auto
        }
        async fn execute(&self, call: &ToolCall) -> ToolOutput {
            let path = call.args["path"].as_str().unwrap();
            let content = call.args["content"].as_str().unwrap_or("");
            std::fs::write(path, content).unwrap();
            ToolOutput::ok(&call.id, "ok")
        }
    }

    struct PassthroughRead;

    #[async_trait]
    impl sven_tools::Tool for PassthroughRead {
        fn name(&self) -> &str {
            "read_file"
        }
        fn description(&self) -> &str {
            "test read"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        fn default_policy(&self) -> ApprovalPolicy {
            ApprovalPolicy::Auto
        }
        async fn execute(&self, call: &ToolCall) -> ToolOutput {
            let path = call.args["path"].as_str().unwrap();
            match std::fs::read_to_string(path) {
                Ok(s) => ToolOutput::ok(&call.id, s),
                Err(e) => ToolOutput::err(&call.id, e.to_string()),
            }
        }
    }

    fn build_dispatcher(dir: &Path) -> Dispatcher {
        let mut reg = ToolRegistry::new();
        reg.register(PassthroughWrite);
        reg.register(PassthroughRead);
        let policy = ToolPolicy::from_config(&ToolsConfig::default());
        let path_cfg = PathSafetyConfig {
            allowed_write_paths: vec![],
            max_confirmations_per_session: 10,
            audit_denied: false,
            audit_log_file: "/tmp/sven-test-dispatch-audit.log".into(),
        };
        let guard = PathGuard::new(&path_cfg, &[] as &[&str], dir, false);
        Dispatcher::new(Arc::new(reg), policy, Some(guard))
    }

    #[tokio::test]
    async fn write_outside_allowed_paths_is_denied() {
        let dir = tempdir().unwrap();
        let dispatcher = build_dispatcher(dir.path());
        let call = ToolCall {
            id: "1".into(),
            name: "write".into(),
            args: json!({"path": "/etc/sven-dispatcher-denied-test", "content": "x"}),
        };
        let out = dispatcher.execute(&call).await;
        assert!(out.is_error);
        assert!(out.content.contains("outside all allowed"));
    }

    #[tokio::test]
    async fn write_inside_workdir_succeeds() {
        let dir = tempdir().unwrap();
        let dispatcher = build_dispatcher(dir.path());
        let target = dir.path().join("f.txt");
        let call = ToolCall {
            id: "1".into(),
            name: "write".into(),
            args: json!({"path": target.to_str().unwrap(), "content": "hello"}),
        };
        let out = dispatcher.execute(&call).await;
        assert!(!out.is_error, "{}", out.content);
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "hello");
    }

    #[tokio::test]
    async fn write_after_external_modification_is_rejected() {
        let dir = tempdir().unwrap();
        let dispatcher = build_dispatcher(dir.path());
        let target = dir.path().join("race.txt");
        std::fs::write(&target, "original").unwrap();

        let read_call = ToolCall {
            id: "r1".into(),
            name: "read_file".into(),
            args: json!({"path": target.to_str().unwrap()}),
        };
        let read_out = dispatcher.execute(&read_call).await;
        assert!(!read_out.is_error);

        // Simulate an external edit the agent never saw.
        std::fs::write(&target, "changed out from under it, a much longer line").unwrap();

        let write_call = ToolCall {
            id: "w1".into(),
            name: "write".into(),
            args: json!({"path": target.to_str().unwrap(), "content": "agent's stale write"}),
        };
        let write_out = dispatcher.execute(&write_call).await;
        assert!(write_out.is_error);
        assert!(write_out.content.contains("modified"));
    }

    #[tokio::test]
    async fn write_without_prior_read_is_allowed() {
        let dir = tempdir().unwrap();
        let dispatcher = build_dispatcher(dir.path());
        let target = dir.path().join("new.txt");
        let call = ToolCall {
            id: "1".into(),
            name: "write".into(),
            args: json!({"path": target.to_str().unwrap(), "content": "fresh"}),
        };
        let out = dispatcher.execute(&call).await;
        assert!(!out.is_error, "{}", out.content);
    }

    #[tokio::test]
    async fn shell_command_denied_by_policy_is_rejected() {
        let dir = tempdir().unwrap();
        let mut reg = ToolRegistry::new();

        struct EchoShell;
        #[async_trait]
        impl sven_tools::Tool for EchoShell {
            fn name(&self) -> &str {
                "shell"
            }
            fn description(&self) -> &str {
                "test shell"
            }
            fn parameters_schema(&self) -> serde_json::Value {
                json!({"type": "object"})
            }
            fn default_policy(&self) -> ApprovalPolicy {
                ApprovalPolicy::Ask
            }
            async fn execute(&self, call: &ToolCall) -> ToolOutput {
                ToolOutput::ok(&call.id, "ran")
            }
        }
        reg.register(EchoShell);

        let policy = ToolPolicy::from_config(&ToolsConfig {
            deny_patterns: vec!["rm -rf /*".into()],
            ..ToolsConfig::default()
        });
        let path_cfg = PathSafetyConfig {
            allowed_write_paths: vec![],
            max_confirmations_per_session: 10,
            audit_denied: false,
            audit_log_file: "/tmp/sven-test-dispatch-audit2.log".into(),
        };
        let guard = PathGuard::new(&path_cfg, &[] as &[&str], dir.path(), false);
        let dispatcher = Dispatcher::new(Arc::new(reg), policy, Some(guard));

        let call = ToolCall {
            id: "1".into(),
            name: "shell".into(),
            args: json!({"command": "rm -rf /*"}),
        };
        let out = dispatcher.execute(&call).await;
        assert!(out.is_error);
        assert!(out.content.contains("denied by policy"));
    }

    #[tokio::test]
    async fn non_shell_ask_policy_tool_is_rejected() {
        struct AskWrite;
        #[async_trait]
        impl sven_tools::Tool for AskWrite {
            fn name(&self) -> &str {
                "edit_file"
            }
            fn description(&self) -> &str {
                "test edit"
            }
            fn parameters_schema(&self) -> serde_json::Value {
                json!({"type": "object"})
            }
            fn default_policy(&self) -> ApprovalPolicy {
                ApprovalPolicy::Ask
            }
            async fn execute(&self, call: &ToolCall) -> ToolOutput {
                ToolOutput::ok(&call.id, "should not run")
            }
        }

        let dir = tempdir().unwrap();
        let mut reg = ToolRegistry::new();
        reg.register(AskWrite);
        let policy = ToolPolicy::from_config(&ToolsConfig::default());
        let path_cfg = PathSafetyConfig {
            allowed_write_paths: vec![],
            max_confirmations_per_session: 10,
            audit_denied: false,
            audit_log_file: "/tmp/sven-test-dispatch-audit3.log".into(),
        };
        let guard = PathGuard::new(&path_cfg, &[] as &[&str], dir.path(), false);
        let dispatcher = Dispatcher::new(Arc::new(reg), policy, Some(guard));

        let target = dir.path().join("f.txt");
        let call = ToolCall {
            id: "1".into(),
            name: "edit_file".into(),
            args: json!({"path": target.to_str().unwrap(), "content": "x"}),
        };
        let out = dispatcher.execute(&call).await;
        assert!(out.is_error);
        assert!(out.content.contains("requires user confirmation"));
    }

    #[tokio::test]
    async fn no_path_guard_skips_path_gate() {
        let mut reg = ToolRegistry::new();
        reg.register(PassthroughWrite);
        let policy = ToolPolicy::from_config(&ToolsConfig::default());
        let dispatcher = Dispatcher::new(Arc::new(reg), policy, None);
        let dir = tempdir().unwrap();
        let target = dir.path().join("anywhere.txt");
        let call = ToolCall {
            id: "1".into(),
            name: "write".into(),
            args: json!({"path": target.to_str().unwrap(), "content": "x"}),
        };
        let out = dispatcher.execute(&call).await;
        assert!(!out.is_error, "{}", out.content);
    }
}
