// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use serde_json::{json, Value};

use sven_config::AgentMode;

use crate::dispatch::ToolExecutor;
use crate::policy::ApprovalPolicy;
use crate::tool::{Tool, ToolCall, ToolOutput};

#[derive(Debug, Deserialize)]
struct SubCall {
    tool: String,
    #[serde(default)]
    input: Value,
}

#[derive(Debug, Deserialize)]
struct BatchArgs {
    tool_calls: Vec<SubCall>,
}

/// Runs a set of independent tool calls concurrently.
///
/// Sub-calls are dispatched through `executor` — in production this is the
/// *same* gated `Dispatcher` the outer `batch` call itself came through, so
/// a sub-call is still subject to path safety and shell-approval policy
/// (§4.4, §4.6) rather than reaching the raw registry and evading them. A
/// model that tries to nest `batch` inside `batch` is rejected explicitly
/// below rather than relying on `executor` to catch it.
pub struct BatchTool {
    executor: Arc<dyn ToolExecutor>,
    max_parallel: usize,
}

impl BatchTool {
    pub fn new(executor: Arc<dyn ToolExecutor>, max_parallel: usize) -> Self {
        Self { executor, max_parallel }
    }
}

#[async_trait]
impl Tool for BatchTool {
    fn name(&self) -> &str {
        "batch"
    }

    fn description(&self) -> &str {
        "Run several independent tool calls concurrently in one step. Takes \
         {tool_calls: [{tool, input}, ...]}. Use this to parallelize \
         independent reads/searches instead of issuing them one at a time. \
         Nested `batch` calls are rejected, as are more sub-calls than the \
         configured limit."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "tool_calls": {
                    "type": "array",
                    "description": "The sub-calls to run concurrently.",
                    "items": {
                        "type": "object",
                        "properties": {
                            "tool": { "type": "string", "description": "Name of a registered tool." },
                            "input": { "type": "object", "description": "Arguments for that tool." }
                        },
                        "required": ["tool"]
                    }
                }
            },
            "required": ["tool_calls"]
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }

    fn modes(&self) -> &[AgentMode] {
        &[AgentMode::Research, AgentMode::Plan, AgentMode::Agent]
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let args: BatchArgs = match serde_json::from_value(call.args.clone()) {
            Ok(a) => a,
            Err(e) => return ToolOutput::err(&call.id, format!("invalid batch arguments: {e}")),
        };

        if args.tool_calls.is_empty() {
            return ToolOutput::err(&call.id, "batch requires at least one tool call");
        }

        if args.tool_calls.iter().any(|c| c.tool == "batch") {
            return ToolOutput::err(&call.id, "nested `batch` calls are not allowed");
        }

        if args.tool_calls.len() > self.max_parallel {
            return ToolOutput::err(
                &call.id,
                format!(
                    "batch accepts at most {} sub-calls, got {}",
                    self.max_parallel,
                    args.tool_calls.len()
                ),
            );
        }

        let calls = join_all(args.tool_calls.iter().enumerate().map(|(i, sub)| {
            let executor = self.executor.clone();
            let sub_call = ToolCall {
                id: format!("{}.{}", call.id, i),
                name: sub.tool.clone(),
                args: sub.input.clone(),
            };
            async move {
                let out = executor.execute(&sub_call).await;
                (sub_call.name, out)
            }
        }))
        .await;

        let succeeded = calls.iter().filter(|(_, out)| !out.is_error).count();
        let all_succeeded = succeeded == calls.len();

        let mut summary = format!("batch: {}/{} sub-calls succeeded\n", succeeded, calls.len());
        for (i, (tool, out)) in calls.iter().enumerate() {
            let status = if out.is_error { "error" } else { "ok" };
            let preview: String = out.content.chars().take(200).collect();
            summary.push_str(&format!(
                "[{i}] {tool} ({status}): {}\n",
                preview.replace('\n', " ")
            ));
        }

        // `completed` iff every sub-call succeeded, `partial` otherwise
        // (including zero successes) — never `error`, so the model can tell
        // "nothing ran" apart from "ran and some/all sub-calls failed".
        if all_succeeded {
            ToolOutput::ok(&call.id, summary)
        } else {
            ToolOutput::partial(&call.id, summary)
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
