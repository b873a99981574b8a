// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The seam `batch` sub-calls execute through, so they can be routed behind
//! the same gates (path safety, shell approval) as the call that invoked
//! `batch` — without `sven-tools` depending on `sven-core`'s `Dispatcher`
//! (which depends on `sven-tools`).

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;

use crate::{ToolCall, ToolOutput, ToolRegistry};

/// Something that can run a [`ToolCall`] and produce a [`ToolOutput`].
/// Implemented by [`ToolRegistry`] itself (ungated dispatch) and, in
/// `sven-core`, by the gated `Dispatcher`.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, call: &ToolCall) -> ToolOutput;
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        ToolRegistry::execute(self, call).await
    }
}

/// A [`ToolExecutor`] that forwards to whatever is `bind`-ed into it.
///
/// The gated `Dispatcher` is built from the *complete* tool registry
/// (`batch` included), but `batch` itself must be constructed — and
/// registered into that same registry — before the `Dispatcher` wrapping it
/// can exist. This slot breaks the cycle: `batch` is built holding one of
/// these, the caller finishes assembling the registry and the `Dispatcher`
/// around it, then binds the real dispatcher in. Calls made before `bind`
/// (there are none on any production path) fail loudly rather than
/// silently bypassing the gate.
pub struct LateBoundExecutor {
    bound: OnceLock<Arc<dyn ToolExecutor>>,
}

impl LateBoundExecutor {
    pub fn new() -> Self {
        Self { bound: OnceLock::new() }
    }

    /// Install the real executor. Only the first call has any effect.
    pub fn bind(&self, executor: Arc<dyn ToolExecutor>) {
        let _ = self.bound.set(executor);
    }
}

impl Default for LateBoundExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolExecutor for LateBoundExecutor {
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        match self.bound.get() {
            Some(executor) => executor.execute(call).await,
            None => ToolOutput::err(&call.id, "tool dispatcher not yet initialized"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn unbound_executor_errors_instead_of_running_ungated() {
        let exec = LateBoundExecutor::new();
        let call = ToolCall { id: "1".into(), name: "write".into(), args: json!({}) };
        let out = exec.execute(&call).await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn bind_routes_subsequent_calls_to_the_bound_executor() {
        let exec = LateBoundExecutor::new();
        let registry = Arc::new(ToolRegistry::new());
        exec.bind(registry.clone());
        let call = ToolCall { id: "1".into(), name: "missing".into(), args: json!({}) };
        let out = exec.execute(&call).await;
        // Routed through to the (empty) registry, which errors for an
        // unknown tool name — not the "not yet initialized" message.
        assert!(out.is_error);
        assert!(!out.content.contains("not yet initialized"));
    }
}
