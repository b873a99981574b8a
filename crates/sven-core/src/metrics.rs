// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Per-session counters for tokens, tool calls, duration, and sub-sessions
//! (§4.11). Not persisted; rebuilt from scratch per process.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct TokenTotals {
    pub prompt: u64,
    pub completion: u64,
    pub total: u64,
}

#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
struct ToolStat {
    count: u64,
    #[serde(skip)]
    total_duration: Duration,
}

/// Per-session metrics accumulator. `export_session` renders a JSON map
/// suitable for `--json` / benchmark output.
#[derive(Debug)]
pub struct MetricsCollector {
    started_at: Instant,
    tokens: Mutex<TokenTotals>,
    tool_stats: Mutex<HashMap<String, ToolStat>>,
    sub_sessions: Mutex<Vec<String>>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            tokens: Mutex::new(TokenTotals::default()),
            tool_stats: Mutex::new(HashMap::new()),
            sub_sessions: Mutex::new(Vec::new()),
        }
    }

    /// Accumulate a turn's reported prompt/completion usage (from the
    /// adapter's context-local counter) into the session's running totals.
    pub fn record_token_usage(&self, prompt: u64, completion: u64) {
        let mut t = self.tokens.lock().unwrap();
        t.prompt += prompt;
        t.completion += completion;
        t.total += prompt + completion;
    }

    pub fn record_tool_invocation(&self, tool_name: &str, duration: Duration) {
        let mut stats = self.tool_stats.lock().unwrap();
        let entry = stats.entry(tool_name.to_string()).or_default();
        entry.count += 1;
        entry.total_duration += duration;
    }

    pub fn record_sub_session(&self, session_id: impl Into<String>) {
        self.sub_sessions.lock().unwrap().push(session_id.into());
    }

    pub fn token_totals(&self) -> TokenTotals {
        *self.tokens.lock().unwrap()
    }

    pub fn tool_invocation_count(&self, tool_name: &str) -> u64 {
        self.tool_stats.lock().unwrap().get(tool_name).map(|s| s.count).unwrap_or(0)
    }

    pub fn wall_time(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn sub_session_ids(&self) -> Vec<String> {
        self.sub_sessions.lock().unwrap().clone()
    }

    /// Render everything as a JSON map for benchmark/`--json` output.
    pub fn export_session(&self, session_id: &str) -> serde_json::Value {
        let tokens = self.token_totals();
        let tool_stats = self.tool_stats.lock().unwrap();
        let tools: serde_json::Map<String, serde_json::Value> = tool_stats
            .iter()
            .map(|(name, stat)| {
                (
                    name.clone(),
                    serde_json::json!({
                        "count": stat.count,
                        "total_duration_ms": stat.total_duration.as_millis() as u64,
                    }),
                )
            })
            .collect();
        serde_json::json!({
            "session_id": session_id,
            "tokens": {
                "prompt": tokens.prompt,
                "completion": tokens.completion,
                "total": tokens.total,
            },
            "tools": tools,
            "sub_sessions": self.sub_session_ids(),
            "wall_time_ms": self.wall_time().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_token_usage_accumulates() {
        let m = MetricsCollector::new();
        m.record_token_usage(100, 50);
        m.record_token_usage(10, 5);
        let t = m.token_totals();
        assert_eq!(t.prompt, 110);
        assert_eq!(t.completion, 55);
        assert_eq!(t.total, 165);
    }

    #[test]
    fn record_tool_invocation_counts_per_tool() {
        let m = MetricsCollector::new();
        m.record_tool_invocation("shell", Duration::from_millis(10));
        m.record_tool_invocation("shell", Duration::from_millis(20));
        m.record_tool_invocation("read_file", Duration::from_millis(5));
        assert_eq!(m.tool_invocation_count("shell"), 2);
        assert_eq!(m.tool_invocation_count("read_file"), 1);
        assert_eq!(m.tool_invocation_count("unknown"), 0);
    }

    #[test]
    fn record_sub_session_appends_ids() {
        let m = MetricsCollector::new();
        m.record_sub_session("sub-1");
        m.record_sub_session("sub-2");
        assert_eq!(m.sub_session_ids(), vec!["sub-1".to_string(), "sub-2".to_string()]);
    }

    #[test]
    fn export_session_includes_all_sections() {
        let m = MetricsCollector::new();
        m.record_token_usage(10, 5);
        m.record_tool_invocation("shell", Duration::from_millis(1));
        m.record_sub_session("child");
        let exported = m.export_session("sess1");
        assert_eq!(exported["session_id"], "sess1");
        assert_eq!(exported["tokens"]["total"], 15);
        assert_eq!(exported["tools"]["shell"]["count"], 1);
        assert_eq!(exported["sub_sessions"][0], "child");
    }

    #[test]
    fn wall_time_is_nonzero_after_some_work() {
        let m = MetricsCollector::new();
        std::thread::sleep(Duration::from_millis(5));
        assert!(m.wall_time().as_millis() >= 5);
    }
}
