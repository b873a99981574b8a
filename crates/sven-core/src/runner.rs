// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Bridges a live [`Agent`] to durable storage, the event bus, the watch
//! server, the control plane, and metrics — the integration the teacher's
//! CI/headless runners never needed, since they drive an `Agent` straight
//! through to completion without surviving a crash or being observed
//! externally (§4.9 Agent Loop, §4.2 Session Store, §4.10 Watch Server,
//! §4.7 Control Manager, §4.11 Metrics).
//!
//! One [`SessionRunner`] owns exactly one session end to end: it claims the
//! PID lock on construction, mirrors every [`AgentEvent`] the agent emits
//! into a [`PersistedMessage`], republishes the same event onto a shared
//! [`EventBus`] for any watch-socket observers, and releases the PID lock
//! when dropped or stopped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::warn;

use crate::agent::Agent;
use crate::bus::EventBus;
use crate::control::ControlManager;
use crate::events::AgentEvent;
use crate::metrics::MetricsCollector;
use crate::store::{DebouncedSaver, MsgRole, Part, PartStatus, SessionStore};

#[cfg(unix)]
use crate::watch_server::WatchServer;

/// Construction parameters for a [`SessionRunner`].
pub struct SessionRunnerConfig {
    pub session_id: String,
    pub store: SessionStore,
    pub bus: Arc<EventBus>,
    pub control: Arc<ControlManager>,
    pub metrics: Arc<MetricsCollector>,
}

/// A running session: an [`Agent`] plus everything needed to make its
/// activity durable and observable.
pub struct SessionRunner {
    session_id: String,
    store: SessionStore,
    bus: Arc<EventBus>,
    control: Arc<ControlManager>,
    metrics: Arc<MetricsCollector>,
    agent: Agent,
    todo_saver: Arc<DebouncedSaver<serde_json::Value>>,
    #[cfg(unix)]
    watch: Option<WatchServer>,
}

/// Returned by [`SessionRunner::start`]; `stop` releases the PID lock and
/// tears down the watch server.
pub struct SessionRunnerHandle {
    pub runner: SessionRunner,
}

impl SessionRunner {
    /// Claims the session's PID lock and, on unix, starts its watch server.
    /// Fails if another live process already owns the session.
    pub async fn start(cfg: SessionRunnerConfig, agent: Agent) -> anyhow::Result<SessionRunnerHandle> {
        let claimed = cfg.store.check_and_set_pid(&cfg.session_id)?;
        if !claimed {
            anyhow::bail!("session '{}' is already owned by a live process", cfg.session_id);
        }

        #[cfg(unix)]
        let watch = {
            let session_dir = cfg.store.session_dir_path(&cfg.session_id);
            match WatchServer::start(&session_dir, cfg.session_id.clone(), cfg.bus.clone()).await {
                Ok(w) => Some(w),
                Err(e) => {
                    warn!(error = %e, session_id = %cfg.session_id, "failed to start watch server");
                    None
                }
            }
        };

        let runner = SessionRunner {
            session_id: cfg.session_id,
            store: cfg.store,
            bus: cfg.bus,
            control: cfg.control,
            metrics: cfg.metrics,
            agent,
            todo_saver: Arc::new(DebouncedSaver::new()),
            #[cfg(unix)]
            watch,
        };
        Ok(SessionRunnerHandle { runner })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn agent_mut(&mut self) -> &mut Agent {
        &mut self.agent
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// Submit one user turn, persisting and broadcasting every event the
    /// agent emits along the way. Honors pause/interrupt via the shared
    /// [`ControlManager`]: waits out a pause before starting, and lets an
    /// interrupt already requested abort the turn through the agent's
    /// existing cancellation channel rather than duplicating that logic.
    pub async fn submit(&mut self, user_input: &str) -> anyhow::Result<()> {
        self.control.wait_if_paused().await;

        self.persist_and_publish_message(MsgRole::User, Part::new_text(user_input));

        let (tx, mut rx) = mpsc::channel::<AgentEvent>(256);
        let (cancel_tx, cancel_rx) = tokio::sync::oneshot::channel();

        let control = self.control.clone();
        let poller = tokio::spawn(async move {
            let mut cancel_tx = Some(cancel_tx);
            loop {
                if control.should_interrupt() {
                    if let Some(tx) = cancel_tx.take() {
                        let _ = tx.send(());
                    }
                    control.acknowledge_interrupt();
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
        });

        let store = self.store.clone();
        let bus = self.bus.clone();
        let metrics = self.metrics.clone();
        let session_id = self.session_id.clone();
        let todo_saver = self.todo_saver.clone();
        let consumer = tokio::spawn(async move {
            consume_events(&store, &bus, &metrics, &todo_saver, &session_id, &mut rx).await;
        });

        let result = self.agent.submit_with_cancel(user_input, tx, cancel_rx).await;

        poller.abort();
        consumer.await.ok();

        // Flush any todo update deferred by the debounce window so the turn
        // never ends with unpersisted state (§4.2 Debounced saver).
        let store = self.store.clone();
        let session_id = self.session_id.clone();
        let _ = self.todo_saver.flush(|value| store.save_todos(&session_id, value));

        result
    }

    fn persist_and_publish_message(&self, role: MsgRole, part: Part) {
        let mut msg = crate::store::PersistedMessage::new(role);
        msg.finished = true;
        msg.parts.push(part);
        if let Err(e) = self.store.save_message(&self.session_id, &msg) {
            warn!(error = %e, session_id = %self.session_id, "failed to persist message");
        }
    }

    /// Release the PID lock and stop the watch server. Always call this
    /// (or let the handle drop) on every termination path — clean exit,
    /// SIGINT, or error — so a later process can reclaim the session.
    pub async fn stop(self) {
        #[cfg(unix)]
        if let Some(w) = self.watch {
            w.stop().await;
        }
        if let Err(e) = self.store.clear_pid(&self.session_id) {
            warn!(error = %e, session_id = %self.session_id, "failed to release pid lock");
        }
    }
}

/// Drains `rx` until the channel closes, turning each [`AgentEvent`] into a
/// durable [`PersistedMessage`] mutation (or metadata/todo update) and a
/// republish onto `bus`.
async fn consume_events(
    store: &SessionStore,
    bus: &Arc<EventBus>,
    metrics: &Arc<MetricsCollector>,
    todo_saver: &DebouncedSaver<serde_json::Value>,
    session_id: &str,
    rx: &mut mpsc::Receiver<AgentEvent>,
) {
    let mut tool_started_at: HashMap<String, Instant> = HashMap::new();
    let mut tool_messages: HashMap<String, crate::store::PersistedMessage> = HashMap::new();

    while let Some(event) = rx.recv().await {
        bus.publish(event.clone());

        match &event {
            AgentEvent::TextComplete(text) => {
                if !text.is_empty() {
                    let mut msg = crate::store::PersistedMessage::new(MsgRole::Assistant);
                    msg.finished = true;
                    msg.parts.push(Part::new_text(text.clone()));
                    if let Err(e) = store.save_message(session_id, &msg) {
                        warn!(error = %e, session_id, "failed to persist assistant text");
                    }
                }
            }
            AgentEvent::ToolCallStarted(call) => {
                tool_started_at.insert(call.id.clone(), Instant::now());
                let mut msg = crate::store::PersistedMessage::new(MsgRole::Assistant);
                let mut part =
                    Part::new_pending_tool_with_id(call.id.clone(), call.name.clone(), call.args.clone());
                if let Part::Tool { status, .. } = &mut part {
                    *status = PartStatus::Running;
                }
                msg.parts.push(part);
                if let Err(e) = store.save_message(session_id, &msg) {
                    warn!(error = %e, session_id, "failed to persist pending tool call");
                }
                tool_messages.insert(call.id.clone(), msg);
            }
            AgentEvent::ToolCallFinished {
                call_id,
                tool_name,
                output,
                is_error,
                is_partial,
                is_interrupted,
            } => {
                if let Some(start) = tool_started_at.remove(call_id) {
                    metrics.record_tool_invocation(tool_name, start.elapsed());
                }
                if let Some(mut msg) = tool_messages.remove(call_id) {
                    msg.finished = true;
                    if let Some(Part::Tool { status, output: out, end_time, .. }) =
                        msg.parts.first_mut()
                    {
                        *status = if *is_interrupted {
                            PartStatus::Interrupted
                        } else if *is_partial {
                            PartStatus::Partial
                        } else if *is_error {
                            PartStatus::Error
                        } else {
                            PartStatus::Completed
                        };
                        *out = output.clone();
                        *end_time = Some(crate::store::now_epoch_public());
                    }
                    if let Err(e) = store.save_message(session_id, &msg) {
                        warn!(error = %e, session_id, "failed to persist finished tool call");
                    }
                }
            }
            AgentEvent::TokenUsage { input, output, .. } => {
                metrics.record_token_usage(*input as u64, *output as u64);
            }
            AgentEvent::ContextCompacted { tokens_before, tokens_after, strategy, pruned, .. } => {
                let strategy_name = strategy.to_string();
                let before = *tokens_before;
                let after = *tokens_after;
                let sid = session_id.to_string();
                let message_ids: Vec<String> =
                    pruned.iter().map(|p| p.tool_call_id.clone()).collect();
                let _ = store.update_session_metadata(session_id, |m| {
                    m.compaction_records.push(crate::store::CompactionRecord {
                        session_id: sid,
                        policy: strategy_name,
                        tokens_before: before,
                        tokens_after: after,
                        message_ids,
                        timestamp: crate::store::now_epoch_public(),
                    });
                });
                apply_pruned_parts_to_store(store, session_id, pruned);
            }
            AgentEvent::TodoUpdate(todos) => {
                if let Ok(value) = serde_json::to_value(todos) {
                    let _ = todo_saver.save_or_defer(value, |v| store.save_todos(session_id, v));
                }
            }
            _ => {}
        }
    }
}

/// Mirror a tool-output pruning pass onto the durable store: for every
/// `PrunedPart`, find the persisted `Part::Tool` sharing its `tool_call_id`
/// (the part's `id`, per `Part::new_pending_tool_with_id`) and overwrite its
/// `output` with the placeholder while recording `metadata = {pruned: true,
/// pruned_at, original_output_tokens}` (§3 invariant 5, §4.8 policy 1).
/// Already-finished tool parts live on disk only, so this reloads every
/// message rather than consulting the in-memory `tool_messages` map.
fn apply_pruned_parts_to_store(
    store: &SessionStore,
    session_id: &str,
    pruned: &[crate::events::PrunedPart],
) {
    if pruned.is_empty() {
        return;
    }
    let messages = match store.get_all_messages(session_id) {
        Ok(m) => m,
        Err(e) => {
            warn!(error = %e, session_id, "failed to load messages for pruning metadata update");
            return;
        }
    };
    let now = crate::store::now_epoch_public();
    for mut msg in messages {
        let mut touched = false;
        for part in msg.parts.iter_mut() {
            let Part::Tool { id, output, metadata, .. } = part else { continue };
            let Some(p) = pruned.iter().find(|p| &p.tool_call_id == id) else { continue };
            *output = p.replacement_text.clone();
            *metadata = Some(serde_json::json!({
                "pruned": true,
                "pruned_at": now,
                "original_output_tokens": p.original_output_tokens,
            }));
            touched = true;
        }
        if touched {
            if let Err(e) = store.save_message(session_id, &msg) {
                warn!(error = %e, session_id, "failed to persist pruned tool part");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SessionStore;
    use tempfile::tempdir;

    #[tokio::test]
    async fn event_consumer_persists_assistant_text() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let meta = store.create_session(None, Some("test")).unwrap();
        let bus = Arc::new(EventBus::new());
        let metrics = Arc::new(MetricsCollector::new());

        let (tx, mut rx) = mpsc::channel(8);
        tx.send(AgentEvent::TextComplete("hello world".into())).await.unwrap();
        drop(tx);
        consume_events(&store, &bus, &metrics, &DebouncedSaver::new(), &meta.id, &mut rx).await;

        let messages = store.get_all_messages(&meta.id).unwrap();
        assert_eq!(messages.len(), 1);
        assert!(matches!(&messages[0].parts[0], Part::Text { text, .. } if text == "hello world"));
    }

    #[tokio::test]
    async fn event_consumer_persists_tool_call_lifecycle() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let meta = store.create_session(None, Some("test")).unwrap();
        let bus = Arc::new(EventBus::new());
        let metrics = Arc::new(MetricsCollector::new());

        let call = sven_tools::ToolCall { id: "c1".into(), name: "read_file".into(), args: serde_json::json!({}) };
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(AgentEvent::ToolCallStarted(call)).await.unwrap();
        tx.send(AgentEvent::ToolCallFinished {
            call_id: "c1".into(),
            tool_name: "read_file".into(),
            output: "file contents".into(),
            is_error: false,
            is_partial: false,
            is_interrupted: false,
        }).await.unwrap();
        drop(tx);
        consume_events(&store, &bus, &metrics, &DebouncedSaver::new(), &meta.id, &mut rx).await;

        let messages = store.get_all_messages(&meta.id).unwrap();
        assert_eq!(messages.len(), 1);
        match &messages[0].parts[0] {
            Part::Tool { id, status, output, .. } => {
                assert_eq!(id, "c1", "part id must match the LLM tool_call_id (§3 invariant 1)");
                assert_eq!(*status, PartStatus::Completed);
                assert_eq!(output, "file contents");
            }
            other => panic!("expected tool part, got {other:?}"),
        }
        assert_eq!(metrics.tool_invocation_count("read_file"), 1);
    }

    #[tokio::test]
    async fn interrupted_tool_call_persists_as_interrupted_status() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let meta = store.create_session(None, Some("test")).unwrap();
        let bus = Arc::new(EventBus::new());
        let metrics = Arc::new(MetricsCollector::new());

        let call = sven_tools::ToolCall { id: "c1".into(), name: "shell".into(), args: serde_json::json!({}) };
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(AgentEvent::ToolCallStarted(call)).await.unwrap();
        tx.send(AgentEvent::ToolCallFinished {
            call_id: "c1".into(),
            tool_name: "shell".into(),
            output: String::new(),
            is_error: false,
            is_partial: false,
            is_interrupted: true,
        }).await.unwrap();
        drop(tx);
        consume_events(&store, &bus, &metrics, &DebouncedSaver::new(), &meta.id, &mut rx).await;

        let messages = store.get_all_messages(&meta.id).unwrap();
        match &messages[0].parts[0] {
            Part::Tool { status, .. } => assert_eq!(*status, PartStatus::Interrupted),
            other => panic!("expected tool part, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn context_compacted_mirrors_pruned_parts_onto_store() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let meta = store.create_session(None, Some("test")).unwrap();
        let bus = Arc::new(EventBus::new());
        let metrics = Arc::new(MetricsCollector::new());

        let call = sven_tools::ToolCall { id: "c1".into(), name: "shell".into(), args: serde_json::json!({}) };
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(AgentEvent::ToolCallStarted(call)).await.unwrap();
        tx.send(AgentEvent::ToolCallFinished {
            call_id: "c1".into(),
            tool_name: "shell".into(),
            output: "a very long shell output".into(),
            is_error: false,
            is_partial: false,
            is_interrupted: false,
        }).await.unwrap();
        tx.send(AgentEvent::ContextCompacted {
            tokens_before: 5000,
            tokens_after: 4000,
            strategy: crate::events::CompactionStrategyUsed::Pruned,
            turn: 1,
            pruned: vec![crate::events::PrunedPart {
                tool_call_id: "c1".into(),
                original_output_tokens: 1000,
                replacement_text: "[tool output pruned]".into(),
            }],
        }).await.unwrap();
        drop(tx);
        consume_events(&store, &bus, &metrics, &DebouncedSaver::new(), &meta.id, &mut rx).await;

        let messages = store.get_all_messages(&meta.id).unwrap();
        let tool_msg = messages.iter().find(|m| matches!(&m.parts[0], Part::Tool { .. })).unwrap();
        match &tool_msg.parts[0] {
            Part::Tool { output, metadata, .. } => {
                assert_eq!(output, "[tool output pruned]");
                let meta = metadata.as_ref().expect("metadata must be set");
                assert_eq!(meta["pruned"], true);
                assert_eq!(meta["original_output_tokens"], 1000);
            }
            other => panic!("expected tool part, got {other:?}"),
        }

        let session_meta = store.get_session_metadata(&meta.id).unwrap();
        assert_eq!(session_meta.compaction_records.len(), 1);
        assert_eq!(session_meta.compaction_records[0].message_ids, vec!["c1".to_string()]);
    }
}
