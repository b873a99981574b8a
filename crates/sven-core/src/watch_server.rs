// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Per-session Unix-domain socket broadcasting a read-only event stream to
//! external observers (§4.10).
//!
//! Strictly read-only: the watch server never writes to session storage. On
//! accept it sends a `{"type": "connected", ...}` welcome line, then
//! forwards every event published on the [`crate::bus::EventBus`] as a
//! newline-delimited JSON line with an added `timestamp`. Disconnected or
//! erroring observers are dropped silently; a slow observer never blocks
//! the others or the bus.

#[cfg(unix)]
mod unix_impl {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::{SystemTime, UNIX_EPOCH};

    use serde::Serialize;
    use tokio::io::AsyncWriteExt;
    use tokio::net::{UnixListener, UnixStream};
    use tokio::sync::Notify;
    use tracing::{debug, warn};

    use crate::bus::EventBus;
    use crate::events::AgentEvent;

    fn now_epoch() -> f64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
    }

    #[derive(Serialize)]
    struct WireEvent<'a> {
        #[serde(rename = "type")]
        kind: &'a str,
        timestamp: f64,
        #[serde(flatten)]
        payload: serde_json::Value,
    }

    /// A running watch server bound to `{session_dir}/watch.sock`, mode
    /// `0600`. Dropping the handle stops the accept loop and removes the
    /// socket file.
    pub struct WatchServer {
        socket_path: PathBuf,
        stop: Arc<Notify>,
        task: Option<tokio::task::JoinHandle<()>>,
    }

    impl WatchServer {
        /// Bind and start accepting connections in the background.
        pub async fn start(
            session_dir: impl AsRef<Path>,
            session_id: impl Into<String>,
            bus: Arc<EventBus>,
        ) -> std::io::Result<Self> {
            let socket_path = session_dir.as_ref().join("watch.sock");
            if socket_path.exists() {
                let _ = std::fs::remove_file(&socket_path);
            }
            if let Some(parent) = socket_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let listener = UnixListener::bind(&socket_path)?;
            set_socket_mode_0600(&socket_path)?;

            let stop = Arc::new(Notify::new());
            let stop_accept = stop.clone();
            let session_id = session_id.into();
            let socket_path_for_task = socket_path.clone();

            let task = tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = stop_accept.notified() => break,
                        accepted = listener.accept() => {
                            match accepted {
                                Ok((stream, _addr)) => {
                                    let rx = bus.subscribe_all();
                                    let sid = session_id.clone();
                                    tokio::spawn(serve_observer(stream, sid, rx));
                                }
                                Err(e) => {
                                    warn!(error = %e, "watch server accept failed");
                                    break;
                                }
                            }
                        }
                    }
                }
                let _ = std::fs::remove_file(&socket_path_for_task);
            });

            Ok(Self { socket_path, stop, task: Some(task) })
        }

        pub fn socket_path(&self) -> &Path {
            &self.socket_path
        }

        /// Stop the accept loop, close all observers, and remove the socket
        /// file (§4.10 "On server stop").
        pub async fn stop(mut self) {
            self.stop.notify_waiters();
            if let Some(task) = self.task.take() {
                let _ = task.await;
            }
        }
    }

    impl Drop for WatchServer {
        fn drop(&mut self) {
            self.stop.notify_waiters();
        }
    }

    async fn serve_observer(
        mut stream: UnixStream,
        session_id: String,
        mut rx: tokio::sync::mpsc::UnboundedReceiver<AgentEvent>,
    ) {
        let welcome = serde_json::json!({
            "type": "connected",
            "session_id": session_id,
            "message": "watching session",
        });
        if write_line(&mut stream, &welcome.to_string()).await.is_err() {
            return;
        }
        while let Some(event) = rx.recv().await {
            let Some(line) = render_event(&event) else { continue };
            if write_line(&mut stream, &line).await.is_err() {
                debug!("watch observer disconnected");
                return;
            }
        }
    }

    async fn write_line(stream: &mut UnixStream, line: &str) -> std::io::Result<()> {
        stream.write_all(line.as_bytes()).await?;
        stream.write_all(b"\n").await?;
        stream.flush().await
    }

    /// Serialize one bus event as a newline-delimited JSON record with an
    /// added `timestamp`, matching the wire shape every `{type, timestamp,
    /// ...}` watch-socket event carries (§6 Watch socket).
    fn render_event(event: &AgentEvent) -> Option<String> {
        let payload = event_payload(event)?;
        let wire = WireEvent { kind: event.topic(), timestamp: now_epoch(), payload };
        serde_json::to_string(&wire).ok()
    }

    fn event_payload(event: &AgentEvent) -> Option<serde_json::Value> {
        use crate::events::AgentEvent::*;
        Some(match event {
            TextDelta(t) => serde_json::json!({ "text": t }),
            TextComplete(t) => serde_json::json!({ "text": t }),
            ThinkingDelta(t) => serde_json::json!({ "text": t }),
            ThinkingComplete(t) => serde_json::json!({ "text": t }),
            ToolCallStarted(call) => serde_json::json!({ "tool": call.name, "id": call.id }),
            ToolCallFinished { call_id, tool_name, output, is_error, is_partial, is_interrupted } => serde_json::json!({
                "call_id": call_id, "tool_name": tool_name, "output": output,
                "is_error": is_error, "is_partial": is_partial, "is_interrupted": is_interrupted,
            }),
            ContextCompacted { tokens_before, tokens_after, strategy, turn, pruned } => serde_json::json!({
                "tokens_before": tokens_before, "tokens_after": tokens_after,
                "strategy": strategy.to_string(), "turn": turn,
                "pruned_count": pruned.len(),
            }),
            TokenUsage { input, output, .. } => {
                serde_json::json!({ "input": input, "output": output })
            }
            TurnComplete => serde_json::json!({}),
            Aborted { partial_text } => serde_json::json!({ "partial_text": partial_text }),
            Error(msg) => serde_json::json!({ "message": msg }),
            TodoUpdate(_) => serde_json::json!({}),
            ModeChanged(mode) => serde_json::json!({ "mode": mode.to_string() }),
            Question { id, questions } => serde_json::json!({ "id": id, "questions": questions }),
            QuestionAnswer { id, answer } => serde_json::json!({ "id": id, "answer": answer }),
        })
    }

    #[cfg(unix)]
    fn set_socket_mode_0600(path: &Path) -> std::io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)
    }

}

#[cfg(unix)]
pub use unix_impl::WatchServer;
