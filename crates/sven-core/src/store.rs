// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The durable, crash-safe representation of a session (§3 Data Model,
//! §4.2 Session Store).
//!
//! This is deliberately distinct from [`crate::session::Session`], which is
//! the fast in-memory `sven_model::Message` list the agent loop streams
//! against turn to turn. `PersistedSession`/`PersistedMessage`/`Part` are the
//! `Part`-tagged-union record with per-tool-call status used for crash
//! recovery, `sven session resume`, and the watch server — the shape this
//! module persists is exactly what §3 specifies, not a convenience subset of
//! it.
//!
//! On-disk layout under a base directory (default `~/.sven/sessions`):
//!
//! ```text
//! {session_id}/
//!   session.json          — metadata (no messages)
//!   messages/{msg_id}.json — one file per message
//!   todos.json            — current todo list
//!   watch.sock            — (runtime) unix socket, see watch_server.rs
//! ```

use std::fs::{self, File};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use fs4::fs_std::FileExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by the session store. Maps to the `session` kind in §7's
/// error taxonomy (startup fatal, exit 3) except where noted.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session '{0}' already exists")]
    AlreadyExists(String),
    #[error("session '{0}' not found")]
    NotFound(String),
    #[error("message '{0}' not found in session '{1}'")]
    MessageNotFound(String, String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;

fn now_epoch() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Public wrapper so other modules (e.g. [`crate::runner`]) can stamp
/// records with the same epoch-seconds clock this store uses internally.
pub fn now_epoch_public() -> f64 {
    now_epoch()
}

// ─── Data model (§3) ──────────────────────────────────────────────────────────

/// Status of a [`Part::Tool`]. Terminal statuses never transition back to
/// `Pending`/`Running` (§3 invariant 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartStatus {
    Pending,
    Running,
    Completed,
    Error,
    Partial,
    Interrupted,
    Timeout,
}

impl PartStatus {
    /// Terminal statuses must never (re-)enter `Pending`/`Running` (§3 invariant 2).
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    /// Visible to the LLM projection (§3 invariant 1, §4.5 step 2): only
    /// `completed | error | interrupted` are emitted as `tool_calls`.
    pub fn is_projectable(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Interrupted)
    }
}

/// Polymorphic message fragment — a tagged union over text and tool parts
/// (§3, §9 "Polymorphic `Part`").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text {
        id: String,
        text: String,
    },
    Tool {
        id: String,
        tool_name: String,
        input: serde_json::Value,
        output: String,
        status: PartStatus,
        start_time: f64,
        end_time: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<serde_json::Value>,
    },
}

impl Part {
    pub fn id(&self) -> &str {
        match self {
            Part::Text { id, .. } => id,
            Part::Tool { id, .. } => id,
        }
    }

    pub fn new_text(text: impl Into<String>) -> Self {
        Part::Text { id: uuid::Uuid::new_v4().to_string(), text: text.into() }
    }

    pub fn new_pending_tool(tool_name: impl Into<String>, input: serde_json::Value) -> Self {
        Self::new_pending_tool_with_id(uuid::Uuid::new_v4().to_string(), tool_name, input)
    }

    /// Like [`Part::new_pending_tool`] but with an explicit part id. The
    /// runner uses this to set the part's id to the LLM's `tool_call_id`, so
    /// that projecting this part back to LLM format (§3 invariant 1) and
    /// matching it up with a later compaction pass (§4.8 policy 1) can both
    /// key off the same id.
    pub fn new_pending_tool_with_id(
        id: impl Into<String>,
        tool_name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Part::Tool {
            id: id.into(),
            tool_name: tool_name.into(),
            input,
            output: String::new(),
            status: PartStatus::Pending,
            start_time: now_epoch(),
            end_time: None,
            metadata: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MsgRole {
    User,
    Assistant,
    System,
    Tool,
}

/// A message in the durable session record: `{id, role, parts, timestamp,
/// finished, finish_reason, reasoning_content, metadata}` per §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedMessage {
    pub id: String,
    pub role: MsgRole,
    pub parts: Vec<Part>,
    pub timestamp: f64,
    #[serde(default)]
    pub finished: bool,
    #[serde(default)]
    pub finish_reason: String,
    #[serde(default)]
    pub reasoning_content: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl PersistedMessage {
    pub fn new(role: MsgRole) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            parts: Vec::new(),
            timestamp: now_epoch(),
            finished: false,
            finish_reason: String::new(),
            reasoning_content: String::new(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn new_text(role: MsgRole, text: impl Into<String>) -> Self {
        let mut m = Self::new(role);
        m.parts.push(Part::new_text(text));
        m
    }

    /// All tool parts whose status is visible to the LLM projection (§4.5
    /// step 2): `completed | error | interrupted`, in original order.
    pub fn projectable_tool_parts(&self) -> Vec<&Part> {
        self.parts
            .iter()
            .filter(|p| matches!(p, Part::Tool { status, .. } if status.is_projectable()))
            .collect()
    }
}

/// Session metadata (no messages) per §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub id: String,
    pub created_at: f64,
    pub updated_at: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub agent_display_name: String,
    #[serde(default)]
    pub workdir: String,
    #[serde(default)]
    pub execution_mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid_updated_at: Option<f64>,
    /// Compaction history for this session (§4.8 `CompactionRecord`s).
    #[serde(default)]
    pub compaction_records: Vec<CompactionRecord>,
}

impl SessionMetadata {
    fn new(id: String, agent_name: Option<&str>) -> Self {
        let now = now_epoch();
        Self {
            id,
            created_at: now,
            updated_at: now,
            parent_session_id: None,
            agent_type: None,
            title: String::new(),
            tags: Vec::new(),
            agent_display_name: agent_name.unwrap_or("sven").to_string(),
            workdir: String::new(),
            execution_mode: "solo".to_string(),
            pid: None,
            pid_updated_at: None,
            compaction_records: Vec::new(),
        }
    }
}

/// One applied compaction policy, appended to session metadata (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionRecord {
    pub session_id: String,
    pub policy: String,
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub message_ids: Vec<String>,
    pub timestamp: f64,
}

/// Metadata plus all messages, for full-session load/resume.
#[derive(Debug, Clone)]
pub struct LoadedSession {
    pub metadata: SessionMetadata,
    pub messages: Vec<PersistedMessage>,
}

impl LoadedSession {
    /// Project this session's durable `Part`-tagged messages back to the
    /// live wire format the model API expects, so a resumed session can be
    /// fed straight into [`crate::Agent::seed_history`] (§4.5).
    pub fn to_wire_messages(&self) -> Vec<sven_model::Message> {
        project_messages_for_wire(&self.messages)
    }
}

/// Canned placeholder substituted for an `interrupted` tool part that never
/// produced output, so the model still sees a `role=tool` result for every
/// `tool_calls` entry it emitted (§4.5 step 2).
const INTERRUPTED_PLACEHOLDER: &str = "interrupted before execution";

/// Project a durable `PersistedMessage` list back to the wire-format
/// `sven_model::Message` list a model call expects (§4.5 message
/// projection): text parts become a plain message in the original role;
/// each `completed | error | interrupted` tool part (`is_projectable`)
/// becomes one assistant `tool_calls` message followed by one `role=tool`
/// message, using [`INTERRUPTED_PLACEHOLDER`] when an interrupted part has
/// no output. `pending`/`running` tool parts (a session captured mid-call,
/// e.g. a crash) and messages left with nothing to project are skipped
/// rather than emitted as an empty turn.
pub fn project_messages_for_wire(messages: &[PersistedMessage]) -> Vec<sven_model::Message> {
    let mut out = Vec::new();
    for msg in messages {
        let role = match msg.role {
            MsgRole::System => sven_model::Role::System,
            MsgRole::User => sven_model::Role::User,
            MsgRole::Assistant => sven_model::Role::Assistant,
            MsgRole::Tool => sven_model::Role::Tool,
        };

        let text: String = msg
            .parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text, .. } => Some(text.as_str()),
                Part::Tool { .. } => None,
            })
            .collect();
        if !text.is_empty() {
            out.push(sven_model::Message { role, content: sven_model::MessageContent::Text(text) });
        }

        for part in msg.projectable_tool_parts() {
            let Part::Tool { id, tool_name, input, output, status, .. } = part else { continue };
            out.push(sven_model::Message {
                role: sven_model::Role::Assistant,
                content: sven_model::MessageContent::ToolCall {
                    tool_call_id: id.clone(),
                    function: sven_model::FunctionCall {
                        name: tool_name.clone(),
                        arguments: input.to_string(),
                    },
                },
            });
            let content = if *status == PartStatus::Interrupted && output.is_empty() {
                INTERRUPTED_PLACEHOLDER.to_string()
            } else {
                output.clone()
            };
            out.push(sven_model::Message::tool_result(id, content));
        }
    }
    out
}

/// Summary returned by `list_sessions`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub title: String,
    pub created_at: f64,
    pub updated_at: f64,
    pub message_count: usize,
    pub is_running: bool,
}

/// Status snapshot returned by `get_session_status`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub exists: bool,
    pub pid: Option<u32>,
    pub is_running: bool,
    pub watch_server_available: bool,
    pub agent_name: String,
    pub created_at: Option<f64>,
    pub message_count: usize,
}

// ─── Session ID generation ────────────────────────────────────────────────────

/// `{SanitizedAgentName}_{YYMMDD}_{HHMMSS}` (§3 Identifiers).
pub fn generate_session_id(agent_name: &str) -> String {
    let sanitized: String = agent_name.chars().filter(|c| !c.is_whitespace()).collect();
    let sanitized = if sanitized.is_empty() { "agent".to_string() } else { sanitized };
    let now = chrono::Local::now();
    format!("{}_{}_{}", sanitized, now.format("%y%m%d"), now.format("%H%M%S"))
}

// ─── Atomic file I/O ──────────────────────────────────────────────────────────

/// Write `bytes` to `target` atomically: take an exclusive advisory lock on
/// a sibling temp file, write, `fsync`, then rename over the target. On any
/// error the temp file is removed and `target`'s previous content, if any,
/// is left untouched (§4.2 Atomic write contract).
fn atomic_write(target: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = target.with_extension(format!(
        "{}.tmp",
        target.extension().and_then(|e| e.to_str()).unwrap_or("json")
    ));
    let result = (|| -> Result<()> {
        let mut f = File::create(&tmp_path)?;
        FileExt::lock_exclusive(&f).map_err(std::io::Error::from)?;
        f.write_all(bytes)?;
        f.sync_all()?;
        FileExt::unlock(&f).ok();
        drop(f);
        fs::rename(&tmp_path, target)?;
        Ok(())
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

fn read_locked(path: &Path) -> Result<Vec<u8>> {
    let f = File::open(path)?;
    FileExt::lock_shared(&f).map_err(std::io::Error::from)?;
    let bytes = fs::read(path)?;
    FileExt::unlock(&f).ok();
    Ok(bytes)
}

// ─── Session Store ─────────────────────────────────────────────────────────────

/// The sole writer of on-disk session data (§3 Ownership). All other
/// components mutate in-memory copies and publish through this store.
#[derive(Debug, Clone)]
pub struct SessionStore {
    base_dir: PathBuf,
}

impl SessionStore {
    /// `~/.sven/sessions` unless overridden.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into() }
    }

    pub fn default_base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".sven")
            .join("sessions")
    }

    fn session_dir(&self, id: &str) -> PathBuf {
        self.base_dir.join(id)
    }

    /// Public accessor for the session's on-disk directory — used by
    /// [`crate::runner::SessionRunner`] to bind the watch socket alongside
    /// the session's other files.
    pub fn session_dir_path(&self, id: &str) -> PathBuf {
        self.session_dir(id)
    }

    fn metadata_path(&self, id: &str) -> PathBuf {
        self.session_dir(id).join("session.json")
    }

    fn messages_dir(&self, id: &str) -> PathBuf {
        self.session_dir(id).join("messages")
    }

    fn message_path(&self, id: &str, msg_id: &str) -> PathBuf {
        self.messages_dir(id).join(format!("{msg_id}.json"))
    }

    fn todos_path(&self, id: &str) -> PathBuf {
        self.session_dir(id).join("todos.json")
    }

    fn legacy_monolith_path(&self, id: &str) -> PathBuf {
        self.base_dir.join(format!("{id}.json"))
    }

    /// Create a new session. Generates an ID if `session_id` is absent;
    /// fails with [`SessionError::AlreadyExists`] if the ID is already taken.
    pub fn create_session(
        &self,
        session_id: Option<String>,
        agent_name: Option<&str>,
    ) -> Result<SessionMetadata> {
        let id = session_id.unwrap_or_else(|| generate_session_id(agent_name.unwrap_or("agent")));
        if self.session_dir(&id).exists() {
            return Err(SessionError::AlreadyExists(id));
        }
        let meta = SessionMetadata::new(id.clone(), agent_name);
        fs::create_dir_all(self.messages_dir(&id))?;
        atomic_write(&self.metadata_path(&id), serde_json::to_vec_pretty(&meta)?.as_slice())?;
        Ok(meta)
    }

    pub fn get_session_metadata(&self, session_id: &str) -> Result<SessionMetadata> {
        self.migrate_legacy_if_present(session_id)?;
        let path = self.metadata_path(session_id);
        if !path.exists() {
            return Err(SessionError::NotFound(session_id.to_string()));
        }
        let bytes = read_locked(&path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Partial update: `mutate` receives the current metadata and may modify
    /// it in place; `updated_at` is bumped automatically.
    pub fn update_session_metadata(
        &self,
        session_id: &str,
        mutate: impl FnOnce(&mut SessionMetadata),
    ) -> Result<SessionMetadata> {
        let mut meta = self.get_session_metadata(session_id)?;
        mutate(&mut meta);
        meta.updated_at = now_epoch();
        atomic_write(&self.metadata_path(session_id), serde_json::to_vec_pretty(&meta)?.as_slice())?;
        Ok(meta)
    }

    /// Persist a message immediately (§3 invariant 6: every observable
    /// mutation is durable before the loop suspends).
    pub fn save_message(&self, session_id: &str, message: &PersistedMessage) -> Result<()> {
        if !self.session_dir(session_id).exists() {
            return Err(SessionError::NotFound(session_id.to_string()));
        }
        let path = self.message_path(session_id, &message.id);
        atomic_write(&path, serde_json::to_vec_pretty(message)?.as_slice())?;
        // Touch updated_at so list_sessions reflects fresh activity.
        let _ = self.update_session_metadata(session_id, |_| {});
        Ok(())
    }

    pub fn get_message(&self, session_id: &str, msg_id: &str) -> Result<PersistedMessage> {
        let path = self.message_path(session_id, msg_id);
        if !path.exists() {
            return Err(SessionError::MessageNotFound(msg_id.to_string(), session_id.to_string()));
        }
        let bytes = read_locked(&path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// All messages, sorted by `timestamp` ascending (§4.2 Operations).
    pub fn get_all_messages(&self, session_id: &str) -> Result<Vec<PersistedMessage>> {
        let dir = self.messages_dir(session_id);
        let mut messages = Vec::new();
        if dir.exists() {
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let bytes = read_locked(&entry.path())?;
                messages.push(serde_json::from_slice::<PersistedMessage>(&bytes)?);
            }
        }
        messages.sort_by(|a, b| a.timestamp.partial_cmp(&b.timestamp).unwrap_or(std::cmp::Ordering::Equal));
        Ok(messages)
    }

    pub fn save_todos(&self, session_id: &str, todos: &serde_json::Value) -> Result<()> {
        atomic_write(&self.todos_path(session_id), serde_json::to_vec_pretty(todos)?.as_slice())
    }

    pub fn get_todos(&self, session_id: &str) -> Result<serde_json::Value> {
        let path = self.todos_path(session_id);
        if !path.exists() {
            return Ok(serde_json::Value::Array(Vec::new()));
        }
        let bytes = read_locked(&path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn delete_session(&self, session_id: &str) -> Result<()> {
        let dir = self.session_dir(session_id);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }

    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let mut out = Vec::new();
        if !self.base_dir.exists() {
            return Ok(out);
        }
        for entry in fs::read_dir(&self.base_dir)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().to_string();
            let Ok(meta) = self.get_session_metadata(&id) else { continue };
            let message_count = self.get_all_messages(&id).map(|m| m.len()).unwrap_or(0);
            out.push(SessionSummary {
                id: id.clone(),
                title: meta.title.clone(),
                created_at: meta.created_at,
                updated_at: meta.updated_at,
                message_count,
                is_running: meta.pid.is_some_and(pid_is_live_sven),
            });
        }
        out.sort_by(|a, b| b.updated_at.partial_cmp(&a.updated_at).unwrap_or(std::cmp::Ordering::Equal));
        Ok(out)
    }

    /// Metadata + all messages (§4.2 Operations), for resume/crash recovery.
    pub fn load_full_session(&self, session_id: &str) -> Result<LoadedSession> {
        let metadata = self.get_session_metadata(session_id)?;
        let messages = self.get_all_messages(session_id)?;
        Ok(LoadedSession { metadata, messages })
    }

    /// One-shot legacy migration: if a pre-layout `{session_id}.json`
    /// monolith exists (an artifact of the original tool's early versions,
    /// before the layered layout), read it, split metadata and messages into
    /// the new layout, and delete the original.
    fn migrate_legacy_if_present(&self, session_id: &str) -> Result<()> {
        let legacy = self.legacy_monolith_path(session_id);
        if !legacy.exists() || self.metadata_path(session_id).exists() {
            return Ok(());
        }
        #[derive(Deserialize)]
        struct LegacyMonolith {
            #[serde(flatten)]
            metadata: SessionMetadata,
            #[serde(default)]
            messages: Vec<PersistedMessage>,
        }
        let bytes = read_locked(&legacy)?;
        let legacy: LegacyMonolith = serde_json::from_slice(&bytes)?;
        fs::create_dir_all(self.messages_dir(session_id))?;
        atomic_write(
            &self.metadata_path(session_id),
            serde_json::to_vec_pretty(&legacy.metadata)?.as_slice(),
        )?;
        for msg in &legacy.messages {
            atomic_write(
                &self.message_path(session_id, &msg.id),
                serde_json::to_vec_pretty(msg)?.as_slice(),
            )?;
        }
        fs::remove_file(&legacy)?;
        Ok(())
    }

    // ─── PID locking (§4.2 PID locking) ───────────────────────────────────────

    /// Returns true iff the caller now owns the session's PID lock: the
    /// stored PID was (a) absent, (b) equal to the current process's PID,
    /// or (c) a dead process. On success writes the current PID + timestamp.
    pub fn check_and_set_pid(&self, session_id: &str) -> Result<bool> {
        let meta = self.get_session_metadata(session_id)?;
        let current = std::process::id();
        let can_claim = match meta.pid {
            None => true,
            Some(pid) if pid == current => true,
            Some(pid) => !pid_is_live_sven(pid),
        };
        if can_claim {
            self.update_session_metadata(session_id, |m| {
                m.pid = Some(current);
                m.pid_updated_at = Some(now_epoch());
            })?;
        }
        Ok(can_claim)
    }

    /// Release the PID lock. Called on graceful and non-graceful exit.
    pub fn clear_pid(&self, session_id: &str) -> Result<()> {
        self.update_session_metadata(session_id, |m| {
            m.pid = None;
            m.pid_updated_at = None;
        })?;
        Ok(())
    }

    /// `{exists, pid, is_running, watch_server_available, agent_name,
    /// created_at, message_count}` (§4.2). `is_running` is true iff a *live
    /// process other than the caller* owns the PID — a process should never
    /// report itself as "running" via this path (that would defeat `-w`).
    pub fn get_session_status(&self, session_id: &str) -> Result<SessionStatus> {
        let Ok(meta) = self.get_session_metadata(session_id) else {
            return Ok(SessionStatus {
                exists: false,
                pid: None,
                is_running: false,
                watch_server_available: false,
                agent_name: String::new(),
                created_at: None,
                message_count: 0,
            });
        };
        let current = std::process::id();
        let is_running = meta.pid.is_some_and(|pid| pid != current && pid_is_live_sven(pid));
        let watch_sock = self.session_dir(session_id).join("watch.sock");
        Ok(SessionStatus {
            exists: true,
            pid: meta.pid,
            is_running,
            watch_server_available: watch_sock.exists(),
            agent_name: meta.agent_display_name,
            created_at: Some(meta.created_at),
            message_count: self.get_all_messages(session_id).map(|m| m.len()).unwrap_or(0),
        })
    }

    pub fn watch_socket_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("watch.sock")
    }
}

/// Throttled save helper on top of [`SessionStore`] (§4.2 Debounced saver).
///
/// The message-level `save_message` path is always immediate; this is for
/// higher-frequency, non-critical state (e.g. the todo list, which a single
/// tool call can rewrite several times in quick succession) where writing
/// to disk on every mutation would be wasted I/O. A call within
/// `min_interval` of the last flush just records `value` as pending; a call
/// after the interval has passed flushes immediately, and `flush()` forces
/// out whatever is still pending regardless of timing (e.g. at end of turn,
/// so a deferred save is never silently dropped).
pub struct DebouncedSaver<T> {
    min_interval: Duration,
    last_saved: Mutex<Option<Instant>>,
    pending: Mutex<Option<T>>,
}

impl<T: Clone> DebouncedSaver<T> {
    /// §4.2's specified minimum save interval of 500 ms.
    pub fn new() -> Self {
        Self::with_interval(Duration::from_millis(500))
    }

    pub fn with_interval(min_interval: Duration) -> Self {
        Self { min_interval, last_saved: Mutex::new(None), pending: Mutex::new(None) }
    }

    /// Record `value` as the latest state to persist. Saves immediately via
    /// `save` iff the minimum interval has elapsed since the last flush;
    /// otherwise defers `value` until `flush()` or the next call once the
    /// interval has passed.
    pub fn save_or_defer(
        &self,
        value: T,
        save: impl FnOnce(&T) -> Result<()>,
    ) -> Result<()> {
        let now = Instant::now();
        let mut last_saved = self.last_saved.lock().unwrap();
        let due = match *last_saved {
            None => true,
            Some(t) => now.duration_since(t) >= self.min_interval,
        };
        if due {
            save(&value)?;
            *last_saved = Some(now);
            *self.pending.lock().unwrap() = None;
        } else {
            *self.pending.lock().unwrap() = Some(value);
        }
        Ok(())
    }

    /// Persist the pending value, if any, regardless of elapsed time.
    pub fn flush(&self, save: impl FnOnce(&T) -> Result<()>) -> Result<()> {
        let mut pending = self.pending.lock().unwrap();
        if let Some(value) = pending.take() {
            save(&value)?;
            *self.last_saved.lock().unwrap() = Some(Instant::now());
        }
        Ok(())
    }
}

impl<T: Clone> Default for DebouncedSaver<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Liveness probe via `kill(pid, 0)` (no signal sent, just existence check).
/// Does not (and cannot, without `/proc`) verify the PID belongs to *this*
/// application specifically — callers accept the small window where a PID
/// was recycled by an unrelated process, matching the original's behavior.
#[cfg(unix)]
fn pid_is_live_sven(pid: u32) -> bool {
    // SAFETY: kill(pid, 0) only probes existence/permission; it never sends
    // a signal to the target and has no memory-safety implications.
    let ret = unsafe { libc::kill(pid as libc::pid_t, 0) };
    ret == 0
}

#[cfg(not(unix))]
fn pid_is_live_sven(_pid: u32) -> bool {
    false
}
