// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use sven_config::AgentMode;
use sven_tools::{events::TodoItem, ToolCall};

/// Which compaction policy actually ran for a given `ContextCompacted` event.
///
/// Mirrors `sven_config::CompactionStrategy` but adds the `Emergency` case,
/// which is not a user-selectable strategy — it is the deterministic
/// no-model-call fallback `compact::emergency_compact` takes when even the
/// compaction prompt itself would overflow the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionStrategyUsed {
    /// Tool-output pruning (§4.8 policy 1, priority 50) — no model call.
    Pruned,
    Structured,
    Narrative,
    Emergency,
}

impl std::fmt::Display for CompactionStrategyUsed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pruned => write!(f, "pruned"),
            Self::Structured => write!(f, "structured"),
            Self::Narrative => write!(f, "narrative"),
            Self::Emergency => write!(f, "emergency"),
        }
    }
}

/// One tool result the `Pruned` compaction policy replaced, identified by
/// the `tool_call_id` shared between the live `Message` model and the
/// persisted `store::Part` (§4.8 policy 1).
#[derive(Debug, Clone)]
pub struct PrunedPart {
    pub tool_call_id: String,
    pub original_output_tokens: usize,
    pub replacement_text: String,
}

/// Events emitted by the agent during a single turn.
///
/// Consumers (the session recorder, the watch server, the TUI, the CI
/// runner) subscribe to these to drive their own state. This is the payload
/// carried over the process-wide event bus; nothing here is specific to any
/// one subscriber.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A text chunk streamed from the model
    TextDelta(String),
    /// A complete text response from the model (after streaming finishes)
    TextComplete(String),
    /// A thinking/reasoning chunk from the model (extended thinking API).
    /// Consumers should accumulate deltas and finalise them into a Thinking
    /// segment when the model signals the end of the reasoning block.
    ThinkingDelta(String),
    /// A complete thinking/reasoning block (accumulated from ThinkingDelta events).
    ThinkingComplete(String),
    /// The model has requested a tool call
    ToolCallStarted(ToolCall),
    /// A tool call finished
    ToolCallFinished {
        call_id: String,
        tool_name: String,
        output: String,
        is_error: bool,
        /// Multi-call tool (`batch`) ran with a mix of outcomes — maps to
        /// `PartStatus::Partial`, distinct from `is_error` (§4.6, §9).
        is_partial: bool,
        /// This part never ran: an interrupt was observed before its turn
        /// came up, and it is being marked `interrupted` along with every
        /// later pending part in the same step (§4.9 step 5). Takes
        /// priority over `is_error`/`is_partial`, which describe a call
        /// that actually executed.
        is_interrupted: bool,
    },
    /// Context was compacted; statistics for the UI
    ContextCompacted {
        tokens_before: usize,
        tokens_after: usize,
        strategy: CompactionStrategyUsed,
        /// The loop's round counter at the time compaction ran (0 = proactive,
        /// before any tool calls this step).
        turn: u32,
        /// Tool results the `Pruned` policy replaced in this pass, so the
        /// durable store can set `Part.metadata = {pruned, pruned_at,
        /// original_output_tokens}` on the matching persisted parts (§3
        /// invariant 5). Empty for the `Structured`/`Narrative`/`Emergency`
        /// strategies, which rewrite whole messages instead.
        pruned: Vec<PrunedPart>,
    },
    /// Current token usage update
    TokenUsage {
        input: u32,
        output: u32,
        /// Tokens served from the provider's prompt cache this turn.
        cache_read: u32,
        /// Tokens written into the provider's prompt cache this turn.
        cache_write: u32,
        /// Running session total of cache-read tokens across all turns.
        cache_read_total: u64,
        /// Running session total of cache-write tokens across all turns.
        cache_write_total: u64,
        /// The model's usable context window, for UI percentage display.
        max_tokens: usize,
    },
    /// The agent has finished processing the current user turn
    TurnComplete,
    /// The turn was cancelled mid-stream (control-plane interrupt, or an
    /// external cancellation channel firing). Any text already streamed is
    /// committed to the session beforehand and included here so the
    /// consumer can decide whether to keep it visible.
    Aborted { partial_text: String },
    /// A recoverable error occurred
    Error(String),
    /// The todo list was updated
    TodoUpdate(Vec<TodoItem>),
    /// The agent mode was changed
    ModeChanged(AgentMode),
    /// The agent is asking the user a question (id links to QuestionAnswer)
    Question { id: String, questions: Vec<String> },
    /// Answer to a previous Question event
    QuestionAnswer { id: String, answer: String },
}

impl AgentEvent {
    /// The bus topic this event belongs to (§4.1 of the design docs). Used by
    /// the watch server and by subscribers that only care about a subset of
    /// topics.
    pub fn topic(&self) -> &'static str {
        match self {
            Self::TextDelta(_) | Self::TextComplete(_) => "text-delta",
            Self::ThinkingDelta(_) | Self::ThinkingComplete(_) => "reasoning-delta",
            Self::ToolCallStarted(_) => "tool-start",
            Self::ToolCallFinished { .. } => "tool-complete",
            Self::TurnComplete | Self::Aborted { .. } => "finish",
            Self::Error(_) => "error",
            Self::ContextCompacted { .. }
            | Self::TokenUsage { .. }
            | Self::TodoUpdate(_)
            | Self::ModeChanged(_)
            | Self::Question { .. }
            | Self::QuestionAnswer { .. } => "tool-result",
        }
    }
}
