// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Deterministic, character-based token estimator for the persisted
//! [`crate::store`] data model.
//!
//! This is distinct from [`sven_model::Message::approx_tokens`], which is a
//! cheaper `chars/4` heuristic the live agent loop uses turn-to-turn to
//! decide when to compact. This estimator operates on the durable
//! `Part`-based session representation (`store::Part`, `store::PersistedMessage`)
//! and is the one the Compaction Engine budgets against, so it distinguishes
//! CJK text (denser per character) from the rest.
//!
//! Never calls the model or the network — callers (the compaction engine,
//! the session summary view) depend on this being a pure function of its
//! input.

use crate::store::{Part, PartStatus, PersistedMessage};

/// Fixed per-part and per-message overhead, in tokens, matching how chat
/// APIs bill a few extra tokens per role/field wrapper beyond raw content.
const TOOL_PART_OVERHEAD: usize = 20;
const MESSAGE_OVERHEAD: usize = 10;

/// Estimate the token count of an arbitrary string.
///
/// `ceil(chinese_chars / 1.5 + other_chars / 4)`, with a lower bound of 1
/// for any non-empty string. Empty strings estimate to 0 so that summing
/// over an empty `Vec<Part>` doesn't introduce phantom overhead beyond the
/// fixed per-part/per-message constants.
pub fn estimate_text(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    let mut cjk = 0usize;
    let mut other = 0usize;
    for ch in text.chars() {
        if is_cjk(ch) {
            cjk += 1;
        } else {
            other += 1;
        }
    }
    let raw = cjk as f64 / 1.5 + other as f64 / 4.0;
    raw.ceil().max(1.0) as usize
}

/// CJK Unified Ideographs plus the common extension/compatibility blocks and
/// the full-width punctuation ranges that accompany Chinese/Japanese text.
fn is_cjk(ch: char) -> bool {
    let c = ch as u32;
    matches!(c,
        0x4E00..=0x9FFF |   // CJK Unified Ideographs
        0x3400..=0x4DBF |   // CJK Extension A
        0xF900..=0xFAFF |   // CJK Compatibility Ideographs
        0x3000..=0x303F |   // CJK punctuation
        0xFF00..=0xFFEF     // Full-width forms
    )
}

/// Estimate the tokens contributed by a single [`Part`].
pub fn estimate_part(part: &Part) -> usize {
    match part {
        Part::Text { text, .. } => estimate_text(text),
        Part::Tool { input, output, status, .. } => {
            if matches!(status, PartStatus::Pending | PartStatus::Running) {
                // Invisible to the model until resolved (§3 invariant 1);
                // still has a nonzero rendering cost in memory but contributes
                // no LLM-context tokens.
                return 0;
            }
            let input_text = input.to_string();
            TOOL_PART_OVERHEAD + estimate_text(&input_text) + estimate_text(output)
        }
    }
}

/// Estimate the tokens contributed by a whole [`PersistedMessage`]: the fixed
/// message overhead plus the sum of its parts.
pub fn estimate_message(message: &PersistedMessage) -> usize {
    MESSAGE_OVERHEAD + message.parts.iter().map(estimate_part).sum::<usize>()
}

/// Sum `estimate_message` over a full message list.
pub fn estimate_messages(messages: &[PersistedMessage]) -> usize {
    messages.iter().map(estimate_message).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Part;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(estimate_text(""), 0);
    }

    #[test]
    fn nonempty_ascii_has_lower_bound_one() {
        assert_eq!(estimate_text("a"), 1);
    }

    #[test]
    fn ascii_divides_by_four_rounded_up() {
        // 8 ascii chars / 4 = 2.0 -> 2
        assert_eq!(estimate_text("12345678"), 2);
        // 9 ascii chars / 4 = 2.25 -> 3
        assert_eq!(estimate_text("123456789"), 3);
    }

    #[test]
    fn cjk_divides_by_one_point_five_rounded_up() {
        // 3 CJK chars / 1.5 = 2.0 -> 2
        assert_eq!(estimate_text("你好吗"), 2);
    }

    #[test]
    fn mixed_cjk_and_ascii_sums_both_terms() {
        // 3 CJK / 1.5 = 2.0, 4 ascii / 4 = 1.0 => 3.0 -> 3
        assert_eq!(estimate_text("你好吗abcd"), 3);
    }

    #[test]
    fn tool_part_adds_fixed_overhead() {
        let part = Part::Tool {
            id: "t1".into(),
            tool_name: "shell".into(),
            input: serde_json::json!({"command": "ls"}),
            output: "a\nb\n".into(),
            status: PartStatus::Completed,
            start_time: 0.0,
            end_time: Some(1.0),
            metadata: None,
        };
        assert!(estimate_part(&part) >= TOOL_PART_OVERHEAD);
    }

    #[test]
    fn pending_tool_part_contributes_zero() {
        let part = Part::Tool {
            id: "t1".into(),
            tool_name: "shell".into(),
            input: serde_json::json!({"command": "ls"}),
            output: String::new(),
            status: PartStatus::Pending,
            start_time: 0.0,
            end_time: None,
            metadata: None,
        };
        assert_eq!(estimate_part(&part), 0);
    }

    #[test]
    fn message_adds_fixed_overhead() {
        let msg = PersistedMessage::new_text(crate::store::MsgRole::User, "hi");
        assert_eq!(estimate_message(&msg), MESSAGE_OVERHEAD + 1);
    }

    #[test]
    fn estimate_messages_sums_all() {
        let a = PersistedMessage::new_text(crate::store::MsgRole::User, "12345678");
        let b = PersistedMessage::new_text(crate::store::MsgRole::Assistant, "abcd");
        let total = estimate_messages(&[a, b]);
        assert_eq!(total, (MESSAGE_OVERHEAD + 2) + (MESSAGE_OVERHEAD + 1));
    }
}
