// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Per-session pause / interrupt / injection signaling (§4.7).
//!
//! Owned by the agent loop; keyboard-shortcut listeners and any sub-loops
//! hold non-owning `Arc<ControlManager>` handles. This is the ONLY place
//! where keyboard-listener tasks interact with a running loop (§4.7
//! Concurrency note) — they set fields here, never touch session storage
//! directly.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;

/// Concurrent-safe control-plane signals for one session's agent loop.
#[derive(Debug, Default)]
pub struct ControlManager {
    interrupt_requested: AtomicBool,
    paused: AtomicBool,
    resume_notify: Notify,
    pending_input: Mutex<VecDeque<String>>,
}

impl ControlManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// `^B` — request interrupt. Polled at every suspension point.
    pub fn request_interrupt(&self) {
        self.interrupt_requested.store(true, Ordering::SeqCst);
    }

    /// Polled at every suspension point (before a new LLM stream, between
    /// pending tool parts, inside cooperative tool loops). Consuming callers
    /// should treat `true` as a one-shot signal and clear it via
    /// [`Self::acknowledge_interrupt`] once the loop has terminated.
    pub fn should_interrupt(&self) -> bool {
        self.interrupt_requested.load(Ordering::SeqCst)
    }

    /// Reset the interrupt flag after the loop has terminated in response
    /// to it, so a subsequent turn doesn't inherit a stale interrupt.
    pub fn acknowledge_interrupt(&self) {
        self.interrupt_requested.store(false, Ordering::SeqCst);
    }

    /// `^P` — toggle pause/resume.
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
        if !paused {
            self.resume_notify.notify_waiters();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Suspends until resumed, if currently paused; returns immediately
    /// otherwise. Called at the same suspension points as
    /// [`Self::should_interrupt`].
    pub async fn wait_if_paused(&self) {
        while self.paused.load(Ordering::SeqCst) {
            self.resume_notify.notified().await;
        }
    }

    /// `^A` — queue an interjection to be appended as a new user message
    /// after the current assistant turn finishes.
    pub fn interject(&self, text: impl Into<String>) {
        self.pending_input.lock().unwrap().push_back(text.into());
    }

    /// Non-blocking: pop the oldest queued interjection, if any.
    pub fn pending_user_input(&self) -> Option<String> {
        self.pending_input.lock().unwrap().pop_front()
    }

    pub fn has_pending_input(&self) -> bool {
        !self.pending_input.lock().unwrap().is_empty()
    }
}
