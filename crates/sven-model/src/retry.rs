// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Classified retry for the LLM Streaming Adapter's initial HTTP call (§4.5
//! "Retry policy", §7 error taxonomy).
//!
//! A retry always re-opens a fresh request/stream — never resumes a partial
//! one (§9 "Coroutines / streaming": "a retry re-opens a new sequence").
//! This module only governs the pre-stream call (connect + status line);
//! once bytes start arriving the adapter commits to that stream for the
//! turn, matching how `openai_compat::complete` is structured.

use std::time::Duration;

use rand::Rng;

/// Error-kind classification mirroring §7's taxonomy. Only the kinds that
/// can arise from the adapter's HTTP call are modeled here — `tool_error`,
/// `path_safety_cancelled`, `config`, `session`, `quota_exceeded`, and
/// `interrupted` are raised elsewhere in the stack (dispatcher, CLI entry
/// point, agent loop), not by the model driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 401/403 — not retryable; fatal with an API-key hint.
    Auth,
    /// 429 — retryable, long backoff.
    RateLimit,
    /// 5xx — retryable, moderate backoff.
    Server,
    /// Network/timeout errors below the HTTP layer — retryable, short backoff.
    Retryable,
    /// 400/422 — not retryable; fatal with a message/model hint.
    InvalidRequest,
    /// 404 — not retryable; fatal with an endpoint/model hint.
    Resource,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::RateLimit | Self::Server | Self::Retryable)
    }

    /// Backoff delay for the given 0-indexed `attempt` (so `attempt == 0` is
    /// the delay before the *second* try), before jitter is applied. Formulas
    /// and caps per-kind, `attempt` being 1-indexed there:
    ///
    /// - `rate_limit`: `min(1000 * 3^(attempt-1), 30000)` ms
    /// - `server`: `min(1000 * 2^(attempt-1), 10000)` ms
    /// - `retryable` (network/timeout): `500 * attempt` ms
    fn delay_for(self, attempt: u32) -> Duration {
        match self {
            Self::RateLimit => {
                let ms = 1000u64.saturating_mul(3u64.saturating_pow(attempt));
                Duration::from_millis(ms.min(30_000))
            }
            Self::Server => {
                let ms = 1000u64.saturating_mul(2u64.saturating_pow(attempt));
                Duration::from_millis(ms.min(10_000))
            }
            Self::Retryable => Duration::from_millis(500u64.saturating_mul(attempt as u64 + 1)),
            Self::Auth | Self::InvalidRequest | Self::Resource => Duration::from_secs(0),
        }
    }

    pub fn hint(self) -> &'static str {
        match self {
            Self::Auth => "check that the API key is set and valid for this endpoint",
            Self::RateLimit => "the endpoint is rate-limiting requests; retrying with backoff",
            Self::Server => "the endpoint returned a server error; retrying",
            Self::Retryable => "a network or timeout error occurred; retrying",
            Self::InvalidRequest => "the request was rejected — check the message content or model name",
            Self::Resource => "the endpoint or model was not found — check base_url and model name",
        }
    }
}

/// Classify an HTTP status code into an [`ErrorKind`].
pub fn classify_status(status: u16) -> ErrorKind {
    match status {
        401 | 403 => ErrorKind::Auth,
        429 => ErrorKind::RateLimit,
        400 | 422 => ErrorKind::InvalidRequest,
        404 => ErrorKind::Resource,
        500..=599 => ErrorKind::Server,
        _ => ErrorKind::Retryable,
    }
}

/// Classify a transport-level failure (connect refused, DNS, timeout — no
/// HTTP response at all) as retryable.
pub fn classify_transport_error() -> ErrorKind {
    ErrorKind::Retryable
}

/// Per-kind capped backoff for attempt `attempt` (0-indexed), with ±20%
/// uniform jitter layered on top, honoring a server-provided `retry_after`
/// (e.g. `Retry-After` header on a 429) in place of the computed delay when
/// present.
pub fn backoff_delay(kind: ErrorKind, attempt: u32, retry_after: Option<Duration>) -> Duration {
    if let Some(d) = retry_after {
        return d;
    }
    jitter(kind.delay_for(attempt))
}

/// Apply ±20% uniform jitter to a base delay.
fn jitter(base: Duration) -> Duration {
    let base_ms = base.as_millis() as i64;
    if base_ms == 0 {
        return base;
    }
    let spread = base_ms / 5; // 20%
    let offset = rand::thread_rng().gen_range(-spread..=spread);
    Duration::from_millis((base_ms + offset).max(0) as u64)
}

/// Error wrapper carrying a pre-determined [`ErrorKind`] (and, for 429s, the
/// `Retry-After` duration) so the retry loop doesn't need to re-parse status
/// codes out of error text. HTTP call sites attach one via `anyhow::Error::new`
/// or `.context()` when a non-2xx status is observed.
#[derive(Debug)]
pub struct Classified {
    pub kind: ErrorKind,
    pub retry_after: Option<Duration>,
}

impl std::fmt::Display for Classified {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind.hint())
    }
}

impl std::error::Error for Classified {}

/// Default `classify` function for [`with_retry`]: unwrap a [`Classified`]
/// error if the attempt produced one (status-derived), otherwise treat the
/// failure as a transport-level error (connect/DNS/timeout below the HTTP
/// layer never reaches a status line to classify).
pub fn classify_attempt_error(e: &anyhow::Error) -> (ErrorKind, Option<Duration>) {
    match e.downcast_ref::<Classified>() {
        Some(c) => (c.kind, c.retry_after),
        None => (classify_transport_error(), None),
    }
}

/// Default maximum retry attempts for a classified-retryable error (§4.5:
/// "bounded attempt count (default 3)").
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Run `make_attempt` up to `DEFAULT_MAX_ATTEMPTS` times, retrying only when
/// the returned error classifies as retryable. `classify` extracts an
/// [`ErrorKind`] (and optional `Retry-After` duration) from the attempt's
/// error; attempts that succeed or fail non-retryably return immediately.
pub async fn with_retry<T, F, Fut>(
    mut make_attempt: F,
    classify: impl Fn(&anyhow::Error) -> (ErrorKind, Option<Duration>),
) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match make_attempt().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                let (kind, retry_after) = classify(&e);
                if !kind.is_retryable() || attempt + 1 >= DEFAULT_MAX_ATTEMPTS {
                    return Err(e.context(kind.hint()));
                }
                let delay = backoff_delay(kind, attempt, retry_after);
                tracing::warn!(
                    attempt = attempt + 1,
                    max_attempts = DEFAULT_MAX_ATTEMPTS,
                    delay_ms = delay.as_millis() as u64,
                    kind = ?kind,
                    "retrying model completion call: {e:#}"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
