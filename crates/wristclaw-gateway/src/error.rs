// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

/// Errors surfaced by the monitor session loop and message pipeline.
///
/// These are error *kinds*, not wire types — see the error-handling table
/// this module implements: transient network/server errors are retried or
/// trigger reconnect before ever reaching a caller as one of these.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("connect error: {0}")]
    Connect(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("fatal configuration error: {0}")]
    Fatal(String),
}

/// Errors from the fetch utility. Distinguishes retryable transport failures
/// from a plain non-2xx response so the retry predicate stays total.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("http status {0}")]
    Status(u16),
}

impl FetchError {
    /// Substring-based classification of a transport error's text, matching
    /// the narrow, explicit keyword list this kind of predicate is meant to
    /// use rather than a broad heuristic that risks over-retrying bugs.
    pub fn is_transient_text(text: &str) -> bool {
        let lower = text.to_ascii_lowercase();
        const KEYWORDS: [&str; 6] = ["fetch", "network", "econnr", "etimedout", "enotfound", "socket"];
        KEYWORDS.iter().any(|kw| lower.contains(kw))
    }
}
