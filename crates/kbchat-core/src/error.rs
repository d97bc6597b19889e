//! Error taxonomy for provider calls and the waterfall router

use std::time::Duration;
use thiserror::Error;

/// Longest upstream error body kept in a fault (keeps logs readable).
const MAX_ERROR_BODY: usize = 500;

/// A single provider's failure to produce an answer.
///
/// The router absorbs every variant the same way; [`ProviderFault::kind`]
/// exists for diagnostics only.
#[derive(Debug, Error)]
pub enum ProviderFault {
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("provider error: {0}")]
    Upstream(String),
    #[error("no data received within {0:?}")]
    Timeout(Duration),
    #[error("stream finished without any text")]
    Empty,
}

/// Coarse classification of a fault, used for logs and user hints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Auth,
    RateLimited,
    Server,
    Rejected,
    Transport,
    Malformed,
    Timeout,
    Empty,
}

impl ProviderFault {
    /// Build a status fault, truncating long bodies on a char boundary
    pub fn status(status: u16, body: &str) -> Self {
        let body = match body.char_indices().nth(MAX_ERROR_BODY) {
            Some((idx, _)) => format!("{}...", &body[..idx]),
            None => body.to_string(),
        };
        Self::Status { status, body }
    }

    pub fn kind(&self) -> FaultKind {
        match self {
            Self::Status { status, .. } => match status {
                401 | 403 => FaultKind::Auth,
                429 => FaultKind::RateLimited,
                500..=599 => FaultKind::Server,
                _ => FaultKind::Rejected,
            },
            Self::Transport(e) if e.is_timeout() => FaultKind::Timeout,
            Self::Transport(_) => FaultKind::Transport,
            Self::Malformed(_) => FaultKind::Malformed,
            Self::Upstream(message) => classify_upstream(message),
            Self::Timeout(_) => FaultKind::Timeout,
            Self::Empty => FaultKind::Empty,
        }
    }
}

fn classify_upstream(message: &str) -> FaultKind {
    let lower = message.to_lowercase();
    let rate_limited = ["429", "resource_exhausted", "rate limit", "rate_limit", "quota"];
    let auth = ["401", "403", "api_key_invalid", "unauthenticated", "permission_denied"];
    if rate_limited.iter().any(|p| lower.contains(p)) {
        FaultKind::RateLimited
    } else if auth.iter().any(|p| lower.contains(p)) {
        FaultKind::Auth
    } else {
        FaultKind::Server
    }
}

/// Why one candidate was skipped
#[derive(Debug, Error)]
#[error("{provider}: {fault}")]
pub struct SkipReason {
    pub provider: String,
    #[source]
    pub fault: ProviderFault,
}

/// Terminal outcomes of a single `answer` request
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("no LLM provider is configured; set at least one provider API key")]
    Unconfigured,
    #[error("the knowledge base is empty; add documents before asking questions")]
    NoKnowledge,
    #[error("all {} provider(s) failed; last error: {}", .attempts.len(), last_reason_text(.attempts))]
    Exhausted { attempts: Vec<SkipReason> },
    #[error("request cancelled")]
    Cancelled,
}

impl RouterError {
    /// The last skip of an exhausted chain, as a diagnostic hint
    pub fn last_reason(&self) -> Option<&SkipReason> {
        match self {
            Self::Exhausted { attempts } => attempts.last(),
            _ => None,
        }
    }
}

fn last_reason_text(attempts: &[SkipReason]) -> String {
    attempts
        .last()
        .map(|r| r.to_string())
        .unwrap_or_else(|| "none".to_string())
}
