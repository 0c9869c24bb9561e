//! Fetch outcome classification
//!
//! | Outcome | Classification |
//! |---------|----------------|
//! | transport error or timeout | Transient |
//! | HTTP 200, non-empty body | Success |
//! | HTTP 200, empty body | Transient (malformed) |
//! | HTTP 403/429/503 with a challenge marker | Blocked |
//! | HTTP 500/502/503/504/408, or 403/407/429 without a marker | Transient |
//! | HTTP 404 and anything else | Fatal |

use crate::crawler::fetcher::FetchResponse;
use std::fmt;

/// Why a Transient outcome happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransientCause {
    /// Connection, TLS or timeout failure
    Transport(String),
    /// Retryable HTTP status
    Status(u16),
    /// 200 response whose body could not be used
    Malformed(String),
    /// No identity could be issued for the attempt
    NoIdentity,
}

/// Label of one fetch outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Success,
    Transient(TransientCause),
    Blocked { status: u16 },
    Fatal { reason: String },
}

impl Classification {
    /// Whether the proxy of the attempt should be reported as failed
    pub fn blames_proxy(&self) -> bool {
        matches!(
            self,
            Self::Transient(TransientCause::Transport(_)) | Self::Blocked { .. }
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Transient(_) => "transient",
            Self::Blocked { .. } => "blocked",
            Self::Fatal { .. } => "fatal",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Transient(TransientCause::Transport(e)) => write!(f, "transient: {}", e),
            Self::Transient(TransientCause::Status(s)) => write!(f, "transient: HTTP {}", s),
            Self::Transient(TransientCause::Malformed(e)) => write!(f, "transient: malformed page: {}", e),
            Self::Transient(TransientCause::NoIdentity) => write!(f, "transient: no identity available"),
            Self::Blocked { status } => write!(f, "blocked: HTTP {} challenge", status),
            Self::Fatal { reason } => write!(f, "fatal: {}", reason),
        }
    }
}

/// Statuses that carry a bot challenge when the body has a marker
const CHALLENGE_STATUSES: [u16; 3] = [403, 429, 503];

/// Statuses retried with backoff
const TRANSIENT_STATUSES: [u16; 8] = [403, 407, 408, 429, 500, 502, 503, 504];

/// Labels fetch outcomes using a configured set of challenge markers
#[derive(Debug, Clone)]
pub struct FailureClassifier {
    markers: Vec<String>,
}

impl FailureClassifier {
    /// Markers are matched case-insensitively against the response body
    pub fn new(markers: &[String]) -> Self {
        Self {
            markers: markers.iter().map(|m| m.to_lowercase()).collect(),
        }
    }

    fn has_challenge_marker(&self, body: &str) -> bool {
        if self.markers.is_empty() {
            return false;
        }
        let body = body.to_lowercase();
        self.markers.iter().any(|m| body.contains(m.as_str()))
    }

    /// Classifies one fetch outcome
    pub fn classify(&self, response: &FetchResponse) -> Classification {
        let outcome = match response {
            Ok(outcome) => outcome,
            Err(e) => return Classification::Transient(TransientCause::Transport(e.message.clone())),
        };

        let status = outcome.status;

        // A challenge page wins over the plain status rule
        if CHALLENGE_STATUSES.contains(&status) && self.has_challenge_marker(&outcome.body) {
            return Classification::Blocked { status };
        }

        match status {
            200 if outcome.body.trim().is_empty() => {
                Classification::Transient(TransientCause::Malformed("empty body".to_string()))
            }
            200 => Classification::Success,
            404 => Classification::Fatal {
                reason: "HTTP 404".to_string(),
            },
            s if TRANSIENT_STATUSES.contains(&s) => Classification::Transient(TransientCause::Status(s)),
            s => Classification::Fatal {
                reason: format!("HTTP {}", s),
            },
        }
    }
}
