/// Task state definitions for tracking crawl progress
///
/// Every fetch task walks `Pending → InFlight → {Success, Retryable, Fatal}`;
/// a retryable task re-enters `Pending` once its delay and identity step is done.
use std::fmt;

/// Which failure made a task retryable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryKind {
    Transient,
    Blocked,
}

/// Represents the current state of a fetch task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    // ===== Active States =====
    /// Task is queued and waiting for a fetch slot
    Pending,

    /// Task holds a fetch slot and its request is on the wire
    InFlight,

    /// Last attempt failed in a recoverable way; waiting for its retry step
    Retryable(RetryKind),

    // ===== Terminal States =====
    /// Page fetched and handed to extraction
    Success,

    /// Task abandoned; a diagnostic has been recorded
    Fatal,
}

impl TaskState {
    /// Returns true if no further attempt will be made for this task
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Fatal)
    }

    /// Returns true if the task still counts towards outstanding work
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Checks whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InFlight)
                | (Self::Pending, Self::Fatal)
                | (Self::InFlight, Self::Success)
                | (Self::InFlight, Self::Retryable(_))
                | (Self::InFlight, Self::Fatal)
                | (Self::Retryable(_), Self::Pending)
        )
    }

    /// Short lowercase label used in logs and the failure ledger
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Retryable(RetryKind::Transient) => "retryable_transient",
            Self::Retryable(RetryKind::Blocked) => "retryable_blocked",
            Self::Success => "success",
            Self::Fatal => "fatal",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
