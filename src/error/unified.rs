//! Unified error classification and recovery.

use serde::{Deserialize, Serialize};

/// Machine-readable error code reported by a planner backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InsufficientQuota,
    BillingHardLimit,
    RateLimitExceeded,
    ContextLengthExceeded,
    ContentFiltered,
    ServerError,
    ServiceUnavailable,
    Timeout,
    Unknown,
}

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Billing,
    RateLimit,
    Timeout,
    Planner,
    Action,
    Confirmation,
    Configuration,
    Serialization,
    Io,
    Unknown,
}

/// Suggested recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySuggestion {
    RetryWithBackoff,
    TopUpBudget,
    IncreaseTimeout,
    RetryTurn,
    CheckConfiguration,
    CheckActionImplementation,
    AskUser,
    ContactSupport,
}
