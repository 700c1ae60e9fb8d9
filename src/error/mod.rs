//! Error types for foreman.

pub mod unified;

pub use unified::{ErrorCategory, ErrorCode, RecoverySuggestion};

use thiserror::Error;

/// Primary error type for all foreman operations.
#[derive(Error, Debug)]
pub enum ForemanError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Action {action} failed: {message}")]
    ActionFailed { action: String, message: String },

    #[error("Planner error: {message}")]
    Planner {
        message: String,
        code: Option<ErrorCode>,
    },

    #[error("Planner returned no actions and no message")]
    PlanningFailed,

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Billing failure: {0}")]
    BillingFailure(String),

    #[error("Confirmation declined for {0}")]
    ConfirmationDeclined(String),

    #[error("Confirmation {0} was abandoned before a response arrived")]
    ConfirmationAbandoned(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl ForemanError {
    /// Create an action failure for the named action.
    pub fn action(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ActionFailed {
            action: action.into(),
            message: message.into(),
        }
    }

    /// Create a planner error, optionally carrying a backend error code.
    ///
    /// Quota and billing codes are promoted to their dedicated variants so
    /// callers can match on them without inspecting the code.
    pub fn planner(message: impl Into<String>, code: Option<ErrorCode>) -> Self {
        let message = message.into();
        match code {
            Some(ErrorCode::InsufficientQuota) => Self::QuotaExceeded(message),
            Some(ErrorCode::BillingHardLimit) => Self::BillingFailure(message),
            _ => Self::Planner { message, code },
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::QuotaExceeded(_) | Self::BillingFailure(_) => ErrorCategory::Billing,
            Self::Planner { code, .. } => match code {
                Some(ErrorCode::RateLimitExceeded) => ErrorCategory::RateLimit,
                Some(ErrorCode::Timeout) => ErrorCategory::Timeout,
                _ => ErrorCategory::Planner,
            },
            Self::PlanningFailed => ErrorCategory::Planner,
            Self::ActionFailed { .. } | Self::UnknownAction(_) | Self::InvalidArgument(_) => {
                ErrorCategory::Action
            }
            Self::ConfirmationDeclined(_) | Self::ConfirmationAbandoned(_) => {
                ErrorCategory::Confirmation
            }
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::Io(_) => ErrorCategory::Io,
            Self::InvalidState(_) => ErrorCategory::Unknown,
        }
    }

    /// Whether this is a quota or billing failure that must end the run.
    pub fn is_billing(&self) -> bool {
        matches!(self.category(), ErrorCategory::Billing)
    }

    /// Whether this error is potentially retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Planner { code, .. } => !matches!(
                code,
                Some(ErrorCode::ContextLengthExceeded) | Some(ErrorCode::ContentFiltered)
            ),
            _ => matches!(
                self.category(),
                ErrorCategory::RateLimit | ErrorCategory::Timeout | ErrorCategory::Planner
            ),
        }
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self.category() {
            ErrorCategory::Billing => RecoverySuggestion::TopUpBudget,
            ErrorCategory::RateLimit => RecoverySuggestion::RetryWithBackoff,
            ErrorCategory::Timeout => RecoverySuggestion::IncreaseTimeout,
            ErrorCategory::Planner => RecoverySuggestion::RetryTurn,
            ErrorCategory::Configuration => RecoverySuggestion::CheckConfiguration,
            ErrorCategory::Action => RecoverySuggestion::CheckActionImplementation,
            ErrorCategory::Confirmation => RecoverySuggestion::AskUser,
            _ => RecoverySuggestion::ContactSupport,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, ForemanError>;
