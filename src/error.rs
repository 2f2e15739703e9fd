use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Telegram error: {0}")]
    Telegram(String),

    #[error("Discord error: {0}")]
    Discord(String),

    #[error("Internal error")]
    Internal(#[from] anyhow::Error),
}

pub type AppResult<T> = Result<T, AppError>;

/// Classification of a failed delivery attempt.
///
/// Transient errors keep consuming the task's retry budget; permanent errors
/// dead-letter the task immediately. Only the dispatcher that produced the
/// error has enough context to classify it, so this lives at the dispatch
/// seam rather than being guessed from error strings afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// Network failure, 5xx, rate limit — worth retrying with backoff.
    /// `retry_after` carries a platform-provided wait hint when one exists.
    Transient {
        reason: String,
        retry_after: Option<Duration>,
    },
    /// Invalid or revoked destination, payload rejected — never retried.
    Permanent { reason: String },
}

impl DeliveryFailure {
    pub fn transient(reason: impl Into<String>) -> Self {
        DeliveryFailure::Transient {
            reason: reason.into(),
            retry_after: None,
        }
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        DeliveryFailure::Permanent {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            DeliveryFailure::Transient { reason, .. } => reason,
            DeliveryFailure::Permanent { reason } => reason,
        }
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, DeliveryFailure::Permanent { .. })
    }
}
