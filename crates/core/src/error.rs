use thiserror::Error;

/// The failure taxonomy shared by every synchronization component.
///
/// Cloneable so that coalesced fetch futures can hand the same outcome to
/// every waiter.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("network error: {0}")]
    Network(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    /// The remote already holds this record. Callers treat this as a
    /// successful no-op since delivery is idempotent.
    #[error("duplicate delivery")]
    Duplicate,

    #[error("operation timed out after {0}s")]
    Timeout(u64),

    #[error("event bus error: {0}")]
    Bus(#[from] EventBusError),
}

impl SyncError {
    /// Whether backoff-and-retry can reasonably recover this failure.
    /// Server errors with a 4xx status are the request's fault and are
    /// never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Network(_) | SyncError::Timeout(_) => true,
            SyncError::Server { status, .. } => !(400..=499).contains(status),
            SyncError::Auth(_)
            | SyncError::Validation(_)
            | SyncError::Duplicate
            | SyncError::Bus(_) => false,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum EventBusError {
    #[error("invalid channel: {0}")]
    InvalidChannel(String),

    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("channel closed")]
    ChannelClosed,

    #[error("subscriber lagged: {0} events missed")]
    Lagged(u64),
}
