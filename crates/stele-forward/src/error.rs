use thiserror::Error;

/// Result alias for forwarding-engine operations.
pub type ForwardResult<T> = Result<T, ForwardError>;

/// Startup-time failures of the forwarding engine.
///
/// Target-list validation is wholesale: one bad entry rejects the entire
/// configuration, so a process never runs with a partially applied list.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("forwarding target {index}: {reason}")]
    InvalidTarget { index: usize, reason: String },

    #[error("duplicate forwarding target name {name:?}")]
    DuplicateTarget { name: String },

    #[error("http client setup failed: {0}")]
    Client(String),
}

/// A single delivery attempt's failure, as classified by the transport.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("remote rejected with status {0}")]
    Rejected(u16),
}

impl DeliveryError {
    /// Returns `true` when retrying the same payload cannot help.
    ///
    /// Remote 4xx responses are permanent except 408 (request timeout) and
    /// 429 (throttling); transport errors and timeouts are always worth a
    /// retry.
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout => false,
            Self::Rejected(status) => {
                (400..500).contains(status) && *status != 408 && *status != 429
            }
        }
    }
}
