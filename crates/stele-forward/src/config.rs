use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ForwardError, ForwardResult};
use crate::retry::RetryPolicy;

fn default_active() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_backoff_base_ms() -> u64 {
    100
}

fn default_backoff_cap_ms() -> u64 {
    30_000
}

fn default_queue_capacity() -> usize {
    256
}

/// One remote LRS destination, as it appears under `[[forwarding.targets]]`
/// in the configuration file.
///
/// `name`, `endpoint`, `username`, and `password` are required; everything
/// else has a process default. The list is read-only for the process
/// lifetime.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForwardTarget {
    /// Unique label used in logs and delivery reports.
    pub name: String,

    /// Inactive targets stay configured but receive no forwards.
    #[serde(default = "default_active")]
    pub active: bool,

    /// Statements endpoint of the remote LRS.
    pub endpoint: String,
    pub username: String,
    pub password: String,

    /// Retries after the first failed attempt; total attempts are
    /// `max_retries + 1`.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,

    /// Bound of this target's delivery queue; overflow drops the forward
    /// with a report rather than blocking ingestion.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl ForwardTarget {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_cap: Duration::from_millis(self.backoff_cap_ms),
        }
    }
}

/// Validate a target list in toto; the first problem rejects the whole list.
pub fn validate_targets(targets: &[ForwardTarget]) -> ForwardResult<()> {
    let mut names = HashSet::new();
    for (index, target) in targets.iter().enumerate() {
        let invalid = |reason: &str| ForwardError::InvalidTarget {
            index,
            reason: reason.to_string(),
        };

        if target.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if !names.insert(target.name.as_str()) {
            return Err(ForwardError::DuplicateTarget {
                name: target.name.clone(),
            });
        }
        let url = reqwest::Url::parse(&target.endpoint).map_err(|e| {
            invalid(&format!("endpoint is not a valid URL: {e}"))
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(invalid("endpoint must use http or https"));
        }
        if target.timeout_ms == 0 {
            return Err(invalid("timeout_ms must be positive"));
        }
        if target.queue_capacity == 0 {
            return Err(invalid("queue_capacity must be positive"));
        }
    }
    Ok(())
}
