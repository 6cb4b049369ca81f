use async_trait::async_trait;
use stele_types::Statement;

use crate::config::ForwardTarget;
use crate::error::{DeliveryError, ForwardError, ForwardResult};

/// One delivery attempt to one target.
///
/// Implementations classify failures through [`DeliveryError`] so the engine
/// can tell a retryable outage from a permanent rejection. Statements are
/// always handed over as a batch slice, even when it holds a single one.
#[async_trait]
pub trait StatementDelivery: Send + Sync {
    async fn deliver(
        &self,
        target: &ForwardTarget,
        statements: &[Statement],
    ) -> Result<(), DeliveryError>;
}

/// HTTP delivery: POST the statement array to the target's endpoint with
/// basic auth and the per-target timeout.
pub struct HttpDelivery {
    client: reqwest::Client,
}

impl HttpDelivery {
    pub fn new() -> ForwardResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ForwardError::Client(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl StatementDelivery for HttpDelivery {
    async fn deliver(
        &self,
        target: &ForwardTarget,
        statements: &[Statement],
    ) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(&target.endpoint)
            .basic_auth(&target.username, Some(&target.password))
            .timeout(target.timeout())
            .json(statements)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DeliveryError::Timeout
                } else {
                    DeliveryError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(DeliveryError::Rejected(status.as_u16()))
        }
    }
}
