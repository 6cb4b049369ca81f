use stele_types::Statement;
use thiserror::Error;

/// Raised when the forwarding engine cannot take a statement in.
#[derive(Debug, Error)]
#[error("forward intake failed: {0}")]
pub struct ForwardIntakeError(pub String);

/// Intake side of the forwarding engine.
///
/// The store hands every newly written statement to this seam right after
/// the adapter confirms the write; replays are never handed over.
/// Implementations must not block: accept or reject immediately and deliver
/// later. A rejection is logged by the store and never surfaced to the
/// ingestion caller.
pub trait ForwardSink: Send + Sync {
    fn forward(&self, statement: Statement) -> Result<(), ForwardIntakeError>;
}
