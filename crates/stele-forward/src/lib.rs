//! Forwarding engine for the Stele LRS.
//!
//! After a statement is durably written, the [`Forwarder`] relays a copy to
//! every active remote target. Each target gets its own worker task and
//! bounded queue, an exponential-backoff retry schedule, and a per-target
//! timeout; a permanent remote rejection is never retried. Terminal outcomes
//! are published as [`DeliveryReport`]s on a broadcast channel.
//!
//! The engine plugs into the store through the `ForwardSink` trait and ships
//! an HTTP transport ([`HttpDelivery`]); tests substitute the
//! [`StatementDelivery`] seam instead of a network.

pub mod config;
pub mod delivery;
pub mod engine;
pub mod error;
pub mod retry;

pub use config::{validate_targets, ForwardTarget};
pub use delivery::{HttpDelivery, StatementDelivery};
pub use engine::{DeliveryReport, Forwarder};
pub use error::{DeliveryError, ForwardError, ForwardResult};
pub use retry::RetryPolicy;
