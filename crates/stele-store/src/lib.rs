//! Statement store orchestrator for the Stele LRS.
//!
//! [`StatementStore`] is the single owner of the write path: it validates
//! and canonicalizes raw submissions, assigns `stored` time and `authority`,
//! runs the dedup check, writes through the active backend adapter, and
//! hands newly written statements to the forwarding seam. On the read path
//! it resolves the derived `voided` flag that adapters deliberately know
//! nothing about.
//!
//! The forwarding engine plugs in through [`ForwardSink`]; the store never
//! waits on delivery and never fails an ingest over a forwarding problem.

pub mod error;
pub mod forward;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use forward::{ForwardIntakeError, ForwardSink};
pub use store::{IngestReceipt, StatementStore};
