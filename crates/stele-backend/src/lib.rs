//! Storage adapters for the Stele LRS.
//!
//! Every engine integration implements [`StatementBackend`]: idempotent
//! single-statement writes, fetch by id, and a paged query evaluated by the
//! adapter's own translation of the canonical query model. Adapters classify
//! their failures into the shared [`ErrorKind`] taxonomy and report liveness
//! through [`BackendHealth`].
//!
//! Two reference engines ship in-tree: [`InMemoryBackend`], a lock-protected
//! map used by tests and ephemeral deployments, and [`FsLogBackend`], a
//! CRC-framed append-only file log. The [`BackendRegistry`] is the fixed
//! table that turns a configured adapter name into a running instance.

pub mod error;
pub mod fslog;
pub mod memory;
pub mod registry;
pub mod traits;

pub use error::{BackendError, BackendResult, ErrorKind};
pub use fslog::FsLogBackend;
pub use memory::InMemoryBackend;
pub use registry::{BackendOptions, BackendRegistry, RegistryError};
pub use traits::{BackendHealth, StatementBackend, StatementPage, WriteOutcome};
