//! Foundation types for the Stele LRS.
//!
//! This crate provides the statement model and the identity and temporal
//! types used throughout the system. Every other Stele crate depends on
//! `stele-types`.
//!
//! # Key Types
//!
//! - [`Statement`] — Canonical xAPI statement with validation and voiding helpers
//! - [`StatementId`] — UUID statement identifier (v7 when server-generated)
//! - [`Fingerprint`] — BLAKE3 digest of a statement's client-owned content
//! - [`Authority`] — Process identity recorded on stored statements
//! - [`Principal`] — Already-authenticated caller handed in by the boundary
//! - [`StoredClock`] — Monotonically non-decreasing `stored`-time source

pub mod authority;
pub mod clock;
pub mod error;
pub mod fingerprint;
pub mod id;
pub mod statement;

pub use authority::{Authority, Principal};
pub use clock::StoredClock;
pub use error::TypeError;
pub use fingerprint::Fingerprint;
pub use id::StatementId;
pub use statement::{Statement, STATEMENT_REF_TYPE, VOIDED_VERB_IRI};
