//! HTTP boundary for the Stele LRS.
//!
//! Hosts the xAPI statements resource over axum: submission (POST/PUT),
//! filtered retrieval with `more`-link pagination (GET), the single-fetch
//! statementId / voidedStatementId forms, plus `/about` and the `/health`
//! heartbeat. Principals are resolved by an [`AuthProvider`] before any
//! handler touches the store; configuration is a single TOML file with
//! runnable defaults.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod router;
pub mod server;

pub use auth::{AllowAll, AuthProvider, Credentials, StaticCredentials};
pub use config::{AuthSection, AuthoritySection, Config, ForwardingSection, ServerSection, StaticUser};
pub use error::{ApiError, ServerError, ServerResult};
pub use router::build_router;
pub use server::{AppState, SteleServer};
