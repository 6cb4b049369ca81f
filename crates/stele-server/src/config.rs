use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use stele_backend::{BackendOptions, BackendRegistry};
use stele_forward::{validate_targets, ForwardTarget};
use stele_query::QueryLimits;
use stele_types::Authority;

use crate::error::{ServerError, ServerResult};

/// Whole-process configuration, loaded once from a TOML file.
///
/// Every section has a default, so an empty file runs a memory-backed LRS
/// on localhost with open access. Validation is wholesale: any malformed
/// section fails startup rather than being skipped.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerSection,
    pub authority: AuthoritySection,
    pub backend: BackendOptions,
    pub limits: QueryLimits,
    pub forwarding: ForwardingSection,
    pub auth: AuthSection,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    pub bind_addr: SocketAddr,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8100".parse().unwrap(),
        }
    }
}

/// Process identity recorded as `authority` when a principal carries no
/// agent of its own.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthoritySection {
    pub name: String,
    pub home_page: String,
}

impl Default for AuthoritySection {
    fn default() -> Self {
        let authority = Authority::default();
        Self {
            name: authority.name,
            home_page: authority.home_page,
        }
    }
}

impl AuthoritySection {
    pub fn to_authority(&self) -> Authority {
        Authority::new(&self.name, &self.home_page)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ForwardingSection {
    pub targets: Vec<ForwardTarget>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthSection {
    /// Static principals for the reference auth provider. An empty list
    /// means open access.
    pub users: Vec<StaticUser>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StaticUser {
    pub username: String,
    pub password: String,
    /// Recorded as `authority` on statements this user writes.
    #[serde(default)]
    pub agent: Option<serde_json::Value>,
}

impl Config {
    /// Read and validate a configuration file.
    pub fn load(path: &Path) -> ServerResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)
            .map_err(|e| ServerError::Config(format!("failed to parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Check everything that can be checked without opening the backend.
    pub fn validate(&self) -> ServerResult<()> {
        let registry = BackendRegistry::with_defaults();
        if !registry.names().contains(&self.backend.name.as_str()) {
            return Err(ServerError::Config(format!(
                "unknown backend {:?}; known backends: {}",
                self.backend.name,
                registry.names().join(", ")
            )));
        }

        if self.limits.default_page_size == 0 {
            return Err(ServerError::Config(
                "limits.default_page_size must be positive".to_string(),
            ));
        }
        if self.limits.max_page_size < self.limits.default_page_size {
            return Err(ServerError::Config(
                "limits.max_page_size must be at least the default page size".to_string(),
            ));
        }

        validate_targets(&self.forwarding.targets)?;

        let mut usernames = HashSet::new();
        for user in &self.auth.users {
            if user.username.trim().is_empty() {
                return Err(ServerError::Config(
                    "auth users must have a non-empty username".to_string(),
                ));
            }
            if !usernames.insert(user.username.as_str()) {
                return Err(ServerError::Config(format!(
                    "duplicate auth user {:?}",
                    user.username
                )));
            }
        }

        Ok(())
    }
}
