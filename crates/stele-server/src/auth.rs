use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use base64::Engine;
use stele_types::Principal;

use crate::config::StaticUser;
use crate::error::{ServerError, ServerResult};

/// Transport credentials as parsed from the request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Credentials {
    Basic { username: String, password: String },
    Anonymous,
}

impl Credentials {
    /// Extract credentials from request headers.
    ///
    /// A missing Authorization header is anonymous; a malformed basic
    /// header is an authentication failure, not a bad request.
    pub fn from_headers(headers: &HeaderMap) -> ServerResult<Self> {
        let Some(value) = headers.get(header::AUTHORIZATION) else {
            return Ok(Self::Anonymous);
        };
        let value = value.to_str().map_err(|_| {
            ServerError::AuthFailed("authorization header is not valid UTF-8".to_string())
        })?;
        let encoded = value.strip_prefix("Basic ").ok_or_else(|| {
            ServerError::AuthFailed("only basic authentication is supported".to_string())
        })?;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|_| {
                ServerError::AuthFailed("basic credentials are not valid base64".to_string())
            })?;
        let decoded = String::from_utf8(decoded).map_err(|_| {
            ServerError::AuthFailed("basic credentials are not valid UTF-8".to_string())
        })?;
        let (username, password) = decoded.split_once(':').ok_or_else(|| {
            ServerError::AuthFailed("basic credentials must be username:password".to_string())
        })?;
        Ok(Self::Basic {
            username: username.to_string(),
            password: password.to_string(),
        })
    }
}

/// Authentication seam of the boundary.
///
/// The core never sees credentials; it receives the [`Principal`] resolved
/// here and records its agent as `authority` on writes.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn authenticate(&self, credentials: &Credentials) -> ServerResult<Principal>;
}

/// Accepts every request; basic credentials only pick the principal name.
pub struct AllowAll;

#[async_trait]
impl AuthProvider for AllowAll {
    async fn authenticate(&self, credentials: &Credentials) -> ServerResult<Principal> {
        Ok(match credentials {
            Credentials::Basic { username, .. } => Principal::named(username.clone()),
            Credentials::Anonymous => Principal::anonymous(),
        })
    }
}

/// Checks basic credentials against the configured user list; anonymous
/// requests are refused.
pub struct StaticCredentials {
    users: Vec<StaticUser>,
}

impl StaticCredentials {
    pub fn new(users: Vec<StaticUser>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl AuthProvider for StaticCredentials {
    async fn authenticate(&self, credentials: &Credentials) -> ServerResult<Principal> {
        let Credentials::Basic { username, password } = credentials else {
            return Err(ServerError::AuthFailed("credentials required".to_string()));
        };
        let user = self
            .users
            .iter()
            .find(|u| &u.username == username && &u.password == password)
            .ok_or_else(|| {
                ServerError::AuthFailed(format!("unknown user or wrong password for {username:?}"))
            })?;

        let mut principal = Principal::named(user.username.clone());
        if let Some(agent) = &user.agent {
            principal = principal.with_agent(agent.clone());
        }
        Ok(principal)
    }
}
