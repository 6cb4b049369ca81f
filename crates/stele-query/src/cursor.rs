use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::QueryError;

/// Opaque continuation token for paginated queries.
///
/// Minted and interpreted only by the backend adapter that produced it; the
/// query model and the store treat it as a black box. The wire form is hex
/// over the adapter's JSON cursor state, which keeps tokens URL-safe without
/// advertising their structure.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    /// Wrap a token received from a client.
    pub fn from_token(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The wire form of the token.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Mint a cursor from adapter-private state.
    pub fn from_state<T: Serialize>(state: &T) -> Result<Self, QueryError> {
        let bytes =
            serde_json::to_vec(state).map_err(|e| QueryError::CursorEncode(e.to_string()))?;
        Ok(Self(hex::encode(bytes)))
    }

    /// Recover adapter-private state from a token.
    ///
    /// Any token that does not decode to the expected state shape is
    /// rejected; adapters surface that as a bad request, never a panic.
    pub fn decode_state<T: DeserializeOwned>(&self) -> Result<T, QueryError> {
        let bytes = hex::decode(&self.0).map_err(|_| QueryError::InvalidCursor)?;
        serde_json::from_slice(&bytes).map_err(|_| QueryError::InvalidCursor)
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
