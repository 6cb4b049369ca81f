use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::QueryError;

/// Actor filter, keyed by an agent's inverse functional identifier.
///
/// An xAPI agent is identified by exactly one of `mbox`, `mbox_sha1sum`,
/// `openid`, or `account`; a filter carrying zero or several identifiers is
/// ambiguous and rejected at parse time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentFilter {
    Mbox(String),
    MboxSha1sum(String),
    Openid(String),
    Account { home_page: String, name: String },
}

impl AgentFilter {
    pub fn mbox(address: impl Into<String>) -> Self {
        Self::Mbox(address.into())
    }

    pub fn account(home_page: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Account {
            home_page: home_page.into(),
            name: name.into(),
        }
    }

    /// Build a filter from an agent JSON sub-document.
    pub fn from_value(value: &Value) -> Result<Self, QueryError> {
        let Value::Object(fields) = value else {
            return Err(QueryError::InvalidAgent(
                "agent must be a JSON object".to_string(),
            ));
        };

        let mut found: Vec<AgentFilter> = Vec::new();

        if let Some(mbox) = fields.get("mbox") {
            let mbox = string_field(mbox, "mbox")?;
            if !mbox.starts_with("mailto:") {
                return Err(QueryError::InvalidAgent(
                    "mbox must be a mailto: IRI".to_string(),
                ));
            }
            found.push(Self::Mbox(mbox));
        }
        if let Some(sha) = fields.get("mbox_sha1sum") {
            found.push(Self::MboxSha1sum(string_field(sha, "mbox_sha1sum")?));
        }
        if let Some(openid) = fields.get("openid") {
            found.push(Self::Openid(string_field(openid, "openid")?));
        }
        if let Some(account) = fields.get("account") {
            let home_page = account.get("homePage").and_then(Value::as_str);
            let name = account.get("name").and_then(Value::as_str);
            match (home_page, name) {
                (Some(home_page), Some(name)) => found.push(Self::Account {
                    home_page: home_page.to_string(),
                    name: name.to_string(),
                }),
                _ => {
                    return Err(QueryError::InvalidAgent(
                        "account requires both homePage and name".to_string(),
                    ))
                }
            }
        }

        match found.len() {
            0 => Err(QueryError::InvalidAgent(
                "one of mbox, mbox_sha1sum, openid, account is required".to_string(),
            )),
            1 => Ok(found.remove(0)),
            _ => Err(QueryError::InvalidAgent(
                "an agent carries exactly one identifier".to_string(),
            )),
        }
    }

    /// Returns `true` if an actor sub-document is identified by this filter.
    pub fn matches(&self, actor: &Value) -> bool {
        match self {
            Self::Mbox(mbox) => actor.get("mbox").and_then(Value::as_str) == Some(mbox),
            Self::MboxSha1sum(sha) => {
                actor.get("mbox_sha1sum").and_then(Value::as_str) == Some(sha)
            }
            Self::Openid(openid) => actor.get("openid").and_then(Value::as_str) == Some(openid),
            Self::Account { home_page, name } => {
                let account = &actor["account"];
                account.get("homePage").and_then(Value::as_str) == Some(home_page)
                    && account.get("name").and_then(Value::as_str) == Some(name)
            }
        }
    }
}

fn string_field(value: &Value, name: &str) -> Result<String, QueryError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| QueryError::InvalidAgent(format!("{name} must be a string")))
}
