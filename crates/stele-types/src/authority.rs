use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Process-wide authority identity.
///
/// Rendered as an xAPI account agent and recorded on every statement whose
/// authenticated principal does not carry its own authority agent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authority {
    pub name: String,
    pub home_page: String,
}

impl Authority {
    pub fn new(name: impl Into<String>, home_page: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            home_page: home_page.into(),
        }
    }

    /// The authority as an xAPI agent sub-document.
    pub fn agent(&self) -> Value {
        json!({
            "objectType": "Agent",
            "account": { "homePage": self.home_page, "name": self.name }
        })
    }
}

impl Default for Authority {
    fn default() -> Self {
        Self {
            name: "stele".to_string(),
            home_page: "http://localhost".to_string(),
        }
    }
}

/// An already-authenticated caller, as handed to the core by the boundary.
///
/// The core never verifies credentials; it records `authority` from the
/// principal on write and otherwise treats the principal as opaque context.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    pub name: String,
    /// Granted scopes, carried through for the boundary's use.
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Authority agent recorded on statements this principal writes; falls
    /// back to the process authority when absent.
    #[serde(default)]
    pub agent: Option<Value>,
}

impl Principal {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scopes: Vec::new(),
            agent: None,
        }
    }

    pub fn anonymous() -> Self {
        Self::named("anonymous")
    }

    pub fn with_agent(mut self, agent: Value) -> Self {
        self.agent = Some(agent);
        self
    }
}
