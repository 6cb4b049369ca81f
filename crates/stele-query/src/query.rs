use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::AgentFilter;
use crate::cursor::Cursor;
use crate::error::QueryError;

/// Page-size bounds, fixed per process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryLimits {
    /// Page size used when a query does not name one.
    #[serde(default = "QueryLimits::default_page_size")]
    pub default_page_size: usize,
    /// Hard ceiling; a query asking for more is an error, never clamped.
    #[serde(default = "QueryLimits::default_max_page_size")]
    pub max_page_size: usize,
}

impl QueryLimits {
    fn default_page_size() -> usize {
        100
    }

    fn default_max_page_size() -> usize {
        500
    }
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            default_page_size: Self::default_page_size(),
            max_page_size: Self::default_max_page_size(),
        }
    }
}

/// Result ordering over `stored` time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Ascending,
    /// Newest first; the default, matching typical reporting access.
    #[default]
    Descending,
}

impl SortOrder {
    pub fn is_ascending(&self) -> bool {
        matches!(self, Self::Ascending)
    }
}

/// Canonical representation of a statement search.
///
/// Backend-independent by construction: translation into an engine's native
/// filter plan is the adapter's job, never this type's. All filters combine
/// conjunctively. `since` is exclusive and `until` inclusive, both over
/// `stored` time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CanonicalQuery {
    pub agent: Option<AgentFilter>,
    pub verb: Option<String>,
    pub activity: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    /// When false (the default), voided statements are filtered from results.
    pub include_voided: bool,
    pub order: SortOrder,
    pub limit: usize,
    pub cursor: Option<Cursor>,
}

impl CanonicalQuery {
    /// An unfiltered first-page query at the default page size.
    pub fn unfiltered(limits: &QueryLimits) -> Self {
        Self {
            agent: None,
            verb: None,
            activity: None,
            since: None,
            until: None,
            include_voided: false,
            order: SortOrder::default(),
            limit: limits.default_page_size,
            cursor: None,
        }
    }

    pub fn with_agent(mut self, agent: AgentFilter) -> Self {
        self.agent = Some(agent);
        self
    }

    pub fn with_verb(mut self, verb: impl Into<String>) -> Self {
        self.verb = Some(verb.into());
        self
    }

    pub fn with_activity(mut self, activity: impl Into<String>) -> Self {
        self.activity = Some(activity.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_cursor(mut self, cursor: Cursor) -> Self {
        self.cursor = Some(cursor);
        self
    }

    pub fn including_voided(mut self) -> Self {
        self.include_voided = true;
        self
    }

    /// Parse the wire parameter set.
    ///
    /// Accepted keys: `agent` (agent JSON), `verb`, `activity`, `since`,
    /// `until`, `limit`, `cursor`, `ascending`, `voided`. Unknown and
    /// duplicate keys are rejected; so are out-of-range limits and inverted
    /// time ranges. Callers are told, never silently corrected.
    pub fn parse(params: &[(String, String)], limits: &QueryLimits) -> Result<Self, QueryError> {
        let mut query = Self::unfiltered(limits);
        let mut seen: Vec<&str> = Vec::new();

        for (key, value) in params {
            if seen.contains(&key.as_str()) {
                return Err(QueryError::DuplicateParameter(key.clone()));
            }

            match key.as_str() {
                "agent" => {
                    let json: serde_json::Value = serde_json::from_str(value)
                        .map_err(|e| QueryError::InvalidAgent(e.to_string()))?;
                    query.agent = Some(AgentFilter::from_value(&json)?);
                }
                "verb" => {
                    query.verb = Some(non_empty(value, "verb")?);
                }
                "activity" => {
                    query.activity = Some(non_empty(value, "activity")?);
                }
                "since" => {
                    query.since = Some(parse_instant(value, "since")?);
                }
                "until" => {
                    query.until = Some(parse_instant(value, "until")?);
                }
                "limit" => {
                    let requested: i64 =
                        value.parse().map_err(|_| QueryError::InvalidNumber {
                            field: "limit",
                            value: value.clone(),
                        })?;
                    if requested <= 0 {
                        return Err(QueryError::LimitNotPositive(requested));
                    }
                    query.limit = requested as usize;
                }
                "cursor" => {
                    query.cursor = Some(Cursor::from_token(non_empty(value, "cursor")?));
                }
                "ascending" => {
                    query.order = if parse_flag(value, "ascending")? {
                        SortOrder::Ascending
                    } else {
                        SortOrder::Descending
                    };
                }
                "voided" => {
                    query.include_voided = parse_flag(value, "voided")?;
                }
                other => return Err(QueryError::UnknownParameter(other.to_string())),
            }

            seen.push(key.as_str());
        }

        query.validate(limits)?;
        Ok(query)
    }

    /// Range and limit checks shared by the wire parser and typed callers.
    pub fn validate(&self, limits: &QueryLimits) -> Result<(), QueryError> {
        if self.limit == 0 {
            return Err(QueryError::LimitNotPositive(0));
        }
        if self.limit > limits.max_page_size {
            return Err(QueryError::LimitTooLarge {
                requested: self.limit,
                max: limits.max_page_size,
            });
        }
        if let (Some(since), Some(until)) = (self.since, self.until) {
            if since > until {
                return Err(QueryError::InvalidRange { since, until });
            }
        }
        Ok(())
    }
}

fn non_empty(value: &str, field: &'static str) -> Result<String, QueryError> {
    if value.is_empty() {
        return Err(QueryError::EmptyParameter(field));
    }
    Ok(value.to_string())
}

fn parse_instant(value: &str, field: &'static str) -> Result<DateTime<Utc>, QueryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| QueryError::InvalidInstant {
            field,
            value: value.to_string(),
        })
}

fn parse_flag(value: &str, field: &'static str) -> Result<bool, QueryError> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(QueryError::InvalidFlag {
            field,
            value: value.to_string(),
        }),
    }
}
