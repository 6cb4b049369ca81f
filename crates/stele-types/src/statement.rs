use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TypeError;
use crate::fingerprint::Fingerprint;
use crate::id::StatementId;

/// Verb IRI that marks the referenced statement as retracted.
pub const VOIDED_VERB_IRI: &str = "http://adlnet.gov/expapi/verbs/voided";

/// `objectType` tag of a statement reference.
pub const STATEMENT_REF_TYPE: &str = "StatementRef";

/// Canonical form of an xAPI statement.
///
/// `actor`, `verb`, and `object` are kept as opaque sub-documents; the model
/// checks their shape on the way in but never rewrites them. `stored` and
/// `authority` are server-assigned at canonicalization and never taken from
/// the submission. `voided` is derived at read time from the corpus and is
/// serialized only when true, so at-rest records carry no derived state.
///
/// Statements are append-only and immutable once stored; retraction is a new
/// statement with the voiding verb, never a mutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub id: StatementId,
    pub actor: Value,
    pub verb: Value,
    pub object: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    /// Client-claimed event time; defaults to `stored` when not supplied.
    pub timestamp: DateTime<Utc>,
    /// Server-assigned ingestion time, monotonically non-decreasing per
    /// store instance.
    pub stored: DateTime<Utc>,
    /// Agent identifying the system that stored the statement.
    pub authority: Value,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub voided: bool,
    /// Remaining submission fields (`version`, `attachments`, ...), carried
    /// verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Statement {
    /// Validate a raw submission and produce its canonical form.
    ///
    /// Rejects non-object JSON, missing or non-object `actor`/`verb`/`object`,
    /// a verb without a non-empty `id` IRI, a non-UUID `id`, a malformed
    /// `timestamp`, and a voiding verb whose object is not a statement
    /// reference. A missing `id` is generated; a missing `timestamp` defaults
    /// to `stored`.
    pub fn canonicalize(
        raw: Value,
        stored: DateTime<Utc>,
        authority: Value,
    ) -> Result<Self, TypeError> {
        let Value::Object(mut fields) = raw else {
            return Err(TypeError::NotAnObject);
        };

        let id = match fields.remove("id") {
            Some(Value::String(s)) => StatementId::parse(&s)?,
            Some(_) => {
                return Err(TypeError::InvalidField {
                    field: "id",
                    expected: "a UUID string",
                })
            }
            None => StatementId::generate(),
        };

        let actor = take_object(&mut fields, "actor")?;
        let verb = take_object(&mut fields, "verb")?;
        match verb.get("id").and_then(Value::as_str) {
            Some(iri) if !iri.is_empty() => {}
            _ => {
                return Err(TypeError::InvalidField {
                    field: "verb",
                    expected: "an object with a non-empty 'id' IRI",
                })
            }
        }
        let object = take_object(&mut fields, "object")?;

        let result = take_optional_object(&mut fields, "result")?;
        let context = take_optional_object(&mut fields, "context")?;

        let timestamp = match fields.remove("timestamp") {
            Some(Value::String(s)) => match DateTime::parse_from_rfc3339(&s) {
                Ok(t) => t.with_timezone(&Utc),
                Err(_) => return Err(TypeError::InvalidTimestamp(s)),
            },
            Some(_) => {
                return Err(TypeError::InvalidField {
                    field: "timestamp",
                    expected: "an RFC 3339 string",
                })
            }
            None => stored,
        };

        // Server-owned fields are never taken from the submission.
        fields.remove("stored");
        fields.remove("authority");
        fields.remove("voided");

        let statement = Self {
            id,
            actor,
            verb,
            object,
            result,
            context,
            timestamp,
            stored,
            authority,
            voided: false,
            extra: fields,
        };

        if statement.verb_iri() == Some(VOIDED_VERB_IRI) && statement.void_target().is_none() {
            return Err(TypeError::InvalidField {
                field: "object",
                expected: "a StatementRef with a UUID 'id' when the verb is the voiding verb",
            });
        }

        Ok(statement)
    }

    /// Content fingerprint over the client-owned fields.
    ///
    /// `id`, `stored`, `authority`, and the derived `voided` flag are
    /// server-assigned and excluded. A `timestamp` equal to `stored` is also
    /// excluded, because that is the value a submission without a timestamp
    /// canonicalizes to; replaying the same submission at a later instant
    /// must fingerprint identically.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut content = Map::new();
        content.insert("actor".to_string(), self.actor.clone());
        content.insert("verb".to_string(), self.verb.clone());
        content.insert("object".to_string(), self.object.clone());
        if let Some(result) = &self.result {
            content.insert("result".to_string(), result.clone());
        }
        if let Some(context) = &self.context {
            content.insert("context".to_string(), context.clone());
        }
        if self.timestamp != self.stored {
            content.insert(
                "timestamp".to_string(),
                Value::String(self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)),
            );
        }
        for (key, value) in &self.extra {
            content.insert(key.clone(), value.clone());
        }
        Fingerprint::of_value(&Value::Object(content))
    }

    /// The verb's `id` IRI, when present.
    pub fn verb_iri(&self) -> Option<&str> {
        self.verb.get("id").and_then(Value::as_str)
    }

    /// The object's `id`, when present.
    pub fn object_iri(&self) -> Option<&str> {
        self.object.get("id").and_then(Value::as_str)
    }

    /// The object's `objectType` tag, when present.
    pub fn object_type(&self) -> Option<&str> {
        self.object.get("objectType").and_then(Value::as_str)
    }

    /// Returns `true` if this statement retracts another statement.
    pub fn is_voiding(&self) -> bool {
        self.verb_iri() == Some(VOIDED_VERB_IRI) && self.void_target().is_some()
    }

    /// The id of the statement this one retracts, when this is a well-formed
    /// voiding statement.
    pub fn void_target(&self) -> Option<StatementId> {
        if self.object_type() != Some(STATEMENT_REF_TYPE) {
            return None;
        }
        self.object_iri().and_then(|s| StatementId::parse(s).ok())
    }
}

fn take_object(fields: &mut Map<String, Value>, name: &'static str) -> Result<Value, TypeError> {
    match fields.remove(name) {
        Some(value @ Value::Object(_)) => Ok(value),
        Some(_) => Err(TypeError::InvalidField {
            field: name,
            expected: "a JSON object",
        }),
        None => Err(TypeError::MissingField(name)),
    }
}

fn take_optional_object(
    fields: &mut Map<String, Value>,
    name: &'static str,
) -> Result<Option<Value>, TypeError> {
    match fields.remove(name) {
        Some(value @ Value::Object(_)) => Ok(Some(value)),
        Some(_) => Err(TypeError::InvalidField {
            field: name,
            expected: "a JSON object",
        }),
        None => Ok(None),
    }
}
