use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde_json::{json, Value};
use stele_query::{CanonicalQuery, Cursor};
use stele_types::{Principal, Statement, StatementId};
use tracing::debug;

use crate::auth::Credentials;
use crate::error::ApiError;
use crate::server::AppState;

/// Service identity.
pub async fn about(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "name": "stele",
        "version": env!("CARGO_PKG_VERSION"),
        "backend": state.store.backend_name(),
    }))
}

/// Backend heartbeat: 200 when healthy, 503 otherwise; the body always
/// reports the probed status.
pub async fn health(State(state): State<AppState>) -> Response {
    let health = state.store.health().await;
    let body = Json(json!({
        "status": health.to_string(),
        "backend": state.store.backend_name(),
    }));
    if health.is_healthy() {
        (StatusCode::OK, body).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, body).into_response()
    }
}

/// GET /xAPI/statements: single fetch by id, or a filtered page with a
/// `more` continuation link.
pub async fn get_statements(
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    authenticate(&state, &headers).await?;

    if let Some(fetch) = extract_single_fetch(&params)? {
        let statement = single_statement(&state, fetch).await?;
        return Ok(Json(statement).into_response());
    }

    let query = CanonicalQuery::parse(&params, state.store.limits())?;
    let page = state.store.query(&query).await?;

    let mut body = json!({ "statements": page.statements });
    if let Some(cursor) = &page.next {
        body["more"] = Value::String(more_link(&params, cursor));
    }
    Ok(Json(body).into_response())
}

/// POST /xAPI/statements: one statement object or an ordered array.
///
/// A single object resolves to `[id]` or the statement's own error status.
/// An array always answers 200 with one entry per submission, either the
/// resolved id or an error object; failures never block later entries.
pub async fn post_statements(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let principal = authenticate(&state, &headers).await?;

    match body {
        Value::Array(raws) => {
            let results = state.store.ingest_batch(raws, &principal).await;
            let outcomes: Vec<Value> = results
                .into_iter()
                .map(|result| match result {
                    Ok(receipt) => Value::String(receipt.id.to_string()),
                    Err(err) => ApiError::from(err).body(),
                })
                .collect();
            Ok(Json(Value::Array(outcomes)).into_response())
        }
        raw @ Value::Object(_) => {
            let receipt = state.store.ingest(raw, &principal).await?;
            Ok(Json(json!([receipt.id.to_string()])).into_response())
        }
        _ => Err(ApiError::bad_request(
            "expected a statement object or an array of statements",
        )),
    }
}

/// PUT /xAPI/statements?statementId=...: store one statement under the
/// given id; 204 on success, idempotent on replay.
pub async fn put_statement(
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
    headers: HeaderMap,
    Json(mut body): Json<Value>,
) -> Result<StatusCode, ApiError> {
    let principal = authenticate(&state, &headers).await?;

    let [(key, value)] = params.as_slice() else {
        return Err(ApiError::bad_request(
            "PUT requires exactly the statementId parameter",
        ));
    };
    if key != "statementId" {
        return Err(ApiError::bad_request(
            "PUT requires exactly the statementId parameter",
        ));
    }
    let id = StatementId::parse(value).map_err(|e| ApiError::bad_request(e.to_string()))?;

    let Value::Object(fields) = &mut body else {
        return Err(ApiError::bad_request("expected a statement object"));
    };
    match fields.get("id") {
        Some(Value::String(s)) => {
            let body_id =
                StatementId::parse(s).map_err(|e| ApiError::bad_request(e.to_string()))?;
            if body_id != id {
                return Err(ApiError::bad_request(
                    "statement id does not match the statementId parameter",
                ));
            }
        }
        Some(_) => return Err(ApiError::bad_request("statement id must be a string")),
        None => {
            fields.insert("id".to_string(), Value::String(id.to_string()));
        }
    }

    state.store.ingest(body, &principal).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Principal, ApiError> {
    let credentials = Credentials::from_headers(headers).map_err(|err| {
        debug!(error = %err, "credential parsing failed");
        ApiError::unauthorized()
    })?;
    state.auth.authenticate(&credentials).await.map_err(|err| {
        debug!(error = %err, "authentication refused");
        ApiError::unauthorized()
    })
}

enum SingleFetch {
    Plain(StatementId),
    Voided(StatementId),
}

/// Recognize the statementId / voidedStatementId forms and enforce their
/// exclusivity: the two never combine, and neither tolerates any other
/// parameter.
fn extract_single_fetch(params: &[(String, String)]) -> Result<Option<SingleFetch>, ApiError> {
    let plain = params.iter().find(|(k, _)| k == "statementId");
    let voided = params.iter().find(|(k, _)| k == "voidedStatementId");

    match (plain, voided) {
        (None, None) => Ok(None),
        (Some(_), Some(_)) => Err(ApiError::bad_request(
            "statementId and voidedStatementId are mutually exclusive",
        )),
        (Some((_, value)), None) => {
            reject_extra_params(params)?;
            Ok(Some(SingleFetch::Plain(parse_id(value)?)))
        }
        (None, Some((_, value))) => {
            reject_extra_params(params)?;
            Ok(Some(SingleFetch::Voided(parse_id(value)?)))
        }
    }
}

fn reject_extra_params(params: &[(String, String)]) -> Result<(), ApiError> {
    if params.len() > 1 {
        return Err(ApiError::bad_request(
            "a single-statement fetch allows no other parameters",
        ));
    }
    Ok(())
}

fn parse_id(value: &str) -> Result<StatementId, ApiError> {
    StatementId::parse(value).map_err(|e| ApiError::bad_request(e.to_string()))
}

async fn single_statement(state: &AppState, fetch: SingleFetch) -> Result<Statement, ApiError> {
    match fetch {
        SingleFetch::Plain(id) => {
            let statement = state.store.get_with_void_status(id).await?;
            if statement.voided {
                return Err(ApiError::not_found(format!("statement {id} is voided")));
            }
            Ok(statement)
        }
        SingleFetch::Voided(id) => {
            let statement = state.store.get_with_void_status(id).await?;
            if !statement.voided {
                return Err(ApiError::not_found(format!("statement {id} is not voided")));
            }
            Ok(statement)
        }
    }
}

/// Rebuild the request's query string with the continuation cursor swapped
/// in, as a relative `more` link.
fn more_link(params: &[(String, String)], cursor: &Cursor) -> String {
    let mut query = String::new();
    for (key, value) in params.iter().filter(|(k, _)| k != "cursor") {
        push_pair(&mut query, key, value);
    }
    push_pair(&mut query, "cursor", cursor.as_str());
    format!("/xAPI/statements?{query}")
}

fn push_pair(query: &mut String, key: &str, value: &str) {
    if !query.is_empty() {
        query.push('&');
    }
    query.push_str(&urlencoding::encode(key));
    query.push('=');
    query.push_str(&urlencoding::encode(value));
}
