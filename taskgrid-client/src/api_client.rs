//! REST access to the hosted backend (PostgREST dialect).

use crate::config::ClientConfig;
use crate::error::ClientError;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value;
use taskgrid_core::{
    AuthorizationError, BackendError, ConflictError, TaskgridError, TaskgridResult,
};
use taskgrid_storage::{Filter, RemoteStore, Row, Table};
use tracing::{debug, warn};

const REST_PREFIX: &str = "/rest/v1";
const UNIQUE_VIOLATION_CODE: &str = "23505";
const RETURN_REPRESENTATION: &str = "return=representation";
const MERGE_DUPLICATES: &str = "resolution=merge-duplicates,return=representation";

/// `RemoteStore` over HTTP.
#[derive(Clone)]
pub struct RestStore {
    client: reqwest::Client,
    base_url: String,
    auth_header: HeaderMap,
}

impl RestStore {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        let auth_header = build_auth_headers(&config.auth.anon_key, config.bearer_token())?;
        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            auth_header,
        })
    }

    fn table_url(&self, table: Table) -> String {
        format!("{}{}/{}", self.base_url, REST_PREFIX, table)
    }

    fn rpc_url(&self, function: &str) -> String {
        format!("{}{}/rpc/{}", self.base_url, REST_PREFIX, function)
    }

    async fn send(&self, request: RequestBuilder) -> Result<(StatusCode, String), TaskgridError> {
        let response = request
            .headers(self.auth_header.clone())
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;
        Ok((status, text))
    }

    async fn send_rows(&self, table: Table, request: RequestBuilder) -> TaskgridResult<Vec<Row>> {
        let (status, text) = self.send(request).await?;
        if !status.is_success() {
            return Err(error_for_status(status.as_u16(), &text, Some(table)));
        }
        decode_rows(table, &text)
    }
}

#[async_trait]
impl RemoteStore for RestStore {
    async fn select(&self, table: Table, filter: &Filter) -> TaskgridResult<Vec<Row>> {
        let mut pairs = vec![("select".to_string(), "*".to_string())];
        pairs.extend(filter.to_query_pairs());
        debug!(%table, ?pairs, "select");
        let request = self.client.get(self.table_url(table)).query(&pairs);
        self.send_rows(table, request).await
    }

    async fn insert(&self, table: Table, rows: Vec<Row>) -> TaskgridResult<Vec<Row>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        debug!(%table, count = rows.len(), "insert");
        let request = self
            .client
            .post(self.table_url(table))
            .header("Prefer", RETURN_REPRESENTATION)
            .json(&rows);
        self.send_rows(table, request).await
    }

    async fn update(&self, table: Table, id: &str, fields: Row) -> TaskgridResult<Row> {
        let key = table.primary_key();
        debug!(%table, id, "update");
        let request = self
            .client
            .patch(self.table_url(table))
            .query(&[(key, format!("eq.{}", id))])
            .header("Prefer", RETURN_REPRESENTATION)
            .json(&fields);
        let rows = self.send_rows(table, request).await?;
        rows.into_iter().next().ok_or_else(|| {
            BackendError::NotFound {
                table: table.to_string(),
                id: id.to_string(),
            }
            .into()
        })
    }

    async fn delete(&self, table: Table, filter: &Filter) -> TaskgridResult<()> {
        let pairs = filter.to_query_pairs();
        if pairs.is_empty() {
            return Err(BackendError::RequestFailed {
                status: 400,
                message: format!("refusing unfiltered delete on {}", table),
            }
            .into());
        }
        debug!(%table, ?pairs, "delete");
        let request = self.client.delete(self.table_url(table)).query(&pairs);
        let (status, text) = self.send(request).await?;
        if !status.is_success() {
            return Err(error_for_status(status.as_u16(), &text, Some(table)));
        }
        Ok(())
    }

    async fn upsert(
        &self,
        table: Table,
        rows: Vec<Row>,
        conflict_key: &[&str],
    ) -> TaskgridResult<Vec<Row>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        debug!(%table, count = rows.len(), ?conflict_key, "upsert");
        let request = self
            .client
            .post(self.table_url(table))
            .query(&[("on_conflict", conflict_key.join(","))])
            .header("Prefer", MERGE_DUPLICATES)
            .json(&rows);
        self.send_rows(table, request).await
    }

    async fn rpc(&self, function: &str, params: Row) -> TaskgridResult<Value> {
        debug!(function, "rpc");
        let request = self.client.post(self.rpc_url(function)).json(&params);
        let (status, text) = self.send(request).await?;
        if status == StatusCode::NOT_FOUND {
            return Err(BackendError::UnknownProcedure {
                name: function.to_string(),
            }
            .into());
        }
        if !status.is_success() {
            return Err(error_for_status(status.as_u16(), &text, None));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| {
            BackendError::Decode {
                what: format!("{} result", function),
                reason: e.to_string(),
            }
            .into()
        })
    }
}

fn build_auth_headers(api_key: &str, bearer: &str) -> Result<HeaderMap, ClientError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static("apikey"),
        HeaderValue::from_str(api_key).map_err(|_| ClientError::Header { name: "apikey" })?,
    );
    headers.insert(
        HeaderName::from_static("authorization"),
        HeaderValue::from_str(&format!("Bearer {}", bearer))
            .map_err(|_| ClientError::Header {
                name: "authorization",
            })?,
    );
    Ok(headers)
}

fn transport_error(err: reqwest::Error) -> TaskgridError {
    warn!(error = %err, "backend request failed");
    BackendError::Unavailable {
        reason: err.to_string(),
    }
    .into()
}

fn decode_rows(table: Table, text: &str) -> TaskgridResult<Vec<Row>> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let value: Value = serde_json::from_str(text).map_err(|e| BackendError::Decode {
        what: format!("{} response", table),
        reason: e.to_string(),
    })?;
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(row) => Ok(row),
                other => Err(TaskgridError::from(BackendError::Decode {
                    what: format!("{} row", table),
                    reason: format!("expected object, got {}", other),
                })),
            })
            .collect(),
        Value::Object(row) => Ok(vec![row]),
        other => Err(TaskgridError::from(BackendError::Decode {
            what: format!("{} response", table),
            reason: format!("expected array, got {}", other),
        })),
    }
}

/// Map a non-success response to the error taxonomy.
///
/// PostgREST bodies look like `{"code": "23505", "message": "..."}`; a
/// body that is not JSON is passed through as the message.
pub fn error_for_status(status: u16, body: &str, table: Option<Table>) -> TaskgridError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let code = parsed
        .as_ref()
        .and_then(|v| v.get("code"))
        .and_then(Value::as_str);
    let message = parsed
        .as_ref()
        .and_then(|v| v.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string());

    if status == 409 || code == Some(UNIQUE_VIOLATION_CODE) {
        return ConflictError::UniqueViolation {
            table: table.map(|t| t.to_string()).unwrap_or_default(),
            constraint: constraint_name(&message).unwrap_or_else(|| message.clone()),
        }
        .into();
    }
    match status {
        401 => AuthorizationError::NotSignedIn.into(),
        403 => AuthorizationError::Denied { reason: message }.into(),
        _ => BackendError::RequestFailed { status, message }.into(),
    }
}

/// `duplicate key value violates unique constraint "tasks_project_id_row_id_key"`
fn constraint_name(message: &str) -> Option<String> {
    let start = message.find('"')? + 1;
    let len = message[start..].find('"')?;
    Some(message[start..start + len].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_violation_by_code() {
        let body = r#"{"code":"23505","message":"duplicate key value violates unique constraint \"tasks_project_id_row_id_key\""}"#;
        match error_for_status(400, body, Some(Table::Tasks)) {
            TaskgridError::Conflict(ConflictError::UniqueViolation { table, constraint }) => {
                assert_eq!(table, "tasks");
                assert_eq!(constraint, "tasks_project_id_row_id_key");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_conflict_status_without_json_body() {
        let err = error_for_status(409, "conflict", Some(Table::ProjectMembers));
        assert!(matches!(
            err,
            TaskgridError::Conflict(ConflictError::UniqueViolation { .. })
        ));
    }

    #[test]
    fn test_auth_statuses() {
        assert_eq!(
            error_for_status(401, "", None),
            TaskgridError::Authorization(AuthorizationError::NotSignedIn)
        );
        assert!(matches!(
            error_for_status(403, r#"{"message":"row-level security"}"#, None),
            TaskgridError::Authorization(AuthorizationError::Denied { reason }) if reason == "row-level security"
        ));
    }

    #[test]
    fn test_other_status_is_request_failed() {
        let err = error_for_status(503, "upstream down", Some(Table::Notes));
        assert_eq!(
            err,
            TaskgridError::Backend(BackendError::RequestFailed {
                status: 503,
                message: "upstream down".to_string()
            })
        );
        assert!(err.is_transient());
    }

    #[test]
    fn test_decode_rows_shapes() {
        assert!(decode_rows(Table::Tasks, "").unwrap().is_empty());
        assert_eq!(decode_rows(Table::Tasks, r#"[{"id":"a"},{"id":"b"}]"#).unwrap().len(), 2);
        assert_eq!(decode_rows(Table::Tasks, r#"{"id":"a"}"#).unwrap().len(), 1);
        assert!(decode_rows(Table::Tasks, "[1]").is_err());
    }

    #[test]
    fn test_constraint_name_extraction() {
        assert_eq!(
            constraint_name(r#"violates unique constraint "notes_project_id_row_id_key""#),
            Some("notes_project_id_row_id_key".to_string())
        );
        assert_eq!(constraint_name("no quotes"), None);
    }
}
