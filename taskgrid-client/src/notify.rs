//! HTTP client for the chat notify function.

use crate::config::ClientConfig;
use crate::error::ClientError;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use taskgrid_core::{BackendError, ProjectId, SessionContext, TaskgridResult};
use taskgrid_sync::{interpret_response, validate_request, Notifier, NotifyOutcome};
use tracing::{info, warn};

#[derive(Debug, Serialize)]
struct NotifyRequest<'a> {
    project_id: ProjectId,
    message: &'a str,
}

pub struct NotifyClient {
    client: reqwest::Client,
    url: String,
    anon_key: String,
    bearer: String,
    session: SessionContext,
}

impl NotifyClient {
    pub fn new(config: &ClientConfig, session: SessionContext) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            url: config.notify_function_url.clone(),
            anon_key: config.auth.anon_key.clone(),
            bearer: config.bearer_token().to_string(),
            session,
        })
    }
}

#[async_trait]
impl Notifier for NotifyClient {
    async fn notify(&self, project_id: ProjectId, message: &str) -> TaskgridResult<NotifyOutcome> {
        validate_request(message)?;
        self.session.require_user()?;

        let response = self
            .client
            .post(&self.url)
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.bearer)
            .json(&NotifyRequest {
                project_id,
                message,
            })
            .send()
            .await
            .map_err(|e| BackendError::Unavailable {
                reason: e.to_string(),
            })?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| BackendError::Unavailable {
            reason: e.to_string(),
        })?;
        let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::Null);

        let outcome = interpret_response(project_id, self.session.user_id(), status, &body);
        match &outcome {
            Ok(NotifyOutcome::Sent { message_id }) => {
                info!(project_id = %project_id, message_id = %message_id, "Notification sent")
            }
            Ok(NotifyOutcome::Skipped { reason }) => {
                info!(project_id = %project_id, reason = %reason, "Notification skipped")
            }
            Err(err) => warn!(project_id = %project_id, error = %err, "Notification failed"),
        }
        outcome
    }
}
