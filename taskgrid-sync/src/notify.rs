//! Outbound chat notifications.
//!
//! Notifications go through a server-side function that checks membership,
//! looks up the project's chat room and posts the message. Projects without
//! a configured room are skipped, which is not an error.

use async_trait::async_trait;
use serde_json::Value;
use taskgrid_core::{
    AuthorizationError, BackendError, ProjectId, TaskgridResult, UserId, ValidationError,
};

/// Name of the chat service behind the notify function.
pub const CHAT_SERVICE: &str = "chatwork";

/// Result of a notification request that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    Sent { message_id: String },
    Skipped { reason: String },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Post `message` to the chat room configured for `project_id`.
    async fn notify(&self, project_id: ProjectId, message: &str) -> TaskgridResult<NotifyOutcome>;
}

/// Reject requests the function would refuse anyway.
pub fn validate_request(message: &str) -> TaskgridResult<()> {
    if message.trim().is_empty() {
        return Err(ValidationError::RequiredFieldMissing {
            field: "message".to_string(),
        }
        .into());
    }
    Ok(())
}

fn error_text(body: &Value) -> String {
    let error = body.get("error").and_then(Value::as_str).unwrap_or("unknown error");
    match body.get("details").and_then(Value::as_str) {
        Some(details) => format!("{}: {}", error, details),
        None => error.to_string(),
    }
}

/// Map the notify function's HTTP response onto an outcome or error.
///
/// `caller` is the signed-in user, used to report a membership refusal.
pub fn interpret_response(
    project_id: ProjectId,
    caller: Option<UserId>,
    status: u16,
    body: &Value,
) -> TaskgridResult<NotifyOutcome> {
    match status {
        200..=299 => {
            if body.get("skipped").and_then(Value::as_bool).unwrap_or(false) {
                let reason = body
                    .get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or("skipped")
                    .to_string();
                return Ok(NotifyOutcome::Skipped { reason });
            }
            let message_id = match body.get("message_id") {
                Some(Value::String(id)) => id.clone(),
                Some(Value::Number(id)) => id.to_string(),
                _ => {
                    return Err(BackendError::Decode {
                        what: "notify response".to_string(),
                        reason: "missing message_id".to_string(),
                    }
                    .into())
                }
            };
            Ok(NotifyOutcome::Sent { message_id })
        }
        400 => Err(ValidationError::InvalidValue {
            field: "notification".to_string(),
            reason: error_text(body),
        }
        .into()),
        401 => Err(AuthorizationError::NotSignedIn.into()),
        403 => Err(match caller {
            Some(user_id) => AuthorizationError::NotAMember {
                user_id,
                project_id,
            },
            None => AuthorizationError::Denied {
                reason: error_text(body),
            },
        }
        .into()),
        502 => Err(BackendError::Gateway {
            service: CHAT_SERVICE.to_string(),
            details: error_text(body),
        }
        .into()),
        _ => Err(BackendError::RequestFailed {
            status,
            message: error_text(body),
        }
        .into()),
    }
}
