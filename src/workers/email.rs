use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::{jobs::JOB_SEND_STATUS_EMAIL, state::AppState};

use super::{JobExecution, JobHandler};

/// Payload enqueued by the agent-reply handler when a reply changes the
/// ticket status.
#[derive(Debug, Deserialize)]
struct StatusEmailPayload {
    to: String,
    ticket_code: String,
    subject: String,
    old_status: String,
    new_status: String,
    reply: String,
}

/// Posts one message to the configured form-API relay. Delivery is
/// best-effort: any failure marks the job failed and nothing retries it.
pub struct SendStatusEmailJob;

impl SendStatusEmailJob {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SendStatusEmailJob {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobHandler for SendStatusEmailJob {
    fn job_type(&self) -> &'static str {
        JOB_SEND_STATUS_EMAIL
    }

    async fn handle(&self, state: Arc<AppState>, job: crate::models::Job) -> JobExecution {
        let payload: StatusEmailPayload = match serde_json::from_value(job.payload.clone()) {
            Ok(payload) => payload,
            Err(err) => {
                return JobExecution::Failed {
                    error: format!("invalid status email payload: {err}"),
                }
            }
        };

        let relay_url = match &state.config.mail_relay_url {
            Some(url) => url.clone(),
            None => {
                warn!(job_id = %job.id, "mail relay not configured; skipping notification");
                return JobExecution::Success;
            }
        };
        let access_key = state
            .config
            .mail_relay_access_key
            .clone()
            .unwrap_or_default();

        let message = format!(
            "Your ticket {} ({}) has been updated from {} to {}.\n\nAgent reply:\n{}",
            payload.ticket_code,
            payload.subject,
            payload.old_status,
            payload.new_status,
            payload.reply,
        );

        let body = json!({
            "access_key": access_key,
            "subject": format!("Ticket {} status update", payload.ticket_code),
            "email": payload.to,
            "message": message,
        });

        match Client::new().post(&relay_url).json(&body).send().await {
            Ok(response) => {
                if response.status().is_success() {
                    JobExecution::Success
                } else {
                    let status = response.status();
                    warn!(job_id = %job.id, %status, "mail relay rejected notification");
                    JobExecution::Failed {
                        error: format!("mail relay responded with status {status}"),
                    }
                }
            }
            Err(err) => {
                warn!(job_id = %job.id, error = %err, "mail relay request failed");
                JobExecution::Failed {
                    error: err.to_string(),
                }
            }
        }
    }
}
