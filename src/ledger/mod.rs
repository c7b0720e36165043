use crate::auth::AuthManager;
use crate::config::HttpConfig;
use crate::engine::{EntryId, WorkItemId};
use crate::error::LedgerError;
use crate::models::{ApiErrorBody, TimeEntryCreate, TimeEntryResponse};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Everything the ledger needs to commit one time entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntryRequest {
    pub work_item_id: WorkItemId,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub elapsed_seconds: u64,
    pub description: String,
}

/// External system of record for committed time entries
#[async_trait]
pub trait LedgerService: Send + Sync {
    async fn create_entry(&self, request: &LedgerEntryRequest) -> Result<EntryId, LedgerError>;
}

/// REST ledger client
#[derive(Clone)]
pub struct HttpLedger {
    api_base_url: String,
    auth: AuthManager,
    client: reqwest::Client,
    app_version: String,
}

impl HttpLedger {
    pub fn new(config: &HttpConfig, auth: AuthManager) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            auth,
            client,
            app_version: config.app_version.clone(),
        }
    }

    fn body(request: &LedgerEntryRequest) -> TimeEntryCreate {
        TimeEntryCreate {
            task_id: request.work_item_id.0,
            start_time: request.started_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            end_time: request.ended_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            duration: request.elapsed_seconds,
            description: request.description.clone(),
        }
    }
}

/// Map a non-success HTTP status to the ledger taxonomy.
/// Client errors are rejections; 408/429 and server errors may pass on retry.
pub fn classify_status(status: u16, message: String) -> LedgerError {
    match status {
        408 | 429 => LedgerError::Transport(format!("HTTP {}: {}", status, message)),
        400..=499 => LedgerError::Validation(format!("HTTP {}: {}", status, message)),
        _ => LedgerError::Transport(format!("HTTP {}: {}", status, message)),
    }
}

#[async_trait]
impl LedgerService for HttpLedger {
    async fn create_entry(&self, request: &LedgerEntryRequest) -> Result<EntryId, LedgerError> {
        let access_token = self
            .auth
            .get_access_token()
            .await
            .map_err(LedgerError::Transport)?;

        let url = format!("{}/timeEntry/create", self.api_base_url);
        debug!(
            "[LEDGER] POST {} (task {}, {}s)",
            url, request.work_item_id, request.elapsed_seconds
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", access_token))
            .header("X-App-Version", &self.app_version)
            .json(&Self::body(request))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LedgerError::Transport(format!("Request timed out: {}", e))
                } else {
                    LedgerError::Transport(format!("Network error: {}", e))
                }
            })?;

        let status = response.status();
        if status.is_success() {
            let created: TimeEntryResponse = response.json().await.map_err(|e| {
                LedgerError::Transport(format!("Failed to parse create response: {}", e))
            })?;
            info!(
                "[LEDGER] Entry {} created for task {}",
                created.id, request.work_item_id
            );
            return Ok(EntryId(created.id));
        }

        let body = response.text().await.unwrap_or_default();
        let message = ApiErrorBody::message_from(&body)
            .or_else(|| (!body.is_empty()).then(|| body.clone()))
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("Unknown").to_string());
        let err = classify_status(status.as_u16(), message);
        warn!("[LEDGER] Create entry failed: {}", err);
        Err(err)
    }
}
