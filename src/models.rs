use serde::{Deserialize, Serialize};

/// Body of `POST /timeEntry/create`
#[derive(Debug, Serialize)]
pub struct TimeEntryCreate {
    pub task_id: i64,
    /// ISO-8601 with millisecond precision, UTC
    pub start_time: String,
    pub end_time: String,
    pub duration: u64,
    pub description: String,
}

/// Created ledger entry as returned by the backend; extra fields are ignored
#[derive(Debug, Deserialize)]
pub struct TimeEntryResponse {
    pub id: i64,
}

/// Task row from `GET /tasks/get_task`
#[derive(Debug, Clone, Deserialize)]
pub struct TaskDto {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub client_name: Option<String>,
}

/// Error body some endpoints return alongside 4xx
#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub detail: Option<serde_json::Value>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ApiErrorBody {
    /// Best human-readable message out of a raw error body
    pub fn message_from(body: &str) -> Option<String> {
        let parsed: ApiErrorBody = serde_json::from_str(body).ok()?;
        if let Some(message) = parsed.message {
            return Some(message);
        }
        match parsed.detail? {
            serde_json::Value::String(s) => Some(s),
            other => Some(other.to_string()),
        }
    }
}
