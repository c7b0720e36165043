//! Work-item (task) directory collaborator. Used only to validate restored timers.

use crate::auth::AuthManager;
use crate::config::HttpConfig;
use crate::engine::WorkItemId;
use crate::error::DirectoryError;
use crate::models::TaskDto;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub id: WorkItemId,
    pub title: String,
    pub client_name: Option<String>,
}

impl From<TaskDto> for WorkItem {
    fn from(dto: TaskDto) -> Self {
        let title = dto
            .title
            .filter(|t| !t.is_empty())
            .or(dto.name)
            .unwrap_or_else(|| format!("task {}", dto.id));
        Self {
            id: WorkItemId(dto.id),
            title,
            client_name: dto.client_name.filter(|c| !c.is_empty()),
        }
    }
}

#[async_trait]
pub trait WorkItemDirectory: Send + Sync {
    /// `Ok(None)` means the work item no longer exists upstream
    async fn resolve(&self, id: WorkItemId) -> Result<Option<WorkItem>, DirectoryError>;
}

/// Fixed set of work items
#[derive(Default)]
pub struct StaticDirectory {
    items: HashMap<WorkItemId, WorkItem>,
}

impl StaticDirectory {
    pub fn new(items: impl IntoIterator<Item = WorkItem>) -> Self {
        Self {
            items: items.into_iter().map(|item| (item.id, item)).collect(),
        }
    }

    /// Directory knowing only the given ids, with placeholder titles
    pub fn with_ids(ids: impl IntoIterator<Item = i64>) -> Self {
        Self::new(ids.into_iter().map(|id| WorkItem {
            id: WorkItemId(id),
            title: format!("task {}", id),
            client_name: None,
        }))
    }
}

#[async_trait]
impl WorkItemDirectory for StaticDirectory {
    async fn resolve(&self, id: WorkItemId) -> Result<Option<WorkItem>, DirectoryError> {
        Ok(self.items.get(&id).cloned())
    }
}

/// REST task directory. The task list is fetched once and cached.
pub struct HttpTaskDirectory {
    api_base_url: String,
    auth: AuthManager,
    client: reqwest::Client,
    cache: RwLock<Option<HashMap<WorkItemId, WorkItem>>>,
}

impl HttpTaskDirectory {
    pub fn new(config: &HttpConfig, auth: AuthManager) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            auth,
            client,
            cache: RwLock::new(None),
        }
    }

    async fn fetch_all(&self) -> Result<HashMap<WorkItemId, WorkItem>, DirectoryError> {
        let access_token = self
            .auth
            .get_access_token()
            .await
            .map_err(DirectoryError::Transport)?;
        let url = format!("{}/tasks/get_task", self.api_base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", access_token))
            .send()
            .await
            .map_err(|e| DirectoryError::Transport(format!("Network error: {}", e)))?;

        if !response.status().is_success() {
            return Err(DirectoryError::Transport(format!(
                "Task list request failed with status: {}",
                response.status()
            )));
        }

        let tasks: Vec<TaskDto> = response
            .json()
            .await
            .map_err(|e| DirectoryError::Transport(format!("Failed to parse task list: {}", e)))?;
        info!("[DIRECTORY] Loaded {} tasks", tasks.len());
        Ok(tasks
            .into_iter()
            .map(WorkItem::from)
            .map(|item| (item.id, item))
            .collect())
    }

    /// Drop the cached task list so the next resolve refetches it
    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }
}

#[async_trait]
impl WorkItemDirectory for HttpTaskDirectory {
    async fn resolve(&self, id: WorkItemId) -> Result<Option<WorkItem>, DirectoryError> {
        if let Some(cache) = self.cache.read().await.as_ref() {
            return Ok(cache.get(&id).cloned());
        }

        let mut cache = self.cache.write().await;
        if cache.is_none() {
            *cache = Some(self.fetch_all().await?);
        } else {
            debug!("[DIRECTORY] Task list filled concurrently, reusing it");
        }
        Ok(cache.as_ref().and_then(|items| items.get(&id).cloned()))
    }
}
