use std::sync::Arc;

/// Holds the bearer token shared by the HTTP collaborators
#[derive(Clone, Default)]
pub struct AuthManager {
    access_token: Arc<tokio::sync::RwLock<Option<String>>>,
}

impl AuthManager {
    pub fn new(access_token: Option<String>) -> Self {
        Self {
            access_token: Arc::new(tokio::sync::RwLock::new(
                access_token.filter(|t| !t.is_empty()),
            )),
        }
    }

    /// Replace the token, e.g. after a new login
    pub async fn set_access_token(&self, access_token: Option<String>) {
        *self.access_token.write().await = access_token.filter(|t| !t.is_empty());
    }

    pub async fn get_access_token(&self) -> Result<String, String> {
        self.access_token
            .read()
            .await
            .clone()
            .ok_or_else(|| "Access token not set".to_string())
    }
}
