use async_trait::async_trait;
use playstate_config::BackendType;
use serde_json::Value;
use crate::context::BackendContext;
use crate::error::BackendError;
use crate::mediabrowser::{AccessTokenInfo, MediaBrowserHelper};
use crate::traits::{BackendClient, DiscoveredServer};

/// Emby speaks the same API as Jellyfin apart from the auth agent
pub struct EmbyClient {
    helper: MediaBrowserHelper,
}

impl EmbyClient {
    pub fn new(context: BackendContext) -> Result<Self, BackendError> {
        Ok(Self {
            helper: MediaBrowserHelper::new(context, "Emby")?,
        })
    }

    pub async fn generate_access_token(&self, username: &str, password: &str) -> Result<AccessTokenInfo, BackendError> {
        self.helper.authenticate_by_name(username, password).await
    }
}

#[async_trait]
impl BackendClient for EmbyClient {
    fn name(&self) -> &str {
        &self.helper.context().name
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Emby
    }

    fn context(&self) -> &BackendContext {
        self.helper.context()
    }

    async fn get_metadata(&self, id: &str) -> Result<Value, BackendError> {
        self.helper.get_metadata(id).await
    }

    /// API keys are server wide, the configured token works for every user
    async fn get_user_token(&self, _user_id: &str, _username: &str) -> Result<String, BackendError> {
        Ok(self.helper.context().token.clone())
    }

    async fn discover(&self, _token: &str) -> Result<Vec<DiscoveredServer>, BackendError> {
        Err(BackendError::Unsupported {
            backend: self.name().to_string(),
            operation: "discover",
        })
    }
}
