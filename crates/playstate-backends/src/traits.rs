use async_trait::async_trait;
use playstate_config::BackendType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use crate::context::BackendContext;
use crate::error::BackendError;

/// A server connection reachable with a given account token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredServer {
    pub name: String,
    pub identifier: String,
    pub protocol: String,
    pub address: String,
    pub port: u16,
    pub uri: String,
    pub local: bool,
}

#[async_trait]
pub trait BackendClient: Send + Sync {
    fn name(&self) -> &str;

    fn backend_type(&self) -> BackendType;

    fn context(&self) -> &BackendContext;

    /// Raw item metadata as returned by the backend
    async fn get_metadata(&self, id: &str) -> Result<Value, BackendError>;

    /// Token usable to act on behalf of `user_id`
    async fn get_user_token(&self, user_id: &str, username: &str) -> Result<String, BackendError>;

    async fn discover(&self, token: &str) -> Result<Vec<DiscoveredServer>, BackendError>;
}
