use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;
use crate::context::BackendContext;
use crate::error::BackendError;

const APP_NAME: &str = "playstate";

/// Result of `/Users/AuthenticateByName`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessTokenInfo {
    pub user: String,
    pub username: String,
    pub identifier: String,
    pub access_token: String,
}

/// HTTP plumbing shared by the Jellyfin and Emby clients
pub struct MediaBrowserHelper {
    context: BackendContext,
    http: Client,
    /// "Jellyfin" or "Emby"
    client_name: &'static str,
}

impl MediaBrowserHelper {
    pub fn new(context: BackendContext, client_name: &'static str) -> Result<Self, BackendError> {
        let http = Client::builder()
            .build()
            .map_err(BackendError::http(&context.name))?;

        Ok(Self {
            context,
            http,
            client_name,
        })
    }

    pub fn context(&self) -> &BackendContext {
        &self.context
    }

    pub fn client_name(&self) -> &'static str {
        self.client_name
    }

    /// Value of the `Authorization` header sent before a token exists
    pub fn authorization(&self) -> String {
        let agent = if self.client_name == "Emby" { "Emby" } else { "MediaBrowser" };
        let app = format!("{}/{}", APP_NAME, self.client_name);

        format!(
            "{} Client=\"{}\", Device=\"{}\", DeviceId=\"{}\", Version=\"{}\"",
            agent,
            app,
            std::env::consts::OS,
            app.to_lowercase().replace('/', "-"),
            env!("CARGO_PKG_VERSION"),
        )
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header(reqwest::header::ACCEPT, "application/json")
            .header("X-MediaBrowser-Token", &self.context.token)
    }

    async fn read_json(
        &self,
        action: &'static str,
        response: reqwest::Response,
    ) -> Result<Value, BackendError> {
        let name = self.context.name.as_str();
        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                backend: name.to_string(),
                action,
                status: status.as_u16(),
                body,
            });
        }

        response.json().await.map_err(BackendError::http(name))
    }

    pub async fn get_metadata(&self, id: &str) -> Result<Value, BackendError> {
        let user = self.context.require_user()?;
        let url = self.context.endpoint(&format!("/Users/{}/items/{}", user, id));
        debug!(backend = %self.context.name, client = self.client_name, id = id, url = %url, "Requesting item metadata");

        let response = self
            .authed(self.http.get(&url))
            .query(&[
                ("recursive", "false"),
                ("enableUserData", "true"),
                ("enableImages", "false"),
                ("includeItemTypes", "Episode,Movie,Series"),
            ])
            .send()
            .await
            .map_err(BackendError::http(&self.context.name))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(BackendError::NotFound {
                backend: self.context.name.clone(),
                id: id.to_string(),
            });
        }

        self.read_json("get_metadata", response).await
    }

    pub async fn authenticate_by_name(&self, username: &str, password: &str) -> Result<AccessTokenInfo, BackendError> {
        let url = self.context.endpoint("/Users/AuthenticateByName");
        debug!(backend = %self.context.name, client = self.client_name, username = username, "Requesting access token");

        let response = self
            .http
            .post(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::AUTHORIZATION, self.authorization())
            .json(&json!({ "Username": username, "Pw": password }))
            .send()
            .await
            .map_err(BackendError::http(&self.context.name))?;

        let payload = self.read_json("authenticate_by_name", response).await?;
        parse_access_token(&self.context.name, &payload)
    }
}

pub fn parse_access_token(backend: &str, payload: &Value) -> Result<AccessTokenInfo, BackendError> {
    let field = |pointer: &str| {
        payload
            .pointer(pointer)
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| BackendError::invalid(backend, format!("authentication response has no '{}'", pointer)))
    };

    Ok(AccessTokenInfo {
        user: field("/User/Id")?,
        username: field("/User/Name")?,
        identifier: field("/ServerId")?,
        access_token: field("/AccessToken")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use playstate_config::BackendType;

    fn helper(client_name: &'static str) -> MediaBrowserHelper {
        let context = BackendContext {
            name: "jf".to_string(),
            backend_type: BackendType::Jellyfin,
            url: "http://127.0.0.1:9".to_string(),
            token: "t".to_string(),
            user: None,
            backend_id: None,
        };
        MediaBrowserHelper::new(context, client_name).unwrap()
    }

    #[test]
    fn test_authorization_agent() {
        assert!(helper("Jellyfin").authorization().starts_with("MediaBrowser Client=\"playstate/Jellyfin\""));
        assert!(helper("Emby").authorization().starts_with("Emby Client=\"playstate/Emby\""));
    }

    #[test]
    fn test_parse_access_token() {
        let payload = serde_json::json!({
            "User": {"Id": "u1", "Name": "alice"},
            "ServerId": "srv",
            "AccessToken": "secret"
        });
        let info = parse_access_token("jf", &payload).unwrap();
        assert_eq!(info.access_token, "secret");
        assert_eq!(info.username, "alice");

        let err = parse_access_token("jf", &serde_json::json!({"User": {"Id": "u1"}})).unwrap_err();
        assert!(err.to_string().contains("/User/Name"));
    }

    #[tokio::test]
    async fn test_metadata_requires_user() {
        let err = helper("Jellyfin").get_metadata("1").await.unwrap_err();
        assert!(matches!(err, BackendError::Config(_)));
    }
}
