use async_trait::async_trait;
use playstate_config::BackendType;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde_json::Value;
use tracing::{debug, error};
use crate::context::BackendContext;
use crate::error::BackendError;
use crate::plex::api::{self, CLIENT_IDENTIFIER, PLEX_TV_BASE_URL};
use crate::traits::{BackendClient, DiscoveredServer};

pub struct PlexClient {
    context: BackendContext,
    http: Client,
    plex_tv_url: String,
}

impl PlexClient {
    pub fn new(context: BackendContext) -> Result<Self, BackendError> {
        let http = Client::builder()
            .default_headers({
                let mut headers = reqwest::header::HeaderMap::new();
                headers.insert(
                    reqwest::header::ACCEPT,
                    reqwest::header::HeaderValue::from_static("application/json"),
                );
                headers.insert(
                    reqwest::header::HeaderName::from_static("x-plex-client-identifier"),
                    reqwest::header::HeaderValue::from_static(CLIENT_IDENTIFIER),
                );
                headers
            })
            .build()
            .map_err(BackendError::http(&context.name))?;

        Ok(Self {
            context,
            http,
            plex_tv_url: PLEX_TV_BASE_URL.to_string(),
        })
    }

    /// Point plex.tv calls somewhere else
    pub fn with_plex_tv_url(mut self, url: impl Into<String>) -> Self {
        self.plex_tv_url = url.into().trim_end_matches('/').to_string();
        self
    }

    fn request(&self, method: Method, url: &str, token: &str) -> RequestBuilder {
        self.http.request(method, url).header("X-Plex-Token", token)
    }

    async fn send_json(
        &self,
        action: &'static str,
        request: RequestBuilder,
        expected: StatusCode,
    ) -> Result<Value, BackendError> {
        let name = self.context.name.as_str();
        let response = request.send().await.map_err(BackendError::http(name))?;

        let status = response.status();
        if status != expected {
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
}

#[async_trait]
impl BackendClient for PlexClient {
    fn name(&self) -> &str {
        &self.context.name
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Plex
    }

    fn context(&self) -> &BackendContext {
        &self.context
    }

    async fn get_metadata(&self, id: &str) -> Result<Value, BackendError> {
        let url = self.context.endpoint(&format!("/library/metadata/{}", id));
        debug!(backend = %self.context.name, id = id, url = %url, "Requesting item metadata");

        let request = self.request(Method::GET, &url, &self.context.token);
        let response = self.send_json("get_metadata", request, StatusCode::OK).await?;

        api::first_metadata(&response).ok_or_else(|| BackendError::NotFound {
            backend: self.context.name.clone(),
            id: id.to_string(),
        })
    }

    /// Switch to a home user on plex.tv, then pick this server's access token for them
    async fn get_user_token(&self, user_id: &str, username: &str) -> Result<String, BackendError> {
        let name = self.context.name.as_str();
        let backend_id = self.context.backend_id.as_deref().ok_or_else(|| {
            BackendError::Config(format!("backend '{}' has no server identifier", name))
        })?;

        let url = format!("{}/api/v2/home/users/{}/switch", self.plex_tv_url, user_id);
        debug!(backend = name, username = username, user_id = user_id, "Requesting temporary access token");

        let request = self.request(Method::POST, &url, &self.context.token);
        let switched = self.send_json("switch_user", request, StatusCode::CREATED).await?;
        let temp_token = switched
            .get("authToken")
            .and_then(|t| t.as_str())
            .ok_or_else(|| BackendError::invalid(name, "switch response has no authToken"))?;

        let url = format!(
            "{}/api/v2/resources?includeIPv6=1&includeHttps=1&includeRelay=1",
            self.plex_tv_url
        );
        debug!(backend = name, username = username, "Requesting permanent access token");

        let request = self.request(Method::GET, &url, temp_token);
        let resources = self.send_json("user_resources", request, StatusCode::OK).await?;

        match api::find_access_token(&resources, backend_id) {
            Some(token) => Ok(token),
            None => {
                let count = resources.as_array().map(Vec::len).unwrap_or(0);
                error!(backend = name, backend_id = backend_id, servers = count, "No server matched identifier");
                Err(BackendError::Token {
                    backend: name.to_string(),
                    message: format!(
                        "no access token found for '{}', the server identifier '{}' matched none of {} resources",
                        username, backend_id, count
                    ),
                })
            }
        }
    }

    async fn discover(&self, token: &str) -> Result<Vec<DiscoveredServer>, BackendError> {
        let url = format!("{}/api/v2/resources?includeHttps=1&includeRelay=0", self.plex_tv_url);
        let request = self.request(Method::GET, &url, token);
        let resources = self.send_json("discover", request, StatusCode::OK).await?;

        let servers = api::parse_servers(&resources);
        if servers.is_empty() {
            return Err(BackendError::Token {
                backend: self.context.name.clone(),
                message: "no servers are associated with the given token".to_string(),
            });
        }

        debug!(backend = %self.context.name, servers = servers.len(), "Discovered servers");
        Ok(servers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> BackendContext {
        BackendContext {
            name: "home_plex".to_string(),
            backend_type: BackendType::Plex,
            url: "http://127.0.0.1:9".to_string(),
            token: "admin".to_string(),
            user: None,
            backend_id: None,
        }
    }

    #[tokio::test]
    async fn test_user_token_requires_server_identifier() {
        let client = PlexClient::new(context()).unwrap();
        let err = client.get_user_token("1", "kid").await.unwrap_err();
        assert!(matches!(err, BackendError::Config(_)));
    }

    #[test]
    fn test_identity() {
        let client = PlexClient::new(context()).unwrap().with_plex_tv_url("http://localhost/");
        assert_eq!(client.name(), "home_plex");
        assert_eq!(client.backend_type(), BackendType::Plex);
        assert_eq!(client.plex_tv_url, "http://localhost");
    }
}
