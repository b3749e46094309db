//! Builds backend clients from configuration

use playstate_config::{BackendConfig, BackendType, Config};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};
use crate::context::BackendContext;
use crate::emby::EmbyClient;
use crate::error::BackendError;
use crate::jellyfin::JellyfinClient;
use crate::plex::PlexClient;
use crate::traits::BackendClient;

pub fn create_client(name: &str, config: &BackendConfig) -> Result<Arc<dyn BackendClient>, BackendError> {
    let context = BackendContext::from_config(name, config)?;

    let client: Arc<dyn BackendClient> = match config.backend_type {
        BackendType::Plex => Arc::new(PlexClient::new(context)?),
        BackendType::Jellyfin => Arc::new(JellyfinClient::new(context)?),
        BackendType::Emby => Arc::new(EmbyClient::new(context)?),
    };

    Ok(client)
}

/// Configured clients keyed by backend name
#[derive(Default)]
pub struct ClientRegistry {
    clients: BTreeMap<String, Arc<dyn BackendClient>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a client for every configured backend
    ///
    /// A backend that fails to build is logged and left out.
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::new();

        for (name, backend) in &config.backends {
            match create_client(name, backend) {
                Ok(client) => registry.register(client),
                Err(e) => warn!(backend = %name, error = %e, "Skipping backend"),
            }
        }

        debug!(backends = registry.len(), "Built backend clients");
        registry
    }

    pub fn register(&mut self, client: Arc<dyn BackendClient>) {
        self.clients.insert(client.name().to_string(), client);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn BackendClient>> {
        self.clients.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.clients.keys().map(String::as_str).collect()
    }

    pub fn of_type(&self, backend_type: BackendType) -> Vec<Arc<dyn BackendClient>> {
        self.clients
            .values()
            .filter(|c| c.backend_type() == backend_type)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(backend_type: BackendType, url: &str) -> BackendConfig {
        BackendConfig {
            backend_type,
            url: url.to_string(),
            token: "token".to_string(),
            user: Some("u1".to_string()),
            uuid: None,
            import: true,
            export: true,
        }
    }

    #[test]
    fn test_from_config_builds_each_type() {
        let mut config = Config::default();
        config.backends.insert("plex".into(), backend(BackendType::Plex, "http://plex:32400"));
        config.backends.insert("jf".into(), backend(BackendType::Jellyfin, "http://jf:8096"));
        config.backends.insert("emby".into(), backend(BackendType::Emby, "http://emby:8096"));
        config.backends.insert("broken".into(), backend(BackendType::Emby, ""));

        let registry = ClientRegistry::from_config(&config);
        assert_eq!(registry.names(), vec!["emby", "jf", "plex"]);
        assert_eq!(registry.get("jf").unwrap().backend_type(), BackendType::Jellyfin);
        assert_eq!(registry.of_type(BackendType::Plex).len(), 1);
        assert!(registry.get("broken").is_none());
    }

    #[tokio::test]
    async fn test_mediabrowser_clients_reuse_configured_token() {
        let client = create_client("emby", &backend(BackendType::Emby, "http://emby:8096")).unwrap();
        assert_eq!(client.get_user_token("u2", "bob").await.unwrap(), "token");
        assert!(matches!(
            client.discover("token").await,
            Err(BackendError::Unsupported { operation: "discover", .. })
        ));
    }
}
