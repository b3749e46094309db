use playstate_config::{BackendConfig, BackendType};
use crate::error::BackendError;

/// Everything a client needs to talk to one configured backend
#[derive(Debug, Clone, PartialEq)]
pub struct BackendContext {
    pub name: String,
    pub backend_type: BackendType,
    /// Base url without trailing slash
    pub url: String,
    pub token: String,
    /// Backend side user id
    pub user: Option<String>,
    /// Server unique identifier
    pub backend_id: Option<String>,
}

impl BackendContext {
    pub fn from_config(name: &str, config: &BackendConfig) -> Result<Self, BackendError> {
        let url = config.url.trim().trim_end_matches('/').to_string();
        if url.is_empty() {
            return Err(BackendError::Config(format!("backend '{}' has no url", name)));
        }

        Ok(Self {
            name: name.to_string(),
            backend_type: config.backend_type,
            url,
            token: config.token.clone(),
            user: config.user.clone().filter(|u| !u.is_empty()),
            backend_id: config.uuid.clone().filter(|u| !u.is_empty()),
        })
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.url, path.trim_start_matches('/'))
    }

    pub fn require_user(&self) -> Result<&str, BackendError> {
        self.user
            .as_deref()
            .ok_or_else(|| BackendError::Config(format!("backend '{}' has no user configured", self.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> BackendConfig {
        BackendConfig {
            backend_type: BackendType::Jellyfin,
            url: url.to_string(),
            token: "t".to_string(),
            user: Some(String::new()),
            uuid: Some("srv".to_string()),
            import: true,
            export: false,
        }
    }

    #[test]
    fn test_from_config() {
        let ctx = BackendContext::from_config("jf", &config("http://jf:8096/ ")).unwrap();
        assert_eq!(ctx.endpoint("/Users/AuthenticateByName"), "http://jf:8096/Users/AuthenticateByName");
        assert_eq!(ctx.backend_id.as_deref(), Some("srv"));
        assert!(ctx.user.is_none());
        assert!(ctx.require_user().is_err());

        assert!(BackendContext::from_config("jf", &config("  ")).is_err());
    }
}
