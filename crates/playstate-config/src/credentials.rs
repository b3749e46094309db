use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Serialize, Deserialize, Default)]
struct CredentialsData {
    #[serde(flatten)]
    data: HashMap<String, String>,
}

/// Secrets and sync checkpoints kept outside of `config.toml`
pub struct CredentialStore {
    path: PathBuf,
    credentials: HashMap<String, String>,
}

impl CredentialStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            credentials: HashMap::new(),
        }
    }

    pub fn load(&mut self) -> Result<()> {
        if self.path.exists() {
            let content = std::fs::read_to_string(&self.path)?;
            let creds_data: CredentialsData = toml::from_str(&content)?;
            self.credentials = creds_data.data;
        }
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let creds_data = CredentialsData {
            data: self.credentials.clone(),
        };
        let content = toml::to_string_pretty(&creds_data)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&String> {
        self.credentials.get(key)
    }

    pub fn set(&mut self, key: String, value: String) {
        self.credentials.insert(key, value);
    }

    pub fn remove(&mut self, key: &str) {
        self.credentials.remove(key);
    }

    /// Limited token issued for a managed user of a backend
    pub fn get_user_token(&self, backend: &str, user: &str) -> Option<&String> {
        self.get(&format!("{}_user_token_{}", backend, user))
    }

    pub fn set_user_token(&mut self, backend: &str, user: &str, token: String) {
        self.set(format!("{}_user_token_{}", backend, user), token);
    }

    fn get_timestamp(&self, key: &str) -> Option<DateTime<Utc>> {
        self.get(key)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Last successful import or export for a backend, `direction` is "import" or "export"
    pub fn get_last_sync(&self, backend: &str, direction: &str) -> Option<DateTime<Utc>> {
        self.get_timestamp(&format!("{}_last_{}", backend, direction))
    }

    pub fn set_last_sync(&mut self, backend: &str, direction: &str, timestamp: DateTime<Utc>) {
        self.set(format!("{}_last_{}", backend, direction), timestamp.to_rfc3339());
    }

    pub fn get_all_keys(&self) -> Vec<String> {
        self.credentials.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_credential_store_load_and_save() {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_path_buf();

        let mut store = CredentialStore::new(path.clone());
        store.set_user_token("home_plex", "alice", "token-a".to_string());
        store.save().unwrap();

        let mut loaded_store = CredentialStore::new(path);
        loaded_store.load().unwrap();
        assert_eq!(loaded_store.get_user_token("home_plex", "alice"), Some(&"token-a".to_string()));
        assert_eq!(loaded_store.get_user_token("home_plex", "bob"), None);
    }

    #[test]
    fn test_last_sync_round_trip() {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_path_buf();

        let mut store = CredentialStore::new(path.clone());
        let when = Utc::now();
        store.set_last_sync("home_plex", "import", when);
        store.save().unwrap();

        let mut loaded_store = CredentialStore::new(path);
        loaded_store.load().unwrap();
        let loaded = loaded_store.get_last_sync("home_plex", "import").unwrap();
        assert!((loaded - when).num_seconds().abs() < 2);
        assert!(loaded_store.get_last_sync("home_plex", "export").is_none());
    }

    #[test]
    fn test_credential_store_remove() {
        let mut store = CredentialStore::new(PathBuf::from("/tmp/test"));
        store.set("key1".to_string(), "value1".to_string());
        store.set("key2".to_string(), "value2".to_string());

        store.remove("key1");
        assert_eq!(store.get("key1"), None);
        assert_eq!(store.get("key2"), Some(&"value2".to_string()));
    }
}
