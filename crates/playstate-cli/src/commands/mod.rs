pub mod backends;
pub mod config;
pub mod daemon;
pub mod db;
pub mod events;
pub mod state;
pub mod tasks;

use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use playstate_config::{Config, CredentialStore, PathManager};
use playstate_core::{open_pool, EventsRepository, MigrationDirection, SqliteStorage, StateStorage, TaskScheduler};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Paths and configuration shared by every command
pub struct AppContext {
    pub paths: PathManager,
    pub config_file: PathBuf,
    pub config: Config,
}

impl AppContext {
    pub fn load(config_override: Option<PathBuf>) -> Result<Self> {
        let paths = if std::env::var_os("PLAYSTATE_BASE_PATH").is_some() {
            PathManager::from_docker_env()
        } else {
            PathManager::new().map_err(|e| eyre!("{}", e))?
        };

        let config_file = config_override.unwrap_or_else(|| paths.config_file());
        let config = Config::load_or_default(&config_file)
            .map_err(|e| eyre!("Failed to load config from {}: {}", config_file.display(), e))?;

        Ok(Self {
            paths,
            config_file,
            config,
        })
    }

    pub fn database_file(&self) -> PathBuf {
        self.config
            .database
            .path
            .clone()
            .unwrap_or_else(|| self.paths.database_file())
    }

    pub fn credentials(&self) -> Result<CredentialStore> {
        let mut store = CredentialStore::new(self.paths.credentials_file());
        store.load().map_err(|e| eyre!("Failed to load credentials: {}", e))?;
        Ok(store)
    }

    /// Open the database, applying pending migrations
    pub fn database(&self) -> Result<Database> {
        let path = self.database_file();
        let pool = open_pool(&path, self.config.database.pool_size)
            .wrap_err_with(|| format!("Failed to open database {}", path.display()))?;

        let storage = SqliteStorage::new(Arc::clone(&pool)).with_priority(self.config.mapper.priority());
        if !storage.is_migrated()? {
            info!(path = %path.display(), "Database schema is behind, migrating");
            storage.migrate(MigrationDirection::Up)?;
        }

        Ok(Database {
            storage: Arc::new(storage),
            events: Arc::new(EventsRepository::new(pool)),
        })
    }

    pub fn scheduler(&self, database: &Database) -> TaskScheduler {
        TaskScheduler::new(self.config.task_table(), Arc::clone(&database.events))
    }
}

pub struct Database {
    pub storage: Arc<SqliteStorage>,
    pub events: Arc<EventsRepository>,
}

pub fn format_date(date: Option<chrono::DateTime<chrono::Utc>>) -> String {
    date.map(|d| d.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "-".to_string())
}
