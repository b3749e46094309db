pub mod config;
pub mod credentials;
pub mod paths;

pub use config::{
    default_tasks, is_valid_timer, BackendConfig, BackendType, Config, ConfigError, DaemonConfig,
    DatabaseConfig, LoggingConfig, MapperConfig, TaskConfig, TaskDefinition,
};
pub use credentials::CredentialStore;
pub use paths::{container_base_path, PathManager};
