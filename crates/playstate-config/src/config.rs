use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;
use playstate_models::SourcePriority;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("task '{task}' has an invalid timer '{timer}'")]
    InvalidTimer { task: String, timer: String },

    #[error("backend '{0}' has no url configured")]
    MissingUrl(String),

    #[error("source_priority lists unknown backend '{0}'")]
    UnknownPriorityBackend(String),

    #[error("database pool_size must be at least 1")]
    InvalidPoolSize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub mapper: MapperConfig,
    #[serde(default)]
    pub backends: BTreeMap<String, BackendConfig>,
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskConfig>,
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Defaults to `PathManager::database_file()`
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            pool_size: default_pool_size(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MapperConfig {
    /// Backends listed first win ties between equally recent reports
    #[serde(default)]
    pub source_priority: Vec<String>,
    /// Load only what is needed instead of the whole state table
    #[serde(default)]
    pub lazy_load: bool,
}

impl MapperConfig {
    pub fn priority(&self) -> SourcePriority {
        SourcePriority::new(self.source_priority.clone())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    Plex,
    Jellyfin,
    Emby,
}

impl BackendType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendType::Plex => "plex",
            BackendType::Jellyfin => "jellyfin",
            BackendType::Emby => "emby",
        }
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(rename = "type")]
    pub backend_type: BackendType,
    pub url: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub user: Option<String>,
    /// Server identifier, Plex machine id or Jellyfin/Emby server id
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default = "default_true")]
    pub import: bool,
    #[serde(default)]
    pub export: bool,
}

/// Per task overrides, every field falls back to the built-in default
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hide: Option<bool>,
}

/// Fully resolved task entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskDefinition {
    pub name: String,
    pub description: String,
    pub timer: String, // 5 field cron, "m h dom mon dow"
    pub enabled: bool,
    pub command: String,
    pub args: String,
    pub hide: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// 6 field cron driving the scheduler tick
    #[serde(default = "default_tick")]
    pub tick: String,
    #[serde(default = "default_true")]
    pub run_on_startup: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            tick: default_tick(),
            run_on_startup: default_true(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            file: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_pool_size() -> u32 {
    4
}

fn default_tick() -> String {
    "0 * * * * *".to_string() // Every minute
}

fn default_log_level() -> String {
    "info".to_string()
}

/// True when a 5 field cron expression parses
pub fn is_valid_timer(timer: &str) -> bool {
    cron::Schedule::from_str(&format!("0 {}", timer.trim())).is_ok()
}

fn task(name: &str, description: &str, timer: &str, enabled: bool, command: &str) -> TaskDefinition {
    TaskDefinition {
        name: name.to_string(),
        description: description.to_string(),
        timer: timer.to_string(),
        enabled,
        command: command.to_string(),
        args: "-v".to_string(),
        hide: false,
    }
}

pub fn default_tasks() -> Vec<TaskDefinition> {
    let mut dispatch = task(
        "dispatch",
        "Dispatch queued events to their respective listeners.",
        "* * * * *",
        true,
        "events:dispatch",
    );
    dispatch.hide = true;

    vec![
        task("import", "Import data from backends.", "0 */1 * * *", false, "state:import"),
        task("export", "Export data to backends.", "30 */1 * * *", false, "state:export"),
        task("backup", "Backup backends play states.", "0 6 */3 * *", true, "state:backup"),
        task("prune", "Delete old logs and backups.", "0 */12 * * *", true, "system:prune"),
        task("indexes", "Check database for optimal indexes.", "0 3 * * 3", true, "system:index"),
        task(
            "validate",
            "Validate stored backends reference id against the backends.",
            "0 4 */14 * *",
            true,
            "state:validate",
        ),
        dispatch,
    ]
}

impl Config {
    pub fn load_from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load when the file exists, otherwise start from defaults
    pub fn load_or_default(path: &PathBuf) -> anyhow::Result<Self> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save_to_file(&self, path: &PathBuf) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database.pool_size < 1 {
            return Err(ConfigError::InvalidPoolSize.into());
        }

        for (name, backend) in &self.backends {
            if backend.url.trim().is_empty() {
                return Err(ConfigError::MissingUrl(name.clone()).into());
            }
        }

        for name in &self.mapper.source_priority {
            if !self.backends.contains_key(name) {
                return Err(ConfigError::UnknownPriorityBackend(name.clone()).into());
            }
        }

        for (name, task) in &self.tasks {
            if let Some(timer) = &task.timer {
                if !is_valid_timer(timer) {
                    return Err(ConfigError::InvalidTimer {
                        task: name.clone(),
                        timer: timer.clone(),
                    }
                    .into());
                }
            }
        }

        Ok(())
    }

    /// Built-in tasks with `[tasks.<name>]` overrides applied
    ///
    /// An override with an invalid timer keeps the default timer. Unknown
    /// names become extra tasks when they carry both a command and a timer.
    pub fn task_table(&self) -> Vec<TaskDefinition> {
        let mut table = default_tasks();

        for definition in table.iter_mut() {
            if let Some(overrides) = self.tasks.get(&definition.name) {
                apply_overrides(definition, overrides);
            }
        }

        for (name, overrides) in &self.tasks {
            if table.iter().any(|t| &t.name == name) {
                continue;
            }

            let (Some(command), Some(timer)) = (&overrides.command, &overrides.timer) else {
                warn!(task = %name, "Ignoring task without command or timer");
                continue;
            };

            let mut definition = task(name, "", timer, false, command);
            apply_overrides(&mut definition, overrides);
            if is_valid_timer(&definition.timer) {
                table.push(definition);
            } else {
                warn!(task = %name, timer = %definition.timer, "Ignoring task with invalid timer");
            }
        }

        table
    }

    /// Names of backends with import enabled, ordered by name
    pub fn import_backends(&self) -> Vec<String> {
        self.backends
            .iter()
            .filter(|(_, b)| b.import)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn export_backends(&self) -> Vec<String> {
        self.backends
            .iter()
            .filter(|(_, b)| b.export)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

fn apply_overrides(definition: &mut TaskDefinition, overrides: &TaskConfig) {
    if let Some(description) = &overrides.description {
        definition.description = description.clone();
    }
    if let Some(timer) = &overrides.timer {
        if is_valid_timer(timer) {
            definition.timer = timer.clone();
        } else {
            warn!(task = %definition.name, timer = %timer, "Invalid task timer, keeping default");
        }
    }
    if let Some(enabled) = overrides.enabled {
        definition.enabled = enabled;
    }
    if let Some(command) = &overrides.command {
        definition.command = command.clone();
    }
    if let Some(args) = &overrides.args {
        definition.args = args.clone();
    }
    if let Some(hide) = overrides.hide {
        definition.hide = hide;
    }
}
