//! Configuration loading from file and environment variables.

use serde::Deserialize;
use thiserror::Error;

use cairn_db::DbRuntimeSettings;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Event store settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Lineage database settings.
    #[serde(default)]
    pub lineage: LineageConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Event store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Directory holding `chain.csv` and `events/`.
    #[serde(default = "default_store_path")]
    pub path: String,
}

/// Lineage database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LineageConfig {
    /// Path to the SQLite database file, or `:memory:`.
    #[serde(default = "default_lineage_path")]
    pub path: String,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

impl LineageConfig {
    pub fn db_settings(&self) -> DbRuntimeSettings {
        DbRuntimeSettings {
            busy_timeout_ms: self.busy_timeout_ms,
            pool_max_size: self.pool_max_size,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "cairn_store=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_store_path() -> String {
    "data".to_string()
}

fn default_lineage_path() -> String {
    "lineage.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    DbRuntimeSettings::default().busy_timeout_ms
}

fn default_pool_max_size() -> u32 {
    DbRuntimeSettings::default().pool_max_size
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl Default for LineageConfig {
    fn default() -> Self {
        Self {
            path: default_lineage_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Default config file name, used when neither a CLI argument nor
/// `CAIRN_CONFIG_PATH` names one.
pub const DEFAULT_CONFIG_PATH: &str = "cairn.toml";

/// Picks the config file: first CLI argument, then `CAIRN_CONFIG_PATH`,
/// then [`DEFAULT_CONFIG_PATH`]. Also returns where the path came from.
pub fn resolve_config_path<A, F>(mut args: A, env: F) -> (String, &'static str)
where
    A: Iterator<Item = String>,
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = args.nth(1).filter(|value| !value.trim().is_empty()) {
        return (path, "cli-arg");
    }

    if let Some(path) = env("CAIRN_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (path, "env-var");
        }
    }

    (DEFAULT_CONFIG_PATH.to_string(), "default")
}

/// Loads configuration from a TOML file, falling back to defaults, then
/// applies environment overrides from the process environment.
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Applies environment overrides read through `env`:
///
/// - `CAIRN_STORE_PATH` overrides `store.path`
/// - `CAIRN_LINEAGE_PATH` overrides `lineage.path`
/// - `CAIRN_LOG_LEVEL` overrides `logging.level`
/// - `CAIRN_LOG_JSON` overrides `logging.json` (set to "true" or "1" to enable)
pub fn apply_env_overrides<F>(config: &mut Config, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = env("CAIRN_STORE_PATH") {
        config.store.path = path;
    }
    if let Some(path) = env("CAIRN_LINEAGE_PATH") {
        config.lineage.path = path;
    }
    if let Some(level) = env("CAIRN_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = env("CAIRN_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn args(values: &[&str]) -> std::vec::IntoIter<String> {
        values
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .into_iter()
    }

    #[test]
    fn defaults_are_sensible() {
        let config = Config::default();
        assert_eq!(config.store.path, "data");
        assert_eq!(config.lineage.path, "lineage.db");
        assert_eq!(config.lineage.db_settings(), DbRuntimeSettings::default());
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_sections() {
        let config: Config = toml::from_str(
            r#"
            [store]
            path = "/var/lib/cairn/events"

            [lineage]
            pool_max_size = 8
            "#,
        )
        .expect("valid toml");
        assert_eq!(config.store.path, "/var/lib/cairn/events");
        assert_eq!(config.lineage.path, "lineage.db");
        assert_eq!(config.lineage.pool_max_size, 8);
        assert_eq!(config.lineage.busy_timeout_ms, 5_000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tmp");
        let path = dir.path().join("absent.toml");
        let config = load_config(path.to_str()).expect("missing file is not an error");
        assert_eq!(config.lineage.pool_max_size, 4);
    }

    #[test]
    fn unparseable_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp");
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[store\npath = 1").expect("write");
        let err = load_config(path.to_str()).expect_err("bad toml");
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = Config::default();
        apply_env_overrides(
            &mut config,
            env_of(&[
                ("CAIRN_STORE_PATH", "/tmp/events"),
                ("CAIRN_LINEAGE_PATH", ":memory:"),
                ("CAIRN_LOG_LEVEL", "debug"),
                ("CAIRN_LOG_JSON", "1"),
            ]),
        );
        assert_eq!(config.store.path, "/tmp/events");
        assert_eq!(config.lineage.path, ":memory:");
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);

        apply_env_overrides(&mut config, env_of(&[("CAIRN_LOG_JSON", "yes")]));
        assert!(!config.logging.json, "only 'true' and '1' enable json");
    }

    #[test]
    fn config_path_resolution_order() {
        let env = env_of(&[("CAIRN_CONFIG_PATH", "/etc/cairn.toml")]);
        assert_eq!(
            resolve_config_path(args(&["cairn", "local.toml"]), &env),
            ("local.toml".to_string(), "cli-arg")
        );
        assert_eq!(
            resolve_config_path(args(&["cairn"]), &env),
            ("/etc/cairn.toml".to_string(), "env-var")
        );
        assert_eq!(
            resolve_config_path(args(&["cairn", "  "]), env_of(&[])),
            ("cairn.toml".to_string(), "default")
        );
    }
}
