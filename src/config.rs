use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::monitor::MonitorSpec;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub database: DBConfig,
    pub supabase: SupabaseConfig,
    pub flush: FlushConfig,
    pub input: InputConfig,
    pub display: DisplayConfig,
    /// Explicit geometry; replaces display detection when non-empty.
    pub monitors: Vec<MonitorSpec>,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DBType {
    #[default]
    Sqlite,
    Postgres,
    Memory,
}

impl DBType {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "sqlite" => Ok(DBType::Sqlite),
            "postgres" | "postgresql" => Ok(DBType::Postgres),
            "memory" => Ok(DBType::Memory),
            other => bail!("Unsupported database type: {}", other),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct DBConfig {
    #[serde(rename = "type")]
    pub db_type: DBType,
    pub url: Option<String>,
    pub filepath: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct SupabaseConfig {
    pub enabled: bool,
    pub url: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct FlushConfig {
    pub interval_secs: u64,
    pub skip_empty: bool,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            skip_empty: false,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InputBackend {
    /// Global OS hook; sees every event including the wheel.
    #[default]
    Hook,
    /// Samples device state on an interval; no wheel support.
    Poll,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub backend: InputBackend,
    pub poll_interval_ms: u64,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            backend: InputBackend::Hook,
            poll_interval_ms: 100,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DistanceUnit {
    #[default]
    Imperial,
    Metric,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub unit: DistanceUnit,
    pub status_interval_secs: u64,
    pub refresh_interval_secs: u64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            unit: DistanceUnit::Imperial,
            status_interval_secs: 1,
            refresh_interval_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub console: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console: false,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        // A missing .env is fine.
        dotenv::dotenv().ok();

        let mut config = match Self::config_path() {
            Some(config_path) => Self::from_file(&config_path)?,
            None => Config::default(),
        };

        config.apply_env(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml(&config_str)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Config::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Looks for `config.yaml` in the working directory, then in the user's
    /// config directory.
    fn config_path() -> Option<PathBuf> {
        let local = PathBuf::from("config.yaml");
        if local.exists() {
            return Some(local);
        }
        ProjectDirs::from("com", "input-tally", "input-tally")
            .map(|proj_dirs| proj_dirs.config_dir().join("config.yaml"))
            .filter(|path| path.exists())
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(db_type) = var("KL_DB_TYPE").filter(|v| !v.is_empty()) {
            self.database.db_type = DBType::parse(&db_type)?;
        }
        if let Some(url) = var("KL_DB_URL").filter(|v| !v.is_empty()) {
            self.database.url = Some(url);
        }
        if let Some(filepath) = var("KL_DB_FILEPATH").filter(|v| !v.is_empty()) {
            self.database.filepath = Some(PathBuf::from(filepath));
        }
        if let Some(secs) = var("KL_FLUSH_SECS").filter(|v| !v.is_empty()) {
            self.flush.interval_secs = secs
                .parse()
                .with_context(|| format!("KL_FLUSH_SECS is not a number: {}", secs))?;
        }

        if let Some(url) = var("SUPABASE_URL").filter(|v| !v.is_empty()) {
            self.supabase.url = Some(url);
            self.supabase.enabled = true;
        }
        if let Some(api_key) = var("SUPABASE_ANON_KEY").filter(|v| !v.is_empty()) {
            self.supabase.api_key = Some(api_key);
            self.supabase.enabled = true;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.flush.interval_secs == 0 {
            bail!("flush.interval_secs must be greater than zero");
        }
        if self.input.poll_interval_ms == 0 {
            bail!("input.poll_interval_ms must be greater than zero");
        }
        if self.database.db_type == DBType::Postgres && self.database.url.is_none() {
            bail!("database.url is required for postgres");
        }
        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush.interval_secs)
    }

    pub fn has_supabase_config(&self) -> bool {
        self.supabase.enabled && self.supabase.url.is_some() && self.supabase.api_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::from_yaml("").unwrap();
        assert_eq!(config.database.db_type, DBType::Sqlite);
        assert_eq!(config.flush_interval(), Duration::from_secs(60));
        assert_eq!(config.input.backend, InputBackend::Hook);
        assert!(config.monitors.is_empty());
        assert!(!config.has_supabase_config());
    }

    #[test]
    fn parses_sections() {
        let config = Config::from_yaml(
            r#"
database:
  type: postgres
  url: postgres://localhost/metrics
flush:
  interval_secs: 30
  skip_empty: true
input:
  backend: poll
display:
  unit: metric
monitors:
  - { x_pos: 0, y_pos: 0, width_px: 1920, height_px: 1080, width_in: 20.0, height_in: 11.25, primary: true }
"#,
        )
        .unwrap();

        assert_eq!(config.database.db_type, DBType::Postgres);
        assert_eq!(config.flush.interval_secs, 30);
        assert!(config.flush.skip_empty);
        assert_eq!(config.input.backend, InputBackend::Poll);
        assert_eq!(config.input.poll_interval_ms, 100);
        assert_eq!(config.display.unit, DistanceUnit::Metric);
        assert_eq!(config.monitors.len(), 1);
        assert!(config.monitors[0].primary);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn environment_overrides_file_values() {
        let env: HashMap<&str, &str> = [
            ("KL_DB_TYPE", "memory"),
            ("KL_DB_FILEPATH", "/tmp/metrics.db"),
            ("KL_FLUSH_SECS", "5"),
            ("SUPABASE_URL", "https://example.supabase.co"),
            ("SUPABASE_ANON_KEY", "anon"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.database.db_type, DBType::Memory);
        assert_eq!(config.database.filepath, Some(PathBuf::from("/tmp/metrics.db")));
        assert_eq!(config.flush.interval_secs, 5);
        assert!(config.has_supabase_config());
    }

    #[test]
    fn blank_supabase_variables_leave_the_mirror_off() {
        let mut config = Config::default();
        config
            .apply_env(|key| key.starts_with("SUPABASE_").then(String::new))
            .unwrap();

        assert!(!config.supabase.enabled);
        assert_eq!(config.supabase.url, None);
        assert!(!config.has_supabase_config());
    }

    #[test]
    fn rejects_unknown_database_and_bad_values() {
        let mut config = Config::default();
        assert!(config.apply_env(|key| (key == "KL_DB_TYPE").then(|| "libsql".to_string())).is_err());
        assert!(config.apply_env(|key| (key == "KL_FLUSH_SECS").then(|| "soon".to_string())).is_err());

        let config = Config::from_yaml("database:\n  type: postgres\n").unwrap();
        assert!(config.validate().is_err());

        let config = Config::from_yaml("flush:\n  interval_secs: 0\n").unwrap();
        assert!(config.validate().is_err());
    }
}
