//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/outpost/config.toml)
//! 3. Environment variables (OUTPOST_* prefix)
//!
//! Environment variables take precedence over config file values.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable prefix
const ENV_PREFIX: &str = "OUTPOST";

/// Default number of transient failures before an operation is dropped
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for the local database
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Base URL of the REST API (optional, offline-only without it)
    #[serde(default)]
    pub api_url: Option<String>,

    /// WebSocket URL of the realtime channel
    #[serde(default)]
    pub realtime_url: Option<String>,

    /// Broadcast groups to subscribe to on the realtime channel
    #[serde(default)]
    pub groups: Vec<String>,

    /// Transient failures allowed before an operation is dropped
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Quiet period after a reconnect before the flush fires
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Fallback reachability polling interval
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,

    /// Window for matching a realtime create against a provisional record
    #[serde(default = "default_match_window_secs")]
    pub match_window_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            api_url: None,
            realtime_url: None,
            groups: Vec::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            debounce_ms: default_debounce_ms(),
            probe_interval_secs: default_probe_interval_secs(),
            match_window_secs: default_match_window_secs(),
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (OUTPOST_DATA_DIR, OUTPOST_API_URL, ...)
    /// 2. Config file (~/.config/outpost/config.toml or OUTPOST_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        // Empty string clears the URL
        if let Ok(val) = std::env::var(format!("{}_API_URL", ENV_PREFIX)) {
            self.api_url = if val.is_empty() { None } else { Some(val) };
        }

        if let Ok(val) = std::env::var(format!("{}_REALTIME_URL", ENV_PREFIX)) {
            self.realtime_url = if val.is_empty() { None } else { Some(val) };
        }

        // Comma separated, e.g. OUTPOST_GROUPS=site-12,patrol
        if let Ok(val) = std::env::var(format!("{}_GROUPS", ENV_PREFIX)) {
            self.groups = val
                .split(',')
                .map(str::trim)
                .filter(|g| !g.is_empty())
                .map(String::from)
                .collect();
        }

        if let Ok(val) = std::env::var(format!("{}_MAX_RETRIES", ENV_PREFIX)) {
            match val.parse() {
                Ok(n) if n > 0 => self.max_retries = n,
                _ => tracing::warn!("Ignoring invalid {}_MAX_RETRIES={:?}", ENV_PREFIX, val),
            }
        }

        if let Ok(val) = std::env::var(format!("{}_DEBOUNCE_MS", ENV_PREFIX)) {
            match val.parse() {
                Ok(ms) => self.debounce_ms = ms,
                Err(_) => tracing::warn!("Ignoring invalid {}_DEBOUNCE_MS={:?}", ENV_PREFIX, val),
            }
        }
    }

    /// Ensure data directory exists
    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_file_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with OUTPOST_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("outpost")
            .join("config.toml")
    }

    /// Get the path to the SQLite database holding queue and cache
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("outpost.db")
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn match_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.match_window_secs as i64)
    }
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("outpost")
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_debounce_ms() -> u64 {
    1500
}

fn default_probe_interval_secs() -> u64 {
    30
}

fn default_match_window_secs() -> u64 {
    120
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that touch environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Guard that locks env access and saves/restores env vars
    struct EnvGuard<'a> {
        _lock: std::sync::MutexGuard<'a, ()>,
        saved: Vec<(String, Option<String>)>,
    }

    impl<'a> EnvGuard<'a> {
        fn new(vars: &[&str]) -> Self {
            let lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let saved = vars
                .iter()
                .map(|&name| (name.to_string(), env::var(name).ok()))
                .collect();
            for name in vars {
                env::remove_var(name);
            }
            Self { _lock: lock, saved }
        }
    }

    impl Drop for EnvGuard<'_> {
        fn drop(&mut self) {
            for (name, value) in &self.saved {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    const ENV_VARS: &[&str] = &[
        "OUTPOST_DATA_DIR",
        "OUTPOST_API_URL",
        "OUTPOST_REALTIME_URL",
        "OUTPOST_GROUPS",
        "OUTPOST_MAX_RETRIES",
        "OUTPOST_DEBOUNCE_MS",
    ];

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.api_url.is_none());
        assert!(config.realtime_url.is_none());
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.debounce(), Duration::from_millis(1500));
        assert!(config.data_dir.ends_with("outpost"));
    }

    #[test]
    fn test_database_path() {
        let config = Config::default();
        assert!(config.database_path().ends_with("outpost.db"));
    }

    #[test]
    fn test_env_override_data_dir() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();

        env::set_var("OUTPOST_DATA_DIR", "/tmp/outpost-test");
        config.apply_env_overrides();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/outpost-test"));
    }

    #[test]
    fn test_env_override_api_url() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();

        env::set_var("OUTPOST_API_URL", "https://ops.example.com/api");
        config.apply_env_overrides();
        assert_eq!(
            config.api_url,
            Some("https://ops.example.com/api".to_string())
        );

        // Empty string clears it
        env::set_var("OUTPOST_API_URL", "");
        config.apply_env_overrides();
        assert!(config.api_url.is_none());
    }

    #[test]
    fn test_env_override_groups_and_retries() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();

        env::set_var("OUTPOST_GROUPS", "site-12, patrol,,");
        env::set_var("OUTPOST_MAX_RETRIES", "5");
        config.apply_env_overrides();
        assert_eq!(config.groups, vec!["site-12", "patrol"]);
        assert_eq!(config.max_retries, 5);

        // Zero would drop every operation on its first failure
        env::set_var("OUTPOST_MAX_RETRIES", "0");
        config.apply_env_overrides();
        assert_eq!(config.max_retries, 5);
    }

    #[test]
    fn test_serialization() {
        let _guard = EnvGuard::new(ENV_VARS);

        let config = Config {
            data_dir: PathBuf::from("/data/outpost"),
            api_url: Some("https://ops.example.com".to_string()),
            realtime_url: Some("wss://ops.example.com/rt".to_string()),
            groups: vec!["site-12".to_string()],
            ..Config::default()
        };

        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("api_url"));
        assert!(toml_str.contains("realtime_url"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.data_dir, config.data_dir);
        assert_eq!(parsed.api_url, config.api_url);
        assert_eq!(parsed.groups, config.groups);
        assert_eq!(parsed.max_retries, config.max_retries);
    }

    #[test]
    fn test_load_from_str() {
        let _guard = EnvGuard::new(ENV_VARS);

        let toml = r#"
            data_dir = "/custom/data"
            api_url = "https://ops.example.com"
            max_retries = 4
            debounce_ms = 250
        "#;

        let config = Config::load_from_str(toml).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/custom/data"));
        assert_eq!(config.api_url, Some("https://ops.example.com".to_string()));
        assert_eq!(config.max_retries, 4);
        assert_eq!(config.debounce(), Duration::from_millis(250));
        assert_eq!(config.match_window(), chrono::Duration::seconds(120));
    }

    #[test]
    fn test_load_from_path_missing_file() {
        let _guard = EnvGuard::new(ENV_VARS);

        let temp_dir = tempfile::TempDir::new().unwrap();
        env::set_var("OUTPOST_DATA_DIR", temp_dir.path().join("data"));

        let path = PathBuf::from("/nonexistent/config.toml");
        let config = Config::load_from_path(&path).unwrap();
        assert!(config.api_url.is_none());
        assert!(config.data_dir.exists());
    }
}
