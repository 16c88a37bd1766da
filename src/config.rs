use anyhow::{anyhow, Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for DepSentry
///
/// Built once at startup and passed by reference into every component.
/// No component reads ambient process state after this is constructed.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    /// Hosting API settings (listing, commits, file contents)
    #[serde(default)]
    pub github: GitHubConfig,

    /// Package registry settings (latest-release lookups)
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Synchronization behavior settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// Daemon configuration
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Durable store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Hosting API configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GitHubConfig {
    /// Base URL of the hosting API
    #[serde(default = "default_github_api_url")]
    pub api_url: String,

    /// Organization or account whose repositories are mirrored
    #[serde(default)]
    pub org: String,

    /// Personal access token (falls back to GITHUB_TOKEN at load time)
    pub token: Option<String>,

    /// Repository exclusion patterns
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

/// Package registry configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RegistryConfig {
    /// Base URL of the registry lookup API
    #[serde(default = "default_registry_api_url")]
    pub api_url: String,

    /// Registry platform the manifests belong to
    #[serde(default = "default_platform")]
    pub platform: String,

    /// API key (falls back to LIBRARIES_IO_API_KEY at load time)
    pub api_key: Option<String>,
}

/// Synchronization configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SyncConfig {
    /// Maximum parallel dependency lookups per repository
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Timeout for each external call in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Activity lookback window for change detection
    #[serde(default = "default_lookback")]
    pub lookback: String, // "1h"

    /// Run the first pass after startup as a forced full refresh
    #[serde(default = "default_true")]
    pub force_on_start: bool,
}

/// Daemon configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DaemonConfig {
    /// Sync interval
    #[serde(default = "default_interval")]
    pub interval: String, // "1h"

    /// PID file location
    #[serde(default = "default_pid_file")]
    pub pid_file: String,

    /// Log file location
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

/// Durable store configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct StoreConfig {
    /// Database path (defaults to XDG data location)
    pub db_path: Option<String>,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"
}

// Default value functions
fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}
fn default_registry_api_url() -> String {
    "https://libraries.io".to_string()
}
fn default_platform() -> String {
    "npm".to_string()
}
fn default_true() -> bool {
    true
}
fn default_max_parallel() -> usize {
    4
}
fn default_timeout() -> u64 {
    30
}
fn default_lookback() -> String {
    "1h".to_string()
}
fn default_interval() -> String {
    "1h".to_string()
}
fn default_pid_file() -> String {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        format!("{}/depsentry.pid", runtime_dir)
    } else {
        "/tmp/depsentry.pid".to_string()
    }
}
fn default_log_file() -> String {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        format!("{}/depsentry/daemon.log", data_home)
    } else if let Ok(home) = std::env::var("HOME") {
        format!("{}/.local/share/depsentry/daemon.log", home)
    } else {
        "/tmp/depsentry-daemon.log".to_string()
    }
}
fn default_log_level() -> String {
    "info".to_string()
}

// Default implementations
impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: default_github_api_url(),
            org: String::new(),
            token: None,
            exclude_patterns: Vec::new(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            api_url: default_registry_api_url(),
            platform: default_platform(),
            api_key: None,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            timeout: default_timeout(),
            lookback: default_lookback(),
            force_on_start: default_true(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            pid_file: default_pid_file(),
            log_file: default_log_file(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Parse duration strings like "30m", "1h", "24h".
pub fn parse_duration(duration_str: &str) -> Result<Duration> {
    let duration_str = duration_str.trim().to_lowercase();

    let secs = if let Some(value) = duration_str.strip_suffix('s') {
        value.parse::<u64>().context("Invalid seconds value")?
    } else if let Some(value) = duration_str.strip_suffix('m') {
        value
            .parse::<u64>()
            .map(|v| v * 60)
            .context("Invalid minutes value")?
    } else if let Some(value) = duration_str.strip_suffix('h') {
        value
            .parse::<u64>()
            .map(|v| v * 3600)
            .context("Invalid hours value")?
    } else if let Some(value) = duration_str.strip_suffix('d') {
        value
            .parse::<u64>()
            .map(|v| v * 86400)
            .context("Invalid days value")?
    } else {
        // Try to parse as raw seconds
        duration_str
            .parse::<u64>()
            .context("Invalid duration format. Use format like '30m', '1h', '2d'")?
    };

    Ok(Duration::from_secs(secs))
}

impl Config {
    /// Load configuration from the default location or create a default config
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            let mut config = Self::default();

            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
            }

            config.save(&config_path)?;
            config.resolve_credentials();

            tracing::info!("Created default configuration at: {:?}", config_path);
            Ok(config)
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.expand_paths()?;
        config.resolve_credentials();

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("depsentry").join("config.yml"))
    }

    /// Expand environment variables in configuration paths
    pub fn expand_paths(&mut self) -> Result<()> {
        self.daemon.pid_file = shellexpand::full(&self.daemon.pid_file)
            .context("Failed to expand pid_file path")?
            .into_owned();

        self.daemon.log_file = shellexpand::full(&self.daemon.log_file)
            .context("Failed to expand log_file path")?
            .into_owned();

        if let Some(db_path) = &self.store.db_path {
            self.store.db_path = Some(
                shellexpand::full(db_path)
                    .context("Failed to expand db_path")?
                    .into_owned(),
            );
        }

        Ok(())
    }

    /// Fill credentials from the process environment when the file omits
    /// them. This is the only place ambient state is consulted; components
    /// downstream see only the resolved config.
    pub fn resolve_credentials(&mut self) {
        if self.github.token.is_none() {
            if let Ok(token) = std::env::var("GITHUB_TOKEN") {
                if !token.is_empty() {
                    self.github.token = Some(token);
                }
            }
        }
        if self.registry.api_key.is_none() {
            if let Ok(key) = std::env::var("LIBRARIES_IO_API_KEY") {
                if !key.is_empty() {
                    self.registry.api_key = Some(key);
                }
            }
        }
    }

    /// Activity lookback window as a Duration
    pub fn lookback_duration(&self) -> Result<Duration> {
        parse_duration(&self.sync.lookback).context("Failed to parse sync lookback window")
    }

    /// Daemon sync interval as a Duration
    pub fn interval_duration(&self) -> Result<Duration> {
        parse_duration(&self.daemon.interval).context("Failed to parse daemon sync interval")
    }

    /// Per-call timeout as a Duration
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.sync.timeout)
    }

    /// Validate the parts a sync pass cannot run without
    pub fn validate(&self) -> Result<()> {
        if self.github.org.trim().is_empty() {
            return Err(anyhow!(
                "No organization configured. Set github.org in the config file."
            ));
        }
        self.lookback_duration()?;
        self.interval_duration()?;
        Ok(())
    }
}
