use std::path::{Path, PathBuf};

use serde::Deserialize;

// =============================================================================
// Time-related constants
// =============================================================================

/// Timeout for a single registry HTTP request in milliseconds (30 seconds)
pub const REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Upper bound for one registry call including transport, in milliseconds
pub const ATTEMPT_TIMEOUT_MS: u64 = 30_000;

/// Delay before the first retry in milliseconds
pub const RETRY_BASE_DELAY_MS: u64 = 500;

/// Cap for the exponential retry delay in milliseconds
pub const RETRY_MAX_DELAY_MS: u64 = 8_000;

/// Attempts per registry call, including the first one
pub const RETRY_MAX_ATTEMPTS: u32 = 5;

/// Environment variable overriding `registry.baseUrl`
pub const ENV_REGISTRY_URL: &str = "JFROG_URL";

/// Environment variable holding the registry bearer token
pub const ENV_ACCESS_TOKEN: &str = "JFROG_ACCESS_TOKEN";

const APP_DIR_NAME: &str = "apptag";

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub registry: RegistryConfig,
    pub retry: RetryConfig,
    pub policy: PolicyConfig,
    pub applications: Vec<ApplicationConfig>,
    pub log: LogConfig,
}

/// Registry endpoint configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RegistryConfig {
    /// Platform URL, e.g. `https://acme.jfrog.io`
    pub base_url: String,
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
    pub user_agent: String,
    /// Bearer token; only ever taken from the environment
    #[serde(skip)]
    pub access_token: Option<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: "https://localhost".to_string(),
            timeout_ms: REQUEST_TIMEOUT_MS,
            user_agent: concat!("apptag/", env!("CARGO_PKG_VERSION")).to_string(),
            access_token: None,
        }
    }
}

/// Retry policy for transient registry failures
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub attempt_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: RETRY_MAX_ATTEMPTS,
            base_delay_ms: RETRY_BASE_DELAY_MS,
            max_delay_ms: RETRY_MAX_DELAY_MS,
            attempt_timeout_ms: ATTEMPT_TIMEOUT_MS,
        }
    }
}

/// Which candidate wins when two versions have equal precedence
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TieBreakPolicy {
    /// `TRUSTED_RELEASE` beats `RELEASED`, then registry order
    #[default]
    PreferTrustedRelease,
    /// Registry order only
    RegistryOrder,
}

/// Tag used when a restore finds no usable backup property
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RestoreFallback {
    /// The version's own version string
    #[default]
    VersionString,
    /// The empty tag
    Empty,
}

impl RestoreFallback {
    pub fn tag_for<'a>(&self, version: &'a str) -> &'a str {
        match self {
            RestoreFallback::VersionString => version,
            RestoreFallback::Empty => "",
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct PolicyConfig {
    pub tie_break: TieBreakPolicy,
    pub restore_fallback: RestoreFallback,
}

/// An application known to the sweep
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationConfig {
    pub key: String,
    /// Version to start from when the application has no releases yet
    #[serde(default)]
    pub seed: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
    /// Also append logs to `log_path()`
    pub file: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            file: false,
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from the default location when it exists.
    ///
    /// An explicit path must exist; the default location is optional.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = config_path();
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Apply environment overrides; blank values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_blank = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        if let Some(url) = non_blank(ENV_REGISTRY_URL) {
            self.registry.base_url = url;
        }
        if let Some(token) = non_blank(ENV_ACCESS_TOKEN) {
            self.registry.access_token = Some(token);
        }
    }

    pub fn application(&self, key: &str) -> Option<&ApplicationConfig> {
        self.applications.iter().find(|app| app.key == key)
    }
}

/// Returns the path to the data directory for apptag.
/// Uses $XDG_DATA_HOME/apptag if XDG_DATA_HOME is set,
/// otherwise falls back to ~/.local/share/apptag,
/// or ./apptag if neither is available.
pub fn data_dir() -> PathBuf {
    data_dir_with_env(std::env::var("XDG_DATA_HOME").ok(), dirs::home_dir())
}

/// Returns the default path of the configuration file.
pub fn config_path() -> PathBuf {
    data_dir().join("config.json")
}

/// Returns the path to the log file.
pub fn log_path() -> PathBuf {
    data_dir().join("apptag.log")
}

fn data_dir_with_env(xdg_data_home: Option<String>, home_dir: Option<PathBuf>) -> PathBuf {
    let data_dir = xdg_data_home
        .map(PathBuf::from)
        .or_else(|| home_dir.map(|home| home.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));

    data_dir.join(APP_DIR_NAME)
}
