use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://api.airtable.com/v0";
pub const DEFAULT_MOUNT_PREFIX: &str = "/.netlify/functions/airtable";

/// Environment variables that must be present for the server to start
pub const REQUIRED_ENV: [&str; 8] = [
    "AIRTABLE_API_KEY",
    "AIRTABLE_BASE_ID",
    "BOARDS_TABLE_ID",
    "SESSIONS_TABLE_ID",
    "TOPICS_TABLE_ID",
    "VOTES_TABLE_ID",
    "COMMENTS_TABLE_ID",
    "USERS_TABLE_ID",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub router: RouterConfig,
    pub retry: RetryConfig,
    pub store: StoreConfig,
}

/// The part of the configuration read from the optional TOML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8888,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Prefix the router is mounted under; everything after it is the resource path
    pub mount_prefix: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            mount_prefix: DEFAULT_MOUNT_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Upper bound on any single wait, including a `Retry-After` hint
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff_ms() -> u64 { 500 }
fn default_max_delay_ms() -> u64 { 30_000 }

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (zero based) when the store gave no hint
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.initial_backoff_ms.saturating_mul(2_u64.saturating_pow(attempt)))
    }

    /// Wait before retry number `attempt`: the store's hint if it sent one, else backoff, capped
    pub fn delay(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        hint.unwrap_or_else(|| self.backoff(attempt))
            .min(Duration::from_millis(self.max_delay_ms))
    }
}

/// Credentials and table ids for the record store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub api_base: String,
    pub api_key: String,
    pub base_id: String,
    pub tables: TableIds,
}

#[derive(Debug, Clone)]
pub struct TableIds {
    pub boards: String,
    pub sessions: String,
    pub topics: String,
    pub votes: String,
    pub comments: String,
    pub users: String,
}

impl StoreConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Every missing key is reported at once.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let value = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let missing: Vec<&str> = REQUIRED_ENV
            .iter()
            .copied()
            .filter(|key| value(key).is_none())
            .collect();
        if !missing.is_empty() {
            bail!("Missing required environment variables: {}", missing.join(", "));
        }

        let required = |key: &str| value(key).unwrap_or_default();
        Ok(Self {
            api_base: value("AIRTABLE_API_BASE_URL").unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            api_key: required("AIRTABLE_API_KEY"),
            base_id: required("AIRTABLE_BASE_ID"),
            tables: TableIds {
                boards: required("BOARDS_TABLE_ID"),
                sessions: required("SESSIONS_TABLE_ID"),
                topics: required("TOPICS_TABLE_ID"),
                votes: required("VOTES_TABLE_ID"),
                comments: required("COMMENTS_TABLE_ID"),
                users: required("USERS_TABLE_ID"),
            },
        })
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        // A local .env is optional
        if let Err(e) = dotenvy::dotenv() {
            tracing::debug!("No .env file loaded: {}", e);
        }

        let file = FileConfig::load()?;
        let store = StoreConfig::from_env()?;

        Ok(Self {
            server: file.server,
            router: file.router,
            retry: file.retry,
            store,
        })
    }
}

impl FileConfig {
    pub fn load() -> Result<Self> {
        // Try to load from environment variable
        if let Ok(path) = std::env::var("LEAN_COFFEE_CONFIG") {
            return Self::load_from_path(&PathBuf::from(path));
        }

        let default_paths = vec![
            PathBuf::from("lean-coffee-server.toml"),
            PathBuf::from("config/lean-coffee-server.toml"),
            PathBuf::from("/etc/lean-coffee/server.toml"),
        ];

        for path in default_paths {
            if path.exists() {
                return Self::load_from_path(&path);
            }
        }

        tracing::warn!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_path(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: FileConfig = toml::from_str(&content)?;
        Ok(config)
    }
}
