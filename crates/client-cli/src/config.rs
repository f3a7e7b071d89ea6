use anyhow::{bail, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::store::{Profile, DEFAULT_POLL_INTERVAL};

/// Keys accepted by `lean-coffee config set/get`
pub const KEYS: [&str; 5] = ["server", "name", "email", "avatar", "poll_interval"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub profile: Profile,
    #[serde(default)]
    pub poll: PollConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub server: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollConfig {
    pub interval_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_POLL_INTERVAL.as_secs(),
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Config {
    pub fn config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "lean-coffee", "lean-coffee")
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

        let config_dir = proj_dirs.config_dir();
        std::fs::create_dir_all(config_dir)?;

        Ok(config_dir.join("config.toml"))
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn set(&mut self, key: &str, value: String) -> Result<()> {
        match key {
            "server" => self.remote.server = Some(value),
            "name" => self.profile.name = Some(value),
            "email" => self.profile.email = Some(value),
            "avatar" => self.profile.avatar = Some(value),
            "poll_interval" => {
                self.poll.interval_secs = value
                    .trim()
                    .parse()
                    .map_err(|_| anyhow::anyhow!("poll_interval must be a number of seconds"))?
            }
            _ => bail!("Unknown config key: {}. Valid keys: {}", key, KEYS.join(", ")),
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<String> {
        let value = match key {
            "server" => self.remote.server.clone().unwrap_or_default(),
            "name" => self.profile.name.clone().unwrap_or_default(),
            "email" => self.profile.email.clone().unwrap_or_default(),
            "avatar" => self.profile.avatar.clone().unwrap_or_default(),
            "poll_interval" => self.poll.interval_secs.to_string(),
            _ => bail!("Unknown config key: {}", key),
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_sections_missing() {
        let config: Config = toml::from_str("[remote]\nserver = \"http://localhost:8888\"\n").unwrap();
        assert_eq!(config.remote.server.as_deref(), Some("http://localhost:8888"));
        assert_eq!(config.poll.interval(), DEFAULT_POLL_INTERVAL);
        assert_eq!(config.profile, Profile::default());
    }

    #[test]
    fn test_set_and_get_round_trip_through_toml() {
        let mut config = Config::default();
        config.set("name", "Ada".into()).unwrap();
        config.set("poll_interval", " 30 ".into()).unwrap();

        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.get("name").unwrap(), "Ada");
        assert_eq!(parsed.poll.interval(), Duration::from_secs(30));
        assert_eq!(parsed.get("email").unwrap(), "");
    }

    #[test]
    fn test_rejects_unknown_keys_and_bad_intervals() {
        let mut config = Config::default();
        assert!(config.set("token", "x".into()).is_err());
        assert!(config.set("poll_interval", "soon".into()).is_err());
        assert!(config.get("token").is_err());
    }
}
