//! Per-session pseudonymous identity.
//!
//! The identity is written to every channel and read from the first channel
//! that has a usable copy, so losing one channel does not lose the identity.

use chrono::{DateTime, Duration, Utc};
use directories::ProjectDirs;
use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

const KEY_PREFIX: &str = "leancoffee:user:";
const COOKIE_LIFETIME_DAYS: i64 = 365;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    #[serde(default)]
    pub external_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl Identity {
    pub fn mint() -> Self {
        Self {
            external_id: Uuid::new_v4().to_string(),
            user_id: None,
        }
    }

    pub fn is_usable(&self) -> bool {
        !self.external_id.trim().is_empty()
    }
}

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("identity storage io: {0}")]
    Io(#[from] std::io::Error),

    #[error("identity storage format: {0}")]
    Format(#[from] serde_json::Error),

    #[error("no data directory available")]
    NoDataDir,
}

/// A place an identity can be kept
pub trait IdentityChannel: Send + Sync {
    fn name(&self) -> &'static str;
    fn read(&self, key: &str) -> Result<Option<String>, IdentityError>;
    fn write(&self, key: &str, value: &str) -> Result<(), IdentityError>;
}

/// Key/value storage area kept as one JSON object on disk
pub struct StorageArea {
    path: PathBuf,
}

impl StorageArea {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<Map<String, Value>, IdentityError> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Map::new());
        }
        Ok(serde_json::from_str(&content)?)
    }
}

impl IdentityChannel for StorageArea {
    fn name(&self) -> &'static str {
        "storage"
    }

    fn read(&self, key: &str) -> Result<Option<String>, IdentityError> {
        Ok(self.load()?.get(key).and_then(Value::as_str).map(str::to_string))
    }

    fn write(&self, key: &str, value: &str) -> Result<(), IdentityError> {
        let mut entries = self.load()?;
        entries.insert(key.to_string(), Value::String(value.to_string()));
        ensure_parent(&self.path)?;
        std::fs::write(&self.path, serde_json::to_string_pretty(&entries)?)?;
        Ok(())
    }
}

/// Cookie file fallback: one `key=value; expires=<rfc3339>` per line, values percent-encoded
pub struct CookieJar {
    path: PathBuf,
}

struct Cookie {
    key: String,
    value: String,
    expires: Option<DateTime<Utc>>,
}

impl Cookie {
    fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split(';').map(str::trim);
        let (key, value) = parts.next()?.split_once('=')?;
        let expires = parts
            .filter_map(|attr| attr.strip_prefix("expires="))
            .find_map(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|expires| expires.with_timezone(&Utc));
        Some(Self {
            key: key.to_string(),
            value: value.to_string(),
            expires,
        })
    }

    fn render(&self) -> String {
        match self.expires {
            Some(expires) => format!("{}={}; expires={}", self.key, self.value, expires.to_rfc3339()),
            None => format!("{}={}", self.key, self.value),
        }
    }

    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires.map_or(true, |expires| expires > now)
    }
}

impl CookieJar {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<Vec<Cookie>, IdentityError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        Ok(content.lines().filter_map(Cookie::parse).collect())
    }
}

impl IdentityChannel for CookieJar {
    fn name(&self) -> &'static str {
        "cookie"
    }

    fn read(&self, key: &str) -> Result<Option<String>, IdentityError> {
        let now = Utc::now();
        Ok(self
            .load()?
            .into_iter()
            .find(|cookie| cookie.key == key && cookie.is_live(now))
            .map(|cookie| percent_decode_str(&cookie.value).decode_utf8_lossy().into_owned()))
    }

    fn write(&self, key: &str, value: &str) -> Result<(), IdentityError> {
        let now = Utc::now();
        let mut cookies: Vec<Cookie> = self
            .load()?
            .into_iter()
            .filter(|cookie| cookie.key != key && cookie.is_live(now))
            .collect();
        cookies.push(Cookie {
            key: key.to_string(),
            value: utf8_percent_encode(value, NON_ALPHANUMERIC).to_string(),
            expires: Some(now + Duration::days(COOKIE_LIFETIME_DAYS)),
        });

        let content: Vec<String> = cookies.iter().map(Cookie::render).collect();
        ensure_parent(&self.path)?;
        std::fs::write(&self.path, content.join("\n") + "\n")?;
        Ok(())
    }
}

fn ensure_parent(path: &Path) -> Result<(), IdentityError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Reads, mints and persists identities across its channels
pub struct IdentityResolver {
    channels: Vec<Box<dyn IdentityChannel>>,
}

impl IdentityResolver {
    pub fn new(channels: Vec<Box<dyn IdentityChannel>>) -> Self {
        Self { channels }
    }

    /// Storage area and cookie jar in the platform data directory
    pub fn from_default_dirs() -> Result<Self, IdentityError> {
        let dirs = ProjectDirs::from("com", "lean-coffee", "lean-coffee").ok_or(IdentityError::NoDataDir)?;
        let data_dir = dirs.data_dir();
        Ok(Self::new(vec![
            Box::new(StorageArea::new(data_dir.join("identity.json"))),
            Box::new(CookieJar::new(data_dir.join("cookies.txt"))),
        ]))
    }

    pub fn key(session_id: &str) -> String {
        format!("{}{}", KEY_PREFIX, session_id)
    }

    /// First stored identity that parses and carries an external id
    pub fn read(&self, session_id: &str) -> Option<Identity> {
        let key = Self::key(session_id);
        for channel in &self.channels {
            match channel.read(&key) {
                Ok(Some(raw)) => match serde_json::from_str::<Identity>(&raw) {
                    Ok(identity) if identity.is_usable() => return Some(identity),
                    Ok(_) => tracing::debug!("Ignoring identity without external id in {}", channel.name()),
                    Err(e) => tracing::debug!("Ignoring unreadable identity in {}: {}", channel.name(), e),
                },
                Ok(None) => {}
                Err(e) => tracing::warn!("Identity channel {} unavailable: {}", channel.name(), e),
            }
        }
        None
    }

    /// Write to every channel. A failing channel is logged and skipped.
    pub fn write(&self, session_id: &str, identity: &Identity) {
        let key = Self::key(session_id);
        let payload = match serde_json::to_string(identity) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("Could not encode identity: {}", e);
                return;
            }
        };
        for channel in &self.channels {
            if let Err(e) = channel.write(&key, &payload) {
                tracing::warn!("Could not persist identity to {}: {}", channel.name(), e);
            }
        }
    }

    /// The identity to use for a session: the one already held, else a stored one, else a new one
    pub fn ensure(&self, session_id: &str, held: Option<&Identity>) -> Identity {
        held.filter(|identity| identity.is_usable())
            .cloned()
            .or_else(|| self.read(session_id))
            .unwrap_or_else(|| {
                tracing::info!("Minting a new identity for session {}", session_id);
                Identity::mint()
            })
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// In-memory channel; clones share contents
    #[derive(Clone, Default)]
    pub struct MemoryArea {
        entries: Arc<Mutex<HashMap<String, String>>>,
        broken: bool,
    }

    impl MemoryArea {
        pub fn broken() -> Self {
            Self {
                broken: true,
                ..Default::default()
            }
        }

        pub fn get(&self, key: &str) -> Option<String> {
            self.entries.lock().unwrap().get(key).cloned()
        }

        pub fn put(&self, key: &str, value: &str) {
            self.entries.lock().unwrap().insert(key.to_string(), value.to_string());
        }
    }

    impl IdentityChannel for MemoryArea {
        fn name(&self) -> &'static str {
            "memory"
        }

        fn read(&self, key: &str) -> Result<Option<String>, IdentityError> {
            if self.broken {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "unavailable").into());
            }
            Ok(self.get(key))
        }

        fn write(&self, key: &str, value: &str) -> Result<(), IdentityError> {
            if self.broken {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "unavailable").into());
            }
            self.put(key, value);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MemoryArea;
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("lean-coffee-test-{}", Uuid::new_v4()))
            .join(name)
    }

    #[test]
    fn test_key_format() {
        assert_eq!(IdentityResolver::key("recS1"), "leancoffee:user:recS1");
    }

    #[test]
    fn test_identity_json_shape() {
        let identity = Identity {
            external_id: "ext".into(),
            user_id: Some("recU".into()),
        };
        assert_eq!(
            serde_json::to_string(&identity).unwrap(),
            r#"{"externalId":"ext","userId":"recU"}"#
        );
    }

    #[test]
    fn test_storage_area_round_trip_keeps_other_keys() {
        let area = StorageArea::new(temp_path("identity.json"));
        assert_eq!(area.read("a").unwrap(), None);
        area.write("a", "1").unwrap();
        area.write("b", "2").unwrap();
        assert_eq!(area.read("a").unwrap().as_deref(), Some("1"));
        assert_eq!(area.read("b").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn test_cookie_jar_encodes_values() {
        let path = temp_path("cookies.txt");
        let jar = CookieJar::new(&path);
        let value = r#"{"externalId":"a b;c"}"#;
        jar.write("leancoffee:user:recS", value).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains('{'));
        assert!(raw.contains("expires="));
        assert_eq!(jar.read("leancoffee:user:recS").unwrap().as_deref(), Some(value));
    }

    #[test]
    fn test_cookie_jar_ignores_expired() {
        let path = temp_path("cookies.txt");
        ensure_parent(&path).unwrap();
        std::fs::write(&path, "old=gone; expires=2000-01-01T00:00:00+00:00\nkeep=here\n").unwrap();
        let jar = CookieJar::new(&path);
        assert_eq!(jar.read("old").unwrap(), None);
        assert_eq!(jar.read("keep").unwrap().as_deref(), Some("here"));
    }

    #[test]
    fn test_first_parseable_channel_wins() {
        let storage = MemoryArea::default();
        let cookie = MemoryArea::default();
        storage.put("leancoffee:user:recS", "not json");
        cookie.put("leancoffee:user:recS", r#"{"externalId":"from-cookie"}"#);

        let resolver = IdentityResolver::new(vec![Box::new(storage), Box::new(cookie)]);
        assert_eq!(resolver.read("recS").unwrap().external_id, "from-cookie");
    }

    #[test]
    fn test_unusable_copy_does_not_hide_a_usable_one() {
        let storage = MemoryArea::default();
        let cookie = MemoryArea::default();
        storage.put("leancoffee:user:recS", r#"{"externalId":"  ","userId":"recStale"}"#);
        cookie.put("leancoffee:user:recS", r#"{"externalId":"from-cookie","userId":"recU"}"#);

        let resolver = IdentityResolver::new(vec![Box::new(storage), Box::new(cookie)]);
        let identity = resolver.ensure("recS", None);
        assert_eq!(identity.external_id, "from-cookie");
        assert_eq!(identity.user_id.as_deref(), Some("recU"));
    }

    #[test]
    fn test_broken_channel_does_not_block_the_other() {
        let cookie = MemoryArea::default();
        let resolver = IdentityResolver::new(vec![Box::new(MemoryArea::broken()), Box::new(cookie.clone())]);

        let identity = Identity::mint();
        resolver.write("recS", &identity);
        assert!(cookie.get("leancoffee:user:recS").is_some());
        assert_eq!(resolver.read("recS"), Some(identity));
    }

    #[test]
    fn test_ensure_prefers_held_then_stored_then_mints() {
        let area = MemoryArea::default();
        area.put("leancoffee:user:recS", r#"{"externalId":"stored","userId":"recU"}"#);
        let resolver = IdentityResolver::new(vec![Box::new(area)]);

        let held = Identity {
            external_id: "held".into(),
            user_id: None,
        };
        assert_eq!(resolver.ensure("recS", Some(&held)).external_id, "held");
        assert_eq!(resolver.ensure("recS", None).external_id, "stored");

        let minted = resolver.ensure("recOther", None);
        assert!(Uuid::parse_str(&minted.external_id).is_ok());
        assert_eq!(minted.user_id, None);
    }

    #[test]
    fn test_stored_identity_without_external_id_is_replaced() {
        let area = MemoryArea::default();
        area.put("leancoffee:user:recS", r#"{"userId":"recU"}"#);
        let resolver = IdentityResolver::new(vec![Box::new(area)]);
        assert!(resolver.ensure("recS", None).is_usable());
    }
}
