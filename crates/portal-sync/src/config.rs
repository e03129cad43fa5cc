//! # Portal Configuration
//!
//! Configuration for the sync engine and its HTTP transport.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     PORTAL_API_BASE=https://api.portal.example                         │
//! │     PORTAL_DOMAIN=acme.org                                             │
//! │     PORTAL_LIST_CACHE_SECS=60                                          │
//! │     PORTAL_TIMEOUT_SECS=20                                             │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/data-core/portal.toml (Linux)                            │
//! │     ~/Library/Application Support/com.portal.data-core/portal.toml     │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # portal.toml
//! [api]
//! base_url = "https://api.portal.example/v1"
//! timeout_secs = 30
//! max_retries = 3
//!
//! [cache]
//! list_cache_secs = 300   # 0 = keep until invalidated
//! item_cache_secs = 0
//! persist_published = true
//!
//! [client]
//! domain = "acme.org"
//!
//! [merge.keyed]
//! Advert = [{ field = "history", key = "id" }]
//! "*" = [{ field = "notes", key = "key" }]
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use portal_core::MergePolicy;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// API Settings
// =============================================================================

/// Where the server is and how patiently to talk to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL every endpoint hangs off.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout (seconds).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Retries after a connection failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff duration (milliseconds) between retries.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff duration (seconds) between retries.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:8080/api".to_string()
}
fn default_timeout() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    10
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
        }
    }
}

// =============================================================================
// Cache Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// How long a fetched list is reused (seconds, 0 = until invalidated).
    #[serde(default = "default_list_cache")]
    pub list_cache_secs: u64,

    /// How long a fetched item is reused (seconds, 0 = until invalidated).
    #[serde(default)]
    pub item_cache_secs: u64,

    /// Write published items to the local store after get/publish.
    #[serde(default = "default_persist_published")]
    pub persist_published: bool,
}

fn default_list_cache() -> u64 {
    300
}

fn default_persist_published() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            list_cache_secs: default_list_cache(),
            item_cache_secs: 0,
            persist_published: default_persist_published(),
        }
    }
}

fn period(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl CacheConfig {
    pub fn list_cache_period(&self) -> Option<Duration> {
        period(self.list_cache_secs)
    }

    pub fn item_cache_period(&self) -> Option<Duration> {
        period(self.item_cache_secs)
    }
}

// =============================================================================
// Client Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Identifies this client install (UUID v4).
    /// Auto-generated on first run if not provided.
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Default domain for item and list requests.
    #[serde(default)]
    pub domain: Option<String>,
}

fn default_client_id() -> String {
    Uuid::new_v4().to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            client_id: default_client_id(),
            domain: None,
        }
    }
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete portal configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortalConfig {
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub client: ClientConfig,

    /// Collections merged by key identity during reconciliation.
    #[serde(default)]
    pub merge: MergePolicy,
}

impl PortalConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (portal.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading portal config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load portal config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Portal config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        let base = Url::parse(&self.api.base_url).map_err(|e| {
            SyncError::InvalidUrl(format!("{}: {}", self.api.base_url, e))
        })?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(SyncError::InvalidUrl(format!(
                "API base URL must start with http:// or https://, got: {}",
                self.api.base_url
            )));
        }

        if self.api.timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        for (item_type, fields) in &self.merge.keyed {
            if let Some(bad) = fields.iter().find(|f| f.field.is_empty() || f.key.is_empty()) {
                return Err(SyncError::InvalidConfig(format!(
                    "merge.keyed.{item_type}: field and key must be set (got field='{}', key='{}')",
                    bad.field, bad.key
                )));
            }
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("PORTAL_API_BASE") {
            debug!(url = %url, "Overriding API base from environment");
            self.api.base_url = url;
        }

        if let Ok(domain) = std::env::var("PORTAL_DOMAIN") {
            self.client.domain = Some(domain).filter(|d| !d.is_empty());
        }

        if let Ok(secs) = std::env::var("PORTAL_LIST_CACHE_SECS") {
            match secs.parse::<u64>() {
                Ok(s) => self.cache.list_cache_secs = s,
                Err(_) => warn!(value = %secs, "Ignoring invalid PORTAL_LIST_CACHE_SECS"),
            }
        }

        if let Ok(secs) = std::env::var("PORTAL_TIMEOUT_SECS") {
            match secs.parse::<u64>() {
                Ok(s) => self.api.timeout_secs = s,
                Err(_) => warn!(value = %secs, "Ignoring invalid PORTAL_TIMEOUT_SECS"),
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "portal", "data-core")
            .map(|dirs| dirs.config_dir().join("portal.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("portal-config-{}-{}", name, Uuid::new_v4()))
    }

    #[test]
    fn test_default_config() {
        let config = PortalConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache.list_cache_period(), Some(Duration::from_secs(300)));
        assert_eq!(config.cache.item_cache_period(), None);
        assert!(!config.client.client_id.is_empty());
    }

    #[test]
    fn test_validation() {
        let mut config = PortalConfig::default();
        config.api.base_url = "ftp://files.portal.test".into();
        assert!(matches!(config.validate(), Err(SyncError::InvalidUrl(_))));

        let mut config = PortalConfig::default();
        config.api.timeout_secs = 0;
        assert!(matches!(config.validate(), Err(SyncError::InvalidConfig(_))));

        let mut config = PortalConfig::default();
        config.merge = MergePolicy::new().keyed("Advert", "history", "");
        assert!(matches!(config.validate(), Err(SyncError::InvalidConfig(_))));
    }

    #[test]
    fn test_toml_serialization() {
        let mut config = PortalConfig::default();
        config.merge = MergePolicy::new().keyed("Advert", "history", "id");
        let toml_str = toml::to_string_pretty(&config).unwrap();

        assert!(toml_str.contains("[api]"));
        assert!(toml_str.contains("[cache]"));
        assert!(toml_str.contains("[client]"));
        assert!(toml_str.contains("history"));

        let parsed: PortalConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.merge, config.merge);
        assert_eq!(parsed.client.client_id, config.client.client_id);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: PortalConfig = toml::from_str(
            r#"
            [api]
            base_url = "https://api.portal.test/v1"

            [merge.keyed]
            "*" = [{ field = "notes", key = "key" }]
            "#,
        )
        .unwrap();
        assert_eq!(parsed.api.timeout_secs, 30);
        assert_eq!(parsed.cache.list_cache_secs, 300);
        assert_eq!(parsed.merge.keyed["*"][0].field, "notes");
    }

    #[test]
    fn test_save_then_load() {
        let dir = scratch_dir("save");
        let path = dir.join("nested").join("portal.toml");

        let mut config = PortalConfig::default();
        config.api.base_url = "https://api.portal.test".into();
        config.cache.list_cache_secs = 42;
        config.save(Some(path.clone())).unwrap();

        let loaded = PortalConfig::load(Some(path)).unwrap();
        assert_eq!(loaded.cache.list_cache_secs, 42);

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_load_or_default_on_bad_file() {
        let dir = scratch_dir("bad");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("portal.toml");
        std::fs::write(&path, "[api\nbroken").unwrap();

        assert!(PortalConfig::load(Some(path.clone())).is_err());
        let config = PortalConfig::load_or_default(Some(path));
        assert_eq!(config.api.timeout_secs, 30);

        std::fs::remove_dir_all(dir).ok();
    }
}
