//! Configuration management

use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::blacklist::DEFAULT_USER_AGENT_BLACKLIST;

/// Largest accepted group/entry segment index
const MAX_SEGMENT_INDEX: usize = 64;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory served as the tracked site
    #[serde(default = "default_site_dir")]
    pub site_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            site_dir: default_site_dir(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_site_dir() -> PathBuf {
    PathBuf::from("public")
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Options of the analytics recorder itself
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsConfig {
    /// When set, visitor keys are per-day SHA-256 digests instead of raw addresses
    #[serde(default)]
    pub hash_secret: Option<String>,
    /// Path segment used as the report group (`/blog/x` split on `/`, index 1 = "blog")
    #[serde(default = "default_group_by")]
    pub group_by_segment: usize,
    /// First path segment of the entry label within a group
    #[serde(default = "default_entries_by")]
    pub entries_by_segment: usize,
    #[serde(default = "default_flush_interval")]
    pub flush_interval_seconds: u64,
    /// File name prefix for day files
    #[serde(default = "default_name")]
    pub name: String,
    /// Dashboard access key; no password means an open dashboard
    #[serde(default)]
    pub password: Option<String>,
    /// Storage root for day files
    #[serde(default = "default_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_blacklist")]
    pub user_agent_blacklist: Vec<String>,
    #[serde(default = "default_dashboard_path")]
    pub dashboard_path: String,
    /// How long reloaded past days stay cached (0 disables the cache)
    #[serde(default = "default_history_cache_seconds")]
    pub history_cache_seconds: u64,
}

fn default_group_by() -> usize {
    1
}

fn default_entries_by() -> usize {
    2
}

fn default_flush_interval() -> u64 {
    60
}

fn default_name() -> String {
    "pageviews-".to_string()
}

fn default_directory() -> PathBuf {
    PathBuf::from("data")
}

fn default_blacklist() -> Vec<String> {
    DEFAULT_USER_AGENT_BLACKLIST
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_dashboard_path() -> String {
    "/analytics".to_string()
}

fn default_history_cache_seconds() -> u64 {
    60
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            hash_secret: None,
            group_by_segment: default_group_by(),
            entries_by_segment: default_entries_by(),
            flush_interval_seconds: default_flush_interval(),
            name: default_name(),
            password: None,
            directory: default_directory(),
            user_agent_blacklist: default_blacklist(),
            dashboard_path: default_dashboard_path(),
            history_cache_seconds: default_history_cache_seconds(),
        }
    }
}

impl AnalyticsConfig {
    /// Validate analytics options
    pub fn validate(&self) -> Result<()> {
        if self.flush_interval_seconds == 0 {
            anyhow::bail!("Invalid flush_interval_seconds: must be at least 1");
        }
        if self.name.is_empty() {
            anyhow::bail!("Analytics name (file prefix) cannot be empty");
        }
        if self.name.contains('/') || self.name.contains('\\') {
            anyhow::bail!("Analytics name '{}' must not contain path separators", self.name);
        }
        if self.directory.as_os_str().is_empty() {
            anyhow::bail!("Analytics directory cannot be empty");
        }
        if self.group_by_segment > MAX_SEGMENT_INDEX || self.entries_by_segment > MAX_SEGMENT_INDEX {
            anyhow::bail!(
                "Segment indices must not exceed {} (group_by_segment={}, entries_by_segment={})",
                MAX_SEGMENT_INDEX,
                self.group_by_segment,
                self.entries_by_segment
            );
        }
        if !self.dashboard_path.starts_with('/') || self.dashboard_path.trim_end_matches('/').is_empty() {
            anyhow::bail!(
                "Invalid dashboard_path '{}': must start with '/' and name a sub-path",
                self.dashboard_path
            );
        }
        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_seconds)
    }

    /// Secret actually used for hashing, ignoring an empty string
    pub fn hash_secret(&self) -> Option<&str> {
        self.hash_secret.as_deref().filter(|s| !s.is_empty())
    }

    /// Dashboard password, ignoring an empty string
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref().filter(|s| !s.is_empty())
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = "pageviews.toml";

        let builder = config::Config::builder()
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(config::Environment::with_prefix("PAGEVIEWS").separator("__"));

        let settings = builder.build()?;
        let config: Config = settings.try_deserialize()?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        // Validate server config
        if self.server.port == 0 {
            anyhow::bail!("Invalid port: 0 is not allowed");
        }
        if self.server.host.is_empty() {
            anyhow::bail!("Server host cannot be empty");
        }

        self.analytics.validate()?;

        // Validate logging level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!("Invalid logging level '{}'. Must be one of: {:?}", self.logging.level, valid_levels);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(toml: &str) -> Result<Config> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = from_toml("").expect("empty config");
        config.validate().expect("defaults validate");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.analytics.group_by_segment, 1);
        assert_eq!(config.analytics.entries_by_segment, 2);
        assert_eq!(config.analytics.flush_interval(), Duration::from_secs(60));
        assert!(config.analytics.user_agent_blacklist.contains(&"bot".to_string()));
        assert_eq!(config.analytics.password(), None);
    }

    #[test]
    fn test_analytics_section() {
        let config = from_toml(
            r#"
            [analytics]
            hash_secret = "pepper"
            group_by_segment = 2
            entries_by_segment = 3
            flush_interval_seconds = 5
            name = "blog-"
            password = "secret123"
            directory = "/tmp/pv"
            user_agent_blacklist = ["curl"]
            "#,
        )
        .expect("config");
        config.validate().expect("valid");

        let a = &config.analytics;
        assert_eq!(a.hash_secret(), Some("pepper"));
        assert_eq!(a.password(), Some("secret123"));
        assert_eq!(a.name, "blog-");
        assert_eq!(a.directory, PathBuf::from("/tmp/pv"));
        assert_eq!(a.user_agent_blacklist, vec!["curl".to_string()]);
    }

    #[test]
    fn test_rejects_zero_flush_interval() {
        let config = from_toml("[analytics]\nflush_interval_seconds = 0").expect("config");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut a = AnalyticsConfig::default();
        a.name = String::new();
        assert!(a.validate().is_err());

        let mut a = AnalyticsConfig::default();
        a.name = "../escape".to_string();
        assert!(a.validate().is_err());

        let mut a = AnalyticsConfig::default();
        a.dashboard_path = "analytics".to_string();
        assert!(a.validate().is_err());

        let mut a = AnalyticsConfig::default();
        a.dashboard_path = "/".to_string();
        assert!(a.validate().is_err());

        let mut a = AnalyticsConfig::default();
        a.group_by_segment = 1000;
        assert!(a.validate().is_err());

        let mut config = from_toml("").unwrap();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_secret_and_password_are_unset() {
        let mut a = AnalyticsConfig::default();
        a.hash_secret = Some(String::new());
        a.password = Some(String::new());
        assert_eq!(a.hash_secret(), None);
        assert_eq!(a.password(), None);
    }
}
