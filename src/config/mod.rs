//! Configuration management
//!
//! Two layers of configuration exist:
//!
//! - [`Config`]: process-level settings loaded once at startup from
//!   environment variables or a TOML file (database path, target
//!   specification, logging).
//! - [`Settings`]: runtime-tunable settings persisted through the
//!   [`Store`](crate::store::Store) and re-read by the background loops each
//!   tick, so changes take effect without a restart. Every recognized key is
//!   an explicit typed field; unparseable stored values fail closed to the
//!   documented default.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::store::Store;

/// Hard upper bound on probe concurrency, applied regardless of configuration
pub const MAX_WORKERS_CAP: usize = 64;

/// Main process configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Scan configuration
    pub scan: ScanConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Scan-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Target specification: comma-separated CIDR blocks, ranges and addresses
    pub targets: String,

    /// Bounded wait when joining a stopping scheduler loop (seconds)
    pub join_timeout_secs: u64,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database path
    pub sqlite_path: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let targets = std::env::var("PINGWARDEN_TARGETS")
            .unwrap_or_else(|_| String::from("192.168.1.0/24"));

        let join_timeout_secs = std::env::var("PINGWARDEN_JOIN_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(5);

        let sqlite_path = std::env::var("PINGWARDEN_SQLITE_PATH")
            .unwrap_or_else(|_| String::from("data/pingwarden.db"))
            .into();

        let log_level =
            std::env::var("PINGWARDEN_LOG_LEVEL").unwrap_or_else(|_| String::from("info"));
        let log_format =
            std::env::var("PINGWARDEN_LOG_FORMAT").unwrap_or_else(|_| String::from("text"));

        Ok(Self {
            scan: ScanConfig {
                targets,
                join_timeout_secs,
            },
            database: DatabaseConfig { sqlite_path },
            logging: LoggingConfig {
                level: log_level,
                format: log_format,
            },
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.scan.targets.trim().is_empty() {
            anyhow::bail!("scan targets must not be empty");
        }
        if self.scan.join_timeout_secs == 0 {
            anyhow::bail!("join_timeout_secs must be greater than 0");
        }
        Ok(())
    }

    /// Get the scheduler join timeout as a Duration
    #[must_use]
    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.scan.join_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scan: ScanConfig {
                targets: String::from("192.168.1.0/24"),
                join_timeout_secs: 5,
            },
            database: DatabaseConfig {
                sqlite_path: PathBuf::from("data/pingwarden.db"),
            },
            logging: LoggingConfig {
                level: String::from("info"),
                format: String::from("text"),
            },
        }
    }
}

/// DNS-log ingestion mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IngestMode {
    /// Pull from the AdGuard Home query-log API since a timestamp cursor
    Api,
    /// Tail the query-log file from a byte-offset cursor
    File,
}

impl FromStr for IngestMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "file" => Self::File,
            _ => Self::Api,
        })
    }
}

/// Authentication mode for the ntfy channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NtfyAuthMode {
    None,
    Basic,
    Bearer,
}

impl FromStr for NtfyAuthMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "basic" => Self::Basic,
            "bearer" => Self::Bearer,
            _ => Self::None,
        })
    }
}

/// Runtime settings, re-read from the store by the background loops.
///
/// Field defaults mirror the shipped defaults; a stored value that fails to
/// parse leaves the default in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Scan loop
    pub scan_interval_seconds: u64,
    pub ping_timeout_seconds: u64,
    pub ping_count: u32,
    pub max_workers: usize,
    pub target_cap: usize,
    pub reverse_dns: bool,
    pub missing_threshold_minutes: u64,

    // DNS-log ingestion
    pub adguard_enabled: bool,
    pub adguard_mode: IngestMode,
    pub adguard_base_url: String,
    pub adguard_username: Option<String>,
    pub adguard_password: Option<String>,
    pub adguard_querylog_path: String,
    pub adguard_ingest_interval_seconds: u64,
    pub adguard_max_fetch: usize,

    // Notification gating
    pub notify_enabled: bool,
    pub notify_on_new_host: bool,
    pub notify_on_host_gone: bool,
    pub notify_on_link_change: bool,
    pub notify_on_dns_burst: bool,

    // Generic webhook channel
    pub webhook_enabled: bool,
    pub webhook_url: String,
    pub webhook_secret: Option<String>,
    pub webhook_timeout_seconds: u64,

    // Home Assistant webhook channel
    pub ha_webhook_enabled: bool,
    pub ha_webhook_url: String,
    pub ha_webhook_timeout_seconds: u64,

    // ntfy channel
    pub ntfy_enabled: bool,
    pub ntfy_base_url: String,
    pub ntfy_topic: String,
    pub ntfy_auth_mode: NtfyAuthMode,
    pub ntfy_username: Option<String>,
    pub ntfy_password: Option<String>,
    pub ntfy_bearer_token: Option<String>,
    pub ntfy_priority: u8,
    pub ntfy_tags: Vec<String>,

    // API surface
    pub api_rate_limit_rps: f64,

    // Vendor lookup
    pub oui_lookup_enabled: bool,
    pub oui_file_path: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            scan_interval_seconds: 60,
            ping_timeout_seconds: 1,
            ping_count: 1,
            max_workers: 32,
            target_cap: 4096,
            reverse_dns: true,
            missing_threshold_minutes: 10,

            adguard_enabled: false,
            adguard_mode: IngestMode::Api,
            adguard_base_url: String::new(),
            adguard_username: None,
            adguard_password: None,
            adguard_querylog_path: String::new(),
            adguard_ingest_interval_seconds: 30,
            adguard_max_fetch: 500,

            notify_enabled: true,
            notify_on_new_host: true,
            notify_on_host_gone: true,
            notify_on_link_change: true,
            notify_on_dns_burst: false,

            webhook_enabled: false,
            webhook_url: String::new(),
            webhook_secret: None,
            webhook_timeout_seconds: 3,

            ha_webhook_enabled: false,
            ha_webhook_url: String::new(),
            ha_webhook_timeout_seconds: 3,

            ntfy_enabled: false,
            ntfy_base_url: String::from("https://ntfy.sh"),
            ntfy_topic: String::new(),
            ntfy_auth_mode: NtfyAuthMode::None,
            ntfy_username: None,
            ntfy_password: None,
            ntfy_bearer_token: None,
            ntfy_priority: 3,
            ntfy_tags: Vec::new(),

            api_rate_limit_rps: 5.0,

            oui_lookup_enabled: false,
            oui_file_path: String::new(),
        }
    }
}

impl Settings {
    /// Load settings from the store, falling back to defaults per key.
    ///
    /// Store read failures are treated like absent keys: the loop must keep
    /// ticking with safe values even when the settings table is unreadable.
    pub fn load(store: &dyn Store) -> Self {
        let mut s = Self::default();

        s.scan_interval_seconds = get_parsed(store, "scan_interval_seconds", s.scan_interval_seconds);
        s.ping_timeout_seconds = get_parsed(store, "ping_timeout_seconds", s.ping_timeout_seconds);
        s.ping_count = get_parsed(store, "ping_count", s.ping_count);
        s.max_workers = get_parsed(store, "max_workers", s.max_workers);
        s.target_cap = get_parsed(store, "target_cap", s.target_cap);
        s.reverse_dns = get_bool(store, "reverse_dns", s.reverse_dns);
        s.missing_threshold_minutes =
            get_parsed(store, "missing_threshold_minutes", s.missing_threshold_minutes);

        s.adguard_enabled = get_bool(store, "adguard_enabled", s.adguard_enabled);
        s.adguard_mode = get_parsed(store, "adguard_mode", s.adguard_mode);
        s.adguard_base_url = get_string(store, "adguard_base_url", &s.adguard_base_url);
        s.adguard_username = get_optional(store, "adguard_username");
        s.adguard_password = get_optional(store, "adguard_password");
        s.adguard_querylog_path = get_string(store, "adguard_querylog_path", &s.adguard_querylog_path);
        s.adguard_ingest_interval_seconds = get_parsed(
            store,
            "adguard_ingest_interval_seconds",
            s.adguard_ingest_interval_seconds,
        );
        s.adguard_max_fetch = get_parsed(store, "adguard_max_fetch", s.adguard_max_fetch);

        s.notify_enabled = get_bool(store, "notify_enabled", s.notify_enabled);
        s.notify_on_new_host = get_bool(store, "notify_on_new_host", s.notify_on_new_host);
        s.notify_on_host_gone = get_bool(store, "notify_on_host_gone", s.notify_on_host_gone);
        s.notify_on_link_change = get_bool(store, "notify_on_link_change", s.notify_on_link_change);
        s.notify_on_dns_burst = get_bool(store, "notify_on_dns_burst", s.notify_on_dns_burst);

        s.webhook_enabled = get_bool(store, "webhook_enabled", s.webhook_enabled);
        s.webhook_url = get_string(store, "webhook_url", &s.webhook_url);
        s.webhook_secret = get_optional(store, "webhook_secret");
        s.webhook_timeout_seconds =
            get_parsed(store, "webhook_timeout_seconds", s.webhook_timeout_seconds);

        s.ha_webhook_enabled = get_bool(store, "ha_webhook_enabled", s.ha_webhook_enabled);
        s.ha_webhook_url = get_string(store, "ha_webhook_url", &s.ha_webhook_url);
        s.ha_webhook_timeout_seconds = get_parsed(
            store,
            "ha_webhook_timeout_seconds",
            s.ha_webhook_timeout_seconds,
        );

        s.ntfy_enabled = get_bool(store, "ntfy_enabled", s.ntfy_enabled);
        s.ntfy_base_url = get_string(store, "ntfy_base_url", &s.ntfy_base_url);
        s.ntfy_topic = get_string(store, "ntfy_topic", &s.ntfy_topic);
        s.ntfy_auth_mode = get_parsed(store, "ntfy_auth_mode", s.ntfy_auth_mode);
        s.ntfy_username = get_optional(store, "ntfy_username");
        s.ntfy_password = get_optional(store, "ntfy_password");
        s.ntfy_bearer_token = get_optional(store, "ntfy_bearer_token");
        s.ntfy_priority = get_parsed(store, "ntfy_priority", s.ntfy_priority);
        if let Some(tags) = get_optional(store, "ntfy_tags") {
            s.ntfy_tags = tags
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect();
        }

        s.api_rate_limit_rps = get_parsed(store, "api_rate_limit_rps", s.api_rate_limit_rps);

        s.oui_lookup_enabled = get_bool(store, "oui_lookup_enabled", s.oui_lookup_enabled);
        s.oui_file_path = get_string(store, "oui_file_path", &s.oui_file_path);

        s
    }

    /// Per-probe timeout as a Duration
    #[must_use]
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_seconds.max(1))
    }

    /// Effective probe concurrency after applying the hard cap
    #[must_use]
    pub fn effective_workers(&self) -> usize {
        self.max_workers.clamp(1, MAX_WORKERS_CAP)
    }
}

fn get_raw(store: &dyn Store, key: &str) -> Option<String> {
    match store.get_setting(key) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(key, error = %e, "failed to read setting, using default");
            None
        }
    }
}

fn get_string(store: &dyn Store, key: &str, default: &str) -> String {
    match get_raw(store, key) {
        Some(v) if !v.is_empty() => v,
        _ => default.to_string(),
    }
}

fn get_optional(store: &dyn Store, key: &str) -> Option<String> {
    get_raw(store, key).filter(|v| !v.is_empty())
}

fn get_bool(store: &dyn Store, key: &str, default: bool) -> bool {
    match get_raw(store, key) {
        Some(v) => matches!(v.to_lowercase().as_str(), "true" | "1" | "yes" | "on"),
        None => default,
    }
}

fn get_parsed<T: FromStr + Copy>(store: &dyn Store, key: &str, default: T) -> T {
    match get_raw(store, key) {
        Some(v) => v.trim().parse().unwrap_or_else(|_| {
            tracing::debug!(key, value = %v, "unparseable setting, using default");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    #[test]
    fn test_default_config_validates() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_targets_rejected() {
        let mut config = Config::default();
        config.scan.targets = String::from("  ");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_settings_defaults() {
        let store = SqliteStore::in_memory().unwrap();
        let s = Settings::load(&store);
        assert_eq!(s.scan_interval_seconds, 60);
        assert_eq!(s.max_workers, 32);
        assert!(s.reverse_dns);
        assert!(!s.adguard_enabled);
        assert_eq!(s.api_rate_limit_rps, 5.0);
    }

    #[test]
    fn test_settings_overrides_and_fail_closed() {
        let store = SqliteStore::in_memory().unwrap();
        store.set_setting("scan_interval_seconds", "120").unwrap();
        store.set_setting("max_workers", "not-a-number").unwrap();
        store.set_setting("adguard_enabled", "true").unwrap();
        store.set_setting("adguard_mode", "file").unwrap();
        store.set_setting("ntfy_tags", "lan, alert ,").unwrap();

        let s = Settings::load(&store);
        assert_eq!(s.scan_interval_seconds, 120);
        // Unparseable value falls back to the default
        assert_eq!(s.max_workers, 32);
        assert!(s.adguard_enabled);
        assert_eq!(s.adguard_mode, IngestMode::File);
        assert_eq!(s.ntfy_tags, vec!["lan", "alert"]);
    }

    #[test]
    fn test_workers_hard_cap() {
        let store = SqliteStore::in_memory().unwrap();
        store.set_setting("max_workers", "512").unwrap();
        let s = Settings::load(&store);
        assert_eq!(s.effective_workers(), MAX_WORKERS_CAP);
    }
}
