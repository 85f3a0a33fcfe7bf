//! Shared configuration for assetsync tools.
//!
//! TOML profiles merged with `ASSETSYNC_*` environment variables, validated
//! and translated to `assetsync_core::SyncConfig`. The CLI layers its flag
//! overrides on top.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use assetsync_core::{ConnectionConfig, HeartbeatConfig, ReconnectPolicy, SyncConfig};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{name}' not found (available: {available})")]
    ProfileNotFound { name: String, available: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is requested.
    pub default_profile: Option<String>,

    /// Timings applied to every profile unless it overrides them.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named push endpoints.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Defaults {
    pub heartbeat_interval_secs: u64,
    pub pong_timeout_secs: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_jitter_ms: u64,
    pub max_attempts: u32,
    pub connect_timeout_secs: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 30,
            pong_timeout_secs: 10,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            max_jitter_ms: 1_000,
            max_attempts: 5,
            connect_timeout_secs: 10,
        }
    }
}

/// A named push endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Profile {
    /// WebSocket URL (e.g., "wss://inventory.example.com/ws").
    pub url: String,

    /// Channels subscribed on start.
    #[serde(default)]
    pub channels: Vec<String>,

    /// Override `defaults.heartbeat_interval_secs`.
    pub heartbeat_interval_secs: Option<u64>,

    /// Override `defaults.pong_timeout_secs`.
    pub pong_timeout_secs: Option<u64>,

    /// Override `defaults.max_attempts`.
    pub max_attempts: Option<u32>,

    /// Override `defaults.connect_timeout_secs`.
    pub connect_timeout_secs: Option<u64>,
}

impl Profile {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            channels: Vec::new(),
            heartbeat_interval_secs: None,
            pong_timeout_secs: None,
            max_attempts: None,
            connect_timeout_secs: None,
        }
    }
}

impl Config {
    /// Name of the profile to use: `requested`, else `default_profile`,
    /// else `"default"`.
    pub fn active_profile_name(&self, requested: Option<&str>) -> String {
        requested
            .map(str::to_owned)
            .or_else(|| self.default_profile.clone())
            .unwrap_or_else(|| "default".into())
    }

    /// Look up a profile by name.
    pub fn profile(&self, name: &str) -> Result<&Profile, ConfigError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ConfigError::ProfileNotFound {
                name: name.into(),
                available: self.profile_names().join(", "),
            })
    }

    /// Profile names, sorted.
    pub fn profile_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Render as pretty TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "assetsync", "assetsync").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("assetsync");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` + environment. A missing file yields the defaults.
///
/// Nested keys use a double underscore:
/// `ASSETSYNC_DEFAULTS__MAX_ATTEMPTS=3`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("ASSETSYNC_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Translation to runtime config ───────────────────────────────────

/// Build a validated `SyncConfig` from a profile and the global defaults.
pub fn profile_to_sync_config(
    profile: &Profile,
    defaults: &Defaults,
) -> Result<SyncConfig, ConfigError> {
    let mut config = url_to_sync_config(&profile.url, &profile_timings(profile, defaults))?;
    config.channels.clone_from(&profile.channels);
    Ok(config)
}

/// Build a validated `SyncConfig` for a bare URL using `defaults` timings.
pub fn url_to_sync_config(url: &str, defaults: &Defaults) -> Result<SyncConfig, ConfigError> {
    let url = parse_push_url(url)?;
    let connection = connection_config(defaults)?;
    let mut config = SyncConfig::new(url);
    config.connection = connection;
    Ok(config)
}

fn profile_timings(profile: &Profile, defaults: &Defaults) -> Defaults {
    Defaults {
        heartbeat_interval_secs: profile
            .heartbeat_interval_secs
            .unwrap_or(defaults.heartbeat_interval_secs),
        pong_timeout_secs: profile.pong_timeout_secs.unwrap_or(defaults.pong_timeout_secs),
        max_attempts: profile.max_attempts.unwrap_or(defaults.max_attempts),
        connect_timeout_secs: profile
            .connect_timeout_secs
            .unwrap_or(defaults.connect_timeout_secs),
        ..defaults.clone()
    }
}

/// Parse and check a push endpoint URL (`ws://` or `wss://`).
pub fn parse_push_url(raw: &str) -> Result<Url, ConfigError> {
    let url: Url = raw
        .parse()
        .map_err(|e| invalid("url", format!("'{raw}': {e}")))?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(invalid(
            "url",
            format!("expected a ws:// or wss:// URL, got scheme '{other}'"),
        )),
    }
}

/// Validate timings and convert them to a `ConnectionConfig`.
pub fn connection_config(timings: &Defaults) -> Result<ConnectionConfig, ConfigError> {
    for (field, value) in [
        ("heartbeat_interval_secs", timings.heartbeat_interval_secs),
        ("pong_timeout_secs", timings.pong_timeout_secs),
        ("initial_backoff_ms", timings.initial_backoff_ms),
        ("max_backoff_ms", timings.max_backoff_ms),
        ("connect_timeout_secs", timings.connect_timeout_secs),
    ] {
        if value == 0 {
            return Err(invalid(field, "must be greater than zero"));
        }
    }
    if timings.pong_timeout_secs >= timings.heartbeat_interval_secs {
        return Err(invalid(
            "pong_timeout_secs",
            format!(
                "must be shorter than the heartbeat interval ({}s)",
                timings.heartbeat_interval_secs
            ),
        ));
    }
    if timings.max_backoff_ms < timings.initial_backoff_ms {
        return Err(invalid(
            "max_backoff_ms",
            format!(
                "must be at least initial_backoff_ms ({})",
                timings.initial_backoff_ms
            ),
        ));
    }

    Ok(ConnectionConfig {
        heartbeat: HeartbeatConfig {
            interval: Duration::from_secs(timings.heartbeat_interval_secs),
            pong_timeout: Duration::from_secs(timings.pong_timeout_secs),
        },
        reconnect: ReconnectPolicy {
            initial_backoff: Duration::from_millis(timings.initial_backoff_ms),
            max_backoff: Duration::from_millis(timings.max_backoff_ms),
            max_jitter: Duration::from_millis(timings.max_jitter_ms),
            max_attempts: timings.max_attempts,
        },
        connect_timeout: Duration::from_secs(timings.connect_timeout_secs),
    })
}
