//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use assetsync_config::ConfigError;
use assetsync_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to {url}")]
    #[diagnostic(
        code(assetsync::connection_failed),
        help(
            "Check that the inventory server is running and the URL is correct.\n\
             URL: {url}"
        )
    )]
    ConnectionFailed {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Gave up reconnecting after {attempts} attempts")]
    #[diagnostic(
        code(assetsync::reconnect_exhausted),
        help(
            "The push channel kept closing abnormally.\n\
             Raise defaults.max_attempts in your config or check server health."
        )
    )]
    ReconnectExhausted { attempts: u32 },

    #[error("Timed out after {millis}ms")]
    #[diagnostic(
        code(assetsync::timeout),
        help("Increase connect_timeout_secs or check server responsiveness.")
    )]
    Timeout { millis: u64 },

    #[error("Protocol error: {message}")]
    #[diagnostic(code(assetsync::protocol))]
    Protocol { message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(assetsync::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(assetsync::profile_not_found),
        help("Available profiles: {available}")
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No push endpoint configured")]
    #[diagnostic(
        code(assetsync::no_config),
        help(
            "Pass --url ws://host/ws, or add a profile to the config file.\n\
             Expected at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(assetsync::config))]
    Config(Box<figment::Error>),

    // ── IO / Serialization ────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to encode output: {0}")]
    #[diagnostic(code(assetsync::json))]
    Json(#[from] serde_json::Error),
}

impl From<figment::Error> for CliError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::ReconnectExhausted { .. } => {
                exit_code::CONNECTION
            }
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::NoConfig { .. } => exit_code::USAGE,
            Self::ProfileNotFound { .. } => exit_code::NOT_FOUND,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { url, reason } => CliError::ConnectionFailed {
                url,
                source: reason.into(),
            },

            CoreError::ConnectionClosed => CliError::ConnectionFailed {
                url: "(closed)".into(),
                source: "Connection task has shut down".into(),
            },

            CoreError::ReconnectExhausted { attempts } => CliError::ReconnectExhausted { attempts },

            CoreError::Timeout { timeout_ms } => CliError::Timeout { millis: timeout_ms },

            CoreError::Protocol { message } => CliError::Protocol { message },

            CoreError::Subscriber { topic, message } => CliError::Protocol {
                message: format!("subscriber on '{topic}' failed: {message}"),
            },

            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::ProfileNotFound { name, available } => {
                CliError::ProfileNotFound { name, available }
            }
            ConfigError::Serialization(e) => CliError::Validation {
                field: "config".into(),
                reason: format!("failed to serialize config: {e}"),
            },
            ConfigError::Figment(e) => CliError::Config(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_reconnects_exit_with_connection_code() {
        let err = CliError::from(CoreError::ReconnectExhausted { attempts: 5 });
        assert_eq!(err.exit_code(), exit_code::CONNECTION);
    }

    #[test]
    fn config_validation_is_a_usage_error() {
        let err = CliError::from(ConfigError::Validation {
            field: "url".into(),
            reason: "expected a ws:// or wss:// URL".into(),
        });
        assert_eq!(err.exit_code(), exit_code::USAGE);
    }
}
