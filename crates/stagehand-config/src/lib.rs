//! Layered configuration for the Stagehand control server.
//!
//! Values are merged from command-line flags, `STAGEHAND_*` environment
//! variables, and configuration files by [`ortho_config`]. Every field is
//! optional; the accessor methods on [`Config`] apply the documented defaults
//! so callers never need to know which layer supplied a value.

mod defaults;
mod logging;

use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use defaults::{
    DEFAULT_CONFIRMATION_TTL, DEFAULT_HTTP_HOST, DEFAULT_HTTP_PORT, DEFAULT_LOG_FILTER,
    DEFAULT_REQUEST_TIMEOUT, DEFAULT_SCENE_CALL_TIMEOUT, MAPPING_FILE_NAME, NOTES_FILE_NAME,
    default_log_filter, default_log_format, default_notes_path, default_project_root,
};
pub use logging::{LogFormat, LogFormatParseError};

/// Runtime configuration shared by the daemon and its collaborators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "STAGEHAND")]
pub struct Config {
    /// Tracing filter expression, for example `info` or `stagehandd=debug`.
    pub log_filter: Option<String>,
    /// Output format for structured logs.
    pub log_format: Option<LogFormat>,
    /// Disables the line-oriented transport on standard input and output.
    pub disable_stdio: Option<bool>,
    /// Disables the HTTP and event-stream transport.
    pub disable_http: Option<bool>,
    /// Interface the HTTP transport binds to.
    pub http_host: Option<String>,
    /// Port the HTTP transport binds to. `0` asks the OS for a free port.
    pub http_port: Option<u16>,
    /// Root of the hosting project; the group-mapping file lives here.
    pub project_root: Option<Utf8PathBuf>,
    /// File holding free-text notes from the operator.
    pub notes_path: Option<Utf8PathBuf>,
    /// Seconds before an unconsumed confirmation token lapses.
    pub confirmation_ttl_secs: Option<u64>,
    /// Milliseconds a handler waits for the scene host before giving up.
    pub scene_call_timeout_ms: Option<u64>,
    /// Milliseconds an HTTP client has to deliver its request head.
    pub request_timeout_ms: Option<u64>,
}

/// Errors reported when configured values cannot be used together.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Both transports were disabled, leaving no way to reach the server.
    #[error("at least one transport must remain enabled")]
    NoTransport,
    /// A duration setting was zero.
    #[error("{setting} must be greater than zero")]
    ZeroDuration {
        /// Name of the offending setting.
        setting: &'static str,
    },
    /// The HTTP host was blank.
    #[error("http_host must not be empty")]
    EmptyHost,
}

impl Config {
    /// Returns the tracing filter expression.
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER)
    }

    /// Returns the log output format.
    pub fn log_format(&self) -> LogFormat {
        self.log_format.unwrap_or_else(default_log_format)
    }

    /// Whether the line transport should run.
    pub fn stdio_enabled(&self) -> bool {
        !self.disable_stdio.unwrap_or(false)
    }

    /// Whether the HTTP transport should run.
    pub fn http_enabled(&self) -> bool {
        !self.disable_http.unwrap_or(false)
    }

    /// Returns the HTTP bind host.
    pub fn http_host(&self) -> &str {
        self.http_host.as_deref().unwrap_or(DEFAULT_HTTP_HOST)
    }

    /// Returns the HTTP bind port.
    pub fn http_port(&self) -> u16 {
        self.http_port.unwrap_or(DEFAULT_HTTP_PORT)
    }

    /// Returns the project root directory.
    pub fn project_root(&self) -> Utf8PathBuf {
        self.project_root
            .clone()
            .unwrap_or_else(default_project_root)
    }

    /// Returns the path of the persisted group-mapping table.
    pub fn mapping_file(&self) -> Utf8PathBuf {
        self.project_root().join(MAPPING_FILE_NAME)
    }

    /// Returns the operator notes file, if one can be located.
    pub fn notes_path(&self) -> Option<Utf8PathBuf> {
        self.notes_path.clone().or_else(default_notes_path)
    }

    /// Returns how long confirmation tokens stay valid.
    pub fn confirmation_ttl(&self) -> Duration {
        self.confirmation_ttl_secs
            .map_or(DEFAULT_CONFIRMATION_TTL, Duration::from_secs)
    }

    /// Returns the bound on blocking scene-host calls.
    pub fn scene_call_timeout(&self) -> Duration {
        self.scene_call_timeout_ms
            .map_or(DEFAULT_SCENE_CALL_TIMEOUT, Duration::from_millis)
    }

    /// Returns the bound on receiving an HTTP request head.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout_ms
            .map_or(DEFAULT_REQUEST_TIMEOUT, Duration::from_millis)
    }

    /// Checks that the merged values describe a usable server.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] naming the first offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.stdio_enabled() && !self.http_enabled() {
            return Err(ConfigError::NoTransport);
        }
        if self.http_enabled() && self.http_host().trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        let durations = [
            ("confirmation_ttl_secs", self.confirmation_ttl()),
            ("scene_call_timeout_ms", self.scene_call_timeout()),
            ("request_timeout_ms", self.request_timeout()),
        ];
        for (setting, value) in durations {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration { setting });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn defaults_apply_when_fields_are_absent() {
        let config = Config::default();
        assert_eq!(config.log_filter(), "info");
        assert_eq!(config.log_format(), LogFormat::Json);
        assert_eq!(config.http_host(), "127.0.0.1");
        assert_eq!(config.http_port(), 3000);
        assert!(config.stdio_enabled());
        assert!(config.http_enabled());
        assert_eq!(config.confirmation_ttl(), Duration::from_secs(300));
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
    }

    #[rstest]
    fn mapping_file_lives_in_project_root() {
        let config = Config {
            project_root: Some(Utf8PathBuf::from("/srv/project")),
            ..Config::default()
        };
        assert_eq!(
            config.mapping_file(),
            Utf8PathBuf::from("/srv/project/.usd_stage_mappings.json")
        );
    }

    #[rstest]
    fn explicit_notes_path_wins() {
        let config = Config {
            notes_path: Some(Utf8PathBuf::from("/tmp/notes.txt")),
            ..Config::default()
        };
        assert_eq!(
            config.notes_path(),
            Some(Utf8PathBuf::from("/tmp/notes.txt"))
        );
    }

    #[rstest]
    fn validate_rejects_disabling_every_transport() {
        let config = Config {
            disable_stdio: Some(true),
            disable_http: Some(true),
            ..Config::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::NoTransport));
    }

    #[rstest]
    #[case::ttl(Config { confirmation_ttl_secs: Some(0), ..Config::default() }, "confirmation_ttl_secs")]
    #[case::scene(Config { scene_call_timeout_ms: Some(0), ..Config::default() }, "scene_call_timeout_ms")]
    #[case::request(Config { request_timeout_ms: Some(0), ..Config::default() }, "request_timeout_ms")]
    fn validate_rejects_zero_durations(#[case] config: Config, #[case] setting: &'static str) {
        assert_eq!(config.validate(), Err(ConfigError::ZeroDuration { setting }));
    }

    #[rstest]
    fn validate_ignores_blank_host_when_http_disabled() {
        let config = Config {
            disable_http: Some(true),
            http_host: Some("  ".to_owned()),
            ..Config::default()
        };
        assert_eq!(config.validate(), Ok(()));
    }
}
