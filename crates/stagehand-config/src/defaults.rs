use std::env;
use std::time::Duration;

use camino::Utf8PathBuf;
use dirs::data_dir;

use crate::logging::LogFormat;

/// Default log filter expression used by the daemon.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Loopback interface the HTTP transport binds to unless overridden.
pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";

/// Port the HTTP transport listens on unless overridden.
pub const DEFAULT_HTTP_PORT: u16 = 3000;

/// Name of the group-mapping file stored at the project root.
pub const MAPPING_FILE_NAME: &str = ".usd_stage_mappings.json";

/// File name of the operator notes inside the data directory.
pub const NOTES_FILE_NAME: &str = "operator_notes.txt";

/// Lifetime of an unconsumed confirmation token.
pub const DEFAULT_CONFIRMATION_TTL: Duration = Duration::from_secs(300);

/// Upper bound on a blocking round trip to the scene host.
pub const DEFAULT_SCENE_CALL_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Time an HTTP client has to deliver its request head.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Default log filter expression used by the daemon.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Default logging format for the daemon.
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Directory holding the hosting project, falling back to `.` when the
/// working directory cannot be represented as UTF-8.
pub fn default_project_root() -> Utf8PathBuf {
    env::current_dir()
        .ok()
        .and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
        .unwrap_or_else(|| Utf8PathBuf::from("."))
}

/// Location of the operator notes file, when the platform exposes a data
/// directory.
pub fn default_notes_path() -> Option<Utf8PathBuf> {
    let base = data_dir().and_then(|path| Utf8PathBuf::from_path_buf(path).ok())?;
    Some(base.join("stagehand").join(NOTES_FILE_NAME))
}
