//! Crate-wide constants.

use std::time::Duration;

/// Application name, used for config and cache directory names.
pub const APP_NAME: &str = "stagebuild";

/// Environment variable that overrides the config file location.
pub const CONFIG_ENV: &str = "STAGEBUILD_CONFIG";

/// Default config file name inside the config directory.
pub const CONFIG_FILENAME: &str = "config.toml";

/// Subdirectory of the cache root holding downloaded archives.
pub const DOWNLOAD_DIR: &str = "download";

/// Subdirectory of the cache root holding materialized build trees.
pub const BUILD_DIR: &str = "build";

/// Staging directory under the build cache used during extraction.
pub const EXTRACT_TMP_DIR: &str = "tmp";

/// The only archive suffix the materializer accepts.
pub const ARCHIVE_SUFFIX: &str = ".tar.gz";

/// How often a paused or running command re-checks the control signal.
pub const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Time a terminated command gets between SIGTERM and SIGKILL.
pub const TERMINATE_GRACE_PERIOD: Duration = Duration::from_secs(5);
