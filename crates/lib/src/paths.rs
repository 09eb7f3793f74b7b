//! Default locations and `~` expansion for configured paths.

use std::path::{Path, PathBuf};

use crate::consts::{APP_NAME, CONFIG_ENV, CONFIG_FILENAME};

/// Returns the user's home directory
pub fn home_dir() -> PathBuf {
  std::env::var_os("HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns the directory for configuration files for the application
pub fn config_dir() -> PathBuf {
  let config_home = std::env::var("XDG_CONFIG_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".config"));
  config_home.join(APP_NAME)
}

/// Returns the directory for cache files for the application
pub fn cache_dir() -> PathBuf {
  let cache_home = std::env::var("XDG_CACHE_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".cache"));
  cache_home.join(APP_NAME)
}

/// Returns the config file path, honoring `STAGEBUILD_CONFIG`.
pub fn config_file() -> PathBuf {
  std::env::var_os(CONFIG_ENV)
    .map(PathBuf::from)
    .unwrap_or_else(|| config_dir().join(CONFIG_FILENAME))
}

/// Expand a leading `~` and make the result absolute.
///
/// Relative paths are resolved against `base`. The path does not need to
/// exist, so no canonicalization happens here.
pub fn expand(path_str: &str, base: &Path) -> PathBuf {
  let expanded = if let Some(rest) = path_str.strip_prefix("~/") {
    home_dir().join(rest)
  } else if path_str == "~" {
    home_dir()
  } else {
    PathBuf::from(path_str)
  };

  if expanded.is_absolute() {
    expanded
  } else {
    base.join(expanded)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serial_test::serial;

  #[test]
  #[serial]
  fn xdg_config_home_takes_precedence() {
    temp_env::with_vars(
      [
        ("XDG_CONFIG_HOME", Some("/custom/config")),
        ("HOME", Some("/home/user")),
      ],
      || {
        assert_eq!(config_dir(), PathBuf::from("/custom/config").join(APP_NAME));
      },
    );
  }

  #[test]
  #[serial]
  fn xdg_fallback_to_home_directories() {
    temp_env::with_vars(
      [
        ("XDG_CONFIG_HOME", None::<&str>),
        ("XDG_CACHE_HOME", None::<&str>),
        ("HOME", Some("/home/user")),
      ],
      || {
        assert_eq!(config_dir(), PathBuf::from("/home/user/.config").join(APP_NAME));
        assert_eq!(cache_dir(), PathBuf::from("/home/user/.cache").join(APP_NAME));
      },
    );
  }

  #[test]
  #[serial]
  fn config_env_overrides_default_location() {
    temp_env::with_var(CONFIG_ENV, Some("/etc/stagebuild.toml"), || {
      assert_eq!(config_file(), PathBuf::from("/etc/stagebuild.toml"));
    });
  }

  #[test]
  #[serial]
  fn expand_tilde() {
    temp_env::with_var("HOME", Some("/home/user"), || {
      assert_eq!(expand("~/.local", Path::new("/unused")), PathBuf::from("/home/user/.local"));
      assert_eq!(expand("~", Path::new("/unused")), PathBuf::from("/home/user"));
    });
  }

  #[test]
  fn expand_relative_against_base() {
    assert_eq!(expand("cache", Path::new("/srv/setup")), PathBuf::from("/srv/setup/cache"));
    assert_eq!(expand("/opt/prefix", Path::new("/srv/setup")), PathBuf::from("/opt/prefix"));
  }
}
