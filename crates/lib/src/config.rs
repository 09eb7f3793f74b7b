//! The TOML configuration file.
//!
//! ```toml
//! [setup]
//! prefix = "~/.local"
//! cache = "~/.cache/stagebuild"
//! include_paths = ["~/.local/include"]
//! lib_paths = ["~/.local/lib"]
//! log_level = "info"
//!
//! [uninstall]
//! share_dir = "share/shadow"
//! lib_patterns = ["libshadow"]
//! bin_patterns = ["shadow"]
//!
//! [[stages]]
//! key = "openssl"
//! url = "https://www.openssl.org/source/openssl-1.0.1e.tar.gz"
//! commands = ["./config --prefix=$${prefix} -fPIC shared", "make", "make install"]
//! ```
//!
//! Paths may start with `~`. Relative paths are resolved against the
//! directory holding the config file.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::fetch::url_file_name;
use crate::paths;
use crate::placeholder::{self, PlaceholderError};
use crate::stage::{BuildContext, Stage};
use crate::uninstall::UninstallPlan;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config '{}': {source}", .path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("invalid config: {0}")]
  Parse(#[from] toml::de::Error),

  #[error("failed to serialize config: {0}")]
  Serialize(#[from] toml::ser::Error),

  #[error("failed to write config '{}': {source}", .path.display())]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("config '{}' already exists", .0.display())]
  Exists(PathBuf),

  #[error("stage '{0}' is defined more than once")]
  DuplicateStage(String),

  #[error("stage '{key}': url '{url}' has no file name")]
  InvalidUrl { key: String, url: String },

  #[error("stage '{key}': invalid command '{template}': {source}")]
  Template {
    key: String,
    template: String,
    #[source]
    source: PlaceholderError,
  },

  #[error("unknown log level '{0}' (expected one of trace, debug, info, warn, error)")]
  LogLevel(String),

  #[error("invalid [uninstall] section: {0}")]
  Uninstall(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
  pub setup: SetupConfig,
  #[serde(default)]
  pub uninstall: UninstallConfig,
  #[serde(default)]
  pub stages: Vec<Stage>,
  /// Directory relative paths are resolved against.
  #[serde(skip)]
  base_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetupConfig {
  #[serde(default = "default_prefix")]
  pub prefix: String,
  /// Defaults to the XDG cache directory.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub cache: Option<String>,
  #[serde(default)]
  pub include_paths: Vec<String>,
  #[serde(default)]
  pub lib_paths: Vec<String>,
  #[serde(default = "default_log_level")]
  pub log_level: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UninstallConfig {
  /// Directory under the prefix removed as a whole.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub share_dir: Option<String>,
  pub lib_patterns: Vec<String>,
  pub bin_patterns: Vec<String>,
}

fn default_prefix() -> String {
  "~/.local".to_string()
}

fn default_log_level() -> String {
  "info".to_string()
}

impl Default for SetupConfig {
  fn default() -> Self {
    Self {
      prefix: default_prefix(),
      cache: None,
      include_paths: vec!["~/.local/include".to_string()],
      lib_paths: vec!["~/.local/lib".to_string()],
      log_level: default_log_level(),
    }
  }
}

impl Default for UninstallConfig {
  fn default() -> Self {
    Self {
      share_dir: Some("share/shadow".to_string()),
      lib_patterns: vec!["libshadow".to_string()],
      bin_patterns: vec!["shadow".to_string()],
    }
  }
}

impl Default for Config {
  fn default() -> Self {
    Self {
      setup: SetupConfig::default(),
      uninstall: UninstallConfig::default(),
      stages: default_stages(),
      base_dir: PathBuf::new(),
    }
  }
}

/// The stages `init` writes: openssl, libevent, the shadow resources, and shadow.
pub fn default_stages() -> Vec<Stage> {
  vec![
    Stage::new(
      "openssl",
      "https://www.openssl.org/source/openssl-1.0.1e.tar.gz",
      &["./config --prefix=$${prefix} -fPIC shared", "make", "make install"],
    ),
    Stage::new(
      "libevent",
      "https://github.com/libevent/libevent/releases/download/release-2.0.21-stable/libevent-2.0.21-stable.tar.gz",
      &[
        "./configure --prefix=$${prefix} CFLAGS=\"-fPIC $${include_flags}\" LDFLAGS=\"$${lib_flags}\"",
        "make",
        "make install",
      ],
    ),
    Stage::new(
      "shadow-resources",
      "https://github.com/shadow/shadow-resources/archive/v1.0.tar.gz",
      &[],
    ),
    Stage::new(
      "shadow",
      "https://github.com/shadow/shadow/archive/v1.8.0.tar.gz",
      &[
        "cmake -DCMAKE_BUILD_PREFIX=./build -DCMAKE_INSTALL_PREFIX=$${prefix} \
         -DCMAKE_EXTRA_INCLUDES=$${include_paths} -DCMAKE_EXTRA_LIBRARIES=$${lib_paths}",
        "make",
        "make install",
      ],
    ),
  ]
}

impl Config {
  /// Read and validate the config at `path`.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    debug!(path = %path.display(), "loading config");
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;

    let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    Self::parse(&text, &base_dir)
  }

  /// Parse and validate config text, resolving relative paths against `base_dir`.
  pub fn parse(text: &str, base_dir: &Path) -> Result<Self, ConfigError> {
    let mut config: Config = toml::from_str(text)?;
    config.base_dir = base_dir.to_path_buf();
    config.validate()?;
    Ok(config)
  }

  pub fn to_toml(&self) -> Result<String, ConfigError> {
    Ok(toml::to_string_pretty(self)?)
  }

  /// Write the default config to `path`, creating parent directories.
  ///
  /// Refuses to replace an existing file unless `force` is set.
  pub fn write_default(path: &Path, force: bool) -> Result<(), ConfigError> {
    if path.exists() && !force {
      return Err(ConfigError::Exists(path.to_path_buf()));
    }

    let write_err = |source: io::Error| ConfigError::Write {
      path: path.to_path_buf(),
      source,
    };
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(write_err)?;
    }
    std::fs::write(path, Config::default().to_toml()?).map_err(write_err)?;

    info!(path = %path.display(), "wrote default config");
    Ok(())
  }

  fn validate(&self) -> Result<(), ConfigError> {
    if !LOG_LEVELS.contains(&self.setup.log_level.as_str()) {
      return Err(ConfigError::LogLevel(self.setup.log_level.clone()));
    }

    let uninstall = &self.uninstall;
    if uninstall
      .lib_patterns
      .iter()
      .chain(&uninstall.bin_patterns)
      .any(|pattern| pattern.is_empty())
    {
      return Err(ConfigError::Uninstall("patterns must not be empty".to_string()));
    }
    if let Some(share_dir) = &uninstall.share_dir {
      let dir = Path::new(share_dir);
      let escapes = dir
        .components()
        .any(|c| !matches!(c, std::path::Component::Normal(_)));
      if share_dir.is_empty() || escapes {
        return Err(ConfigError::Uninstall(format!(
          "share_dir '{share_dir}' must be a relative path inside the prefix"
        )));
      }
    }

    let mut seen = HashSet::new();
    for stage in &self.stages {
      if !seen.insert(stage.key.as_str()) {
        return Err(ConfigError::DuplicateStage(stage.key.clone()));
      }
      if url_file_name(&stage.url).is_none() {
        return Err(ConfigError::InvalidUrl {
          key: stage.key.clone(),
          url: stage.url.clone(),
        });
      }
      for template in &stage.commands {
        placeholder::parse(template).map_err(|source| ConfigError::Template {
          key: stage.key.clone(),
          template: template.clone(),
          source,
        })?;
      }
    }

    Ok(())
  }

  fn resolve(&self, path: &str) -> PathBuf {
    paths::expand(path, &self.base_dir)
  }

  pub fn prefix(&self) -> PathBuf {
    self.resolve(&self.setup.prefix)
  }

  pub fn cache_root(&self) -> PathBuf {
    match &self.setup.cache {
      Some(cache) => self.resolve(cache),
      None => paths::cache_dir(),
    }
  }

  pub fn log_level(&self) -> &str {
    &self.setup.log_level
  }

  pub fn build_context(&self) -> BuildContext {
    BuildContext {
      prefix: self.prefix(),
      cache_root: self.cache_root(),
      include_paths: self.setup.include_paths.iter().map(|p| self.resolve(p)).collect(),
      lib_paths: self.setup.lib_paths.iter().map(|p| self.resolve(p)).collect(),
    }
  }

  pub fn stages(&self) -> &[Stage] {
    &self.stages
  }

  /// What `uninstall` removes, plus the tool's own `config_dir`.
  pub fn uninstall_plan(&self, config_dir: Option<PathBuf>) -> UninstallPlan {
    let prefix = self.prefix();
    UninstallPlan {
      share_dir: self.uninstall.share_dir.as_ref().map(|dir| prefix.join(dir)),
      lib_dir: prefix.join("lib"),
      lib_patterns: self.uninstall.lib_patterns.clone(),
      bin_dir: prefix.join("bin"),
      bin_patterns: self.uninstall.bin_patterns.clone(),
      config_dir,
    }
  }
}
