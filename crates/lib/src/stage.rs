//! One stage: fetch, extract, build.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

use crate::cache::CacheLayout;
use crate::control::ControlSignal;
use crate::extract::{self, ExtractError};
use crate::fetch::{self, FetchError};
use crate::placeholder::{self, Placeholder, PlaceholderError, Resolver};
use crate::process::{self, BuildError};

/// Paths shared by every stage of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildContext {
  pub prefix: PathBuf,
  pub cache_root: PathBuf,
  pub include_paths: Vec<PathBuf>,
  pub lib_paths: Vec<PathBuf>,
}

impl BuildContext {
  pub fn layout(&self) -> CacheLayout {
    CacheLayout::new(&self.cache_root)
  }

  /// Where installed binaries end up.
  pub fn bin_dir(&self) -> PathBuf {
    self.prefix.join("bin")
  }

  /// `-I<path>` for each include path, space separated.
  pub fn include_flags(&self) -> String {
    flags("-I", &self.include_paths)
  }

  /// `-L<path>` for each library path, space separated.
  pub fn lib_flags(&self) -> String {
    flags("-L", &self.lib_paths)
  }
}

fn flags(flag: &str, paths: &[PathBuf]) -> String {
  paths
    .iter()
    .map(|p| format!("{flag}{}", p.display()))
    .collect::<Vec<_>>()
    .join(" ")
}

fn joined(paths: &[PathBuf]) -> String {
  paths
    .iter()
    .map(|p| p.display().to_string())
    .collect::<Vec<_>>()
    .join(";")
}

impl Resolver for BuildContext {
  fn resolve(&self, placeholder: Placeholder) -> String {
    match placeholder {
      Placeholder::Prefix => self.prefix.display().to_string(),
      Placeholder::Cache => self.cache_root.display().to_string(),
      Placeholder::IncludeFlags => self.include_flags(),
      Placeholder::LibFlags => self.lib_flags(),
      Placeholder::IncludePaths => joined(&self.include_paths),
      Placeholder::LibPaths => joined(&self.lib_paths),
    }
  }
}

/// A resource and the commands that build it.
///
/// Commands are templates; `$${...}` placeholders are filled from the
/// [`BuildContext`] right before the stage runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Stage {
  pub key: String,
  pub url: String,
  #[serde(default)]
  pub commands: Vec<String>,
}

impl Stage {
  pub fn new(key: impl Into<String>, url: impl Into<String>, commands: &[&str]) -> Self {
    Self {
      key: key.into(),
      url: url.into(),
      commands: commands.iter().map(|c| c.to_string()).collect(),
    }
  }

  /// The commands with every placeholder substituted.
  pub fn render_commands(&self, ctx: &BuildContext) -> Result<Vec<String>, StageError> {
    self
      .commands
      .iter()
      .map(|template| {
        placeholder::substitute(template, ctx).map_err(|source| StageError::Placeholder {
          key: self.key.clone(),
          template: template.clone(),
          source,
        })
      })
      .collect()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StagePhase {
  Fetch,
  Extract,
  Build,
}

impl fmt::Display for StagePhase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      StagePhase::Fetch => write!(f, "fetch"),
      StagePhase::Extract => write!(f, "extract"),
      StagePhase::Build => write!(f, "build"),
    }
  }
}

/// Where a stage is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
  Pending,
  Fetching,
  Extracting,
  Building,
  Succeeded,
  Failed(StagePhase),
  Cancelled(StagePhase),
}

impl StageState {
  pub fn phase(&self) -> Option<StagePhase> {
    match self {
      StageState::Fetching => Some(StagePhase::Fetch),
      StageState::Extracting => Some(StagePhase::Extract),
      StageState::Building => Some(StagePhase::Build),
      StageState::Failed(phase) | StageState::Cancelled(phase) => Some(*phase),
      StageState::Pending | StageState::Succeeded => None,
    }
  }
}

#[derive(Debug, Error)]
pub enum StageError {
  #[error("stage '{key}': problem downloading: {source}")]
  Fetch {
    key: String,
    #[source]
    source: FetchError,
  },

  #[error("stage '{key}': problem extracting: {source}")]
  Extract {
    key: String,
    #[source]
    source: ExtractError,
  },

  #[error("stage '{key}': problem building: {source}")]
  Build {
    key: String,
    #[source]
    source: BuildError,
  },

  #[error("stage '{key}': invalid command '{template}': {source}")]
  Placeholder {
    key: String,
    template: String,
    #[source]
    source: PlaceholderError,
  },

  #[error("stage '{key}' cancelled during {phase}")]
  Cancelled { key: String, phase: StagePhase },
}

impl StageError {
  pub fn key(&self) -> &str {
    match self {
      StageError::Fetch { key, .. }
      | StageError::Extract { key, .. }
      | StageError::Build { key, .. }
      | StageError::Placeholder { key, .. }
      | StageError::Cancelled { key, .. } => key,
    }
  }

  pub fn phase(&self) -> StagePhase {
    match self {
      StageError::Fetch { .. } => StagePhase::Fetch,
      StageError::Extract { .. } => StagePhase::Extract,
      StageError::Build { .. } | StageError::Placeholder { .. } => StagePhase::Build,
      StageError::Cancelled { phase, .. } => *phase,
    }
  }

  pub fn is_cancelled(&self) -> bool {
    matches!(self, StageError::Cancelled { .. })
  }

  fn fetch(key: &str, source: FetchError) -> Self {
    match source {
      FetchError::Cancelled { .. } => Self::cancelled(key, StagePhase::Fetch),
      source => StageError::Fetch {
        key: key.to_string(),
        source,
      },
    }
  }

  fn build(key: &str, source: BuildError) -> Self {
    match source {
      BuildError::Cancelled { .. } => Self::cancelled(key, StagePhase::Build),
      source => StageError::Build {
        key: key.to_string(),
        source,
      },
    }
  }

  fn cancelled(key: &str, phase: StagePhase) -> Self {
    StageError::Cancelled {
      key: key.to_string(),
      phase,
    }
  }
}

/// Run one stage, reporting every state change through `report`.
///
/// Returns the materialized build directory. Phases run strictly in order
/// and a cancel request is honored before each one starts.
pub async fn run_stage(
  stage: &Stage,
  ctx: &BuildContext,
  control: &ControlSignal,
  mut report: impl FnMut(StageState),
) -> Result<PathBuf, StageError> {
  report(StageState::Pending);

  let result = run_phases(stage, ctx, control, &mut report).await;

  match &result {
    Ok(dir) => {
      info!(key = %stage.key, path = %dir.display(), "stage succeeded");
      report(StageState::Succeeded);
    }
    Err(e) if e.is_cancelled() => {
      info!(key = %stage.key, phase = %e.phase(), "stage cancelled");
      report(StageState::Cancelled(e.phase()));
    }
    Err(e) => {
      error!(key = %stage.key, phase = %e.phase(), error = %e, "cannot proceed");
      report(StageState::Failed(e.phase()));
    }
  }

  result
}

async fn run_phases(
  stage: &Stage,
  ctx: &BuildContext,
  control: &ControlSignal,
  report: &mut impl FnMut(StageState),
) -> Result<PathBuf, StageError> {
  let key = stage.key.as_str();
  let commands = stage.render_commands(ctx)?;
  let layout = ctx.layout();

  checkpoint(key, StagePhase::Fetch, control)?;
  report(StageState::Fetching);
  let archive = fetch::fetch(&stage.url, &layout, control)
    .await
    .map_err(|source| StageError::fetch(key, source))?;

  checkpoint(key, StagePhase::Extract, control)?;
  report(StageState::Extracting);
  let dir = extract::materialize(&archive, &layout)
    .await
    .map_err(|source| StageError::Extract {
      key: key.to_string(),
      source,
    })?;

  checkpoint(key, StagePhase::Build, control)?;
  report(StageState::Building);
  build(key, &commands, &dir, control).await?;

  Ok(dir)
}

async fn build(key: &str, commands: &[String], dir: &Path, control: &ControlSignal) -> Result<(), StageError> {
  process::run_commands(commands, dir, control)
    .await
    .map_err(|source| StageError::build(key, source))
}

fn checkpoint(key: &str, next: StagePhase, control: &ControlSignal) -> Result<(), StageError> {
  if control.is_cancel_requested() {
    return Err(StageError::cancelled(key, next));
  }
  Ok(())
}
