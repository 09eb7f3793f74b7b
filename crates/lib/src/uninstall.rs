//! Removing what a setup installed under the prefix.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum UninstallError {
  #[error("failed to remove '{}': {source}", .path.display())]
  Remove {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to scan '{}': {source}", .path.display())]
  Walk {
    path: PathBuf,
    #[source]
    source: walkdir::Error,
  },
}

/// Everything an uninstall touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UninstallPlan {
  /// Removed recursively.
  pub share_dir: Option<PathBuf>,
  pub lib_dir: PathBuf,
  /// A file under `lib_dir` is removed if its name contains any of these.
  pub lib_patterns: Vec<String>,
  pub bin_dir: PathBuf,
  pub bin_patterns: Vec<String>,
  /// The tool's own configuration directory, removed recursively.
  pub config_dir: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct UninstallReport {
  pub removed: Vec<PathBuf>,
}

/// Carry out `plan`. Missing directories are skipped.
pub fn uninstall(plan: &UninstallPlan) -> Result<UninstallReport, UninstallError> {
  let mut report = UninstallReport::default();

  if let Some(share_dir) = &plan.share_dir {
    remove_dir(share_dir, &mut report)?;
  }

  remove_matching(&plan.lib_dir, &plan.lib_patterns, &mut report)?;
  remove_matching(&plan.bin_dir, &plan.bin_patterns, &mut report)?;

  if let Some(config_dir) = &plan.config_dir {
    remove_dir(config_dir, &mut report)?;
  }

  info!(removed = report.removed.len(), "uninstall complete");
  Ok(report)
}

fn remove_dir(dir: &Path, report: &mut UninstallReport) -> Result<(), UninstallError> {
  if !dir.exists() {
    return Ok(());
  }

  fs::remove_dir_all(dir).map_err(|source| UninstallError::Remove {
    path: dir.to_path_buf(),
    source,
  })?;
  debug!(path = %dir.display(), "removed directory");
  report.removed.push(dir.to_path_buf());
  Ok(())
}

fn remove_matching(dir: &Path, patterns: &[String], report: &mut UninstallReport) -> Result<(), UninstallError> {
  if !dir.exists() || patterns.is_empty() {
    return Ok(());
  }

  let mut matches = Vec::new();
  for entry in WalkDir::new(dir) {
    let entry = entry.map_err(|source| UninstallError::Walk {
      path: dir.to_path_buf(),
      source,
    })?;
    if entry.file_type().is_dir() {
      continue;
    }

    let name = entry.file_name().to_string_lossy();
    if patterns.iter().any(|pattern| name.contains(pattern.as_str())) {
      matches.push(entry.into_path());
    }
  }

  for path in matches {
    fs::remove_file(&path).map_err(|source| UninstallError::Remove {
      path: path.clone(),
      source,
    })?;
    debug!(path = %path.display(), "removed file");
    report.removed.push(path);
  }

  Ok(())
}
