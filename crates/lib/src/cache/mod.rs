//! On-disk cache layout and maintenance.
//!
//! The layout is fixed so a cache populated by one run is reused by the next:
//!
//! ```text
//! <cache>/download/<basename(url)>   fetched archives
//! <cache>/build/<archive stem>       materialized build trees
//! <cache>/build/tmp                  extraction staging, transient
//! <cache>/.lock                      held for the duration of a run
//! ```
//!
//! Cache hits are trusted as-is. Clearing stale entries is the operator's
//! job, done through [`clear`].

mod lock;

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::consts::{BUILD_DIR, DOWNLOAD_DIR, EXTRACT_TMP_DIR};

pub use lock::{CacheLock, LockError, LockMetadata};

#[derive(Debug, Error)]
pub enum CacheError {
  #[error("failed to remove {}: {source}", .path.display())]
  Remove {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Paths derived from a cache root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLayout {
  root: PathBuf,
}

impl CacheLayout {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn download_dir(&self) -> PathBuf {
    self.root.join(DOWNLOAD_DIR)
  }

  pub fn build_dir(&self) -> PathBuf {
    self.root.join(BUILD_DIR)
  }

  pub fn extract_tmp_dir(&self) -> PathBuf {
    self.build_dir().join(EXTRACT_TMP_DIR)
  }

  /// Where a fetched file for `file_name` lives.
  pub fn download_path(&self, file_name: &str) -> PathBuf {
    self.download_dir().join(file_name)
  }

  /// Where the materialized tree for `stem` lives.
  pub fn build_path(&self, stem: &str) -> PathBuf {
    self.build_dir().join(stem)
  }
}

/// Which parts of the cache to clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClearOptions {
  pub build: bool,
  pub download: bool,
}

impl Default for ClearOptions {
  /// Build trees only; downloads are kept since they are the expensive part.
  fn default() -> Self {
    Self {
      build: true,
      download: false,
    }
  }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClearStats {
  pub removed: Vec<PathBuf>,
  pub bytes_freed: u64,
}

/// Remove the selected cache subtrees. Missing subtrees are not an error.
pub fn clear(layout: &CacheLayout, options: ClearOptions) -> Result<ClearStats, CacheError> {
  let mut stats = ClearStats::default();

  for (selected, dir) in [
    (options.build, layout.build_dir()),
    (options.download, layout.download_dir()),
  ] {
    if !selected || !dir.exists() {
      continue;
    }

    let size = dir_size(&dir);
    std::fs::remove_dir_all(&dir).map_err(|source| CacheError::Remove {
      path: dir.clone(),
      source,
    })?;
    debug!(path = %dir.display(), bytes = size, "removed directory");

    stats.bytes_freed += size;
    stats.removed.push(dir);
  }

  info!(
    removed = stats.removed.len(),
    bytes_freed = stats.bytes_freed,
    "cache cleared"
  );
  Ok(stats)
}

fn dir_size(path: &Path) -> u64 {
  WalkDir::new(path)
    .into_iter()
    .filter_map(|e| e.ok())
    .filter(|e| e.file_type().is_file())
    .filter_map(|e| e.metadata().ok())
    .map(|m| m.len())
    .sum()
}
