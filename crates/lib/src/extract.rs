//! Archive materialization.
//!
//! A downloaded `<stem>.tar.gz` is unpacked into `<cache>/build/<stem>`.
//! Upstream tarballs disagree on layout: most wrap everything in a single
//! directory whose name need not match the archive, some are flat. Both are
//! normalized so the build tree always lives at the path derived from the
//! archive name:
//!
//! | top-level entries in the archive | result                              |
//! |----------------------------------|-------------------------------------|
//! | one directory                    | that directory becomes the target   |
//! | more than one entry              | the staging directory is the target |
//! | one plain file                   | error                               |
//! | nothing                          | error                               |
//!
//! Extraction goes through `<cache>/build/tmp`, which is wiped before use and
//! removed afterwards, so a failed extraction never leaves a target behind.

use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::cache::CacheLayout;
use crate::consts::{ARCHIVE_SUFFIX, EXTRACT_TMP_DIR};

#[derive(Debug, Error)]
pub enum ExtractError {
  #[error("'{}' is not a recognized archive (expected .tar.gz)", .archive.display())]
  UnsupportedArchive { archive: PathBuf },

  #[error("'{}' is not a valid gzip-compressed tar archive: {source}", .archive.display())]
  Corrupt {
    archive: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("archive '{}' is named after the extraction staging directory '{EXTRACT_TMP_DIR}'", .archive.display())]
  ReservedName { archive: PathBuf },

  #[error("archive '{}' contains no files", .archive.display())]
  Empty { archive: PathBuf },

  #[error("archive '{}' contains a single file '{entry}' instead of a directory", .archive.display())]
  SingleFile { archive: PathBuf, entry: String },

  #[error("filesystem error at '{}': {source}", .path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("extraction task failed: {0}")]
  Join(#[from] tokio::task::JoinError),
}

/// Return the materialized directory for `archive`, extracting on a cache miss.
///
/// Unpacking is blocking filesystem work and runs on tokio's blocking pool.
pub async fn materialize(archive: &Path, layout: &CacheLayout) -> Result<PathBuf, ExtractError> {
  let archive = archive.to_path_buf();
  let layout = layout.clone();
  tokio::task::spawn_blocking(move || materialize_blocking(&archive, &layout)).await?
}

/// The archive file name with the trailing `.tar.gz` removed.
///
/// The stem names a directory next to the staging directory, so it cannot be
/// the staging directory's own name.
pub fn archive_stem(archive: &Path) -> Result<&str, ExtractError> {
  let stem = archive
    .file_name()
    .and_then(|name| name.to_str())
    .and_then(|name| name.strip_suffix(ARCHIVE_SUFFIX))
    .filter(|stem| !stem.is_empty())
    .ok_or_else(|| ExtractError::UnsupportedArchive {
      archive: archive.to_path_buf(),
    })?;

  if stem == EXTRACT_TMP_DIR {
    return Err(ExtractError::ReservedName {
      archive: archive.to_path_buf(),
    });
  }
  Ok(stem)
}

fn materialize_blocking(archive: &Path, layout: &CacheLayout) -> Result<PathBuf, ExtractError> {
  let stem = archive_stem(archive)?;
  let target = layout.build_path(stem);

  if target.exists() {
    info!(path = %target.display(), "using cached build files");
    return Ok(target);
  }

  let tmp = layout.extract_tmp_dir();
  if tmp.exists() {
    debug!(path = %tmp.display(), "removing stale extraction directory");
    fs::remove_dir_all(&tmp).map_err(|source| io_err(&tmp, source))?;
  }
  fs::create_dir_all(&tmp).map_err(|source| io_err(&tmp, source))?;

  info!(archive = %archive.display(), target = %target.display(), "extracting archive");
  let result = unpack(archive, &tmp).and_then(|()| normalize(archive, &tmp, &target));

  if tmp.exists()
    && let Err(e) = fs::remove_dir_all(&tmp)
  {
    warn!(path = %tmp.display(), error = %e, "failed to clean up extraction directory");
  }

  match &result {
    Ok(path) => info!(path = %path.display(), "extraction complete"),
    Err(e) => error!(archive = %archive.display(), error = %e, "extraction failed"),
  }
  result
}

fn unpack(archive: &Path, dest: &Path) -> Result<(), ExtractError> {
  let file = File::open(archive).map_err(|source| io_err(archive, source))?;
  let decoder = GzDecoder::new(BufReader::new(file));
  let mut tar = Archive::new(decoder);

  tar.unpack(dest).map_err(|source| ExtractError::Corrupt {
    archive: archive.to_path_buf(),
    source,
  })
}

fn normalize(archive: &Path, tmp: &Path, target: &Path) -> Result<PathBuf, ExtractError> {
  let mut entries = fs::read_dir(tmp)
    .map_err(|source| io_err(tmp, source))?
    .collect::<Result<Vec<_>, _>>()
    .map_err(|source| io_err(tmp, source))?;

  match entries.len() {
    0 => Err(ExtractError::Empty {
      archive: archive.to_path_buf(),
    }),
    1 => {
      let entry = entries.remove(0);
      let file_type = entry.file_type().map_err(|source| io_err(&entry.path(), source))?;

      if !file_type.is_dir() {
        return Err(ExtractError::SingleFile {
          archive: archive.to_path_buf(),
          entry: entry.file_name().to_string_lossy().into_owned(),
        });
      }

      let inner = entry.path();
      debug!(from = %inner.display(), to = %target.display(), "moving single top-level directory");
      fs::rename(&inner, target).map_err(|source| io_err(target, source))?;
      Ok(target.to_path_buf())
    }
    count => {
      debug!(archive = %archive.display(), count, "archive has several top-level entries");
      fs::rename(tmp, target).map_err(|source| io_err(target, source))?;
      Ok(target.to_path_buf())
    }
  }
}

fn io_err(path: &Path, source: io::Error) -> ExtractError {
  ExtractError::Io {
    path: path.to_path_buf(),
    source,
  }
}
